use clap::{Arg, ArgAction, ArgMatches, Command};
use repotools_core::constants::{DAY, EXIT_ERROR, EXIT_OK, EXIT_SETUP, WEEK};
use repotools_core::shutdown::cancel_on_signal;
use repotools_core::traffic::{append_csv, format_table, TrafficPeriod};
use repotools_core::{Context, GitHubClient, RepoHandle, RepoToolsError, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("github_traffic")
        .version("0.1.0")
        .about("Pull clone traffic statistics from the GitHub traffic API")
        .author("Jim Lawson")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Set verbosity level (repeat for more)"),
        )
        .arg(
            Arg::new("save-csv")
                .short('s')
                .long("save-csv")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Append results to the specified CSV file"),
        )
        .arg(
            Arg::new("period")
                .short('p')
                .long("period")
                .value_parser([DAY, WEEK])
                .default_value(WEEK)
                .help("Period for traffic statistics"),
        )
        .arg(
            Arg::new("paths")
                .value_name("PATHS")
                .num_args(1..)
                .required(true)
                .help("GitHub repositories (local clone, URL or owner/name)"),
        )
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    // Initialize tracing, RUST_LOG wins over -v
    let level = match matches.get_count("verbose") {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let cancel = cancel_on_signal();

    let result = match Context::from_env() {
        Ok(ctx) => run(&matches, &ctx, &cancel).await,
        Err(err) => Err(RepoToolsError::Config(err.to_string())),
    };
    if let Err(err) = &result {
        error!("{}", err);
    }
    ExitCode::from(exit_status(&result))
}

fn exit_status(result: &Result<()>) -> u8 {
    match result {
        Ok(()) => EXIT_OK,
        Err(err) if err.is_setup() => EXIT_SETUP,
        Err(_) => EXIT_ERROR,
    }
}

async fn run(matches: &ArgMatches, ctx: &Context, cancel: &CancellationToken) -> Result<()> {
    if ctx.ctx_out {
        info!("Context: {:?}", ctx);
    }

    if !ctx.has_token() {
        warn!("No GitHub token configured; the traffic API requires push access to each repository");
    }

    let period: TrafficPeriod = matches
        .get_one::<String>("period")
        .map(String::as_str)
        .unwrap_or(WEEK)
        .parse()?;
    let save_csv = matches.get_one::<PathBuf>("save-csv");

    // Resolve everything up front so a bad argument fails before any request
    let repos = matches
        .get_many::<String>("paths")
        .into_iter()
        .flatten()
        .map(|path| RepoHandle::resolve(path))
        .collect::<Result<Vec<_>>>()?;

    let client = GitHubClient::new(ctx).map_err(|err| err.into_setup("cannot set up GitHub client"))?;
    let (remaining, reset_time) = client.ensure_reachable().await?;
    info!(
        "GitHub API rate limit: {} remaining, resets at {}",
        remaining,
        reset_time.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for repo in repos {
        if cancel.is_cancelled() {
            warn!("Interrupted before {}", repo);
            break;
        }

        let traffic = client.traffic_clones(&repo, period).await?;
        println!("{}", format_table(&repo.full_name(), period, &traffic));

        if let Some(path) = save_csv {
            append_csv(path, &repo.full_name(), period, &traffic)?;
            info!("Saved {} bucket(s) for {} to {}", traffic.clones.len(), repo, path.display());
        }
    }

    Ok(())
}
