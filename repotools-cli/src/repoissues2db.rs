use chrono::NaiveDate;
use clap::{Arg, ArgAction, ArgMatches, Command};
use repotools_core::constants::{EXIT_ERROR, EXIT_OK, EXIT_SETUP};
use repotools_core::mirror::parse_since;
use repotools_core::shutdown::cancel_on_signal;
use repotools_core::{Context, GitHubClient, IssueMirror, MirrorStore, RepoHandle, RepoToolsError, Result};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("repoissues2db")
        .version("0.1.0")
        .about("Extract issues and pull request commits from a GitHub repository and store them in a local database")
        .author("Jim Lawson")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Set verbosity level (repeat for more)"),
        )
        .arg(
            Arg::new("repo")
                .short('r')
                .long("repo")
                .value_name("PATH")
                .default_value(".")
                .help("Repository to slurp: local clone, GitHub URL or owner/name"),
        )
        .arg(
            Arg::new("since")
                .short('s')
                .long("since")
                .value_name("YYYY-MM-DD")
                .value_parser(|s: &str| parse_since(s).map_err(|err| err.to_string()))
                .help("Only issues closed on or after this date"),
        )
        .arg(
            Arg::new("clear-issues")
                .short('c')
                .long("clear-issues")
                .action(ArgAction::SetTrue)
                .help("Clear stored issues before syncing"),
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
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            error!("  caused by: {}", cause);
            source = cause.source();
        }
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
    let start_time = std::time::Instant::now();

    if ctx.ctx_out {
        info!("Context: {:?}", ctx);
    }

    let repo_arg = matches.get_one::<String>("repo").map(String::as_str).unwrap_or(".");
    let since = matches.get_one::<NaiveDate>("since").copied();
    let clear_issues = matches.get_flag("clear-issues");

    let repo = RepoHandle::resolve(repo_arg)?;
    info!("Mirroring issues of {}", repo);

    // Connect to GitHub
    let client = GitHubClient::new(ctx).map_err(|err| err.into_setup("cannot set up GitHub client"))?;
    let (remaining, reset_time) = client.ensure_reachable().await?;
    info!(
        "GitHub API rate limit: {} remaining, resets at {}",
        remaining,
        reset_time.format("%Y-%m-%d %H:%M:%S UTC")
    );

    // Connect to the database
    let db_path = ctx.db_path(&repo.name);
    let store = match MirrorStore::open(&db_path).await {
        Ok(store) => {
            info!("Connected to database: {}", db_path.display());
            store
        }
        Err(err) => {
            return Err(RepoToolsError::Config(format!(
                "failed to open database '{}': {}",
                db_path.display(),
                err
            )));
        }
    };

    let mirror = IssueMirror::new(&client, &store);

    let issues = mirror.sync_issues(&repo, since, clear_issues, cancel).await?;
    info!(
        "Issues: {} seen, {} inserted, {} replaced, {} unchanged, {} malformed, {} failed",
        issues.seen, issues.inserted, issues.replaced, issues.unchanged, issues.malformed, issues.failed
    );

    if !issues.cancelled {
        let commits = mirror.sync_commits(&repo, cancel).await?;
        info!(
            "Commits: {} issues checked, {} pull requests, {} inserted, {} skipped, {} failed",
            commits.issues, commits.pull_requests, commits.inserted, commits.skipped, commits.failed
        );
    }

    store.close().await;

    if cancel.is_cancelled() {
        info!("Interrupted after {:?}", start_time.elapsed());
    } else {
        info!("Issue mirror completed in {:?}", start_time.elapsed());
    }

    Ok(())
}
