//! Clone traffic statistics from the GitHub traffic API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

use crate::constants::{DAY, SINCE_FORMAT, WEEK};
use crate::error::{RepoToolsError, Result};

/// Aggregation period of the traffic API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrafficPeriod {
    Day,
    #[default]
    Week,
}

impl TrafficPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficPeriod::Day => DAY,
            TrafficPeriod::Week => WEEK,
        }
    }
}

impl std::str::FromStr for TrafficPeriod {
    type Err = RepoToolsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            DAY => Ok(TrafficPeriod::Day),
            WEEK => Ok(TrafficPeriod::Week),
            other => Err(RepoToolsError::Config(format!("unknown traffic period '{}'", other))),
        }
    }
}

/// Clone counts for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneCount {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
    pub uniques: u64,
}

/// Response of `GET /repos/{owner}/{repo}/traffic/clones`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneTraffic {
    pub count: u64,
    pub uniques: u64,
    #[serde(default)]
    pub clones: Vec<CloneCount>,
}

/// Human readable table of one repository's clone traffic
pub fn format_table(repo_name: &str, period: TrafficPeriod, traffic: &CloneTraffic) -> String {
    let mut out = format!(
        "{} ({}): {} clones, {} unique\n",
        repo_name,
        period.as_str(),
        traffic.count,
        traffic.uniques
    );
    out.push_str(&format!("  {:<10}  {:>8}  {:>8}\n", "date", "count", "uniques"));
    for bucket in &traffic.clones {
        out.push_str(&format!(
            "  {:<10}  {:>8}  {:>8}\n",
            bucket.timestamp.format(SINCE_FORMAT),
            bucket.count,
            bucket.uniques
        ));
    }
    out
}

/// Append one repository's buckets to a CSV file, writing the header for a new file
pub fn append_csv(path: &Path, repo_name: &str, period: TrafficPeriod, traffic: &CloneTraffic) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_empty = file.metadata()?.len() == 0;

    let mut writer = csv::Writer::from_writer(file);
    if is_empty {
        writer.write_record(["repo", "period", "timestamp", "count", "uniques"])?;
    }
    for bucket in &traffic.clones {
        writer.write_record([
            repo_name.to_string(),
            period.as_str().to_string(),
            bucket.timestamp.format(SINCE_FORMAT).to_string(),
            bucket.count.to_string(),
            bucket.uniques.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
