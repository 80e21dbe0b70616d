//! Issue mirror: reconcile a GitHub repository's issues, pull requests and
//! pull request commits into the local [`MirrorStore`].
//!
//! Both passes are sequential and best-effort. A malformed item or a store
//! error for one item is logged and skipped, a failing pull request only loses
//! its own commits. The cancellation token is honored before every issue.

use chrono::NaiveDate;
use futures::{pin_mut, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::SINCE_FORMAT;
use crate::error::{RepoToolsError, Result};
use crate::github::{pull_request_commits, search_issues, CommitSummary, IssueSummary, IssueTracker};
use crate::repo::RepoHandle;
use crate::store::{CommitOutcome, MirrorStore, UpsertOutcome};

/// Parse a `--since` argument (`YYYY-MM-DD`)
pub fn parse_since(since: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(since.trim(), SINCE_FORMAT)
        .map_err(|err| RepoToolsError::Config(format!("invalid date '{}' (expected YYYY-MM-DD): {}", since, err)))
}

/// Search query for a repository's issues, optionally closed on or after `since`
pub fn build_query(repo: &RepoHandle, since: Option<NaiveDate>) -> String {
    let mut query = format!("repo:{}", repo.full_name());
    if let Some(since) = since {
        query.push_str(&format!(" closed:>={}", since.format(SINCE_FORMAT)));
    }
    query
}

/// Outcome counts of one issue pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IssueSyncStats {
    pub seen: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub malformed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Outcome counts of one commit pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitSyncStats {
    pub issues: usize,
    pub pull_requests: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct IssueMirror<'a, T: IssueTracker + ?Sized> {
    tracker: &'a T,
    store: &'a MirrorStore,
}

impl<'a, T: IssueTracker + ?Sized> IssueMirror<'a, T> {
    pub fn new(tracker: &'a T, store: &'a MirrorStore) -> Self {
        Self { tracker, store }
    }

    /// Mirror the issues matched by the repository query into the store.
    ///
    /// With `clear_first` the issue collection is purged before querying. A
    /// failure to fetch a result page aborts the pass; everything else is
    /// per-item and only counted.
    pub async fn sync_issues(
        &self,
        repo: &RepoHandle,
        since: Option<NaiveDate>,
        clear_first: bool,
        cancel: &CancellationToken,
    ) -> Result<IssueSyncStats> {
        let mut stats = IssueSyncStats::default();

        if clear_first {
            let cleared = self.store.clear_issues().await?;
            info!("Cleared {} stored issue(s) of {}", cleared, repo);
        }

        let query = build_query(repo, since);
        info!("Searching issues: {}", query);

        let results = search_issues(self.tracker, &query);
        pin_mut!(results);

        loop {
            if cancel.is_cancelled() {
                warn!("Issue sync cancelled after {} issue(s)", stats.seen);
                stats.cancelled = true;
                break;
            }

            let raw = match results.next().await {
                Some(item) => item?,
                None => break,
            };
            stats.seen += 1;

            let issue = match IssueSummary::from_value(raw) {
                Ok(issue) => issue,
                Err(err) => {
                    warn!("Skipping malformed issue #{}: {}", stats.seen, err);
                    stats.malformed += 1;
                    continue;
                }
            };

            match self.store.upsert_issue(&issue).await {
                Ok(UpsertOutcome::Inserted) => {
                    debug!("inserted issue {} #{}", issue.id, issue.number);
                    stats.inserted += 1;
                }
                Ok(UpsertOutcome::Replaced) => {
                    debug!("replaced issue {} #{}", issue.id, issue.number);
                    stats.replaced += 1;
                }
                Ok(UpsertOutcome::Unchanged) => {
                    debug!("unchanged issue {} #{}", issue.id, issue.number);
                    stats.unchanged += 1;
                }
                Err(err) => {
                    warn!("Failed to store issue {} #{}: {}", issue.id, issue.number, err);
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Mirror the commits of every stored issue that turns out to be a pull request
    pub async fn sync_commits(&self, repo: &RepoHandle, cancel: &CancellationToken) -> Result<CommitSyncStats> {
        let mut stats = CommitSyncStats::default();

        for number in self.store.issue_numbers().await? {
            if cancel.is_cancelled() {
                warn!("Commit sync cancelled after {} issue(s)", stats.issues);
                stats.cancelled = true;
                break;
            }
            stats.issues += 1;

            let live = match self.tracker.issue(repo, number).await {
                Ok(live) => live,
                Err(err) => {
                    warn!("Failed to fetch issue #{}: {}", number, err);
                    stats.failed += 1;
                    continue;
                }
            };
            if !live.is_pull_request() {
                continue;
            }
            stats.pull_requests += 1;

            if let Err(err) = self.sync_pull_request(repo, number, &mut stats).await {
                warn!("Failed to mirror commits of PR #{}: {}", number, err);
                stats.failed += 1;
            }
        }

        Ok(stats)
    }

    async fn sync_pull_request(&self, repo: &RepoHandle, number: i64, stats: &mut CommitSyncStats) -> Result<()> {
        let commits = pull_request_commits(self.tracker, repo, number);
        pin_mut!(commits);

        while let Some(raw) = commits.next().await {
            let commit = CommitSummary::from_value(raw?)?;
            match self.store.insert_commit(number, &commit).await? {
                CommitOutcome::Inserted => {
                    debug!("inserted commit {} of PR #{}", commit.sha, number);
                    stats.inserted += 1;
                }
                CommitOutcome::Skipped => {
                    debug!("skipped commit {} of PR #{}", commit.sha, number);
                    stats.skipped += 1;
                }
            }
        }

        Ok(())
    }
}
