//! Local document store for mirrored issues and pull request commits
//!
//! Every repository gets its own SQLite database (`git-<name>.db`) holding
//! three collections: `issues`, `issue_events` and `pr_commits`. Documents
//! are kept verbatim as JSON next to the few key columns used for lookups.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::Result;
use crate::github::{CommitSummary, IssueSummary};

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id INTEGER NOT NULL,
        number INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        payload TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS issues_id_number ON issues (id, number)",
    r#"
    CREATE TABLE IF NOT EXISTS issue_events (
        id INTEGER NOT NULL,
        issue INTEGER NOT NULL,
        payload TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS issue_events_id ON issue_events (id)",
    r#"
    CREATE TABLE IF NOT EXISTS pr_commits (
        sha TEXT NOT NULL,
        pr INTEGER NOT NULL,
        payload TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS pr_commits_sha_pr ON pr_commits (sha, pr)",
];

/// Result of [`MirrorStore::upsert_issue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record for the (id, number) pair existed
    Inserted,
    /// The stored `updated_at` differed and the document was replaced
    Replaced,
    /// The stored record is current, nothing was written
    Unchanged,
}

/// Result of [`MirrorStore::insert_commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Inserted,
    Skipped,
}

/// Issue record as stored
#[derive(Debug, Clone, PartialEq)]
pub struct StoredIssue {
    pub id: i64,
    pub number: i64,
    pub updated_at: String,
    pub payload: String,
}

impl StoredIssue {
    pub fn document(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(stored: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(stored).ok().map(|t| t.with_timezone(&Utc))
}

/// Document store of one repository
#[derive(Clone)]
pub struct MirrorStore {
    pool: SqlitePool,
}

impl MirrorStore {
    /// Open (creating if missing) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        Self::connect_with(options).await
    }

    /// Connect using a `sqlite:` URL, `sqlite::memory:` included
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        // one long-lived connection: the mirror is sequential and an
        // in-memory database lives exactly as long as its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await?;

        for sql in SCHEMA {
            sqlx::query(sql).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Drop every issue record (full resync)
    pub async fn clear_issues(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM issues").execute(&self.pool).await?;
        debug!("Cleared {} issue record(s)", result.rows_affected());
        Ok(result.rows_affected())
    }

    pub async fn find_issue(&self, id: i64, number: i64) -> Result<Option<StoredIssue>> {
        let row = sqlx::query("SELECT id, number, updated_at, payload FROM issues WHERE id = ? AND number = ?")
            .bind(id)
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(StoredIssue {
                id: row.try_get("id")?,
                number: row.try_get("number")?,
                updated_at: row.try_get("updated_at")?,
                payload: row.try_get("payload")?,
            })),
            None => Ok(None),
        }
    }

    /// Insert-if-absent, replace-if-changed, no-op if identical.
    /// At most one write per call, inside a single transaction.
    pub async fn upsert_issue(&self, issue: &IssueSummary) -> Result<UpsertOutcome> {
        let updated_at = format_time(&issue.updated_at);
        let payload = serde_json::to_string(&issue.raw)?;

        let mut tx = self.pool.begin().await?;

        let stored: Option<String> = sqlx::query_scalar("SELECT updated_at FROM issues WHERE id = ? AND number = ?")
            .bind(issue.id)
            .bind(issue.number)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match stored {
            None => {
                let result = sqlx::query(
                    "INSERT INTO issues (id, number, updated_at, payload) VALUES (?, ?, ?, ?) \
                     ON CONFLICT (id, number) DO NOTHING",
                )
                .bind(issue.id)
                .bind(issue.number)
                .bind(&updated_at)
                .bind(&payload)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Inserted
                }
            }
            Some(stored) if parse_time(&stored) == Some(issue.updated_at) => UpsertOutcome::Unchanged,
            Some(_) => {
                sqlx::query("UPDATE issues SET updated_at = ?, payload = ? WHERE id = ? AND number = ?")
                    .bind(&updated_at)
                    .bind(&payload)
                    .bind(issue.id)
                    .bind(issue.number)
                    .execute(&mut *tx)
                    .await?;
                UpsertOutcome::Replaced
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Numbers of all stored issues, in insertion order
    pub async fn issue_numbers(&self) -> Result<Vec<i64>> {
        let numbers = sqlx::query_scalar("SELECT number FROM issues ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        Ok(numbers)
    }

    pub async fn find_commit(&self, sha: &str, pr: i64) -> Result<Option<Value>> {
        let payload: Option<String> = sqlx::query_scalar("SELECT payload FROM pr_commits WHERE sha = ? AND pr = ?")
            .bind(sha)
            .bind(pr)
            .fetch_optional(&self.pool)
            .await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Store a commit of pull request `pr` unless (sha, pr) is already present.
    /// Existing commit records are never modified.
    pub async fn insert_commit(&self, pr: i64, commit: &CommitSummary) -> Result<CommitOutcome> {
        let mut document = commit.raw.clone();
        if let Value::Object(fields) = &mut document {
            fields.insert("pr".to_string(), Value::from(pr));
        }
        let payload = serde_json::to_string(&document)?;

        let result = sqlx::query("INSERT INTO pr_commits (sha, pr, payload) VALUES (?, ?, ?) ON CONFLICT (sha, pr) DO NOTHING")
            .bind(&commit.sha)
            .bind(pr)
            .bind(&payload)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            Ok(CommitOutcome::Skipped)
        } else {
            Ok(CommitOutcome::Inserted)
        }
    }

    pub async fn count_issues(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM issues").fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn count_commits(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM pr_commits").fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(id: i64, number: i64, updated_at: &str, title: &str) -> IssueSummary {
        IssueSummary::from_value(json!({
            "id": id,
            "number": number,
            "updated_at": updated_at,
            "title": title,
        }))
        .unwrap()
    }

    async fn memory_store() -> MirrorStore {
        MirrorStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_inserts_then_skips_identical() {
        let store = memory_store().await;
        let issue = summary(1001, 42, "2021-01-01T00:00:00Z", "first");

        assert_eq!(store.upsert_issue(&issue).await.unwrap(), UpsertOutcome::Inserted);
        let before = store.find_issue(1001, 42).await.unwrap().unwrap();

        assert_eq!(store.upsert_issue(&issue).await.unwrap(), UpsertOutcome::Unchanged);
        let after = store.find_issue(1001, 42).await.unwrap().unwrap();

        assert_eq!(before, after);
        assert_eq!(after.updated_at, "2021-01-01T00:00:00Z");
        assert_eq!(store.count_issues().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_when_updated_at_changes() {
        let store = memory_store().await;
        store.upsert_issue(&summary(1001, 42, "2021-01-01T00:00:00Z", "old")).await.unwrap();

        let newer = summary(1001, 42, "2021-02-01T00:00:00Z", "new");
        assert_eq!(store.upsert_issue(&newer).await.unwrap(), UpsertOutcome::Replaced);

        let stored = store.find_issue(1001, 42).await.unwrap().unwrap();
        assert_eq!(stored.document().unwrap()["title"], "new");
        assert_eq!(stored.updated_at, "2021-02-01T00:00:00Z");
        assert_eq!(store.count_issues().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_timestamp_with_different_payload_is_not_rewritten() {
        let store = memory_store().await;
        store.upsert_issue(&summary(1, 1, "2021-01-01T00:00:00Z", "kept")).await.unwrap();

        let same_time = summary(1, 1, "2021-01-01T00:00:00Z", "ignored");
        assert_eq!(store.upsert_issue(&same_time).await.unwrap(), UpsertOutcome::Unchanged);
        let stored = store.find_issue(1, 1).await.unwrap().unwrap();
        assert_eq!(stored.document().unwrap()["title"], "kept");
    }

    #[tokio::test]
    async fn clear_removes_all_issues() {
        let store = memory_store().await;
        store.upsert_issue(&summary(1, 1, "2021-01-01T00:00:00Z", "a")).await.unwrap();
        store.upsert_issue(&summary(2, 2, "2021-01-01T00:00:00Z", "b")).await.unwrap();

        assert_eq!(store.clear_issues().await.unwrap(), 2);
        assert_eq!(store.count_issues().await.unwrap(), 0);
        assert!(store.issue_numbers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commits_are_inserted_once_and_never_modified() {
        let store = memory_store().await;
        let commit = CommitSummary::from_value(json!({"sha": "abc123", "message": "first"})).unwrap();

        assert_eq!(store.insert_commit(7, &commit).await.unwrap(), CommitOutcome::Inserted);

        let rewritten = CommitSummary::from_value(json!({"sha": "abc123", "message": "rewritten"})).unwrap();
        assert_eq!(store.insert_commit(7, &rewritten).await.unwrap(), CommitOutcome::Skipped);

        let stored = store.find_commit("abc123", 7).await.unwrap().unwrap();
        assert_eq!(stored["message"], "first");
        assert_eq!(stored["pr"], 7);

        // the same sha in another pull request is a different record
        assert_eq!(store.insert_commit(8, &commit).await.unwrap(), CommitOutcome::Inserted);
        assert_eq!(store.count_commits().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn file_database_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("git-chisel3.db");

        let store = MirrorStore::open(&path).await.unwrap();
        store.upsert_issue(&summary(5, 3, "2021-01-01T00:00:00Z", "x")).await.unwrap();
        store.close().await;

        let reopened = MirrorStore::open(&path).await.unwrap();
        assert_eq!(reopened.issue_numbers().await.unwrap(), vec![3]);
    }
}
