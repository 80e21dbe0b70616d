use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{DB_PREFIX, DB_SUFFIX, DEFAULT_PER_PAGE, DEFAULT_TIMEOUT_SECS, GITHUB_API};

/// Environment context packed in structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    // From REPOTOOLS_DATADIR, directory holding the per-repository databases, default "."
    pub data_dir: String,

    // From REPOTOOLS_CTXOUT output all context data (this struct), default false
    pub ctx_out: bool,

    // From REPOTOOLS_GITHUB_OAUTH, falls back to GITHUB_TOKEN, default "" (anonymous)
    pub github_oauth: String,

    // From REPOTOOLS_GITHUB_API, default "https://api.github.com"
    pub github_api: String,

    // From REPOTOOLS_PER_PAGE, page size for paged GitHub endpoints, default 100
    pub per_page: u32,

    // From REPOTOOLS_TIMEOUT, HTTP request timeout in seconds, default 30
    pub timeout_secs: u64,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            data_dir: ".".to_string(),
            ctx_out: false,
            github_oauth: String::new(),
            github_api: GITHUB_API.to_string(),
            per_page: DEFAULT_PER_PAGE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load context from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load context from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ctx = Self::default();

        if let Some(data_dir) = lookup("REPOTOOLS_DATADIR") {
            ctx.data_dir = data_dir;
        }

        // GitHub OAuth
        if let Some(oauth) = lookup("REPOTOOLS_GITHUB_OAUTH").or_else(|| lookup("GITHUB_TOKEN")) {
            ctx.github_oauth = oauth.trim().to_string();
        }

        if let Some(api) = lookup("REPOTOOLS_GITHUB_API") {
            ctx.github_api = api.trim_end_matches('/').to_string();
        }

        if let Some(per_page) = lookup("REPOTOOLS_PER_PAGE") {
            let per_page: u32 = per_page.parse()?;
            // GitHub caps every paged endpoint at 100
            if per_page == 0 || per_page > 100 {
                anyhow::bail!("REPOTOOLS_PER_PAGE must be between 1 and 100, got {}", per_page);
            }
            ctx.per_page = per_page;
        }

        if let Some(timeout) = lookup("REPOTOOLS_TIMEOUT") {
            ctx.timeout_secs = timeout.parse()?;
        }

        ctx.ctx_out = lookup("REPOTOOLS_CTXOUT").is_some();

        Ok(ctx)
    }

    /// Has an OAuth token been configured?
    pub fn has_token(&self) -> bool {
        !self.github_oauth.is_empty() && self.github_oauth != "-"
    }

    /// Path of the document store for a given repository name
    pub fn db_path(&self, repo_name: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(format!("{}{}{}", DB_PREFIX, repo_name, DB_SUFFIX))
    }
}
