//! Repository handle resolution
//!
//! Tools accept either a GitHub reference (`owner/name`, an https URL or an
//! ssh remote) or a path to a local clone, in which case the `origin` remote
//! of the clone decides which GitHub repository is meant.

use regex::Regex;
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::constants::GITHUB_HOST;
use crate::error::{RepoToolsError, Result};

/// A GitHub repository, identified by owner and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoHandle {
    pub owner: String,
    pub name: String,
}

impl RepoHandle {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Resolve a command line `--repo` argument into a handle
    pub fn resolve(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(RepoToolsError::Config("empty repository argument".to_string()));
        }

        if let Some(handle) = Self::parse_remote(target)? {
            return Ok(handle);
        }

        if Path::new(target).exists() {
            let remote = origin_url(target)?;
            debug!("Local repository {} has origin {}", target, remote);
            return Self::parse_remote(&remote)?.ok_or_else(|| {
                RepoToolsError::Config(format!(
                    "origin remote '{}' of '{}' is not a GitHub repository",
                    remote, target
                ))
            });
        }

        let short = Regex::new(r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)$")?;
        if let Some(caps) = short.captures(target) {
            return Ok(Self::new(&caps[1], strip_git(&caps[2])));
        }

        Err(RepoToolsError::Config(format!(
            "'{}' is neither a local git repository nor a GitHub reference",
            target
        )))
    }

    /// Parse URL-shaped remotes; `Ok(None)` when `target` is not URL-shaped at all
    fn parse_remote(target: &str) -> Result<Option<Self>> {
        if target.contains("://") {
            let url = url::Url::parse(target)?;
            if url.host_str() != Some(GITHUB_HOST) {
                return Err(RepoToolsError::Config(format!("'{}' is not hosted on {}", target, GITHUB_HOST)));
            }
            let parts: Vec<&str> = url
                .path_segments()
                .map(|segments| segments.filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            if parts.len() != 2 {
                return Err(RepoToolsError::Config(format!(
                    "repository URL must look like https://{}/owner/name, found '{}'",
                    GITHUB_HOST, target
                )));
            }
            return Ok(Some(Self::new(parts[0], strip_git(parts[1]))));
        }

        let ssh = Regex::new(r"^[\w.-]+@([\w.-]+):([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")?;
        if let Some(caps) = ssh.captures(target) {
            if &caps[1] != GITHUB_HOST {
                return Err(RepoToolsError::Config(format!("'{}' is not hosted on {}", target, GITHUB_HOST)));
            }
            return Ok(Some(Self::new(&caps[2], &caps[3])));
        }

        Ok(None)
    }
}

impl std::fmt::Display for RepoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn strip_git(name: &str) -> &str {
    name.strip_suffix(".git").unwrap_or(name)
}

/// `git -C <path> remote get-url origin`
fn origin_url(path: &str) -> Result<String> {
    let output = Command::new("git")
        .args(["-C", path, "remote", "get-url", "origin"])
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(|err| RepoToolsError::Config(format!("failed to run git in '{}': {}", path, err)))?;

    if !output.status.success() {
        return Err(RepoToolsError::Config(format!(
            "'{}' has no origin remote: {}",
            path,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
