// Constants used throughout repotools

// GitHub API
pub const GITHUB_API: &str = "https://api.github.com";
pub const GITHUB_HOST: &str = "github.com";
pub const USER_AGENT: &str = "repotools-rust/1.0";
pub const DEFAULT_PER_PAGE: u32 = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// Document store namespacing: one database per repository
pub const DB_PREFIX: &str = "git-";
pub const DB_SUFFIX: &str = ".db";

// Date formats
pub const SINCE_FORMAT: &str = "%Y-%m-%d";

// Traffic periods
pub const DAY: &str = "day";
pub const WEEK: &str = "week";

// Process exit codes
pub const EXIT_OK: u8 = 0;
pub const EXIT_SETUP: u8 = 1;
pub const EXIT_ERROR: u8 = 2;
