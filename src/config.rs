use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// wpt-charts: schedules WebPageTest runs, stores the results and serves chart data.
#[derive(Parser, Debug, Clone)]
#[command(name = "wpt-charts")]
pub struct CliArgs {
    /// Path to the suite configuration document (JSON)
    #[arg(short = 'c', long = "suite-config", env = "SUITE_CONFIG")]
    pub suite_config: PathBuf,

    /// HTTP port
    #[arg(long = "port", env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Storage backend for test results
    #[arg(long = "store", value_enum, default_value_t = StoreKind::Sqlite)]
    pub store: StoreKind,

    /// Root directory for the filesystem backend
    #[arg(long = "results-dir", default_value = DEFAULT_RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Database file for the sqlite backend
    #[arg(long = "db-path", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Include error chains in API error responses
    #[arg(short = 'd', long = "dev-mode")]
    pub dev_mode: bool,

    /// Do not start the per-suite schedules (manual /run_tests only)
    #[arg(long = "no-schedule")]
    pub no_schedule: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(short = 'l', long = "log-dir")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Sqlite,
    Filesystem,
}

pub struct AppSettings {
    pub suite_config_path: PathBuf,
    pub port: u16,
    pub store: StoreKind,
    pub results_dir: PathBuf,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub schedule_enabled: bool,
}

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RESULTS_DIR: &str = "public/results";
pub const DEFAULT_DB_PATH: &str = "wpt-charts.db";

// Throttle constants
pub const SUBMISSION_SPACING_SECS: u64 = 10;

// WebPageTest constants
pub const DEFAULT_WPT_SERVER: &str = "https://www.webpagetest.org";
pub const WPT_POLL_INTERVAL_SECS: u64 = 5;
pub const WPT_TEST_TIMEOUT_SECS: u64 = 600; // 10 minutes
pub const WPT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const PAGE_FETCH_TIMEOUT_SECS: u64 = 30;

// Chart constants
pub const DEFAULT_DATE_CUTOFF_DAYS: u32 = 30;

// Response cache constants
pub const RESPONSE_CACHE_TTL_SECS: u64 = 60 * 60;
pub const CACHE_CONTROL_HEADER: &str = "public, max-age=3600";

impl AppSettings {
    pub fn from_args(args: CliArgs) -> Self {
        AppSettings {
            suite_config_path: args.suite_config,
            port: args.port,
            store: args.store,
            results_dir: args.results_dir,
            db_path: args.db_path,
            dev_mode: args.dev_mode,
            schedule_enabled: !args.no_schedule,
        }
    }
}
