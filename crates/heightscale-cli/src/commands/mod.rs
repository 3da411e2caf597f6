//! Command implementations for the CLI.

mod config;
mod history;
mod scan;
mod status;
mod sync;
mod watch;

use std::path::PathBuf;

pub use config::cmd_config;
pub use history::{cmd_clear, cmd_history, cmd_latest, cmd_prune};
pub use scan::cmd_scan;
pub use status::cmd_status;
pub use sync::cmd_sync;
pub use watch::{WatchArgs, cmd_watch};

use crate::config::{Config, Settings};
use crate::format::FormatOptions;

/// Everything a command needs from the invocation and the config file.
pub struct AppContext {
    pub config_path: PathBuf,
    pub config: Config,
    pub settings: Settings,
    pub format: FormatOptions,
    pub quiet: bool,
}
