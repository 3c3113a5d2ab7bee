pub mod config;
pub mod fd_limit;
pub mod logger;
pub mod scanner_toml;
pub mod shutdown;

pub use config::*;
pub use fd_limit::{FDS_PER_WORKER, determine_threads_given_fd_limit, max_open_fds};
pub use logger::{Colors, setup_logging};
pub use scanner_toml::{apply_file_to_config, load_scanner_toml};
pub use shutdown::ShutdownSignal;
