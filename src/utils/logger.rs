use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;

/// Colors for report lines.
pub struct Colors;

impl Colors {
    pub const COMPLETED: &'static str = "green";
    pub const ABANDONED: &'static str = "red";
    pub const PENDING: &'static str = "yellow";

    pub fn colorize(color: &str, text: &str) -> String {
        match color {
            "green" => text.green().to_string(),
            "red" => text.red().to_string(),
            "yellow" => text.yellow().to_string(),
            _ => text.to_string(),
        }
    }
}

/// Initialise env_logger: dependencies at Warn, this crate at Info (Debug when verbose).
/// `RUST_LOG` still applies on top. Safe to call more than once (later calls are ignored).
pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        _ => "ERROR".red(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                }
                _ => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
