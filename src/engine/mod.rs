//! Engine module: CLI, checkpoint store, hashing and filesystem helpers

pub mod arg_parser;
pub mod category;
pub mod cli;
pub mod db_ops;
pub mod hashing;
pub mod progress;
pub mod tools;

pub use arg_parser::{Cli, Commands};
pub use category::categorize;
pub use cli::handle;
pub use db_ops::{CheckpointStore, StoreOptions, open_db, open_db_in_memory};
pub use hashing::fingerprint_file;
pub use tools::path_relative_to;
