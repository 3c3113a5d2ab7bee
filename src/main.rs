//! chunkscan CLI: `run` a chunked scan, act as a `worker`, or print `stats`.

use anyhow::Result;
use chunkscan::engine::arg_parser::Cli;
use chunkscan::engine::handle;
use clap::Parser;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
