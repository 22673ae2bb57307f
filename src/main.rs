use memsim::{config::SimConfig, shell::Shell};

use std::io;
use anyhow::{Context, Result};
use log::*;

fn main() -> Result<()> {
    // Logs go to stderr and stay out of the way of the command
    // output, unless RUST_LOG asks for more.
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let config = SimConfig::from_env().context("Failed to read the configuration.")?;
    let mut shell = Shell::new(&config).context("Failed to start the simulator.")?;
    info!("Simulator ready.");

    let stdin = io::stdin();
    let stdout = io::stdout();
    shell.run(stdin.lock(), stdout.lock())?;

    info!("Simulator stopped.");
    Ok(())
}
