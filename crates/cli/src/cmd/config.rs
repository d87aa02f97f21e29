//! Configuration management command
//!
//! Shows the effective configuration and where it lives.

use anyhow::Result;
use dirwatch_core::config::{example_config, METHOD_ENV};
use dirwatch_cli::settings;
use owo_colors::OwoColorize;
use std::path::Path;

/// List the effective configuration values
pub async fn run_list(config_path: Option<&Path>) -> Result<()> {
    let path = settings::resolve_path(config_path)?;
    let config = settings::load(config_path)?;

    println!("{}", "Watch Configuration".bold());
    println!("{}: {}", "Location".dimmed(), path.display().dimmed());
    if let Ok(value) = std::env::var(METHOD_ENV) {
        println!("{}: {}={}", "Override".dimmed(), METHOD_ENV, value);
    }

    println!("\n{}", "[scan]".yellow());
    println!(
        "  {} = {}",
        "preferred_method".cyan(),
        config.scan.preferred_method
    );
    println!(
        "  {} = {}",
        "nfs_preferred_method".cyan(),
        config.scan.nfs_preferred_method
    );
    println!(
        "  {} = {} {}",
        "poll_interval_ms".cyan(),
        config.scan.poll_interval_ms,
        format!("({:?})", config.poll_interval()).dimmed()
    );
    println!(
        "  {} = {} {}",
        "nfs_poll_interval_ms".cyan(),
        config.scan.nfs_poll_interval_ms,
        format!("({:?})", config.nfs_poll_interval()).dimmed()
    );
    println!(
        "  {} = {}",
        "remove_delay_ms".cyan(),
        config.scan.remove_delay_ms
    );

    println!("\n{}", "[fam]".yellow());
    match &config.fam.socket {
        Some(socket) => println!("  {} = {}", "socket".cyan(), socket.display()),
        None => println!("  {} = {}", "socket".cyan(), "(unset, backend disabled)".dimmed()),
    }

    println!("\n{}", "[filter]".yellow());
    println!("  {} = {}", "ignore_noisy".cyan(), config.filter.ignore_noisy);
    println!(
        "  {} = {:?}",
        "ignore_patterns".cyan(),
        config.filter.ignore_patterns
    );

    println!("\n{}", "Valid Ranges:".bold());
    println!("  poll_interval_ms: 10-600000");
    println!("  nfs_poll_interval_ms: 100-600000");
    println!("  remove_delay_ms: 0-60000");

    Ok(())
}

/// Show the config file path and optionally create it
pub async fn run_path(config_path: Option<&Path>, create: bool) -> Result<()> {
    let path = settings::resolve_path(config_path)?;

    if create && settings::init_if_missing(&path)? {
        println!("{} Created config file at: {}", "✓".green(), path.display());
    } else {
        println!("{}", path.display());
        if !path.exists() {
            println!("{}", "File does not exist. Use --create to create it.".yellow());
        }
    }

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", example_config());
    Ok(())
}
