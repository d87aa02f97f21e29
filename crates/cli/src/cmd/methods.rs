//! Backend availability report

use anyhow::Result;
use dirwatch::{Engine, Method};
use dirwatch_cli::settings;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct MethodReport {
    method: Method,
    available: bool,
    preferred: bool,
    nfs_preferred: bool,
}

pub async fn run(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = settings::load(config_path)?;
    let preferred = config.scan.preferred_method;
    let nfs_preferred = config.scan.nfs_preferred_method;

    let mut engine = Engine::new(config);
    let available = engine.probe_methods();

    let report: Vec<MethodReport> = Method::FALLBACK_ORDER
        .into_iter()
        .map(|method| MethodReport {
            method,
            available: available.contains(&method),
            preferred: method == preferred,
            nfs_preferred: method == nfs_preferred,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Notification backends".bold());
    for entry in &report {
        let status = if entry.available {
            "available".green().to_string()
        } else {
            "unavailable".dimmed().to_string()
        };
        let mut notes = Vec::new();
        if entry.preferred {
            notes.push("preferred");
        }
        if entry.nfs_preferred {
            notes.push("nfs");
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("({})", notes.join(", ")).dimmed().to_string()
        };
        println!(
            "  {} {} {}",
            format!("{:<9}", entry.method.as_str()).cyan(),
            status,
            notes
        );
    }

    Ok(())
}
