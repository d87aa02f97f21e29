//! Watch paths and print events

use anyhow::{Context, Result};
use dirwatch::{DirWatch, Method, WatchModes};
use dirwatch_cli::{output, settings};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub struct WatchArgs {
    pub paths: Vec<PathBuf>,
    pub recursive: bool,
    pub files: bool,
    pub method: Option<Method>,
    pub interval: Option<Duration>,
    pub json: bool,
}

impl WatchArgs {
    fn modes(&self) -> WatchModes {
        let mut modes = WatchModes::DIR_ONLY;
        if self.files {
            modes |= WatchModes::FILES;
        }
        if self.recursive {
            modes |= WatchModes::SUB_DIRS;
        }
        modes
    }
}

pub async fn run(config_path: Option<&Path>, args: WatchArgs) -> Result<()> {
    let mut config = settings::load(config_path)?;
    if let Some(method) = args.method {
        config.scan.preferred_method = method;
    }

    let service = DirWatch::spawn(config);
    let (watcher, mut events) = service.watcher()?;
    let modes = args.modes();

    for path in &args.paths {
        let is_dir = path.is_dir();
        let path_modes = if is_dir { modes } else { WatchModes::DIR_ONLY };
        match args.interval {
            Some(interval) => watcher.add_with_interval(path, is_dir, path_modes, interval)?,
            None if is_dir => watcher.add_dir(path, path_modes)?,
            None => watcher.add_file(path)?,
        }
        if !path.exists() && !args.json {
            eprintln!(
                "{} {} does not exist yet, waiting for it",
                "note:".yellow(),
                path.display()
            );
        }
    }
    info!("Watching {} paths ({:?})", args.paths.len(), modes);

    let colored = !args.json && std::io::stdout().is_terminal();
    if colored {
        eprintln!(
            "{} {} path(s), Ctrl-C to stop",
            "Watching".bold(),
            args.paths.len()
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let line = if args.json {
                    output::json_line(&event).context("Failed to encode event")?
                } else if colored {
                    output::colored_line(&event)
                } else {
                    output::plain_line(&event)
                };
                println!("{}", line);
            }
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    drop(watcher);
    // The service may already be gone; nothing left to report then
    let _ = service.shutdown();
    Ok(())
}
