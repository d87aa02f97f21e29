//! Tokio service wrapper
//!
//! [`DirWatch`] moves an [`Engine`] into one tokio task and drives its
//! ticks and delayed removals. [`Watcher`] handles talk to that task over
//! an unbounded command channel and receive their events on a channel of
//! their own. Commands are applied between passes, never during one.

use crate::engine::{Engine, EngineStats};
use crate::error::ServiceError;
use dirwatch_core::{WatchConfig, WatchEvent, WatchModes, WatcherId};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

enum Command {
    Attach {
        id: WatcherId,
        sink: mpsc::UnboundedSender<WatchEvent>,
    },
    Add {
        id: WatcherId,
        path: PathBuf,
        is_dir: bool,
        modes: WatchModes,
        hint: Option<Duration>,
    },
    Remove {
        id: WatcherId,
        path: PathBuf,
    },
    Detach {
        id: WatcherId,
    },
    Suspend {
        id: WatcherId,
    },
    Resume {
        id: WatcherId,
        notify: bool,
    },
    Contains {
        id: WatcherId,
        path: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    RescanAll,
    Stop,
    Start,
    Shutdown,
}

/// Handle to a running watch service
///
/// Cheap to clone. The service runs until [`DirWatch::shutdown`] or until
/// every handle and watcher is dropped.
#[derive(Clone)]
pub struct DirWatch {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<RwLock<EngineStats>>,
    next_id: Arc<AtomicU64>,
}

impl DirWatch {
    /// Start the service on the current tokio runtime
    pub fn spawn(config: WatchConfig) -> Self {
        Self::spawn_engine(Engine::new(config))
    }

    /// Start the service around an already configured engine
    pub fn spawn_engine(engine: Engine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RwLock::new(engine.statistics()));
        tokio::spawn(run(engine, rx, stats.clone()));

        Self {
            tx,
            stats,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a watcher handle and the receiver its events arrive on
    pub fn watcher(&self) -> Result<(Watcher, mpsc::UnboundedReceiver<WatchEvent>), ServiceError> {
        let id = WatcherId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sink, events) = mpsc::unbounded_channel();
        send(&self.tx, Command::Attach { id, sink })?;

        Ok((
            Watcher {
                id,
                tx: self.tx.clone(),
            },
            events,
        ))
    }

    /// Counters as of the last pass
    pub fn statistics(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn rescan_all(&self) -> Result<(), ServiceError> {
        send(&self.tx, Command::RescanAll)
    }

    /// Freeze all scanning
    pub fn stop(&self) -> Result<(), ServiceError> {
        send(&self.tx, Command::Stop)
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        send(&self.tx, Command::Start)
    }

    /// Stop the service task; outstanding watchers become inert
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        send(&self.tx, Command::Shutdown)
    }
}

/// One logical watcher
///
/// Dropping it withdraws all of its registrations.
pub struct Watcher {
    id: WatcherId,
    tx: mpsc::UnboundedSender<Command>,
}

impl Watcher {
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Watch a directory; `modes` selects which nested changes are reported
    pub fn add_dir(&self, path: impl AsRef<Path>, modes: WatchModes) -> Result<(), ServiceError> {
        self.add(path.as_ref(), true, modes, None)
    }

    pub fn add_file(&self, path: impl AsRef<Path>) -> Result<(), ServiceError> {
        self.add(path.as_ref(), false, WatchModes::DIR_ONLY, None)
    }

    /// Watch with a poll interval hint for polled backends
    pub fn add_with_interval(
        &self,
        path: impl AsRef<Path>,
        is_dir: bool,
        modes: WatchModes,
        interval: Duration,
    ) -> Result<(), ServiceError> {
        self.add(path.as_ref(), is_dir, modes, Some(interval))
    }

    fn add(
        &self,
        path: &Path,
        is_dir: bool,
        modes: WatchModes,
        hint: Option<Duration>,
    ) -> Result<(), ServiceError> {
        send(
            &self.tx,
            Command::Add {
                id: self.id,
                path: path.to_path_buf(),
                is_dir,
                modes,
                hint,
            },
        )
    }

    pub fn remove_dir(&self, path: impl AsRef<Path>) -> Result<(), ServiceError> {
        self.remove(path.as_ref())
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) -> Result<(), ServiceError> {
        self.remove(path.as_ref())
    }

    fn remove(&self, path: &Path) -> Result<(), ServiceError> {
        send(
            &self.tx,
            Command::Remove {
                id: self.id,
                path: path.to_path_buf(),
            },
        )
    }

    /// Pause delivery; changes accumulate
    pub fn stop_scan(&self) -> Result<(), ServiceError> {
        send(&self.tx, Command::Suspend { id: self.id })
    }

    /// Resume delivery, flushing (or with `notify == false` discarding) the
    /// accumulated changes
    pub fn start_scan(&self, notify: bool) -> Result<(), ServiceError> {
        send(&self.tx, Command::Resume { id: self.id, notify })
    }

    pub async fn contains(&self, path: impl AsRef<Path>) -> Result<bool, ServiceError> {
        let (reply, rx) = oneshot::channel();
        send(
            &self.tx,
            Command::Contains {
                id: self.id,
                path: path.as_ref().to_path_buf(),
                reply,
            },
        )?;
        rx.await.map_err(|_| ServiceError::Closed)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Detach { id: self.id });
    }
}

fn send(tx: &mpsc::UnboundedSender<Command>, command: Command) -> Result<(), ServiceError> {
    tx.send(command).map_err(|_| ServiceError::Closed)
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Apply one command; false means shut down
fn apply(engine: &mut Engine, command: Command) -> bool {
    match command {
        Command::Attach { id, sink } => engine.attach_as(id, Box::new(sink)),
        Command::Add {
            id,
            path,
            is_dir,
            modes,
            hint,
        } => engine.add_path(id, &path, is_dir, modes, hint),
        Command::Remove { id, path } => engine.remove_path(id, &path),
        Command::Detach { id } => engine.detach(id),
        Command::Suspend { id } => engine.suspend(id),
        Command::Resume { id, notify } => engine.resume(id, notify),
        Command::Contains { id, path, reply } => {
            let _ = reply.send(engine.contains(id, &path));
        }
        Command::RescanAll => engine.rescan_all(),
        Command::Stop => engine.stop(),
        Command::Start => engine.start(),
        Command::Shutdown => return false,
    }
    true
}

async fn run(
    mut engine: Engine,
    mut rx: mpsc::UnboundedReceiver<Command>,
    stats: Arc<RwLock<EngineStats>>,
) {
    let remove_delay = engine.config().remove_delay();
    let mut period = engine.tick_interval();
    let mut timer = ticker(period);
    let mut remove_at: Option<Instant> = None;
    info!("Watch service running (tick {:?})", period);

    loop {
        tokio::select! {
            command = rx.recv() => {
                match command {
                    Some(command) => {
                        if !apply(&mut engine, command) {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = timer.tick() => engine.tick(),

            _ = sleep_until(remove_at.unwrap_or_else(Instant::now)), if remove_at.is_some() => {
                engine.remove_delayed();
                remove_at = None;
            }
        }

        if remove_at.is_none() && engine.has_pending_removals() {
            remove_at = Some(Instant::now() + remove_delay);
        }

        let wanted = engine.tick_interval();
        if wanted != period {
            debug!("Tick interval {:?} -> {:?}", period, wanted);
            period = wanted;
            timer = ticker(period);
        }

        let current = engine.statistics();
        if *stats.read() != current {
            *stats.write() = current;
            engine.log_statistics();
        }
    }

    info!("Watch service stopped");
}
