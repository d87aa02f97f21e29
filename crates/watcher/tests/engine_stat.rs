//! Engine behaviour with the stat poller, driven by an explicit clock

use crossbeam_channel::{unbounded, Receiver};
use dirwatch::{ChangeKind, Engine, Method, WatchConfig, WatchEvent, WatchModes, WatcherId};
use filetime::{set_file_mtime, FileTime};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

/// Jumps far enough ahead that every polled entry is due
struct Clock(Instant);

impl Clock {
    fn new() -> Self {
        Self(Instant::now())
    }

    fn advance(&mut self) -> Instant {
        self.0 += Duration::from_secs(3600);
        self.0
    }
}

fn stat_config() -> WatchConfig {
    let mut config = WatchConfig::default();
    config.scan.preferred_method = Method::Stat;
    config.scan.nfs_preferred_method = Method::Stat;
    config
}

fn stat_engine() -> (Engine, WatcherId, Receiver<WatchEvent>) {
    let mut engine = Engine::new(stat_config());
    let (tx, rx) = unbounded();
    let id = engine.attach(Box::new(tx));
    (engine, id, rx)
}

fn events(rx: &Receiver<WatchEvent>) -> Vec<(String, ChangeKind)> {
    rx.try_iter()
        .map(|e| {
            let name = e
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (name, e.kind)
        })
        .collect()
}

fn set_age(path: &Path, secs_ago: u64) {
    let time = SystemTime::now() - Duration::from_secs(secs_ago);
    set_file_mtime(path, FileTime::from_system_time(time)).unwrap();
}

#[test]
fn test_refcount_keeps_registration_until_last_remove() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    let (mut engine, id, _rx) = stat_engine();

    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);
    assert_eq!(engine.method_of(&file), Some(Method::Stat));

    engine.remove_path(id, &file);
    assert!(engine.contains(id, &file));

    engine.remove_path(id, &file);
    assert!(!engine.contains(id, &file));
    assert_eq!(engine.statistics().entries, 0);
}

#[test]
fn test_change_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 100);

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);

    engine.tick_at(clock.advance());
    assert!(events(&rx).is_empty());

    set_age(&file, 50);
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("a.txt".to_string(), ChangeKind::Changed)]);
}

#[test]
fn test_nonexistent_chain_reports_creation() {
    let temp_dir = TempDir::new().unwrap();
    let x = temp_dir.path().join("x");
    let y = x.join("y");

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &y, false, WatchModes::DIR_ONLY, None);

    let stats = engine.statistics();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.nonexistent, 2);
    assert_eq!(stats.sub_entries, 2);

    std::fs::create_dir(&x).unwrap();
    engine.tick_at(clock.advance());
    engine.remove_delayed();
    assert!(events(&rx).is_empty());
    // The temp dir only anchored the chain until x appeared
    assert_eq!(engine.method_of(temp_dir.path()), None);

    std::fs::write(&y, b"hello").unwrap();
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("y".to_string(), ChangeKind::Created)]);
    assert_eq!(engine.statistics().nonexistent, 0);
}

#[test]
fn test_new_inode_reports_deleted_then_created() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("config");
    std::fs::write(&file, b"v1").unwrap();

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);

    // Keep the old inode alive so the number cannot be reused
    std::fs::rename(&file, temp_dir.path().join("config.old")).unwrap();
    std::fs::write(&file, b"v2").unwrap();

    engine.tick_at(clock.advance());
    assert_eq!(
        events(&rx),
        vec![
            ("config".to_string(), ChangeKind::Deleted),
            ("config".to_string(), ChangeKind::Created),
        ]
    );
}

#[test]
fn test_deleted_file_is_watched_for_recreation() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("pid");
    std::fs::write(&file, b"1").unwrap();

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);

    std::fs::remove_file(&file).unwrap();
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("pid".to_string(), ChangeKind::Deleted)]);
    assert_eq!(engine.statistics().nonexistent, 1);

    std::fs::write(&file, b"2").unwrap();
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("pid".to_string(), ChangeKind::Created)]);
}

#[test]
fn test_suspended_changes_collapse_into_one_event() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 300);

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);
    engine.suspend(id);
    assert!(engine.is_suspended(id));

    set_age(&file, 200);
    engine.tick_at(clock.advance());
    set_age(&file, 100);
    engine.tick_at(clock.advance());
    std::fs::remove_file(&file).unwrap();
    engine.tick_at(clock.advance());
    assert!(events(&rx).is_empty());

    engine.resume(id, true);
    assert!(!engine.is_suspended(id));
    assert_eq!(events(&rx), vec![("a.txt".to_string(), ChangeKind::Deleted)]);
}

#[test]
fn test_resume_without_notify_discards_backlog() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 300);

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);
    engine.suspend(id);

    set_age(&file, 200);
    engine.tick_at(clock.advance());
    engine.resume(id, false);
    assert!(events(&rx).is_empty());

    set_age(&file, 100);
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("a.txt".to_string(), ChangeKind::Changed)]);
}

#[test]
fn test_frequency_hints_take_minimum() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();

    let mut engine = Engine::new(stat_config());
    let (tx, _rx) = unbounded();
    let lazy = engine.attach(Box::new(tx.clone()));
    let eager = engine.attach(Box::new(tx));

    engine.add_path(
        lazy,
        &file,
        false,
        WatchModes::DIR_ONLY,
        Some(Duration::from_millis(2000)),
    );
    engine.add_path(
        eager,
        &file,
        false,
        WatchModes::DIR_ONLY,
        Some(Duration::from_millis(700)),
    );
    assert_eq!(engine.poll_interval(&file), Some(Duration::from_millis(700)));
    assert_eq!(engine.tick_interval(), Duration::from_millis(700));

    engine.suspend(eager);
    assert_eq!(engine.poll_interval(&file), Some(Duration::from_millis(2000)));
    engine.resume(eager, true);

    engine.remove_path(eager, &file);
    assert_eq!(engine.poll_interval(&file), Some(Duration::from_millis(2000)));
    assert_eq!(engine.tick_interval(), Duration::from_millis(2000));
}

#[test]
fn test_unregistering_relaxes_hint_of_same_watcher() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("inbox");
    std::fs::create_dir(&dir).unwrap();
    let child = dir.join("a.txt");
    std::fs::write(&child, b"a").unwrap();
    let (mut engine, id, _rx) = stat_engine();

    let lazy = Some(Duration::from_millis(2000));
    let eager = Some(Duration::from_millis(700));
    engine.add_path(id, &dir, true, WatchModes::FILES, lazy);
    engine.add_path(id, &dir, true, WatchModes::FILES, eager);
    assert_eq!(engine.poll_interval(&dir), eager);
    assert_eq!(engine.poll_interval(&child), eager);

    engine.remove_path(id, &dir);
    assert!(engine.contains(id, &dir));
    assert_eq!(engine.poll_interval(&dir), lazy);
    assert_eq!(engine.poll_interval(&child), lazy);
    assert_eq!(engine.tick_interval(), Duration::from_millis(2000));
}

#[test]
fn test_out_of_range_hints_are_clamped() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 100);
    let dir = temp_dir.path().join("d");
    std::fs::create_dir(&dir).unwrap();

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, Some(Duration::ZERO));
    engine.add_path(id, &dir, true, WatchModes::DIR_ONLY, Some(Duration::MAX));
    assert_eq!(engine.poll_interval(&file), Some(Duration::from_millis(10)));
    assert_eq!(engine.poll_interval(&dir), Some(Duration::from_secs(600)));
    assert_eq!(engine.tick_interval(), Duration::from_millis(10));

    engine.tick_at(clock.advance());
    set_age(&file, 50);
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("a.txt".to_string(), ChangeKind::Changed)]);
}

#[test]
fn test_deleted_children_do_not_accumulate() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("spool");
    std::fs::create_dir(&dir).unwrap();
    let file = dir.join("job.txt");

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &dir, true, WatchModes::FILES, None);

    // Distinct directory times so every pass sees the listing change
    let mut age = 10_000;
    let mut touch_dir = || {
        age -= 1;
        set_age(&dir, age);
    };

    for round in 0..50 {
        std::fs::write(&file, b"job").unwrap();
        touch_dir();
        engine.tick_at(clock.advance());
        assert!(
            events(&rx).contains(&("job.txt".to_string(), ChangeKind::Created)),
            "round {round}"
        );

        std::fs::remove_file(&file).unwrap();
        touch_dir();
        engine.tick_at(clock.advance());
        assert!(
            events(&rx).contains(&("job.txt".to_string(), ChangeKind::Deleted)),
            "round {round}"
        );
        // Every other round recreates the file before the delayed removal
        if round % 2 == 0 {
            engine.remove_delayed();
        }
    }
    engine.remove_delayed();

    let stats = engine.statistics();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.nonexistent, 0);
    assert_eq!(stats.clients, 1);
    assert_eq!(stats.pending_removals, 0);
    assert!(!engine.contains(id, &file));
}

#[test]
fn test_watch_files_reports_children() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("inbox");
    std::fs::create_dir(&dir).unwrap();
    let a = dir.join("a.txt");
    std::fs::write(&a, b"a").unwrap();
    set_age(&a, 100);

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &dir, true, WatchModes::FILES, None);
    assert!(engine.contains(id, &a));

    set_age(&a, 50);
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("a.txt".to_string(), ChangeKind::Changed)]);

    std::fs::write(dir.join("b.txt"), b"b").unwrap();
    engine.tick_at(clock.advance());
    let seen = events(&rx);
    assert!(seen.contains(&("b.txt".to_string(), ChangeKind::Created)));
    assert!(seen.contains(&("inbox".to_string(), ChangeKind::Changed)));
}

#[test]
fn test_dir_only_ignores_child_files() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("d");
    std::fs::create_dir(&dir).unwrap();
    let a = dir.join("a.txt");
    std::fs::write(&a, b"a").unwrap();

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &dir, true, WatchModes::DIR_ONLY, None);
    assert!(!engine.contains(id, &a));

    set_age(&a, 10);
    engine.tick_at(clock.advance());
    assert!(events(&rx).is_empty());
}

#[test]
fn test_sub_dirs_expand_and_withdraw_with_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("tree");
    let nested = root.join("a/b");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(root.join("a/file.txt"), b"x").unwrap();

    let (mut engine, id, _rx) = stat_engine();
    engine.add_path(id, &root, true, WatchModes::SUB_DIRS, None);
    assert!(engine.contains(id, &root.join("a")));
    assert!(engine.contains(id, &nested));
    assert!(!engine.contains(id, &root.join("a/file.txt")));

    // Only the root was registered explicitly
    engine.remove_path(id, &nested);
    assert!(engine.contains(id, &nested));

    engine.remove_path(id, &root);
    assert_eq!(engine.statistics().entries, 0);
}

#[test]
fn test_new_subdirectory_is_reported_and_expanded() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("tree");
    std::fs::create_dir(&root).unwrap();

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &root, true, WatchModes::SUB_DIRS, None);

    let sub = root.join("sub");
    std::fs::create_dir(&sub).unwrap();
    engine.tick_at(clock.advance());
    assert!(events(&rx).contains(&("sub".to_string(), ChangeKind::Created)));
    assert!(engine.contains(id, &sub));
}

#[test]
fn test_noisy_children_are_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let home = temp_dir.path().join("home");
    std::fs::create_dir(&home).unwrap();
    std::fs::write(home.join(".xsession-errors"), b"").unwrap();
    std::fs::write(home.join("notes.txt"), b"").unwrap();

    let (mut engine, id, _rx) = stat_engine();
    engine.add_path(id, &home, true, WatchModes::FILES, None);
    assert!(engine.contains(id, &home.join("notes.txt")));
    assert!(!engine.contains(id, &home.join(".xsession-errors")));
}

#[test]
fn test_device_paths_are_refused() {
    let (mut engine, id, _rx) = stat_engine();
    engine.add_path(id, Path::new("/dev/null"), false, WatchModes::DIR_ONLY, None);
    assert!(!engine.contains(id, Path::new("/dev/null")));
    assert_eq!(engine.statistics().entries, 0);
}

#[test]
fn test_two_watchers_each_get_one_event() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("shared");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 100);

    let mut engine = Engine::new(stat_config());
    let mut clock = Clock::new();
    let (tx_a, rx_a) = unbounded();
    let (tx_b, rx_b) = unbounded();
    let a = engine.attach(Box::new(tx_a));
    let b = engine.attach(Box::new(tx_b));

    engine.add_path(a, &file, false, WatchModes::DIR_ONLY, None);
    // b sees the file both directly and through its directory
    engine.add_path(b, &file, false, WatchModes::DIR_ONLY, None);
    engine.add_path(b, temp_dir.path(), true, WatchModes::FILES, None);
    assert_eq!(engine.statistics().entries, 2);

    set_age(&file, 50);
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx_a), vec![("shared".to_string(), ChangeKind::Changed)]);
    assert_eq!(events(&rx_b), vec![("shared".to_string(), ChangeKind::Changed)]);
}

#[test]
fn test_disconnected_watcher_is_withdrawn() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 100);

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);
    drop(rx);

    set_age(&file, 50);
    engine.tick_at(clock.advance());
    let stats = engine.statistics();
    assert_eq!(stats.watchers, 0);
    assert_eq!(stats.entries, 0);
}

#[test]
fn test_stopped_engine_does_not_scan() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 100);

    let (mut engine, id, rx) = stat_engine();
    let mut clock = Clock::new();
    engine.add_path(id, &file, false, WatchModes::DIR_ONLY, None);

    engine.stop();
    set_age(&file, 50);
    engine.tick_at(clock.advance());
    assert!(events(&rx).is_empty());
    assert!(engine.statistics().stopped);

    engine.start();
    engine.tick_at(clock.advance());
    assert_eq!(events(&rx), vec![("a.txt".to_string(), ChangeKind::Changed)]);
}

#[test]
fn test_rescan_all_rechecks_unpolled_time() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    set_age(&file, 100);

    let (mut engine, id, rx) = stat_engine();
    engine.add_path(
        id,
        &file,
        false,
        WatchModes::DIR_ONLY,
        Some(Duration::from_secs(600)),
    );

    set_age(&file, 50);
    // Countdown has not elapsed, so only an explicit rescan notices
    engine.tick();
    assert!(events(&rx).is_empty());

    engine.rescan_all();
    engine.tick();
    assert_eq!(events(&rx), vec![("a.txt".to_string(), ChangeKind::Changed)]);
}
