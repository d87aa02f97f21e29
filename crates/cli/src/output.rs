//! Event rendering

use anyhow::Result;
use dirwatch_core::{ChangeKind, WatchEvent};
use owo_colors::OwoColorize;

/// One JSON object per event
pub fn json_line(event: &WatchEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

/// Plain text, `kind path`, with a trailing slash for directories
pub fn plain_line(event: &WatchEvent) -> String {
    let suffix = if event.is_dir { "/" } else { "" };
    format!("{:<7} {}{}", event.kind.as_str(), event.path.display(), suffix)
}

/// Colored variant of [`plain_line`]
pub fn colored_line(event: &WatchEvent) -> String {
    let kind = format!("{:<7}", event.kind.as_str());
    let kind = match event.kind {
        ChangeKind::Created => kind.green().to_string(),
        ChangeKind::Changed => kind.yellow().to_string(),
        ChangeKind::Deleted => kind.red().to_string(),
    };
    let path = event.path.display().to_string();
    if event.is_dir {
        format!("{} {}/", kind, path.bold())
    } else {
        format!("{} {}", kind, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirwatch_core::WatcherId;
    use std::path::PathBuf;

    fn event(kind: ChangeKind, is_dir: bool) -> WatchEvent {
        WatchEvent {
            watcher: WatcherId::new(1),
            path: PathBuf::from("/srv/inbox"),
            kind,
            is_dir,
        }
    }

    #[test]
    fn test_json_line() {
        let line = json_line(&event(ChangeKind::Created, false)).unwrap();
        assert_eq!(
            line,
            r#"{"watcher":1,"path":"/srv/inbox","kind":"created","is_dir":false}"#
        );
    }

    #[test]
    fn test_plain_line_marks_directories() {
        assert_eq!(
            plain_line(&event(ChangeKind::Deleted, true)),
            "deleted /srv/inbox/"
        );
        assert_eq!(
            plain_line(&event(ChangeKind::Changed, false)),
            "changed /srv/inbox"
        );
    }
}
