//! Lexical path canonicalization
//!
//! Registry keys must collide for every spelling of the same path, but the
//! path may not exist yet, so symlinks are left alone and `..` is resolved
//! textually.

use std::path::{Component, Path, PathBuf};

/// Make `path` absolute, resolve `.`/`..` and drop trailing separators
pub fn canonicalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Device nodes change constantly and are never worth watching
pub fn is_device_path(path: &Path) -> bool {
    path.starts_with("/dev")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_resolves_dots_and_trailing_separator() {
        assert_eq!(
            canonicalize(Path::new("/tmp/a/../b/./c/")),
            PathBuf::from("/tmp/b/c")
        );
        assert_eq!(canonicalize(Path::new("/tmp//x")), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_canonicalize_root_stays_root() {
        assert_eq!(canonicalize(Path::new("/")), PathBuf::from("/"));
        assert_eq!(canonicalize(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn test_canonicalize_relative_joins_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(canonicalize(Path::new("some/file")), cwd.join("some/file"));
    }

    #[test]
    fn test_device_paths() {
        assert!(is_device_path(Path::new("/dev")));
        assert!(is_device_path(Path::new("/dev/null")));
        assert!(!is_device_path(Path::new("/devices")));
        assert!(!is_device_path(Path::new("/home/dev")));
    }
}
