//! Platform probes used when choosing a backend

#[cfg(target_os = "linux")]
pub mod linux;

use std::path::Path;

/// True if `path` lives on a network filesystem (NFS, SMB/CIFS)
///
/// Paths that cannot be probed count as local.
pub fn is_network_fs(path: &Path) -> bool {
    #[cfg(target_os = "linux")]
    {
        linux::is_network_fs(path)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = path;
        false
    }
}

/// Nearest existing ancestor of `path` (inclusive)
#[cfg(target_os = "linux")]
pub(crate) fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}
