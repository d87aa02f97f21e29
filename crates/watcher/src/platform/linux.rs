//! Linux filesystem probes

use nix::sys::statfs::{statfs, NFS_SUPER_MAGIC, SMB_SUPER_MAGIC};
use std::path::Path;
use tracing::trace;

/// Check the filesystem magic of `path` (or its nearest existing ancestor)
pub fn is_network_fs(path: &Path) -> bool {
    let Some(probe) = super::existing_ancestor(path) else {
        return false;
    };

    match statfs(probe) {
        Ok(stat) => {
            let fs_type = stat.filesystem_type();
            fs_type == NFS_SUPER_MAGIC || fs_type == SMB_SUPER_MAGIC
        }
        Err(e) => {
            trace!("statfs {} failed: {}", probe.display(), e);
            false
        }
    }
}
