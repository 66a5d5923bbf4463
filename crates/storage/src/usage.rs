//! Filesystem usage query (component C5, `usage()`).

use std::path::Path;

use serde::Serialize;
use sysinfo::Disks;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_fraction: f64,
}

/// Report usage for the filesystem backing `recordings_base`, matching the
/// disk whose mount point is the longest prefix of that path.
pub fn usage(recordings_base: &Path) -> UsageStats {
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(&sysinfo::Disk, usize)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if recordings_base.starts_with(mount) {
            let len = mount.as_os_str().len();
            if best.map(|(_, best_len)| len > best_len).unwrap_or(true) {
                best = Some((disk, len));
            }
        }
    }

    match best {
        Some((disk, _)) => {
            let total = disk.total_space();
            let free = disk.available_space();
            UsageStats {
                total_bytes: total,
                free_bytes: free,
                used_fraction: if total == 0 {
                    0.0
                } else {
                    1.0 - (free as f64 / total as f64)
                },
            }
        }
        None => UsageStats {
            total_bytes: 0,
            free_bytes: 0,
            used_fraction: 0.0,
        },
    }
}
