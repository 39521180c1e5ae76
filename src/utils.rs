use std::sync::OnceLock;

use anyhow::Context;
use elevate::RunningAs;

static RUNNING_AS_ROOT: OnceLock<bool> = OnceLock::new();

const SIZE_UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

pub fn running_as_root() -> bool {
    *RUNNING_AS_ROOT.get_or_init(|| matches!(elevate::check(), RunningAs::Root | RunningAs::Suid))
}

/// Re-executes volwipe through sudo/doas/pkexec unless it already runs as root.
///
/// The process is replaced on success, so nothing stateful (logging, raw
/// terminal, a run) may exist yet.
pub fn ensure_root() -> anyhow::Result<()> {
    if running_as_root() {
        return Ok(());
    }
    eprintln!("volwipe needs root to unmount and erase volumes, re-running elevated");
    elevate::escalate_if_needed()
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Failed to escalate privileges")
}

/// Volume size for the status table, `-` when lsblk gave none
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "-".to_string();
    }
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < SIZE_UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", SIZE_UNITS[unit])
}
