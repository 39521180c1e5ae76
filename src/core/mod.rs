pub mod controller;
pub mod coupling;
pub mod probe;
pub mod reporter;
pub mod signals;
pub mod volume_ops;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mount state of one volume path, as reported by the storage subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeState {
    Mounted,
    MountedReadOnly,
    Unmounted,
    Unmountable,
    NoFilesystem,
    BadRemoval,
    Checking,
    Removed,
    Shared,
    Unknown,
}

impl VolumeState {
    pub fn is_mounted(&self) -> bool {
        matches!(self, VolumeState::Mounted | VolumeState::MountedReadOnly)
    }

    /// Short machine-friendly name, also accepted by [`VolumeState::from_name`]
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeState::Mounted => "mounted",
            VolumeState::MountedReadOnly => "mounted_ro",
            VolumeState::Unmounted => "unmounted",
            VolumeState::Unmountable => "unmountable",
            VolumeState::NoFilesystem => "nofs",
            VolumeState::BadRemoval => "bad_removal",
            VolumeState::Checking => "checking",
            VolumeState::Removed => "removed",
            VolumeState::Shared => "shared",
            VolumeState::Unknown => "unknown",
        }
    }

    /// Looks a state up by the name [`as_str`](Self::as_str) gives it
    pub fn from_name(s: &str) -> Option<Self> {
        let state = match s.trim() {
            "mounted" => VolumeState::Mounted,
            "mounted_ro" => VolumeState::MountedReadOnly,
            "unmounted" => VolumeState::Unmounted,
            "unmountable" => VolumeState::Unmountable,
            "nofs" => VolumeState::NoFilesystem,
            "bad_removal" => VolumeState::BadRemoval,
            "checking" => VolumeState::Checking,
            "removed" => VolumeState::Removed,
            "shared" => VolumeState::Shared,
            "unknown" => VolumeState::Unknown,
            _ => return None,
        };
        Some(state)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown volume state `{0}`")]
pub struct UnknownStateName(pub String);

impl FromStr for VolumeState {
    type Err = UnknownStateName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownStateName(s.to_string()))
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens after a successful format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    FormatOnly,
    FormatAndFactoryReset,
}

/// One request to drive a volume through unmount -> format -> remount/reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequest {
    pub target_path: String,
    pub mode: FormatMode,
    pub always_reset: bool,
}

impl VolumeRequest {
    pub fn new(target_path: impl Into<String>, mode: FormatMode, always_reset: bool) -> Self {
        Self {
            target_path: target_path.into(),
            mode,
            always_reset,
        }
    }
}

/// Progress stage shown while a run is moving forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unmounting,
    Erasing,
}

impl Stage {
    pub fn message(&self) -> &'static str {
        match self {
            Stage::Unmounting => "Unmounting storage...",
            Stage::Erasing => "Erasing storage...",
        }
    }
}

/// Coarse, user-facing reason a run could not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    BadRemoval,
    Checking,
    Removed,
    Shared,
    UnknownState,
    FormatError,
}

impl FailureReason {
    pub fn message(&self) -> &'static str {
        match self {
            FailureReason::BadRemoval => "The storage was removed before it was unmounted.",
            FailureReason::Checking => "The storage is being checked. Try again later.",
            FailureReason::Removed => "No storage present. Insert the media and try again.",
            FailureReason::Shared => "The storage is in use elsewhere. Release it and try again.",
            FailureReason::UnknownState => "The storage is in an unknown state.",
            FailureReason::FormatError => "Couldn't erase the storage.",
        }
    }
}

/// Terminal result of one lifecycle run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failed => 1,
            RunOutcome::Cancelled => 130,
        }
    }
}

/// Filesystems the Linux volume service knows how to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystemType {
    Vfat,
    ExFat,
    Ntfs,
    Ext4,
}

impl FileSystemType {
    pub fn display_name(&self) -> &'static str {
        match self {
            FileSystemType::Vfat => "FAT32",
            FileSystemType::ExFat => "exFAT",
            FileSystemType::Ntfs => "NTFS",
            FileSystemType::Ext4 => "ext4",
        }
    }

    /// mkfs binary and its arguments for formatting `device` with `label`
    pub fn mkfs_command<'a>(&self, device: &'a str, label: &'a str) -> (&'static str, Vec<&'a str>) {
        match self {
            FileSystemType::Vfat => ("mkfs.vfat", vec!["-F", "32", "-n", label, device]),
            FileSystemType::ExFat => ("mkfs.exfat", vec!["-n", label, device]),
            FileSystemType::Ntfs => ("mkfs.ntfs", vec!["-f", "-L", label, device]),
            FileSystemType::Ext4 => ("mkfs.ext4", vec!["-F", "-L", label, device]),
        }
    }
}

/// Errors that can occur when talking to the volume service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Volume service unavailable: {0}")]
    Unavailable(String),

    #[error("Operation rejected: {0}")]
    Rejected(String),

    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Volume is busy or in use")]
    Busy,

    #[error("Insufficient privileges - run as root")]
    InsufficientPrivileges,

    #[error("Unknown volume: {0}")]
    UnknownVolume(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a request is refused before a run starts
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("A run is already active for {active}")]
    RunActive { active: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_state_names_parse_back() {
        for state in [
            VolumeState::Mounted,
            VolumeState::MountedReadOnly,
            VolumeState::Unmounted,
            VolumeState::Unmountable,
            VolumeState::NoFilesystem,
            VolumeState::BadRemoval,
            VolumeState::Checking,
            VolumeState::Removed,
            VolumeState::Shared,
            VolumeState::Unknown,
        ] {
            assert_eq!(state.as_str().parse(), Ok(state));
        }
        assert_eq!(VolumeState::from_name("ejecting"), None);
        assert_eq!(
            "".parse::<VolumeState>(),
            Err(UnknownStateName(String::new()))
        );
    }

    #[test]
    fn only_mounted_states_count_as_mounted() {
        assert!(VolumeState::Mounted.is_mounted());
        assert!(VolumeState::MountedReadOnly.is_mounted());
        assert!(!VolumeState::Unmounted.is_mounted());
        assert!(!VolumeState::Shared.is_mounted());
    }

    #[test]
    fn mkfs_command_puts_device_last() {
        let (cmd, args) = FileSystemType::Vfat.mkfs_command("/dev/sdb1", "SDCARD");
        assert_eq!(cmd, "mkfs.vfat");
        assert_eq!(args.last(), Some(&"/dev/sdb1"));
        assert!(args.contains(&"SDCARD"));
    }
}
