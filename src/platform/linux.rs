use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::VolumeEntry;
use crate::core::probe::{Subscribers, Subscription, VolumeStateChange, VolumeStateProbe};
use crate::core::signals::{KeepAlive, KeepAliveGuard, WipeSignal};
use crate::core::volume_ops::VolumeService;
use crate::core::{ServiceError, VolumeState};

/// Linux volume service using mount/umount and mkfs.* tools
pub struct LinuxVolumeService {
    volumes: Arc<Vec<VolumeEntry>>,
    command_timeout: Duration,
}

impl LinuxVolumeService {
    pub fn new(volumes: Arc<Vec<VolumeEntry>>, command_timeout: Duration) -> Self {
        Self {
            volumes,
            command_timeout,
        }
    }

    fn entry(&self, path: &str) -> Result<&VolumeEntry, ServiceError> {
        self.volumes
            .iter()
            .find(|v| v.path == path)
            .ok_or_else(|| ServiceError::UnknownVolume(path.to_string()))
    }

    fn ensure_privileges(&self) -> Result<(), ServiceError> {
        if !self.has_privileges() {
            return Err(ServiceError::InsufficientPrivileges);
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeService for LinuxVolumeService {
    async fn mount(&self, path: &str) -> Result<(), ServiceError> {
        self.ensure_privileges()?;
        let entry = self.entry(path)?;

        let output = run_tool(
            "mount",
            &[entry.device.as_str(), path],
            Some(self.command_timeout),
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("already mounted") {
                return Ok(());
            }
            return Err(classify_failure(&stderr));
        }

        Ok(())
    }

    async fn unmount(&self, path: &str, force: bool) -> Result<(), ServiceError> {
        self.ensure_privileges()?;
        self.entry(path)?;

        let mut args = Vec::new();
        if force {
            args.extend(["-f", "-l"]);
        }
        args.push(path);

        let output = run_tool("umount", &args, Some(self.command_timeout)).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not mounted") {
                // Already unmounted, treat as success
                return Ok(());
            }
            return Err(classify_failure(&stderr));
        }

        Ok(())
    }

    async fn format(&self, path: &str) -> Result<(), ServiceError> {
        self.ensure_privileges()?;
        let entry = self.entry(path)?;

        let (cmd, args) = entry.filesystem.mkfs_command(&entry.device, &entry.label);
        tracing::info!(
            "Creating {} filesystem on {}",
            entry.filesystem.display_name(),
            entry.device
        );

        // No timeout: formatting large media legitimately takes a long time
        let output = run_tool(cmd, &args, None).await?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        Ok(())
    }

    fn has_privileges(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }
}

async fn run_tool(
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<std::process::Output, ServiceError> {
    tracing::debug!("Running {} {}", program, args.join(" "));

    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| ServiceError::TimedOut(limit))?,
        None => command.output().await,
    };

    output.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ServiceError::Unavailable(format!("{program} not found")),
        _ => ServiceError::Io(e),
    })
}

fn classify_failure(stderr: &str) -> ServiceError {
    if stderr.contains("busy") {
        return ServiceError::Busy;
    }
    ServiceError::Rejected(stderr.trim().to_string())
}

/// Current state and size of one configured volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeStatus {
    pub path: String,
    pub device: String,
    pub state: VolumeState,
    pub size_bytes: u64,
}

/// Volume state from lsblk and mountinfo, with change notifications by polling
pub struct LinuxVolumeProbe {
    volumes: Arc<Vec<VolumeEntry>>,
    poll_interval: Duration,
    subscribers: Subscribers,
    polling: Arc<AtomicBool>,
}

impl LinuxVolumeProbe {
    pub fn new(volumes: Arc<Vec<VolumeEntry>>, poll_interval: Duration) -> Self {
        Self {
            volumes,
            poll_interval,
            subscribers: Subscribers::default(),
            polling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// State of every configured volume
    pub async fn status(&self) -> Vec<VolumeStatus> {
        scan(&self.volumes).await
    }

    fn start_polling(&self) {
        if self.polling.swap(true, Ordering::SeqCst) {
            return;
        }

        let volumes = self.volumes.clone();
        let subscribers = self.subscribers.clone();
        let polling = self.polling.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            tracing::debug!("Volume state polling started");
            // The first scan runs after subscribers may already have acted,
            // so it is diffed against nothing and reports every volume
            let mut last = HashMap::new();

            loop {
                let next = states(&scan(&volumes).await);
                for change in diff_states(&last, &next) {
                    subscribers.publish(change);
                }
                last = next;

                tokio::time::sleep(interval).await;

                if subscribers.is_empty() {
                    polling.store(false, Ordering::SeqCst);
                    // A subscriber may have arrived between the check and the store
                    if subscribers.is_empty() || polling.swap(true, Ordering::SeqCst) {
                        break;
                    }
                }
            }
            tracing::debug!("Volume state polling stopped");
        });
    }
}

#[async_trait]
impl VolumeStateProbe for LinuxVolumeProbe {
    async fn state(&self, path: &str) -> VolumeState {
        if !self.volumes.iter().any(|v| v.path == path) {
            return VolumeState::Unknown;
        }
        scan(&self.volumes)
            .await
            .into_iter()
            .find(|s| s.path == path)
            .map(|s| s.state)
            .unwrap_or(VolumeState::Unknown)
    }

    fn subscribe(&self) -> Subscription {
        let subscription = self.subscribers.subscribe();
        self.start_polling();
        subscription
    }
}

async fn scan(volumes: &[VolumeEntry]) -> Vec<VolumeStatus> {
    let blocks = match list_block_devices().await {
        Ok(blocks) => blocks,
        Err(e) => {
            tracing::warn!("Failed to list block devices: {}", e);
            return volumes
                .iter()
                .map(|v| VolumeStatus {
                    path: v.path.clone(),
                    device: v.device.clone(),
                    state: VolumeState::Unknown,
                    size_bytes: 0,
                })
                .collect();
        }
    };

    let mounts = match tokio::fs::read_to_string("/proc/self/mountinfo").await {
        Ok(content) => parse_mountinfo(&content),
        Err(e) => {
            tracing::warn!("Failed to read mountinfo: {}", e);
            Vec::new()
        }
    };

    let checking = fsck_targets().await;

    volumes
        .iter()
        .map(|v| VolumeStatus {
            path: v.path.clone(),
            device: v.device.clone(),
            state: classify(v, &blocks, &mounts, &checking),
            size_bytes: blocks
                .iter()
                .find(|b| b.device_path() == v.device)
                .map(|b| parse_size(b.size.as_deref().unwrap_or("")))
                .unwrap_or(0),
        })
        .collect()
}

fn states(status: &[VolumeStatus]) -> HashMap<String, VolumeState> {
    status.iter().map(|s| (s.path.clone(), s.state)).collect()
}

fn diff_states(
    last: &HashMap<String, VolumeState>,
    next: &HashMap<String, VolumeState>,
) -> Vec<VolumeStateChange> {
    let mut changes: Vec<VolumeStateChange> = next
        .iter()
        .filter_map(|(path, new_state)| {
            let old_state = last.get(path).copied().unwrap_or(VolumeState::Unknown);
            (old_state != *new_state).then(|| VolumeStateChange {
                path: path.clone(),
                old_state,
                new_state: *new_state,
            })
        })
        .collect();
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

/// Filesystem signatures that hold data but cannot be mounted directly
const CONTAINER_FSTYPES: &[&str] = &["crypto_LUKS", "LVM2_member", "linux_raid_member", "swap"];

fn classify(
    volume: &VolumeEntry,
    blocks: &[BlockDevice],
    mounts: &[MountEntry],
    checking: &[String],
) -> VolumeState {
    let mount = mounts.iter().find(|m| m.mount_point == volume.path);

    let Some(block) = blocks.iter().find(|b| b.device_path() == volume.device) else {
        // Still mounted although the device is gone
        return match mount {
            Some(m) if m.source == volume.device => VolumeState::BadRemoval,
            _ => VolumeState::Removed,
        };
    };

    if let Some(mount) = mount {
        // Something else sits on our mount point
        if mount.source != volume.device {
            return VolumeState::Shared;
        }
        return if mount.read_only {
            VolumeState::MountedReadOnly
        } else {
            VolumeState::Mounted
        };
    }

    if mounts.iter().any(|m| m.source == volume.device) {
        return VolumeState::Shared;
    }

    if checking.iter().any(|d| *d == volume.device) {
        return VolumeState::Checking;
    }

    match block.fstype.as_deref() {
        None | Some("") => VolumeState::NoFilesystem,
        Some(fstype) if CONTAINER_FSTYPES.contains(&fstype) => VolumeState::Unmountable,
        Some(_) => VolumeState::Unmounted,
    }
}

/// Devices a running fsck was started on
async fn fsck_targets() -> Vec<String> {
    let mut targets = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir("/proc").await else {
        return targets;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !name.to_string_lossy().bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // Processes may exit while we look
        if let Ok(cmdline) = tokio::fs::read(entry.path().join("cmdline")).await {
            targets.extend(fsck_devices(&cmdline));
        }
    }
    targets
}

fn fsck_devices(cmdline: &[u8]) -> Vec<String> {
    let mut args = cmdline
        .split(|b| *b == 0)
        .filter(|a| !a.is_empty())
        .map(|a| String::from_utf8_lossy(a).into_owned());

    let is_fsck = args
        .next()
        .and_then(|argv0| argv0.rsplit('/').next().map(|n| n.starts_with("fsck")))
        .unwrap_or(false);
    if !is_fsck {
        return Vec::new();
    }
    args.filter(|a| a.starts_with("/dev/")).collect()
}

async fn list_block_devices() -> Result<Vec<BlockDevice>, ServiceError> {
    let output = run_tool(
        "lsblk",
        &["--json", "-o", "NAME,SIZE,FSTYPE,PATH"],
        Some(Duration::from_secs(10)),
    )
    .await?;

    if !output.status.success() {
        return Err(ServiceError::Rejected(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    parse_lsblk_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse lsblk JSON output into a flat list of disks and partitions
fn parse_lsblk_output(output: &str) -> Result<Vec<BlockDevice>, ServiceError> {
    let lsblk: LsblkOutput =
        serde_json::from_str(output).map_err(|e| ServiceError::Rejected(e.to_string()))?;

    let mut flat = Vec::new();
    let mut pending = lsblk.blockdevices;
    while let Some(mut block) = pending.pop() {
        if let Some(children) = block.children.take() {
            pending.extend(children);
        }
        // Skip loop devices and other non-physical devices
        if block.name.starts_with("loop") || block.name.starts_with("ram") {
            continue;
        }
        flat.push(block);
    }

    Ok(flat)
}

/// Structures for parsing lsblk JSON output
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct BlockDevice {
    name: String,
    size: Option<String>,
    fstype: Option<String>,
    path: Option<String>,
    children: Option<Vec<BlockDevice>>,
}

impl BlockDevice {
    fn device_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("/dev/{}", self.name))
    }
}

/// Parse size string from lsblk (e.g., "500G", "1T", "256M") to bytes
fn parse_size(size_str: &str) -> u64 {
    let size_str = size_str.trim();
    if size_str.is_empty() {
        return 0;
    }

    let (num_str, suffix) = size_str.split_at(size_str.len().saturating_sub(1));
    let multiplier: u64 = match suffix.to_uppercase().as_str() {
        "B" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024 * 1024 * 1024 * 1024,
        "P" => 1024 * 1024 * 1024 * 1024 * 1024,
        _ => {
            // No suffix, try to parse as bytes
            return size_str.parse().unwrap_or(0);
        }
    };

    num_str
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .map(|n| (n * multiplier as f64) as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    mount_point: String,
    source: String,
    read_only: bool,
}

/// Lines that don't follow the mountinfo layout are skipped
fn parse_mountinfo(input: &str) -> Vec<MountEntry> {
    input
        .lines()
        .filter_map(|line| {
            let (left, right) = line.split_once(" - ")?;
            let mut left_fields = left.split_whitespace();
            let mount_point = left_fields.nth(4)?;
            let options = left_fields.next()?;

            let mut right_fields = right.split_whitespace();
            let _fs_type = right_fields.next()?;
            let source = right_fields.next()?;

            Some(MountEntry {
                mount_point: unescape_mount_field(mount_point),
                source: unescape_mount_field(source),
                read_only: options.split(',').any(|o| o == "ro"),
            })
        })
        .collect()
}

/// Decodes the octal escapes mountinfo uses for whitespace and backslashes.
/// Works on bytes so multi-byte UTF-8 paths survive intact.
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(u8::is_ascii_digit)
        {
            if let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8) {
                output.push(num);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

/// Holds a systemd-inhibit lock for as long as the lease lives
pub struct InhibitKeepAlive;

impl KeepAlive for InhibitKeepAlive {
    fn acquire(&self, reason: &str) -> KeepAliveGuard {
        let why = format!("--why={reason}");
        let spawned = std::process::Command::new("systemd-inhibit")
            .args([
                "--what=sleep:idle:shutdown",
                "--who=volwipe",
                why.as_str(),
                "--mode=block",
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                tracing::debug!("Keep-alive acquired (pid {})", child.id());
                KeepAliveGuard::new(move || {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::debug!("Keep-alive released");
                })
            }
            Err(e) => {
                tracing::warn!("Failed to acquire keep-alive: {}", e);
                KeepAliveGuard::noop()
            }
        }
    }
}

/// Requests a factory reset by launching a configured command
pub struct CommandWipeSignal {
    argv: Vec<String>,
}

impl CommandWipeSignal {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl WipeSignal for CommandWipeSignal {
    fn request_factory_reset(&self) {
        let Some((program, args)) = self.argv.split_first() else {
            tracing::warn!("Factory reset requested but no wipe_command is configured");
            return;
        };

        // Handling is asynchronous; the reset is assumed to follow soon
        match std::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => tracing::info!("Factory reset requested (pid {})", child.id()),
            Err(e) => tracing::error!("Failed to launch {}: {}", program, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FileSystemType;

    const LSBLK: &str = r#"{
        "blockdevices": [
            {"name": "loop0", "size": "4K", "type": "loop", "fstype": null, "path": "/dev/loop0"},
            {"name": "sda", "size": "500G", "type": "disk", "fstype": null, "path": "/dev/sda",
             "children": [
                {"name": "sda1", "size": "499G", "type": "part", "fstype": "ext4", "path": "/dev/sda1"}
             ]},
            {"name": "mmcblk1", "size": "29.7G", "type": "disk", "fstype": null, "path": "/dev/mmcblk1",
             "children": [
                {"name": "mmcblk1p1", "size": "29.7G", "type": "part", "fstype": "vfat", "path": "/dev/mmcblk1p1"}
             ]},
            {"name": "sdb", "size": "16G", "type": "disk", "fstype": null, "path": "/dev/sdb"}
        ]
    }"#;

    const MOUNTINFO: &str = "36 25 8:1 / / rw,relatime - ext4 /dev/sda1 rw\n\
        90 36 179:1 / /mnt/sdcard rw,nosuid - vfat /dev/mmcblk1p1 rw\n\
        91 36 8:16 / /media/usb\\040stick ro,relatime - vfat /dev/sdb rw\n\
        garbage line\n";

    fn volume(path: &str, device: &str) -> VolumeEntry {
        VolumeEntry {
            path: path.to_string(),
            device: device.to_string(),
            filesystem: FileSystemType::Vfat,
            label: "TEST".to_string(),
        }
    }

    #[test]
    fn lsblk_output_is_flattened_without_loop_devices() {
        let blocks = parse_lsblk_output(LSBLK).unwrap();
        let mut paths: Vec<String> = blocks.iter().map(|b| b.device_path()).collect();
        paths.sort();

        assert_eq!(
            paths,
            ["/dev/mmcblk1", "/dev/mmcblk1p1", "/dev/sda", "/dev/sda1", "/dev/sdb"]
        );
    }

    #[test]
    fn mountinfo_parsing_unescapes_and_reads_ro() {
        let mounts = parse_mountinfo(MOUNTINFO);

        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[2].mount_point, "/media/usb stick");
        assert_eq!(mounts[2].source, "/dev/sdb");
        assert!(mounts[2].read_only);
        assert!(!mounts[1].read_only);
    }

    #[test]
    fn classifies_volume_states() {
        let blocks = parse_lsblk_output(LSBLK).unwrap();
        let mounts = parse_mountinfo(MOUNTINFO);

        let cases = [
            (volume("/mnt/sdcard", "/dev/mmcblk1p1"), VolumeState::Mounted),
            (volume("/media/usb stick", "/dev/sdb"), VolumeState::MountedReadOnly),
            (volume("/mnt/extsd", "/dev/sdc1"), VolumeState::Removed),
            (volume("/mnt/sdcard", "/dev/sdb"), VolumeState::Shared),
            (volume("/mnt/disk", "/dev/sda"), VolumeState::NoFilesystem),
        ];
        for (v, expected) in cases {
            assert_eq!(classify(&v, &blocks, &mounts, &[]), expected, "{}", v.device);
        }

        let idle = parse_mountinfo("36 25 8:1 / / rw - ext4 /dev/sda1 rw\n");
        assert_eq!(
            classify(&volume("/mnt/sdcard", "/dev/mmcblk1p1"), &blocks, &idle, &[]),
            VolumeState::Unmounted
        );
    }

    #[test]
    fn non_ascii_mount_points_match_their_volume() {
        let blocks = parse_lsblk_output(
            r#"{"blockdevices": [{"name": "sdc1", "size": "8G", "fstype": "vfat", "path": "/dev/sdc1"}]}"#,
        )
        .unwrap();
        let mounts = parse_mountinfo(
            "90 36 179:1 / /media/\u{00dc}ber rw - vfat /dev/sdc1 rw\n\
             91 36 179:2 / /media/caf\\303\\251\\040x ro - vfat /dev/sdd1 rw\n",
        );

        assert_eq!(mounts[0].mount_point, "/media/\u{00dc}ber");
        assert_eq!(mounts[1].mount_point, "/media/caf\u{00e9} x");
        assert_eq!(
            classify(&volume("/media/\u{00dc}ber", "/dev/sdc1"), &blocks, &mounts, &[]),
            VolumeState::Mounted
        );
    }

    #[test]
    fn first_scan_reports_every_volume() {
        let first = HashMap::from([
            ("/mnt/a".to_string(), VolumeState::Unmounted),
            ("/mnt/b".to_string(), VolumeState::Mounted),
        ]);

        let changes = diff_states(&HashMap::new(), &first);

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "/mnt/a");
        assert_eq!(changes[0].old_state, VolumeState::Unknown);
        assert_eq!(changes[0].new_state, VolumeState::Unmounted);
    }

    #[test]
    fn classifies_problem_states() {
        let blocks = parse_lsblk_output(
            r#"{"blockdevices": [
                {"name": "sdb1", "size": "8G", "fstype": "crypto_LUKS", "path": "/dev/sdb1"},
                {"name": "sdc1", "size": "8G", "fstype": "vfat", "path": "/dev/sdc1"}
            ]}"#,
        )
        .unwrap();
        let mounts = parse_mountinfo("90 36 179:1 / /mnt/sdcard rw - vfat /dev/mmcblk1p1 rw\n");
        let checking = vec!["/dev/sdc1".to_string()];

        assert_eq!(
            classify(&volume("/mnt/sdcard", "/dev/mmcblk1p1"), &blocks, &mounts, &checking),
            VolumeState::BadRemoval
        );
        assert_eq!(
            classify(&volume("/mnt/extsd", "/dev/sdb1"), &blocks, &mounts, &checking),
            VolumeState::Unmountable
        );
        assert_eq!(
            classify(&volume("/mnt/usbhost", "/dev/sdc1"), &blocks, &mounts, &checking),
            VolumeState::Checking
        );
    }

    #[test]
    fn fsck_cmdline_yields_devices() {
        assert_eq!(
            fsck_devices(b"/sbin/fsck.vfat\0-a\0/dev/sdc1\0"),
            ["/dev/sdc1"]
        );
        assert!(fsck_devices(b"/usr/bin/cat\0/dev/sdc1\0").is_empty());
        assert!(fsck_devices(b"").is_empty());
    }

    #[test]
    fn diff_reports_only_changed_paths() {
        let last = HashMap::from([
            ("/mnt/a".to_string(), VolumeState::Mounted),
            ("/mnt/b".to_string(), VolumeState::Unmounted),
        ]);
        let next = HashMap::from([
            ("/mnt/a".to_string(), VolumeState::Unmounted),
            ("/mnt/b".to_string(), VolumeState::Unmounted),
        ]);

        assert_eq!(
            diff_states(&last, &next),
            vec![VolumeStateChange {
                path: "/mnt/a".to_string(),
                old_state: VolumeState::Mounted,
                new_state: VolumeState::Unmounted,
            }]
        );
    }

    #[test]
    fn parses_lsblk_sizes() {
        assert_eq!(parse_size("4K"), 4096);
        assert_eq!(parse_size("1.5M"), 1572864);
        assert_eq!(parse_size("29,5G"), (29.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert_eq!(parse_size("512"), 512);
        assert_eq!(parse_size("2P"), 2 * 1024u64.pow(5));
        assert_eq!(parse_size(""), 0);
    }

    #[test]
    fn busy_failures_are_classified() {
        assert!(matches!(
            classify_failure("umount: /mnt/sdcard: target is busy."),
            ServiceError::Busy
        ));
        assert!(matches!(
            classify_failure("mount: wrong fs type\n"),
            ServiceError::Rejected(msg) if msg == "mount: wrong fs type"
        ));
    }

    #[tokio::test]
    async fn service_refuses_unconfigured_volumes() {
        let service = LinuxVolumeService::new(Arc::new(Vec::new()), Duration::from_secs(1));
        let result = service.format("/mnt/nowhere").await;
        if service.has_privileges() {
            assert!(matches!(result, Err(ServiceError::UnknownVolume(_))));
        } else {
            assert!(matches!(result, Err(ServiceError::InsufficientPrivileges)));
        }
    }
}
