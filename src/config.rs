use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::FileSystemType;
use crate::core::coupling::{CoupledVolumeSet, CouplingTable};

pub const CONFIG_FILE_DEFAULT: &str = "/etc/volwipe/config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// A removable volume the tool may operate on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeEntry {
    /// Mount point identifying the volume
    pub path: String,
    /// Block device backing it, e.g. `/dev/mmcblk1p1`
    pub device: String,
    #[serde(default = "default_filesystem")]
    pub filesystem: FileSystemType,
    #[serde(default = "default_label")]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub volumes: Vec<VolumeEntry>,
    pub couplings: Vec<CoupledVolumeSet>,
    pub poll_interval_ms: u64,
    pub command_timeout_secs: u64,
    /// Command run (not awaited) to request a factory reset
    pub wipe_command: Vec<String>,
    pub keep_alive: bool,
    pub log_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            couplings: Vec::new(),
            poll_interval_ms: 500,
            command_timeout_secs: 30,
            wipe_command: Vec::new(),
            keep_alive: true,
            log_dir: PathBuf::from("/var/log/volwipe"),
            log_filter: None,
        }
    }
}

fn default_filesystem() -> FileSystemType {
    FileSystemType::Vfat
}

fn default_label() -> String {
    "STORAGE".to_string()
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the default config file, falling back to defaults when it is absent
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Path::new(CONFIG_FILE_DEFAULT);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        for (i, volume) in self.volumes.iter().enumerate() {
            if !volume.path.starts_with('/') || !volume.device.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "volume {} needs absolute path and device",
                    volume.path
                )));
            }
            if self.volumes[..i].iter().any(|v| v.path == volume.path) {
                return Err(ConfigError::Invalid(format!(
                    "volume {} is listed twice",
                    volume.path
                )));
            }
        }
        self.coupling_table()?;
        Ok(())
    }

    pub fn coupling_table(&self) -> Result<CouplingTable, ConfigError> {
        CouplingTable::new(self.couplings.clone()).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn volume(&self, path: &str) -> Option<&VolumeEntry> {
        self.volumes.iter().find(|v| v.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
poll_interval_ms = 250
wipe_command = ["/usr/sbin/factory-reset", "--now"]

[[volumes]]
path = "/mnt/sdcard"
device = "/dev/mmcblk1p1"
filesystem = "exfat"
label = "SDCARD"

[[volumes]]
path = "/mnt/extsd"
device = "/dev/sdb1"

[[couplings]]
anchor = "/mnt/sdcard"
members = ["/mnt/extsd"]
"#;

    #[test]
    fn parses_sample_and_fills_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.command_timeout_secs, 30);
        assert!(config.keep_alive);
        assert_eq!(config.volumes.len(), 2);
        assert_eq!(config.volumes[0].filesystem, FileSystemType::ExFat);
        assert_eq!(config.volumes[1].filesystem, FileSystemType::Vfat);
        assert_eq!(config.volumes[1].label, "STORAGE");
        assert_eq!(
            config.coupling_table().unwrap().coupled_with("/mnt/sdcard"),
            ["/mnt/extsd"]
        );
    }

    #[test]
    fn default_config_survives_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_bad_volumes_and_couplings() {
        let mut config = Config::default();
        config.volumes.push(VolumeEntry {
            path: "mnt/sdcard".to_string(),
            device: "/dev/sdb1".to_string(),
            filesystem: FileSystemType::Vfat,
            label: "X".to_string(),
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.couplings.push(CoupledVolumeSet {
            anchor: "/mnt/a".to_string(),
            members: vec!["/mnt/a".to_string()],
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
