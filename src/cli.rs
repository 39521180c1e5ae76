use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CONFIG_FILE_DEFAULT;
use crate::core::VolumeState;

#[derive(Parser, Debug)]
#[command(name = "volwipe", version, about = "Erase removable storage volumes")]
pub struct Cli {
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Unmount, erase and remount a volume
    Format {
        /// Mount point of the volume to erase
        path: String,
        /// Request a factory reset instead of remounting
        #[arg(long)]
        factory_reset: bool,
        /// Request a factory reset even if the run fails
        #[arg(long)]
        always_reset: bool,
        /// Report progress to the log instead of a terminal dialog
        #[arg(long)]
        headless: bool,
    },
    /// Show configured volumes and their current state
    Status {
        /// Only list volumes in this state, e.g. `mounted` or `nofs`
        #[arg(long)]
        state: Option<VolumeState>,
    },
    GenConfig {
        #[arg(short = 'o', long = "output", default_value = CONFIG_FILE_DEFAULT)]
        output: PathBuf,
    },
    ShowConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_flags() {
        let cli = Cli::parse_from([
            "volwipe",
            "format",
            "/mnt/sdcard",
            "--factory-reset",
            "--headless",
        ]);
        match cli.command {
            Commands::Format {
                path,
                factory_reset,
                always_reset,
                headless,
            } => {
                assert_eq!(path, "/mnt/sdcard");
                assert!(factory_reset);
                assert!(!always_reset);
                assert!(headless);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from([
            "volwipe",
            "status",
            "--config",
            "/tmp/volwipe.toml",
            "--state",
            "mounted_ro",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/volwipe.toml")));
        assert!(matches!(
            cli.command,
            Commands::Status {
                state: Some(VolumeState::MountedReadOnly)
            }
        ));
    }

    #[test]
    fn unknown_state_filter_is_rejected() {
        let err = Cli::try_parse_from(["volwipe", "status", "--state", "mountd"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert!(err.to_string().contains("mountd"));
    }

    #[test]
    fn gen_config_defaults_to_system_path() {
        let cli = Cli::parse_from(["volwipe", "gen-config"]);
        match cli.command {
            Commands::GenConfig { output } => {
                assert_eq!(output, PathBuf::from(CONFIG_FILE_DEFAULT))
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
