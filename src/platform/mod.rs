pub mod linux;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::core::signals::{KeepAlive, NoKeepAlive, WipeSignal};
use crate::core::volume_ops::VolumeService;

use self::linux::{
    CommandWipeSignal, InhibitKeepAlive, LinuxVolumeProbe, LinuxVolumeService,
};

/// Platform collaborators the lifecycle controller is wired to
pub struct Platform {
    pub service: Arc<dyn VolumeService>,
    pub probe: Arc<LinuxVolumeProbe>,
    pub wipe: Arc<dyn WipeSignal>,
    pub keep_alive: Arc<dyn KeepAlive>,
}

/// Build the platform implementations described by `config`
pub fn build(config: &Config) -> Platform {
    let volumes = Arc::new(config.volumes.clone());

    let keep_alive: Arc<dyn KeepAlive> = if config.keep_alive {
        Arc::new(InhibitKeepAlive)
    } else {
        Arc::new(NoKeepAlive)
    };

    Platform {
        service: Arc::new(LinuxVolumeService::new(
            volumes.clone(),
            Duration::from_secs(config.command_timeout_secs),
        )),
        probe: Arc::new(LinuxVolumeProbe::new(
            volumes,
            Duration::from_millis(config.poll_interval_ms),
        )),
        wipe: Arc::new(CommandWipeSignal::new(config.wipe_command.clone())),
        keep_alive,
    }
}
