//! Removable boot devices: mounting, bootloader installation and config
//! discovery.

pub mod device;
pub mod probe;

pub use device::{
    BootDevice, BootloaderReport, DeviceTarget, FirmwareMode, InstallStage, InstallationOutcome,
    MountState,
};
