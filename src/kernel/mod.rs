//! Kernel build state, artifact naming and the build/install steps.
//!
//! - [`state`] - built-ness, version and timestamp resolution
//! - [`artifact`] - the versioned naming scheme
//! - [`installer`] - configure, build and install steps

pub mod artifact;
pub mod installer;
pub mod state;

pub use artifact::{versioned_name, ArtifactKind, KernelArtifactSet, StagedArtifact};
pub use installer::ArtifactInstaller;
pub use state::{KernelState, UNKNOWN_VERSION};
