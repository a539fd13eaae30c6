// Encoding engine - resolution, command building and execution, independent of the CLI

pub mod core;
pub mod hardware;
pub mod probe;
pub mod worker;

pub use self::core::*;
pub use hardware::{AccelAvailability, resolve, usable_families};
pub use probe::{CapabilityProbe, FfmpegProber};
