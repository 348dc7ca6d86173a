//! Packing and installing distpack packages.
//!
//! [`Packer`] runs on the build machine and produces a package archive plus
//! its manifest. [`Installer`] runs on the target machine and lays the
//! package's files out across real directories.

pub mod archiver;
pub mod config;
pub mod error;
pub mod fsops;
pub mod installer;
pub mod packer;
pub mod paths;
pub mod staging;

pub use archiver::{Archiver, SevenZip, TarZst};
pub use config::{InstallConfig, PackConfig, PackPlan};
pub use error::{DistError, ErrorKind};
pub use installer::{DistributionReport, InstallStage, Installer};
pub use packer::{PackOutput, Packer};
pub use paths::*;
