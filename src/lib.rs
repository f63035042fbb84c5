//! Tools for moving HR-pQCT scans between the scanner, a local store and the
//! compute cluster, and for converting the resulting 3D images.
//!
//! The planner side reads a study manifest ([`manifest`]), renders one
//! command line per scan ([`template`], [`plan`]) and writes them to a log
//! for later execution ([`run`]). It never contacts the remote hosts itself.
//! The [`convert`] module backs the `convertimg` tool.

pub mod common;
pub mod config;
pub mod convert;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod plan;
pub mod run;
pub mod template;

pub use error::{ConvertError, Error, ManifestFormatError};
