//! Image building for rcal.
//!
//! One build invocation: execute the provisioning sequence in a fresh
//! build root, register the resulting image, and apply every alias in
//! the derived tag set.

pub mod build;

pub use build::{build_image, BuildReport};
