//! rcal Core Library
//!
//! Shared types and build pipeline for the rcalendar service release
//! tooling: image spec and tag derivation, the hardened provisioning
//! sequence, the image store, and the documentation pipeline.

pub mod builder;
pub mod config;
pub mod docs;
pub mod error;
pub mod observability;
pub mod paths;
pub mod provision;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use builder::{build_image, BuildReport};
pub use config::Config;
pub use docs::DocsGenerator;
pub use error::{RcalError, Result};
pub use observability::init as init_observability;
pub use provision::{execute_sequence, ProvisioningSequence, StepRunner, SystemRunner};
pub use store::ImageStore;
pub use types::{Image, ImageManifest, ImageSpec, Layer, RuntimeIdentity};
