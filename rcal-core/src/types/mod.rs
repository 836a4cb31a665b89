//! Core domain types.

pub mod image;

pub use image::{Image, ImageManifest, ImageSpec, Layer, RuntimeIdentity};
