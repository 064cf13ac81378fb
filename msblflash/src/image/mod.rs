//! Firmware image and key material handling.

pub mod keyfile;
pub mod msbl;

pub use keyfile::KeyMaterial;
pub use msbl::{AppHeader, MsblHeader, MsblImage, Page};
