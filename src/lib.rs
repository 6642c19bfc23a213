//! Export glTF 2.0 assets as self-contained GLB files, deduplicating textures
//! and optionally converting images to Basis Universal.

pub mod convert;
pub mod dedup;
pub mod document;
pub mod error;
pub mod export;
pub mod logging;
pub mod packager;
pub mod settings;
pub mod texture;

pub use error::{Error, Result};
