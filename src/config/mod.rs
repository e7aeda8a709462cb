// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] is the TOML data model plus the validated [`Settings`].
//! - [`loader`] reads the file and merges CLI overrides.
//! - [`validate`] turns a `RawConfigFile` into `Settings`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_optional};
pub use model::{ConfigOverrides, RawConfigFile, Settings};
pub use validate::{validate_queue_names, worker_settings};
