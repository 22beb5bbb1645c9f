// src/config/mod.rs

//! Job definition loading and validation for dagrun.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a job definition from disk (`loader.rs`).
//! - Validate load-time invariants like graph correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigSection, JobFile, RawJobFile, TaskConfig};
pub use validate::validate_variants;
