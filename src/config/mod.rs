//! Configuration loading and validation.
//!
//! Runtime settings (`AppConfig`) and seed data for the in-memory backends
//! (`SeedData`), both loaded from YAML with a size cap and a validation
//! pass that reports every issue at once.

pub mod loader;
pub mod schema;

pub use loader::{MAX_CONFIG_SIZE, load_config, load_seed, validate_config, validate_seed};
pub use schema::*;
