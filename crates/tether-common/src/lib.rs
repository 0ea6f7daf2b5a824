//! Common types shared across the tether crates.
//!
//! - [`TetherError`]: the single error enum every crate returns
//! - [`ErrorMap`]: the per-run aggregate of field and schema messages

pub mod error;
pub mod error_map;

pub use error::{Result, TetherError};
pub use error_map::{ErrorMap, SCHEMA_KEY};
