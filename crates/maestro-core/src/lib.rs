//! Core error definitions for the Maestro workflow engine.
//!
//! Every Maestro crate reports failures through [`MaestroError`], so callers
//! can match on a single enum regardless of which subsystem raised it.
//!
//! # Main types
//!
//! - [`MaestroError`] — Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`] — Convenience alias for `Result<T, MaestroError>`.

/// Error enum and result alias.
pub mod error;

pub use error::{MaestroError, MaestroResult};
