//! Stratus provider abstraction
//!
//! Defines the [`ResourceProvider`] trait the engine drives, the provider
//! error taxonomy with its transient/permanent split, and the retry
//! configuration used for transient failures.

pub mod error;
pub mod provider;
pub mod retry;

pub use error::*;
pub use provider::*;
pub use retry::*;
