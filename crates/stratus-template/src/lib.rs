//! Stratus template front-end
//!
//! Parses KDL stack templates into a typed model: parameters, mappings,
//! resources with intrinsic property expressions, and outputs. The engine
//! crate consumes this model to plan and apply infrastructure changes.

pub mod discovery;
pub mod error;
pub mod expr;
pub mod model;
pub mod parser;

pub use discovery::*;
pub use error::*;
pub use expr::*;
pub use model::*;
pub use parser::*;
