//! Engine error types

use stratus_template::{EvalError, TemplateError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("'{referrer}' references unknown resource '{target}'")]
    DanglingReference { referrer: String, target: String },

    #[error("Duplicate resource id: {0}")]
    DuplicateResource(String),

    #[error("Failed to resolve property '{property}' of '{resource}': {source}")]
    Resolve {
        resource: String,
        property: String,
        #[source]
        source: EvalError,
    },

    #[error("Failed to resolve output '{output}': {source}")]
    ResolveOutput {
        output: String,
        #[source]
        source: EvalError,
    },

    #[error("Change entry for '{0}' is missing its before-state snapshot")]
    MissingSnapshot(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("State error: {0}")]
    State(#[from] stratus_state::StateError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
