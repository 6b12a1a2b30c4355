use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("KDL parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("failed to read template: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid template: {0}")]
    Invalid(String),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("parameter '{0}' has no value and no default")]
    MissingParameter(String),

    #[error("parameter '{name}' value '{value}' is not one of [{allowed}]")]
    DisallowedValue {
        name: String,
        value: String,
        allowed: String,
    },

    #[error("parameter '{name}' expects a number, got '{value}'")]
    NotANumber { name: String, value: String },

    #[error(
        "project root not found\nsearched upward from: {0}\nhint: run inside a directory containing stratus.kdl"
    )]
    ProjectRootNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, TemplateError>;
