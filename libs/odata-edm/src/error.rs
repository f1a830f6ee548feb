//! Error types for the entity data model and URI model

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EdmError {
    #[error("Duplicate definition: {0}")]
    Duplicate(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Missing key property '{property}' on {type_name}")]
    MissingKey { type_name: String, property: String },

    #[error("Cannot convert '{value}' to {target}")]
    Conversion { value: String, target: String },

    #[error("Model parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, EdmError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UriError {
    #[error("Unknown resource segment '{0}'")]
    UnknownSegment(String),

    #[error("Invalid key predicate '{0}'")]
    InvalidKey(String),

    #[error("Invalid literal '{0}'")]
    InvalidLiteral(String),

    #[error("Invalid value for query option {name}: '{value}'")]
    InvalidOption { name: String, value: String },

    #[error("Segment '{0}' is not allowed at this position")]
    UnexpectedSegment(String),

    #[error("'{0}' does not address this service")]
    OutsideServiceRoot(String),

    #[error("Invalid parameter list '{0}'")]
    InvalidParameters(String),
}
