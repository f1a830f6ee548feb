use oxidata_edm::EdmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Edm(#[from] EdmError),
    #[error("unknown type {0}")]
    UnknownType(String),
    #[error("property '{property}' is not declared on {type_name}")]
    UnknownProperty { type_name: String, property: String },
    #[error("expected {expected} for '{name}'")]
    UnexpectedShape { name: String, expected: String },
    #[error("missing element <{0}>")]
    MissingElement(String),
}

pub type Result<T> = std::result::Result<T, FormatError>;
