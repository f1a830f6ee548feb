//! OData wire formats.
//!
//! - [`json`]: OData JSON entities and values (`@odata.*` control information)
//! - [`atom`]: Atom entries and feeds, `<metadata:value>`, AtomPub service and error documents
//! - [`csdl`]: CSDL XML for `$metadata`
//!
//! Marshalling is typed by the [`oxidata_edm::Edm`]; unmarshalled numbers
//! take the width their declaration gives them.

pub mod atom;
pub mod csdl;
pub mod error;
pub mod json;

pub use error::{FormatError, Result};
