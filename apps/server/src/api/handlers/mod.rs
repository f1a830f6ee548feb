//! Request handlers for API endpoints

pub mod odata;
pub mod system;

pub use odata::odata_request;
pub use system::{health_check, root};
