//! Middleware stack for the API

pub mod layers;

pub use layers::{compression, cors, trace};
