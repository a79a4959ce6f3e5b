//! # Mercato Shared
//!
//! Serializable types of the job administration API.
//! Kept free of domain dependencies so monitoring tools can reuse them.

pub mod dto;
pub mod response;

pub use response::{ApiResponse, ErrorResponse};
