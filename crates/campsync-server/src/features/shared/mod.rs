//! Shared utilities and types for feature modules

pub mod response;

pub use response::ApiResponse;
