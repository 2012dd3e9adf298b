//! HTTP middleware: request ID and upload shedding.

pub mod request_id;
pub mod upload_limit;
