//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod flatfile;
pub mod http;
pub mod telemetry;
