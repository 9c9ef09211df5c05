//! Application services: publishing, pagination, rendering and request handling.

pub mod error;
pub mod handler;
pub mod pagination;
pub mod publishing;
pub mod render;
pub mod repos;
