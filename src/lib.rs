//! linkroll: paginated, cached link pages over a flat-file link store, with
//! scheduled publishing from a staging store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
