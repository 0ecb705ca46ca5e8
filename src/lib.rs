//! Air-quality file processing service
//!
//! Clients obtain a presigned upload slot, upload a CSV of sensor readings to
//! object storage, and trigger processing: timestamps are normalized, missing
//! readings are filled in by a regression model, and the result is written back
//! to storage for download.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
