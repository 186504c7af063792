//! Listing media pipeline
//!
//! Accepts photo uploads, stores them in an S3-compatible bucket, queues a
//! job per upload, and watermarks each photo in a background worker whose
//! progress clients poll through the status endpoint.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
