//! Watermark job pipeline
//!
//! Clients upload an image and describe a text or logo watermark. The API
//! records the job in PostgreSQL and hands a work item to a Redis-backed
//! queue; worker processes composite the watermark, store the result through
//! the configured storage driver (local disk or Cloudflare R2) and finalize
//! the job record.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
