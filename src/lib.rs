//! bucketsync library -- mirrors an S3 bucket listing into a SQL table.
//!
//! A run pages through ListObjects, turns every listed object into an
//! upsert task, and drains those tasks (and the listing's own continuation
//! tasks) through a fixed pool of workers until the queue is empty.

pub mod auth;
pub mod config;
pub mod errors;
pub mod listing;
pub mod metadata;
pub mod metrics;
pub mod mirror;
pub mod pool;
pub mod retry;
pub mod xml;
