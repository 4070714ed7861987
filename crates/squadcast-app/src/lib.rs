// Library root for the application layer: configuration, data files, the
// SQLite store, forecast providers, and the per-round pipeline.

pub mod config;
pub mod data;
pub mod db;
pub mod forecast;
pub mod pipeline;
