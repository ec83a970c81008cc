pub mod archive;
pub mod benchmark;
pub mod config;
pub mod csv_store;
pub mod db;
pub mod drill;
pub mod dual_write;
pub mod error;
pub mod import;
pub mod monitor;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod validator;
pub mod workers;
