pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod outputs;
pub mod pipeline;
pub mod reports;
pub mod transform;
pub mod types;
