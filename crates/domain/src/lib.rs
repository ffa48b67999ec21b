pub mod assistant;
pub mod config;
pub mod error;
pub mod query;
pub mod status;
pub mod stream;
pub mod tool;
