pub mod agent;
pub mod api_connection;
pub mod cli;
pub mod config;
pub mod memory;
pub mod scraping;
pub mod search;
pub mod tools;
