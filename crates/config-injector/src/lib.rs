pub mod api;
pub mod cli;
pub mod config;
pub mod injection;
pub mod reload;
pub mod server;
pub mod state;
pub mod tracing;
