// HTTP front of the toolgate gateway

pub mod api;
pub mod config;

pub use config::{AppState, ServerConfig};
