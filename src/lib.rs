pub mod auth;
pub mod config;
pub mod connectors;
pub mod message;
pub mod state;
pub mod sync;
