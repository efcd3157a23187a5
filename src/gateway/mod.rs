//! HTTP gateway for the login session API.

pub mod auth;
pub mod server;
pub mod types;

pub use server::{GatewayState, start_server};
