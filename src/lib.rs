//! loginbridge: interactive user-account login orchestration for hosted
//! messaging agents.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod gateway;
pub mod settings;

pub use config::Config;
pub use error::{Error, Result};
