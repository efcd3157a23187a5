//! Bootstrap helpers for loginbridge.
//!
//! Env vars can be persisted to `~/.loginbridge/.env` so that a service
//! manager does not need to carry them. The standard `./.env` is loaded first
//! and wins; dotenvy never overwrites variables that are already set, so the
//! effective priority is:
//!
//!   explicit env vars > `./.env` > `~/.loginbridge/.env`

use std::path::{Path, PathBuf};

/// Base directory for loginbridge state: `~/.loginbridge`.
pub fn loginbridge_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".loginbridge")
}

/// Path to the loginbridge-specific `.env` file: `~/.loginbridge/.env`.
pub fn loginbridge_env_path() -> PathBuf {
    loginbridge_home().join(".env")
}

/// Load `./.env`, then `~/.loginbridge/.env`.
pub fn load_env_files() {
    let _ = dotenvy::dotenv();
    load_env_file(&loginbridge_env_path());
}

fn load_env_file(path: &Path) {
    if path.exists()
        && let Err(e) = dotenvy::from_path(path)
    {
        eprintln!("Warning: failed to load {}: {}", path.display(), e);
    }
}
