pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use config::PatcherConfig;
pub use errors::{PatcherError, Result};
