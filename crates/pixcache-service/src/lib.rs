#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod decode;
pub mod executor;
pub mod fetch;
pub mod image;
pub mod loader;
pub mod logging;
pub mod types;
