//! Pixcache.
//!
//! Drives the image loader headlessly: loads images into console slots through the in-memory
//! cache, prefetches originals into the download directory, and inspects what has been
//! downloaded.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;
mod slot;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
