// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod binding;
pub mod coalescing;
pub mod downloads;
pub mod overflow;
pub mod scopes;
pub mod utils;

pub use utils::*;
