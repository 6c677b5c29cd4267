// Library crate for the binary and the integration tests.

pub mod cache;
pub mod chart;
pub mod config;
pub mod error;
pub mod routes;
pub mod runner;
pub mod server;
pub mod state;
pub mod store;
pub mod suite_config;
pub mod wpt;
