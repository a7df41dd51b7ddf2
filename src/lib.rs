pub mod config;
pub mod constants;
pub mod economy;
pub mod error;
pub mod history_store;
pub mod maze;
pub mod movement;
pub mod rng;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod types;
