pub mod api;
pub mod config;
pub mod error;
pub mod monitor;
pub mod proctor;
pub mod store;
