pub mod batch;
pub mod config;
pub mod drci;
pub mod error;
pub mod flaky;
pub mod platform;
pub mod server;
pub mod shutdown;
pub mod trigger;
pub mod warehouse;
