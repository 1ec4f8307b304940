pub mod config;
pub mod error;
pub mod http;
pub mod render;
pub mod screen;
pub mod server;
pub mod session;
pub mod version;
