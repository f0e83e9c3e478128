//! Connection server and protocol dispatch

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use dispatcher::ProtocolDispatcher;
pub use handler::{BoxFuture, StreamHandler};
pub use listener::Server;
