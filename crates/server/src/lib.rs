#![forbid(unsafe_code)]

mod connection;
pub mod handler;
pub mod http;

pub use connection::Connection;
pub use handler::{Dispatcher, handle_connection};
