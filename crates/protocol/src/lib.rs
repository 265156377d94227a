#![forbid(unsafe_code)]

mod args;
mod frame;
mod message;

pub use args::Args;
pub use frame::Frame;
pub use message::{Request, Response, Status};
