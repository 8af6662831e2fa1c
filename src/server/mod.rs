pub mod builder;
pub mod handler;
pub mod listener;

pub use builder::{ServerBuilder, WithSourceHost};
pub use handler::RequestHandler;