#[macro_use]
extern crate tracing;

pub mod channel;
pub mod cli;
pub mod clock;
pub mod connection;
pub mod debug;
pub mod error;
pub mod frame;
pub mod handler;
mod message;
mod operation;
pub mod options;
pub mod protocol;
mod registry;
pub mod rng;

pub use channel::Channel;
pub use connection::{CallOptions, IncomingRequest, IncomingResponse, ResponseBuilder};
pub use error::{Error, Result};
pub use handler::{EndpointRouter, NoHandler, RequestHandler};
pub use options::Options;
