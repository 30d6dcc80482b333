mod aggregate;
mod client;
mod config;
mod diff;
mod error;
pub mod hex;
mod logger;
mod parse;
mod protocol;
mod transport;
mod types;

pub use client::{AerecoClient, AerecoClientBuilder};
pub use config::ConnectionConfig;
pub use error::{Error, ParseError, Result};
pub use logger::MessageLogMode;
pub use protocol::Command;
pub use types::*;
