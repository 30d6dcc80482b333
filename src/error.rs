use std::fmt;

use crate::hex::MalformedPayload;
use crate::protocol::Command;

/// A payload that could not be decoded for a specific command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub command: Command,
    pub offset: usize,
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(command: Command, offset: usize, reason: impl Into<String>) -> Self {
        Self {
            command,
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn from_malformed(command: Command, err: MalformedPayload) -> Self {
        Self {
            command,
            offset: err.offset,
            reason: err.reason,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot parse {} payload at byte {}: {}",
            self.command, self.offset, self.reason
        )
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Status { command: Command, status: u16 },
    Timeout,
    Parse(ParseError),
    InvalidArgument(String),
    ModeUnresolved(Box<Error>),
    Io(std::io::Error),
}

impl Error {
    /// Network failures worth one more attempt: refused, reset or closed
    /// connections and timeouts. Anything that produced an HTTP status or a
    /// payload is final.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || ((e.is_request() || e.is_body()) && e.status().is_none())
            }
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Status { command, status } => {
                write!(f, "device rejected {command} with HTTP {status}")
            }
            Error::Timeout => write!(f, "refresh timed out"),
            Error::Parse(e) => write!(f, "{e}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::ModeUnresolved(e) => write!(f, "operation mode unresolved: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Parse(e) => Some(e),
            Error::ModeUnresolved(e) => Some(e.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
