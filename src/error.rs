use std::collections::TryReserveError;

use thiserror::Error;

use crate::mac::MacAddress;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or out-of-range input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// The radio rejected an operation or reported an unexpected state
    #[error("Radio driver failure: {0}")]
    DriverFailure(String),

    #[error("Insufficient buffer: {needed} bytes needed, {available} available")]
    InsufficientBuffer { needed: usize, available: usize },

    #[error("A deauthentication session against {0} is already running")]
    SessionActive(MacAddress),

    #[error("No deauthentication session is running")]
    NoActiveSession,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn driver<S: Into<String>>(msg: S) -> Self {
        Error::DriverFailure(msg.into())
    }
}

impl From<TryReserveError> for Error {
    fn from(e: TryReserveError) -> Self {
        Error::AllocationFailure(e.to_string())
    }
}
