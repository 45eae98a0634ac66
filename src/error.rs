use std::fmt::Display;

/// CinderDB errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The key has no live record in the database.
    NotFound,
    /// The latest record for the key is a tombstone.
    Deleted,
    /// Another instance holds the database lock.
    AlreadyInUse,
    /// Invalid data in a context where skipping is not safe, typically a
    /// record or table footer that failed to decode.
    Corruption(String),
    /// Invalid user input, typically an empty key or an operation the chosen
    /// engine does not support.
    InvalidInput(String),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "key not found"),
            Error::Deleted => write!(f, "key deleted"),
            Error::AlreadyInUse => write!(f, "database is locked by another instance"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// A CinderDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corruption(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
