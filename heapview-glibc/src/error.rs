/*!
Specialized `Error` and `Result` types for the glibc layer.
*/

use std::{convert, error, fmt, result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    /// Generic error type containing a string
    Other(&'static str),
    /// Session construction failed.
    Initialization(&'static str),
    /// heapview core error.
    ///
    /// Catch-all for engine related errors.
    Core(heapview::error::Error),
}

/// Convert from &str to error
impl convert::From<&'static str> for Error {
    fn from(error: &'static str) -> Self {
        Error::Other(error)
    }
}

/// Convert from heapview::error::Error
impl From<heapview::error::Error> for Error {
    fn from(error: heapview::error::Error) -> Self {
        Error::Core(error)
    }
}

impl Error {
    /// Returns a tuple representing the error description and its string value.
    pub fn to_str_pair(self) -> (&'static str, Option<&'static str>) {
        match self {
            Error::Other(e) => ("other error", Some(e)),
            Error::Initialization(e) => ("error during initialization", Some(e)),
            Error::Core(e) => e.to_str_pair(),
        }
    }

    /// Returns a simple string representation of the error.
    pub fn to_str(self) -> &'static str {
        self.to_str_pair().0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (desc, value) = self.to_str_pair();
        if let Some(value) = value {
            write!(f, "{}: {}", desc, value)
        } else {
            f.write_str(desc)
        }
    }
}

impl error::Error for Error {}

/// Specialized `Result` type for glibc layer results.
pub type Result<T> = result::Result<T, Error>;
