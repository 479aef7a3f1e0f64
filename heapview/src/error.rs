/*!
Specialized `Error` and `Result` types for heapview.
*/

use std::{convert, error, fmt, result};

/// Specialized `Error` type for heapview errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    /// Generic error type containing a string
    Other(&'static str),
    /// Out of bounds.
    ///
    /// Catch-all for bounds check errors.
    Bounds,
    /// Not mapped.
    ///
    /// A read touched an address outside any mapped range of the image.
    /// Callers scanning for references treat this as "the word is not a
    /// reference".
    NotMapped,
    /// Range overlap.
    ///
    /// An exclusive range claim intersected an existing claim. The later
    /// claim is rejected and analysis continues.
    RangeOverlap,
    /// Bad allocator state.
    ///
    /// The allocator metadata of one arena is internally inconsistent. The
    /// offending arena is skipped and analysis continues with the rest.
    BadAllocatorState(&'static str),
    /// IO error
    ///
    /// Catch-all for io related errors.
    IO(&'static str),
}

/// Convert from &str to error
impl convert::From<&'static str> for Error {
    fn from(error: &'static str) -> Self {
        Error::Other(error)
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for Error {
    fn from(_err: std::io::Error) -> Self {
        Error::IO("io error")
    }
}

impl Error {
    /// Returns a tuple representing the error description and its string value.
    pub fn to_str_pair(self) -> (&'static str, Option<&'static str>) {
        match self {
            Error::Other(e) => ("other error", Some(e)),
            Error::Bounds => ("out of bounds", None),
            Error::NotMapped => ("address is not mapped", None),
            Error::RangeOverlap => ("range claim overlaps an existing claim", None),
            Error::BadAllocatorState(e) => ("inconsistent allocator state", Some(e)),
            Error::IO(e) => ("io error", Some(e)),
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

/// Specialized `Result` type for heapview results.
pub type Result<T> = result::Result<T, Error>;
