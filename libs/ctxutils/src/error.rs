//! Parser error classification
//!
//! Parsers report failures as [`std::io::Error`]s so that I/O errors from the
//! underlying source bubble up untouched. Format violations carry a
//! [`ParseError`] which can be recovered with [`classify`].
use std::fmt;
use std::io;

/// The class of a parsing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The input ended before a fixed-layout structure was complete
    Truncated,
    /// A field holds a value the format forbids
    Invalid,
    /// A type tag is not known (or not allowed in its context)
    UnknownType,
    /// An offset, index or count points outside its container
    OutOfRange,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Truncated => "truncated",
            Self::Invalid => "invalid",
            Self::UnknownType => "unknown type",
            Self::OutOfRange => "out of range",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
/// Error produced by a parser on malformed input
pub struct ParseError {
    kind: ParseErrorKind,
    message: String,
}

impl ParseError {
    /// Creates a new error
    pub fn new<S: Into<String>>(kind: ParseErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the error class
    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }

    /// Creates a new [`io::Error`] wrapping a `ParseError`
    ///
    /// Truncation maps to [`io::ErrorKind::UnexpectedEof`], everything
    /// else to [`io::ErrorKind::InvalidData`]
    pub fn new_io_error<S: Into<String>>(kind: ParseErrorKind, message: S) -> io::Error {
        let iokind = match kind {
            ParseErrorKind::Truncated => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(iokind, Self::new(kind, message))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Shorthand for a [`ParseErrorKind::Truncated`] io error
pub fn truncated<S: Into<String>>(message: S) -> io::Error {
    ParseError::new_io_error(ParseErrorKind::Truncated, message)
}

/// Shorthand for a [`ParseErrorKind::Invalid`] io error
pub fn invalid<S: Into<String>>(message: S) -> io::Error {
    ParseError::new_io_error(ParseErrorKind::Invalid, message)
}

/// Shorthand for a [`ParseErrorKind::UnknownType`] io error
pub fn unknown_type<S: Into<String>>(message: S) -> io::Error {
    ParseError::new_io_error(ParseErrorKind::UnknownType, message)
}

/// Shorthand for a [`ParseErrorKind::OutOfRange`] io error
pub fn out_of_range<S: Into<String>>(message: S) -> io::Error {
    ParseError::new_io_error(ParseErrorKind::OutOfRange, message)
}

/// Determines the parse error class of an [`io::Error`]
///
/// Errors raised by the parsers map to their own kind; short reads map to
/// [`ParseErrorKind::Truncated`], bare invalid data to [`ParseErrorKind::Invalid`]
/// and rejected seeks to [`ParseErrorKind::OutOfRange`]. Other I/O errors
/// are not parse errors and yield `None`.
pub fn classify(err: &io::Error) -> Option<ParseErrorKind> {
    if let Some(pe) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ParseError>())
    {
        return Some(pe.kind());
    }
    match err.kind() {
        io::ErrorKind::UnexpectedEof => Some(ParseErrorKind::Truncated),
        io::ErrorKind::InvalidData => Some(ParseErrorKind::Invalid),
        io::ErrorKind::InvalidInput => Some(ParseErrorKind::OutOfRange),
        _ => None,
    }
}
