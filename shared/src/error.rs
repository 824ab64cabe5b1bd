#![allow(dead_code)]

use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // Wire codec errors.
    #[error("insufficient data for base length type")]
    ErrBaseLen,
    #[error("insufficient data for calculated length type")]
    ErrCalcLen,
    #[error("segment prefix is reserved")]
    ErrReserved,
    #[error("invalid compression pointer")]
    ErrInvalidPtr,
    #[error("zero length segment")]
    ErrZeroSegLen,
    #[error("segment length too long")]
    ErrSegTooLong,
    #[error("name too long")]
    ErrNameTooLong,
    #[error("name is not in canonical format (it must end with a .)")]
    ErrNonCanonicalName,
    #[error("character string exceeds maximum length (255)")]
    ErrStringTooLong,
    #[error("insufficient data for resource body length")]
    ErrResourceLen,
    #[error("resource length too long")]
    ErrResTooLong,
    #[error("no resource body")]
    ErrNilResourceBody,
    #[error("too many Questions to pack (>65535)")]
    ErrTooManyQuestions,
    #[error("too many Answers to pack (>65535)")]
    ErrTooManyAnswers,
    #[error("too many Authorities to pack (>65535)")]
    ErrTooManyAuthorities,
    #[error("too many Additionals to pack (>65535)")]
    ErrTooManyAdditionals,
    #[error("parsing/packing of this section has completed")]
    ErrSectionDone,
    #[error("parsing of this section isn't available yet")]
    ErrNotStarted,
    #[error("malformed message at offset {offset}: {reason}")]
    MalformedMessage { offset: usize, reason: &'static str },
    #[error("continuation datagrams may only extend a truncated query")]
    ErrNotTruncatedQuery,

    // Engine errors.
    #[error("connection closed")]
    ErrConnectionClosed,
    #[error("descriptor is in the canceled state")]
    ErrServiceCanceled,
    #[error("no such service")]
    ErrServiceNotFound,
    #[error("host name must not be empty")]
    ErrHostnameEmpty,

    #[error("utf8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
