//! Incremental parser for firmware update packages.
//!
//! An update package is a flat byte stream: a self-describing header
//! followed by the concatenated bytes of one or more component images. A
//! caller feeds the package incrementally, in whatever chunk sizes it has
//! on hand, to [`PackageParser::process_bytes`]. Once the header has been
//! decoded, the parser slices out each component image's exact byte range
//! and forwards it, in package order, to whichever consumer registered a
//! matching set of [`Descriptor`]s via
//! [`PackageParser::register_component_route`].
//!
//! The parser does not buffer the whole package: only the header is
//! accumulated into scratch storage, and only until its size is known and
//! reached. Image bytes are forwarded straight out of the caller's chunk.

pub mod cursor;
pub mod descriptor;
pub mod parser;

pub use descriptor::Descriptor;
pub use parser::{CallbackStatus, PackageParser, ParseState, ProtocolVersion};

use std::error::Error as StdError;
use std::fmt;

/// Fatal error kinds. Every variant ends the current parse: the parser
/// instance is considered poisoned once one of these has been returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// [`PackageParser::new`] was called with a version other than 1.0.0.
    UnsupportedVersion,
    /// The first 16 header bytes did not match the package magic UUID.
    InvalidMagic,
    /// A read requested more bytes than the cursor held.
    Truncated,
    /// A descriptor's `type` field matched none of the known variants.
    UnknownDescriptorType(u16),
    /// A device record's declared `record_length` did not match the bytes
    /// actually consumed, the header left stray trailing bytes, or
    /// `component_bitmap_length` was not a multiple of 8.
    MalformedRecord,
    /// No image in the package was claimed by any registered consumer.
    NoMatchingConsumer,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedVersion => write!(f, "unsupported protocol version"),
            Error::InvalidMagic => write!(f, "package magic UUID mismatch"),
            Error::Truncated => write!(f, "truncated input"),
            Error::UnknownDescriptorType(tag) => {
                write!(f, "unknown descriptor type 0x{:04x}", tag)
            }
            Error::MalformedRecord => write!(f, "malformed header record"),
            Error::NoMatchingConsumer => {
                write!(f, "no registered consumer matched any component image")
            }
        }
    }
}

impl StdError for Error {}

pub type Result<T> = std::result::Result<T, Error>;
