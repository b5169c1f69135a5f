//! Shard Wire Protocol
//!
//! RESP-style framing spoken between the client and storage endpoints.
//!
//! # Frames
//!
//! ```text
//! request   *<n>\r\n  followed by n bulk strings (SET adds a payload bulk)
//! bulk      $<len>\r\n<bytes>\r\n
//! error     -<message>\r\n
//! ```
//!
//! # Exchanges
//!
//! | Request   | Array fields                                                      | Trailer |
//! |-----------|-------------------------------------------------------------------|---------|
//! | SET chunk | tag, key, reqId, size, index, data, parity, endpointId, ringSize  | payload |
//! | GET chunk | tag, key, reqId, index                                            |         |
//!
//! The SET payload bulk follows the array and is not counted in its header.
//!
//! A response is three bulks (`reqId`, `chunkId`, value) or a single error.
//! A `chunkId` of [`ABANDONED_CHUNK_ID`] closes the response without a value.

pub mod reader;
pub mod writer;

use std::io;

use crate::error::Error;

pub use reader::RespReader;
pub use writer::RespWriter;

/// Command tag for storing one shard
pub const CMD_SET_CHUNK: &str = "set chunk";

/// Command tag for fetching one shard
pub const CMD_GET_CHUNK: &str = "get chunk";

/// Sentinel chunk id of a response the endpoint no longer tracks
pub const ABANDONED_CHUNK_ID: &str = "-1";

/// Default upper bound on a single bulk payload (512 MiB)
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest configurable bulk limit (4 GiB - 1)
pub const MAX_BULK_LEN: usize = u32::MAX as usize;

/// Number of array elements in a SET chunk request, payload excluded
pub const SET_CHUNK_FIELDS: usize = 9;

/// Number of array elements in a GET chunk request
pub const GET_CHUNK_FIELDS: usize = 4;

/// Wire type marker of the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespType {
    SimpleString,
    Error,
    Integer,
    Bulk,
    Array,
}

impl RespType {
    /// Decode a leading type byte
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'+' => Some(RespType::SimpleString),
            b'-' => Some(RespType::Error),
            b':' => Some(RespType::Integer),
            b'$' => Some(RespType::Bulk),
            b'*' => Some(RespType::Array),
            _ => None,
        }
    }

    /// Leading type byte
    pub fn marker(self) -> u8 {
        match self {
            RespType::SimpleString => b'+',
            RespType::Error => b'-',
            RespType::Integer => b':',
            RespType::Bulk => b'$',
            RespType::Array => b'*',
        }
    }
}

/// Stream end in the middle of a frame is a closed connection.
pub(crate) fn map_io(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_roundtrip() {
        for ty in [
            RespType::SimpleString,
            RespType::Error,
            RespType::Integer,
            RespType::Bulk,
            RespType::Array,
        ] {
            assert_eq!(RespType::from_marker(ty.marker()), Some(ty));
        }
        assert_eq!(RespType::from_marker(b'x'), None);
    }

    #[test]
    fn test_eof_maps_to_closed() {
        let err = map_io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, Error::ConnectionClosed));

        let err = map_io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, Error::Io(_)));
    }
}
