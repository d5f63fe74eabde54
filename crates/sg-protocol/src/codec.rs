//! Tokio codec that turns raw shell output into UTF-8 text chunks
//!
//! Backend output arrives as arbitrary byte chunks, and a multi-byte
//! character can straddle two of them. Relay `data` events carry strings, so
//! the chunker holds back an incomplete trailing sequence until the rest of
//! it arrives. Invalid sequences are replaced with U+FFFD.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::error::ProtocolError;

/// Longest possible incomplete UTF-8 tail (a 4-byte sequence missing one byte)
const MAX_PENDING_TAIL: usize = 3;

/// Decoder splitting a byte stream on UTF-8 character boundaries
#[derive(Debug, Default)]
pub struct Utf8Chunker;

impl Utf8Chunker {
    /// Create a new chunker
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Utf8Chunker {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let take = match std::str::from_utf8(&src[..]) {
            Ok(_) => src.len(),
            Err(e) => match e.error_len() {
                // Invalid bytes: emit them (replaced) together with the valid prefix
                Some(invalid) => e.valid_up_to() + invalid,
                // Incomplete tail: emit the valid prefix, keep the tail
                None if src.len() - e.valid_up_to() <= MAX_PENDING_TAIL => e.valid_up_to(),
                None => src.len(),
            },
        };

        if take == 0 {
            return Ok(None);
        }

        let chunk = src.split_to(take);
        Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}
