//! Pluggable wire codecs.
//!
//! The engine never looks inside a message. Bytes read from the socket are
//! appended to a per-connection buffer and handed to [`Codec::decode`]
//! until it reports that no complete message remains; outbound messages go
//! through [`Codec::encode`]. Framing, if the protocol needs any, lives
//! entirely in the codec.
//!
//! # Decoding Contract
//!
//! ```text
//! read ──► src: [ complete | complete | partial ]
//!                    │          │          │
//!              Ok(Some(m))  Ok(Some(m))  Ok(None) ── kept for the next read
//! ```
//!
//! A decoder that returns `Ok(Some(_))` must consume bytes from `src`.
//!
//! # Stock Codecs
//!
//! | Codec | Message | Notes |
//! |-------|---------|-------|
//! | [`BytesCodec`] | [`Bytes`] | Identity; all buffered bytes become one message |
//! | [`Utf8Codec`] | [`String`] | Rejects invalid UTF-8, holds back a split character |

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, Bytes, BytesMut};

use crate::error::BoxError;

// ============================================================================
// Codec
// ============================================================================

/// Converts between messages and wire bytes.
///
/// Both directions are fatal to the connection on failure.
pub trait Codec: Send + Sync + 'static {
    /// Message type produced by `decode` and consumed by `encode`.
    type Message: Send + 'static;

    /// Decodes the next message from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete message. Unconsumed
    /// bytes are presented again once more data has been read.
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Self::Message>, BoxError>;

    /// Encodes a message into a frame ready for the socket.
    fn encode(&self, message: &Self::Message) -> Result<Bytes, BoxError>;
}

// ============================================================================
// BytesCodec
// ============================================================================

/// Identity codec: messages are raw byte chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Message = Bytes;

    #[inline]
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Bytes>, BoxError> {
        if src.is_empty() {
            return Ok(None);
        }

        // Copy out so the pooled buffer keeps its whole allocation.
        let chunk = Bytes::copy_from_slice(&src[..]);
        src.clear();
        Ok(Some(chunk))
    }

    #[inline]
    fn encode(&self, message: &Bytes) -> Result<Bytes, BoxError> {
        Ok(message.clone())
    }
}

// ============================================================================
// Utf8Codec
// ============================================================================

/// Text codec: messages are UTF-8 strings.
///
/// A multi-byte character split across reads is held back until its
/// remaining bytes arrive. Bytes that can never form valid UTF-8 fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    type Message = String;

    fn decode(&self, src: &mut BytesMut) -> Result<Option<String>, BoxError> {
        let complete = match std::str::from_utf8(&src[..]) {
            Ok(text) => text.len(),
            // Truncated trailing sequence.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(e.into()),
        };

        if complete == 0 {
            return Ok(None);
        }

        let text = std::str::from_utf8(&src[..complete])?.to_owned();
        src.advance(complete);
        Ok(Some(text))
    }

    fn encode(&self, message: &String) -> Result<Bytes, BoxError> {
        Ok(Bytes::copy_from_slice(message.as_bytes()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_bytes_codec_is_identity() {
        let codec = BytesCodec;
        let mut src = BytesMut::from(&b"ping"[..]);

        let message = codec.decode(&mut src).expect("decode").expect("message");
        assert_eq!(&message[..], b"ping");
        assert!(src.is_empty());
        assert_eq!(codec.encode(&message).expect("encode"), message);
    }

    #[test]
    fn test_bytes_codec_empty_is_none() {
        let mut src = BytesMut::new();
        assert!(BytesCodec.decode(&mut src).expect("decode").is_none());
    }

    #[test]
    fn test_utf8_codec_rejects_invalid_bytes() {
        let mut src = BytesMut::from(&[0xff, 0xfe, 0xfd][..]);
        let err = Utf8Codec.decode(&mut src).unwrap_err();
        assert!(err.to_string().contains("utf-8"));
    }

    #[test]
    fn test_utf8_codec_accepts_text() {
        let mut src = BytesMut::from("héllo".as_bytes());
        let text = Utf8Codec.decode(&mut src).expect("decode");
        assert_eq!(text.as_deref(), Some("héllo"));
        assert!(src.is_empty());
    }

    #[test]
    fn test_utf8_codec_waits_for_split_character() {
        let codec = Utf8Codec;
        let mut src = BytesMut::from(&[0xC3][..]);

        assert!(codec.decode(&mut src).expect("decode").is_none());
        assert_eq!(&src[..], &[0xC3]);

        src.extend_from_slice(&[0xA9]);
        let text = codec.decode(&mut src).expect("decode");
        assert_eq!(text.as_deref(), Some("é"));
        assert!(src.is_empty());
    }

    #[test]
    fn test_utf8_codec_emits_complete_prefix() {
        let codec = Utf8Codec;
        let mut src = BytesMut::from(&b"ab\xE2\x82"[..]);

        let text = codec.decode(&mut src).expect("decode");
        assert_eq!(text.as_deref(), Some("ab"));
        assert_eq!(&src[..], b"\xE2\x82");
        assert!(codec.decode(&mut src).expect("decode").is_none());

        src.extend_from_slice(b"\xAC");
        assert_eq!(codec.decode(&mut src).expect("decode").as_deref(), Some("€"));
    }

    proptest! {
        #[test]
        fn prop_bytes_roundtrip(data in proptest::collection::vec(any::<u8>(), 1..512)) {
            let codec = BytesCodec;
            let message = Bytes::from(data);
            let wire = codec.encode(&message).unwrap();
            let mut src = BytesMut::from(&wire[..]);
            prop_assert_eq!(codec.decode(&mut src).unwrap(), Some(message));
        }

        #[test]
        fn prop_utf8_any_split_reassembles(text in "\\PC{1,64}", cut in any::<prop::sample::Index>()) {
            let codec = Utf8Codec;
            let wire = codec.encode(&text).unwrap();
            let cut = cut.index(wire.len() + 1);

            let mut src = BytesMut::new();
            let mut decoded = String::new();
            for part in [&wire[..cut], &wire[cut..]] {
                src.extend_from_slice(part);
                while let Some(chunk) = codec.decode(&mut src).unwrap() {
                    decoded.push_str(&chunk);
                }
            }

            prop_assert!(src.is_empty());
            prop_assert_eq!(decoded, text);
        }
    }
}
