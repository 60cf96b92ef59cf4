//! Binary codec for the inputs exchanged with the session transport.
//!
//! The transport treats player input as opaque bytes: each local input is
//! submitted as [`INPUT_SIZE`] bytes, and every advance hands back one block of
//! `num_players * INPUT_SIZE` bytes. This module owns the bincode
//! configuration so every peer produces identical bytes for identical input.
//!
//! # Examples
//!
//! ```
//! use netplay_rollback::codec::{decode_input_block, encode_input_block};
//! use netplay_rollback::{Buttons, SnesButton};
//!
//! let inputs = [Buttons::EMPTY.with(SnesButton::A), Buttons::EMPTY];
//! let bytes = encode_input_block(&inputs).expect("encoding should succeed");
//! assert_eq!(bytes.len(), 4);
//!
//! let decoded = decode_input_block(&bytes, 2).expect("decoding should succeed");
//! assert_eq!(decoded.as_slice(), &inputs);
//! ```

use smallvec::SmallVec;
use std::fmt;

use crate::buttons::{Buttons, MULTITAP_CAPACITY};

/// Size in bytes of one encoded [`Buttons`] value.
pub const INPUT_SIZE: usize = std::mem::size_of::<u16>();

// Fixed-size integers keep every input exactly INPUT_SIZE bytes, which is what
// the transport sizes its input queues by.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Represents what operation was being performed when a codec error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecOperation {
    /// Encoding a single local input.
    EncodeInput,
    /// Decoding a transport input block.
    DecodeInputBlock,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeInput => write!(f, "encoding local input"),
            Self::DecodeInputBlock => write!(f, "decoding input block"),
        }
    }
}

/// Errors that can occur during encoding or decoding.
///
/// Bincode errors are opaque, so their message is kept as a `String`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoding operation failed.
    EncodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// The decoding operation failed.
    DecodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// An input block did not hold one input per player.
    BlockSizeMismatch {
        /// Bytes expected for the declared player count.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },
}

impl CodecError {
    /// Creates a new encode error with the given message and operation.
    pub fn encode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::EncodeError {
            message: message.into(),
            operation,
        }
    }

    /// Creates a new decode error with the given message and operation.
    pub fn decode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::DecodeError {
            message: message.into(),
            operation,
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeError { message, operation } => {
                write!(f, "encoding failed while {operation}: {message}")
            },
            Self::DecodeError { message, operation } => {
                write!(f, "decoding failed while {operation}: {message}")
            },
            Self::BlockSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "input block holds {actual} bytes, expected {expected}"
                )
            },
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes one local input as submitted to the transport.
pub fn encode_buttons(input: Buttons) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(input, config())
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::EncodeInput))
}

/// Encodes the inputs of every player into one contiguous block.
pub fn encode_input_block(inputs: &[Buttons]) -> CodecResult<Vec<u8>> {
    let mut block = Vec::with_capacity(inputs.len() * INPUT_SIZE);
    for input in inputs {
        bincode::serde::encode_into_std_write(input, &mut block, config())
            .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::EncodeInput))?;
    }
    Ok(block)
}

/// Decodes an advance block holding exactly `players` inputs.
pub fn decode_input_block(
    bytes: &[u8],
    players: usize,
) -> CodecResult<SmallVec<[Buttons; MULTITAP_CAPACITY]>> {
    let expected = players * INPUT_SIZE;
    if bytes.len() != expected {
        return Err(CodecError::BlockSizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    bytes
        .chunks_exact(INPUT_SIZE)
        .map(|chunk| {
            bincode::serde::decode_from_slice::<Buttons, _>(chunk, config())
                .map(|(input, _)| Buttons::from_bits(input.bits()))
                .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::DecodeInputBlock))
        })
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::buttons::SnesButton;

    #[test]
    fn encoded_input_is_input_size_bytes() {
        let bytes = encode_buttons(Buttons::EMPTY.with(SnesButton::R)).unwrap();
        assert_eq!(bytes.len(), INPUT_SIZE);
        assert_eq!(bytes, (1u16 << 11).to_le_bytes().to_vec());
    }

    #[test]
    fn block_decodes_in_player_order() {
        let inputs = [
            Buttons::EMPTY.with(SnesButton::Up),
            Buttons::EMPTY,
            Buttons::EMPTY.with(SnesButton::Start).with(SnesButton::B),
        ];
        let bytes = encode_input_block(&inputs).unwrap();
        let decoded = decode_input_block(&bytes, 3).unwrap();
        assert_eq!(decoded.as_slice(), &inputs);
    }

    #[test]
    fn block_size_mismatch_is_reported() {
        let err = decode_input_block(&[0, 0, 0], 2).unwrap_err();
        assert_eq!(
            err,
            CodecError::BlockSizeMismatch {
                expected: 4,
                actual: 3
            }
        );
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn empty_block_for_zero_players() {
        assert!(decode_input_block(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn high_bits_from_the_wire_are_dropped() {
        let decoded = decode_input_block(&0xF001u16.to_le_bytes(), 1).unwrap();
        assert_eq!(decoded[0], Buttons::from_bits(1));
    }

    #[test]
    fn codec_error_display() {
        let err = CodecError::encode("test error", CodecOperation::EncodeInput);
        assert!(err.to_string().contains("encoding failed"));
        assert!(err.to_string().contains("local input"));
        let err = CodecError::decode("test error", CodecOperation::DecodeInputBlock);
        assert!(err.to_string().contains("input block"));
    }
}
