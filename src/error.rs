use crate::{EncodingError, PredicateError};

use std::time::Duration;

use thiserror::Error;

/// Failure of a whole attack run.
///
/// Every variant that comes out of an engine names the block and byte
/// position it stopped at, so the operator can go back and check the
/// predicate against that exact probe.
#[derive(Debug, Error)]
pub enum Error {
    #[error("block size must be between 2 and 255 bytes, got {0}")]
    InvalidBlockSize(usize),
    #[error("input length {len} is not a multiple of the block size {block_size}")]
    UnalignedInput { len: usize, block_size: usize },
    #[error("ciphertext needs at least two blocks (IV and one block), got {0}")]
    TooFewBlocks(usize),
    #[error("{known} already-found bytes exceed the {total}-byte plaintext")]
    KnownPlaintextTooLong { known: usize, total: usize },
    #[error("invalid header {0:?}, expected `Name: value`")]
    InvalidHeader(String),
    #[error(
        "no guess gave valid padding for block {block}, byte {position}; \
         check the predicate against this target"
    )]
    OracleExhausted { block: usize, position: usize },
    #[error("oracle call failed for block {block}, byte {position}, guess {guess:#04x}: {source}")]
    Transport {
        block: usize,
        position: usize,
        guess: u8,
        #[source]
        source: TransportError,
    },
    #[error("survey probe {byte} failed: {source}")]
    Survey {
        byte: u8,
        #[source]
        source: TransportError,
    },
    #[error("oracle call failed: {0}")]
    Oracle(#[from] TransportError),
    #[error(transparent)]
    Predicate(#[from] PredicateError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of a single oracle call, after retries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("target unavailable: {0}")]
    Unavailable(String),
}
