// An in-memory CBC padding oracle for tests.
//
// The block cipher is a toy keyed permutation (rotate, XOR, add), which is
// all the attack needs: it never looks inside the cipher, only at whether the
// decrypted padding is valid. Works for any block size.
use crate::{pkcs7_pad, pkcs7_padding_len, OracleResult, Transport, TransportError};

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use rand::{rngs::StdRng, RngCore, SeedableRng};

pub struct SimulatedTarget {
    block_size: usize,
    xor_key: Vec<u8>,
    add_key: Vec<u8>,
    calls: AtomicUsize,
    transient_failures: AtomicUsize,
    delay: Option<Duration>,
    deaf_padding_len: Option<u8>,
    failing_payloads: Vec<Vec<u8>>,
}

impl SimulatedTarget {
    pub fn new(block_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut xor_key = vec![0u8; block_size];
        let mut add_key = vec![0u8; block_size];
        rng.fill_bytes(&mut xor_key);
        rng.fill_bytes(&mut add_key);
        Self {
            block_size,
            xor_key,
            add_key,
            calls: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            delay: None,
            deaf_padding_len: None,
            failing_payloads: Vec::new(),
        }
    }

    /// Fail the next `n` calls with a transport error.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report padding of exactly this length as invalid.
    pub fn with_deaf_padding_len(mut self, len: u8) -> Self {
        self.deaf_padding_len = Some(len);
        self
    }

    /// Fail every call carrying exactly this payload.
    pub fn with_failing_payload(mut self, payload: Vec<u8>) -> Self {
        self.failing_payloads.push(payload);
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Encrypt with PKCS#7 padding, returning `iv || ciphertext`.
    pub fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let padded = pkcs7_pad(plaintext, self.block_size as u8);
        let mut out = iv.to_vec();
        let mut previous = iv.to_vec();
        for block in padded.chunks(self.block_size) {
            let mixed: Vec<u8> = block.iter().zip(&previous).map(|(p, c)| p ^ c).collect();
            previous = self.encrypt_block(&mixed);
            out.extend_from_slice(&previous);
        }
        out
    }

    /// Decrypt `iv || ciphertext` without touching the padding.
    pub fn decrypt_raw(&self, ciphertext: &[u8]) -> Vec<u8> {
        ciphertext
            .chunks(self.block_size)
            .collect::<Vec<_>>()
            .windows(2)
            .flat_map(|pair| {
                self.decrypt_block(pair[1])
                    .into_iter()
                    .zip(pair[0])
                    .map(|(d, c)| d ^ c)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn encrypt_block(&self, block: &[u8]) -> Vec<u8> {
        let n = self.block_size;
        (0..n)
            .map(|i| (block[(i + 1) % n] ^ self.xor_key[i]).wrapping_add(self.add_key[i]))
            .collect()
    }

    fn decrypt_block(&self, block: &[u8]) -> Vec<u8> {
        let n = self.block_size;
        let mut out = vec![0u8; n];
        for i in 0..n {
            out[(i + 1) % n] = block[i].wrapping_sub(self.add_key[i]) ^ self.xor_key[i];
        }
        out
    }

    fn padding_valid(&self, payload: &[u8]) -> bool {
        if payload.len() < 2 * self.block_size || payload.len() % self.block_size != 0 {
            return false;
        }
        match pkcs7_padding_len(&self.decrypt_raw(payload)) {
            Some(len) if len as usize <= self.block_size => self.deaf_padding_len != Some(len),
            _ => false,
        }
    }
}

impl Transport for SimulatedTarget {
    async fn send(&self, payload: &[u8]) -> Result<OracleResult, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || self.failing_payloads.iter().any(|p| p == payload) {
            return Err(TransportError::Unavailable("connection refused".to_string()));
        }

        let (status, body) = if self.padding_valid(payload) {
            (200, "OK")
        } else {
            (500, "Invalid padding")
        };
        Ok(OracleResult {
            url: format!("sim://target/{}", hex::encode(payload)),
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.to_string(),
            elapsed: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pkcs7_unpad;

    #[test]
    fn toy_cipher_round_trips() {
        let target = SimulatedTarget::new(16, 3);
        let iv = [9u8; 16];

        let ciphertext = target.encrypt(&iv, b"attack at dawn, bring snacks");
        let mut plaintext = target.decrypt_raw(&ciphertext);
        pkcs7_unpad(&mut plaintext).unwrap();

        assert_eq!(plaintext, b"attack at dawn, bring snacks");
    }

    #[tokio::test]
    async fn genuine_ciphertext_has_valid_padding() {
        let target = SimulatedTarget::new(8, 3);
        let ciphertext = target.encrypt(&[0u8; 8], b"hello");

        let result = target.send(&ciphertext).await.unwrap();

        assert_eq!(result.status, 200);
    }

    #[tokio::test]
    async fn tampered_ciphertext_has_invalid_padding() {
        let target = SimulatedTarget::new(8, 3);
        let mut ciphertext = target.encrypt(&[0u8; 8], b"hello");
        ciphertext[7] ^= 0x10;

        let result = target.send(&ciphertext).await.unwrap();

        assert_eq!(result.status, 500);
    }
}
