//! `CRYPTO`: a RFC 7539 ChaCha20 stream cipher used for the optional
//! `AUTH XCRYPT` channel-encryption extension.
//!
//! This is a from-scratch stream transform, not a wrapper around an AEAD
//! crate: the wire contract is a bare keystream XOR (no Poly1305 tag, no
//! associated data), keyed by a KDF over a compiled-in-by-the-operator PSK
//! and a per-session nonce, which doesn't match any off-the-shelf
//! `ChaCha20Poly1305` API. Grounded in spec.md §4.5.

use zeroize::Zeroize;

const CONSTANTS: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// A ChaCha20 keystream generator with in-place XOR.
///
/// Per spec.md §4.5: sixteen 32-bit words (4 constants | 8 key words | 1
/// block counter | 3 nonce words), a 64-byte keystream buffer, an offset
/// into it, and an `active` flag.
pub struct ChaCha20 {
    state: [u32; 16],
    keystream: [u8; 64],
    ks_offset: usize,
    active: bool,
}

impl ChaCha20 {
    /// Builds an inactive cipher. Use [`ChaCha20::init`] before [`ChaCha20::xor`].
    pub fn new() -> Self {
        ChaCha20 {
            state: [0u32; 16],
            keystream: [0u8; 64],
            ks_offset: 64,
            active: false,
        }
    }

    /// Seeds the state from a 32-byte key and 12-byte nonce, counter 0.
    pub fn init(&mut self, key: &[u8; 32], nonce: &[u8; 12]) {
        self.state[0..4].copy_from_slice(&CONSTANTS);
        for i in 0..8 {
            self.state[4 + i] = u32::from_le_bytes(key[i * 4..i * 4 + 4].try_into().unwrap());
        }
        self.state[12] = 0;
        for i in 0..3 {
            self.state[13 + i] = u32::from_le_bytes(nonce[i * 4..i * 4 + 4].try_into().unwrap());
        }
        self.ks_offset = 64;
        self.active = true;
    }

    /// True once [`ChaCha20::init`] has been called (and before [`ChaCha20::reset`]).
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn block_counter(&self) -> u32 {
        self.state[12]
    }

    fn set_block_counter(&mut self, c: u32) {
        self.state[12] = c;
    }

    fn generate_block(&mut self) {
        let mut working = self.state;
        for _ in 0..10 {
            quarter_round(&mut working, 0, 4, 8, 12);
            quarter_round(&mut working, 1, 5, 9, 13);
            quarter_round(&mut working, 2, 6, 10, 14);
            quarter_round(&mut working, 3, 7, 11, 15);
            quarter_round(&mut working, 0, 5, 10, 15);
            quarter_round(&mut working, 1, 6, 11, 12);
            quarter_round(&mut working, 2, 7, 8, 13);
            quarter_round(&mut working, 3, 4, 9, 14);
        }
        for i in 0..16 {
            working[i] = working[i].wrapping_add(self.state[i]);
        }
        for i in 0..16 {
            self.keystream[i * 4..i * 4 + 4].copy_from_slice(&working[i].to_le_bytes());
        }
        self.set_block_counter(self.block_counter().wrapping_add(1));
        self.ks_offset = 0;
    }

    /// XORs the keystream into `buf` in place, generating new blocks as needed.
    pub fn xor(&mut self, buf: &mut [u8]) {
        debug_assert!(self.active, "xor() called on an inactive cipher");
        let mut i = 0;
        while i < buf.len() {
            if self.ks_offset == 64 {
                self.generate_block();
            }
            let available = 64 - self.ks_offset;
            let take = available.min(buf.len() - i);
            for j in 0..take {
                buf[i + j] ^= self.keystream[self.ks_offset + j];
            }
            self.ks_offset += take;
            i += take;
        }
    }

    /// Zeroes the entire context, resisting dead-store elimination by the compiler.
    pub fn reset(&mut self) {
        self.state.zeroize();
        self.keystream.zeroize();
        self.ks_offset = 64;
        self.active = false;
    }
}

impl Default for ChaCha20 {
    fn default() -> Self {
        Self::new()
    }
}

fn quarter_round(s: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    s[a] = s[a].wrapping_add(s[b]);
    s[d] ^= s[a];
    s[d] = s[d].rotate_left(16);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] ^= s[c];
    s[b] = s[b].rotate_left(12);
    s[a] = s[a].wrapping_add(s[b]);
    s[d] ^= s[a];
    s[d] = s[d].rotate_left(8);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] ^= s[c];
    s[b] = s[b].rotate_left(7);
}

/// Derives a 32-byte session key from a 32-byte pre-shared key and a 12-byte
/// nonce: one ChaCha20 block keyed by `(psk, counter=0, nonce)`, first 32
/// bytes of the output. The transient block and generator state are scrubbed
/// before returning.
pub fn derive_key(psk: &[u8; 32], nonce: &[u8; 12]) -> [u8; 32] {
    let mut gen = ChaCha20::new();
    gen.init(psk, nonce);
    gen.generate_block();
    let mut key = [0u8; 32];
    key.copy_from_slice(&gen.keystream[0..32]);
    gen.reset();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_its_own_inverse() {
        let key = [7u8; 32];
        let nonce = [3u8; 12];
        let msg = b"the quick brown fox jumps over the lazy dog, many times over".to_vec();

        let mut enc = ChaCha20::new();
        enc.init(&key, &nonce);
        let mut buf = msg.clone();
        enc.xor(&mut buf);
        assert_ne!(buf, msg);

        let mut dec = ChaCha20::new();
        dec.init(&key, &nonce);
        dec.xor(&mut buf);
        assert_eq!(buf, msg);
    }

    #[test]
    fn xor_works_across_arbitrary_chunk_boundaries() {
        let key = [1u8; 32];
        let nonce = [2u8; 12];
        let msg: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();

        let mut whole = ChaCha20::new();
        whole.init(&key, &nonce);
        let mut whole_buf = msg.clone();
        whole.xor(&mut whole_buf);

        let mut chunked = ChaCha20::new();
        chunked.init(&key, &nonce);
        let mut chunked_buf = msg.clone();
        for chunk in chunked_buf.chunks_mut(7) {
            chunked.xor(chunk);
        }
        assert_eq!(whole_buf, chunked_buf);
    }

    #[test]
    fn derive_key_is_deterministic_and_input_sensitive() {
        let psk = [9u8; 32];
        let nonce_a = [1u8; 12];
        let nonce_b = [2u8; 12];

        assert_eq!(derive_key(&psk, &nonce_a), derive_key(&psk, &nonce_a));
        assert_ne!(derive_key(&psk, &nonce_a), derive_key(&psk, &nonce_b));

        let mut other_psk = psk;
        other_psk[0] ^= 0xFF;
        assert_ne!(derive_key(&psk, &nonce_a), derive_key(&other_psk, &nonce_a));
    }

    #[test]
    fn reset_clears_active_flag() {
        let mut c = ChaCha20::new();
        c.init(&[0u8; 32], &[0u8; 12]);
        assert!(c.is_active());
        c.reset();
        assert!(!c.is_active());
    }
}
