use crate::codec::{bytes_to_words_be, words_to_bytes_be, BLOCK_LEN, DIGEST_LEN};
use crate::{ConfigError, Hasher, Sm3Error};

pub type Digest = [u8; DIGEST_LEN];

const INITIALISATION_CONSTANTS: [u32; 8] = [
    0x7380166F, 0x4914B2B9, 0x172442D7, 0xDA8A0600, 0xA96F30BC, 0x163138AA, 0xE38DEE4D, 0xB0FB0E4E,
];
const T_EARLY: u32 = 0x79CC4519;
const T_LATE: u32 = 0x7A879D8A;
// The 0x80 marker plus the 8 byte length field must fit after the remainder.
const MAX_SINGLE_BLOCK_REMAINDER: usize = BLOCK_LEN - 9;
const LENGTH_FIELD_LOW_OFFSET: usize = BLOCK_LEN - 4;

/// Largest message, in bytes, whose bit length fits the 32 bits of the length
/// field that get populated. The upper 4 bytes of the field are always zero.
pub const MAX_INPUT_BYTES: u64 = (u32::MAX as u64) / 8;

#[derive(Debug, Clone)]
pub struct Sm3 {
    buffer: [u8; BLOCK_LEN],
    buffer_len: usize,
    state: [u32; 8],
    message_len: u64,
    blocks_compressed: u64,
    finalized: bool,
}

impl Sm3 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes hashing from a chaining state reached after compressing
    /// `message_len` bytes. `message_len` must be a whole number of blocks.
    pub fn from_state(state: [u32; 8], message_len: u64) -> Result<Self, Sm3Error> {
        if message_len % BLOCK_LEN as u64 != 0 {
            return Err(ConfigError::UnalignedMidstate(message_len).into());
        }
        if message_len > MAX_INPUT_BYTES {
            return Err(Sm3Error::InputTooLarge {
                attempted_bytes: message_len,
                max_bytes: MAX_INPUT_BYTES,
            });
        }
        Ok(Self {
            buffer: [0u8; BLOCK_LEN],
            buffer_len: 0,
            state,
            message_len,
            blocks_compressed: 0,
            finalized: false,
        })
    }

    pub fn update(&mut self, message: &[u8]) -> Result<(), Sm3Error> {
        if self.finalized {
            return Err(Sm3Error::MisuseAfterFinalize);
        }
        let attempted_bytes = self.message_len.saturating_add(message.len() as u64);
        if attempted_bytes > MAX_INPUT_BYTES {
            return Err(Sm3Error::InputTooLarge {
                attempted_bytes,
                max_bytes: MAX_INPUT_BYTES,
            });
        }
        self.absorb(message);
        Ok(())
    }

    /// Pads, compresses the final block(s) and returns the digest. The hasher
    /// refuses further `update` or `finalize` calls until it is `reset`.
    pub fn finalize(&mut self) -> Result<Digest, Sm3Error> {
        if self.finalized {
            return Err(Sm3Error::MisuseAfterFinalize);
        }
        Ok(self.finish())
    }

    // Buffers `message` and compresses every completed block. Callers are
    // responsible for keeping the total under MAX_INPUT_BYTES.
    pub(crate) fn absorb(&mut self, mut message: &[u8]) {
        self.message_len += message.len() as u64;

        if self.buffer_len > 0 {
            let (head, rest) = message.split_at((BLOCK_LEN - self.buffer_len).min(message.len()));
            self.buffer[self.buffer_len..self.buffer_len + head.len()].copy_from_slice(head);
            self.buffer_len += head.len();
            if self.buffer_len < BLOCK_LEN {
                return;
            }
            self.process_block();
            message = rest;
        }

        let mut blocks = message.chunks_exact(BLOCK_LEN);
        for block in blocks.by_ref() {
            self.buffer.copy_from_slice(block);
            self.process_block();
        }
        let tail = blocks.remainder();
        self.buffer[..tail.len()].copy_from_slice(tail);
        self.buffer_len = tail.len();
    }

    // Unchecked variant of `finalize` for callers that own a live hasher.
    pub(crate) fn finish(&mut self) -> Digest {
        self.pad();
        self.finalized = true;
        words_to_bytes_be(&self.state)
    }

    pub fn digest(mut self) -> Result<Digest, Sm3Error> {
        self.finalize()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn message_len(&self) -> u64 {
        self.message_len
    }

    /// Number of compression calls made so far, padding blocks included.
    pub fn blocks_compressed(&self) -> u64 {
        self.blocks_compressed
    }

    pub fn chaining_state(&self) -> [u32; 8] {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn pad(&mut self) {
        // Guarded by MAX_INPUT_BYTES, so the bit length always fits in 32 bits.
        let bit_len = (self.message_len * 8) as u32;
        let remainder = self.buffer_len;

        self.buffer[remainder] = 0x80;
        self.buffer[remainder + 1..].fill(0);
        if remainder > MAX_SINGLE_BLOCK_REMAINDER {
            self.process_block();
            self.buffer.fill(0);
        }
        self.buffer[LENGTH_FIELD_LOW_OFFSET..].copy_from_slice(&bit_len.to_be_bytes());
        self.process_block();
    }

    fn process_block(&mut self) {
        self.state = compress(&self.state, &self.buffer);
        self.blocks_compressed += 1;
        self.buffer_len = 0;
    }
}

impl Default for Sm3 {
    fn default() -> Self {
        Self {
            buffer: [0u8; BLOCK_LEN],
            buffer_len: 0,
            state: INITIALISATION_CONSTANTS,
            message_len: 0,
            blocks_compressed: 0,
            finalized: false,
        }
    }
}

impl Hasher<DIGEST_LEN> for Sm3 {
    fn update(&mut self, data: &[u8]) -> Result<(), Sm3Error> {
        Sm3::update(self, data)
    }

    fn digest(self) -> Result<Digest, Sm3Error> {
        Sm3::digest(self)
    }
}

pub fn hash(data: &[u8]) -> Result<Digest, Sm3Error> {
    Sm3::digest_message(data)
}

/// Total number of blocks compressed when hashing a `message_len` byte
/// message, padding included.
pub fn padded_block_count(message_len: u64) -> u64 {
    let full_blocks = message_len / BLOCK_LEN as u64;
    if (message_len % BLOCK_LEN as u64) as usize > MAX_SINGLE_BLOCK_REMAINDER {
        full_blocks + 2
    } else {
        full_blocks + 1
    }
}

/// The SM3 compression function: folds one block into the chaining state.
pub fn compress(state: &[u32; 8], block: &[u8; BLOCK_LEN]) -> [u32; 8] {
    let mut w = [0u32; 68];
    w[..16].copy_from_slice(&bytes_to_words_be(block));
    for j in 16..68 {
        w[j] = p1(w[j - 16] ^ w[j - 9] ^ w[j - 3].rotate_left(15))
            ^ w[j - 13].rotate_left(7)
            ^ w[j - 6];
    }
    let w_prime: [u32; 64] = std::array::from_fn(|j| w[j] ^ w[j + 4]);

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;
    for j in 0..64 {
        let (t, ff, gg) = match j {
            0..=15 => (T_EARLY, xor3(a, b, c), xor3(e, f, g)),
            _ => (T_LATE, majority(a, b, c), choose(e, f, g)),
        };

        let ss1 = a
            .rotate_left(12)
            .wrapping_add(e)
            .wrapping_add(t.rotate_left(j as u32 % 32))
            .rotate_left(7);
        let ss2 = ss1 ^ a.rotate_left(12);
        let tt1 = ff
            .wrapping_add(d)
            .wrapping_add(ss2)
            .wrapping_add(w_prime[j]);
        let tt2 = gg
            .wrapping_add(h)
            .wrapping_add(ss1)
            .wrapping_add(w[j]);

        d = c;
        c = b.rotate_left(9);
        b = a;
        a = tt1;
        h = g;
        g = f.rotate_left(19);
        f = e;
        e = p0(tt2);
    }

    let working = [a, b, c, d, e, f, g, h];
    std::array::from_fn(|i| state[i] ^ working[i])
}

#[inline(always)]
fn xor3(x: u32, y: u32, z: u32) -> u32 {
    x ^ y ^ z
}

#[inline(always)]
fn majority(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (x & z) | (y & z)
}

#[inline(always)]
fn choose(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (!x & z)
}

#[inline(always)]
fn p0(x: u32) -> u32 {
    x ^ x.rotate_left(9) ^ x.rotate_left(17)
}

#[inline(always)]
fn p1(x: u32) -> u32 {
    x ^ x.rotate_left(15) ^ x.rotate_left(23)
}
