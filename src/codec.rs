// Conversions between the byte layout SM3 is specified over and the 32-bit
// words the compression function works on. SM3 is big-endian throughout, so
// everything read from or written to bytes goes through here.
use crate::Sm3Error;

pub const BLOCK_LEN: usize = 64;
pub const DIGEST_LEN: usize = 32;

pub fn bytes_to_words_be(block: &[u8; BLOCK_LEN]) -> [u32; 16] {
    std::array::from_fn(|i| {
        let word = u32::from_ne_bytes([
            block[4 * i],
            block[4 * i + 1],
            block[4 * i + 2],
            block[4 * i + 3],
        ]);
        reverse_word_if_little_endian(word)
    })
}

pub fn words_to_bytes_be(words: &[u32; 8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    for (chunk, &word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&reverse_word_if_little_endian(word).to_ne_bytes());
    }
    out
}

/// Byte-swaps `word` on little-endian hosts and is the identity on big-endian
/// ones.
#[inline(always)]
pub fn reverse_word_if_little_endian(word: u32) -> u32 {
    if cfg!(target_endian = "little") {
        word.swap_bytes()
    } else {
        word
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .fold(String::new(), |s, hb| s + &hb)
}

pub fn from_hex(hex: &str) -> Result<Vec<u8>, Sm3Error> {
    let chars: Vec<char> = hex.chars().collect();
    if chars.len() % 2 != 0 {
        return Err(Sm3Error::InvalidHex(format!(
            "odd number of digits ({})",
            chars.len()
        )));
    }
    chars.chunks(2).map(hex_item_to_byte).collect()
}

fn hex_item_to_byte(item: &[char]) -> Result<u8, Sm3Error> {
    item.iter().try_fold(0u8, |byte, c| {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| Sm3Error::InvalidHex(format!("{c:?} is not a hex digit")))?;
        Ok((byte << 4) | nibble as u8)
    })
}
