//! Invoice memo generation

use rand::Rng;

const MEMO_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random memo of `length` characters from `[a-z0-9]`
pub fn generate(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| MEMO_ALPHABET[rng.gen_range(0..MEMO_ALPHABET.len())] as char)
        .collect()
}
