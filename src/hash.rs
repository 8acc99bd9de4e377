//! Pure hash functions.
//!
//! Parameter names and program signatures use 32-bit FNV-1a. All
//! "randomness" in pattern evaluation is a splitmix64 hash of
//! `(seed, identity, time)`, never a generator advanced between calls, so a
//! query returns the same events no matter what ran before it.

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// FNV-1a over raw bytes.
pub const fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Hash a parameter name. Usable in const context so the compiler side can
/// bake hashes into `ENV_GET` instructions.
pub const fn hash_name(name: &str) -> u32 {
    fnv1a(name.as_bytes())
}

/// Fold one more 32-bit word into a running FNV-1a hash.
pub fn fnv1a_extend(hash: u32, word: u32) -> u32 {
    let mut hash = hash;
    for byte in word.to_le_bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn fnv1a_words(words: impl IntoIterator<Item = u32>) -> u32 {
    words.into_iter().fold(FNV_OFFSET, fnv1a_extend)
}

pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for pattern state owned by `key`.
pub fn seed_from_key(key: u32) -> u64 {
    splitmix64(key as u64)
}

/// Times closer than 1/10000 of a cycle hash identically.
fn quantize_time(time: f64) -> u64 {
    (time * 10_000.0).round() as i64 as u64
}

/// Deterministic value in `[0, 1)` for `(seed, identity, time)`.
pub fn deterministic_unit(seed: u64, identity: u32, time: f64) -> f64 {
    let h = splitmix64(
        seed ^ splitmix64((identity as u64) << 32 ^ 0xA5A5_A5A5) ^ quantize_time(time).rotate_left(17),
    );
    (h >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}
