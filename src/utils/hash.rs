//! Location surrogate keys.
//!
//! Keys are XXH64 digests chained over the IEEE-754 bit patterns of the
//! coordinates, seeded with 42. This is the hashing scheme Spark's
//! `xxhash64(lat, lon)` applies to `DOUBLE` columns, so keys produced here
//! line up with rows already sitting in a warehouse loaded by Spark jobs.

const PRIME64_1: u64 = 0x9E37_79B1_85EB_CA87;
const PRIME64_2: u64 = 0xC2B2_AE3D_27D4_EB4F;
const PRIME64_3: u64 = 0x1656_67B1_9E37_79F9;
const PRIME64_4: u64 = 0x85EB_CA77_C2B2_AE63;
const PRIME64_5: u64 = 0x27D4_EB2F_1656_67C5;

pub const LOCATION_HASH_SEED: u64 = 42;

/// XXH64 of a single 8-byte word.
pub fn xxhash64_u64(input: u64, seed: u64) -> u64 {
    let mut hash = seed.wrapping_add(PRIME64_5).wrapping_add(8);
    hash ^= input
        .wrapping_mul(PRIME64_2)
        .rotate_left(31)
        .wrapping_mul(PRIME64_1);
    hash = hash
        .rotate_left(27)
        .wrapping_mul(PRIME64_1)
        .wrapping_add(PRIME64_4);
    avalanche(hash)
}

fn avalanche(mut hash: u64) -> u64 {
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(PRIME64_2);
    hash ^= hash >> 29;
    hash = hash.wrapping_mul(PRIME64_3);
    hash ^= hash >> 32;
    hash
}

/// Bit pattern used for hashing a double. `-0.0` folds onto `0.0` and every
/// NaN onto the canonical quiet NaN.
pub fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

/// 64-bit signed location key for a grid point.
pub fn location_hash(latitude: f64, longitude: f64) -> i64 {
    let h = xxhash64_u64(canonical_bits(latitude), LOCATION_HASH_SEED);
    xxhash64_u64(canonical_bits(longitude), h) as i64
}
