use std::hash::Hasher;
use metrohash::MetroHash64;

// Hash a list of binary strings into a single 64-bit value
pub fn hash_bstrings(seed: u64, bstrings: &[&[u8]]) -> u64
{
    let mut hasher = MetroHash64::with_seed(seed);
    bstrings.iter().for_each(|s| { hasher.write(s); });
    hasher.finish()
}
