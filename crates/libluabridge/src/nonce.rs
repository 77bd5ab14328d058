//! Correlation-id allocation.
//!
//! Ids are short alphanumeric strings scoped to one registry (a pending map
//! or a callback table). Allocation starts at length 1 and grows only once a
//! length is fully saturated, so ids stay minimal while retries stay bounded.

use rand::Rng;
use std::collections::HashMap;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Picks a fresh id not present in `existing`.
///
/// Does not reserve the id: the caller must insert it before allocating
/// again against the same registry.
pub fn allocate<V>(existing: &HashMap<String, V>) -> String {
    let mut rng = rand::thread_rng();
    let mut len = 1usize;
    loop {
        let capacity = (ALPHABET.len() as u128)
            .checked_pow(len as u32)
            .unwrap_or(u128::MAX);
        let used = existing.keys().filter(|id| id.len() == len).count() as u128;
        if used >= capacity {
            len += 1;
            continue;
        }
        loop {
            let candidate: String = (0..len)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            if !existing.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
