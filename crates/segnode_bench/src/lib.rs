//! Shared data generators for segnode benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use segnode_core::PrimaryKey;

/// `count` random int64 primary keys.
pub fn random_int_keys(count: usize) -> Vec<PrimaryKey> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| PrimaryKey::Int64(rng.gen())).collect()
}

/// `count` random varchar primary keys of `len` lowercase letters.
pub fn random_varchar_keys(count: usize, len: usize) -> Vec<PrimaryKey> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let key: String = (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
            PrimaryKey::VarChar(key)
        })
        .collect()
}

/// `count` random segment offsets below `rows`.
pub fn random_offsets(count: usize, rows: i64) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..rows)).collect()
}
