/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Encodings shared by the engine and the hosts: call data, built-in token transfers,
//! the linkage carried alongside cross-shard transfers, and call identifiers.

pub mod call_args;
pub use call_args::*;

pub mod esdt;
pub use esdt::*;

pub mod linkage;
pub use linkage::*;

/// Minimal big-endian encoding. Zero encodes to an empty slice.
pub fn u64_to_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let leading_zeros = bytes.iter().take_while(|byte| **byte == 0).count();
    bytes[leading_zeros..].to_vec()
}

/// Reads a big-endian unsigned integer of any length. Returns None if it does not fit in a u64.
pub fn u64_from_be_bytes(bytes: &[u8]) -> Option<u64> {
    let leading_zeros = bytes.iter().take_while(|byte| **byte == 0).count();
    let significant = &bytes[leading_zeros..];
    if significant.len() > 8 {
        return None;
    }
    Some(
        significant
            .iter()
            .fold(0u64, |value, byte| (value << 8) | u64::from(*byte)),
    )
}
