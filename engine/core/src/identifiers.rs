use crate::{Didentifier, Fidentifier};

/// Derives the stable dataset identifier from a user-chosen name, folded into the keyspace
pub fn didentifier_from_name(name: &str, keyspace_size: u64) -> Didentifier {
    hash_u64(&[name.as_bytes()]) % keyspace_size
}

/// Fingerprint of a (function, query) invocation over a given dataset
pub fn fidentifier(didentifier: Didentifier, function_name: &str, query: &str) -> Fidentifier {
    hash_u64(&[&didentifier.to_le_bytes(), function_name.as_bytes(), query.as_bytes()])
}

/// Integrity seal over a user-program source blob
pub fn source_digest(source: &str) -> String {
    faster_hex::hex_string(blake2b_simd::Params::new().hash_length(32).hash(source.as_bytes()).as_bytes())
}

fn hash_u64(parts: &[&[u8]]) -> u64 {
    let mut state = blake2b_simd::Params::new().hash_length(8).to_state();
    for part in parts {
        // Length-prefix every part so concatenations cannot collide
        state.update(&(part.len() as u64).to_le_bytes());
        state.update(part);
    }
    u64::from_le_bytes(state.finalize().as_bytes().try_into().expect("blake2b output is 8 bytes"))
}
