//! Content hashing for cache keys.
//!
//! Every cache in the render graph is keyed by a 64-bit hash of a resource's
//! full descriptive fields, so "the same resource requested again" is an
//! equality of descriptions, never of handles. Descriptors that depend on
//! other resources (a framebuffer on its pass, a pipeline on its shaders)
//! fold the upstream content hash into their own.

use std::hash::{Hash, Hasher};
use xxhash_rust::xxh3::Xxh3;

/// Compute the content hash of a descriptor.
pub fn content_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = Xxh3::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Hash)]
    struct Desc {
        format: u32,
        width: u32,
        height: u32,
    }

    #[test]
    fn test_equal_descriptions_hash_equal() {
        let a = Desc { format: 7, width: 1920, height: 1080 };
        let b = Desc { format: 7, width: 1920, height: 1080 };
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_field_change_changes_hash() {
        let a = Desc { format: 7, width: 1920, height: 1080 };
        let b = Desc { format: 7, width: 1920, height: 1081 };
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
