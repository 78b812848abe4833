// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for bundle hashing determinism.

use agf_core::{build_bundle, verify_bundle};
use proptest::prelude::*;

fn arb_files() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    // Distinct simple paths with arbitrary small contents.
    prop::collection::btree_map("[a-z]{1,8}(/[a-z]{1,8}){0,2}", prop::collection::vec(any::<u8>(), 0..256), 0..12)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn shuffle_invariance(files in arb_files(), seed in any::<u64>()) {
        let baseline = build_bundle(files.clone());

        // Deterministic pseudo-shuffle driven by the seed.
        let mut shuffled = files.clone();
        let len = shuffled.len();
        if len > 1 {
            let mut state = seed | 1;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
        }

        let reordered = build_bundle(shuffled);
        prop_assert_eq!(&baseline.bundle_sha256, &reordered.bundle_sha256);
        prop_assert!(verify_bundle(files, &baseline.bundle_sha256));
    }

    #[test]
    fn single_byte_mutation_changes_hash(files in arb_files()) {
        prop_assume!(files.iter().any(|(_, bytes)| !bytes.is_empty()));
        let baseline = build_bundle(files.clone());

        let mut mutated = files;
        for (_, bytes) in mutated.iter_mut() {
            if let Some(first) = bytes.first_mut() {
                *first = first.wrapping_add(1);
                break;
            }
        }
        let changed = build_bundle(mutated);
        prop_assert_ne!(baseline.bundle_sha256, changed.bundle_sha256);
    }
}
