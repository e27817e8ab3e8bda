//! Property-based invariant tests for the change calculators.
//!
//! Verifies structural guarantees of every calculator:
//!
//! 1. Applying the output to `old` reproduces `new` (positional, granular)
//! 2. Same for the shrinking positional calculator
//! 3. Same for the identity diff, with and without move detection
//! 4. Identical inputs produce no changes
//! 5. The shrinking calculator never emits more than two structural edits
//!    once it falls back to coarse output
//! 6. Without move detection the diff never emits `Moved`
//! 7. Net size delta of the output equals `new.len() - old.len()`

use fbind_collections::{
    Change, ChangesCalculator, DiffCalculator, PositionalCalculator, apply_changes,
};
use proptest::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

/// Small alphabet so inputs share plenty of items.
fn arb_list() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(0u8..8, 0..=24)
}

/// Keyed rows: identity is the key, contents are the value.
fn arb_rows() -> impl Strategy<Value = Vec<(u8, u8)>> {
    proptest::collection::vec((0u8..10, 0u8..3), 0..=20)
}

fn by_key() -> DiffCalculator<(u8, u8)> {
    DiffCalculator::new(|a: &(u8, u8), b: &(u8, u8)| a.0 == b.0)
}

fn net_delta(changes: &[Change]) -> isize {
    changes.iter().map(Change::size_delta).sum()
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Granular positional output reproduces the new list
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn positional_reproduces_new(old in arb_list(), new in arb_list()) {
        let changes = PositionalCalculator::new().calculate(&old, &new);
        prop_assert_eq!(apply_changes(&old, &changes, &new), Some(new.clone()));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Shrinking positional output reproduces the new list
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn shrinking_reproduces_new(old in arb_list(), new in arb_list()) {
        let changes = PositionalCalculator::shrinking().calculate(&old, &new);
        prop_assert_eq!(apply_changes(&old, &changes, &new), Some(new.clone()));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Identity diff reproduces the new list
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn diff_reproduces_new(old in arb_rows(), new in arb_rows()) {
        let changes = by_key().calculate(&old, &new);
        prop_assert_eq!(apply_changes(&old, &changes, &new), Some(new.clone()));
    }

    #[test]
    fn diff_with_moves_reproduces_new(old in arb_rows(), new in arb_rows()) {
        let changes = by_key().detect_moves(true).calculate(&old, &new);
        prop_assert_eq!(apply_changes(&old, &changes, &new), Some(new.clone()));
    }

    #[test]
    fn permutation_with_moves_needs_no_insert_or_remove(
        old in proptest::collection::vec(0u8..50, 0..=16),
        seed in any::<u64>(),
    ) {
        // Distinct keys, shuffled deterministically from the seed.
        let mut keys: Vec<u8> = old.clone();
        keys.sort_unstable();
        keys.dedup();
        let mut shuffled = keys.clone();
        let mut state = seed;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }
        let calc = DiffCalculator::new(|a: &u8, b: &u8| a == b).detect_moves(true);
        let changes = calc.calculate(&keys, &shuffled);
        prop_assert!(changes.iter().all(|c| matches!(c, Change::Moved { .. })), "only moves expected");
        prop_assert_eq!(apply_changes(&keys, &changes, &shuffled), Some(shuffled.clone()));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Identical inputs produce no changes
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn identical_inputs_are_quiet(list in arb_list(), rows in arb_rows()) {
        prop_assert!(PositionalCalculator::new().calculate(&list, &list).is_empty());
        prop_assert!(PositionalCalculator::shrinking().calculate(&list, &list).is_empty());
        prop_assert!(by_key().calculate(&rows, &rows).is_empty());
        prop_assert!(by_key().detect_moves(true).calculate(&rows, &rows).is_empty());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Shrinking output is bounded by the size delta
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn shrinking_structural_edits_within_delta(old in arb_list(), new in arb_list()) {
        let changes = PositionalCalculator::shrinking().calculate(&old, &new);
        let inserted: usize = changes
            .iter()
            .map(|c| match c {
                Change::Inserted { count, .. } => *count,
                _ => 0,
            })
            .sum();
        let removed: usize = changes
            .iter()
            .map(|c| match c {
                Change::Removed { count, .. } => *count,
                _ => 0,
            })
            .sum();
        prop_assert_eq!(inserted, new.len().saturating_sub(old.len()));
        prop_assert_eq!(removed, old.len().saturating_sub(new.len()));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Move-free diff
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn diff_without_moves_never_moves(old in arb_rows(), new in arb_rows()) {
        let changes = by_key().calculate(&old, &new);
        prop_assert!(!changes.iter().any(|c| matches!(c, Change::Moved { .. })), "no moves expected");
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Net size delta
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn net_delta_matches_length_change(
        old in arb_rows(),
        new in arb_rows(),
        moves in any::<bool>(),
    ) {
        let expected = new.len() as isize - old.len() as isize;
        let diff = by_key().detect_moves(moves).calculate(&old, &new);
        prop_assert_eq!(net_delta(&diff), expected);

        let old_keys: Vec<u8> = old.iter().map(|r| r.0).collect();
        let new_keys: Vec<u8> = new.iter().map(|r| r.0).collect();
        let positional = PositionalCalculator::new().calculate(&old_keys, &new_keys);
        prop_assert_eq!(net_delta(&positional), expected);
    }
}
