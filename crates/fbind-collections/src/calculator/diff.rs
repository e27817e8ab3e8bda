#![forbid(unsafe_code)]

//! Identity-based diff calculator with optional move detection.
//!
//! # Algorithm
//!
//! 1. Myers' O((n+m)·D) shortest edit script over `same_identity` finds the
//!    longest common subsequence of old and new. Common leading and trailing
//!    runs are matched up front, and the remainder is solved by splitting at
//!    the middle snake, so memory stays linear in the input length.
//! 2. With move detection on, unmatched old and new items that share an
//!    identity are paired; each pair becomes a `Moved` instead of a
//!    remove/insert couple.
//! 3. The script is emitted in application order: removals from the back,
//!    then a forward walk over the new list emitting `Moved` and `Inserted`
//!    at their final positions, then `Changed` for matched pairs whose
//!    contents differ.
//!
//! Host predicates run through [`guarded`]: a panicking identity predicate
//! counts as "no match", a panicking contents predicate as "same contents",
//! and a panicking payload producer as "no payload".

use std::sync::Arc;

use fbind_core::guarded;

use super::{ChangesCalculator, push_inserted, push_removed};
use crate::change::{Change, ChangePayload};

type Predicate<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;
type PayloadFn<T> = Arc<dyn Fn(&T, &T) -> Option<ChangePayload> + Send + Sync>;

/// Diff calculator driven by an identity predicate.
pub struct DiffCalculator<T> {
    same_identity: Predicate<T>,
    contents_same: Option<Predicate<T>>,
    change_payload: Option<PayloadFn<T>>,
    detect_moves: bool,
}

impl<T> Clone for DiffCalculator<T> {
    fn clone(&self) -> Self {
        Self {
            same_identity: Arc::clone(&self.same_identity),
            contents_same: self.contents_same.clone(),
            change_payload: self.change_payload.clone(),
            detect_moves: self.detect_moves,
        }
    }
}

impl<T> std::fmt::Debug for DiffCalculator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffCalculator")
            .field("custom_contents", &self.contents_same.is_some())
            .field("payloads", &self.change_payload.is_some())
            .field("detect_moves", &self.detect_moves)
            .finish()
    }
}

impl<T: PartialEq> DiffCalculator<T> {
    /// Calculator matching items with `same_identity`. Contents default to
    /// `PartialEq`, moves are not detected.
    pub fn new(same_identity: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            same_identity: Arc::new(same_identity),
            contents_same: None,
            change_payload: None,
            detect_moves: false,
        }
    }

    /// Override the contents comparison used for matched items.
    #[must_use]
    pub fn contents_same(mut self, f: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.contents_same = Some(Arc::new(f));
        self
    }

    /// Attach a partial-update payload to `Changed` edits.
    #[must_use]
    pub fn change_payload(
        mut self,
        f: impl Fn(&T, &T) -> Option<ChangePayload> + Send + Sync + 'static,
    ) -> Self {
        self.change_payload = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn detect_moves(mut self, enabled: bool) -> Self {
        self.detect_moves = enabled;
        self
    }

    fn same(&self, a: &T, b: &T) -> bool {
        guarded("same_identity", false, || (self.same_identity)(a, b))
    }

    fn contents_equal(&self, a: &T, b: &T) -> bool {
        match &self.contents_same {
            Some(f) => guarded("contents_same", true, || f(a, b)),
            None => a == b,
        }
    }

    fn payload(&self, a: &T, b: &T) -> Option<ChangePayload> {
        let f = self.change_payload.as_ref()?;
        guarded("change_payload", None, || f(a, b))
    }

    fn leading_matches(&self, old: &[T], new: &[T]) -> usize {
        old.iter().zip(new).take_while(|(a, b)| self.same(a, b)).count()
    }

    fn trailing_matches(&self, old: &[T], new: &[T]) -> usize {
        old.iter()
            .rev()
            .zip(new.iter().rev())
            .take_while(|(a, b)| self.same(a, b))
            .count()
    }

    /// Matched `(old, new)` index pairs of a shortest edit script, ascending.
    fn common_subsequence(&self, old: &[T], new: &[T]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        self.collect_matches(old, new, (0, 0), &mut pairs);
        pairs
    }

    /// Append the matches of `old` against `new` to `pairs`, shifted by
    /// `base`. Common ends are matched directly; the rest is split at a
    /// point on an optimal path and each half solved on its own.
    fn collect_matches(
        &self,
        old: &[T],
        new: &[T],
        base: (usize, usize),
        pairs: &mut Vec<(usize, usize)>,
    ) {
        let head = self.leading_matches(old, new);
        pairs.extend((0..head).map(|i| (base.0 + i, base.1 + i)));
        let (old, new) = (&old[head..], &new[head..]);
        let base = (base.0 + head, base.1 + head);

        let tail = self.trailing_matches(old, new);
        let (old, new) = (&old[..old.len() - tail], &new[..new.len() - tail]);

        if !old.is_empty() && !new.is_empty() {
            match self.middle_split(old, new) {
                Some((x, y)) if (x, y) != (0, 0) && (x, y) != (old.len(), new.len()) => {
                    self.collect_matches(&old[..x], &new[..y], base, pairs);
                    self.collect_matches(&old[x..], &new[y..], (base.0 + x, base.1 + y), pairs);
                }
                // Only an inconsistent identity predicate gets here; the
                // middle stays unmatched.
                Some(_) => tracing::debug!(old = old.len(), new = new.len(), "diff split made no progress"),
                None => {}
            }
        }

        let (end_old, end_new) = (base.0 + old.len(), base.1 + new.len());
        pairs.extend((0..tail).map(|i| (end_old + i, end_new + i)));
    }

    /// A point on an optimal edit path, found by running Myers' search from
    /// both ends until the two frontiers overlap. `None` when nothing
    /// matches. Memory stays linear in the input length.
    fn middle_split(&self, old: &[T], new: &[T]) -> Option<(usize, usize)> {
        let (n, m) = (old.len() as isize, new.len() as isize);
        let delta = n - m;
        let front = delta % 2 != 0;
        let max_d = (n + m + 1) / 2;
        let mut forward = Frontier::new(max_d);
        let mut backward = Frontier::new(max_d);
        // Diagonals that ran off the grid are dropped from later rounds.
        let (mut f_start, mut f_end, mut b_start, mut b_end) = (0, 0, 0, 0);

        for d in 0..max_d {
            let mut k = -d + f_start;
            while k <= d - f_end {
                let mut x = if k == -d || (k != d && forward.get(k - 1) < forward.get(k + 1)) {
                    forward.get(k + 1)
                } else {
                    forward.get(k - 1) + 1
                };
                let mut y = x - k;
                if x < n && (0..m).contains(&y) {
                    let run = self.leading_matches(&old[x as usize..], &new[y as usize..]) as isize;
                    x += run;
                    y += run;
                }
                forward.set(k, x);
                if x > n {
                    f_end += 2;
                } else if y > m {
                    f_start += 2;
                } else if front
                    && let Some(reached) = backward.visited(delta - k)
                    && x >= n - reached
                {
                    return Some((x as usize, y as usize));
                }
                k += 2;
            }

            let mut k = -d + b_start;
            while k <= d - b_end {
                let mut x = if k == -d || (k != d && backward.get(k - 1) < backward.get(k + 1)) {
                    backward.get(k + 1)
                } else {
                    backward.get(k - 1) + 1
                };
                let mut y = x - k;
                if x < n && (0..m).contains(&y) {
                    let run = self.trailing_matches(
                        &old[..(n - x) as usize],
                        &new[..(m - y) as usize],
                    ) as isize;
                    x += run;
                    y += run;
                }
                backward.set(k, x);
                if x > n {
                    b_end += 2;
                } else if y > m {
                    b_start += 2;
                } else if !front
                    && let Some(fx) = forward.visited(delta - k)
                    && fx >= n - x
                {
                    let fy = fx - (delta - k);
                    if fx <= n && (0..=m).contains(&fy) {
                        return Some((fx as usize, fy as usize));
                    }
                }
                k += 2;
            }
        }
        None
    }
}

/// Furthest x reached on each diagonal `k = x - y` of a Myers search,
/// `-1` where the search has not been.
struct Frontier {
    offset: isize,
    x: Vec<isize>,
}

impl Frontier {
    fn new(max_d: isize) -> Self {
        let mut x = vec![-1; 2 * max_d.max(0) as usize + 3];
        let offset = max_d + 1;
        x[(offset + 1) as usize] = 0;
        Self { offset, x }
    }

    fn get(&self, k: isize) -> isize {
        self.x[(k + self.offset) as usize]
    }

    fn set(&mut self, k: isize, x: isize) {
        self.x[(k + self.offset) as usize] = x;
    }

    /// Furthest x on diagonal `k`, if the search has reached it.
    fn visited(&self, k: isize) -> Option<isize> {
        let slot = usize::try_from(k + self.offset).ok()?;
        self.x.get(slot).copied().filter(|&x| x >= 0)
    }
}

/// Slot in the working list while emitting the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Kept old item, in LCS order.
    Anchored(usize),
    /// Kept old item that will be moved.
    Floating(usize),
    /// Item inserted from the new list.
    Fresh,
}

impl<T: PartialEq + Send + Sync> ChangesCalculator<T> for DiffCalculator<T> {
    fn calculate(&self, old: &[T], new: &[T]) -> Vec<Change> {
        // partner_of_new[j] = matched old index; kept[i] = slot of a kept old item.
        let mut partner_of_new: Vec<Option<usize>> = vec![None; new.len()];
        let mut kept: Vec<Option<Slot>> = vec![None; old.len()];
        for (i, j) in self.common_subsequence(old, new) {
            partner_of_new[j] = Some(i);
            kept[i] = Some(Slot::Anchored(i));
        }
        if self.detect_moves {
            for j in 0..new.len() {
                if partner_of_new[j].is_some() {
                    continue;
                }
                let candidate = (0..old.len())
                    .find(|&i| kept[i].is_none() && self.same(&old[i], &new[j]));
                if let Some(i) = candidate {
                    partner_of_new[j] = Some(i);
                    kept[i] = Some(Slot::Floating(i));
                }
            }
        }

        let mut changes = Vec::new();

        // Removals, back to front so earlier positions stay valid.
        let mut i = old.len();
        while i > 0 {
            if kept[i - 1].is_some() {
                i -= 1;
                continue;
            }
            let end = i;
            while i > 0 && kept[i - 1].is_none() {
                i -= 1;
            }
            push_removed(&mut changes, i, end - i);
        }

        // Forward walk: work[..j] always equals the final prefix new[..j].
        let mut work: Vec<Slot> = kept.iter().flatten().copied().collect();
        let mut j = 0;
        while j < new.len() {
            let Some(partner) = partner_of_new[j] else {
                let run = partner_of_new[j..]
                    .iter()
                    .take_while(|p| p.is_none())
                    .count();
                push_inserted(&mut changes, j, run);
                work.splice(j..j, std::iter::repeat_n(Slot::Fresh, run));
                j += run;
                continue;
            };
            let Some(target) = kept[partner] else {
                j += 1;
                continue;
            };
            let Some(offset) = work[j..].iter().position(|s| *s == target) else {
                j += 1;
                continue;
            };
            if let Slot::Anchored(_) = target {
                // Only floating items can sit in front of the next anchor;
                // push each of them to the back.
                for _ in 0..offset {
                    let last = work.len() - 1;
                    changes.push(Change::Moved { from: j, to: last });
                    let slot = work.remove(j);
                    work.push(slot);
                }
            } else if offset > 0 {
                changes.push(Change::Moved {
                    from: j + offset,
                    to: j,
                });
                let slot = work.remove(j + offset);
                work.insert(j, slot);
            }
            j += 1;
        }

        // Content changes at final positions; payload-free runs coalesce.
        let mut j = 0;
        while j < new.len() {
            let Some(i) = partner_of_new[j] else {
                j += 1;
                continue;
            };
            if self.contents_equal(&old[i], &new[j]) {
                j += 1;
                continue;
            }
            let payload = self.payload(&old[i], &new[j]);
            if payload.is_some() {
                changes.push(Change::Changed {
                    position: j,
                    count: 1,
                    payload,
                });
                j += 1;
                continue;
            }
            let start = j;
            j += 1;
            while j < new.len() {
                let Some(i) = partner_of_new[j] else { break };
                if self.contents_equal(&old[i], &new[j]) || self.change_payload.is_some() {
                    break;
                }
                j += 1;
            }
            changes.push(Change::changed(start, j - start));
        }

        tracing::trace!(
            old = old.len(),
            new = new.len(),
            changes = changes.len(),
            moves = self.detect_moves,
            "identity diff"
        );
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::apply_changes;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        title: &'static str,
    }

    fn row(id: u32, title: &'static str) -> Row {
        Row { id, title }
    }

    fn by_id() -> DiffCalculator<Row> {
        DiffCalculator::new(|a: &Row, b: &Row| a.id == b.id)
    }

    fn check<T: Clone + PartialEq + Send + Sync + std::fmt::Debug>(
        calc: &DiffCalculator<T>,
        old: &[T],
        new: &[T],
    ) -> Vec<Change> {
        let changes = calc.calculate(old, new);
        assert_eq!(apply_changes(old, &changes, new), Some(new.to_vec()));
        changes
    }

    #[test]
    fn same_content_yields_no_changes() {
        let items = vec![row(1, "a"), row(2, "b")];
        assert!(by_id().calculate(&items, &items).is_empty());
    }

    #[test]
    fn insert_and_remove() {
        let old = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let new = vec![row(1, "a"), row(3, "c"), row(4, "d")];
        let changes = check(&by_id(), &old, &new);
        assert_eq!(
            changes,
            vec![
                Change::Removed { position: 1, count: 1 },
                Change::Inserted { position: 2, count: 1 },
            ]
        );
    }

    #[test]
    fn content_change_without_payload() {
        let old = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let new = vec![row(1, "A"), row(2, "B"), row(3, "c")];
        let changes = check(&by_id(), &old, &new);
        assert_eq!(changes, vec![Change::changed(0, 2)]);
    }

    #[test]
    fn content_change_with_payload() {
        let calc = by_id().change_payload(|_old: &Row, new: &Row| Some(ChangePayload::new(new.title)));
        let old = vec![row(1, "a")];
        let new = vec![row(1, "z")];
        let changes = check(&calc, &old, &new);
        let [Change::Changed { position: 0, count: 1, payload: Some(p) }] = changes.as_slice() else {
            panic!("unexpected {changes:?}");
        };
        assert_eq!(p.downcast_ref::<&str>(), Some(&"z"));
    }

    #[test]
    fn custom_contents_predicate() {
        let calc = by_id().contents_same(|a: &Row, b: &Row| a.title.len() == b.title.len());
        let old = vec![row(1, "a")];
        let new = vec![row(1, "b")];
        assert!(calc.calculate(&old, &new).is_empty());
    }

    #[test]
    fn moves_detected_when_enabled() {
        let old = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let new = vec![row(3, "c"), row(1, "a"), row(2, "b")];
        let changes = check(&by_id().detect_moves(true), &old, &new);
        assert_eq!(changes, vec![Change::Moved { from: 2, to: 0 }]);
    }

    #[test]
    fn backward_move_detected() {
        let old = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let new = vec![row(2, "b"), row(3, "c"), row(1, "a")];
        let changes = check(&by_id().detect_moves(true), &old, &new);
        assert_eq!(changes, vec![Change::Moved { from: 0, to: 2 }]);
    }

    #[test]
    fn moves_become_remove_insert_when_disabled() {
        let old = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let new = vec![row(3, "c"), row(1, "a"), row(2, "b")];
        let changes = check(&by_id(), &old, &new);
        assert!(changes.iter().all(|c| !matches!(c, Change::Moved { .. })));
    }

    #[test]
    fn moved_item_with_changed_contents() {
        let old = vec![row(1, "a"), row(2, "b")];
        let new = vec![row(2, "B"), row(1, "a")];
        let changes = check(&by_id().detect_moves(true), &old, &new);
        assert!(changes.contains(&Change::changed(0, 1)));
    }

    #[test]
    fn empty_edges() {
        let none: Vec<Row> = vec![];
        let some = vec![row(1, "a"), row(2, "b")];
        assert_eq!(
            check(&by_id(), &none, &some),
            vec![Change::Inserted { position: 0, count: 2 }]
        );
        assert_eq!(
            check(&by_id(), &some, &none),
            vec![Change::Removed { position: 0, count: 2 }]
        );
        assert!(check(&by_id(), &none, &none).is_empty());
    }

    #[test]
    fn panicking_identity_predicate_means_no_match() {
        let calc = DiffCalculator::new(|a: &u32, b: &u32| {
            if *a == 2 {
                panic!("bad predicate");
            }
            a == b
        });
        let old = vec![1, 2, 3];
        let new = vec![1, 2, 3];
        let changes = check(&calc, &old, &new);
        assert!(!changes.is_empty());
    }

    #[test]
    fn disjoint_lists_replace_everything() {
        let calc = DiffCalculator::new(|a: &u32, b: &u32| a == b);
        let old: Vec<u32> = (0..2_000).collect();
        let new: Vec<u32> = (10_000..12_000).collect();
        let changes = check(&calc, &old, &new);
        assert_eq!(
            changes,
            vec![
                Change::Removed { position: 0, count: 2_000 },
                Change::Inserted { position: 0, count: 2_000 },
            ]
        );
    }

    #[test]
    fn long_shared_ends_leave_minimal_middle() {
        let calc = DiffCalculator::new(|a: &u32, b: &u32| a == b);
        let old: Vec<u32> = (0..5_000).collect();
        let mut new = old.clone();
        new[2_500] = 99_999;
        new.insert(4_000, 88_888);
        let changes = check(&calc, &old, &new);
        assert_eq!(
            changes,
            vec![
                Change::Removed { position: 2_500, count: 1 },
                Change::Inserted { position: 2_500, count: 1 },
                Change::Inserted { position: 4_000, count: 1 },
            ]
        );
    }

    #[test]
    fn interleaved_edits_keep_longest_common_run() {
        let calc = DiffCalculator::new(|a: &char, b: &char| a == b);
        let old: Vec<char> = "abcabba".chars().collect();
        let new: Vec<char> = "cbabac".chars().collect();
        let changes = check(&calc, &old, &new);
        // Myers' classic example: edit distance 5, so four items are kept.
        let removed: usize = changes
            .iter()
            .map(|c| match c {
                Change::Removed { count, .. } => *count,
                _ => 0,
            })
            .sum();
        assert_eq!(removed, 3);
    }

    #[test]
    fn shuffled_with_duplicates_identity() {
        let calc = DiffCalculator::new(|a: &char, b: &char| a == b).detect_moves(true);
        let old: Vec<char> = "abcabba".chars().collect();
        let new: Vec<char> = "cbabac".chars().collect();
        check(&calc, &old, &new);
    }
}
