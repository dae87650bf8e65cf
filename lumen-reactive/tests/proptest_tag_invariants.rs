//! Property tests for the tag algebra
//!
//! Random sequences of dirty/swap operations must keep combinators equal to
//! the maximum of their children, keep every tag monotonic, and keep
//! `validate` consistent with `value`.

use lumen_reactive::{combine, DirtyableTag, Revision, RevisionClock, Tag, TagRef, UpdatableTag};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Dirty(usize),
    Swap { updatable: usize, leaf: usize },
}

fn op_strategy(leaves: usize, updatables: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..leaves).prop_map(Op::Dirty),
        (0..updatables, 0..leaves).prop_map(|(updatable, leaf)| Op::Swap { updatable, leaf }),
    ]
}

proptest! {
    #[test]
    fn combinator_is_max_of_children(ops in prop::collection::vec(op_strategy(4, 2), 0..64)) {
        let clock = RevisionClock::shared();
        let leaves: Vec<Arc<DirtyableTag>> = (0..4).map(|_| DirtyableTag::shared(&clock)).collect();
        let updatables: Vec<Arc<UpdatableTag>> = (0..2).map(|_| UpdatableTag::shared(&clock)).collect();

        let children: Vec<TagRef> = vec![
            leaves[0].clone() as TagRef,
            leaves[1].clone() as TagRef,
            updatables[0].clone() as TagRef,
            updatables[1].clone() as TagRef,
        ];
        let combined = combine(children.clone());
        let mut previous = combined.value();

        for op in ops {
            match op {
                Op::Dirty(i) => { leaves[i].dirty(); }
                Op::Swap { updatable, leaf } => updatables[updatable].update(leaves[leaf].clone()),
            }

            let expected = children.iter().map(|t| t.value()).max().unwrap_or(Revision::INITIAL);
            prop_assert_eq!(combined.value(), expected);
            prop_assert!(combined.value() >= previous);
            prop_assert!(combined.validate(combined.value()));
            prop_assert!(combined.value() <= clock.value());
            previous = combined.value();
        }
    }

    #[test]
    fn snapshot_invalidates_iff_tracked_leaf_dirtied(
        dirty_tracked in any::<bool>(),
        dirty_untracked in any::<bool>(),
    ) {
        let clock = RevisionClock::shared();
        let tracked = DirtyableTag::shared(&clock);
        let untracked = DirtyableTag::shared(&clock);
        let tag = combine([tracked.clone() as TagRef]);
        let snapshot = tag.value();

        if dirty_untracked { untracked.dirty(); }
        if dirty_tracked { tracked.dirty(); }

        prop_assert_eq!(tag.validate(snapshot), !dirty_tracked);
    }

    #[test]
    fn clock_increments_once_per_dirty(count in 0usize..50) {
        let clock = RevisionClock::shared();
        let tag = DirtyableTag::shared(&clock);
        for _ in 0..count {
            tag.dirty();
        }
        prop_assert_eq!(clock.value(), Revision(1 + count as u64));
        prop_assert_eq!(tag.value(), clock.value());
    }
}
