use forked_core::{
    Atom, Counter, Edit, EditError, LogicalClock, MergeOutcome, MergeStrategy, Mergeable, OrSet,
    Register, Repository, Schema, Sequence, Text,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use uuid::Uuid;

fn clock() -> impl Strategy<Value = LogicalClock> {
    (0u64..8, any::<u128>()).prop_map(|(counter, token)| LogicalClock {
        counter,
        token: Uuid::from_u128(token),
    })
}

fn register() -> impl Strategy<Value = Register<i64>> {
    (any::<i64>(), clock()).prop_map(|(value, stamp)| Register::new(value, stamp))
}

fn or_set() -> impl Strategy<Value = OrSet<u8>> {
    prop::collection::btree_set(0u8..16, 0..10).prop_map(|s: BTreeSet<u8>| s.into_iter().collect())
}

fn counter() -> impl Strategy<Value = Counter> {
    any::<i64>().prop_map(Counter::new)
}

fn sequence() -> impl Strategy<Value = Sequence<u8>> {
    prop::collection::vec(0u8..6, 0..12).prop_map(Sequence::new)
}

fn text() -> impl Strategy<Value = Text> {
    "[a-e]{0,12}".prop_map(Text::new)
}

fn write(items: &[i64], notes: &Text) -> impl FnOnce(&mut Edit<'_>) -> Result<(), EditError> {
    let items: Vec<Atom> = items.iter().copied().map(Atom::from).collect();
    let notes = notes.as_str().to_string();
    move |e| {
        *e.sequence("items")? = items;
        *e.text("notes")? = notes;
        Ok(())
    }
}

proptest! {
    #[test]
    fn set_merge_commutes(a in or_set(), l in or_set(), r in or_set()) {
        prop_assert_eq!(OrSet::merge(&a, &l, &r), OrSet::merge(&a, &r, &l));
    }

    #[test]
    fn counter_merge_commutes(a in counter(), l in counter(), r in counter()) {
        prop_assert_eq!(Counter::merge(&a, &l, &r), Counter::merge(&a, &r, &l));
    }

    #[test]
    fn register_merge_commutes(a in register(), l in register(), r in register()) {
        // Equal stamps come from the same write
        prop_assume!(l.stamp != r.stamp || l == r);
        prop_assert_eq!(Register::merge(&a, &l, &r), Register::merge(&a, &r, &l));
    }

    #[test]
    fn merge_is_idempotent(
        (ra, rl) in (register(), register()),
        (sa, sl) in (or_set(), or_set()),
        (ca, cl) in (counter(), counter()),
        (qa, ql) in (sequence(), sequence()),
        (ta, tl) in (text(), text()),
    ) {
        prop_assert_eq!(Register::merge(&ra, &rl, &rl), rl);
        prop_assert_eq!(OrSet::merge(&sa, &sl, &sl), sl);
        // Equal counter deltas are concurrent work and both count
        prop_assert_eq!(Counter::merge(&ca, &ca, &ca), ca);
        prop_assert_eq!(Counter::merge(&ca, &cl, &ca), cl);
        prop_assert_eq!(Sequence::merge(&qa, &ql, &ql), ql);
        prop_assert_eq!(Text::merge(&ta, &tl, &tl), tl);
    }

    #[test]
    fn set_merge_associates(a in or_set(), x in or_set(), y in or_set(), z in or_set()) {
        prop_assert_eq!(
            OrSet::merge(&a, &OrSet::merge(&a, &x, &y), &z),
            OrSet::merge(&a, &x, &OrSet::merge(&a, &y, &z))
        );
    }

    #[test]
    fn counter_merge_associates(a in counter(), x in counter(), y in counter(), z in counter()) {
        prop_assert_eq!(
            Counter::merge(&a, &Counter::merge(&a, &x, &y), &z),
            Counter::merge(&a, &x, &Counter::merge(&a, &y, &z))
        );
    }

    #[test]
    fn register_merge_associates(
        a in register(),
        x in register(),
        y in register(),
        z in register(),
    ) {
        prop_assert_eq!(
            Register::merge(&a, &Register::merge(&a, &x, &y), &z),
            Register::merge(&a, &x, &Register::merge(&a, &y, &z))
        );
    }

    #[test]
    fn fork_merge_direction_does_not_matter(
        base in prop::collection::vec(0i64..6, 0..8),
        x_items in prop::collection::vec(0i64..6, 0..8),
        y_items in prop::collection::vec(0i64..6, 0..8),
        (base_text, x_text, y_text) in (text(), text(), text()),
    ) {
        let schema = Schema::new()
            .with_field("items", MergeStrategy::Sequence)
            .with_field("notes", MergeStrategy::Text);
        let mut repo = Repository::new(schema.clone());
        repo.edit("main", write(&base, &base_text)).unwrap();
        repo.branch("main", "x").unwrap();
        repo.branch("main", "y").unwrap();
        repo.edit("x", write(&x_items, &x_text)).unwrap();
        repo.edit("y", write(&y_items, &y_text)).unwrap();

        let mut mirrored = Repository::from_parts(
            schema,
            repo.commits().cloned().collect(),
            repo.forks().cloned(),
        )
        .unwrap();

        let forward = repo.merge_into("x", "y").unwrap().value.clone();
        let backward = mirrored.merge_into("y", "x").unwrap().value.clone();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn merging_a_contained_fork_changes_nothing(deltas in prop::collection::vec(-5i64..5, 0..6)) {
        let schema = Schema::new().with_field("n", MergeStrategy::Counter);
        let mut repo = Repository::new(schema);
        repo.branch("main", "copy").unwrap();
        for delta in deltas {
            repo.edit("main", |e| e.increment("n", delta).map(|_| ())).unwrap();
        }
        let before = repo.value("main").unwrap().clone();

        let (_, outcome) = repo.merge_into_with_outcome("copy", "main").unwrap();
        prop_assert_eq!(outcome, MergeOutcome::UpToDate);
        prop_assert_eq!(repo.value("main").unwrap(), &before);
    }

    #[test]
    fn set_keeps_one_sided_changes(a in or_set(), added in 16u8..32) {
        // Added on the left only
        let mut left = a.clone();
        left.insert(added);
        prop_assert!(OrSet::merge(&a, &left, &a).contains(&added));

        // Removed on the left only
        if let Some(&gone) = a.iter().next() {
            let mut left = a.clone();
            left.remove(&gone);
            prop_assert!(!OrSet::merge(&a, &left, &a).contains(&gone));
        }
    }

    #[test]
    fn sequence_one_sided_change_wins(a in sequence(), l in sequence()) {
        prop_assert_eq!(Sequence::merge(&a, &l, &a), l.clone());
        prop_assert_eq!(Sequence::merge(&a, &a, &l), l);
    }

    #[test]
    fn commit_clocks_succeed_parents(ops in prop::collection::vec((0usize..3, 0usize..3, 0i64..5), 1..30)) {
        let schema = Schema::new().with_field("n", MergeStrategy::Counter);
        let mut repo = Repository::new(schema);
        let names = ["main", "a", "b"];
        repo.branch("main", "a").unwrap();
        repo.create_fork("b").unwrap();

        for (from, to, delta) in ops {
            if from == to || delta == 0 {
                repo.edit(names[from], |e| e.increment("n", delta).map(|_| ())).unwrap();
            } else {
                repo.merge_into(names[from], names[to]).unwrap();
            }
        }

        for commit in repo.commits() {
            for parent in &commit.parents {
                let parent = repo.graph().commit(parent).unwrap();
                prop_assert!(commit.clock > parent.clock);
            }
        }
    }
}
