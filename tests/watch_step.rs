// tests/watch_step.rs

use std::collections::BTreeSet;

use proptest::prelude::*;

use assayer::errors::AssayerError;
use assayer::types::{ArtifactRef, KnownSet};
use assayer::watch::{WatchConfig, WatchState, forget_undispatched, plan_tick};
use assayer_test_utils::builders::WatchConfigBuilder;

fn config() -> WatchConfig {
    WatchConfigBuilder::new("ckpt").build()
}

fn set(items: &[&str]) -> KnownSet {
    items.iter().copied().collect()
}

fn dispatched(plan: &assayer::watch::TickPlan) -> BTreeSet<String> {
    plan.new_artifacts().map(|a| a.as_str().to_string()).collect()
}

#[test]
fn identical_scans_dispatch_nothing() {
    let cfg = config();
    let state = WatchState::new(cfg.stream_id(), set(&["ckpt/a.pt", "ckpt/b.pt"]));

    let plan = plan_tick(&state, &cfg, Ok(set(&["ckpt/a.pt", "ckpt/b.pt"])));

    assert!(plan.dispatch.is_empty());
    assert_eq!(plan.next.known, state.known);
    assert_eq!(plan.next.tick, 1);
    assert!(plan.scan_error.is_none());
}

#[test]
fn additions_and_removals_follow_the_directory() {
    let cfg = config();
    let state = WatchState::new(cfg.stream_id(), set(&["a", "b"]));

    // Add c.
    let plan = plan_tick(&state, &cfg, Ok(set(&["a", "b", "c"])));
    assert_eq!(dispatched(&plan), BTreeSet::from(["c".to_string()]));
    assert_eq!(plan.next.known, set(&["a", "b", "c"]));
    for job in &plan.dispatch {
        assert_eq!(job.evaluator, cfg.evaluator);
    }

    // Remove b, add d.
    let plan = plan_tick(&plan.next, &cfg, Ok(set(&["a", "c", "d"])));
    assert_eq!(dispatched(&plan), BTreeSet::from(["d".to_string()]));
    assert_eq!(plan.next.known, set(&["a", "c", "d"]));
    assert_eq!(plan.next.tick, 2);
}

#[test]
fn reappearing_artifact_counts_as_new() {
    let cfg = config();
    let state = WatchState::new(cfg.stream_id(), set(&["a"]));

    let gone = plan_tick(&state, &cfg, Ok(set(&[])));
    assert!(gone.dispatch.is_empty());
    assert!(gone.next.known.is_empty());

    let back = plan_tick(&gone.next, &cfg, Ok(set(&["a"])));
    assert_eq!(dispatched(&back), BTreeSet::from(["a".to_string()]));
}

#[test]
fn failed_scan_keeps_known_and_dispatches_nothing() {
    let cfg = config();
    let state = WatchState::new(cfg.stream_id(), set(&["a", "b"]));

    let plan = plan_tick(
        &state,
        &cfg,
        Err(AssayerError::ScanFailed {
            directory: "ckpt".to_string(),
            reason: "permission denied".to_string(),
        }),
    );

    assert!(plan.dispatch.is_empty());
    assert_eq!(plan.next.known, state.known);
    assert_eq!(plan.next.tick, 1);
    assert_eq!(plan.scan_error.as_deref(), Some("permission denied"));
}

#[test]
fn undispatched_artifacts_are_forgotten() {
    let cfg = config();
    let state = WatchState::new(cfg.stream_id(), set(&["a"]));
    let mut plan = plan_tick(&state, &cfg, Ok(set(&["a", "b", "c"])));

    forget_undispatched(&mut plan.next, &[ArtifactRef::from("c")]);

    assert_eq!(plan.next.known, set(&["a", "b"]));
    let retry = plan_tick(&plan.next, &cfg, Ok(set(&["a", "b", "c"])));
    assert_eq!(dispatched(&retry), BTreeSet::from(["c".to_string()]));
}

fn scans_strategy() -> impl Strategy<Value = Vec<BTreeSet<u8>>> {
    proptest::collection::vec(proptest::collection::btree_set(0u8..16, 0..10), 1..8)
}

fn to_known(names: &BTreeSet<u8>) -> KnownSet {
    names
        .iter()
        .map(|n| ArtifactRef::new(format!("ckpt/{n}.pt")))
        .collect()
}

proptest! {
    /// Over any sequence of scans, tick i dispatches exactly S_i \ S_{i-1}
    /// and hands S_i to its successor.
    #[test]
    fn dispatch_is_set_difference(initial in proptest::collection::btree_set(0u8..16, 0..10), scans in scans_strategy()) {
        let cfg = config();
        let mut state = WatchState::new(cfg.stream_id(), to_known(&initial));
        let mut previous = initial;

        for (i, scan) in scans.iter().enumerate() {
            let plan = plan_tick(&state, &cfg, Ok(to_known(scan)));

            let expected: BTreeSet<ArtifactRef> = scan
                .difference(&previous)
                .map(|n| ArtifactRef::new(format!("ckpt/{n}.pt")))
                .collect();
            let actual: BTreeSet<ArtifactRef> = plan.new_artifacts().cloned().collect();

            prop_assert_eq!(actual.len(), plan.dispatch.len(), "no duplicate jobs within a tick");
            prop_assert_eq!(actual, expected);
            prop_assert_eq!(&plan.next.known, &to_known(scan));
            prop_assert_eq!(plan.next.tick, i as u64 + 1);

            state = plan.next;
            previous = scan.clone();
        }
    }
}
