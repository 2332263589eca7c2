//! Property-based tests for the status-history invariants.

mod common;

use proptest::prelude::*;

use transport_tracker::status::record::{LocationFix, StatusRecord, encode_history};
use transport_tracker::status::store::StatusStore;
use transport_tracker::tracker::controller::{FixOutcome, is_stationary};

use common::{ENTITY, NOW, REMOTE_PATH, creds, rig};

// ──────────────────── strategies ────────────────────

fn arb_position() -> impl Strategy<Value = (f64, f64)> {
    (-60.0f64..60.0, -170.0f64..170.0)
}

fn arb_record() -> impl Strategy<Value = StatusRecord> {
    (arb_position(), 0i64..NOW, 0.0f64..=100.0)
        .prop_map(|((lat, lng), time, power)| StatusRecord::new(lat, lng, time, power))
}

/// History whose two latest records share `head`, plus arbitrary older ones.
fn arb_parked_history() -> impl Strategy<Value = Vec<StatusRecord>> {
    (arb_position(), prop::collection::vec(arb_record(), 0..6)).prop_map(|((lat, lng), older)| {
        let mut history = vec![
            StatusRecord::new(lat, lng, NOW - 1_000, 80.0),
            StatusRecord::new(lat, lng, NOW - 2_000, 81.0),
        ];
        history.extend(older);
        history
    })
}

/// Offset of a few meters at most.
fn arb_jitter() -> impl Strategy<Value = (f64, f64)> {
    (-0.00003f64..0.00003, -0.00003f64..0.00003)
}

fn started_rig_with(history: &[StatusRecord]) -> common::Rig {
    let mut rig = rig();
    rig.store
        .seed(REMOTE_PATH, encode_history(history).unwrap());
    rig.controller.start(ENTITY, &creds()).unwrap();
    rig
}

// ──────────────────── controller ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// A fix near both latest records replaces the head and nothing else.
    #[test]
    fn stationary_fix_never_grows_history(
        history in arb_parked_history(),
        (dlat, dlng) in arb_jitter(),
    ) {
        let mut rig = started_rig_with(&history);
        let (lat, lng) = history[0].position();
        let fix = LocationFix::new(lat + dlat, lng + dlng, NOW);

        let outcome = rig.controller.on_location_fix(fix).unwrap();
        let is_merge = matches!(outcome, FixOutcome::Merged { .. });
        prop_assert!(is_merge, "expected merge, got {:?}", outcome);

        let after = rig.controller.history().unwrap().to_vec();
        prop_assert_eq!(after.len(), history.len());
        prop_assert_eq!(after[0].position(), (lat + dlat, lng + dlng));
        prop_assert_eq!(&after[1..], &history[1..]);
    }

    /// With fewer than two records every fix grows the history.
    #[test]
    fn short_history_always_appends(
        history in prop::collection::vec(arb_record(), 0..2),
        (lat, lng) in arb_position(),
        copy_head in any::<bool>(),
    ) {
        let mut rig = started_rig_with(&history);
        let position = match history.first() {
            Some(head) if copy_head => head.position(),
            _ => (lat, lng),
        };
        let fix = LocationFix::new(position.0, position.1, NOW);

        let outcome = rig.controller.on_location_fix(fix).unwrap();
        let is_append = matches!(outcome, FixOutcome::Appended { evicted: 0, .. });
        prop_assert!(is_append, "expected append, got {:?}", outcome);
        prop_assert_eq!(rig.controller.history().unwrap().len(), history.len() + 1);
    }

    /// At the quiet hour nothing is recorded and a restart is armed.
    #[test]
    fn quiet_hour_records_nothing(
        history in prop::collection::vec(arb_record(), 0..6),
        (lat, lng) in arb_position(),
    ) {
        use transport_tracker::sync::scheduler::DeferredTaskScheduler;

        let mut rig = started_rig_with(&history);
        rig.clock.set_hour(2);
        let outcome = rig
            .controller
            .on_location_fix(LocationFix::new(lat, lng, NOW))
            .unwrap();
        let is_quiet = matches!(outcome, FixOutcome::QuietHours { job: Some(_) });
        prop_assert!(is_quiet, "expected quiet hours, got {:?}", outcome);
        prop_assert!(rig.store.writes().is_empty());
        let pending = rig.scheduler.pending().unwrap();
        prop_assert_eq!(pending.len(), 1);
        prop_assert_eq!(pending[0].not_before_ms, NOW + 4 * 3_600_000);
    }
}

// ──────────────────── store ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The bound holds after every prepend, including right after it shrinks.
    #[test]
    fn prepend_respects_current_bound(
        ops in prop::collection::vec((arb_record(), 0usize..8), 1..40)
    ) {
        let mut store = StatusStore::new();
        store.load(Vec::new()).unwrap();
        for (record, max_len) in ops {
            let before = store.len();
            let evicted = store.prepend_and_evict(record, max_len);
            prop_assert!(store.len() <= max_len.max(1));
            prop_assert_eq!(store.len(), before + 1 - evicted);
            prop_assert_eq!(store.peek(0), Some(&record));
        }
    }

    /// Out-of-range peeks report absence and leave the history alone.
    #[test]
    fn peek_out_of_range_is_absent_and_pure(
        history in prop::collection::vec(arb_record(), 0..10),
        extra in 0usize..100,
    ) {
        let mut store = StatusStore::new();
        store.load(history.clone()).unwrap();
        let before = store.clone();
        prop_assert!(store.peek(history.len() + extra).is_none());
        prop_assert_eq!(store, before);
    }

    /// Merge detection needs both latest records within the threshold.
    #[test]
    fn stationary_requires_both_latest_records(
        history in prop::collection::vec(arb_record(), 0..6),
        candidate in arb_record(),
        threshold in 0.0f64..50_000.0,
    ) {
        let mut store = StatusStore::new();
        store.load(history.clone()).unwrap();
        let near = |r: &StatusRecord| {
            transport_tracker::status::geo::distance_m(r.position(), candidate.position()) < threshold
        };
        let expected = history.len() >= 2 && near(&history[0]) && near(&history[1]);
        prop_assert_eq!(is_stationary(&store, &candidate, threshold), expected);
    }
}
