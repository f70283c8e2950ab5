mod common;

use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::SliceRandom;

use teamlink_sync::Timeline;

use common::{assert_sorted_unique, message};

/// Pages, overlapping pages and pushes in random order always leave one
/// entry per id, newest first.
#[test]
fn shuffled_deliveries_keep_order_and_dedup() {
    let mut rng = rand::rng();
    for _ in 0..200 {
        let mut deliveries: Vec<Vec<i64>> = Vec::new();
        let mut expected = BTreeSet::new();
        for _ in 0..rng.random_range(1..8) {
            let start: i64 = rng.random_range(1..200);
            let len: i64 = rng.random_range(0..40);
            let batch: Vec<i64> = (start..start + len).collect();
            expected.extend(batch.iter().copied());
            deliveries.push(batch);
        }
        for _ in 0..rng.random_range(0..20) {
            let seq: i64 = rng.random_range(1..260);
            expected.insert(seq);
            deliveries.push(vec![seq]);
        }
        deliveries.shuffle(&mut rng);

        let mut timeline = Timeline::new();
        for batch in deliveries {
            if batch.len() == 1 && rng.random_bool(0.5) {
                timeline.insert(message(1, batch[0]));
            } else {
                timeline.merge_batch(batch.into_iter().rev().map(|s| message(1, s)));
            }
        }

        let seqs = timeline.seqs();
        assert_sorted_unique(&seqs);
        let want: Vec<i64> = expected.into_iter().rev().collect();
        assert_eq!(seqs, want);
    }
}

#[test]
fn merge_reports_only_new_ids() {
    let mut timeline = Timeline::new();
    let first = timeline.merge_batch((100..=120).rev().map(|s| message(1, s)));
    assert_eq!(first.len(), 21);

    let mut again = timeline.merge_batch((110..=125).rev().map(|s| message(1, s)));
    again.sort();
    assert_eq!(again, vec![121, 122, 123, 124, 125]);
    assert_eq!(timeline.len(), 26);
}

#[test]
fn placeholders_trail_server_messages() {
    let mut timeline = Timeline::new();
    timeline.merge_batch((1..=3).map(|s| message(1, s)));
    timeline.insert(message(1, -1_700_000_000_000));
    timeline.insert(message(1, -1_700_000_000_001));
    timeline.insert(message(1, 4));

    assert_eq!(
        timeline.seqs(),
        vec![4, 3, 2, 1, -1_700_000_000_000, -1_700_000_000_001]
    );
    assert_eq!(timeline.newest_seq(), Some(4));
    assert_eq!(timeline.optimistic().len(), 2);
}
