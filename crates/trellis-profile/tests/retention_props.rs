use proptest::prelude::*;
use trellis_profile::ProfileLog;

proptest! {
    #[test]
    fn prop_log_never_exceeds_capacity_and_stays_sorted(
        capacity in 0..8usize,
        inserts in proptest::collection::vec((any::<i32>(), any::<bool>()), 0..64)
    ) {
        let mut log = ProfileLog::new(capacity);

        for (ticks, force) in inserts {
            let _ = log.add_log(i64::from(ticks), ticks.to_string(), force);

            prop_assert!(log.len() <= capacity);
            let ticks: Vec<i64> = log.entries().map(|e| e.ticks).collect();
            prop_assert!(ticks.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn prop_unforced_log_keeps_the_largest(
        values in proptest::collection::vec(any::<i32>(), 1..64)
    ) {
        let capacity = 4;
        let mut log = ProfileLog::new(capacity);
        for v in &values {
            let _ = log.add_log(i64::from(*v), v.to_string(), false);
        }

        let mut expected: Vec<i64> = values.iter().map(|v| i64::from(*v)).collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        expected.truncate(capacity);

        let kept: Vec<i64> = log.entries().map(|e| e.ticks).collect();
        prop_assert_eq!(kept, expected);
    }
}

#[test]
fn test_dump_after_forced_eviction_matches_documented_sequence() {
    let mut log = ProfileLog::new(2);
    for t in [10, 30, 20] {
        log.add_log(t, format!("{t} entry"), false);
    }
    assert!(!log.add_log(5, "5 entry", false));
    assert!(log.add_log(5, "5 entry", true));

    let mut sink = Vec::new();
    assert_eq!(log.dump(&mut sink).unwrap(), 2);
    assert_eq!(String::from_utf8(sink).unwrap(), "30 entry\n5 entry\n");
}
