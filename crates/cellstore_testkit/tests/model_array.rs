//! Model-based property tests for `PersistentArray`.

use cellstore_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn exclusive_array_matches_model(ops in array_ops_strategy(60)) {
        let fixture = TempRoot::new("items");
        let mut harness = ArrayHarness::new(fixture.root(), fast_exclusive());

        for op in &ops {
            harness.apply(op);
            harness.check();
        }
        harness.reopen();

        // Exactly one member file per element: no leaks, no gaps.
        prop_assert_eq!(fixture.files_with("__ARRAYMEMBER_").len(), harness.model().len());
    }

    #[test]
    fn shared_array_matches_model(ops in array_ops_strategy(30)) {
        let fixture = TempRoot::new("items");
        let mut harness = ArrayHarness::new(fixture.root(), fast_shared());

        for op in &ops {
            harness.apply(op);
        }
        harness.check();
        harness.reopen();
        prop_assert_eq!(fixture.files_with("__ARRAYMEMBER_").len(), harness.model().len());
    }
}

#[test]
fn front_heavy_workload_stays_consistent() {
    let fixture = TempRoot::new("deque");
    let mut harness = ArrayHarness::new(fixture.root(), fast_exclusive());

    for i in 0..200 {
        harness.apply(&ArrayOp::PushFront(i));
        if i % 3 == 0 {
            harness.apply(&ArrayOp::Pop);
        }
    }
    harness.check();
    let stats = harness.array().stats();
    assert!(stats.reindexes > 0);
    harness.reopen();
}
