//! Model-based property tests for `PersistentMap` and `PersistentLabeledMap`.

use cellstore_core::{PersistentLabeledMap, PersistentMap};
use cellstore_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn map_matches_model(ops in map_ops_strategy(40)) {
        let fixture = TempRoot::new("map");
        {
            let mut harness = MapHarness::new(fixture.root(), fast_exclusive());
            for op in &ops {
                harness.apply(op);
            }
            harness.check();

            let len = harness.map.len().unwrap();
            prop_assert_eq!(fixture.files_with("__DICTIONARYVALUE_").len(), len);
        }

        // Same contents after reopening.
        let mut model = MapModel::default();
        for op in &ops {
            model.apply(op);
        }
        let map: PersistentMap<String, i32> = PersistentMap::open(fixture.root(), fast_exclusive()).unwrap();
        prop_assert_eq!(map.entries().unwrap(), model.entries());
    }

    #[test]
    fn labeled_map_matches_model(ops in map_ops_strategy(40)) {
        let fixture = TempRoot::new("labels");
        let mut harness = LabeledHarness::new(fixture.root(), fast_shared());
        for op in &ops {
            harness.apply(op);
        }
        harness.check();
        let len = harness.map.len().unwrap();
        prop_assert_eq!(fixture.files_with("__DICTIONARYMEMBER_").len(), len);
    }

    #[test]
    fn labeled_keys_survive_reopen(keys in prop::collection::hash_set(labeled_key_strategy(), 1..8)) {
        let fixture = TempRoot::new("labels");
        let keys: Vec<String> = keys.into_iter().collect();
        {
            let mut map = PersistentLabeledMap::open(fixture.root(), fast_exclusive()).unwrap();
            for (i, key) in keys.iter().enumerate() {
                map.put(key, &(i as u32)).unwrap();
            }
        }

        let map: PersistentLabeledMap<u32> = PersistentLabeledMap::open(fixture.root(), fast_exclusive()).unwrap();
        prop_assert_eq!(map.keys().unwrap(), keys.clone());
        for (i, key) in keys.iter().enumerate() {
            prop_assert_eq!(map.get(key).unwrap(), i as u32);
        }
    }
}
