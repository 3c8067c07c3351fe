//! Identifier properties over arbitrary build sequences

use proptest::prelude::*;
use std::collections::HashSet;
use trellis_kernel::prelude::*;

proptest! {
    #[test]
    fn prop_ids_unique_within_scenario(
        names in prop::collection::vec(prop::option::of("[a-d]{1,2}"), 1..40)
    ) {
        let mut h = Harness::new();
        let root = h.create_scenario(None, true);
        let mut seen = HashSet::new();
        let mut used_names = HashSet::new();
        seen.insert(h.node_id(root).unwrap());

        for name in &names {
            match h.add_test_case(root, name.as_deref(), true) {
                Ok(node) => {
                    let id = h.node_id(node).unwrap();
                    prop_assert!(seen.insert(id), "id {} issued twice", id);
                    if let Some(name) = name {
                        prop_assert!(used_names.insert(name.clone()));
                        prop_assert_eq!(id, NodeId::from_name(name));
                    }
                }
                Err(ScenarioError::DuplicateIdentifier(id)) => {
                    let name = name.as_deref().unwrap();
                    prop_assert!(used_names.contains(name));
                    prop_assert_eq!(id, NodeId::from_name(name));
                }
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }

        prop_assert_eq!(h.list_of_tci(root).unwrap().len(), seen.len() - 1);
    }

    #[test]
    fn prop_auto_ids_above_base(count in 1usize..200) {
        let mut h = Harness::new();
        let root = h.create_scenario(None, true);

        for _ in 0..count {
            let node = h.add_group(root, None, false).unwrap();
            prop_assert!(h.node_id(node).unwrap().0 > AUTO_ID_BASE);
        }
    }

    #[test]
    fn prop_named_ids_below_base(name in "\\PC{1,32}") {
        prop_assert!(NodeId::from_name(&name).0 < AUTO_ID_BASE);
        prop_assert!(!NodeId::from_name(&name).is_auto());
    }
}
