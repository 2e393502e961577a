//! Merge algebra over generated graphs.
//!
//! Synthetic merge links differ by grouping, so associativity is asserted on
//! the linearized action order, which is what replicas actually observe.

use proptest::prelude::*;

use coterie::core::{sequence, HashGraph, LinkHash, NullResolver};
use coterie_testkit::generators::{divergent_pair, divergent_trio, graph};

fn actions(g: &HashGraph) -> Vec<LinkHash> {
    sequence(g, &NullResolver)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_merge_commutative((a, b) in divergent_pair(5)) {
        let ab = a.merge(&b).unwrap();
        let ba = b.merge(&a).unwrap();
        prop_assert_eq!(ab.head(), ba.head());
        prop_assert_eq!(ab.links(), ba.links());
    }

    #[test]
    fn test_merge_idempotent(g in graph(6)) {
        let merged = g.merge(&g).unwrap();
        prop_assert_eq!(merged.head(), g.head());
        prop_assert_eq!(merged.len(), g.len());
    }

    #[test]
    fn test_merge_associative_in_actions((a, b, c) in divergent_trio(4)) {
        let left = a.merge(&b).unwrap().merge(&c).unwrap();
        let right = a.merge(&b.merge(&c).unwrap()).unwrap();
        prop_assert_eq!(actions(&left), actions(&right));
    }

    #[test]
    fn test_any_merge_path_converges((a, b, c) in divergent_trio(4)) {
        let path1 = a.merge(&b).unwrap().merge(&c).unwrap();
        let path2 = c.merge(&a).unwrap().merge(&b).unwrap();
        let path3 = b.merge(&c).unwrap().merge(&a).unwrap();
        prop_assert_eq!(actions(&path1), actions(&path2));
        prop_assert_eq!(actions(&path2), actions(&path3));
    }
}
