// Constraint store behaviour through the public API
use openneb::constraints::{ConstraintError, ConstraintSet, Fragment};
use openneb::geometry::Geometry;
use serde_json::json;

fn chain_of_atoms(n: usize) -> Geometry {
    let coords = (0..n).flat_map(|i| [i as f64 * 1.1, 0.0, 0.0]).collect();
    Geometry::new(vec!["C".to_string(); n], coords)
}

#[test]
fn test_distance_canonicalization_for_all_pairs() {
    for i in 0..6i64 {
        for j in 0..6i64 {
            if i == j {
                continue;
            }
            let mut forward = ConstraintSet::new();
            let mut backward = ConstraintSet::new();
            forward.set_distance(i, j, 1.5).unwrap();
            backward.set_distance(j, i, 1.5).unwrap();
            assert_eq!(forward, backward, "pair ({}, {})", i, j);
            assert_eq!(forward.n_distance(), 1);
        }
    }
}

#[test]
fn test_invalid_distance_values() {
    let mut constraints = ConstraintSet::new();
    for value in [0.0, -1.2, f64::NAN] {
        assert!(matches!(
            constraints.set_distance(0, 1, value),
            Err(ConstraintError::InvalidConstraint(_))
        ));
    }
    constraints.set_distance(2, 2, 1.0).unwrap();
    assert_eq!(constraints.n_distance(), 0);
}

#[test]
fn test_angular_arity_leaves_store_unchanged() {
    let mut constraints = ConstraintSet::new();
    constraints.set_angular(&[0, 1], 90.0).unwrap();
    constraints.set_angular(&[0, 1, 2, 3, 4], 90.0).unwrap();
    assert_eq!(constraints.n_angular(), 0);

    constraints.set_angular(&[0, 1, 2], 109.5).unwrap();
    constraints.set_angular(&[0, 1, 2, 3], 180.0).unwrap();
    assert_eq!(constraints.n_angular(), 2);
}

#[test]
fn test_fragment_entries() {
    let mut constraints = ConstraintSet::new();
    constraints
        .set_fragment(0, &json!({"start": 0, "end": 4, "strategy": "fix"}))
        .unwrap();
    assert!(constraints.set_fragment(1, &json!({"start": 0, "end": 4})).is_err());
    assert!(constraints
        .set_fragment(2, &json!({"atom_idxs": [1, 2], "start": 0, "end": 4, "strategy": "fix"}))
        .is_err());
    assert_eq!(constraints.n_fragments(), 1);

    constraints.insert_fragment(3, Fragment::atom_list(vec![7, 9], "relax"));
    assert_eq!(constraints.n_fragments(), 2);
}

#[test]
fn test_verify_against_molecule() {
    let mut constraints = ConstraintSet::new();
    constraints
        .set_fragment(0, &json!({"atom_idxs": [0, 3, 5], "strategy": "fix"}))
        .unwrap();
    assert!(constraints.verify(&chain_of_atoms(6)).is_ok());
    assert!(constraints.verify(&chain_of_atoms(5)).is_err());
}

#[test]
fn test_copy_then_mutate() {
    let mut original = ConstraintSet::new();
    original.set_distance(0, 1, 1.2).unwrap();
    original.set_cartesian(&[3]).unwrap();

    let mut copy = original.clone();
    copy.set_distance(0, 1, 2.0).unwrap();
    copy.add_cartesian(&[4]).unwrap();
    copy.clear_angular();

    assert_eq!(original.distance().get(0, 1), Some(1.2));
    assert_eq!(original.cartesian(), vec![3]);
}

#[test]
fn test_fixed_fragment_atoms_are_frozen() {
    let mut constraints = ConstraintSet::new();
    constraints.set_cartesian(&[8]).unwrap();
    constraints
        .set_fragment(0, &json!({"start": 1, "end": 3, "strategy": "fix"}))
        .unwrap();
    constraints
        .set_fragment(1, &json!({"atom_idxs": [5], "strategy": "relax"}))
        .unwrap();

    let frozen: Vec<usize> = constraints.frozen_atoms().into_iter().collect();
    assert_eq!(frozen, vec![1, 2, 3, 8]);
}
