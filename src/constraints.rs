//! Canonical, validated storage of geometric constraints.
//!
//! A [`ConstraintSet`] groups four independent kinds of constraint, all keyed
//! on zero-based atom indices:
//!
//! - **Distance** ([`DistanceConstraints`]): unordered atom pair → target
//!   distance in Angstrom. Keys are stored sorted, so `(i, j)` and `(j, i)`
//!   address the same entry.
//! - **Angular** ([`AngularConstraints`]): ordered 3-tuple (angle) or 4-tuple
//!   (dihedral) → target in degrees. Order is preserved because it fixes the
//!   sign of a dihedral.
//! - **Cartesian**: set of atoms whose positions are frozen.
//! - **Fragment** ([`FragmentConstraints`]): fragment id → either a contiguous
//!   inclusive block `{start, end, strategy}` or an explicit
//!   `{atom_idxs, strategy}` list.
//!
//! Validation happens at the mutation boundary. Malformed input fails with
//! [`ConstraintError::InvalidConstraint`]; a distance or angular key with the
//! wrong number of unique atoms is logged and dropped without touching the
//! store. Atom indices are only checked against a molecule when
//! [`ConstraintSet::verify`] is called.
//!
//! # Examples
//!
//! ```
//! use openneb::constraints::ConstraintSet;
//!
//! let mut constraints = ConstraintSet::new();
//! constraints.set_distance(3, 1, 1.5).unwrap();
//! assert_eq!(constraints.distance().get(1, 3), Some(1.5));
//!
//! // Wrong arity is dropped, not stored
//! constraints.set_angular(&[0, 1], 90.0).unwrap();
//! assert_eq!(constraints.n_angular(), 0);
//! ```

use crate::geometry::Geometry;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Error raised for malformed constraint keys or values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintError {
    /// The key or value cannot describe a valid constraint
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),
}

type Result<T> = std::result::Result<T, ConstraintError>;

fn invalid(msg: impl Into<String>) -> ConstraintError {
    ConstraintError::InvalidConstraint(msg.into())
}

fn non_negative(atoms: &[i64], kind: &str) -> Result<Vec<usize>> {
    atoms
        .iter()
        .map(|&idx| {
            usize::try_from(idx).map_err(|_| {
                invalid(format!(
                    "{} constraint key must contain atom indexes but had {:?} which cannot be valid (<0)",
                    kind, atoms
                ))
            })
        })
        .collect()
}

fn n_unique(atoms: &[i64]) -> usize {
    atoms.iter().collect::<BTreeSet<_>>().len()
}

/// Distance constraints keyed on a sorted atom pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceConstraints {
    store: BTreeMap<(usize, usize), f64>,
}

impl DistanceConstraints {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target distance (Angstrom) between two atoms.
    ///
    /// A key that is not a pair of two distinct atoms is logged and ignored.
    /// A non-positive or non-finite distance, or a negative index, is an error.
    pub fn set(&mut self, atoms: &[i64], value: f64) -> Result<()> {
        if atoms.len() != 2 || n_unique(atoms) != 2 {
            error!(
                "Tried to set a distance constraint with a key: {:?}. Must be a unique pair of atom indexes",
                atoms
            );
            return Ok(());
        }
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid(format!(
                "distance constraint on {:?} must be a positive finite distance, got {}",
                atoms, value
            )));
        }
        let idxs = non_negative(atoms, "Distance")?;
        self.store.insert(Self::key(idxs[0], idxs[1]), value);
        Ok(())
    }

    fn key(i: usize, j: usize) -> (usize, usize) {
        (i.min(j), i.max(j))
    }

    /// Target distance for a pair, in either order.
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.store.get(&Self::key(i, j)).copied()
    }

    /// Removes a pair, in either order, returning its target.
    pub fn remove(&mut self, i: usize, j: usize) -> Option<f64> {
        self.store.remove(&Self::key(i, j))
    }

    /// Iterates over `((i, j), distance)` with `i < j`.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.store.iter().map(|(k, v)| (*k, *v))
    }

    /// Number of constrained pairs.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Removes every pair.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Merges `other` into `self`; colliding keys take `other`'s value.
    pub fn update(&mut self, other: &DistanceConstraints) {
        self.store.extend(other.iter());
    }
}

/// Angle (3 atoms) and dihedral (4 atoms) constraints, in degrees.
///
/// Keys keep the order they were given in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngularConstraints {
    store: BTreeMap<Vec<usize>, f64>,
}

impl AngularConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an angle or dihedral target in degrees.
    ///
    /// A key that is not 3 or 4 distinct atoms is logged and ignored.
    pub fn set(&mut self, atoms: &[i64], degrees: f64) -> Result<()> {
        let unique = n_unique(atoms);
        if unique != atoms.len() || !(3..=4).contains(&unique) {
            error!(
                "Tried to set an angular/dihedral constraint with a key: {:?}. Must be a unique tuple of 3 or 4 atom indexes",
                atoms
            );
            return Ok(());
        }
        if !degrees.is_finite() {
            return Err(invalid(format!(
                "angular constraint on {:?} must be finite, got {}",
                atoms, degrees
            )));
        }
        let idxs = non_negative(atoms, "Angular")?;
        self.store.insert(idxs, degrees);
        Ok(())
    }

    pub fn get(&self, atoms: &[usize]) -> Option<f64> {
        self.store.get(atoms).copied()
    }

    pub fn remove(&mut self, atoms: &[usize]) -> Option<f64> {
        self.store.remove(atoms)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[usize], f64)> + '_ {
        self.store.iter().map(|(k, v)| (k.as_slice(), *v))
    }

    /// Number of constrained angles and dihedrals.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Merges `other` into `self`; colliding keys take `other`'s value.
    pub fn update(&mut self, other: &AngularConstraints) {
        for (k, v) in other.store.iter() {
            self.store.insert(k.clone(), *v);
        }
    }
}

/// How a fragment selects its atoms. Recorded per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentKind {
    /// Contiguous inclusive range of atom indices
    Block {
        /// First atom of the block
        start: usize,
        /// Last atom of the block (inclusive)
        end: usize,
    },
    /// Explicit list of atom indices
    AtomIdxs(Vec<usize>),
}

/// A single fragment constraint with its relaxation strategy.
///
/// The strategy is an open set of strings (`"fix"`, `"relax"`, ...); only
/// `"fix"` has meaning to the band, where it freezes every atom of the fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub strategy: String,
}

impl Fragment {
    /// Block fragment covering `start..=end`.
    pub fn block(start: usize, end: usize, strategy: impl Into<String>) -> Result<Self> {
        if start > end {
            return Err(invalid(format!(
                "fragment block start ({}) must not exceed end ({})",
                start, end
            )));
        }
        Ok(Self {
            kind: FragmentKind::Block { start, end },
            strategy: strategy.into(),
        })
    }

    /// Fragment over an explicit list of atoms.
    pub fn atom_list(atom_idxs: Vec<usize>, strategy: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::AtomIdxs(atom_idxs),
            strategy: strategy.into(),
        }
    }

    /// Parses a loosely-typed fragment description.
    ///
    /// Accepts either `{"start": int, "end": int, "strategy": str}` or
    /// `{"atom_idxs": [int, ...], "strategy": str}`. Mixing the two styles,
    /// omitting the strategy or using non-integer indices is an error.
    ///
    /// ```
    /// use openneb::constraints::Fragment;
    /// use serde_json::json;
    ///
    /// assert!(Fragment::from_value(&json!({"start": 0, "end": 4, "strategy": "fix"})).is_ok());
    /// assert!(Fragment::from_value(&json!({"start": 0, "end": 4})).is_err());
    /// ```
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| invalid(format!("fragment value must be an object, not {}", value)))?;

        let has_block = map.contains_key("start") || map.contains_key("end");
        let has_list = map.contains_key("atom_idxs");
        if has_block && has_list {
            return Err(invalid(
                "fragment must use either 'start'/'end' or 'atom_idxs', not both",
            ));
        }

        let strategy = match map.get("strategy") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(invalid(format!(
                    "fragment key 'strategy' must be a string, got {}",
                    other
                )))
            }
            None => {
                return Err(invalid(
                    "fragment must have keys 'start', 'end', 'strategy' or 'atom_idxs', 'strategy'",
                ))
            }
        };

        if has_block {
            let bound = |name: &str| -> Result<usize> {
                map.get(name)
                    .and_then(Value::as_u64)
                    .map(|v| v as usize)
                    .ok_or_else(|| {
                        invalid(format!(
                            "fragment key '{}' must be a non-negative integer",
                            name
                        ))
                    })
            };
            return Fragment::block(bound("start")?, bound("end")?, strategy);
        }

        if let Some(list) = map.get("atom_idxs") {
            let items = list
                .as_array()
                .ok_or_else(|| invalid("fragment key 'atom_idxs' must be a list of integers"))?;
            let idxs = items
                .iter()
                .map(|v| {
                    v.as_u64().map(|i| i as usize).ok_or_else(|| {
                        invalid("fragment key 'atom_idxs' must be a list of non-negative integers")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Fragment::atom_list(idxs, strategy));
        }

        Err(invalid(
            "fragment must have keys 'start', 'end', 'strategy' or 'atom_idxs', 'strategy'",
        ))
    }

    /// All atoms covered by the fragment.
    pub fn atoms(&self) -> Vec<usize> {
        match &self.kind {
            FragmentKind::Block { start, end } => (*start..=*end).collect(),
            FragmentKind::AtomIdxs(idxs) => idxs.clone(),
        }
    }

    /// Highest atom index referenced, `None` for an empty atom list.
    pub fn max_atom_idx(&self) -> Option<usize> {
        match &self.kind {
            FragmentKind::Block { end, .. } => Some(*end),
            FragmentKind::AtomIdxs(idxs) => idxs.iter().copied().max(),
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.strategy == "fix"
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FragmentKind::Block { start, end } => write!(
                f,
                "{{start: {}, end: {}, strategy: {}}}",
                start, end, self.strategy
            ),
            FragmentKind::AtomIdxs(idxs) => {
                write!(f, "{{atom_idxs: {:?}, strategy: {}}}", idxs, self.strategy)
            }
        }
    }
}

/// Fragment constraints keyed on an integer fragment id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentConstraints {
    store: BTreeMap<i64, Fragment>,
}

impl FragmentConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a loosely-typed description and stores it under `id`.
    pub fn set(&mut self, id: i64, value: &Value) -> Result<()> {
        let fragment = Fragment::from_value(value)?;
        self.store.insert(id, fragment);
        Ok(())
    }

    pub fn insert(&mut self, id: i64, fragment: Fragment) {
        self.store.insert(id, fragment);
    }

    pub fn get(&self, id: i64) -> Option<&Fragment> {
        self.store.get(&id)
    }

    pub fn remove(&mut self, id: i64) -> Option<Fragment> {
        self.store.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &Fragment)> + '_ {
        self.store.iter().map(|(k, v)| (*k, v))
    }

    /// Number of fragments.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Removes every fragment.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Copies every fragment of `other`, overwriting shared ids.
    pub fn update(&mut self, other: &FragmentConstraints) {
        for (id, fragment) in other.iter() {
            self.store.insert(id, fragment.clone());
        }
    }

    /// Highest atom index referenced by any fragment.
    pub fn max_atom_idx(&self) -> Option<usize> {
        self.store.values().filter_map(Fragment::max_atom_idx).max()
    }
}

impl fmt::Display for FragmentConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Fragments()");
        }
        writeln!(f, "Fragments(")?;
        for (id, fragment) in self.iter() {
            writeln!(f, "  Fragment {}: {}", id, fragment)?;
        }
        write!(f, ")")
    }
}

/// Difference between a constraint's target and its value in a geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDeviation {
    /// Atoms the constraint acts on, in stored order
    pub atoms: Vec<usize>,
    /// Target value (Angstrom or degrees)
    pub target: f64,
    /// Value measured in the geometry
    pub current: f64,
}

impl ConstraintDeviation {
    /// Signed deviation `current - target`. Dihedral differences are wrapped
    /// into (-180, 180].
    pub fn deviation(&self) -> f64 {
        let diff = self.current - self.target;
        if self.atoms.len() == 4 {
            let wrapped = (diff + 180.0).rem_euclid(360.0) - 180.0;
            if wrapped == -180.0 {
                180.0
            } else {
                wrapped
            }
        } else {
            diff
        }
    }
}

/// All constraints applied to one molecule.
///
/// The set is built by the caller before a band run and is only read during
/// the run. `Clone` yields a fully independent copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    distance: DistanceConstraints,
    angular: AngularConstraints,
    cartesian: BTreeSet<usize>,
    fragments: FragmentConstraints,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a distance constraint between atoms `i` and `j` in Angstrom.
    pub fn set_distance(&mut self, i: i64, j: i64, value: f64) -> Result<()> {
        self.distance.set(&[i, j], value)
    }

    /// Sets an angle (3 atoms) or dihedral (4 atoms) constraint in degrees.
    pub fn set_angular(&mut self, atoms: &[i64], degrees: f64) -> Result<()> {
        self.angular.set(atoms, degrees)
    }

    /// Replaces the Cartesian constraints with `atoms`.
    pub fn set_cartesian(&mut self, atoms: &[i64]) -> Result<()> {
        self.cartesian = non_negative(atoms, "Cartesian")?.into_iter().collect();
        Ok(())
    }

    /// Adds atoms to the Cartesian constraints.
    pub fn add_cartesian(&mut self, atoms: &[i64]) -> Result<()> {
        let idxs = non_negative(atoms, "Cartesian")?;
        self.cartesian.extend(idxs);
        Ok(())
    }

    /// Validates and stores a fragment described as a JSON-like object.
    pub fn set_fragment(&mut self, id: i64, value: &Value) -> Result<()> {
        self.fragments.set(id, value)
    }

    pub fn insert_fragment(&mut self, id: i64, fragment: Fragment) {
        self.fragments.insert(id, fragment);
    }

    /// Replaces all distance constraints. On error nothing is changed.
    pub fn set_distances(&mut self, entries: &[((i64, i64), f64)]) -> Result<()> {
        let mut store = DistanceConstraints::new();
        for &((i, j), value) in entries {
            store.set(&[i, j], value)?;
        }
        self.distance = store;
        Ok(())
    }

    /// Replaces all angular constraints. On error nothing is changed.
    pub fn set_angulars(&mut self, entries: &[(Vec<i64>, f64)]) -> Result<()> {
        let mut store = AngularConstraints::new();
        for (atoms, value) in entries {
            store.set(atoms, *value)?;
        }
        self.angular = store;
        Ok(())
    }

    /// Replaces all fragment constraints. On error nothing is changed.
    pub fn set_fragments(&mut self, entries: &[(i64, Value)]) -> Result<()> {
        let mut store = FragmentConstraints::new();
        for (id, value) in entries {
            store.set(*id, value)?;
        }
        self.fragments = store;
        Ok(())
    }

    /// Merges `other` into `self`.
    ///
    /// Distance, angular and fragment entries from `other` override on key
    /// collision; keys only present in `self` are kept. Cartesian atoms are
    /// unioned.
    pub fn update(&mut self, other: &ConstraintSet) {
        self.distance.update(&other.distance);
        self.angular.update(&other.angular);
        self.cartesian.extend(other.cartesian.iter().copied());
        self.fragments.update(&other.fragments);
    }

    pub fn distance(&self) -> &DistanceConstraints {
        &self.distance
    }

    pub fn distance_mut(&mut self) -> &mut DistanceConstraints {
        &mut self.distance
    }

    pub fn angular(&self) -> &AngularConstraints {
        &self.angular
    }

    pub fn angular_mut(&mut self) -> &mut AngularConstraints {
        &mut self.angular
    }

    /// Cartesian-constrained atoms, sorted and deduplicated.
    pub fn cartesian(&self) -> Vec<usize> {
        self.cartesian.iter().copied().collect()
    }

    pub fn fragments(&self) -> &FragmentConstraints {
        &self.fragments
    }

    pub fn fragments_mut(&mut self) -> &mut FragmentConstraints {
        &mut self.fragments
    }

    pub fn clear_distance(&mut self) {
        self.distance.clear();
    }

    pub fn clear_angular(&mut self) {
        self.angular.clear();
    }

    pub fn clear_cartesian(&mut self) {
        self.cartesian.clear();
    }

    pub fn clear_fragments(&mut self) {
        self.fragments.clear();
    }

    /// Number of distance constraints.
    pub fn n_distance(&self) -> usize {
        self.distance.len()
    }

    /// Number of angular constraints.
    pub fn n_angular(&self) -> usize {
        self.angular.len()
    }

    /// Number of Cartesian constraints.
    pub fn n_cartesian(&self) -> usize {
        self.cartesian.len()
    }

    /// Number of fragments.
    pub fn n_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// True if any distance, angular or Cartesian constraint is set.
    pub fn any(&self) -> bool {
        !self.distance.is_empty() || !self.angular.is_empty() || !self.cartesian.is_empty()
    }

    /// Atoms whose positions may not move: Cartesian constraints plus every
    /// atom of a fragment with the `"fix"` strategy.
    pub fn frozen_atoms(&self) -> BTreeSet<usize> {
        let mut frozen = self.cartesian.clone();
        for (_, fragment) in self.fragments.iter() {
            if fragment.is_fixed() {
                frozen.extend(fragment.atoms());
            }
        }
        frozen
    }

    /// Checks every referenced atom index against `geometry`.
    ///
    /// Fails with [`ConstraintError::InvalidConstraint`] if any fragment,
    /// distance, angular or Cartesian index is `>= geometry.num_atoms`.
    /// Passes trivially when nothing is constrained.
    pub fn verify(&self, geometry: &Geometry) -> Result<()> {
        let n_atoms = geometry.num_atoms;
        let out_of_range = |idx: usize, kind: &str| -> Result<()> {
            if idx >= n_atoms {
                return Err(invalid(format!(
                    "{} constraints contain atom index {} but the molecule has {} atoms",
                    kind, idx, n_atoms
                )));
            }
            Ok(())
        };

        if let Some(max_idx) = self.fragments.max_atom_idx() {
            out_of_range(max_idx, "Fragment")?;
        }
        if let Some(max_idx) = self.distance.iter().map(|((_, j), _)| j).max() {
            out_of_range(max_idx, "Distance")?;
        }
        if let Some(max_idx) = self
            .angular
            .iter()
            .filter_map(|(atoms, _)| atoms.iter().copied().max())
            .max()
        {
            out_of_range(max_idx, "Angular")?;
        }
        if let Some(&max_idx) = self.cartesian.iter().next_back() {
            out_of_range(max_idx, "Cartesian")?;
        }
        Ok(())
    }

    /// Measures every distance and angular constraint in `geometry`.
    ///
    /// Call [`ConstraintSet::verify`] first; indices are not bounds-checked here.
    pub fn deviations(&self, geometry: &Geometry) -> Vec<ConstraintDeviation> {
        let mut out = Vec::with_capacity(self.n_distance() + self.n_angular());
        for ((i, j), target) in self.distance.iter() {
            out.push(ConstraintDeviation {
                atoms: vec![i, j],
                target,
                current: geometry.distance(i, j),
            });
        }
        for (atoms, target) in self.angular.iter() {
            let current = match atoms {
                [a, b, c] => geometry.angle(*a, *b, *c),
                [a, b, c, d] => geometry.dihedral(*a, *b, *c, *d),
                _ => continue,
            };
            out.push(ConstraintDeviation {
                atoms: atoms.to_vec(),
                target,
                current,
            });
        }
        out
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut string = String::new();
        if !self.cartesian.is_empty() {
            string.push_str(&format!("{:?}", self.cartesian()));
        }
        if !self.distance.is_empty() {
            let entries: Vec<String> = self
                .distance
                .iter()
                .map(|((i, j), v)| format!("({}, {}): {:.3}", i, j, v))
                .collect();
            string.push_str(&format!("{{{}}}", entries.join(", ")));
        }
        if !self.angular.is_empty() {
            let entries: Vec<String> = self
                .angular
                .iter()
                .map(|(atoms, v)| format!("{:?}: {:.3}", atoms, v))
                .collect();
            string.push_str(&format!("{{{}}}", entries.join(", ")));
        }
        write!(f, "Constraints({})", string)
    }
}
