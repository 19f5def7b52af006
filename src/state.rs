use fnv::FnvHasher;

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::Real;
use itertools::{izip, Itertools};
use na::DVector;

#[derive(Copy, Clone, Debug, Default)]
struct DeterministicState;

impl BuildHasher for DeterministicState {
    type Hasher = FnvHasher;

    fn build_hasher(&self) -> FnvHasher {
        FnvHasher::with_key(7919)
    }
}

/// Per-species flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SpeciesOptions {
    /// Whether the species takes part in the diffusion step.
    ///
    /// Immobile species (e.g. bound enzymes) still react but keep their
    /// spatial profile.
    pub diffusion: bool,
}

impl Default for SpeciesOptions {
    fn default() -> Self {
        Self { diffusion: true }
    }
}

/// Named concentration vectors sharing one spatial discretization.
///
/// Every species holds one value per mesh node; all vectors have the length
/// fixed at construction time.
#[derive(Clone, Debug)]
pub struct State {
    vector_size: usize,
    names: HashMap<String, usize, DeterministicState>,
    // Keeps insertion order; the map alone would iterate arbitrarily.
    ordered_names: Vec<String>,
    pub(crate) concentrations: Vec<DVector<Real>>,
    options: Vec<SpeciesOptions>,
}

impl State {
    /// Creates an empty state whose species will all have `vector_size`
    /// entries.
    pub fn new(vector_size: usize) -> Self {
        Self {
            vector_size,
            names: HashMap::with_hasher(DeterministicState),
            ordered_names: vec![],
            concentrations: vec![],
            options: vec![],
        }
    }

    /// Number of entries of each concentration vector.
    pub fn size(&self) -> usize {
        self.vector_size
    }

    /// Number of registered species.
    pub fn n_species(&self) -> usize {
        self.concentrations.len()
    }

    /// Registers a species initialized to zero everywhere and returns its
    /// concentration vector.
    ///
    /// Re-adding an existing name returns the existing vector unchanged.
    pub fn add_species(&mut self, name: &str, options: SpeciesOptions) -> &mut DVector<Real> {
        let idx = match self.names.get(name) {
            Some(&idx) => idx,
            None => {
                let idx = self.concentrations.len();
                self.names.insert(name.to_owned(), idx);
                self.ordered_names.push(name.to_owned());
                self.concentrations.push(DVector::zeros(self.vector_size));
                self.options.push(options);
                idx
            }
        };
        &mut self.concentrations[idx]
    }

    /// Index of a species in registration order.
    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// The concentration vector of `name`, if registered.
    pub fn get_species(&self, name: &str) -> Option<&DVector<Real>> {
        self.names.get(name).map(|&i| &self.concentrations[i])
    }

    /// Mutable access to the concentration vector of `name`.
    pub fn get_species_mut(&mut self, name: &str) -> Option<&mut DVector<Real>> {
        match self.names.get(name) {
            Some(&i) => Some(&mut self.concentrations[i]),
            None => None,
        }
    }

    /// Copies `values` into the concentration vector of `name`.
    ///
    /// Returns `false` if the species is not registered. The slice length
    /// must match [`State::size`].
    pub fn set_species(&mut self, name: &str, values: &[Real]) -> bool {
        assert_eq!(
            values.len(),
            self.vector_size,
            "Concentration data must cover every mesh node."
        );
        match self.names.get(name) {
            Some(&i) => {
                self.concentrations[i].copy_from_slice(values);
                true
            }
            None => false,
        }
    }

    /// Iterates over species in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DVector<Real>, SpeciesOptions)> {
        izip!(&self.ordered_names, &self.concentrations, &self.options)
            .map(|(name, u, options)| (name.as_str(), u, *options))
    }

    /// Iterates over species in registration order, with mutable
    /// concentration vectors.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut DVector<Real>, SpeciesOptions)> {
        izip!(&self.ordered_names, &mut self.concentrations, &self.options)
            .map(|(name, u, options)| (name.as_str(), u, *options))
    }

    /// Prints the first `count` entries of every species to standard output.
    pub fn print(&self, count: usize) {
        for (name, u, _) in self.iter() {
            let shown = u.iter().take(count).map(|v| format!("{v:.6}")).join(", ");
            if u.len() > count {
                println!("{name}: [{shown}, ...]");
            } else {
                println!("{name}: [{shown}]");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_and_get_species() {
        let mut state = State::new(4);
        state.add_species("u", SpeciesOptions::default());
        state.add_species("v", SpeciesOptions { diffusion: false });

        assert_eq!(state.n_species(), 2);
        assert_eq!(state.size(), 4);
        assert_eq!(state.species_index("u"), Some(0));
        assert_eq!(state.species_index("v"), Some(1));
        assert!(state.get_species("w").is_none());
        assert_eq!(state.get_species("u").unwrap().len(), 4);
    }

    #[test]
    fn re_adding_keeps_existing_data() {
        let mut state = State::new(2);
        state.add_species("u", SpeciesOptions::default());
        assert!(state.set_species("u", &[1.0, 2.0]));

        state.add_species("u", SpeciesOptions::default());
        assert_eq!(state.n_species(), 1);
        assert_eq!(state.get_species("u").unwrap()[1], 2.0);
    }

    #[test]
    fn set_species_reports_unknown_names() {
        let mut state = State::new(2);
        assert!(!state.set_species("u", &[1.0, 2.0]));
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut state = State::new(1);
        for name in ["c", "a", "b"] {
            state.add_species(name, SpeciesOptions::default());
        }
        let order: Vec<_> = state.iter().map(|(name, _, _)| name.to_owned()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }
}
