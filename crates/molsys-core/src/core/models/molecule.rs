use super::ids::MolNum;
use super::property::Property;
use crate::core::version::{Version, VersionRegistry};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct MoleculeData {
    number: MolNum,
    name: String,
    n_atoms: usize,
    properties: BTreeMap<String, Property>,
    version: Version,
}

/// An immutable snapshot of one whole molecule at one version.
///
/// Cloning is cheap; editing through [`Molecule::with_property`] yields a new
/// value with a new version and leaves every existing clone untouched.
#[derive(Debug, Clone)]
pub struct Molecule {
    data: Arc<MoleculeData>,
}

impl Molecule {
    pub fn new(name: impl Into<String>, n_atoms: usize) -> Self {
        Self::with_number(MolNum::new_unique(), name, n_atoms)
    }

    pub fn with_number(number: MolNum, name: impl Into<String>, n_atoms: usize) -> Self {
        Self {
            data: Arc::new(MoleculeData {
                number,
                name: name.into(),
                n_atoms,
                properties: BTreeMap::new(),
                version: VersionRegistry::global().register(number),
            }),
        }
    }

    pub fn number(&self) -> MolNum {
        self.data.number
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn n_atoms(&self) -> usize {
        self.data.n_atoms
    }

    pub fn version(&self) -> &Version {
        &self.data.version
    }

    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.data.properties
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.data.properties.contains_key(name)
    }

    pub fn property(&self, name: &str) -> Result<&Property> {
        self.data
            .properties
            .get(name)
            .ok_or_else(|| Error::missing_property(name, Some(self.number())))
    }

    /// Returns a new version of this molecule with `name` set to `value`.
    ///
    /// Replacing an existing property is a minor change, adding a new one is
    /// a major change. Per-atom values must provide one entry per atom.
    pub fn with_property(&self, name: impl Into<String>, value: impl Into<Property>) -> Result<Molecule> {
        let name = name.into();
        let value = value.into();

        if let Some(len) = value.per_atom_len() {
            if len != self.n_atoms() {
                return Err(Error::Incompatible(format!(
                    "property '{}' has {} value(s) but molecule {} has {} atom(s)",
                    name,
                    len,
                    self.number(),
                    self.n_atoms()
                )));
            }
        }

        let mut data = (*self.data).clone();
        match data.properties.insert(name, value) {
            Some(_) => data.version.increment_minor(),
            None => data.version.increment_major(),
        }
        Ok(Self {
            data: Arc::new(data),
        })
    }

    pub fn without_property(&self, name: &str) -> Result<Molecule> {
        let mut data = (*self.data).clone();
        data.properties
            .remove(name)
            .ok_or_else(|| Error::missing_property(name, Some(self.number())))?;
        data.version.increment_major();
        Ok(Self {
            data: Arc::new(data),
        })
    }

    pub fn shares_data_with(&self, other: &Molecule) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Two molecules are equal when they are the same molecule at the same version.
impl PartialEq for Molecule {
    fn eq(&self, other: &Self) -> bool {
        self.number() == other.number() && self.version() == other.version()
    }
}

impl Eq for Molecule {}
