use nalgebra::Point3;
use std::collections::BTreeMap;

/// A named value attached to a molecule or a forcefield.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Scalar(f64),
    /// One value per atom.
    Scalars(Vec<f64>),
    /// One position per atom.
    Coordinates(Vec<Point3<f64>>),
    Text(String),
}

impl Property {
    pub fn kind(&self) -> &'static str {
        match self {
            Property::Scalar(_) => "scalar",
            Property::Scalars(_) => "per-atom scalars",
            Property::Coordinates(_) => "coordinates",
            Property::Text(_) => "text",
        }
    }

    /// Length of a per-atom property, `None` for molecule-wide values.
    pub fn per_atom_len(&self) -> Option<usize> {
        match self {
            Property::Scalars(values) => Some(values.len()),
            Property::Coordinates(points) => Some(points.len()),
            Property::Scalar(_) | Property::Text(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Property::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_scalars(&self) -> Option<&[f64]> {
        match self {
            Property::Scalars(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_coordinates(&self) -> Option<&[Point3<f64>]> {
        match self {
            Property::Coordinates(points) => Some(points),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Property::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<f64> for Property {
    fn from(value: f64) -> Self {
        Property::Scalar(value)
    }
}

impl From<Vec<f64>> for Property {
    fn from(value: Vec<f64>) -> Self {
        Property::Scalars(value)
    }
}

impl From<Vec<Point3<f64>>> for Property {
    fn from(value: Vec<Point3<f64>>) -> Self {
        Property::Coordinates(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Property::Text(value.to_string())
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Property::Text(value)
    }
}

/// Redirects the default property names a forcefield asks for to the names
/// actually used on the molecules (e.g. `charge` -> `charge_am1bcc`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    sources: BTreeMap<String, String>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    /// The property key to read for `name`.
    pub fn source<'a>(&'a self, name: &'a str) -> &'a str {
        self.sources.get(name).map_or(name, String::as_str)
    }

    pub fn is_default(&self) -> bool {
        self.sources.is_empty()
    }
}
