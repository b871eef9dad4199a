use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Values of a coordinate variable.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateValues {
    Time(Vec<NaiveDateTime>),
    Numeric(Vec<f64>),
}

impl CoordinateValues {
    pub fn len(&self) -> usize {
        match self {
            CoordinateValues::Time(v) => v.len(),
            CoordinateValues::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A data variable laid out row-major over `dims`. Missing cells are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct GridVariable {
    pub name: String,
    pub dims: Vec<String>,
    pub values: Vec<f64>,
}

impl GridVariable {
    pub fn new(name: impl Into<String>, dims: &[&str], values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            values,
        }
    }

    pub fn dim_position(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }
}

/// In-memory image of one raw multidimensional file: coordinates keyed by
/// name plus the data variables defined over them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridDataset {
    pub coords: BTreeMap<String, CoordinateValues>,
    pub variables: Vec<GridVariable>,
}

impl GridDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coord(mut self, name: &str, values: CoordinateValues) -> Self {
        self.coords.insert(name.to_string(), values);
        self
    }

    pub fn with_variable(mut self, variable: GridVariable) -> Self {
        self.variables.push(variable);
        self
    }

    /// True when `name` is a dimension of at least one data variable.
    pub fn has_dim(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.dim_position(name).is_some())
    }
}
