//! A small labelled, n-dimensional dataset.
//!
//! Readers hand out [`Dataset`]s, the ensemble code tags them with new
//! dimensions ([`Dataset::expand_dims`]) and glues them together ([`concat`]).
//! Dimensions are ordered; variables refer to them by name.
//!
//! Data variables and auxiliary coordinates (grid fields such as `XC` or
//! `Depth`) are stored separately: only data variables gain new dimensions
//! when a dataset is expanded.

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDateTime;
use derive_more::Constructor;
use ndarray::{concatenate, ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Constructor)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    F32,
    F64,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::F32 => write!(f, "float32"),
            Dtype::F64 => write!(f, "float64"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataArray {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl DataArray {
    pub fn dtype(&self) -> Dtype {
        match self {
            DataArray::F32(_) => Dtype::F32,
            DataArray::F64(_) => Dtype::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            DataArray::F32(a) => a.shape(),
            DataArray::F64(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    fn insert_leading_axis(self) -> Self {
        match self {
            DataArray::F32(a) => DataArray::F32(a.insert_axis(Axis(0))),
            DataArray::F64(a) => DataArray::F64(a.insert_axis(Axis(0))),
        }
    }

    /// Returns `None` if the parts disagree in dtype or in any axis but `axis`.
    fn concatenate(axis: Axis, parts: &[&DataArray]) -> Option<DataArray> {
        match parts.first()? {
            DataArray::F32(_) => {
                let views = parts
                    .iter()
                    .map(|p| match p {
                        DataArray::F32(a) => Some(a.view()),
                        _ => None,
                    })
                    .collect::<Option<Vec<ArrayViewD<f32>>>>()?;
                concatenate(axis, &views).ok().map(DataArray::F32)
            }
            DataArray::F64(_) => {
                let views = parts
                    .iter()
                    .map(|p| match p {
                        DataArray::F64(a) => Some(a.view()),
                        _ => None,
                    })
                    .collect::<Option<Vec<ArrayViewD<f64>>>>()?;
                concatenate(axis, &views).ok().map(DataArray::F64)
            }
        }
    }
}

impl From<ArrayD<f32>> for DataArray {
    fn from(a: ArrayD<f32>) -> Self {
        DataArray::F32(a)
    }
}

impl From<ArrayD<f64>> for DataArray {
    fn from(a: ArrayD<f64>) -> Self {
        DataArray::F64(a)
    }
}

/// Values labelling the positions along one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Coordinate {
    Labels(Vec<String>),
    Values(Vec<f64>),
    Times(Vec<NaiveDateTime>),
}

impl Coordinate {
    pub fn label(label: impl Into<String>) -> Self {
        Coordinate::Labels(vec![label.into()])
    }

    pub fn len(&self) -> usize {
        match self {
            Coordinate::Labels(v) => v.len(),
            Coordinate::Values(v) => v.len(),
            Coordinate::Times(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_strictly_increasing(&self) -> bool {
        match self {
            Coordinate::Labels(v) => v.windows(2).all(|w| w[0] < w[1]),
            Coordinate::Values(v) => v.windows(2).all(|w| w[0] < w[1]),
            Coordinate::Times(v) => v.windows(2).all(|w| w[0] < w[1]),
        }
    }

    fn same_kind(&self, other: &Coordinate) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn kind(&self) -> &'static str {
        match self {
            Coordinate::Labels(_) => "labels",
            Coordinate::Values(_) => "values",
            Coordinate::Times(_) => "datetime",
        }
    }

    /// Returns `None` if the parts are not all of the same kind.
    fn concat(parts: &[&Coordinate]) -> Option<Coordinate> {
        fn collect<T: Clone>(
            parts: &[&Coordinate],
            get: impl Fn(&Coordinate) -> Option<&Vec<T>>,
        ) -> Option<Vec<T>> {
            let mut out = Vec::new();
            for part in parts {
                out.extend_from_slice(get(*part)?);
            }
            Some(out)
        }

        match parts.first()? {
            Coordinate::Labels(_) => collect(parts, |c| match c {
                Coordinate::Labels(v) => Some(v),
                _ => None,
            })
            .map(Coordinate::Labels),
            Coordinate::Values(_) => collect(parts, |c| match c {
                Coordinate::Values(v) => Some(v),
                _ => None,
            })
            .map(Coordinate::Values),
            Coordinate::Times(_) => collect(parts, |c| match c {
                Coordinate::Times(v) => Some(v),
                _ => None,
            })
            .map(Coordinate::Times),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    data: DataArray,
}

impl Variable {
    pub fn new<D, S>(dims: D, data: impl Into<DataArray>) -> Result<Self, DatasetError>
    where
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        let data = data.into();
        if dims.len() != data.ndim() {
            return Err(DatasetError::RankMismatch {
                dims: dims.len(),
                ndim: data.ndim(),
            });
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &DataArray {
        &self.data
    }

    pub fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match &self.data {
            DataArray::F32(a) => Some(a),
            DataArray::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match &self.data {
            DataArray::F64(a) => Some(a),
            DataArray::F32(_) => None,
        }
    }

    fn prepend_dim(self, dim: &str) -> Self {
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(dim.to_string());
        dims.extend(self.dims);
        Self {
            dims,
            data: self.data.insert_leading_axis(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatasetError {
    #[error("Dimension `{0}` already exists")]
    DuplicateDimension(String),
    #[error("`{name}` refers to unknown dimension `{dim}`")]
    UnknownDimension { name: String, dim: String },
    #[error("`{name}` has length {found} along `{dim}`, expected {expected}")]
    ShapeMismatch {
        name: String,
        dim: String,
        expected: usize,
        found: usize,
    },
    #[error("{dims} dimension names given for an array with {ndim} axes")]
    RankMismatch { dims: usize, ndim: usize },
    #[error("Can only expand `{dim}` by a single coordinate value, got {len}")]
    NotSingleton { dim: String, len: usize },
}

/// How index coordinates along dimensions other than the concatenated one
/// are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// Keep the first dataset's coordinates; only sizes have to agree.
    #[default]
    Override,
    /// Coordinates must be identical.
    Exact,
}

/// Why two datasets cannot be concatenated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Mismatch {
    #[error("dimension `{dim}` is missing")]
    MissingDimension { dim: String },
    #[error("dimensions {found:?} differ from {expected:?}")]
    DimensionSet {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("dimension `{dim}` has size {found}, expected {expected}")]
    DimensionSize {
        dim: String,
        expected: usize,
        found: usize,
    },
    #[error("variables differ (missing: {missing:?}, unexpected: {unexpected:?})")]
    VariableSet {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("variable `{variable}` has dimensions {found:?}, expected {expected:?}")]
    VariableDims {
        variable: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("variable `{variable}` has dtype {found}, expected {expected}")]
    Dtype {
        variable: String,
        expected: Dtype,
        found: Dtype,
    },
    #[error("variable `{variable}` could not be concatenated")]
    Shape { variable: String },
    #[error("coordinate along `{dim}` differs")]
    Coordinate { dim: String },
    #[error("coordinate variable `{name}` differs")]
    CoordinateVariable { name: String },
}

impl Mismatch {
    /// The dimension involved in the mismatch, if there is a single one.
    pub fn dim(&self) -> Option<&str> {
        match self {
            Mismatch::MissingDimension { dim }
            | Mismatch::DimensionSize { dim, .. }
            | Mismatch::Coordinate { dim } => Some(dim.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Dataset #{index} cannot be concatenated: {mismatch}")]
pub struct ConcatError {
    /// Position of the offending dataset; it conflicts with dataset #0.
    pub index: usize,
    pub mismatch: Mismatch,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    dims: Vec<Dimension>,
    indexes: BTreeMap<String, Coordinate>,
    coords: BTreeMap<String, Variable>,
    data_vars: BTreeMap<String, Variable>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dim(&mut self, name: impl Into<String>, len: usize) -> Result<(), DatasetError> {
        let name = name.into();
        if self.dim_len(&name).is_some() {
            return Err(DatasetError::DuplicateDimension(name));
        }
        self.dims.push(Dimension::new(name, len));
        Ok(())
    }

    /// Adds a dimension sized after `coord` and labels it with `coord`.
    pub fn add_indexed_dim(
        &mut self,
        name: impl Into<String>,
        coord: Coordinate,
    ) -> Result<(), DatasetError> {
        let name = name.into();
        self.add_dim(name.clone(), coord.len())?;
        self.indexes.insert(name, coord);
        Ok(())
    }

    pub fn set_index(&mut self, dim: &str, coord: Coordinate) -> Result<(), DatasetError> {
        let expected = self
            .dim_len(dim)
            .ok_or_else(|| DatasetError::UnknownDimension {
                name: dim.to_string(),
                dim: dim.to_string(),
            })?;
        if coord.len() != expected {
            return Err(DatasetError::ShapeMismatch {
                name: dim.to_string(),
                dim: dim.to_string(),
                expected,
                found: coord.len(),
            });
        }
        self.indexes.insert(dim.to_string(), coord);
        Ok(())
    }

    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        variable: Variable,
    ) -> Result<(), DatasetError> {
        let name = name.into();
        self.check_shape(&name, &variable)?;
        self.data_vars.insert(name, variable);
        Ok(())
    }

    pub fn add_coord(
        &mut self,
        name: impl Into<String>,
        variable: Variable,
    ) -> Result<(), DatasetError> {
        let name = name.into();
        self.check_shape(&name, &variable)?;
        self.coords.insert(name, variable);
        Ok(())
    }

    fn check_shape(&self, name: &str, variable: &Variable) -> Result<(), DatasetError> {
        for (dim, &found) in variable.dims().iter().zip(variable.shape()) {
            let expected = self
                .dim_len(dim)
                .ok_or_else(|| DatasetError::UnknownDimension {
                    name: name.to_string(),
                    dim: dim.clone(),
                })?;
            if expected != found {
                return Err(DatasetError::ShapeMismatch {
                    name: name.to_string(),
                    dim: dim.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dim_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.dims.iter().map(|d| d.name.as_str())
    }

    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dims.iter().find(|d| d.name == name).map(|d| d.len)
    }

    pub fn index(&self, dim: &str) -> Option<&Coordinate> {
        self.indexes.get(dim)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> + '_ {
        self.data_vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.data_vars.keys().map(String::as_str)
    }

    pub fn coord(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name)
    }

    /// Index coordinates of `other`, apart from the one along `dim`, whose
    /// labels differ from ours. [`JoinPolicy::Override`] drops these.
    pub fn differing_indexes<'a>(&self, other: &'a Dataset, dim: &str) -> Vec<(&'a str, &'a Coordinate)> {
        other
            .indexes
            .iter()
            .filter(|(name, coord)| name.as_str() != dim && self.index(name) != Some(*coord))
            .map(|(name, coord)| (name.as_str(), coord))
            .collect()
    }

    /// Prepends a new dimension of length one labelled by `coord` to the
    /// dataset and to every data variable.
    pub fn expand_dims(self, dim: &str, coord: Coordinate) -> Result<Self, DatasetError> {
        if coord.len() != 1 {
            return Err(DatasetError::NotSingleton {
                dim: dim.to_string(),
                len: coord.len(),
            });
        }
        if self.dim_len(dim).is_some() {
            return Err(DatasetError::DuplicateDimension(dim.to_string()));
        }

        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(Dimension::new(dim.to_string(), 1));
        dims.extend(self.dims);

        let mut indexes = self.indexes;
        indexes.insert(dim.to_string(), coord);

        let data_vars = self
            .data_vars
            .into_iter()
            .map(|(name, var)| (name, var.prepend_dim(dim)))
            .collect();

        Ok(Self {
            dims,
            indexes,
            coords: self.coords,
            data_vars,
        })
    }

    fn check_compatible(&self, other: &Dataset, dim: &str, join: JoinPolicy) -> Result<(), Mismatch> {
        let expected: Vec<&str> = self.dim_names().collect();
        let found: Vec<&str> = other.dim_names().collect();
        if expected != found {
            if !found.contains(&dim) {
                return Err(Mismatch::MissingDimension {
                    dim: dim.to_string(),
                });
            }
            return Err(Mismatch::DimensionSet {
                expected: expected.into_iter().map(String::from).collect(),
                found: found.into_iter().map(String::from).collect(),
            });
        }

        for (ours, theirs) in self.dims.iter().zip(&other.dims) {
            if ours.name != dim && ours.len != theirs.len {
                return Err(Mismatch::DimensionSize {
                    dim: ours.name.clone(),
                    expected: ours.len,
                    found: theirs.len,
                });
            }
        }

        let missing: Vec<String> = self
            .data_vars
            .keys()
            .filter(|k| !other.data_vars.contains_key(*k))
            .cloned()
            .collect();
        let unexpected: Vec<String> = other
            .data_vars
            .keys()
            .filter(|k| !self.data_vars.contains_key(*k))
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(Mismatch::VariableSet {
                missing,
                unexpected,
            });
        }

        for (name, ours) in &self.data_vars {
            if let Some(theirs) = other.data_vars.get(name) {
                check_variable(name, ours, theirs)?;
            }
        }

        for (name, ours) in &self.coords {
            match other.coords.get(name) {
                Some(theirs) => {
                    check_variable(name, ours, theirs)?;
                    if join == JoinPolicy::Exact && ours.axis_of(dim).is_none() && ours != theirs {
                        return Err(Mismatch::CoordinateVariable { name: name.clone() });
                    }
                }
                None if join == JoinPolicy::Exact || ours.axis_of(dim).is_some() => {
                    return Err(Mismatch::CoordinateVariable { name: name.clone() });
                }
                None => {}
            }
        }

        match (self.index(dim), other.index(dim)) {
            (Some(ours), Some(theirs)) if ours.same_kind(theirs) => {}
            (None, None) => {}
            _ => {
                return Err(Mismatch::Coordinate {
                    dim: dim.to_string(),
                })
            }
        }

        if join == JoinPolicy::Exact {
            for d in self.dim_names().filter(|d| *d != dim) {
                if self.index(d) != other.index(d) {
                    return Err(Mismatch::Coordinate { dim: d.to_string() });
                }
            }
        }

        Ok(())
    }
}

fn check_variable(name: &str, ours: &Variable, theirs: &Variable) -> Result<(), Mismatch> {
    if ours.dims != theirs.dims {
        return Err(Mismatch::VariableDims {
            variable: name.to_string(),
            expected: ours.dims.clone(),
            found: theirs.dims.clone(),
        });
    }
    if ours.dtype() != theirs.dtype() {
        return Err(Mismatch::Dtype {
            variable: name.to_string(),
            expected: ours.dtype(),
            found: theirs.dtype(),
        });
    }
    Ok(())
}

/// Concatenates `datasets` along the existing dimension `dim`, in the given order.
///
/// Every dataset must have the same dimensions (in the same order), the same
/// data variables with matching dimensions and dtypes, and equal sizes along
/// every dimension but `dim`. Variables without `dim` are taken from the first
/// dataset.
pub fn concat(datasets: Vec<Dataset>, dim: &str, join: JoinPolicy) -> Result<Dataset, ConcatError> {
    let mut datasets = datasets.into_iter();
    let first = match datasets.next() {
        Some(first) => first,
        None => return Ok(Dataset::default()),
    };
    let rest: Vec<Dataset> = datasets.collect();

    if first.dim_len(dim).is_none() {
        return Err(ConcatError {
            index: 0,
            mismatch: Mismatch::MissingDimension {
                dim: dim.to_string(),
            },
        });
    }
    if rest.is_empty() {
        return Ok(first);
    }

    for (i, other) in rest.iter().enumerate() {
        first
            .check_compatible(other, dim, join)
            .map_err(|mismatch| ConcatError {
                index: i + 1,
                mismatch,
            })?;
    }

    let all: Vec<&Dataset> = std::iter::once(&first).chain(&rest).collect();
    let internal = |mismatch| ConcatError { index: 0, mismatch };

    let dims = first
        .dims
        .iter()
        .map(|d| {
            if d.name == dim {
                Dimension::new(d.name.clone(), all.iter().filter_map(|ds| ds.dim_len(dim)).sum())
            } else {
                d.clone()
            }
        })
        .collect();

    let mut indexes = first.indexes.clone();
    if first.index(dim).is_some() {
        let parts: Vec<&Coordinate> = all.iter().filter_map(|ds| ds.index(dim)).collect();
        let joined = Coordinate::concat(&parts).ok_or_else(|| {
            internal(Mismatch::Coordinate {
                dim: dim.to_string(),
            })
        })?;
        indexes.insert(dim.to_string(), joined);
    }

    let join_vars = |pick: fn(&Dataset) -> &BTreeMap<String, Variable>| {
        pick(&first)
            .iter()
            .map(|(name, var)| {
                let axis = match var.axis_of(dim) {
                    Some(axis) => axis,
                    None => return Ok((name.clone(), var.clone())),
                };
                let parts: Vec<&DataArray> = all
                    .iter()
                    .filter_map(|ds| pick(*ds).get(name))
                    .map(Variable::data)
                    .collect();
                let data = DataArray::concatenate(Axis(axis), &parts).ok_or_else(|| {
                    internal(Mismatch::Shape {
                        variable: name.clone(),
                    })
                })?;
                Ok((
                    name.clone(),
                    Variable {
                        dims: var.dims.clone(),
                        data,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>, ConcatError>>()
    };

    let data_vars = join_vars(|ds| &ds.data_vars)?;
    let coords = join_vars(|ds| &ds.coords)?;

    Ok(Dataset {
        dims,
        indexes,
        coords,
        data_vars,
    })
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|d| format!("{}: {}", d.name, d.len))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "Dimensions: ({dims})")?;

        writeln!(f, "Coordinates:")?;
        for (dim, coord) in &self.indexes {
            writeln!(f, "  * {dim:<10} ({dim}) {}", coord.kind())?;
        }
        for (name, var) in &self.coords {
            writeln!(f, "    {name:<10} ({}) {}", var.dims.join(", "), var.dtype())?;
        }

        writeln!(f, "Data variables:")?;
        for (name, var) in &self.data_vars {
            writeln!(f, "    {name:<10} ({}) {}", var.dims.join(", "), var.dtype())?;
        }
        Ok(())
    }
}
