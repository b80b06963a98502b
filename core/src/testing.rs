//! Fixtures shared by the unit tests.

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use tempfile::TempDir;

use crate::{
    dataset::{Coordinate, DataArray, Dataset, Variable},
    reader::{DatasetReader, Precision, ReaderConfig},
};

/// Creates a temporary directory containing `dirs` and empty `files`.
pub(crate) fn tree(dirs: &[&str], files: &[&str]) -> TempDir {
    let root = tempfile::tempdir().unwrap();
    for dir in dirs {
        fs::create_dir_all(root.path().join(dir)).unwrap();
    }
    for file in files {
        let path = root.path().join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }
    root
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shape {
    pub time: usize,
    pub z: usize,
    pub y: usize,
    pub x: usize,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            time: 2,
            z: 2,
            y: 3,
            x: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("corrupt output in {0}")]
pub(crate) struct FakeError(pub String);

/// Synthesises a dataset for any path, without reading it.
///
/// * `ETAN (time, Y, X)` and `THETA (time, Z, Y, X)`, filled with a value
///   derived from the path plus the time index
/// * `XC (Y, X)` as a grid coordinate
/// * time starts at iteration `n * time` for a file stem ending in `n`, so
///   `seg0.zarr`, `seg1.zarr`, ... line up
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeReader {
    shape: Shape,
    overrides: Vec<(String, Shape)>,
    offsets: Vec<(String, u64)>,
    failures: Vec<String>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths containing `pattern` produce `shape` instead of the default.
    pub fn with_shape(mut self, pattern: &str, shape: Shape) -> Self {
        self.overrides.push((pattern.to_string(), shape));
        self
    }

    /// Paths containing `pattern` start `iterations` later.
    pub fn with_time_offset(mut self, pattern: &str, iterations: u64) -> Self {
        self.offsets.push((pattern.to_string(), iterations));
        self
    }

    /// Highest number of loads that were running at the same time.
    pub fn peak_loads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Paths containing `pattern` fail to load.
    pub fn failing(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    fn shape_for(&self, path: &str) -> Shape {
        self.overrides
            .iter()
            .find(|(pattern, _)| path.contains(pattern.as_str()))
            .map(|(_, shape)| *shape)
            .unwrap_or(self.shape)
    }

    fn offset_for(&self, path: &str) -> u64 {
        self.offsets
            .iter()
            .filter(|(pattern, _)| path.contains(pattern.as_str()))
            .map(|(_, offset)| offset)
            .sum()
    }
}

fn first_iteration(path: &Path, steps: usize) -> u64 {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse::<u64>().unwrap_or(0) * steps as u64
}

fn fill_value(path: &Path) -> f32 {
    let tail: Vec<_> = path.components().rev().take(3).collect();
    let sum: u32 = tail
        .iter()
        .flat_map(|c| c.as_os_str().to_string_lossy().into_owned().into_bytes())
        .map(u32::from)
        .sum();
    (sum % 1000) as f32
}

fn field(shape: &[usize], fill: f32, precision: Precision) -> DataArray {
    let values = ArrayD::from_shape_fn(IxDyn(shape), |ix| fill + ix[0] as f32);
    match precision {
        Precision::Float32 => DataArray::F32(values),
        Precision::Float64 => DataArray::F64(values.mapv(f64::from)),
    }
}

#[async_trait]
impl DatasetReader<Path> for FakeReader {
    type Error = FakeError;

    async fn open_dataset(
        &self,
        data: &Path,
        _grid: &Path,
        config: &ReaderConfig,
    ) -> Result<Dataset, Self::Error> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let name = data.to_string_lossy().into_owned();
        if self.failures.iter().any(|p| name.contains(p.as_str())) {
            return Err(FakeError(name));
        }

        let Shape { time, z, y, x } = self.shape_for(&name);
        let start = first_iteration(data, time) + self.offset_for(&name);
        let fill = fill_value(data);
        let precision = config.default_precision;

        let times = (0..time)
            .map(|t| config.time_of_iteration(start + t as u64))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| FakeError(name.clone()))?;

        let mut ds = Dataset::new();
        ds.add_indexed_dim("time", Coordinate::Times(times)).unwrap();
        ds.add_indexed_dim("Z", Coordinate::Values((0..z).map(|k| -(k as f64) * 10.0).collect()))
            .unwrap();
        ds.add_dim("Y", y).unwrap();
        ds.add_dim("X", x).unwrap();

        ds.add_coord(
            "XC",
            Variable::new(["Y", "X"], ArrayD::<f32>::ones(IxDyn(&[y, x]))).unwrap(),
        )
        .unwrap();
        ds.add_variable(
            "ETAN",
            Variable::new(["time", "Y", "X"], field(&[time, y, x], fill, precision)).unwrap(),
        )
        .unwrap();
        ds.add_variable(
            "THETA",
            Variable::new(
                ["time", "Z", "Y", "X"],
                field(&[time, z, y, x], fill, precision),
            )
            .unwrap(),
        )
        .unwrap();

        Ok(ds)
    }
}
