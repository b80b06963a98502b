//! The seam to whatever actually understands the model's output files.

use std::fmt;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::dataset::{Dataset, Dtype};

/// Parses native simulation output into a [`Dataset`].
///
/// Implementations get the same [`ReaderConfig`] for every unit of an
/// ensemble and may be called concurrently.
#[async_trait]
pub trait DatasetReader<P: ?Sized + Sync>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn open_dataset(
        &self,
        data: &P,
        grid: &P,
        config: &ReaderConfig,
    ) -> Result<Dataset, Self::Error>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Geometry {
    #[default]
    #[serde(rename = "cartesian")]
    Cartesian,
    #[serde(rename = "sphericalpolar")]
    SphericalPolar,
    #[serde(rename = "curvilinear")]
    Curvilinear,
    #[serde(rename = "llc")]
    Llc,
    #[serde(rename = "cs")]
    CubedSphere,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Geometry::Cartesian => "cartesian",
            Geometry::SphericalPolar => "sphericalpolar",
            Geometry::Curvilinear => "curvilinear",
            Geometry::Llc => "llc",
            Geometry::CubedSphere => "cs",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Float32,
    Float64,
}

impl Precision {
    pub fn dtype(self) -> Dtype {
        match self {
            Precision::Float32 => Dtype::F32,
            Precision::Float64 => Dtype::F64,
        }
    }
}

/// Fixed for a whole ensemble, never inferred per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub geometry: Geometry,
    pub default_precision: Precision,
    /// Seconds per model step
    pub time_step: f64,
    #[serde(deserialize_with = "deserialize_reference_time")]
    pub reference_time: NaiveDateTime,
    /// File name prefixes of the output to read
    pub prefixes: Vec<String>,
    pub read_grid: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            default_precision: Precision::default(),
            time_step: 3600.0,
            reference_time: NaiveDate::from_ymd_opt(2000, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            prefixes: ["state", "tracer", "diag"].map(String::from).to_vec(),
            read_grid: true,
        }
    }
}

impl ReaderConfig {
    /// Model time of the given iteration number.
    ///
    /// `None` if the offset does not fit into a timestamp, including
    /// non-finite time steps.
    pub fn time_of_iteration(&self, iteration: u64) -> Option<NaiveDateTime> {
        let millis = (iteration as f64 * self.time_step * 1000.0).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return None;
        }
        self.reference_time
            .checked_add_signed(Duration::milliseconds(millis as i64))
    }
}

/// Accepts both `2000-01-01T00:00:00` and `2000-01-01 00:00:00`.
pub fn parse_reference_time(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
}

fn deserialize_reference_time<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<NaiveDateTime, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_reference_time(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.geometry, Geometry::Cartesian);
        assert_eq!(config.default_precision.dtype(), Dtype::F32);
        assert_eq!(config.time_step, 3600.0);
        assert_eq!(
            config.reference_time,
            NaiveDate::from_ymd_opt(2000, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        assert_eq!(config.prefixes, ["state", "tracer", "diag"]);
    }

    #[test]
    fn time_of_iteration() {
        let config = ReaderConfig::default();
        assert_eq!(
            config.time_of_iteration(25),
            NaiveDate::from_ymd_opt(2000, 1, 2).and_then(|d| d.and_hms_opt(1, 0, 0))
        );
    }

    #[test]
    fn time_of_iteration_out_of_range() {
        let config = ReaderConfig {
            time_step: 1e12,
            ..Default::default()
        };
        assert_eq!(config.time_of_iteration(1_000_000), None);
        assert_eq!(config.time_of_iteration(u64::MAX), None);

        let config = ReaderConfig {
            time_step: f64::NAN,
            ..Default::default()
        };
        assert_eq!(config.time_of_iteration(1), None);
    }

    #[test]
    fn parses_both_timestamp_styles() {
        let a = parse_reference_time("1992-01-01 12:00:00").unwrap();
        let b = parse_reference_time("1992-01-01T12:00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_reference_time("yesterday").is_err());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: ReaderConfig = serde_json::from_str(
            r#"{ "geometry": "sphericalpolar", "time_step": 1200, "reference_time": "1992-01-01 00:00:00" }"#,
        )
        .unwrap();

        assert_eq!(config.geometry, Geometry::SphericalPolar);
        assert_eq!(config.time_step, 1200.0);
        assert_eq!(config.reference_time.to_string(), "1992-01-01 00:00:00");
        assert_eq!(config.default_precision, Precision::Float32);
        assert!(config.read_grid);
    }
}
