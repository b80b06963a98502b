// TODO: Re-enable and fix
// #![warn(clippy::pedantic)]

// #![warn(clippy::nursery)]
// #![warn(clippy::cargo)]
#![warn(clippy::complexity)]
#![warn(clippy::correctness)]
#![warn(clippy::perf)]
#![warn(clippy::style)]
#![warn(clippy::suspicious)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
// #![warn(clippy::todo)]
// #![warn(clippy::unimplemented)]
// #![warn(clippy::dbg_macro)]
// #![warn(clippy::unreachable)]
// #![warn(clippy::panic)]

// #![warn(clippy::unwrap_used)]
// #![warn(clippy::expect_used)]

pub mod dataset;
pub mod ensemble;
pub mod error;
pub mod file;
pub mod load;
pub mod reader;
pub mod scan;

#[cfg(test)]
pub(crate) mod testing;

pub use dataset::{Coordinate, DataArray, Dataset, Dtype, JoinPolicy, Variable};
pub use ensemble::{open_ensemble, plan_ensemble, Assembled, Ensemble, EnsembleConfig, FailurePolicy};
pub use error::Error;
pub use reader::{DatasetReader, ReaderConfig};
pub use scan::{Layout, MemberSet, ScanOptions};
