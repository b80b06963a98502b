use std::{borrow::Borrow, collections::HashSet};

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, instrument, warn};

use crate::{
    dataset::{concat, Coordinate, Dataset, JoinPolicy},
    error::Error,
    reader::{DatasetReader, ReaderConfig},
    scan::{Unit, UnitSource},
};

pub const MEMBER_DIM: &str = "member";
pub const TIME_DIM: &str = "time";

/// Everything that ends up under one label of the `member` dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPlan<P> {
    pub id: String,
    pub units: Vec<Unit<P>>,
}

impl<P> MemberPlan<P> {
    /// Paths to open, in time order, each with the identifier used in errors.
    pub fn parts(&self) -> Vec<(String, &P)> {
        let mut parts = Vec::new();
        for unit in &self.units {
            match &unit.source {
                UnitSource::Raw { directory } => parts.push((unit.id(), directory)),
                UnitSource::Segmented { segments } => {
                    let id = unit.id();
                    parts.extend(
                        segments
                            .iter()
                            .map(|s| (format!("{id}/{}", s.name), &s.path)),
                    );
                }
            }
        }
        parts
    }
}

/// Index labels of one dataset that concatenation replaced with the labels
/// of the first dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct OverriddenIndex {
    /// Member or segment the labels belong to
    pub id: String,
    pub dim: String,
    pub labels: Coordinate,
}

/// Reports every index of `datasets[1..]` that differs from `datasets[0]`
/// along a dimension other than `dim`.
pub(crate) fn overridden_indexes(
    ids: &[String],
    datasets: &[Dataset],
    dim: &str,
) -> Vec<OverriddenIndex> {
    let (first_id, first) = match ids.first().zip(datasets.first()) {
        Some(first) => first,
        None => return Vec::new(),
    };

    let mut overridden = Vec::new();
    for (id, dataset) in ids.iter().zip(datasets).skip(1) {
        for (name, labels) in first.differing_indexes(dataset, dim) {
            warn!(
                %id,
                dim = name,
                replaced_by = %first_id,
                "Index labels differ and are replaced by those of the first dataset"
            );
            overridden.push(OverriddenIndex {
                id: id.clone(),
                dim: name.to_string(),
                labels: labels.clone(),
            });
        }
    }
    overridden
}

/// Groups scanned units into members.
///
/// Every raw unit is a member of its own; consecutive segmented units of the
/// same member folder (its years) are merged.
pub fn plan_members<P>(units: Vec<Unit<P>>) -> Result<Vec<MemberPlan<P>>, Error> {
    let mut plans: Vec<MemberPlan<P>> = Vec::new();

    for unit in units {
        let id = unit.member_id();
        let segmented = matches!(unit.source, UnitSource::Segmented { .. });
        match plans.last_mut() {
            Some(last) if segmented && last.id == id => last.units.push(unit),
            _ => plans.push(MemberPlan {
                id,
                units: vec![unit],
            }),
        }
    }

    let mut seen = HashSet::new();
    for plan in &plans {
        if !seen.insert(plan.id.as_str()) {
            return Err(Error::DuplicateMember {
                id: plan.id.clone(),
            });
        }
    }

    Ok(plans)
}

/// Opens the parts of a member, at most `concurrency` at a time,
/// concatenates them along `time` in plan order and tags the result with a
/// singleton `member` dimension.
///
/// The first failing part cancels the others.
#[instrument(skip_all, fields(member = %plan.id))]
pub async fn load_member<Q, P, R>(
    reader: &R,
    plan: &MemberPlan<P>,
    grid: &Q,
    config: &ReaderConfig,
    join: JoinPolicy,
    concurrency: usize,
) -> Result<Dataset, Error>
where
    Q: ?Sized + Sync,
    P: Borrow<Q> + Sync,
    R: DatasetReader<Q> + ?Sized,
{
    let parts = plan.parts();
    debug!(parts = parts.len(), "Loading member");

    let datasets: Vec<Dataset> = stream::iter(&parts)
        .map(|(id, path)| async move {
            reader
                .open_dataset(Borrow::<Q>::borrow(*path), grid, config)
                .await
                .map_err(|e| Error::unit_load(id.clone(), e))
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let dataset = match <[Dataset; 1]>::try_from(datasets) {
        Ok([single]) => single,
        Err(datasets) => {
            if join == JoinPolicy::Override {
                let ids: Vec<String> = parts.iter().map(|(id, _)| id.clone()).collect();
                overridden_indexes(&ids, &datasets, TIME_DIM);
            }
            let joined = concat(datasets, TIME_DIM, join).map_err(|e| Error::Assembly {
                first: parts[0].0.clone(),
                second: parts[e.index].0.clone(),
                mismatch: e.mismatch,
            })?;

            if let Some(time) = joined.index(TIME_DIM) {
                if !time.is_strictly_increasing() {
                    warn!(
                        member = %plan.id,
                        "Time coordinate is not strictly increasing after joining segments"
                    );
                }
            }
            joined
        }
    };

    dataset
        .expand_dims(MEMBER_DIM, Coordinate::label(plan.id.as_str()))
        .map_err(|e| Error::unit_load(plan.id.clone(), e))
}
