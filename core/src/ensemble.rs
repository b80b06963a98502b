use std::{borrow::Borrow, path::Path};

use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    dataset::{concat, Dataset, JoinPolicy},
    error::Error,
    file::{DirEntry, FileSystem, OsFs},
    load::{load_member, overridden_indexes, plan_members, MemberPlan, OverriddenIndex, MEMBER_DIM},
    reader::{DatasetReader, ReaderConfig},
    scan::{scan, Layout, ScanOptions},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort on the first member that fails to load.
    #[default]
    FailFast,
    /// Leave failing members out and report them in [`Assembled::skipped`].
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub reader: ReaderConfig,
    pub scan: ScanOptions,
    pub join: JoinPolicy,
    pub failure_policy: FailurePolicy,
    /// Upper bound on members being loaded at the same time
    pub max_concurrent_loads: usize,
    /// Upper bound on segments of one member being opened at the same time
    pub max_concurrent_segments: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            scan: ScanOptions::default(),
            join: JoinPolicy::default(),
            failure_policy: FailurePolicy::default(),
            max_concurrent_loads: 8,
            max_concurrent_segments: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsemblePlan<P> {
    pub layout: Layout,
    pub members: Vec<MemberPlan<P>>,
}

#[derive(Debug)]
pub struct SkippedMember {
    pub id: String,
    pub error: Error,
}

#[derive(Debug)]
pub struct Assembled {
    pub dataset: Dataset,
    pub layout: Layout,
    /// Labels of the `member` dimension, in order
    pub members: Vec<String>,
    /// Always empty with [`FailurePolicy::FailFast`]
    pub skipped: Vec<SkippedMember>,
    /// Labels the `member` concatenation replaced with those of the first
    /// member, e.g. the timestamps of later years in a year-first ensemble.
    /// Always empty with [`JoinPolicy::Exact`].
    pub overridden: Vec<OverriddenIndex>,
}

/// Discovers and assembles an ensemble from a root directory.
pub struct Ensemble<Fs: FileSystem, R> {
    fs: Fs,
    reader: R,
    config: EnsembleConfig,
}

impl<Fs, R> Ensemble<Fs, R>
where
    Fs: FileSystem,
    R: DatasetReader<Fs::PathRef>,
{
    pub fn new(fs: Fs, reader: R, config: EnsembleConfig) -> Self {
        Self { fs, reader, config }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Scans `root` and groups the units into members without loading anything.
    pub async fn plan(
        &self,
        root: &Fs::PathRef,
        grid: &Fs::PathRef,
    ) -> Result<EnsemblePlan<Fs::Path>, Error> {
        plan_ensemble(&self.fs, root, grid, &self.config.scan).await
    }

    /// Loads every member below `root` and concatenates them along `member`.
    #[instrument(skip(self))]
    pub async fn assemble(
        &self,
        root: &Fs::PathRef,
        grid: &Fs::PathRef,
    ) -> Result<Assembled, Error> {
        let plan = self.plan(root, grid).await?;
        debug!(layout = ?plan.layout, members = plan.members.len(), "Loading members");

        let results = self.load_all(&plan.members, grid).await?;

        let mut members = Vec::new();
        let mut datasets = Vec::new();
        let mut skipped = Vec::new();
        for (member, result) in plan.members.iter().zip(results) {
            match result {
                Ok(dataset) => {
                    members.push(member.id.clone());
                    datasets.push(dataset);
                }
                Err(error) => {
                    warn!(member = %member.id, %error, "Skipping member");
                    skipped.push(SkippedMember {
                        id: member.id.clone(),
                        error,
                    });
                }
            }
        }

        if datasets.is_empty() {
            // Every member failed
            return match skipped.into_iter().next() {
                Some(first) => Err(first.error),
                None => Err(Error::EmptyEnsemble {
                    root: self.fs.display(root),
                }),
            };
        }

        let overridden = match self.config.join {
            JoinPolicy::Override => overridden_indexes(&members, &datasets, MEMBER_DIM),
            JoinPolicy::Exact => Vec::new(),
        };

        let dataset = concat(datasets, MEMBER_DIM, self.config.join).map_err(|e| Error::Assembly {
            first: members[0].clone(),
            second: members[e.index].clone(),
            mismatch: e.mismatch,
        })?;

        info!(
            members = members.len(),
            skipped = skipped.len(),
            "Assembled ensemble"
        );

        Ok(Assembled {
            dataset,
            layout: plan.layout,
            members,
            skipped,
            overridden,
        })
    }

    /// Results come back in plan order. With [`FailurePolicy::FailFast`] the
    /// first error is returned right away, dropping the loads still in flight.
    async fn load_all(
        &self,
        members: &[MemberPlan<Fs::Path>],
        grid: &Fs::PathRef,
    ) -> Result<Vec<Result<Dataset, Error>>, Error> {
        let mut slots: Vec<Option<Result<Dataset, Error>>> =
            members.iter().map(|_| None).collect();

        let mut loads = stream::iter(members.iter().enumerate())
            .map(|(i, member)| async move {
                let result = load_member(
                    &self.reader,
                    member,
                    grid,
                    &self.config.reader,
                    self.config.join,
                    self.config.max_concurrent_segments,
                )
                .await;
                (i, result)
            })
            .buffer_unordered(self.config.max_concurrent_loads.max(1));

        while let Some((i, result)) = loads.next().await {
            match (result, self.config.failure_policy) {
                (Err(error), FailurePolicy::FailFast) => {
                    debug!(member = %members[i].id, "Load failed, cancelling the rest");
                    return Err(error);
                }
                (result, _) => slots[i] = Some(result),
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Scans `root` and groups the units into members.
///
/// Both `root` and `grid` must exist. A grid directory directly below `root`
/// is never mistaken for a year or member.
#[instrument(skip(fs, options))]
pub async fn plan_ensemble<Fs: FileSystem>(
    fs: &Fs,
    root: &Fs::PathRef,
    grid: &Fs::PathRef,
    options: &ScanOptions,
) -> Result<EnsemblePlan<Fs::Path>, Error> {
    ensure_exists(fs, root).await?;
    ensure_exists(fs, grid).await?;

    let mut options = options.clone();
    if let Some(name) = child_name(fs, root, grid).await? {
        debug!(%name, "Grid directory lives under the root, excluding it");
        options.exclude.push(name);
    }

    let scan = scan(fs, root, &options).await?;
    if scan.units.is_empty() {
        return Err(Error::EmptyEnsemble {
            root: fs.display(root),
        });
    }

    Ok(EnsemblePlan {
        layout: scan.layout,
        members: plan_members(scan.units)?,
    })
}

async fn ensure_exists<Fs: FileSystem>(fs: &Fs, path: &Fs::PathRef) -> Result<(), Error> {
    let exists = fs
        .exists(path)
        .await
        .map_err(|e| Error::fs(fs.display(path), e))?;
    if exists {
        Ok(())
    } else {
        Err(Error::NotFound {
            path: fs.display(path),
        })
    }
}

/// Name of the entry of `directory` that resolves to `path`, if any.
///
/// Both sides are canonicalized, so `root/../root/grid` or a symlink inside
/// `directory` still match.
async fn child_name<Fs: FileSystem>(
    fs: &Fs,
    directory: &Fs::PathRef,
    path: &Fs::PathRef,
) -> Result<Option<String>, Error> {
    let target = fs
        .canonicalize(path)
        .await
        .map_err(|e| Error::fs(fs.display(path), e))?;
    let entries = fs
        .read_dir(directory)
        .await
        .map_err(|e| Error::fs(fs.display(directory), e))?;

    for entry in entries.into_iter().filter(DirEntry::is_dir) {
        let candidate = fs.file_path(directory, &entry.name);
        match fs.canonicalize(Borrow::<Fs::PathRef>::borrow(&candidate)).await {
            Ok(resolved) if resolved == target => return Ok(Some(entry.name)),
            Ok(_) => {}
            Err(error) => trace!(name = %entry.name, %error, "Cannot resolve entry"),
        }
    }
    Ok(None)
}

/// Assembles the ensemble below `root` from the local file system.
pub async fn open_ensemble<R>(
    root: impl AsRef<Path>,
    grid: impl AsRef<Path>,
    reader: R,
    config: EnsembleConfig,
) -> Result<Dataset, Error>
where
    R: DatasetReader<Path>,
{
    let ensemble = Ensemble::new(OsFs, reader, config);
    let assembled = ensemble.assemble(root.as_ref(), grid.as_ref()).await?;
    Ok(assembled.dataset)
}
