//! Discovery of ensemble units below a root directory.
//!
//! Two layouts are understood:
//!
//! ```text
//! year-first                       member-first
//! root/                            root/
//!   2001/                            m01/
//!     m01/   <- raw model output       2001/
//!     m02/                               seg0000.zarr
//!   2002/                                seg0001.zarr
//!     ...                              2002/
//!                                        ...
//! ```
//!
//! Everything is listed in lexicographic order so the resulting ensemble is
//! reproducible.

use std::borrow::Borrow;

use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::{
    error::Error,
    file::{DirEntry, FileSystem},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// `root/<year>/<member>/`, one raw output directory per unit
    YearFirst,
    /// `root/<member>/<year>/<segment>.zarr`, pre-chunked segments
    MemberFirst,
}

/// Whether every year of a year-first layout has to contain the same members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberSet {
    #[default]
    Uniform,
    PerYear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// `None` detects the layout from the root's contents.
    pub layout: Option<Layout>,
    /// Extensions marking segment entries, without the leading dot.
    pub segment_extensions: Vec<String>,
    pub member_set: MemberSet,
    /// Names of root entries that are never treated as years or members.
    pub exclude: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            layout: None,
            segment_extensions: vec!["zarr".to_string()],
            member_set: MemberSet::default(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Constructor)]
pub struct UnitKey {
    pub year: String,
    pub member: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment<P> {
    pub name: String,
    pub path: P,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitSource<P> {
    /// A directory holding the reader's native output files.
    Raw { directory: P },
    /// Time segments, in the order they have to be concatenated.
    Segmented { segments: Vec<Segment<P>> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unit<P> {
    pub key: UnitKey,
    pub source: UnitSource<P>,
}

impl<P> Unit<P> {
    /// Identifier of the member this unit contributes to.
    pub fn member_id(&self) -> String {
        match self.source {
            UnitSource::Raw { .. } => format!("{}_{}", self.key.year, self.key.member),
            UnitSource::Segmented { .. } => self.key.member.clone(),
        }
    }

    /// Identifier of the unit itself, used in errors.
    pub fn id(&self) -> String {
        match self.source {
            UnitSource::Raw { .. } => self.member_id(),
            UnitSource::Segmented { .. } => format!("{}/{}", self.key.member, self.key.year),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan<P> {
    pub layout: Layout,
    pub units: Vec<Unit<P>>,
}

/// Enumerates the units below `root`.
///
/// Returns [`Error::NotFound`] if `root` doesn't exist. Finding no units at
/// all is not an error here.
#[instrument(skip(fs, options))]
pub async fn scan<Fs: FileSystem>(
    fs: &Fs,
    root: &Fs::PathRef,
    options: &ScanOptions,
) -> Result<Scan<Fs::Path>, Error> {
    let exists = fs
        .exists(root)
        .await
        .map_err(|e| Error::fs(fs.display(root), e))?;
    if !exists {
        return Err(Error::NotFound {
            path: fs.display(root),
        });
    }

    let entries: Vec<DirEntry> = list(fs, root)
        .await?
        .into_iter()
        .filter(|e| {
            if options.exclude.contains(&e.name) {
                trace!(name = %e.name, "Skipping excluded entry");
                return false;
            }
            e.is_dir()
        })
        .collect();

    let layout = options.layout.unwrap_or_else(|| detect_layout(&entries));
    debug!(?layout, "Scanning ensemble root");

    let units = match layout {
        Layout::YearFirst => scan_year_first(fs, root, &entries, options.member_set).await?,
        Layout::MemberFirst => {
            scan_member_first(fs, root, &entries, &options.segment_extensions).await?
        }
    };

    if options.layout.is_none() && layout == Layout::YearFirst {
        if let Some(key) = numeric_members(&units).first() {
            warn!(
                year = %key.year,
                member = %key.member,
                "Detected a year-first layout with numeric member names, \
                 set the layout explicitly if this is a member-first ensemble"
            );
        }
    }

    debug!(units = units.len(), "Scan finished");
    Ok(Scan { layout, units })
}

/// Year-first as soon as the root holds a numeric directory.
///
/// Member-first ensembles with purely numeric member names need an explicit
/// layout.
pub fn detect_layout(entries: &[DirEntry]) -> Layout {
    if entries.iter().any(|e| e.is_dir() && is_year(&e.name)) {
        Layout::YearFirst
    } else {
        Layout::MemberFirst
    }
}

async fn scan_year_first<Fs: FileSystem>(
    fs: &Fs,
    root: &Fs::PathRef,
    entries: &[DirEntry],
    member_set: MemberSet,
) -> Result<Vec<Unit<Fs::Path>>, Error> {
    let mut units = Vec::new();
    let mut expected: Option<Vec<String>> = None;

    for year in entries {
        if !is_year(&year.name) {
            trace!(name = %year.name, "Skipping non-numeric directory");
            continue;
        }

        let year_path = fs.file_path(root, &year.name);
        let members: Vec<String> = subdirectories(fs, year_path.borrow()).await?;

        if member_set == MemberSet::Uniform {
            match &expected {
                Some(expected) if *expected != members => {
                    return Err(Error::NonUniformMembers {
                        year: year.name.clone(),
                        expected: expected.clone(),
                        found: members,
                    });
                }
                Some(_) => {}
                None => expected = Some(members.clone()),
            }
        }

        for member in members {
            let directory = fs.file_path(year_path.borrow(), &member);
            units.push(Unit {
                key: UnitKey::new(year.name.clone(), member),
                source: UnitSource::Raw { directory },
            });
        }
    }

    Ok(units)
}

async fn scan_member_first<Fs: FileSystem>(
    fs: &Fs,
    root: &Fs::PathRef,
    entries: &[DirEntry],
    extensions: &[String],
) -> Result<Vec<Unit<Fs::Path>>, Error> {
    let mut units = Vec::new();

    for member in entries {
        let member_path = fs.file_path(root, &member.name);

        for year in subdirectories(fs, member_path.borrow()).await? {
            let year_path = fs.file_path(member_path.borrow(), &year);

            let segments: Vec<_> = list(fs, year_path.borrow())
                .await?
                .into_iter()
                .filter(|e| is_segment(&e.name, extensions))
                .map(|e| Segment {
                    path: fs.file_path(year_path.borrow(), &e.name),
                    name: e.name,
                })
                .collect();

            if segments.is_empty() {
                trace!(member = %member.name, %year, "No segments, skipping year");
                continue;
            }

            units.push(Unit {
                key: UnitKey::new(year, member.name.clone()),
                source: UnitSource::Segmented { segments },
            });
        }
    }

    Ok(units)
}

/// Directory listing sorted by name.
async fn list<Fs: FileSystem>(fs: &Fs, dir: &Fs::PathRef) -> Result<Vec<DirEntry>, Error> {
    let mut entries = fs
        .read_dir(dir)
        .await
        .map_err(|e| Error::fs(fs.display(dir), e))?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

async fn subdirectories<Fs: FileSystem>(
    fs: &Fs,
    dir: &Fs::PathRef,
) -> Result<Vec<String>, Error> {
    Ok(list(fs, dir)
        .await?
        .into_iter()
        .filter(DirEntry::is_dir)
        .map(|e| e.name)
        .collect())
}

/// Year-first units whose member name also looks like a year, as happens
/// when a member-first root with numeric member names is read year-first.
pub fn numeric_members<P>(units: &[Unit<P>]) -> Vec<&UnitKey> {
    units
        .iter()
        .filter(|u| matches!(u.source, UnitSource::Raw { .. }) && is_year(&u.key.member))
        .map(|u| &u.key)
        .collect()
}

fn is_year(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

fn is_segment(name: &str, extensions: &[String]) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext)),
        _ => false,
    }
}
