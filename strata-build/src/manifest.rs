//! The build manifest: one entry per source file, with per-file point stats.
//!
//! Stats are accumulated locally by the worker inserting a file and folded
//! in once, when the file completes, never per point.

use crate::error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use strata_core::Bounds;

/// Per-file (and aggregate) point accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointStats {
    pub inserts: u64,
    pub out_of_bounds: u64,
    pub overflows: u64,
}

impl PointStats {
    pub fn add(&mut self, other: &PointStats) {
        self.inserts += other.inserts;
        self.out_of_bounds += other.out_of_bounds;
        self.overflows += other.overflows;
    }
}

/// Aggregate file accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileStats {
    pub inserts: u64,
    pub omits: u64,
    pub errors: u64,
}

/// Where a source file stands in the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Not yet processed.
    Outstanding,
    /// Fully streamed through the insert pipeline.
    Inserted,
    /// Skipped: its bounds don't overlap the build.
    Omitted,
    /// Failed; see `error`.
    Error,
}

/// One source-file entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub status: FileStatus,
    /// Pre-scanned bounds, when known; lets the sequencer omit files that
    /// cannot contribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_points: Option<u64>,
    #[serde(default)]
    pub stats: PointStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: FileStatus::Outstanding,
            bounds: None,
            num_points: None,
            stats: PointStats::default(),
            error: None,
        }
    }
}

/// The serialized manifest document. Aggregates are recomputed at save time;
/// the file list is the source of truth.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDoc {
    files: Vec<FileInfo>,
    #[serde(default)]
    file_stats: FileStats,
    #[serde(default)]
    point_stats: PointStats,
}

/// The set of source files feeding a build.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    files: Vec<FileInfo>,
}

impl Manifest {
    pub fn new(files: Vec<FileInfo>) -> Self {
        Self { files }
    }

    pub fn from_paths(paths: impl IntoIterator<Item = String>) -> Self {
        Self {
            files: paths.into_iter().map(FileInfo::new).collect(),
        }
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, origin: usize) -> &FileInfo {
        &self.files[origin]
    }

    pub fn get_mut(&mut self, origin: usize) -> &mut FileInfo {
        &mut self.files[origin]
    }

    /// Append entries not already present by path (continuation with new
    /// inputs).
    pub fn append_files(&mut self, files: impl IntoIterator<Item = FileInfo>) {
        for file in files {
            if !self.files.iter().any(|f| f.path == file.path) {
                self.files.push(file);
            }
        }
    }

    pub fn set_status(&mut self, origin: usize, status: FileStatus) {
        self.files[origin].status = status;
    }

    pub fn add_stats(&mut self, origin: usize, stats: &PointStats) {
        self.files[origin].stats.add(stats);
    }

    /// Origins still waiting to be processed.
    pub fn outstanding(&self) -> impl Iterator<Item = usize> + '_ {
        self.files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.status == FileStatus::Outstanding)
            .map(|(i, _)| i)
    }

    /// Total point stats across all files.
    pub fn point_stats(&self) -> PointStats {
        let mut total = PointStats::default();
        for f in &self.files {
            total.add(&f.stats);
        }
        total
    }

    /// Aggregate file outcomes.
    pub fn file_stats(&self) -> FileStats {
        let mut stats = FileStats::default();
        for f in &self.files {
            match f.status {
                FileStatus::Inserted => stats.inserts += 1,
                FileStatus::Omitted => stats.omits += 1,
                FileStatus::Error => stats.errors += 1,
                FileStatus::Outstanding => {}
            }
        }
        stats
    }

    /// Fold a subset build's manifest into this one. Both builds processed
    /// the same file list; stats sum and the worse status wins.
    pub fn merge(&mut self, other: &Manifest) -> Result<()> {
        if self.files.len() != other.files.len() {
            return Err(BuildError::Merge(format!(
                "manifests disagree: {} files vs {}",
                self.files.len(),
                other.files.len()
            )));
        }
        for (mine, theirs) in self.files.iter_mut().zip(other.files.iter()) {
            if mine.path != theirs.path {
                return Err(BuildError::Merge(format!(
                    "manifest entries disagree: {} vs {}",
                    mine.path, theirs.path
                )));
            }
            mine.stats.add(&theirs.stats);
            mine.status = match (mine.status, theirs.status) {
                (FileStatus::Error, _) | (_, FileStatus::Error) => FileStatus::Error,
                (FileStatus::Outstanding, _) | (_, FileStatus::Outstanding) => {
                    FileStatus::Outstanding
                }
                (FileStatus::Inserted, _) | (_, FileStatus::Inserted) => FileStatus::Inserted,
                _ => FileStatus::Omitted,
            };
            if mine.error.is_none() {
                mine.error = theirs.error.clone();
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let doc = ManifestDoc {
            files: self.files.clone(),
            file_stats: self.file_stats(),
            point_stats: self.point_stats(),
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let doc: ManifestDoc = serde_json::from_slice(bytes)?;
        Ok(Self { files: doc.files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut manifest = Manifest::from_paths(["a.sbin".to_string(), "b.sbin".to_string()]);
        manifest.add_stats(
            0,
            &PointStats {
                inserts: 10,
                out_of_bounds: 1,
                overflows: 0,
            },
        );
        manifest.set_status(0, FileStatus::Inserted);

        let bytes = manifest.to_json().unwrap();
        let back = Manifest::from_json(&bytes).unwrap();
        assert_eq!(back.files(), manifest.files());
        assert_eq!(back.point_stats().inserts, 10);
        assert_eq!(back.file_stats().inserts, 1);
    }

    #[test]
    fn test_outstanding_iteration() {
        let mut manifest = Manifest::from_paths(["a".to_string(), "b".to_string(), "c".to_string()]);
        manifest.set_status(1, FileStatus::Inserted);
        let outstanding: Vec<usize> = manifest.outstanding().collect();
        assert_eq!(outstanding, vec![0, 2]);
    }

    #[test]
    fn test_merge_sums_and_combines_status() {
        let mut a = Manifest::from_paths(["x".to_string()]);
        a.set_status(0, FileStatus::Inserted);
        a.add_stats(
            0,
            &PointStats {
                inserts: 5,
                ..Default::default()
            },
        );
        let mut b = Manifest::from_paths(["x".to_string()]);
        b.set_status(0, FileStatus::Omitted);
        b.add_stats(
            0,
            &PointStats {
                inserts: 7,
                ..Default::default()
            },
        );

        a.merge(&b).unwrap();
        assert_eq!(a.get(0).stats.inserts, 12);
        assert_eq!(a.get(0).status, FileStatus::Inserted);
    }

    #[test]
    fn test_merge_rejects_mismatched_lists() {
        let mut a = Manifest::from_paths(["x".to_string()]);
        let b = Manifest::from_paths(["y".to_string()]);
        assert!(matches!(a.merge(&b), Err(BuildError::Merge(_))));
    }
}
