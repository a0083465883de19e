// Incremental file synchronization engine
//
// Mirrors a source file or directory tree onto a destination, skipping
// files whose size and modification time already match.

use crate::errors::SyncError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, Metadata, Permissions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

/// What to do when a single entry inside a directory cannot be copied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyPolicy {
    /// Abort the whole run on the first failing entry
    #[default]
    FailFast,
    /// Record the failure and keep going with the remaining entries
    ContinueOnError,
}

/// Outcome of syncing one regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Content was copied; carries the number of bytes written
    Copied(u64),
    /// Destination already matched the source, nothing was written
    Unchanged,
}

/// An entry that failed under [`CopyPolicy::ContinueOnError`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub path: PathBuf,
    pub error: String,
}

impl From<SyncError> for SyncFailure {
    fn from(err: SyncError) -> Self {
        Self {
            path: err.path().cloned().unwrap_or_default(),
            error: err.to_string(),
        }
    }
}

/// Aggregate counters for one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_skipped: u64,
    pub directories_created: u64,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Copied(bytes) => {
                self.files_copied += 1;
                self.bytes_copied += bytes;
            }
            FileOutcome::Unchanged => self.files_skipped += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Change-aware copier for a single source/destination pair
#[derive(Debug, Clone, Default)]
pub struct SyncEngine {
    policy: CopyPolicy,
}

impl SyncEngine {
    pub fn new(policy: CopyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CopyPolicy {
        self.policy
    }

    /// Mirror `source` onto `destination`.
    ///
    /// A file source is copied to exactly `destination`; a directory source
    /// is mirrored recursively underneath it. Returns the aggregate counters
    /// for the run. A missing source is always an error, whatever the policy.
    #[instrument(skip_all, fields(source = %source.display(), destination = %destination.display()))]
    pub fn sync(&self, source: &Path, destination: &Path) -> Result<SyncReport, SyncError> {
        let metadata = match fs::metadata(source) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::SourceNotFound(source.to_path_buf()));
            }
            Err(e) => return Err(SyncError::io("read metadata of", source, e)),
        };

        let mut report = SyncReport::default();

        if metadata.is_dir() {
            ensure_outside_source(source, destination)?;
            self.sync_directory(source, destination, &metadata, &mut report)?;
        } else {
            if let Some(parent) = destination.parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    fs::create_dir_all(parent)
                        .map_err(|e| SyncError::io("create directory", parent, e))?;
                    report.directories_created += 1;
                }
            }
            let outcome = sync_file(source, destination)?;
            report.record(outcome);
        }

        debug!(
            files_copied = report.files_copied,
            bytes_copied = report.bytes_copied,
            files_skipped = report.files_skipped,
            failures = report.failures.len(),
            "Sync finished"
        );

        Ok(report)
    }

    fn sync_directory(
        &self,
        source: &Path,
        destination: &Path,
        metadata: &Metadata,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        // Permissions of newly created directories are applied once the walk
        // is over so read-only source directories can still be filled.
        let mut created = Vec::new();

        if let Some(permissions) = ensure_directory(destination, metadata, report)? {
            created.push((destination.to_path_buf(), permissions));
        }

        let mut entries = WalkDir::new(source)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.handle_failure(e.into(), report)?;
                    continue;
                }
            };

            let target = match entry.path().strip_prefix(source) {
                Ok(relative) => destination.join(relative),
                Err(_) => {
                    let err = SyncError::Walk {
                        path: entry.path().to_path_buf(),
                        reason: "entry is outside the source tree".to_string(),
                    };
                    self.handle_failure(err, report)?;
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                let created_dir = entry
                    .metadata()
                    .map_err(SyncError::from)
                    .and_then(|metadata| ensure_directory(&target, &metadata, report));
                match created_dir {
                    Ok(Some(permissions)) => created.push((target, permissions)),
                    Ok(None) => {}
                    Err(e) => {
                        self.handle_failure(e, report)?;
                        entries.skip_current_dir();
                    }
                }
            } else if file_type.is_file() {
                match sync_file(entry.path(), &target) {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => self.handle_failure(e, report)?,
                }
            } else {
                debug!(path = %entry.path().display(), "Skipping special file");
                report.files_skipped += 1;
            }
        }

        for (path, permissions) in created.into_iter().rev() {
            if let Err(e) = fs::set_permissions(&path, permissions) {
                self.handle_failure(SyncError::io("set permissions on", &path, e), report)?;
            }
        }

        Ok(())
    }

    fn handle_failure(&self, err: SyncError, report: &mut SyncReport) -> Result<(), SyncError> {
        match self.policy {
            CopyPolicy::FailFast => Err(err),
            CopyPolicy::ContinueOnError => {
                warn!(error = %err, "Entry failed, continuing with remaining entries");
                report.failures.push(err.into());
                Ok(())
            }
        }
    }
}

/// Refuse a destination nested in the source tree; the walk would descend
/// into the copies it creates.
fn ensure_outside_source(source: &Path, destination: &Path) -> Result<(), SyncError> {
    let source_dir = resolve(source)?;
    let resolved_destination = resolve(destination)?;
    if resolved_destination.starts_with(&source_dir) {
        return Err(SyncError::DestinationInsideSource {
            source_dir,
            destination: destination.to_path_buf(),
        });
    }
    Ok(())
}

/// Canonicalize the longest existing prefix of `path` and append the rest
fn resolve(path: &Path) -> Result<PathBuf, SyncError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| SyncError::io("resolve", path, e))?
            .join(path)
    };

    let mut missing = Vec::new();
    let mut existing = absolute.as_path();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                return Ok(missing.into_iter().rev().fold(resolved, |acc, part| acc.join(part)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(SyncError::io("resolve", path, e)),
                }
            }
            Err(e) => return Err(SyncError::io("resolve", path, e)),
        }
    }
}

/// Create `path` if missing. Returns the permissions to apply to it when it
/// was created by this run.
fn ensure_directory(
    path: &Path,
    source_metadata: &Metadata,
    report: &mut SyncReport,
) -> Result<Option<Permissions>, SyncError> {
    if path.is_dir() {
        return Ok(None);
    }

    fs::create_dir_all(path).map_err(|e| SyncError::io("create directory", path, e))?;
    report.directories_created += 1;
    Ok(Some(source_metadata.permissions()))
}

/// Copy one regular file unless the destination already matches it.
///
/// After a real copy the destination takes over the source's modification
/// time and permissions so the next comparison stays accurate.
pub fn sync_file(source: &Path, destination: &Path) -> Result<FileOutcome, SyncError> {
    let source_metadata =
        fs::metadata(source).map_err(|e| SyncError::io("read metadata of", source, e))?;

    match fs::metadata(destination) {
        Ok(destination_metadata) => {
            if is_unchanged(&source_metadata, &destination_metadata) {
                return Ok(FileOutcome::Unchanged);
            }
            if destination_metadata.is_file() && destination_metadata.permissions().readonly() {
                fs::remove_file(destination)
                    .map_err(|e| SyncError::io("replace", destination, e))?;
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(SyncError::io("read metadata of", destination, e)),
    }

    let mut reader = File::open(source).map_err(|e| SyncError::io("open", source, e))?;
    let mut writer =
        File::create(destination).map_err(|e| SyncError::io("create", destination, e))?;

    let written = io::copy(&mut reader, &mut writer)
        .map_err(|e| SyncError::io("copy content to", destination, e))?;

    let modified = source_metadata
        .modified()
        .map_err(|e| SyncError::io("read modification time of", source, e))?;
    writer
        .set_modified(modified)
        .map_err(|e| SyncError::io("set modification time on", destination, e))?;
    writer
        .set_permissions(source_metadata.permissions())
        .map_err(|e| SyncError::io("set permissions on", destination, e))?;

    Ok(FileOutcome::Copied(written))
}

fn is_unchanged(source: &Metadata, destination: &Metadata) -> bool {
    if !destination.is_file() || source.len() != destination.len() {
        return false;
    }
    match (source.modified(), destination.modified()) {
        (Ok(source_modified), Ok(destination_modified)) => source_modified == destination_modified,
        _ => false,
    }
}

/// Total size in bytes of all regular files under `path`
pub fn directory_size(path: &Path) -> Result<u64, SyncError> {
    if !path.exists() {
        return Err(SyncError::SourceNotFound(path.to_path_buf()));
    }

    let mut size = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            size += entry.metadata()?.len();
        }
    }
    Ok(size)
}
