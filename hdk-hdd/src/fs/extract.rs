//! Copying volume trees to the host filesystem.

use std::fs::{self, File, FileTimes};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use derive_builder::Builder;

use super::walk::TreeWalker;
use super::{Entry, EntryKind, Filesystem};
use crate::error::HddError;

/// Options for [`copy_to_host`].
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ExtractOptions {
    /// Set host access and modification times from the volume.
    #[builder(default = "true")]
    pub restore_timestamps: bool,
    /// Rewrite names the host cannot store (see [`sanitize_component`]).
    #[builder(default = "true")]
    pub sanitize_names: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            restore_timestamps: true,
            sanitize_names: true,
        }
    }
}

/// An entry that could not be copied. The rest of the tree is unaffected.
#[derive(Debug)]
pub struct CopyFailure {
    /// Volume path of the entry.
    pub path: String,
    pub error: HddError,
}

#[derive(Debug, Default)]
pub struct CopyReport {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub failures: Vec<CopyFailure>,
}

const RESERVED_NAMES: [&str; 5] = ["CON", "PRN", "AUX", "NUL", "CLOCK$"];

fn is_reserved(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).to_ascii_uppercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        return true;
    }
    match stem.as_bytes() {
        [b'C', b'O', b'M', d] | [b'L', b'P', b'T', d] => (b'1'..=b'9').contains(d),
        _ => false,
    }
}

/// Make a volume name safe as a host path component: characters hosts
/// reject become `_`, and reserved device names get a `__` prefix.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if (c as u32) < 0x20 => '_',
            c => c,
        })
        .collect();

    if is_reserved(&cleaned) {
        format!("__{cleaned}")
    } else {
        cleaned
    }
}

/// Host path for an entry `components` below the copy root.
pub fn destination_path(dest_root: &Path, components: &[String], sanitize: bool) -> PathBuf {
    let mut path = dest_root.to_path_buf();
    for name in components {
        if sanitize {
            path.push(sanitize_component(name));
        } else {
            path.push(name);
        }
    }
    path
}

fn system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn file_times(entry: &Entry) -> FileTimes {
    FileTimes::new()
        .set_accessed(system_time(entry.atime))
        .set_modified(system_time(entry.mtime))
}

fn copy_file<F: Filesystem + ?Sized>(
    fs: &mut F,
    entry: &Entry,
    path: &Path,
    options: &ExtractOptions,
) -> Result<u64, HddError> {
    let mut writer = BufWriter::new(File::create(path)?);
    let written = fs.read_file(entry, &mut writer)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;

    if options.restore_timestamps {
        file.set_times(file_times(entry))?;
    }
    Ok(written)
}

/// Best effort: not every host can open a directory for writing times.
fn restore_dir_times(path: &Path, entry: &Entry) {
    let result = File::open(path).and_then(|dir| dir.set_times(file_times(entry)));
    if let Err(_e) = result {
        #[cfg(feature = "logging")]
        {
            tracing::debug!(path = %path.display(), error = %_e, "could not restore directory times");
        }
    }
}

/// Copy the file or directory tree at volume path `source` to `dest`.
///
/// A file is written to `dest`, or into it when `dest` is an existing
/// directory. A directory's contents are copied into `dest`, or into
/// `dest/<name>` when `dest` already exists. Per-entry failures are
/// collected in the report and do not stop the copy.
///
/// # Errors
///
/// Fails only if `source` cannot be resolved or the destination root
/// cannot be created.
pub fn copy_to_host<F: Filesystem + ?Sized>(
    fs: &mut F,
    source: &str,
    dest: &Path,
    options: &ExtractOptions,
) -> Result<CopyReport, HddError> {
    let top = fs.lookup(source, true)?;
    let mut report = CopyReport::default();

    let top_name = if options.sanitize_names {
        sanitize_component(&top.name)
    } else {
        top.name.clone()
    };

    if !top.is_dir() {
        let target = if dest.is_dir() { dest.join(&top_name) } else { dest.to_path_buf() };
        if top.kind != EntryKind::File {
            return Err(HddError::NotAFile(source.to_string()));
        }
        report.bytes += copy_file(fs, &top, &target, options)?;
        report.files += 1;
        return Ok(report);
    }

    let root = if dest.is_dir() && top.name != "/" {
        dest.join(&top_name)
    } else {
        dest.to_path_buf()
    };
    fs::create_dir_all(&root)?;
    report.dirs += 1;

    let mut dirs = vec![(root.clone(), top.clone())];
    let mut walker = TreeWalker::new(fs, source, &top)?;

    while let Some(item) = walker.next() {
        let item = match item {
            Ok(item) => item,
            Err(failure) => {
                #[cfg(feature = "logging")]
                {
                    tracing::warn!(path = %failure.path, error = %failure.error, "skipping entry");
                }
                report.failures.push(failure);
                continue;
            }
        };

        let path = destination_path(&root, &item.components, options.sanitize_names);
        let result = match item.entry.kind {
            EntryKind::Directory => fs::create_dir_all(&path).map_err(HddError::from).map(|()| {
                report.dirs += 1;
                dirs.push((path.clone(), item.entry.clone()));
            }),
            EntryKind::File => copy_file(walker.filesystem(), &item.entry, &path, options).map(|n| {
                report.files += 1;
                report.bytes += n;
            }),
            EntryKind::Symlink | EntryKind::Other => {
                #[cfg(feature = "logging")]
                {
                    tracing::debug!(path = %path.display(), "skipping special file");
                }
                Ok(())
            }
        };

        if let Err(error) = result {
            let volume_path = super::join_path(source, &item.components.join("/"));
            #[cfg(feature = "logging")]
            {
                tracing::warn!(path = %volume_path, %error, "copy failed");
            }
            report.failures.push(CopyFailure {
                path: volume_path,
                error,
            });
        }
    }

    // Children modify their parent's mtime, so directories go last
    if options.restore_timestamps {
        for (path, entry) in dirs.iter().rev() {
            restore_dir_times(path, entry);
        }
    }

    #[cfg(feature = "logging")]
    {
        tracing::info!(
            files = report.files,
            dirs = report.dirs,
            bytes = report.bytes,
            failures = report.failures.len(),
            "copy finished"
        );
    }

    Ok(report)
}
