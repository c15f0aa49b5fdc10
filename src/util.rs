/*
 * Copyright 2023-2025 the ocfl-store authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fmt::Debug;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::digest::DigestAlgorithm;
use crate::error::Result;

/// A source of timestamps for new versions.
///
/// Production code uses [`SystemClock`]; tests inject a fixed clock so that
/// serialized inventories are reproducible.
pub trait Clock: Send + Sync + Debug {
    /// The current time, with offset.
    fn now_utc(&self) -> DateTime<FixedOffset>;
}

/// A [`Clock`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<FixedOffset> {
        Utc::now().fixed_offset()
    }
}

/// Create a uniquely-named staging directory for `object_id` under `work_dir`.
///
/// The object ID is hashed into the directory name so that arbitrary IDs
/// cannot escape the work directory.
pub fn create_staging_dir(work_dir: &Path, object_id: &str) -> Result<PathBuf> {
    let id_hash = &DigestAlgorithm::Sha256.hash_hex(object_id.as_bytes())[..16];
    let staging = work_dir.join(format!("{}-{}", id_hash, Uuid::new_v4()));
    fs::create_dir_all(&staging)?;
    Ok(staging)
}

/// Recursively copy the contents of `src` into `dst`, creating `dst` if needed.
pub fn recursive_copy(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walked entry must be under its root");
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Move the directory at `src` to `dst`.
///
/// Attempts a rename first and falls back to copy-and-delete when `src` and
/// `dst` are on different file systems.
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(error) if error.raw_os_error() == Some(libc_exdev()) => {
            recursive_copy(src, dst)?;
            fs::remove_dir_all(src)?;
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

// EXDEV is stable across the unix platforms this crate targets; windows
// reports cross-device renames with a different code handled by the fallback.
#[cfg(unix)]
fn libc_exdev() -> i32 {
    18
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    17
}

/// Delete a directory tree, logging instead of failing when deletion is not
/// possible.
pub fn safe_delete_dir(path: &Path) {
    if path.exists() {
        if let Err(error) = fs::remove_dir_all(path) {
            warn!("failed to delete directory {}: {}", path.display(), error);
        }
    }
}

/// Write `bytes` to `path` via a sibling temp file, fsync, and an atomic
/// rename over the destination.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_sibling(path);

    {
        let mut file = File::create(&temp_path)?;
        io::Write::write_all(&mut file, bytes)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// The temp-file name `atomic_write` uses next to `path`.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".new");
    path.with_file_name(name)
}

/// List every regular file under `root`, returned as paths relative to `root`
/// with `/` separators.
pub fn list_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("walked entry must be under its root");
            files.push(path_to_forward_slashes(relative));
        }
    }
    files.sort();
    Ok(files)
}

/// Render a relative `Path` as a `/`-separated string.
pub fn path_to_forward_slashes(path: &Path) -> String {
    let mut joined = String::new();
    for component in path.components() {
        if !joined.is_empty() {
            joined.push('/');
        }
        joined.push_str(&component.as_os_str().to_string_lossy());
    }
    joined
}
