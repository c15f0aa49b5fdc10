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

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::inventory::{AddFileResult, InventoryUpdater, VersionNum};
use crate::storage::paths;
use crate::util;

/// The mutating handle passed to [`crate::repo::OcflRepository::update_object`]
/// callbacks.
///
/// The handle stages content into the version's scratch directory and
/// records state changes in the inventory updater. The facade owns the
/// commit: if the callback returns an error, everything staged here is
/// deleted and nothing reaches storage.
pub struct ObjectUpdater<'a> {
    inventory_updater: &'a mut InventoryUpdater,
    staging_dir: &'a Path,
    content_directory: String,
    algorithm: DigestAlgorithm,
}

impl<'a> ObjectUpdater<'a> {
    pub(super) fn new(
        inventory_updater: &'a mut InventoryUpdater,
        staging_dir: &'a Path,
        content_directory: String,
    ) -> Self {
        let algorithm = inventory_updater.digest_algorithm();
        Self {
            inventory_updater,
            staging_dir,
            content_directory,
            algorithm,
        }
    }

    /// Stage the bytes from `reader` at `logical_path`.
    ///
    /// Content identical to an existing blob is deduplicated: the state is
    /// updated but no new content is staged.
    ///
    /// # Errors
    /// - `Error::AlreadyExists`: The path exists and `overwrite` is false.
    /// - `Error::InvalidPath`: The logical path is invalid.
    pub fn write_file(
        &mut self,
        mut reader: impl Read,
        logical_path: &str,
        overwrite: bool,
    ) -> Result<AddFileResult> {
        // The digest decides where (and whether) the content lands, so the
        // bytes are spooled to a scratch file while hashing.
        let scratch = self.staging_dir.join(format!(".part-{}", Uuid::new_v4()));
        let mut hasher = self.algorithm.hasher();

        {
            let mut out = File::create(&scratch)?;
            let mut buffer = [0u8; 16 * 1024];
            loop {
                let read = reader.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
                out.write_all(&buffer[..read])?;
            }
        }

        let digest = hex::encode(hasher.finalize());
        let result = match self
            .inventory_updater
            .add_file_with_digest(digest, logical_path, overwrite)
        {
            Ok(result) => result,
            Err(error) => {
                let _ = fs::remove_file(&scratch);
                return Err(error);
            }
        };

        // An overwritten blob must be cleaned up before the new one lands,
        // since the new blob may reuse the freed content path.
        self.cleanup_retired();

        if result.new_blob {
            let destination = self.staged_path(&result.content_path);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&scratch, &destination)?;
        } else {
            fs::remove_file(&scratch)?;
        }

        Ok(result)
    }

    /// Stage the file or directory at `source` under `logical_path`.
    ///
    /// For a directory, every file beneath it is added with its relative
    /// path appended to `logical_path`. An empty `logical_path` places
    /// directory contents at the version root, and a single file under its
    /// own file name. With `move_source`, staged files are moved instead of
    /// copied and `source` is consumed.
    pub fn add_path(
        &mut self,
        source: &Path,
        logical_path: &str,
        move_source: bool,
        overwrite: bool,
    ) -> Result<()> {
        if source.is_file() {
            let logical = if logical_path.is_empty() {
                source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        Error::InvalidValue(format!("{} has no file name", source.display()))
                    })?
            } else {
                logical_path.to_owned()
            };
            self.stage_file(source, &logical, move_source, overwrite)?;

            if move_source {
                let _ = fs::remove_file(source);
            }
            return Ok(());
        }

        if !source.is_dir() {
            return Err(Error::NotFound(format!(
                "{} does not exist",
                source.display()
            )));
        }

        for entry in WalkDir::new(source) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(source)
                .expect("walked entry must be under its root");
            let logical = crate::path::join(&[
                logical_path,
                &util::path_to_forward_slashes(relative),
            ]);

            self.stage_file(entry.path(), &logical, move_source, overwrite)?;
        }

        if move_source {
            util::safe_delete_dir(source);
        }
        Ok(())
    }

    /// Remove `logical_path` from the new version. A blob published in an
    /// earlier version stays in the manifest and remains reachable there; a
    /// blob first staged by this version is discarded with the path.
    pub fn remove_file(&mut self, logical_path: &str) -> bool {
        let removed = self.inventory_updater.remove_file(logical_path);
        self.cleanup_retired();
        removed
    }

    /// Rename `src` to `dst` without touching content.
    pub fn rename_file(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let result = self.inventory_updater.rename_file(src, dst, overwrite);
        self.cleanup_retired();
        result
    }

    /// Bind `dst` to the content `src` had in `version_num`.
    pub fn reinstate_file(
        &mut self,
        version_num: VersionNum,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<()> {
        let result = self
            .inventory_updater
            .reinstate_file(version_num, src, dst, overwrite);
        self.cleanup_retired();
        result
    }

    /// Record an alternate-algorithm digest for a file staged in this
    /// version.
    pub fn add_file_fixity(
        &mut self,
        logical_path: &str,
        algorithm: DigestAlgorithm,
        value: &str,
    ) -> Result<()> {
        self.inventory_updater
            .add_file_fixity(logical_path, algorithm, value)
    }

    /// Empty the new version's state.
    pub fn clear_state(&mut self) {
        self.inventory_updater.clear_state()
    }

    fn stage_file(
        &mut self,
        source: &Path,
        logical_path: &str,
        move_source: bool,
        overwrite: bool,
    ) -> Result<()> {
        let digest = self.algorithm.hash_file(source)?;
        let result = self
            .inventory_updater
            .add_file_with_digest(digest, logical_path, overwrite)?;
        self.cleanup_retired();

        if result.new_blob {
            let destination = self.staged_path(&result.content_path);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            if move_source {
                match fs::rename(source, &destination) {
                    Ok(()) => {}
                    // Different filesystem; fall back to a copy.
                    Err(_) => {
                        fs::copy(source, &destination)?;
                    }
                }
            } else {
                fs::copy(source, &destination)?;
            }
        }

        Ok(())
    }

    fn staged_path(&self, content_path: &str) -> PathBuf {
        self.staging_dir.join(paths::content_path_in_staging(
            content_path,
            &self.content_directory,
        ))
    }

    /// Delete staged files whose manifest entries were retired. Retired
    /// paths from earlier mutable-head revisions are not in this staging
    /// directory; the storage engine prunes those.
    fn cleanup_retired(&mut self) {
        for content_path in self.inventory_updater.take_retired_content_paths() {
            let staged = self.staged_path(&content_path);
            if staged.exists() {
                let _ = fs::remove_file(staged);
            }
        }
    }
}
