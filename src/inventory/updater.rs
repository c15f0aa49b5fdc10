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

//! The transactional builder that produces the next inventory from a base
//! inventory plus a sequence of state mutations.
//!
//! An updater never modifies the inventory it was created from. Mutations
//! accumulate in the updater and become visible only when
//! [`InventoryUpdater::build_new_inventory`] succeeds, which also runs shallow
//! validation, so an invalid inventory can never be observed by a caller.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Timelike};

use crate::config::{OcflConfig, SpecVersion};
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::inventory::{Inventory, RevisionNum, User, Version, VersionNum};
use crate::path::{join, validate_content_path, validate_logical_path};
use crate::storage::paths;

/// Maps a logical path to the relative path a new blob is stored under,
/// inside the version's content directory.
///
/// The default [`IdentityPathMapper`] mirrors the logical path;
/// [`HashedPathMapper`] flattens content into digest-named files, which
/// avoids path-length and character issues on restrictive file systems.
pub trait ContentPathMapper: Send + Sync + Debug {
    /// The content path, relative to the version content directory, for a
    /// blob with `digest` being bound to `logical_path`.
    fn map(&self, logical_path: &str, digest: &str) -> String;
}

/// Stores each new blob at its logical path.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPathMapper;

impl ContentPathMapper for IdentityPathMapper {
    fn map(&self, logical_path: &str, _digest: &str) -> String {
        logical_path.to_owned()
    }
}

/// Stores each new blob in a flat, digest-named file.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedPathMapper;

impl ContentPathMapper for HashedPathMapper {
    fn map(&self, _logical_path: &str, digest: &str) -> String {
        digest.to_owned()
    }
}

/// The outcome of staging one file.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AddFileResult {
    /// Whether the digest was new to the object. When `false`, the content
    /// was deduplicated and no new blob needs to be stored.
    pub new_blob: bool,

    /// The content path, relative to the object root, where the blob lives
    /// (or will live once the version is committed).
    pub content_path: String,
}

/// A transactional builder for the object's next inventory.
#[derive(Debug)]
pub struct InventoryUpdater {
    id: String,
    spec_version: SpecVersion,
    digest_algorithm: DigestAlgorithm,
    content_directory: Option<String>,
    object_root_path: String,
    previous_digest: Option<String>,
    versions: BTreeMap<VersionNum, Version>,
    manifest: BTreeMap<String, Vec<String>>,
    fixity: BTreeMap<DigestAlgorithm, BTreeMap<String, Vec<String>>>,
    state: BTreeMap<String, Vec<String>>,
    new_version_num: VersionNum,
    revision: Option<RevisionNum>,
    mapper: Arc<dyn ContentPathMapper>,
    retired_content_paths: Vec<String>,
}

impl InventoryUpdater {
    /// Create an updater for an object that does not exist yet. The built
    /// inventory will be `v1`.
    pub fn for_new_object(id: String, config: &OcflConfig, object_root_path: String) -> Self {
        let content_directory = if config.content_directory == crate::config::DEFAULT_CONTENT_DIRECTORY
        {
            None
        } else {
            Some(config.content_directory.clone())
        };

        Self {
            id,
            spec_version: config.ocfl_version,
            digest_algorithm: config.digest_algorithm,
            content_directory,
            object_root_path,
            previous_digest: None,
            versions: BTreeMap::new(),
            manifest: BTreeMap::new(),
            fixity: BTreeMap::new(),
            state: BTreeMap::new(),
            new_version_num: VersionNum::V1,
            revision: None,
            mapper: Arc::new(IdentityPathMapper),
            retired_content_paths: Vec::new(),
        }
    }

    /// Create an updater whose state starts as a copy of HEAD.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: HEAD cannot be incremented within its padding.
    pub fn copy_state(inventory: &Inventory) -> Result<Self> {
        Self::copy_state_of_version(inventory, inventory.head())
    }

    /// Create an updater whose state starts as a copy of the given version.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no such version.
    pub fn copy_state_of_version(inventory: &Inventory, num: VersionNum) -> Result<Self> {
        let state = inventory.ensure_version(num)?.state.clone();
        let mut updater = Self::from_inventory(inventory)?;
        updater.state = state;
        Ok(updater)
    }

    /// Create an updater whose state starts empty, for put-style replacement.
    pub fn blank_state(inventory: &Inventory) -> Result<Self> {
        Self::from_inventory(inventory)
    }

    /// Create an updater that opens a mutable head on an object that does
    /// not exist yet. The in-progress version will be `v1`, revision `r1`.
    pub fn mutable_head_for_new_object(
        id: String,
        config: &OcflConfig,
        object_root_path: String,
    ) -> Self {
        let mut updater = Self::for_new_object(id, config, object_root_path);
        updater.revision = Some(RevisionNum::R1);
        updater
    }

    /// Create an updater that appends a mutable-head revision.
    ///
    /// If the inventory already has an active mutable head, the in-progress
    /// version is continued at the next revision number; otherwise a new
    /// in-progress version is opened at revision `r1`.
    pub fn mutable_head(inventory: &Inventory) -> Result<Self> {
        if let Some(revision) = inventory.revision_num() {
            let mut updater = Self::continue_in_progress(inventory)?;
            updater.revision = Some(revision.next());
            Ok(updater)
        } else {
            let state = inventory.head_version().state.clone();
            let mut updater = Self::from_inventory(inventory)?;
            updater.state = state;
            updater.revision = Some(RevisionNum::R1);
            Ok(updater)
        }
    }

    /// Create an updater that promotes an active mutable head to a real,
    /// immutable version with the same version number. Manifest and fixity
    /// entries under the extension subtree are re-rooted under the version
    /// directory.
    ///
    /// # Errors
    /// - `Error::State`: The inventory has no active mutable head.
    pub fn promote_mutable_head(inventory: &Inventory) -> Result<Self> {
        if !inventory.has_mutable_head() {
            return Err(Error::State(format!(
                "object {} does not have an active mutable HEAD",
                inventory.id()
            )));
        }

        let mut updater = Self::continue_in_progress(inventory)?;
        updater.revision = None;

        let mutable_prefix = format!(
            "{}/",
            paths::mutable_head_version_path("")
        );
        let version_prefix = format!("{}/", updater.new_version_num);

        updater.manifest = rewrite_paths(&updater.manifest, &mutable_prefix, &version_prefix);
        updater.fixity = updater
            .fixity
            .iter()
            .map(|(algorithm, entries)| {
                (*algorithm, rewrite_paths(entries, &mutable_prefix, &version_prefix))
            })
            .collect();

        Ok(updater)
    }

    /// An updater for the next version after the base inventory's HEAD.
    fn from_inventory(inventory: &Inventory) -> Result<Self> {
        let mut updater = Self::continue_in_progress(inventory)?;
        updater.new_version_num = inventory.next_version_num()?;
        Ok(updater)
    }

    /// An updater that targets the base inventory's HEAD version number,
    /// used for mutable-head continuation and promotion.
    fn continue_in_progress(inventory: &Inventory) -> Result<Self> {
        Ok(Self {
            id: inventory.id().to_owned(),
            spec_version: inventory.spec_version()?,
            digest_algorithm: inventory.digest_algorithm(),
            content_directory: if inventory.content_directory()
                == crate::config::DEFAULT_CONTENT_DIRECTORY
            {
                None
            } else {
                Some(inventory.content_directory().to_owned())
            },
            object_root_path: inventory.object_root_path().to_owned(),
            previous_digest: inventory.current_digest().map(str::to_owned),
            versions: inventory.versions().clone(),
            manifest: inventory.manifest().clone(),
            fixity: inventory.fixity().clone(),
            state: inventory.head_version().state.clone(),
            new_version_num: inventory.head(),
            revision: inventory.revision_num(),
            mapper: Arc::new(IdentityPathMapper),
            retired_content_paths: Vec::new(),
        })
    }

    /// Replace the content path mapper.
    pub fn with_path_mapper(mut self, mapper: Arc<dyn ContentPathMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// The version number the built inventory will have as HEAD.
    pub fn new_version_num(&self) -> VersionNum {
        self.new_version_num
    }

    /// The revision number when building a mutable-head inventory.
    pub fn revision(&self) -> Option<RevisionNum> {
        self.revision
    }

    /// The digest algorithm files staged through this updater must be hashed
    /// with.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    /// Bind `logical_path` to content with the given digest, allocating a
    /// content path when the digest is new to the object.
    ///
    /// # Errors
    /// - `Error::InvalidPath`: The logical path violates path constraints.
    /// - `Error::AlreadyExists`: The logical path exists and `overwrite` is
    ///   false.
    pub fn add_file_with_digest(
        &mut self,
        digest: String,
        logical_path: &str,
        overwrite: bool,
    ) -> Result<AddFileResult> {
        validate_logical_path(logical_path)?;
        let digest = digest.to_ascii_lowercase();

        if self.digest_for_logical_path(logical_path).is_some() {
            if !overwrite {
                return Err(Error::AlreadyExists(format!(
                    "cannot add {} to object {} because the path already exists; \
                     remove it first or enable overwrite",
                    logical_path, self.id
                )));
            }
            self.unbind_and_retire(logical_path);
        }

        let (new_blob, content_path) = match self.manifest.get(&digest) {
            Some(existing) => (false, existing[0].clone()),
            None => {
                let mapped = self.mapper.map(logical_path, &digest);
                let content_path = join(&[
                    &paths::content_prefix(
                        self.new_version_num,
                        self.content_directory(),
                        self.revision,
                    ),
                    &mapped,
                ]);
                validate_content_path(&content_path)?;
                self.manifest.insert(digest.clone(), vec![content_path.clone()]);
                (true, content_path)
            }
        };

        self.bind(&digest, logical_path);

        Ok(AddFileResult {
            new_blob,
            content_path,
        })
    }

    /// Remove `logical_path` from the new version's state.
    ///
    /// A blob that was published in an earlier version is retained in the
    /// manifest; a blob staged by this same uncommitted version is retired
    /// with it.
    ///
    /// Returns `true` if the path existed.
    pub fn remove_file(&mut self, logical_path: &str) -> bool {
        self.unbind_and_retire(logical_path)
    }

    /// Rename `src` to `dst` within the new version's state. Content is not
    /// touched.
    ///
    /// # Errors
    /// - `Error::NotFound`: `src` does not exist in the state.
    /// - `Error::AlreadyExists`: `dst` exists and `overwrite` is false.
    pub fn rename_file(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        validate_logical_path(dst)?;

        let digest = self
            .digest_for_logical_path(src)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "object {} has no file at logical path {}",
                    self.id, src
                ))
            })?
            .to_owned();

        if self.digest_for_logical_path(dst).is_some() {
            if !overwrite {
                return Err(Error::AlreadyExists(format!(
                    "cannot rename {} to {} in object {} because the destination already exists",
                    src, dst, self.id
                )));
            }
            self.unbind_and_retire(dst);
        }

        self.unbind(src);
        self.bind(&digest, dst);
        Ok(())
    }

    /// Bind `dst` in the new version to the content that `src` referenced in
    /// an earlier version. Content is not touched.
    ///
    /// # Errors
    /// - `Error::NotFound`: The version or the source path does not exist.
    /// - `Error::AlreadyExists`: `dst` exists and `overwrite` is false.
    pub fn reinstate_file(
        &mut self,
        version_num: VersionNum,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<()> {
        validate_logical_path(dst)?;

        let version = self.versions.get(&version_num).ok_or_else(|| {
            Error::NotFound(format!(
                "object {} version {} was not found",
                self.id, version_num
            ))
        })?;
        let digest = version
            .digest_for_logical_path(src)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "object {} version {} has no file at logical path {}",
                    self.id, version_num, src
                ))
            })?
            .to_owned();

        if self.digest_for_logical_path(dst).is_some() {
            if !overwrite {
                return Err(Error::AlreadyExists(format!(
                    "cannot reinstate {} to {} in object {} because the destination already exists",
                    src, dst, self.id
                )));
            }
            self.unbind_and_retire(dst);
        }

        self.bind(&digest, dst);
        Ok(())
    }

    /// Empty the new version's state.
    pub fn clear_state(&mut self) {
        self.state.clear();
    }

    /// Record an alternate-algorithm digest for a file staged in this
    /// version.
    ///
    /// When `algorithm` matches the inventory's primary algorithm the value
    /// is verified against the staged digest instead of being recorded.
    ///
    /// # Errors
    /// - `Error::NotFound`: The logical path is not in the new state.
    /// - `Error::InvalidValue`: The file was not added in this version.
    /// - `Error::FixityCheck`: The value contradicts the staged digest.
    pub fn add_file_fixity(
        &mut self,
        logical_path: &str,
        algorithm: DigestAlgorithm,
        value: &str,
    ) -> Result<()> {
        let value = value.to_ascii_lowercase();
        let digest = self
            .digest_for_logical_path(logical_path)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "object {} has no file at logical path {}",
                    self.id, logical_path
                ))
            })?
            .to_owned();

        if algorithm == self.digest_algorithm {
            if digest != value {
                return Err(Error::FixityCheck {
                    algorithm,
                    expected: value,
                    actual: digest,
                    path: logical_path.to_owned(),
                });
            }
            return Ok(());
        }

        let content_path = self.manifest.get(&digest).map(|paths| paths[0].clone()).ok_or_else(
            || {
                Error::CorruptObject(format!(
                    "object {} manifest has no content path for digest {}",
                    self.id, digest
                ))
            },
        )?;

        let prefix = paths::content_prefix(
            self.new_version_num,
            self.content_directory(),
            self.revision,
        );
        if !content_path.starts_with(&format!("{}/", prefix)) {
            return Err(Error::InvalidValue(format!(
                "fixity can only be added for files staged in the current version; \
                 {} was stored in an earlier version",
                logical_path
            )));
        }

        let entries = self.fixity.entry(algorithm).or_default();
        let paths = entries.entry(value).or_default();
        if !paths.contains(&content_path) {
            paths.push(content_path);
            paths.sort();
        }
        Ok(())
    }

    /// Build the validated, immutable inventory described by the accumulated
    /// mutations.
    ///
    /// # Errors
    /// - `Error::CorruptObject`: The built inventory violates an invariant.
    ///   This indicates a bug in the updater rather than bad caller input.
    pub fn build_new_inventory(
        self,
        created: DateTime<FixedOffset>,
        message: Option<String>,
        user: Option<User>,
    ) -> Result<Inventory> {
        // Timestamps are truncated to whole seconds so the serialized
        // inventory is reproducible across platforms.
        let created = created.with_nanosecond(0).unwrap_or(created);

        let version = Version {
            created,
            message,
            state: self.state,
            user,
        };

        let mut versions = self.versions;
        versions.insert(self.new_version_num, version);

        let mut inventory = Inventory::new(
            self.id,
            self.spec_version,
            self.digest_algorithm,
            self.new_version_num,
            self.content_directory,
            self.manifest,
            self.fixity,
            versions,
        );
        inventory.set_object_root_path(self.object_root_path);
        inventory.set_previous_digest(self.previous_digest);
        inventory.set_revision_num(self.revision);

        super::validate::validate_shallow(&inventory)?;
        Ok(inventory)
    }

    /// The content directory name new blobs are staged under.
    pub fn content_directory(&self) -> &str {
        self.content_directory
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_CONTENT_DIRECTORY)
    }

    fn digest_for_logical_path(&self, logical_path: &str) -> Option<&str> {
        self.state.iter().find_map(|(digest, paths)| {
            if paths.iter().any(|path| path == logical_path) {
                Some(digest.as_str())
            } else {
                None
            }
        })
    }

    fn bind(&mut self, digest: &str, logical_path: &str) {
        let paths = self.state.entry(digest.to_owned()).or_default();
        if !paths.iter().any(|path| path == logical_path) {
            paths.push(logical_path.to_owned());
            paths.sort();
        }
    }

    fn unbind(&mut self, logical_path: &str) -> Option<String> {
        let mut unbound = None;
        self.state.retain(|digest, paths| {
            if let Some(index) = paths.iter().position(|path| path == logical_path) {
                paths.remove(index);
                unbound = Some(digest.clone());
            }
            !paths.is_empty()
        });
        unbound
    }

    /// Unbind `logical_path`, and retire the blob it referenced when that
    /// blob was staged by this same uncommitted version and nothing else
    /// references it. Retiring keeps two different blobs from ever being
    /// mapped to one content path, and keeps never-committed content out of
    /// the manifest.
    fn unbind_and_retire(&mut self, logical_path: &str) -> bool {
        let Some(digest) = self.unbind(logical_path) else {
            return false;
        };

        // Still referenced by the working state.
        if self.state.contains_key(&digest) {
            return true;
        }
        // Referenced by a committed version. The in-progress mutable-head
        // version is not committed; its entry in `versions` is replaced on
        // build.
        let committed = self
            .versions
            .iter()
            .any(|(num, version)| *num != self.new_version_num && version.state.contains_key(&digest));
        if committed {
            return true;
        }
        // Published by an earlier, committed version's content directory.
        let uncommitted_area = self.manifest.get(&digest).map(|paths| {
            paths.iter().all(|path| self.is_uncommitted_content_path(path))
        });
        if uncommitted_area != Some(true) {
            return true;
        }

        if let Some(paths) = self.manifest.remove(&digest) {
            for entries in self.fixity.values_mut() {
                entries.retain(|_, fixity_paths| {
                    fixity_paths.retain(|path| !paths.contains(path));
                    !fixity_paths.is_empty()
                });
            }
            self.retired_content_paths.extend(paths);
        }

        true
    }

    /// Whether a content path belongs to the uncommitted area: the version
    /// directory being built, or the mutable-head extension.
    fn is_uncommitted_content_path(&self, content_path: &str) -> bool {
        let version_prefix = format!("{}/", self.new_version_num);
        let mutable_prefix = format!("{}/", paths::mutable_head_version_path(""));

        if self.revision.is_some() {
            content_path.starts_with(&mutable_prefix)
        } else {
            content_path.starts_with(&version_prefix)
        }
    }

    /// Content paths retired since the last call, for staged-file cleanup.
    pub fn take_retired_content_paths(&mut self) -> Vec<String> {
        std::mem::take(&mut self.retired_content_paths)
    }
}

fn rewrite_paths(
    map: &BTreeMap<String, Vec<String>>,
    from_prefix: &str,
    to_prefix: &str,
) -> BTreeMap<String, Vec<String>> {
    map.iter()
        .map(|(digest, paths)| {
            let rewritten = paths
                .iter()
                .map(|path| match path.strip_prefix(from_prefix) {
                    Some(rest) => format!("{}{}", to_prefix, rest),
                    None => path.clone(),
                })
                .collect();
            (digest.clone(), rewritten)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2023, 6, 1, 12, 0, 0)
            .unwrap()
    }

    fn new_updater() -> InventoryUpdater {
        InventoryUpdater::for_new_object(
            "urn:example:1".to_owned(),
            &OcflConfig::default(),
            "ab/cd/urn_example_1".to_owned(),
        )
    }

    fn build(updater: InventoryUpdater) -> Inventory {
        updater
            .build_new_inventory(fixed_time(), Some("commit".to_owned()), None)
            .unwrap()
    }

    #[test]
    fn add_file_allocates_content_path_under_new_version() -> anyhow::Result<()> {
        let mut updater = new_updater();
        let result = updater.add_file_with_digest("ABCDEF".to_owned(), "dir/a.txt", false)?;

        assert!(result.new_blob);
        assert_eq!(result.content_path, "v1/content/dir/a.txt");

        // Digests are normalized to lower case.
        let inventory = build(updater);
        assert!(inventory.contains_digest("abcdef"));
        Ok(())
    }

    #[test]
    fn duplicate_content_is_not_restaged() -> anyhow::Result<()> {
        let mut updater = new_updater();
        let first = updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        let second = updater.add_file_with_digest("d1".to_owned(), "copy.txt", false)?;

        assert!(first.new_blob);
        assert!(!second.new_blob);
        assert_eq!(second.content_path, first.content_path);

        let inventory = build(updater);
        assert_eq!(inventory.manifest().get("d1").unwrap().len(), 1);
        assert_eq!(
            inventory.head_version().state.get("d1").unwrap(),
            &vec!["a.txt".to_owned(), "copy.txt".to_owned()]
        );
        Ok(())
    }

    #[test]
    fn add_existing_path_requires_overwrite() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;

        let error = updater
            .add_file_with_digest("d2".to_owned(), "a.txt", false)
            .unwrap_err();
        assert!(matches!(error, Error::AlreadyExists(_)));

        updater.add_file_with_digest("d2".to_owned(), "a.txt", true)?;
        let inventory = build(updater);
        assert_eq!(
            inventory.head_version().digest_for_logical_path("a.txt"),
            Some("d2")
        );
        Ok(())
    }

    #[test]
    fn remove_keeps_blob_in_manifest() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        let v1 = build(updater);

        let mut updater = InventoryUpdater::copy_state(&v1)?;
        assert!(updater.remove_file("a.txt"));
        assert!(!updater.remove_file("a.txt"));
        let v2 = updater.build_new_inventory(fixed_time(), None, None)?;

        assert!(v2.head_version().state.is_empty());
        assert!(v2.contains_digest("d1"));
        Ok(())
    }

    #[test]
    fn rename_moves_binding_without_touching_manifest() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        let v1 = build(updater);

        let mut updater = InventoryUpdater::copy_state(&v1)?;
        updater.rename_file("a.txt", "b.txt", false)?;
        let v2 = updater.build_new_inventory(fixed_time(), None, None)?;

        assert_eq!(v2.head_version().digest_for_logical_path("b.txt"), Some("d1"));
        assert_eq!(v2.head_version().digest_for_logical_path("a.txt"), None);
        assert_eq!(v2.manifest(), v1.manifest());
        Ok(())
    }

    #[test]
    fn reinstate_restores_content_from_an_old_version() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        let v1 = build(updater);

        let mut updater = InventoryUpdater::copy_state(&v1)?;
        updater.remove_file("a.txt");
        let v2 = updater.build_new_inventory(fixed_time(), None, None)?;

        let mut updater = InventoryUpdater::copy_state(&v2)?;
        updater.reinstate_file(VersionNum::V1, "a.txt", "restored.txt", false)?;
        let v3 = updater.build_new_inventory(fixed_time(), None, None)?;

        assert_eq!(
            v3.head_version().digest_for_logical_path("restored.txt"),
            Some("d1")
        );
        Ok(())
    }

    #[test]
    fn mutable_head_revisions_and_promotion() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        let v1 = build(updater);

        let mut updater = InventoryUpdater::mutable_head(&v1)?;
        assert_eq!(updater.revision(), Some(RevisionNum::R1));
        let result = updater.add_file_with_digest("d2".to_owned(), "b.txt", false)?;
        assert_eq!(
            result.content_path,
            "extensions/0005-mutable-head/head/content/r1/b.txt"
        );
        let staged = updater.build_new_inventory(fixed_time(), None, None)?;
        assert!(staged.has_mutable_head());
        assert_eq!(staged.head().to_string(), "v2");

        let mut updater = InventoryUpdater::mutable_head(&staged)?;
        assert_eq!(updater.revision(), Some(RevisionNum::R1.next()));
        updater.add_file_with_digest("d3".to_owned(), "c.txt", false)?;
        let staged = updater.build_new_inventory(fixed_time(), None, None)?;

        let promoted =
            InventoryUpdater::promote_mutable_head(&staged)?.build_new_inventory(fixed_time(), None, None)?;
        assert!(!promoted.has_mutable_head());
        assert_eq!(promoted.head().to_string(), "v2");
        assert_eq!(
            promoted.content_path("d2"),
            Some("v2/content/r1/b.txt")
        );
        assert_eq!(
            promoted.content_path("d3"),
            Some("v2/content/r2/c.txt")
        );
        Ok(())
    }

    #[test]
    fn fixity_recorded_for_staged_files_only() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        updater.add_file_fixity("a.txt", DigestAlgorithm::Md5, "AABB")?;

        let error = updater
            .add_file_fixity("a.txt", DigestAlgorithm::Sha512, "wrong")
            .unwrap_err();
        assert!(matches!(error, Error::FixityCheck { .. }));

        let inventory = build(updater);
        let md5 = inventory.fixity().get(&DigestAlgorithm::Md5).unwrap();
        assert_eq!(md5.get("aabb").unwrap(), &vec!["v1/content/a.txt".to_owned()]);
        Ok(())
    }

    #[test]
    fn overwriting_a_staged_file_retires_its_blob() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        updater.add_file_with_digest("d2".to_owned(), "a.txt", true)?;

        // The first blob was never committed, so it leaves the manifest and
        // frees its content path for the replacement.
        assert_eq!(
            updater.take_retired_content_paths(),
            vec!["v1/content/a.txt".to_owned()]
        );

        let inventory = build(updater);
        assert!(!inventory.contains_digest("d1"));
        assert_eq!(inventory.content_path("d2"), Some("v1/content/a.txt"));
        Ok(())
    }

    #[test]
    fn committed_blobs_survive_overwrite_and_removal() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        let v1 = build(updater);

        let mut updater = InventoryUpdater::copy_state(&v1)?;
        updater.add_file_with_digest("d2".to_owned(), "a.txt", true)?;
        assert!(updater.take_retired_content_paths().is_empty());

        let v2 = updater.build_new_inventory(fixed_time(), None, None)?;
        assert!(v2.contains_digest("d1"));
        assert!(v2.contains_digest("d2"));
        Ok(())
    }

    #[test]
    fn clear_state_empties_only_the_new_version() -> anyhow::Result<()> {
        let mut updater = new_updater();
        updater.add_file_with_digest("d1".to_owned(), "a.txt", false)?;
        let v1 = build(updater);

        let mut updater = InventoryUpdater::copy_state(&v1)?;
        updater.clear_state();
        let v2 = updater.build_new_inventory(fixed_time(), None, None)?;

        assert!(v2.head_version().state.is_empty());
        assert!(!v1.head_version().state.is_empty());
        Ok(())
    }
}
