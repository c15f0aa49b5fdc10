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

//! The repository facade: the public API over digesting, inventories,
//! locking, and storage.
//!
//! A write runs as: acquire the object lock, load the inventory, stage new
//! content into a scratch directory under the work directory (digesting every
//! file), build the successor inventory, hand the staged version to the
//! storage engine, and finally delete the scratch directory. Readers never
//! lock; they rely on the engines' atomic root-inventory swap.

mod details;
mod updater;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info};

use crate::config::OcflConfig;
use crate::error::{Error, Result};
use crate::inventory::{
    mapper, validate, ContentPathMapper, IdentityPathMapper, Inventory, InventoryUpdater,
    VersionNum,
};
use crate::lock::{InMemoryObjectLock, ObjectLock, DEFAULT_LOCK_TIMEOUT};
use crate::storage::{ContentRetriever, OcflStorage};
use crate::util::{self, Clock, SystemClock};

pub use details::{
    DiffType, FileChange, FileChangeHistory, FileDetails, ObjectDetails, VersionDetails,
    VersionInfo,
};
pub use updater::ObjectUpdater;

/// Identifies an object, optionally pinned to a version. Without a version,
/// operations act on HEAD.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectVersionId {
    object_id: String,
    version_num: Option<VersionNum>,
}

impl ObjectVersionId {
    /// Reference the object's HEAD.
    pub fn head(object_id: &str) -> Self {
        Self {
            object_id: object_id.to_owned(),
            version_num: None,
        }
    }

    /// Reference a specific version.
    pub fn version(object_id: &str, version_num: VersionNum) -> Self {
        Self {
            object_id: object_id.to_owned(),
            version_num: Some(version_num),
        }
    }

    /// The object's ID.
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// The pinned version, if any.
    pub fn version_num(&self) -> Option<VersionNum> {
        self.version_num
    }

    /// Whether this references HEAD.
    pub fn is_head(&self) -> bool {
        self.version_num.is_none()
    }
}

/// Options for operations that ingest files.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommitOptions {
    /// Move source files into the repository instead of copying them. The
    /// source is consumed on success.
    pub move_source: bool,
}

/// Options for export operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExportOptions {
    /// Skip validating the exported tree.
    pub no_validation: bool,
}

/// Options for import operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportOptions {
    /// Move the source tree instead of copying it.
    pub move_source: bool,

    /// Only check the inventory's internal consistency instead of
    /// re-digesting every content file.
    pub no_validation: bool,
}

/// A version plus lazy readers for its files, keyed by logical path.
pub struct OcflObjectVersion {
    pub details: VersionDetails,
    pub files: BTreeMap<String, Box<dyn ContentRetriever>>,
}

/// Builds an [`OcflRepository`].
pub struct OcflRepositoryBuilder {
    storage: Option<Box<dyn OcflStorage>>,
    lock: Option<Box<dyn ObjectLock>>,
    lock_timeout: Duration,
    work_dir: Option<PathBuf>,
    config: OcflConfig,
    clock: Box<dyn Clock>,
    path_mapper: Arc<dyn ContentPathMapper>,
}

impl Default for OcflRepositoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OcflRepositoryBuilder {
    pub fn new() -> Self {
        Self {
            storage: None,
            lock: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            work_dir: None,
            config: OcflConfig::default(),
            clock: Box::new(SystemClock),
            path_mapper: Arc::new(IdentityPathMapper),
        }
    }

    /// The storage engine. Required.
    pub fn storage(mut self, storage: impl OcflStorage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// The directory used for staging version scratch space. Required; must
    /// exist and be writable. Staging on the same filesystem as an
    /// [`crate::storage::FsStorage`] root keeps version publishes atomic.
    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Defaults applied to newly created objects.
    pub fn config(mut self, config: OcflConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default in-memory object lock.
    pub fn object_lock(mut self, lock: impl ObjectLock + 'static) -> Self {
        self.lock = Some(Box::new(lock));
        self
    }

    /// The acquisition timeout for the default in-memory object lock.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Replace the system clock, e.g. with a fixed clock in tests.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the mapping from logical path to content path for new blobs.
    ///
    /// The default mirrors the logical path;
    /// [`crate::inventory::HashedPathMapper`] flattens content into
    /// digest-named files.
    pub fn content_path_mapper(mut self, mapper: impl ContentPathMapper + 'static) -> Self {
        self.path_mapper = Arc::new(mapper);
        self
    }

    /// Build the repository.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: A required setting is missing or invalid.
    pub fn build(self) -> Result<OcflRepository> {
        let storage = self
            .storage
            .ok_or_else(|| Error::InvalidValue("a storage engine is required".to_owned()))?;
        let work_dir = self
            .work_dir
            .ok_or_else(|| Error::InvalidValue("a work directory is required".to_owned()))?;

        if !work_dir.is_dir() {
            return Err(Error::InvalidValue(format!(
                "work directory {} does not exist",
                work_dir.display()
            )));
        }
        self.config.validate()?;

        let lock = self
            .lock
            .unwrap_or_else(|| Box::new(InMemoryObjectLock::new(self.lock_timeout)));

        Ok(OcflRepository {
            storage,
            lock,
            work_dir,
            config: self.config,
            clock: self.clock,
            path_mapper: self.path_mapper,
            closed: AtomicBool::new(false),
        })
    }
}

/// An OCFL repository.
///
/// A single instance is safe for concurrent use from many threads. Writes to
/// different objects run fully concurrently; writes to the same object are
/// serialized by the object lock.
pub struct OcflRepository {
    storage: Box<dyn OcflStorage>,
    lock: Box<dyn ObjectLock>,
    work_dir: PathBuf,
    config: OcflConfig,
    clock: Box<dyn Clock>,
    path_mapper: Arc<dyn ContentPathMapper>,
    closed: AtomicBool,
}

impl OcflRepository {
    /// Start building a repository.
    pub fn builder() -> OcflRepositoryBuilder {
        OcflRepositoryBuilder::new()
    }

    /// The repository's defaults for new objects.
    pub fn config(&self) -> &OcflConfig {
        &self.config
    }

    /// Replace the object's state with the contents of `source`, creating a
    /// new version.
    ///
    /// The previous state is not carried over: the new version contains
    /// exactly the files under `source`. Returns the ID of the created
    /// version.
    ///
    /// # Errors
    /// - `Error::ObjectOutOfSync`: The supplied version is no longer HEAD or
    ///   a concurrent writer won.
    /// - `Error::State`: The object has an active mutable HEAD.
    pub fn put_object(
        &self,
        id: &ObjectVersionId,
        source: &Path,
        info: &VersionInfo,
        options: CommitOptions,
    ) -> Result<ObjectVersionId> {
        self.ensure_open()?;
        debug!(
            "putting {} into the repository under id {}",
            source.display(),
            id.object_id()
        );

        let inventory = self.load_inventory(id.object_id())?;
        self.ensure_no_mutable_head(inventory.as_ref())?;
        self.enforce_version_for_update(id, inventory.as_ref())?;

        let inventory_updater = match &inventory {
            Some(inventory) => InventoryUpdater::blank_state(inventory)?,
            None => self.new_object_updater(id.object_id())?,
        };

        self.stage_and_commit(id.object_id(), inventory_updater, info, |updater| {
            updater.add_path(source, "", options.move_source, true)
        })
    }

    /// Update the object through a callback, creating a new version from the
    /// accumulated changes when the callback returns successfully.
    ///
    /// The callback receives an [`ObjectUpdater`] scoped to this call. If it
    /// returns an error, all staged changes are discarded and nothing is
    /// written to storage.
    pub fn update_object<F>(
        &self,
        id: &ObjectVersionId,
        info: &VersionInfo,
        f: F,
    ) -> Result<ObjectVersionId>
    where
        F: FnOnce(&mut ObjectUpdater<'_>) -> Result<()>,
    {
        self.ensure_open()?;
        debug!("updating object {}", id.object_id());

        let inventory = self.load_inventory(id.object_id())?;
        self.ensure_no_mutable_head(inventory.as_ref())?;
        self.enforce_version_for_update(id, inventory.as_ref())?;

        let inventory_updater = match &inventory {
            Some(inventory) => InventoryUpdater::copy_state(inventory)?,
            None => self.new_object_updater(id.object_id())?,
        };

        self.stage_and_commit(id.object_id(), inventory_updater, info, f)
    }

    /// Materialize a version into `out_dir`, verifying the fixity of every
    /// file. `out_dir` must not exist; its parent must.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object or version does not exist.
    /// - `Error::FixityCheck`: A file's content does not match its digest.
    pub fn get_object(&self, id: &ObjectVersionId, out_dir: &Path) -> Result<()> {
        self.ensure_open()?;
        ensure_output_path(out_dir)?;
        debug!("getting object {} into {}", id.object_id(), out_dir.display());

        let inventory = self.require_inventory(id.object_id())?;
        let version_num = self.resolve_version(id, &inventory)?;

        let staging = util::create_staging_dir(&self.work_dir, id.object_id())?;
        let result = self
            .storage
            .reconstruct_object_version(&inventory, version_num, &staging)
            .and_then(|()| util::move_dir(&staging, out_dir));

        if result.is_err() {
            util::safe_delete_dir(&staging);
        }
        result
    }

    /// A version's metadata plus lazy, fixity-checked readers for its files.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object or version does not exist.
    pub fn open_version(&self, id: &ObjectVersionId) -> Result<OcflObjectVersion> {
        self.ensure_open()?;
        debug!("opening object {}", id.object_id());

        let inventory = self.require_inventory(id.object_id())?;
        let version_num = self.resolve_version(id, &inventory)?;

        let files = self.storage.get_object_streams(&inventory, version_num)?;
        Ok(OcflObjectVersion {
            details: details::map_version_details(&inventory, version_num),
            files,
        })
    }

    /// Metadata for the object and all of its versions.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object does not exist.
    pub fn describe_object(&self, object_id: &str) -> Result<ObjectDetails> {
        self.ensure_open()?;
        debug!("describing object {}", object_id);

        let inventory = self.require_inventory(object_id)?;
        Ok(details::map_object_details(&inventory))
    }

    /// Metadata for one version.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object or version does not exist.
    pub fn describe_version(&self, id: &ObjectVersionId) -> Result<VersionDetails> {
        self.ensure_open()?;
        debug!("describing version {:?} of {}", id.version_num(), id.object_id());

        let inventory = self.require_inventory(id.object_id())?;
        let version_num = self.resolve_version(id, &inventory)?;
        Ok(details::map_version_details(&inventory, version_num))
    }

    /// The ordered list of versions in which `logical_path` was added,
    /// changed, or removed.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object or the logical path does not exist.
    pub fn file_change_history(
        &self,
        object_id: &str,
        logical_path: &str,
    ) -> Result<FileChangeHistory> {
        self.ensure_open()?;
        debug!(
            "getting file change history for {} in object {}",
            logical_path, object_id
        );

        let inventory = self.require_inventory(object_id)?;
        details::file_change_history(&inventory, logical_path)
    }

    /// Whether an object with the given ID exists.
    pub fn contains_object(&self, object_id: &str) -> Result<bool> {
        self.ensure_open()?;
        self.storage.contains_object(object_id)
    }

    /// Remove every trace of the object. Irreversible.
    pub fn purge_object(&self, object_id: &str) -> Result<()> {
        self.ensure_open()?;
        info!("purging object {}", object_id);

        self.lock
            .do_in_write_lock(object_id, || self.storage.purge_object(object_id))
    }

    /// Restore the object's root inventory to `version_num`'s and delete all
    /// later versions. Reading the object afterwards yields exactly what was
    /// readable at that version.
    ///
    /// Rolling back to HEAD is a no-op.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object or version does not exist.
    pub fn rollback_to_version(&self, object_id: &str, version_num: VersionNum) -> Result<()> {
        self.ensure_open()?;
        info!("rolling object {} back to {}", object_id, version_num);

        let inventory = self.require_inventory(object_id)?;
        inventory.ensure_version(version_num)?;

        if version_num == inventory.head() {
            debug!(
                "object {} is already at version {}; nothing to roll back",
                object_id, version_num
            );
            return Ok(());
        }

        self.lock.do_in_write_lock(object_id, || {
            self.storage.rollback_to_version(&inventory, version_num)
        })
    }

    /// Create a new HEAD version whose state equals that of `id`'s version.
    /// Content is not copied; the new version references the same blobs.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object or version does not exist.
    pub fn replicate_version_as_head(
        &self,
        id: &ObjectVersionId,
        info: &VersionInfo,
    ) -> Result<ObjectVersionId> {
        self.ensure_open()?;
        debug!("replicating version {:?} of {}", id.version_num(), id.object_id());

        let inventory = self.require_inventory(id.object_id())?;
        self.ensure_no_mutable_head(Some(&inventory))?;
        let version_num = self.resolve_version(id, &inventory)?;

        let inventory_updater = InventoryUpdater::copy_state_of_version(&inventory, version_num)?;
        self.stage_and_commit(id.object_id(), inventory_updater, info, |_| Ok(()))
    }

    /// A lazy sequence of every object ID in the repository.
    pub fn list_object_ids(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + Send>> {
        self.ensure_open()?;
        debug!("listing object ids");
        self.storage.list_object_ids()
    }

    /// Copy one version's raw OCFL directory to `out_dir`.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object or version does not exist.
    /// - `Error::CorruptObject` / `Error::FixityCheck`: Validation of the
    ///   exported tree failed.
    pub fn export_version(
        &self,
        id: &ObjectVersionId,
        out_dir: &Path,
        options: ExportOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        ensure_export_path(out_dir)?;

        let inventory = self.require_inventory(id.object_id())?;
        let version_num = self.resolve_version(id, &inventory)?;
        debug!("exporting {} {} to {}", id.object_id(), version_num, out_dir.display());

        self.storage
            .export_version(id.object_id(), version_num, out_dir)?;

        if !options.no_validation {
            let exported = read_inventory_from_dir(out_dir)?;
            crate::validate::validate_version(out_dir, &exported)?;
        }
        Ok(())
    }

    /// Copy the object's complete raw OCFL tree to `out_dir`.
    ///
    /// # Errors
    /// - `Error::NotFound`: The object does not exist.
    /// - `Error::CorruptObject` / `Error::FixityCheck`: Validation of the
    ///   exported tree failed.
    pub fn export_object(
        &self,
        object_id: &str,
        out_dir: &Path,
        options: ExportOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        ensure_export_path(out_dir)?;
        debug!("exporting object {} to {}", object_id, out_dir.display());

        self.lock.do_in_write_lock(object_id, || {
            self.storage.export_object(object_id, out_dir)
        })?;

        if !options.no_validation {
            crate::validate::validate_object(out_dir)?;
        }
        Ok(())
    }

    /// Ingest a version directory produced by [`OcflRepository::export_version`]
    /// as the object's next version.
    ///
    /// The version must be the next in sequence: `v1` for a new object, or
    /// HEAD + 1 for an existing one.
    ///
    /// # Errors
    /// - `Error::State`: The version is out of sequence or incompatible with
    ///   the existing object.
    pub fn import_version(&self, version_path: &Path, options: ImportOptions) -> Result<()> {
        self.ensure_open()?;
        debug!("importing version from {}", version_path.display());

        let mut import = read_inventory_from_dir(version_path)?;
        let object_id = import.id().to_owned();

        let existing = self.load_inventory(&object_id)?;
        self.ensure_no_mutable_head(existing.as_ref())?;

        match &existing {
            None => {
                if import.head() != VersionNum::V1 {
                    return Err(Error::State(format!(
                        "cannot import version {} of object {}: the object does not exist, \
                         so only v1 may be imported",
                        import.head(),
                        object_id
                    )));
                }
            }
            Some(existing) => {
                if import.head() != existing.next_version_num()? {
                    return Err(Error::State(format!(
                        "cannot import version {} of object {}: the next version is {}",
                        import.head(),
                        object_id,
                        existing.next_version_num()?
                    )));
                }
                validate::validate_compatible(existing, &import)?;
                import.set_previous_digest(existing.current_digest().map(str::to_owned));
            }
        }

        import.set_object_root_path(self.storage.object_root_path(&object_id)?);

        if !options.no_validation {
            crate::validate::validate_version(version_path, &import)?;
        }

        let staging = util::create_staging_dir(&self.work_dir, &object_id)?;
        let result = (|| -> Result<()> {
            stage_import(version_path, &staging, options.move_source)?;
            self.lock.do_in_write_lock(&object_id, || {
                self.storage.store_new_version(&import, &staging)
            })
        })();

        util::safe_delete_dir(&staging);
        result
    }

    /// Ingest a complete object tree produced by
    /// [`OcflRepository::export_object`].
    ///
    /// # Errors
    /// - `Error::AlreadyExists`: An object with the same ID exists.
    /// - `Error::CorruptObject` / `Error::FixityCheck`: The tree failed
    ///   validation.
    pub fn import_object(&self, object_path: &Path, options: ImportOptions) -> Result<()> {
        self.ensure_open()?;
        debug!("importing object from {}", object_path.display());

        let mut inventory = if options.no_validation {
            let inventory = read_inventory_from_dir(object_path)?;
            validate::validate_shallow(&inventory)?;
            inventory
        } else {
            crate::validate::validate_object(object_path)?
        };

        let object_id = inventory.id().to_owned();
        if self.contains_object(&object_id)? {
            return Err(Error::AlreadyExists(format!(
                "cannot import the object at {} because an object already exists with ID {}",
                object_path.display(),
                object_id
            )));
        }

        inventory.set_object_root_path(self.storage.object_root_path(&object_id)?);

        let staging = util::create_staging_dir(&self.work_dir, &object_id)?;
        let result = (|| -> Result<()> {
            stage_import(object_path, &staging, options.move_source)?;
            self.lock.do_in_write_lock(&object_id, || {
                self.storage.import_object(&inventory, &staging)
            })
        })();

        util::safe_delete_dir(&staging);
        result
    }

    /// Stage changes in the object's mutable head instead of creating a new
    /// version. Changes accumulate across calls until
    /// [`OcflRepository::commit_staged_changes`] promotes them or
    /// [`OcflRepository::purge_staged_changes`] discards them.
    ///
    /// Returns the ID of the in-progress version.
    pub fn stage_changes<F>(
        &self,
        id: &ObjectVersionId,
        info: &VersionInfo,
        f: F,
    ) -> Result<ObjectVersionId>
    where
        F: FnOnce(&mut ObjectUpdater<'_>) -> Result<()>,
    {
        self.ensure_open()?;
        debug!("staging changes to object {}", id.object_id());

        let inventory = self.load_inventory(id.object_id())?;
        self.enforce_version_for_update(id, inventory.as_ref())?;

        let inventory_updater = match &inventory {
            Some(inventory) => InventoryUpdater::mutable_head(inventory)?,
            None => InventoryUpdater::mutable_head_for_new_object(
                id.object_id().to_owned(),
                &self.config,
                self.storage.object_root_path(id.object_id())?,
            ),
        };

        self.stage_and_commit(id.object_id(), inventory_updater, info, f)
    }

    /// Promote the accumulated mutable head to a real, immutable version.
    ///
    /// # Errors
    /// - `Error::State`: The object has no staged changes.
    pub fn commit_staged_changes(
        &self,
        object_id: &str,
        info: &VersionInfo,
    ) -> Result<ObjectVersionId> {
        self.ensure_open()?;
        debug!("committing staged changes to object {}", object_id);

        let old_inventory = self.require_inventory(object_id)?;
        let inventory_updater = InventoryUpdater::promote_mutable_head(&old_inventory)?;
        let new_inventory = inventory_updater.build_new_inventory(
            self.now(info),
            info.message.clone(),
            info.user.clone(),
        )?;

        let staging = util::create_staging_dir(&self.work_dir, object_id)?;
        let result = (|| -> Result<ObjectVersionId> {
            let mut new_inventory = new_inventory;
            let digest = mapper::write_to_dir(&new_inventory, &staging)?;
            new_inventory.set_current_digest(Some(digest));

            self.lock.do_in_write_lock(object_id, || {
                self.storage
                    .commit_mutable_head(&old_inventory, &new_inventory, &staging)
            })?;
            Ok(ObjectVersionId::version(object_id, new_inventory.head()))
        })();

        util::safe_delete_dir(&staging);
        result
    }

    /// Discard the object's staged changes, if any.
    pub fn purge_staged_changes(&self, object_id: &str) -> Result<()> {
        self.ensure_open()?;
        info!("purging staged changes to object {}", object_id);

        self.lock
            .do_in_write_lock(object_id, || self.storage.purge_mutable_head(object_id))
    }

    /// Whether the object has an active mutable head.
    pub fn has_staged_changes(&self, object_id: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .load_inventory(object_id)?
            .map(|inventory| inventory.has_mutable_head())
            .unwrap_or(false))
    }

    /// Verify the object's complete tree: structure, inventories, sidecars,
    /// and the digest of every content file.
    ///
    /// # Errors
    /// - `Error::CorruptObject` / `Error::FixityCheck`: The object failed
    ///   validation.
    pub fn validate_object(&self, object_id: &str) -> Result<()> {
        self.ensure_open()?;
        info!("validating object {}", object_id);

        let staging = util::create_staging_dir(&self.work_dir, object_id)?;
        let result = self
            .storage
            .export_object(object_id, &staging)
            .and_then(|()| crate::validate::validate_object(&staging).map(|_| ()));

        util::safe_delete_dir(&staging);
        result
    }

    /// Close the repository. Subsequent operations fail with `Error::State`.
    pub fn close(&self) {
        debug!("closing repository");
        self.closed.store(true, Ordering::SeqCst);
        self.storage.close();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::State("the repository is closed".to_owned()));
        }
        Ok(())
    }

    fn load_inventory(&self, object_id: &str) -> Result<Option<Inventory>> {
        if object_id.is_empty() {
            return Err(Error::InvalidValue("object ID cannot be empty".to_owned()));
        }
        self.storage.load_inventory(object_id)
    }

    fn require_inventory(&self, object_id: &str) -> Result<Inventory> {
        self.load_inventory(object_id)?
            .ok_or_else(|| Error::NotFound(format!("object {} was not found", object_id)))
    }

    fn new_object_updater(&self, object_id: &str) -> Result<InventoryUpdater> {
        Ok(InventoryUpdater::for_new_object(
            object_id.to_owned(),
            &self.config,
            self.storage.object_root_path(object_id)?,
        ))
    }

    fn resolve_version(&self, id: &ObjectVersionId, inventory: &Inventory) -> Result<VersionNum> {
        match id.version_num() {
            None => Ok(inventory.head()),
            Some(num) => {
                inventory.ensure_version(num)?;
                Ok(num)
            }
        }
    }

    fn enforce_version_for_update(
        &self,
        id: &ObjectVersionId,
        inventory: Option<&Inventory>,
    ) -> Result<()> {
        let Some(expected) = id.version_num() else {
            return Ok(());
        };

        let head = inventory.map(Inventory::head);
        if head != Some(expected) {
            return Err(Error::ObjectOutOfSync(format!(
                "cannot update object {} because HEAD is {}, but version {} was specified",
                id.object_id(),
                head.map(|num| num.to_string())
                    .unwrap_or_else(|| "none".to_owned()),
                expected
            )));
        }
        Ok(())
    }

    fn ensure_no_mutable_head(&self, inventory: Option<&Inventory>) -> Result<()> {
        if let Some(inventory) = inventory {
            if inventory.has_mutable_head() {
                return Err(Error::State(format!(
                    "cannot create a new version of object {} because it has an active \
                     mutable HEAD; commit or purge the staged changes first",
                    inventory.id()
                )));
            }
        }
        Ok(())
    }

    fn now(&self, info: &VersionInfo) -> DateTime<FixedOffset> {
        info.created.unwrap_or_else(|| self.clock.now_utc())
    }

    /// Shared tail of every version-producing operation: create the scratch
    /// directory, run the staging callback, build and serialize the new
    /// inventory, and hand the staged version to the storage engine under
    /// the object lock. The scratch directory is always deleted.
    fn stage_and_commit<F>(
        &self,
        object_id: &str,
        inventory_updater: InventoryUpdater,
        info: &VersionInfo,
        f: F,
    ) -> Result<ObjectVersionId>
    where
        F: FnOnce(&mut ObjectUpdater<'_>) -> Result<()>,
    {
        let staging = util::create_staging_dir(&self.work_dir, object_id)?;
        let mut inventory_updater =
            inventory_updater.with_path_mapper(Arc::clone(&self.path_mapper));

        let result = (|| -> Result<ObjectVersionId> {
            let content_directory = inventory_updater.content_directory().to_owned();
            fs::create_dir_all(staging.join(&content_directory))?;

            let mut updater =
                ObjectUpdater::new(&mut inventory_updater, &staging, content_directory);
            f(&mut updater)?;
            drop(updater);

            let mut inventory = inventory_updater.build_new_inventory(
                self.now(info),
                info.message.clone(),
                info.user.clone(),
            )?;

            let digest = mapper::write_to_dir(&inventory, &staging)?;
            inventory.set_current_digest(Some(digest));

            self.lock.do_in_write_lock(object_id, || {
                self.storage.store_new_version(&inventory, &staging)
            })?;

            Ok(ObjectVersionId::version(object_id, inventory.head()))
        })();

        util::safe_delete_dir(&staging);
        result
    }
}

fn ensure_output_path(out_dir: &Path) -> Result<()> {
    if out_dir.exists() {
        return Err(Error::InvalidValue(format!(
            "output path {} must not exist",
            out_dir.display()
        )));
    }
    match out_dir.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        _ => Err(Error::InvalidValue(format!(
            "the parent of output path {} must be an existing directory",
            out_dir.display()
        ))),
    }
}

fn ensure_export_path(out_dir: &Path) -> Result<()> {
    if out_dir.exists() && !out_dir.is_dir() {
        return Err(Error::InvalidValue(format!(
            "export path {} must be a directory",
            out_dir.display()
        )));
    }
    fs::create_dir_all(out_dir)?;
    Ok(())
}

/// Parse the inventory (and verify its sidecar) from a directory on the
/// local filesystem.
fn read_inventory_from_dir(dir: &Path) -> Result<Inventory> {
    let inventory_path = dir.join(crate::storage::paths::INVENTORY_FILE);
    let bytes = fs::read(&inventory_path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            Error::InvalidValue(format!(
                "{} does not contain an inventory",
                dir.display()
            ))
        } else {
            Error::Io(error)
        }
    })?;

    let mut inventory = mapper::from_bytes(&bytes, &inventory_path.display().to_string())?;
    let algorithm = inventory.digest_algorithm();
    let sidecar = mapper::read_sidecar(&dir.join(crate::storage::paths::sidecar_name(algorithm)))?;
    let actual = algorithm.hash_hex(&bytes);
    if !actual.eq_ignore_ascii_case(&sidecar) {
        return Err(Error::CorruptObject(format!(
            "inventory at {} does not match its sidecar",
            inventory_path.display()
        )));
    }

    inventory.set_current_digest(Some(actual));
    validate::validate_shallow(&inventory)?;
    Ok(inventory)
}

fn stage_import(source: &Path, staging: &Path, move_source: bool) -> Result<()> {
    if move_source {
        // The staging directory was created for us; replace it wholesale so
        // the move is a rename.
        fs::remove_dir_all(staging)?;
        util::move_dir(source, staging)
    } else {
        util::recursive_copy(source, staging)
    }
}
