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

//! The cloud (object-store) storage engine.
//!
//! Object stores lack multi-key atomicity, so a commit runs as
//! upload-content, upload-version-inventory, then swap-root via server-side
//! copy, which is the publish point. Every phase tracks the keys it created and
//! deletes them on failure; a failed root swap additionally restores the
//! previous version's inventory. Per-file transfers fan out over a bounded
//! worker pool with a cooperative cancellation token.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::{parse_verified_inventory, paths, stream_map, ContentRetriever, ContentStream, OcflStorage};
use crate::cloud::CloudClient;
use crate::config::SpecVersion;
use crate::digest::{DigestAlgorithm, FixityCheckReader};
use crate::error::{Error, Result};
use crate::inventory::{mapper, validate, Inventory, RevisionNum, VersionNum};
use crate::layout::{layout_for, StorageLayout};
use crate::parallel::{CancelToken, ParallelPool};
use crate::path::join;
use crate::util;

/// An [`OcflStorage`] over a [`CloudClient`].
#[derive(Debug)]
pub struct CloudStorage {
    client: Arc<dyn CloudClient>,
    layout: Box<dyn StorageLayout>,
    spec_version: SpecVersion,
    pool: ParallelPool,
}

impl CloudStorage {
    /// Open the repository behind `client`, initializing it when the store
    /// is empty.
    ///
    /// # Errors
    /// - `Error::State`: The existing repository uses a different layout.
    /// - `Error::CorruptObject`: The repository's layout declaration is
    ///   malformed.
    pub fn new(
        client: Arc<dyn CloudClient>,
        spec_version: SpecVersion,
        layout: Box<dyn StorageLayout>,
        pool: ParallelPool,
    ) -> Result<Self> {
        let namaste_key = spec_version.root_namaste_name();

        let layout = if client.download_string(&namaste_key).is_ok() {
            let existing = Self::load_layout(client.as_ref())?;
            if existing.name() != layout.name() {
                return Err(Error::State(format!(
                    "repository uses layout {}, not {}",
                    existing.name(),
                    layout.name()
                )));
            }
            existing
        } else {
            client.upload_bytes(&namaste_key, spec_version.root_namaste_content().as_bytes())?;
            client.upload_bytes(
                paths::OCFL_LAYOUT_FILE,
                &layout_spec_json(layout.as_ref()),
            )?;
            let config_key = join(&[
                paths::EXTENSIONS_DIR,
                layout.name(),
                paths::EXTENSION_CONFIG_FILE,
            ]);
            let config_json = serde_json::to_vec_pretty(&layout.config()?)
                .expect("layout config serialization cannot fail");
            client.upload_bytes(&config_key, &config_json)?;

            info!("initialized cloud OCFL repository with layout {}", layout.name());
            layout
        };

        Ok(Self {
            client,
            layout,
            spec_version,
            pool,
        })
    }

    fn load_layout(client: &dyn CloudClient) -> Result<Box<dyn StorageLayout>> {
        #[derive(Deserialize)]
        struct LayoutSpec {
            extension: String,
        }

        let spec: LayoutSpec = serde_json::from_str(&client.download_string(paths::OCFL_LAYOUT_FILE)?)
            .map_err(|err| {
                Error::CorruptObject(format!("invalid {}: {}", paths::OCFL_LAYOUT_FILE, err))
            })?;

        let config_key = join(&[
            paths::EXTENSIONS_DIR,
            &spec.extension,
            paths::EXTENSION_CONFIG_FILE,
        ]);
        let config = match client.download_string(&config_key) {
            Ok(text) => Some(serde_json::from_str(&text).map_err(|err| {
                Error::CorruptObject(format!("invalid layout config at {}: {}", config_key, err))
            })?),
            Err(Error::NotFound(_)) => None,
            Err(error) => return Err(error),
        };

        layout_for(&spec.extension, config.as_ref())
    }

    fn download_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let mut stream = self.client.download_stream(key)?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn read_inventory_pair(&self, prefix: &str, algorithm_hint: Option<DigestAlgorithm>) -> Result<(Vec<u8>, String)> {
        let bytes = self.download_bytes(&paths::inventory_path(prefix))?;

        // Without a hint, probe the known algorithms for the sidecar.
        let algorithms = match algorithm_hint {
            Some(algorithm) => vec![algorithm],
            None => vec![DigestAlgorithm::Sha512, DigestAlgorithm::Sha256],
        };

        for algorithm in algorithms {
            match self
                .client
                .download_string(&paths::inventory_sidecar_path(prefix, algorithm))
            {
                Ok(content) => {
                    let digest = mapper::parse_sidecar(&content, prefix)?;
                    return Ok((bytes, digest));
                }
                Err(Error::NotFound(_)) => continue,
                Err(error) => return Err(error),
            }
        }

        Err(Error::CorruptObject(format!(
            "missing inventory sidecar under {}",
            prefix
        )))
    }

    fn load_inventory_at(&self, object_id: &str, prefix: &str) -> Result<Option<Inventory>> {
        let pair = match self.read_inventory_pair(prefix, None) {
            Ok(pair) => pair,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };

        let inventory = parse_verified_inventory(pair.0, pair.1, prefix, || {
            self.read_inventory_pair(prefix, None)
        })?;
        if inventory.id() != object_id {
            return Err(Error::CorruptObject(format!(
                "expected object {} but found {} at its storage path",
                object_id,
                inventory.id()
            )));
        }
        Ok(Some(inventory))
    }

    fn latest_revision(&self, object_root: &str) -> Result<Option<RevisionNum>> {
        let listing = self
            .client
            .list_directory(&paths::mutable_head_revisions_path(object_root))?;

        let mut latest: Option<RevisionNum> = None;
        for object in listing.objects {
            if let Ok(revision) = object.key_suffix.parse::<RevisionNum>() {
                if latest.map(|current| revision > current).unwrap_or(true) {
                    latest = Some(revision);
                }
            }
        }
        Ok(latest)
    }

    fn ensure_root_unchanged(&self, inventory: &Inventory) -> Result<()> {
        let saved_key = paths::mutable_head_root_sidecar_path(
            inventory.object_root_path(),
            inventory.digest_algorithm(),
        );
        let root_key = paths::inventory_sidecar_path(
            inventory.object_root_path(),
            inventory.digest_algorithm(),
        );

        // A mutable head opened on a brand-new object has no root inventory
        // yet; that is consistent as long as one still does not exist.
        let saved = match self.client.download_string(&saved_key) {
            Ok(content) => mapper::parse_sidecar(&content, &saved_key)?,
            Err(Error::NotFound(_)) => {
                return match self.client.download_string(&root_key) {
                    Ok(_) => Err(Error::ObjectOutOfSync(format!(
                        "the mutable HEAD of object {} is out of sync with the root object state",
                        inventory.id()
                    ))),
                    Err(Error::NotFound(_)) => Ok(()),
                    Err(error) => Err(error),
                };
            }
            Err(error) => return Err(error),
        };
        let root = sidecar_digest(self.client.as_ref(), &root_key)?;

        if !saved.eq_ignore_ascii_case(&root) {
            return Err(Error::ObjectOutOfSync(format!(
                "the mutable HEAD of object {} is out of sync with the root object state",
                inventory.id()
            )));
        }
        Ok(())
    }

    /// Upload every blob the new version introduces, in parallel. Returns
    /// the created keys for rollback.
    fn upload_content(&self, inventory: &Inventory, staging_dir: &Path) -> Result<Vec<String>> {
        let content_prefix = paths::content_prefix(
            inventory.head(),
            inventory.content_directory(),
            inventory.revision_num(),
        );

        let mut uploads = Vec::new();
        for content_paths in inventory.manifest().values() {
            for content_path in content_paths {
                if content_path.starts_with(&format!("{}/", content_prefix)) {
                    uploads.push(content_path.clone());
                }
            }
        }

        let uploaded: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let cancel = CancelToken::new();

        let result = self.pool.run(uploads, &cancel, |content_path| {
            let file = staging_dir.join(paths::content_path_in_staging(
                &content_path,
                inventory.content_directory(),
            ));
            if !file.exists() {
                return Err(Error::State(format!(
                    "staged file {} does not exist",
                    file.display()
                )));
            }

            let key = join(&[inventory.object_root_path(), &content_path]);
            let md5 = inventory
                .fixity_for_content_path(&content_path)
                .get(&DigestAlgorithm::Md5)
                .map(|digest| (*digest).to_owned());

            uploaded.lock().unwrap().push(key.clone());
            self.client.upload_file(&file, &key, md5.as_deref())
        });

        let uploaded = uploaded.into_inner().unwrap();
        match result {
            Ok(()) => Ok(uploaded),
            Err(error) => {
                self.client.safe_delete_objects(&uploaded);
                Err(error)
            }
        }
    }

    /// Upload the version inventory and swap the root inventory to it. On a
    /// failed swap the previous version's inventory is restored to the root
    /// and the version inventory keys are deleted.
    fn store_inventory_with_rollback(
        &self,
        inventory: &Inventory,
        staging_dir: &Path,
        version_prefix: &str,
    ) -> Result<()> {
        let algorithm = inventory.digest_algorithm();
        let inventory_key = paths::inventory_path(version_prefix);
        let sidecar_key = paths::inventory_sidecar_path(version_prefix, algorithm);

        self.client.upload_file(
            &staging_dir.join(paths::INVENTORY_FILE),
            &inventory_key,
            None,
        )?;
        self.client.upload_file(
            &staging_dir.join(paths::sidecar_name(algorithm)),
            &sidecar_key,
            None,
        )?;

        match self.copy_inventory_to_root(inventory, version_prefix) {
            Ok(()) => Ok(()),
            Err(swap_error) => {
                self.rollback_root_inventory(inventory);
                self.client
                    .safe_delete_objects(&[inventory_key, sidecar_key]);
                Err(swap_error)
            }
        }
    }

    fn copy_inventory_to_root(&self, inventory: &Inventory, version_prefix: &str) -> Result<()> {
        let algorithm = inventory.digest_algorithm();
        self.client.copy_object(
            &paths::inventory_path(version_prefix),
            &paths::inventory_path(inventory.object_root_path()),
        )?;
        self.client.copy_object(
            &paths::inventory_sidecar_path(version_prefix, algorithm),
            &paths::inventory_sidecar_path(inventory.object_root_path(), algorithm),
        )
    }

    fn rollback_root_inventory(&self, inventory: &Inventory) {
        if inventory.is_first_version() {
            return;
        }

        let restore = (|| -> Result<()> {
            let previous = inventory.head().previous()?;
            let previous_prefix = paths::version_path(inventory.object_root_path(), previous);
            self.copy_inventory_to_root(inventory, &previous_prefix)
        })();

        if let Err(restore_error) = restore {
            error!(
                "failed to roll back the root inventory of object {}; \
                 the object must be repaired manually: {}",
                inventory.id(),
                restore_error
            );
        }
    }

    fn store_new_immutable_version(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let object_root = inventory.object_root_path();

        if !self
            .client
            .list_directory(&paths::mutable_head_version_path(object_root))?
            .is_empty()
        {
            return Err(Error::State(format!(
                "cannot create a new version of object {} because it has an active mutable HEAD",
                inventory.id()
            )));
        }

        let version_prefix = paths::version_path(object_root, inventory.head());
        self.ensure_version_does_not_exist(inventory, &version_prefix)?;

        let mut namaste_key = None;
        if inventory.is_first_version() {
            let key = join(&[object_root, &self.spec_version.object_namaste_name()]);
            self.client
                .upload_bytes(&key, self.spec_version.object_namaste_content().as_bytes())?;
            namaste_key = Some(key);
        }

        let cleanup_namaste = |this: &Self| {
            if let Some(key) = &namaste_key {
                this.client.safe_delete_objects(std::slice::from_ref(key));
            }
        };

        let content_keys = match self.upload_content(inventory, staging_dir) {
            Ok(keys) => keys,
            Err(error) => {
                cleanup_namaste(self);
                return Err(error);
            }
        };

        if let Err(error) = self.store_inventory_with_rollback(inventory, staging_dir, &version_prefix)
        {
            self.client.safe_delete_objects(&content_keys);
            cleanup_namaste(self);
            return Err(error);
        }

        debug!("published object {} version {}", inventory.id(), inventory.head());
        Ok(())
    }

    fn store_new_mutable_head_version(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let object_root = inventory.object_root_path();
        let revision = inventory
            .revision_num()
            .expect("mutable head inventory must have a revision");

        if let Some(latest) = self.latest_revision(object_root)? {
            if latest >= revision {
                return Err(Error::ObjectOutOfSync(format!(
                    "failed to update the mutable HEAD of object {}: \
                     revision {} already exists",
                    inventory.id(),
                    latest
                )));
            }
        }

        let mut cleanup_keys = Vec::new();

        let ext_root = paths::mutable_head_ext_root(object_root);
        if self.client.list_directory(&ext_root)?.is_empty() {
            // First revision: save the root sidecar so later revisions can
            // detect root movement. A brand-new object has no root inventory
            // yet; it gets its NAMASTE key instead.
            let saved_key = paths::mutable_head_root_sidecar_path(
                object_root,
                inventory.digest_algorithm(),
            );
            match self.client.copy_object(
                &paths::inventory_sidecar_path(object_root, inventory.digest_algorithm()),
                &saved_key,
            ) {
                Ok(()) => cleanup_keys.push(saved_key),
                Err(Error::NotFound(_)) => {
                    let namaste_key =
                        join(&[object_root, &self.spec_version.object_namaste_name()]);
                    self.client.upload_bytes(
                        &namaste_key,
                        self.spec_version.object_namaste_content().as_bytes(),
                    )?;
                    cleanup_keys.push(namaste_key);
                }
                Err(error) => return Err(error),
            }
        } else {
            self.ensure_root_unchanged(inventory)?;
        }

        let result = (|| -> Result<()> {
            let marker_key = paths::revision_marker_path(object_root, revision);
            self.client.upload_bytes(&marker_key, &[])?;
            cleanup_keys.push(marker_key);

            let content_keys = self.upload_content(inventory, staging_dir)?;

            let head_prefix = paths::mutable_head_version_path(object_root);
            let algorithm = inventory.digest_algorithm();
            let upload = (|| -> Result<()> {
                self.client.upload_file(
                    &staging_dir.join(paths::INVENTORY_FILE),
                    &paths::inventory_path(&head_prefix),
                    None,
                )?;
                self.client.upload_file(
                    &staging_dir.join(paths::sidecar_name(algorithm)),
                    &paths::inventory_sidecar_path(&head_prefix, algorithm),
                    None,
                )
            })();

            if let Err(error) = upload {
                self.client.safe_delete_objects(&content_keys);
                return Err(error);
            }
            Ok(())
        })();

        if let Err(error) = result {
            self.client.safe_delete_objects(&cleanup_keys);
            return Err(error);
        }

        self.delete_head_content_not_in_manifest(inventory)?;

        debug!(
            "stored revision {} of object {} mutable HEAD",
            revision,
            inventory.id()
        );
        Ok(())
    }

    /// Remove keys under the mutable head's content directory that the
    /// manifest no longer references.
    fn delete_head_content_not_in_manifest(&self, inventory: &Inventory) -> Result<()> {
        let object_root = inventory.object_root_path();
        let content_prefix = join(&[
            &paths::mutable_head_version_path(object_root),
            inventory.content_directory(),
        ]);

        let listing = self.client.list(&format!("{}/", content_prefix))?;
        let mut delete_keys = Vec::new();

        for object in listing.objects {
            let content_path = object
                .key
                .strip_prefix(&format!("{}/", object_root))
                .unwrap_or(&object.key)
                .to_owned();
            if inventory.digest_for_content_path(&content_path).is_none() {
                delete_keys.push(object.key);
            }
        }

        self.client.safe_delete_objects(&delete_keys);
        Ok(())
    }

    fn ensure_version_does_not_exist(&self, inventory: &Inventory, version_prefix: &str) -> Result<()> {
        // Advisory under eventual consistency; the object lock is the
        // authoritative mutual exclusion.
        if !self.client.list_directory(version_prefix)?.is_empty() {
            return Err(Error::ObjectOutOfSync(format!(
                "failed to create a new version of object {}: \
                 changes are out of sync with the current object state",
                inventory.id()
            )));
        }
        Ok(())
    }

    fn download_tree(&self, prefix: &str, out_dir: &Path) -> Result<()> {
        let listing = self.client.list(&format!("{}/", prefix))?;
        if listing.objects.is_empty() {
            return Err(Error::NotFound(format!("{} was not found", prefix)));
        }

        let cancel = CancelToken::new();
        self.pool.run(listing.objects, &cancel, |object| {
            self.client
                .download_file(&object.key, &out_dir.join(&object.key_suffix))
        })
    }
}

fn layout_spec_json(layout: &dyn StorageLayout) -> Vec<u8> {
    serde_json::to_vec_pretty(&serde_json::json!({
        "extension": layout.name(),
        "description": layout.describe(),
    }))
    .expect("layout spec serialization cannot fail")
}

fn sidecar_digest(client: &dyn CloudClient, key: &str) -> Result<String> {
    match client.download_string(key) {
        Ok(content) => mapper::parse_sidecar(&content, key),
        Err(Error::NotFound(_)) => Err(Error::CorruptObject(format!(
            "missing inventory sidecar: {}",
            key
        ))),
        Err(error) => Err(error),
    }
}

/// A [`ContentRetriever`] that streams a key from the cloud store.
struct CloudRetriever {
    client: Arc<dyn CloudClient>,
    key: String,
    algorithm: DigestAlgorithm,
    digest: String,
    logical_path: String,
}

impl ContentRetriever for CloudRetriever {
    fn open(&self) -> Result<ContentStream> {
        let stream = self.client.download_stream(&self.key)?;
        Ok(FixityCheckReader::new(
            stream,
            self.algorithm,
            &self.digest,
            &self.logical_path,
        ))
    }

    fn digest(&self) -> &str {
        &self.digest
    }

    fn digest_algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }
}

impl OcflStorage for CloudStorage {
    fn load_inventory(&self, object_id: &str) -> Result<Option<Inventory>> {
        let object_root = self.layout.map_object_id(object_id)?;

        let head_prefix = paths::mutable_head_version_path(&object_root);
        if let Some(mut inventory) = self.load_inventory_at(object_id, &head_prefix)? {
            let revision = self.latest_revision(&object_root)?.unwrap_or(RevisionNum::R1);
            inventory.set_revision_num(Some(revision));
            inventory.set_object_root_path(object_root);
            validate::validate_shallow(&inventory)?;
            self.ensure_root_unchanged(&inventory)?;
            return Ok(Some(inventory));
        }

        match self.load_inventory_at(object_id, &object_root)? {
            Some(mut inventory) => {
                inventory.set_object_root_path(object_root);
                validate::validate_shallow(&inventory)?;
                Ok(Some(inventory))
            }
            None => Ok(None),
        }
    }

    fn store_new_version(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        if inventory.has_mutable_head() {
            self.store_new_mutable_head_version(inventory, staging_dir)
        } else {
            self.store_new_immutable_version(inventory, staging_dir)
        }
    }

    fn reconstruct_object_version(
        &self,
        inventory: &Inventory,
        version_num: VersionNum,
        out_dir: &Path,
    ) -> Result<()> {
        let version = inventory.ensure_version(version_num)?;
        let algorithm = inventory.digest_algorithm();

        let entries: Vec<(String, Vec<String>)> = version
            .state
            .iter()
            .map(|(digest, logical_paths)| (digest.clone(), logical_paths.clone()))
            .collect();

        let cancel = CancelToken::new();
        self.pool.run(entries, &cancel, |(digest, logical_paths)| {
            let key = inventory.storage_path(&digest)?;

            for logical_path in logical_paths {
                crate::path::validate_logical_path(&logical_path)?;
                let destination = out_dir.join(&logical_path);
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)?;
                }

                let stream = self.client.download_stream(&key)?;
                let mut reader =
                    FixityCheckReader::new(stream, algorithm, &digest, &logical_path);
                let mut out = File::create(&destination)?;

                match io::copy(&mut reader, &mut out) {
                    Ok(_) => reader.verify()?,
                    Err(copy_error) => {
                        drop(out);
                        let _ = fs::remove_file(&destination);
                        match reader.verify() {
                            Err(fixity) => return Err(fixity),
                            Ok(()) => return Err(copy_error.into()),
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn get_object_streams(
        &self,
        inventory: &Inventory,
        version_num: VersionNum,
    ) -> Result<BTreeMap<String, Box<dyn ContentRetriever>>> {
        stream_map(inventory, version_num, |digest, logical_path| {
            Ok(Box::new(CloudRetriever {
                client: Arc::clone(&self.client),
                key: inventory.storage_path(digest)?,
                algorithm: inventory.digest_algorithm(),
                digest: digest.to_owned(),
                logical_path: logical_path.to_owned(),
            }))
        })
    }

    fn contains_object(&self, object_id: &str) -> Result<bool> {
        let object_root = self.layout.map_object_id(object_id)?;
        Ok(!self.client.list_directory(&object_root)?.is_empty())
    }

    fn purge_object(&self, object_id: &str) -> Result<()> {
        let object_root = self.layout.map_object_id(object_id)?;
        info!("purging object {} at {}", object_id, object_root);
        self.client.delete_path(&object_root)
    }

    fn rollback_to_version(&self, inventory: &Inventory, version_num: VersionNum) -> Result<()> {
        inventory.ensure_version(version_num)?;
        let object_root = inventory.object_root_path();

        info!("rolling object {} back to {}", inventory.id(), version_num);

        let version_prefix = paths::version_path(object_root, version_num);
        self.copy_inventory_to_root(inventory, &version_prefix)?;

        let mut num = version_num;
        while num < inventory.head() {
            num = num.next()?;
            self.client
                .delete_path(&paths::version_path(object_root, num))?;
        }

        self.client
            .delete_path(&paths::mutable_head_ext_root(object_root))?;
        Ok(())
    }

    fn commit_mutable_head(
        &self,
        old_inventory: &Inventory,
        new_inventory: &Inventory,
        staging_dir: &Path,
    ) -> Result<()> {
        let object_root = new_inventory.object_root_path();

        if self
            .client
            .list_directory(&paths::mutable_head_version_path(object_root))?
            .is_empty()
        {
            return Err(Error::ObjectOutOfSync(format!(
                "cannot commit the mutable HEAD of object {} because it does not exist",
                new_inventory.id()
            )));
        }

        self.ensure_root_unchanged(old_inventory)?;

        let version_prefix = paths::version_path(object_root, new_inventory.head());
        self.ensure_version_does_not_exist(new_inventory, &version_prefix)?;

        // Server-side copy every mutable-head blob to its immutable home.
        let version_root_prefix = format!("{}/", new_inventory.head());
        let mut copies = Vec::new();
        for (digest, content_paths) in new_inventory.manifest() {
            for content_path in content_paths {
                if content_path.starts_with(&version_root_prefix) {
                    let src = old_inventory.storage_path(digest)?;
                    let dst = join(&[object_root, content_path]);
                    copies.push((src, dst));
                }
            }
        }

        let copied: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let cancel = CancelToken::new();
        let copy_result = self.pool.run(copies, &cancel, |(src, dst)| {
            copied.lock().unwrap().push(dst.clone());
            self.client.copy_object(&src, &dst)
        });
        let copied = copied.into_inner().unwrap();

        if let Err(error) = copy_result {
            self.client.safe_delete_objects(&copied);
            return Err(error);
        }

        if let Err(error) =
            self.store_inventory_with_rollback(new_inventory, staging_dir, &version_prefix)
        {
            self.client.safe_delete_objects(&copied);
            return Err(error);
        }

        if let Err(error) = self
            .client
            .delete_path(&paths::mutable_head_ext_root(object_root))
        {
            warn!(
                "failed to clean up the mutable HEAD of object {}; \
                 it must be deleted manually: {}",
                new_inventory.id(),
                error
            );
        }

        debug!(
            "committed mutable HEAD of object {} as {}",
            new_inventory.id(),
            new_inventory.head()
        );
        Ok(())
    }

    fn purge_mutable_head(&self, object_id: &str) -> Result<()> {
        let object_root = self.layout.map_object_id(object_id)?;
        info!("purging the mutable HEAD of object {}", object_id);
        self.client
            .delete_path(&paths::mutable_head_ext_root(&object_root))
    }

    fn object_root_path(&self, object_id: &str) -> Result<String> {
        self.layout.map_object_id(object_id)
    }

    fn export_object(&self, object_id: &str, out_dir: &Path) -> Result<()> {
        let object_root = self.layout.map_object_id(object_id)?;
        self.download_tree(&object_root, out_dir)
            .map_err(|error| match error {
                Error::NotFound(_) => Error::NotFound(format!("object {} was not found", object_id)),
                other => other,
            })
    }

    fn export_version(
        &self,
        object_id: &str,
        version_num: VersionNum,
        out_dir: &Path,
    ) -> Result<()> {
        let object_root = self.layout.map_object_id(object_id)?;
        let version_prefix = paths::version_path(&object_root, version_num);
        self.download_tree(&version_prefix, out_dir)
            .map_err(|error| match error {
                Error::NotFound(_) => Error::NotFound(format!(
                    "object {} version {} was not found",
                    object_id, version_num
                )),
                other => other,
            })
    }

    fn import_object(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let object_root = self.layout.map_object_id(inventory.id())?;
        if !self.client.list_directory(&object_root)?.is_empty() {
            return Err(Error::AlreadyExists(format!(
                "an object already exists with ID {}",
                inventory.id()
            )));
        }

        let files = util::list_files(staging_dir)?;
        let uploaded: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let cancel = CancelToken::new();
        let staging_dir: PathBuf = staging_dir.to_owned();

        let result = self.pool.run(files, &cancel, |file| {
            let key = join(&[&object_root, &file]);
            uploaded.lock().unwrap().push(key.clone());
            self.client.upload_file(&staging_dir.join(&file), &key, None)
        });

        if let Err(error) = result {
            self.client.safe_delete_objects(&uploaded.into_inner().unwrap());
            return Err(error);
        }
        Ok(())
    }

    fn list_object_ids(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + Send>> {
        let marker = format!("/{}", self.spec_version.object_namaste_name());
        let listing = self.client.list("")?;
        let client = Arc::clone(&self.client);

        let object_roots: Vec<String> = listing
            .objects
            .into_iter()
            .filter_map(|object| {
                object
                    .key
                    .strip_suffix(&marker)
                    .map(|object_root| object_root.to_owned())
            })
            .collect();

        Ok(Box::new(object_roots.into_iter().map(move |object_root| {
            let bytes = {
                let mut stream = client.download_stream(&paths::inventory_path(&object_root))?;
                let mut bytes = Vec::new();
                stream.read_to_end(&mut bytes)?;
                bytes
            };
            let inventory = mapper::from_bytes(&bytes, &object_root)?;
            Ok(inventory.id().to_owned())
        })))
    }

    fn close(&self) {}
}
