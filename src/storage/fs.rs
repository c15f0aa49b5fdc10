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

//! The POSIX filesystem storage engine.
//!
//! Versions are staged on the same filesystem and published with a directory
//! rename, which is atomic within a mount. The root inventory swap writes a
//! `.new` sibling, fsyncs, and renames over the destination. Stale `.new`
//! files found when an object is loaded are crash leftovers and are deleted.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{parse_verified_inventory, paths, stream_map, ContentRetriever, ContentStream, OcflStorage};
use crate::config::SpecVersion;
use crate::digest::{DigestAlgorithm, FixityCheckReader};
use crate::error::{Error, Result};
use crate::inventory::{mapper, validate, Inventory, RevisionNum, VersionNum};
use crate::layout::{layout_for, StorageLayout};
use crate::util;

/// The shape of `ocfl_layout.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LayoutSpec {
    extension: String,
    description: String,
}

/// An [`OcflStorage`] over a local directory.
#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
    layout: Box<dyn StorageLayout>,
    spec_version: SpecVersion,
}

impl FsStorage {
    /// Open the repository at `root`, creating and initializing it when it
    /// does not exist yet.
    ///
    /// For an existing repository the layout recorded in `ocfl_layout.json`
    /// wins; passing a different layout is an error.
    ///
    /// # Errors
    /// - `Error::State`: The existing repository uses a different layout.
    /// - `Error::CorruptObject`: The repository's layout declaration is
    ///   malformed.
    pub fn new(
        root: impl Into<PathBuf>,
        spec_version: SpecVersion,
        layout: Box<dyn StorageLayout>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        if let Ok(existing_version) = find_root_spec_version(&root) {
            let existing = load_layout(&root)?;
            if existing.name() != layout.name() {
                return Err(Error::State(format!(
                    "repository at {} uses layout {}, not {}",
                    root.display(),
                    existing.name(),
                    layout.name()
                )));
            }
            return Ok(Self {
                root,
                layout: existing,
                spec_version: existing_version,
            });
        }

        let namaste = root.join(spec_version.root_namaste_name());
        fs::write(&namaste, spec_version.root_namaste_content())?;

        let layout_spec = LayoutSpec {
            extension: layout.name().to_owned(),
            description: layout.describe().to_owned(),
        };
        let layout_json = serde_json::to_vec_pretty(&layout_spec)
            .expect("layout spec serialization cannot fail");
        fs::write(root.join(paths::OCFL_LAYOUT_FILE), layout_json)?;

        let ext_dir = root.join(paths::EXTENSIONS_DIR).join(layout.name());
        fs::create_dir_all(&ext_dir)?;
        let config_json = serde_json::to_vec_pretty(&layout.config()?)
            .expect("layout config serialization cannot fail");
        fs::write(ext_dir.join(paths::EXTENSION_CONFIG_FILE), config_json)?;

        info!(
            "initialized OCFL repository at {} with layout {}",
            root.display(),
            layout.name()
        );

        Ok(Self {
            root,
            layout,
            spec_version,
        })
    }

    /// Open an existing repository, resolving the layout from disk.
    ///
    /// # Errors
    /// - `Error::NotFound`: `root` is not an OCFL repository.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let spec_version = find_root_spec_version(&root)?;
        let layout = load_layout(&root)?;
        Ok(Self {
            root,
            layout,
            spec_version,
        })
    }

    /// The repository root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_root(&self, object_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(self.layout.map_object_id(object_id)?))
    }

    fn abs(&self, repo_relative: &str) -> PathBuf {
        self.root.join(repo_relative)
    }

    /// Read `inventory.json` plus its sidecar digest from `dir`.
    fn read_inventory_pair(dir: &Path) -> Result<(Vec<u8>, String)> {
        let bytes = fs::read(dir.join(paths::INVENTORY_FILE))?;
        let (sidecar_path, _) = find_sidecar(dir)?;
        let digest = mapper::read_sidecar(&sidecar_path)?;
        Ok((bytes, digest))
    }

    fn load_root_inventory(&self, object_id: &str, object_root: &Path) -> Result<Option<Inventory>> {
        let inventory_path = object_root.join(paths::INVENTORY_FILE);
        if !inventory_path.exists() {
            return Err(Error::CorruptObject(format!(
                "object root {} exists but has no inventory",
                object_root.display()
            )));
        }

        let (bytes, sidecar_digest) = Self::read_inventory_pair(object_root)?;
        let mut inventory = parse_verified_inventory(
            bytes,
            sidecar_digest,
            &inventory_path.display().to_string(),
            || Self::read_inventory_pair(object_root),
        )?;

        self.finish_load(object_id, &mut inventory)?;
        Ok(Some(inventory))
    }

    fn load_mutable_inventory(&self, object_id: &str, object_root_rel: &str) -> Result<Option<Inventory>> {
        let head_dir = self.abs(&paths::mutable_head_version_path(object_root_rel));
        let inventory_path = head_dir.join(paths::INVENTORY_FILE);
        if !inventory_path.exists() {
            return Ok(None);
        }

        let (bytes, sidecar_digest) = Self::read_inventory_pair(&head_dir)?;
        let mut inventory = parse_verified_inventory(
            bytes,
            sidecar_digest,
            &inventory_path.display().to_string(),
            || Self::read_inventory_pair(&head_dir),
        )?;

        let revisions_dir = head_dir.join("revisions");
        let revision = latest_revision(&revisions_dir)?.unwrap_or(RevisionNum::R1);
        inventory.set_revision_num(Some(revision));

        self.finish_load(object_id, &mut inventory)?;
        self.ensure_root_unchanged(&inventory)?;
        Ok(Some(inventory))
    }

    fn finish_load(&self, object_id: &str, inventory: &mut Inventory) -> Result<()> {
        if inventory.id() != object_id {
            return Err(Error::CorruptObject(format!(
                "expected object {} but found {} at its storage path",
                object_id,
                inventory.id()
            )));
        }
        inventory.set_object_root_path(self.layout.map_object_id(object_id)?);
        validate::validate_shallow(inventory)
    }

    /// Compare the sidecar copy saved when the mutable head was created with
    /// the current root sidecar; a difference means another writer moved the
    /// object root.
    fn ensure_root_unchanged(&self, inventory: &Inventory) -> Result<()> {
        let saved_path = self.abs(&paths::mutable_head_root_sidecar_path(
            inventory.object_root_path(),
            inventory.digest_algorithm(),
        ));
        let root_path = self.abs(&paths::inventory_sidecar_path(
            inventory.object_root_path(),
            inventory.digest_algorithm(),
        ));

        // A mutable head opened on a brand-new object has no root inventory
        // yet; that is consistent as long as one still does not exist.
        if !saved_path.exists() {
            if root_path.exists() {
                return Err(Error::ObjectOutOfSync(format!(
                    "the mutable HEAD of object {} is out of sync with the root object state",
                    inventory.id()
                )));
            }
            return Ok(());
        }

        let saved = mapper::read_sidecar(&saved_path)?;
        let root = mapper::read_sidecar(&root_path)?;

        if !saved.eq_ignore_ascii_case(&root) {
            return Err(Error::ObjectOutOfSync(format!(
                "the mutable HEAD of object {} is out of sync with the root object state",
                inventory.id()
            )));
        }
        Ok(())
    }

    /// Copy the staged root inventory and sidecar over the object root's.
    /// This is the publish point.
    fn publish_root_inventory(&self, inventory: &Inventory, version_dir: &Path, object_root: &Path) -> Result<()> {
        let bytes = fs::read(version_dir.join(paths::INVENTORY_FILE))?;
        util::atomic_write(&object_root.join(paths::INVENTORY_FILE), &bytes)?;

        let sidecar_name = paths::sidecar_name(inventory.digest_algorithm());
        let sidecar_bytes = fs::read(version_dir.join(&sidecar_name))?;
        util::atomic_write(&object_root.join(&sidecar_name), &sidecar_bytes)?;
        Ok(())
    }

    fn store_new_immutable_version(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let object_root = self.abs(inventory.object_root_path());
        let version_dir = object_root.join(inventory.head().to_string());

        if inventory.is_first_version() {
            fs::create_dir_all(&object_root)?;
            let namaste = object_root.join(self.spec_version.object_namaste_name());
            fs::write(namaste, self.spec_version.object_namaste_content())?;
        } else {
            // CAS against the root sidecar: a concurrent writer that
            // published after our inventory was loaded changes the digest.
            let root_sidecar = object_root.join(paths::sidecar_name(inventory.digest_algorithm()));
            let on_disk = mapper::read_sidecar(&root_sidecar)?;
            if inventory.previous_digest().map(str::to_owned) != Some(on_disk) {
                return Err(out_of_sync(inventory.id()));
            }
        }

        if version_dir.exists() {
            return Err(out_of_sync(inventory.id()));
        }

        util::move_dir(staging_dir, &version_dir)?;

        if let Err(error) = self.publish_root_inventory(inventory, &version_dir, &object_root) {
            warn!(
                "failed to publish version {} of object {}; rolling back",
                inventory.head(),
                inventory.id()
            );
            util::safe_delete_dir(&version_dir);
            if inventory.is_first_version() {
                util::safe_delete_dir(&object_root);
            }
            return Err(error);
        }

        debug!("published object {} version {}", inventory.id(), inventory.head());
        Ok(())
    }

    fn store_new_mutable_head_version(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let object_root = self.abs(inventory.object_root_path());
        let revision = inventory
            .revision_num()
            .expect("mutable head inventory must have a revision");
        let ext_root = self.abs(&paths::mutable_head_ext_root(inventory.object_root_path()));
        let head_dir = self.abs(&paths::mutable_head_version_path(inventory.object_root_path()));
        let revisions_dir = head_dir.join("revisions");

        if let Some(latest) = latest_revision(&revisions_dir)? {
            if latest >= revision {
                return Err(Error::ObjectOutOfSync(format!(
                    "failed to update the mutable HEAD of object {}: \
                     revision {} already exists",
                    inventory.id(),
                    latest
                )));
            }
        }

        let first_revision = !ext_root.exists();
        if first_revision {
            if !object_root.exists() {
                // A mutable head may open a brand-new object.
                fs::create_dir_all(&object_root)?;
                let namaste = object_root.join(self.spec_version.object_namaste_name());
                fs::write(namaste, self.spec_version.object_namaste_content())?;
            }

            fs::create_dir_all(&ext_root)?;
            let root_sidecar = object_root.join(paths::sidecar_name(inventory.digest_algorithm()));
            if root_sidecar.exists() {
                let saved = self.abs(&paths::mutable_head_root_sidecar_path(
                    inventory.object_root_path(),
                    inventory.digest_algorithm(),
                ));
                fs::copy(&root_sidecar, &saved)?;
            }
        } else {
            self.ensure_root_unchanged(inventory)?;
        }

        let result = self.write_mutable_revision(inventory, staging_dir, &head_dir, revision);

        if result.is_err() {
            if first_revision {
                util::safe_delete_dir(&ext_root);
                // A brand-new object root with no published version is a
                // half-created object; remove it entirely.
                if !object_root.join(paths::INVENTORY_FILE).exists() {
                    util::safe_delete_dir(&object_root);
                }
            } else {
                let marker = self.abs(&paths::revision_marker_path(
                    inventory.object_root_path(),
                    revision,
                ));
                if marker.exists() {
                    let _ = fs::remove_file(&marker);
                }
                util::safe_delete_dir(
                    &head_dir.join(inventory.content_directory()).join(revision.to_string()),
                );
            }
        }

        result
    }

    fn write_mutable_revision(
        &self,
        inventory: &Inventory,
        staging_dir: &Path,
        head_dir: &Path,
        revision: RevisionNum,
    ) -> Result<()> {
        fs::create_dir_all(head_dir.join("revisions"))?;

        // The zero-byte revision marker doubles as a create-exclusive guard.
        let marker = head_dir.join("revisions").join(revision.to_string());
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .map_err(|error| {
                if error.kind() == io::ErrorKind::AlreadyExists {
                    Error::ObjectOutOfSync(format!(
                        "failed to update the mutable HEAD of object {}: \
                         revision {} already exists",
                        inventory.id(),
                        revision
                    ))
                } else {
                    Error::Io(error)
                }
            })?;

        let staged_content = staging_dir
            .join(inventory.content_directory())
            .join(revision.to_string());
        if staged_content.exists() {
            let target = head_dir
                .join(inventory.content_directory())
                .join(revision.to_string());
            util::move_dir(&staged_content, &target)?;
        }

        let bytes = fs::read(staging_dir.join(paths::INVENTORY_FILE))?;
        util::atomic_write(&head_dir.join(paths::INVENTORY_FILE), &bytes)?;
        let sidecar_name = paths::sidecar_name(inventory.digest_algorithm());
        let sidecar_bytes = fs::read(staging_dir.join(&sidecar_name))?;
        util::atomic_write(&head_dir.join(&sidecar_name), &sidecar_bytes)?;

        self.prune_unreferenced_content(
            inventory,
            &head_dir.join(inventory.content_directory()),
            &paths::mutable_head_version_path(""),
        )?;

        debug!(
            "stored revision {} of object {} mutable HEAD",
            revision,
            inventory.id()
        );
        Ok(())
    }

    /// Delete files under `content_root` that the inventory's manifest no
    /// longer references, e.g. content superseded within the same mutable
    /// head.
    fn prune_unreferenced_content(
        &self,
        inventory: &Inventory,
        content_root: &Path,
        prefix: &str,
    ) -> Result<()> {
        if !content_root.exists() {
            return Ok(());
        }

        for file in util::list_files(content_root)? {
            let content_path = crate::path::join(&[
                prefix,
                inventory.content_directory(),
                &file,
            ]);
            if inventory.digest_for_content_path(&content_path).is_none() {
                let path = content_root.join(&file);
                debug!("pruning unreferenced content file {}", path.display());
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn out_of_sync(object_id: &str) -> Error {
    Error::ObjectOutOfSync(format!(
        "failed to create a new version of object {}: \
         changes are out of sync with the current object state",
        object_id
    ))
}

/// Find the `inventory.json.<algo>` sidecar in `dir`.
fn find_sidecar(dir: &Path) -> Result<(PathBuf, DigestAlgorithm)> {
    let prefix = format!("{}.", paths::INVENTORY_FILE);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(algo_name) = name.strip_prefix(&prefix) {
            if name.ends_with(".new") {
                continue;
            }
            let algorithm: DigestAlgorithm = algo_name.parse().map_err(|_| {
                Error::CorruptObject(format!(
                    "inventory sidecar {} names an unknown digest algorithm",
                    entry.path().display()
                ))
            })?;
            return Ok((entry.path(), algorithm));
        }
    }

    Err(Error::CorruptObject(format!(
        "missing inventory sidecar in {}",
        dir.display()
    )))
}

/// Delete crash leftovers (`*.new` files) from an object root.
fn clean_stale_temp_files(object_root: &Path) -> Result<()> {
    for entry in fs::read_dir(object_root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".new") && entry.file_type()?.is_file() {
            warn!("removing stale temp file {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn latest_revision(revisions_dir: &Path) -> Result<Option<RevisionNum>> {
    if !revisions_dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<RevisionNum> = None;
    for entry in fs::read_dir(revisions_dir)? {
        let entry = entry?;
        if let Ok(revision) = entry.file_name().to_string_lossy().parse::<RevisionNum>() {
            if latest.map(|current| revision > current).unwrap_or(true) {
                latest = Some(revision);
            }
        }
    }
    Ok(latest)
}

fn find_root_spec_version(root: &Path) -> Result<SpecVersion> {
    for version in [SpecVersion::V1_1, SpecVersion::V1_0] {
        if root.join(version.root_namaste_name()).exists() {
            return Ok(version);
        }
    }
    Err(Error::NotFound(format!(
        "{} is not an OCFL repository root",
        root.display()
    )))
}

fn load_layout(root: &Path) -> Result<Box<dyn StorageLayout>> {
    let layout_path = root.join(paths::OCFL_LAYOUT_FILE);
    let bytes = fs::read(&layout_path).map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            Error::CorruptObject(format!(
                "repository at {} has no {}",
                root.display(),
                paths::OCFL_LAYOUT_FILE
            ))
        } else {
            Error::Io(error)
        }
    })?;
    let spec: LayoutSpec = serde_json::from_slice(&bytes).map_err(|error| {
        Error::CorruptObject(format!("invalid {}: {}", paths::OCFL_LAYOUT_FILE, error))
    })?;

    let config_path = root
        .join(paths::EXTENSIONS_DIR)
        .join(&spec.extension)
        .join(paths::EXTENSION_CONFIG_FILE);
    let config = if config_path.exists() {
        let bytes = fs::read(&config_path)?;
        Some(serde_json::from_slice(&bytes).map_err(|error| {
            Error::CorruptObject(format!(
                "invalid layout config at {}: {}",
                config_path.display(),
                error
            ))
        })?)
    } else {
        None
    };

    layout_for(&spec.extension, config.as_ref())
}

/// A [`ContentRetriever`] that opens a local file.
struct FsRetriever {
    path: PathBuf,
    algorithm: DigestAlgorithm,
    digest: String,
    logical_path: String,
}

impl ContentRetriever for FsRetriever {
    fn open(&self) -> Result<ContentStream> {
        let file: Box<dyn io::Read + Send> = Box::new(File::open(&self.path)?);
        Ok(FixityCheckReader::new(
            file,
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

impl OcflStorage for FsStorage {
    fn load_inventory(&self, object_id: &str) -> Result<Option<Inventory>> {
        let object_root_rel = self.layout.map_object_id(object_id)?;
        let object_root = self.abs(&object_root_rel);
        if !object_root.exists() {
            return Ok(None);
        }
        if fs::read_dir(&object_root)?.next().is_none() {
            return Ok(None);
        }

        clean_stale_temp_files(&object_root)?;

        if let Some(inventory) = self.load_mutable_inventory(object_id, &object_root_rel)? {
            return Ok(Some(inventory));
        }
        self.load_root_inventory(object_id, &object_root)
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

        for (digest, logical_paths) in &version.state {
            let src = self.abs(&inventory.storage_path(digest)?);

            for logical_path in logical_paths {
                crate::path::validate_logical_path(logical_path)?;
                let destination = out_dir.join(logical_path);
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)?;
                }

                let reader = FixityCheckReader::new(
                    File::open(&src).map_err(|error| {
                        if error.kind() == io::ErrorKind::NotFound {
                            Error::CorruptObject(format!(
                                "object {}: content file {} is missing",
                                inventory.id(),
                                src.display()
                            ))
                        } else {
                            Error::Io(error)
                        }
                    })?,
                    algorithm,
                    digest,
                    logical_path,
                );
                copy_verified(reader, &destination)?;
            }
        }

        Ok(())
    }

    fn get_object_streams(
        &self,
        inventory: &Inventory,
        version_num: VersionNum,
    ) -> Result<BTreeMap<String, Box<dyn ContentRetriever>>> {
        stream_map(inventory, version_num, |digest, logical_path| {
            Ok(Box::new(FsRetriever {
                path: self.abs(&inventory.storage_path(digest)?),
                algorithm: inventory.digest_algorithm(),
                digest: digest.to_owned(),
                logical_path: logical_path.to_owned(),
            }))
        })
    }

    fn contains_object(&self, object_id: &str) -> Result<bool> {
        Ok(self
            .object_root(object_id)?
            .join(paths::INVENTORY_FILE)
            .exists())
    }

    fn purge_object(&self, object_id: &str) -> Result<()> {
        let object_root = self.object_root(object_id)?;
        info!("purging object {} at {}", object_id, object_root.display());

        if object_root.exists() {
            fs::remove_dir_all(&object_root)?;
        }

        // Clean up any now-empty layout directories between the object root
        // and the repository root.
        let mut parent = object_root.parent();
        while let Some(dir) = parent {
            if dir == self.root || !dir.exists() {
                break;
            }
            if fs::read_dir(dir)?.next().is_some() {
                break;
            }
            fs::remove_dir(dir)?;
            parent = dir.parent();
        }

        Ok(())
    }

    fn rollback_to_version(&self, inventory: &Inventory, version_num: VersionNum) -> Result<()> {
        inventory.ensure_version(version_num)?;
        let object_root = self.abs(inventory.object_root_path());
        let version_dir = object_root.join(version_num.to_string());

        info!("rolling object {} back to {}", inventory.id(), version_num);

        self.publish_root_inventory(inventory, &version_dir, &object_root)?;

        let mut num = version_num;
        while num < inventory.head() {
            num = num.next()?;
            util::safe_delete_dir(&object_root.join(num.to_string()));
        }

        // A mutable head staged on top of the removed versions is invalid.
        util::safe_delete_dir(&self.abs(&paths::mutable_head_ext_root(inventory.object_root_path())));

        Ok(())
    }

    fn commit_mutable_head(
        &self,
        old_inventory: &Inventory,
        new_inventory: &Inventory,
        staging_dir: &Path,
    ) -> Result<()> {
        let object_root = self.abs(new_inventory.object_root_path());
        let head_dir = self.abs(&paths::mutable_head_version_path(new_inventory.object_root_path()));

        if !head_dir.exists() {
            return Err(Error::ObjectOutOfSync(format!(
                "cannot commit the mutable HEAD of object {} because it does not exist",
                new_inventory.id()
            )));
        }

        self.ensure_root_unchanged(old_inventory)?;

        let version_dir = object_root.join(new_inventory.head().to_string());
        if version_dir.exists() {
            return Err(out_of_sync(new_inventory.id()));
        }

        // Move the accumulated revision content under the new version
        // directory, then publish like a regular version.
        let head_content = head_dir.join(new_inventory.content_directory());
        let version_content = version_dir.join(new_inventory.content_directory());

        let result = (|| -> Result<()> {
            fs::create_dir_all(&version_dir)?;
            if head_content.exists() {
                util::move_dir(&head_content, &version_content)?;
            }

            self.prune_unreferenced_content(
                new_inventory,
                &version_content,
                &new_inventory.head().to_string(),
            )?;

            let bytes = fs::read(staging_dir.join(paths::INVENTORY_FILE))?;
            util::atomic_write(&version_dir.join(paths::INVENTORY_FILE), &bytes)?;
            let sidecar_name = paths::sidecar_name(new_inventory.digest_algorithm());
            let sidecar_bytes = fs::read(staging_dir.join(&sidecar_name))?;
            util::atomic_write(&version_dir.join(&sidecar_name), &sidecar_bytes)?;

            self.publish_root_inventory(new_inventory, &version_dir, &object_root)
        })();

        match result {
            Ok(()) => {
                util::safe_delete_dir(&self.abs(&paths::mutable_head_ext_root(
                    new_inventory.object_root_path(),
                )));
                debug!(
                    "committed mutable HEAD of object {} as {}",
                    new_inventory.id(),
                    new_inventory.head()
                );
                Ok(())
            }
            Err(error) => {
                // Move the content back so the mutable head stays usable.
                if version_content.exists() && !head_content.exists() {
                    if let Err(restore_error) = util::move_dir(&version_content, &head_content) {
                        warn!(
                            "failed to restore the mutable HEAD of object {}: {}",
                            new_inventory.id(),
                            restore_error
                        );
                    }
                }
                util::safe_delete_dir(&version_dir);
                Err(error)
            }
        }
    }

    fn purge_mutable_head(&self, object_id: &str) -> Result<()> {
        let object_root_rel = self.layout.map_object_id(object_id)?;
        info!("purging the mutable HEAD of object {}", object_id);
        util::safe_delete_dir(&self.abs(&paths::mutable_head_ext_root(&object_root_rel)));
        Ok(())
    }

    fn object_root_path(&self, object_id: &str) -> Result<String> {
        self.layout.map_object_id(object_id)
    }

    fn export_object(&self, object_id: &str, out_dir: &Path) -> Result<()> {
        let object_root = self.object_root(object_id)?;
        if !object_root.exists() {
            return Err(Error::NotFound(format!("object {} was not found", object_id)));
        }
        util::recursive_copy(&object_root, out_dir)
    }

    fn export_version(
        &self,
        object_id: &str,
        version_num: VersionNum,
        out_dir: &Path,
    ) -> Result<()> {
        let version_dir = self.object_root(object_id)?.join(version_num.to_string());
        if !version_dir.exists() {
            return Err(Error::NotFound(format!(
                "object {} version {} was not found",
                object_id, version_num
            )));
        }
        util::recursive_copy(&version_dir, out_dir)
    }

    fn import_object(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let object_root = self.object_root(inventory.id())?;
        if object_root.exists() {
            return Err(Error::AlreadyExists(format!(
                "an object already exists with ID {}",
                inventory.id()
            )));
        }
        util::move_dir(staging_dir, &object_root)
    }

    fn list_object_ids(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + Send>> {
        let root = self.root.clone();

        let iter = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Err(error) => Some(Err(Error::Io(io::Error::from(error)))),
                Ok(entry) => {
                    let name = entry.file_name().to_string_lossy();
                    if entry.file_type().is_file() && name.starts_with("0=ocfl_object_") {
                        entry
                            .path()
                            .parent()
                            .map(|object_root| read_object_id(object_root.to_path_buf()))
                    } else {
                        None
                    }
                }
            });

        Ok(Box::new(iter))
    }

    fn close(&self) {}
}

fn read_object_id(object_root: PathBuf) -> Result<String> {
    let bytes = fs::read(object_root.join(paths::INVENTORY_FILE))?;
    let inventory = mapper::from_bytes(&bytes, &object_root.display().to_string())?;
    Ok(inventory.id().to_owned())
}

fn copy_verified(mut reader: FixityCheckReader<File>, destination: &Path) -> Result<()> {
    let mut out = File::create(destination)?;
    match io::copy(&mut reader, &mut out) {
        Ok(_) => reader.verify(),
        Err(error) => {
            // Surface a fixity failure raised at EOF as the typed error.
            drop(out);
            let _ = fs::remove_file(destination);
            match reader.verify() {
                Err(fixity) => Err(fixity),
                Ok(()) => Err(error.into()),
            }
        }
    }
}
