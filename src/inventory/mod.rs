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

//! The in-memory representation of an object's complete history.
//!
//! An [`Inventory`] is the authoritative description of one object: its
//! content-addressed manifest, its fixity block, and the logical state of
//! every version. Inventories are loaded from storage, mutated only through
//! [`InventoryUpdater`], serialized canonically by [`mapper`], and replaced
//! atomically by the storage engines.

pub mod mapper;
pub mod updater;
pub mod validate;
mod version_num;

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::config::{SpecVersion, DEFAULT_CONTENT_DIRECTORY};
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};

pub use updater::{AddFileResult, ContentPathMapper, HashedPathMapper, IdentityPathMapper, InventoryUpdater};
pub use version_num::{RevisionNum, VersionNum};

/// The user attributed to a version.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct User {
    /// Display name.
    pub name: String,

    /// A URI identifying the user, typically a `mailto:` address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One version of an object: who created it, when, and the mapping from
/// content digest to the logical paths bound to that content.
///
/// Fields are declared in their serialized (sorted-key) order.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Version {
    /// When the version was created.
    pub created: DateTime<FixedOffset>,

    /// Free-text commit message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Content digest → sorted set of logical paths.
    pub state: BTreeMap<String, Vec<String>>,

    /// Who created the version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl Version {
    /// The digest bound to `logical_path`, if the path exists in this version.
    pub fn digest_for_logical_path(&self, logical_path: &str) -> Option<&str> {
        self.state.iter().find_map(|(digest, paths)| {
            if paths.iter().any(|path| path == logical_path) {
                Some(digest.as_str())
            } else {
                None
            }
        })
    }

    /// An iterator over every logical path in this version.
    pub fn logical_paths(&self) -> impl Iterator<Item = &str> {
        self.state.values().flatten().map(String::as_str)
    }

    /// The logical path → digest view of the state.
    pub fn state_by_path(&self) -> BTreeMap<&str, &str> {
        let mut by_path = BTreeMap::new();
        for (digest, paths) in &self.state {
            for path in paths {
                by_path.insert(path.as_str(), digest.as_str());
            }
        }
        by_path
    }
}

/// The authoritative description of one object.
///
/// Serialized fields are declared in sorted-key order so the canonical JSON
/// form is byte-stable. The `#[serde(skip)]` fields are transient bookkeeping
/// populated by the storage layer.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Inventory {
    /// The content directory name, when it differs from `content`.
    #[serde(rename = "contentDirectory", skip_serializing_if = "Option::is_none")]
    content_directory: Option<String>,

    /// The primary digest algorithm. Fixed at object creation.
    #[serde(rename = "digestAlgorithm")]
    digest_algorithm: DigestAlgorithm,

    /// Alternate-algorithm digests: algorithm → digest → content paths.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    fixity: BTreeMap<DigestAlgorithm, BTreeMap<String, Vec<String>>>,

    /// The highest version number assigned.
    head: VersionNum,

    /// The object's identifier.
    id: String,

    /// Content digest → content paths, covering every blob ever committed.
    manifest: BTreeMap<String, Vec<String>>,

    /// The OCFL spec version URI.
    #[serde(rename = "type")]
    type_declaration: String,

    /// Version number → version.
    versions: BTreeMap<VersionNum, Version>,

    /// Where the object lives, relative to the repository root.
    #[serde(skip)]
    object_root_path: String,

    /// The digest of this inventory's serialized form at its most recent
    /// on-disk state.
    #[serde(skip)]
    current_digest: Option<String>,

    /// The digest of the previous on-disk inventory, used for CAS-style
    /// publishes.
    #[serde(skip)]
    previous_digest: Option<String>,

    /// The active mutable-head revision, when this inventory was loaded from
    /// or is destined for the mutable-head extension.
    #[serde(skip)]
    revision_num: Option<RevisionNum>,
}

impl Inventory {
    /// Assemble an inventory from parts. Used by the updater; external callers
    /// obtain inventories from storage or [`mapper`].
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        spec_version: SpecVersion,
        digest_algorithm: DigestAlgorithm,
        head: VersionNum,
        content_directory: Option<String>,
        manifest: BTreeMap<String, Vec<String>>,
        fixity: BTreeMap<DigestAlgorithm, BTreeMap<String, Vec<String>>>,
        versions: BTreeMap<VersionNum, Version>,
    ) -> Self {
        Self {
            content_directory,
            digest_algorithm,
            fixity,
            head,
            id,
            manifest,
            type_declaration: spec_version.inventory_type().to_owned(),
            versions,
            object_root_path: String::new(),
            current_digest: None,
            previous_digest: None,
            revision_num: None,
        }
    }

    /// The object's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The inventory `type` URI.
    pub fn type_declaration(&self) -> &str {
        &self.type_declaration
    }

    /// The spec version parsed from the `type` URI.
    pub fn spec_version(&self) -> Result<SpecVersion> {
        SpecVersion::from_inventory_type(&self.type_declaration)
    }

    /// The primary digest algorithm.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    /// The highest version number assigned.
    pub fn head(&self) -> VersionNum {
        self.head
    }

    /// The content directory name, defaulting to `content`.
    pub fn content_directory(&self) -> &str {
        self.content_directory
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_DIRECTORY)
    }

    /// The manifest: content digest → content paths.
    pub fn manifest(&self) -> &BTreeMap<String, Vec<String>> {
        &self.manifest
    }

    /// The fixity block: algorithm → digest → content paths.
    pub fn fixity(&self) -> &BTreeMap<DigestAlgorithm, BTreeMap<String, Vec<String>>> {
        &self.fixity
    }

    /// All versions, ordered by version number.
    pub fn versions(&self) -> &BTreeMap<VersionNum, Version> {
        &self.versions
    }

    /// The version with the given number, if it exists.
    pub fn version(&self, num: VersionNum) -> Option<&Version> {
        self.versions.get(&num)
    }

    /// The version with the given number.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no such version.
    pub fn ensure_version(&self, num: VersionNum) -> Result<&Version> {
        self.version(num).ok_or_else(|| {
            Error::NotFound(format!("object {} version {} was not found", self.id, num))
        })
    }

    /// The HEAD version.
    pub fn head_version(&self) -> &Version {
        self.versions
            .get(&self.head)
            .expect("inventory must contain its head version")
    }

    /// Whether this inventory describes an active mutable head.
    pub fn has_mutable_head(&self) -> bool {
        self.revision_num.is_some()
    }

    /// The active mutable-head revision, if any.
    pub fn revision_num(&self) -> Option<RevisionNum> {
        self.revision_num
    }

    /// The object root, relative to the repository root.
    pub fn object_root_path(&self) -> &str {
        &self.object_root_path
    }

    /// The digest of the inventory file at its most recent on-disk state.
    pub fn current_digest(&self) -> Option<&str> {
        self.current_digest.as_deref()
    }

    /// The digest of the previous on-disk inventory.
    pub fn previous_digest(&self) -> Option<&str> {
        self.previous_digest.as_deref()
    }

    pub(crate) fn set_object_root_path(&mut self, path: String) {
        self.object_root_path = path;
    }

    pub(crate) fn set_current_digest(&mut self, digest: Option<String>) {
        self.current_digest = digest;
    }

    pub(crate) fn set_previous_digest(&mut self, digest: Option<String>) {
        self.previous_digest = digest;
    }

    pub(crate) fn set_revision_num(&mut self, revision: Option<RevisionNum>) {
        self.revision_num = revision;
    }

    pub(crate) fn manifest_mut(&mut self) -> &mut BTreeMap<String, Vec<String>> {
        &mut self.manifest
    }

    pub(crate) fn replace_versions(&mut self, versions: BTreeMap<VersionNum, Version>) {
        self.versions = versions;
    }

    pub(crate) fn replace_fixity(
        &mut self,
        fixity: BTreeMap<DigestAlgorithm, BTreeMap<String, Vec<String>>>,
    ) {
        self.fixity = fixity;
    }

    /// Whether the manifest contains `digest`.
    pub fn contains_digest(&self, digest: &str) -> bool {
        self.manifest.contains_key(digest)
    }

    /// The content paths storing the blob with `digest`.
    pub fn content_paths(&self, digest: &str) -> Option<&Vec<String>> {
        self.manifest.get(digest)
    }

    /// The content path to read the blob with `digest` from.
    ///
    /// When a digest maps to several content paths, the path from the
    /// earliest version that contained the digest wins, breaking remaining
    /// ties lexicographically. The choice is deterministic so reads and
    /// validation always agree.
    pub fn content_path(&self, digest: &str) -> Option<&str> {
        self.manifest
            .get(digest)?
            .iter()
            .min_by_key(|path| (content_path_version(path), path.as_str()))
            .map(String::as_str)
    }

    /// The content path for `digest`, or `CorruptObject` when the manifest
    /// has no entry for it.
    pub fn ensure_content_path(&self, digest: &str) -> Result<&str> {
        self.content_path(digest).ok_or_else(|| {
            Error::CorruptObject(format!(
                "object {} manifest has no content path for digest {}",
                self.id, digest
            ))
        })
    }

    /// The repository-relative storage path of the blob with `digest`.
    pub fn storage_path(&self, digest: &str) -> Result<String> {
        let content_path = self.ensure_content_path(digest)?;
        Ok(crate::path::join(&[&self.object_root_path, content_path]))
    }

    /// The digest of the blob stored at `content_path`, if any.
    pub fn digest_for_content_path(&self, content_path: &str) -> Option<&str> {
        self.manifest.iter().find_map(|(digest, paths)| {
            if paths.iter().any(|path| path == content_path) {
                Some(digest.as_str())
            } else {
                None
            }
        })
    }

    /// The fixity digests recorded for `content_path`, keyed by algorithm.
    pub fn fixity_for_content_path(&self, content_path: &str) -> BTreeMap<DigestAlgorithm, &str> {
        let mut digests = BTreeMap::new();
        for (algorithm, entries) in &self.fixity {
            for (digest, paths) in entries {
                if paths.iter().any(|path| path == content_path) {
                    digests.insert(*algorithm, digest.as_str());
                }
            }
        }
        digests
    }

    /// The next version number after HEAD.
    pub fn next_version_num(&self) -> Result<VersionNum> {
        self.head.next()
    }

    /// Whether HEAD is the object's first version.
    pub fn is_first_version(&self) -> bool {
        self.versions.len() == 1
    }
}

/// The version a content path belongs to, for read tie-breaking. Mutable-head
/// paths sort after every immutable version.
fn content_path_version(path: &str) -> u64 {
    match path.split('/').next().and_then(|segment| segment.parse::<VersionNum>().ok()) {
        Some(num) => num.num(),
        None => u64::MAX,
    }
}
