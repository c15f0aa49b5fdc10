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

//! Response DTOs returned by the repository facade, and the mapping from
//! inventories to them. The DTOs are plain data: they borrow nothing from
//! the inventory, so callers can hold them after the repository moves on.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::inventory::{Inventory, User, VersionNum};

/// Caller-supplied metadata for a new version.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct VersionInfo {
    /// Who is creating the version.
    pub user: Option<User>,

    /// Free-text commit message.
    pub message: Option<String>,

    /// An explicit creation timestamp; defaults to the repository clock.
    pub created: Option<DateTime<FixedOffset>>,
}

impl VersionInfo {
    /// A `VersionInfo` with the given user name, address, and message.
    pub fn new(name: &str, address: Option<&str>, message: &str) -> Self {
        Self {
            user: Some(User {
                name: name.to_owned(),
                address: address.map(str::to_owned),
            }),
            message: Some(message.to_owned()),
            created: None,
        }
    }
}

/// One file within a version.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FileDetails {
    /// The caller-visible path within the version.
    pub logical_path: String,

    /// The content path relative to the object root.
    pub storage_relative_path: String,

    /// The file's digests: the inventory algorithm plus any fixity values.
    pub digests: BTreeMap<DigestAlgorithm, String>,
}

/// Metadata about one version of an object.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct VersionDetails {
    pub object_id: String,
    pub version_num: VersionNum,
    pub created: DateTime<FixedOffset>,
    pub message: Option<String>,
    pub user: Option<User>,
    pub files: Vec<FileDetails>,
}

/// Metadata about an object and all of its versions.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectDetails {
    pub id: String,
    pub head: VersionNum,
    pub digest_algorithm: DigestAlgorithm,
    pub versions: BTreeMap<VersionNum, VersionDetails>,
}

impl ObjectDetails {
    /// The details of the HEAD version.
    pub fn head_version(&self) -> &VersionDetails {
        self.versions
            .get(&self.head)
            .expect("object details must contain the head version")
    }
}

/// How a logical path changed in a version.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DiffType {
    /// The path was added or its content changed.
    Update,

    /// The path was removed.
    Remove,
}

/// One entry in a file's change history.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FileChange {
    pub diff_type: DiffType,
    pub version_num: VersionNum,
    pub created: DateTime<FixedOffset>,
    pub message: Option<String>,
    pub user: Option<User>,

    /// The content path backing the update; `None` for removals.
    pub storage_relative_path: Option<String>,

    /// Digests of the updated content; empty for removals.
    pub digests: BTreeMap<DigestAlgorithm, String>,
}

/// The ordered list of versions in which a logical path changed.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FileChangeHistory {
    pub object_id: String,
    pub logical_path: String,
    pub changes: Vec<FileChange>,
}

pub(crate) fn map_object_details(inventory: &Inventory) -> ObjectDetails {
    let versions = inventory
        .versions()
        .keys()
        .map(|num| (*num, map_version_details(inventory, *num)))
        .collect();

    ObjectDetails {
        id: inventory.id().to_owned(),
        head: inventory.head(),
        digest_algorithm: inventory.digest_algorithm(),
        versions,
    }
}

pub(crate) fn map_version_details(inventory: &Inventory, num: VersionNum) -> VersionDetails {
    let version = inventory
        .version(num)
        .expect("version presence is checked before mapping");

    let mut files = Vec::new();
    for (digest, logical_paths) in &version.state {
        for logical_path in logical_paths {
            files.push(FileDetails {
                logical_path: logical_path.clone(),
                storage_relative_path: inventory
                    .content_path(digest)
                    .unwrap_or_default()
                    .to_owned(),
                digests: file_digests(inventory, digest),
            });
        }
    }
    files.sort_by(|a, b| a.logical_path.cmp(&b.logical_path));

    VersionDetails {
        object_id: inventory.id().to_owned(),
        version_num: num,
        created: version.created,
        message: version.message.clone(),
        user: version.user.clone(),
        files,
    }
}

pub(crate) fn file_change_history(
    inventory: &Inventory,
    logical_path: &str,
) -> Result<FileChangeHistory> {
    let mut changes = Vec::new();
    let mut last_digest: Option<String> = None;

    for (num, version) in inventory.versions() {
        let digest = version.digest_for_logical_path(logical_path);

        match (digest, last_digest.as_deref()) {
            (Some(digest), last) if last != Some(digest) => {
                changes.push(FileChange {
                    diff_type: DiffType::Update,
                    version_num: *num,
                    created: version.created,
                    message: version.message.clone(),
                    user: version.user.clone(),
                    storage_relative_path: inventory.content_path(digest).map(str::to_owned),
                    digests: file_digests(inventory, digest),
                });
                last_digest = Some(digest.to_owned());
            }
            (None, Some(_)) => {
                changes.push(FileChange {
                    diff_type: DiffType::Remove,
                    version_num: *num,
                    created: version.created,
                    message: version.message.clone(),
                    user: version.user.clone(),
                    storage_relative_path: None,
                    digests: BTreeMap::new(),
                });
                last_digest = None;
            }
            _ => {}
        }
    }

    if changes.is_empty() {
        return Err(Error::NotFound(format!(
            "the logical path {} was not found in object {}",
            logical_path,
            inventory.id()
        )));
    }

    Ok(FileChangeHistory {
        object_id: inventory.id().to_owned(),
        logical_path: logical_path.to_owned(),
        changes,
    })
}

fn file_digests(inventory: &Inventory, digest: &str) -> BTreeMap<DigestAlgorithm, String> {
    let mut digests = BTreeMap::new();
    digests.insert(inventory.digest_algorithm(), digest.to_owned());

    if let Some(content_path) = inventory.content_path(digest) {
        for (algorithm, value) in inventory.fixity_for_content_path(content_path) {
            digests.insert(algorithm, value.to_owned());
        }
    }

    digests
}
