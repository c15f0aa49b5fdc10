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

//! Deep, offline verification of an object tree against its inventory.
//!
//! Where shallow validation ([`crate::inventory::validate`]) checks an
//! inventory's internal consistency, the functions here open the files: every
//! manifest entry must exist with the declared digest, recorded fixity values
//! must hold, and no unreferenced files may hide in content directories.
//! Import runs these checks before anything is published; they also back
//! fsck-style repository audits.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::inventory::{mapper, validate as shallow, Inventory};
use crate::storage::paths;
use crate::util;

/// Validate a complete object tree rooted at `object_root`.
///
/// Checks the object NAMASTE, the root inventory and sidecar, per-version
/// inventories, and the digest of every content file.
///
/// # Errors
/// - `Error::CorruptObject`: The tree's structure contradicts its inventory.
/// - `Error::FixityCheck`: A content file's digest does not match.
pub fn validate_object(object_root: &Path) -> Result<Inventory> {
    let namaste_present = std::fs::read_dir(object_root)?.any(|entry| {
        entry
            .map(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("0=ocfl_object_")
            })
            .unwrap_or(false)
    });
    if !namaste_present {
        return Err(Error::CorruptObject(format!(
            "{} is missing its object NAMASTE file",
            object_root.display()
        )));
    }

    let inventory = read_and_verify_inventory(object_root)?;

    if inventory.has_mutable_head() {
        return Err(Error::State(format!(
            "object {} has an active mutable HEAD and cannot be validated as a complete object",
            inventory.id()
        )));
    }

    // Every version directory must exist, and any inventory it carries must
    // pass its own sidecar check.
    for num in inventory.versions().keys() {
        let version_dir = object_root.join(num.to_string());
        if !version_dir.is_dir() {
            return Err(Error::CorruptObject(format!(
                "object {}: version directory {} is missing",
                inventory.id(),
                num
            )));
        }
        if version_dir.join(paths::INVENTORY_FILE).exists() {
            read_and_verify_inventory(&version_dir)?;
        }
    }

    validate_content(object_root, &inventory, None)?;
    debug!("object {} validated", inventory.id());
    Ok(inventory)
}

/// Validate one exported/staged version directory against `inventory`.
///
/// Only content belonging to `inventory.head()` is expected on disk; earlier
/// versions live in the repository, not in the staged tree.
pub fn validate_version(version_dir: &Path, inventory: &Inventory) -> Result<()> {
    shallow::validate_shallow(inventory)?;
    validate_content(version_dir, inventory, Some(inventory.head().to_string()))
}

/// Read `inventory.json` from `dir` and verify it against its sidecar.
fn read_and_verify_inventory(dir: &Path) -> Result<Inventory> {
    let inventory_path = dir.join(paths::INVENTORY_FILE);
    let bytes = std::fs::read(&inventory_path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            Error::CorruptObject(format!("missing inventory at {}", inventory_path.display()))
        } else {
            Error::Io(error)
        }
    })?;

    let mut inventory = mapper::from_bytes(&bytes, &inventory_path.display().to_string())?;
    let algorithm = inventory.digest_algorithm();
    let sidecar_digest = mapper::read_sidecar(&dir.join(paths::sidecar_name(algorithm)))?;

    let actual = algorithm.hash_hex(&bytes);
    if !actual.eq_ignore_ascii_case(&sidecar_digest) {
        return Err(Error::CorruptObject(format!(
            "inventory at {} does not match its sidecar: expected digest {}; found {}",
            inventory_path.display(),
            sidecar_digest,
            actual
        )));
    }

    inventory.set_current_digest(Some(actual));
    shallow::validate_shallow(&inventory)?;
    Ok(inventory)
}

/// Verify manifest entries (and fixity values) against files on disk, and
/// flag unreferenced files inside content directories.
///
/// When `version_prefix` is given, only content paths under it are expected,
/// and they are resolved relative to `root` with the prefix stripped.
fn validate_content(root: &Path, inventory: &Inventory, version_prefix: Option<String>) -> Result<()> {
    let algorithm = inventory.digest_algorithm();

    for (digest, content_paths) in inventory.manifest() {
        for content_path in content_paths {
            let relative = match &version_prefix {
                None => Some(content_path.as_str()),
                Some(prefix) => content_path
                    .strip_prefix(&format!("{}/", prefix)),
            };
            let relative = match relative {
                Some(relative) => relative,
                // Content stored in an earlier version; not part of this tree.
                None => continue,
            };

            let file = root.join(relative);
            if !file.is_file() {
                return Err(Error::CorruptObject(format!(
                    "object {}: content file {} is missing",
                    inventory.id(),
                    content_path
                )));
            }

            let actual = algorithm.hash_file(&file)?;
            if actual != *digest {
                return Err(Error::FixityCheck {
                    algorithm,
                    expected: digest.clone(),
                    actual,
                    path: content_path.clone(),
                });
            }

            for (fixity_algorithm, expected) in inventory.fixity_for_content_path(content_path) {
                let actual = fixity_algorithm.hash_file(&file)?;
                if actual != expected {
                    return Err(Error::FixityCheck {
                        algorithm: fixity_algorithm,
                        expected: expected.to_owned(),
                        actual,
                        path: content_path.clone(),
                    });
                }
            }
        }
    }

    // Hunt for files in content directories the manifest does not account
    // for.
    for num in inventory.versions().keys() {
        let (content_dir, path_prefix) = match &version_prefix {
            None => (
                root.join(num.to_string()).join(inventory.content_directory()),
                format!("{}/{}", num, inventory.content_directory()),
            ),
            Some(prefix) => {
                if num.to_string() != *prefix {
                    continue;
                }
                (
                    root.join(inventory.content_directory()),
                    format!("{}/{}", prefix, inventory.content_directory()),
                )
            }
        };

        if !content_dir.exists() {
            continue;
        }

        for file in util::list_files(&content_dir)? {
            let content_path = format!("{}/{}", path_prefix, file);
            if inventory.digest_for_content_path(&content_path).is_none() {
                return Err(Error::CorruptObject(format!(
                    "object {}: file {} is not referenced by the manifest",
                    inventory.id(),
                    content_path
                )));
            }
        }
    }

    Ok(())
}

