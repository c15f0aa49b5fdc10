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

//! Shallow (internal-consistency) validation of inventories.
//!
//! Shallow validation runs on every inventory parsed from storage and on
//! every inventory the updater builds, so nothing structurally invalid is
//! ever observed or persisted. Deep validation, which verifies content
//! against the storage layer, lives in [`crate::validate`].

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::inventory::{Inventory, VersionNum};
use crate::path::validate_content_path;
use crate::storage::paths;

/// Validate the internal consistency of an inventory.
///
/// # Errors
/// - `Error::CorruptObject`: An invariant is violated.
pub fn validate_shallow(inventory: &Inventory) -> Result<()> {
    validate_algorithm(inventory)?;
    validate_version_sequence(inventory)?;
    validate_manifest(inventory)?;
    validate_states(inventory)?;
    Ok(())
}

/// Check that `import` is a legal successor of `existing`: same identity and
/// settings, and every existing version carried over unchanged (the manifest
/// and versions are append-only).
///
/// # Errors
/// - `Error::State`: The inventories are incompatible.
pub fn validate_compatible(existing: &Inventory, import: &Inventory) -> Result<()> {
    if existing.id() != import.id() {
        return Err(Error::State(format!(
            "inventory id {} does not match existing id {}",
            import.id(),
            existing.id()
        )));
    }
    if existing.digest_algorithm() != import.digest_algorithm() {
        return Err(Error::State(format!(
            "object {}: digest algorithm cannot change from {} to {}",
            existing.id(),
            existing.digest_algorithm(),
            import.digest_algorithm()
        )));
    }
    if existing.content_directory() != import.content_directory() {
        return Err(Error::State(format!(
            "object {}: content directory cannot change from {} to {}",
            existing.id(),
            existing.content_directory(),
            import.content_directory()
        )));
    }

    for (num, version) in existing.versions() {
        match import.version(*num) {
            Some(imported) if imported.state == version.state => {}
            _ => {
                return Err(Error::State(format!(
                    "object {}: version {} differs from the existing version; \
                     versions are append-only",
                    existing.id(),
                    num
                )))
            }
        }
    }

    for digest in existing.manifest().keys() {
        if !import.contains_digest(digest) {
            return Err(Error::State(format!(
                "object {}: manifest entry {} is missing; the manifest is append-only",
                existing.id(),
                digest
            )));
        }
    }

    Ok(())
}

fn validate_algorithm(inventory: &Inventory) -> Result<()> {
    if !inventory.digest_algorithm().supports_content_addressing() {
        return Err(Error::CorruptObject(format!(
            "object {}: {} is not a valid inventory digest algorithm",
            inventory.id(),
            inventory.digest_algorithm()
        )));
    }
    inventory.spec_version().map_err(|_| {
        Error::CorruptObject(format!(
            "object {}: unknown inventory type {}",
            inventory.id(),
            inventory.type_declaration()
        ))
    })?;
    Ok(())
}

fn validate_version_sequence(inventory: &Inventory) -> Result<()> {
    let head = inventory.head();

    if inventory.versions().is_empty() {
        return Err(Error::CorruptObject(format!(
            "object {}: inventory contains no versions",
            inventory.id()
        )));
    }

    let mut expected = 1u64;
    for num in inventory.versions().keys() {
        if num.num() != expected {
            return Err(Error::CorruptObject(format!(
                "object {}: version sequence has a gap at v{}",
                inventory.id(),
                expected
            )));
        }
        if num.width() != head.width() {
            return Err(Error::CorruptObject(format!(
                "object {}: version {} does not use the object's zero-padding width",
                inventory.id(),
                num
            )));
        }
        expected += 1;
    }

    if expected != head.num() + 1 {
        return Err(Error::CorruptObject(format!(
            "object {}: head is {} but the highest version is v{}",
            inventory.id(),
            head,
            expected - 1
        )));
    }

    Ok(())
}

fn validate_manifest(inventory: &Inventory) -> Result<()> {
    let mutable_prefix = format!(
        "{}/{}/",
        paths::mutable_head_version_path(""),
        inventory.content_directory()
    );

    for (digest, content_paths) in inventory.manifest() {
        if content_paths.is_empty() {
            return Err(Error::CorruptObject(format!(
                "object {}: manifest entry {} has no content paths",
                inventory.id(),
                digest
            )));
        }
        if !is_lowercase_hex(digest) {
            return Err(Error::CorruptObject(format!(
                "object {}: manifest digest {} is not a hex digest",
                inventory.id(),
                digest
            )));
        }

        for content_path in content_paths {
            validate_content_path(content_path).map_err(|_| {
                Error::CorruptObject(format!(
                    "object {}: invalid content path {}",
                    inventory.id(),
                    content_path
                ))
            })?;

            if inventory.has_mutable_head() && content_path.starts_with(&mutable_prefix) {
                continue;
            }

            let valid = content_path_version(content_path, inventory)
                .map(|num| inventory.version(num).is_some())
                .unwrap_or(false);
            if !valid {
                return Err(Error::CorruptObject(format!(
                    "object {}: content path {} is not inside a known version's content directory",
                    inventory.id(),
                    content_path
                )));
            }
        }
    }

    Ok(())
}

fn validate_states(inventory: &Inventory) -> Result<()> {
    for (num, version) in inventory.versions() {
        let mut seen = HashSet::new();

        for (digest, logical_paths) in &version.state {
            if !inventory.contains_digest(digest) {
                return Err(Error::CorruptObject(format!(
                    "object {}: version {} references digest {} which is not in the manifest",
                    inventory.id(),
                    num,
                    digest
                )));
            }

            for logical_path in logical_paths {
                crate::path::validate_logical_path(logical_path).map_err(|_| {
                    Error::CorruptObject(format!(
                        "object {}: version {} contains invalid logical path {}",
                        inventory.id(),
                        num,
                        logical_path
                    ))
                })?;
                if !seen.insert(logical_path.as_str()) {
                    return Err(Error::CorruptObject(format!(
                        "object {}: version {} binds logical path {} more than once",
                        inventory.id(),
                        num,
                        logical_path
                    )));
                }
            }
        }
    }

    Ok(())
}

/// The version a well-formed content path belongs to: the first segment must
/// be a version number and the second the content directory.
fn content_path_version(content_path: &str, inventory: &Inventory) -> Option<VersionNum> {
    let mut segments = content_path.split('/');
    let version: VersionNum = segments.next()?.parse().ok()?;
    let content_dir = segments.next()?;

    if content_dir == inventory.content_directory() && segments.next().is_some() {
        Some(version)
    } else {
        None
    }
}

fn is_lowercase_hex(digest: &str) -> bool {
    !digest.is_empty()
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcflConfig;
    use crate::inventory::updater::InventoryUpdater;
    use chrono::{DateTime, FixedOffset, TimeZone};

    fn fixed_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2023, 6, 1, 12, 0, 0)
            .unwrap()
    }

    fn sample_inventory() -> Inventory {
        let mut updater = InventoryUpdater::for_new_object(
            "urn:example:1".to_owned(),
            &OcflConfig::default(),
            "obj".to_owned(),
        );
        updater
            .add_file_with_digest("aa11".to_owned(), "a.txt", false)
            .unwrap();
        updater.build_new_inventory(fixed_time(), None, None).unwrap()
    }

    #[test]
    fn valid_inventory_passes() {
        assert!(validate_shallow(&sample_inventory()).is_ok());
    }

    #[test]
    fn dangling_state_digest_is_detected() {
        let mut inventory = sample_inventory();
        inventory.manifest_mut().remove("aa11");
        assert!(matches!(
            validate_shallow(&inventory),
            Err(Error::CorruptObject(_))
        ));
    }

    #[test]
    fn content_path_outside_version_is_detected() {
        let mut inventory = sample_inventory();
        inventory
            .manifest_mut()
            .insert("bb22".to_owned(), vec!["v9/content/x".to_owned()]);
        assert!(matches!(
            validate_shallow(&inventory),
            Err(Error::CorruptObject(_))
        ));
    }

    #[test]
    fn content_path_outside_content_directory_is_detected() {
        let mut inventory = sample_inventory();
        inventory
            .manifest_mut()
            .insert("bb22".to_owned(), vec!["v1/other/x".to_owned()]);
        assert!(matches!(
            validate_shallow(&inventory),
            Err(Error::CorruptObject(_))
        ));
    }

    #[test]
    fn compatible_successor_is_accepted() -> anyhow::Result<()> {
        let v1 = sample_inventory();
        let mut updater = InventoryUpdater::copy_state(&v1)?;
        updater.add_file_with_digest("bb22".to_owned(), "b.txt", false)?;
        let v2 = updater.build_new_inventory(fixed_time(), None, None)?;

        validate_compatible(&v1, &v2)?;
        Ok(())
    }

    #[test]
    fn rewriting_history_is_rejected() -> anyhow::Result<()> {
        let v1 = sample_inventory();
        let mut updater = InventoryUpdater::copy_state(&v1)?;
        updater.add_file_with_digest("bb22".to_owned(), "b.txt", false)?;
        let v2 = updater.build_new_inventory(fixed_time(), None, None)?;

        assert!(matches!(validate_compatible(&v2, &v1), Err(Error::State(_))));
        Ok(())
    }
}
