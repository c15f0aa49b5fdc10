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

//! Canonical (de)serialization of inventories and their sidecar files.
//!
//! Inventories serialize to UTF-8 JSON with sorted keys, 2-space indentation,
//! and a trailing newline. The form is byte-stable: serializing a parsed
//! inventory reproduces the input, which keeps sidecar digests valid.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::storage::paths;
use crate::util::atomic_write;

/// Serialize an inventory to its canonical byte form.
pub fn to_bytes(inventory: &Inventory) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(inventory).map_err(|error| {
        Error::InvalidValue(format!("failed to serialize inventory: {}", error))
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse an inventory from its serialized form.
///
/// Digest keys are normalized to lower case so that lookups are
/// case-insensitive, as OCFL requires.
///
/// # Errors
/// - `Error::CorruptObject`: The bytes are not a valid inventory.
pub fn from_bytes(bytes: &[u8], source: &str) -> Result<Inventory> {
    let mut inventory: Inventory = serde_json::from_slice(bytes).map_err(|error| {
        Error::CorruptObject(format!("invalid inventory at {}: {}", source, error))
    })?;
    normalize_digests(&mut inventory);
    Ok(inventory)
}

/// Serialize `inventory` into `dir` as `inventory.json` plus its sidecar,
/// returning the digest of the inventory file.
///
/// Files are written atomically so a crash cannot leave a truncated
/// inventory behind.
pub fn write_to_dir(inventory: &Inventory, dir: &Path) -> Result<String> {
    let bytes = to_bytes(inventory)?;
    let digest = inventory.digest_algorithm().hash_hex(&bytes);

    atomic_write(&dir.join(paths::INVENTORY_FILE), &bytes)?;
    write_sidecar(dir, inventory.digest_algorithm(), &digest)?;

    Ok(digest)
}

/// Write the sidecar file for an inventory digest into `dir`.
pub fn write_sidecar(dir: &Path, algorithm: DigestAlgorithm, digest: &str) -> Result<()> {
    let sidecar = dir.join(paths::sidecar_name(algorithm));
    let mut file = File::create(sidecar)?;
    file.write_all(sidecar_content(digest).as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// The content of a sidecar file for the given digest.
pub fn sidecar_content(digest: &str) -> String {
    format!("{}\t{}\n", digest, paths::INVENTORY_FILE)
}

/// Extract the digest from sidecar file content.
///
/// # Errors
/// - `Error::CorruptObject`: The content is not `<digest> <file>`.
pub fn parse_sidecar(content: &str, source: &str) -> Result<String> {
    let mut parts = content.split_whitespace();
    let digest = parts.next();
    let file_name = parts.next();

    match (digest, file_name) {
        (Some(digest), Some(_)) if parts.next().is_none() => Ok(digest.to_ascii_lowercase()),
        _ => Err(Error::CorruptObject(format!(
            "invalid inventory sidecar at {}",
            source
        ))),
    }
}

/// Read and parse the sidecar file at `path`.
///
/// # Errors
/// - `Error::CorruptObject`: The sidecar is missing or malformed.
pub fn read_sidecar(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            Error::CorruptObject(format!(
                "missing inventory sidecar at {}",
                path.display()
            ))
        } else {
            Error::Io(error)
        }
    })?;
    parse_sidecar(&content, &path.display().to_string())
}

fn normalize_digests(inventory: &mut Inventory) {
    let manifest = std::mem::take(inventory.manifest_mut());
    *inventory.manifest_mut() = lowercase_keys(manifest);

    // Version state and fixity maps are rebuilt through the public model to
    // keep ordering canonical.
    let mut versions = inventory.versions().clone();
    for version in versions.values_mut() {
        let state = std::mem::take(&mut version.state);
        version.state = lowercase_keys(state);
    }
    inventory.replace_versions(versions);

    let fixity = inventory
        .fixity()
        .iter()
        .map(|(algorithm, entries)| (*algorithm, lowercase_keys(entries.clone())))
        .collect();
    inventory.replace_fixity(fixity);
}

fn lowercase_keys(
    map: std::collections::BTreeMap<String, Vec<String>>,
) -> std::collections::BTreeMap<String, Vec<String>> {
    map.into_iter()
        .map(|(digest, mut paths)| {
            paths.sort();
            (digest.to_ascii_lowercase(), paths)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcflConfig;
    use crate::inventory::updater::InventoryUpdater;
    use chrono::{FixedOffset, TimeZone};

    fn sample_inventory() -> Inventory {
        let mut updater = InventoryUpdater::for_new_object(
            "urn:example:1".to_owned(),
            &OcflConfig::default(),
            "obj".to_owned(),
        );
        updater
            .add_file_with_digest("aa11".to_owned(), "a.txt", false)
            .unwrap();
        updater
            .build_new_inventory(
                FixedOffset::east_opt(0)
                    .unwrap()
                    .with_ymd_and_hms(2023, 6, 1, 12, 0, 0)
                    .unwrap(),
                Some("initial".to_owned()),
                None,
            )
            .unwrap()
    }

    #[test]
    fn serialization_is_byte_stable() -> anyhow::Result<()> {
        let inventory = sample_inventory();
        let bytes = to_bytes(&inventory)?;
        let reparsed = from_bytes(&bytes, "test")?;
        assert_eq!(to_bytes(&reparsed)?, bytes);
        Ok(())
    }

    #[test]
    fn serialized_form_has_sorted_keys_and_trailing_newline() -> anyhow::Result<()> {
        let bytes = to_bytes(&sample_inventory())?;
        let text = String::from_utf8(bytes)?;

        assert!(text.ends_with('\n'));
        let digest_index = text.find("\"digestAlgorithm\"").unwrap();
        let head_index = text.find("\"head\"").unwrap();
        let id_index = text.find("\"id\"").unwrap();
        let manifest_index = text.find("\"manifest\"").unwrap();
        let type_index = text.find("\"type\"").unwrap();
        assert!(digest_index < head_index);
        assert!(head_index < id_index);
        assert!(id_index < manifest_index);
        assert!(manifest_index < type_index);
        Ok(())
    }

    #[test]
    fn mixed_case_digests_are_normalized_on_parse() -> anyhow::Result<()> {
        let inventory = sample_inventory();
        let text = String::from_utf8(to_bytes(&inventory)?)?.replace("aa11", "AA11");
        let parsed = from_bytes(text.as_bytes(), "test")?;
        assert!(parsed.contains_digest("aa11"));
        Ok(())
    }

    #[test]
    fn sidecar_round_trip() -> anyhow::Result<()> {
        let content = sidecar_content("abc123");
        assert_eq!(content, "abc123\tinventory.json\n");
        assert_eq!(parse_sidecar(&content, "test")?, "abc123");
        Ok(())
    }

    #[test]
    fn malformed_sidecar_is_corrupt() {
        assert!(matches!(
            parse_sidecar("just-a-digest", "test"),
            Err(Error::CorruptObject(_))
        ));
        assert!(matches!(
            parse_sidecar("a b c", "test"),
            Err(Error::CorruptObject(_))
        ));
    }

    #[test]
    fn write_to_dir_produces_matching_sidecar() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let inventory = sample_inventory();
        let digest = write_to_dir(&inventory, dir.path())?;

        let bytes = std::fs::read(dir.path().join("inventory.json"))?;
        assert_eq!(inventory.digest_algorithm().hash_hex(&bytes), digest);

        let sidecar = read_sidecar(&dir.path().join("inventory.json.sha512"))?;
        assert_eq!(sidecar, digest);
        Ok(())
    }
}
