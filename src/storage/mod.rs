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

//! The storage engine contract and its two implementations.
//!
//! An [`OcflStorage`] turns staged version directories into durable OCFL
//! structure. [`FsStorage`] relies on same-filesystem directory renames for
//! atomicity; [`CloudStorage`] layers write-then-swap-root with explicit
//! rollback over a [`crate::cloud::CloudClient`], since object stores have no
//! multi-key transactions. The repository facade treats both identically.

mod cloud;
mod fs;
pub(crate) mod paths;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

use static_assertions::assert_obj_safe;

use crate::digest::{DigestAlgorithm, FixityCheckReader};
use crate::error::{Error, Result};
use crate::inventory::{mapper, Inventory, VersionNum};

pub use cloud::CloudStorage;
pub use fs::FsStorage;

/// How long to wait before retrying an inventory whose sidecar digest does
/// not match, to ride out the root-swap window of a concurrent commit.
const SIDECAR_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A content stream whose bytes are verified against the manifest digest at
/// EOF.
pub type ContentStream = FixityCheckReader<Box<dyn Read + Send>>;

/// Opens the content behind one logical path on demand.
pub trait ContentRetriever: Send + Sync {
    /// Open the content for reading. The stream checks fixity at EOF.
    fn open(&self) -> Result<ContentStream>;

    /// The content digest the stream is verified against.
    fn digest(&self) -> &str;

    /// The digest algorithm of [`ContentRetriever::digest`].
    fn digest_algorithm(&self) -> DigestAlgorithm;
}

/// The contract between the repository facade and a storage backend.
///
/// Implementations are safe for concurrent use; mutating operations assume
/// the caller holds the object's write lock.
pub trait OcflStorage: Send + Sync + Debug {
    /// Load an object's inventory, or `None` when the object does not exist.
    ///
    /// When the object has an active mutable head, the mutable-head inventory
    /// is returned with its revision number populated.
    fn load_inventory(&self, object_id: &str) -> Result<Option<Inventory>>;

    /// Publish the staged version described by `inventory`.
    ///
    /// `staging_dir` holds the version's content directory plus the
    /// serialized inventory and sidecar. On success the new version is
    /// visible to readers; on failure all partial writes have been cleaned
    /// up and the previous HEAD is untouched.
    fn store_new_version(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()>;

    /// Materialize a version's logical state under `out_dir`, verifying
    /// fixity of every file.
    fn reconstruct_object_version(
        &self,
        inventory: &Inventory,
        version_num: VersionNum,
        out_dir: &Path,
    ) -> Result<()>;

    /// Lazy readers for every logical path in a version.
    fn get_object_streams(
        &self,
        inventory: &Inventory,
        version_num: VersionNum,
    ) -> Result<BTreeMap<String, Box<dyn ContentRetriever>>>;

    /// Whether an object with the given ID exists.
    fn contains_object(&self, object_id: &str) -> Result<bool>;

    /// Remove every trace of the object. Irreversible.
    fn purge_object(&self, object_id: &str) -> Result<()>;

    /// Restore the root inventory to `version_num`'s and delete all later
    /// versions.
    fn rollback_to_version(&self, inventory: &Inventory, version_num: VersionNum) -> Result<()>;

    /// Promote the accumulated mutable head to the immutable version
    /// described by `new_inventory`.
    fn commit_mutable_head(
        &self,
        old_inventory: &Inventory,
        new_inventory: &Inventory,
        staging_dir: &Path,
    ) -> Result<()>;

    /// Discard the object's mutable head, if any.
    fn purge_mutable_head(&self, object_id: &str) -> Result<()>;

    /// The object's root path relative to the repository root.
    fn object_root_path(&self, object_id: &str) -> Result<String>;

    /// Copy the object's raw OCFL tree to `out_dir`.
    fn export_object(&self, object_id: &str, out_dir: &Path) -> Result<()>;

    /// Copy one version directory of the raw OCFL tree to `out_dir`.
    fn export_version(
        &self,
        object_id: &str,
        version_num: VersionNum,
        out_dir: &Path,
    ) -> Result<()>;

    /// Install a complete, validated object tree from `staging_dir`.
    fn import_object(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()>;

    /// A lazy sequence of every object ID in the repository.
    fn list_object_ids(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + Send>>;

    /// Release any resources held by the engine.
    fn close(&self);
}

assert_obj_safe!(OcflStorage);

/// Parse inventory bytes and verify them against the sidecar digest.
///
/// Mismatches are retried once via `refetch` after a short backoff, since a
/// reader can observe the window where a concurrent commit has replaced the
/// root inventory but not yet its sidecar. A persistent mismatch is
/// `CorruptObject`.
pub(crate) fn parse_verified_inventory(
    bytes: Vec<u8>,
    sidecar_digest: String,
    source: &str,
    refetch: impl Fn() -> Result<(Vec<u8>, String)>,
) -> Result<Inventory> {
    match try_parse_verified(&bytes, &sidecar_digest, source) {
        Ok(inventory) => Ok(inventory),
        Err(first_error) => {
            thread::sleep(SIDECAR_RETRY_DELAY);
            let (bytes, sidecar_digest) = match refetch() {
                Ok(refetched) => refetched,
                Err(_) => return Err(first_error),
            };
            try_parse_verified(&bytes, &sidecar_digest, source)
        }
    }
}

fn try_parse_verified(bytes: &[u8], sidecar_digest: &str, source: &str) -> Result<Inventory> {
    let mut inventory = mapper::from_bytes(bytes, source)?;
    let actual = inventory.digest_algorithm().hash_hex(bytes);

    if !actual.eq_ignore_ascii_case(sidecar_digest) {
        return Err(Error::CorruptObject(format!(
            "inventory at {} does not match its sidecar: expected digest {}; found {}",
            source, sidecar_digest, actual
        )));
    }

    inventory.set_current_digest(Some(actual));
    Ok(inventory)
}

/// Build the logical path → retriever map shared by both engines.
pub(crate) fn stream_map<F>(
    inventory: &Inventory,
    version_num: VersionNum,
    make_retriever: F,
) -> Result<BTreeMap<String, Box<dyn ContentRetriever>>>
where
    F: Fn(&str, &str) -> Result<Box<dyn ContentRetriever>>,
{
    let version = inventory.ensure_version(version_num)?;
    let mut streams: BTreeMap<String, Box<dyn ContentRetriever>> = BTreeMap::new();

    for (digest, logical_paths) in &version.state {
        for logical_path in logical_paths {
            streams.insert(logical_path.clone(), make_retriever(digest, logical_path)?);
        }
    }

    Ok(streams)
}
