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

//! Clients for object stores that back [`crate::storage::CloudStorage`].
//!
//! A [`CloudClient`] models the small set of operations the cloud storage
//! engine needs: durable single-key puts, gets, server-side copies, prefix
//! listing, and deletes. [`MemoryClient`] provides an in-process
//! implementation used heavily by tests; the `store-s3` feature adds
//! [`S3CloudClient`] for Amazon S3 and compatible stores.

mod s3;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use static_assertions::assert_obj_safe;
use tracing::error;

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};

#[cfg(feature = "store-s3")]
pub use self::s3::S3CloudClient;

/// The maximum object size accepted by the multipart math: 5 TiB.
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Objects larger than this are uploaded via multipart: 100 MiB.
pub const MAX_PART_BYTES: u64 = 100 * 1024 * 1024;

/// The initial multipart part size: 10 MiB.
pub const PART_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// The initial cap on the number of parts.
pub const MAX_PARTS: u64 = 100;

/// How much the part size grows per adjustment round.
pub const PART_SIZE_INCREMENT: u64 = 10;

/// How much the parts cap grows when the part size ceiling is hit.
pub const PARTS_INCREMENT: u64 = 100;

/// Pick a multipart part size such that `file_size` fits within the parts
/// cap. The size starts at 10 MiB and creeps upward; when it would exceed
/// 100 MiB it is halved and the parts cap raised instead, which keeps any
/// file up to 5 TiB within the provider's limits.
pub(crate) fn determine_part_size(file_size: u64) -> u64 {
    let mut part_size = PART_SIZE_BYTES;
    let mut max_parts = MAX_PARTS;

    while file_size / part_size > max_parts {
        part_size += PART_SIZE_INCREMENT;

        if part_size > MAX_PART_BYTES {
            max_parts += PARTS_INCREMENT;
            part_size /= 2;
        }
    }

    part_size
}

/// One object returned by a listing.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectListing {
    /// The full key, relative to the client's root.
    pub key: String,

    /// The key with the listed prefix removed.
    pub key_suffix: String,
}

/// The result of a listing: objects plus, for directory listings, the
/// immediate child "directories" (common prefixes).
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct ListResult {
    pub objects: Vec<ObjectListing>,
    pub directories: Vec<String>,
}

impl ListResult {
    /// Whether the listing matched nothing at all.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.directories.is_empty()
    }
}

/// A client for a cloud object store.
///
/// Keys are `/`-separated and relative to the client's configured root. The
/// store is assumed to provide durable single-key puts but no cross-key
/// transactions; the storage engine layers its own rollback on top.
pub trait CloudClient: Send + Sync + Debug {
    /// Upload the file at `src` to `key`.
    ///
    /// `content_md5`, when provided, is the file's MD5 digest; clients that
    /// support it pass the value to the store for transfer verification.
    fn upload_file(&self, src: &Path, key: &str, content_md5: Option<&str>) -> Result<()>;

    /// Upload raw bytes to `key`.
    fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Download `key` to the file at `dst`, creating parent directories.
    ///
    /// # Errors
    /// - `Error::NotFound`: The key does not exist.
    fn download_file(&self, key: &str, dst: &Path) -> Result<()>;

    /// Open `key` for reading.
    ///
    /// # Errors
    /// - `Error::NotFound`: The key does not exist.
    fn download_stream(&self, key: &str) -> Result<Box<dyn Read + Send>>;

    /// Download `key` as a UTF-8 string.
    ///
    /// # Errors
    /// - `Error::NotFound`: The key does not exist.
    fn download_string(&self, key: &str) -> Result<String>;

    /// Server-side copy `src_key` to `dst_key`.
    ///
    /// # Errors
    /// - `Error::NotFound`: The source key does not exist.
    fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()>;

    /// List every key under `prefix`, recursively.
    fn list(&self, prefix: &str) -> Result<ListResult>;

    /// List the immediate children of `path`.
    fn list_directory(&self, path: &str) -> Result<ListResult>;

    /// Delete the given keys. Missing keys are not an error.
    fn delete_objects(&self, keys: &[String]) -> Result<()>;

    /// Delete every key under `path`.
    fn delete_path(&self, path: &str) -> Result<()>;

    /// Best-effort delete used during rollback: failures are logged, never
    /// propagated.
    fn safe_delete_objects(&self, keys: &[String]) {
        if let Err(err) = self.delete_objects(keys) {
            error!("failed to clean up keys {:?}: {}", keys, err);
        }
    }
}

assert_obj_safe!(CloudClient);

fn key_not_found(key: &str) -> Error {
    Error::NotFound(format!("key {} was not found", key))
}

/// Append a trailing `/` so a prefix only matches whole path segments.
fn directory_prefix(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{}/", path)
    }
}

/// A [`CloudClient`] that stores objects in memory.
///
/// Data is shared between clones, so a test can hold one handle while the
/// storage engine under test holds another. When an upload supplies a
/// `content_md5`, it is verified, mirroring what a real store does with the
/// `Content-MD5` header.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryClient {
    /// Create a new, empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every key in the store.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// The bytes stored at `key`, if any.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

impl CloudClient for MemoryClient {
    fn upload_file(&self, src: &Path, key: &str, content_md5: Option<&str>) -> Result<()> {
        let bytes = fs::read(src)?;

        if let Some(expected) = content_md5 {
            let actual = DigestAlgorithm::Md5.hash_hex(&bytes);
            if actual != expected.to_ascii_lowercase() {
                return Err(Error::FixityCheck {
                    algorithm: DigestAlgorithm::Md5,
                    expected: expected.to_ascii_lowercase(),
                    actual,
                    path: key.to_owned(),
                });
            }
        }

        self.objects.lock().unwrap().insert(key.to_owned(), bytes);
        Ok(())
    }

    fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn download_file(&self, key: &str, dst: &Path) -> Result<()> {
        let bytes = self.get(key).ok_or_else(|| key_not_found(key))?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(dst)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    fn download_stream(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let bytes = self.get(key).ok_or_else(|| key_not_found(key))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn download_string(&self, key: &str) -> Result<String> {
        let bytes = self.get(key).ok_or_else(|| key_not_found(key))?;
        String::from_utf8(bytes)
            .map_err(|_| Error::CorruptObject(format!("key {} is not valid UTF-8", key)))
    }

    fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let bytes = objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| key_not_found(src_key))?;
        objects.insert(dst_key.to_owned(), bytes);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<ListResult> {
        let objects = self.objects.lock().unwrap();
        let listing = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(|key| ObjectListing {
                key: key.clone(),
                key_suffix: key[prefix.len()..].trim_start_matches('/').to_owned(),
            })
            .collect();

        Ok(ListResult {
            objects: listing,
            directories: Vec::new(),
        })
    }

    fn list_directory(&self, path: &str) -> Result<ListResult> {
        let prefix = directory_prefix(path);
        let objects = self.objects.lock().unwrap();

        let mut listing = Vec::new();
        let mut directories = Vec::new();

        for key in objects.keys() {
            if !key.starts_with(&prefix) {
                continue;
            }
            let suffix = &key[prefix.len()..];
            match suffix.split_once('/') {
                None => listing.push(ObjectListing {
                    key: key.clone(),
                    key_suffix: suffix.to_owned(),
                }),
                Some((child, _)) => {
                    let directory = format!("{}{}/", prefix, child);
                    if directories.last() != Some(&directory) {
                        directories.push(directory);
                    }
                }
            }
        }

        Ok(ListResult {
            objects: listing,
            directories,
        })
    }

    fn delete_objects(&self, keys: &[String]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn delete_path(&self, path: &str) -> Result<()> {
        let prefix = directory_prefix(path);
        let mut objects = self.objects.lock().unwrap();
        objects.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_for_small_files_is_the_default() {
        // A 150 MiB upload fits in 15 default-sized parts.
        assert_eq!(determine_part_size(150 * 1024 * 1024), PART_SIZE_BYTES);
        assert_eq!(determine_part_size(MAX_PARTS * PART_SIZE_BYTES), PART_SIZE_BYTES);
    }

    #[test]
    fn part_size_creeps_up_when_the_parts_cap_is_exceeded() {
        // One part over the cap forces the size to grow just past the point
        // where the file fits again.
        let file_size = (MAX_PARTS + 1) * PART_SIZE_BYTES;
        let part_size = determine_part_size(file_size);

        assert!(part_size > PART_SIZE_BYTES);
        assert!(part_size <= MAX_PART_BYTES);
        assert!(file_size / part_size <= MAX_PARTS);
    }

    #[test]
    fn part_size_ceiling_raises_the_parts_cap_instead() {
        // 15 GiB cannot fit in 100 parts of up to 100 MiB, so the algorithm
        // must halve at the ceiling and raise the cap at least once.
        let file_size = 15 * 1024 * 1024 * 1024u64;
        let part_size = determine_part_size(file_size);

        assert!(part_size <= MAX_PART_BYTES);
        let parts = file_size / part_size;
        assert!(parts > MAX_PARTS);
        assert!(parts <= MAX_PARTS + 2 * PARTS_INCREMENT);
    }

    #[test]
    fn memory_client_round_trips() -> anyhow::Result<()> {
        let client = MemoryClient::new();
        client.upload_bytes("a/b/c.txt", b"data")?;

        assert_eq!(client.download_string("a/b/c.txt")?, "data");
        assert!(matches!(
            client.download_string("a/b/missing.txt"),
            Err(Error::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn memory_client_verifies_content_md5() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("f.bin");
        fs::write(&file, b"abc")?;

        let client = MemoryClient::new();
        client.upload_file(&file, "f.bin", Some("900150983cd24fb0d6963f7d28e17f72"))?;

        let error = client
            .upload_file(&file, "f.bin", Some("00000000000000000000000000000000"))
            .unwrap_err();
        assert!(matches!(error, Error::FixityCheck { .. }));
        Ok(())
    }

    #[test]
    fn directory_listing_reports_children_once() -> anyhow::Result<()> {
        let client = MemoryClient::new();
        client.upload_bytes("root/v1/content/a.txt", b"1")?;
        client.upload_bytes("root/v1/content/b.txt", b"2")?;
        client.upload_bytes("root/inventory.json", b"{}")?;

        let result = client.list_directory("root")?;
        assert_eq!(result.objects.len(), 1);
        assert_eq!(result.objects[0].key_suffix, "inventory.json");
        assert_eq!(result.directories, vec!["root/v1/".to_owned()]);

        assert!(client.list_directory("root/v2")?.is_empty());
        Ok(())
    }

    #[test]
    fn delete_path_respects_segment_boundaries() -> anyhow::Result<()> {
        let client = MemoryClient::new();
        client.upload_bytes("ab/obj/file", b"1")?;
        client.upload_bytes("ab/obj2/file", b"2")?;

        client.delete_path("ab/obj")?;

        assert!(client.get("ab/obj/file").is_none());
        assert!(client.get("ab/obj2/file").is_some());
        Ok(())
    }
}
