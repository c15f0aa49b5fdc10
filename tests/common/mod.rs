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

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, TimeZone};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};

use ocfl_store::cloud::{CloudClient, ListResult, MemoryClient};
use ocfl_store::config::SpecVersion;
use ocfl_store::layout::{FlatLayout, HashedNTupleLayout};
use ocfl_store::parallel::ParallelPool;
use ocfl_store::repo::{ObjectVersionId, VersionInfo};
use ocfl_store::storage::{CloudStorage, FsStorage};
use ocfl_store::util::Clock;
use ocfl_store::{OcflRepository, Result};

/// The minimum size of random test buffers.
pub const MIN_BUFFER_SIZE: usize = 1024;

/// The maximum size of random test buffers.
pub const MAX_BUFFER_SIZE: usize = 2048;

/// A clock pinned to a fixed instant so inventories are reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl FixedClock {
    pub fn default_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2023, 6, 1, 12, 0, 0)
            .unwrap()
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self(Self::default_time())
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// A repository over `FsStorage`, rooted inside `dir`, using the default
/// hashed n-tuple layout.
pub fn fs_repo(dir: &Path) -> anyhow::Result<OcflRepository> {
    fs_repo_with_layout(dir, false)
}

/// A repository over `FsStorage` using the flat layout, which makes object
/// paths predictable for tests that reach into the tree.
pub fn flat_fs_repo(dir: &Path) -> anyhow::Result<OcflRepository> {
    fs_repo_with_layout(dir, true)
}

fn fs_repo_with_layout(dir: &Path, flat: bool) -> anyhow::Result<OcflRepository> {
    let root = dir.join("root");
    let work = dir.join("work");
    fs::create_dir_all(&work)?;

    let storage = if flat {
        FsStorage::new(&root, SpecVersion::V1_1, Box::new(FlatLayout))?
    } else {
        FsStorage::new(&root, SpecVersion::V1_1, Box::<HashedNTupleLayout>::default())?
    };

    Ok(OcflRepository::builder()
        .storage(storage)
        .work_dir(work)
        .clock(FixedClock::default())
        .build()?)
}

/// A repository over `CloudStorage` backed by the given in-memory client.
pub fn cloud_repo(client: impl CloudClient + 'static, dir: &Path) -> anyhow::Result<OcflRepository> {
    let work = dir.join("work");
    fs::create_dir_all(&work)?;

    let storage = CloudStorage::new(
        Arc::new(client),
        SpecVersion::V1_1,
        Box::new(FlatLayout),
        ParallelPool::new(2),
    )?;

    Ok(OcflRepository::builder()
        .storage(storage)
        .work_dir(work)
        .clock(FixedClock::default())
        .build()?)
}

/// The `VersionInfo` used by most tests.
pub fn version_info(message: &str) -> VersionInfo {
    VersionInfo::new("Test User", Some("mailto:test@example.org"), message)
}

pub fn head(object_id: &str) -> ObjectVersionId {
    ObjectVersionId::head(object_id)
}

/// Write the given files (path, bytes) under `dir`.
pub fn write_tree(dir: &Path, files: &[(&str, &[u8])]) -> anyhow::Result<()> {
    for (path, bytes) in files {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, bytes)?;
    }
    Ok(())
}

/// Read every file under `dir` into a map of `/`-separated relative path to
/// bytes.
pub fn read_tree(dir: &Path) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
    let mut tree = BTreeMap::new();
    for entry in walk_files(dir)? {
        let bytes = fs::read(dir.join(&entry))?;
        tree.insert(entry, bytes);
    }
    Ok(tree)
}

fn walk_files(dir: &Path) -> anyhow::Result<Vec<String>> {
    fn inner(root: &Path, dir: &Path, out: &mut Vec<String>) -> anyhow::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                inner(root, &entry.path(), out)?;
            } else {
                let relative = entry.path().strip_prefix(root)?.to_owned();
                let joined = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(joined);
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    inner(dir, dir, &mut out)?;
    out.sort();
    Ok(out)
}

/// Stage a source directory of files and return its path.
pub fn source_dir(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> anyhow::Result<PathBuf> {
    let source = dir.join(name);
    fs::create_dir_all(&source)?;
    write_tree(&source, files)?;
    Ok(source)
}

/// Return a buffer containing `size` random bytes.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut rng = SmallRng::from_entropy();
    let mut buffer = vec![0u8; size];
    rng.fill_bytes(&mut buffer);
    buffer
}

/// Generate a random buffer of bytes of a random size.
pub fn random_buffer() -> Vec<u8> {
    let mut rng = SmallRng::from_entropy();
    random_bytes(rng.gen_range(MIN_BUFFER_SIZE..MAX_BUFFER_SIZE))
}

/// A [`CloudClient`] wrapper that injects failures, for exercising the cloud
/// engine's rollback paths.
#[derive(Debug, Clone)]
pub struct FailingClient {
    pub inner: MemoryClient,
    /// Fail the Nth `upload_file` call (0-based); `usize::MAX` disables.
    fail_upload_at: Arc<AtomicUsize>,
    uploads_seen: Arc<AtomicUsize>,
    /// Fail `copy_object` calls whose destination contains this substring.
    fail_copy_to: Arc<Mutex<Option<String>>>,
}

impl FailingClient {
    pub fn new(inner: MemoryClient) -> Self {
        Self {
            inner,
            fail_upload_at: Arc::new(AtomicUsize::new(usize::MAX)),
            uploads_seen: Arc::new(AtomicUsize::new(0)),
            fail_copy_to: Arc::new(Mutex::new(None)),
        }
    }

    pub fn fail_upload_at(&self, n: usize) {
        self.fail_upload_at.store(n, Ordering::SeqCst);
    }

    pub fn fail_copies_to(&self, substring: &str) {
        *self.fail_copy_to.lock().unwrap() = Some(substring.to_owned());
    }

    pub fn reset(&self) {
        self.fail_upload_at.store(usize::MAX, Ordering::SeqCst);
        self.uploads_seen.store(0, Ordering::SeqCst);
        *self.fail_copy_to.lock().unwrap() = None;
    }

    fn fail(&self, what: &str) -> ocfl_store::Error {
        ocfl_store::Error::store(anyhow::anyhow!("injected {} failure", what))
    }
}

impl CloudClient for FailingClient {
    fn upload_file(&self, src: &Path, key: &str, content_md5: Option<&str>) -> Result<()> {
        let seen = self.uploads_seen.fetch_add(1, Ordering::SeqCst);
        if seen == self.fail_upload_at.load(Ordering::SeqCst) {
            return Err(self.fail("upload"));
        }
        self.inner.upload_file(src, key, content_md5)
    }

    fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.inner.upload_bytes(key, bytes)
    }

    fn download_file(&self, key: &str, dst: &Path) -> Result<()> {
        self.inner.download_file(key, dst)
    }

    fn download_stream(&self, key: &str) -> Result<Box<dyn std::io::Read + Send>> {
        self.inner.download_stream(key)
    }

    fn download_string(&self, key: &str) -> Result<String> {
        self.inner.download_string(key)
    }

    fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        if let Some(substring) = self.fail_copy_to.lock().unwrap().as_deref() {
            if dst_key.contains(substring) {
                return Err(self.fail("copy"));
            }
        }
        self.inner.copy_object(src_key, dst_key)
    }

    fn list(&self, prefix: &str) -> Result<ListResult> {
        self.inner.list(prefix)
    }

    fn list_directory(&self, path: &str) -> Result<ListResult> {
        self.inner.list_directory(path)
    }

    fn delete_objects(&self, keys: &[String]) -> Result<()> {
        self.inner.delete_objects(keys)
    }

    fn delete_path(&self, path: &str) -> Result<()> {
        self.inner.delete_path(path)
    }
}
