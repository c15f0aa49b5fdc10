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

//! Corruption detection: tampered content, broken sidecars, and fsck-style
//! object validation.

use std::fs;
use std::io::Read;

use ocfl_store::repo::{CommitOptions, ObjectVersionId};
use ocfl_store::Error;

use common::*;

mod common;

#[test]
fn tampered_content_fails_fixity_naming_the_logical_path() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"original"), ("ok.txt", b"fine")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    fs::write(dir.path().join("root/obj-1/v1/content/a.txt"), b"corrupted")?;

    let out = dir.path().join("out");
    let error = repo
        .get_object(&ObjectVersionId::version("obj-1", "v1".parse()?), &out)
        .unwrap_err();

    match error {
        Error::FixityCheck { path, .. } => assert_eq!(path, "a.txt"),
        other => panic!("expected a fixity error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn streamed_reads_also_verify_fixity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"original")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    fs::write(dir.path().join("root/obj-1/v1/content/a.txt"), b"corrupted")?;

    let version = repo.open_version(&head("obj-1"))?;
    let mut reader = version.files.get("a.txt").unwrap().open()?;

    let mut sink = Vec::new();
    let error = reader.read_to_end(&mut sink).unwrap_err();
    assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    Ok(())
}

#[test]
fn broken_sidecars_surface_as_corrupt_objects() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"bytes")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    let sidecar = dir.path().join("root/obj-1/inventory.json.sha512");
    fs::write(&sidecar, format!("{}\tinventory.json\n", "0".repeat(128)))?;

    // The load retries once to ride out a concurrent root swap, then gives
    // up.
    let error = repo.describe_object("obj-1").unwrap_err();
    assert!(matches!(error, Error::CorruptObject(_)));
    Ok(())
}

#[test]
fn missing_sidecars_surface_as_corrupt_objects() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"bytes")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    fs::remove_file(dir.path().join("root/obj-1/inventory.json.sha512"))?;

    let error = repo.describe_object("obj-1").unwrap_err();
    assert!(matches!(error, Error::CorruptObject(_)));
    Ok(())
}

#[test]
fn validate_object_passes_for_healthy_objects() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"alpha"), ("b/c.txt", b"beta")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    repo.update_object(&head("obj-1"), &version_info("v2"), |updater| {
        updater.write_file(&b"gamma"[..], "d.txt", false)?;
        Ok(())
    })?;

    repo.validate_object("obj-1")?;
    Ok(())
}

#[test]
fn validate_object_reports_missing_content() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"alpha")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    fs::remove_file(dir.path().join("root/obj-1/v1/content/a.txt"))?;

    let error = repo.validate_object("obj-1").unwrap_err();
    assert!(matches!(error, Error::CorruptObject(_)));
    Ok(())
}

#[test]
fn validate_object_reports_unreferenced_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"alpha")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    fs::write(
        dir.path().join("root/obj-1/v1/content/sneaky.txt"),
        b"not in the manifest",
    )?;

    let error = repo.validate_object("obj-1").unwrap_err();
    assert!(matches!(error, Error::CorruptObject(_)));
    Ok(())
}

#[test]
fn recorded_fixity_values_appear_in_descriptions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;

    // md5("alpha bytes") computed with the crate's own digest support.
    let md5 = ocfl_store::digest::DigestAlgorithm::Md5.hash_hex(b"alpha bytes");

    repo.update_object(&head("obj-1"), &version_info("v1"), |updater| {
        updater.write_file(&b"alpha bytes"[..], "a.txt", false)?;
        updater.add_file_fixity("a.txt", ocfl_store::digest::DigestAlgorithm::Md5, &md5)?;
        Ok(())
    })?;

    let details = repo.describe_version(&head("obj-1"))?;
    let file = &details.files[0];
    assert_eq!(
        file.digests.get(&ocfl_store::digest::DigestAlgorithm::Md5),
        Some(&md5)
    );
    assert!(file
        .digests
        .contains_key(&ocfl_store::digest::DigestAlgorithm::Sha512));

    // The recorded fixity is also verified during validation.
    repo.validate_object("obj-1")?;
    Ok(())
}

#[test]
fn wrong_fixity_values_are_rejected_at_stage_time() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;

    let error = repo
        .update_object(&head("obj-1"), &version_info("v1"), |updater| {
            updater.write_file(&b"alpha bytes"[..], "a.txt", false)?;
            let wrong = "0".repeat(128);
            updater.add_file_fixity(
                "a.txt",
                ocfl_store::digest::DigestAlgorithm::Sha512,
                &wrong,
            )
        })
        .unwrap_err();

    assert!(matches!(error, Error::FixityCheck { .. }));
    assert!(!repo.contains_object("obj-1")?);
    Ok(())
}
