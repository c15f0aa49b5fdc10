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

use std::fs;

use ocfl_store::repo::{CommitOptions, ExportOptions, ImportOptions, ObjectVersionId};
use ocfl_store::Error;

use common::*;

mod common;

#[test]
fn export_then_import_reproduces_the_object_byte_for_byte() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo_a = flat_fs_repo(&dir.path().join("a"))?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"alpha"), ("b/c.txt", b"beta")])?;

    repo_a.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    repo_a.update_object(&head("obj-1"), &version_info("v2"), |updater| {
        updater.write_file(&b"gamma"[..], "d.txt", false)?;
        Ok(())
    })?;

    let export_a = dir.path().join("export-a");
    repo_a.export_object("obj-1", &export_a, ExportOptions::default())?;

    let repo_b = flat_fs_repo(&dir.path().join("b"))?;
    repo_b.import_object(&export_a, ImportOptions::default())?;

    let export_b = dir.path().join("export-b");
    repo_b.export_object("obj-1", &export_b, ExportOptions::default())?;

    assert_eq!(read_tree(&export_a)?, read_tree(&export_b)?);
    assert_eq!(
        repo_a.describe_object("obj-1")?,
        repo_b.describe_object("obj-1")?
    );
    Ok(())
}

#[test]
fn importing_over_an_existing_object_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"alpha")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    let export = dir.path().join("export");
    repo.export_object("obj-1", &export, ExportOptions::default())?;

    let error = repo.import_object(&export, ImportOptions::default()).unwrap_err();
    assert!(matches!(error, Error::AlreadyExists(_)));
    Ok(())
}

#[test]
fn versions_move_between_repositories_in_sequence() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo_a = flat_fs_repo(&dir.path().join("a"))?;
    let repo_b = flat_fs_repo(&dir.path().join("b"))?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"v1 bytes")])?;

    // v1 travels via a full object export/import.
    repo_a.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    let object_export = dir.path().join("object-export");
    repo_a.export_object("obj-1", &object_export, ExportOptions::default())?;
    repo_b.import_object(&object_export, ImportOptions::default())?;

    // v2 travels via a version export/import.
    repo_a.update_object(&head("obj-1"), &version_info("v2"), |updater| {
        updater.write_file(&b"v2 bytes"[..], "b.txt", false)?;
        Ok(())
    })?;
    let version_export = dir.path().join("version-export");
    repo_a.export_version(
        &ObjectVersionId::version("obj-1", "v2".parse()?),
        &version_export,
        ExportOptions::default(),
    )?;
    repo_b.import_version(&version_export, ImportOptions::default())?;

    assert_eq!(repo_b.describe_object("obj-1")?.head.to_string(), "v2");

    let out = dir.path().join("out");
    repo_b.get_object(&head("obj-1"), &out)?;
    let tree = read_tree(&out)?;
    assert_eq!(tree["a.txt"], b"v1 bytes");
    assert_eq!(tree["b.txt"], b"v2 bytes");
    Ok(())
}

#[test]
fn out_of_sequence_version_imports_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo_a = flat_fs_repo(&dir.path().join("a"))?;
    let repo_b = flat_fs_repo(&dir.path().join("b"))?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"v1")])?;

    repo_a.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    repo_a.update_object(&head("obj-1"), &version_info("v2"), |updater| {
        updater.write_file(&b"v2"[..], "b.txt", false)?;
        Ok(())
    })?;

    // repo_b has never seen obj-1, so only v1 may be imported.
    let version_export = dir.path().join("version-export");
    repo_a.export_version(
        &ObjectVersionId::version("obj-1", "v2".parse()?),
        &version_export,
        ExportOptions::default(),
    )?;

    let error = repo_b
        .import_version(&version_export, ImportOptions::default())
        .unwrap_err();
    assert!(matches!(error, Error::State(_)));
    Ok(())
}

#[test]
fn import_validation_catches_tampered_content() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo_a = flat_fs_repo(&dir.path().join("a"))?;
    let repo_b = flat_fs_repo(&dir.path().join("b"))?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"honest bytes")])?;

    repo_a.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    let export = dir.path().join("export");
    repo_a.export_object("obj-1", &export, ExportOptions::default())?;

    fs::write(export.join("v1/content/a.txt"), b"tampered bytes")?;

    let error = repo_b.import_object(&export, ImportOptions::default()).unwrap_err();
    assert!(matches!(error, Error::FixityCheck { .. }));

    // Nothing was published.
    assert!(!repo_b.contains_object("obj-1")?);
    Ok(())
}

#[test]
fn export_validation_can_be_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = flat_fs_repo(dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"bytes")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    // Corrupt the object in place, then export with and without validation.
    fs::write(dir.path().join("root/obj-1/v1/content/a.txt"), b"corrupted!!")?;

    let unchecked = dir.path().join("unchecked");
    repo.export_object("obj-1", &unchecked, ExportOptions { no_validation: true })?;
    assert!(unchecked.join("v1/content/a.txt").exists());

    let checked = dir.path().join("checked");
    let error = repo
        .export_object("obj-1", &checked, ExportOptions::default())
        .unwrap_err();
    assert!(matches!(error, Error::FixityCheck { .. }));
    Ok(())
}
