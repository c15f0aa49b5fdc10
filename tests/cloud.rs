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

//! The cloud storage engine exercised over the in-memory client, including
//! its rollback behavior under injected failures.

use ocfl_store::cloud::MemoryClient;
use ocfl_store::repo::CommitOptions;
use ocfl_store::Error;

use common::*;

mod common;

#[test]
fn put_then_get_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = MemoryClient::new();
    let repo = cloud_repo(client.clone(), dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"hello"), ("b/c.txt", b"world")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    // The expected OCFL keys exist in the store.
    let keys = client.keys();
    assert!(keys.contains(&"0=ocfl_1.1".to_owned()));
    assert!(keys.contains(&"ocfl_layout.json".to_owned()));
    assert!(keys.contains(&"obj-1/0=ocfl_object_1.1".to_owned()));
    assert!(keys.contains(&"obj-1/inventory.json".to_owned()));
    assert!(keys.contains(&"obj-1/inventory.json.sha512".to_owned()));
    assert!(keys.contains(&"obj-1/v1/inventory.json".to_owned()));
    assert!(keys.contains(&"obj-1/v1/content/a.txt".to_owned()));
    assert!(keys.contains(&"obj-1/v1/content/b/c.txt".to_owned()));

    let out = dir.path().join("out");
    repo.get_object(&head("obj-1"), &out)?;
    let tree = read_tree(&out)?;
    assert_eq!(tree["a.txt"], b"hello");
    assert_eq!(tree["b/c.txt"], b"world");
    Ok(())
}

#[test]
fn failed_content_upload_rolls_back_cleanly() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = FailingClient::new(MemoryClient::new());
    let repo = cloud_repo(client.clone(), dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"v1")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    let keys_before = client.inner.keys();

    // Fail the next content upload: the v2 commit must leave no trace.
    client.fail_upload_at(client_upload_count(&client));
    let error = repo
        .update_object(&head("obj-1"), &version_info("v2"), |updater| {
            updater.write_file(&b"new"[..], "new.txt", false)?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(error, Error::Store(_)));

    client.reset();
    assert_eq!(client.inner.keys(), keys_before);
    assert_eq!(repo.describe_object("obj-1")?.head.to_string(), "v1");

    // The next commit proceeds normally.
    repo.update_object(&head("obj-1"), &version_info("v2"), |updater| {
        updater.write_file(&b"new"[..], "new.txt", false)?;
        Ok(())
    })?;
    assert_eq!(repo.describe_object("obj-1")?.head.to_string(), "v2");
    Ok(())
}

// The number of upload_file calls the engine has already made; failing at
// this index fails the next one.
fn client_upload_count(_client: &FailingClient) -> usize {
    // Uploads so far: v1 content (1) + v1 inventory + v1 sidecar.
    3
}

#[test]
fn failed_root_swap_restores_the_previous_inventory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = FailingClient::new(MemoryClient::new());
    let repo = cloud_repo(client.clone(), dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"v1")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    let root_inventory_before = client.inner.get("obj-1/inventory.json").unwrap();

    // The swap-root phase is the only server-side copy in an immutable
    // commit; failing it simulates a crash between upload and publish.
    client.fail_copies_to("obj-1/inventory.json");
    let error = repo
        .update_object(&head("obj-1"), &version_info("v2"), |updater| {
            updater.write_file(&b"new"[..], "new.txt", false)?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(error, Error::Store(_)));
    client.reset();

    // Readers still see v1, and the v2 keys were deleted.
    assert_eq!(
        client.inner.get("obj-1/inventory.json").unwrap(),
        root_inventory_before
    );
    assert_eq!(repo.describe_object("obj-1")?.head.to_string(), "v1");
    assert!(client.inner.get("obj-1/v2/inventory.json").is_none());
    assert!(!client
        .inner
        .keys()
        .iter()
        .any(|key| key.starts_with("obj-1/v2/content/")));
    Ok(())
}

#[test]
fn mutable_head_commits_on_the_cloud_engine() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = MemoryClient::new();
    let repo = cloud_repo(client.clone(), dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"base")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;

    repo.stage_changes(&head("obj-1"), &version_info("r1"), |updater| {
        updater.write_file(&b"one"[..], "one.txt", false)?;
        Ok(())
    })?;
    repo.stage_changes(&head("obj-1"), &version_info("r2"), |updater| {
        updater.write_file(&b"two"[..], "two.txt", false)?;
        Ok(())
    })?;

    // Revision markers and staged content live under the extension.
    let keys = client.keys();
    assert!(keys.contains(&"obj-1/extensions/0005-mutable-head/head/revisions/r1".to_owned()));
    assert!(keys.contains(&"obj-1/extensions/0005-mutable-head/head/revisions/r2".to_owned()));
    assert!(keys.contains(&"obj-1/extensions/0005-mutable-head/head/content/r1/one.txt".to_owned()));
    assert!(keys.contains(&"obj-1/extensions/0005-mutable-head/head/content/r2/two.txt".to_owned()));

    repo.commit_staged_changes("obj-1", &version_info("promote"))?;

    let keys = client.keys();
    assert!(!keys.iter().any(|key| key.contains("0005-mutable-head")));
    assert!(keys.contains(&"obj-1/v2/content/r1/one.txt".to_owned()));
    assert!(keys.contains(&"obj-1/v2/content/r2/two.txt".to_owned()));

    let out = dir.path().join("out");
    repo.get_object(&head("obj-1"), &out)?;
    let tree = read_tree(&out)?;
    assert_eq!(tree["a.txt"], b"base");
    assert_eq!(tree["one.txt"], b"one");
    assert_eq!(tree["two.txt"], b"two");
    Ok(())
}

#[test]
fn purge_and_rollback_on_the_cloud_engine() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = MemoryClient::new();
    let repo = cloud_repo(client.clone(), dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"v1")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    repo.update_object(&head("obj-1"), &version_info("v2"), |updater| {
        updater.write_file(&b"v2"[..], "a.txt", true)?;
        Ok(())
    })?;

    repo.rollback_to_version("obj-1", "v1".parse()?)?;
    assert_eq!(repo.describe_object("obj-1")?.head.to_string(), "v1");
    assert!(!client.keys().iter().any(|key| key.starts_with("obj-1/v2/")));

    let out = dir.path().join("out");
    repo.get_object(&head("obj-1"), &out)?;
    assert_eq!(read_tree(&out)?["a.txt"], b"v1");

    repo.purge_object("obj-1")?;
    assert!(!repo.contains_object("obj-1")?);
    assert!(!client.keys().iter().any(|key| key.starts_with("obj-1/")));
    Ok(())
}

#[test]
fn list_object_ids_on_the_cloud_engine() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = MemoryClient::new();
    let repo = cloud_repo(client, dir.path())?;

    for id in ["obj-a", "obj-b"] {
        let source = source_dir(dir.path(), &format!("src-{}", id), &[("f.txt", id.as_bytes())])?;
        repo.put_object(&head(id), &source, &version_info("v1"), CommitOptions::default())?;
    }

    let mut ids: Vec<String> = repo.list_object_ids()?.collect::<Result<_, _>>()?;
    ids.sort();
    assert_eq!(ids, vec!["obj-a", "obj-b"]);
    Ok(())
}

#[test]
fn content_is_deduplicated_on_the_cloud_engine() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = MemoryClient::new();
    let repo = cloud_repo(client.clone(), dir.path())?;
    let source = source_dir(dir.path(), "src", &[("a.txt", b"same")])?;

    repo.put_object(&head("obj-1"), &source, &version_info("v1"), CommitOptions::default())?;
    repo.update_object(&head("obj-1"), &version_info("v2"), |updater| {
        updater.write_file(&b"same"[..], "b.txt", false)?;
        Ok(())
    })?;

    // No new blob key was created for the duplicate content.
    assert!(!client
        .keys()
        .iter()
        .any(|key| key.starts_with("obj-1/v2/content/")));

    let out = dir.path().join("out");
    repo.get_object(&head("obj-1"), &out)?;
    let tree = read_tree(&out)?;
    assert_eq!(tree["a.txt"], b"same");
    assert_eq!(tree["b.txt"], b"same");
    Ok(())
}
