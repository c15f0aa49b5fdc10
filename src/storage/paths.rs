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

//! The well-known names and relative paths of the OCFL on-disk layout.
//!
//! Everything here is expressed as `/`-separated strings relative to either
//! the repository root or an object root, so the same arithmetic serves the
//! filesystem engine (which joins onto a `Path`) and the cloud engine (which
//! uses the strings as key prefixes).

use crate::digest::DigestAlgorithm;
use crate::inventory::{RevisionNum, VersionNum};
use crate::path::join;

/// The inventory file name.
pub const INVENTORY_FILE: &str = "inventory.json";

/// The directory holding repository and object extensions.
pub const EXTENSIONS_DIR: &str = "extensions";

/// The file at the repository root naming the storage layout extension.
pub const OCFL_LAYOUT_FILE: &str = "ocfl_layout.json";

/// The file name used for a layout extension's configuration.
pub const EXTENSION_CONFIG_FILE: &str = "config.json";

/// The registered name of the mutable-head extension.
pub const MUTABLE_HEAD_EXT_NAME: &str = "0005-mutable-head";

/// The sidecar file name for the given algorithm, e.g. `inventory.json.sha512`.
pub fn sidecar_name(algorithm: DigestAlgorithm) -> String {
    format!("{}.{}", INVENTORY_FILE, algorithm.ocfl_name())
}

/// `<prefix>/inventory.json`
pub fn inventory_path(prefix: &str) -> String {
    join(&[prefix, INVENTORY_FILE])
}

/// `<prefix>/inventory.json.<algo>`
pub fn inventory_sidecar_path(prefix: &str, algorithm: DigestAlgorithm) -> String {
    join(&[prefix, &sidecar_name(algorithm)])
}

/// `<object_root>/vN`
pub fn version_path(object_root: &str, num: VersionNum) -> String {
    join(&[object_root, &num.to_string()])
}

/// `<object_root>/extensions/0005-mutable-head`
pub fn mutable_head_ext_root(object_root: &str) -> String {
    join(&[object_root, EXTENSIONS_DIR, MUTABLE_HEAD_EXT_NAME])
}

/// `<object_root>/extensions/0005-mutable-head/head`
pub fn mutable_head_version_path(object_root: &str) -> String {
    join(&[&mutable_head_ext_root(object_root), "head"])
}

/// `<object_root>/extensions/0005-mutable-head/head/revisions`
pub fn mutable_head_revisions_path(object_root: &str) -> String {
    join(&[&mutable_head_version_path(object_root), "revisions"])
}

/// `<object_root>/extensions/0005-mutable-head/head/revisions/rN`
pub fn revision_marker_path(object_root: &str, revision: RevisionNum) -> String {
    join(&[&mutable_head_revisions_path(object_root), &revision.to_string()])
}

/// The saved copy of the root sidecar while a mutable head is active:
/// `<object_root>/extensions/0005-mutable-head/root-inventory.json.<algo>`
pub fn mutable_head_root_sidecar_path(object_root: &str, algorithm: DigestAlgorithm) -> String {
    join(&[
        &mutable_head_ext_root(object_root),
        &format!("root-{}", sidecar_name(algorithm)),
    ])
}

/// The content prefix, relative to the object root, that new blobs are
/// written under: `vN/<content_dir>` for immutable versions and
/// `extensions/0005-mutable-head/head/content/rN` for mutable-head revisions.
pub fn content_prefix(
    version: VersionNum,
    content_dir: &str,
    revision: Option<RevisionNum>,
) -> String {
    match revision {
        None => join(&[&version.to_string(), content_dir]),
        Some(revision) => join(&[
            EXTENSIONS_DIR,
            MUTABLE_HEAD_EXT_NAME,
            "head",
            content_dir,
            &revision.to_string(),
        ]),
    }
}

/// Strip the version (or mutable-head) prefix from a content path, leaving
/// the path of the staged file relative to the staging directory, which
/// always starts with the content directory name.
pub fn content_path_in_staging<'a>(content_path: &'a str, content_dir: &str) -> &'a str {
    let marker = format!("{}/", content_dir);
    match content_path.find(&marker) {
        Some(index) => &content_path[index..],
        None => content_path,
    }
}
