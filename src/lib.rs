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

//! `ocfl-store` is an implementation of the [Oxford Common File Layout]
//! (OCFL): content-addressed, append-only, self-describing storage for
//! digital preservation.
//!
//! The library manages *objects*, logically named and versioned bundles of
//! files, such that every byte ever committed remains retrievable, every
//! version is independently reconstructible from the repository alone, and
//! on-disk corruption is detectable via cryptographic digests.
//!
//! The entry point is [`OcflRepository`], built over one of two storage
//! engines in [`crate::storage`]:
//! - [`FsStorage`] keeps objects in a local directory and publishes versions
//!   with atomic renames.
//! - [`CloudStorage`] keeps objects in an object store behind a
//!   [`crate::cloud::CloudClient`], using write-then-swap-root with explicit
//!   rollback. The `store-s3` feature provides an S3 client; the in-memory
//!   client is always available.
//!
//! # Examples
//! ```no_run
//! use ocfl_store::config::SpecVersion;
//! use ocfl_store::layout::HashedNTupleLayout;
//! use ocfl_store::repo::{CommitOptions, ObjectVersionId, VersionInfo};
//! use ocfl_store::storage::FsStorage;
//! use ocfl_store::OcflRepository;
//!
//! fn main() -> ocfl_store::Result<()> {
//!     let storage = FsStorage::new(
//!         "/var/ocfl/root",
//!         SpecVersion::V1_1,
//!         Box::new(HashedNTupleLayout::default()),
//!     )?;
//!
//!     let repo = OcflRepository::builder()
//!         .storage(storage)
//!         .work_dir("/var/ocfl/work")
//!         .build()?;
//!
//!     // Create v1 of an object from a directory of files.
//!     let info = VersionInfo::new("A. Archivist", Some("mailto:aa@example.org"), "initial ingest");
//!     repo.put_object(
//!         &ObjectVersionId::head("urn:example:object-1"),
//!         "/tmp/ingest".as_ref(),
//!         &info,
//!         CommitOptions::default(),
//!     )?;
//!
//!     // Add a file, deduplicated against existing content, as v2.
//!     repo.update_object(&ObjectVersionId::head("urn:example:object-1"), &info, |updater| {
//!         updater.write_file(&b"hello"[..], "docs/new.txt", false)?;
//!         Ok(())
//!     })?;
//!
//!     // Materialize v1 somewhere else, verifying every digest.
//!     repo.get_object(
//!         &ObjectVersionId::version("urn:example:object-1", "v1".parse()?),
//!         "/tmp/out".as_ref(),
//!     )?;
//!
//!     Ok(())
//! }
//! ```
//!
//! [Oxford Common File Layout]: https://ocfl.io/

#![forbid(unsafe_code)]

pub use error::{Error, Result};
pub use repo::OcflRepository;
pub use storage::{CloudStorage, FsStorage};

pub mod cloud;
pub mod config;
pub mod digest;
mod error;
pub mod inventory;
pub mod layout;
pub mod lock;
pub mod parallel;
mod path;
pub mod repo;
pub mod storage;
pub mod util;
pub mod validate;
