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

use std::io;
use std::result;

use thiserror::Error as DeriveError;

use crate::digest::DigestAlgorithm;

/// The error type for operations on an OCFL repository.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// An object, version, or logical path was not found.
    #[error("{0}")]
    NotFound(String),

    /// An import collided with an object that already exists.
    #[error("{0}")]
    AlreadyExists(String),

    /// The caller's view of the object's HEAD is stale; a concurrent writer won.
    ///
    /// Callers should reload the object and retry the operation.
    #[error("{0}")]
    ObjectOutOfSync(String),

    /// An OCFL invariant was violated at runtime, such as attempting to create
    /// a new version of an object that has an active mutable HEAD.
    #[error("{0}")]
    State(String),

    /// A computed digest did not match the declared digest.
    ///
    /// The affected content must be treated as unavailable.
    #[error("fixity check of {path} failed: expected {algorithm} digest {expected}; found {actual}")]
    FixityCheck {
        algorithm: DigestAlgorithm,
        expected: String,
        actual: String,
        path: String,
    },

    /// The object's on-disk structure is invalid: a missing sidecar, a
    /// malformed inventory, or a dangling manifest entry. No automatic repair
    /// is attempted.
    #[error("{0}")]
    CorruptObject(String),

    /// A write lock could not be acquired within the configured timeout.
    #[error("{0}")]
    Lock(String),

    /// A logical or content path violated the OCFL path constraints.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The caller supplied an invalid argument.
    #[error("{0}")]
    InvalidValue(String),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An error occurred in the backing store or its client.
    #[error(transparent)]
    Store(anyhow::Error),
}

impl Error {
    /// Wrap a foreign storage-client error.
    pub fn store(error: impl Into<anyhow::Error>) -> Self {
        Error::Store(error.into())
    }
}

/// The result type for operations on an OCFL repository.
pub type Result<T> = result::Result<T, Error>;
