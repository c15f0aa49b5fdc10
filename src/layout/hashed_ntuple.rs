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

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{config_value, StorageLayout};
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};

/// The registered name of the hashed n-tuple layout.
pub const EXTENSION_NAME: &str = "0004-hashed-n-tuple-storage-layout";

/// Configuration for [`HashedNTupleLayout`].
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HashedNTupleConfig {
    /// The algorithm used to hash object IDs.
    pub digest_algorithm: DigestAlgorithm,

    /// The number of characters per tuple directory.
    pub tuple_size: u32,

    /// The number of tuple directories.
    pub number_of_tuples: u32,

    /// When true, the object directory is the digest remainder after the
    /// tuples instead of the full digest.
    pub short_object_root: bool,
}

impl Default for HashedNTupleConfig {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            tuple_size: 3,
            number_of_tuples: 3,
            short_object_root: false,
        }
    }
}

/// A layout that hashes the object ID and nests the object under n-tuple
/// directories of the hex digest, giving a balanced directory tree for
/// arbitrary IDs. This is the default layout for new repositories.
#[derive(Debug, Clone)]
pub struct HashedNTupleLayout {
    config: HashedNTupleConfig,
}

impl Default for HashedNTupleLayout {
    fn default() -> Self {
        Self::new(HashedNTupleConfig::default()).expect("default config must be valid")
    }
}

impl HashedNTupleLayout {
    /// Create the layout from its configuration.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: The tuple settings exceed the digest length.
    pub fn new(config: HashedNTupleConfig) -> Result<Self> {
        let digest_chars = config.digest_algorithm.hash_hex(b"").len() as u32;

        if config.tuple_size == 0 || config.tuple_size > 32 {
            return Err(Error::InvalidValue(format!(
                "tupleSize must be between 1 and 32; got {}",
                config.tuple_size
            )));
        }
        if config.number_of_tuples == 0 || config.number_of_tuples > 32 {
            return Err(Error::InvalidValue(format!(
                "numberOfTuples must be between 1 and 32; got {}",
                config.number_of_tuples
            )));
        }
        if config.tuple_size * config.number_of_tuples > digest_chars {
            return Err(Error::InvalidValue(format!(
                "tupleSize * numberOfTuples ({}) exceeds the {} digest length ({})",
                config.tuple_size * config.number_of_tuples,
                config.digest_algorithm,
                digest_chars
            )));
        }

        Ok(Self { config })
    }
}

pub(super) fn from_config(config: Option<&Value>) -> Result<Box<dyn StorageLayout>> {
    let config = match config {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|error| Error::InvalidValue(format!("invalid {} config: {}", EXTENSION_NAME, error)))?,
        None => HashedNTupleConfig::default(),
    };
    Ok(Box::new(HashedNTupleLayout::new(config)?))
}

impl StorageLayout for HashedNTupleLayout {
    fn name(&self) -> &'static str {
        EXTENSION_NAME
    }

    fn describe(&self) -> &'static str {
        "Maps object IDs to paths by hashing the ID and splitting the hex digest \
         into a fixed number of fixed-size tuples, with the object stored under a \
         directory named for the full digest or its remainder."
    }

    fn config(&self) -> Result<Value> {
        config_value(EXTENSION_NAME, &self.config)
    }

    fn map_object_id(&self, object_id: &str) -> Result<String> {
        if object_id.is_empty() {
            return Err(Error::InvalidValue("object ID cannot be empty".to_owned()));
        }

        let digest = self.config.digest_algorithm.hash_hex(object_id.as_bytes());
        let tuple_chars = (self.config.tuple_size * self.config.number_of_tuples) as usize;

        let mut path = String::with_capacity(digest.len() + self.config.number_of_tuples as usize + 1);
        for tuple in 0..self.config.number_of_tuples as usize {
            let start = tuple * self.config.tuple_size as usize;
            path.push_str(&digest[start..start + self.config.tuple_size as usize]);
            path.push('/');
        }

        if self.config.short_object_root {
            path.push_str(&digest[tuple_chars..]);
        } else {
            path.push_str(&digest);
        }

        Ok(path)
    }
}
