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

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};

/// The name of the directory under each version that holds new content.
pub const DEFAULT_CONTENT_DIRECTORY: &str = "content";

/// The OCFL spec versions this crate can read and write.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SpecVersion {
    /// OCFL 1.0
    #[serde(rename = "1.0")]
    V1_0,

    /// OCFL 1.1
    #[serde(rename = "1.1")]
    V1_1,
}

impl SpecVersion {
    /// The version number as it appears in NAMASTE file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecVersion::V1_0 => "1.0",
            SpecVersion::V1_1 => "1.1",
        }
    }

    /// The `type` URI written into inventories at this spec version.
    pub fn inventory_type(&self) -> &'static str {
        match self {
            SpecVersion::V1_0 => "https://ocfl.io/1.0/spec/#inventory",
            SpecVersion::V1_1 => "https://ocfl.io/1.1/spec/#inventory",
        }
    }

    /// The name of the storage-root NAMASTE file, e.g. `0=ocfl_1.1`.
    pub fn root_namaste_name(&self) -> String {
        format!("0=ocfl_{}", self.as_str())
    }

    /// The content of the storage-root NAMASTE file.
    pub fn root_namaste_content(&self) -> String {
        format!("ocfl_{}\n", self.as_str())
    }

    /// The name of the object-root NAMASTE file, e.g. `0=ocfl_object_1.1`.
    pub fn object_namaste_name(&self) -> String {
        format!("0=ocfl_object_{}", self.as_str())
    }

    /// The content of the object-root NAMASTE file.
    pub fn object_namaste_content(&self) -> String {
        format!("ocfl_object_{}\n", self.as_str())
    }

    /// Parse a spec version from an inventory `type` URI.
    pub fn from_inventory_type(uri: &str) -> Result<Self> {
        match uri {
            "https://ocfl.io/1.0/spec/#inventory" => Ok(SpecVersion::V1_0),
            "https://ocfl.io/1.1/spec/#inventory" => Ok(SpecVersion::V1_1),
            _ => Err(Error::InvalidValue(format!(
                "unknown inventory type: {}",
                uri
            ))),
        }
    }
}

/// Defaults applied when new objects are created.
///
/// These settings are fixed per object once its first version is written;
/// changing them later only affects objects created afterwards.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OcflConfig {
    /// The OCFL spec version to write. Default: 1.1.
    pub ocfl_version: SpecVersion,

    /// The primary digest algorithm for new objects. Default: sha512.
    pub digest_algorithm: DigestAlgorithm,

    /// The content directory name for new objects. Default: `content`.
    pub content_directory: String,
}

impl Default for OcflConfig {
    fn default() -> Self {
        Self {
            ocfl_version: SpecVersion::V1_1,
            digest_algorithm: DigestAlgorithm::Sha512,
            content_directory: DEFAULT_CONTENT_DIRECTORY.to_owned(),
        }
    }
}

impl OcflConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: The digest algorithm cannot address content or
    ///   the content directory name is invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.digest_algorithm.supports_content_addressing() {
            return Err(Error::InvalidValue(format!(
                "digest algorithm {} cannot be used as an inventory digest algorithm",
                self.digest_algorithm
            )));
        }
        if self.content_directory.is_empty()
            || self.content_directory.contains('/')
            || self.content_directory == "."
            || self.content_directory == ".."
        {
            return Err(Error::InvalidValue(format!(
                "invalid content directory name: {}",
                self.content_directory
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OcflConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha512);
        assert_eq!(config.content_directory, "content");
    }

    #[test]
    fn rejects_md5_as_primary_algorithm() {
        let config = OcflConfig {
            digest_algorithm: DigestAlgorithm::Md5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn rejects_content_directory_with_separator() {
        let config = OcflConfig {
            content_directory: "a/b".to_owned(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn namaste_names() {
        assert_eq!(SpecVersion::V1_1.root_namaste_name(), "0=ocfl_1.1");
        assert_eq!(SpecVersion::V1_1.object_namaste_name(), "0=ocfl_object_1.1");
        assert_eq!(SpecVersion::V1_1.object_namaste_content(), "ocfl_object_1.1\n");
    }
}
