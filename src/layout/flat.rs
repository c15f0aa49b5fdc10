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

use serde_json::Value;

use super::{config_value, StorageLayout};
use crate::error::{Error, Result};

/// The registered name of the flat direct layout.
pub const EXTENSION_NAME: &str = "0002-flat-direct-storage-layout";

/// A layout that uses the object ID, unchanged, as the object root.
///
/// Only usable when object IDs are already safe directory names; IDs
/// containing a path separator are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatLayout;

pub(super) fn from_config(_config: Option<&Value>) -> Result<Box<dyn StorageLayout>> {
    Ok(Box::new(FlatLayout))
}

impl StorageLayout for FlatLayout {
    fn name(&self) -> &'static str {
        EXTENSION_NAME
    }

    fn describe(&self) -> &'static str {
        "Maps object IDs directly to directory names under the storage root. \
         Object IDs must be valid directory names."
    }

    fn config(&self) -> Result<Value> {
        config_value(EXTENSION_NAME, &serde_json::Map::new())
    }

    fn map_object_id(&self, object_id: &str) -> Result<String> {
        if object_id.is_empty() {
            return Err(Error::InvalidValue("object ID cannot be empty".to_owned()));
        }
        if object_id.contains('/') || object_id.contains('\\') {
            return Err(Error::InvalidValue(format!(
                "object ID {} cannot be mapped by the flat layout because it contains a path separator",
                object_id
            )));
        }
        if object_id == "." || object_id == ".." {
            return Err(Error::InvalidValue(format!(
                "object ID {} is not a valid directory name",
                object_id
            )));
        }
        Ok(object_id.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_safe_ids_unchanged() -> anyhow::Result<()> {
        assert_eq!(FlatLayout.map_object_id("obj123")?, "obj123");
        // Special characters are fine as long as they are directory-safe.
        assert_eq!(FlatLayout.map_object_id("..hor_rib:lé-$id")?, "..hor_rib:lé-$id");
        Ok(())
    }

    #[test]
    fn rejects_path_separators() {
        assert!(FlatLayout.map_object_id("obj/123").is_err());
        assert!(FlatLayout.map_object_id("obj\\123").is_err());
        assert!(FlatLayout.map_object_id("..").is_err());
    }
}
