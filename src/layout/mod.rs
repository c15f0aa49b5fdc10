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

//! Storage layout extensions: pluggable mappings from object ID to the
//! object's root path under the repository root.
//!
//! The active layout is recorded in `ocfl_layout.json` at the repository root
//! and its configuration under `extensions/<name>/config.json`, so any OCFL
//! client can locate objects without out-of-band knowledge. Implementations
//! register in [`layout_for`]'s registry and are resolved by extension name
//! when a repository is opened.

mod flat;
mod hashed_ntuple;
mod ntuple_omit_prefix;

use std::collections::BTreeMap;
use std::fmt::Debug;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use static_assertions::assert_obj_safe;

use crate::error::{Error, Result};

pub use flat::FlatLayout;
pub use hashed_ntuple::HashedNTupleLayout;
pub use ntuple_omit_prefix::NTupleOmitPrefixLayout;

/// A storage layout extension.
pub trait StorageLayout: Send + Sync + Debug {
    /// The registered extension name, e.g. `0004-hashed-n-tuple-storage-layout`.
    fn name(&self) -> &'static str;

    /// A human-readable description written into `ocfl_layout.json`.
    fn describe(&self) -> &'static str;

    /// The layout's configuration, serialized for `extensions/<name>/config.json`.
    fn config(&self) -> Result<Value>;

    /// Map an object ID to its root path relative to the repository root.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: The ID cannot be mapped by this layout.
    fn map_object_id(&self, object_id: &str) -> Result<String>;
}

assert_obj_safe!(StorageLayout);

type LayoutFactory = fn(Option<&Value>) -> Result<Box<dyn StorageLayout>>;

static REGISTRY: Lazy<BTreeMap<&'static str, LayoutFactory>> = Lazy::new(|| {
    let mut registry: BTreeMap<&'static str, LayoutFactory> = BTreeMap::new();
    registry.insert(flat::EXTENSION_NAME, flat::from_config);
    registry.insert(hashed_ntuple::EXTENSION_NAME, hashed_ntuple::from_config);
    registry.insert(ntuple_omit_prefix::EXTENSION_NAME, ntuple_omit_prefix::from_config);
    registry
});

/// Instantiate the layout extension with the given registered name.
///
/// # Errors
/// - `Error::InvalidValue`: The name is unknown or the config is invalid.
pub fn layout_for(name: &str, config: Option<&Value>) -> Result<Box<dyn StorageLayout>> {
    match REGISTRY.get(name) {
        Some(factory) => factory(config),
        None => Err(Error::InvalidValue(format!(
            "unknown storage layout extension: {}",
            name
        ))),
    }
}

/// The names of every registered layout extension.
pub fn registered_layouts() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}

/// Serialize a layout config struct, tagging it with its `extensionName`.
fn config_value<C: Serialize>(extension_name: &str, config: &C) -> Result<Value> {
    let mut value = serde_json::to_value(config)
        .map_err(|error| Error::InvalidValue(format!("invalid layout config: {}", error)))?;
    if let Value::Object(map) = &mut value {
        map.insert(
            "extensionName".to_owned(),
            Value::String(extension_name.to_owned()),
        );
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_all_layouts() -> anyhow::Result<()> {
        let omit_prefix_config = serde_json::json!({ "delimiter": ":" });

        for name in registered_layouts() {
            // The omit-prefix layout has no default configuration.
            let config = if name == ntuple_omit_prefix::EXTENSION_NAME {
                Some(&omit_prefix_config)
            } else {
                None
            };

            let layout = layout_for(name, config)?;
            assert_eq!(layout.name(), name);
            assert!(layout.config()?.get("extensionName").is_some());
        }
        Ok(())
    }

    #[test]
    fn unknown_layout_is_rejected() {
        assert!(matches!(
            layout_for("9999-no-such-layout", None),
            Err(Error::InvalidValue(_))
        ));
    }
}
