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
use crate::error::{Error, Result};

/// The registered name of the n-tuple omit-prefix layout.
pub const EXTENSION_NAME: &str = "0007-n-tuple-omit-prefix-storage-layout";

/// Where zero padding is applied when the prefix-omitted ID is shorter than
/// the tuple pattern.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroPadding {
    Left,
    Right,
    None,
}

/// Configuration for [`NTupleOmitPrefixLayout`].
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NTupleOmitPrefixConfig {
    /// The delimiter ending the prefix to omit. Required, non-empty.
    pub delimiter: String,

    /// The number of characters per tuple directory.
    #[serde(default = "default_tuple_size")]
    pub tuple_size: u32,

    /// The number of tuple directories.
    #[serde(default = "default_number_of_tuples")]
    pub number_of_tuples: u32,

    /// Zero-padding mode for short IDs.
    #[serde(default = "default_zero_padding")]
    pub zero_padding: ZeroPadding,

    /// Whether the tuple source string is reversed first.
    #[serde(default)]
    pub reverse_object_root: bool,
}

fn default_tuple_size() -> u32 {
    4
}

fn default_number_of_tuples() -> u32 {
    2
}

fn default_zero_padding() -> ZeroPadding {
    ZeroPadding::Left
}

/// A layout for prefixed identifiers (DOIs, ARKs, URNs): the prefix up to and
/// including the last delimiter is dropped, and the remainder is split into
/// n-tuple directories followed by the remainder itself.
#[derive(Debug, Clone)]
pub struct NTupleOmitPrefixLayout {
    config: NTupleOmitPrefixConfig,
}

impl NTupleOmitPrefixLayout {
    /// Create the layout from its configuration.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: The delimiter is empty or a tuple setting is zero.
    pub fn new(config: NTupleOmitPrefixConfig) -> Result<Self> {
        if config.delimiter.is_empty() {
            return Err(Error::InvalidValue(
                "delimiter cannot be empty".to_owned(),
            ));
        }
        if config.tuple_size == 0 {
            return Err(Error::InvalidValue(format!(
                "tupleSize must be greater than 0; got {}",
                config.tuple_size
            )));
        }
        if config.number_of_tuples == 0 {
            return Err(Error::InvalidValue(format!(
                "numberOfTuples must be greater than 0; got {}",
                config.number_of_tuples
            )));
        }
        Ok(Self { config })
    }
}

pub(super) fn from_config(config: Option<&Value>) -> Result<Box<dyn StorageLayout>> {
    let value = config.ok_or_else(|| {
        Error::InvalidValue(format!("{} requires a configuration", EXTENSION_NAME))
    })?;
    let config = serde_json::from_value(value.clone())
        .map_err(|error| Error::InvalidValue(format!("invalid {} config: {}", EXTENSION_NAME, error)))?;
    Ok(Box::new(NTupleOmitPrefixLayout::new(config)?))
}

impl StorageLayout for NTupleOmitPrefixLayout {
    fn name(&self) -> &'static str {
        EXTENSION_NAME
    }

    fn describe(&self) -> &'static str {
        "Maps prefixed object IDs to paths by omitting everything up to and \
         including the last delimiter, splitting the zero-padded remainder into \
         n-tuple directories, and appending the remainder as the object directory."
    }

    fn config(&self) -> Result<Value> {
        config_value(EXTENSION_NAME, &self.config)
    }

    fn map_object_id(&self, object_id: &str) -> Result<String> {
        if !object_id.contains(&self.config.delimiter) {
            return Err(Error::InvalidValue(format!(
                "the delimiter {} cannot be found in {}",
                self.config.delimiter, object_id
            )));
        }

        let section = object_id
            .split(&self.config.delimiter)
            .filter(|part| !part.is_empty())
            .last()
            .ok_or_else(|| {
                Error::InvalidValue(format!(
                    "the delimiter {} is only found at the end of {}",
                    self.config.delimiter, object_id
                ))
            })?;

        let mut tuple_source: String = if self.config.reverse_object_root {
            section.chars().rev().collect()
        } else {
            section.to_owned()
        };

        let pattern_len = (self.config.tuple_size * self.config.number_of_tuples) as usize;
        if tuple_source.chars().count() < pattern_len {
            match self.config.zero_padding {
                ZeroPadding::Left => {
                    let padding = pattern_len - tuple_source.chars().count();
                    tuple_source = format!("{}{}", "0".repeat(padding), tuple_source);
                }
                ZeroPadding::Right => {
                    let padding = pattern_len - tuple_source.chars().count();
                    tuple_source = format!("{}{}", tuple_source, "0".repeat(padding));
                }
                ZeroPadding::None => {
                    return Err(Error::InvalidValue(format!(
                        "zero padding is disabled but {} is too short for the tuple pattern",
                        section
                    )));
                }
            }
        }

        let chars: Vec<char> = tuple_source.chars().collect();
        let mut path = String::new();
        for tuple in 0..self.config.number_of_tuples as usize {
            let start = tuple * self.config.tuple_size as usize;
            let end = start + self.config.tuple_size as usize;
            path.extend(&chars[start..end]);
            path.push('/');
        }

        path.push_str(section);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(delimiter: &str) -> NTupleOmitPrefixLayout {
        NTupleOmitPrefixLayout::new(NTupleOmitPrefixConfig {
            delimiter: delimiter.to_owned(),
            tuple_size: default_tuple_size(),
            number_of_tuples: default_number_of_tuples(),
            zero_padding: default_zero_padding(),
            reverse_object_root: false,
        })
        .unwrap()
    }

    #[test]
    fn omits_prefix_and_builds_tuples() -> anyhow::Result<()> {
        assert_eq!(
            layout(":").map_object_id("urn:nbn:60812310")?,
            "6081/2310/60812310"
        );
        Ok(())
    }

    #[test]
    fn short_ids_are_left_padded() -> anyhow::Result<()> {
        assert_eq!(layout(":").map_object_id("ark:123")?, "0000/0123/123");
        Ok(())
    }

    #[test]
    fn reversal_applies_to_tuples_only() -> anyhow::Result<()> {
        let layout = NTupleOmitPrefixLayout::new(NTupleOmitPrefixConfig {
            delimiter: "/".to_owned(),
            tuple_size: 4,
            number_of_tuples: 2,
            zero_padding: ZeroPadding::Left,
            reverse_object_root: true,
        })?;

        assert_eq!(layout.map_object_id("doi:10.17/ABC12345")?, "5432/1CBA/ABC12345");
        Ok(())
    }

    #[test]
    fn missing_delimiter_is_rejected() {
        assert!(layout(":").map_object_id("no-delimiter-here").is_err());
        assert!(layout(":").map_object_id(":").is_err());
    }

    #[test]
    fn no_padding_mode_rejects_short_ids() {
        let layout = NTupleOmitPrefixLayout::new(NTupleOmitPrefixConfig {
            delimiter: ":".to_owned(),
            tuple_size: 4,
            number_of_tuples: 2,
            zero_padding: ZeroPadding::None,
            reverse_object_root: false,
        })
        .unwrap();

        assert!(layout.map_object_id("ark:123").is_err());
    }

    #[test]
    fn requires_configuration() {
        assert!(matches!(from_config(None), Err(Error::InvalidValue(_))));
    }
}
