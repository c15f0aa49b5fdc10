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

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// An OCFL version number, `v1`, `v2`, … or zero-padded `v0001`.
///
/// The padding width is part of the value: `v1` and `v001` are different
/// spellings and an object must use one width consistently. `width` is the
/// total digit count when padded and `0` when unpadded. Ordering and equality
/// consider only the numeric value.
#[derive(Debug, Clone, Copy)]
pub struct VersionNum {
    num: u64,
    width: u32,
}

impl VersionNum {
    /// Version 1, unpadded.
    pub const V1: VersionNum = VersionNum { num: 1, width: 0 };

    /// Create a new unpadded version number.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: `num` is zero.
    pub fn new(num: u64) -> Result<Self> {
        Self::with_width(num, 0)
    }

    /// Create a version number with the given padding width.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: `num` is zero or does not fit in `width` digits.
    pub fn with_width(num: u64, width: u32) -> Result<Self> {
        if num == 0 {
            return Err(Error::InvalidValue(
                "version numbers start at v1".to_owned(),
            ));
        }
        // A padded number must keep at least one leading zero, so width 3
        // supports at most v099.
        if width > 0 && num > 10u64.pow(width - 1) - 1 {
            return Err(Error::InvalidValue(format!(
                "version number {} does not fit in padding width {}",
                num, width
            )));
        }
        Ok(Self { num, width })
    }

    /// The numeric value.
    pub fn num(&self) -> u64 {
        self.num
    }

    /// The zero-padding width, or 0 when unpadded.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The next version number, keeping this one's padding width.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: Incrementing would overflow the padding width.
    pub fn next(&self) -> Result<Self> {
        Self::with_width(self.num + 1, self.width)
    }

    /// The previous version number, keeping this one's padding width.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: This is `v1`.
    pub fn previous(&self) -> Result<Self> {
        if self.num == 1 {
            return Err(Error::InvalidValue("v1 has no previous version".to_owned()));
        }
        Self::with_width(self.num - 1, self.width)
    }
}

impl PartialEq for VersionNum {
    fn eq(&self, other: &Self) -> bool {
        self.num == other.num
    }
}

impl Eq for VersionNum {}

impl PartialOrd for VersionNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionNum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.num.cmp(&other.num)
    }
}

impl std::hash::Hash for VersionNum {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.num.hash(state);
    }
}

impl Display for VersionNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.width == 0 {
            write!(f, "v{}", self.num)
        } else {
            write!(f, "v{:0width$}", self.num, width = self.width as usize)
        }
    }
}

impl FromStr for VersionNum {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let digits = value
            .strip_prefix('v')
            .ok_or_else(|| Error::InvalidValue(format!("invalid version number: {}", value)))?;

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidValue(format!(
                "invalid version number: {}",
                value
            )));
        }

        let num: u64 = digits
            .parse()
            .map_err(|_| Error::InvalidValue(format!("invalid version number: {}", value)))?;
        let width = if digits.starts_with('0') {
            digits.len() as u32
        } else {
            0
        };

        Self::with_width(num, width)
    }
}

impl Serialize for VersionNum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionNum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(DeError::custom)
    }
}

/// A mutable-head revision number, `r1`, `r2`, …. Never padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionNum(u64);

impl RevisionNum {
    /// Revision 1.
    pub const R1: RevisionNum = RevisionNum(1);

    /// Create a new revision number.
    ///
    /// # Errors
    /// - `Error::InvalidValue`: `num` is zero.
    pub fn new(num: u64) -> Result<Self> {
        if num == 0 {
            return Err(Error::InvalidValue(
                "revision numbers start at r1".to_owned(),
            ));
        }
        Ok(Self(num))
    }

    /// The numeric value.
    pub fn num(&self) -> u64 {
        self.0
    }

    /// The next revision number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for RevisionNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl FromStr for RevisionNum {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let digits = value
            .strip_prefix('r')
            .ok_or_else(|| Error::InvalidValue(format!("invalid revision number: {}", value)))?;

        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidValue(format!(
                "invalid revision number: {}",
                value
            )));
        }

        let num: u64 = digits
            .parse()
            .map_err(|_| Error::InvalidValue(format!("invalid revision number: {}", value)))?;
        Self::new(num)
    }
}
