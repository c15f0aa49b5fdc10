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

//! Constraints on the forward-slash separated paths that appear in
//! inventories. Logical paths are caller-visible names within a version's
//! state; content paths locate blobs relative to the object root. Both kinds
//! are validated with the same rules.

use crate::error::{Error, Result};

/// Validate a logical path.
///
/// Paths must be non-empty, must not begin or end with `/`, must not contain
/// empty, `.`, or `..` segments, and must not contain NUL or `\`.
///
/// # Errors
/// - `Error::InvalidPath`: The path violates a constraint.
pub fn validate_logical_path(path: &str) -> Result<()> {
    validate_path(path)
}

/// Validate a content path relative to the object root.
///
/// # Errors
/// - `Error::InvalidPath`: The path violates a constraint.
pub fn validate_content_path(path: &str) -> Result<()> {
    validate_path(path)
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("path cannot be empty".to_owned()));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(Error::InvalidPath(format!(
            "path cannot begin or end with '/': {}",
            path
        )));
    }
    if path.contains('\0') {
        return Err(Error::InvalidPath("path cannot contain NUL".to_owned()));
    }
    if path.contains('\\') {
        return Err(Error::InvalidPath(format!(
            "path cannot contain '\\': {}",
            path
        )));
    }

    for segment in path.split('/') {
        match segment {
            "" => {
                return Err(Error::InvalidPath(format!(
                    "path cannot contain empty segments: {}",
                    path
                )))
            }
            "." | ".." => {
                return Err(Error::InvalidPath(format!(
                    "path cannot contain '{}' segments: {}",
                    segment, path
                )))
            }
            _ => {}
        }
    }

    Ok(())
}

/// Join path segments with `/`, skipping empty segments.
pub fn join(segments: &[&str]) -> String {
    let mut joined = String::new();
    for segment in segments {
        let trimmed = segment.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push('/');
        }
        joined.push_str(trimmed);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_paths() {
        for path in ["a.txt", "dir/file.txt", "a/b/c/d", "weird name (1).txt"] {
            assert!(validate_logical_path(path).is_ok(), "{}", path);
        }
    }

    #[test]
    fn rejects_constraint_violations() {
        for path in [
            "",
            "/a.txt",
            "a.txt/",
            "a//b",
            "../a",
            "a/../b",
            "./a",
            "a\\b",
            "a\0b",
        ] {
            assert!(
                matches!(validate_logical_path(path), Err(Error::InvalidPath(_))),
                "{:?}",
                path
            );
        }
    }

    #[test]
    fn join_skips_empty_and_trims_slashes() {
        assert_eq!(join(&["v1", "content", "a.txt"]), "v1/content/a.txt");
        assert_eq!(join(&["", "v1/", "/a"]), "v1/a");
        assert_eq!(join(&["obj/root", ""]), "obj/root");
    }
}
