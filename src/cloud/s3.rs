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

#![cfg(feature = "store-s3")]

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use s3::bucket::Bucket;
use s3::error::S3Error;
use s3::serde_types::Part;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{
    determine_part_size, key_not_found, CloudClient, ListResult, ObjectListing, MAX_FILE_BYTES,
    MAX_PART_BYTES,
};
use crate::error::{Error, Result};
use crate::path::join;

const NOT_FOUND_CODE: u16 = 404;

/// A [`CloudClient`] backed by an S3 bucket, driven through the async
/// `rust-s3` client behind a private runtime so the public contract stays
/// synchronous.
///
/// All keys are prefixed with `prefix`, which acts as the repository's
/// directory within the bucket; pass an empty string to use the bucket root.
#[derive(Debug)]
pub struct S3CloudClient {
    bucket: Bucket,
    prefix: String,
    runtime: Runtime,
}

impl S3CloudClient {
    /// Create a client for `bucket`, rooted at `prefix`.
    ///
    /// # Errors
    /// - `Error::Store`: The runtime could not be started.
    pub fn new(bucket: Bucket, prefix: &str) -> Result<Self> {
        let runtime = Runtime::new().map_err(Error::store)?;
        Ok(Self {
            bucket,
            prefix: prefix.trim_matches('/').to_owned(),
            runtime,
        })
    }

    fn full_key(&self, key: &str) -> String {
        join(&[&self.prefix, key])
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key)
    }

    fn multipart_upload(&self, src: &Path, key: &str, file_size: u64) -> Result<()> {
        let part_size = determine_part_size(file_size);

        debug!(
            "multipart upload of {} to {}: file size {}; part size {}",
            src.display(),
            key,
            file_size,
            part_size
        );

        let init = self
            .runtime
            .block_on(self.bucket.initiate_multipart_upload(key, "application/octet-stream"))
            .map_err(Error::store)?;
        let upload_id = init.upload_id;

        let result = self.upload_parts(src, key, part_size, &upload_id);

        if result.is_err() {
            // Release provider-side storage held by the incomplete upload.
            if let Err(abort_error) = self
                .runtime
                .block_on(self.bucket.abort_upload(key, &upload_id))
            {
                tracing::error!(
                    "failed to abort multipart upload of {}: {}",
                    key,
                    abort_error
                );
            }
        }

        result
    }

    fn upload_parts(&self, src: &Path, key: &str, part_size: u64, upload_id: &str) -> Result<()> {
        let mut file = File::open(src)?;
        let mut parts: Vec<Part> = Vec::new();
        let mut part_number = 1u32;

        loop {
            let mut buffer = Vec::with_capacity(part_size as usize);
            let read = (&mut file)
                .take(part_size)
                .read_to_end(&mut buffer)?;
            if read == 0 {
                break;
            }

            let part = self
                .runtime
                .block_on(self.bucket.put_multipart_chunk(
                    buffer,
                    key,
                    part_number,
                    upload_id,
                    "application/octet-stream",
                ))
                .map_err(Error::store)?;
            parts.push(part);
            part_number += 1;
        }

        self.runtime
            .block_on(self.bucket.complete_multipart_upload(key, upload_id, parts))
            .map_err(Error::store)?;
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let full_key = self.full_key(key);
        match self.runtime.block_on(self.bucket.get_object(&full_key)) {
            Ok(response) if response.status_code() == NOT_FOUND_CODE => Err(key_not_found(key)),
            Ok(response) => Ok(response.bytes().to_vec()),
            Err(S3Error::Http(NOT_FOUND_CODE, _)) => Err(key_not_found(key)),
            Err(error) => Err(Error::store(error)),
        }
    }
}

impl CloudClient for S3CloudClient {
    fn upload_file(&self, src: &Path, key: &str, _content_md5: Option<&str>) -> Result<()> {
        let full_key = self.full_key(key);
        let file_size = src.metadata()?.len();

        if file_size >= MAX_FILE_BYTES {
            return Err(Error::InvalidValue(format!(
                "cannot store {} because it exceeds the maximum object size",
                src.display()
            )));
        }

        if file_size > MAX_PART_BYTES {
            self.multipart_upload(src, &full_key, file_size)
        } else {
            debug!("uploading {} to {} ({} bytes)", src.display(), full_key, file_size);
            let bytes = std::fs::read(src)?;
            self.runtime
                .block_on(self.bucket.put_object(&full_key, &bytes))
                .map_err(Error::store)?;
            Ok(())
        }
    }

    fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let full_key = self.full_key(key);
        self.runtime
            .block_on(self.bucket.put_object(&full_key, bytes))
            .map_err(Error::store)?;
        Ok(())
    }

    fn download_file(&self, key: &str, dst: &Path) -> Result<()> {
        let bytes = self.get_object(key)?;
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(dst)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    fn download_stream(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.get_object(key)?)))
    }

    fn download_string(&self, key: &str) -> Result<String> {
        let bytes = self.get_object(key)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::CorruptObject(format!("key {} is not valid UTF-8", key)))
    }

    fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let src = self.full_key(src_key);
        let dst = self.full_key(dst_key);
        debug!("copying {} to {}", src, dst);

        match self
            .runtime
            .block_on(self.bucket.copy_object_internal(&src, &dst))
        {
            Ok(_) => Ok(()),
            Err(S3Error::Http(NOT_FOUND_CODE, _)) => Err(key_not_found(src_key)),
            Err(error) => Err(Error::store(error)),
        }
    }

    fn list(&self, prefix: &str) -> Result<ListResult> {
        let full_prefix = self.full_key(prefix);
        let pages = self
            .runtime
            .block_on(self.bucket.list(full_prefix.clone(), None))
            .map_err(Error::store)?;

        let mut objects = Vec::new();
        for page in pages {
            for object in page.contents {
                let key = self.strip_prefix(&object.key).to_owned();
                let key_suffix = key
                    .strip_prefix(prefix)
                    .map(|rest| rest.trim_start_matches('/'))
                    .unwrap_or(&key)
                    .to_owned();
                objects.push(ObjectListing { key, key_suffix });
            }
        }

        Ok(ListResult {
            objects,
            directories: Vec::new(),
        })
    }

    fn list_directory(&self, path: &str) -> Result<ListResult> {
        let mut full_prefix = self.full_key(path);
        if !full_prefix.is_empty() && !full_prefix.ends_with('/') {
            full_prefix.push('/');
        }

        let pages = self
            .runtime
            .block_on(self.bucket.list(full_prefix.clone(), Some("/".to_owned())))
            .map_err(Error::store)?;

        let mut objects = Vec::new();
        let mut directories = Vec::new();
        for page in pages {
            for object in page.contents {
                let key = self.strip_prefix(&object.key).to_owned();
                let key_suffix = object.key[full_prefix.len()..].to_owned();
                objects.push(ObjectListing { key, key_suffix });
            }
            if let Some(prefixes) = page.common_prefixes {
                for prefix in prefixes {
                    directories.push(self.strip_prefix(&prefix.prefix).to_owned());
                }
            }
        }

        Ok(ListResult {
            objects,
            directories,
        })
    }

    fn delete_objects(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let full_key = self.full_key(key);
            self.runtime
                .block_on(self.bucket.delete_object(&full_key))
                .map_err(Error::store)?;
        }
        Ok(())
    }

    fn delete_path(&self, path: &str) -> Result<()> {
        let keys: Vec<String> = self
            .list(&super::directory_prefix(path))?
            .objects
            .into_iter()
            .map(|object| object.key)
            .collect();
        self.delete_objects(&keys)
    }
}
