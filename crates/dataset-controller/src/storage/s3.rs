//! S3/MinIO backed [`ObjectStore`]

use super::{ObjectInfo, ObjectStore, Result, StorageError};
use crate::tasks::config::StorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as S3Client;
use tracing::debug;

/// Object store speaking the S3 API against a single endpoint
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    #[must_use]
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Builds a client from static settings. MinIO needs path-style addressing.
    #[must_use]
    pub fn from_config(config: &StorageConfig) -> Self {
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .force_path_style(config.force_path_style);

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            builder = builder.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "dataset-controller",
            ));
        }

        Self::new(S3Client::from_conf(builder.build()))
    }
}

fn request_error<E>(operation: &'static str, err: E) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Request {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}

/// `x-amz-copy-source` value; each key segment is URL-encoded
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{bucket}/{}", encoded.join("/"))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_not_found())
                    || err
                        .raw_response()
                        .is_some_and(|response| response.status().as_u16() == 404);
                if not_found {
                    Ok(false)
                } else {
                    Err(request_error("HeadBucket", err))
                }
            }
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| request_error("CreateBucket", err))?;
        debug!(bucket, "created bucket");
        Ok(())
    }

    async fn copy_object(
        &self,
        dst_bucket: &str,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
    ) -> Result<()> {
        self.client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(copy_source(src_bucket, src_key))
            .send()
            .await
            .map_err(|err| request_error("CopyObject", err))?;
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| request_error("DeleteObject", err))?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>> {
        let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if !recursive {
            request = request.delimiter("/");
        }

        let mut pages = request.into_paginator().send();
        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| request_error("ListObjectsV2", err))?;
            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or_default(),
                    etag: object.e_tag().map(str::to_string),
                });
            }
        }

        debug!(bucket, prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_encodes_each_segment() {
        assert_eq!(
            copy_source("team-a", "docs/q1 report.pdf"),
            "team-a/docs/q1%20report.pdf"
        );
        assert_eq!(copy_source("team-a", "a.txt"), "team-a/a.txt");
    }
}
