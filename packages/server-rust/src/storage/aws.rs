//! AWS Secrets Manager and S3 backed stores.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use crate::traits::{ObjectStore, PutObject, SecretStore, SecretValue, StoreError};

/// Secret store backed by AWS Secrets Manager.
#[derive(Debug, Clone)]
pub struct AwsSecretStore {
    client: aws_sdk_secretsmanager::Client,
}

impl AwsSecretStore {
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_secretsmanager::Client::new(config),
        }
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn get_secret(&self, secret_id: &str) -> Result<SecretValue, StoreError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                let e = e.into_service_error();
                if e.is_resource_not_found_exception() {
                    StoreError::NotFound(format!("secret {secret_id}"))
                } else {
                    StoreError::Backend(anyhow::Error::new(e))
                }
            })?;

        if let Some(text) = output.secret_string() {
            return Ok(SecretValue::Text(text.to_string()));
        }
        if let Some(blob) = output.secret_binary() {
            return Ok(SecretValue::Binary(blob.as_ref().to_vec()));
        }
        Err(StoreError::Backend(anyhow::anyhow!(
            "secrets manager returned neither string nor binary value"
        )))
    }
}

/// Object store backed by S3.
#[derive(Debug, Clone)]
pub struct AwsObjectStore {
    client: aws_sdk_s3::Client,
}

impl AwsObjectStore {
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStore for AwsObjectStore {
    async fn put_object(&self, object: PutObject) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(object.bucket)
            .key(object.key)
            .set_content_type(object.content_type)
            .body(ByteStream::from(object.data))
            .send()
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e.into_service_error())))?;
        Ok(())
    }
}
