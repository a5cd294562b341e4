use async_trait::async_trait;

/// Failure from the external blob store.
#[derive(Debug, thiserror::Error)]
#[error("blob store error: {0}")]
pub struct BlobError(pub String);

/// Capability handed to the core by the hosting process. Upload and URL
/// issuance happen upstream; the core only ever asks for deletion.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Delete a stored blob by its public URL.
    async fn delete(&self, url: &str) -> Result<(), BlobError>;
}

/// A blob store that ignores deletes. Useful when attachments are disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBlobStore;

#[async_trait]
impl BlobStore for NoopBlobStore {
    async fn delete(&self, _url: &str) -> Result<(), BlobError> {
        Ok(())
    }
}
