//! File storage. Reads are available everywhere, upload URLs and deletes in
//! mutations and actions, and blob transfer only in actions.

use std::sync::Arc;

use bytes::Bytes;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    errors::FileNotFound,
    host::{
        StorageActionHost,
        StorageReaderHost,
        StorageWriterHost,
    },
    types::StorageId,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub storage_id: StorageId,
    /// Base64 encoded SHA-256 of the contents.
    pub sha256: String,
    pub size: u64,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct StorageReader {
    host: Arc<dyn StorageReaderHost>,
}

impl StorageReader {
    pub fn new(host: Arc<dyn StorageReaderHost>) -> Self {
        Self { host }
    }

    /// A URL serving the file, or `None` if it doesn't exist.
    pub async fn get_url(&self, id: &StorageId) -> anyhow::Result<Option<String>> {
        self.host.get_url(id).await
    }

    pub async fn get_url_or_fail(
        &self,
        id: &StorageId,
    ) -> anyhow::Result<Result<String, FileNotFound>> {
        Ok(self
            .host
            .get_url(id)
            .await?
            .ok_or_else(|| FileNotFound { id: id.clone() }))
    }

    pub async fn get_metadata(
        &self,
        id: &StorageId,
    ) -> anyhow::Result<Result<FileMetadata, FileNotFound>> {
        Ok(self
            .host
            .get_metadata(id)
            .await?
            .ok_or_else(|| FileNotFound { id: id.clone() }))
    }
}

#[derive(Clone)]
pub struct StorageWriter {
    host: Arc<dyn StorageWriterHost>,
    reader: StorageReader,
}

impl StorageWriter {
    pub fn new(host: Arc<dyn StorageWriterHost>) -> Self {
        let reader = StorageReader::new(Arc::new(WriterReads(host.clone())));
        Self { host, reader }
    }

    pub fn reader(&self) -> &StorageReader {
        &self.reader
    }

    pub async fn get_url(&self, id: &StorageId) -> anyhow::Result<Option<String>> {
        self.reader.get_url(id).await
    }

    pub async fn get_url_or_fail(
        &self,
        id: &StorageId,
    ) -> anyhow::Result<Result<String, FileNotFound>> {
        self.reader.get_url_or_fail(id).await
    }

    pub async fn get_metadata(
        &self,
        id: &StorageId,
    ) -> anyhow::Result<Result<FileMetadata, FileNotFound>> {
        self.reader.get_metadata(id).await
    }

    /// A short-lived URL a client can POST a file to. The upload's response
    /// carries the new `StorageId`.
    pub async fn generate_upload_url(&self) -> anyhow::Result<String> {
        self.host.generate_upload_url().await
    }

    /// Deleting a missing file is not an error.
    pub async fn delete(&self, id: &StorageId) -> anyhow::Result<()> {
        self.host.delete(id).await
    }
}

#[derive(Clone)]
pub struct StorageActionWriter {
    host: Arc<dyn StorageActionHost>,
    writer: StorageWriter,
}

impl StorageActionWriter {
    pub fn new(host: Arc<dyn StorageActionHost>) -> Self {
        let writer = StorageWriter::new(Arc::new(ActionWrites(host.clone())));
        Self { host, writer }
    }

    pub fn writer(&self) -> &StorageWriter {
        &self.writer
    }

    pub async fn get_url(&self, id: &StorageId) -> anyhow::Result<Option<String>> {
        self.writer.get_url(id).await
    }

    pub async fn get_url_or_fail(
        &self,
        id: &StorageId,
    ) -> anyhow::Result<Result<String, FileNotFound>> {
        self.writer.get_url_or_fail(id).await
    }

    pub async fn get_metadata(
        &self,
        id: &StorageId,
    ) -> anyhow::Result<Result<FileMetadata, FileNotFound>> {
        self.writer.get_metadata(id).await
    }

    pub async fn generate_upload_url(&self) -> anyhow::Result<String> {
        self.writer.generate_upload_url().await
    }

    pub async fn delete(&self, id: &StorageId) -> anyhow::Result<()> {
        self.writer.delete(id).await
    }

    /// The file's contents.
    pub async fn get(&self, id: &StorageId) -> anyhow::Result<Result<Bytes, FileNotFound>> {
        Ok(self
            .host
            .get(id)
            .await?
            .ok_or_else(|| FileNotFound { id: id.clone() }))
    }

    pub async fn store(
        &self,
        blob: Bytes,
        content_type: Option<String>,
    ) -> anyhow::Result<StorageId> {
        self.host.store(blob, content_type).await
    }
}

struct WriterReads(Arc<dyn StorageWriterHost>);

#[async_trait::async_trait]
impl StorageReaderHost for WriterReads {
    async fn get_url(&self, id: &StorageId) -> anyhow::Result<Option<String>> {
        self.0.get_url(id).await
    }

    async fn get_metadata(&self, id: &StorageId) -> anyhow::Result<Option<FileMetadata>> {
        self.0.get_metadata(id).await
    }
}

struct ActionWrites(Arc<dyn StorageActionHost>);

#[async_trait::async_trait]
impl StorageReaderHost for ActionWrites {
    async fn get_url(&self, id: &StorageId) -> anyhow::Result<Option<String>> {
        self.0.get_url(id).await
    }

    async fn get_metadata(&self, id: &StorageId) -> anyhow::Result<Option<FileMetadata>> {
        self.0.get_metadata(id).await
    }
}

#[async_trait::async_trait]
impl StorageWriterHost for ActionWrites {
    async fn generate_upload_url(&self) -> anyhow::Result<String> {
        self.0.generate_upload_url().await
    }

    async fn delete(&self, id: &StorageId) -> anyhow::Result<()> {
        self.0.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use crate::{
        context::ActionCtx,
        definition::SchemaDefinition,
        errors::FileNotFound,
        testing::MockHost,
    };

    #[tokio::test]
    async fn test_store_and_delete() -> anyhow::Result<()> {
        let host = MockHost::new(SchemaDefinition::new());
        let ctx = ActionCtx::new(host.action_ctx());
        let storage = ctx.storage();

        let id = storage
            .store(Bytes::from_static(b"hello"), Some("text/plain".to_string()))
            .await?;
        assert_eq!(storage.get(&id).await??, Bytes::from_static(b"hello"));
        let metadata = storage.get_metadata(&id).await??;
        assert_eq!(metadata.size, 5);
        assert_eq!(metadata.sha256, "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=");
        assert_eq!(metadata.content_type.as_deref(), Some("text/plain"));
        assert!(storage.get_url_or_fail(&id).await?.is_ok());

        storage.delete(&id).await?;
        assert_eq!(
            storage.get(&id).await?,
            Err(FileNotFound { id: id.clone() })
        );
        assert_eq!(storage.get_url(&id).await?, None);
        assert!(storage.writer().reader().get_metadata(&id).await?.is_err());
        Ok(())
    }
}
