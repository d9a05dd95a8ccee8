//! External collaborators for artifact acquisition and decoding.
//!
//! The engine only needs three things from the outside world here: a way to
//! stream an artifact's bytes, a way to extract the archive, and a way to
//! decode the extracted result files. Each sits behind a trait so tests can
//! substitute in-memory fakes.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;

use crate::models::{AnalysisAlert, RawResults};

/// A streamable artifact body with its declared size, when the server sent
/// one.
pub struct ArtifactResponse {
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, anyhow::Result<Bytes>>,
}

#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<ArtifactResponse>;
}

#[async_trait]
pub trait ArtifactUnzipper: Send + Sync {
    async fn unzip(&self, zip_path: &Path, dest_dir: &Path) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ResultDecoder: Send + Sync {
    async fn decode_sarif(
        &self,
        path: &Path,
        file_link_prefix: &str,
    ) -> anyhow::Result<Vec<AnalysisAlert>>;

    async fn decode_bqrs(
        &self,
        path: &Path,
        file_link_prefix: &str,
        source_location_prefix: &str,
    ) -> anyhow::Result<RawResults>;
}

/// Plain HTTP GET transport over reqwest.
pub struct HttpArtifactTransport {
    client: reqwest::Client,
}

impl HttpArtifactTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpArtifactTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactTransport for HttpArtifactTransport {
    async fn fetch(&self, url: &str) -> anyhow::Result<ArtifactResponse> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(anyhow::Error::from);
        Ok(ArtifactResponse {
            content_length,
            body: Box::pin(body),
        })
    }
}
