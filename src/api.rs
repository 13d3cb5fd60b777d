//! Client for the AllDebrid v4 HTTP API.
//!
//! Every call is a single request authenticated with `apikey` and `agent`
//! query parameters. Nothing here retries; callers decide whether a failure
//! skips a link or aborts the batch.

use reqwest::multipart;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{DebridError, DebridResult};
use crate::models::{LinkEntry, MagnetRecord};

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<ApiErrorBody> for DebridError {
    fn from(body: ApiErrorBody) -> Self {
        DebridError::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

/// Decodes the `{status, data, error}` envelope shared by every endpoint.
fn decode_envelope<T: DeserializeOwned>(body: &str) -> DebridResult<T> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| DebridError::MalformedResponse(format!("not an API envelope: {e}")))?;

    match envelope.status.as_str() {
        "success" => {
            let data = envelope
                .data
                .ok_or_else(|| DebridError::MalformedResponse("missing `data`".to_string()))?;
            serde_json::from_value(data)
                .map_err(|e| DebridError::MalformedResponse(format!("unexpected `data`: {e}")))
        }
        "error" => Err(envelope
            .error
            .map(DebridError::from)
            .unwrap_or(DebridError::Remote {
                code: None,
                message: None,
            })),
        other => Err(DebridError::MalformedResponse(format!(
            "unknown status `{other}`"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct UnlockData {
    link: String,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(default)]
    magnets: Vec<UploadedMagnet>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UploadedMagnet {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct MagnetsData {
    magnets: OneOrMany<MagnetRecord>,
}

#[derive(Debug, Deserialize)]
struct SavedLinksData {
    #[serde(default)]
    links: Vec<LinkEntry>,
}

/// Result of a `.torrent` upload, one per file.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct UploadFilesData {
    #[serde(default)]
    files: Vec<UploadedFile>,
}

#[derive(Clone)]
pub struct DebridClient {
    client: Client,
    api_base: String,
    api_key: String,
    agent: String,
}

impl DebridClient {
    pub fn new(config: &Config) -> DebridResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            agent: config.agent.clone(),
        })
    }

    fn get(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.api_base, endpoint))
            .query(&[("apikey", &self.api_key), ("agent", &self.agent)])
    }

    async fn send<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> DebridResult<T> {
        debug!("api request {}", endpoint);
        let response = request.send().await?.error_for_status()?;
        let body = response.text().await?;
        decode_envelope(&body)
    }

    /// Turns a hoster link into a direct download URL.
    pub async fn unlock(&self, link: &str) -> DebridResult<String> {
        let request = self.get("/link/unlock").query(&[("link", link)]);
        let data: UnlockData = self.send("/link/unlock", request).await?;
        Ok(data.link)
    }

    /// Submits a magnet URI and returns the id the service assigned to it.
    pub async fn upload_magnet(&self, magnet: &str) -> DebridResult<u64> {
        let request = self.get("/magnet/upload").query(&[("magnets[]", magnet)]);
        let data: UploadData = self.send("/magnet/upload", request).await?;

        if let Some(first) = data.magnets.into_iter().next() {
            if let Some(error) = first.error {
                return Err(error.into());
            }
            if let Some(id) = first.id {
                return Ok(id);
            }
        }
        data.id
            .ok_or_else(|| DebridError::MalformedResponse("upload response has no magnet id".to_string()))
    }

    pub async fn magnet_status(&self, id: u64) -> DebridResult<MagnetRecord> {
        let request = self.get("/magnet/status").query(&[("id", id)]);
        let data: MagnetsData = self.send("/magnet/status", request).await?;
        data.magnets
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| DebridError::MalformedResponse(format!("no status for magnet {id}")))
    }

    pub async fn list_magnets(&self) -> DebridResult<Vec<MagnetRecord>> {
        let request = self.get("/magnet/status");
        let data: MagnetsData = self.send("/magnet/status", request).await?;
        Ok(data.magnets.into_vec())
    }

    pub async fn delete_magnet(&self, id: u64) -> DebridResult<()> {
        let request = self.get("/magnet/delete").query(&[("id", id)]);
        let _: serde_json::Value = self.send("/magnet/delete", request).await?;
        Ok(())
    }

    /// Uploads `.torrent` files as multipart `files[]`.
    pub async fn upload_torrent_files(&self, paths: &[&Path]) -> DebridResult<Vec<UploadedFile>> {
        let mut form = multipart::Form::new();
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| DebridError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.torrent".to_string());
            let part = multipart::Part::bytes(bytes).file_name(file_name);
            form = form.part("files[]", part);
        }

        let request = self
            .client
            .post(format!("{}/magnet/upload/file", self.api_base))
            .query(&[("apikey", &self.api_key), ("agent", &self.agent)])
            .multipart(form);
        let data: UploadFilesData = self.send("/magnet/upload/file", request).await?;
        Ok(data.files)
    }

    pub async fn saved_links(&self) -> DebridResult<Vec<LinkEntry>> {
        let request = self.get("/user/links");
        let data: SavedLinksData = self.send("/user/links", request).await?;
        Ok(data.links)
    }

    pub async fn save_link(&self, link: &str) -> DebridResult<()> {
        let request = self.get("/user/links/save").query(&[("links[]", link)]);
        let _: serde_json::Value = self.send("/user/links/save", request).await?;
        Ok(())
    }

    pub async fn delete_saved_link(&self, link: &str) -> DebridResult<()> {
        let request = self.get("/user/links/delete").query(&[("link", link)]);
        let _: serde_json::Value = self.send("/user/links/delete", request).await?;
        Ok(())
    }
}
