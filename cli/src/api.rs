use std::future::Future;

use anyhow::Context;
use reqwest::{header::CONTENT_TYPE, multipart, Response, StatusCode, Url};
use thiserror::Error;

use crate::types::{
    AudioFormat, ExtendBody, FileUploaded, GenerateBody, GenerationOutput, ModelCommand,
    ModelDescriptor, ModelEntry, ResponseShape, TrackCreated,
};

const DEFAULT_BASE_URL: &str = "http://localhost:5000/";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend responded with status {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The resource exists logically but is not available yet.
    #[error("{0} is not ready yet")]
    NotReady(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("backend task aborted: {0}")]
    Aborted(String),
}

/// The remote inference service as the session sees it.
pub trait Backend: Send + Sync + 'static {
    fn list_models(&self) -> impl Future<Output = Result<Vec<ModelDescriptor>, BackendError>> + Send;

    fn load_model(&self, id: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn unload_model(&self, id: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn generate(
        &self,
        body: &GenerateBody,
    ) -> impl Future<Output = Result<GenerationOutput, BackendError>> + Send;

    fn extend(
        &self,
        body: &ExtendBody,
    ) -> impl Future<Output = Result<GenerationOutput, BackendError>> + Send;

    fn fetch_audio(&self, track_id: &str)
        -> impl Future<Output = Result<Vec<u8>, BackendError>> + Send;

    fn upload(
        &self,
        name: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    response_shape: ResponseShape,
    audio_format: AudioFormat,
}

impl Client {
    pub fn new(
        base_url: Option<&str>,
        response_shape: ResponseShape,
        audio_format: AudioFormat,
    ) -> anyhow::Result<Self> {
        let raw = base_url.unwrap_or(DEFAULT_BASE_URL);
        // Url::join drops the last path segment unless the base ends with a slash.
        let normalized = if raw.ends_with('/') { raw.to_string() } else { format!("{raw}/") };
        let url = Url::parse(&normalized).context("invalid backend base URL")?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url: url, response_shape, audio_format })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join("api/")
            .and_then(|api| api.join(path))
            .map_err(|err| BackendError::Decode(format!("invalid endpoint {path}: {err}")))
    }

    async fn generation_output(&self, response: Response) -> Result<GenerationOutput, BackendError> {
        let response = ensure_success(response).await?;
        let inline = match self.response_shape {
            ResponseShape::Inline => true,
            ResponseShape::Identifier => false,
            ResponseShape::Auto => !is_json(&response),
        };
        if inline {
            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Err(BackendError::Decode("empty audio payload".into()));
            }
            return Ok(GenerationOutput::Inline(bytes.to_vec()));
        }
        let created: TrackCreated = response
            .json()
            .await
            .map_err(|err| BackendError::Decode(format!("track id missing: {err}")))?;
        Ok(GenerationOutput::Pending { track_id: created.id })
    }
}

impl Backend for Client {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        let response = self.http.get(self.endpoint("models")?).send().await?;
        let entries: Vec<ModelEntry> = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|err| BackendError::Decode(format!("model list: {err}")))?;
        Ok(entries.into_iter().map(ModelEntry::into_descriptor).collect())
    }

    async fn load_model(&self, id: &str) -> Result<(), BackendError> {
        let url = self.endpoint("models/load")?;
        let response = self.http.post(url).json(&ModelCommand { id }).send().await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn unload_model(&self, id: &str) -> Result<(), BackendError> {
        let url = self.endpoint("models/unload")?;
        let response = self.http.post(url).json(&ModelCommand { id }).send().await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn generate(&self, body: &GenerateBody) -> Result<GenerationOutput, BackendError> {
        let response = self.http.post(self.endpoint("generate")?).json(body).send().await?;
        self.generation_output(response).await
    }

    async fn extend(&self, body: &ExtendBody) -> Result<GenerationOutput, BackendError> {
        let response = self.http.post(self.endpoint("extend")?).json(body).send().await?;
        self.generation_output(response).await
    }

    async fn fetch_audio(&self, track_id: &str) -> Result<Vec<u8>, BackendError> {
        let mut url = self.endpoint(&format!("tracks/{track_id}/audio"))?;
        url.query_pairs_mut().append_pair("format", self.audio_format.extension());
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotReady(format!("audio for track {track_id}")));
        }
        let bytes = ensure_success(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(BackendError::NotReady(format!("audio for track {track_id}")));
        }
        Ok(bytes.to_vec())
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, BackendError> {
        let part = multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = multipart::Form::new().part("file", part);
        let response = self.http.post(self.endpoint("upload")?).multipart(form).send().await?;
        let uploaded: FileUploaded = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|err| BackendError::Decode(format!("file id missing: {err}")))?;
        Ok(uploaded.id)
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Status { status, message: error_message(&message) })
}

/// Pulls `error` out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_endpoints_under_api_prefix() {
        let client =
            Client::new(Some("http://studio.local:5000"), ResponseShape::Auto, AudioFormat::Wav)
                .unwrap();
        assert_eq!(client.base_url().as_str(), "http://studio.local:5000/");
        assert_eq!(
            client.endpoint("models/load").unwrap().as_str(),
            "http://studio.local:5000/api/models/load"
        );
        assert_eq!(
            client.endpoint("tracks/t1/audio").unwrap().as_str(),
            "http://studio.local:5000/api/tracks/t1/audio"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let client =
            Client::new(Some("http://host/studio/"), ResponseShape::Auto, AudioFormat::Mp3)
                .unwrap();
        assert_eq!(client.endpoint("generate").unwrap().as_str(), "http://host/studio/api/generate");
    }

    #[test]
    fn extracts_flask_error_messages() {
        assert_eq!(error_message(r#"{"error": "Unknown model"}"#), "Unknown model");
        assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
    }
}
