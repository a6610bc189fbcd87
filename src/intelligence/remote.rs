//! HTTP client for the organizer server.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ContentIntelligence, MediaKind, YouTubeContent};
use crate::error::IntelligenceError;

const IMAGE_INSTRUCTIONS: &str = "Extract all visible text and describe the image.";

#[derive(Deserialize)]
struct ClassifyResponse {
    #[serde(rename = "documentType", default)]
    document_type: Option<String>,
}

#[derive(Deserialize)]
struct FolderSuggestion {
    folder: String,
    #[serde(default)]
    score: f64,
}

#[derive(Deserialize)]
struct FoldersResponse {
    #[serde(default)]
    folders: Vec<FolderSuggestion>,
}

#[derive(Deserialize)]
struct TitleSuggestion {
    title: String,
}

#[derive(Deserialize)]
struct TitlesResponse {
    #[serde(default)]
    titles: Vec<TitleSuggestion>,
}

#[derive(Deserialize)]
struct TagSuggestion {
    tag: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Vec<TagSuggestion>,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

/// Content intelligence backed by the organizer server's JSON API.
pub struct RemoteIntelligence {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl RemoteIntelligence {
    /// Client for `base_url`; every request is cut off after `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, IntelligenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntelligenceError::RequestFailed {
                operation: "client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    /// POST a JSON body and decode the JSON response.
    async fn post_json<R: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<R, IntelligenceError> {
        debug!(operation, "Calling organizer server");
        let resp = self
            .client
            .post(self.api_url(path))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| IntelligenceError::RequestFailed {
                operation: operation.into(),
                reason: e.to_string(),
            })?;
        decode(operation, resp).await
    }
}

async fn decode<R: DeserializeOwned>(
    operation: &str,
    resp: reqwest::Response,
) -> Result<R, IntelligenceError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(IntelligenceError::Status {
            operation: operation.into(),
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<R>()
        .await
        .map_err(|e| IntelligenceError::InvalidResponse {
            operation: operation.into(),
            reason: e.to_string(),
        })
}

/// Highest-scoring suggestion; ties keep the later one.
fn best_folder(suggestions: Vec<FolderSuggestion>) -> Option<String> {
    suggestions
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .map(|s| s.folder)
}

/// Empty strings mean "no answer".
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl ContentIntelligence for RemoteIntelligence {
    async fn classify(
        &self,
        content: &str,
        file_name: &str,
        candidate_types: &[String],
    ) -> Result<Option<String>, IntelligenceError> {
        let resp: ClassifyResponse = self
            .post_json(
                "classify",
                "classify1",
                serde_json::json!({
                    "content": content,
                    "fileName": file_name,
                    "templateNames": candidate_types,
                }),
            )
            .await?;
        Ok(non_empty(resp.document_type))
    }

    async fn recommend_folder(
        &self,
        content: &str,
        file_name: &str,
        candidate_folders: &[String],
    ) -> Result<Option<String>, IntelligenceError> {
        let resp: FoldersResponse = self
            .post_json(
                "recommend_folder",
                "folders/v2",
                serde_json::json!({
                    "content": content,
                    "fileName": file_name,
                    "folders": candidate_folders,
                }),
            )
            .await?;
        Ok(non_empty(best_folder(resp.folders)))
    }

    async fn recommend_name(
        &self,
        content: &str,
        current_name: &str,
    ) -> Result<String, IntelligenceError> {
        let resp: TitlesResponse = self
            .post_json(
                "recommend_name",
                "title/v2",
                serde_json::json!({ "content": content, "fileName": current_name }),
            )
            .await?;
        non_empty(resp.titles.into_iter().next().map(|t| t.title)).ok_or_else(|| {
            IntelligenceError::InvalidResponse {
                operation: "recommend_name".into(),
                reason: "no titles returned".into(),
            }
        })
    }

    async fn recommend_tags(
        &self,
        content: &str,
        file_name: &str,
        existing_tags: &[String],
    ) -> Result<Vec<String>, IntelligenceError> {
        let resp: TagsResponse = self
            .post_json(
                "recommend_tags",
                "tags/v2",
                serde_json::json!({
                    "content": content,
                    "fileName": file_name,
                    "existingTags": existing_tags,
                }),
            )
            .await?;
        Ok(resp.tags.into_iter().map(|t| t.tag).collect())
    }

    async fn format(&self, content: &str, instructions: &str) -> Result<String, IntelligenceError> {
        let resp: ContentResponse = self
            .post_json(
                "format",
                "format",
                serde_json::json!({
                    "content": content,
                    "formattingInstruction": instructions,
                }),
            )
            .await?;
        Ok(resp.content)
    }

    async fn extract_from_media(
        &self,
        bytes: &[u8],
        kind: MediaKind,
        extension: &str,
    ) -> Result<String, IntelligenceError> {
        match kind {
            MediaKind::Image | MediaKind::Pdf => {
                let resp: TextResponse = self
                    .post_json(
                        "extract",
                        "vision",
                        serde_json::json!({
                            "image": BASE64.encode(bytes),
                            "instructions": IMAGE_INSTRUCTIONS,
                        }),
                    )
                    .await?;
                Ok(resp.text)
            }
            MediaKind::Audio => {
                let part = Part::bytes(bytes.to_vec())
                    .file_name(format!("audio.{extension}"))
                    .mime_str(&format!("audio/{extension}"))
                    .map_err(|_| IntelligenceError::UnsupportedMedia(extension.to_string()))?;
                let form = Form::new()
                    .part("audio", part)
                    .text("fileExtension", extension.to_string());
                let resp = self
                    .client
                    .post(self.api_url("transcribe"))
                    .bearer_auth(self.api_key.expose_secret())
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| IntelligenceError::RequestFailed {
                        operation: "transcribe".into(),
                        reason: e.to_string(),
                    })?;
                let resp: TextResponse = decode("transcribe", resp).await?;
                Ok(resp.text)
            }
        }
    }

    async fn fetch_youtube(&self, video_id: &str) -> Result<YouTubeContent, IntelligenceError> {
        self.post_json(
            "fetch_youtube",
            "youtube-transcript",
            serde_json::json!({ "videoId": video_id }),
        )
        .await
    }
}
