use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::token::{fetch_access_token, AccessToken};
use super::types::VertexConfig;
use crate::credentials::ServiceAccountKey;
use crate::error::ScanError;

const TEMPERATURE: f32 = 0.0;
const MAX_OUTPUT_TOKENS: u32 = 8192;
const TOP_P: f32 = 1.0;
const TOP_K: u32 = 1;

// OCR of arbitrary documents must not be refused on content grounds
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

fn ocr_prompt(language: &str) -> String {
    format!(
        "Perform OCR on this image. The text is mainly in {}. Extract all text exactly as it appears, preserving the layout and lines. Output ONLY the extracted text, no comments, no markdown.",
        language
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Handle to one hosted model. Owns the HTTP client, the credential
/// document, and a cached access token refreshed on expiry.
pub struct VertexClient {
    http: reqwest::Client,
    key: ServiceAccountKey,
    config: VertexConfig,
    token: Mutex<Option<AccessToken>>,
}

impl VertexClient {
    /// Build a handle, or `None` when construction fails. An absent
    /// handle is a normal reportable state for callers, not a panic.
    pub fn create(config: VertexConfig, key: ServiceAccountKey) -> Option<Self> {
        let http = match reqwest::Client::builder().build() {
            Ok(client) => client,
            Err(e) => {
                log::error!("failed to build HTTP client: {}", e);
                return None;
            }
        };

        log::info!(
            "model client bound to {} ({}, {})",
            config.model,
            config.project_id,
            config.location
        );

        Some(Self {
            http,
            key,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn default_language(&self) -> &str {
        &self.config.default_language
    }

    async fn bearer(&self) -> Result<String, ScanError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh() {
                return Ok(token.token.clone());
            }
        }

        let fresh = fetch_access_token(&self.http, &self.key).await?;
        let value = fresh.token.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// One generateContent call: image plus instruction in, verbatim text
    /// out. No retries and no fallback model.
    pub async fn extract_text(
        &self,
        image: &[u8],
        mime_type: &str,
        language: &str,
    ) -> Result<String, ScanError> {
        let bearer = self.bearer().await?;
        let request = build_request(image, mime_type, language);

        log::info!(
            "dispatching OCR request (model: {}, language: {}, {} bytes)",
            self.config.model,
            language,
            image.len()
        );

        let resp = self
            .http
            .post(self.config.endpoint_url())
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScanError::Upstream(format!("model request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ScanError::Upstream(format!(
                "model endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ScanError::Upstream(format!("failed to parse model response: {}", e)))?;

        text_from_response(parsed)
    }
}

fn build_request(image: &[u8], mime_type: &str, language: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![
                Part::Text {
                    text: ocr_prompt(language),
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: STANDARD.encode(image),
                    },
                },
            ],
        }],
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            top_p: TOP_P,
            top_k: TOP_K,
        },
        safety_settings: HARM_CATEGORIES
            .iter()
            .map(|category| SafetySetting {
                category: category.to_string(),
                threshold: "BLOCK_NONE".to_string(),
            })
            .collect(),
    }
}

fn text_from_response(resp: GenerateResponse) -> Result<String, ScanError> {
    if let Some(error) = resp.error {
        return Err(ScanError::Upstream(error.message));
    }

    let text: String = resp
        .candidates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.content)
        .filter_map(|c| c.parts)
        .flatten()
        .filter_map(|p| p.text)
        .collect();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ScanError::Upstream("model returned empty text".to_string()));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let body = serde_json::to_value(build_request(b"img", "image/png", "German")).unwrap();

        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("mainly in German"));
        assert!(prompt.contains("no markdown"));

        let inline = &body["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(inline["mimeType"], "image/png");
        assert_eq!(inline["data"], STANDARD.encode(b"img"));

        assert_eq!(body["generationConfig"]["temperature"], 0.0);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(body["generationConfig"]["topP"], 1.0);
        assert_eq!(body["generationConfig"]["topK"], 1);

        let safety = body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
    }

    #[test]
    fn test_response_text_is_joined_and_trimmed() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "parts": [ { "text": "  line one\n" }, { "text": "line two  " } ] }
            }]
        }))
        .unwrap();

        assert_eq!(text_from_response(resp).unwrap(), "line one\nline two");
    }

    #[test]
    fn test_empty_response_is_an_upstream_error() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [ { "text": "   " } ] } }]
        }))
        .unwrap();
        assert!(matches!(
            text_from_response(resp),
            Err(ScanError::Upstream(_))
        ));

        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(matches!(
            text_from_response(resp),
            Err(ScanError::Upstream(_))
        ));
    }

    #[test]
    fn test_error_payload_surfaces_upstream_message() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "error": { "message": "quota exceeded" }
        }))
        .unwrap();

        match text_from_response(resp) {
            Err(ScanError::Upstream(msg)) => assert_eq!(msg, "quota exceeded"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
