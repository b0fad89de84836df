use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gateway::{ImageService, ResponsePart, SynthesizedImage, CREATE_MIME_TYPE};
use crate::model::{AspectRatio, ImageInput};
use crate::settings::Settings;

// ===== Imagen :predict =====

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
    aspect_ratio: AspectRatio,
    output_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Option<Vec<Prediction>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

// ===== Gemini :generateContent =====

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<ContentRequest<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct ContentRequest<'a> {
    role: &'static str,
    parts: Vec<PartRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PartRequest<'a> {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    data: &'a str,
    mime_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 2],
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    parts: Option<Vec<PartResponse>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<InlineDataResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataResponse {
    data: Option<String>,
    #[serde(alias = "mime_type")]
    mime_type: Option<String>,
}

/// Imagen for text-to-image, Gemini image model for edits.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    create_model: String,
    edit_model: String,
}

impl GeminiClient {
    /// A missing API key only fails once a request is made.
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: settings.api_key(),
            base_url: settings.base_url().to_string(),
            create_model: settings.create_model().to_string(),
            edit_model: settings.edit_model().to_string(),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, url: String, body: &B) -> Result<reqwest::Response> {
        let api_key = self.api_key.as_deref().context("Gemini API key not set")?;
        debug!(%url, "gemini request");
        let resp = self
            .http
            .post(url)
            .header("X-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .context("gemini request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(anyhow!("gemini error: HTTP {} {}", status, detail.trim()));
        }
        Ok(resp)
    }
}

impl ImageService for GeminiClient {
    async fn synthesize(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<SynthesizedImage>> {
        let url = format!("{}/models/{}:predict", self.base_url, self.create_model);
        let body = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                sample_count: 1,
                aspect_ratio,
                output_mime_type: CREATE_MIME_TYPE,
            },
        };
        let value: PredictResponse = self
            .post(url, &body)
            .await?
            .json()
            .await
            .context("imagen parse error")?;
        Ok(predictions_to_images(value))
    }

    async fn edit(&self, image: &ImageInput, instruction: &str) -> Result<Vec<ResponsePart>> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.edit_model
        );
        let body = GenerateContentRequest {
            contents: vec![ContentRequest {
                role: "user",
                parts: vec![
                    PartRequest::Inline {
                        inline_data: InlineData {
                            data: &image.base64,
                            mime_type: &image.mime_type,
                        },
                    },
                    PartRequest::Text { text: instruction },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: ["IMAGE", "TEXT"],
            },
        };
        let value: GenerateContentResponse = self
            .post(url, &body)
            .await?
            .json()
            .await
            .context("gemini parse error")?;
        Ok(first_candidate_parts(value))
    }
}

fn predictions_to_images(value: PredictResponse) -> Vec<SynthesizedImage> {
    value
        .predictions
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| {
            p.bytes_base64_encoded.map(|base64| SynthesizedImage {
                base64,
                mime_type: p.mime_type,
            })
        })
        .collect()
}

fn first_candidate_parts(value: GenerateContentResponse) -> Vec<ResponsePart> {
    let parts = value
        .candidates
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.content)
        .and_then(|c| c.parts)
        .unwrap_or_default();

    let mut out = Vec::new();
    for part in parts {
        if let Some(inline) = part.inline_data {
            if let Some(data) = inline.data {
                out.push(ResponsePart::InlineImage {
                    data,
                    mime_type: inline.mime_type.unwrap_or_else(|| "image/png".to_string()),
                });
            }
        }
        if let Some(text) = part.text {
            out.push(ResponsePart::Text(text));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn predict_body_carries_ratio_and_jpeg_output() {
        let body = PredictRequest {
            instances: vec![PredictInstance { prompt: "a red fox" }],
            parameters: PredictParameters {
                sample_count: 1,
                aspect_ratio: AspectRatio::Portrait,
                output_mime_type: "image/jpeg",
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "instances": [{ "prompt": "a red fox" }],
                "parameters": { "sampleCount": 1, "aspectRatio": "9:16", "outputMimeType": "image/jpeg" }
            })
        );
    }

    #[test]
    fn edit_body_sends_image_then_instruction() {
        let body = GenerateContentRequest {
            contents: vec![ContentRequest {
                role: "user",
                parts: vec![
                    PartRequest::Inline {
                        inline_data: InlineData {
                            data: "AAAA",
                            mime_type: "image/webp",
                        },
                    },
                    PartRequest::Text { text: "add a hat" },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: ["IMAGE", "TEXT"],
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "inlineData": { "data": "AAAA", "mimeType": "image/webp" } },
                        { "text": "add a hat" }
                    ]
                }],
                "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] }
            })
        );
    }

    #[test]
    fn predictions_without_bytes_are_skipped() {
        let value: PredictResponse = serde_json::from_value(json!({
            "predictions": [
                { "mimeType": "image/jpeg" },
                { "bytesBase64Encoded": "QUJD", "mimeType": "image/jpeg" }
            ]
        }))
        .unwrap();
        assert_eq!(
            predictions_to_images(value),
            vec![SynthesizedImage {
                base64: "QUJD".into(),
                mime_type: Some("image/jpeg".into())
            }]
        );

        let empty: PredictResponse = serde_json::from_value(json!({})).unwrap();
        assert!(predictions_to_images(empty).is_empty());
    }

    #[test]
    fn only_the_first_candidate_is_read() {
        let value: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [
                    { "text": "Sure." },
                    { "inlineData": { "mimeType": "image/png", "data": "iVBO" } }
                ] } },
                { "content": { "parts": [ { "text": "ignored" } ] } }
            ]
        }))
        .unwrap();
        assert_eq!(
            first_candidate_parts(value),
            vec![
                ResponsePart::Text("Sure.".into()),
                ResponsePart::InlineImage {
                    data: "iVBO".into(),
                    mime_type: "image/png".into()
                },
            ]
        );

        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({ "promptFeedback": { "blockReason": "SAFETY" } })).unwrap();
        assert!(first_candidate_parts(blocked).is_empty());
    }

    #[test]
    fn client_uses_configured_endpoint() {
        let settings = Settings {
            gemini_api_key: Some("test-key".into()),
            gemini_base_url: Some("http://127.0.0.1:1/v1beta/".into()),
            ..Settings::default()
        };
        let client = GeminiClient::new(&settings);
        assert_eq!(client.api_key.as_deref(), Some("test-key"));
        assert_eq!(client.base_url, "http://127.0.0.1:1/v1beta");
        assert_eq!(client.create_model, "imagen-4.0-generate-001");
    }
}
