//! Featured-image generation through the Imagen `predict` endpoint of the
//! Gemini REST API.

use crate::error::{PipelineError, Result};
use crate::utils::truncate_for_log;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub const IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Anything that can paint a featured image from alt text.
pub trait GenerateImage {
    /// PNG bytes for an image matching `alt_text`.
    async fn generate_image(&self, alt_text: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64: Option<String>,
}

#[derive(Clone)]
pub struct ImagenClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for ImagenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagenClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ImagenClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: IMAGEN_MODEL.to_string(),
            base_url: GEMINI_BASE.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:predict", self.base_url, self.model)
    }
}

fn image_prompt(alt_text: &str) -> String {
    format!(
        "Professional stock photo for a law firm blog article. Subject: {alt_text}. \
         Clean modern look, empathetic tone, photorealistic, no text, watermarks or logos."
    )
}

/// First image in a `predict` reply, decoded.
fn decode_prediction(body: &str) -> Result<Vec<u8>> {
    let resp: PredictResponse = serde_json::from_str(body)?;
    let encoded = resp
        .predictions
        .into_iter()
        .find_map(|p| p.bytes_base64)
        .ok_or_else(|| PipelineError::AiService("no image in response".into()))?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| PipelineError::AiService(format!("bad image encoding: {e}")))
}

impl GenerateImage for ImagenClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn generate_image(&self, alt_text: &str) -> Result<Vec<u8>> {
        let t0 = Instant::now();
        let body = json!({
            "instances": [{ "prompt": image_prompt(alt_text) }],
            "parameters": { "sampleCount": 1 },
        });
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::AiService(format!("image request failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::AiService(format!("image response unreadable: {e}")))?;
        if !status.is_success() {
            warn!(%status, body = %truncate_for_log(&text, 300), "Image generation rejected");
            return Err(PipelineError::AiService(format!("image generation HTTP {status}")));
        }
        let bytes = decode_prediction(&text)?;
        info!(bytes = bytes.len(), elapsed_ms = t0.elapsed().as_millis(), "Image generated");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_first_prediction() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake");
        let body = format!(
            r#"{{"predictions":[{{"mimeType":"image/png","bytesBase64Encoded":"{encoded}"}}]}}"#
        );
        assert_eq!(decode_prediction(&body).unwrap(), b"\x89PNG fake");
    }

    #[test]
    fn empty_predictions_is_an_ai_error() {
        assert!(matches!(
            decode_prediction(r#"{"predictions":[]}"#),
            Err(PipelineError::AiService(_))
        ));
        assert!(matches!(decode_prediction("{}"), Err(PipelineError::AiService(_))));
    }

    #[test]
    fn endpoint_names_the_model() {
        let c = ImagenClient::new(reqwest::Client::new(), "k");
        assert!(c.endpoint().ends_with("/models/imagen-4.0-generate-001:predict"));
        assert!(!format!("{c:?}").contains("\"k\""));
    }

    #[test]
    fn prompt_carries_alt_text() {
        assert!(image_prompt("Injured worker at a warehouse").contains("Injured worker at a warehouse"));
    }
}
