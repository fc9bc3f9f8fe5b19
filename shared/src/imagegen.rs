use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_MODEL_VERSION: &str = "imagen-3.0-generate-002";

/// Instance-metadata token endpoint, used when no static bearer token
/// is configured.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Why a generation attempt failed. The distinctions exist for logs;
/// the route boundary collapses all of them to one user-facing error.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to get access token: {0}")]
    Credential(String),
    #[error("prediction request failed: {0}")]
    Upstream(String),
    #[error("no image data received in the response")]
    MissingImage,
    #[error("prediction request could not be sent: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub project_id: String,
    pub location: String,
    pub model_version: String,
    /// Pre-configured bearer token. When absent, a token is fetched
    /// from the instance metadata service per call.
    pub auth_token: Option<String>,
}

impl GenerationConfig {
    pub fn from_env() -> Result<Self, GenerationError> {
        let project_id = std::env::var("GOOGLE_CLOUD_PROJECT_ID")
            .map_err(|_| GenerationError::Credential("GOOGLE_CLOUD_PROJECT_ID must be set".to_string()))?;
        Ok(Self {
            project_id,
            location: std::env::var("VERTEX_LOCATION").unwrap_or_else(|_| DEFAULT_LOCATION.to_string()),
            model_version: std::env::var("VERTEX_MODEL_VERSION")
                .unwrap_or_else(|_| DEFAULT_MODEL_VERSION.to_string()),
            auth_token: std::env::var("VERTEX_AUTH_TOKEN").ok(),
        })
    }

    pub fn predict_url(&self) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}:predict",
            loc = self.location,
            proj = self.project_id,
            model = self.model_version,
        )
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<PredictInstance>,
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance {
    prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// One generated image as a data URI, plus the model's refined prompt
/// when the endpoint echoes one back.
#[derive(Debug)]
pub struct GeneratedArtwork {
    pub image_url: String,
    pub enhanced_prompt: Option<String>,
}

fn predict_request(prompt: &str) -> PredictRequest {
    PredictRequest {
        instances: vec![PredictInstance {
            prompt: prompt.to_string(),
        }],
        // One image per call; the design has no batching.
        parameters: PredictParameters { sample_count: 1 },
    }
}

async fn fetch_access_token(http: &reqwest::Client) -> Result<String, GenerationError> {
    let response = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| GenerationError::Credential(e.to_string()))?;

    if !response.status().is_success() {
        return Err(GenerationError::Credential(format!(
            "metadata service returned {}",
            response.status()
        )));
    }

    let token: MetadataToken = response
        .json()
        .await
        .map_err(|e| GenerationError::Credential(e.to_string()))?;
    Ok(token.access_token)
}

/// Exchange a prompt for a generated image via the prediction endpoint.
pub async fn generate_image(
    http: &reqwest::Client,
    config: &GenerationConfig,
    prompt: &str,
) -> Result<GeneratedArtwork, GenerationError> {
    let access_token = match &config.auth_token {
        Some(token) => token.clone(),
        None => fetch_access_token(http).await?,
    };

    let response = http
        .post(config.predict_url())
        .bearer_auth(access_token)
        .json(&predict_request(prompt))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        tracing::error!("Prediction endpoint error ({}): {}", status, detail);
        return Err(GenerationError::Upstream(
            status.canonical_reason().unwrap_or("unknown status").to_string(),
        ));
    }

    let result: PredictResponse = response.json().await?;
    let prediction = result
        .predictions
        .into_iter()
        .next()
        .ok_or(GenerationError::MissingImage)?;

    let image_data = prediction
        .bytes_base64_encoded
        .filter(|data| !data.is_empty())
        .ok_or(GenerationError::MissingImage)?;

    Ok(GeneratedArtwork {
        image_url: format!("data:image/png;base64,{}", image_data),
        enhanced_prompt: prediction.prompt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GenerationConfig {
        GenerationConfig {
            project_id: "demo-project".to_string(),
            location: DEFAULT_LOCATION.to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            auth_token: Some("token".to_string()),
        }
    }

    #[test]
    fn predict_url_targets_the_regional_endpoint() {
        assert_eq!(
            config().predict_url(),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/demo-project/locations/us-central1/publishers/google/models/imagen-3.0-generate-002:predict"
        );
    }

    #[test]
    fn request_asks_for_exactly_one_sample() {
        let body = serde_json::to_value(predict_request("A cat")).unwrap();
        assert_eq!(body["instances"].as_array().unwrap().len(), 1);
        assert_eq!(body["instances"][0]["prompt"], "A cat");
        assert_eq!(body["parameters"]["sampleCount"], 1);
    }

    #[test]
    fn response_without_image_field_is_missing_image() {
        let raw = serde_json::json!({"predictions": [{"prompt": "A refined cat"}]});
        let parsed: PredictResponse = serde_json::from_value(raw).unwrap();
        let prediction = parsed.predictions.into_iter().next().unwrap();
        assert!(prediction.bytes_base64_encoded.is_none());
        assert_eq!(prediction.prompt.as_deref(), Some("A refined cat"));
    }

    #[test]
    fn empty_response_parses_to_no_predictions() {
        let parsed: PredictResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(parsed.predictions.is_empty());
    }
}
