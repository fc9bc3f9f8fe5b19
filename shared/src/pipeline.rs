use std::future::Future;

use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;
use thiserror::Error as ThisError;
use visuagen_atoms::gallery::model::GeneratePayload;
use visuagen_atoms::gallery::service::save_generated_image;
use visuagen_atoms::users::service::load_user;

use crate::datauri;
use crate::imagegen::{self, GeneratedArtwork, GenerationConfig, GenerationError};
use crate::removal;

/// Which pipeline stage failed. The route boundary maps these to the
/// user-facing messages; processing failures surface distinctly so a
/// caller can tell them apart from generation failures.
#[derive(Debug, ThisError)]
pub enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("image processing failed: {0}")]
    Processing(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_prompt: Option<String>,
}

/// Steps 2-4 of the pipeline: decode the generator's data URI, strip
/// the background, re-encode as a PNG data URI. Pure with respect to
/// storage; nothing is persisted here.
pub fn process_raw_image(image_url: &str) -> Result<String, String> {
    let (_, raw_bytes) = datauri::decode(image_url)?;
    let processed = removal::remove_background(&raw_bytes)?;
    Ok(datauri::encode("image/png", &processed))
}

/// The strictly ordered generation pipeline: generate, process,
/// persist. `persist` only ever receives the post-processed data URI;
/// a failure in generation or processing returns before it is called,
/// so the raw generator output can never reach storage.
pub async fn run_pipeline<'a, G, GFut, P, PFut>(
    prompt: &'a str,
    generate: G,
    persist: P,
) -> Result<GenerateResponse, PipelineError>
where
    G: FnOnce(&'a str) -> GFut,
    GFut: Future<Output = Result<GeneratedArtwork, GenerationError>>,
    P: FnOnce(&'a str, String, Option<String>) -> PFut,
    PFut: Future<Output = Result<(), String>>,
{
    // Step 1: prompt -> raw generated image.
    let artwork = generate(prompt).await?;

    // Steps 2-4: background removal. Aborting here leaves the table
    // untouched; no raw image is ever written.
    let processed_url =
        process_raw_image(&artwork.image_url).map_err(PipelineError::Processing)?;

    // Step 5: persist the processed artifact.
    persist(prompt, processed_url.clone(), artwork.enhanced_prompt.clone())
        .await
        .map_err(PipelineError::Persistence)?;

    Ok(GenerateResponse {
        image_url: processed_url,
        enhanced_prompt: artwork.enhanced_prompt,
    })
}

/// HTTP Handler: POST /api/generate-image
///
/// The response is only produced after a successful persist, so the
/// caller never sees an image the table does not have.
pub async fn generate_image_handler(
    dynamo_client: &DynamoClient,
    http_client: &reqwest::Client,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let payload: GeneratePayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Invalid generate-image payload: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid request body");
        }
    };

    let config = match GenerationConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Generation config error: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate image");
        }
    };

    let result = run_pipeline(
        &payload.prompt,
        |prompt| imagegen::generate_image(http_client, &config, prompt),
        |prompt, processed_url, enhanced_prompt| async move {
            let user_name = match load_user(dynamo_client, table_name, user_id).await {
                Ok(user) => user.user_name,
                Err(e) => {
                    // Denormalized display name only; an unresolvable
                    // profile should not lose the generated image.
                    tracing::warn!("Could not resolve user {} for image row: {}", user_id, e);
                    String::new()
                }
            };

            save_generated_image(
                dynamo_client,
                table_name,
                user_id,
                &user_name,
                &processed_url,
                prompt,
                enhanced_prompt.as_deref(),
            )
            .await
            .map(|_| ())
        },
    )
    .await;

    match result {
        Ok(response) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&response)?.into())
            .map_err(Box::new)?),
        Err(e @ PipelineError::Processing(_)) => {
            tracing::error!("Error processing image: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process image")
        }
        Err(e) => {
            tracing::error!("Error generating image: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate image")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(serde_json::json!({"error": message}).to_string().into())
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::cell::RefCell;
    use std::io::Cursor;

    fn raw_data_uri() -> String {
        let img = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        datauri::encode("image/png", &bytes)
    }

    #[test]
    fn processing_yields_a_png_data_uri() {
        let processed = process_raw_image(&raw_data_uri()).unwrap();
        assert!(processed.starts_with("data:image/png;base64,"));

        let (media_type, bytes) = datauri::decode(&processed).unwrap();
        assert_eq!(media_type, "image/png");
        assert!(!bytes.is_empty());
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    #[test]
    fn plain_urls_abort_before_removal() {
        assert!(process_raw_image("https://example.com/cat.png").is_err());
    }

    #[test]
    fn undecodable_payload_aborts_the_pipeline() {
        let uri = datauri::encode("image/png", b"definitely not a png");
        assert!(process_raw_image(&uri).is_err());
    }

    #[tokio::test]
    async fn generation_failure_means_zero_persist_calls() {
        let persist_calls = RefCell::new(0usize);

        let result = run_pipeline(
            "A cat",
            |_prompt| async { Err::<GeneratedArtwork, _>(GenerationError::MissingImage) },
            |_prompt, _url, _enhanced| async {
                *persist_calls.borrow_mut() += 1;
                Ok::<(), String>(())
            },
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Generation(_))));
        assert_eq!(*persist_calls.borrow(), 0);
    }

    #[tokio::test]
    async fn processing_failure_means_zero_persist_calls() {
        let persist_calls = RefCell::new(0usize);

        // The generator hands back a plain URL instead of a data URI,
        // so background removal never produces a processed blob.
        let result = run_pipeline(
            "A cat",
            |_prompt| async {
                Ok(GeneratedArtwork {
                    image_url: "https://example.com/cat.png".to_string(),
                    enhanced_prompt: None,
                })
            },
            |_prompt, _url, _enhanced| async {
                *persist_calls.borrow_mut() += 1;
                Ok::<(), String>(())
            },
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Processing(_))));
        assert_eq!(*persist_calls.borrow(), 0);
    }

    #[tokio::test]
    async fn success_persists_exactly_once_with_the_processed_artifact() {
        let persisted: RefCell<Vec<(String, String, Option<String>)>> = RefCell::new(Vec::new());
        let raw = raw_data_uri();

        let result = run_pipeline(
            "A cat",
            |_prompt| async {
                Ok(GeneratedArtwork {
                    image_url: raw.clone(),
                    enhanced_prompt: Some("A refined cat".to_string()),
                })
            },
            |prompt, url, enhanced| async {
                persisted
                    .borrow_mut()
                    .push((prompt.to_string(), url, enhanced));
                Ok::<(), String>(())
            },
        )
        .await
        .unwrap();

        let calls = persisted.borrow();
        assert_eq!(calls.len(), 1);
        let (prompt, stored_url, enhanced) = &calls[0];
        assert_eq!(prompt, "A cat");
        assert_eq!(enhanced.as_deref(), Some("A refined cat"));

        // The stored artifact is the post-processed image, not the raw
        // generator output, and matches what the caller is shown.
        assert_ne!(stored_url, &raw);
        assert!(stored_url.starts_with("data:image/png;base64,"));
        assert!(image::load_from_memory(&datauri::decode(stored_url).unwrap().1).is_ok());
        assert_eq!(stored_url, &result.image_url);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_as_such() {
        let result = run_pipeline(
            "A cat",
            |_prompt| async {
                Ok(GeneratedArtwork {
                    image_url: raw_data_uri(),
                    enhanced_prompt: None,
                })
            },
            |_prompt, _url, _enhanced| async { Err("DynamoDB put_item error".to_string()) },
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Persistence(_))));
    }

    #[test]
    fn generate_response_omits_absent_enhanced_prompt() {
        let with = serde_json::to_value(GenerateResponse {
            image_url: "data:image/png;base64,AAAA".to_string(),
            enhanced_prompt: Some("refined".to_string()),
        })
        .unwrap();
        assert_eq!(with["enhancedPrompt"], "refined");

        let without = serde_json::to_value(GenerateResponse {
            image_url: "data:image/png;base64,AAAA".to_string(),
            enhanced_prompt: None,
        })
        .unwrap();
        assert!(without.get("enhancedPrompt").is_none());
        assert!(without.get("imageUrl").is_some());
    }
}
