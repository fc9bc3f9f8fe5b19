use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use visuagen_atoms::gallery::service::load_image;

use crate::datauri;

/// Fallback when the stored media type is absent or unrecognized.
const DEFAULT_EXTENSION: &str = "jpg";

/// Reduce arbitrary text to lowercase alphanumerics joined by single
/// hyphens. Idempotent, and total: empty input gives an empty string.
pub fn safe_filename(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    out
}

/// Map a media type to a download extension. Any image subtype maps to
/// itself except `jpeg`, which becomes `jpg`.
pub fn extension_for_media_type(media_type: Option<&str>) -> String {
    match media_type.and_then(|m| m.strip_prefix("image/")) {
        Some(subtype) if !subtype.is_empty() => subtype.replace("jpeg", "jpg"),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Build the attachment filename for a stored image: sanitized prompt
/// plus the extension declared by its data URI.
pub fn attachment_filename(base: &str, image_id: &str, media_type: Option<&str>) -> String {
    let mut name = safe_filename(base);
    if name.is_empty() {
        name = format!("image-{}", safe_filename(image_id));
    }
    format!("{}.{}", name, extension_for_media_type(media_type))
}

/// HTTP Handler: GET /api/images/{id}/download
///
/// Serves the stored bytes with a Content-Disposition that triggers a
/// browser save-as. A row whose payload fails to decode is a single
/// download failure; no partial body is sent.
pub async fn download_image_handler(
    client: &DynamoClient,
    table_name: &str,
    image_id: &str,
) -> Result<Response<Body>, Error> {
    let image = match load_image(client, table_name, image_id).await {
        Ok(image) => image,
        Err(e) if e == "Image not found" => {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header("Content-Type", "application/json")
                .body(serde_json::json!({"error": e}).to_string().into())
                .map_err(Box::new)?)
        }
        Err(e) => {
            tracing::error!("Failed to load image {}: {}", image_id, e);
            return Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("Content-Type", "application/json")
                .body(
                    serde_json::json!({"error": "Failed to download image"})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?);
        }
    };

    match datauri::decode(&image.image_data) {
        Ok((media_type, bytes)) => {
            let filename = attachment_filename(&image.prompt, &image.image_id, Some(&media_type));
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", media_type)
                .header(
                    "Content-Disposition",
                    format!("attachment; filename=\"{}\"", filename),
                )
                .body(Body::Binary(bytes))
                .map_err(Box::new)?)
        }
        Err(e) => {
            tracing::error!("Stored payload for image {} failed to decode: {}", image_id, e);
            Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("Content-Type", "application/json")
                .body(
                    serde_json::json!({"error": "Failed to download image"})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_collapses_to_single_hyphens() {
        assert_eq!(safe_filename("A cat, sitting!"), "a-cat-sitting");
        assert_eq!(safe_filename("  --hello--  world--  "), "hello-world");
        assert_eq!(safe_filename("UPPER lower 123"), "upper-lower-123");
    }

    #[test]
    fn safe_filename_is_total_and_idempotent() {
        for input in ["", "***", "A cat", "-a-", "émoji 🎨 prompt", "already-safe-slug"] {
            let once = safe_filename(input);
            assert_eq!(safe_filename(&once), once, "input: {:?}", input);
            assert!(
                once.is_empty()
                    || (once
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                        && !once.starts_with('-')
                        && !once.ends_with('-')
                        && !once.contains("--")),
                "input: {:?} output: {:?}",
                input,
                once
            );
        }
    }

    #[test]
    fn extension_prefers_declared_subtype() {
        assert_eq!(extension_for_media_type(Some("image/png")), "png");
        assert_eq!(extension_for_media_type(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for_media_type(Some("image/webp")), "webp");
    }

    #[test]
    fn extension_falls_back_to_jpg() {
        assert_eq!(extension_for_media_type(None), "jpg");
        assert_eq!(extension_for_media_type(Some("text/plain")), "jpg");
        assert_eq!(extension_for_media_type(Some("image/")), "jpg");
    }

    #[test]
    fn attachment_filename_never_empty() {
        assert_eq!(
            attachment_filename("A cat", "abc-123", Some("image/png")),
            "a-cat.png"
        );
        assert_eq!(
            attachment_filename("***", "abc-123", None),
            "image-abc-123.jpg"
        );
    }
}
