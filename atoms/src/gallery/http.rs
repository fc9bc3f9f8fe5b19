use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error as LambdaError, Response};

use super::service::{load_all_images, load_images_for_user, paginate};

/// HTTP Handler: GET /api/gallery?limit=&offset=
///
/// The full row set is fetched and sorted before the window is applied,
/// so `total` always reflects the table at request time. An empty store
/// is a 404, distinct from a valid page that happens to be empty.
pub async fn list_gallery_handler(
    client: &DynamoClient,
    table_name: &str,
    limit: usize,
    offset: usize,
) -> Result<Response<Body>, LambdaError> {
    match load_all_images(client, table_name).await {
        Ok(images) if images.is_empty() => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Content-Type", "application/json")
            .body(
                serde_json::json!({"error": "No images found"})
                    .to_string()
                    .into(),
            )
            .map_err(Box::new)?),
        Ok(images) => {
            let page = paginate(images, limit, offset);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(serde_json::to_string(&page)?.into())
                .map_err(Box::new)?)
        }
        Err(e) => {
            tracing::error!("Failed to fetch gallery images: {}", e);
            Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("Content-Type", "application/json")
                .body(
                    serde_json::json!({"error": "Failed to fetch gallery images"})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?)
        }
    }
}

/// HTTP Handler: GET /api/profile/images?limit=&offset=
///
/// Same envelope as the gallery page, scoped to the authenticated user.
/// A user with no images gets an empty page, not a 404.
pub async fn list_user_images_handler(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    limit: usize,
    offset: usize,
) -> Result<Response<Body>, LambdaError> {
    match load_images_for_user(client, table_name, user_id).await {
        Ok(images) => {
            let page = paginate(images, limit, offset);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(serde_json::to_string(&page)?.into())
                .map_err(Box::new)?)
        }
        Err(e) => {
            tracing::error!("Failed to fetch images for user {}: {}", user_id, e);
            Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("Content-Type", "application/json")
                .body(
                    serde_json::json!({"error": "Failed to fetch profile images"})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?)
        }
    }
}
