use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;

use super::model::{GalleryImage, GalleryPage, GalleryUser, GeneratedImage, Pagination};

pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Persist a processed image at the end of a generation run.
/// The caller guarantees `image_data` is the post-processed artifact;
/// raw generator output never reaches this function.
pub async fn save_generated_image(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    user_name: &str,
    image_data: &str,
    prompt: &str,
    enhanced_prompt: Option<&str>,
) -> Result<GeneratedImage, String> {
    let image_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let sk = format!("IMAGE#{}", image_id);

    let mut builder = client
        .put_item()
        .table_name(table_name)
        .item("PK", AttributeValue::S("IMAGE".to_string()))
        .item("SK", AttributeValue::S(sk))
        .item("user_id", AttributeValue::S(user_id.to_string()))
        .item("user_name", AttributeValue::S(user_name.to_string()))
        .item("image_data", AttributeValue::S(image_data.to_string()))
        .item("prompt", AttributeValue::S(prompt.to_string()))
        .item("created_at", AttributeValue::S(now.clone()));

    if let Some(enhanced) = enhanced_prompt {
        builder = builder.item("enhanced_prompt", AttributeValue::S(enhanced.to_string()));
    }

    builder
        .send()
        .await
        .map_err(|e| format!("DynamoDB put_item error: {}", e))?;

    Ok(GeneratedImage {
        image_id,
        user_id: user_id.to_string(),
        user_name: user_name.to_string(),
        image_data: image_data.to_string(),
        prompt: prompt.to_string(),
        enhanced_prompt: enhanced_prompt.map(|s| s.to_string()),
        created_at: now,
    })
}

/// Load every stored image, newest first. Ties on `created_at` keep
/// their stored order (stable sort).
pub async fn load_all_images(
    client: &DynamoClient,
    table_name: &str,
) -> Result<Vec<GeneratedImage>, String> {
    let mut images = Vec::new();
    let mut exclusive_start_key = None;

    loop {
        let result = client
            .query()
            .table_name(table_name)
            .key_condition_expression("PK = :pk")
            .expression_attribute_values(":pk", AttributeValue::S("IMAGE".to_string()))
            .set_exclusive_start_key(exclusive_start_key)
            .send()
            .await
            .map_err(|e| format!("DynamoDB query error: {}", e))?;

        for item in result.items() {
            if let Some(sk) = item.get("SK").and_then(|v| v.as_s().ok()) {
                if let Some(image_id) = sk.strip_prefix("IMAGE#") {
                    images.push(GeneratedImage {
                        image_id: image_id.to_string(),
                        user_id: item.get("user_id").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
                        user_name: item.get("user_name").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
                        image_data: item.get("image_data").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
                        prompt: item.get("prompt").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
                        enhanced_prompt: item.get("enhanced_prompt").and_then(|v| v.as_s().ok()).map(|s| s.to_string()),
                        created_at: item.get("created_at").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
                    });
                }
            }
        }

        match result.last_evaluated_key() {
            Some(key) if !key.is_empty() => {
                exclusive_start_key = Some(key.clone());
            }
            _ => break,
        }
    }

    sort_newest_first(&mut images);
    Ok(images)
}

/// Get a specific image row.
pub async fn load_image(
    client: &DynamoClient,
    table_name: &str,
    image_id: &str,
) -> Result<GeneratedImage, String> {
    let sk = format!("IMAGE#{}", image_id);

    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S("IMAGE".to_string()))
        .key("SK", AttributeValue::S(sk))
        .send()
        .await
        .map_err(|e| format!("DynamoDB get_item error: {}", e))?;

    let item = result.item().ok_or_else(|| "Image not found".to_string())?;

    Ok(GeneratedImage {
        image_id: image_id.to_string(),
        user_id: item.get("user_id").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
        user_name: item.get("user_name").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
        image_data: item.get("image_data").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
        prompt: item.get("prompt").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
        enhanced_prompt: item.get("enhanced_prompt").and_then(|v| v.as_s().ok()).map(|s| s.to_string()),
        created_at: item.get("created_at").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
    })
}

/// List images for a specific user, newest first.
pub async fn load_images_for_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Vec<GeneratedImage>, String> {
    let all_images = load_all_images(client, table_name).await?;

    let user_images: Vec<GeneratedImage> = all_images
        .into_iter()
        .filter(|img| img.user_id == user_id)
        .collect();

    Ok(user_images)
}

/// RFC 3339 timestamps in UTC compare lexicographically, so a plain
/// string comparison orders rows chronologically.
pub fn sort_newest_first(images: &mut [GeneratedImage]) {
    images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Window an already-sorted result set. `total` is recomputed from the
/// full set on every call; `has_more` reflects whether another page
/// exists past this window.
pub fn paginate(images: Vec<GeneratedImage>, limit: usize, offset: usize) -> GalleryPage {
    let total = images.len();
    let has_more = total > offset.saturating_add(limit);

    let window: Vec<GalleryImage> = images
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|image| GalleryImage {
            id: image.image_id,
            image_data: image.image_data,
            prompt: image.prompt,
            created_at: image.created_at,
            user: GalleryUser {
                id: image.user_id,
                name: image.user_name,
            },
        })
        .collect();

    GalleryPage {
        images: window,
        pagination: Pagination {
            limit,
            offset,
            total,
            has_more,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(n: usize, created_at: &str) -> GeneratedImage {
        GeneratedImage {
            image_id: format!("img-{}", n),
            user_id: format!("user-{}", n % 3),
            user_name: "Tester".to_string(),
            image_data: "data:image/png;base64,AAAA".to_string(),
            prompt: format!("prompt {}", n),
            enhanced_prompt: None,
            created_at: created_at.to_string(),
        }
    }

    fn fixture(total: usize) -> Vec<GeneratedImage> {
        (0..total)
            .map(|n| image(n, &format!("2026-01-01T00:00:{:02}Z", n % 60)))
            .collect()
    }

    #[test]
    fn paginate_windows_full_pages() {
        let page = paginate(fixture(45), 20, 0);
        assert_eq!(page.images.len(), 20);
        assert_eq!(page.pagination.total, 45);
        assert!(page.pagination.has_more);

        let page = paginate(fixture(45), 20, 20);
        assert_eq!(page.images.len(), 20);
        assert!(page.pagination.has_more);

        let page = paginate(fixture(45), 20, 40);
        assert_eq!(page.images.len(), 5);
        assert_eq!(page.pagination.total, 45);
        assert!(!page.pagination.has_more);
    }

    #[test]
    fn paginate_window_size_matches_remaining_rows() {
        for (total, limit, offset) in [(0, 20, 0), (3, 20, 0), (20, 20, 0), (21, 20, 20), (10, 5, 12)] {
            let page = paginate(fixture(total), limit, offset);
            let expected = limit.min(total.saturating_sub(offset));
            assert_eq!(page.images.len(), expected, "total={} limit={} offset={}", total, limit, offset);
            assert_eq!(page.pagination.has_more, total > offset + limit);
        }
    }

    #[test]
    fn paginate_exact_boundary_has_no_more() {
        let page = paginate(fixture(40), 20, 20);
        assert_eq!(page.images.len(), 20);
        assert!(!page.pagination.has_more);
    }

    #[test]
    fn sort_orders_newest_first() {
        let mut images = vec![
            image(0, "2026-01-01T08:00:00Z"),
            image(1, "2026-01-03T08:00:00Z"),
            image(2, "2026-01-02T08:00:00Z"),
        ];
        sort_newest_first(&mut images);
        let ids: Vec<&str> = images.iter().map(|i| i.image_id.as_str()).collect();
        assert_eq!(ids, ["img-1", "img-2", "img-0"]);
    }

    #[test]
    fn sort_keeps_insertion_order_on_ties() {
        let mut images = vec![
            image(0, "2026-01-02T08:00:00Z"),
            image(1, "2026-01-01T08:00:00Z"),
            image(2, "2026-01-01T08:00:00Z"),
            image(3, "2026-01-01T08:00:00Z"),
        ];
        sort_newest_first(&mut images);
        let ids: Vec<&str> = images.iter().map(|i| i.image_id.as_str()).collect();
        assert_eq!(ids, ["img-0", "img-1", "img-2", "img-3"]);
    }

    #[test]
    fn paginate_maps_wire_shape() {
        let mut rows = fixture(2);
        rows[0].enhanced_prompt = Some("refined".to_string());
        let page = paginate(rows, 20, 0);
        let json = serde_json::to_value(&page).unwrap();
        let first = &json["images"][0];
        assert!(first.get("imageData").is_some());
        assert!(first.get("createdAt").is_some());
        assert!(first["user"].get("name").is_some());
        assert_eq!(json["pagination"]["hasMore"], false);
        assert_eq!(json["pagination"]["total"], 2);
    }
}
