use serde::{Deserialize, Serialize};

/// A generated image persisted to the gallery table. Rows are written
/// exactly once at the end of a successful generation run and never
/// updated afterwards.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneratedImage {
    pub image_id: String,
    pub user_id: String,
    pub user_name: String,
    /// Self-contained data URI (base64 PNG after background removal).
    pub image_data: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct GeneratePayload {
    pub prompt: String,
}

/// Wire shape for one gallery entry in GET /api/gallery responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
    pub id: String,
    pub image_data: String,
    pub prompt: String,
    pub created_at: String,
    pub user: GalleryUser,
}

#[derive(Debug, Serialize)]
pub struct GalleryUser {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct GalleryPage {
    pub images: Vec<GalleryImage>,
    pub pagination: Pagination,
}
