// ========== USER ==========
pub use visuagen_atoms::users::model::User;

// ========== GALLERY ==========
pub use visuagen_atoms::gallery::model::{
    GalleryImage, GalleryPage, GalleryUser, GeneratePayload, GeneratedImage, Pagination,
};
