pub mod model;
pub mod service;

pub use model::User;
pub use service::*;
