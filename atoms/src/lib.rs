pub mod gallery;
pub mod users;
