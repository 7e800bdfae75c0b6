pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod image;
pub mod outfits;

pub use error::{TryOnError, TryOnResult};
pub use image::EncodedImage;
