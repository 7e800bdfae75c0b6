use std::path::Path;

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client as HttpClient;
use tryon_contracts::image::{encode_bytes, mime_for_path};
use tryon_contracts::outfits::{outfits_in, Outfit, OutfitCategory, SAMPLE_OUTFITS};
use tryon_contracts::EncodedImage;

pub fn print_outfits() {
    for (heading, category) in [("Tops", OutfitCategory::Top), ("Bottoms", OutfitCategory::Bottom)] {
        println!("{heading}:");
        for outfit in outfits_in(category) {
            let number = SAMPLE_OUTFITS
                .iter()
                .position(|candidate| candidate == outfit)
                .map(|idx| idx + 1)
                .unwrap_or_default();
            println!("  {number}. {}", outfit.description);
        }
    }
}

/// Downloads a library garment so it can be used like an uploaded file.
pub async fn fetch_outfit(http: &HttpClient, outfit: &Outfit) -> Result<EncodedImage> {
    let response = http
        .get(outfit.url)
        .send()
        .await
        .with_context(|| format!("failed to download {}", outfit.description))?
        .error_for_status()
        .with_context(|| format!("failed to download {}", outfit.description))?;
    let header = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let mime = resolve_mime(header.as_deref(), outfit.url);
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("failed to read {}", outfit.description))?;
    Ok(encode_bytes(&bytes, &mime)?)
}

fn resolve_mime(content_type: Option<&str>, url: &str) -> String {
    content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| value.starts_with("image/"))
        .map(str::to_string)
        .or_else(|| mime_for_path(Path::new(url)).map(str::to_string))
        .unwrap_or_else(|| "image/png".to_string())
}
