use std::io::Cursor;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use tryon_contracts::{TryOnError, TryOnResult};

use crate::service::{ContentPart, GenerateRequest, GenerateResponse, GenerativeService, Modality};

const DRYRUN_SIDE: u32 = 256;

/// Offline stand-in for the hosted model.
///
/// Image requests get a solid-color PNG whose color is derived from the
/// request content, so the same request always renders the same image.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunService;

#[async_trait]
impl GenerativeService for DryrunService {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn generate(&self, request: &GenerateRequest) -> TryOnResult<GenerateResponse> {
        let digest = request_digest(request);
        let tag = hex::encode(&digest[..4]);
        let mut parts = Vec::new();

        if request.modalities.contains(&Modality::Image) {
            let png = render_swatch((digest[0], digest[1], digest[2]))?;
            parts.push(ContentPart::InlineData {
                mime_type: "image/png".to_string(),
                data: BASE64.encode(png),
            });
        }
        if request.modalities.contains(&Modality::Text) {
            let text = if request.system_instruction.is_some() {
                format!("Dryrun stylist note {tag}: pair this look with **clean white sneakers**.")
            } else {
                format!("Dryrun render {tag}.")
            };
            parts.push(ContentPart::Text(text));
        }

        Ok(GenerateResponse::single(parts))
    }
}

fn request_digest(request: &GenerateRequest) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(request.model.as_bytes());
    for part in &request.parts {
        match part {
            ContentPart::InlineData { mime_type, data } => {
                hasher.update(mime_type.as_bytes());
                hasher.update(data.as_bytes());
            }
            ContentPart::Text(text) => hasher.update(text.as_bytes()),
        }
    }
    hasher.finalize().to_vec()
}

fn render_swatch((r, g, b): (u8, u8, u8)) -> TryOnResult<Vec<u8>> {
    let mut image = RgbImage::new(DRYRUN_SIDE, DRYRUN_SIDE);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|err| TryOnError::Transport(format!("dryrun render failed: {err}")))?;
    Ok(out)
}
