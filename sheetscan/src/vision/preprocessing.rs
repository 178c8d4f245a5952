use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};

use crate::error::{Result, SheetscanError};

const FALLBACK_MIME: &str = "image/png";

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub resized: bool,
}

/// Get an image ready for the vision service.
///
/// Images whose longest side exceeds `max_dimension` are downscaled
/// (aspect ratio kept) and re-encoded as PNG. Everything else is sent as-is.
/// A `max_dimension` of 0 skips decoding entirely.
pub fn prepare_image(bytes: Vec<u8>, file_name: &str, max_dimension: u32) -> Result<PreparedImage> {
    if max_dimension == 0 {
        return Ok(PreparedImage {
            mime_type: sniff_mime_type(&bytes, file_name),
            bytes,
            resized: false,
        });
    }

    let (width, height) = ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(|e| SheetscanError::Image(format!("Failed to read {file_name}: {e}")))?
        .into_dimensions()
        .map_err(|e| SheetscanError::Image(format!("Failed to read {file_name}: {e}")))?;

    if width <= max_dimension && height <= max_dimension {
        return Ok(PreparedImage {
            mime_type: sniff_mime_type(&bytes, file_name),
            bytes,
            resized: false,
        });
    }

    let img = image::load_from_memory(&bytes)
        .map_err(|e| SheetscanError::Image(format!("Failed to decode {file_name}: {e}")))?;
    let img = resize_to_fit(img, max_dimension);

    let mut output = Vec::new();
    img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| SheetscanError::Image(format!("Failed to encode {file_name}: {e}")))?;

    tracing::debug!(
        file = %file_name,
        original = %format!("{width}x{height}"),
        resized = %format!("{}x{}", img.width(), img.height()),
        "Downscaled image for extraction"
    );

    Ok(PreparedImage {
        mime_type: FALLBACK_MIME.to_string(),
        bytes: output,
        resized: true,
    })
}

/// Resize so the longest side equals `max_dim`, using Lanczos3.
fn resize_to_fit(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();

    let ratio = if width > height {
        max_dim as f32 / width as f32
    } else {
        max_dim as f32 / height as f32
    };

    let new_width = ((width as f32 * ratio) as u32).max(1);
    let new_height = ((height as f32 * ratio) as u32).max(1);

    img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

/// MIME type from magic bytes, falling back to the file extension.
fn sniff_mime_type(bytes: &[u8], file_name: &str) -> String {
    infer::get(bytes)
        .map(|kind| kind.mime_type().to_string())
        .filter(|mime| mime.starts_with("image/"))
        .or_else(|| {
            mime_guess::from_path(file_name)
                .first()
                .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
                .map(|mime| mime.essence_str().to_string())
        })
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}
