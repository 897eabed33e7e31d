//! Image validation and normalization
//!
//! Every candidate is decoded before it is accepted. Images smaller than
//! [`MIN_WIDTH`] x [`MIN_HEIGHT`] are upscaled uniformly with Lanczos3;
//! images at or above the floor are never touched.

use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;

pub const MIN_WIDTH: u32 = 600;
pub const MIN_HEIGHT: u32 = 400;

/// Edge length of the preview sent with each accepted image.
pub const PREVIEW_EDGE: u32 = 100;

/// Extension used when nothing better can be derived.
pub const DEFAULT_EXTENSION: &str = "jpg";

const MAX_EXTENSION_LEN: usize = 5;

/// Error types for validation
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Empty image data")]
    Empty,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Result type for validation operations
pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// A successfully decoded image.
#[derive(Debug)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
}

/// Decode result after the minimum-size policy has been applied.
#[derive(Debug)]
pub struct NormalizedImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
    /// New size when the image had to be upscaled.
    pub upscaled_to: Option<(u32, u32)>,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decodes raw bytes, rejecting anything that is not a complete image.
pub fn decode(bytes: &[u8]) -> NormalizeResult<DecodedImage> {
    if bytes.is_empty() {
        return Err(NormalizeError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format();
    let image = reader.decode()?;

    Ok(DecodedImage { image, format })
}

/// Decodes bytes and applies the minimum-size policy.
pub fn validate(bytes: &[u8]) -> NormalizeResult<NormalizedImage> {
    let decoded = decode(bytes)?;
    Ok(normalize(decoded))
}

/// Applies the minimum-size policy to an already decoded image.
pub fn normalize(decoded: DecodedImage) -> NormalizedImage {
    let DecodedImage { image, format } = decoded;

    match upscaled_dimensions(image.width(), image.height()) {
        Some((width, height)) => NormalizedImage {
            image: image.resize_exact(width, height, FilterType::Lanczos3),
            format,
            upscaled_to: Some((width, height)),
        },
        None => NormalizedImage {
            image,
            format,
            upscaled_to: None,
        },
    }
}

/// Target size for an image below the floor, or `None` if it already fits.
///
/// Both sides are multiplied by `max(MIN_WIDTH / w, MIN_HEIGHT / h)` so the
/// aspect ratio is preserved and neither side ends up under the floor.
pub fn upscaled_dimensions(width: u32, height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    if width >= MIN_WIDTH && height >= MIN_HEIGHT {
        return None;
    }

    let scale = f64::max(
        MIN_WIDTH as f64 / width as f64,
        MIN_HEIGHT as f64 / height as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);

    Some((new_width, new_height))
}

/// File extension for a locator that is streamed straight to disk.
///
/// The suffix after the last `.` of the path, lowercased, with any query
/// string or fragment removed. Falls back to `jpg` when there is no suffix,
/// it is longer than five characters, or it spans a path separator.
pub fn extension_from_locator(locator: &str) -> String {
    let without_query = locator
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    let Some((_, suffix)) = without_query.rsplit_once('.') else {
        return DEFAULT_EXTENSION.to_string();
    };

    if suffix.is_empty() || suffix.len() > MAX_EXTENSION_LEN || suffix.contains('/') {
        return DEFAULT_EXTENSION.to_string();
    }

    suffix.to_lowercase()
}

/// File extension for a decoded image's own format.
pub fn extension_for_format(format: Option<ImageFormat>) -> String {
    format
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or(DEFAULT_EXTENSION)
        .to_string()
}

/// Writes an image using the format implied by `extension`, falling back to
/// `fallback` when the extension names no known format.
pub fn save_image(
    image: &DynamicImage,
    path: &Path,
    extension: &str,
    fallback: Option<ImageFormat>,
) -> NormalizeResult<()> {
    let format = ImageFormat::from_extension(extension)
        .or(fallback)
        .unwrap_or(ImageFormat::Jpeg);

    // The JPEG encoder only takes 8-bit gray or RGB.
    if format == ImageFormat::Jpeg && !matches!(image, DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_)) {
        DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, format)?;
    } else {
        image.save_with_format(path, format)?;
    }

    Ok(())
}

/// PNG encoded thumbnail of at most [`PREVIEW_EDGE`] on each side.
pub fn preview_bytes(image: &DynamicImage) -> NormalizeResult<Vec<u8>> {
    let thumbnail = image.thumbnail(PREVIEW_EDGE, PREVIEW_EDGE);
    let mut buffer = Cursor::new(Vec::new());
    thumbnail.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::tempdir;

    /// Encodes a solid test image of the given size.
    pub(crate) fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 90])));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_upscale_brings_both_sides_to_floor() {
        assert_eq!(upscaled_dimensions(300, 200), Some((600, 400)));
        assert_eq!(upscaled_dimensions(100, 100), Some((600, 600)));
        assert_eq!(upscaled_dimensions(1000, 300), Some((1333, 400)));
        assert_eq!(upscaled_dimensions(7, 3), Some((933, 400)));
    }

    #[test]
    fn test_upscale_never_downscales() {
        assert_eq!(upscaled_dimensions(600, 400), None);
        assert_eq!(upscaled_dimensions(4000, 3000), None);
        assert_eq!(upscaled_dimensions(0, 10), None);
    }

    #[test]
    fn test_upscale_result_always_meets_floor() {
        for width in (1..700).step_by(37) {
            for height in (1..500).step_by(23) {
                if let Some((w, h)) = upscaled_dimensions(width, height) {
                    assert!(w >= MIN_WIDTH && h >= MIN_HEIGHT, "{}x{} -> {}x{}", width, height, w, h);
                }
            }
        }
    }

    #[test]
    fn test_validate_upscales_small_image() {
        let bytes = encoded_image(120, 80, ImageFormat::Png);
        let normalized = validate(&bytes).unwrap();

        assert_eq!(normalized.format, Some(ImageFormat::Png));
        assert_eq!(normalized.upscaled_to, Some((600, 400)));
        assert_eq!((normalized.width(), normalized.height()), (600, 400));
    }

    #[test]
    fn test_validate_leaves_large_image_alone() {
        let bytes = encoded_image(640, 480, ImageFormat::Jpeg);
        let normalized = validate(&bytes).unwrap();

        assert_eq!(normalized.format, Some(ImageFormat::Jpeg));
        assert_eq!(normalized.upscaled_to, None);
        assert_eq!((normalized.width(), normalized.height()), (640, 480));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(matches!(validate(b""), Err(NormalizeError::Empty)));
        assert!(validate(b"<html>not an image</html>").is_err());

        let mut truncated = encoded_image(640, 480, ImageFormat::Png);
        truncated.truncate(truncated.len() / 2);
        assert!(validate(&truncated).is_err());
    }

    #[test]
    fn test_extension_from_locator() {
        assert_eq!(extension_from_locator("https://example.com/a/photo.JPG?x=1"), "jpg");
        assert_eq!(extension_from_locator("https://example.com/a/photo.png#top"), "png");
        assert_eq!(extension_from_locator("https://images.unsplash.com/photo-1514888286974"), "jpg");
        assert_eq!(extension_from_locator("https://example.com/photo.verylongsuffix"), "jpg");
        assert_eq!(extension_from_locator("https://example.com/photo."), "jpg");
        assert_eq!(extension_from_locator("https://example.com/img.webp?w=1.5"), "webp");
    }

    #[test]
    fn test_extension_for_format() {
        assert_eq!(extension_for_format(Some(ImageFormat::Jpeg)), "jpg");
        assert_eq!(extension_for_format(Some(ImageFormat::Png)), "png");
        assert_eq!(extension_for_format(None), "jpg");
    }

    #[test]
    fn test_save_image_converts_alpha_for_jpeg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alpha.jpg");
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 128])));

        save_image(&image, &path, "jpg", None).unwrap();

        let decoded = decode(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(decoded.format, Some(ImageFormat::Jpeg));
    }

    #[test]
    fn test_save_image_unknown_extension_uses_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.php");
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));

        save_image(&image, &path, "php", Some(ImageFormat::Png)).unwrap();

        let decoded = decode(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(decoded.format, Some(ImageFormat::Png));
    }

    #[test]
    fn test_preview_is_small_png() {
        let decoded = decode(&encoded_image(800, 600, ImageFormat::Png)).unwrap();
        let preview = preview_bytes(&decoded.image).unwrap();
        let thumb = decode(&preview).unwrap();

        assert_eq!(thumb.format, Some(ImageFormat::Png));
        assert!(thumb.image.width() <= PREVIEW_EDGE && thumb.image.height() <= PREVIEW_EDGE);
    }
}
