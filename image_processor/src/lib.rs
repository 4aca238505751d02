#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused_imports,
    unused_mut,
    missing_docs,
    missing_debug_implementations
)]

//! # image_processor
//!
//! validation, bounded resize and diagonal watermarking of user uploads.
//! every picture goes through the same pipeline before being handed to
//! object storage:
//! - validate size, MIME type and dimensions;
//! - shrink to fit inside 1200×1200 (width first, then height);
//! - stamp a translucent label along the diagonal; and
//! - encode back into the original format.
//!
//! # Normalize an upload
//!
//! ```no_run
//! let buffer = std::fs::read("./benches/image.jpg").unwrap();
//! let processed =
//!     image_processor::normalize(&buffer, "image/jpeg", "VITRINE").unwrap();
//!
//! assert!(processed.width <= 1200 && processed.height <= 1200);
//! ```

/// Encode images back into their original format.
pub mod encoder;
/// Supported upload formats.
pub mod format;
mod glyphs;
/// Shrink images to fit display bounds.
pub mod resizer;
/// Upload constraints checked before any network call.
pub mod validation;
/// Diagonal label overlay.
pub mod watermark;

use format::ImageKind;
use image::ImageError as ImgError;
use std::{error::Error, fmt};

/// Error type.
#[derive(Debug)]
pub enum ImageError {
    /// Error from `image` crate.
    Image(ImgError),
    /// File is bigger than [`validation::MAX_FILE_SIZE`].
    FileTooLarge {
        /// Size of the rejected file, in bytes.
        size: usize,
    },
    /// MIME type is not one of [`validation::ALLOWED_MIME_TYPES`].
    UnsupportedType(String),
    /// Image is narrower or shorter than the minimum.
    DimensionsTooSmall {
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },
    /// Image is wider or taller than the maximum.
    DimensionsTooLarge {
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },
    /// Error when transcoding image back to its format.
    FailedEncode,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImageError::Image(error) => write!(f, "{}", error),
            ImageError::FileTooLarge { size } => write!(
                f,
                "File is {} bytes, maximum is {} bytes",
                size,
                validation::MAX_FILE_SIZE
            ),
            ImageError::UnsupportedType(mime) => write!(
                f,
                "Unsupported file type {:?}, expected one of {}",
                mime,
                validation::ALLOWED_MIME_TYPES.join(", ")
            ),
            ImageError::DimensionsTooSmall { width, height } => write!(
                f,
                "Image is {}x{}, minimum is {}x{}",
                width,
                height,
                validation::MIN_WIDTH,
                validation::MIN_HEIGHT
            ),
            ImageError::DimensionsTooLarge { width, height } => write!(
                f,
                "Image is {}x{}, maximum is {}x{}",
                width,
                height,
                validation::MAX_WIDTH,
                validation::MAX_HEIGHT
            ),
            ImageError::FailedEncode => {
                write!(f, "Error during transcoding to original format")
            },
        }
    }
}

impl Error for ImageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ImageError::Image(error) => Some(error),
            _ => None,
        }
    }
}

/// Image ready to be uploaded.
#[derive(Debug, Clone)]
pub struct Processed {
    /// Encoded bytes, same format as the upload.
    pub buffer: Vec<u8>,
    /// Format of `buffer`.
    pub kind: ImageKind,
    /// Width after resize.
    pub width: u32,
    /// Height after resize.
    pub height: u32,
}

/// Validate, resize, watermark and re-encode an uploaded image.
///
/// # Errors
///
/// Returns a validation variant of [`ImageError`] when the upload breaks one
/// of the [`validation`] constraints, [`ImageError::Image`] when it cannot be
/// decoded and [`ImageError::FailedEncode`] when the result cannot be encoded.
pub fn normalize(
    buffer: &[u8],
    mime: &str,
    label: &str,
) -> Result<Processed, ImageError> {
    let upload = validation::validate(buffer, mime)?;

    let img = image::load_from_memory_with_format(buffer, upload.kind.format())
        .map_err(ImageError::Image)?;
    let img = resizer::resize(img);
    let img = watermark::apply(img, label);

    Ok(Processed {
        buffer: encoder::encode(&img, upload.kind)?,
        kind: upload.kind,
        width: img.width(),
        height: img.height(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encode a plain image of the given size as PNG.
    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut output = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut output, ImageFormat::Png)
            .unwrap();
        output.into_inner()
    }

    #[test]
    fn test_normalize_wide_png() {
        let processed = normalize(&png(2400, 1200), "image/png", "VITRINE").unwrap();

        assert_eq!((processed.width, processed.height), (1200, 600));
        assert_eq!(processed.kind, ImageKind::Png);

        let decoded = image::load_from_memory(&processed.buffer).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1200, 600));
    }

    #[test]
    fn test_normalize_keeps_small_images() {
        let processed = normalize(&png(800, 600), "image/png", "VITRINE").unwrap();
        assert_eq!((processed.width, processed.height), (800, 600));
    }

    #[test]
    fn test_normalize_jpeg() {
        let img = image::RgbImage::from_pixel(1600, 900, image::Rgb([200, 0, 0]));
        let mut output = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut output, ImageFormat::Jpeg)
            .unwrap();

        let processed =
            normalize(&output.into_inner(), "image/jpeg", "VITRINE").unwrap();
        assert_eq!(processed.kind, ImageKind::Jpeg);
        assert_eq!(
            image::guess_format(&processed.buffer).unwrap(),
            ImageFormat::Jpeg
        );
        assert_eq!((processed.width, processed.height), (1200, 675));
    }

    #[test]
    fn test_normalize_rejects_before_decoding() {
        assert!(matches!(
            normalize(b"not an image", "image/gif", "VITRINE"),
            Err(ImageError::UnsupportedType(_))
        ));
        assert!(matches!(
            normalize(b"not an image", "image/png", "VITRINE"),
            Err(ImageError::Image(_))
        ));
    }
}
