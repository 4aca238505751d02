use image::ImageReader;
use std::io::Cursor;

use crate::format::ImageKind;
use crate::ImageError;

/// Largest accepted upload, 10 MiB.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
/// MIME types accepted for upload.
pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];
/// Minimum width of an upload.
pub const MIN_WIDTH: u32 = 800;
/// Minimum height of an upload.
pub const MIN_HEIGHT: u32 = 600;
/// Maximum width of an upload.
pub const MAX_WIDTH: u32 = 4000;
/// Maximum height of an upload.
pub const MAX_HEIGHT: u32 = 4000;

/// Facts learned while validating an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upload {
    /// Declared format.
    pub kind: ImageKind,
    /// Width read from the image header.
    pub width: u32,
    /// Height read from the image header.
    pub height: u32,
}

/// Check size, type and dimensions of an upload.
///
/// Only the image header is decoded.
pub fn validate(buffer: &[u8], mime: &str) -> Result<Upload, ImageError> {
    if buffer.len() > MAX_FILE_SIZE {
        return Err(ImageError::FileTooLarge { size: buffer.len() });
    }

    let kind = ImageKind::from_mime(mime)
        .ok_or_else(|| ImageError::UnsupportedType(mime.to_owned()))?;

    let (width, height) =
        ImageReader::with_format(Cursor::new(buffer), kind.format())
            .into_dimensions()
            .map_err(ImageError::Image)?;

    if width < MIN_WIDTH || height < MIN_HEIGHT {
        return Err(ImageError::DimensionsTooSmall { width, height });
    }
    if width > MAX_WIDTH || height > MAX_HEIGHT {
        return Err(ImageError::DimensionsTooLarge { width, height });
    }

    Ok(Upload {
        kind,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::png;

    #[test]
    fn test_size_limit_is_inclusive() {
        let mut buffer = png(800, 600);
        buffer.resize(MAX_FILE_SIZE, 0);
        assert!(validate(&buffer, "image/png").is_ok());

        buffer.push(0);
        assert!(matches!(
            validate(&buffer, "image/png"),
            Err(ImageError::FileTooLarge { size }) if size == MAX_FILE_SIZE + 1
        ));
    }

    #[test]
    fn test_mime_types() {
        let buffer = png(800, 600);
        assert!(validate(&buffer, "image/png").is_ok());
        assert!(matches!(
            validate(&buffer, "application/pdf"),
            Err(ImageError::UnsupportedType(mime)) if mime == "application/pdf"
        ));
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(
            validate(&png(800, 600), "image/png").unwrap(),
            Upload {
                kind: ImageKind::Png,
                width: 800,
                height: 600
            }
        );
        assert!(matches!(
            validate(&png(799, 600), "image/png"),
            Err(ImageError::DimensionsTooSmall { width: 799, height: 600 })
        ));
        assert!(matches!(
            validate(&png(800, 599), "image/png"),
            Err(ImageError::DimensionsTooSmall { .. })
        ));
        assert!(matches!(
            validate(&png(4001, 600), "image/png"),
            Err(ImageError::DimensionsTooLarge { width: 4001, .. })
        ));
        assert!(validate(&png(4000, 600), "image/png").is_ok());
    }
}
