use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;

use crate::format::ImageKind;
use crate::ImageError;

/// JPEG quality used when re-encoding uploads.
pub const JPEG_QUALITY: u8 = 85;

/// Encode `image` as `kind`.
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn encode(
    image: &DynamicImage,
    kind: ImageKind,
) -> Result<Vec<u8>, ImageError> {
    let mut output: Cursor<Vec<u8>> = Cursor::new(Vec::new());

    let encoded = match kind {
        ImageKind::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(
                &mut output,
                JPEG_QUALITY,
            )),
        ImageKind::Png | ImageKind::WebP => {
            image.write_to(&mut output, kind.format())
        },
    };
    encoded.map_err(|_| ImageError::FailedEncode)?;

    Ok(output.into_inner())
}
