use image::{imageops::FilterType::Lanczos3, DynamicImage};

/// Largest width kept after resize.
pub const MAX_WIDTH: u32 = 1200;
/// Largest height kept after resize.
pub const MAX_HEIGHT: u32 = 1200;

/// Compute the output size of an image.
///
/// The width is clamped first and the height second, each step keeping the
/// aspect ratio of its own input and rounding to whole pixels. Images already
/// inside the bounds keep their size.
///
/// # Example
/// ```rust
/// use image_processor::resizer::fit_dimensions;
///
/// assert_eq!(fit_dimensions(2400, 1200), (1200, 600));
/// assert_eq!(fit_dimensions(900, 2000), (540, 1200));
/// ```
pub fn fit_dimensions(width: u32, height: u32) -> (u32, u32) {
    let (mut width, mut height) = (width, height);

    if width > MAX_WIDTH {
        height = scale(height, MAX_WIDTH, width);
        width = MAX_WIDTH;
    }

    if height > MAX_HEIGHT {
        width = scale(width, MAX_HEIGHT, height);
        height = MAX_HEIGHT;
    }

    (width, height)
}

fn scale(value: u32, target: u32, reference: u32) -> u32 {
    let scaled = f64::from(value) * f64::from(target) / f64::from(reference);
    (scaled.round() as u32).max(1)
}

/// Shrink `img` to [`fit_dimensions`].
pub fn resize(img: DynamicImage) -> DynamicImage {
    let (width, height) = fit_dimensions(img.width(), img.height());

    if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, Lanczos3)
    }
}
