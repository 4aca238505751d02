use image::{DynamicImage, RgbaImage};

use crate::glyphs::{self, Mask};

/// Opacity of the label.
pub const OPACITY: f32 = 0.4;
/// Label height in pixels.
pub const FONT_SIZE: u32 = 24;
/// Empty space between two labels along the diagonal.
pub const GAP: f64 = 80.0;

/// Stamp `label` repeatedly along the diagonal running from the bottom-left
/// corner to the top-right corner.
///
/// Labels are rotated to the diagonal angle and evenly spaced over its
/// length. The output always has the dimensions of the input.
pub fn apply(img: DynamicImage, label: &str) -> DynamicImage {
    let mut canvas = img.to_rgba8();
    let (width, height) = canvas.dimensions();
    let mask = glyphs::render(label, FONT_SIZE);

    if mask.is_empty() || width == 0 || height == 0 {
        return DynamicImage::ImageRgba8(canvas);
    }

    let (w, h) = (f64::from(width), f64::from(height));
    let diagonal = w.hypot(h);
    let angle = -(h / w).atan();

    let count = (diagonal / (f64::from(mask.width) + GAP)).floor().max(1.0);
    let spacing = diagonal / count;

    for i in 0..count as u32 {
        let distance = (f64::from(i) + 0.5) * spacing;
        let center_x = distance * w / diagonal;
        let center_y = h - distance * h / diagonal;

        stamp(&mut canvas, &mask, (center_x, center_y), angle);
    }

    DynamicImage::ImageRgba8(canvas)
}

/// Blend `mask` rotated by `angle` around `center`.
///
/// Every canvas pixel of the bounding circle is mapped back into the mask,
/// so the rotated label has no holes.
fn stamp(canvas: &mut RgbaImage, mask: &Mask, center: (f64, f64), angle: f64) {
    let (sin, cos) = angle.sin_cos();
    let half_width = f64::from(mask.width) / 2.0;
    let half_height = f64::from(mask.height) / 2.0;
    let radius = half_width.hypot(half_height).ceil();

    let max_x = f64::from(canvas.width() - 1);
    let max_y = f64::from(canvas.height() - 1);
    let x_range = (center.0 - radius).floor().max(0.0) as u32
        ..=(center.0 + radius).ceil().min(max_x) as u32;
    let y_range = (center.1 - radius).floor().max(0.0) as u32
        ..=(center.1 + radius).ceil().min(max_y) as u32;

    for y in y_range {
        for x in x_range.clone() {
            let dx = f64::from(x) + 0.5 - center.0;
            let dy = f64::from(y) + 0.5 - center.1;

            let u = dx * cos + dy * sin + half_width;
            let v = -dx * sin + dy * cos + half_height;
            if u < 0.0 || v < 0.0 || !mask.get(u as u32, v as u32) {
                continue;
            }

            let pixel = canvas.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut().take(3) {
                *channel = blend(*channel);
            }
        }
    }
}

/// Translucent white over `value`.
#[inline]
fn blend(value: u8) -> u8 {
    (f32::from(value) * (1.0 - OPACITY) + 255.0 * OPACITY).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba};

    fn black(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([0, 0, 0, 255]),
        ))
    }

    #[test]
    fn test_dimensions_are_kept() {
        for (width, height) in [(1200, 600), (540, 1200), (800, 800), (3, 2)] {
            let out = apply(black(width, height), "VITRINE");
            assert_eq!(out.dimensions(), (width, height));
        }
    }

    #[test]
    fn test_label_is_translucent_white() {
        let out = apply(black(1000, 800), "VITRINE").to_rgba8();

        let touched: Vec<_> =
            out.pixels().filter(|p| p.0 != [0, 0, 0, 255]).collect();
        assert!(!touched.is_empty());
        assert!(touched.iter().all(|p| p.0 == [102, 102, 102, 255]));

        // corners far from the diagonal stay untouched.
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(999, 799).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_label_follows_diagonal() {
        let out = apply(black(1000, 800), "VITRINE").to_rgba8();

        // the center of the image lies on the diagonal, between two labels
        // or inside one; the area around it must be touched somewhere.
        let near_center = (450..550)
            .flat_map(|x| (350..450).map(move |y| (x, y)))
            .any(|(x, y)| out.get_pixel(x, y).0 != [0, 0, 0, 255]);
        assert!(near_center);
    }

    #[test]
    fn test_empty_label() {
        let out = apply(black(100, 100), "  ").to_rgba8();
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn test_blend() {
        assert_eq!(blend(0), 102);
        assert_eq!(blend(255), 255);
    }
}
