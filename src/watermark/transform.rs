//! Tile geometry: rotation and resizing of RGBA tiles.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Rotate `image` clockwise by `degrees` onto a canvas that exactly holds the
/// rotated bounding box. Uncovered corners stay transparent. Sampling is
/// bilinear and purely arithmetic, so identical input yields identical output.
pub fn rotate_image(image: &RgbaImage, degrees: f32) -> RgbaImage {
    if degrees.rem_euclid(360.0) == 0.0 {
        return image.clone();
    }

    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();

    let src_w = image.width() as f32;
    let src_h = image.height() as f32;
    let (cx, cy) = (src_w / 2.0, src_h / 2.0);

    // The epsilon keeps 90° turns from gaining a pixel through sin/cos noise.
    let dst_w = (src_w * cos.abs() + src_h * sin.abs() - 1e-3).ceil().max(1.0) as u32;
    let dst_h = (src_w * sin.abs() + src_h * cos.abs() - 1e-3).ceil().max(1.0) as u32;
    let (dst_cx, dst_cy) = (dst_w as f32 / 2.0, dst_h as f32 / 2.0);

    let mut rotated = RgbaImage::new(dst_w, dst_h);

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            // Inverse-map the destination pixel centre into the source.
            let rx = dx as f32 + 0.5 - dst_cx;
            let ry = dy as f32 + 0.5 - dst_cy;
            let sx = rx * cos + ry * sin + cx - 0.5;
            let sy = -rx * sin + ry * cos + cy - 0.5;

            if sx < 0.0 || sy < 0.0 || sx > src_w - 1.0 || sy > src_h - 1.0 {
                continue;
            }

            let x0 = sx.floor() as u32;
            let y0 = sy.floor() as u32;
            let x1 = (x0 + 1).min(image.width() - 1);
            let y1 = (y0 + 1).min(image.height() - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let p00 = image.get_pixel(x0, y0);
            let p10 = image.get_pixel(x1, y0);
            let p01 = image.get_pixel(x0, y1);
            let p11 = image.get_pixel(x1, y1);

            let lerp = |c: usize| -> u8 {
                let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
                    + p10[c] as f32 * fx * (1.0 - fy)
                    + p01[c] as f32 * (1.0 - fx) * fy
                    + p11[c] as f32 * fx * fy;
                v.round().clamp(0.0, 255.0) as u8
            };

            rotated.put_pixel(dx, dy, Rgba([lerp(0), lerp(1), lerp(2), lerp(3)]));
        }
    }

    rotated
}

/// Resize `image` to `width` pixels wide, keeping its aspect ratio.
pub fn scale_to_width(image: &RgbaImage, width: u32) -> RgbaImage {
    let width = width.max(1);
    if image.width() == width {
        return image.clone();
    }
    let height = ((image.height() as f64 * width as f64) / image.width().max(1) as f64)
        .round()
        .max(1.0) as u32;
    imageops::resize(image, width, height, FilterType::Triangle)
}
