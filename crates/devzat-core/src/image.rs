//! Inline image rendering: fetch a URL, decode it, and rasterize to ANSI
//! half-block escape sequences sized to a given terminal width. Ported from
//! `imgRender`/`replaceImgs` in `original_source/util.go`.

use std::time::Duration;

use image::{DynamicImage, GenericImageView};
use tracing::instrument;

use crate::error::DevzatError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BYTES: u64 = 30 * 1024 * 1024;
const MAX_WIDTH: u32 = 8064;
const MAX_HEIGHT: u32 = 6048;

/// Fetch an image from `url`, enforcing the size/timeout/dimension limits
/// from spec §4.7, and rasterize it to `target_width` terminal columns.
#[instrument]
pub async fn fetch_and_render(url: &str, target_width: u32) -> Result<String, DevzatError> {
    let client = reqwest::Client::new();
    let resp = tokio::time::timeout(FETCH_TIMEOUT, client.get(url).send())
        .await
        .map_err(|_| DevzatError::ImageFetchFailed(format!("timed out fetching {url}")))?
        .map_err(|e| DevzatError::ImageFetchFailed(e.to_string()))?;

    if let Some(len) = resp.content_length() {
        if len > MAX_BYTES {
            return Err(DevzatError::ImageTooLarge(format!("{len} bytes")));
        }
    }

    let bytes = resp.bytes().await.map_err(|e| DevzatError::ImageFetchFailed(e.to_string()))?;
    if bytes.len() as u64 > MAX_BYTES {
        return Err(DevzatError::ImageTooLarge(format!("{} bytes", bytes.len())));
    }

    let img = image::load_from_memory(&bytes).map_err(|e| DevzatError::ImageFetchFailed(e.to_string()))?;
    if img.width() > MAX_WIDTH || img.height() > MAX_HEIGHT {
        return Err(DevzatError::ImageTooLarge(format!("{}x{}", img.width(), img.height())));
    }

    Ok(render_ansi(&img, target_width))
}

/// Pure rasterizer: downscale to `target_width` columns (each column is one
/// character cell, two source rows tall) and emit 24-bit ANSI half-block
/// escapes, top half of each cell as foreground and bottom half as
/// background via U+2580.
pub fn render_ansi(img: &DynamicImage, target_width: u32) -> String {
    if target_width == 0 || img.width() == 0 || img.height() == 0 {
        return String::new();
    }
    let scale = target_width as f64 / img.width() as f64;
    let target_height = ((img.height() as f64 * scale) / 2.0).round().max(1.0) as u32;
    let resized = img.resize_exact(target_width, target_height * 2, image::imageops::FilterType::Triangle);
    let rgba = resized.to_rgba8();

    let mut out = String::new();
    for y in (0..rgba.height()).step_by(2) {
        for x in 0..rgba.width() {
            let top = rgba.get_pixel(x, y);
            let bottom = if y + 1 < rgba.height() { rgba.get_pixel(x, y + 1) } else { top };
            out.push_str(&format!(
                "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m\u{2580}",
                top[0], top[1], top[2], bottom[0], bottom[1], bottom[2]
            ));
        }
        out.push_str("\x1b[0m\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pixel_renders_one_cell() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(1, 2, image::Rgba([255, 0, 0, 255])));
        let rendered = render_ansi(&img, 1);
        assert!(rendered.contains("255;0;0"));
        assert!(rendered.ends_with("\x1b[0m\n"));
    }

    #[test]
    fn zero_width_yields_empty_string() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255])));
        assert_eq!(render_ansi(&img, 0), "");
    }
}
