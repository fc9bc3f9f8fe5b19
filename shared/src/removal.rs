use std::collections::VecDeque;
use std::io::Cursor;

use image::{ImageOutputFormat, Rgba, RgbaImage};

/// Per-channel tolerance when deciding whether a pixel still belongs to
/// the background estimated from the image border.
const TOLERANCE: u32 = 40;

/// Strip the background from an encoded image and return it as PNG
/// bytes with an alpha channel.
///
/// The background color is estimated from the border pixels, then every
/// border-connected pixel within tolerance of it is made transparent.
/// The subject stays opaque even where its colors match the background,
/// because the fill never crosses non-background pixels.
pub fn remove_background(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| format!("failed to decode image: {}", e))?;
    let mut rgba = decoded.to_rgba8();

    let background = estimate_background(&rgba);
    clear_connected_background(&mut rgba, background);

    let mut out = Vec::new();
    rgba.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .map_err(|e| format!("failed to encode processed image: {}", e))?;

    if out.is_empty() {
        return Err("processed image is empty".to_string());
    }
    Ok(out)
}

/// Average color of the one-pixel border.
fn estimate_background(img: &RgbaImage) -> Rgba<u8> {
    let (width, height) = img.dimensions();
    let mut sum = [0u64; 3];
    let mut count = 0u64;

    for x in 0..width {
        for y in [0, height - 1] {
            let p = img.get_pixel(x, y);
            sum[0] += p[0] as u64;
            sum[1] += p[1] as u64;
            sum[2] += p[2] as u64;
            count += 1;
        }
    }
    for y in 0..height {
        for x in [0, width - 1] {
            let p = img.get_pixel(x, y);
            sum[0] += p[0] as u64;
            sum[1] += p[1] as u64;
            sum[2] += p[2] as u64;
            count += 1;
        }
    }

    Rgba([
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
        255,
    ])
}

fn matches_background(pixel: &Rgba<u8>, background: Rgba<u8>) -> bool {
    pixel[0].abs_diff(background[0]) as u32 <= TOLERANCE
        && pixel[1].abs_diff(background[1]) as u32 <= TOLERANCE
        && pixel[2].abs_diff(background[2]) as u32 <= TOLERANCE
}

/// Breadth-first fill from every border pixel that matches the
/// background estimate, setting alpha to zero as it goes.
fn clear_connected_background(img: &mut RgbaImage, background: Rgba<u8>) {
    let (width, height) = img.dimensions();
    let mut visited = vec![false; (width * height) as usize];
    let mut queue = VecDeque::new();

    let index = |x: u32, y: u32| (y * width + x) as usize;

    for x in 0..width {
        for y in [0, height - 1] {
            if !visited[index(x, y)] && matches_background(img.get_pixel(x, y), background) {
                visited[index(x, y)] = true;
                queue.push_back((x, y));
            }
        }
    }
    for y in 0..height {
        for x in [0, width - 1] {
            if !visited[index(x, y)] && matches_background(img.get_pixel(x, y), background) {
                visited[index(x, y)] = true;
                queue.push_back((x, y));
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let pixel = img.get_pixel_mut(x, y);
        pixel[3] = 0;

        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbors {
            if nx < width
                && ny < height
                && !visited[index(nx, ny)]
                && matches_background(img.get_pixel(nx, ny), background)
            {
                visited[index(nx, ny)] = true;
                queue.push_back((nx, ny));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16x16 white canvas with a red 6x6 square in the middle.
    fn subject_on_white() -> Vec<u8> {
        let mut img = RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255]));
        for y in 5..11 {
            for x in 5..11 {
                img.put_pixel(x, y, Rgba([200, 30, 30, 255]));
            }
        }
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn background_becomes_transparent_subject_stays_opaque() {
        let processed = remove_background(&subject_on_white()).unwrap();
        assert!(!processed.is_empty());

        let img = image::load_from_memory(&processed).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(15, 15)[3], 0);
        assert_eq!(img.get_pixel(8, 8)[3], 255);
        assert_eq!(img.get_pixel(8, 8)[0], 200);
    }

    #[test]
    fn enclosed_background_colored_region_survives() {
        // A white pocket fully inside the subject is not border-connected,
        // so it must keep its alpha.
        let mut img = RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255]));
        for y in 3..13 {
            for x in 3..13 {
                img.put_pixel(x, y, Rgba([200, 30, 30, 255]));
            }
        }
        img.put_pixel(8, 8, Rgba([255, 255, 255, 255]));

        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();

        let processed = remove_background(&bytes).unwrap();
        let out = image::load_from_memory(&processed).unwrap().to_rgba8();
        assert_eq!(out.get_pixel(8, 8)[3], 255);
        assert_eq!(out.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let err = remove_background(b"not an image").unwrap_err();
        assert!(err.contains("decode"));
    }
}
