//! Page-raster crops and their encodings.
//!
//! Block polygons live in document coordinates; the page raster may be at
//! any resolution, so crops scale by `image size / page size` first.
//! Requests use PNG with `detail: "high"`: lossless text and the full tile
//! budget matter more than payload size for small tables and math.

use crate::error::GenerationError;
use crate::geometry::PolygonBox;
use crate::schema::Page;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;
use tracing::debug;

/// Crop `polygon` out of the page raster. `None` without a raster or when
/// the crop is empty.
pub fn crop_block(page: &Page, polygon: &PolygonBox) -> Option<DynamicImage> {
    let image = page.image.as_ref()?;
    let (img_w, img_h) = image.dimensions();
    if page.width() <= 0.0 || page.height() <= 0.0 {
        return None;
    }
    let scaled = polygon
        .rescale((page.width(), page.height()), (img_w as f32, img_h as f32))
        .fit_to_bounds(img_w as f32, img_h as f32);
    let [x0, y0, x1, y1] = scaled.bbox();
    let left = x0.floor().max(0.0) as u32;
    let top = y0.floor().max(0.0) as u32;
    let right = (x1.ceil() as u32).min(img_w);
    let bottom = (y1.ceil() as u32).min(img_h);
    if right <= left || bottom <= top {
        return None;
    }
    Some(image.crop_imm(left, top, right - left, bottom - top))
}

/// PNG bytes, for writing extracted images to disk.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a crop as a base64 PNG ready for the provider.
pub fn encode_png(img: &DynamicImage) -> Result<ImageData, GenerationError> {
    let buf = png_bytes(img).map_err(|e| GenerationError::ImageEncoding(e.to_string()))?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded crop {}x{} → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    fn page_with_image(img_w: u32, img_h: u32) -> Page {
        let mut page = Page::new(0, PolygonBox::from_bbox([0.0, 0.0, 100.0, 200.0]));
        page.image = Some(Arc::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            img_w,
            img_h,
            Rgba([255, 255, 255, 255]),
        ))));
        page
    }

    #[test]
    fn crop_scales_to_raster() {
        let page = page_with_image(200, 400);
        let crop = crop_block(&page, &PolygonBox::from_bbox([10.0, 20.0, 60.0, 70.0])).unwrap();
        assert_eq!(crop.dimensions(), (100, 100));
    }

    #[test]
    fn crop_is_clamped_to_raster() {
        let page = page_with_image(100, 200);
        let crop = crop_block(&page, &PolygonBox::from_bbox([90.0, 190.0, 150.0, 260.0])).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));
    }

    #[test]
    fn no_raster_or_empty_crop_is_none() {
        let page = Page::new(0, PolygonBox::from_bbox([0.0, 0.0, 100.0, 200.0]));
        assert!(crop_block(&page, &PolygonBox::from_bbox([0.0, 0.0, 10.0, 10.0])).is_none());
        let page = page_with_image(100, 200);
        assert!(crop_block(&page, &PolygonBox::from_bbox([5.0, 5.0, 5.0, 5.0])).is_none());
    }

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_png(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }
}
