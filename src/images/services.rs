use anyhow::Context;
use axum::extract::Multipart;
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const USER_PHOTO_SIZE: (u32, u32) = (500, 500);
pub const TOUR_IMAGE_SIZE: (u32, u32) = (2000, 1333);
const JPEG_QUALITY: u8 = 90;

/// One uploaded file as received from a multipart field.
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

impl UploadItem {
    pub fn ensure_image(&self) -> AppResult<()> {
        if self.content_type.starts_with("image/") {
            Ok(())
        } else {
            Err(AppError::bad_request(
                "Not an image! Please upload only images.",
            ))
        }
    }
}

/// Collects the file parts of a multipart body as `(field name, item)`,
/// allowing at most `max` files per field listed in `limits`. Other fields are ignored.
pub async fn read_uploads(
    mut multipart: Multipart,
    limits: &[(&str, usize)],
) -> AppResult<Vec<(String, UploadItem)>> {
    let mut items: Vec<(String, UploadItem)> = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let Some((_, max)) = limits.iter().find(|(n, _)| *n == name) else {
            continue;
        };
        if items.iter().filter(|(n, _)| *n == name).count() >= *max {
            return Err(AppError::bad_request(format!("Too many files for field {name}.")));
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let body = field.bytes().await?;
        let item = UploadItem { body, content_type };
        item.ensure_image()?;
        items.push((name, item));
    }
    Ok(items)
}

/// Crops to fill `width`x`height` and re-encodes as JPEG.
pub fn resize_to_jpeg(data: &[u8], width: u32, height: u32) -> anyhow::Result<Bytes> {
    let img = image::load_from_memory(data).context("decode image")?;
    let resized = img.resize_to_fill(width, height, FilterType::Lanczos3);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("encode jpeg")?;
    Ok(Bytes::from(out))
}

/// Resizes on the blocking pool, then stores the JPEG under `key`.
pub async fn store_resized(
    st: &AppState,
    key: &str,
    item: UploadItem,
    (width, height): (u32, u32),
) -> AppResult<()> {
    item.ensure_image()?;
    let body = item.body;
    let jpeg = tokio::task::spawn_blocking(move || resize_to_jpeg(&body, width, height))
        .await
        .context("resize task")?
        .map_err(|e| AppError::bad_request(format!("Could not process image: {e}")))?;
    let size = jpeg.len();
    st.storage
        .put_object(key, jpeg, "image/jpeg")
        .await
        .with_context(|| format!("put_object {key}"))?;
    debug!(%key, size, "image stored");
    Ok(())
}

#[cfg(test)]
mod image_tests {
    use super::*;
    use image::{ImageBuffer, ImageOutputFormat, Rgba};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(w, h, Rgba([200u8, 120, 40, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn resizes_to_exact_dimensions() {
        let jpeg = resize_to_jpeg(&png_bytes(64, 32), 20, 20).expect("resize");
        let decoded = image::load_from_memory(&jpeg).expect("decode jpeg");
        assert_eq!((decoded.width(), decoded.height()), (20, 20));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(resize_to_jpeg(b"definitely not an image", 10, 10).is_err());
    }

    #[test]
    fn non_image_content_type_is_rejected() {
        let item = UploadItem {
            body: Bytes::from_static(b"%PDF"),
            content_type: "application/pdf".into(),
        };
        assert!(matches!(item.ensure_image(), Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn store_resized_uses_storage() {
        let state = AppState::fake();
        let item = UploadItem {
            body: Bytes::from(png_bytes(8, 8)),
            content_type: "image/png".into(),
        };
        store_resized(&state, "users/user-1.jpeg", item, USER_PHOTO_SIZE)
            .await
            .expect("stored");
    }
}
