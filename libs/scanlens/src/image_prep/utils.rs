use std::borrow::Cow;

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

use crate::error::ScanError;

/// Uploads above this many bytes get downscaled before dispatch.
pub const MAX_RAW_BYTES: usize = 1536 * 1024; // 1.5 MB
/// Longest axis after a downscale.
pub const MAX_DIMENSION: u32 = 1600;
const JPEG_QUALITY: u8 = 85;

/// Bytes ready for upload, tagged with the MIME type they should be
/// declared as. Borrows the original upload on the passthrough path.
#[derive(Debug)]
pub struct PreparedImage<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub mime_type: Cow<'a, str>,
}

/// Pass small uploads through untouched; decode and downscale anything
/// over the size threshold. A decode failure fails the request rather
/// than shipping undecodable bytes upstream.
pub fn prepare_image<'a>(
    bytes: &'a [u8],
    mime_type: &'a str,
) -> Result<PreparedImage<'a>, ScanError> {
    if bytes.len() <= MAX_RAW_BYTES {
        return Ok(PreparedImage {
            bytes: Cow::Borrowed(bytes),
            mime_type: Cow::Borrowed(mime_type),
        });
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ScanError::Input(format!("failed to decode image: {}", e)))?;

    // JPEG has no alpha channel, so flatten before encoding
    let thumbnail = decoded.thumbnail(MAX_DIMENSION, MAX_DIMENSION).to_rgb8();
    let (width, height) = thumbnail.dimensions();
    let resized = DynamicImage::ImageRgb8(thumbnail);

    let mut encoded = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
    resized
        .write_with_encoder(encoder)
        .map_err(|e| ScanError::Input(format!("failed to re-encode image: {}", e)))?;

    log::debug!(
        "downscaled upload from {} to {} bytes ({}x{})",
        bytes.len(),
        encoded.len(),
        width,
        height
    );

    Ok(PreparedImage {
        bytes: Cow::Owned(encoded),
        mime_type: Cow::Borrowed("image/jpeg"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn png_bytes(img: &image::RgbImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageFormat::Png,
        )
        .expect("PNG encoding should succeed");
        out
    }

    // Incompressible pixels, so the encoded size tracks the pixel count
    fn noise_image(width: u32, height: u32) -> image::RgbImage {
        let mut state = 0x2545F4914F6CDD1Du64;
        image::RgbImage::from_fn(width, height, |_, _| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let v = (state >> 33) as u32;
            image::Rgb([(v & 0xFF) as u8, ((v >> 8) & 0xFF) as u8, ((v >> 16) & 0xFF) as u8])
        })
    }

    #[test]
    fn test_small_upload_passes_through_unchanged() {
        let png = png_bytes(&noise_image(32, 32));
        assert!(png.len() <= MAX_RAW_BYTES);

        let prepared = prepare_image(&png, "image/png").expect("passthrough should succeed");
        assert_eq!(prepared.bytes.as_ref(), png.as_slice());
        assert_eq!(prepared.mime_type, "image/png");
        assert!(matches!(prepared.bytes, Cow::Borrowed(_)));
    }

    #[test]
    fn test_oversized_upload_is_downscaled_to_jpeg() {
        let png = png_bytes(&noise_image(1800, 1200));
        assert!(png.len() > MAX_RAW_BYTES, "fixture must exceed the threshold");

        let prepared = prepare_image(&png, "image/png").expect("downscale should succeed");
        assert_eq!(prepared.mime_type, "image/jpeg");
        assert!(prepared.bytes.len() < png.len());

        let roundtrip = image::load_from_memory(&prepared.bytes)
            .expect("output should be a decodable JPEG");
        assert!(roundtrip.width() <= MAX_DIMENSION);
        assert!(roundtrip.height() <= MAX_DIMENSION);
        // Aspect ratio preserved within rounding
        assert_eq!(roundtrip.width(), 1600);
        assert_eq!(roundtrip.height(), 1067);
    }

    #[test]
    fn test_oversized_image_with_alpha_flattens() {
        let mut state = 0x9E3779B97F4A7C15u64;
        let rgba = image::RgbaImage::from_fn(2000, 1400, |_, _| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let v = (state >> 33) as u32;
            image::Rgba([(v & 0xFF) as u8, ((v >> 8) & 0xFF) as u8, ((v >> 16) & 0xFF) as u8, 128])
        });
        let mut png = Vec::new();
        rgba.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert!(png.len() > MAX_RAW_BYTES);

        let prepared = prepare_image(&png, "image/png").expect("alpha input should re-encode");
        let roundtrip = image::load_from_memory(&prepared.bytes).unwrap();
        assert_eq!(roundtrip.width(), 1600);
    }

    #[test]
    fn test_oversized_garbage_is_rejected() {
        let garbage = vec![0u8; MAX_RAW_BYTES + 1];
        let err = prepare_image(&garbage, "image/png").unwrap_err();
        assert!(matches!(err, ScanError::Input(_)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // Exactly at the limit is still a passthrough, even for bytes that
        // could never decode
        let at_limit = vec![0u8; MAX_RAW_BYTES];
        let prepared = prepare_image(&at_limit, "image/bmp").unwrap();
        assert_eq!(prepared.bytes.len(), MAX_RAW_BYTES);
        assert_eq!(prepared.mime_type, "image/bmp");
    }
}
