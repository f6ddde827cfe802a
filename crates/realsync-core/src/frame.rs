use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// Decode an encoded image payload (JPEG, PNG, ...) into an 8-bit RGB raster.
pub fn decode_frame(payload: &[u8]) -> Result<RgbImage, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    let rgb = image::load_from_memory(payload)?.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(DecodeError::ZeroArea {
            width: rgb.width(),
            height: rgb.height(),
        });
    }

    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decodes_png() {
        let img = RgbImage::from_pixel(32, 24, Rgb([10, 20, 30]));
        let decoded = decode_frame(&encode_png(&img)).unwrap();
        assert_eq!(decoded.dimensions(), (32, 24));
        assert_eq!(decoded.get_pixel(5, 5), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_rejects_empty_payload() {
        assert!(matches!(decode_frame(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = decode_frame(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }

    #[test]
    fn test_rejects_truncated_png() {
        let img = RgbImage::from_pixel(64, 64, Rgb([200, 100, 50]));
        let png = encode_png(&img);
        assert!(decode_frame(&png[..png.len() / 2]).is_err());
    }
}
