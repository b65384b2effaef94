//! Raster image import.

use crate::scene::{NodeContent, NodeTransform, SceneNode};
use base64::{Engine, engine::general_purpose::STANDARD};
use kurbo::Size;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Image format for stored image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    WebP,
    Gif,
}

impl ImageFormat {
    /// Get MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }

    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "webp" => Some(ImageFormat::WebP),
            "gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    /// Detect format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            return Some(ImageFormat::Png);
        }
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }
        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Some(ImageFormat::Gif);
        }
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Some(ImageFormat::WebP);
        }
        None
    }

    fn from_image_format(format: ::image::ImageFormat) -> Option<Self> {
        match format {
            ::image::ImageFormat::Png => Some(ImageFormat::Png),
            ::image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            ::image::ImageFormat::WebP => Some(ImageFormat::WebP),
            ::image::ImageFormat::Gif => Some(ImageFormat::Gif),
            _ => None,
        }
    }
}

/// Image import errors.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Empty image")]
    Empty,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] ::image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type ImageResult<T> = Result<T, ImageError>;

/// An encoded raster image with its natural size, ready to become a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
    pub natural_width: u32,
    pub natural_height: u32,
}

impl ImportedImage {
    /// Probe the header for format and dimensions; pixels are not decoded.
    pub fn from_bytes(bytes: Vec<u8>) -> ImageResult<Self> {
        let reader = ::image::ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
        let format = reader
            .format()
            .and_then(ImageFormat::from_image_format)
            .or_else(|| ImageFormat::from_magic_bytes(&bytes))
            .ok_or(ImageError::UnsupportedFormat)?;
        let (natural_width, natural_height) = reader.into_dimensions()?;
        if natural_width == 0 || natural_height == 0 {
            return Err(ImageError::Empty);
        }
        log::debug!(
            "Imported {} image {}x{} ({} bytes)",
            format.mime_type(),
            natural_width,
            natural_height,
            bytes.len()
        );
        Ok(Self {
            format,
            bytes,
            natural_width,
            natural_height,
        })
    }

    /// Rebuild from scene content, e.g. an image node read back from a snapshot.
    pub fn from_base64(format: ImageFormat, data: &str) -> ImageResult<Self> {
        let bytes = STANDARD.decode(data)?;
        let mut image = Self::from_bytes(bytes)?;
        image.format = format;
        Ok(image)
    }

    pub fn natural_size(&self) -> Size {
        Size::new(self.natural_width as f64, self.natural_height as f64)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:` URL suitable for an `<img>` source.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.mime_type(), self.to_base64())
    }

    /// Scene node showing this image at `size`, placed at `left`/`top`.
    pub fn to_node(&self, left: f64, top: f64, size: Size) -> SceneNode {
        SceneNode::new(
            NodeContent::Image {
                format: self.format,
                data_base64: self.to_base64(),
                natural_width: self.natural_width,
                natural_height: self.natural_height,
            },
            NodeTransform::new(left, top, size.width, size.height),
        )
    }
}

/// Largest size with the aspect ratio of `natural` that fits in `max`.
/// Images already inside `max` keep their natural size.
pub fn fit_within(natural: Size, max: Size) -> Size {
    if natural.width <= 0.0 || natural.height <= 0.0 {
        return natural;
    }
    if natural.width <= max.width && natural.height <= max.height {
        return natural;
    }
    let aspect = natural.width / natural.height;
    let target_aspect = max.width / max.height;
    if aspect > target_aspect {
        Size::new(max.width, max.width / aspect)
    } else {
        Size::new(max.height * aspect, max.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ::image::RgbaImage::new(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ::image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ImageFormat::from_extension("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("gif"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::from_extension("bmp"), None);

        assert_eq!(
            ImageFormat::from_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"GIF89a.."), Some(ImageFormat::Gif));
        assert_eq!(
            ImageFormat::from_magic_bytes(b"RIFF\0\0\0\0WEBPVP8 "),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(&[0x00]), None);
    }

    #[test]
    fn test_from_bytes_reads_dimensions() {
        let image = ImportedImage::from_bytes(png_bytes(40, 30)).unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!(image.natural_size(), Size::new(40.0, 30.0));
        assert!(image.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let result = ImportedImage::from_bytes(b"definitely not an image".to_vec());
        assert!(result.is_err());
    }

    #[test]
    fn test_base64_round_trip() {
        let image = ImportedImage::from_bytes(png_bytes(8, 8)).unwrap();
        let again = ImportedImage::from_base64(image.format, &image.to_base64()).unwrap();
        assert_eq!(again, image);
    }

    #[test]
    fn test_to_node() {
        let image = ImportedImage::from_bytes(png_bytes(20, 10)).unwrap();
        let node = image.to_node(5.0, 6.0, Size::new(200.0, 100.0));
        assert_eq!(node.transform.left, 5.0);
        assert_eq!(node.transform.width, 200.0);
        assert!(matches!(
            node.content,
            NodeContent::Image {
                natural_width: 20,
                natural_height: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(
            fit_within(Size::new(2000.0, 1000.0), Size::new(1080.0, 1080.0)),
            Size::new(1080.0, 540.0)
        );
        assert_eq!(
            fit_within(Size::new(500.0, 2000.0), Size::new(1000.0, 1000.0)),
            Size::new(250.0, 1000.0)
        );
        assert_eq!(
            fit_within(Size::new(300.0, 200.0), Size::new(1080.0, 1080.0)),
            Size::new(300.0, 200.0)
        );
    }
}
