//! Attached image handling.

use image::{ImageFormat, ImageError};
use std::fmt::{self, Debug, Formatter};
use std::io::Cursor;

/// How many leading bytes of image data take part in equality checks.
pub(crate) const SAMPLE_SIZE: usize = 512;

/// An attached picture.
///
/// The image is sniffed on ingest for its format and dimensions, but the
/// original bytes are kept untouched so a re-encoded tag carries the exact
/// payload that was read.
#[derive(Clone)]
pub struct Picture {
    data: Vec<u8>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl Picture {
    /// Wraps raw image data, sniffing its format and dimensions.
    ///
    /// # Errors
    /// If the data is not a recognizable, decodable image, the underlying
    /// image error is returned.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        let format = image::guess_format(&data)?;

        let reader = image::io::Reader::with_format(Cursor::new(&data), format);
        let (width, height) = reader.into_dimensions()?;

        Ok(Self {
            data,
            format,
            width,
            height,
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// The image dimensions, width first.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The original encoded bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// The leading bytes used for cheap equality.
    pub(crate) fn sample(&self) -> &[u8] {
        &self.data[..usize::min(self.data.len(), SAMPLE_SIZE)]
    }

    /// The three-letter format tag used by ID3v2.2 "PIC" frames.
    pub(crate) fn format_tag(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "JPG",
            ImageFormat::Png => "PNG",
            ImageFormat::Gif => "GIF",
            ImageFormat::Bmp => "BMP",
            _ => "IMG",
        }
    }

    /// The MIME type written into "APIC" frames.
    pub(crate) fn mime(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Bmp => "image/bmp",
            _ => "image/",
        }
    }
}

impl PartialEq for Picture {
    fn eq(&self, other: &Self) -> bool {
        self.format == other.format
            && self.size() == other.size()
            && self.sample() == other.sample()
    }
}

impl Debug for Picture {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write![
            f,
            "{}x{} {} Image",
            self.width,
            self.height,
            self.format_tag()
        ]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    // A 1x1 transparent PNG.
    pub(crate) const TINY_PNG: &[u8] = b"\x89PNG\x0D\x0A\x1A\x0A\
        \x00\x00\x00\x0DIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x06\x00\x00\x00\x1F\x15\xC4\x89\
        \x00\x00\x00\x0AIDAT\x78\x9C\x63\x00\x01\x00\x00\x05\x00\x01\x0D\x0A\x2D\xB4\
        \x00\x00\x00\x00IEND\xAE\x42\x60\x82";

    #[test]
    fn sniffs_png() {
        let pic = Picture::from_bytes(TINY_PNG.to_vec()).unwrap();

        assert_eq!(pic.format(), ImageFormat::Png);
        assert_eq!(pic.size(), (1, 1));
        assert_eq!(pic.format_tag(), "PNG");
        assert_eq!(pic.mime(), "image/png");
        assert_eq!(pic.data(), TINY_PNG);
    }

    #[test]
    fn rejects_junk() {
        assert!(Picture::from_bytes(b"not an image".to_vec()).is_err());
    }

    #[test]
    fn compares_by_sample() {
        let a = Picture::from_bytes(TINY_PNG.to_vec()).unwrap();
        let b = Picture::from_bytes(TINY_PNG.to_vec()).unwrap();
        assert_eq!(a, b);
    }
}
