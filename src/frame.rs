use std::fmt;

use bytes::Bytes;
use image::ImageFormat;

use crate::error::PipelineError;

const RGBA_CHANNELS: usize = 4;
pub const RGB_CHANNELS: usize = 3;
/// End-of-image marker. The decoder pads a cut-off scan with grey instead of
/// failing, so completeness is checked up front.
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Encoded image payload exactly as downloaded. Cloning shares the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBytes(Bytes);

impl ImageBytes {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for ImageBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageBytes({} bytes)", self.0.len())
    }
}

/// Decoded RGBA pixels, row-major.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Decodes JPEG bytes into RGBA samples. Truncated files are rejected.
pub fn decode_jpeg(bytes: &ImageBytes) -> Result<DecodedImage, PipelineError> {
    if !ends_with_eoi(bytes.as_bytes()) {
        return Err(PipelineError::Decode(
            "truncated jpeg: missing end-of-image marker".into(),
        ));
    }
    let img = image::load_from_memory_with_format(bytes.as_bytes(), ImageFormat::Jpeg)
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedImage {
        width,
        height,
        rgba: rgba.into_raw(),
    })
}

// Some encoders pad the file with zeros after EOI.
fn ends_with_eoi(data: &[u8]) -> bool {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    data[..end].ends_with(&JPEG_EOI)
}

/// `[height, width, 3]` RGB samples fed to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationTensor {
    height: usize,
    width: usize,
    data: Vec<u8>,
}

impl ClassificationTensor {
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, RGB_CHANNELS]
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    #[cfg(test)]
    pub fn get(&self, y: usize, x: usize, c: usize) -> Option<u8> {
        if y >= self.height || x >= self.width || c >= RGB_CHANNELS {
            return None;
        }
        self.data
            .get((y * self.width + x) * RGB_CHANNELS + c)
            .copied()
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

/// Copies R, G and B of every pixel and drops alpha.
pub fn build_tensor(image: &DecodedImage) -> Result<ClassificationTensor, PipelineError> {
    let width = image.width as usize;
    let height = image.height as usize;
    let pixels = width * height;

    if image.rgba.len() != pixels * RGBA_CHANNELS {
        return Err(PipelineError::Decode(format!(
            "expected {} RGBA samples for {}x{}, got {}",
            pixels * RGBA_CHANNELS,
            width,
            height,
            image.rgba.len()
        )));
    }

    let mut data = Vec::with_capacity(pixels * RGB_CHANNELS);
    for pixel in image.rgba.chunks_exact(RGBA_CHANNELS) {
        data.extend_from_slice(&pixel[..RGB_CHANNELS]);
    }

    Ok(ClassificationTensor {
        height,
        width,
        data,
    })
}
