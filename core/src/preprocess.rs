//! Query image decoding and tensor preparation.
//!
//! Every query goes through the same routine regardless of where it came
//! from: bytes are read (from storage for [`ImageSource::Path`]), the encoding
//! is sniffed from the content, the image is converted to RGB8 and resized to
//! exactly 224x224 with nearest-neighbour sampling, then scaled to `[0, 1]`.
//! The resampling filter is part of the model contract and is not tunable.

use std::borrow::Cow;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use ndarray::{Array4, ArrayView4};

use crate::{Result, RetrievalError};

/// Input edge length expected by the embedding function.
pub const TARGET_SIZE: u32 = 224;

/// Colour channels in the tensor (RGB).
pub const CHANNELS: usize = 3;

/// Divisor mapping raw 8-bit channel values into `[0, 1]`.
pub const PIXEL_SCALE: f32 = 255.0;

/// Resampling policy used when resizing to [`TARGET_SIZE`].
pub const RESAMPLE_FILTER: FilterType = FilterType::Nearest;

/// Encodings accepted for query images.
pub const SUPPORTED_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Where a query image comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Image file on local storage.
    Path(PathBuf),
    /// Encoded image already in memory (e.g. an upload).
    Bytes(Vec<u8>),
}

impl ImageSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Read the encoded bytes behind this source.
    fn read(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            Self::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            Self::Path(path) => fs_err::read(path)
                .map(Cow::Owned)
                .map_err(|err| RetrievalError::decode(err.to_string())),
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(bytes) => f
                .debug_struct("Bytes")
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Single-image batch in NHWC layout: `[1, height, width, 3]`, float32 in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    data: Array4<f32>,
}

impl PreprocessedTensor {
    #[must_use]
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    #[must_use]
    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    /// `[batch, height, width, channels]`
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        let dims = self.data.dim();
        [dims.0, dims.1, dims.2, dims.3]
    }

    /// Flat row-major pixel values.
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.data.iter().copied()
    }
}

/// Decodes query images into the tensor shape the embedding function was trained on.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    target_size: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            target_size: TARGET_SIZE,
        }
    }
}

impl Preprocessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Decode `source` and produce the model input tensor.
    pub fn preprocess(&self, source: &ImageSource) -> Result<PreprocessedTensor> {
        let bytes = source.read()?;
        let image = decode_image(&bytes)?;
        Ok(self.preprocess_image(&image))
    }

    /// Convert an already-decoded image into the model input tensor.
    #[must_use]
    pub fn preprocess_image(&self, image: &DynamicImage) -> PreprocessedTensor {
        let rgb = image.to_rgb8();
        let resized: RgbImage =
            imageops::resize(&rgb, self.target_size, self.target_size, RESAMPLE_FILTER);

        let size = self.target_size as usize;
        let data = Array4::from_shape_fn((1, size, size, CHANNELS), |(_, y, x, c)| {
            f32::from(resized.get_pixel(x as u32, y as u32)[c]) / PIXEL_SCALE
        });

        tracing::debug!(
            source_width = image.width(),
            source_height = image.height(),
            size = self.target_size,
            "preprocessed query image"
        );

        PreprocessedTensor { data }
    }
}

/// Decode encoded image bytes, sniffing the format from content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(RetrievalError::decode("image data is empty"));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| RetrievalError::decode(err.to_string()))?;

    let format = reader
        .format()
        .ok_or_else(|| RetrievalError::decode("unrecognised image encoding"))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(RetrievalError::decode(format!(
            "unsupported image encoding {format:?}"
        )));
    }

    reader
        .decode()
        .map_err(|err| RetrievalError::decode(format!("{format:?} data is corrupt: {err}")))
}
