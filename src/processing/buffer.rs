use std::fmt;

use half::f16;
use thiserror::Error;

/// Storage type of a single channel sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementFormat {
    U8,
    U16,
    F16,
    F32,
}

impl ElementFormat {
    pub fn size_bytes(self) -> usize {
        match self {
            ElementFormat::U8 => 1,
            ElementFormat::U16 | ElementFormat::F16 => 2,
            ElementFormat::F32 => 4,
        }
    }
}

impl fmt::Display for ElementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementFormat::U8 => "uint8",
            ElementFormat::U16 => "uint16",
            ElementFormat::F16 => "half",
            ElementFormat::F32 => "float",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PixelError {
    #[error("unsupported image type: {0}")]
    UnsupportedFormat(String),
    #[error("invalid channel list '{list}': {reason}")]
    InvalidChannelList { list: String, reason: String },
    #[error("element format mismatch: source is {src}, destination is {dst}")]
    FormatMismatch {
        src: ElementFormat,
        dst: ElementFormat,
    },
    #[error("{actual} samples do not fill a {width}x{height}x{channels} image")]
    SizeMismatch {
        width: usize,
        height: usize,
        channels: usize,
        actual: usize,
    },
    #[error("cannot process an image with {0} channels")]
    UnsupportedChannelCount(usize),
}

/// A sample type that can live in a [`PixelBuffer`].
///
/// Integer formats are normalised to `[0, 1]` when converted to float.
pub trait Element: bytemuck::Pod + Default + Send + Sync {
    const FORMAT: ElementFormat;

    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

impl Element for u8 {
    const FORMAT: ElementFormat = ElementFormat::U8;

    fn to_f32(self) -> f32 {
        self as f32 / 255.0
    }

    fn from_f32(value: f32) -> Self {
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

impl Element for u16 {
    const FORMAT: ElementFormat = ElementFormat::U16;

    fn to_f32(self) -> f32 {
        self as f32 / 65535.0
    }

    fn from_f32(value: f32) -> Self {
        (value.clamp(0.0, 1.0) * 65535.0).round() as u16
    }
}

impl Element for f16 {
    const FORMAT: ElementFormat = ElementFormat::F16;

    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Element for f32 {
    const FORMAT: ElementFormat = ElementFormat::F32;

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

/// Owned sample storage. A buffer never mixes formats.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F16(Vec<f16>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn zeroed(format: ElementFormat, len: usize) -> Self {
        match format {
            ElementFormat::U8 => PixelData::U8(vec![0; len]),
            ElementFormat::U16 => PixelData::U16(vec![0; len]),
            ElementFormat::F16 => PixelData::F16(vec![f16::ZERO; len]),
            ElementFormat::F32 => PixelData::F32(vec![0.0; len]),
        }
    }

    pub fn format(&self) -> ElementFormat {
        match self {
            PixelData::U8(_) => ElementFormat::U8,
            PixelData::U16(_) => ElementFormat::U16,
            PixelData::F16(_) => ElementFormat::F16,
            PixelData::F32(_) => ElementFormat::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::F16(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelData::U8(v) => v,
            PixelData::U16(v) => bytemuck::cast_slice(v),
            PixelData::F16(v) => bytemuck::cast_slice(v),
            PixelData::F32(v) => bytemuck::cast_slice(v),
        }
    }

    fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            PixelData::U8(v) => v.iter().map(|&s| s.to_f32()).collect(),
            PixelData::U16(v) => v.iter().map(|&s| s.to_f32()).collect(),
            PixelData::F16(v) => v.iter().map(|&s| Element::to_f32(s)).collect(),
            PixelData::F32(v) => v.clone(),
        }
    }

    fn from_f32_slice(format: ElementFormat, values: &[f32]) -> Self {
        match format {
            ElementFormat::U8 => PixelData::U8(values.iter().map(|&v| u8::from_f32(v)).collect()),
            ElementFormat::U16 => {
                PixelData::U16(values.iter().map(|&v| u16::from_f32(v)).collect())
            }
            ElementFormat::F16 => {
                PixelData::F16(values.iter().map(|&v| <f16 as Element>::from_f32(v)).collect())
            }
            ElementFormat::F32 => PixelData::F32(values.to_vec()),
        }
    }
}

/// Integer rectangle in image space. The origin may be negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn at_origin(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Data window (where pixels are stored) and full/display window of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageRegion {
    pub data: Rect,
    pub full: Rect,
}

impl ImageRegion {
    /// A region whose data window covers the full window exactly.
    pub fn uncropped(width: usize, height: usize) -> Self {
        let rect = Rect::at_origin(width, height);
        Self {
            data: rect,
            full: rect,
        }
    }
}

/// One image: `width × height × channels` samples, channels interleaved,
/// rows top to bottom. Sample `(x, y, c)` lives at `(y·width + x)·channels + c`.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    channels: usize,
    data: PixelData,
}

impl PixelBuffer {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: PixelData,
    ) -> Result<Self, PixelError> {
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(PixelError::SizeMismatch {
                width,
                height,
                channels,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn zeroed(width: usize, height: usize, channels: usize, format: ElementFormat) -> Self {
        Self {
            width,
            height,
            channels,
            data: PixelData::zeroed(format, width * height * channels),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn format(&self) -> ElementFormat {
        self.data.format()
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut PixelData {
        &mut self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn index(&self, x: usize, y: usize, channel: usize) -> usize {
        (y * self.width + x) * self.channels + channel
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            PixelData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            PixelData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the buffer converted to `format`; a same-format request moves
    /// the buffer through untouched.
    pub fn into_format(self, format: ElementFormat) -> PixelBuffer {
        if self.format() == format {
            return self;
        }
        let values = self.data.to_f32_vec();
        PixelBuffer {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: PixelData::from_f32_slice(format, &values),
        }
    }
}
