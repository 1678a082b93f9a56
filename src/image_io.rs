//! Image loading and saving. OpenEXR goes through the `exr` crate so half
//! floats, data/display windows and header attributes survive; every other
//! format goes through `image`.

use std::path::Path;

use exr::compression::Compression;
use exr::meta::attribute::{AttributeValue as ExrValue, Text};
use exr::meta::header::{ImageAttributes, LayerAttributes};
use exr::prelude::{
    AnyChannel, AnyChannels, Encoding, FlatSamples, Image, IntegerBounds, Layer, Vec2,
    WritableImage, read_first_flat_layer_from_file,
};
use half::f16;
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use thiserror::Error;
use tracing::{debug, warn};

use crate::attributes::{Attribute, AttributeValue};
use crate::processing::buffer::{
    Element, ElementFormat, ImageRegion, PixelBuffer, PixelData, PixelError, Rect,
};

const RGBA_NAMES: [&str; 4] = ["R", "G", "B", "A"];

#[derive(Debug, Error)]
pub enum ImageIoError {
    #[error("cannot read '{path}': {message}")]
    Read { path: String, message: String },
    #[error("cannot write '{path}': {message}")]
    Write { path: String, message: String },
    #[error("unsupported image layout: {0}")]
    UnsupportedLayout(String),
    #[error(transparent)]
    Pixel(#[from] PixelError),
}

fn read_error(path: &Path, err: impl ToString) -> ImageIoError {
    ImageIoError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn write_error(path: &Path, err: impl ToString) -> ImageIoError {
    ImageIoError::Write {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// EXR header state carried from the input file to the output, so metadata
/// and compression survive a conversion. Empty for non-EXR inputs.
#[derive(Clone, Debug, Default)]
pub struct ImageHeader {
    pub compression: Option<Compression>,
    pub image_attributes: Option<ImageAttributes>,
    pub layer_attributes: Option<LayerAttributes>,
}

#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub buffer: PixelBuffer,
    pub region: ImageRegion,
    pub header: ImageHeader,
}

impl LoadedImage {
    /// Converts the pixels to `format`, normalising integer samples.
    pub fn read_as(self, format: ElementFormat) -> LoadedImage {
        LoadedImage {
            buffer: self.buffer.into_format(format),
            ..self
        }
    }
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    exts.iter().any(|known| ext.eq_ignore_ascii_case(known))
}

fn is_exr(path: &Path) -> bool {
    has_extension(path, &["exr"])
}

pub fn open(path: &Path) -> Result<LoadedImage, ImageIoError> {
    let loaded = if is_exr(path) {
        open_exr(path)?
    } else {
        open_with_image(path)?
    };
    debug!(
        path = %path.display(),
        width = loaded.buffer.width(),
        height = loaded.buffer.height(),
        channels = loaded.buffer.channels(),
        format = %loaded.buffer.format(),
        "image loaded"
    );
    Ok(loaded)
}

fn channel_rank(name: &str) -> usize {
    RGBA_NAMES
        .iter()
        .position(|n| *n == name)
        .unwrap_or(RGBA_NAMES.len())
}

fn open_exr(path: &Path) -> Result<LoadedImage, ImageIoError> {
    let image = read_first_flat_layer_from_file(path).map_err(|e| read_error(path, e))?;
    let layer = &image.layer_data;
    let width = layer.size.width();
    let height = layer.size.height();
    let pixel_count = width * height;

    let mut channels: Vec<&AnyChannel<FlatSamples>> = layer.channel_data.list.iter().collect();
    channels.sort_by(|a, b| {
        let (a, b) = (a.name.to_string(), b.name.to_string());
        channel_rank(&a).cmp(&channel_rank(&b)).then(a.cmp(&b))
    });
    if channels.is_empty() {
        return Err(ImageIoError::UnsupportedLayout(
            "EXR layer has no channels".to_string(),
        ));
    }
    if let Some(sub) = channels.iter().find(|c| c.sample_data.len() != pixel_count) {
        return Err(ImageIoError::UnsupportedLayout(format!(
            "channel '{}' is subsampled",
            sub.name
        )));
    }

    let count = channels.len();
    let all_half = channels
        .iter()
        .all(|c| matches!(c.sample_data, FlatSamples::F16(_)));
    let data = if all_half {
        let mut out = vec![f16::ZERO; pixel_count * count];
        for (c, channel) in channels.iter().enumerate() {
            if let FlatSamples::F16(samples) = &channel.sample_data {
                for (i, &v) in samples.iter().enumerate() {
                    out[i * count + c] = v;
                }
            }
        }
        PixelData::F16(out)
    } else {
        let mut out = vec![0.0f32; pixel_count * count];
        for (c, channel) in channels.iter().enumerate() {
            for (i, v) in channel.sample_data.values_as_f32().enumerate() {
                out[i * count + c] = v;
            }
        }
        PixelData::F32(out)
    };

    let position = layer.attributes.layer_position;
    let display = image.attributes.display_window;
    let region = ImageRegion {
        data: Rect::new(position.x(), position.y(), width, height),
        full: Rect::new(
            display.position.x(),
            display.position.y(),
            display.size.width(),
            display.size.height(),
        ),
    };
    let header = ImageHeader {
        compression: Some(layer.encoding.compression),
        image_attributes: Some(image.attributes.clone()),
        layer_attributes: Some(layer.attributes.clone()),
    };
    Ok(LoadedImage {
        buffer: PixelBuffer::new(width, height, count, data)?,
        region,
        header,
    })
}

fn open_with_image(path: &Path) -> Result<LoadedImage, ImageIoError> {
    let img = image::ImageReader::open(path)
        .map_err(|e| read_error(path, e))?
        .with_guessed_format()
        .map_err(|e| read_error(path, e))?
        .decode()
        .map_err(|e| read_error(path, e))?;
    let (width, height) = (img.width() as usize, img.height() as usize);
    let (channels, data) = match img {
        DynamicImage::ImageLuma8(b) => (1, PixelData::U8(b.into_raw())),
        DynamicImage::ImageLumaA8(b) => (2, PixelData::U8(b.into_raw())),
        DynamicImage::ImageRgb8(b) => (3, PixelData::U8(b.into_raw())),
        DynamicImage::ImageRgba8(b) => (4, PixelData::U8(b.into_raw())),
        DynamicImage::ImageLuma16(b) => (1, PixelData::U16(b.into_raw())),
        DynamicImage::ImageLumaA16(b) => (2, PixelData::U16(b.into_raw())),
        DynamicImage::ImageRgb16(b) => (3, PixelData::U16(b.into_raw())),
        DynamicImage::ImageRgba16(b) => (4, PixelData::U16(b.into_raw())),
        DynamicImage::ImageRgb32F(b) => (3, PixelData::F32(b.into_raw())),
        DynamicImage::ImageRgba32F(b) => (4, PixelData::F32(b.into_raw())),
        other => (4, PixelData::F32(other.into_rgba32f().into_raw())),
    };
    Ok(LoadedImage {
        buffer: PixelBuffer::new(width, height, channels, data)?,
        region: ImageRegion::uncropped(width, height),
        header: ImageHeader::default(),
    })
}

/// Writes `buffer` to `path`. `region.data` places the pixels and
/// `region.full` becomes the display window where the format has one.
/// EXR outputs start from `header` and `attributes` are stamped over it.
pub fn write(
    path: &Path,
    buffer: &PixelBuffer,
    region: &ImageRegion,
    header: &ImageHeader,
    attributes: &[Attribute],
) -> Result<(), ImageIoError> {
    if is_exr(path) {
        write_exr(path, buffer, region, header, attributes)
    } else {
        if !attributes.is_empty() {
            warn!(
                path = %path.display(),
                count = attributes.len(),
                "output format cannot store header attributes; dropping them"
            );
        }
        write_with_image(path, buffer)
    }
}

fn exr_channel_name(index: usize, count: usize) -> String {
    if count <= RGBA_NAMES.len() {
        RGBA_NAMES[index].to_string()
    } else {
        format!("channel{}", index)
    }
}

fn exr_text(value: &str) -> Result<Text, ImageIoError> {
    Text::new_or_none(value).ok_or_else(|| {
        ImageIoError::UnsupportedLayout(format!("'{}' is not valid EXR header text", value))
    })
}

fn exr_value(value: &AttributeValue) -> Result<ExrValue, ImageIoError> {
    Ok(match value {
        AttributeValue::Float(v) => ExrValue::F32(*v),
        AttributeValue::Int(v) => ExrValue::I32(*v),
        AttributeValue::Text(v) => ExrValue::Text(exr_text(v)?),
    })
}

fn pick<T: Element>(samples: &[T], channel: usize, count: usize) -> impl Iterator<Item = T> + '_ {
    samples.iter().skip(channel).step_by(count).copied()
}

/// One channel of interleaved pixels as EXR samples. Half stays half;
/// integers are normalised to float.
fn planar_samples(data: &PixelData, channel: usize, count: usize) -> FlatSamples {
    match data {
        PixelData::F16(v) => FlatSamples::F16(pick(v, channel, count).collect()),
        PixelData::F32(v) => FlatSamples::F32(pick(v, channel, count).collect()),
        PixelData::U8(v) => {
            FlatSamples::F32(pick(v, channel, count).map(Element::to_f32).collect())
        }
        PixelData::U16(v) => {
            FlatSamples::F32(pick(v, channel, count).map(Element::to_f32).collect())
        }
    }
}

fn write_exr(
    path: &Path,
    buffer: &PixelBuffer,
    region: &ImageRegion,
    header: &ImageHeader,
    attributes: &[Attribute],
) -> Result<(), ImageIoError> {
    let (width, height, count) = (buffer.width(), buffer.height(), buffer.channels());
    let mut list = smallvec::SmallVec::new();
    for c in 0..count {
        list.push(AnyChannel::new(
            exr_text(&exr_channel_name(c, count))?,
            planar_samples(buffer.data(), c, count),
        ));
    }

    let mut layer_attributes = header.layer_attributes.clone().unwrap_or_default();
    layer_attributes.layer_position = Vec2(region.data.x, region.data.y);
    let encoding = Encoding {
        compression: header
            .compression
            .unwrap_or(Encoding::FAST_LOSSLESS.compression),
        ..Encoding::FAST_LOSSLESS
    };
    let display_window = IntegerBounds::new(
        (region.full.x, region.full.y),
        (region.full.width, region.full.height),
    );
    let mut image_attributes = header
        .image_attributes
        .clone()
        .unwrap_or_else(|| ImageAttributes::new(display_window));
    image_attributes.display_window = display_window;

    for attribute in attributes {
        let name = exr_text(&attribute.name)?;
        layer_attributes.other.remove(&name);
        image_attributes.other.insert(name, exr_value(&attribute.value)?);
    }

    let layer = Layer::new(
        (width, height),
        layer_attributes,
        encoding,
        AnyChannels::sort(list),
    );
    let image = Image::new(image_attributes, layer);
    image.write().to_file(path).map_err(|e| write_error(path, e))
}

fn write_with_image(path: &Path, buffer: &PixelBuffer) -> Result<(), ImageIoError> {
    let deep = has_extension(path, &["png", "tif", "tiff"]);
    let target = match buffer.format() {
        ElementFormat::U8 => ElementFormat::U8,
        _ if deep => ElementFormat::U16,
        _ => ElementFormat::U8,
    };
    let (w, h) = (buffer.width() as u32, buffer.height() as u32);
    let channels = buffer.channels();
    let converted = buffer.clone().into_format(target);
    let layout_error = || {
        ImageIoError::UnsupportedLayout(format!(
            "{} channels of {} cannot be written to {}",
            channels,
            target,
            path.display()
        ))
    };
    let img = match converted.data().clone() {
        PixelData::U8(v) => match channels {
            1 => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, v).map(DynamicImage::ImageLuma8),
            2 => ImageBuffer::<LumaA<u8>, _>::from_raw(w, h, v).map(DynamicImage::ImageLumaA8),
            3 => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, v).map(DynamicImage::ImageRgb8),
            4 => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, v).map(DynamicImage::ImageRgba8),
            _ => None,
        },
        PixelData::U16(v) => match channels {
            1 => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v).map(DynamicImage::ImageLuma16),
            2 => ImageBuffer::<LumaA<u16>, _>::from_raw(w, h, v).map(DynamicImage::ImageLumaA16),
            3 => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, v).map(DynamicImage::ImageRgb16),
            4 => ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, v).map(DynamicImage::ImageRgba16),
            _ => None,
        },
        PixelData::F16(_) | PixelData::F32(_) => None,
    }
    .ok_or_else(layout_error)?;
    img.save(path).map_err(|e| write_error(path, e))
}

#[cfg(test)]
mod tests {
    use half::f16;

    use exr::compression::Compression;
    use exr::meta::MetaData;
    use exr::meta::attribute::{AttributeValue as ExrValue, Text};

    use super::{ImageHeader, ImageIoError, open, write};
    use crate::attributes::{Attribute, AttributeValue};
    use crate::processing::buffer::{ElementFormat, ImageRegion, PixelBuffer, PixelData, Rect};

    fn header_value(path: &std::path::Path, name: &str) -> Option<ExrValue> {
        let meta = MetaData::read_from_file(path, false).unwrap();
        let header = &meta.headers[0];
        let key = Text::new_or_none(name).unwrap();
        header
            .shared_attributes
            .other
            .get(&key)
            .or_else(|| header.own_attributes.other.get(&key))
            .cloned()
    }

    #[test]
    fn png_round_trip_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let data: Vec<u8> = (0..2 * 3 * 4).map(|v| (v * 10) as u8).collect();
        let buffer = PixelBuffer::new(2, 3, 4, PixelData::U8(data)).unwrap();
        write(&path, &buffer, &ImageRegion::uncropped(2, 3), &ImageHeader::default(), &[]).unwrap();

        let loaded = open(&path).unwrap();
        assert_eq!(loaded.buffer, buffer);
        assert_eq!(loaded.region, ImageRegion::uncropped(2, 3));
    }

    #[test]
    fn float_pixels_become_sixteen_bit_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let buffer = PixelBuffer::new(1, 1, 3, PixelData::F32(vec![0.0, 1.0, 2.0])).unwrap();
        write(&path, &buffer, &ImageRegion::uncropped(1, 1), &ImageHeader::default(), &[]).unwrap();

        let loaded = open(&path).unwrap();
        assert_eq!(loaded.buffer.data(), &PixelData::U16(vec![0, 65535, 65535]));
    }

    #[test]
    fn exr_round_trip_keeps_half_windows_and_channel_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.exr");
        let values: Vec<f16> = (0..2 * 2 * 4).map(|v| f16::from_f32(v as f32 * 0.5)).collect();
        let buffer = PixelBuffer::new(2, 2, 4, PixelData::F16(values)).unwrap();
        let region = ImageRegion {
            data: Rect::new(1, 2, 2, 2),
            full: Rect::new(0, 0, 4, 5),
        };
        let attributes = vec![
            Attribute {
                name: "gain".to_string(),
                value: AttributeValue::Float(1.5),
            },
            Attribute {
                name: "note".to_string(),
                value: AttributeValue::Text("hello".to_string()),
            },
        ];
        write(&path, &buffer, &region, &ImageHeader::default(), &attributes).unwrap();

        let loaded = open(&path).unwrap();
        assert_eq!(loaded.buffer.format(), ElementFormat::F16);
        assert_eq!(loaded.buffer, buffer);
        assert_eq!(loaded.region, region);

        assert!(matches!(header_value(&path, "gain"), Some(ExrValue::F32(v)) if v == 1.5));
    }

    #[test]
    fn exr_header_and_compression_carry_through_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.exr");
        let second = dir.path().join("second.exr");
        let buffer = PixelBuffer::new(2, 1, 3, PixelData::F32(vec![0.1; 6])).unwrap();
        let region = ImageRegion::uncropped(2, 1);
        let header = ImageHeader {
            compression: Some(Compression::ZIP16),
            ..ImageHeader::default()
        };
        let stamped = vec![
            Attribute {
                name: "camera".to_string(),
                value: AttributeValue::Text("A".to_string()),
            },
            Attribute {
                name: "iso".to_string(),
                value: AttributeValue::Int(400),
            },
        ];
        write(&first, &buffer, &region, &header, &stamped).unwrap();

        let loaded = open(&first).unwrap();
        assert_eq!(loaded.header.compression, Some(Compression::ZIP16));
        let restamped = vec![
            Attribute {
                name: "iso".to_string(),
                value: AttributeValue::Int(800),
            },
            Attribute {
                name: "grade".to_string(),
                value: AttributeValue::Float(0.5),
            },
        ];
        write(&second, &loaded.buffer, &loaded.region, &loaded.header, &restamped).unwrap();

        let meta = MetaData::read_from_file(&second, false).unwrap();
        assert_eq!(meta.headers[0].compression, Compression::ZIP16);
        let camera = Text::new_or_none("A").unwrap();
        assert!(matches!(header_value(&second, "camera"), Some(ExrValue::Text(t)) if t == camera));
        assert!(matches!(header_value(&second, "iso"), Some(ExrValue::I32(800))));
        assert!(matches!(header_value(&second, "grade"), Some(ExrValue::F32(v)) if v == 0.5));
    }

    #[test]
    fn integer_pixels_are_stored_as_float_in_exr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.exr");
        let buffer = PixelBuffer::new(1, 1, 2, PixelData::U8(vec![0, 255])).unwrap();
        write(&path, &buffer, &ImageRegion::uncropped(1, 1), &ImageHeader::default(), &[]).unwrap();
        let loaded = open(&path).unwrap();
        assert_eq!(loaded.buffer.as_f32().unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = open(std::path::Path::new("/nonexistent/input.png")).unwrap_err();
        assert!(matches!(err, ImageIoError::Read { ref path, .. } if path.contains("input.png")));
    }

    #[test]
    fn too_many_channels_for_png_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let buffer = PixelBuffer::zeroed(1, 1, 5, ElementFormat::U8);
        let err = write(
            &path,
            &buffer,
            &ImageRegion::uncropped(1, 1),
            &ImageHeader::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ImageIoError::UnsupportedLayout(_)));
    }
}
