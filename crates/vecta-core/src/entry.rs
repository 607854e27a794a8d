//! Raw column entries and the decoded / processed image types
//!
//! Decoded images are kept as channels-first `u8` planes. Processed
//! images are channels-first `f32` arrays of the finalized shape.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use crate::config::ResizeMethod;

/// Gray level used for rows that could not be read.
pub const DEFAULT_GRAY_LEVEL: u8 = 128;

/// One cell of a vector2d column before processing.
#[derive(Debug, Clone)]
pub enum RawEntry {
    /// File path, absolute or relative to the dataset source.
    Path(String),
    /// Encoded image bytes (PNG, JPEG).
    Bytes(Vec<u8>),
    /// Height × width × channels pixel array.
    Array(HwcArray),
    /// Channels-first tensor.
    Tensor(Tensor),
    /// Null cell.
    Missing,
}

impl RawEntry {
    pub fn describe(&self) -> String {
        match self {
            RawEntry::Path(p) => p.clone(),
            RawEntry::Bytes(b) => format!("<{} bytes>", b.len()),
            RawEntry::Array(a) => format!("<array {}x{}x{}>", a.height, a.width, a.channels),
            RawEntry::Tensor(t) => format!("<tensor {:?}>", t.dims()),
            RawEntry::Missing => "<missing>".to_string(),
        }
    }
}

/// Row-major height × width × channels array, as produced by most image
/// libraries.
#[derive(Debug, Clone, PartialEq)]
pub struct HwcArray {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl HwcArray {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<u8>) -> Self {
        Self { height, width, channels, data }
    }
}

/// Channels-first 8-bit image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(channels: usize, height: usize, width: usize, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), channels * height * width);
        Self { channels, height, width, pixels }
    }

    pub fn filled(channels: usize, height: usize, width: usize, value: u8) -> Self {
        Self::new(channels, height, width, vec![value; channels * height * width])
    }

    /// Transpose interleaved HWC pixels into planes.
    pub fn from_interleaved(height: usize, width: usize, channels: usize, data: &[u8]) -> Option<Self> {
        if channels == 0 || data.len() != height * width * channels {
            return None;
        }
        let plane = height * width;
        let mut pixels = vec![0u8; data.len()];
        for (i, px) in data.chunks_exact(channels).enumerate() {
            for (c, &v) in px.iter().enumerate() {
                pixels[c * plane + i] = v;
            }
        }
        Some(Self::new(channels, height, width, pixels))
    }

    pub fn from_array(array: &HwcArray) -> Option<Self> {
        Self::from_interleaved(array.height, array.width, array.channels, &array.data)
    }

    /// Accepts a rank-3 channels-first tensor of any numeric dtype.
    pub fn from_tensor(tensor: &Tensor) -> Option<Self> {
        let (channels, height, width) = tensor.dims3().ok()?;
        let pixels = tensor
            .to_dtype(DType::U8)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<u8>())
            .ok()?;
        Some(Self::new(channels, height, width, pixels))
    }

    /// Decode into the requested channel depth. Unsupported depths keep
    /// the native channel count.
    pub fn from_dynamic(img: DynamicImage, num_channels: Option<usize>) -> Self {
        let channels = num_channels
            .filter(|c| (1..=4).contains(c))
            .unwrap_or(img.color().channel_count() as usize);
        let (width, height) = (img.width() as usize, img.height() as usize);
        let interleaved = match channels {
            1 => img.to_luma8().into_raw(),
            2 => img.to_luma_alpha8().into_raw(),
            3 => img.to_rgb8().into_raw(),
            _ => img.to_rgba8().into_raw(),
        };
        let channels = channels.min(4);
        Self::from_interleaved(height, width, channels, &interleaved)
            .unwrap_or_else(|| Self::filled(channels, height, width, 0))
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    fn plane(&self, c: usize) -> &[u8] {
        let n = self.height * self.width;
        &self.pixels[c * n..(c + 1) * n]
    }

    /// Luma conversion with the ITU-R 601 weights.
    pub fn grayscale(&self) -> Self {
        match self.channels {
            1 => self.clone(),
            2 => Self::new(1, self.height, self.width, self.plane(0).to_vec()),
            _ => {
                let (r, g, b) = (self.plane(0), self.plane(1), self.plane(2));
                let pixels = r
                    .iter()
                    .zip(g)
                    .zip(b)
                    .map(|((&r, &g), &b)| {
                        (0.2989 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).clamp(0.0, 255.0) as u8
                    })
                    .collect();
                Self::new(1, self.height, self.width, pixels)
            }
        }
    }

    pub fn resize(&self, height: usize, width: usize, method: ResizeMethod) -> Self {
        if self.height == height && self.width == width {
            return self.clone();
        }
        match method {
            ResizeMethod::Interpolate => self.interpolate(height, width),
            ResizeMethod::CropOrPad => self.pad_edge(height, width).center_crop(height, width),
        }
    }

    /// Bilinear resize, plane by plane.
    pub fn interpolate(&self, height: usize, width: usize) -> Self {
        if self.height == height && self.width == width {
            return self.clone();
        }
        let mut pixels = Vec::with_capacity(self.channels * height * width);
        for c in 0..self.channels {
            let plane = GrayImage::from_raw(self.width as u32, self.height as u32, self.plane(c).to_vec())
                .unwrap_or_else(|| GrayImage::new(self.width as u32, self.height as u32));
            let resized = image::imageops::resize(&plane, width as u32, height as u32, FilterType::Triangle);
            pixels.extend_from_slice(resized.as_raw());
        }
        Self::new(self.channels, height, width, pixels)
    }

    /// Pad with edge values until at least `height` × `width`.
    pub fn pad_edge(&self, height: usize, width: usize) -> Self {
        let new_h = self.height.max(height);
        let new_w = self.width.max(width);
        if new_h == self.height && new_w == self.width {
            return self.clone();
        }
        let top = (new_h - self.height) / 2;
        let left = (new_w - self.width) / 2;
        let mut pixels = Vec::with_capacity(self.channels * new_h * new_w);
        for c in 0..self.channels {
            let plane = self.plane(c);
            for y in 0..new_h {
                let sy = y.saturating_sub(top).min(self.height - 1);
                for x in 0..new_w {
                    let sx = x.saturating_sub(left).min(self.width - 1);
                    pixels.push(plane[sy * self.width + sx]);
                }
            }
        }
        Self::new(self.channels, new_h, new_w, pixels)
    }

    /// Center crop; the image must already be at least the target size.
    pub fn center_crop(&self, height: usize, width: usize) -> Self {
        let height = height.min(self.height);
        let width = width.min(self.width);
        let top = ((self.height - height) as f64 / 2.0).round_ties_even() as usize;
        let left = ((self.width - width) as f64 / 2.0).round_ties_even() as usize;
        let mut pixels = Vec::with_capacity(self.channels * height * width);
        for c in 0..self.channels {
            let plane = self.plane(c);
            for y in top..top + height {
                let row = y * self.width;
                pixels.extend_from_slice(&plane[row + left..row + left + width]);
            }
        }
        Self::new(self.channels, height, width, pixels)
    }

    /// Append zero planes up to `num_channels`. Never drops channels.
    pub fn pad_channels(&self, num_channels: usize) -> Self {
        if num_channels <= self.channels {
            return self.clone();
        }
        let mut pixels = self.pixels.clone();
        pixels.resize(num_channels * self.height * self.width, 0);
        Self::new(num_channels, self.height, self.width, pixels)
    }

    /// Truncate or repeat planes to exactly `num_channels`.
    pub fn resize_channels(&self, num_channels: usize) -> Self {
        if num_channels == self.channels {
            return self.clone();
        }
        let mut pixels = Vec::with_capacity(num_channels * self.height * self.width);
        for c in 0..num_channels {
            pixels.extend_from_slice(self.plane(c % self.channels));
        }
        Self::new(num_channels, self.height, self.width, pixels)
    }
}

/// Decode encoded bytes, `None` if the bytes are not a supported image.
pub fn decode_bytes(bytes: &[u8], num_channels: Option<usize>) -> Option<DecodedImage> {
    match image::load_from_memory(bytes) {
        Ok(img) => Some(DecodedImage::from_dynamic(img, num_channels)),
        Err(e) => {
            tracing::debug!("Failed to decode image bytes: {}", e);
            None
        }
    }
}

/// Read and decode a file. Also returns the file size when the read
/// itself succeeded.
pub fn read_image_from_path(path: &Path, num_channels: Option<usize>) -> (Option<DecodedImage>, Option<u64>) {
    match std::fs::read(path) {
        Ok(bytes) => {
            let num_bytes = bytes.len() as u64;
            (decode_bytes(&bytes, num_channels), Some(num_bytes))
        }
        Err(e) => {
            tracing::debug!("Failed to read image {}: {}", path.display(), e);
            (None, None)
        }
    }
}

/// Decode any raw entry. Paths are read as given; resolve them first.
pub fn decode_entry(entry: &RawEntry, num_channels: Option<usize>) -> Option<DecodedImage> {
    let decoded = match entry {
        RawEntry::Path(p) => read_image_from_path(Path::new(p), num_channels).0,
        RawEntry::Bytes(b) => decode_bytes(b, num_channels),
        RawEntry::Array(a) => DecodedImage::from_array(a),
        RawEntry::Tensor(t) => DecodedImage::from_tensor(t),
        RawEntry::Missing => None,
    };
    decoded.filter(|img| img.channels > 0 && img.height > 0 && img.width > 0)
}

/// True for entries like `s3://bucket/key`.
pub fn has_remote_protocol(path: &str) -> bool {
    path.split_once("://").map(|(scheme, _)| !scheme.is_empty()).unwrap_or(false)
}

/// Resolve relative path entries against the dataset source directory.
pub fn resolve_entry(entry: RawEntry, src_dir: Option<&Path>) -> RawEntry {
    match (entry, src_dir) {
        (RawEntry::Path(p), Some(dir)) if !has_remote_protocol(&p) && Path::new(&p).is_relative() => {
            RawEntry::Path(dir.join(&p).to_string_lossy().into_owned())
        }
        (entry, _) => entry,
    }
}

/// Channels-first float image of the finalized shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArray {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl ImageArray {
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), shape.iter().product::<usize>());
        Self { shape, data }
    }

    /// Cast to float and scale to [0, 1].
    pub fn from_decoded(img: &DecodedImage) -> Self {
        let data = img.pixels.iter().map(|&p| p as f32 / 255.0).collect();
        Self::new(img.shape(), data)
    }

    /// Placeholder for rows that could not be read. Cells hold 128/255,
    /// not 128.0, so defaulted rows share the [0, 1] range of read rows.
    pub fn gray_default(num_channels: usize, height: usize, width: usize) -> Self {
        Self::from_decoded(&DecodedImage::filled(num_channels, height, width, DEFAULT_GRAY_LEVEL))
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.data, (self.shape[0], self.shape[1], self.shape[2]), device)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Luma, Rgb};
    use std::io::Cursor;

    /// PNG bytes of a gray gradient.
    pub(crate) fn gray_png(height: u32, width: u32) -> Vec<u8> {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Luma([((x + y) * 7 % 256) as u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    pub(crate) fn rgb_png(height: u32, width: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_native_and_requested_depth() {
        let bytes = rgb_png(4, 6);
        let native = decode_bytes(&bytes, None).unwrap();
        assert_eq!(native.shape(), [3, 4, 6]);

        let gray = decode_bytes(&bytes, Some(1)).unwrap();
        assert_eq!(gray.shape(), [1, 4, 6]);

        assert!(decode_bytes(b"not an image", None).is_none());
    }

    #[test]
    fn test_interleaved_to_planes() {
        // 1x2 image, 2 channels: (10, 20), (30, 40)
        let img = DecodedImage::from_interleaved(1, 2, 2, &[10, 20, 30, 40]).unwrap();
        assert_eq!(img.pixels, vec![10, 30, 20, 40]);
        assert!(DecodedImage::from_interleaved(1, 2, 2, &[1, 2, 3]).is_none());
    }

    #[test]
    fn test_crop_or_pad() {
        let img = DecodedImage::new(1, 2, 2, vec![1, 2, 3, 4]);
        let padded = img.resize(4, 4, ResizeMethod::CropOrPad);
        assert_eq!(padded.shape(), [1, 4, 4]);
        // Edge padding repeats border values.
        assert_eq!(&padded.pixels[0..4], &[1, 1, 2, 2]);

        let big = DecodedImage::new(1, 3, 3, (1..=9).collect());
        let cropped = big.resize(1, 1, ResizeMethod::CropOrPad);
        assert_eq!(cropped.pixels, vec![5]);
    }

    #[test]
    fn test_interpolate_shape() {
        let img = DecodedImage::filled(1, 10, 20, 77);
        let resized = img.resize(5, 8, ResizeMethod::Interpolate);
        assert_eq!(resized.shape(), [1, 5, 8]);
        assert!(resized.pixels.iter().all(|&p| (76..=78).contains(&p)));
    }

    #[test]
    fn test_channel_padding_and_repeat() {
        let img = DecodedImage::new(1, 1, 2, vec![9, 8]);
        let padded = img.pad_channels(3);
        assert_eq!(padded.pixels, vec![9, 8, 0, 0, 0, 0]);
        assert_eq!(padded.pad_channels(1), padded);

        let repeated = img.resize_channels(3);
        assert_eq!(repeated.pixels, vec![9, 8, 9, 8, 9, 8]);
    }

    #[test]
    fn test_grayscale() {
        let img = DecodedImage::new(3, 1, 1, vec![255, 255, 255]);
        let gray = img.grayscale();
        assert_eq!(gray.channels, 1);
        assert!(gray.pixels[0] >= 254);
    }

    #[test]
    fn test_resolve_entry() {
        let dir = Path::new("/data/set");
        match resolve_entry(RawEntry::Path("img/a.png".to_string()), Some(dir)) {
            RawEntry::Path(p) => assert_eq!(p, "/data/set/img/a.png"),
            other => panic!("unexpected {:?}", other),
        }
        match resolve_entry(RawEntry::Path("s3://bucket/a.png".to_string()), Some(dir)) {
            RawEntry::Path(p) => assert_eq!(p, "s3://bucket/a.png"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_gray_default() {
        let default = ImageArray::gray_default(2, 3, 4);
        assert_eq!(default.shape(), [2, 3, 4]);
        assert!(default.data().iter().all(|&v| v == 128.0 / 255.0));
    }

    #[test]
    fn test_from_tensor() -> candle_core::Result<()> {
        let t = Tensor::new(&[[[1f32, 2.0], [3.0, 4.0]]], &Device::Cpu)?;
        let img = DecodedImage::from_tensor(&t).unwrap();
        assert_eq!(img.shape(), [1, 2, 2]);
        assert_eq!(img.pixels, vec![1, 2, 3, 4]);
        Ok(())
    }
}
