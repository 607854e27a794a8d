//! Per-row read function: raw entry to fixed-shape float array
//!
//! `Ok(None)` marks an unreadable row (the caller substitutes the default
//! image). `Err` is fatal for the whole column.

use tracing::warn;

use crate::config::ResizeMethod;
use crate::entry::{decode_entry, DecodedImage, ImageArray, RawEntry};
use crate::error::{PreprocessError, PreprocessResult};
use crate::infer::FinalizedParameters;
use crate::transforms::PretrainedTransform;

/// Manual decode / resize / channel reconciliation for grayscale 2D data.
#[derive(Debug, Clone)]
pub struct StandardReader {
    params: FinalizedParameters,
    resize_method: ResizeMethod,
}

impl StandardReader {
    pub fn new(params: FinalizedParameters, resize_method: ResizeMethod) -> Self {
        Self { params, resize_method }
    }

    pub fn params(&self) -> &FinalizedParameters {
        &self.params
    }

    pub fn read(&self, entry: &RawEntry) -> PreprocessResult<Option<ImageArray>> {
        let p = &self.params;
        let Some(img) = decode_entry(entry, Some(p.num_channels)) else {
            warn!("Image with value {} cannot be read", entry.describe());
            return Ok(None);
        };
        self.process(img).map(Some)
    }

    fn process(&self, mut img: DecodedImage) -> PreprocessResult<ImageArray> {
        let p = &self.params;
        let mut img_num_channels = img.channels;

        // Sources must be single-channel. This makes the grayscale branch
        // below unreachable; kept until the constraint is revisited.
        if img_num_channels != 1 {
            return Err(PreprocessError::NonSingleChannelSource(img_num_channels));
        }
        if p.num_channels == 1 && img_num_channels != 1 {
            img = img.grayscale();
            img_num_channels = 1;
        }

        if p.should_resize {
            img = img.resize(p.height, p.width, self.resize_method);
        }

        if p.user_specified_num_channels {
            if p.num_channels > img_num_channels {
                img = img.pad_channels(p.num_channels);
            }
            if img_num_channels != p.num_channels {
                warn!(
                    "Image has {} channels, where as {} channels are expected. Dropping/adding channels with 0s as appropriate",
                    img_num_channels, p.num_channels
                );
            }
        } else if img_num_channels != p.num_channels {
            return Err(PreprocessError::ChannelMismatch {
                expected: p.num_channels,
                actual: img_num_channels,
            });
        }

        let expected = [p.num_channels, p.height, p.width];
        if img.shape() != expected {
            return Err(PreprocessError::ShapeMismatch {
                expected,
                actual: img.shape(),
            });
        }

        Ok(ImageArray::from_decoded(&img))
    }
}

/// The read function chosen for a column.
#[derive(Debug, Clone)]
pub enum ImageReader {
    Standard(StandardReader),
    /// The transform fixes channels and size itself; no shape checks.
    Pretrained(PretrainedTransform),
}

impl ImageReader {
    pub fn read(&self, entry: &RawEntry) -> PreprocessResult<Option<ImageArray>> {
        match self {
            ImageReader::Standard(reader) => reader.read(entry),
            ImageReader::Pretrained(transform) => match decode_entry(entry, None) {
                Some(img) => Ok(Some(transform.apply(&img))),
                None => {
                    warn!("Image with value {} cannot be read", entry.describe());
                    Ok(None)
                }
            },
        }
    }

    /// `(channels, height, width)` of every array this reader produces.
    pub fn output_shape(&self) -> [usize; 3] {
        match self {
            ImageReader::Standard(reader) => {
                let p = reader.params();
                [p.num_channels, p.height, p.width]
            }
            ImageReader::Pretrained(transform) => {
                let m = transform.metadata();
                [m.num_channels(), m.height(), m.width()]
            }
        }
    }
}
