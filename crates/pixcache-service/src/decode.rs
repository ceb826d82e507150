//! Decoding and post-processing of raw image bytes.

use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, ImageError, RgbaImage};

use crate::image::Image;
use crate::types::TargetSize;

/// An error decoding an image.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The data is in a format that cannot be decoded.
    #[error("unsupported image format")]
    Unsupported(#[source] ImageError),
    /// The data looked like an image, but could not be decoded.
    #[error("malformed image")]
    Malformed(#[source] ImageError),
    #[error("empty image data")]
    Empty,
    /// Post-processing would produce an image far larger than requested.
    #[error("scaled image of {width}x{height} pixels exceeds the pixel budget")]
    TooLarge { width: u64, height: u64 },
}

impl From<ImageError> for DecodeError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Unsupported(_) => Self::Unsupported(err),
            _ => Self::Malformed(err),
        }
    }
}

/// Turns raw bytes into an [`Image`] of roughly the requested size.
///
/// Decoders are pure and only ever invoked from background workers.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, data: &[u8], target: TargetSize) -> Result<Image, DecodeError>;
}

/// A [`Decoder`] for all formats supported by the `image` crate.
///
/// Images with more pixels than the target box are subsampled by a power of two until they fit
/// the pixel budget of the target. Smaller images are never scaled up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    /// The smallest power of two to divide both dimensions by to fit into `max_pixels`.
    fn sample_size(width: u32, height: u32, max_pixels: u64) -> u32 {
        let mut sample = 1u32;
        while sample < 1 << 16 {
            let pixels = u64::from(width / sample) * u64::from(height / sample);
            if pixels <= max_pixels {
                break;
            }
            sample *= 2;
        }
        sample
    }
}

impl Decoder for ImageDecoder {
    fn decode(&self, data: &[u8], target: TargetSize) -> Result<Image, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let decoded = image::load_from_memory(data)?;

        let (width, height) = (decoded.width(), decoded.height());
        let max_pixels = u64::from(target.width) * u64::from(target.height);
        let sample = if target.is_unknown() {
            1
        } else {
            Self::sample_size(width, height, max_pixels)
        };

        let decoded = if sample > 1 {
            tracing::trace!(width, height, sample, "Subsampling decoded image");
            decoded.thumbnail_exact((width / sample).max(1), (height / sample).max(1))
        } else {
            decoded
        };
        metric!(time_raw("decode.pixels") = u64::from(width) * u64::from(height));

        Ok(Image::new(decoded.into_rgba8()))
    }
}

/// Post-processing applied to a decoded image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// The decoded image as is.
    #[default]
    Original,
    /// Corners cut into quarter circles of the given radius, leaving them transparent.
    RoundedCorners { radius: u32 },
    /// Scaled so that it covers the target box, growing from the target width.
    ScaleToHeight,
    /// Scaled so that it covers the target box, growing from the target height.
    ScaleToWidth,
    /// Scaled to exactly the target width, keeping the aspect ratio.
    ScaleToWidthWrapHeight,
}

impl ImageKind {
    pub const DEFAULT_RADIUS: u32 = 4;

    /// How many times the pixels of the target box, or of the source if that is larger, a
    /// scaled image may have.
    pub const MAX_OVERSCAN: u64 = 4;

    /// Post-processes decoded pixels for the given target box.
    ///
    /// Scaling that would exceed [`MAX_OVERSCAN`](Self::MAX_OVERSCAN) fails with
    /// [`DecodeError::TooLarge`] instead of allocating the result.
    pub fn apply(self, pixels: RgbaImage, target: TargetSize) -> Result<RgbaImage, DecodeError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 || target.is_unknown() {
            return Ok(match self {
                Self::RoundedCorners { radius } => round_corners(pixels, radius),
                _ => pixels,
            });
        }

        let (w, h) = (u64::from(width), u64::from(height));
        let (min_w, min_h) = (u64::from(target.width), u64::from(target.height));
        let (new_w, new_h) = match self {
            Self::Original => return Ok(pixels),
            Self::RoundedCorners { radius } => return Ok(round_corners(pixels, radius)),
            // the smallest height that covers the target, and the width that comes with it
            Self::ScaleToWidth => {
                let new_h = min_h.max((min_w * h).div_ceil(w));
                (new_h * w / h, new_h)
            }
            Self::ScaleToHeight => {
                let new_w = min_w.max((min_h * w).div_ceil(h));
                (new_w, new_w * h / w)
            }
            Self::ScaleToWidthWrapHeight => (min_w, h * min_w / w),
        };
        let (new_w, new_h) = (new_w.max(1), new_h.max(1));

        if new_w == w && new_h == h {
            return Ok(pixels);
        }
        let budget = (min_w * min_h).max(w * h) * Self::MAX_OVERSCAN;
        if new_w.saturating_mul(new_h) > budget {
            return Err(DecodeError::TooLarge {
                width: new_w,
                height: new_h,
            });
        }

        // both fit into the budget, which is far below `u32::MAX` per side
        let (new_w, new_h) = (new_w as u32, new_h as u32);
        Ok(DynamicImage::ImageRgba8(pixels)
            .resize_exact(new_w, new_h, FilterType::Triangle)
            .into_rgba8())
    }

    /// Decodes with `decoder` and applies this post-processing.
    pub fn decode(
        self,
        decoder: &dyn Decoder,
        data: &[u8],
        target: TargetSize,
    ) -> Result<Image, DecodeError> {
        let image = decoder.decode(data, target)?;
        if self == Self::Original {
            return Ok(image);
        }
        match image.into_pixels() {
            Some(pixels) => Ok(Image::new(self.apply(pixels, target)?)),
            None => Err(DecodeError::Empty),
        }
    }
}

fn round_corners(mut pixels: RgbaImage, radius: u32) -> RgbaImage {
    let (width, height) = pixels.dimensions();
    let r = radius.min(width / 2).min(height / 2) as f32;
    if r <= 0.0 {
        return pixels;
    }
    let (w, h) = (width as f32, height as f32);

    for (x, y, pixel) in pixels.enumerate_pixels_mut() {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        let cx = if px < r {
            r
        } else if px > w - r {
            w - r
        } else {
            continue;
        };
        let cy = if py < r {
            r
        } else if py > h - r {
            h - r
        } else {
            continue;
        };
        if (px - cx).hypot(py - cy) > r {
            pixel.0[3] = 0;
        }
    }
    pixels
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => f.write_str("original"),
            Self::RoundedCorners { radius } => write!(f, "round:{radius}"),
            Self::ScaleToHeight => f.write_str("scale-to-height"),
            Self::ScaleToWidth => f.write_str("scale-to-width"),
            Self::ScaleToWidthWrapHeight => f.write_str("scale-to-width-wrap-height"),
        }
    }
}

/// An unknown [`ImageKind`].
#[derive(Debug, thiserror::Error)]
#[error("unknown image kind `{0}`")]
pub struct ParseImageKindError(String);

impl FromStr for ImageKind {
    type Err = ParseImageKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "original" => Self::Original,
            "round" => Self::RoundedCorners {
                radius: Self::DEFAULT_RADIUS,
            },
            "scale-to-height" => Self::ScaleToHeight,
            "scale-to-width" => Self::ScaleToWidth,
            "scale-to-width-wrap-height" => Self::ScaleToWidthWrapHeight,
            _ => {
                let radius = s
                    .strip_prefix("round:")
                    .and_then(|radius| radius.parse().ok())
                    .ok_or_else(|| ParseImageKindError(s.to_owned()))?;
                Self::RoundedCorners { radius }
            }
        };
        Ok(kind)
    }
}
