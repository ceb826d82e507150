//! The decoded image artifact that is cached and handed to slots.

use std::fmt;

use image::RgbaImage;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::caching::Artifact;

/// A decoded, possibly rescaled image.
///
/// The pixel buffer can be released eagerly via [`Artifact::release`], for instance when the
/// scope that displayed it is torn down. A released image keeps its dimensions but no longer
/// has any pixels, and is never served from the cache again.
pub struct Image {
    width: u32,
    height: u32,
    pixels: RwLock<Option<RgbaImage>>,
}

impl Image {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            width: pixels.width(),
            height: pixels.height(),
            pixels: RwLock::new(Some(pixels)),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The number of bytes of a single row of pixels.
    pub fn row_bytes(&self) -> u64 {
        u64::from(self.width) * 4
    }

    /// Returns the pixels, or `None` if the image has been released.
    pub fn pixels(&self) -> Option<MappedRwLockReadGuard<'_, RgbaImage>> {
        RwLockReadGuard::try_map(self.pixels.read(), |pixels| pixels.as_ref()).ok()
    }

    pub fn into_pixels(self) -> Option<RgbaImage> {
        self.pixels.into_inner()
    }
}

impl Artifact for Image {
    fn weight(&self) -> u64 {
        self.row_bytes() * u64::from(self.height)
    }

    fn release(&self) {
        self.pixels.write().take();
    }

    fn is_released(&self) -> bool {
        self.pixels.read().is_none()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("released", &self.is_released())
            .finish()
    }
}
