use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use pixcache_service::image::Image;
use pixcache_service::loader::ConsumerSlot;
use pixcache_service::types::TargetSize;

/// What a [`ConsoleSlot`] currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shown {
    Placeholder,
    Image { width: u32, height: u32 },
}

impl fmt::Display for Shown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder => f.write_str("-"),
            Self::Image { width, height } => write!(f, "{width}x{height}"),
        }
    }
}

/// A headless [`ConsumerSlot`] that only remembers the dimensions of what it was given.
#[derive(Debug)]
pub struct ConsoleSlot {
    size: Option<TargetSize>,
    shown: Cell<Shown>,
    results: Cell<usize>,
}

impl ConsoleSlot {
    pub fn new(size: Option<TargetSize>) -> Rc<Self> {
        Rc::new(Self {
            size,
            shown: Cell::new(Shown::Placeholder),
            results: Cell::new(0),
        })
    }

    pub fn shown(&self) -> Shown {
        self.shown.get()
    }

    /// How many images were bound to this slot so far.
    pub fn results(&self) -> usize {
        self.results.get()
    }
}

impl ConsumerSlot for ConsoleSlot {
    fn bind_placeholder(&self, _placeholder: Option<&Arc<Image>>) {
        self.shown.set(Shown::Placeholder);
    }

    fn bind_result(&self, image: &Arc<Image>) {
        self.shown.set(Shown::Image {
            width: image.width(),
            height: image.height(),
        });
        self.results.set(self.results.get() + 1);
    }

    fn size_hint(&self) -> Option<TargetSize> {
        self.size
    }
}
