use std::rc::Rc;
use std::sync::Arc;

use crate::image::Image;
use crate::types::TargetSize;

/// A rendering target that shows at most one image at a time.
///
/// Slots live on the consumer thread. The loader only holds weak references to them, so a slot
/// that goes away while its image is loading simply does not receive the result.
pub trait ConsumerSlot {
    /// Shows the placeholder while a load is pending, or because there is nothing to load.
    fn bind_placeholder(&self, placeholder: Option<&Arc<Image>>);

    /// Shows a loaded image.
    fn bind_result(&self, image: &Arc<Image>);

    /// The size this slot is laid out with, if it is known already.
    fn size_hint(&self) -> Option<TargetSize> {
        None
    }
}

/// Gets notified when a load finished, whether it succeeded or not.
///
/// Listeners are only notified for slots that are still bound to the load that finished.
pub trait LoadListener {
    fn on_loaded(&self, image: Option<&Arc<Image>>, slot: &dyn ConsumerSlot, success: bool);
}

/// The identity of a [`ConsumerSlot`], derived from its allocation.
///
/// The loader keeps a weak reference to every slot it tracks by id, which keeps the allocation
/// and thus the id from being reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn of<S: ?Sized>(slot: &Rc<S>) -> Self {
        Self(Rc::as_ptr(slot) as *const () as usize)
    }
}
