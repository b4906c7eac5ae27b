//! Item handles: lightweight references to images inside a container.
//!
//! A handle stays usable after the session that produced it is dropped; the
//! engine keeps the underlying container alive until the last handle goes.

use crate::ItemId;
use crate::error::{ErrorSubcode, HeifError, NativeError, Result, check};
use crate::image::{Chroma, Colorspace, Image};
use crate::native::{self, DecodingOptions, NativeItemHandle};
use crate::resource::Owned;

#[derive(Debug)]
pub struct ItemHandle {
    raw: Owned<NativeItemHandle>,
    id: ItemId,
}

impl ItemHandle {
    pub(crate) fn from_owned(raw: Owned<NativeItemHandle>, id: ItemId) -> ItemHandle {
        ItemHandle { raw, id }
    }

    pub(crate) fn as_ptr(&self) -> *mut NativeItemHandle {
        self.raw.as_ptr()
    }

    /// ID of the item this handle refers to.
    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn width(&self) -> u32 {
        unsafe { native::item_width(self.raw.as_ptr()) }.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        unsafe { native::item_height(self.raw.as_ptr()) }.max(0) as u32
    }

    pub fn has_alpha_channel(&self) -> bool {
        unsafe { native::item_has_alpha(self.raw.as_ptr()) }
    }

    /// Whether this item is the container's primary image.
    pub fn is_primary(&self) -> bool {
        unsafe { native::item_is_primary(self.raw.as_ptr()) }
    }

    pub fn has_depth_image(&self) -> bool {
        self.depth_image_count() > 0
    }

    pub fn depth_image_count(&self) -> usize {
        unsafe { native::item_depth_count(self.raw.as_ptr()) }.max(0) as usize
    }

    pub fn depth_image_ids(&self) -> Vec<ItemId> {
        let count = unsafe { native::item_depth_count(self.raw.as_ptr()) };
        let mut ids = vec![0; count.max(0) as usize];
        let filled = unsafe { native::item_depth_ids(self.raw.as_ptr(), ids.as_mut_ptr(), count) };
        ids.truncate(filled.max(0) as usize);
        ids
    }

    /// Resolves one of this item's depth images into its own handle.
    pub fn depth_image_handle(&self, id: ItemId) -> Result<ItemHandle> {
        let mut ptr = std::ptr::null_mut();
        let status = unsafe { native::item_depth_handle(self.raw.as_ptr(), id, &mut ptr) };
        map_unknown_item(check(status), id)?;
        Ok(ItemHandle {
            raw: Owned::acquire(ptr, "item handle")?,
            id,
        })
    }

    pub fn thumbnail_count(&self) -> usize {
        unsafe { native::item_thumbnail_count(self.raw.as_ptr()) }.max(0) as usize
    }

    pub fn thumbnail_ids(&self) -> Vec<ItemId> {
        let count = unsafe { native::item_thumbnail_count(self.raw.as_ptr()) };
        let mut ids = vec![0; count.max(0) as usize];
        let filled =
            unsafe { native::item_thumbnail_ids(self.raw.as_ptr(), ids.as_mut_ptr(), count) };
        ids.truncate(filled.max(0) as usize);
        ids
    }

    /// Resolves one of this item's thumbnails into its own handle.
    pub fn thumbnail(&self, id: ItemId) -> Result<ItemHandle> {
        let mut ptr = std::ptr::null_mut();
        let status = unsafe { native::item_thumbnail_handle(self.raw.as_ptr(), id, &mut ptr) };
        map_unknown_item(check(status), id)?;
        Ok(ItemHandle {
            raw: Owned::acquire(ptr, "item handle")?,
            id,
        })
    }

    /// Decodes the item into a pixel buffer with the requested colorspace
    /// and chroma. `Undefined` keeps the stored representation.
    pub fn decode(
        &self,
        colorspace: Colorspace,
        chroma: Chroma,
        options: Option<&DecodingOptions>,
    ) -> Result<Image> {
        let mut ptr = std::ptr::null_mut();
        check(unsafe {
            native::item_decode(self.raw.as_ptr(), &mut ptr, colorspace, chroma, options)
        })?;
        Ok(Image::from_owned(Owned::acquire(ptr, "decoded image")?))
    }
}

/// Lifts the engine's nonexisting-item triple into `UnknownItem(id)`.
pub(crate) fn map_unknown_item(result: Result<(), NativeError>, id: ItemId) -> Result<()> {
    result.map_err(|e| {
        if e.subcode == ErrorSubcode::NonexistingItemReferenced {
            HeifError::UnknownItem(id)
        } else {
            HeifError::Native(e)
        }
    })
}
