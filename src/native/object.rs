//! Engine-side object graph behind the native entry points.
//!
//! A session and every item handle discovered through it share one container
//! via `Rc`, so a handle stays valid after its session is freed. All state is
//! single-threaded; each entry point takes at most one `RefCell` borrow for
//! its duration.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::error::{ErrorCode, ErrorSubcode, RawError};
use crate::image::{Channel, Chroma, Colorspace, CompressionFormat};
use crate::native::{boxes, color};

/// Default edge limit for images, in pixels per dimension.
pub(crate) const DEFAULT_MAX_IMAGE_DIM: u32 = 32768;

/// Byte alignment of engine-allocated plane strides.
pub(crate) const STRIDE_ALIGN: usize = 16;

/// ID of the engine's built-in decoder.
pub(crate) const DECODER_ID: &str = "builtin";

pub(crate) const NULL_ARG: RawError = RawError::new(
    ErrorCode::UsageError,
    ErrorSubcode::NullPointerArgument,
    "NULL passed",
);

pub(crate) const NO_SUCH_ITEM: RawError = RawError::new(
    ErrorCode::UsageError,
    ErrorSubcode::NonexistingItemReferenced,
    "Item ID does not exist",
);

pub(crate) const SECURITY_LIMIT: RawError = RawError::new(
    ErrorCode::MemoryAllocationError,
    ErrorSubcode::SecurityLimitExceeded,
    "Security limit exceeded",
);

/// Options honored while decoding an item into a pixel buffer.
#[derive(Debug, Clone, Default)]
pub struct DecodingOptions {
    /// Restricts decoding to the decoder with this ID.
    pub decoder_id: Option<String>,
}

/// Options applied when committing an encoded image.
#[derive(Debug, Clone)]
pub struct EncodingOptions {
    /// Keep the alpha channel of the source image.
    pub save_alpha_channel: bool,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        EncodingOptions {
            save_alpha_channel: true,
        }
    }
}

/// One registered encoder implementation.
pub(crate) struct EncoderDescriptor {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) compression: CompressionFormat,
}

/// Registration order decides which descriptor a format query yields first.
pub(crate) static ENCODER_DESCRIPTORS: &[EncoderDescriptor] = &[
    EncoderDescriptor {
        id: "builtin-hevc",
        name: "Built-in plane store (HEVC)",
        compression: CompressionFormat::Hevc,
    },
    EncoderDescriptor {
        id: "builtin-uncompressed",
        name: "Built-in plane store (uncompressed)",
        compression: CompressionFormat::Uncompressed,
    },
];

/// One channel plane with an aligned stride.
#[derive(Debug, Clone)]
pub(crate) struct PlaneBuf {
    pub(crate) channel: Channel,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) bit_depth: u8,
    pub(crate) stride: usize,
    pub(crate) data: Vec<u8>,
}

impl PlaneBuf {
    pub(crate) fn new(channel: Channel, width: u32, height: u32, bit_depth: u8) -> PlaneBuf {
        let row = width as usize * (bit_depth as usize / 8);
        let stride = (row + STRIDE_ALIGN - 1) & !(STRIDE_ALIGN - 1);
        PlaneBuf {
            channel,
            width,
            height,
            bit_depth,
            stride,
            data: vec![0; stride * height as usize],
        }
    }

    /// Visible bytes per row, excluding stride padding.
    pub(crate) fn row_bytes(&self) -> usize {
        self.width as usize * (self.bit_depth as usize / 8)
    }

    pub(crate) fn row(&self, y: u32) -> &[u8] {
        &self.data[y as usize * self.stride..][..self.row_bytes()]
    }
}

/// Per-item metadata block. IDs are 1-based and scoped to the item.
#[derive(Debug, Clone)]
pub(crate) struct MetadataBlock {
    pub(crate) id: u32,
    pub(crate) block_type: String,
    pub(crate) data: Vec<u8>,
}

/// One image resource in a container.
#[derive(Debug, Clone)]
pub(crate) struct Item {
    pub(crate) id: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) colorspace: Colorspace,
    pub(crate) chroma: Chroma,
    pub(crate) compression: CompressionFormat,
    pub(crate) quality: u8,
    pub(crate) lossless: bool,
    pub(crate) planes: Vec<PlaneBuf>,
    pub(crate) thumbnails: Vec<u32>,
    pub(crate) depth_images: Vec<u32>,
    pub(crate) metadata: Vec<MetadataBlock>,
}

impl Item {
    pub(crate) fn has_alpha(&self) -> bool {
        chroma_has_alpha(self.chroma) || self.planes.iter().any(|p| p.channel == Channel::Alpha)
    }
}

pub(crate) fn chroma_has_alpha(chroma: Chroma) -> bool {
    matches!(
        chroma,
        Chroma::InterleavedRgba | Chroma::InterleavedRrggbbaaBe | Chroma::InterleavedRrggbbaaLe
    )
}

/// Container state shared between a session and its item handles.
#[derive(Debug)]
pub(crate) struct Container {
    pub(crate) brand: [u8; 4],
    pub(crate) primary_id: Option<u32>,
    pub(crate) next_item_id: u32,
    pub(crate) items: Vec<Item>,
    pub(crate) max_image_dim: u32,
}

impl Default for Container {
    fn default() -> Self {
        Container {
            brand: *b"mif1",
            primary_id: None,
            next_item_id: 1,
            items: Vec::new(),
            max_image_dim: DEFAULT_MAX_IMAGE_DIM,
        }
    }
}

impl Container {
    pub(crate) fn item(&self, id: u32) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub(crate) fn item_mut(&mut self, id: u32) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub(crate) fn alloc_id(&mut self) -> u32 {
        let id = self.next_item_id;
        self.next_item_id += 1;
        id
    }

    /// Items not referenced as a thumbnail or depth image of another item,
    /// in container order.
    pub(crate) fn top_level_ids(&self) -> Vec<u32> {
        let mut referenced = Vec::new();
        for item in &self.items {
            referenced.extend_from_slice(&item.thumbnails);
            referenced.extend_from_slice(&item.depth_images);
        }
        self.items
            .iter()
            .map(|item| item.id)
            .filter(|id| !referenced.contains(id))
            .collect()
    }
}

/// Opaque session object behind the `session_*` entry points.
pub(crate) struct NativeSession {
    pub(crate) container: Rc<RefCell<Container>>,
}

impl NativeSession {
    pub(crate) fn new() -> NativeSession {
        NativeSession {
            container: Rc::new(RefCell::new(Container::default())),
        }
    }

    pub(crate) fn open_bytes(&self, data: &[u8]) -> RawError {
        let max_dim = {
            let container = self.container.borrow();
            if !container.items.is_empty() {
                return RawError::new(
                    ErrorCode::UsageError,
                    ErrorSubcode::Unspecified,
                    "Session already contains items",
                );
            }
            container.max_image_dim
        };
        match boxes::read_container(data, max_dim) {
            Ok(parsed) => {
                *self.container.borrow_mut() = parsed;
                RawError::OK
            }
            Err(e) => e,
        }
    }

    pub(crate) fn open_path(&self, path: &Path) -> RawError {
        match std::fs::read(path) {
            Ok(data) => self.open_bytes(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawError::new(
                ErrorCode::InputDoesNotExist,
                ErrorSubcode::Unspecified,
                "Input file does not exist",
            ),
            Err(_) => RawError::new(
                ErrorCode::InvalidInput,
                ErrorSubcode::Unspecified,
                "Cannot read input file",
            ),
        }
    }

    pub(crate) fn top_level_count(&self) -> i32 {
        self.container.borrow().top_level_ids().len() as i32
    }

    pub(crate) fn top_level_ids(&self, out: &mut [u32]) -> i32 {
        let ids = self.container.borrow().top_level_ids();
        let n = ids.len().min(out.len());
        out[..n].copy_from_slice(&ids[..n]);
        n as i32
    }

    pub(crate) fn is_top_level(&self, id: u32) -> bool {
        self.container.borrow().top_level_ids().contains(&id)
    }

    pub(crate) fn primary_id(&self) -> Result<u32, RawError> {
        let container = self.container.borrow();
        container
            .primary_id
            .filter(|id| container.item(*id).is_some())
            .ok_or(RawError::new(
                ErrorCode::InvalidInput,
                ErrorSubcode::NoOrInvalidPrimaryItem,
                "No or invalid primary item",
            ))
    }

    pub(crate) fn set_primary(&self, id: u32) -> RawError {
        let mut container = self.container.borrow_mut();
        if container.item(id).is_none() {
            return NO_SUCH_ITEM;
        }
        container.primary_id = Some(id);
        RawError::OK
    }

    pub(crate) fn handle_for(&self, id: u32) -> Result<NativeItemHandle, RawError> {
        if self.container.borrow().item(id).is_none() {
            return Err(NO_SUCH_ITEM);
        }
        Ok(NativeItemHandle {
            container: Rc::clone(&self.container),
            item_id: id,
        })
    }

    pub(crate) fn encode_image(
        &self,
        image: &NativeImage,
        encoder: &NativeEncoder,
        options: Option<&EncodingOptions>,
    ) -> Result<u32, RawError> {
        let save_alpha = options.is_none_or(|o| o.save_alpha_channel);
        let stored = if !save_alpha && image.has_alpha() {
            color::strip_alpha(image)?
        } else {
            image.clone()
        };
        let mut container = self.container.borrow_mut();
        if stored.width > container.max_image_dim || stored.height > container.max_image_dim {
            return Err(SECURITY_LIMIT);
        }
        let id = container.alloc_id();
        container.items.push(Item {
            id,
            width: stored.width,
            height: stored.height,
            colorspace: stored.colorspace,
            chroma: stored.chroma,
            compression: encoder.descriptor.compression,
            quality: encoder.quality,
            lossless: encoder.lossless,
            planes: stored.planes,
            thumbnails: Vec::new(),
            depth_images: Vec::new(),
            metadata: Vec::new(),
        });
        Ok(id)
    }

    pub(crate) fn encode_thumbnail(
        &self,
        image: &NativeImage,
        master_id: u32,
        encoder: &NativeEncoder,
        options: Option<&EncodingOptions>,
        bbox: i32,
    ) -> Result<Option<u32>, RawError> {
        if bbox <= 0 {
            return Err(RawError::new(
                ErrorCode::UsageError,
                ErrorSubcode::InvalidParameterValue,
                "Thumbnail bounding box must be positive",
            ));
        }
        if self.container.borrow().item(master_id).is_none() {
            return Err(NO_SUCH_ITEM);
        }
        let bbox = bbox as u32;
        if image.width <= bbox && image.height <= bbox {
            return Ok(None);
        }
        let (width, height) = if image.width >= image.height {
            let h = (image.height as u64 * bbox as u64 / image.width as u64).max(1);
            (bbox, h as u32)
        } else {
            let w = (image.width as u64 * bbox as u64 / image.height as u64).max(1);
            (w as u32, bbox)
        };
        let thumb = color::scale_nearest(image, width, height)?;
        let id = self.encode_image(&thumb, encoder, options)?;
        let mut container = self.container.borrow_mut();
        match container.item_mut(master_id) {
            Some(master) => master.thumbnails.push(id),
            None => return Err(NO_SUCH_ITEM),
        }
        Ok(Some(id))
    }

    pub(crate) fn add_metadata(
        &self,
        item_id: u32,
        block_type: &str,
        data: &[u8],
        offset_header: bool,
    ) -> RawError {
        let mut container = self.container.borrow_mut();
        let Some(item) = container.item_mut(item_id) else {
            return NO_SUCH_ITEM;
        };
        let mut stored = Vec::with_capacity(data.len() + 4);
        if offset_header {
            stored.extend_from_slice(&[0, 0, 0, 0]);
        }
        stored.extend_from_slice(data);
        let id = item.metadata.len() as u32 + 1;
        item.metadata.push(MetadataBlock {
            id,
            block_type: block_type.to_string(),
            data: stored,
        });
        RawError::OK
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) -> RawError {
        boxes::write_container(&self.container.borrow(), out);
        RawError::OK
    }

    pub(crate) fn write_path(&self, path: &Path) -> RawError {
        let mut data = Vec::new();
        boxes::write_container(&self.container.borrow(), &mut data);
        match std::fs::write(path, &data) {
            Ok(()) => RawError::OK,
            Err(_) => RawError::new(
                ErrorCode::EncodingError,
                ErrorSubcode::CannotWriteOutputData,
                "Cannot write output file",
            ),
        }
    }

    pub(crate) fn set_max_image_size(&self, dim: u32) {
        self.container.borrow_mut().max_image_dim = dim;
    }
}

/// Opaque item handle behind the `item_*` entry points.
#[derive(Debug)]
pub(crate) struct NativeItemHandle {
    pub(crate) container: Rc<RefCell<Container>>,
    pub(crate) item_id: u32,
}

impl NativeItemHandle {
    fn with_item<R>(&self, f: impl FnOnce(&Item) -> R) -> Option<R> {
        let container = self.container.borrow();
        container.item(self.item_id).map(f)
    }

    pub(crate) fn width(&self) -> i32 {
        self.with_item(|item| item.width as i32).unwrap_or(0)
    }

    pub(crate) fn height(&self) -> i32 {
        self.with_item(|item| item.height as i32).unwrap_or(0)
    }

    pub(crate) fn has_alpha(&self) -> bool {
        self.with_item(Item::has_alpha).unwrap_or(false)
    }

    pub(crate) fn is_primary(&self) -> bool {
        self.container.borrow().primary_id == Some(self.item_id)
    }

    pub(crate) fn thumbnail_ids(&self, out: &mut [u32]) -> i32 {
        self.ref_ids(out, |item| &item.thumbnails)
    }

    pub(crate) fn thumbnail_count(&self) -> i32 {
        self.with_item(|item| item.thumbnails.len() as i32)
            .unwrap_or(0)
    }

    pub(crate) fn depth_image_ids(&self, out: &mut [u32]) -> i32 {
        self.ref_ids(out, |item| &item.depth_images)
    }

    pub(crate) fn depth_image_count(&self) -> i32 {
        self.with_item(|item| item.depth_images.len() as i32)
            .unwrap_or(0)
    }

    fn ref_ids(&self, out: &mut [u32], select: impl Fn(&Item) -> &Vec<u32>) -> i32 {
        self.with_item(|item| {
            let ids = select(item);
            let n = ids.len().min(out.len());
            out[..n].copy_from_slice(&ids[..n]);
            n as i32
        })
        .unwrap_or(0)
    }

    /// Resolves a referenced item (thumbnail or depth image) into its own
    /// handle. The ID must actually be referenced by this item.
    pub(crate) fn referenced_handle(
        &self,
        id: u32,
        select: impl Fn(&Item) -> &Vec<u32>,
    ) -> Result<NativeItemHandle, RawError> {
        let referenced = self
            .with_item(|item| select(item).contains(&id))
            .unwrap_or(false);
        if !referenced {
            return Err(NO_SUCH_ITEM);
        }
        Ok(NativeItemHandle {
            container: Rc::clone(&self.container),
            item_id: id,
        })
    }

    pub(crate) fn decode(
        &self,
        colorspace: Colorspace,
        chroma: Chroma,
        options: Option<&DecodingOptions>,
    ) -> Result<NativeImage, RawError> {
        if let Some(options) = options {
            if let Some(id) = options.decoder_id.as_deref() {
                if id != DECODER_ID {
                    return Err(RawError::new(
                        ErrorCode::DecoderPluginError,
                        ErrorSubcode::Unspecified,
                        "No decoder plugin with the requested ID",
                    ));
                }
            }
        }
        let native = {
            let container = self.container.borrow();
            let item = container.item(self.item_id).ok_or(NO_SUCH_ITEM)?;
            if item.width > container.max_image_dim || item.height > container.max_image_dim {
                return Err(SECURITY_LIMIT);
            }
            NativeImage {
                colorspace: item.colorspace,
                chroma: item.chroma,
                width: item.width,
                height: item.height,
                planes: item.planes.clone(),
            }
        };
        let (target_cs, target_chroma) = resolve_target(&native, colorspace, chroma);
        if target_cs == native.colorspace && target_chroma == native.chroma {
            return Ok(native);
        }
        color::convert_image(&native, target_cs, target_chroma)
    }

    pub(crate) fn metadata_count(&self, filter: Option<&str>) -> i32 {
        self.with_item(|item| {
            item.metadata
                .iter()
                .filter(|block| filter.is_none_or(|f| block.block_type == f))
                .count() as i32
        })
        .unwrap_or(0)
    }

    pub(crate) fn metadata_ids(&self, filter: Option<&str>, out: &mut [u32]) -> i32 {
        self.with_item(|item| {
            let mut n = 0;
            for block in &item.metadata {
                if n == out.len() {
                    break;
                }
                if filter.is_none_or(|f| block.block_type == f) {
                    out[n] = block.id;
                    n += 1;
                }
            }
            n as i32
        })
        .unwrap_or(0)
    }

    pub(crate) fn metadata_size(&self, id: u32) -> usize {
        self.with_item(|item| {
            item.metadata
                .iter()
                .find(|block| block.id == id)
                .map_or(0, |block| block.data.len())
        })
        .unwrap_or(0)
    }

    pub(crate) fn metadata_with<R>(&self, id: u32, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.with_item(|item| {
            item.metadata
                .iter()
                .find(|block| block.id == id)
                .map(|block| f(&block.data))
        })
        .flatten()
    }
}

fn resolve_target(native: &NativeImage, colorspace: Colorspace, chroma: Chroma) -> (Colorspace, Chroma) {
    if colorspace == Colorspace::Undefined {
        return (native.colorspace, native.chroma);
    }
    let chroma = if chroma == Chroma::Undefined {
        match colorspace {
            Colorspace::YCbCr => Chroma::C420,
            Colorspace::Rgb if native.has_alpha() => Chroma::InterleavedRgba,
            Colorspace::Rgb => Chroma::InterleavedRgb,
            _ => Chroma::Monochrome,
        }
    } else {
        chroma
    };
    (colorspace, chroma)
}

/// Opaque pixel buffer behind the `image_*` entry points.
#[derive(Debug, Clone)]
pub(crate) struct NativeImage {
    pub(crate) colorspace: Colorspace,
    pub(crate) chroma: Chroma,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) planes: Vec<PlaneBuf>,
}

impl NativeImage {
    pub(crate) fn new(
        width: u32,
        height: u32,
        colorspace: Colorspace,
        chroma: Chroma,
    ) -> Result<NativeImage, RawError> {
        if !chroma_matches(colorspace, chroma) {
            return Err(RawError::new(
                ErrorCode::UsageError,
                ErrorSubcode::InvalidParameterValue,
                "Colorspace and chroma format do not match",
            ));
        }
        Ok(NativeImage {
            colorspace,
            chroma,
            width,
            height,
            planes: Vec::new(),
        })
    }

    pub(crate) fn plane(&self, channel: Channel) -> Option<&PlaneBuf> {
        self.planes.iter().find(|p| p.channel == channel)
    }

    pub(crate) fn plane_mut(&mut self, channel: Channel) -> Option<&mut PlaneBuf> {
        self.planes.iter_mut().find(|p| p.channel == channel)
    }

    pub(crate) fn has_alpha(&self) -> bool {
        chroma_has_alpha(self.chroma) || self.plane(Channel::Alpha).is_some()
    }

    pub(crate) fn add_plane(&mut self, channel: Channel, width: u32, height: u32, depth: u8) -> RawError {
        if self.plane(channel).is_some() {
            return RawError::new(
                ErrorCode::UsageError,
                ErrorSubcode::InvalidParameterValue,
                "Plane for this channel already exists",
            );
        }
        let valid_depth = if channel == Channel::Interleaved {
            depth == 24 || depth == 32
        } else {
            depth == 8
        };
        if !valid_depth {
            return RawError::new(
                ErrorCode::UnsupportedFeature,
                ErrorSubcode::UnsupportedBitDepth,
                "Unsupported bit depth",
            );
        }
        self.planes.push(PlaneBuf::new(channel, width, height, depth));
        RawError::OK
    }

    pub(crate) fn channel_width(&self, channel: Channel) -> i32 {
        self.plane(channel).map_or(-1, |p| p.width as i32)
    }

    pub(crate) fn channel_height(&self, channel: Channel) -> i32 {
        self.plane(channel).map_or(-1, |p| p.height as i32)
    }

    pub(crate) fn channel_bits_per_pixel(&self, channel: Channel) -> i32 {
        self.plane(channel).map_or(-1, |p| p.bit_depth as i32)
    }
}

pub(crate) fn chroma_matches(colorspace: Colorspace, chroma: Chroma) -> bool {
    match colorspace {
        Colorspace::YCbCr => matches!(chroma, Chroma::C420 | Chroma::C422 | Chroma::C444),
        Colorspace::Rgb => matches!(
            chroma,
            Chroma::C444
                | Chroma::InterleavedRgb
                | Chroma::InterleavedRgba
                | Chroma::InterleavedRrggbbBe
                | Chroma::InterleavedRrggbbaaBe
                | Chroma::InterleavedRrggbbLe
                | Chroma::InterleavedRrggbbaaLe
        ),
        Colorspace::Monochrome => chroma == Chroma::Monochrome,
        Colorspace::Undefined => false,
    }
}

/// Opaque encoder object behind the `encoder_*` entry points.
pub(crate) struct NativeEncoder {
    pub(crate) descriptor: &'static EncoderDescriptor,
    pub(crate) quality: u8,
    pub(crate) lossless: bool,
}

impl NativeEncoder {
    pub(crate) fn new(descriptor: &'static EncoderDescriptor) -> NativeEncoder {
        NativeEncoder {
            descriptor,
            quality: 75,
            lossless: true,
        }
    }

    pub(crate) fn set_quality(&mut self, quality: i32) -> RawError {
        if !(0..=100).contains(&quality) {
            return RawError::new(
                ErrorCode::UsageError,
                ErrorSubcode::InvalidParameterValue,
                "Quality must be between 0 and 100",
            );
        }
        self.quality = quality as u8;
        RawError::OK
    }

    pub(crate) fn set_lossless(&mut self, lossless: bool) {
        self.lossless = lossless;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba_image(width: u32, height: u32) -> NativeImage {
        let mut image =
            NativeImage::new(width, height, Colorspace::Rgb, Chroma::InterleavedRgba).unwrap();
        assert!(
            image
                .add_plane(Channel::Interleaved, width, height, 32)
                .code
                == ErrorCode::Ok
        );
        image
    }

    #[test]
    fn plane_strides_are_aligned() {
        let plane = PlaneBuf::new(Channel::Y, 5, 3, 8);
        assert_eq!(plane.stride % STRIDE_ALIGN, 0);
        assert!(plane.stride >= 5);
        assert_eq!(plane.data.len(), plane.stride * 3);
    }

    #[test]
    fn top_level_excludes_referenced_items() {
        let session = NativeSession::new();
        let encoder = NativeEncoder::new(&ENCODER_DESCRIPTORS[0]);
        let primary = session
            .encode_image(&rgba_image(64, 48), &encoder, None)
            .unwrap();
        let other = session
            .encode_image(&rgba_image(32, 32), &encoder, None)
            .unwrap();
        let thumb = session
            .encode_thumbnail(&rgba_image(64, 48), primary, &encoder, None, 16)
            .unwrap()
            .unwrap();

        let mut ids = vec![0; 8];
        let n = session.top_level_ids(&mut ids) as usize;
        assert_eq!(&ids[..n], &[primary, other]);
        assert!(session.is_top_level(primary));
        assert!(!session.is_top_level(thumb));
    }

    #[test]
    fn thumbnail_is_skipped_when_image_fits_bbox() {
        let session = NativeSession::new();
        let encoder = NativeEncoder::new(&ENCODER_DESCRIPTORS[0]);
        let master = session
            .encode_image(&rgba_image(16, 16), &encoder, None)
            .unwrap();
        let result = session
            .encode_thumbnail(&rgba_image(16, 16), master, &encoder, None, 64)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn depth_images_resolve_through_handles() {
        let session = NativeSession::new();
        let encoder = NativeEncoder::new(&ENCODER_DESCRIPTORS[0]);
        let master = session
            .encode_image(&rgba_image(64, 48), &encoder, None)
            .unwrap();
        let depth = session
            .encode_image(&rgba_image(64, 48), &encoder, None)
            .unwrap();
        session
            .container
            .borrow_mut()
            .item_mut(master)
            .unwrap()
            .depth_images
            .push(depth);

        let handle = session.handle_for(master).unwrap();
        assert_eq!(handle.depth_image_count(), 1);
        let mut ids = vec![0; 4];
        let n = handle.depth_image_ids(&mut ids) as usize;
        assert_eq!(&ids[..n], &[depth]);

        let resolved = handle.referenced_handle(depth, |item| &item.depth_images).unwrap();
        assert_eq!(resolved.width(), 64);
        assert!(
            handle
                .referenced_handle(999, |item| &item.depth_images)
                .is_err()
        );
    }

    #[test]
    fn handles_survive_session_release() {
        let session = NativeSession::new();
        let encoder = NativeEncoder::new(&ENCODER_DESCRIPTORS[0]);
        let id = session
            .encode_image(&rgba_image(20, 10), &encoder, None)
            .unwrap();
        let handle = session.handle_for(id).unwrap();
        drop(session);
        assert_eq!(handle.width(), 20);
        assert_eq!(handle.height(), 10);
    }

    #[test]
    fn decode_rejects_foreign_decoder_id() {
        let session = NativeSession::new();
        let encoder = NativeEncoder::new(&ENCODER_DESCRIPTORS[0]);
        let id = session
            .encode_image(&rgba_image(8, 8), &encoder, None)
            .unwrap();
        let handle = session.handle_for(id).unwrap();
        let options = DecodingOptions {
            decoder_id: Some("x265".to_string()),
        };
        let err = handle
            .decode(Colorspace::Undefined, Chroma::Undefined, Some(&options))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DecoderPluginError);
    }

    #[test]
    fn security_limit_applies_to_commits() {
        let session = NativeSession::new();
        session.set_max_image_size(32);
        let encoder = NativeEncoder::new(&ENCODER_DESCRIPTORS[0]);
        let err = session
            .encode_image(&rgba_image(64, 8), &encoder, None)
            .unwrap_err();
        assert_eq!(err.subcode, ErrorSubcode::SecurityLimitExceeded);
    }

    #[test]
    fn encoding_options_can_drop_alpha() {
        let session = NativeSession::new();
        let encoder = NativeEncoder::new(&ENCODER_DESCRIPTORS[0]);
        let options = EncodingOptions {
            save_alpha_channel: false,
        };
        let id = session
            .encode_image(&rgba_image(4, 4), &encoder, Some(&options))
            .unwrap();
        let handle = session.handle_for(id).unwrap();
        assert!(!handle.has_alpha());
    }
}
