//! Sessions: loading, inspecting, building, and writing containers.

use std::path::Path;

use crate::ItemId;
use crate::error::{ErrorSubcode, HeifError, Result, check};
use crate::handle::{ItemHandle, map_unknown_item};
use crate::image::{CompressionFormat, Image};
use crate::native::{self, EncoderDescriptor, EncodingOptions, NativeEncoder, NativeSession};
use crate::resource::Owned;

/// Whether a session holds a container yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Loaded,
}

/// Owner of one container. A session either loads an existing container or
/// builds a new one through the encode operations, never both.
pub struct Session {
    raw: Owned<NativeSession>,
    state: SessionState,
}

impl Session {
    pub fn new() -> Result<Session> {
        Ok(Session {
            raw: Owned::acquire(native::session_alloc(), "session")?,
            state: SessionState::Empty,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Loads a container from bytes. A failed load leaves the session empty
    /// and usable for another attempt.
    pub fn open_from_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(HeifError::EmptyInput);
        }
        if self.state == SessionState::Loaded {
            return Err(HeifError::AlreadyLoaded);
        }
        check(unsafe { native::session_open_bytes(self.raw.as_ptr(), data) })?;
        self.state = SessionState::Loaded;
        tracing::debug!("loaded container from {} bytes", data.len());
        Ok(())
    }

    /// Loads a container from a file.
    pub fn open_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.state == SessionState::Loaded {
            return Err(HeifError::AlreadyLoaded);
        }
        check(unsafe { native::session_open_path(self.raw.as_ptr(), path) })?;
        self.state = SessionState::Loaded;
        tracing::debug!("loaded container from {}", path.display());
        Ok(())
    }

    pub fn top_level_image_count(&self) -> usize {
        unsafe { native::session_top_level_count(self.raw.as_ptr()) }.max(0) as usize
    }

    /// IDs of all top-level images, in container order. Thumbnails and depth
    /// images referenced by another item are not listed.
    pub fn top_level_image_ids(&self) -> Vec<ItemId> {
        let count = unsafe { native::session_top_level_count(self.raw.as_ptr()) };
        let mut ids = vec![0; count.max(0) as usize];
        let filled =
            unsafe { native::session_top_level_ids(self.raw.as_ptr(), ids.as_mut_ptr(), count) };
        ids.truncate(filled.max(0) as usize);
        ids
    }

    pub fn is_top_level_image_id(&self, id: ItemId) -> bool {
        unsafe { native::session_is_top_level_id(self.raw.as_ptr(), id) }
    }

    pub fn primary_image_id(&self) -> Result<ItemId> {
        let mut id = 0;
        match check(unsafe { native::session_primary_id(self.raw.as_ptr(), &mut id) }) {
            Ok(()) => Ok(id),
            Err(e) if e.subcode == ErrorSubcode::NoOrInvalidPrimaryItem => {
                Err(HeifError::NoPrimaryImage)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn primary_image_handle(&self) -> Result<ItemHandle> {
        let id = self.primary_image_id()?;
        self.image_handle(id)
    }

    /// Handle for any item in the container, top-level or referenced.
    pub fn image_handle(&self, id: ItemId) -> Result<ItemHandle> {
        let mut ptr = std::ptr::null_mut();
        let status = unsafe { native::session_get_handle(self.raw.as_ptr(), id, &mut ptr) };
        map_unknown_item(check(status), id)?;
        Ok(ItemHandle::from_owned(
            Owned::acquire(ptr, "item handle")?,
            id,
        ))
    }

    /// First registered encoder for `format`.
    pub fn new_encoder(&self, format: CompressionFormat) -> Result<Encoder> {
        let descriptor = native::encoder_descriptors()
            .iter()
            .find(|d| d.compression == format)
            .ok_or(HeifError::NoEncoder(format))?;
        let mut ptr = std::ptr::null_mut();
        check(unsafe { native::session_get_encoder(self.raw.as_ptr(), descriptor, &mut ptr) })?;
        Ok(Encoder {
            raw: Owned::acquire(ptr, "encoder")?,
            descriptor,
        })
    }

    /// Commits an image to the container and returns a handle to the new
    /// item.
    pub fn encode_image(
        &mut self,
        image: &Image,
        encoder: &Encoder,
        options: Option<&EncodingOptions>,
    ) -> Result<ItemHandle> {
        let mut ptr = std::ptr::null_mut();
        check(unsafe {
            native::session_encode_image(
                self.raw.as_ptr(),
                image.as_ptr(),
                encoder.raw.as_ptr(),
                options,
                &mut ptr,
            )
        })?;
        let raw = Owned::acquire(ptr, "item handle")?;
        let id = unsafe { native::item_id(raw.as_ptr()) };
        self.state = SessionState::Loaded;
        tracing::debug!(item = id, "committed image");
        Ok(ItemHandle::from_owned(raw, id))
    }

    /// Commits a scaled-down thumbnail of `image` and links it to `master`.
    /// Returns `None` without committing anything when the image already
    /// fits within `bbox_size` on both edges.
    pub fn encode_thumbnail(
        &mut self,
        image: &Image,
        master: &ItemHandle,
        encoder: &Encoder,
        options: Option<&EncodingOptions>,
        bbox_size: u32,
    ) -> Result<Option<ItemHandle>> {
        let mut ptr = std::ptr::null_mut();
        check(unsafe {
            native::session_encode_thumbnail(
                self.raw.as_ptr(),
                image.as_ptr(),
                master.as_ptr(),
                encoder.raw.as_ptr(),
                options,
                bbox_size as i32,
                &mut ptr,
            )
        })?;
        if ptr.is_null() {
            return Ok(None);
        }
        let raw = Owned::acquire(ptr, "item handle")?;
        let id = unsafe { native::item_id(raw.as_ptr()) };
        Ok(Some(ItemHandle::from_owned(raw, id)))
    }

    /// Marks an item as the container's primary image.
    pub fn set_primary_image(&mut self, handle: &ItemHandle) -> Result<()> {
        check(unsafe { native::session_set_primary(self.raw.as_ptr(), handle.as_ptr()) })?;
        Ok(())
    }

    /// Attaches an Exif block to an item. The stored block carries the
    /// 4-byte TIFF header offset Exif readers expect.
    pub fn add_exif_metadata(&mut self, handle: &ItemHandle, data: &[u8]) -> Result<()> {
        check(unsafe { native::session_add_exif(self.raw.as_ptr(), handle.as_ptr(), data) })?;
        Ok(())
    }

    /// Attaches an XMP packet to an item, stored as a MIME block.
    pub fn add_xmp_metadata(&mut self, handle: &ItemHandle, data: &[u8]) -> Result<()> {
        check(unsafe { native::session_add_xmp(self.raw.as_ptr(), handle.as_ptr(), data) })?;
        Ok(())
    }

    /// Serializes the container into a byte vector.
    pub fn write_to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        check(unsafe { native::session_write_bytes(self.raw.as_ptr(), &mut out) })?;
        Ok(out)
    }

    /// Serializes the container into a file.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        check(unsafe { native::session_write_path(self.raw.as_ptr(), path) })?;
        tracing::debug!("wrote container to {}", path.display());
        Ok(())
    }

    /// Caps the edge length of images this session will decode or commit.
    /// Anything larger fails with a security-limit error.
    pub fn set_maximum_image_size_limit(&mut self, max_dim: u32) {
        unsafe { native::session_set_max_image_size(self.raw.as_ptr(), max_dim) }
    }
}

/// One configured encoder instance, bound to the descriptor it was created
/// from.
pub struct Encoder {
    raw: Owned<NativeEncoder>,
    descriptor: &'static EncoderDescriptor,
}

impl Encoder {
    pub fn id(&self) -> &'static str {
        self.descriptor.id
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn compression_format(&self) -> CompressionFormat {
        self.descriptor.compression
    }

    /// Quality from 0 to 100. Values outside the range are rejected.
    pub fn set_quality(&mut self, quality: u8) -> Result<()> {
        check(unsafe { native::encoder_set_quality(self.raw.as_ptr(), quality as i32) })?;
        Ok(())
    }

    pub fn set_lossless(&mut self, lossless: bool) -> Result<()> {
        check(unsafe { native::encoder_set_lossless(self.raw.as_ptr(), lossless) })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::image::{Channel, Chroma, Colorspace};

    fn solid_rgba(width: u32, height: u32, rgba: [u8; 4]) -> Image {
        let mut image = Image::new(width, height, Colorspace::Rgb, Chroma::InterleavedRgba)
            .unwrap();
        let mut plane = image.add_plane(Channel::Interleaved, width, height, 32).unwrap();
        let row: Vec<u8> = rgba.iter().copied().cycle().take(width as usize * 4).collect();
        for y in 0..height {
            plane.set_row(y, &row).unwrap();
        }
        drop(plane);
        image
    }

    #[test]
    fn failed_open_leaves_the_session_empty() {
        let mut session = Session::new().unwrap();
        assert!(session.open_from_bytes(b"not a container").is_err());
        assert_eq!(session.state(), SessionState::Empty);

        let bytes = {
            let mut writer = Session::new().unwrap();
            let encoder = writer.new_encoder(CompressionFormat::Hevc).unwrap();
            writer
                .encode_image(&solid_rgba(4, 4, [1, 2, 3, 255]), &encoder, None)
                .unwrap();
            writer.write_to_bytes().unwrap()
        };
        session.open_from_bytes(&bytes).unwrap();
        assert_eq!(session.state(), SessionState::Loaded);
        assert_eq!(session.top_level_image_count(), 1);
    }

    #[test]
    fn empty_input_and_double_open_are_named_errors() {
        let mut session = Session::new().unwrap();
        assert!(matches!(
            session.open_from_bytes(&[]),
            Err(HeifError::EmptyInput)
        ));

        let bytes = {
            let mut writer = Session::new().unwrap();
            let encoder = writer.new_encoder(CompressionFormat::Hevc).unwrap();
            writer
                .encode_image(&solid_rgba(2, 2, [0, 0, 0, 255]), &encoder, None)
                .unwrap();
            writer.write_to_bytes().unwrap()
        };
        session.open_from_bytes(&bytes).unwrap();
        assert!(matches!(
            session.open_from_bytes(&bytes),
            Err(HeifError::AlreadyLoaded)
        ));
    }

    #[test]
    fn missing_file_surfaces_the_native_triple() {
        let mut session = Session::new().unwrap();
        let err = session
            .open_from_path("/no/such/file.heic")
            .unwrap_err();
        match err {
            HeifError::Native(native) => {
                assert_eq!(native.code, ErrorCode::InputDoesNotExist)
            }
            other => panic!("expected native error, got {other:?}"),
        }
    }

    #[test]
    fn primary_image_round_trips_through_bytes() {
        let mut writer = Session::new().unwrap();
        let encoder = writer.new_encoder(CompressionFormat::Hevc).unwrap();
        let first = writer
            .encode_image(&solid_rgba(4, 4, [9, 9, 9, 255]), &encoder, None)
            .unwrap();
        let second = writer
            .encode_image(&solid_rgba(8, 8, [5, 5, 5, 255]), &encoder, None)
            .unwrap();
        writer.set_primary_image(&second).unwrap();
        assert!(!first.is_primary());
        assert!(second.is_primary());

        let mut reader = Session::new().unwrap();
        reader.open_from_bytes(&writer.write_to_bytes().unwrap()).unwrap();
        assert_eq!(reader.primary_image_id().unwrap(), second.id());
        let primary = reader.primary_image_handle().unwrap();
        assert_eq!((primary.width(), primary.height()), (8, 8));
    }

    #[test]
    fn a_fresh_session_has_no_primary_image() {
        let mut session = Session::new().unwrap();
        let encoder = session.new_encoder(CompressionFormat::Hevc).unwrap();
        session
            .encode_image(&solid_rgba(2, 2, [1, 1, 1, 255]), &encoder, None)
            .unwrap();
        assert!(matches!(
            session.primary_image_id(),
            Err(HeifError::NoPrimaryImage)
        ));
    }

    #[test]
    fn unknown_items_are_reported_by_id() {
        let session = Session::new().unwrap();
        assert!(matches!(
            session.image_handle(77),
            Err(HeifError::UnknownItem(77))
        ));
    }

    #[test]
    fn encoder_lookup_honors_registration() {
        let session = Session::new().unwrap();
        let encoder = session.new_encoder(CompressionFormat::Hevc).unwrap();
        assert_eq!(encoder.id(), "builtin-hevc");
        assert_eq!(encoder.compression_format(), CompressionFormat::Hevc);
        assert!(matches!(
            session.new_encoder(CompressionFormat::Avc),
            Err(HeifError::NoEncoder(CompressionFormat::Avc))
        ));
    }

    #[test]
    fn encoder_quality_is_range_checked() {
        let session = Session::new().unwrap();
        let mut encoder = session.new_encoder(CompressionFormat::Hevc).unwrap();
        encoder.set_quality(100).unwrap();
        encoder.set_lossless(false).unwrap();
        let err = encoder.set_quality(101).unwrap_err();
        match err {
            HeifError::Native(native) => {
                assert_eq!(native.subcode, ErrorSubcode::InvalidParameterValue)
            }
            other => panic!("expected native error, got {other:?}"),
        }
    }
}
