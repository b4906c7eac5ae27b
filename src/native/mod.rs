//! Embedded codec engine and its exported entry points.
//!
//! The safe wrapper types in the crate root never touch engine objects
//! directly. They go through the functions in this module, which follow the
//! conventions of a C library surface: opaque object pointers with paired
//! alloc/release calls, status triples for fallible operations, out-params
//! for produced objects, and sentinel returns (`-1`, null) for queries.
//! Passing null into a query returns the sentinel; passing null into a
//! fallible operation returns a `NullPointerArgument` triple.

pub(crate) mod boxes;
pub(crate) mod color;
pub(crate) mod object;

use std::path::Path;

use crate::error::RawError;
use crate::image::{Channel, Chroma, Colorspace};
use crate::resource::NativeResource;

pub use boxes::FiletypeResult;
pub(crate) use boxes::check_filetype;
pub use object::{DecodingOptions, EncodingOptions};
pub(crate) use object::{
    ENCODER_DESCRIPTORS, EncoderDescriptor, NativeEncoder, NativeImage, NativeItemHandle,
    NativeSession,
};

use object::{NO_SUCH_ITEM, NULL_ARG};

/// Engine version string, also reported by the CLI.
pub(crate) fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ---------------------------------------------------------------------------
// Session entry points.

pub(crate) fn session_alloc() -> *mut NativeSession {
    Box::into_raw(Box::new(NativeSession::new()))
}

/// # Safety
/// `session` must be null or a pointer from [`session_alloc`] that has not
/// been freed yet.
pub(crate) unsafe fn session_free(session: *mut NativeSession) {
    if !session.is_null() {
        drop(unsafe { Box::from_raw(session) });
    }
}

/// # Safety
/// `session` must be null or a live session pointer.
pub(crate) unsafe fn session_open_bytes(session: *const NativeSession, data: &[u8]) -> RawError {
    match unsafe { session.as_ref() } {
        Some(session) => session.open_bytes(data),
        None => NULL_ARG,
    }
}

/// # Safety
/// `session` must be null or a live session pointer.
pub(crate) unsafe fn session_open_path(session: *const NativeSession, path: &Path) -> RawError {
    match unsafe { session.as_ref() } {
        Some(session) => session.open_path(path),
        None => NULL_ARG,
    }
}

/// # Safety
/// `session` must be null or a live session pointer.
pub(crate) unsafe fn session_top_level_count(session: *const NativeSession) -> i32 {
    unsafe { session.as_ref() }.map_or(0, NativeSession::top_level_count)
}

/// Fills `out_ids` with up to `capacity` top-level item IDs and returns the
/// number written.
///
/// # Safety
/// `session` must be null or live; `out_ids` must be valid for `capacity`
/// writes.
pub(crate) unsafe fn session_top_level_ids(
    session: *const NativeSession,
    out_ids: *mut u32,
    capacity: i32,
) -> i32 {
    let Some(session) = (unsafe { session.as_ref() }) else {
        return 0;
    };
    if out_ids.is_null() || capacity <= 0 {
        return 0;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(out_ids, capacity as usize) };
    session.top_level_ids(out)
}

/// # Safety
/// `session` must be null or a live session pointer.
pub(crate) unsafe fn session_is_top_level_id(session: *const NativeSession, id: u32) -> bool {
    unsafe { session.as_ref() }.is_some_and(|session| session.is_top_level(id))
}

/// # Safety
/// `session` must be null or live; `out_id` must be valid for one write.
pub(crate) unsafe fn session_primary_id(
    session: *const NativeSession,
    out_id: *mut u32,
) -> RawError {
    let Some(session) = (unsafe { session.as_ref() }) else {
        return NULL_ARG;
    };
    if out_id.is_null() {
        return NULL_ARG;
    }
    match session.primary_id() {
        Ok(id) => {
            unsafe { *out_id = id };
            RawError::OK
        }
        Err(e) => e,
    }
}

/// # Safety
/// `session` must be null or live; `out_handle` must be valid for one write.
pub(crate) unsafe fn session_get_handle(
    session: *const NativeSession,
    id: u32,
    out_handle: *mut *mut NativeItemHandle,
) -> RawError {
    let Some(session) = (unsafe { session.as_ref() }) else {
        return NULL_ARG;
    };
    if out_handle.is_null() {
        return NULL_ARG;
    }
    match session.handle_for(id) {
        Ok(handle) => {
            unsafe { *out_handle = Box::into_raw(Box::new(handle)) };
            RawError::OK
        }
        Err(e) => {
            unsafe { *out_handle = std::ptr::null_mut() };
            e
        }
    }
}

/// # Safety
/// All object pointers must be null or live; `out_handle` must be valid for
/// one write.
pub(crate) unsafe fn session_encode_image(
    session: *const NativeSession,
    image: *const NativeImage,
    encoder: *const NativeEncoder,
    options: Option<&EncodingOptions>,
    out_handle: *mut *mut NativeItemHandle,
) -> RawError {
    let (Some(session), Some(image), Some(encoder)) = (
        unsafe { session.as_ref() },
        unsafe { image.as_ref() },
        unsafe { encoder.as_ref() },
    ) else {
        return NULL_ARG;
    };
    if out_handle.is_null() {
        return NULL_ARG;
    }
    match session.encode_image(image, encoder, options) {
        Ok(id) => unsafe { session_get_handle(session, id, out_handle) },
        Err(e) => {
            unsafe { *out_handle = std::ptr::null_mut() };
            e
        }
    }
}

/// Encodes a scaled-down thumbnail of `image` and links it to `master`.
/// Writes null without error when the image already fits the bounding box.
///
/// # Safety
/// All object pointers must be null or live; `out_handle` must be valid for
/// one write.
pub(crate) unsafe fn session_encode_thumbnail(
    session: *const NativeSession,
    image: *const NativeImage,
    master: *const NativeItemHandle,
    encoder: *const NativeEncoder,
    options: Option<&EncodingOptions>,
    bbox_size: i32,
    out_handle: *mut *mut NativeItemHandle,
) -> RawError {
    let (Some(session), Some(image), Some(master), Some(encoder)) = (
        unsafe { session.as_ref() },
        unsafe { image.as_ref() },
        unsafe { master.as_ref() },
        unsafe { encoder.as_ref() },
    ) else {
        return NULL_ARG;
    };
    if out_handle.is_null() {
        return NULL_ARG;
    }
    match session.encode_thumbnail(image, master.item_id, encoder, options, bbox_size) {
        Ok(Some(id)) => unsafe { session_get_handle(session, id, out_handle) },
        Ok(None) => {
            unsafe { *out_handle = std::ptr::null_mut() };
            RawError::OK
        }
        Err(e) => {
            unsafe { *out_handle = std::ptr::null_mut() };
            e
        }
    }
}

/// # Safety
/// Both pointers must be null or live.
pub(crate) unsafe fn session_set_primary(
    session: *const NativeSession,
    handle: *const NativeItemHandle,
) -> RawError {
    let (Some(session), Some(handle)) =
        (unsafe { session.as_ref() }, unsafe { handle.as_ref() })
    else {
        return NULL_ARG;
    };
    session.set_primary(handle.item_id)
}

/// # Safety
/// Both pointers must be null or live.
pub(crate) unsafe fn session_add_exif(
    session: *const NativeSession,
    handle: *const NativeItemHandle,
    data: &[u8],
) -> RawError {
    let (Some(session), Some(handle)) =
        (unsafe { session.as_ref() }, unsafe { handle.as_ref() })
    else {
        return NULL_ARG;
    };
    session.add_metadata(handle.item_id, "Exif", data, true)
}

/// # Safety
/// Both pointers must be null or live.
pub(crate) unsafe fn session_add_xmp(
    session: *const NativeSession,
    handle: *const NativeItemHandle,
    data: &[u8],
) -> RawError {
    let (Some(session), Some(handle)) =
        (unsafe { session.as_ref() }, unsafe { handle.as_ref() })
    else {
        return NULL_ARG;
    };
    session.add_metadata(handle.item_id, "mime", data, false)
}

/// # Safety
/// `session` must be null or a live session pointer.
pub(crate) unsafe fn session_write_path(session: *const NativeSession, path: &Path) -> RawError {
    match unsafe { session.as_ref() } {
        Some(session) => session.write_path(path),
        None => NULL_ARG,
    }
}

/// # Safety
/// `session` must be null or a live session pointer.
pub(crate) unsafe fn session_write_bytes(
    session: *const NativeSession,
    out: &mut Vec<u8>,
) -> RawError {
    match unsafe { session.as_ref() } {
        Some(session) => session.write_bytes(out),
        None => NULL_ARG,
    }
}

/// # Safety
/// `session` must be null or a live session pointer.
pub(crate) unsafe fn session_set_max_image_size(session: *const NativeSession, max_dim: u32) {
    if let Some(session) = unsafe { session.as_ref() } {
        session.set_max_image_size(max_dim);
    }
}

// ---------------------------------------------------------------------------
// Encoder entry points.

pub(crate) fn encoder_descriptors() -> &'static [EncoderDescriptor] {
    ENCODER_DESCRIPTORS
}

/// # Safety
/// `session` and `descriptor` must be null or live; `descriptor` must point
/// into the static descriptor table; `out_encoder` must be valid for one
/// write.
pub(crate) unsafe fn session_get_encoder(
    session: *const NativeSession,
    descriptor: *const EncoderDescriptor,
    out_encoder: *mut *mut NativeEncoder,
) -> RawError {
    if unsafe { session.as_ref() }.is_none() || out_encoder.is_null() {
        return NULL_ARG;
    }
    let Some(descriptor) = (unsafe { descriptor.as_ref() }) else {
        return NULL_ARG;
    };
    unsafe { *out_encoder = Box::into_raw(Box::new(NativeEncoder::new(descriptor))) };
    RawError::OK
}

/// # Safety
/// `encoder` must be null or a live encoder pointer.
pub(crate) unsafe fn encoder_set_quality(encoder: *mut NativeEncoder, quality: i32) -> RawError {
    match unsafe { encoder.as_mut() } {
        Some(encoder) => encoder.set_quality(quality),
        None => NULL_ARG,
    }
}

/// # Safety
/// `encoder` must be null or a live encoder pointer.
pub(crate) unsafe fn encoder_set_lossless(encoder: *mut NativeEncoder, lossless: bool) -> RawError {
    match unsafe { encoder.as_mut() } {
        Some(encoder) => {
            encoder.set_lossless(lossless);
            RawError::OK
        }
        None => NULL_ARG,
    }
}

/// # Safety
/// `encoder` must be null or an encoder pointer that has not been freed yet.
pub(crate) unsafe fn encoder_release(encoder: *mut NativeEncoder) {
    if !encoder.is_null() {
        drop(unsafe { Box::from_raw(encoder) });
    }
}

// ---------------------------------------------------------------------------
// Item handle entry points.

/// # Safety
/// `handle` must be null or a handle pointer that has not been freed yet.
pub(crate) unsafe fn item_handle_release(handle: *mut NativeItemHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_id(handle: *const NativeItemHandle) -> u32 {
    unsafe { handle.as_ref() }.map_or(0, |handle| handle.item_id)
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_width(handle: *const NativeItemHandle) -> i32 {
    unsafe { handle.as_ref() }.map_or(0, NativeItemHandle::width)
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_height(handle: *const NativeItemHandle) -> i32 {
    unsafe { handle.as_ref() }.map_or(0, NativeItemHandle::height)
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_has_alpha(handle: *const NativeItemHandle) -> bool {
    unsafe { handle.as_ref() }.is_some_and(NativeItemHandle::has_alpha)
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_is_primary(handle: *const NativeItemHandle) -> bool {
    unsafe { handle.as_ref() }.is_some_and(NativeItemHandle::is_primary)
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_depth_count(handle: *const NativeItemHandle) -> i32 {
    unsafe { handle.as_ref() }.map_or(0, NativeItemHandle::depth_image_count)
}

/// # Safety
/// `handle` must be null or live; `out_ids` must be valid for `capacity`
/// writes.
pub(crate) unsafe fn item_depth_ids(
    handle: *const NativeItemHandle,
    out_ids: *mut u32,
    capacity: i32,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return 0;
    };
    if out_ids.is_null() || capacity <= 0 {
        return 0;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(out_ids, capacity as usize) };
    handle.depth_image_ids(out)
}

/// # Safety
/// `handle` must be null or live; `out_handle` must be valid for one write.
pub(crate) unsafe fn item_depth_handle(
    handle: *const NativeItemHandle,
    id: u32,
    out_handle: *mut *mut NativeItemHandle,
) -> RawError {
    unsafe { referenced_out(handle, id, out_handle, |item| &item.depth_images) }
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_thumbnail_count(handle: *const NativeItemHandle) -> i32 {
    unsafe { handle.as_ref() }.map_or(0, NativeItemHandle::thumbnail_count)
}

/// # Safety
/// `handle` must be null or live; `out_ids` must be valid for `capacity`
/// writes.
pub(crate) unsafe fn item_thumbnail_ids(
    handle: *const NativeItemHandle,
    out_ids: *mut u32,
    capacity: i32,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return 0;
    };
    if out_ids.is_null() || capacity <= 0 {
        return 0;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(out_ids, capacity as usize) };
    handle.thumbnail_ids(out)
}

/// # Safety
/// `handle` must be null or live; `out_handle` must be valid for one write.
pub(crate) unsafe fn item_thumbnail_handle(
    handle: *const NativeItemHandle,
    id: u32,
    out_handle: *mut *mut NativeItemHandle,
) -> RawError {
    unsafe { referenced_out(handle, id, out_handle, |item| &item.thumbnails) }
}

unsafe fn referenced_out(
    handle: *const NativeItemHandle,
    id: u32,
    out_handle: *mut *mut NativeItemHandle,
    select: impl Fn(&object::Item) -> &Vec<u32>,
) -> RawError {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return NULL_ARG;
    };
    if out_handle.is_null() {
        return NULL_ARG;
    }
    match handle.referenced_handle(id, select) {
        Ok(resolved) => {
            unsafe { *out_handle = Box::into_raw(Box::new(resolved)) };
            RawError::OK
        }
        Err(e) => {
            unsafe { *out_handle = std::ptr::null_mut() };
            e
        }
    }
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_metadata_count(
    handle: *const NativeItemHandle,
    type_filter: Option<&str>,
) -> i32 {
    unsafe { handle.as_ref() }.map_or(0, |handle| handle.metadata_count(type_filter))
}

/// # Safety
/// `handle` must be null or live; `out_ids` must be valid for `capacity`
/// writes.
pub(crate) unsafe fn item_metadata_ids(
    handle: *const NativeItemHandle,
    type_filter: Option<&str>,
    out_ids: *mut u32,
    capacity: i32,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return 0;
    };
    if out_ids.is_null() || capacity <= 0 {
        return 0;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(out_ids, capacity as usize) };
    handle.metadata_ids(type_filter, out)
}

/// # Safety
/// `handle` must be null or a live handle pointer.
pub(crate) unsafe fn item_metadata_size(handle: *const NativeItemHandle, id: u32) -> usize {
    unsafe { handle.as_ref() }.map_or(0, |handle| handle.metadata_size(id))
}

/// Copies one metadata block into `out`, which must hold at least
/// [`item_metadata_size`] bytes.
///
/// # Safety
/// `handle` must be null or live; `out` must be valid for `capacity` writes.
pub(crate) unsafe fn item_metadata_get(
    handle: *const NativeItemHandle,
    id: u32,
    out: *mut u8,
    capacity: usize,
) -> RawError {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return NULL_ARG;
    };
    if out.is_null() {
        return NULL_ARG;
    }
    let copied = handle.metadata_with(id, |data| {
        if capacity < data.len() {
            return RawError::new(
                crate::error::ErrorCode::UsageError,
                crate::error::ErrorSubcode::InvalidParameterValue,
                "Metadata buffer too small",
            );
        }
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len()) };
        RawError::OK
    });
    copied.unwrap_or(NO_SUCH_ITEM)
}

/// # Safety
/// `handle` must be null or live; `out_image` must be valid for one write.
pub(crate) unsafe fn item_decode(
    handle: *const NativeItemHandle,
    out_image: *mut *mut NativeImage,
    colorspace: Colorspace,
    chroma: Chroma,
    options: Option<&DecodingOptions>,
) -> RawError {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return NULL_ARG;
    };
    if out_image.is_null() {
        return NULL_ARG;
    }
    match handle.decode(colorspace, chroma, options) {
        Ok(image) => {
            unsafe { *out_image = Box::into_raw(Box::new(image)) };
            RawError::OK
        }
        Err(e) => {
            unsafe { *out_image = std::ptr::null_mut() };
            e
        }
    }
}

// ---------------------------------------------------------------------------
// Image entry points.

/// # Safety
/// `out_image` must be null or valid for one write.
pub(crate) unsafe fn image_create(
    width: i32,
    height: i32,
    colorspace: Colorspace,
    chroma: Chroma,
    out_image: *mut *mut NativeImage,
) -> RawError {
    if out_image.is_null() {
        return NULL_ARG;
    }
    if width <= 0 || height <= 0 {
        unsafe { *out_image = std::ptr::null_mut() };
        return RawError::new(
            crate::error::ErrorCode::UsageError,
            crate::error::ErrorSubcode::InvalidParameterValue,
            "Image dimensions must be positive",
        );
    }
    match NativeImage::new(width as u32, height as u32, colorspace, chroma) {
        Ok(image) => {
            unsafe { *out_image = Box::into_raw(Box::new(image)) };
            RawError::OK
        }
        Err(e) => {
            unsafe { *out_image = std::ptr::null_mut() };
            e
        }
    }
}

/// # Safety
/// `image` must be null or an image pointer that has not been freed yet.
pub(crate) unsafe fn image_release(image: *mut NativeImage) {
    if !image.is_null() {
        drop(unsafe { Box::from_raw(image) });
    }
}

/// # Safety
/// `image` must be null or a live image pointer.
pub(crate) unsafe fn image_colorspace(image: *const NativeImage) -> Colorspace {
    unsafe { image.as_ref() }.map_or(Colorspace::Undefined, |image| image.colorspace)
}

/// # Safety
/// `image` must be null or a live image pointer.
pub(crate) unsafe fn image_chroma(image: *const NativeImage) -> Chroma {
    unsafe { image.as_ref() }.map_or(Chroma::Undefined, |image| image.chroma)
}

/// # Safety
/// `image` must be null or a live image pointer.
pub(crate) unsafe fn image_has_alpha(image: *const NativeImage) -> bool {
    unsafe { image.as_ref() }.is_some_and(NativeImage::has_alpha)
}

/// # Safety
/// `image` must be null or a live image pointer.
pub(crate) unsafe fn image_width(image: *const NativeImage, channel: Channel) -> i32 {
    unsafe { image.as_ref() }.map_or(-1, |image| image.channel_width(channel))
}

/// # Safety
/// `image` must be null or a live image pointer.
pub(crate) unsafe fn image_height(image: *const NativeImage, channel: Channel) -> i32 {
    unsafe { image.as_ref() }.map_or(-1, |image| image.channel_height(channel))
}

/// # Safety
/// `image` must be null or a live image pointer.
pub(crate) unsafe fn image_bits_per_pixel(image: *const NativeImage, channel: Channel) -> i32 {
    unsafe { image.as_ref() }.map_or(-1, |image| image.channel_bits_per_pixel(channel))
}

/// Read-only plane data pointer, or null when the channel is absent. The
/// plane's stride in bytes is written through `out_stride`.
///
/// # Safety
/// `image` must be null or live; `out_stride` must be null or valid for one
/// write.
pub(crate) unsafe fn image_plane_readonly(
    image: *const NativeImage,
    channel: Channel,
    out_stride: *mut i32,
) -> *const u8 {
    let Some(image) = (unsafe { image.as_ref() }) else {
        return std::ptr::null();
    };
    if out_stride.is_null() {
        return std::ptr::null();
    }
    match image.plane(channel) {
        Some(plane) => {
            unsafe { *out_stride = plane.stride as i32 };
            plane.data.as_ptr()
        }
        None => std::ptr::null(),
    }
}

/// Mutable variant of [`image_plane_readonly`].
///
/// # Safety
/// `image` must be null or live with no other outstanding plane pointer;
/// `out_stride` must be null or valid for one write.
pub(crate) unsafe fn image_plane(
    image: *mut NativeImage,
    channel: Channel,
    out_stride: *mut i32,
) -> *mut u8 {
    let Some(image) = (unsafe { image.as_mut() }) else {
        return std::ptr::null_mut();
    };
    if out_stride.is_null() {
        return std::ptr::null_mut();
    }
    match image.plane_mut(channel) {
        Some(plane) => {
            unsafe { *out_stride = plane.stride as i32 };
            plane.data.as_mut_ptr()
        }
        None => std::ptr::null_mut(),
    }
}

/// # Safety
/// `image` must be null or a live image pointer.
pub(crate) unsafe fn image_add_plane(
    image: *mut NativeImage,
    channel: Channel,
    width: i32,
    height: i32,
    depth: i32,
) -> RawError {
    let Some(image) = (unsafe { image.as_mut() }) else {
        return NULL_ARG;
    };
    if width <= 0 || height <= 0 || depth <= 0 {
        return RawError::new(
            crate::error::ErrorCode::UsageError,
            crate::error::ErrorSubcode::InvalidParameterValue,
            "Plane geometry must be positive",
        );
    }
    image.add_plane(channel, width as u32, height as u32, depth as u8)
}

/// # Safety
/// `image` must be null or live; `out_image` must be valid for one write.
pub(crate) unsafe fn image_scale(
    image: *const NativeImage,
    out_image: *mut *mut NativeImage,
    width: i32,
    height: i32,
) -> RawError {
    let Some(image) = (unsafe { image.as_ref() }) else {
        return NULL_ARG;
    };
    if out_image.is_null() {
        return NULL_ARG;
    }
    match color::scale_nearest(image, width.max(0) as u32, height.max(0) as u32) {
        Ok(scaled) => {
            unsafe { *out_image = Box::into_raw(Box::new(scaled)) };
            RawError::OK
        }
        Err(e) => {
            unsafe { *out_image = std::ptr::null_mut() };
            e
        }
    }
}

// ---------------------------------------------------------------------------
// Release wiring for the RAII wrappers.

unsafe impl NativeResource for NativeSession {
    unsafe fn release(ptr: *mut Self) {
        unsafe { session_free(ptr) }
    }
}

unsafe impl NativeResource for NativeItemHandle {
    unsafe fn release(ptr: *mut Self) {
        unsafe { item_handle_release(ptr) }
    }
}

unsafe impl NativeResource for NativeImage {
    unsafe fn release(ptr: *mut Self) {
        unsafe { image_release(ptr) }
    }
}

unsafe impl NativeResource for NativeEncoder {
    unsafe fn release(ptr: *mut Self) {
        unsafe { encoder_release(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ErrorSubcode};

    #[test]
    fn null_objects_yield_sentinels_not_crashes() {
        unsafe {
            assert_eq!(
                session_open_bytes(std::ptr::null(), b"x").subcode,
                ErrorSubcode::NullPointerArgument
            );
            assert_eq!(session_top_level_count(std::ptr::null()), 0);
            assert_eq!(item_width(std::ptr::null()), 0);
            assert_eq!(image_width(std::ptr::null(), Channel::Y), -1);
            assert_eq!(image_colorspace(std::ptr::null()), Colorspace::Undefined);
            session_free(std::ptr::null_mut());
            item_handle_release(std::ptr::null_mut());
            image_release(std::ptr::null_mut());
            encoder_release(std::ptr::null_mut());
        }
    }

    #[test]
    fn image_round_trip_through_raw_surface() {
        unsafe {
            let mut image = std::ptr::null_mut();
            let status = image_create(4, 2, Colorspace::Rgb, Chroma::InterleavedRgba, &mut image);
            assert_eq!(status.code, ErrorCode::Ok);
            assert_eq!(image_add_plane(image, Channel::Interleaved, 4, 2, 32).code, ErrorCode::Ok);

            let mut stride = 0;
            let data = image_plane(image, Channel::Interleaved, &mut stride);
            assert!(!data.is_null());
            assert!(stride >= 16);
            *data = 0xAB;

            let mut ro_stride = 0;
            let ro = image_plane_readonly(image, Channel::Interleaved, &mut ro_stride);
            assert_eq!(*ro, 0xAB);
            assert_eq!(ro_stride, stride);

            assert!(image_plane(image, Channel::Y, &mut stride).is_null());
            assert_eq!(image_bits_per_pixel(image, Channel::Interleaved), 32);
            image_release(image);
        }
    }

    #[test]
    fn encode_flow_through_raw_surface() {
        unsafe {
            let session = session_alloc();
            let descriptor = &encoder_descriptors()[0] as *const EncoderDescriptor;
            let mut encoder = std::ptr::null_mut();
            assert_eq!(
                session_get_encoder(session, descriptor, &mut encoder).code,
                ErrorCode::Ok
            );

            let mut image = std::ptr::null_mut();
            image_create(6, 4, Colorspace::Rgb, Chroma::InterleavedRgb, &mut image);
            image_add_plane(image, Channel::Interleaved, 6, 4, 24);

            let mut handle = std::ptr::null_mut();
            let status = session_encode_image(session, image, encoder, None, &mut handle);
            assert_eq!(status.code, ErrorCode::Ok);
            assert_eq!(item_width(handle), 6);
            assert_eq!(item_height(handle), 4);
            assert!(session_is_top_level_id(session, 1));

            let mut ids = [0u32; 4];
            assert_eq!(session_top_level_ids(session, ids.as_mut_ptr(), 4), 1);

            item_handle_release(handle);
            image_release(image);
            encoder_release(encoder);
            session_free(session);
        }
    }

    #[test]
    fn metadata_copies_through_caller_buffer() {
        unsafe {
            let session = session_alloc();
            let descriptor = &encoder_descriptors()[0] as *const EncoderDescriptor;
            let mut encoder = std::ptr::null_mut();
            session_get_encoder(session, descriptor, &mut encoder);

            let mut image = std::ptr::null_mut();
            image_create(2, 2, Colorspace::Rgb, Chroma::InterleavedRgb, &mut image);
            image_add_plane(image, Channel::Interleaved, 2, 2, 24);
            let mut handle = std::ptr::null_mut();
            session_encode_image(session, image, encoder, None, &mut handle);

            assert_eq!(session_add_exif(session, handle, b"exif-body").code, ErrorCode::Ok);
            assert_eq!(item_metadata_count(handle, Some("Exif")), 1);

            let mut ids = [0u32; 1];
            assert_eq!(item_metadata_ids(handle, Some("Exif"), ids.as_mut_ptr(), 1), 1);
            let size = item_metadata_size(handle, ids[0]);
            assert_eq!(size, 4 + b"exif-body".len());

            let mut buf = vec![0u8; size];
            let status = item_metadata_get(handle, ids[0], buf.as_mut_ptr(), buf.len());
            assert_eq!(status.code, ErrorCode::Ok);
            assert_eq!(&buf[..4], &[0, 0, 0, 0]);
            assert_eq!(&buf[4..], b"exif-body");

            assert_eq!(
                item_metadata_get(handle, 99, buf.as_mut_ptr(), buf.len()).subcode,
                ErrorSubcode::NonexistingItemReferenced
            );

            item_handle_release(handle);
            image_release(image);
            encoder_release(encoder);
            session_free(session);
        }
    }
}
