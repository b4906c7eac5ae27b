//! Safe API over the built-in HEIF container engine: sessions, item
//! handles, pixel buffers, format conversion and the layered wallpaper
//! metadata decoders.

pub mod context;
pub mod convert;
pub mod error;
pub mod handle;
pub mod image;
pub mod metadata;
mod native;
mod resource;

pub use context::{Encoder, Session, SessionState};
pub use convert::{GrayPixels, Pixels, RgbaPixels, Subsampling, YCbCrPixels};
pub use error::{ErrorCode, ErrorSubcode, HeifError, NativeError, Result};
pub use handle::ItemHandle;
pub use image::{Channel, Chroma, Colorspace, CompressionFormat, Image, Plane, PlaneMut};
pub use metadata::plist::Value;
pub use metadata::{APPLE_SOLAR_SELECTOR, APPLE_TIMES_SELECTOR, FrameTime, TimeTable};
pub use native::{DecodingOptions, EncodingOptions, FiletypeResult};

/// ID of an item inside a container.
pub type ItemId = u32;

/// ID of a metadata block attached to an item.
pub type MetadataId = u32;

/// Basic facts about a container's primary image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
}

/// Classifies a byte stream by its container signature. Needs at least the
/// first 12 bytes for a definite answer.
pub fn check_filetype(data: &[u8]) -> FiletypeResult {
    native::check_filetype(data)
}

/// Reads the basic facts of a container's primary image without touching
/// pixel data.
pub fn probe(data: &[u8]) -> Result<ImageInfo> {
    let mut session = Session::new()?;
    session.open_from_bytes(data)?;
    let handle = session.primary_image_handle()?;
    Ok(ImageInfo {
        width: handle.width(),
        height: handle.height(),
        has_alpha: handle.has_alpha_channel(),
    })
}

/// Decodes a container's primary image straight to pixel data.
///
/// The image keeps its stored representation when that representation has
/// a direct pixel form, and falls back to interleaved RGBA otherwise.
pub fn decode_primary(data: &[u8]) -> Result<Pixels> {
    let mut session = Session::new()?;
    session.open_from_bytes(data)?;
    let handle = session.primary_image_handle()?;
    let image = handle.decode(Colorspace::Undefined, Chroma::Undefined, None)?;
    match image.to_pixels() {
        Err(HeifError::UnsupportedColorConversion { .. }) => handle
            .decode(Colorspace::Rgb, Chroma::InterleavedRgba, None)?
            .to_pixels(),
        pixels => pixels,
    }
}

/// Version of the underlying engine.
pub fn version() -> &'static str {
    native::version()
}
