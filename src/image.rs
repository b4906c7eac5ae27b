//! Pixel buffers and the enums describing stored image representations.
//!
//! The numeric values of these enums are part of the engine contract and of
//! the container wire format, so they are fixed rather than derived.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{HeifError, Result, check};
use crate::native;
use crate::native::NativeImage;
use crate::resource::Owned;

/// Colorspace of a pixel buffer or stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Colorspace {
    YCbCr = 0,
    Rgb = 1,
    Monochrome = 2,
    /// Asks a decode to keep the item's stored colorspace.
    Undefined = 99,
}

/// Chroma layout within a colorspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Chroma {
    Monochrome = 0,
    C420 = 1,
    C422 = 2,
    C444 = 3,
    InterleavedRgb = 10,
    InterleavedRgba = 11,
    InterleavedRrggbbBe = 12,
    InterleavedRrggbbaaBe = 13,
    InterleavedRrggbbLe = 14,
    InterleavedRrggbbaaLe = 15,
    /// Asks a decode to keep the item's stored chroma.
    Undefined = 99,
}

impl Chroma {
    /// 24-bit interleaved chroma, one byte per RGB component.
    pub const INTERLEAVED_24BIT: Chroma = Chroma::InterleavedRgb;
    /// 32-bit interleaved chroma, one byte per RGBA component.
    pub const INTERLEAVED_32BIT: Chroma = Chroma::InterleavedRgba;
}

/// One addressable channel of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Channel {
    Y = 0,
    Cb = 1,
    Cr = 2,
    R = 3,
    G = 4,
    B = 5,
    Alpha = 6,
    /// All components packed into a single plane.
    Interleaved = 10,
}

/// Codec an item was committed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CompressionFormat {
    Undefined = 0,
    Hevc = 1,
    Avc = 2,
    Jpeg = 3,
    Av1 = 4,
    Uncompressed = 8,
}

/// An uncompressed image held by the engine, either decoded from an item or
/// built up plane by plane for encoding.
#[derive(Debug)]
pub struct Image {
    raw: Owned<NativeImage>,
}

/// Read-only view of one channel's plane, valid while the image is borrowed.
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Bytes per row, including alignment padding.
    pub stride: usize,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
}

/// Writable view of one channel's plane.
pub struct PlaneMut<'a> {
    pub data: &'a mut [u8],
    /// Bytes per row, including alignment padding.
    pub stride: usize,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
}

impl Image {
    /// Allocates an empty pixel buffer. Planes are added afterwards with
    /// [`Image::add_plane`].
    pub fn new(width: u32, height: u32, colorspace: Colorspace, chroma: Chroma) -> Result<Image> {
        let mut ptr = std::ptr::null_mut();
        check(unsafe {
            native::image_create(width as i32, height as i32, colorspace, chroma, &mut ptr)
        })?;
        Ok(Image {
            raw: Owned::acquire(ptr, "image")?,
        })
    }

    pub(crate) fn from_owned(raw: Owned<NativeImage>) -> Image {
        Image { raw }
    }

    pub(crate) fn as_ptr(&self) -> *mut NativeImage {
        self.raw.as_ptr()
    }

    pub fn colorspace(&self) -> Colorspace {
        unsafe { native::image_colorspace(self.raw.as_ptr()) }
    }

    pub fn chroma_format(&self) -> Chroma {
        unsafe { native::image_chroma(self.raw.as_ptr()) }
    }

    /// Whether the buffer carries an alpha channel, interleaved or as its
    /// own plane.
    pub fn has_alpha(&self) -> bool {
        unsafe { native::image_has_alpha(self.raw.as_ptr()) }
    }

    /// Width of one channel's plane.
    pub fn width(&self, channel: Channel) -> Result<u32> {
        from_sentinel(
            unsafe { native::image_width(self.raw.as_ptr(), channel) },
            channel,
        )
    }

    /// Height of one channel's plane.
    pub fn height(&self, channel: Channel) -> Result<u32> {
        from_sentinel(
            unsafe { native::image_height(self.raw.as_ptr(), channel) },
            channel,
        )
    }

    /// Bits per pixel of one channel's plane (24 or 32 for interleaved
    /// planes, 8 otherwise).
    pub fn bits_per_pixel(&self, channel: Channel) -> Result<u32> {
        from_sentinel(
            unsafe { native::image_bits_per_pixel(self.raw.as_ptr(), channel) },
            channel,
        )
    }

    /// Read-only access to one channel's plane.
    pub fn plane(&self, channel: Channel) -> Result<Plane<'_>> {
        let (width, height, bit_depth) = self.plane_geometry(channel)?;
        let mut stride = 0i32;
        let data = unsafe { native::image_plane_readonly(self.raw.as_ptr(), channel, &mut stride) };
        if data.is_null() {
            return Err(HeifError::NoSuchChannel(channel));
        }
        let len = stride as usize * height as usize;
        Ok(Plane {
            data: unsafe { std::slice::from_raw_parts(data, len) },
            stride: stride as usize,
            width,
            height,
            bit_depth,
        })
    }

    /// Writable access to one channel's plane.
    pub fn plane_mut(&mut self, channel: Channel) -> Result<PlaneMut<'_>> {
        let (width, height, bit_depth) = self.plane_geometry(channel)?;
        let mut stride = 0i32;
        let data = unsafe { native::image_plane(self.raw.as_ptr(), channel, &mut stride) };
        if data.is_null() {
            return Err(HeifError::NoSuchChannel(channel));
        }
        let len = stride as usize * height as usize;
        Ok(PlaneMut {
            data: unsafe { std::slice::from_raw_parts_mut(data, len) },
            stride: stride as usize,
            width,
            height,
            bit_depth,
        })
    }

    /// Allocates a plane for `channel` and returns a writable view of it.
    pub fn add_plane(
        &mut self,
        channel: Channel,
        width: u32,
        height: u32,
        bit_depth: u8,
    ) -> Result<PlaneMut<'_>> {
        check(unsafe {
            native::image_add_plane(
                self.raw.as_ptr(),
                channel,
                width as i32,
                height as i32,
                bit_depth as i32,
            )
        })?;
        self.plane_mut(channel)
    }

    /// Nearest-neighbor scale into a new buffer of the same representation.
    pub fn scale(&self, width: u32, height: u32) -> Result<Image> {
        let mut ptr = std::ptr::null_mut();
        check(unsafe {
            native::image_scale(self.raw.as_ptr(), &mut ptr, width as i32, height as i32)
        })?;
        Ok(Image {
            raw: Owned::acquire(ptr, "scaled image")?,
        })
    }

    fn plane_geometry(&self, channel: Channel) -> Result<(u32, u32, u8)> {
        let width = self.width(channel)?;
        let height = self.height(channel)?;
        let bit_depth = self.bits_per_pixel(channel)?;
        Ok((width, height, bit_depth as u8))
    }
}

fn from_sentinel(value: i32, channel: Channel) -> Result<u32> {
    if value < 0 {
        Err(HeifError::NoSuchChannel(channel))
    } else {
        Ok(value as u32)
    }
}

impl Plane<'_> {
    /// Visible bytes per row, excluding stride padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * (self.bit_depth as usize / 8)
    }

    /// One row of pixels without the stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        &self.data[y as usize * self.stride..][..self.row_bytes()]
    }
}

impl PlaneMut<'_> {
    /// Visible bytes per row, excluding stride padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * (self.bit_depth as usize / 8)
    }

    /// Copies a full pixel rectangle into the plane. `source_stride` is the
    /// distance between rows of `data` in bytes; rows are copied one by one
    /// when it differs from the plane's own stride.
    pub fn set_data(&mut self, data: &[u8], source_stride: usize) -> Result<()> {
        let row = self.row_bytes();
        if source_stride < row {
            return Err(HeifError::InvalidPixelData(
                "source stride shorter than a pixel row",
            ));
        }
        let height = self.height as usize;
        let needed = (height - 1) * source_stride + row;
        if data.len() < needed {
            return Err(HeifError::InvalidPixelData(
                "source buffer shorter than its geometry",
            ));
        }
        if source_stride == self.stride {
            let len = (height - 1) * self.stride + row;
            self.data[..len].copy_from_slice(&data[..len]);
        } else {
            for y in 0..height {
                self.data[y * self.stride..y * self.stride + row]
                    .copy_from_slice(&data[y * source_stride..y * source_stride + row]);
            }
        }
        Ok(())
    }

    /// Copies one row of pixels into the plane.
    pub fn set_row(&mut self, y: u32, pixels: &[u8]) -> Result<()> {
        let row = self.row_bytes();
        if y >= self.height {
            return Err(HeifError::InvalidPixelData("row index out of range"));
        }
        if pixels.len() < row {
            return Err(HeifError::InvalidPixelData("row shorter than plane width"));
        }
        let offset = y as usize * self.stride;
        self.data[offset..offset + row].copy_from_slice(&pixels[..row]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_aliases_name_the_interleaved_formats() {
        assert_eq!(Chroma::INTERLEAVED_24BIT, Chroma::InterleavedRgb);
        assert_eq!(Chroma::INTERLEAVED_32BIT, Chroma::InterleavedRgba);
        let value: u8 = Chroma::InterleavedRgba.into();
        assert_eq!(value, 11);
    }

    #[test]
    fn absent_channel_maps_to_no_such_channel() {
        let image = Image::new(4, 4, Colorspace::Rgb, Chroma::InterleavedRgb).unwrap();
        match image.width(Channel::Alpha) {
            Err(HeifError::NoSuchChannel(Channel::Alpha)) => {}
            other => panic!("expected NoSuchChannel, got {other:?}"),
        }
        assert!(image.plane(Channel::Alpha).is_err());
    }

    #[test]
    fn mismatched_colorspace_and_chroma_are_rejected() {
        let err = Image::new(4, 4, Colorspace::YCbCr, Chroma::InterleavedRgb).unwrap_err();
        match err {
            HeifError::Native(native) => {
                assert_eq!(
                    native.subcode,
                    crate::error::ErrorSubcode::InvalidParameterValue
                );
            }
            other => panic!("expected native error, got {other:?}"),
        }
    }

    #[test]
    fn added_plane_is_readable_and_writable() {
        let mut image = Image::new(4, 3, Colorspace::Rgb, Chroma::InterleavedRgb).unwrap();
        {
            let mut plane = image.add_plane(Channel::Interleaved, 4, 3, 24).unwrap();
            assert_eq!(plane.width, 4);
            assert_eq!(plane.row_bytes(), 12);
            plane.set_row(1, &[7u8; 12]).unwrap();
        }
        let plane = image.plane(Channel::Interleaved).unwrap();
        assert_eq!(plane.row(1), &[7u8; 12]);
        assert_eq!(plane.row(0), &[0u8; 12]);
        assert_eq!(image.bits_per_pixel(Channel::Interleaved).unwrap(), 24);
    }

    #[test]
    fn set_data_handles_padded_source_strides() {
        let mut image = Image::new(2, 2, Colorspace::Monochrome, Chroma::Monochrome).unwrap();
        let mut plane = image.add_plane(Channel::Y, 2, 2, 8).unwrap();
        let source = [1u8, 2, 0xEE, 0xEE, 3, 4, 0xEE, 0xEE];
        plane.set_data(&source, 4).unwrap();
        drop(plane);
        let plane = image.plane(Channel::Y).unwrap();
        assert_eq!(plane.row(0), &[1, 2]);
        assert_eq!(plane.row(1), &[3, 4]);
    }

    #[test]
    fn set_data_rejects_short_buffers() {
        let mut image = Image::new(4, 2, Colorspace::Monochrome, Chroma::Monochrome).unwrap();
        let mut plane = image.add_plane(Channel::Y, 4, 2, 8).unwrap();
        assert!(matches!(
            plane.set_data(&[0u8; 3], 4),
            Err(HeifError::InvalidPixelData(_))
        ));
        assert!(matches!(
            plane.set_data(&[0u8; 16], 2),
            Err(HeifError::InvalidPixelData(_))
        ));
        assert!(matches!(
            plane.set_row(5, &[0u8; 4]),
            Err(HeifError::InvalidPixelData(_))
        ));
    }

    #[test]
    fn scaling_produces_the_requested_geometry() {
        let mut image = Image::new(8, 8, Colorspace::Monochrome, Chroma::Monochrome).unwrap();
        image.add_plane(Channel::Y, 8, 8, 8).unwrap();
        let half = image.scale(4, 4).unwrap();
        assert_eq!(half.width(Channel::Y).unwrap(), 4);
        assert_eq!(half.height(Channel::Y).unwrap(), 4);
        assert_eq!(half.chroma_format(), Chroma::Monochrome);
    }
}
