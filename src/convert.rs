//! Conversion between engine pixel buffers and generic pixel shapes.
//!
//! Three generic shapes are supported: interleaved RGBA, planar YCbCr, and
//! single-plane grayscale. Decoded buffers map onto them with `to_pixels`;
//! the `from_*` functions build committable buffers from them.

use crate::error::{HeifError, Result};
use crate::image::{Channel, Chroma, Colorspace, Image};

/// Chroma subsampling ratio of a planar YCbCr buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsampling {
    Ratio420,
    Ratio422,
    Ratio444,
}

impl Subsampling {
    /// Dimensions of the Cb/Cr planes for a luma rectangle of `width` by
    /// `height`.
    pub fn chroma_dimensions(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Subsampling::Ratio420 => ((width + 1) / 2, (height + 1) / 2),
            Subsampling::Ratio422 => ((width + 1) / 2, height),
            Subsampling::Ratio444 => (width, height),
        }
    }
}

/// Interleaved pixels, always four bytes per pixel in RGBA order.
#[derive(Debug, Clone)]
pub struct RgbaPixels {
    pub data: Vec<u8>,
    /// Distance between rows in bytes.
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

/// Planar YCbCr pixels with one shared stride for both chroma planes.
#[derive(Debug, Clone)]
pub struct YCbCrPixels {
    pub y: Vec<u8>,
    pub cb: Vec<u8>,
    pub cr: Vec<u8>,
    pub y_stride: usize,
    pub chroma_stride: usize,
    pub subsampling: Subsampling,
    pub width: u32,
    pub height: u32,
}

/// Single-plane grayscale pixels.
#[derive(Debug, Clone)]
pub struct GrayPixels {
    pub data: Vec<u8>,
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

/// A decoded image in one of the generic shapes.
#[derive(Debug, Clone)]
pub enum Pixels {
    Rgba(RgbaPixels),
    YCbCr(YCbCrPixels),
    Gray(GrayPixels),
}

impl Pixels {
    pub fn width(&self) -> u32 {
        match self {
            Pixels::Rgba(p) => p.width,
            Pixels::YCbCr(p) => p.width,
            Pixels::Gray(p) => p.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Pixels::Rgba(p) => p.height,
            Pixels::YCbCr(p) => p.height,
            Pixels::Gray(p) => p.height,
        }
    }
}

impl Image {
    /// Maps the buffer onto a generic pixel shape.
    ///
    /// Planar YCbCr maps at any of the three subsampling ratios. RGB maps
    /// only when the chroma is exactly 32-bit interleaved RGBA; every other
    /// RGB layout is an unsupported conversion, as is anything else.
    pub fn to_pixels(&self) -> Result<Pixels> {
        let colorspace = self.colorspace();
        let chroma = self.chroma_format();
        match (colorspace, chroma) {
            (Colorspace::YCbCr, Chroma::C420) => {
                self.to_ycbcr(Subsampling::Ratio420).map(Pixels::YCbCr)
            }
            (Colorspace::YCbCr, Chroma::C422) => {
                self.to_ycbcr(Subsampling::Ratio422).map(Pixels::YCbCr)
            }
            (Colorspace::YCbCr, Chroma::C444) => {
                self.to_ycbcr(Subsampling::Ratio444).map(Pixels::YCbCr)
            }
            (Colorspace::Rgb, Chroma::InterleavedRgba) => self.to_rgba().map(Pixels::Rgba),
            (Colorspace::Monochrome, Chroma::Monochrome) => self.to_gray().map(Pixels::Gray),
            (colorspace, chroma) => Err(HeifError::UnsupportedColorConversion {
                colorspace,
                chroma,
            }),
        }
    }

    fn to_rgba(&self) -> Result<RgbaPixels> {
        let plane = self.plane(Channel::Interleaved)?;
        if plane.bit_depth != 32 {
            return Err(HeifError::InvalidPixelData("interleaved plane is not 32-bit"));
        }
        let row = plane.row_bytes();
        let mut data = Vec::with_capacity(row * plane.height as usize);
        for y in 0..plane.height {
            data.extend_from_slice(plane.row(y));
        }
        Ok(RgbaPixels {
            data,
            stride: row,
            width: plane.width,
            height: plane.height,
        })
    }

    fn to_ycbcr(&self, subsampling: Subsampling) -> Result<YCbCrPixels> {
        let yp = self.plane(Channel::Y)?;
        let cbp = self.plane(Channel::Cb)?;
        let crp = self.plane(Channel::Cr)?;
        Ok(YCbCrPixels {
            y: yp.data.to_vec(),
            cb: cbp.data.to_vec(),
            cr: crp.data.to_vec(),
            y_stride: yp.stride,
            chroma_stride: cbp.stride,
            subsampling,
            width: yp.width,
            height: yp.height,
        })
    }

    fn to_gray(&self) -> Result<GrayPixels> {
        let plane = self.plane(Channel::Y)?;
        let row = plane.row_bytes();
        let mut data = Vec::with_capacity(row * plane.height as usize);
        for y in 0..plane.height {
            data.extend_from_slice(plane.row(y));
        }
        Ok(GrayPixels {
            data,
            stride: row,
            width: plane.width,
            height: plane.height,
        })
    }
}

/// Builds a committable buffer from any generic pixel shape.
pub fn from_pixels(pixels: &Pixels) -> Result<Image> {
    match pixels {
        Pixels::Rgba(p) => from_rgba(p),
        Pixels::YCbCr(p) => from_ycbcr(p),
        Pixels::Gray(p) => from_gray(p),
    }
}

/// Builds an interleaved RGB(A) buffer from generic RGBA pixels.
///
/// The source is probed for an alpha channel by scanning every pixel's
/// alpha byte for the fully-opaque sentinel `0xFF`: one hit selects the
/// 32-bit RGBA layout, no hit selects 24-bit RGB with the alpha bytes
/// dropped. Note the probe looks for the *opaque* value, so a uniformly
/// semi-transparent source still loses its alpha channel. An empty pixel
/// rectangle counts as alpha-bearing.
pub fn from_rgba(rgba: &RgbaPixels) -> Result<Image> {
    let width = rgba.width as usize;
    let height = rgba.height as usize;
    let row = width * 4;
    if rgba.stride < row {
        return Err(HeifError::InvalidPixelData(
            "source stride shorter than a pixel row",
        ));
    }
    if height > 0 && rgba.data.len() < (height - 1) * rgba.stride + row {
        return Err(HeifError::InvalidPixelData(
            "source buffer shorter than its geometry",
        ));
    }

    let mut has_alpha = width == 0 || height == 0;
    'probe: for y in 0..height {
        let pixels = &rgba.data[y * rgba.stride..][..row];
        for px in pixels.chunks_exact(4) {
            if px[3] == 0xFF {
                has_alpha = true;
                break 'probe;
            }
        }
    }

    let mut image = if has_alpha {
        Image::new(
            rgba.width,
            rgba.height,
            Colorspace::Rgb,
            Chroma::INTERLEAVED_32BIT,
        )?
    } else {
        Image::new(
            rgba.width,
            rgba.height,
            Colorspace::Rgb,
            Chroma::INTERLEAVED_24BIT,
        )?
    };

    if has_alpha {
        let mut plane = image.add_plane(Channel::Interleaved, rgba.width, rgba.height, 32)?;
        plane.set_data(&rgba.data, rgba.stride)?;
    } else {
        let mut plane = image.add_plane(Channel::Interleaved, rgba.width, rgba.height, 24)?;
        let mut packed = vec![0u8; width * 3];
        for y in 0..rgba.height {
            let source = &rgba.data[y as usize * rgba.stride..][..row];
            for (dst, px) in packed.chunks_exact_mut(3).zip(source.chunks_exact(4)) {
                dst.copy_from_slice(&px[..3]);
            }
            plane.set_row(y, &packed)?;
        }
    }
    Ok(image)
}

/// Builds a planar YCbCr buffer from generic planar pixels. Only 4:2:0
/// sources can be committed; the other ratios exist on the decode side
/// only.
pub fn from_ycbcr(planar: &YCbCrPixels) -> Result<Image> {
    if planar.subsampling != Subsampling::Ratio420 {
        return Err(HeifError::UnsupportedColorConversion {
            colorspace: Colorspace::YCbCr,
            chroma: match planar.subsampling {
                Subsampling::Ratio422 => Chroma::C422,
                _ => Chroma::C444,
            },
        });
    }
    let (cw, ch) = planar.subsampling.chroma_dimensions(planar.width, planar.height);
    validate_plane(&planar.y, planar.y_stride, planar.width, planar.height)?;
    validate_plane(&planar.cb, planar.chroma_stride, cw, ch)?;
    validate_plane(&planar.cr, planar.chroma_stride, cw, ch)?;

    let mut image = Image::new(planar.width, planar.height, Colorspace::YCbCr, Chroma::C420)?;
    image
        .add_plane(Channel::Y, planar.width, planar.height, 8)?
        .set_data(&planar.y, planar.y_stride)?;
    image
        .add_plane(Channel::Cb, cw, ch, 8)?
        .set_data(&planar.cb, planar.chroma_stride)?;
    image
        .add_plane(Channel::Cr, cw, ch, 8)?
        .set_data(&planar.cr, planar.chroma_stride)?;
    Ok(image)
}

/// Builds a monochrome buffer from generic grayscale pixels.
pub fn from_gray(gray: &GrayPixels) -> Result<Image> {
    validate_plane(&gray.data, gray.stride, gray.width, gray.height)?;
    let mut image = Image::new(
        gray.width,
        gray.height,
        Colorspace::Monochrome,
        Chroma::Monochrome,
    )?;
    image
        .add_plane(Channel::Y, gray.width, gray.height, 8)?
        .set_data(&gray.data, gray.stride)?;
    Ok(image)
}

fn validate_plane(data: &[u8], stride: usize, width: u32, height: u32) -> Result<()> {
    let row = width as usize;
    if stride < row {
        return Err(HeifError::InvalidPixelData(
            "source stride shorter than a pixel row",
        ));
    }
    if height > 0 && data.len() < (height as usize - 1) * stride + row {
        return Err(HeifError::InvalidPixelData(
            "source buffer shorter than its geometry",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba_fixture(width: u32, height: u32, alpha: u8) -> RgbaPixels {
        let mut data = vec![0u8; width as usize * height as usize * 4];
        for (i, px) in data.chunks_exact_mut(4).enumerate() {
            px[0] = i as u8;
            px[1] = 0x20;
            px[2] = 0x30;
            px[3] = alpha;
        }
        RgbaPixels {
            data,
            stride: width as usize * 4,
            width,
            height,
        }
    }

    #[test]
    fn opaque_sentinel_selects_the_32_bit_layout() {
        let image = from_rgba(&rgba_fixture(4, 2, 0xFF)).unwrap();
        assert_eq!(image.chroma_format(), Chroma::InterleavedRgba);
        assert_eq!(image.bits_per_pixel(Channel::Interleaved).unwrap(), 32);
    }

    #[test]
    fn sources_without_the_sentinel_drop_to_24_bit() {
        let image = from_rgba(&rgba_fixture(4, 2, 0x80)).unwrap();
        assert_eq!(image.chroma_format(), Chroma::InterleavedRgb);
        assert_eq!(image.bits_per_pixel(Channel::Interleaved).unwrap(), 24);
        let plane = image.plane(Channel::Interleaved).unwrap();
        assert_eq!(&plane.row(0)[..6], &[0, 0x20, 0x30, 1, 0x20, 0x30]);
    }

    #[test]
    fn padded_source_strides_are_honored() {
        let mut padded = rgba_fixture(2, 2, 0xFF);
        let tight = padded.data.clone();
        padded.stride = 12;
        padded.data = vec![0xEE; 12 * 2];
        padded.data[..8].copy_from_slice(&tight[..8]);
        padded.data[12..20].copy_from_slice(&tight[8..16]);

        let image = from_rgba(&padded).unwrap();
        let plane = image.plane(Channel::Interleaved).unwrap();
        assert_eq!(plane.row(0), &tight[..8]);
        assert_eq!(plane.row(1), &tight[8..16]);
    }

    #[test]
    fn short_buffers_are_invalid_pixel_data() {
        let mut broken = rgba_fixture(4, 2, 0xFF);
        broken.data.truncate(8);
        assert!(matches!(
            from_rgba(&broken),
            Err(HeifError::InvalidPixelData(_))
        ));
    }

    #[test]
    fn rgb_maps_only_from_exactly_rgba_buffers() {
        let image = from_rgba(&rgba_fixture(2, 2, 0x00)).unwrap();
        assert_eq!(image.chroma_format(), Chroma::InterleavedRgb);
        match image.to_pixels() {
            Err(HeifError::UnsupportedColorConversion { colorspace, chroma }) => {
                assert_eq!(colorspace, Colorspace::Rgb);
                assert_eq!(chroma, Chroma::InterleavedRgb);
            }
            other => panic!("expected unsupported conversion, got {other:?}"),
        }
    }

    #[test]
    fn rgba_survives_the_generic_round_trip() {
        let source = rgba_fixture(3, 3, 0xFF);
        let image = from_rgba(&source).unwrap();
        let Pixels::Rgba(back) = image.to_pixels().unwrap() else {
            panic!("expected RGBA pixels");
        };
        assert_eq!(back.width, 3);
        assert_eq!(back.stride, 12);
        assert_eq!(back.data, source.data);
    }

    #[test]
    fn planar_420_commits_with_ceiling_chroma_planes() {
        let planar = YCbCrPixels {
            y: vec![0x40; 5 * 3],
            cb: vec![0x80; 3 * 2],
            cr: vec![0x80; 3 * 2],
            y_stride: 5,
            chroma_stride: 3,
            subsampling: Subsampling::Ratio420,
            width: 5,
            height: 3,
        };
        let image = from_ycbcr(&planar).unwrap();
        assert_eq!(image.width(Channel::Y).unwrap(), 5);
        assert_eq!(image.width(Channel::Cb).unwrap(), 3);
        assert_eq!(image.height(Channel::Cr).unwrap(), 2);
    }

    #[test]
    fn only_420_sources_can_be_committed() {
        let planar = YCbCrPixels {
            y: vec![0; 4],
            cb: vec![0; 4],
            cr: vec![0; 4],
            y_stride: 2,
            chroma_stride: 2,
            subsampling: Subsampling::Ratio444,
            width: 2,
            height: 2,
        };
        assert!(matches!(
            from_ycbcr(&planar),
            Err(HeifError::UnsupportedColorConversion { .. })
        ));
    }

    #[test]
    fn gray_round_trips_bit_exact() {
        let gray = GrayPixels {
            data: (0u8..12).collect(),
            stride: 4,
            width: 4,
            height: 3,
        };
        let image = from_gray(&gray).unwrap();
        let Pixels::Gray(back) = image.to_pixels().unwrap() else {
            panic!("expected gray pixels");
        };
        assert_eq!(back.data, gray.data);
        assert_eq!(back.stride, 4);
    }

    #[test]
    fn decoded_planar_shapes_report_their_ratio() {
        let planar = YCbCrPixels {
            y: vec![0x10; 4],
            cb: vec![0x80; 1],
            cr: vec![0x80; 1],
            y_stride: 2,
            chroma_stride: 1,
            subsampling: Subsampling::Ratio420,
            width: 2,
            height: 2,
        };
        let image = from_ycbcr(&planar).unwrap();
        let Pixels::YCbCr(back) = image.to_pixels().unwrap() else {
            panic!("expected planar pixels");
        };
        assert_eq!(back.subsampling, Subsampling::Ratio420);
        assert_eq!(back.width, 2);
        assert!(back.y_stride >= 2);
    }
}
