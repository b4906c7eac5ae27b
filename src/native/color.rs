//! Colorspace and chroma conversions backing decode requests.
//!
//! Conversions run through a full-resolution RGBA canvas using full-range
//! BT.601 integer math. Chroma downsampling box-averages each block, and
//! upsampling replicates the nearest sample.

use crate::error::{ErrorCode, ErrorSubcode, RawError};
use crate::image::{Channel, Chroma, Colorspace};
use crate::native::object::{NativeImage, PlaneBuf};

const UNSUPPORTED_CONVERSION: RawError = RawError::new(
    ErrorCode::UnsupportedFeature,
    ErrorSubcode::UnsupportedColorConversion,
    "Unsupported color conversion",
);

const UNSUPPORTED_DEPTH: RawError = RawError::new(
    ErrorCode::UnsupportedFeature,
    ErrorSubcode::UnsupportedBitDepth,
    "Unsupported bit depth",
);

const MISSING_PLANE: RawError = RawError::new(
    ErrorCode::InvalidInput,
    ErrorSubcode::Unspecified,
    "Image is missing a channel plane",
);

const INVALID_SCALE: RawError = RawError::new(
    ErrorCode::UsageError,
    ErrorSubcode::InvalidParameterValue,
    "Invalid scaling size",
);

/// Full-resolution RGBA working canvas.
struct Canvas {
    width: u32,
    height: u32,
    has_alpha: bool,
    px: Vec<[u8; 4]>,
}

impl Canvas {
    fn at(&self, x: u32, y: u32) -> [u8; 4] {
        self.px[y as usize * self.width as usize + x as usize]
    }
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = (77 * r + 150 * g + 29 * b + 128) >> 8;
    let cb = 128 + ((-43 * r - 85 * g + 128 * b + 128) >> 8);
    let cr = 128 + ((128 * r - 107 * g - 21 * b + 128) >> 8);
    (clamp_u8(y), clamp_u8(cb), clamp_u8(cr))
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
    let y = (y as i32) << 8;
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;
    let r = (y + 359 * cr + 128) >> 8;
    let g = (y - 88 * cb - 183 * cr + 128) >> 8;
    let b = (y + 454 * cb + 128) >> 8;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

fn chroma_factors(chroma: Chroma) -> (u32, u32) {
    match chroma {
        Chroma::C420 => (2, 2),
        Chroma::C422 => (2, 1),
        _ => (1, 1),
    }
}

/// Dimensions of one channel's plane under the given image geometry.
pub(crate) fn plane_dims(chroma: Chroma, channel: Channel, width: u32, height: u32) -> (u32, u32) {
    let (fx, fy) = chroma_factors(chroma);
    match channel {
        Channel::Cb | Channel::Cr => (width.div_ceil(fx), height.div_ceil(fy)),
        _ => (width, height),
    }
}

fn sample(plane: &PlaneBuf, x: u32, y: u32) -> u8 {
    let x = x.min(plane.width.saturating_sub(1)) as usize;
    let y = y.min(plane.height.saturating_sub(1)) as usize;
    plane.data[y * plane.stride + x]
}

fn to_canvas(image: &NativeImage) -> Result<Canvas, RawError> {
    let (width, height) = (image.width, image.height);
    let mut px = vec![[0u8; 4]; width as usize * height as usize];
    let alpha_plane = image.plane(Channel::Alpha);
    let mut has_alpha = alpha_plane.is_some();

    match image.colorspace {
        Colorspace::YCbCr => {
            let yp = image.plane(Channel::Y).ok_or(MISSING_PLANE)?;
            let cbp = image.plane(Channel::Cb).ok_or(MISSING_PLANE)?;
            let crp = image.plane(Channel::Cr).ok_or(MISSING_PLANE)?;
            let (fx, fy) = chroma_factors(image.chroma);
            for y in 0..height {
                for x in 0..width {
                    let luma = sample(yp, x, y);
                    let cb = sample(cbp, x / fx, y / fy);
                    let cr = sample(crp, x / fx, y / fy);
                    let (r, g, b) = ycbcr_to_rgb(luma, cb, cr);
                    px[(y * width + x) as usize] = [r, g, b, 255];
                }
            }
        }
        Colorspace::Rgb => match image.chroma {
            Chroma::C444 => {
                let rp = image.plane(Channel::R).ok_or(MISSING_PLANE)?;
                let gp = image.plane(Channel::G).ok_or(MISSING_PLANE)?;
                let bp = image.plane(Channel::B).ok_or(MISSING_PLANE)?;
                for y in 0..height {
                    for x in 0..width {
                        px[(y * width + x) as usize] =
                            [sample(rp, x, y), sample(gp, x, y), sample(bp, x, y), 255];
                    }
                }
            }
            Chroma::InterleavedRgb | Chroma::InterleavedRgba => {
                let plane = image.plane(Channel::Interleaved).ok_or(MISSING_PLANE)?;
                let bpp = plane.bit_depth as usize / 8;
                has_alpha = has_alpha || bpp == 4;
                for y in 0..height {
                    let row = &plane.data[y as usize * plane.stride..];
                    for x in 0..width {
                        let offset = x as usize * bpp;
                        let a = if bpp == 4 { row[offset + 3] } else { 255 };
                        px[(y * width + x) as usize] =
                            [row[offset], row[offset + 1], row[offset + 2], a];
                    }
                }
            }
            _ => return Err(UNSUPPORTED_DEPTH),
        },
        Colorspace::Monochrome => {
            let yp = image.plane(Channel::Y).ok_or(MISSING_PLANE)?;
            for y in 0..height {
                for x in 0..width {
                    let v = sample(yp, x, y);
                    px[(y * width + x) as usize] = [v, v, v, 255];
                }
            }
        }
        Colorspace::Undefined => return Err(UNSUPPORTED_CONVERSION),
    }

    if let Some(alpha) = alpha_plane {
        for y in 0..height {
            for x in 0..width {
                px[(y * width + x) as usize][3] = sample(alpha, x, y);
            }
        }
    }

    Ok(Canvas {
        width,
        height,
        has_alpha,
        px,
    })
}

fn from_canvas(canvas: &Canvas, colorspace: Colorspace, chroma: Chroma) -> Result<NativeImage, RawError> {
    let (width, height) = (canvas.width, canvas.height);
    let mut image = NativeImage::new(width, height, colorspace, chroma)
        .map_err(|_| UNSUPPORTED_CONVERSION)?;

    match colorspace {
        Colorspace::YCbCr => {
            let n = width as usize * height as usize;
            let mut luma = vec![0u8; n];
            let mut cb_full = vec![0u8; n];
            let mut cr_full = vec![0u8; n];
            for (i, p) in canvas.px.iter().enumerate() {
                let (y, cb, cr) = rgb_to_ycbcr(p[0], p[1], p[2]);
                luma[i] = y;
                cb_full[i] = cb;
                cr_full[i] = cr;
            }
            image.planes.push(plane_from_full(Channel::Y, width, height, &luma, width));
            let (cw, ch) = plane_dims(chroma, Channel::Cb, width, height);
            let (fx, fy) = chroma_factors(chroma);
            image
                .planes
                .push(box_average(Channel::Cb, &cb_full, width, height, cw, ch, fx, fy));
            image
                .planes
                .push(box_average(Channel::Cr, &cr_full, width, height, cw, ch, fx, fy));
            if canvas.has_alpha {
                image.planes.push(alpha_plane_of(canvas));
            }
        }
        Colorspace::Rgb => match chroma {
            Chroma::C444 => {
                for (channel, index) in [(Channel::R, 0), (Channel::G, 1), (Channel::B, 2)] {
                    let values: Vec<u8> = canvas.px.iter().map(|p| p[index]).collect();
                    image
                        .planes
                        .push(plane_from_full(channel, width, height, &values, width));
                }
                if canvas.has_alpha {
                    image.planes.push(alpha_plane_of(canvas));
                }
            }
            Chroma::InterleavedRgb | Chroma::InterleavedRgba => {
                let bpp = if chroma == Chroma::InterleavedRgba { 4 } else { 3 };
                let mut plane =
                    PlaneBuf::new(Channel::Interleaved, width, height, (bpp * 8) as u8);
                for y in 0..height {
                    for x in 0..width {
                        let p = canvas.at(x, y);
                        let offset = y as usize * plane.stride + x as usize * bpp;
                        plane.data[offset..offset + 3].copy_from_slice(&p[..3]);
                        if bpp == 4 {
                            plane.data[offset + 3] = p[3];
                        }
                    }
                }
                image.planes.push(plane);
            }
            _ => return Err(UNSUPPORTED_DEPTH),
        },
        Colorspace::Monochrome => {
            let values: Vec<u8> = canvas
                .px
                .iter()
                .map(|p| rgb_to_ycbcr(p[0], p[1], p[2]).0)
                .collect();
            image
                .planes
                .push(plane_from_full(Channel::Y, width, height, &values, width));
        }
        Colorspace::Undefined => return Err(UNSUPPORTED_CONVERSION),
    }

    Ok(image)
}

fn plane_from_full(
    channel: Channel,
    width: u32,
    height: u32,
    values: &[u8],
    values_stride: u32,
) -> PlaneBuf {
    let mut plane = PlaneBuf::new(channel, width, height, 8);
    for y in 0..height as usize {
        let src = &values[y * values_stride as usize..][..width as usize];
        plane.data[y * plane.stride..y * plane.stride + width as usize].copy_from_slice(src);
    }
    plane
}

fn alpha_plane_of(canvas: &Canvas) -> PlaneBuf {
    let values: Vec<u8> = canvas.px.iter().map(|p| p[3]).collect();
    plane_from_full(Channel::Alpha, canvas.width, canvas.height, &values, canvas.width)
}

#[allow(clippy::too_many_arguments)]
fn box_average(
    channel: Channel,
    full: &[u8],
    width: u32,
    height: u32,
    target_w: u32,
    target_h: u32,
    fx: u32,
    fy: u32,
) -> PlaneBuf {
    let mut plane = PlaneBuf::new(channel, target_w, target_h, 8);
    for cy in 0..target_h {
        for cx in 0..target_w {
            let x0 = cx * fx;
            let y0 = cy * fy;
            let x1 = (x0 + fx).min(width);
            let y1 = (y0 + fy).min(height);
            let mut sum = 0u32;
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += full[(y * width + x) as usize] as u32;
                    count += 1;
                }
            }
            plane.data[cy as usize * plane.stride + cx as usize] =
                ((sum + count / 2) / count) as u8;
        }
    }
    plane
}

/// Converts an image into the requested representation.
pub(crate) fn convert_image(
    image: &NativeImage,
    colorspace: Colorspace,
    chroma: Chroma,
) -> Result<NativeImage, RawError> {
    if colorspace == image.colorspace && chroma == image.chroma {
        return Ok(image.clone());
    }
    let canvas = to_canvas(image)?;
    from_canvas(&canvas, colorspace, chroma)
}

/// Drops the alpha channel, repacking interleaved RGBA as RGB.
pub(crate) fn strip_alpha(image: &NativeImage) -> Result<NativeImage, RawError> {
    match image.chroma {
        Chroma::InterleavedRgba => convert_image(image, Colorspace::Rgb, Chroma::InterleavedRgb),
        Chroma::InterleavedRrggbbaaBe | Chroma::InterleavedRrggbbaaLe => Err(UNSUPPORTED_DEPTH),
        _ => {
            let mut stripped = image.clone();
            stripped.planes.retain(|p| p.channel != Channel::Alpha);
            Ok(stripped)
        }
    }
}

/// Nearest-neighbor scaling into a new image of the same representation.
pub(crate) fn scale_nearest(
    image: &NativeImage,
    width: u32,
    height: u32,
) -> Result<NativeImage, RawError> {
    if width == 0 || height == 0 {
        return Err(INVALID_SCALE);
    }
    let mut scaled = NativeImage {
        colorspace: image.colorspace,
        chroma: image.chroma,
        width,
        height,
        planes: Vec::new(),
    };
    for plane in &image.planes {
        let (tw, th) = plane_dims(image.chroma, plane.channel, width, height);
        scaled.planes.push(scale_plane(plane, tw, th));
    }
    Ok(scaled)
}

fn scale_plane(plane: &PlaneBuf, target_w: u32, target_h: u32) -> PlaneBuf {
    let mut out = PlaneBuf::new(plane.channel, target_w, target_h, plane.bit_depth);
    let bpp = plane.bit_depth as usize / 8;
    for y in 0..target_h {
        let sy = (y as u64 * plane.height as u64 / target_h as u64) as usize;
        for x in 0..target_w {
            let sx = (x as u64 * plane.width as u64 / target_w as u64) as usize;
            let src = sy * plane.stride + sx * bpp;
            let dst = y as usize * out.stride + x as usize * bpp;
            out.data[dst..dst + bpp].copy_from_slice(&plane.data[src..src + bpp]);
        }
    }
    out
}
