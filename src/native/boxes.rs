//! Boxed container file layout.
//!
//! Files are a sequence of big-endian length-prefixed boxes. The first box
//! must be a real ISOBMFF `ftyp` box carrying the brand, so the on-disk
//! magic is recognizable to file-type sniffers; the remaining boxes (`pitm`,
//! `item`) are internal to the engine. Unknown boxes are skipped.

use crate::error::{ErrorCode, ErrorSubcode, RawError};
use crate::image::{Channel, Chroma, Colorspace, CompressionFormat};
use crate::native::object::{
    Container, Item, MetadataBlock, PlaneBuf, SECURITY_LIMIT, chroma_matches,
};

/// Brands the engine accepts as a main brand.
pub(crate) const SUPPORTED_BRANDS: [[u8; 4]; 8] = [
    *b"heic", *b"heim", *b"heis", *b"heix", *b"hevc", *b"hevm", *b"hevs", *b"mif1",
];

/// Outcome of sniffing a byte prefix for the container magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiletypeResult {
    /// Definitely not a container file.
    No,
    /// Container file with a brand the engine can read.
    Supported,
    /// Container file, but the brand is not in the supported set.
    Unsupported,
    /// Too little data to decide.
    Maybe,
}

/// Checks whether `data` starts like a container file. Needs at least the
/// first 12 bytes to give a definite answer.
pub(crate) fn check_filetype(data: &[u8]) -> FiletypeResult {
    if data.len() < 8 {
        return FiletypeResult::Maybe;
    }
    if &data[4..8] != b"ftyp" {
        return FiletypeResult::No;
    }
    if data.len() < 12 {
        return FiletypeResult::Maybe;
    }
    let mut brand = [0u8; 4];
    brand.copy_from_slice(&data[8..12]);
    if SUPPORTED_BRANDS.contains(&brand) {
        FiletypeResult::Supported
    } else {
        FiletypeResult::Unsupported
    }
}

const END_OF_DATA: RawError = RawError::new(
    ErrorCode::InvalidInput,
    ErrorSubcode::EndOfData,
    "End of input data",
);

const INVALID_BOX_SIZE: RawError = RawError::new(
    ErrorCode::InvalidInput,
    ErrorSubcode::InvalidBoxSize,
    "Invalid box size",
);

const NO_FTYP: RawError = RawError::new(
    ErrorCode::InvalidInput,
    ErrorSubcode::NoFtypBox,
    "No 'ftyp' box",
);

const UNSUPPORTED_BRAND: RawError = RawError::new(
    ErrorCode::UnsupportedFiletype,
    ErrorSubcode::Unspecified,
    "Unsupported file type",
);

const INVALID_FIELD: RawError = RawError::new(
    ErrorCode::InvalidInput,
    ErrorSubcode::Unspecified,
    "Invalid field in item box",
);

const INVALID_IMAGE_SIZE: RawError = RawError::new(
    ErrorCode::InvalidInput,
    ErrorSubcode::InvalidImageSize,
    "Invalid image size",
);

const NO_ITEM_DATA: RawError = RawError::new(
    ErrorCode::InvalidInput,
    ErrorSubcode::NoItemData,
    "Item without pixel data",
);

/// Cursor over the raw file bytes.
struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        ByteReader { data, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn read_u8(&mut self) -> Result<u8, RawError> {
        if self.remaining() < 1 {
            return Err(END_OF_DATA);
        }
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    fn read_u16(&mut self) -> Result<u16, RawError> {
        let hi = self.read_u8()? as u16;
        let lo = self.read_u8()? as u16;
        Ok(hi << 8 | lo)
    }

    fn read_u32(&mut self) -> Result<u32, RawError> {
        let hi = self.read_u16()? as u32;
        let lo = self.read_u16()? as u32;
        Ok(hi << 16 | lo)
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], RawError> {
        if self.remaining() < count {
            return Err(END_OF_DATA);
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn read_fourcc(&mut self) -> Result<[u8; 4], RawError> {
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(self.read_bytes(4)?);
        Ok(fourcc)
    }
}

/// Appends big-endian primitives and length-patched boxes to a buffer.
struct BoxWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl BoxWriter<'_> {
    fn write_u8(&mut self, value: u8) {
        self.out.push(value);
    }

    fn write_u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn write_u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Starts a box with a placeholder size; returns the patch offset.
    fn begin_box(&mut self, kind: &[u8; 4]) -> usize {
        let start = self.out.len();
        self.write_u32(0);
        self.write_bytes(kind);
        start
    }

    fn end_box(&mut self, start: usize) {
        let size = (self.out.len() - start) as u32;
        self.out[start..start + 4].copy_from_slice(&size.to_be_bytes());
    }
}

/// Serializes a container into the boxed file layout.
pub(crate) fn write_container(container: &Container, out: &mut Vec<u8>) {
    let mut w = BoxWriter { out };

    let ftyp = w.begin_box(b"ftyp");
    w.write_bytes(&container.brand);
    w.write_u32(0);
    w.write_bytes(b"mif1");
    w.write_bytes(b"heic");
    w.end_box(ftyp);

    if let Some(primary) = container.primary_id {
        let pitm = w.begin_box(b"pitm");
        w.write_u32(primary);
        w.end_box(pitm);
    }

    for item in &container.items {
        let start = w.begin_box(b"item");
        write_item(&mut w, item);
        w.end_box(start);
    }
}

fn write_item(w: &mut BoxWriter<'_>, item: &Item) {
    w.write_u32(item.id);
    w.write_u32(item.width);
    w.write_u32(item.height);
    w.write_u8(item.colorspace.into());
    w.write_u8(item.chroma.into());
    w.write_u8(item.compression.into());
    w.write_u8(item.lossless as u8);
    w.write_u8(item.quality);

    w.write_u16(item.planes.len() as u16);
    for plane in &item.planes {
        w.write_u8(plane.channel.into());
        w.write_u32(plane.width);
        w.write_u32(plane.height);
        w.write_u8(plane.bit_depth);
        for y in 0..plane.height {
            w.write_bytes(plane.row(y));
        }
    }

    w.write_u16(item.thumbnails.len() as u16);
    for id in &item.thumbnails {
        w.write_u32(*id);
    }
    w.write_u16(item.depth_images.len() as u16);
    for id in &item.depth_images {
        w.write_u32(*id);
    }

    w.write_u16(item.metadata.len() as u16);
    for block in &item.metadata {
        w.write_u32(block.id);
        w.write_u8(block.block_type.len() as u8);
        w.write_bytes(block.block_type.as_bytes());
        w.write_u32(block.data.len() as u32);
        w.write_bytes(&block.data);
    }
}

/// Parses a container file. `max_dim` bounds every image dimension.
pub(crate) fn read_container(data: &[u8], max_dim: u32) -> Result<Container, RawError> {
    let mut r = ByteReader::new(data);

    let (size, kind) = read_box_header(&mut r)?;
    if &kind != b"ftyp" {
        return Err(NO_FTYP);
    }
    let mut ftyp = ByteReader::new(r.read_bytes(size)?);
    let brand = ftyp.read_fourcc()?;
    if !SUPPORTED_BRANDS.contains(&brand) {
        return Err(UNSUPPORTED_BRAND);
    }

    let mut container = Container {
        brand,
        max_image_dim: max_dim,
        ..Container::default()
    };

    while r.remaining() > 0 {
        let (size, kind) = read_box_header(&mut r)?;
        let payload = r.read_bytes(size)?;
        match &kind {
            b"pitm" => {
                let mut pitm = ByteReader::new(payload);
                container.primary_id = Some(pitm.read_u32()?);
            }
            b"item" => {
                let item = read_item(payload, max_dim)?;
                container.next_item_id = container.next_item_id.max(item.id.saturating_add(1));
                container.items.push(item);
            }
            _ => {}
        }
    }

    Ok(container)
}

/// Reads one box header, returning the payload size and type.
fn read_box_header(r: &mut ByteReader<'_>) -> Result<(usize, [u8; 4]), RawError> {
    let size = r.read_u32()? as usize;
    let kind = r.read_fourcc()?;
    if size < 8 || size - 8 > r.remaining() {
        return Err(INVALID_BOX_SIZE);
    }
    Ok((size - 8, kind))
}

fn read_item(payload: &[u8], max_dim: u32) -> Result<Item, RawError> {
    let mut r = ByteReader::new(payload);

    let id = r.read_u32()?;
    let width = r.read_u32()?;
    let height = r.read_u32()?;
    if width == 0 || height == 0 {
        return Err(INVALID_IMAGE_SIZE);
    }
    if width > max_dim || height > max_dim {
        return Err(SECURITY_LIMIT);
    }
    let colorspace = Colorspace::try_from(r.read_u8()?).map_err(|_| INVALID_FIELD)?;
    let chroma = Chroma::try_from(r.read_u8()?).map_err(|_| INVALID_FIELD)?;
    if !chroma_matches(colorspace, chroma) {
        return Err(INVALID_FIELD);
    }
    let compression = CompressionFormat::try_from(r.read_u8()?).map_err(|_| INVALID_FIELD)?;
    let lossless = r.read_u8()? != 0;
    let quality = r.read_u8()?;

    let plane_count = r.read_u16()?;
    if plane_count > 8 {
        return Err(INVALID_FIELD);
    }
    let mut planes = Vec::with_capacity(plane_count as usize);
    for _ in 0..plane_count {
        let channel = Channel::try_from(r.read_u8()?).map_err(|_| INVALID_FIELD)?;
        let plane_width = r.read_u32()?;
        let plane_height = r.read_u32()?;
        if plane_width == 0 || plane_height == 0 || plane_width > max_dim || plane_height > max_dim
        {
            return Err(INVALID_IMAGE_SIZE);
        }
        let depth = r.read_u8()?;
        if depth != 8 && depth != 24 && depth != 32 {
            return Err(INVALID_FIELD);
        }
        let mut plane = PlaneBuf::new(channel, plane_width, plane_height, depth);
        let row = plane.row_bytes();
        for y in 0..plane_height as usize {
            let src = r.read_bytes(row)?;
            plane.data[y * plane.stride..y * plane.stride + row].copy_from_slice(src);
        }
        planes.push(plane);
    }
    if planes.is_empty() {
        return Err(NO_ITEM_DATA);
    }

    let thumbnails = read_id_list(&mut r)?;
    let depth_images = read_id_list(&mut r)?;

    let meta_count = r.read_u16()?;
    let mut metadata = Vec::with_capacity(meta_count.min(64) as usize);
    for _ in 0..meta_count {
        let block_id = r.read_u32()?;
        let type_len = r.read_u8()? as usize;
        let block_type = String::from_utf8_lossy(r.read_bytes(type_len)?).into_owned();
        let data_len = r.read_u32()? as usize;
        let data = r.read_bytes(data_len)?.to_vec();
        metadata.push(MetadataBlock {
            id: block_id,
            block_type,
            data,
        });
    }

    Ok(Item {
        id,
        width,
        height,
        colorspace,
        chroma,
        compression,
        quality,
        lossless,
        planes,
        thumbnails,
        depth_images,
        metadata,
    })
}

fn read_id_list(r: &mut ByteReader<'_>) -> Result<Vec<u32>, RawError> {
    let count = r.read_u16()?;
    let mut ids = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        ids.push(r.read_u32()?);
    }
    Ok(ids)
}
