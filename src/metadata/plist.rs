//! Binary property-list codec.
//!
//! Reads and writes the `bplist00` format carried inside wallpaper
//! descriptors: a magic header, a pool of marker-tagged objects, an offset
//! table, and a 32-byte trailer describing the pool. Only the object kinds
//! that occur in these descriptors are supported; dates and UIDs are not.

use std::collections::BTreeMap;

use thiserror::Error;

const MAGIC: &[u8; 8] = b"bplist00";
const TRAILER_LEN: usize = 32;
const MAX_DEPTH: usize = 32;

/// A decoded property-list value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Data(Vec<u8>),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Floating-point reals only; integers do not coerce.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_dict(self) -> Option<BTreeMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlistError {
    #[error("too short to be a property list")]
    TooShort,
    #[error("property list magic not recognized")]
    BadMagic,
    #[error("truncated property list object")]
    Truncated,
    #[error("invalid property list trailer")]
    BadTrailer,
    #[error("invalid object reference")]
    BadReference,
    #[error("invalid object length")]
    InvalidLength,
    #[error("unsupported property list marker 0x{0:02x}")]
    UnsupportedMarker(u8),
    #[error("dictionary key is not a string")]
    NonStringKey,
    #[error("property list nesting too deep")]
    TooDeep,
    #[error("root object is not a dictionary")]
    UnexpectedRoot,
}

/// Decodes a binary property list into its root value.
pub fn from_bytes(data: &[u8]) -> Result<Value, PlistError> {
    let decoder = Decoder::new(data)?;
    decoder.object_at(decoder.top, 0)
}

struct Decoder<'a> {
    data: &'a [u8],
    offsets: Vec<usize>,
    ref_size: usize,
    top: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Result<Decoder<'a>, PlistError> {
        if data.len() < MAGIC.len() + TRAILER_LEN + 2 {
            return Err(PlistError::TooShort);
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(PlistError::BadMagic);
        }
        let trailer = &data[data.len() - TRAILER_LEN..];
        let offset_size = trailer[6] as usize;
        let ref_size = trailer[7] as usize;
        let num_objects = be_uint(&trailer[8..16]) as usize;
        let top = be_uint(&trailer[16..24]) as usize;
        let table_offset = be_uint(&trailer[24..32]) as usize;

        if !(1..=8).contains(&offset_size) || !(1..=8).contains(&ref_size) {
            return Err(PlistError::BadTrailer);
        }
        if num_objects == 0 || top >= num_objects {
            return Err(PlistError::BadTrailer);
        }
        let table_end = table_offset
            .checked_add(num_objects.checked_mul(offset_size).ok_or(PlistError::BadTrailer)?)
            .ok_or(PlistError::BadTrailer)?;
        if table_offset < MAGIC.len() || table_end > data.len() - TRAILER_LEN {
            return Err(PlistError::BadTrailer);
        }

        let mut offsets = Vec::with_capacity(num_objects);
        for i in 0..num_objects {
            let start = table_offset + i * offset_size;
            offsets.push(be_uint(&data[start..start + offset_size]) as usize);
        }
        Ok(Decoder {
            data,
            offsets,
            ref_size,
            top,
        })
    }

    fn object_at(&self, index: usize, depth: usize) -> Result<Value, PlistError> {
        if depth > MAX_DEPTH {
            return Err(PlistError::TooDeep);
        }
        let offset = *self.offsets.get(index).ok_or(PlistError::BadReference)?;
        let marker = *self.data.get(offset).ok_or(PlistError::Truncated)?;
        match marker >> 4 {
            0x0 => match marker {
                0x00 => Ok(Value::Null),
                0x08 => Ok(Value::Bool(false)),
                0x09 => Ok(Value::Bool(true)),
                _ => Err(PlistError::UnsupportedMarker(marker)),
            },
            0x1 => {
                let size = 1usize << (marker & 0x0F);
                if size > 8 {
                    return Err(PlistError::InvalidLength);
                }
                let bytes = self.bytes_at(offset + 1, size)?;
                // 1, 2 and 4 byte integers are unsigned; the 8 byte form is
                // two's complement, which the plain cast reproduces.
                Ok(Value::Int(be_uint(bytes) as i64))
            }
            0x2 => {
                let size = 1usize << (marker & 0x0F);
                let bytes = self.bytes_at(offset + 1, size)?;
                match size {
                    4 => {
                        let mut raw = [0u8; 4];
                        raw.copy_from_slice(bytes);
                        Ok(Value::Float(f32::from_be_bytes(raw) as f64))
                    }
                    8 => {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(bytes);
                        Ok(Value::Float(f64::from_be_bytes(raw)))
                    }
                    _ => Err(PlistError::UnsupportedMarker(marker)),
                }
            }
            0x4 => {
                let (count, start) = self.count_and_start(offset, marker)?;
                Ok(Value::Data(self.bytes_at(start, count)?.to_vec()))
            }
            0x5 => {
                let (count, start) = self.count_and_start(offset, marker)?;
                let bytes = self.bytes_at(start, count)?;
                Ok(Value::String(
                    String::from_utf8_lossy(bytes).into_owned(),
                ))
            }
            0x6 => {
                let (count, start) = self.count_and_start(offset, marker)?;
                let byte_len = count.checked_mul(2).ok_or(PlistError::InvalidLength)?;
                let bytes = self.bytes_at(start, byte_len)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units)
                    .map(Value::String)
                    .map_err(|_| PlistError::InvalidLength)
            }
            0xA => {
                let (count, start) = self.count_and_start(offset, marker)?;
                let mut items = Vec::with_capacity(count.min(self.offsets.len()));
                for i in 0..count {
                    let child = self.ref_at(start + i * self.ref_size)?;
                    items.push(self.object_at(child, depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            0xD => {
                let (count, start) = self.count_and_start(offset, marker)?;
                let values_start = count
                    .checked_mul(self.ref_size)
                    .and_then(|len| start.checked_add(len))
                    .ok_or(PlistError::InvalidLength)?;
                let mut map = BTreeMap::new();
                for i in 0..count {
                    let key_ref = self.ref_at(start + i * self.ref_size)?;
                    let value_ref = self.ref_at(values_start + i * self.ref_size)?;
                    let key = match self.object_at(key_ref, depth + 1)? {
                        Value::String(s) => s,
                        _ => return Err(PlistError::NonStringKey),
                    };
                    map.insert(key, self.object_at(value_ref, depth + 1)?);
                }
                Ok(Value::Dict(map))
            }
            _ => Err(PlistError::UnsupportedMarker(marker)),
        }
    }

    /// Resolves the element count of a variable-length object. A low nibble
    /// of 0xF means the real count follows as an inline integer object.
    fn count_and_start(&self, offset: usize, marker: u8) -> Result<(usize, usize), PlistError> {
        let info = (marker & 0x0F) as usize;
        if info != 0x0F {
            return Ok((info, offset + 1));
        }
        let int_marker = *self.data.get(offset + 1).ok_or(PlistError::Truncated)?;
        if int_marker >> 4 != 0x1 {
            return Err(PlistError::InvalidLength);
        }
        let size = 1usize << (int_marker & 0x0F);
        if size > 8 {
            return Err(PlistError::InvalidLength);
        }
        let bytes = self.bytes_at(offset + 2, size)?;
        Ok((be_uint(bytes) as usize, offset + 2 + size))
    }

    fn bytes_at(&self, start: usize, len: usize) -> Result<&'a [u8], PlistError> {
        let end = start.checked_add(len).ok_or(PlistError::Truncated)?;
        self.data.get(start..end).ok_or(PlistError::Truncated)
    }

    fn ref_at(&self, offset: usize) -> Result<usize, PlistError> {
        let bytes = self.bytes_at(offset, self.ref_size)?;
        Ok(be_uint(bytes) as usize)
    }
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| acc << 8 | b as u64)
}

/// Serializes a value as a binary property list.
pub fn to_bytes(value: &Value) -> Vec<u8> {
    let mut pool = Vec::new();
    flatten(value, &mut pool);

    let ref_size = byte_width(pool.len() as u64);
    let mut body = Vec::from(*MAGIC);
    let mut offsets = Vec::with_capacity(pool.len());
    for object in &pool {
        offsets.push(body.len() as u64);
        encode_object(object, ref_size, &mut body);
    }

    let table_offset = body.len() as u64;
    let offset_size = byte_width(table_offset);
    for offset in &offsets {
        push_be_uint(&mut body, *offset, offset_size);
    }

    // 32-byte trailer: 6 pad bytes, sizes, object count, top ref, table
    // offset.
    body.extend_from_slice(&[0u8; 6]);
    body.push(offset_size as u8);
    body.push(ref_size as u8);
    body.extend_from_slice(&(pool.len() as u64).to_be_bytes());
    body.extend_from_slice(&0u64.to_be_bytes());
    body.extend_from_slice(&table_offset.to_be_bytes());
    body
}

enum Flat {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Data(Vec<u8>),
    Array(Vec<usize>),
    Dict(Vec<(usize, usize)>),
}

fn flatten(value: &Value, pool: &mut Vec<Flat>) -> usize {
    let slot = pool.len();
    match value {
        Value::Null => pool.push(Flat::Null),
        Value::Bool(b) => pool.push(Flat::Bool(*b)),
        Value::Int(n) => pool.push(Flat::Int(*n)),
        Value::Float(f) => pool.push(Flat::Float(*f)),
        Value::String(s) => pool.push(Flat::Str(s.clone())),
        Value::Data(d) => pool.push(Flat::Data(d.clone())),
        Value::Array(items) => {
            pool.push(Flat::Array(Vec::new()));
            let refs: Vec<usize> = items.iter().map(|item| flatten(item, pool)).collect();
            pool[slot] = Flat::Array(refs);
        }
        Value::Dict(map) => {
            pool.push(Flat::Dict(Vec::new()));
            let mut pairs = Vec::with_capacity(map.len());
            for (key, item) in map {
                let key_slot = pool.len();
                pool.push(Flat::Str(key.clone()));
                pairs.push((key_slot, flatten(item, pool)));
            }
            pool[slot] = Flat::Dict(pairs);
        }
    }
    slot
}

fn encode_object(object: &Flat, ref_size: usize, out: &mut Vec<u8>) {
    match object {
        Flat::Null => out.push(0x00),
        Flat::Bool(false) => out.push(0x08),
        Flat::Bool(true) => out.push(0x09),
        Flat::Int(n) => push_int_object(out, *n),
        Flat::Float(f) => {
            out.push(0x23);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Flat::Str(s) => {
            if s.is_ascii() {
                push_marker_with_count(out, 0x5, s.len());
                out.extend_from_slice(s.as_bytes());
            } else {
                let units: Vec<u16> = s.encode_utf16().collect();
                push_marker_with_count(out, 0x6, units.len());
                for unit in units {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
        }
        Flat::Data(d) => {
            push_marker_with_count(out, 0x4, d.len());
            out.extend_from_slice(d);
        }
        Flat::Array(refs) => {
            push_marker_with_count(out, 0xA, refs.len());
            for &reference in refs {
                push_be_uint(out, reference as u64, ref_size);
            }
        }
        Flat::Dict(pairs) => {
            push_marker_with_count(out, 0xD, pairs.len());
            for &(key, _) in pairs {
                push_be_uint(out, key as u64, ref_size);
            }
            for &(_, value) in pairs {
                push_be_uint(out, value as u64, ref_size);
            }
        }
    }
}

fn push_int_object(out: &mut Vec<u8>, value: i64) {
    if value < 0 {
        out.push(0x13);
        out.extend_from_slice(&value.to_be_bytes());
    } else if value <= 0xFF {
        out.push(0x10);
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0x11);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= 0xFFFF_FFFF {
        out.push(0x12);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(0x13);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn push_marker_with_count(out: &mut Vec<u8>, kind: u8, count: usize) {
    if count < 0x0F {
        out.push(kind << 4 | count as u8);
    } else {
        out.push(kind << 4 | 0x0F);
        push_int_object(out, count as i64);
    }
}

fn push_be_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}

fn byte_width(max_value: u64) -> usize {
    match max_value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}
