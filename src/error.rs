use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::ItemId;
use crate::image::{Channel, Chroma, Colorspace, CompressionFormat};
use crate::metadata::plist::PlistError;

/// Primary status code of a native status triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InputDoesNotExist = 1,
    InvalidInput = 2,
    UnsupportedFiletype = 3,
    UnsupportedFeature = 4,
    UsageError = 5,
    MemoryAllocationError = 6,
    DecoderPluginError = 7,
    EncoderPluginError = 8,
    EncodingError = 9,
}

/// Detailed status subcode; value ranges group by the primary code family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ErrorSubcode {
    Unspecified = 0,

    // InvalidInput details
    EndOfData = 100,
    InvalidBoxSize = 101,
    NoFtypBox = 102,
    NoMetaBox = 103,
    NoItemData = 104,
    InvalidGridData = 105,
    NoOrInvalidPrimaryItem = 106,
    InvalidImageSize = 107,

    // MemoryAllocationError details
    SecurityLimitExceeded = 1000,

    // UsageError details
    NonexistingItemReferenced = 2000,
    NullPointerArgument = 2001,
    NonexistingImageChannelReferenced = 2002,
    InvalidParameterValue = 2003,

    // UnsupportedFeature details
    UnsupportedCodec = 3000,
    UnsupportedImageType = 3001,
    UnsupportedColorConversion = 3002,
    UnsupportedBitDepth = 3003,

    // EncodingError details
    CannotWriteOutputData = 5000,
    EncoderInitialization = 5001,
}

/// Status triple returned by every fallible native entry point.
///
/// Messages are static strings owned by the native layer; the binding copies
/// them when it turns a failing triple into a [`NativeError`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawError {
    pub code: ErrorCode,
    pub subcode: ErrorSubcode,
    pub message: &'static str,
}

impl RawError {
    pub const OK: RawError = RawError {
        code: ErrorCode::Ok,
        subcode: ErrorSubcode::Unspecified,
        message: "Success",
    };

    pub(crate) const fn new(code: ErrorCode, subcode: ErrorSubcode, message: &'static str) -> Self {
        RawError { code, subcode, message }
    }
}

/// Failure reported by the native layer with all three status fields intact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct NativeError {
    pub code: ErrorCode,
    pub subcode: ErrorSubcode,
    pub message: String,
}

impl NativeError {
    /// The native layer's human-readable description of the failure.
    pub fn description(&self) -> &str {
        &self.message
    }
}

/// Maps a native status triple onto `Result`, copying the message on failure.
pub(crate) fn check(raw: RawError) -> Result<(), NativeError> {
    if raw.code == ErrorCode::Ok {
        Ok(())
    } else {
        Err(NativeError {
            code: raw.code,
            subcode: raw.subcode,
            message: raw.message.to_string(),
        })
    }
}

#[derive(Error, Debug)]
pub enum HeifError {
    #[error("could not allocate native {0}")]
    Allocation(&'static str),
    #[error("no data to read")]
    EmptyInput,
    #[error("session already holds a loaded container")]
    AlreadyLoaded,
    #[error("container has no primary image")]
    NoPrimaryImage,
    #[error("no item with ID {0}")]
    UnknownItem(ItemId),
    #[error("no {0:?} channel in image")]
    NoSuchChannel(Channel),
    #[error("no encoder for compression format {0:?}")]
    NoEncoder(CompressionFormat),
    #[error("unsupported color conversion to {colorspace:?}/{chroma:?}")]
    UnsupportedColorConversion { colorspace: Colorspace, chroma: Chroma },
    #[error("invalid pixel data: {0}")]
    InvalidPixelData(&'static str),
    #[error("selector matched no string value: {0}")]
    SelectorNotFound(String),
    #[error("invalid base64 in metadata: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed property list: {0}")]
    PropertyList(#[from] PlistError),
    #[error("malformed time table entry")]
    MalformedTimeEntry,
    #[error("malformed metadata XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Native(#[from] NativeError),
}

pub type Result<T, E = HeifError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_triple_maps_to_ok() {
        assert!(check(RawError::OK).is_ok());
    }

    #[test]
    fn failing_triple_preserves_all_fields() {
        let raw = RawError::new(
            ErrorCode::InvalidInput,
            ErrorSubcode::NoFtypBox,
            "No 'ftyp' box",
        );
        let err = check(raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(err.subcode, ErrorSubcode::NoFtypBox);
        assert_eq!(err.message, "No 'ftyp' box");
        assert_eq!(err.description(), "No 'ftyp' box");
        assert_eq!(err.to_string(), "No 'ftyp' box");
    }

    #[test]
    fn codes_round_trip_through_values() {
        let value: i32 = ErrorCode::UnsupportedFiletype.into();
        assert_eq!(value, 3);
        assert_eq!(ErrorCode::try_from(3), Ok(ErrorCode::UnsupportedFiletype));
        assert!(ErrorCode::try_from(42).is_err());

        let value: i32 = ErrorSubcode::SecurityLimitExceeded.into();
        assert_eq!(value, 1000);
        assert_eq!(
            ErrorSubcode::try_from(2001),
            Ok(ErrorSubcode::NullPointerArgument)
        );
    }
}
