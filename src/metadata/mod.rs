//! Layered metadata decoding.
//!
//! Items carry opaque metadata blocks. Dynamic wallpapers bury their frame
//! schedule several layers deep inside one of them: an XMP packet whose
//! descriptor attribute holds a base64 string wrapping a binary property
//! list. The helpers here peel those layers one stage at a time so each
//! stage stays testable on its own.

pub mod plist;
pub(crate) mod xpath;

use std::collections::BTreeMap;

use base64::Engine;

use crate::MetadataId;
use crate::error::{HeifError, Result, check};
use crate::handle::{ItemHandle, map_unknown_item};
use crate::native;
use plist::Value;

/// Selector reaching the 24-hour wallpaper descriptor attribute.
pub const APPLE_TIMES_SELECTOR: &str =
    "string(//x:xmpmeta/rdf:RDF/rdf:Description/@apple_desktop:h24)";

/// Selector reaching the solar wallpaper descriptor attribute.
pub const APPLE_SOLAR_SELECTOR: &str =
    "string(//x:xmpmeta/rdf:RDF/rdf:Description/@apple_desktop:solar)";

const EXIF_TYPE: &str = "Exif";

/// Wall-clock moment a wallpaper frame becomes active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTime {
    pub hour: u8,
    pub minute: u8,
}

/// Frame activation times indexed by image index. Indices the descriptor
/// never names stay at midnight.
pub type TimeTable = Vec<FrameTime>;

impl ItemHandle {
    /// Number of metadata blocks attached to this item, optionally
    /// restricted to one block type such as `"Exif"`.
    pub fn metadata_count(&self, type_filter: Option<&str>) -> usize {
        unsafe { native::item_metadata_count(self.as_ptr(), type_filter) }.max(0) as usize
    }

    /// IDs of the metadata blocks attached to this item.
    pub fn metadata_block_ids(&self, type_filter: Option<&str>) -> Vec<MetadataId> {
        let count = unsafe { native::item_metadata_count(self.as_ptr(), type_filter) };
        let mut ids = vec![0; count.max(0) as usize];
        let filled = unsafe {
            native::item_metadata_ids(self.as_ptr(), type_filter, ids.as_mut_ptr(), count)
        };
        ids.truncate(filled.max(0) as usize);
        ids
    }

    pub fn exif_count(&self) -> usize {
        self.metadata_count(Some(EXIF_TYPE))
    }

    pub fn exif_block_ids(&self) -> Vec<MetadataId> {
        self.metadata_block_ids(Some(EXIF_TYPE))
    }

    /// Copies one metadata block out of the container.
    pub fn metadata(&self, id: MetadataId) -> Result<Vec<u8>> {
        let size = unsafe { native::item_metadata_size(self.as_ptr(), id) };
        let mut data = vec![0u8; size];
        let status =
            unsafe { native::item_metadata_get(self.as_ptr(), id, data.as_mut_ptr(), data.len()) };
        map_unknown_item(check(status), id)?;
        Ok(data)
    }

    /// Decodes the nested layering of a metadata block down to a
    /// string-keyed map.
    ///
    /// The stages are fixed: strip NUL bytes, parse the packet as XML,
    /// evaluate `selector` expecting a string result, base64-decode that
    /// string, then read the binary property list inside.
    pub fn nested_metadata_map(
        &self,
        id: MetadataId,
        selector: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let raw = self.metadata(id)?;
        // XMP packets are commonly NUL-padded, which the XML parser refuses.
        let cleaned: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();
        let document = xpath::Document::parse(&cleaned)?;
        let encoded = document
            .evaluate_string(selector)
            .ok_or_else(|| HeifError::SelectorNotFound(selector.to_string()))?;
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes())?;
        plist::from_bytes(&decoded)?
            .into_dict()
            .ok_or(HeifError::PropertyList(plist::PlistError::UnexpectedRoot))
    }

    /// Descriptor map of a 24-hour wallpaper.
    pub fn apple_times_map(&self, id: MetadataId) -> Result<BTreeMap<String, Value>> {
        self.nested_metadata_map(id, APPLE_TIMES_SELECTOR)
    }

    /// Descriptor map of a solar-position wallpaper.
    pub fn apple_solar_map(&self, id: MetadataId) -> Result<BTreeMap<String, Value>> {
        self.nested_metadata_map(id, APPLE_SOLAR_SELECTOR)
    }

    /// Builds the frame schedule of a 24-hour wallpaper descriptor.
    ///
    /// The descriptor's `ti` array holds `{i, t}` entries where `i` is an
    /// image index and `t` the fraction of the day the frame activates.
    /// Entries may arrive in any order; a repeated index keeps its last
    /// entry.
    pub fn image_time_table(&self, id: MetadataId) -> Result<TimeTable> {
        let map = self.apple_times_map(id)?;
        let entries = map
            .get("ti")
            .and_then(Value::as_array)
            .ok_or(HeifError::MalformedTimeEntry)?;

        let mut table = vec![FrameTime::default(); entries.len()];
        for entry in entries {
            let fields = entry.as_dict().ok_or(HeifError::MalformedTimeEntry)?;
            let index = fields
                .get("i")
                .and_then(Value::as_int)
                .ok_or(HeifError::MalformedTimeEntry)?;
            let fraction = fields
                .get("t")
                .and_then(Value::as_float)
                .ok_or(HeifError::MalformedTimeEntry)?;
            if index < 0 || index as usize >= table.len() {
                return Err(HeifError::MalformedTimeEntry);
            }
            if !fraction.is_finite() || fraction < 0.0 {
                return Err(HeifError::MalformedTimeEntry);
            }
            let scaled = fraction * 24.0;
            let hour = scaled.floor();
            let minute = ((scaled - hour) * 60.0).floor();
            table[index as usize] = FrameTime {
                hour: hour as u8,
                minute: minute as u8,
            };
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Session;
    use crate::image::{Channel, Chroma, Colorspace, CompressionFormat, Image};

    fn wallpaper_packet(attribute: &str, descriptor: &Value) -> Vec<u8> {
        let payload = base64::engine::general_purpose::STANDARD.encode(plist::to_bytes(descriptor));
        let mut packet = format!(
            r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
      xmlns:apple_desktop="http://ns.apple.com/namespace/1.0/"
      {attribute}="{payload}"/>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#
        )
        .into_bytes();
        // Writers pad packets out with NULs; the decoder must shrug them off.
        packet.extend_from_slice(&[0, 0, 0, 0]);
        packet
    }

    fn times_descriptor(entries: &[(i64, f64)]) -> Value {
        let list = entries
            .iter()
            .map(|&(i, t)| {
                Value::Dict(
                    [
                        ("i".to_string(), Value::Int(i)),
                        ("t".to_string(), Value::Float(t)),
                    ]
                    .into(),
                )
            })
            .collect();
        Value::Dict([("ti".to_string(), Value::Array(list))].into())
    }

    fn handle_with_packet(packet: &[u8]) -> (Session, ItemHandle) {
        let mut image = Image::new(2, 2, Colorspace::Monochrome, Chroma::Monochrome).unwrap();
        let mut plane = image.add_plane(Channel::Y, 2, 2, 8).unwrap();
        plane.set_data(&[10, 20, 30, 40], 2).unwrap();

        let mut session = Session::new().unwrap();
        let encoder = session.new_encoder(CompressionFormat::Hevc).unwrap();
        let handle = session.encode_image(&image, &encoder, None).unwrap();
        session.add_xmp_metadata(&handle, packet).unwrap();
        (session, handle)
    }

    #[test]
    fn time_table_decodes_through_every_layer() {
        let packet = wallpaper_packet(
            "apple_desktop:h24",
            &times_descriptor(&[(0, 0.0), (1, 0.5)]),
        );
        let (_session, handle) = handle_with_packet(&packet);
        let id = handle.metadata_block_ids(None)[0];

        let table = handle.image_time_table(id).unwrap();
        assert_eq!(
            table,
            vec![
                FrameTime { hour: 0, minute: 0 },
                FrameTime { hour: 12, minute: 0 },
            ]
        );
    }

    #[test]
    fn repeated_indices_keep_the_last_entry_and_gaps_stay_at_midnight() {
        let packet = wallpaper_packet(
            "apple_desktop:h24",
            &times_descriptor(&[(2, 0.25), (2, 0.75), (0, 0.5)]),
        );
        let (_session, handle) = handle_with_packet(&packet);
        let id = handle.metadata_block_ids(None)[0];

        let table = handle.image_time_table(id).unwrap();
        assert_eq!(
            table,
            vec![
                FrameTime { hour: 12, minute: 0 },
                FrameTime { hour: 0, minute: 0 },
                FrameTime { hour: 18, minute: 0 },
            ]
        );
    }

    #[test]
    fn fractions_floor_into_hours_and_minutes() {
        let packet = wallpaper_packet(
            "apple_desktop:h24",
            &times_descriptor(&[(0, 0.999), (1, 0.34375)]),
        );
        let (_session, handle) = handle_with_packet(&packet);
        let id = handle.metadata_block_ids(None)[0];

        let table = handle.image_time_table(id).unwrap();
        assert_eq!(table[0], FrameTime { hour: 23, minute: 58 });
        assert_eq!(table[1], FrameTime { hour: 8, minute: 15 });
    }

    #[test]
    fn node_set_selectors_are_not_strings() {
        let packet = wallpaper_packet("apple_desktop:h24", &times_descriptor(&[(0, 0.0)]));
        let (_session, handle) = handle_with_packet(&packet);
        let id = handle.metadata_block_ids(None)[0];

        let selector = "//x:xmpmeta/rdf:RDF/rdf:Description";
        match handle.nested_metadata_map(id, selector) {
            Err(HeifError::SelectorNotFound(s)) => assert_eq!(s, selector),
            other => panic!("expected SelectorNotFound, got {other:?}"),
        }
    }

    #[test]
    fn absent_attributes_fail_at_the_property_list_stage() {
        // The solar attribute is missing, so the selector evaluates to the
        // empty string and the empty payload dies in the plist reader.
        let packet = wallpaper_packet("apple_desktop:h24", &times_descriptor(&[(0, 0.0)]));
        let (_session, handle) = handle_with_packet(&packet);
        let id = handle.metadata_block_ids(None)[0];

        match handle.apple_solar_map(id) {
            Err(HeifError::PropertyList(_)) => {}
            other => panic!("expected a property list error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let cases = [
            // No "ti" key at all.
            Value::Dict([("ap".to_string(), Value::Int(1))].into()),
            // Fraction stored as an integer.
            Value::Dict(
                [(
                    "ti".to_string(),
                    Value::Array(vec![Value::Dict(
                        [
                            ("i".to_string(), Value::Int(0)),
                            ("t".to_string(), Value::Int(0)),
                        ]
                        .into(),
                    )]),
                )]
                .into(),
            ),
            // Index beyond the table the entry list itself defines.
            times_descriptor(&[(5, 0.5)]),
            // Entry that is not a map.
            Value::Dict([("ti".to_string(), Value::Array(vec![Value::Int(3)]))].into()),
        ];
        for descriptor in cases {
            let packet = wallpaper_packet("apple_desktop:h24", &descriptor);
            let (_session, handle) = handle_with_packet(&packet);
            let id = handle.metadata_block_ids(None)[0];
            match handle.image_time_table(id) {
                Err(HeifError::MalformedTimeEntry) => {}
                other => panic!("expected MalformedTimeEntry, got {other:?}"),
            }
        }
    }

    #[test]
    fn exif_blocks_are_counted_separately_from_mime_blocks() {
        let packet = wallpaper_packet("apple_desktop:h24", &times_descriptor(&[(0, 0.0)]));
        let (mut session, handle) = handle_with_packet(&packet);
        session
            .add_exif_metadata(&handle, &[0x4D, 0x4D, 0x00, 0x2A])
            .unwrap();

        assert_eq!(handle.metadata_count(None), 2);
        assert_eq!(handle.exif_count(), 1);
        assert_eq!(handle.exif_block_ids().len(), 1);

        // Exif payloads gain a four byte offset header on the way in.
        let id = handle.exif_block_ids()[0];
        let block = handle.metadata(id).unwrap();
        assert_eq!(&block[..4], &[0, 0, 0, 0]);
        assert_eq!(&block[4..], &[0x4D, 0x4D, 0x00, 0x2A]);
    }
}
