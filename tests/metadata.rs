// Wallpaper metadata pipeline tests: XMP packet in, descriptor map and
// frame schedule out, across container serialization.

use base64::Engine;

use heifkit::image::{Channel, Chroma, Colorspace, CompressionFormat, Image};
use heifkit::metadata::plist;
use heifkit::{
    APPLE_SOLAR_SELECTOR, APPLE_TIMES_SELECTOR, FrameTime, HeifError, ItemHandle, Session, Value,
};

fn wallpaper_packet(attribute: &str, descriptor: &Value) -> Vec<u8> {
    let payload = base64::engine::general_purpose::STANDARD.encode(plist::to_bytes(descriptor));
    format!(
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
    .into_bytes()
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

/// Encodes one image, attaches the packet, and reopens the serialized
/// container so every assertion runs against stored bytes.
fn reopened_with_packet(packet: &[u8]) -> (Session, ItemHandle) {
    let mut image = Image::new(2, 2, Colorspace::Monochrome, Chroma::Monochrome).unwrap();
    let mut plane = image.add_plane(Channel::Y, 2, 2, 8).unwrap();
    plane.set_data(&[1, 2, 3, 4], 2).unwrap();

    let mut session = Session::new().unwrap();
    let encoder = session.new_encoder(CompressionFormat::Hevc).unwrap();
    let handle = session.encode_image(&image, &encoder, None).unwrap();
    session.set_primary_image(&handle).unwrap();
    session.add_xmp_metadata(&handle, packet).unwrap();
    let bytes = session.write_to_bytes().unwrap();

    let mut reopened = Session::new().unwrap();
    reopened.open_from_bytes(&bytes).unwrap();
    let handle = reopened.primary_image_handle().unwrap();
    (reopened, handle)
}

#[test]
fn descriptor_maps_survive_the_full_nesting_round_trip() {
    let descriptor = times_descriptor(&[(0, 0.0), (1, 0.5), (2, 0.75)]);
    let packet = wallpaper_packet("apple_desktop:h24", &descriptor);
    let (_session, handle) = reopened_with_packet(&packet);

    let id = handle.metadata_block_ids(None)[0];
    let map = handle.nested_metadata_map(id, APPLE_TIMES_SELECTOR).unwrap();
    assert_eq!(Some(&map), descriptor.as_dict());
}

#[test]
fn nul_padding_anywhere_in_the_packet_is_ignored() {
    let descriptor = times_descriptor(&[(0, 0.25)]);
    let mut packet = wallpaper_packet("apple_desktop:h24", &descriptor);
    // Scatter NULs through the packet the way padded writers do.
    packet.insert(40, 0);
    packet.insert(90, 0);
    packet.extend_from_slice(&[0; 8]);

    let (_session, handle) = reopened_with_packet(&packet);
    let id = handle.metadata_block_ids(None)[0];
    let map = handle.apple_times_map(id).unwrap();
    assert_eq!(Some(&map), descriptor.as_dict());
}

#[test]
fn the_schedule_recovers_from_stored_bytes() {
    let packet = wallpaper_packet(
        "apple_desktop:h24",
        &times_descriptor(&[(1, 0.5), (0, 0.0), (2, 0.875)]),
    );
    let (_session, handle) = reopened_with_packet(&packet);

    let id = handle.metadata_block_ids(None)[0];
    let table = handle.image_time_table(id).unwrap();
    assert_eq!(
        table,
        vec![
            FrameTime { hour: 0, minute: 0 },
            FrameTime { hour: 12, minute: 0 },
            FrameTime { hour: 21, minute: 0 },
        ]
    );
}

#[test]
fn solar_descriptors_use_their_own_attribute() {
    let descriptor = Value::Dict(
        [(
            "si".to_string(),
            Value::Array(vec![Value::Dict(
                [
                    ("i".to_string(), Value::Int(0)),
                    ("a".to_string(), Value::Float(-0.34)),
                    ("z".to_string(), Value::Float(270.73)),
                ]
                .into(),
            )]),
        )]
        .into(),
    );
    let packet = wallpaper_packet("apple_desktop:solar", &descriptor);
    let (_session, handle) = reopened_with_packet(&packet);

    let id = handle.metadata_block_ids(None)[0];
    let map = handle.apple_solar_map(id).unwrap();
    assert_eq!(Some(&map), descriptor.as_dict());
    assert_eq!(
        handle.nested_metadata_map(id, APPLE_SOLAR_SELECTOR).unwrap(),
        map
    );

    // The same block has no h24 attribute, so the times selector finds an
    // empty string and the pipeline dies at the plist stage.
    assert!(matches!(
        handle.apple_times_map(id),
        Err(HeifError::PropertyList(_))
    ));
}

#[test]
fn unknown_metadata_ids_are_reported_by_id() {
    let packet = wallpaper_packet("apple_desktop:h24", &times_descriptor(&[(0, 0.5)]));
    let (_session, handle) = reopened_with_packet(&packet);

    match handle.metadata(77) {
        Err(HeifError::UnknownItem(id)) => assert_eq!(id, 77),
        other => panic!("expected UnknownItem, got {other:?}"),
    }
}

#[test]
fn exif_blocks_keep_their_offset_header_through_serialization() {
    let tiff = [0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
    let packet = wallpaper_packet("apple_desktop:h24", &times_descriptor(&[(0, 0.0)]));

    let mut image = Image::new(2, 2, Colorspace::Monochrome, Chroma::Monochrome).unwrap();
    let mut plane = image.add_plane(Channel::Y, 2, 2, 8).unwrap();
    plane.set_data(&[9, 9, 9, 9], 2).unwrap();

    let mut session = Session::new().unwrap();
    let encoder = session.new_encoder(CompressionFormat::Hevc).unwrap();
    let handle = session.encode_image(&image, &encoder, None).unwrap();
    session.set_primary_image(&handle).unwrap();
    session.add_exif_metadata(&handle, &tiff).unwrap();
    session.add_xmp_metadata(&handle, &packet).unwrap();
    let bytes = session.write_to_bytes().unwrap();

    let mut reopened = Session::new().unwrap();
    reopened.open_from_bytes(&bytes).unwrap();
    let handle = reopened.primary_image_handle().unwrap();

    assert_eq!(handle.metadata_count(None), 2);
    assert_eq!(handle.exif_count(), 1);
    let exif_id = handle.exif_block_ids()[0];
    let block = handle.metadata(exif_id).unwrap();
    assert_eq!(&block[..4], &[0, 0, 0, 0]);
    assert_eq!(&block[4..], &tiff);

    // The wallpaper pipeline still works on the other block.
    let other: Vec<_> = handle
        .metadata_block_ids(None)
        .into_iter()
        .filter(|&id| id != exif_id)
        .collect();
    assert_eq!(other.len(), 1);
    assert!(handle.image_time_table(other[0]).is_ok());
}

#[test]
fn selectors_that_cannot_yield_strings_are_refused() {
    let packet = wallpaper_packet("apple_desktop:h24", &times_descriptor(&[(0, 0.0)]));
    let (_session, handle) = reopened_with_packet(&packet);
    let id = handle.metadata_block_ids(None)[0];

    for selector in [
        "//x:xmpmeta/rdf:RDF/rdf:Description",
        "string(//x:xmpmeta/rdf:RDF)",
        "count(//rdf:Description)",
    ] {
        match handle.nested_metadata_map(id, selector) {
            Err(HeifError::SelectorNotFound(s)) => assert_eq!(s, selector),
            other => panic!("expected SelectorNotFound for {selector}, got {other:?}"),
        }
    }
}

#[test]
fn descriptor_values_are_typed_not_stringly() {
    let descriptor = Value::Dict(
        [
            ("ti".to_string(), times_descriptor(&[(0, 0.5)]).as_dict().unwrap()["ti"].clone()),
            ("ap".to_string(), Value::Dict([("d".to_string(), Value::Int(1))].into())),
            ("v".to_string(), Value::String("1.0".to_string())),
        ]
        .into(),
    );
    let packet = wallpaper_packet("apple_desktop:h24", &descriptor);
    let (_session, handle) = reopened_with_packet(&packet);

    let id = handle.metadata_block_ids(None)[0];
    let map = handle.apple_times_map(id).unwrap();

    assert_eq!(map["v"].as_str(), Some("1.0"));
    assert_eq!(map["ap"].as_dict().and_then(|ap| ap["d"].as_int()), Some(1));
    let entry = map["ti"].as_array().unwrap()[0].as_dict().unwrap();
    assert_eq!(entry["i"].as_int(), Some(0));
    assert_eq!(entry["t"].as_float(), Some(0.5));
    // The schedule builder tolerates the extra keys.
    assert_eq!(
        handle.image_time_table(id).unwrap(),
        vec![FrameTime { hour: 12, minute: 0 }]
    );
}

#[test]
fn a_plain_exif_item_has_no_wallpaper_descriptor() {
    let mut image = Image::new(2, 2, Colorspace::Monochrome, Chroma::Monochrome).unwrap();
    let mut plane = image.add_plane(Channel::Y, 2, 2, 8).unwrap();
    plane.set_data(&[5, 6, 7, 8], 2).unwrap();

    let mut session = Session::new().unwrap();
    let encoder = session.new_encoder(CompressionFormat::Hevc).unwrap();
    let handle = session.encode_image(&image, &encoder, None).unwrap();
    session
        .add_exif_metadata(&handle, &[0x4D, 0x4D, 0x00, 0x2A])
        .unwrap();

    // An Exif block is not XML once the NULs are stripped.
    let id = handle.metadata_block_ids(None)[0];
    assert!(handle.image_time_table(id).is_err());
}
