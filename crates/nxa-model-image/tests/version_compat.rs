use std::io::Cursor;

use nxa_model_image::{
    import_model, read_header, FormatVersion, ImageError, RotationTransform, StateRegion,
    MODEL_IMAGE_ENDIANNESS_LITTLE, MODEL_IMAGE_MAGIC,
};

const V1_HEADER_SIZE: u32 = 44;
const V2_HEADER_SIZE: u32 = 53;

fn push_header_prefix(dst: &mut Vec<u8>, version: u16, header_size: u32) {
    dst.extend_from_slice(MODEL_IMAGE_MAGIC);
    dst.extend_from_slice(&version.to_le_bytes());
    dst.push(MODEL_IMAGE_ENDIANNESS_LITTLE);
    dst.push(0);
    dst.extend_from_slice(&header_size.to_le_bytes());
}

fn push_counts(dst: &mut Vec<u8>, payload_size: u64, layers: u64, batch: u32, ins: u32, outs: u32) {
    dst.extend_from_slice(&payload_size.to_le_bytes());
    dst.extend_from_slice(&layers.to_le_bytes());
    dst.extend_from_slice(&batch.to_le_bytes());
    dst.extend_from_slice(&ins.to_le_bytes());
    dst.extend_from_slice(&outs.to_le_bytes());
}

fn push_rotation(dst: &mut Vec<u8>, rows: u32, cols: u32, enabled: bool) {
    dst.extend_from_slice(&rows.to_le_bytes());
    dst.extend_from_slice(&cols.to_le_bytes());
    dst.push(enabled as u8);
}

/// V1 descriptor: no scale field.
fn push_record_v1(dst: &mut Vec<u8>, elements: u32, element_size: u32, offset: u64) {
    dst.extend_from_slice(&elements.to_le_bytes());
    dst.extend_from_slice(&element_size.to_le_bytes());
    dst.extend_from_slice(&offset.to_le_bytes());
}

fn push_record_v2(dst: &mut Vec<u8>, scale: f32, elements: u32, element_size: u32, offset: u64) {
    dst.extend_from_slice(&scale.to_le_bytes());
    push_record_v1(dst, elements, element_size, offset);
}

fn push_reloc_table(dst: &mut Vec<u8>, slots: &[u64]) {
    dst.extend_from_slice(&(slots.len() as u32).to_le_bytes());
    for &slot in slots {
        dst.extend_from_slice(&slot.to_le_bytes());
    }
}

fn push_state_table(dst: &mut Vec<u8>, entries: &[(u64, u64)]) {
    dst.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for &(offset, size) in entries {
        dst.extend_from_slice(&offset.to_le_bytes());
        dst.extend_from_slice(&size.to_le_bytes());
    }
}

fn patterned_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

/// A V1 image: one input, one output, one relocation slot, one state span.
/// No scale, no rotation, no name lists anywhere in the stream.
fn v1_image() -> Vec<u8> {
    let mut payload = patterned_payload(256);
    payload[64..72].copy_from_slice(&128u64.to_le_bytes());

    let mut bytes = Vec::new();
    push_header_prefix(&mut bytes, 1, V1_HEADER_SIZE);
    push_counts(&mut bytes, 256, 4, 1, 1, 1);
    push_record_v1(&mut bytes, 4, 4, 16);
    push_record_v1(&mut bytes, 2, 4, 32);
    push_reloc_table(&mut bytes, &[64]);
    bytes.extend_from_slice(&payload);
    push_state_table(&mut bytes, &[(192, 16)]);
    bytes
}

/// A V2 image: adds the f32 scale per descriptor and the input rotation in
/// the header, but still no output rotation and no name lists.
fn v2_image() -> Vec<u8> {
    let payload = patterned_payload(256);

    let mut bytes = Vec::new();
    push_header_prefix(&mut bytes, 2, V2_HEADER_SIZE);
    push_counts(&mut bytes, 256, 4, 1, 1, 1);
    push_rotation(&mut bytes, 4, 8, true);
    push_record_v2(&mut bytes, 0.5, 4, 4, 16);
    push_record_v2(&mut bytes, 8.0, 2, 4, 32);
    push_reloc_table(&mut bytes, &[]);
    bytes.extend_from_slice(&payload);
    push_state_table(&mut bytes, &[]);
    bytes
}

#[test]
fn v1_imports_with_documented_defaults() {
    let base = 0x3000u64;
    let mut region = vec![0u8; 1024];
    let mut states = Vec::new();
    let model = import_model(
        &mut Cursor::new(v1_image()),
        &mut region,
        base,
        &mut states,
    )
    .unwrap();

    assert_eq!(model.header.version, FormatVersion::V1);
    assert_eq!(model.header.layer_count, 4);

    // Names synthesized positionally; scale defaults to 1.0; rotation
    // defaults to disabled in both directions.
    let names: Vec<&str> = model.inputs.names().collect();
    assert_eq!(names, ["input_0"]);
    let in0 = model.inputs.get("input_0").unwrap();
    assert_eq!(in0.scale, 1.0);
    assert_eq!(in0.rotation, RotationTransform::DISABLED);
    assert_eq!(in0.address, base + 16);

    let out0 = model.outputs.get("output_0").unwrap();
    assert_eq!(out0.scale, 1.0);
    assert_eq!(out0.rotation, RotationTransform::DISABLED);

    // The relocation slot and the state span rebase like any other version.
    assert_eq!(&region[64..72], &(base + 128).to_le_bytes());
    assert_eq!(
        states,
        [StateRegion {
            address: base + 192,
            size: 16,
        }]
    );
}

#[test]
fn v2_imports_with_scale_and_input_rotation() {
    let base = 0x3000u64;
    let mut region = vec![0u8; 1024];
    let mut states = Vec::new();
    let model = import_model(
        &mut Cursor::new(v2_image()),
        &mut region,
        base,
        &mut states,
    )
    .unwrap();

    assert_eq!(model.header.version, FormatVersion::V2);
    assert_eq!(
        model.header.input_rotation,
        RotationTransform {
            rows: 4,
            cols: 8,
            enabled: true,
        }
    );
    assert_eq!(model.header.output_rotation, RotationTransform::DISABLED);

    let in0 = model.inputs.get("input_0").unwrap();
    assert_eq!(in0.scale, 0.5);
    assert_eq!(in0.rotation.rows, 4);
    assert!(in0.rotation.enabled);

    let out0 = model.outputs.get("output_0").unwrap();
    assert_eq!(out0.scale, 8.0);
    assert_eq!(out0.rotation, RotationTransform::DISABLED);
}

#[test]
fn v1_header_reads_standalone() {
    let bytes = v1_image();
    let header = read_header(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(header.version, FormatVersion::V1);
    assert_eq!(header.payload_size, 256);
    assert_eq!(header.input_count, 1);
    assert_eq!(header.output_count, 1);
    assert_eq!(header.input_rotation, RotationTransform::DISABLED);
    assert_eq!(header.output_rotation, RotationTransform::DISABLED);
}

#[test]
fn future_version_is_rejected() {
    let mut bytes = Vec::new();
    push_header_prefix(&mut bytes, 9, V1_HEADER_SIZE);
    push_counts(&mut bytes, 0, 0, 0, 0, 0);

    let err = read_header(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(err, ImageError::UnsupportedVersion(9)));
}
