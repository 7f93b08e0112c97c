//! Relocatable model images for the NXA accelerator.
//!
//! A compiled execution graph lives in one contiguous payload region that
//! the accelerator addresses absolutely. [`export_model`] writes the graph,
//! its input/output interface metadata, and its runtime state spans into a
//! single versioned byte stream with every internal address rewritten to a
//! payload-relative offset; [`import_model`] restores that stream into a
//! caller-owned destination region, rebasing every address onto the new
//! region. The codec owns no memory: payload, destination region, and state
//! spans all belong to the caller.
//!
//! [`read_header`] parses only the fixed header prefix, so a caller can
//! check the version and size a fixed hardware-mapped region before
//! committing to the copy.

mod endpoint;
mod error;
mod format;
mod io;
mod reloc;
mod state;

pub use crate::endpoint::{Endpoint, InterfaceMap, RotationTransform};
pub use crate::error::{ImageError, Result};
pub use crate::format::{
    read_header, FormatVersion, ModelHeader, LATEST_VERSION, MODEL_IMAGE_ENDIANNESS_LITTLE,
    MODEL_IMAGE_MAGIC,
};
pub use crate::reloc::{to_address, to_offset, RelocationTable};
pub use crate::state::StateRegion;

use std::io::{Read, Write};

use crate::endpoint::EndpointRecord;
use crate::io::{ReadLeExt, WriteLeExt};

/// Endpoint counts beyond this are a corrupted header, not a real graph.
const MAX_ENDPOINTS: u32 = 4096;

/// Export-side view of a compiled graph resident at `base`.
///
/// Borrowed throughout: the codec is a pure transform over externally-owned
/// memory and holds nothing beyond the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct ModelImage<'a> {
    /// Graph payload bytes as currently resident at `base`.
    pub payload: &'a [u8],
    /// Device-visible address the payload currently resides at.
    pub base: u64,
    /// Offsets of the pointer-bearing fields inside `payload`.
    pub reloc: &'a RelocationTable,
    pub layer_count: u64,
    /// Grouping factor (batch) the graph was compiled for.
    pub batch: u32,
    pub inputs: &'a InterfaceMap,
    pub outputs: &'a InterfaceMap,
}

/// Everything one export needs beyond the image itself, in one immutable
/// struct: the per-direction rotation hints and the state regions to
/// persist, in the order the caller wants them back after import.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportConfig<'a> {
    pub input_rotation: RotationTransform,
    pub output_rotation: RotationTransform,
    pub state_regions: &'a [StateRegion],
}

/// Result of a successful import: the header upgraded to its latest
/// in-memory form, and the interface maps with every address rebased into
/// the destination region.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedModel {
    pub header: ModelHeader,
    pub inputs: InterfaceMap,
    pub outputs: InterfaceMap,
}

/// Serialize `image` into `w` at the latest format version.
///
/// Section order: header, input descriptors, output descriptors, input
/// names, output names, relocation table, payload (slots rewritten to
/// payload-relative offsets), state table. Writes are not atomic at the
/// stream level; on any error the caller must discard the partial output.
pub fn export_model<W: Write>(
    w: &mut W,
    image: &ModelImage<'_>,
    config: &ExportConfig<'_>,
) -> Result<()> {
    let payload_size = image.payload.len() as u64;
    let input_count: u32 = image
        .inputs
        .len()
        .try_into()
        .map_err(|_| ImageError::Corrupt("too many inputs"))?;
    let output_count: u32 = image
        .outputs
        .len()
        .try_into()
        .map_err(|_| ImageError::Corrupt("too many outputs"))?;
    if input_count > MAX_ENDPOINTS || output_count > MAX_ENDPOINTS {
        return Err(ImageError::Corrupt("endpoint count too large"));
    }

    let header = ModelHeader {
        version: LATEST_VERSION,
        payload_size,
        layer_count: image.layer_count,
        batch: image.batch,
        input_count,
        output_count,
        input_rotation: config.input_rotation,
        output_rotation: config.output_rotation,
    };
    header.write(w)?;

    for record in endpoint::serialize_endpoints(image.inputs, image.base, payload_size)? {
        record.write(w)?;
    }
    for record in endpoint::serialize_endpoints(image.outputs, image.base, payload_size)? {
        record.write(w)?;
    }
    endpoint::write_names(w, image.inputs)?;
    endpoint::write_names(w, image.outputs)?;

    image.reloc.write(w)?;

    // The stream gets a position-independent copy; the caller's live payload
    // keeps its absolute addresses.
    let mut scratch = image.payload.to_vec();
    image.reloc.derelocate(&mut scratch, image.base)?;
    w.write_bytes(&scratch)?;

    state::write_state_table(w, config.state_regions, image.base, payload_size)?;
    Ok(())
}

/// Read a whole model image from `r` into `region`.
///
/// `region_base` is the device-visible address the region will be mapped
/// at. Rebased state regions are appended to `states` in their original
/// registration order. On any error the region's contents are unspecified
/// and the caller must discard them.
pub fn import_model<R: Read>(
    r: &mut R,
    region: &mut [u8],
    region_base: u64,
    states: &mut Vec<StateRegion>,
) -> Result<ImportedModel> {
    let header = read_header(r)?;
    import_model_with_header(&header, r, region, region_base, states)
}

/// Import a model whose header was already consumed by [`read_header`].
pub fn import_model_with_header<R: Read>(
    header: &ModelHeader,
    r: &mut R,
    region: &mut [u8],
    region_base: u64,
    states: &mut Vec<StateRegion>,
) -> Result<ImportedModel> {
    let payload_size = header.payload_size;
    let have = region.len() as u64;
    if have < payload_size {
        return Err(ImageError::BufferTooSmall {
            needed: payload_size,
            have,
        });
    }
    if header.input_count > MAX_ENDPOINTS || header.output_count > MAX_ENDPOINTS {
        return Err(ImageError::Corrupt("endpoint count too large"));
    }

    let input_records = read_records(r, header.version, header.input_count)?;
    let output_records = read_records(r, header.version, header.output_count)?;

    let (input_names, output_names) = if header.version.has_name_lists() {
        (
            endpoint::read_names(r, header.input_count as usize)?,
            endpoint::read_names(r, header.output_count as usize)?,
        )
    } else {
        (
            endpoint::synthesized_names("input", header.input_count as usize),
            endpoint::synthesized_names("output", header.output_count as usize),
        )
    };

    let table = RelocationTable::read(r, payload_size)?;

    let payload = &mut region[..payload_size as usize];
    r.read_bytes_exact(payload)?;
    table.relocate(payload, region_base)?;

    state::read_state_table(r, region_base, payload_size, states)?;

    let inputs = endpoint::rebuild_interface(
        &input_records,
        &input_names,
        header.input_rotation,
        region_base,
        payload_size,
    )?;
    let outputs = endpoint::rebuild_interface(
        &output_records,
        &output_names,
        header.output_rotation,
        region_base,
        payload_size,
    )?;

    // Trailing bytes after the state table are tolerated for
    // forward-compatible additions.
    Ok(ImportedModel {
        header: *header,
        inputs,
        outputs,
    })
}

fn read_records<R: Read>(
    r: &mut R,
    version: FormatVersion,
    count: u32,
) -> Result<Vec<EndpointRecord>> {
    let mut records = Vec::with_capacity((count as usize).min(64));
    for _ in 0..count {
        records.push(EndpointRecord::read(r, version)?);
    }
    Ok(records)
}
