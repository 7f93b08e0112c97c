use std::io::{Read, Write};

use crate::error::{ImageError, Result};
use crate::format::FormatVersion;
use crate::io::{ReadLeExt, WriteLeExt};

/// Endpoint names come from untrusted images; bound them so a corrupted
/// length prefix cannot force a pathological allocation.
const MAX_NAME_BYTES: usize = 64 * 1024;

/// Layout-transpose hint for one direction's tensor data: the runtime
/// interleaves `rows` x `cols` blocks before feeding the graph (inputs) or
/// after draining it (outputs). Disabled with zero dimensions by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationTransform {
    pub rows: u32,
    pub cols: u32,
    pub enabled: bool,
}

impl RotationTransform {
    pub const DISABLED: RotationTransform = RotationTransform {
        rows: 0,
        cols: 0,
        enabled: false,
    };

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32_le(self.rows)?;
        w.write_u32_le(self.cols)?;
        w.write_u8(self.enabled as u8)?;
        Ok(())
    }

    pub(crate) fn read<R: Read>(r: &mut R) -> Result<Self> {
        let rows = r.read_u32_le()?;
        let cols = r.read_u32_le()?;
        let enabled = match r.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(ImageError::Corrupt("invalid rotation flag")),
        };
        Ok(Self {
            rows,
            cols,
            enabled,
        })
    }
}

/// One input's or output's runtime contract.
///
/// `address` is the device-visible absolute address of the endpoint's data:
/// inside the live payload before export, inside the destination region
/// after import. The quantization scale is carried as IEEE-754 `f32` in the
/// interchange format; conversion to the accelerator's native fixed-point
/// form is the runtime's concern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Endpoint {
    pub address: u64,
    pub elements: u32,
    pub element_size: u32,
    pub scale: f32,
    pub rotation: RotationTransform,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            address: 0,
            elements: 0,
            element_size: 0,
            scale: 1.0,
            rotation: RotationTransform::DISABLED,
        }
    }
}

/// Insertion-ordered name → endpoint map.
///
/// Iteration order is insertion order, and both the descriptor section and
/// the name section of an image follow it; names are re-associated with
/// descriptors positionally on import, so the order must survive the round
/// trip exactly. Name uniqueness within one map is a caller precondition,
/// not checked here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceMap {
    entries: Vec<(String, Endpoint)>,
}

impl InterfaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, endpoint: Endpoint) {
        self.entries.push((name.into(), endpoint));
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, endpoint)| endpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Endpoint)> {
        self.entries
            .iter()
            .map(|(name, endpoint)| (name.as_str(), endpoint))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

/// Serialized endpoint descriptor. `offset` is relative to the payload base,
/// never to the whole file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct EndpointRecord {
    pub scale: f32,
    pub elements: u32,
    pub element_size: u32,
    pub offset: u64,
}

impl EndpointRecord {
    pub(crate) fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_f32_le(self.scale)?;
        w.write_u32_le(self.elements)?;
        w.write_u32_le(self.element_size)?;
        w.write_u64_le(self.offset)?;
        Ok(())
    }

    /// V1 predates the scale field; it decodes as the documented default 1.0.
    pub(crate) fn read<R: Read>(r: &mut R, version: FormatVersion) -> Result<Self> {
        let scale = if version.has_scale() {
            r.read_f32_le()?
        } else {
            1.0
        };
        Ok(Self {
            scale,
            elements: r.read_u32_le()?,
            element_size: r.read_u32_le()?,
            offset: r.read_u64_le()?,
        })
    }
}

fn endpoint_span(elements: u32, element_size: u32) -> Result<u64> {
    u64::from(elements)
        .checked_mul(u64::from(element_size))
        .ok_or(ImageError::Corrupt("endpoint span overflow"))
}

/// Produce one descriptor per map entry, in map order, with addresses
/// rewritten to payload-relative offsets.
pub(crate) fn serialize_endpoints(
    map: &InterfaceMap,
    base: u64,
    payload_size: u64,
) -> Result<Vec<EndpointRecord>> {
    let mut records = Vec::with_capacity(map.len());
    for (_, endpoint) in map.iter() {
        // A zero-element endpoint (an unused output) may carry a null
        // address; it has no data span to anchor and serializes as offset 0.
        let offset = if endpoint.elements == 0 && endpoint.address == 0 {
            0
        } else {
            let offset = endpoint
                .address
                .checked_sub(base)
                .ok_or(ImageError::Corrupt("endpoint address below payload base"))?;
            let span = endpoint_span(endpoint.elements, endpoint.element_size)?;
            let end = offset
                .checked_add(span)
                .ok_or(ImageError::CorruptPointer {
                    offset,
                    payload_size,
                })?;
            if end > payload_size {
                return Err(ImageError::CorruptPointer {
                    offset,
                    payload_size,
                });
            }
            offset
        };
        records.push(EndpointRecord {
            scale: endpoint.scale,
            elements: endpoint.elements,
            element_size: endpoint.element_size,
            offset,
        });
    }
    Ok(records)
}

/// Inverse of [`serialize_endpoints`]: rebuild the caller-facing interface
/// map with addresses rebased into the destination region and the
/// direction's rotation attached to every endpoint.
pub(crate) fn rebuild_interface(
    records: &[EndpointRecord],
    names: &[String],
    rotation: RotationTransform,
    region_base: u64,
    payload_size: u64,
) -> Result<InterfaceMap> {
    debug_assert_eq!(records.len(), names.len());
    let mut map = InterfaceMap::new();
    for (record, name) in records.iter().zip(names) {
        let span = endpoint_span(record.elements, record.element_size)?;
        let end = record
            .offset
            .checked_add(span)
            .ok_or(ImageError::CorruptPointer {
                offset: record.offset,
                payload_size,
            })?;
        if end > payload_size {
            return Err(ImageError::CorruptPointer {
                offset: record.offset,
                payload_size,
            });
        }
        let address = region_base
            .checked_add(record.offset)
            .ok_or(ImageError::Corrupt("rebased endpoint address overflows"))?;
        map.insert(
            name.clone(),
            Endpoint {
                address,
                elements: record.elements,
                element_size: record.element_size,
                scale: record.scale,
                rotation,
            },
        );
    }
    Ok(map)
}

pub(crate) fn write_names<W: Write>(w: &mut W, map: &InterfaceMap) -> Result<()> {
    for name in map.names() {
        w.write_string_u32(name)?;
    }
    Ok(())
}

pub(crate) fn read_names<R: Read>(r: &mut R, count: usize) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        names.push(r.read_string_u32(MAX_NAME_BYTES)?);
    }
    Ok(names)
}

/// Pre-name-list versions associate names with descriptors positionally;
/// synthesize the same positional names on upgrade.
pub(crate) fn synthesized_names(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}_{i}")).collect()
}
