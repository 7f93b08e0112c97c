use std::io::{Read, Write};

use crate::error::{ImageError, Result};
use crate::io::{ReadLeExt, WriteLeExt};
use crate::reloc::{to_address, to_offset};

/// Limit on serialized state-table entries; a corrupted count must not force
/// a pathological allocation.
const MAX_STATE_REGIONS: usize = 4096;

/// A span of payload memory holding runtime-mutable values (recurrent state
/// and similar) that the caller must rebind after import.
///
/// Live form: `address` is the absolute device address of the span.
/// Persisted form: a `(payload-relative offset, size)` pair. Regions are
/// identified positionally: import hands them back in registration order,
/// so index-based correspondence with the pre-export states holds. The
/// codec records and relocates spans; it never owns the memory behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRegion {
    pub address: u64,
    pub size: u64,
}

pub(crate) fn write_state_table<W: Write>(
    w: &mut W,
    regions: &[StateRegion],
    base: u64,
    payload_size: u64,
) -> Result<()> {
    let count: u32 = regions
        .len()
        .try_into()
        .map_err(|_| ImageError::Corrupt("too many state regions"))?;
    w.write_u32_le(count)?;
    for region in regions {
        let offset = to_offset(region.address, base, payload_size)?;
        check_span(offset, region.size, payload_size)?;
        w.write_u64_le(offset)?;
        w.write_u64_le(region.size)?;
    }
    Ok(())
}

/// Append rebased regions to `out` in table order.
pub(crate) fn read_state_table<R: Read>(
    r: &mut R,
    region_base: u64,
    payload_size: u64,
    out: &mut Vec<StateRegion>,
) -> Result<()> {
    let count = r.read_u32_le()? as usize;
    if count > MAX_STATE_REGIONS {
        return Err(ImageError::Corrupt("too many state regions"));
    }
    out.reserve(count.min(64));
    for _ in 0..count {
        let offset = r.read_u64_le()?;
        let size = r.read_u64_le()?;
        check_span(offset, size, payload_size)?;
        let address = to_address(offset, region_base, payload_size)?;
        out.push(StateRegion { address, size });
    }
    Ok(())
}

/// A state span must lie entirely within the payload.
fn check_span(offset: u64, size: u64, payload_size: u64) -> Result<()> {
    let end = offset.checked_add(size).ok_or(ImageError::CorruptPointer {
        offset,
        payload_size,
    })?;
    if end > payload_size {
        return Err(ImageError::CorruptPointer {
            offset,
            payload_size,
        });
    }
    Ok(())
}
