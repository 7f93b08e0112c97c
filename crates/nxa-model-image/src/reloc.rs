use std::io::{Read, Write};

use crate::error::{ImageError, Result};
use crate::io::{ReadLeExt, WriteLeExt};

/// Limit on serialized relocation entries; a corrupted count must not force
/// a pathological allocation.
const MAX_RELOC_SLOTS: usize = 1 << 20;

/// Convert an absolute device address inside `[base, base + payload_size)`
/// into its payload-relative offset.
pub fn to_offset(address: u64, base: u64, payload_size: u64) -> Result<u64> {
    let offset = address
        .checked_sub(base)
        .ok_or(ImageError::CorruptPointer {
            offset: address,
            payload_size,
        })?;
    if offset >= payload_size {
        return Err(ImageError::CorruptPointer {
            offset,
            payload_size,
        });
    }
    Ok(offset)
}

/// Inverse of [`to_offset`]: `to_address(to_offset(p, b, n)?, b, n)? == p`
/// for every base `b` and every `p` inside the payload.
pub fn to_address(offset: u64, base: u64, payload_size: u64) -> Result<u64> {
    if offset >= payload_size {
        return Err(ImageError::CorruptPointer {
            offset,
            payload_size,
        });
    }
    base.checked_add(offset)
        .ok_or(ImageError::Corrupt("relocated address overflows"))
}

/// Payload offsets of the 8-byte pointer fields inside the graph payload.
///
/// Every address the graph stores internally (weight blocks, bias vectors,
/// per-layer operand pointers) lives in one of these slots. The serialized
/// image keeps slot values payload-relative; binding the payload to a
/// concrete region rewrites them to absolute device addresses. The table
/// travels with the image because the payload is otherwise opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationTable {
    slots: Vec<u64>,
}

impl RelocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(slots: Vec<u64>) -> Self {
        Self { slots }
    }

    pub fn add_slot(&mut self, offset: u64) {
        self.slots.push(offset);
    }

    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let count: u32 = self
            .slots
            .len()
            .try_into()
            .map_err(|_| ImageError::Corrupt("too many relocation slots"))?;
        w.write_u32_le(count)?;
        for &slot in &self.slots {
            w.write_u64_le(slot)?;
        }
        Ok(())
    }

    pub(crate) fn read<R: Read>(r: &mut R, payload_size: u64) -> Result<Self> {
        let count = r.read_u32_le()? as usize;
        if count > MAX_RELOC_SLOTS {
            return Err(ImageError::Corrupt("too many relocation slots"));
        }
        let mut slots = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let slot = r.read_u64_le()?;
            check_slot(slot, payload_size)?;
            slots.push(slot);
        }
        Ok(Self { slots })
    }

    /// Rewrite every slot from absolute device address to payload-relative
    /// offset, in place. `payload` must currently reside at `base`.
    pub(crate) fn derelocate(&self, payload: &mut [u8], base: u64) -> Result<()> {
        self.rewrite(payload, |address, payload_size| {
            to_offset(address, base, payload_size)
        })
    }

    /// Rewrite every slot from stored payload-relative offset to absolute
    /// device address, for a payload about to reside at `base`. Bounds are
    /// validated before any address is materialized.
    pub(crate) fn relocate(&self, payload: &mut [u8], base: u64) -> Result<()> {
        self.rewrite(payload, |offset, payload_size| {
            to_address(offset, base, payload_size)
        })
    }

    fn rewrite(
        &self,
        payload: &mut [u8],
        convert: impl Fn(u64, u64) -> Result<u64>,
    ) -> Result<()> {
        let payload_size = payload.len() as u64;
        for &slot in &self.slots {
            check_slot(slot, payload_size)?;
            let at = slot as usize;
            let mut word = [0u8; 8];
            word.copy_from_slice(&payload[at..at + 8]);
            let converted = convert(u64::from_le_bytes(word), payload_size)?;
            payload[at..at + 8].copy_from_slice(&converted.to_le_bytes());
        }
        Ok(())
    }
}

/// A slot must hold a full 8-byte pointer field inside the payload.
fn check_slot(slot: u64, payload_size: u64) -> Result<()> {
    let end = slot.checked_add(8).ok_or(ImageError::CorruptPointer {
        offset: slot,
        payload_size,
    })?;
    if end > payload_size {
        return Err(ImageError::CorruptPointer {
            offset: slot,
            payload_size,
        });
    }
    Ok(())
}
