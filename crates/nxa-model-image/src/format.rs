use std::io::{Read, Write};

use crate::endpoint::RotationTransform;
use crate::error::{ImageError, Result};
use crate::io::{ReadLeExt, WriteLeExt};

pub const MODEL_IMAGE_MAGIC: &[u8; 8] = b"NXAMODEL";
pub const MODEL_IMAGE_ENDIANNESS_LITTLE: u8 = 1;

/// Upper bound on `header_size` surplus (bytes appended by a newer minor
/// revision of the same version). Anything beyond this is a corrupted
/// length field, not a plausible extension.
const MAX_HEADER_SURPLUS: u32 = 4096;

/// Supported wire versions. Readers accept all of them; writers always emit
/// the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum FormatVersion {
    /// Initial format: no quantization scale, no rotation, no name lists.
    V1 = 1,
    /// Adds the per-endpoint f32 quantization scale and the input rotation.
    V2 = 2,
    /// Adds the output rotation and explicit endpoint name lists.
    V3 = 3,
}

pub const LATEST_VERSION: FormatVersion = FormatVersion::V3;

impl FormatVersion {
    pub fn from_u16(v: u16) -> Result<Self> {
        match v {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            3 => Ok(FormatVersion::V3),
            other => Err(ImageError::UnsupportedVersion(other)),
        }
    }

    /// Fixed header length for this version, including the magic.
    pub fn header_size(self) -> u32 {
        match self {
            FormatVersion::V1 => 44,
            FormatVersion::V2 => 53,
            FormatVersion::V3 => 62,
        }
    }

    pub fn has_scale(self) -> bool {
        self >= FormatVersion::V2
    }

    pub fn has_input_rotation(self) -> bool {
        self >= FormatVersion::V2
    }

    pub fn has_output_rotation(self) -> bool {
        self >= FormatVersion::V3
    }

    pub fn has_name_lists(self) -> bool {
        self >= FormatVersion::V3
    }
}

/// Header in its latest in-memory form. `version` is retained as read so the
/// body decoders know which descriptor layout follows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelHeader {
    pub version: FormatVersion,
    pub payload_size: u64,
    pub layer_count: u64,
    /// Grouping factor (batch) the graph was compiled for.
    pub batch: u32,
    pub input_count: u32,
    pub output_count: u32,
    pub input_rotation: RotationTransform,
    pub output_rotation: RotationTransform,
}

#[derive(Debug, Clone, Copy)]
struct HeaderV1 {
    payload_size: u64,
    layer_count: u64,
    batch: u32,
    input_count: u32,
    output_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct HeaderV2 {
    v1: HeaderV1,
    input_rotation: RotationTransform,
}

#[derive(Debug, Clone, Copy)]
struct HeaderV3 {
    v2: HeaderV2,
    output_rotation: RotationTransform,
}

impl HeaderV1 {
    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            payload_size: r.read_u64_le()?,
            layer_count: r.read_u64_le()?,
            batch: r.read_u32_le()?,
            input_count: r.read_u32_le()?,
            output_count: r.read_u32_le()?,
        })
    }
}

impl HeaderV2 {
    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            v1: HeaderV1::read(r)?,
            input_rotation: RotationTransform::read(r)?,
        })
    }
}

impl HeaderV3 {
    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            v2: HeaderV2::read(r)?,
            output_rotation: RotationTransform::read(r)?,
        })
    }
}

/// Parsed header, tagged by the version it was read as. Each variant upgrades
/// into the latest in-memory form with explicit defaults for the fields its
/// version predates.
enum RawHeader {
    V1(HeaderV1),
    V2(HeaderV2),
    V3(HeaderV3),
}

impl RawHeader {
    fn upgrade(self) -> ModelHeader {
        match self {
            // V1 predates rotation metadata entirely: both directions
            // default to the disabled transform with zero dimensions.
            RawHeader::V1(h) => ModelHeader {
                version: FormatVersion::V1,
                payload_size: h.payload_size,
                layer_count: h.layer_count,
                batch: h.batch,
                input_count: h.input_count,
                output_count: h.output_count,
                input_rotation: RotationTransform::DISABLED,
                output_rotation: RotationTransform::DISABLED,
            },
            // V2 predates the output rotation only.
            RawHeader::V2(h) => ModelHeader {
                version: FormatVersion::V2,
                payload_size: h.v1.payload_size,
                layer_count: h.v1.layer_count,
                batch: h.v1.batch,
                input_count: h.v1.input_count,
                output_count: h.v1.output_count,
                input_rotation: h.input_rotation,
                output_rotation: RotationTransform::DISABLED,
            },
            RawHeader::V3(h) => ModelHeader {
                version: FormatVersion::V3,
                payload_size: h.v2.v1.payload_size,
                layer_count: h.v2.v1.layer_count,
                batch: h.v2.v1.batch,
                input_count: h.v2.v1.input_count,
                output_count: h.v2.v1.output_count,
                input_rotation: h.v2.input_rotation,
                output_rotation: h.output_rotation,
            },
        }
    }
}

/// Read and validate the fixed header prefix only.
///
/// The variable-length sections are left untouched, so a caller can decide
/// whether the destination region is large enough (and the version supported)
/// before committing to a full import. This matters when the destination is a
/// fixed-size hardware-mapped region that cannot be resized.
pub fn read_header<R: Read>(r: &mut R) -> Result<ModelHeader> {
    let mut magic = [0u8; 8];
    r.read_bytes_exact(&mut magic)?;
    if &magic != MODEL_IMAGE_MAGIC {
        return Err(ImageError::InvalidMagic);
    }
    let version = FormatVersion::from_u16(r.read_u16_le()?)?;
    let endianness = r.read_u8()?;
    if endianness != MODEL_IMAGE_ENDIANNESS_LITTLE {
        return Err(ImageError::InvalidEndianness(endianness));
    }
    let _reserved = r.read_u8()?;

    let header_size = r.read_u32_le()?;
    let known = version.header_size();
    if header_size < known {
        return Err(ImageError::Corrupt("header_size below the version's fixed layout"));
    }
    if header_size - known > MAX_HEADER_SURPLUS {
        return Err(ImageError::Corrupt("header_size implausibly large"));
    }

    let raw = match version {
        FormatVersion::V1 => RawHeader::V1(HeaderV1::read(r)?),
        FormatVersion::V2 => RawHeader::V2(HeaderV2::read(r)?),
        FormatVersion::V3 => RawHeader::V3(HeaderV3::read(r)?),
    };

    // A newer minor revision of the same version may have appended header
    // fields; skip what we do not know about.
    let surplus = u64::from(header_size - known);
    if surplus > 0 {
        let copied = std::io::copy(&mut r.take(surplus), &mut std::io::sink())?;
        if copied != surplus {
            return Err(ImageError::Truncated);
        }
    }

    Ok(raw.upgrade())
}

impl ModelHeader {
    /// Write the fixed header prefix in this header's own version layout.
    /// Counts and payload size must already be final.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_bytes(MODEL_IMAGE_MAGIC)?;
        w.write_u16_le(self.version as u16)?;
        w.write_u8(MODEL_IMAGE_ENDIANNESS_LITTLE)?;
        w.write_u8(0)?; // reserved
        w.write_u32_le(self.version.header_size())?;
        w.write_u64_le(self.payload_size)?;
        w.write_u64_le(self.layer_count)?;
        w.write_u32_le(self.batch)?;
        w.write_u32_le(self.input_count)?;
        w.write_u32_le(self.output_count)?;
        if self.version.has_input_rotation() {
            self.input_rotation.write(w)?;
        }
        if self.version.has_output_rotation() {
            self.output_rotation.write(w)?;
        }
        Ok(())
    }
}
