//! Binary checkpoint format.
//!
//! Little-endian layout:
//!
//! ```text
//! magic "BLZI" | version u32 | precision u32
//! max_seq_len u32 | vocab_size u32 | dim u32 | n_layers u32 | n_heads u32 | hidden_dim u32
//! per parameter, in build order: rows u32 | cols u32 | rows*cols values
//! ```
//!
//! Values are 2 bytes for f16/bf16 checkpoints and 4 bytes for f32.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytemuck::cast_slice;
use half::{bf16, f16};
use memmap2::MmapOptions;
use ndarray::{Array2, ArrayView2};

use crate::config::Precision;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::model::{ModelArgs, ParamSource, ParamSpec, Transformer};

const MAGIC: &[u8; 4] = b"BLZI";
const VERSION: u32 = 1;

/// Fixed-size prefix of every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub version: u32,
    pub precision: Precision,
    pub args: ModelArgs,
}

/// Write `model` to `path` at the model's own precision.
pub fn save(model: &Transformer, path: &Path) -> std::io::Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    write_to(model, &mut f)?;
    f.flush()
}

pub fn write_to<W: Write>(model: &Transformer, w: &mut W) -> std::io::Result<()> {
    let precision = model.precision();
    let args = model.args();
    w.write_all(MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&precision.tag().to_le_bytes())?;
    for (name, v) in [
        ("max_seq_len", args.max_seq_len),
        ("vocab_size", args.vocab_size),
        ("dim", args.dim),
        ("n_layers", args.n_layers),
        ("n_heads", args.n_heads),
        ("hidden_dim", args.hidden_dim),
    ] {
        w.write_all(&field_u32(name, v)?.to_le_bytes())?;
    }

    let mut result = Ok(());
    model.for_each_param(|name, p| {
        if result.is_ok() {
            result = write_param(w, &name, p, precision);
        }
    });
    result
}

/// Sizes are stored as u32; larger values are rejected rather than truncated.
fn field_u32(name: &str, v: usize) -> std::io::Result<u32> {
    u32::try_from(v).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{name} ({v}) does not fit in a checkpoint"),
        )
    })
}

fn write_param<W: Write>(
    w: &mut W,
    name: &str,
    p: ArrayView2<'_, f32>,
    precision: Precision,
) -> std::io::Result<()> {
    w.write_all(&field_u32(name, p.nrows())?.to_le_bytes())?;
    w.write_all(&field_u32(name, p.ncols())?.to_le_bytes())?;
    match precision {
        Precision::F16 => {
            let values: Vec<f16> = p.iter().map(|&v| f16::from_f32(v)).collect();
            w.write_all(cast_slice(values.as_slice()))
        }
        Precision::Bf16 => {
            let values: Vec<bf16> = p.iter().map(|&v| bf16::from_f32(v)).collect();
            w.write_all(cast_slice(values.as_slice()))
        }
        Precision::F32 => {
            let values: Vec<f32> = p.iter().copied().collect();
            w.write_all(cast_slice(values.as_slice()))
        }
    }
}

/// Memory-map a checkpoint and build a model at `precision`.
pub fn load(path: &Path, precision: Precision) -> ProvisioningResult<Transformer> {
    let file = File::open(path).map_err(|e| ProvisioningError::io(path, e))?;
    let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| ProvisioningError::io(path, e))?;
    from_bytes(&mmap[..], precision)
}

pub fn from_bytes(bytes: &[u8], precision: Precision) -> ProvisioningResult<Transformer> {
    let mut reader = Reader { buf: bytes, offset: 0 };
    let header = reader.header()?;
    let mut source = CheckpointSource {
        reader,
        precision: header.precision,
    };
    let model = Transformer::build(header.args, precision, &mut source)?;
    let trailing = bytes.len() - source.reader.offset;
    if trailing != 0 {
        return Err(ProvisioningError::Corrupt(format!(
            "{trailing} unexpected trailing bytes"
        )));
    }
    Ok(model)
}

/// Parse only the header.
pub fn read_header(bytes: &[u8]) -> ProvisioningResult<CheckpointHeader> {
    Reader { buf: bytes, offset: 0 }.header()
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> ProvisioningResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                ProvisioningError::Corrupt(format!(
                    "unexpected end of data at byte {} (needed {n} more)",
                    self.offset
                ))
            })?;
        let out = &self.buf[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn u32(&mut self) -> ProvisioningResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn usize(&mut self) -> ProvisioningResult<usize> {
        Ok(self.u32()? as usize)
    }

    fn header(&mut self) -> ProvisioningResult<CheckpointHeader> {
        if self.bytes(4)? != MAGIC {
            return Err(ProvisioningError::Corrupt("bad magic".into()));
        }
        let version = self.u32()?;
        if version != VERSION {
            return Err(ProvisioningError::UnsupportedVersion(version));
        }
        let tag = self.u32()?;
        let precision = Precision::from_tag(tag)
            .ok_or_else(|| ProvisioningError::Corrupt(format!("unknown precision tag {tag}")))?;
        let args = ModelArgs {
            max_seq_len: self.usize()?,
            vocab_size: self.usize()?,
            dim: self.usize()?,
            n_layers: self.usize()?,
            n_heads: self.usize()?,
            hidden_dim: self.usize()?,
        };
        Ok(CheckpointHeader {
            version,
            precision,
            args,
        })
    }
}

/// Feeds parameters to `Transformer::build` straight from the mapped bytes.
struct CheckpointSource<'a> {
    reader: Reader<'a>,
    precision: Precision,
}

impl ParamSource for CheckpointSource<'_> {
    fn next_param(&mut self, spec: &ParamSpec) -> ProvisioningResult<Array2<f32>> {
        let shape = (self.reader.usize()?, self.reader.usize()?);
        if shape != spec.shape {
            return Err(ProvisioningError::Corrupt(format!(
                "parameter '{}' stored as {:?}, expected {:?}",
                spec.name, shape, spec.shape
            )));
        }
        let width = match self.precision {
            Precision::F16 | Precision::Bf16 => 2,
            Precision::F32 => 4,
        };
        let len = shape
            .0
            .checked_mul(shape.1)
            .and_then(|n| n.checked_mul(width))
            .ok_or_else(|| {
                ProvisioningError::Corrupt(format!(
                    "parameter '{}' of shape {:?} is too large",
                    spec.name, shape
                ))
            })?;
        let raw = self.reader.bytes(len)?;
        let values: Vec<f32> = match self.precision {
            Precision::F16 => raw
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            Precision::Bf16 => raw
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            Precision::F32 => raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        };
        Array2::from_shape_vec(shape, values)
            .map_err(|e| ProvisioningError::Corrupt(format!("parameter '{}': {e}", spec.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> ModelArgs {
        ModelArgs {
            max_seq_len: 8,
            vocab_size: 10,
            dim: 4,
            n_layers: 1,
            n_heads: 2,
            hidden_dim: 8,
        }
    }

    fn encoded(precision: Precision) -> (Transformer, Vec<u8>) {
        let model = Transformer::seeded(tiny(), precision, 5).unwrap();
        let mut buf = Vec::new();
        write_to(&model, &mut buf).unwrap();
        (model, buf)
    }

    #[test]
    fn header_reflects_model() {
        let (_, buf) = encoded(Precision::Bf16);
        let header = read_header(&buf).unwrap();
        assert_eq!(header.version, VERSION);
        assert_eq!(header.precision, Precision::Bf16);
        assert_eq!(header.args, tiny());
    }

    #[test]
    fn half_checkpoint_is_half_the_size() {
        let (_, half) = encoded(Precision::F16);
        let (model, full) = encoded(Precision::F32);
        let params = model.param_count();
        assert_eq!(full.len() - half.len(), params * 2);
    }

    #[test]
    fn bad_magic() {
        let (_, mut buf) = encoded(Precision::F16);
        buf[0] = b'X';
        assert!(matches!(
            from_bytes(&buf, Precision::F16),
            Err(ProvisioningError::Corrupt(_))
        ));
    }

    #[test]
    fn unsupported_version() {
        let (_, mut buf) = encoded(Precision::F16);
        buf[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            from_bytes(&buf, Precision::F16),
            Err(ProvisioningError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn truncated_and_trailing_data() {
        let (_, buf) = encoded(Precision::F16);
        assert!(from_bytes(&buf[..buf.len() - 1], Precision::F16).is_err());
        let mut longer = buf.clone();
        longer.push(0);
        assert!(from_bytes(&longer, Precision::F16).is_err());
    }

    #[test]
    fn oversized_parameter_is_corrupt() {
        let mut buf = MAGIC.to_vec();
        let header = [VERSION, Precision::F16.tag(), 4, u32::MAX, u32::MAX, 1, 1, 4];
        // tok_embed claims vocab_size x dim values
        for v in header.into_iter().chain([u32::MAX, u32::MAX]) {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        assert!(matches!(
            from_bytes(&buf, Precision::F16),
            Err(ProvisioningError::Corrupt(_))
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn sizes_beyond_u32_are_rejected_on_write() {
        assert_eq!(field_u32("dim", 64).unwrap(), 64);
        let err = field_u32("dim", u32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
