//! Element type conversion between flat native-endian buffers

use crate::types::AtomicType;
use crate::{Error, Result};

/// Intermediate representation of one decoded element
#[derive(Debug, Clone, Copy)]
enum Scalar {
    Signed(i64),
    Unsigned(u64),
    Real(f64),
}

/// Whether copying `src` elements into a `dst` buffer needs per-element work.
///
/// Same-width signed/unsigned pairs and the single-byte character types are
/// bit-compatible and can be copied directly.
pub fn conversion_required(src: AtomicType, dst: AtomicType) -> bool {
    use AtomicType::*;
    if src == dst {
        return false;
    }
    let pair = |a, b| (src == a && dst == b) || (src == b && dst == a);
    !(pair(Byte, UByte)
        || pair(Char, Byte)
        || pair(Char, UByte)
        || pair(Short, UShort)
        || pair(Int, UInt)
        || pair(Int64, UInt64)
        || (src.is_string() && matches!(dst, Char | Byte | UByte)))
}

/// Reject conversions between character data and multi-byte numbers
pub fn check_conversion(src: AtomicType, dst: AtomicType) -> Result<()> {
    let src_char = src == AtomicType::Char || src.is_string();
    let dst_char = dst == AtomicType::Char || dst.is_string();
    let disallowed = (dst_char && !src.is_char_compatible()) || (src_char && !dst.is_char_compatible());
    if disallowed || dst.is_string() {
        return Err(Error::DisallowedConversion { from: src, to: dst });
    }
    Ok(())
}

/// Convert `n` elements from `src` (laid out as `src_type`) into `dst`
/// (laid out as `dst_type`).
pub fn convert(
    src_type: AtomicType,
    dst_type: AtomicType,
    src: &[u8],
    n: usize,
    dst: &mut [u8],
) -> Result<()> {
    check_conversion(src_type, dst_type)?;

    let ssize = src_type.size_of();
    let dsize = dst_type.size_of();
    if src.len() < n * ssize {
        return Err(Error::ProtocolShortRead(format!(
            "conversion source holds {} bytes, need {}",
            src.len(),
            n * ssize
        )));
    }
    if dst.len() < n * dsize {
        return Err(Error::OutputTooSmall {
            needed: n * dsize,
            available: dst.len(),
        });
    }

    if !conversion_required(src_type, dst_type) {
        dst[..n * ssize].copy_from_slice(&src[..n * ssize]);
        return Ok(());
    }

    for i in 0..n {
        let value = decode(src_type, &src[i * ssize..(i + 1) * ssize]);
        encode(dst_type, value, &mut dst[i * dsize..(i + 1) * dsize]);
    }
    Ok(())
}

fn decode(ty: AtomicType, b: &[u8]) -> Scalar {
    use AtomicType::*;
    match ty {
        Byte => Scalar::Signed(b[0] as i8 as i64),
        Char | UByte | String | Url => Scalar::Unsigned(b[0] as u64),
        Short => Scalar::Signed(i16::from_ne_bytes([b[0], b[1]]) as i64),
        UShort => Scalar::Unsigned(u16::from_ne_bytes([b[0], b[1]]) as u64),
        Int => Scalar::Signed(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i64),
        UInt => Scalar::Unsigned(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as u64),
        Float => Scalar::Real(f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64),
        Int64 => Scalar::Signed(i64::from_ne_bytes(eight(b))),
        UInt64 => Scalar::Unsigned(u64::from_ne_bytes(eight(b))),
        Double => Scalar::Real(f64::from_ne_bytes(eight(b))),
    }
}

fn eight(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

macro_rules! cast {
    ($value:expr, $t:ty) => {
        match $value {
            Scalar::Signed(v) => v as $t,
            Scalar::Unsigned(v) => v as $t,
            Scalar::Real(v) => v as $t,
        }
    };
}

fn encode(ty: AtomicType, value: Scalar, out: &mut [u8]) {
    use AtomicType::*;
    match ty {
        Byte => out.copy_from_slice(&cast!(value, i8).to_ne_bytes()),
        Char | UByte | String | Url => out.copy_from_slice(&cast!(value, u8).to_ne_bytes()),
        Short => out.copy_from_slice(&cast!(value, i16).to_ne_bytes()),
        UShort => out.copy_from_slice(&cast!(value, u16).to_ne_bytes()),
        Int => out.copy_from_slice(&cast!(value, i32).to_ne_bytes()),
        UInt => out.copy_from_slice(&cast!(value, u32).to_ne_bytes()),
        Int64 => out.copy_from_slice(&cast!(value, i64).to_ne_bytes()),
        UInt64 => out.copy_from_slice(&cast!(value, u64).to_ne_bytes()),
        Float => out.copy_from_slice(&cast!(value, f32).to_ne_bytes()),
        Double => out.copy_from_slice(&cast!(value, f64).to_ne_bytes()),
    }
}
