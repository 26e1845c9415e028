//! Scalar value codec: a small closed set of typed values with a stable byte encoding and a
//! total order per type.
//!
//! A [`Value`] is either `Null` or one variant of [`ValueKind`]. Encoding always starts with a
//! one-byte flag (`0` = null, `1` = present) followed by the variant body. Two values compare
//! only when they share a `ValueKind`; comparing across kinds is a programmer error and returns
//! [`Error::KeyTypeMismatch`].

use crate::error::{Error, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Bool,
    Char,
    Str,
    F32,
    F64,
    Decimal,
    Timestamp,
}

/// A decoded scalar. `Null` carries no kind of its own; nullness is a property of a slot, not of
/// the type, so callers compare `Value`s knowing the declared kind out of band (the tree's key
/// type, or a WAL record's recorded type tag).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Bool(bool),
    Char(char),
    Str(String),
    F32(f32),
    F64(f64),
    /// Fixed-point decimal: `mantissa * 10^-scale`.
    Decimal(i128, u8),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::U8(_) => Some(ValueKind::U8),
            Value::U16(_) => Some(ValueKind::U16),
            Value::U32(_) => Some(ValueKind::U32),
            Value::U64(_) => Some(ValueKind::U64),
            Value::I8(_) => Some(ValueKind::I8),
            Value::I16(_) => Some(ValueKind::I16),
            Value::I32(_) => Some(ValueKind::I32),
            Value::I64(_) => Some(ValueKind::I64),
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Char(_) => Some(ValueKind::Char),
            Value::Str(_) => Some(ValueKind::Str),
            Value::F32(_) => Some(ValueKind::F32),
            Value::F64(_) => Some(ValueKind::F64),
            Value::Decimal(..) => Some(ValueKind::Decimal),
            Value::Timestamp(_) => Some(ValueKind::Timestamp),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encodes this value as `[flag:1][body]`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        match self {
            Value::Null => out.push(0),
            v => {
                out.push(1);
                v.encode_body(&mut out);
            }
        }
        out
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => {}
            Value::U8(x) => out.push(*x),
            Value::U16(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::U32(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::U64(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::I8(x) => out.push(*x as u8),
            Value::I16(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::I32(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::I64(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::Bool(b) => out.push(u8::from(*b)),
            Value::Char(c) => {
                let mut buf = [0u8; 4];
                let s = c.encode_utf8(&mut buf);
                out.push(s.len() as u8);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Str(s) => {
                write_varint(out, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
            Value::F32(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::F64(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::Decimal(mantissa, scale) => {
                out.extend_from_slice(&mantissa.to_le_bytes());
                out.push(*scale);
            }
            Value::Timestamp(ms) => out.extend_from_slice(&ms.to_le_bytes()),
        }
    }

    /// Decodes a value previously produced by [`Value::encode`]. `kind` is required for non-null
    /// bodies since the wire format carries no self-describing tag.
    pub fn decode(bytes: &[u8], kind: ValueKind) -> Result<Self> {
        let Some((&flag, body)) = bytes.split_first() else {
            return Err(Error::Decode(bincode::error::DecodeError::UnexpectedEnd {
                additional: 1,
            }));
        };
        if flag == 0 {
            return Ok(Value::Null);
        }
        Self::decode_body(body, kind)
    }

    fn decode_body(body: &[u8], kind: ValueKind) -> Result<Self> {
        let too_short = || Error::Decode(bincode::error::DecodeError::UnexpectedEnd { additional: 1 });
        Ok(match kind {
            ValueKind::U8 => Value::U8(*body.first().ok_or_else(too_short)?),
            ValueKind::U16 => Value::U16(u16::from_le_bytes(body.get(0..2).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::U32 => Value::U32(u32::from_le_bytes(body.get(0..4).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::U64 => Value::U64(u64::from_le_bytes(body.get(0..8).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::I8 => Value::I8(*body.first().ok_or_else(too_short)? as i8),
            ValueKind::I16 => Value::I16(i16::from_le_bytes(body.get(0..2).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::I32 => Value::I32(i32::from_le_bytes(body.get(0..4).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::I64 => Value::I64(i64::from_le_bytes(body.get(0..8).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::Bool => Value::Bool(*body.first().ok_or_else(too_short)? != 0),
            ValueKind::Char => {
                let len = *body.first().ok_or_else(too_short)? as usize;
                let s = std::str::from_utf8(body.get(1..1 + len).ok_or_else(too_short)?)
                    .map_err(|_| too_short())?;
                Value::Char(s.chars().next().ok_or_else(too_short)?)
            }
            ValueKind::Str => {
                let (len, used) = read_varint(body).ok_or_else(too_short)?;
                let len = crate::utils::num::u64_to_usize(len).ok_or_else(too_short)?;
                let s = std::str::from_utf8(body.get(used..used + len).ok_or_else(too_short)?)
                    .map_err(|_| too_short())?;
                Value::Str(s.to_owned())
            }
            ValueKind::F32 => Value::F32(f32::from_le_bytes(body.get(0..4).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::F64 => Value::F64(f64::from_le_bytes(body.get(0..8).ok_or_else(too_short)?.try_into().unwrap())),
            ValueKind::Decimal => {
                let mantissa = i128::from_le_bytes(body.get(0..16).ok_or_else(too_short)?.try_into().unwrap());
                let scale = *body.get(16).ok_or_else(too_short)?;
                Value::Decimal(mantissa, scale)
            }
            ValueKind::Timestamp => Value::Timestamp(i64::from_le_bytes(body.get(0..8).ok_or_else(too_short)?.try_into().unwrap())),
        })
    }

    /// Total order between two values of the same kind. `Null` sorts before any present value of
    /// that kind; two nulls are equal.
    pub fn cmp(&self, other: &Self) -> Result<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            (a, b) => {
                let (ak, bk) = (a.kind().unwrap(), b.kind().unwrap());
                if ak != bk {
                    return Err(Error::KeyTypeMismatch { expected: ak, actual: bk });
                }
                Ok(match (a, b) {
                    (Value::U8(x), Value::U8(y)) => x.cmp(y),
                    (Value::U16(x), Value::U16(y)) => x.cmp(y),
                    (Value::U32(x), Value::U32(y)) => x.cmp(y),
                    (Value::U64(x), Value::U64(y)) => x.cmp(y),
                    (Value::I8(x), Value::I8(y)) => x.cmp(y),
                    (Value::I16(x), Value::I16(y)) => x.cmp(y),
                    (Value::I32(x), Value::I32(y)) => x.cmp(y),
                    (Value::I64(x), Value::I64(y)) => x.cmp(y),
                    (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
                    (Value::Char(x), Value::Char(y)) => x.cmp(y),
                    (Value::Str(x), Value::Str(y)) => x.cmp(y),
                    (Value::F32(x), Value::F32(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
                    (Value::F64(x), Value::F64(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
                    (Value::Decimal(xm, xs), Value::Decimal(ym, ys)) => {
                        decimal_cmp(*xm, *xs, *ym, *ys)
                    }
                    (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
                    _ => unreachable!("kinds matched above"),
                })
            }
        }
    }
}

/// Compares two decimals of possibly-different scale by cross-multiplying onto a common scale.
fn decimal_cmp(xm: i128, xs: u8, ym: i128, ys: u8) -> Ordering {
    if xs == ys {
        return xm.cmp(&ym);
    }
    let (xs, ys) = (i32::from(xs), i32::from(ys));
    let diff = (xs - ys).unsigned_abs();
    let scale10 = 10i128.saturating_pow(diff);
    if xs < ys {
        xm.saturating_mul(scale10).cmp(&ym)
    } else {
        xm.cmp(&ym.saturating_mul(scale10))
    }
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    None
}
