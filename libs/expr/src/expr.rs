//! The expression tagged-sum: every boolean/numeric/data operator the
//! classification and option-emission paths can build into a tree.
//!
//! `Expr` is intentionally untyped at the Rust level (a config option can be
//! requested as either numeric or data depending on context) -- type
//! mismatches surface as [`crate::EvalError`] at evaluation time, mirroring
//! how the original config language resolves this only when the expression
//! tree actually runs.

use crate::eval::EvalCtx;
use crate::value::{Data, Value};
use crate::EvalError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    // literals
    ConstInt(u64),
    ConstData(Data),
    ConstBool(bool),

    // boolean
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Equal(Box<Expr>, Box<Expr>),
    NotEqual(Box<Expr>, Box<Expr>),
    Exists { universe: String, code: u32 },
    Known,
    Static,

    // data
    Substring(Box<Expr>, Box<Expr>, Box<Expr>),
    Suffix(Box<Expr>, Box<Expr>),
    Concat(Box<Expr>, Box<Expr>),
    PickFirstValue(Vec<Expr>),
    Option { universe: String, code: u32 },
    ConfigOption { universe: String, code: u32 },
    Hardware,
    Packet { offset: Box<Expr>, len: Box<Expr> },
    LeasedAddress,
    HostDeclName,
    EncodeInt8(Box<Expr>),
    EncodeInt16(Box<Expr>),
    EncodeInt32(Box<Expr>),
    BinaryToAscii {
        base: Box<Expr>,
        width: Box<Expr>,
        separator: Box<Expr>,
        buf: Box<Expr>,
    },
    Reverse {
        width: Box<Expr>,
        buf: Box<Expr>,
    },
    GetHostByName(String),

    // numeric
    ExtractInt8(Box<Expr>),
    ExtractInt16(Box<Expr>),
    ExtractInt32(Box<Expr>),
    MakeLimit(Box<Expr>, usize),

    // ns-update side channel (see `crate::statement::Statement::NsUpdate`);
    // `Expr::NsUpdate` reads back the RCODE of a previously issued update.
    NsUpdate(String),
}

impl Expr {
    /// Evaluate to a [`Value`], or `None` for "no value" (definedness is
    /// tracked separately from zero/empty -- see module docs).
    pub fn evaluate(&self, ctx: &mut EvalCtx<'_>) -> Result<Option<Value>, EvalError> {
        use Expr::*;
        Ok(match self {
            ConstInt(n) => Some(Value::Numeric(*n)),
            ConstData(d) => Some(Value::Data(d.clone())),
            ConstBool(b) => Some(Value::Boolean(*b)),

            And(a, b) => {
                let l = ctx.eval_bool(a)?;
                let r = ctx.eval_bool(b)?;
                Some(Value::Boolean(l.value && r.value))
            }
            Or(a, b) => {
                let l = ctx.eval_bool(a)?;
                let r = ctx.eval_bool(b)?;
                Some(Value::Boolean(l.value || r.value))
            }
            Not(a) => {
                let v = ctx.eval_bool(a)?;
                Some(Value::Boolean(!v.value))
            }
            Equal(a, b) => match (a.evaluate(ctx)?, b.evaluate(ctx)?) {
                (Some(l), Some(r)) => Some(Value::Boolean(values_equal(&l, &r))),
                _ => None,
            },
            NotEqual(a, b) => match (a.evaluate(ctx)?, b.evaluate(ctx)?) {
                (Some(l), Some(r)) => Some(Value::Boolean(!values_equal(&l, &r))),
                _ => None,
            },
            Exists { universe, code } => Some(Value::Boolean(ctx.option_exists(universe, *code))),
            Known => Some(Value::Boolean(ctx.known)),
            Static => Some(Value::Boolean(ctx.static_lease)),

            Substring(s, ofs, len) => {
                let s = as_data(s.evaluate(ctx)?)?;
                let ofs = as_usize(ofs.evaluate(ctx)?)?;
                let len = as_usize(len.evaluate(ctx)?)?;
                let s = match s {
                    Some(s) => s,
                    None => return Ok(None),
                };
                let (ofs, len) = match (ofs, len) {
                    (Some(o), Some(l)) => (o, l),
                    _ => return Ok(None),
                };
                if ofs > s.len() {
                    return Err(EvalError::OutOfRange);
                }
                let end = (ofs + len).min(s.len());
                Some(Value::Data(Data::new(s.bytes[ofs..end].to_vec())))
            }
            Suffix(s, len) => {
                let s = as_data(s.evaluate(ctx)?)?;
                let len = as_usize(len.evaluate(ctx)?)?;
                let (s, len) = match (s, len) {
                    (Some(s), Some(l)) => (s, l),
                    _ => return Ok(None),
                };
                let start = s.len().saturating_sub(len);
                Some(Value::Data(Data::new(s.bytes[start..].to_vec())))
            }
            Concat(a, b) => {
                let a = as_data(a.evaluate(ctx)?)?;
                let b = as_data(b.evaluate(ctx)?)?;
                match (a, b) {
                    (Some(mut a), Some(b)) => {
                        if a.terminated {
                            while a.bytes.last() == Some(&0) {
                                a.bytes.pop();
                            }
                        }
                        a.bytes.extend_from_slice(&b.bytes);
                        a.terminated = b.terminated;
                        Some(Value::Data(a))
                    }
                    _ => None,
                }
            }
            PickFirstValue(exprs) => {
                let mut result = None;
                for e in exprs {
                    if let Some(v) = e.evaluate(ctx)? {
                        result = Some(v);
                        break;
                    }
                }
                result
            }
            Option { universe, code } => ctx.get_option(universe, *code).map(Value::Data),
            ConfigOption { universe, code } => ctx.get_config_option(universe, *code).map(Value::Data),
            Hardware => Some(Value::Data(ctx.hardware())),
            Packet { offset, len } => {
                let ofs = as_usize(offset.evaluate(ctx)?)?;
                let len = as_usize(len.evaluate(ctx)?)?;
                match (ofs, len) {
                    (Some(ofs), Some(len)) => {
                        let raw = ctx.raw_packet();
                        if ofs > raw.len() {
                            return Err(EvalError::OutOfRange);
                        }
                        let end = (ofs + len).min(raw.len());
                        Some(Value::Data(Data::new(raw[ofs..end].to_vec())))
                    }
                    _ => None,
                }
            }
            LeasedAddress => ctx.leased_address().map(Value::Data),
            HostDeclName => ctx.host_decl_name().map(Value::Data),
            EncodeInt8(e) => encode_int(e, ctx, 1)?,
            EncodeInt16(e) => encode_int(e, ctx, 2)?,
            EncodeInt32(e) => encode_int(e, ctx, 4)?,
            BinaryToAscii {
                base,
                width,
                separator,
                buf,
            } => {
                let base = as_u32(base.evaluate(ctx)?)?;
                let width = as_usize(width.evaluate(ctx)?)?;
                let sep = as_data(separator.evaluate(ctx)?)?;
                let buf = as_data(buf.evaluate(ctx)?)?;
                match (base, width, sep, buf) {
                    (Some(base), Some(width), Some(sep), Some(buf)) => {
                        Some(Value::Data(binary_to_ascii(base, width, &sep, &buf)?))
                    }
                    _ => None,
                }
            }
            Reverse { width, buf } => {
                let width = as_usize(width.evaluate(ctx)?)?;
                let buf = as_data(buf.evaluate(ctx)?)?;
                match (width, buf) {
                    (Some(width), Some(buf)) => Some(Value::Data(reverse_chunks(width, &buf)?)),
                    _ => None,
                }
            }
            GetHostByName(name) => ctx.resolved_host(name).map(Value::Data),

            ExtractInt8(e) => extract_int(e, ctx, 1)?,
            ExtractInt16(e) => extract_int(e, ctx, 2)?,
            ExtractInt32(e) => extract_int(e, ctx, 4)?,
            MakeLimit(e, limit) => {
                let n = as_u64(e.evaluate(ctx)?)?;
                n.map(|n| Value::Numeric(n.min(*limit as u64)))
            }

            NsUpdate(key) => ctx.ns_update_rcode(key).map(|rc| Value::Numeric(rc as u64)),
        })
    }
}

impl Expr {
    /// Collect every hostname a `gethostbyname()` call in this expression
    /// tree references, so a caller can resolve them all before evaluation
    /// starts (see module docs on [`crate::eval::EvalCtx::resolved_hosts`]).
    pub fn collect_hostnames(&self, out: &mut Vec<String>) {
        use Expr::*;
        match self {
            ConstInt(_) | ConstData(_) | ConstBool(_) | Exists { .. } | Known | Static | Option { .. }
            | ConfigOption { .. } | Hardware | LeasedAddress | HostDeclName | NsUpdate(_) => {}
            GetHostByName(name) => out.push(name.clone()),
            And(a, b) | Or(a, b) | Equal(a, b) | NotEqual(a, b) | Concat(a, b) | Suffix(a, b) => {
                a.collect_hostnames(out);
                b.collect_hostnames(out);
            }
            Not(a) | EncodeInt8(a) | EncodeInt16(a) | EncodeInt32(a) | ExtractInt8(a) | ExtractInt16(a)
            | ExtractInt32(a) | MakeLimit(a, _) => a.collect_hostnames(out),
            Substring(a, b, c) => {
                a.collect_hostnames(out);
                b.collect_hostnames(out);
                c.collect_hostnames(out);
            }
            PickFirstValue(exprs) => exprs.iter().for_each(|e| e.collect_hostnames(out)),
            Packet { offset, len } => {
                offset.collect_hostnames(out);
                len.collect_hostnames(out);
            }
            BinaryToAscii { base, width, separator, buf } => {
                base.collect_hostnames(out);
                width.collect_hostnames(out);
                separator.collect_hostnames(out);
                buf.collect_hostnames(out);
            }
            Reverse { width, buf } => {
                width.collect_hostnames(out);
                buf.collect_hostnames(out);
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Numeric(x), Value::Numeric(y)) => x == y,
        (Value::Data(x), Value::Data(y)) => x.bytes == y.bytes,
        _ => false,
    }
}

fn as_data(v: Option<Value>) -> Result<Option<Data>, EvalError> {
    match v {
        None => Ok(None),
        Some(Value::Data(d)) => Ok(Some(d)),
        Some(other) => Err(EvalError::ExpectedData(other)),
    }
}

fn as_u64(v: Option<Value>) -> Result<Option<u64>, EvalError> {
    match v {
        None => Ok(None),
        Some(Value::Numeric(n)) => Ok(Some(n)),
        Some(other) => Err(EvalError::ExpectedNumeric(other)),
    }
}

fn as_u32(v: Option<Value>) -> Result<Option<u32>, EvalError> {
    Ok(as_u64(v)?.map(|n| n as u32))
}

fn as_usize(v: Option<Value>) -> Result<Option<usize>, EvalError> {
    Ok(as_u64(v)?.map(|n| n as usize))
}

fn encode_int(e: &Expr, ctx: &mut EvalCtx<'_>, width: usize) -> Result<Option<Value>, EvalError> {
    let n = as_u64(e.evaluate(ctx)?)?;
    Ok(n.map(|n| {
        let bytes = match width {
            1 => vec![n as u8],
            2 => (n as u16).to_be_bytes().to_vec(),
            4 => (n as u32).to_be_bytes().to_vec(),
            _ => unreachable!(),
        };
        Value::Data(Data::new(bytes))
    }))
}

fn extract_int(e: &Expr, ctx: &mut EvalCtx<'_>, width: usize) -> Result<Option<Value>, EvalError> {
    let d = as_data(e.evaluate(ctx)?)?;
    let d = match d {
        Some(d) => d,
        None => return Ok(None),
    };
    if d.bytes.len() < width {
        return Err(EvalError::OutOfRange);
    }
    let n = match width {
        1 => d.bytes[0] as u64,
        2 => u16::from_be_bytes([d.bytes[0], d.bytes[1]]) as u64,
        4 => u32::from_be_bytes([d.bytes[0], d.bytes[1], d.bytes[2], d.bytes[3]]) as u64,
        _ => return Err(EvalError::BadIntWidth(width)),
    };
    Ok(Some(Value::Numeric(n)))
}

fn binary_to_ascii(base: u32, width: usize, sep: &Data, buf: &Data) -> Result<Data, EvalError> {
    if width != 1 && width != 2 && width != 4 {
        return Err(EvalError::BadIntWidth(width));
    }
    let radix = match base {
        8 | 10 | 16 => base,
        _ => return Err(EvalError::BadBase(base)),
    };
    let sep = String::from_utf8_lossy(&sep.bytes).into_owned();
    let mut chunks = Vec::new();
    for chunk in buf.bytes.chunks(width) {
        let n: u64 = chunk.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        chunks.push(match radix {
            8 => format!("{n:o}"),
            16 => format!("{n:x}"),
            _ => format!("{n}"),
        });
    }
    Ok(Data::text(chunks.join(&sep)))
}

fn reverse_chunks(width: usize, buf: &Data) -> Result<Data, EvalError> {
    if width == 0 || buf.bytes.len() % width != 0 {
        return Err(EvalError::OutOfRange);
    }
    let mut out = Vec::with_capacity(buf.bytes.len());
    for chunk in buf.bytes.chunks(width).rev() {
        out.extend_from_slice(chunk);
    }
    Ok(Data::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalCtx;

    #[test]
    fn concat_strips_trailing_nul_on_terminated_lhs() {
        let mut ctx = EvalCtx::for_test();
        let a = Data {
            bytes: b"foo\0".to_vec(),
            terminated: true,
        };
        let b = Data::text("bar");
        let e = Expr::Concat(
            Box::new(Expr::ConstData(a)),
            Box::new(Expr::ConstData(b)),
        );
        let v = e.evaluate(&mut ctx).unwrap().unwrap();
        assert_eq!(v.into_data().unwrap().bytes, b"foobar");
    }

    #[test]
    fn pick_first_value_skips_undefined() {
        let mut ctx = EvalCtx::for_test();
        let e = Expr::PickFirstValue(vec![
            Expr::Option {
                universe: "dhcp".into(),
                code: 200,
            },
            Expr::ConstData(Data::text("fallback")),
        ]);
        let v = e.evaluate(&mut ctx).unwrap().unwrap();
        assert_eq!(v.into_data().unwrap().bytes, b"fallback");
    }

    #[test]
    fn binary_to_ascii_hex_with_separator() {
        let mut ctx = EvalCtx::for_test();
        let e = Expr::BinaryToAscii {
            base: Box::new(Expr::ConstInt(16)),
            width: Box::new(Expr::ConstInt(1)),
            separator: Box::new(Expr::ConstData(Data::text(":"))),
            buf: Box::new(Expr::ConstData(Data::new(vec![0xde, 0xad, 0xbe, 0xef]))),
        };
        let v = e.evaluate(&mut ctx).unwrap().unwrap();
        assert_eq!(v.into_data().unwrap().to_string(), "de:ad:be:ef");
    }

    #[test]
    fn extract_int16_reads_big_endian() {
        let mut ctx = EvalCtx::for_test();
        let e = Expr::ExtractInt16(Box::new(Expr::ConstData(Data::new(vec![0x01, 0x02]))));
        let v = e.evaluate(&mut ctx).unwrap().unwrap();
        assert_eq!(v.as_numeric().unwrap(), 0x0102);
    }

    #[test]
    fn make_limit_caps_value() {
        let mut ctx = EvalCtx::for_test();
        let e = Expr::MakeLimit(Box::new(Expr::ConstInt(9999)), 3600);
        let v = e.evaluate(&mut ctx).unwrap().unwrap();
        assert_eq!(v.as_numeric().unwrap(), 3600);
    }
}
