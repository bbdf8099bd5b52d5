//! Values produced by evaluating an [`crate::Expr`].
//!
//! Every expression evaluates to either a [`Value`] or "no value" --
//! a definedness bit distinct from zero/empty. Boolean evaluation carries
//! a second bit, "tainted", which records that the boolean reached its
//! dispatcher by way of an undefined sub-expression (see
//! [`crate::eval::EvalCtx::eval_bool`]).

use std::fmt;

/// A concrete, defined result of evaluating a data/numeric/boolean expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Boolean(bool),
    Numeric(u64),
    Data(Data),
}

/// An owned byte string produced by a data expression.
///
/// `terminated` distinguishes text (NUL-terminated, or conventionally
/// text-shaped) from a raw octet string -- it governs how `concat` treats
/// trailing NULs: concatenating a terminated buffer strips the trailing NUL
/// before appending, concatenating two octet strings does not.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Data {
    pub bytes: Vec<u8>,
    pub terminated: bool,
}

impl Data {
    pub fn new(bytes: Vec<u8>) -> Self {
        Data {
            bytes,
            terminated: false,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Data {
            bytes: s.into().into_bytes(),
            terminated: true,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terminated {
            write!(f, "{}", String::from_utf8_lossy(&self.bytes))
        } else {
            for b in &self.bytes {
                write!(f, "{b:02x}")?;
            }
            Ok(())
        }
    }
}

impl Value {
    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<u64> {
        match self {
            Value::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<Data> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }
}

/// The result of evaluating a boolean expression: always produces a
/// concrete truth value for statement dispatch, but remembers whether that
/// value was manufactured from an undefined sub-expression.
///
/// `ignore if <expr>` is the only statement that inspects `tainted`
/// directly (see [`crate::statement::Statement::IgnoreIf`]); every other
/// consumer of a boolean just uses `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolEval {
    pub value: bool,
    pub tainted: bool,
}

impl BoolEval {
    pub fn defined(value: bool) -> Self {
        BoolEval {
            value,
            tainted: false,
        }
    }

    pub fn undefined() -> Self {
        BoolEval {
            value: false,
            tainted: true,
        }
    }
}

/// "No value" propagates through data/numeric expressions as `None`;
/// through boolean expressions as `BoolEval::undefined()`.
pub type EvalResult<T> = Result<Option<T>, crate::EvalError>;
