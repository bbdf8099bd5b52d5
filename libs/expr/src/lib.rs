//! Boolean/numeric/data expression engine and executable statement tree
//! shared by the classification path and the option-emission path.
//!
//! An [`Expr`] is evaluated against an [`eval::EvalCtx`] to a [`value::Value`]
//! or "no value" (definedness is tracked separately from zero/empty, matching
//! the three-state semantics option expressions need). A [`Statement`] is the
//! executable half: `if`/`add class`/`{default,supersede,prepend,append}
//! option`/`set`/`log`/`execute`-style actions threaded through a scope.

pub mod eval;
pub mod expr;
pub mod statement;
pub mod universe;
pub mod value;

pub use eval::EvalCtx;
pub use expr::Expr;
pub use statement::{LogPriority, OptionWrite, Statement};
pub use universe::{OptionState, Universe, UniverseRegistry, to_v4_options};
pub use value::{BoolEval, Data, Value};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("expected a boolean value, got {0:?}")]
    ExpectedBoolean(Value),
    #[error("expected a numeric value, got {0:?}")]
    ExpectedNumeric(Value),
    #[error("expected a data value, got {0:?}")]
    ExpectedData(Value),
    #[error("unknown option universe {0:?}")]
    UnknownUniverse(String),
    #[error("option code {code} has no decoder registered in universe {universe:?}")]
    UnknownOption { universe: String, code: u32 },
    #[error("integer width must be 8, 16, or 32, got {0}")]
    BadIntWidth(usize),
    #[error("substring/suffix offset or length out of range")]
    OutOfRange,
    #[error("binary-to-ascii base must be 8, 10, or 16, got {0}")]
    BadBase(u32),
    #[error("dns lookup failed for {0:?}")]
    DnsLookupFailed(String),
    #[error("ns-update rejected: rcode {0}")]
    NsUpdateFailed(u8),
    #[error("wire decode error: {0}")]
    Decode(#[from] dhcproto::error::DecodeError),
    #[error("wire encode error: {0}")]
    Encode(#[from] dhcproto::error::EncodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_eval_defined_is_not_tainted() {
        let b = BoolEval::defined(true);
        assert!(b.value);
        assert!(!b.tainted);
    }

    #[test]
    fn bool_eval_undefined_is_tainted_and_false() {
        let b = BoolEval::undefined();
        assert!(!b.value);
        assert!(b.tainted);
    }
}
