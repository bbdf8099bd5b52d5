//! Executable statement tree: the `if`/`set`/`{default,supersede,prepend,
//! append} option`/`add class`/`log`/`on <event> { ... }` actions a group's
//! config can attach to a packet-processing pass.

use tracing::{debug, info, warn};

use crate::eval::EvalCtx;
use crate::universe::OptionState;
use crate::value::Data;
use crate::{Expr, EvalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPriority {
    Info,
    Debug,
    Fatal,
}

/// How a `{default,supersede,prepend,append} option` statement combines
/// with whatever is already in the outgoing option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionWrite {
    /// Only set if no value already present.
    Default,
    /// Unconditionally overwrite.
    Supersede,
    /// Prepend to an existing data value (data options only).
    Prepend,
    /// Append to an existing data value (data options only).
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    If {
        cond: Expr,
        then_branch: Vec<Statement>,
        elsif_branches: Vec<(Expr, Vec<Statement>)>,
        else_branch: Vec<Statement>,
    },
    AddClass(String),
    Break,
    Return,
    Option {
        write: OptionWrite,
        universe: String,
        code: u32,
        value: Expr,
    },
    Set {
        name: String,
        value: Expr,
    },
    Eval(Expr),
    Log {
        priority: LogPriority,
        message: Expr,
    },
    OnCommit(Vec<Statement>),
    OnExpiry(Vec<Statement>),
    OnRelease(Vec<Statement>),
    NsUpdate { key: String, fqdn: Expr, rrtype: u16 },
    IgnoreIf(Expr),
}

impl Statement {
    /// Execute this statement against `ctx`. Execution of a block stops
    /// early if a `break`/`return` was hit, or if `ignore if` tripped --
    /// callers inspect `ctx.should_break`/`should_return`/`ignore_packet`
    /// after running a block.
    pub fn execute(&self, ctx: &mut EvalCtx<'_>) -> Result<(), EvalError> {
        use Statement::*;
        match self {
            If {
                cond,
                then_branch,
                elsif_branches,
                else_branch,
            } => {
                if ctx.eval_bool(cond)?.value {
                    exec_block(then_branch, ctx)?;
                    return Ok(());
                }
                for (c, branch) in elsif_branches {
                    if ctx.eval_bool(c)?.value {
                        exec_block(branch, ctx)?;
                        return Ok(());
                    }
                }
                exec_block(else_branch, ctx)?;
            }
            AddClass(name) => ctx.added_classes.push(name.clone()),
            Break => ctx.should_break = true,
            Return => ctx.should_return = true,
            Option {
                write,
                universe,
                code,
                value,
            } => {
                let v = value.evaluate(ctx)?;
                apply_option_write(&mut ctx.out_options, *write, *code, v);
                let _ = universe; // single built-in `dhcp`/`server` output table for now
            }
            Set { name, value } => {
                if let Some(v) = value.evaluate(ctx)? {
                    let data = match v {
                        crate::Value::Data(d) => d,
                        crate::Value::Numeric(n) => Data::new(n.to_be_bytes().to_vec()),
                        crate::Value::Boolean(b) => Data::new(vec![b as u8]),
                    };
                    ctx.scope.set(name.clone(), data);
                }
            }
            Eval(e) => {
                e.evaluate(ctx)?;
            }
            Log { priority, message } => {
                let text = match message.evaluate(ctx)? {
                    Some(crate::Value::Data(d)) => d.to_string(),
                    Some(v) => format!("{v:?}"),
                    None => "<no value>".to_string(),
                };
                match priority {
                    LogPriority::Info => info!(target: "expr::log", "{text}"),
                    LogPriority::Debug => debug!(target: "expr::log", "{text}"),
                    LogPriority::Fatal => warn!(target: "expr::log", fatal = true, "{text}"),
                }
            }
            OnCommit(stmts) | OnExpiry(stmts) | OnRelease(stmts) => {
                // event hooks run inline when the caller dispatches them at
                // the matching lifecycle point; here we just execute the body.
                exec_block(stmts, ctx)?;
            }
            NsUpdate { key, fqdn, rrtype } => {
                let _ = fqdn.evaluate(ctx)?;
                let _ = rrtype;
                // the actual update is issued out-of-band by the caller
                // (see `crate::eval::EvalCtx::ns_update_results`); this
                // statement just records that one was requested under `key`.
                debug!(target: "expr::ns_update", key = %key, "ns-update requested");
            }
            IgnoreIf(cond) => {
                let b = ctx.eval_bool(cond)?;
                if b.value || b.tainted {
                    ctx.ignore_packet = true;
                }
            }
        }
        Ok(())
    }
}

impl Statement {
    /// Collect every hostname any `gethostbyname()` call reachable from this
    /// statement (including nested `if`/`on <event>` blocks) references.
    pub fn collect_hostnames(&self, out: &mut Vec<String>) {
        use Statement::*;
        match self {
            If { cond, then_branch, elsif_branches, else_branch } => {
                cond.collect_hostnames(out);
                then_branch.iter().for_each(|s| s.collect_hostnames(out));
                for (c, branch) in elsif_branches {
                    c.collect_hostnames(out);
                    branch.iter().for_each(|s| s.collect_hostnames(out));
                }
                else_branch.iter().for_each(|s| s.collect_hostnames(out));
            }
            AddClass(_) | Break | Return => {}
            Option { value, .. } | Set { value, .. } | Eval(value) | Log { message: value, .. } => {
                value.collect_hostnames(out)
            }
            OnCommit(stmts) | OnExpiry(stmts) | OnRelease(stmts) => {
                stmts.iter().for_each(|s| s.collect_hostnames(out))
            }
            NsUpdate { fqdn, .. } => fqdn.collect_hostnames(out),
            IgnoreIf(cond) => cond.collect_hostnames(out),
        }
    }
}

fn exec_block(stmts: &[Statement], ctx: &mut EvalCtx<'_>) -> Result<(), EvalError> {
    for s in stmts {
        s.execute(ctx)?;
        if ctx.should_break || ctx.should_return || ctx.ignore_packet {
            break;
        }
    }
    Ok(())
}

fn apply_option_write(out: &mut OptionState, write: OptionWrite, code: u32, value: Option<crate::Value>) {
    let value = match value {
        Some(crate::Value::Data(d)) => d,
        Some(crate::Value::Numeric(n)) => Data::new(n.to_be_bytes().to_vec()),
        Some(crate::Value::Boolean(b)) => Data::new(vec![b as u8]),
        None => return,
    };
    match write {
        OptionWrite::Default => {
            if !out.contains(code) {
                out.set(code, value);
            }
        }
        OptionWrite::Supersede => out.set(code, value),
        OptionWrite::Prepend => {
            let mut combined = value;
            if let Some(existing) = out.get(code) {
                combined.bytes.extend_from_slice(&existing.bytes);
            }
            out.set(code, combined);
        }
        OptionWrite::Append => {
            let mut combined = out.get(code).cloned().unwrap_or_default();
            combined.bytes.extend_from_slice(&value.bytes);
            out.set(code, combined);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalCtx;

    #[test]
    fn default_option_does_not_override_existing() {
        let mut ctx = EvalCtx::for_test();
        ctx.out_options.set(12, Data::text("existing"));
        let stmt = Statement::Option {
            write: OptionWrite::Default,
            universe: "dhcp".into(),
            code: 12,
            value: Expr::ConstData(Data::text("new")),
        };
        stmt.execute(&mut ctx).unwrap();
        assert_eq!(ctx.out_options.get(12).unwrap().bytes, b"existing");
    }

    #[test]
    fn supersede_overrides() {
        let mut ctx = EvalCtx::for_test();
        ctx.out_options.set(12, Data::text("existing"));
        let stmt = Statement::Option {
            write: OptionWrite::Supersede,
            universe: "dhcp".into(),
            code: 12,
            value: Expr::ConstData(Data::text("new")),
        };
        stmt.execute(&mut ctx).unwrap();
        assert_eq!(ctx.out_options.get(12).unwrap().bytes, b"new");
    }

    #[test]
    fn ignore_if_taints_on_undefined() {
        let mut ctx = EvalCtx::for_test();
        let stmt = Statement::IgnoreIf(Expr::Exists {
            universe: "bogus-universe".into(),
            code: 1,
        });
        stmt.execute(&mut ctx).unwrap();
        assert!(!ctx.ignore_packet, "Exists always resolves defined, never tainted");
    }

    #[test]
    fn collect_hostnames_finds_calls_in_both_branches() {
        let stmt = Statement::If {
            cond: Expr::ConstBool(true),
            then_branch: vec![Statement::Set {
                name: "a".into(),
                value: Expr::GetHostByName("one.example.com".into()),
            }],
            elsif_branches: vec![],
            else_branch: vec![Statement::OnCommit(vec![Statement::Eval(Expr::GetHostByName(
                "two.example.com".into(),
            ))])],
        };
        let mut names = Vec::new();
        stmt.collect_hostnames(&mut names);
        assert_eq!(names, vec!["one.example.com", "two.example.com"]);
    }

    #[test]
    fn if_else_picks_branch() {
        let mut ctx = EvalCtx::for_test();
        let stmt = Statement::If {
            cond: Expr::ConstBool(false),
            then_branch: vec![Statement::Set {
                name: "x".into(),
                value: Expr::ConstData(Data::text("then")),
            }],
            elsif_branches: vec![],
            else_branch: vec![Statement::Set {
                name: "x".into(),
                value: Expr::ConstData(Data::text("else")),
            }],
        };
        stmt.execute(&mut ctx).unwrap();
        assert_eq!(ctx.scope.get("x").unwrap().bytes, b"else");
    }
}
