//! Recursive-descent parser over [`crate::lexer`], producing the Group
//! tree ([`crate::group`]) and populating a [`leasedb::LeaseDb`]. Lease
//! files share this parser: a lease record's `on commit { ... }` block
//! goes through the same statement grammar as `dhcpd.conf`.

use std::net::Ipv4Addr;

use expr::{Expr, Statement};
use leasedb::{FailoverPeerId, GroupId, LeaseDb, SharedNetworkId};

use crate::group::{
    self, BootpPolicy, Class, Group, GroupHandle, GroupTree, HostDecl, HostFlags, SharedNetwork, Subnet,
};
use crate::lexer::{Token, TokenStream};
use crate::optreg::{OptionRegistry, OptionType};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub line_text: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}\n  {}", self.line, self.message, self.line_text)
    }
}

impl std::error::Error for ParseError {}

pub type PResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    ts: TokenStream<'a>,
    pub tree: GroupTree,
    pub db: LeaseDb,
    pub options: OptionRegistry,
    pub root: GroupHandle,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut tree = GroupTree::new();
        let (_, root) = tree.alloc_group(Group::root());
        Parser {
            ts: TokenStream::new(source),
            tree,
            db: LeaseDb::new(),
            options: OptionRegistry::with_dhcp_builtins(),
            root,
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        let pos = self.ts.pos();
        ParseError {
            message: message.into(),
            line: pos.line,
            line_text: self.ts.line_text(pos.line).to_string(),
        }
    }

    fn peek(&self) -> &Token {
        self.ts.peek()
    }

    fn peek2(&self) -> &Token {
        self.ts.peek2()
    }

    fn bump(&mut self) -> Token {
        self.ts.advance().token
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(s) if s.eq_ignore_ascii_case(w))
    }

    fn eat_word(&mut self, w: &str) -> PResult<()> {
        if self.is_word(w) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected `{w}`, found `{}`", self.peek())))
        }
    }

    fn eat(&mut self, tok: Token) -> PResult<()> {
        if *self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected `{tok}`, found `{}`", self.peek())))
        }
    }

    fn expect_word(&mut self) -> PResult<String> {
        match self.bump() {
            Token::Word(w) => Ok(w),
            other => Err(self.err(format!("expected identifier, found `{other}`"))),
        }
    }

    fn expect_string(&mut self) -> PResult<String> {
        match self.bump() {
            Token::Str(s) => Ok(s),
            other => Err(self.err(format!("expected string literal, found `{other}`"))),
        }
    }

    fn expect_number(&mut self) -> PResult<i64> {
        match self.bump() {
            Token::Number(n) => n.parse().map_err(|_| self.err(format!("number `{n}` out of range"))),
            other => Err(self.err(format!("expected number, found `{other}`"))),
        }
    }

    /// A single hex-digit-pair octet, as used by MAC addresses and UIDs.
    /// The lexer hands these back as `Number` when every digit happens to
    /// be decimal (`52`) and as `Word` as soon as a hex letter appears
    /// (`ab`) -- both are read as hex here, matching the NUMBER_OR_NAME
    /// token that the grammar describes for this position.
    fn expect_hex_octet(&mut self) -> PResult<u8> {
        match self.bump() {
            Token::Number(s) | Token::Word(s) => {
                u8::from_str_radix(&s, 16).map_err(|_| self.err(format!("`{s}` is not a valid hex octet")))
            }
            other => Err(self.err(format!("expected hex octet, found `{other}`"))),
        }
    }

    fn expect_ip(&mut self) -> PResult<Ipv4Addr> {
        let mut octets = [0u8; 4];
        for (i, slot) in octets.iter_mut().enumerate() {
            *slot = self.expect_number()? as u8;
            if i < 3 {
                self.eat(Token::Dot)?;
            }
        }
        Ok(Ipv4Addr::from(octets))
    }

    /// Top level: `config := { statement }`.
    pub fn parse(mut self) -> PResult<(GroupTree, LeaseDb, OptionRegistry, GroupHandle)> {
        let root = self.root;
        let stmts = self.parse_body(root, &Token::Eof)?;
        if let Some(g) = self.tree.groups.get_mut(root) {
            g.statements = stmts;
        }
        Ok((self.tree, self.db, self.options, self.root))
    }

    /// Parse statements/declarations until `terminator` (either `}` or
    /// EOF for the top level), attaching declarations to `group` and
    /// returning the plain statement list.
    fn parse_body(&mut self, group: GroupHandle, terminator: &Token) -> PResult<Vec<Statement>> {
        let mut stmts = Vec::new();
        while self.peek() != terminator {
            if *self.peek() == Token::Eof {
                return Err(self.err("unexpected end of input"));
            }
            self.parse_statement(group, &mut stmts)?;
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self, group: GroupHandle, out: &mut Vec<Statement>) -> PResult<()> {
        if self.is_word("host") {
            self.parse_host_decl(group)
        } else if self.is_word("group") {
            self.parse_group_decl(group)
        } else if self.is_word("shared-network") {
            self.parse_shared_network_decl(group)
        } else if self.is_word("subnet") {
            self.parse_bare_subnet_decl(group)
        } else if self.is_word("class") {
            self.parse_class_decl(group)
        } else if self.is_word("subclass") {
            self.parse_subclass_decl(group)
        } else if self.is_word("pool") {
            // a bare top-level `pool {}` (outside subnet/shared-network)
            // isn't meaningful config but shouldn't panic; sentinel ids.
            self.parse_pool_decl(group, GroupId(u32::MAX), SharedNetworkId(u32::MAX))
        } else {
            self.parse_parameter(group, out)
        }
    }

    fn parse_parameter(&mut self, group: GroupHandle, out: &mut Vec<Statement>) -> PResult<()> {
        if self.is_word("default-lease-time") {
            self.bump();
            let n = self.expect_number()?;
            self.eat(Token::Semi)?;
            if let Some(g) = self.tree.groups.get_mut(group) {
                g.default_lease_time = Some(n as u32);
            }
        } else if self.is_word("max-lease-time") {
            self.bump();
            let n = self.expect_number()?;
            self.eat(Token::Semi)?;
            if let Some(g) = self.tree.groups.get_mut(group) {
                g.max_lease_time = Some(n as u32);
            }
        } else if self.is_word("authoritative") {
            self.bump();
            self.eat(Token::Semi)?;
            if let Some(g) = self.tree.groups.get_mut(group) {
                g.authoritative = Some(true);
            }
        } else if self.is_word("not") && matches!(self.peek2(), Token::Word(w) if w.eq_ignore_ascii_case("authoritative")) {
            self.bump();
            self.bump();
            self.eat(Token::Semi)?;
            if let Some(g) = self.tree.groups.get_mut(group) {
                g.authoritative = Some(false);
            }
        } else if self.is_word("ping-check") {
            self.bump();
            let v = self.expect_word()?;
            self.eat(Token::Semi)?;
            let b = match v.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                other => return Err(self.err(format!("expected true/false after ping-check, got `{other}`"))),
            };
            if let Some(g) = self.tree.groups.get_mut(group) {
                g.ping_check = Some(b);
            }
        } else if self.is_word("ping-timeout") {
            self.bump();
            let n = self.expect_number()?;
            self.eat(Token::Semi)?;
            if let Some(g) = self.tree.groups.get_mut(group) {
                g.ping_timeout = Some(n as u32);
            }
        } else if self.is_word("bootp-policy") {
            self.bump();
            let policy = self.expect_word()?;
            self.eat(Token::Semi)?;
            let policy = match policy.to_ascii_lowercase().as_str() {
                "accept" => BootpPolicy::Accept,
                "deny" => BootpPolicy::Deny,
                "prefer" => BootpPolicy::Prefer,
                other => return Err(self.err(format!("unknown bootp-policy `{other}`"))),
            };
            if let Some(g) = self.tree.groups.get_mut(group) {
                g.bootp_policy = Some(policy);
            }
        } else if self.is_word("option") {
            let stmt = self.parse_option_decl()?;
            if let Some(s) = stmt {
                out.push(s);
            }
        } else if self.is_word("default") || self.is_word("supersede") || self.is_word("prepend") || self.is_word("append") {
            out.push(self.parse_option_write()?);
        } else {
            out.push(self.parse_exec_stmt(group)?);
        }
        Ok(())
    }

    fn parse_exec_stmt(&mut self, group: GroupHandle) -> PResult<Statement> {
        if self.is_word("if") {
            self.parse_if_stmt(group)
        } else if self.is_word("set") {
            self.bump();
            let name = self.expect_word()?;
            self.eat(Token::Assign)?;
            let value = self.parse_expr()?;
            self.eat(Token::Semi)?;
            Ok(Statement::Set { name, value })
        } else if self.is_word("add") {
            self.bump();
            self.eat_word("class")?;
            let name = self.expect_string()?;
            self.eat(Token::Semi)?;
            Ok(Statement::AddClass(name))
        } else if self.is_word("break") {
            self.bump();
            self.eat(Token::Semi)?;
            Ok(Statement::Break)
        } else if self.is_word("return") {
            self.bump();
            self.eat(Token::Semi)?;
            Ok(Statement::Return)
        } else if self.is_word("on") {
            self.bump();
            let event = self.expect_word()?;
            self.eat(Token::LBrace)?;
            let body = self.parse_body(group, &Token::RBrace)?;
            self.eat(Token::RBrace)?;
            match event.to_ascii_lowercase().as_str() {
                "commit" => Ok(Statement::OnCommit(body)),
                "expiry" => Ok(Statement::OnExpiry(body)),
                "release" => Ok(Statement::OnRelease(body)),
                other => Err(self.err(format!("unknown `on` event `{other}`"))),
            }
        } else if self.is_word("ns-update") {
            self.bump();
            self.eat_word("key")?;
            let key = self.expect_string()?;
            self.eat_word("fqdn")?;
            let fqdn = self.parse_expr()?;
            self.eat_word("type")?;
            let rrtype = self.expect_number()? as u16;
            self.eat(Token::Semi)?;
            Ok(Statement::NsUpdate { key, fqdn, rrtype })
        } else if self.is_word("log") {
            self.bump();
            let priority = if self.is_word("info") {
                self.bump();
                expr::LogPriority::Info
            } else if self.is_word("fatal") {
                self.bump();
                expr::LogPriority::Fatal
            } else {
                self.eat_word("debug")?;
                expr::LogPriority::Debug
            };
            let message = self.parse_expr()?;
            self.eat(Token::Semi)?;
            Ok(Statement::Log { priority, message })
        } else if self.is_word("ignore") {
            self.bump();
            self.eat_word("if")?;
            let cond = self.parse_expr()?;
            self.eat(Token::Semi)?;
            Ok(Statement::IgnoreIf(cond))
        } else if self.is_word("eval") {
            self.bump();
            let e = self.parse_expr()?;
            self.eat(Token::Semi)?;
            Ok(Statement::Eval(e))
        } else {
            Err(self.err(format!("unexpected token `{}` in statement position", self.peek())))
        }
    }

    fn parse_if_stmt(&mut self, group: GroupHandle) -> PResult<Statement> {
        self.eat_word("if")?;
        let cond = self.parse_expr()?;
        self.eat(Token::LBrace)?;
        let then_branch = self.parse_body(group, &Token::RBrace)?;
        self.eat(Token::RBrace)?;
        let mut elsif_branches = Vec::new();
        let mut else_branch = Vec::new();
        loop {
            if self.is_word("elsif") {
                self.bump();
                let c = self.parse_expr()?;
                self.eat(Token::LBrace)?;
                let b = self.parse_body(group, &Token::RBrace)?;
                self.eat(Token::RBrace)?;
                elsif_branches.push((c, b));
            } else if self.is_word("else") {
                self.bump();
                self.eat(Token::LBrace)?;
                else_branch = self.parse_body(group, &Token::RBrace)?;
                self.eat(Token::RBrace)?;
                break;
            } else {
                break;
            }
        }
        Ok(Statement::If {
            cond,
            then_branch,
            elsif_branches,
            else_branch,
        })
    }

    /// `{default,supersede,prepend,append} option <universe.>name value-list;`
    fn parse_option_write(&mut self) -> PResult<Statement> {
        let write = match self.expect_word()?.to_ascii_lowercase().as_str() {
            "default" => expr::OptionWrite::Default,
            "supersede" => expr::OptionWrite::Supersede,
            "prepend" => expr::OptionWrite::Prepend,
            "append" => expr::OptionWrite::Append,
            other => return Err(self.err(format!("unknown option write mode `{other}`"))),
        };
        self.eat_word("option")?;
        let (universe, name) = self.parse_option_name()?;
        let code = self.resolve_option_code(&universe, &name)?;
        let value = self.parse_value_list()?;
        self.eat(Token::Semi)?;
        Ok(Statement::Option {
            write,
            universe,
            code,
            value,
        })
    }

    /// Bare `option <universe.>name (value-list | code N = type);`
    fn parse_option_decl(&mut self) -> PResult<Option<Statement>> {
        self.eat_word("option")?;
        let (universe, name) = self.parse_option_name()?;
        if self.is_word("code") {
            self.bump();
            let code = self.expect_number()? as u32;
            self.eat(Token::Assign)?;
            let ty = self.parse_option_type()?;
            self.eat(Token::Semi)?;
            self.options.register(&universe, &name, code, ty);
            return Ok(None);
        }
        let code = self.resolve_option_code(&universe, &name)?;
        let value = self.parse_value_list()?;
        self.eat(Token::Semi)?;
        Ok(Some(Statement::Option {
            write: expr::OptionWrite::Supersede,
            universe,
            code,
            value,
        }))
    }

    fn parse_option_name(&mut self) -> PResult<(String, String)> {
        let first = self.expect_word()?;
        if *self.peek() == Token::Dot {
            self.bump();
            let name = self.expect_word()?;
            Ok((first, name))
        } else {
            Ok(("dhcp".to_string(), first))
        }
    }

    fn resolve_option_code(&self, universe: &str, name: &str) -> PResult<u32> {
        if let Ok(n) = name.parse::<u32>() {
            return Ok(n);
        }
        self.options
            .lookup(universe, name)
            .map(|d| d.code)
            .ok_or_else(|| self.err(format!("unknown option `{universe}.{name}`; declare it with `option {name} code N = <type>;` first")))
    }

    fn parse_option_type(&mut self) -> PResult<OptionType> {
        if self.is_word("boolean") {
            self.bump();
            Ok(OptionType::Boolean)
        } else if self.is_word("ip-address") {
            self.bump();
            Ok(OptionType::IpAddress)
        } else if self.is_word("text") {
            self.bump();
            Ok(OptionType::Text)
        } else if self.is_word("string") {
            self.bump();
            Ok(OptionType::String)
        } else if self.is_word("array") {
            self.bump();
            self.eat_word("of")?;
            let inner = self.parse_option_type()?;
            Ok(OptionType::ArrayOf(Box::new(inner)))
        } else if self.is_word("signed") {
            self.bump();
            self.eat_word("integer")?;
            let w = self.expect_number()? as u8;
            Ok(OptionType::SignedInteger(w))
        } else if self.is_word("unsigned") {
            self.bump();
            self.eat_word("integer")?;
            let w = self.expect_number()? as u8;
            Ok(OptionType::UnsignedInteger(w))
        } else if self.is_word("integer") {
            self.bump();
            let w = self.expect_number()?;
            match w {
                8 => Ok(OptionType::Integer8),
                16 => Ok(OptionType::Integer16),
                32 => Ok(OptionType::Integer32),
                other => Err(self.err(format!("unsupported integer width {other}"))),
            }
        } else if *self.peek() == Token::LBrace {
            self.bump();
            let mut fields = Vec::new();
            loop {
                fields.push(self.parse_option_type()?);
                if *self.peek() == Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
            self.eat(Token::RBrace)?;
            Ok(OptionType::Record(fields))
        } else {
            Err(self.err(format!("unexpected token `{}` in option type", self.peek())))
        }
    }

    /// A comma-separated list of values, folded into a single `Expr` via
    /// `Concat` (options with more than one value are carried on the wire
    /// as their concatenated encoding).
    fn parse_value_list(&mut self) -> PResult<Expr> {
        let mut values = vec![self.parse_expr()?];
        while *self.peek() == Token::Comma {
            self.bump();
            values.push(self.parse_expr()?);
        }
        let mut iter = values.into_iter();
        let mut acc = iter.next().unwrap();
        for v in iter {
            acc = Expr::Concat(Box::new(acc), Box::new(v));
        }
        Ok(acc)
    }

    // ---- expression grammar: or -> and -> not -> equality -> primary ----

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.is_word("or") {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.is_word("and") {
            self.bump();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.is_word("not") {
            self.bump();
            let e = self.parse_not()?;
            Ok(Expr::Not(Box::new(e)))
        } else {
            self.parse_equality()
        }
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let lhs = self.parse_primary()?;
        if *self.peek() == Token::Eq {
            self.bump();
            let rhs = self.parse_primary()?;
            Ok(Expr::Equal(Box::new(lhs), Box::new(rhs)))
        } else if *self.peek() == Token::NotEq {
            self.bump();
            let rhs = self.parse_primary()?;
            Ok(Expr::NotEqual(Box::new(lhs), Box::new(rhs)))
        } else {
            Ok(lhs)
        }
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.eat(Token::LParen)?;
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            loop {
                args.push(self.parse_expr()?);
                if *self.peek() == Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.eat(Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Token::LParen => {
                self.bump();
                let e = self.parse_expr()?;
                self.eat(Token::RParen)?;
                Ok(e)
            }
            Token::Number(n) => {
                self.bump();
                if *self.peek() == Token::Dot {
                    // dotted-quad ip literal: each octet is decimal here,
                    // unlike a MAC/UID octet.
                    let mut bytes = vec![n.parse().map_err(|_| self.err(format!("`{n}` is not a valid ip octet")))?];
                    while *self.peek() == Token::Dot {
                        self.bump();
                        bytes.push(self.expect_number()? as u8);
                    }
                    Ok(Expr::ConstData(expr::Data::new(bytes)))
                } else {
                    let v: u64 = n.parse().map_err(|_| self.err(format!("`{n}` out of range")))?;
                    Ok(Expr::ConstInt(v))
                }
            }
            Token::Str(s) => {
                self.bump();
                Ok(Expr::ConstData(expr::Data::text(s)))
            }
            Token::Word(w) => self.parse_keyword_primary(&w),
            other => Err(self.err(format!("unexpected token `{other}` in expression"))),
        }
    }

    fn parse_keyword_primary(&mut self, w: &str) -> PResult<Expr> {
        let lw = w.to_ascii_lowercase();
        match lw.as_str() {
            "true" => {
                self.bump();
                Ok(Expr::ConstBool(true))
            }
            "false" => {
                self.bump();
                Ok(Expr::ConstBool(false))
            }
            "known" => {
                self.bump();
                Ok(Expr::Known)
            }
            "static" => {
                self.bump();
                Ok(Expr::Static)
            }
            "hardware" => {
                self.bump();
                Ok(Expr::Hardware)
            }
            "leased-address" => {
                self.bump();
                Ok(Expr::LeasedAddress)
            }
            "host-decl-name" => {
                self.bump();
                Ok(Expr::HostDeclName)
            }
            "exists" => {
                self.bump();
                let (universe, name) = self.parse_option_name()?;
                let code = self.resolve_option_code(&universe, &name)?;
                Ok(Expr::Exists { universe, code })
            }
            "option" => {
                self.bump();
                let (universe, name) = self.parse_option_name()?;
                let code = self.resolve_option_code(&universe, &name)?;
                Ok(Expr::Option { universe, code })
            }
            "config-option" => {
                self.bump();
                let (universe, name) = self.parse_option_name()?;
                let code = self.resolve_option_code(&universe, &name)?;
                Ok(Expr::ConfigOption { universe, code })
            }
            "substring" => {
                self.bump();
                let mut args = self.parse_args()?;
                if args.len() != 3 {
                    return Err(self.err("substring() takes 3 arguments"));
                }
                let len = args.pop().unwrap();
                let off = args.pop().unwrap();
                let data = args.pop().unwrap();
                Ok(Expr::Substring(Box::new(data), Box::new(off), Box::new(len)))
            }
            "suffix" => {
                self.bump();
                let mut args = self.parse_args()?;
                if args.len() != 2 {
                    return Err(self.err("suffix() takes 2 arguments"));
                }
                let len = args.pop().unwrap();
                let data = args.pop().unwrap();
                Ok(Expr::Suffix(Box::new(data), Box::new(len)))
            }
            "concat" => {
                self.bump();
                let args = self.parse_args()?;
                let mut it = args.into_iter();
                let first = it.next().ok_or_else(|| self.err("concat() needs at least one argument"))?;
                Ok(it.fold(first, |acc, v| Expr::Concat(Box::new(acc), Box::new(v))))
            }
            "pick-first-value" => {
                self.bump();
                let args = self.parse_args()?;
                Ok(Expr::PickFirstValue(args))
            }
            "packet" => {
                self.bump();
                let mut args = self.parse_args()?;
                if args.len() != 2 {
                    return Err(self.err("packet() takes 2 arguments"));
                }
                let len = args.pop().unwrap();
                let off = args.pop().unwrap();
                Ok(Expr::Packet {
                    offset: Box::new(off),
                    len: Box::new(len),
                })
            }
            "encode-int8" => self.parse_unary_fn(Expr::EncodeInt8),
            "encode-int16" => self.parse_unary_fn(Expr::EncodeInt16),
            "encode-int32" => self.parse_unary_fn(Expr::EncodeInt32),
            "extract-int8" => self.parse_unary_fn(Expr::ExtractInt8),
            "extract-int16" => self.parse_unary_fn(Expr::ExtractInt16),
            "extract-int32" => self.parse_unary_fn(Expr::ExtractInt32),
            "binary-to-ascii" => {
                self.bump();
                let mut args = self.parse_args()?;
                if args.len() != 4 {
                    return Err(self.err("binary-to-ascii() takes 4 arguments"));
                }
                let buf = args.pop().unwrap();
                let sep = args.pop().unwrap();
                let width = args.pop().unwrap();
                let base = args.pop().unwrap();
                Ok(Expr::BinaryToAscii {
                    base: Box::new(base),
                    width: Box::new(width),
                    separator: Box::new(sep),
                    buf: Box::new(buf),
                })
            }
            "reverse" => {
                self.bump();
                let mut args = self.parse_args()?;
                if args.len() != 2 {
                    return Err(self.err("reverse() takes 2 arguments"));
                }
                let buf = args.pop().unwrap();
                let width = args.pop().unwrap();
                Ok(Expr::Reverse {
                    width: Box::new(width),
                    buf: Box::new(buf),
                })
            }
            "gethostbyname" => {
                self.bump();
                self.eat(Token::LParen)?;
                let name = self.expect_string()?;
                self.eat(Token::RParen)?;
                Ok(Expr::GetHostByName(name))
            }
            "ns-update" => {
                self.bump();
                self.eat(Token::LParen)?;
                let key = self.expect_string()?;
                self.eat(Token::RParen)?;
                Ok(Expr::NsUpdate(key))
            }
            "make-limit" => {
                self.bump();
                self.eat(Token::LParen)?;
                let e = self.parse_expr()?;
                self.eat(Token::Comma)?;
                let limit = self.expect_number()? as usize;
                self.eat(Token::RParen)?;
                Ok(Expr::MakeLimit(Box::new(e), limit))
            }
            _ => Err(self.err(format!("unknown identifier `{w}` in expression position"))),
        }
    }

    fn parse_unary_fn(&mut self, ctor: impl FnOnce(Box<Expr>) -> Expr) -> PResult<Expr> {
        self.bump();
        self.eat(Token::LParen)?;
        let e = self.parse_expr()?;
        self.eat(Token::RParen)?;
        Ok(ctor(Box::new(e)))
    }

    // ---- declarations ----

    fn parse_host_decl(&mut self, parent: GroupHandle) -> PResult<()> {
        self.eat_word("host")?;
        let name = self.expect_word()?;
        let group_handle = self.tree.groups.alloc(Group::child_of(parent));
        self.eat(Token::LBrace)?;
        let mut interface = None;
        let mut client_identifier = None;
        let mut fixed_addr = None;
        let mut flags = HostFlags::new(HostFlags::STATIC);
        let mut stmts = Vec::new();
        while *self.peek() != Token::RBrace {
            if self.is_word("hardware") {
                self.bump();
                self.eat_word("ethernet")?;
                let mac = self.parse_mac()?;
                self.eat(Token::Semi)?;
                interface = Some(mac);
            } else if self.is_word("fixed-address") {
                self.bump();
                fixed_addr = Some(self.parse_value_list()?);
                self.eat(Token::Semi)?;
            } else if self.is_word("client-identifier") {
                self.bump();
                let v = self.parse_expr()?;
                self.eat(Token::Semi)?;
                if let Expr::ConstData(d) = v {
                    client_identifier = Some(d.bytes.clone());
                }
            } else if self.is_word("deleted") {
                self.bump();
                self.eat(Token::Semi)?;
                flags.set(HostFlags::DELETED, true);
            } else if self.is_word("dynamic") {
                self.bump();
                self.eat(Token::Semi)?;
                flags.set(HostFlags::DYNAMIC, true);
            } else {
                self.parse_statement(group_handle, &mut stmts)?;
            }
        }
        self.eat(Token::RBrace)?;
        if let Some(g) = self.tree.groups.get_mut(group_handle) {
            g.statements = stmts;
        }
        self.tree.hosts.alloc(HostDecl {
            name,
            interface,
            client_identifier,
            fixed_addr,
            group: group_handle,
            flags,
            n_hw: None,
            n_uid: None,
            n_name: None,
        });
        Ok(())
    }

    fn parse_mac(&mut self) -> PResult<Vec<u8>> {
        let mut bytes = vec![self.expect_hex_octet()?];
        while *self.peek() == Token::Colon {
            self.bump();
            bytes.push(self.expect_hex_octet()?);
        }
        Ok(bytes)
    }

    fn parse_group_decl(&mut self, parent: GroupHandle) -> PResult<()> {
        self.eat_word("group")?;
        if let Token::Str(_) = self.peek() {
            self.bump();
        }
        let handle = self.tree.groups.alloc(Group::child_of(parent));
        self.eat(Token::LBrace)?;
        let stmts = self.parse_body(handle, &Token::RBrace)?;
        self.eat(Token::RBrace)?;
        if let Some(g) = self.tree.groups.get_mut(handle) {
            g.statements = stmts;
        }
        Ok(())
    }

    fn parse_shared_network_decl(&mut self, parent: GroupHandle) -> PResult<()> {
        self.eat_word("shared-network")?;
        let name = self.expect_word()?;
        let group_handle = self.tree.groups.alloc(Group::child_of(parent));
        let net = SharedNetwork {
            name,
            subnets: Vec::new(),
            pools: Vec::new(),
            group: group_handle,
            interface: None,
        };
        let (net_id, net_handle) = self.tree.alloc_shared_network(net);
        let group_id = self.tree.group_id_for(group_handle);
        self.eat(Token::LBrace)?;
        let mut stmts = Vec::new();
        while *self.peek() != Token::RBrace {
            if self.is_word("subnet") {
                self.parse_subnet_in_shared_network(group_handle, net_id, net_handle)?;
            } else if self.is_word("pool") {
                self.parse_pool_decl(group_handle, group_id, net_id)?;
            } else if self.is_word("interface") {
                self.bump();
                let ifname = self.expect_word()?;
                self.eat(Token::Semi)?;
                if let Some(n) = self.tree.shared_networks.get_mut(net_handle) {
                    n.interface = Some(ifname);
                }
            } else {
                self.parse_statement(group_handle, &mut stmts)?;
            }
        }
        self.eat(Token::RBrace)?;
        if let Some(g) = self.tree.groups.get_mut(group_handle) {
            g.statements = stmts;
        }
        Ok(())
    }


    fn parse_bare_subnet_decl(&mut self, parent: GroupHandle) -> PResult<()> {
        // A subnet declared outside `shared-network` gets an implicit one
        // wrapping just itself, matching the original behavior of treating
        // every subnet as belonging to *some* shared network.
        let implicit_group = self.tree.groups.alloc(Group::child_of(parent));
        let net = SharedNetwork {
            name: String::new(),
            subnets: Vec::new(),
            pools: Vec::new(),
            group: implicit_group,
            interface: None,
        };
        let (net_id, net_handle) = self.tree.alloc_shared_network(net);
        self.parse_subnet_in_shared_network(parent, net_id, net_handle)
    }

    fn parse_subnet_in_shared_network(
        &mut self,
        parent: GroupHandle,
        net_id: SharedNetworkId,
        net_handle: group::SharedNetworkHandle,
    ) -> PResult<()> {
        self.eat_word("subnet")?;
        let net_addr = self.expect_ip()?;
        self.eat_word("netmask")?;
        let netmask = self.expect_ip()?;
        let sub_group = self.tree.groups.alloc(Group::child_of(parent));
        let subnet = Subnet {
            net: net_addr,
            netmask,
            shared_network: net_handle,
            group: sub_group,
        };
        let subnet_handle = self.tree.subnets.alloc(subnet);
        if let Some(n) = self.tree.shared_networks.get_mut(net_handle) {
            group::insert_subnet_sorted(&self.tree.subnets, &mut n.subnets, subnet_handle);
        }
        let group_id = self.tree.group_id_for(sub_group);
        self.eat(Token::LBrace)?;
        let mut stmts = Vec::new();
        while *self.peek() != Token::RBrace {
            if self.is_word("range") {
                self.parse_range_decl(sub_group, group_id, net_id)?;
            } else if self.is_word("pool") {
                self.parse_pool_decl(sub_group, group_id, net_id)?;
            } else {
                self.parse_statement(sub_group, &mut stmts)?;
            }
        }
        self.eat(Token::RBrace)?;
        if let Some(g) = self.tree.groups.get_mut(sub_group) {
            g.statements = stmts;
        }
        Ok(())
    }

    /// A bare `range lo hi;` inside a subnet (no enclosing `pool { }`)
    /// implicitly allocates one pool per subnet to hold it.
    fn parse_range_decl(&mut self, group: GroupHandle, group_id: GroupId, net_id: SharedNetworkId) -> PResult<()> {
        self.eat_word("range")?;
        let lo = self.expect_ip()?;
        let hi = self.expect_ip()?;
        self.eat(Token::Semi)?;
        let pool = self.db.alloc_pool(group_id, net_id);
        self.db.populate_range(pool, lo, hi);
        if let Some(net_handle) = self.tree.shared_network_ids.get(&net_id).copied() {
            if let Some(n) = self.tree.shared_networks.get_mut(net_handle) {
                n.pools.push(pool);
            }
        }
        let _ = group;
        Ok(())
    }

    fn parse_pool_decl(&mut self, group: GroupHandle, group_id: GroupId, net_id: SharedNetworkId) -> PResult<()> {
        self.eat_word("pool")?;
        let pool = self.db.alloc_pool(group_id, net_id);
        if let Some(net_handle) = self.tree.shared_network_ids.get(&net_id).copied() {
            if let Some(n) = self.tree.shared_networks.get_mut(net_handle) {
                n.pools.push(pool);
            }
        }
        self.eat(Token::LBrace)?;
        let mut stmts = Vec::new();
        while *self.peek() != Token::RBrace {
            if self.is_word("range") {
                self.bump();
                let lo = self.expect_ip()?;
                let hi = self.expect_ip()?;
                self.eat(Token::Semi)?;
                self.db.populate_range(pool, lo, hi);
            } else if self.is_word("allow") || self.is_word("deny") {
                let deny = self.is_word("deny");
                self.bump();
                let cond = self.parse_expr()?;
                self.eat(Token::Semi)?;
                if let Some(p) = self.db.pool_mut(pool) {
                    if deny {
                        p.prohibit_list.push(cond);
                    } else {
                        p.permit_list.push(cond);
                    }
                }
            } else if self.is_word("failover") {
                self.bump();
                self.eat_word("peer")?;
                let _name = self.expect_string()?;
                self.eat(Token::Semi)?;
                if let Some(p) = self.db.pool_mut(pool) {
                    p.failover_peer = Some(FailoverPeerId(0));
                }
            } else {
                self.parse_statement(group, &mut stmts)?;
            }
        }
        self.eat(Token::RBrace)?;
        if let Some(g) = self.tree.groups.get_mut(group) {
            g.statements.extend(stmts);
        }
        Ok(())
    }

    fn parse_class_decl(&mut self, parent: GroupHandle) -> PResult<()> {
        self.eat_word("class")?;
        let name = self.expect_string()?;
        let group_handle = self.tree.groups.alloc(Group::child_of(parent));
        self.eat(Token::LBrace)?;
        let mut match_expr = None;
        let mut spawn_with = None;
        let mut lease_limit = None;
        let mut stmts = Vec::new();
        while *self.peek() != Token::RBrace {
            if self.is_word("match") {
                self.bump();
                if self.is_word("if") {
                    self.bump();
                }
                match_expr = Some(self.parse_expr()?);
                self.eat(Token::Semi)?;
            } else if self.is_word("spawn") {
                self.bump();
                self.eat_word("with")?;
                spawn_with = Some(self.parse_expr()?);
                self.eat(Token::Semi)?;
            } else if self.is_word("lease") {
                self.bump();
                self.eat_word("limit")?;
                lease_limit = Some(self.expect_number()? as u32);
                self.eat(Token::Semi)?;
            } else {
                self.parse_statement(group_handle, &mut stmts)?;
            }
        }
        self.eat(Token::RBrace)?;
        if let Some(g) = self.tree.groups.get_mut(group_handle) {
            g.statements = stmts;
        }
        self.tree.classes.alloc(Class {
            name,
            match_expr,
            spawn_with,
            lease_limit,
            billed_leases: Vec::new(),
            group: group_handle,
            subclasses: std::collections::HashMap::new(),
        });
        Ok(())
    }

    fn parse_subclass_decl(&mut self, _parent: GroupHandle) -> PResult<()> {
        self.eat_word("subclass")?;
        let class_name = self.expect_string()?;
        let submatch = self.expect_string()?;
        self.eat(Token::Semi)?;
        let parent_handle = self
            .tree
            .classes
            .iter()
            .find(|(_, c)| c.name == class_name)
            .map(|(h, _)| h);
        if let Some(parent_handle) = parent_handle {
            let parent_group = self.tree.classes.get(parent_handle).map(|c| c.group);
            if let Some(parent_group) = parent_group {
                let sub_group = self.tree.groups.alloc(Group::child_of(parent_group));
                let sub = Class {
                    name: format!("{class_name}:{submatch}"),
                    match_expr: None,
                    spawn_with: None,
                    lease_limit: None,
                    billed_leases: Vec::new(),
                    group: sub_group,
                    subclasses: std::collections::HashMap::new(),
                };
                let sub_handle = self.tree.classes.alloc(sub);
                if let Some(parent) = self.tree.classes.get_mut(parent_handle) {
                    parent.subclasses.insert(submatch.into_bytes(), sub_handle);
                }
            }
        }
        Ok(())
    }
}

/// Parse a complete `dhcpd.conf`-style document.
pub fn parse_config(source: &str) -> PResult<(GroupTree, LeaseDb, OptionRegistry, GroupHandle)> {
    Parser::new(source).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_subnet_with_range_and_host() {
        let src = r#"
            default-lease-time 600;
            max-lease-time 7200;
            authoritative;

            subnet 192.0.2.0 netmask 255.255.255.0 {
                option routers 192.0.2.1;
                range 192.0.2.10 192.0.2.20;
            }

            host printer {
                hardware ethernet 52:54:00:12:34:56;
                fixed-address 192.0.2.5;
            }
        "#;
        let (tree, db, _options, root) = parse_config(src).expect("parses");
        assert_eq!(tree.groups.get(root).unwrap().default_lease_time, Some(600));
        assert_eq!(tree.groups.get(root).unwrap().authoritative, Some(true));
        assert_eq!(tree.subnets.len(), 1);
        assert_eq!(tree.hosts.len(), 1);
        let (_, host) = tree.hosts.iter().next().unwrap();
        assert_eq!(host.name, "printer");
        assert_eq!(host.interface, Some(vec![0x52, 0x54, 0x00, 0x12, 0x34, 0x56]));
        // the bare `range` made one implicit pool with 11 addresses (.10..=.20)
        assert_eq!(db.pool_count(), 1);
        assert_eq!(db.lease_count(), 11);
    }

    #[test]
    fn parses_ping_check_and_timeout() {
        let src = r#"
            ping-check true;
            ping-timeout 2;
        "#;
        let (tree, _db, _options, root) = parse_config(src).expect("parses");
        let g = tree.groups.get(root).unwrap();
        assert_eq!(g.ping_check, Some(true));
        assert_eq!(g.ping_timeout, Some(2));
        assert!(group::resolve_ping_check(&tree.groups, root));
        assert_eq!(group::resolve_ping_timeout(&tree.groups, root), Some(2));
    }

    #[test]
    fn ping_check_defaults_to_on_when_unset() {
        let src = "authoritative;";
        let (tree, _db, _options, root) = parse_config(src).expect("parses");
        assert!(group::resolve_ping_check(&tree.groups, root));
        assert_eq!(group::resolve_ping_timeout(&tree.groups, root), None);
    }

    #[test]
    fn collects_gethostbyname_calls_from_nested_statements() {
        let src = r#"
            if static {
                set a = gethostbyname("a.example.com");
            } else {
                set b = gethostbyname("b.example.com");
            }
            subnet 192.0.2.0 netmask 255.255.255.0 {
                set c = gethostbyname("a.example.com");
            }
        "#;
        let (tree, _db, _options, root) = parse_config(src).expect("parses");
        let names = group::collect_chain_hostnames(&tree.groups, root);
        assert_eq!(names, vec!["a.example.com".to_string(), "b.example.com".to_string()]);
    }

    #[test]
    fn rejects_unknown_option_name() {
        let src = "subnet 192.0.2.0 netmask 255.255.255.0 { option bogus-thing 1; }";
        assert!(parse_config(src).is_err());
    }

    #[test]
    fn malformed_match_clause_is_rejected() {
        let src = r#"
            class "foo" {
                match if option host-name == "a" {
                };
            }
        "#;
        // deliberately malformed (`match` takes an expression, not a
        // block) to confirm the parser reports rather than panics
        assert!(parse_config(src).is_err());
    }

    #[test]
    fn option_code_declaration_then_use() {
        let src = r#"
            option foo code 150 = ip-address;
            subnet 192.0.2.0 netmask 255.255.255.0 {
                option foo 192.0.2.9;
            }
        "#;
        let (_tree, _db, options, _root) = parse_config(src).expect("parses");
        assert!(options.lookup("dhcp", "foo").is_some());
    }
}
