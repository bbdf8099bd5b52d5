//! The lexer shared by `dhcpd.conf` and lease-file parsing.
//!
//! Keywords are not a distinct token kind -- they're `Word`s the parser
//! compares case-insensitively, matching the "keywords are interned" note
//! in the grammar. The lexer keeps a two-line buffer pair, alternating by
//! parity of the physical line number, so a diagnostic can quote the exact
//! source line a token began on without re-reading the file.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// NUMBER_OR_NAME / NAME: an identifier, keyword, or bare hex/dec digit
    /// run. The parser decides which grammar position it fills.
    Word(String),
    /// a run of pure ASCII digits. Kept as text, not a parsed value: the
    /// grammar reads the same digit run as decimal in most positions
    /// (`lease limit 4`) but as hex in others (MAC/UID octets), so only
    /// the parser knows which base applies.
    Number(String),
    /// a double-quoted string, with `\"` and `\\` escapes resolved.
    Str(String),
    Semi,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    Slash,
    Assign,
    Eq,
    NotEq,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{w}"),
            Token::Number(n) => write!(f, "{n}"),

            Token::Str(s) => write!(f, "{s:?}"),
            Token::Semi => write!(f, ";"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Colon => write!(f, ":"),
            Token::Slash => write!(f, "/"),
            Token::Assign => write!(f, "="),
            Token::Eq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Eof => write!(f, "<eof>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub pos: Pos,
}

/// Two alternating line buffers, keyed by `line_number % 2`, so a
/// diagnostic about the current or immediately preceding line can quote it
/// without retaining the whole file.
#[derive(Debug, Default)]
struct LineBufferPair {
    buffers: [String; 2],
}

impl LineBufferPair {
    fn store(&mut self, line_no: usize, text: &str) {
        self.buffers[line_no % 2] = text.to_string();
    }

    fn get(&self, line_no: usize) -> &str {
        &self.buffers[line_no % 2]
    }
}

pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    line_start: usize,
    lines: LineBufferPair,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            line_start: 0,
            lines: LineBufferPair::default(),
        }
    }

    /// The text of the source line a token beginning at `pos.line` started
    /// on, for diagnostic quoting.
    pub fn line_text(&self, line: usize) -> &str {
        self.lines.get(line)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.lines.store(self.line, std::str::from_utf8(&self.input[self.line_start..self.pos.saturating_sub(1)]).unwrap_or(""));
            self.line += 1;
            self.col = 1;
            self.line_start = self.pos;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'#') => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.input.get(self.pos + 1) == Some(&b'/') => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Spanned {
        self.skip_trivia();
        let pos = Pos {
            line: self.line,
            col: self.col,
        };
        let Some(b) = self.peek_byte() else {
            return Spanned {
                token: Token::Eof,
                pos,
            };
        };

        let token = match b {
            b';' => {
                self.bump();
                Token::Semi
            }
            b'{' => {
                self.bump();
                Token::LBrace
            }
            b'}' => {
                self.bump();
                Token::RBrace
            }
            b'(' => {
                self.bump();
                Token::LParen
            }
            b')' => {
                self.bump();
                Token::RParen
            }
            b',' => {
                self.bump();
                Token::Comma
            }
            b':' => {
                self.bump();
                Token::Colon
            }
            b'/' => {
                self.bump();
                Token::Slash
            }
            b'.' => {
                self.bump();
                Token::Dot
            }
            b'=' => {
                self.bump();
                if self.peek_byte() == Some(b'=') {
                    self.bump();
                    Token::Eq
                } else {
                    Token::Assign
                }
            }
            b'!' if self.input.get(self.pos + 1) == Some(&b'=') => {
                self.bump();
                self.bump();
                Token::NotEq
            }
            b'"' => self.lex_string(),
            b'0'..=b'9' => self.lex_word_or_number(),
            _ if is_ident_start(b) => self.lex_word_or_number(),
            _ => {
                // unrecognized byte: consume it and surface as a one-char word
                // so the parser's recovery (skip to `;`/`}`) can proceed.
                self.bump();
                Token::Word((b as char).to_string())
            }
        };
        Spanned { token, pos }
    }

    fn lex_string(&mut self) -> Token {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.peek_byte() {
                None | Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    match self.peek_byte() {
                        Some(b'"') => {
                            s.push('"');
                            self.bump();
                        }
                        Some(b'\\') => {
                            s.push('\\');
                            self.bump();
                        }
                        Some(b'n') => {
                            s.push('\n');
                            self.bump();
                        }
                        Some(other) => {
                            s.push(other as char);
                            self.bump();
                        }
                        None => break,
                    }
                }
                Some(b) => {
                    s.push(b as char);
                    self.bump();
                }
            }
        }
        Token::Str(s)
    }

    fn lex_word_or_number(&mut self) -> Token {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if is_ident_continue(b) {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("");
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            Token::Number(text.to_string())
        } else {
            Token::Word(text.to_string())
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'-'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Two-token-lookahead stream over the lexer, the shape the parser needs
/// for `if (` vs `if` or `option foo.bar` vs `option foo`.
pub struct TokenStream<'a> {
    lexer: Lexer<'a>,
    lookahead: [Spanned; 2],
}

impl<'a> TokenStream<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let first = lexer.next_token();
        let second = lexer.next_token();
        TokenStream {
            lexer,
            lookahead: [first, second],
        }
    }

    pub fn peek(&self) -> &Token {
        &self.lookahead[0].token
    }

    pub fn peek2(&self) -> &Token {
        &self.lookahead[1].token
    }

    pub fn pos(&self) -> Pos {
        self.lookahead[0].pos
    }

    pub fn line_text(&self, line: usize) -> &str {
        self.lexer.line_text(line)
    }

    pub fn advance(&mut self) -> Spanned {
        let next = self.lexer.next_token();
        let consumed = std::mem::replace(&mut self.lookahead[0], std::mem::replace(&mut self.lookahead[1], next));
        consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_hardware_ethernet_line() {
        let mut ts = TokenStream::new("hardware ethernet 52:54:00:12:34:56;");
        let mut words = Vec::new();
        loop {
            let t = ts.advance();
            if t.token == Token::Eof {
                break;
            }
            words.push(t.token);
        }
        assert_eq!(
            words,
            vec![
                Token::Word("hardware".into()),
                Token::Word("ethernet".into()),
                Token::Number("52".into()),
                Token::Colon,
                Token::Number("54".into()),
                Token::Colon,
                Token::Number("00".into()),
                Token::Colon,
                Token::Number("12".into()),
                Token::Colon,
                Token::Number("34".into()),
                Token::Colon,
                Token::Number("56".into()),
                Token::Semi,
            ]
        );
    }

    #[test]
    fn two_token_lookahead_works() {
        let ts = TokenStream::new("option foo.bar");
        assert_eq!(ts.peek(), &Token::Word("option".into()));
        assert_eq!(ts.peek2(), &Token::Word("foo".into()));
    }

    #[test]
    fn string_escapes_resolve() {
        let mut ts = TokenStream::new(r#""a\"b";"#);
        let t = ts.advance();
        assert_eq!(t.token, Token::Str("a\"b".into()));
    }

    #[test]
    fn line_buffer_pair_quotes_prior_line() {
        let mut ts = TokenStream::new("host a {\n  hardware ethernet 1;\n}\n");
        for _ in 0..6 {
            ts.advance();
        }
        assert!(ts.line_text(2).contains("hardware"));
    }
}
