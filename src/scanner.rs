//! Module `scanner` implements a one‑pass, streaming lexer for the
//! JavaScript subset understood by the engine.
//!
//! It transforms a `&str` source into a sequence of `Token<'a>`s, skipping
//! whitespace and comments, and emitting exactly one `EOF` token at the end.
//! Designed as a `FusedIterator`, it can be chained safely with other
//! iterator adapters.
//!
//! # Public API
//!
//! - `Scanner::new(src: &'a str) -> Scanner<'a>`
//!   Create a new lexer over the input text.
//!
//! - `impl Iterator for Scanner<'a>`
//!   Yields `Result<Token<'a>, EngineError>` on each `.next()`.
//!
//! - `scan_all(src)` collects the whole stream, stopping at the first error.
//!
//! # Token Recognition
//!
//! - Punctuators, including the three‑character `===` / `!==`.
//! - String literals with `'` or `"` quotes; escapes are decoded into the
//!   token payload.  A raw newline inside a literal is an error.
//! - Numeric literals: decimal with optional fraction/exponent, or `0x` hex.
//! - Identifiers/keywords: `[A-Za-z_$][A-Za-z0-9_$]*`, resolved via a
//!   perfect‑hash `KEYWORDS` map.
//! - Comments: `//` to end of line and `/* … */`, skipped with `memchr`.

use crate::error::{EngineError, Result};
use crate::token::{StrLit, Token, TokenType};
use log::{debug, info};
use memchr::{memchr, memchr_iter, memmem};
use phf::phf_map;
use std::iter::FusedIterator;

// ─────────────────────────────────────────────────────────────────────────────
// Static keyword map (compile‑time perfect hash)
// ─────────────────────────────────────────────────────────────────────────────

static KEYWORDS: phf::Map<&'static [u8], TokenType> = phf_map! {
    b"break"    => TokenType::BREAK,
    b"catch"    => TokenType::CATCH,
    b"const"    => TokenType::CONST,
    b"continue" => TokenType::CONTINUE,
    b"delete"   => TokenType::DELETE,
    b"else"     => TokenType::ELSE,
    b"false"    => TokenType::FALSE,
    b"finally"  => TokenType::FINALLY,
    b"for"      => TokenType::FOR,
    b"function" => TokenType::FUNCTION,
    b"if"       => TokenType::IF,
    b"let"      => TokenType::LET,
    b"null"     => TokenType::NULL,
    b"return"   => TokenType::RETURN,
    b"this"     => TokenType::THIS,
    b"throw"    => TokenType::THROW,
    b"true"     => TokenType::TRUE,
    b"try"      => TokenType::TRY,
    b"typeof"   => TokenType::TYPEOF,
    b"var"      => TokenType::VAR,
    b"while"    => TokenType::WHILE,
    b"with"     => TokenType::WITH,
};

/// A single pass **scanner / lexer** that converts source text into a
/// sequence of [`Token`]s.  The lifetime `'a` ties every emitted token's
/// `lexeme` slice back to the original source buffer.
pub struct Scanner<'a> {
    text: &'a str,              // entire source, for lexeme slicing
    src: &'a [u8],              // same buffer viewed as bytes
    start: usize,               // index of the *first* byte of the current lexeme
    curr: usize,                // index *one past* the last byte examined
    line: usize,                // 1‑based line counter (\n increments)
    pending: Option<TokenType>, // recognised token kind waiting to be emitted
}

impl<'a> Scanner<'a> {
    /// Create a new lexer over `text`.
    #[inline]
    pub fn new(text: &'a str) -> Self {
        info!("Scanner created over {} bytes", text.len());

        Self {
            text,
            src: text.as_bytes(),
            start: 0,
            curr: 0,
            line: 1,
            pending: None,
        }
    }

    // ───────────────────────────── primitive helpers ────────────────────────

    #[inline(always)]
    const fn len(&self) -> usize {
        self.src.len()
    }

    #[inline(always)]
    fn is_at_end(&self) -> bool {
        self.curr >= self.len()
    }

    /// Advance one byte and return it.  Callers guard with [`is_at_end`].
    #[inline(always)]
    fn advance(&mut self) -> u8 {
        let b = self.src[self.curr];
        self.curr += 1;
        b
    }

    /// Peek at the current byte without consuming it.  Returns `0` past EOF.
    #[inline(always)]
    fn peek(&self) -> u8 {
        self.src.get(self.curr).copied().unwrap_or(0)
    }

    /// Peek one byte beyond [`peek`].  Safe at EOF.
    #[inline(always)]
    fn peek_next(&self) -> u8 {
        self.src.get(self.curr + 1).copied().unwrap_or(0)
    }

    /// Conditionally consume a byte **iff** it matches `expected`.
    #[inline(always)]
    fn match_byte(&mut self, expected: u8) -> bool {
        if !self.is_at_end() && self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    /// `op`, `op=` pairs such as `*` / `*=`.
    #[inline(always)]
    fn with_equal(&mut self, plain: TokenType, assign: TokenType) -> TokenType {
        if self.match_byte(b'=') {
            assign
        } else {
            plain
        }
    }

    // ───────────────────────────── core lexing ─────────────────────────────

    /// Scan a *single* token starting at `self.curr`.  Whitespace and
    /// comments are skipped by returning `Ok(())` with `pending = None`.
    fn scan_token(&mut self) -> Result<()> {
        let b = self.advance();

        let tt = match b {
            // ── single‑character punctuators ──────────────────────────────
            b'(' => TokenType::LEFT_PAREN,
            b')' => TokenType::RIGHT_PAREN,
            b'{' => TokenType::LEFT_BRACE,
            b'}' => TokenType::RIGHT_BRACE,
            b'[' => TokenType::LEFT_BRACKET,
            b']' => TokenType::RIGHT_BRACKET,
            b',' => TokenType::COMMA,
            b';' => TokenType::SEMICOLON,
            b':' => TokenType::COLON,
            b'?' => TokenType::QUESTION,

            b'.' => {
                if self.peek().is_ascii_digit() {
                    return self.parse_number();
                }
                TokenType::DOT
            }

            // ── operators with compound forms ────────────────────────────
            b'+' => {
                if self.match_byte(b'+') {
                    TokenType::PLUS_PLUS
                } else {
                    self.with_equal(TokenType::PLUS, TokenType::PLUS_EQUAL)
                }
            }

            b'-' => {
                if self.match_byte(b'-') {
                    TokenType::MINUS_MINUS
                } else {
                    self.with_equal(TokenType::MINUS, TokenType::MINUS_EQUAL)
                }
            }

            b'*' => self.with_equal(TokenType::STAR, TokenType::STAR_EQUAL),
            b'%' => self.with_equal(TokenType::PERCENT, TokenType::PERCENT_EQUAL),

            b'!' => {
                if self.match_byte(b'=') {
                    if self.match_byte(b'=') {
                        TokenType::BANG_EQUAL_EQUAL
                    } else {
                        TokenType::BANG_EQUAL
                    }
                } else {
                    TokenType::BANG
                }
            }

            b'=' => {
                if self.match_byte(b'>') {
                    TokenType::ARROW
                } else if self.match_byte(b'=') {
                    if self.match_byte(b'=') {
                        TokenType::EQUAL_EQUAL_EQUAL
                    } else {
                        TokenType::EQUAL_EQUAL
                    }
                } else {
                    TokenType::EQUAL
                }
            }

            b'<' => self.with_equal(TokenType::LESS, TokenType::LESS_EQUAL),
            b'>' => self.with_equal(TokenType::GREATER, TokenType::GREATER_EQUAL),

            b'&' if self.match_byte(b'&') => TokenType::AND_AND,
            b'|' if self.match_byte(b'|') => TokenType::OR_OR,

            // ── whitespace / newline ─────────────────────────────────────
            b' ' | b'\r' | b'\t' => return Ok(()),

            b'\n' => {
                self.line += 1;
                return Ok(());
            }

            // ── comments and division ────────────────────────────────────
            b'/' => {
                if self.match_byte(b'/') {
                    // Fast‑forward to next newline; the newline itself is
                    // scanned normally so the line counter stays exact.
                    match memchr(b'\n', &self.src[self.curr..]) {
                        Some(pos) => self.curr += pos,
                        None => self.curr = self.len(),
                    }
                    return Ok(());
                }

                if self.match_byte(b'*') {
                    return self.skip_block_comment();
                }

                self.with_equal(TokenType::SLASH, TokenType::SLASH_EQUAL)
            }

            // ── string literal ────────────────────────────────────────────
            b'"' | b'\'' => return self.parse_string(b),

            // ── number literal (digit‑leading) ───────────────────────────
            b'0'..=b'9' => return self.parse_number(),

            // ── identifiers / keywords ───────────────────────────────────
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' => {
                self.parse_identifier();
                return Ok(());
            }

            // ── unexpected character ─────────────────────────────────────
            _ => {
                // Skip the rest of a multi-byte character so the next
                // token starts on a char boundary.
                while !self.is_at_end() && (self.peek() & 0xC0) == 0x80 {
                    self.advance();
                }
                let shown = &self.text[self.start..self.curr];
                return Err(EngineError::lex(
                    self.line,
                    format!("Unexpected character: {}", shown),
                ));
            }
        };

        self.pending = Some(tt);
        Ok(())
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        let rest = &self.src[self.curr..];
        match memmem::find(rest, b"*/") {
            Some(pos) => {
                self.line += memchr_iter(b'\n', &rest[..pos]).count();
                self.curr += pos + 2;
                Ok(())
            }
            None => Err(EngineError::lex(self.line, "Unterminated comment.")),
        }
    }

    /// Parse a quoted string literal, decoding escapes.
    ///
    /// * `self.start` still points to the opening quote.
    /// * When we return, `self.curr` points **past** the closing quote.
    fn parse_string(&mut self, quote: u8) -> Result<()> {
        loop {
            if self.is_at_end() || self.peek() == b'\n' {
                return Err(EngineError::lex(self.line, "Unterminated string."));
            }

            match self.advance() {
                b'\\' => {
                    if self.is_at_end() {
                        return Err(EngineError::lex(self.line, "Unterminated string."));
                    }
                    if self.advance() == b'\n' {
                        self.line += 1; // line continuation
                    }
                }
                b if b == quote => break,
                _ => {}
            }
        }

        let body: &str = &self.text[self.start + 1..self.curr - 1];
        let decoded = decode_escapes(body, self.line)?;
        self.pending = Some(TokenType::STRING(decoded));

        Ok(())
    }

    /// Parse a numeric literal (`123`, `3.14`, `.5`, `1e3`, `0xff`).
    fn parse_number(&mut self) -> Result<()> {
        let first = self.src[self.start];

        if first == b'0' && matches!(self.peek(), b'x' | b'X') {
            self.advance();
            let digits_start = self.curr;
            while self.peek().is_ascii_hexdigit() {
                self.advance();
            }
            let digits = &self.text[digits_start..self.curr];
            let n = u64::from_str_radix(digits, 16)
                .map_err(|_| EngineError::lex(self.line, "Invalid hexadecimal literal"))?;
            self.pending = Some(TokenType::NUMBER(n as f64));
            return Ok(());
        }

        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // Optional fractional part (the leading `.` may already be consumed).
        if first != b'.' && self.peek() == b'.' {
            self.advance();
        }
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // Optional exponent.
        if matches!(self.peek(), b'e' | b'E') {
            let sign = matches!(self.peek_next(), b'+' | b'-');
            let after = self.src.get(self.curr + 1 + usize::from(sign)).copied();
            if after.is_some_and(|b| b.is_ascii_digit()) {
                self.advance();
                if sign {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        if self.peek().is_ascii_alphabetic() || self.peek() == b'_' || self.peek() == b'$' {
            return Err(EngineError::lex(
                self.line,
                "Identifier starts immediately after numeric literal",
            ));
        }

        let lexeme: &str = &self.text[self.start..self.curr];
        let n: f64 = lexeme
            .parse::<f64>()
            .map_err(|_| EngineError::lex(self.line, format!("Invalid number: {}", lexeme)))?;
        self.pending = Some(TokenType::NUMBER(n));

        Ok(())
    }

    /// Parse an identifier and decide if it is a **keyword** or a generic
    /// `IDENTIFIER` token.
    fn parse_identifier(&mut self) {
        while {
            let c: u8 = self.peek();
            c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
        } {
            self.advance();
        }

        let slice: &[u8] = &self.src[self.start..self.curr];

        let tt: TokenType = KEYWORDS
            .get(slice)
            .cloned()
            .unwrap_or(TokenType::IDENTIFIER);

        self.pending = Some(tt);
    }
}

/// Decodes `\n`, `\xHH`, `\uHHHH` and friends into UTF-16 code units.
/// A `\u` escape may produce a lone surrogate.
fn decode_escapes(body: &str, line: usize) -> Result<StrLit> {
    if !body.contains('\\') {
        return Ok(StrLit::new(body.encode_utf16().collect()));
    }

    let mut out: Vec<u16> = Vec::with_capacity(body.len());
    let mut buf = [0u16; 2];
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }

        let Some(esc) = chars.next() else {
            return Err(EngineError::lex(line, "Unterminated escape sequence"));
        };

        match esc {
            'n' => out.push(0x0A),
            't' => out.push(0x09),
            'r' => out.push(0x0D),
            'b' => out.push(0x08),
            'f' => out.push(0x0C),
            'v' => out.push(0x0B),
            '0' => out.push(0x00),
            '\n' => {}
            'x' => out.push(hex_escape(&mut chars, 2, line)?),
            'u' => out.push(hex_escape(&mut chars, 4, line)?),
            other => out.extend_from_slice(other.encode_utf16(&mut buf)),
        }
    }

    Ok(StrLit::new(out))
}

fn hex_escape(chars: &mut std::str::Chars<'_>, width: usize, line: usize) -> Result<u16> {
    let digits: String = chars.by_ref().take(width).collect();
    if digits.len() != width {
        return Err(EngineError::lex(line, "Invalid escape sequence"));
    }

    u16::from_str_radix(&digits, 16).map_err(|_| EngineError::lex(line, "Invalid escape sequence"))
}

/// Scan the entire source, stopping at the first lexical error.
pub fn scan_all(src: &str) -> Result<Vec<Token<'_>>> {
    Scanner::new(src).collect()
}

// ───────────────────────── Iterator implementation ─────────────────────────

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        // Loop until we either emit a token, hit EOF, or see an error.
        while self.curr <= self.len() {
            // 1. EOF guard – emit exactly one EOF then terminate.
            if self.curr == self.len() {
                self.curr += 1; // ensure fused semantics
                return Some(Ok(Token::new(TokenType::EOF, "", self.line)));
            }

            // 2. Reset per‑token state.
            self.start = self.curr;
            self.pending = None;

            // 3. Attempt to scan a token.
            if let Err(e) = self.scan_token() {
                return Some(Err(e));
            }

            // 4. If a real token was recognised, build and return it.
            if let Some(tt) = self.pending.take() {
                let lex: &'a str = &self.text[self.start..self.curr];
                debug!("Scanned token ({:?}) on line {}", tt, self.line);

                return Some(Ok(Token::new(tt, lex, self.line)));
            }
            // Otherwise it was whitespace / comment → continue loop.
        }

        None // already yielded EOF
    }
}

impl<'a> FusedIterator for Scanner<'a> {}
