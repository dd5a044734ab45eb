use log::debug;
use serde::{Serialize, Serializer};
use std::fmt;
use std::mem;

use crate::rope::Rope;

/// The different kinds of tokens recognized by the scanner.
///
/// Variants without data represent punctuators or keyword tokens.
/// `STRING(StrLit)` and `NUMBER(f64)` carry their decoded literal values.
/// `IDENTIFIER` is used for user‑defined names (including `undefined` and
/// `eval`, which are ordinary bindings).
/// `EOF` marks the end of input.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Serialize)]
pub enum TokenType {
    /// '('
    LEFT_PAREN,

    /// ')'
    RIGHT_PAREN,

    /// '{'
    LEFT_BRACE,

    /// '}'
    RIGHT_BRACE,

    /// '['
    LEFT_BRACKET,

    /// ']'
    RIGHT_BRACKET,

    /// ','
    COMMA,

    /// '.'
    DOT,

    /// ';'
    SEMICOLON,

    /// ':'
    COLON,

    /// '?'
    QUESTION,

    /// '-'
    MINUS,

    /// '--'
    MINUS_MINUS,

    /// '-='
    MINUS_EQUAL,

    /// '+'
    PLUS,

    /// '++'
    PLUS_PLUS,

    /// '+='
    PLUS_EQUAL,

    /// '/'
    SLASH,

    /// '/='
    SLASH_EQUAL,

    /// '*'
    STAR,

    /// '*='
    STAR_EQUAL,

    /// '%'
    PERCENT,

    /// '%='
    PERCENT_EQUAL,

    /// '!'
    BANG,

    /// '!='
    BANG_EQUAL,

    /// '!=='
    BANG_EQUAL_EQUAL,

    /// '='
    EQUAL,

    /// '=='
    EQUAL_EQUAL,

    /// '==='
    EQUAL_EQUAL_EQUAL,

    /// '=>'
    ARROW,

    /// '>'
    GREATER,

    /// '>='
    GREATER_EQUAL,

    /// '<'
    LESS,

    /// '<='
    LESS_EQUAL,

    /// '&&'
    AND_AND,

    /// '||'
    OR_OR,

    /// A user‑defined identifier
    IDENTIFIER,

    /// A string literal (decoded contents without quotes)
    STRING(StrLit),

    /// A numeric literal
    #[serde(rename = "NUMBER")]
    NUMBER(f64),

    BREAK,
    CATCH,
    CONST,
    CONTINUE,
    DELETE,
    ELSE,
    FALSE,
    FINALLY,
    FOR,
    FUNCTION,
    IF,
    LET,
    NULL,
    RETURN,
    THIS,
    THROW,
    TRUE,
    TRY,
    TYPEOF,
    VAR,
    WHILE,
    WITH,

    /// End‑of‑file marker
    EOF,
}

impl TokenType {
    /// Upper-case variant name without payload, as printed by `tokenize`.
    pub fn name(&self) -> &'static str {
        match self {
            TokenType::LEFT_PAREN => "LEFT_PAREN",
            TokenType::RIGHT_PAREN => "RIGHT_PAREN",
            TokenType::LEFT_BRACE => "LEFT_BRACE",
            TokenType::RIGHT_BRACE => "RIGHT_BRACE",
            TokenType::LEFT_BRACKET => "LEFT_BRACKET",
            TokenType::RIGHT_BRACKET => "RIGHT_BRACKET",
            TokenType::COMMA => "COMMA",
            TokenType::DOT => "DOT",
            TokenType::SEMICOLON => "SEMICOLON",
            TokenType::COLON => "COLON",
            TokenType::QUESTION => "QUESTION",
            TokenType::MINUS => "MINUS",
            TokenType::MINUS_MINUS => "MINUS_MINUS",
            TokenType::MINUS_EQUAL => "MINUS_EQUAL",
            TokenType::PLUS => "PLUS",
            TokenType::PLUS_PLUS => "PLUS_PLUS",
            TokenType::PLUS_EQUAL => "PLUS_EQUAL",
            TokenType::SLASH => "SLASH",
            TokenType::SLASH_EQUAL => "SLASH_EQUAL",
            TokenType::STAR => "STAR",
            TokenType::STAR_EQUAL => "STAR_EQUAL",
            TokenType::PERCENT => "PERCENT",
            TokenType::PERCENT_EQUAL => "PERCENT_EQUAL",
            TokenType::BANG => "BANG",
            TokenType::BANG_EQUAL => "BANG_EQUAL",
            TokenType::BANG_EQUAL_EQUAL => "BANG_EQUAL_EQUAL",
            TokenType::EQUAL => "EQUAL",
            TokenType::EQUAL_EQUAL => "EQUAL_EQUAL",
            TokenType::EQUAL_EQUAL_EQUAL => "EQUAL_EQUAL_EQUAL",
            TokenType::ARROW => "ARROW",
            TokenType::GREATER => "GREATER",
            TokenType::GREATER_EQUAL => "GREATER_EQUAL",
            TokenType::LESS => "LESS",
            TokenType::LESS_EQUAL => "LESS_EQUAL",
            TokenType::AND_AND => "AND_AND",
            TokenType::OR_OR => "OR_OR",
            TokenType::IDENTIFIER => "IDENTIFIER",
            TokenType::STRING(_) => "STRING",
            TokenType::NUMBER(_) => "NUMBER",
            TokenType::BREAK => "BREAK",
            TokenType::CATCH => "CATCH",
            TokenType::CONST => "CONST",
            TokenType::CONTINUE => "CONTINUE",
            TokenType::DELETE => "DELETE",
            TokenType::ELSE => "ELSE",
            TokenType::FALSE => "FALSE",
            TokenType::FINALLY => "FINALLY",
            TokenType::FOR => "FOR",
            TokenType::FUNCTION => "FUNCTION",
            TokenType::IF => "IF",
            TokenType::LET => "LET",
            TokenType::NULL => "NULL",
            TokenType::RETURN => "RETURN",
            TokenType::THIS => "THIS",
            TokenType::THROW => "THROW",
            TokenType::TRUE => "TRUE",
            TokenType::TRY => "TRY",
            TokenType::TYPEOF => "TYPEOF",
            TokenType::VAR => "VAR",
            TokenType::WHILE => "WHILE",
            TokenType::WITH => "WITH",
            TokenType::EOF => "EOF",
        }
    }

    /// Keywords may still appear as property names after `.` and in object
    /// literal keys.
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenType::BREAK
                | TokenType::CATCH
                | TokenType::CONST
                | TokenType::CONTINUE
                | TokenType::DELETE
                | TokenType::ELSE
                | TokenType::FALSE
                | TokenType::FINALLY
                | TokenType::FOR
                | TokenType::FUNCTION
                | TokenType::IF
                | TokenType::LET
                | TokenType::NULL
                | TokenType::RETURN
                | TokenType::THIS
                | TokenType::THROW
                | TokenType::TRUE
                | TokenType::TRY
                | TokenType::TYPEOF
                | TokenType::VAR
                | TokenType::WHILE
                | TokenType::WITH
        )
    }
}

/// Decoded string literal contents as UTF-16 code units. A `\u` escape may
/// leave a lone surrogate in here.
#[derive(Debug, Clone, PartialEq)]
pub struct StrLit(Box<[u16]>);

impl StrLit {
    pub fn new(units: Vec<u16>) -> Self {
        Self(units.into_boxed_slice())
    }

    pub fn code_units(&self) -> &[u16] {
        &self.0
    }

    pub fn to_rope(&self) -> Rope {
        Rope::from_utf16(&self.0)
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl Serialize for StrLit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

impl PartialEq for TokenType {
    /// Two TokenTypes are equal if they share the same variant
    /// (ignoring any inner data). Uses `mem::discriminant` to compare.
    fn eq(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// A scanned token, including its type, the original lexeme,
/// and the line number where it was found.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Token<'a> {
    /// The category of this token.
    pub token_type: TokenType,

    /// The exact substring from the source that produced this token.
    pub lexeme: &'a str,

    /// 1‑based line number in the source.
    pub line: usize,
}

impl<'a> Token<'a> {
    /// Create a new Token with the given type, lexeme, and line.
    pub fn new(token_type: TokenType, lexeme: &'a str, line: usize) -> Self {
        debug!(
            "Creating new token: type={:?}, lexeme={}, line={}",
            token_type, lexeme, line
        );

        Self {
            token_type,
            lexeme,
            line,
        }
    }
}

impl<'a> fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ── literal column: decoded string, `3.0`‑style number, or `null` ──
        let literal: String = match &self.token_type {
            TokenType::STRING(s) => s.to_string_lossy(),
            TokenType::NUMBER(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    let mut buf: itoa::Buffer = itoa::Buffer::new();
                    format!("{}.0", buf.format(*n as i64))
                } else {
                    n.to_string()
                }
            }
            _ => "null".to_owned(),
        };

        write!(f, "{} {} {}", self.token_type.name(), self.lexeme, literal)
    }
}
