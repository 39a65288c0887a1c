//! Formula tokenizer.

use lattice_error::CompileError;

use super::FUNCTIONS;

/// Token classes produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TokenKind {
    Number,
    String,
    ColumnRef,
    Function,
    Operator,
    LParen,
    RParen,
    Comma,
    Eof,
}

/// A lexed token with its byte position in the source expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token class.
    pub kind:     TokenKind,
    /// Raw token text (column name for `ColumnRef`, unquoted content for
    /// `String`, uppercased name for `Function`).
    pub value:    String,
    /// Byte offset of the token start.
    pub position: usize,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            position,
        }
    }
}

/// Tokenize a formula expression.
pub fn tokenize(expression: &str) -> Result<Vec<Token>, CompileError> {
    let bytes = expression.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let ch = bytes[i] as char;

        if ch.is_whitespace() {
            i += 1;
        } else if ch == '[' {
            let Some(end) = expression[i + 1..].find(']').map(|off| i + 1 + off) else {
                return Err(CompileError::formula_parse("unterminated column reference", i));
            };
            tokens.push(Token::new(TokenKind::ColumnRef, &expression[i + 1..end], i));
            i = end + 1;
        } else if ch.is_ascii_digit() || (ch == '.' && peek_digit(bytes, i + 1)) {
            let mut j = i;
            while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b'.') {
                j += 1;
            }
            tokens.push(Token::new(TokenKind::Number, &expression[i..j], i));
            i = j;
        } else if matches!(ch, '+' | '-' | '*' | '/') {
            tokens.push(Token::new(TokenKind::Operator, ch, i));
            i += 1;
        } else if matches!(ch, '<' | '>' | '=' | '!') {
            let two = expression.get(i..i + 2).unwrap_or_default();
            if matches!(two, "<=" | ">=" | "!=") {
                tokens.push(Token::new(TokenKind::Operator, two, i));
                i += 2;
            } else if ch == '!' {
                return Err(CompileError::formula_parse("unexpected character '!'", i));
            } else {
                tokens.push(Token::new(TokenKind::Operator, ch, i));
                i += 1;
            }
        } else if ch == '(' {
            tokens.push(Token::new(TokenKind::LParen, "(", i));
            i += 1;
        } else if ch == ')' {
            tokens.push(Token::new(TokenKind::RParen, ")", i));
            i += 1;
        } else if ch == ',' {
            tokens.push(Token::new(TokenKind::Comma, ",", i));
            i += 1;
        } else if ch == '"' || ch == '\'' {
            let quote = bytes[i];
            let mut j = i + 1;
            while j < bytes.len() && bytes[j] != quote {
                j += 1;
            }
            if j >= bytes.len() {
                return Err(CompileError::formula_parse("unterminated string literal", i));
            }
            tokens.push(Token::new(TokenKind::String, &expression[i + 1..j], i));
            i = j + 1;
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            let mut j = i;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            let word = &expression[i..j];
            let upper = word.to_ascii_uppercase();
            if FUNCTIONS.contains(&upper.as_str()) {
                tokens.push(Token::new(TokenKind::Function, upper, i));
            } else {
                return Err(CompileError::formula_parse(
                    format!("unknown identifier '{word}'"),
                    i,
                ));
            }
            i = j;
        } else {
            return Err(CompileError::formula_parse(format!("unexpected character '{ch}'"), i));
        }
    }

    tokens.push(Token::new(TokenKind::Eof, "", expression.len()));
    Ok(tokens)
}

fn peek_digit(bytes: &[u8], index: usize) -> bool {
    bytes.get(index).is_some_and(u8::is_ascii_digit)
}
