//! Tokenizer for the snippet language.
//!
//! Produces INDENT/DEDENT/NEWLINE tokens from leading whitespace, joins lines
//! inside brackets and after a trailing backslash, and drops comments.

use crate::lang::token::{Token, TokenKind, OPERATORS};
use crate::lang::SyntaxError;
use std::rc::Rc;

/// Deepest block nesting accepted
pub const MAX_INDENT_LEVELS: usize = 100;

const TAB_SIZE: usize = 8;

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source, 1, 0, false).run()
}

/// Tokenize a single expression embedded at (`line`, `col`), e.g. the body
/// of an f-string replacement field. Newlines are insignificant.
pub(crate) fn tokenize_embedded(source: &str, line: u32, col: u32) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source, line, col, true).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    /// Open brackets with their position, innermost last
    brackets: Vec<(char, u32, u32)>,
    indents: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
    embedded: bool,
}

impl Lexer {
    fn new(source: &str, line: u32, col: u32, embedded: bool) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            col,
            brackets: Vec::new(),
            indents: vec![0],
            tokens: Vec::new(),
            at_line_start: !embedded,
            embedded,
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line, self.col)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, line: u32, col: u32) {
        self.tokens.push(Token { kind, line, col });
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        loop {
            if self.at_line_start {
                self.at_line_start = false;
                if !self.handle_indentation()? {
                    break;
                }
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '\r' => {
                    self.bump();
                }
                '\n' => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    if self.brackets.is_empty() && !self.embedded {
                        self.push(TokenKind::Newline, line, col);
                        self.at_line_start = true;
                    }
                }
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.peek() != Some('\n') {
                        return Err(self.error("unexpected character after line continuation character"));
                    }
                    self.bump();
                    if self.peek().is_none() {
                        return Err(self.error("unexpected end of input after line continuation"));
                    }
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.name_or_string()?,
                '"' | '\'' => self.string(String::new())?,
                _ => self.operator()?,
            }
        }

        if let Some((open, line, col)) = self.brackets.last() {
            return Err(SyntaxError::new(format!("'{}' was never closed", open), *line, *col));
        }

        if !self.embedded {
            let ends_with_newline = matches!(
                self.tokens.last().map(|t| &t.kind),
                None | Some(TokenKind::Newline) | Some(TokenKind::Dedent)
            );
            if !ends_with_newline {
                self.push(TokenKind::Newline, self.line, self.col);
            }
            while self.indents.len() > 1 {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.line, 0);
            }
        }
        self.push(TokenKind::EndOfFile, self.line, self.col);
        Ok(self.tokens)
    }

    /// Measure the indentation of the next logical line. Returns false at EOF.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        loop {
            let mut width = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width = (width / TAB_SIZE + 1) * TAB_SIZE,
                    '\x0c' => width = 0,
                    _ => break,
                }
                self.bump();
            }

            match self.peek() {
                None => return Ok(false),
                Some('\n') | Some('\r') => {
                    self.bump();
                    continue;
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                Some(_) => {}
            }

            let current = self.indents.last().copied().unwrap_or(0);
            if width > current {
                if self.indents.len() > MAX_INDENT_LEVELS {
                    return Err(self.error("too many levels of indentation"));
                }
                self.indents.push(width);
                self.push(TokenKind::Indent, self.line, 0);
            } else if width < current {
                while self.indents.last().is_some_and(|level| *level > width) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, self.line, self.col);
                }
                if self.indents.last().copied() != Some(width) {
                    return Err(self.error("unindent does not match any outer indentation level"));
                }
            }
            return Ok(true);
        }
    }

    fn name_or_string(&mut self) -> Result<(), SyntaxError> {
        let (line, col) = (self.line, self.col);

        // String prefixes: any combination of r, b, f, u of length <= 2
        let mut prefix = String::new();
        let mut offset = 0;
        while offset < 2 {
            match self.peek_at(offset) {
                Some(c) if "rRbBfFuU".contains(c) => {
                    prefix.push(c.to_ascii_lowercase());
                    offset += 1;
                }
                _ => break,
            }
        }
        while !prefix.is_empty() {
            if matches!(self.peek_at(prefix.len()), Some('"') | Some('\'')) {
                break;
            }
            prefix.pop();
        }
        if !prefix.is_empty() {
            for _ in 0..prefix.len() {
                self.bump();
            }
            return self.string(prefix);
        }

        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(TokenKind::Name(name), line, col);
        Ok(())
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let (line, col) = (self.line, self.col);

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c == '_' {
                        self.bump();
                    } else if c.is_digit(radix) {
                        digits.push(c);
                        self.bump();
                    } else if c.is_alphanumeric() {
                        return Err(self.error(format!("invalid digit '{}' in numeric literal", c)));
                    } else {
                        break;
                    }
                }
                if digits.is_empty() {
                    return Err(SyntaxError::new("invalid numeric literal", line, col));
                }
                let value = i64::from_str_radix(&digits, radix).map_err(|_| {
                    SyntaxError::new("integer literal is too large", line, col)
                })?;
                self.push(TokenKind::Int(value), line, col);
                return Ok(());
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        self.digits(&mut text);
        if self.peek() == Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let exponent_follows = match sign {
                Some('+') | Some('-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exponent_follows {
                is_float = true;
                text.push('e');
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
                self.digits(&mut text);
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(self.error("complex literals are not supported"));
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(self.error("invalid decimal literal"));
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| SyntaxError::new("invalid float literal", line, col))?;
            self.push(TokenKind::Float(value), line, col);
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(SyntaxError::new(
                    "leading zeros in decimal integer literals are not permitted",
                    line,
                    col,
                ));
            }
            let value: i64 = text
                .parse()
                .map_err(|_| SyntaxError::new("integer literal is too large", line, col))?;
            self.push(TokenKind::Int(value), line, col);
        }
        Ok(())
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '_' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn string(&mut self, prefix: String) -> Result<(), SyntaxError> {
        let line = self.line;
        let col = self.col - prefix.chars().count() as u32;
        let raw = prefix.contains('r');
        let is_bytes = prefix.contains('b');
        let is_format = prefix.contains('f');
        if is_bytes && is_format {
            return Err(SyntaxError::new("invalid string prefix", line, col));
        }

        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut body = String::new();
        loop {
            let Some(c) = self.peek() else {
                let message = if triple {
                    format!("unterminated triple-quoted string literal (detected at line {})", self.line)
                } else {
                    format!("unterminated string literal (detected at line {})", line)
                };
                return Err(SyntaxError::new(message, line, col));
            };

            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                body.push(c);
                self.bump();
                continue;
            }

            if c == '\n' && !triple {
                return Err(SyntaxError::new(
                    format!("unterminated string literal (detected at line {})", line),
                    line,
                    col,
                ));
            }

            if c == '\\' {
                self.bump();
                let Some(next) = self.peek() else { continue };
                if raw {
                    body.push('\\');
                    body.push(next);
                    self.bump();
                    continue;
                }
                self.escape(next, &mut body, is_bytes)?;
                continue;
            }

            if is_bytes && !c.is_ascii() {
                return Err(self.error("bytes can only contain ASCII literal characters"));
            }
            body.push(c);
            self.bump();
        }

        let kind = if is_bytes {
            TokenKind::Bytes(body.chars().map(|c| c as u32 as u8).collect())
        } else if is_format {
            TokenKind::FString(body)
        } else {
            TokenKind::Str(Rc::from(body))
        };
        self.push(kind, line, col);
        Ok(())
    }

    fn escape(&mut self, next: char, body: &mut String, is_bytes: bool) -> Result<(), SyntaxError> {
        self.bump();
        match next {
            '\n' => {}
            'n' => body.push('\n'),
            't' => body.push('\t'),
            'r' => body.push('\r'),
            '0'..='7' => {
                let mut value = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            self.bump();
                        }
                        None => break,
                    }
                }
                body.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'a' => body.push('\x07'),
            'b' => body.push('\x08'),
            'f' => body.push('\x0c'),
            'v' => body.push('\x0b'),
            '\\' => body.push('\\'),
            '\'' => body.push('\''),
            '"' => body.push('"'),
            'x' => {
                let value = self.hex_digits(2)?;
                body.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'u' | 'U' if !is_bytes => {
                let width = if next == 'u' { 4 } else { 8 };
                let value = self.hex_digits(width)?;
                let c = char::from_u32(value)
                    .ok_or_else(|| self.error("invalid unicode escape"))?;
                body.push(c);
            }
            other => {
                body.push('\\');
                body.push(other);
            }
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, SyntaxError> {
        let mut value = 0u32;
        for _ in 0..count {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("truncated escape sequence"))?;
            value = value * 16 + digit;
            self.bump();
        }
        Ok(value)
    }

    fn operator(&mut self) -> Result<(), SyntaxError> {
        let (line, col) = (self.line, self.col);
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if !matches {
                continue;
            }
            for _ in 0..op.chars().count() {
                self.bump();
            }
            match *op {
                "(" | "[" | "{" => {
                    let open = op.chars().next().unwrap_or('(');
                    self.brackets.push((open, line, col));
                }
                ")" | "]" | "}" => {
                    let close = op.chars().next().unwrap_or(')');
                    let expected = match self.brackets.pop() {
                        Some(('(', ..)) => ')',
                        Some(('[', ..)) => ']',
                        Some(_) => '}',
                        None => {
                            return Err(SyntaxError::new(format!("unmatched '{}'", close), line, col))
                        }
                    };
                    if close != expected {
                        return Err(SyntaxError::new(
                            format!("closing parenthesis '{}' does not match", close),
                            line,
                            col,
                        ));
                    }
                }
                _ => {}
            }
            self.push(TokenKind::Op(op), line, col);
            return Ok(());
        }

        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{}' (U+{:04X})", c, c as u32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_statement() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Op("="),
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("if x:\n    y\nz\n");
        assert!(tokens.contains(&TokenKind::Indent));
        assert!(tokens.contains(&TokenKind::Dedent));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let err = tokenize("if x:\n    y\n  z\n").unwrap_err();
        assert!(err.message.contains("unindent does not match"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_brackets_join_lines() {
        let tokens = kinds("f(1,\n  2)\n");
        let newlines = tokens.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_number_forms() {
        assert_eq!(kinds("0x_ff")[0], TokenKind::Int(255));
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("2.5e3")[0], TokenKind::Float(2500.0));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
        assert!(tokenize("99999999999999999999").is_err());
    }

    #[test]
    fn test_string_escapes_and_prefixes() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], TokenKind::Str(Rc::from("a\nb")));
        assert_eq!(kinds(r#"r'a\nb'"#)[0], TokenKind::Str(Rc::from("a\\nb")));
        assert_eq!(kinds("b'hi'")[0], TokenKind::Bytes(b"hi".to_vec()));
        assert_eq!(kinds("f'{x}'")[0], TokenKind::FString("{x}".into()));
        assert_eq!(kinds("'''a\nb'''")[0], TokenKind::Str(Rc::from("a\nb")));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert!(err.message.starts_with("unterminated string literal"));
    }

    #[test]
    fn test_columns_are_character_offsets() {
        let tokens = tokenize("é = 'ü'; y").unwrap();
        let y = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Name("y".into()))
            .unwrap();
        assert_eq!(y.col, 9);
    }

    #[test]
    fn test_unclosed_bracket() {
        let err = tokenize("print(1\n").unwrap_err();
        assert!(err.message.contains("was never closed"));
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("x = $").unwrap_err();
        assert!(err.message.contains("invalid character"));
        assert_eq!(err.column, 4);
    }
}
