//! Minimal JavaScript tokenizer.
//!
//! Only what the instrumenter needs: identifiers, punctuators, and opaque
//! literal tokens (strings, template literals, regular expressions, numbers)
//! with byte spans and line numbers. Comments and whitespace are skipped.

use crate::error::InstrumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    String,
    Template,
    Regex,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    /// 1-based line of the first character
    pub line: u32,
    /// 1-based line of the last character
    pub end_line: u32,
}

impl Token<'_> {
    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_keyword(&self) -> bool {
        self.kind == TokenKind::Ident && KEYWORDS.contains(&self.text)
    }

    /// Whether an expression may end with this token (used for ASI decisions)
    pub fn ends_expression(&self) -> bool {
        match self.kind {
            TokenKind::Number | TokenKind::String | TokenKind::Template | TokenKind::Regex => true,
            TokenKind::Ident => !self.is_keyword() || VALUE_KEYWORDS.contains(&self.text),
            TokenKind::Punct => matches!(self.text, ")" | "]" | "}" | "++" | "--"),
        }
    }
}

pub const KEYWORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "let", "new", "null", "of", "return", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Keywords that evaluate to a value on their own
const VALUE_KEYWORDS: &[&str] = &["this", "super", "null", "true", "false"];

/// After these keywords a `/` starts a regular expression
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@", "#",
];

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    /// Kind and text of the most recently produced token, nested ones included
    last: Option<(TokenKind, &'a str)>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            last: None,
        }
    }

    /// Tokenize the whole source
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, InstrumentError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>, line: u32) -> InstrumentError {
        InstrumentError::Syntax {
            message: message.into(),
            line,
        }
    }

    fn skip_trivia(&mut self) -> Result<(), InstrumentError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let line = self.line;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated comment", line)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn regex_allowed(&self) -> bool {
        match self.last {
            None => true,
            Some((TokenKind::Punct, text)) => !matches!(text, ")" | "]" | "}"),
            Some((TokenKind::Ident, text)) => REGEX_PREFIX_KEYWORDS.contains(&text),
            Some(_) => false,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>, InstrumentError> {
        self.skip_trivia()?;
        let start = self.pos;
        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let kind = if is_ident_start(c) {
            while self.peek().is_some_and(is_ident_part) {
                self.bump();
            }
            TokenKind::Ident
        } else if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            self.scan_number();
            TokenKind::Number
        } else if c == '"' || c == '\'' {
            self.scan_string(c, line)?;
            TokenKind::String
        } else if c == '`' {
            self.scan_template(line)?;
            TokenKind::Template
        } else if c == '/' && self.regex_allowed() {
            self.scan_regex(line)?;
            TokenKind::Regex
        } else {
            let rest = &self.src[self.pos..];
            let punct = PUNCTUATORS
                .iter()
                .find(|p| rest.starts_with(**p))
                .copied()
                .unwrap_or_else(|| &rest[..c.len_utf8()]);
            for _ in punct.chars() {
                self.bump();
            }
            TokenKind::Punct
        };

        let text = &self.src[start..self.pos];
        self.last = Some((kind, text));
        Ok(Some(Token {
            kind,
            text,
            start,
            end: self.pos,
            line,
            end_line: self.line,
        }))
    }

    fn scan_number(&mut self) {
        let mut prev = '\0';
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '+' || c == '-') && (prev == 'e' || prev == 'E');
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                prev = c;
                self.bump();
            } else {
                break;
            }
        }
    }

    fn scan_string(&mut self, quote: char, line: u32) -> Result<(), InstrumentError> {
        self.bump();
        loop {
            match self.bump() {
                Some('\\') => {
                    self.bump();
                }
                Some(c) if c == quote => return Ok(()),
                Some('\n') | None => return Err(self.error("unterminated string literal", line)),
                Some(_) => {}
            }
        }
    }

    fn scan_template(&mut self, line: u32) -> Result<(), InstrumentError> {
        self.bump();
        loop {
            match self.bump() {
                Some('\\') => {
                    self.bump();
                }
                Some('`') => return Ok(()),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    self.scan_substitution(line)?;
                }
                Some(_) => {}
                None => return Err(self.error("unterminated template literal", line)),
            }
        }
    }

    /// Skip a `${ ... }` substitution, including nested literals
    fn scan_substitution(&mut self, line: u32) -> Result<(), InstrumentError> {
        let mut depth = 0usize;
        loop {
            let Some(token) = self.next_token()? else {
                return Err(self.error("unterminated template literal", line));
            };
            if token.is_punct("{") {
                depth += 1;
            } else if token.is_punct("}") {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
        }
    }

    fn scan_regex(&mut self, line: u32) -> Result<(), InstrumentError> {
        self.bump();
        let mut in_class = false;
        loop {
            match self.bump() {
                Some('\\') => {
                    self.bump();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some('\n') | None => {
                    return Err(self.error("unterminated regular expression", line))
                }
                Some(_) => {}
            }
        }
        while self.peek().is_some_and(is_ident_part) {
            self.bump();
        }
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Whether `name` can be used verbatim as a JavaScript binding identifier
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_ident_start(first) => {}
        _ => return false,
    }
    chars.all(is_ident_part) && !KEYWORDS.contains(&name)
}
