use std::str;

use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One or two character tokens.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,

    // Literals.
    Identifier,
    String,
    Number,

    // Keywords.
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Let,
    While,

    Eof,
}

/// A token borrowing its lexeme from the source buffer, located by the
/// 1-based line and column of its first character.
#[derive(Clone, Copy, Debug)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub line: usize,
    pub column: usize,
}

impl Token<'_> {
    /// Placeholder used before the first `advance()`.
    pub const EOF: Token<'static> =
        Token { kind: TokenKind::Eof, lexeme: "", line: 1, column: 1 };
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ScanErrorKind {
    #[error("Unexpected character '{0}'.")]
    UnexpectedCharacter(char),
    #[error("Unterminated string.")]
    UnterminatedString,
    #[error("Invalid number.")]
    InvalidNumber,
    #[error("Invalid UTF-8.")]
    InvalidUtf8,
}

/// Scan errors are values: the scanner keeps going after producing one.
#[derive(Debug, Error, Eq, PartialEq)]
#[error("{kind}")]
pub struct ScanError {
    pub kind: ScanErrorKind,
    pub line: usize,
    pub column: usize,
}

/// A pull-based scanner over a raw source buffer. UTF-8 is decoded on the
/// fly so that invalid bytes surface as positioned errors rather than
/// failing the whole buffer up front.
pub struct Scanner<'a> {
    source: &'a [u8],
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Scanner { source, start: 0, current: 0, line: 1, column: 1, start_line: 1, start_column: 1 }
    }

    pub fn scan_token(&mut self) -> Result<Token<'a>, ScanError> {
        let result = self.next_token();
        if let Err(ref err) = result {
            if err.kind == ScanErrorKind::InvalidUtf8 {
                // Skip the offending byte so the next call makes progress.
                self.current += 1;
                self.column += 1;
            }
        }
        result
    }

    fn next_token(&mut self) -> Result<Token<'a>, ScanError> {
        self.skip_whitespace()?;

        self.start = self.current;
        self.start_line = self.line;
        self.start_column = self.column;

        let c = match self.advance()? {
            Some(c) => c,
            None => return Ok(self.make_token(TokenKind::Eof)),
        };

        if is_identifier_start(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            '.' => Ok(self.make_token(TokenKind::Dot)),
            ';' => Ok(self.make_token(TokenKind::Semicolon)),
            '"' => self.string(),
            '+' => {
                let kind = if self.match_byte(b'=') { TokenKind::PlusEqual } else { TokenKind::Plus };
                Ok(self.make_token(kind))
            }
            '-' => {
                let kind =
                    if self.match_byte(b'=') { TokenKind::MinusEqual } else { TokenKind::Minus };
                Ok(self.make_token(kind))
            }
            '*' => {
                let kind = if self.match_byte(b'=') { TokenKind::StarEqual } else { TokenKind::Star };
                Ok(self.make_token(kind))
            }
            '/' => {
                let kind =
                    if self.match_byte(b'=') { TokenKind::SlashEqual } else { TokenKind::Slash };
                Ok(self.make_token(kind))
            }
            '!' => {
                let kind = if self.match_byte(b'=') { TokenKind::BangEqual } else { TokenKind::Bang };
                Ok(self.make_token(kind))
            }
            '=' => {
                let kind =
                    if self.match_byte(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                Ok(self.make_token(kind))
            }
            '<' => {
                let kind = if self.match_byte(b'=') { TokenKind::LessEqual } else { TokenKind::Less };
                Ok(self.make_token(kind))
            }
            '>' => {
                let kind =
                    if self.match_byte(b'=') { TokenKind::GreaterEqual } else { TokenKind::Greater };
                Ok(self.make_token(kind))
            }
            c => Err(self.error_at_start(ScanErrorKind::UnexpectedCharacter(c))),
        }
    }

    /// Skips whitespace and `//` line comments, keeping the line and column
    /// counters current.
    fn skip_whitespace(&mut self) -> Result<(), ScanError> {
        loop {
            match self.peek()? {
                Some(c) if c.is_whitespace() => {
                    self.advance()?;
                }
                Some('/') if self.source.get(self.current + 1) == Some(&b'/') => {
                    while !matches!(self.peek()?, None | Some('\n')) {
                        self.advance()?;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn identifier(&mut self) -> Result<Token<'a>, ScanError> {
        while self.peek()?.is_some_and(is_identifier_continue) {
            self.advance()?;
        }
        Ok(self.make_token(keyword_kind(self.lexeme())))
    }

    fn number(&mut self) -> Result<Token<'a>, ScanError> {
        while self.peek()?.is_some_and(|c| c.is_ascii_digit()) {
            self.advance()?;
        }

        if self.peek()? == Some('.') {
            // Only consume the dot as part of the number; a dot with no
            // digit after it does not form a valid literal.
            self.advance()?;
            if !self.peek()?.is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.error_at_start(ScanErrorKind::InvalidNumber));
            }
            while self.peek()?.is_some_and(|c| c.is_ascii_digit()) {
                self.advance()?;
            }
        }

        Ok(self.make_token(TokenKind::Number))
    }

    fn string(&mut self) -> Result<Token<'a>, ScanError> {
        loop {
            match self.advance()? {
                None => return Err(self.error_at_start(ScanErrorKind::UnterminatedString)),
                Some('"') => break,
                Some(_) => {}
            }
        }

        // The lexeme excludes the delimiting quotes.
        let lexeme = self.lexeme_at(self.start + 1, self.current - 1);
        Ok(Token {
            kind: TokenKind::String,
            lexeme,
            line: self.start_line,
            column: self.start_column,
        })
    }

    fn make_token(&self, kind: TokenKind) -> Token<'a> {
        Token { kind, lexeme: self.lexeme(), line: self.start_line, column: self.start_column }
    }

    fn lexeme(&self) -> &'a str {
        self.lexeme_at(self.start, self.current)
    }

    fn lexeme_at(&self, start: usize, end: usize) -> &'a str {
        // Every byte in the span was decoded while scanning.
        unsafe { str::from_utf8_unchecked(&self.source[start..end]) }
    }

    /// Decodes the character at the cursor without consuming it.
    fn peek(&self) -> Result<Option<char>, ScanError> {
        match self.decode(self.current) {
            Ok(decoded) => Ok(decoded.map(|(c, _)| c)),
            Err(kind) => Err(self.error_here(kind)),
        }
    }

    /// Consumes and returns the character at the cursor. Decoding errors
    /// leave the cursor in place; [`Scanner::scan_token`] skips the byte.
    fn advance(&mut self) -> Result<Option<char>, ScanError> {
        match self.decode(self.current) {
            Ok(None) => Ok(None),
            Ok(Some((c, len))) => {
                self.current += len;
                if c == '\n' {
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
                Ok(Some(c))
            }
            Err(kind) => Err(self.error_here(kind)),
        }
    }

    /// Consumes the next byte iff it equals `byte`. Only used for ASCII
    /// punctuation lookahead.
    fn match_byte(&mut self, byte: u8) -> bool {
        if self.source.get(self.current) == Some(&byte) {
            self.current += 1;
            self.column += 1;
            true
        } else {
            false
        }
    }

    fn decode(&self, idx: usize) -> Result<Option<(char, usize)>, ScanErrorKind> {
        let bytes = match self.source.get(idx..) {
            None | Some([]) => return Ok(None),
            Some(bytes) => bytes,
        };
        let len = match bytes[0] {
            b if b < 0x80 => 1,
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => return Err(ScanErrorKind::InvalidUtf8),
        };
        let bytes = bytes.get(..len).ok_or(ScanErrorKind::InvalidUtf8)?;
        match str::from_utf8(bytes) {
            Ok(s) => Ok(s.chars().next().map(|c| (c, len))),
            Err(_) => Err(ScanErrorKind::InvalidUtf8),
        }
    }

    fn error_here(&self, kind: ScanErrorKind) -> ScanError {
        ScanError { kind, line: self.line, column: self.column }
    }

    fn error_at_start(&self, kind: ScanErrorKind) -> ScanError {
        ScanError { kind, line: self.start_line, column: self.start_column }
    }
}

/// Reserved words, matched by exact byte equality.
fn keyword_kind(lexeme: &str) -> TokenKind {
    match lexeme {
        "and" => TokenKind::And,
        "class" => TokenKind::Class,
        "else" => TokenKind::Else,
        "false" => TokenKind::False,
        "for" => TokenKind::For,
        "fun" => TokenKind::Fun,
        "if" => TokenKind::If,
        "nil" => TokenKind::Nil,
        "or" => TokenKind::Or,
        "print" => TokenKind::Print,
        "return" => TokenKind::Return,
        "super" => TokenKind::Super,
        "this" => TokenKind::This,
        "true" => TokenKind::True,
        "let" => TokenKind::Let,
        "while" => TokenKind::While,
        _ => TokenKind::Identifier,
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic()
        || c == '_'
        || matches!(c,
            '\u{00C0}'..='\u{024F}'   // Latin-1 supplement and Latin extended
            | '\u{0370}'..='\u{03FF}' // Greek
            | '\u{0400}'..='\u{04FF}' // Cyrillic
            | '\u{0590}'..='\u{05FF}' // Hebrew
            | '\u{0600}'..='\u{06FF}' // Arabic
            | '\u{3040}'..='\u{309F}' // Hiragana
            | '\u{30A0}'..='\u{30FF}' // Katakana
            | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        )
}

fn is_identifier_continue(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn scan(source: &str) -> Vec<Token> {
        let mut scanner = Scanner::new(source.as_bytes());
        let mut tokens = Vec::new();
        loop {
            let token = scanner.scan_token().unwrap();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        scan(source).iter().map(|token| token.kind).collect()
    }

    #[test]
    fn punctuation_and_lookahead() {
        assert_eq!(
            kinds("( ) { } , . ; ! != = == < <= > >= + += - -= * *= / /="),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Semicolon,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Plus,
                TokenKind::PlusEqual,
                TokenKind::Minus,
                TokenKind::MinusEqual,
                TokenKind::Star,
                TokenKind::StarEqual,
                TokenKind::Slash,
                TokenKind::SlashEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("let lettuce while whiled and android"),
            vec![
                TokenKind::Let,
                TokenKind::Identifier,
                TokenKind::While,
                TokenKind::Identifier,
                TokenKind::And,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unicode_identifiers() {
        let tokens = scan("let παράδειγμα = 1; let 変数 = 2;");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme, "παράδειγμα");
        assert_eq!(tokens[6].kind, TokenKind::Identifier);
        assert_eq!(tokens[6].lexeme, "変数");
    }

    #[test]
    fn numbers() {
        let tokens = scan("0 123 4.5");
        assert_eq!(tokens[0].lexeme, "0");
        assert_eq!(tokens[1].lexeme, "123");
        assert_eq!(tokens[2].lexeme, "4.5");
        assert!(tokens[..3].iter().all(|token| token.kind == TokenKind::Number));
    }

    #[test]
    fn trailing_dot_is_invalid() {
        let mut scanner = Scanner::new(b"12.");
        let err = scanner.scan_token().unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::InvalidNumber);
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn string_lexeme_excludes_quotes() {
        let tokens = scan("\"foo bar\"");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "foo bar");
    }

    #[test]
    fn string_spans_lines() {
        let mut scanner = Scanner::new(b"\"a\nb\" c");
        let string = scanner.scan_token().unwrap();
        assert_eq!(string.kind, TokenKind::String);
        assert_eq!(string.lexeme, "a\nb");
        assert_eq!((string.line, string.column), (1, 1));

        let ident = scanner.scan_token().unwrap();
        assert_eq!((ident.line, ident.column), (2, 4));
    }

    #[test]
    fn unterminated_string() {
        let mut scanner = Scanner::new(b"  \"abc");
        let err = scanner.scan_token().unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::UnterminatedString);
        assert_eq!((err.line, err.column), (1, 3));
    }

    #[test]
    fn unexpected_character() {
        let mut scanner = Scanner::new("@".as_bytes());
        let err = scanner.scan_token().unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::UnexpectedCharacter('@'));
        // The scanner recovers past the offending character.
        assert_eq!(scanner.scan_token().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn invalid_utf8_is_skipped() {
        let mut scanner = Scanner::new(b"\xFF 1");
        let err = scanner.scan_token().unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::InvalidUtf8);
        assert_eq!(scanner.scan_token().unwrap().kind, TokenKind::Number);
    }

    #[test]
    fn comments_and_whitespace() {
        assert_eq!(
            kinds("1 // comment until end of line\r\n\t 2"),
            vec![TokenKind::Number, TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn lines_and_columns() {
        let tokens = scan("let a = 1;\n  print a;");
        let positions: Vec<_> = tokens.iter().map(|token| (token.line, token.column)).collect();
        assert_eq!(
            positions,
            vec![(1, 1), (1, 5), (1, 7), (1, 9), (1, 10), (2, 3), (2, 9), (2, 10), (2, 11)]
        );
    }

    #[test]
    fn eof_position_tracks_scanner() {
        let tokens = scan("a\nbb");
        let eof = tokens.last().unwrap();
        assert_eq!((eof.line, eof.column), (2, 3));
    }

    #[test]
    fn lexemes_are_views_into_the_source() {
        let source = "let answer = 42;";
        let range = source.as_bytes().as_ptr_range();
        for token in scan(source) {
            if !token.lexeme.is_empty() {
                assert!(range.contains(&token.lexeme.as_ptr()));
            }
        }
    }
}
