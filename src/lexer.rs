use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Const,
    Fn,
    Import,
    As,
    If,
    Else,
    While,
    Break,
    Continue,
    Return,
    Print,
    Assert,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    DoubleAmpersand,
    DoublePipe,
    Bang,
    BangEqual,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Unknown,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current: 0,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let (idx, ch) = self.chars.next()?;
        self.current = idx + ch.len_utf8();
        Some((idx, ch))
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn bump_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while let Some(ch) = self.peek_char() {
            if !predicate(ch) {
                break;
            }
            self.bump();
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Diagnostic> {
        loop {
            self.bump_while(char::is_whitespace);
            if self.peek_char() != Some('/') {
                return Ok(());
            }
            match self.peek_second() {
                Some('/') => self.bump_while(|ch| ch != '\n'),
                Some('*') => {
                    let start = self.current;
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some((_, ch)) = self.bump() {
                        if ch == '*' && self.match_next('/') {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Lexer,
                            "unterminated block comment",
                        )
                        .with_span(SourceSpan::new(start, self.current)));
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            lexeme: self.source[start..self.current].to_string(),
            span: SourceSpan::new(start, self.current),
        }
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        self.bump_while(|ch| ch.is_alphanumeric() || ch == '_');
        let lexeme = &self.source[start..self.current];
        let kind = keyword_for(lexeme).unwrap_or(TokenKind::Identifier);
        self.token(kind, start)
    }

    fn number_literal(&mut self, start: usize) -> Token {
        self.bump_while(|ch| ch.is_ascii_digit() || ch == '_');
        if self.peek_char() == Some('.') && self.peek_second().is_some_and(|ch| ch.is_ascii_digit())
        {
            self.bump();
            self.bump_while(|ch| ch.is_ascii_digit() || ch == '_');
        }
        self.token(TokenKind::Number, start)
    }

    fn string_literal(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '"' => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        span: SourceSpan::new(start, self.current),
                    });
                }
                '\\' => match self.bump() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, other)) => value.push(other),
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
                .with_span(SourceSpan::new(start, self.current)),
        )
    }

    /// Emits `double` when the next character is `second`, otherwise `single`.
    fn either(&mut self, start: usize, second: char, double: TokenKind, single: TokenKind) -> Token {
        let kind = if self.match_next(second) { double } else { single };
        self.token(kind, start)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let Some((start, ch)) = self.bump() else {
                tokens.push(self.token(TokenKind::Eof, self.current));
                break;
            };

            let token = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.identifier_or_keyword(start),
                '0'..='9' => self.number_literal(start),
                '"' => self.string_literal(start)?,
                '(' => self.token(TokenKind::LParen, start),
                ')' => self.token(TokenKind::RParen, start),
                '{' => self.token(TokenKind::LBrace, start),
                '}' => self.token(TokenKind::RBrace, start),
                '[' => self.token(TokenKind::LBracket, start),
                ']' => self.token(TokenKind::RBracket, start),
                ',' => self.token(TokenKind::Comma, start),
                '.' => self.token(TokenKind::Dot, start),
                ':' => self.token(TokenKind::Colon, start),
                ';' => self.token(TokenKind::Semicolon, start),
                '+' => self.token(TokenKind::Plus, start),
                '-' => self.token(TokenKind::Minus, start),
                '*' => self.token(TokenKind::Star, start),
                '/' => self.token(TokenKind::Slash, start),
                '%' => self.token(TokenKind::Percent, start),
                '=' => self.either(start, '=', TokenKind::EqualEqual, TokenKind::Assign),
                '!' => self.either(start, '=', TokenKind::BangEqual, TokenKind::Bang),
                '<' => self.either(start, '=', TokenKind::LessEqual, TokenKind::Less),
                '>' => self.either(start, '=', TokenKind::GreaterEqual, TokenKind::Greater),
                '&' => self.either(start, '&', TokenKind::DoubleAmpersand, TokenKind::Unknown),
                '|' => self.either(start, '|', TokenKind::DoublePipe, TokenKind::Unknown),
                _ => self.token(TokenKind::Unknown, start),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "var" => Kw::Var,
        "const" => Kw::Const,
        "fn" => Kw::Fn,
        "import" => Kw::Import,
        "as" => Kw::As,
        "if" => Kw::If,
        "else" => Kw::Else,
        "while" => Kw::While,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "return" => Kw::Return,
        "print" => Kw::Print,
        "assert" => Kw::Assert,
        "true" => Kw::True,
        "false" => Kw::False,
        "null" => Kw::Null,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}
