use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
    #[error("Unterminated string literal at position {position}")]
    UnterminatedString { position: usize },
    #[error("Invalid escape sequence '\\{escape}' at position {position}")]
    InvalidEscape { escape: char, position: usize },
    #[error("Invalid number literal '{literal}' at position {position}")]
    InvalidNumber { literal: String, position: usize },
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        self.skip_whitespace();

        let start = self.pos;
        let ch = match self.peek_char() {
            Some(ch) => ch,
            None => return Ok(Token::new(TokenKind::Eof, Span::new(start, start))),
        };

        if let Some(token) = self.try_read_operator(ch, start) {
            return Ok(token);
        }

        match ch {
            '"' | '\'' => self.read_string(ch, start),
            '.' => self.read_dot(start),
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier(start)),
            _ => Err(LexError::UnexpectedCharacter {
                character: ch,
                position: start,
            }),
        }
    }

    fn try_read_operator(&mut self, ch: char, start: usize) -> Option<Token<'a>> {
        let kind = match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => self.one_or_two('*', TokenKind::Star, TokenKind::StarStar),
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '~' => TokenKind::Tilde,
            '|' => self.one_or_two('|', TokenKind::Pipe, TokenKind::PipePipe),
            '^' => TokenKind::Caret,
            '&' => self.one_or_two('&', TokenKind::Amp, TokenKind::AmpAmp),
            '=' => {
                if self.peek_second() == Some('=') {
                    self.consume_char();
                    TokenKind::Eq
                } else {
                    return None;
                }
            }
            '!' => self.one_or_two('=', TokenKind::Bang, TokenKind::NotEq),
            '<' => self.one_or_two('=', TokenKind::Less, TokenKind::LessEq),
            '>' => self.one_or_two('=', TokenKind::Greater, TokenKind::GreaterEq),
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            _ => return None,
        };

        self.consume_char();
        Some(Token::new(kind, Span::new(start, self.pos)))
    }

    /// Resolves a one- or two-character operator: consumes the second
    /// character when it matches `next`, leaving the first to the caller.
    fn one_or_two(
        &mut self,
        next: char,
        single: TokenKind<'a>,
        double: TokenKind<'a>,
    ) -> TokenKind<'a> {
        if self.peek_second() == Some(next) {
            self.consume_char();
            double
        } else {
            single
        }
    }

    fn read_dot(&mut self, start: usize) -> LexResult<Token<'a>> {
        match self.peek_second() {
            Some('.') => {
                self.consume_char();
                self.consume_char();
                Ok(Token::new(TokenKind::DotDot, Span::new(start, self.pos)))
            }
            Some(c) if c.is_ascii_digit() => self.read_number(start),
            _ => {
                self.consume_char();
                Ok(Token::new(TokenKind::Dot, Span::new(start, self.pos)))
            }
        }
    }

    fn read_number(&mut self, start: usize) -> LexResult<Token<'a>> {
        if self.peek_char() == Some('0') && matches!(self.peek_second(), Some('x') | Some('X')) {
            return self.read_hex_number(start);
        }

        if self.peek_char() == Some('.') {
            self.consume_char();
        }
        self.consume_while(|c| c.is_ascii_digit());

        // A fractional part only counts when a digit follows the dot,
        // otherwise `1..5` would swallow the range operator.
        if self.peek_char() == Some('.')
            && self.peek_second().map(|c| c.is_ascii_digit()) == Some(true)
        {
            self.consume_char();
            self.consume_while(|c| c.is_ascii_digit());
        }

        let literal = &self.input[start..self.pos];
        let value = literal
            .parse::<f64>()
            .map_err(|_| LexError::InvalidNumber {
                literal: literal.to_string(),
                position: start,
            })?;
        Ok(Token::new(
            TokenKind::Number(value),
            Span::new(start, self.pos),
        ))
    }

    fn read_hex_number(&mut self, start: usize) -> LexResult<Token<'a>> {
        self.consume_char(); // 0
        self.consume_char(); // x
        let digits_start = self.pos;
        self.consume_while(|c| c.is_ascii_hexdigit());

        let digits = &self.input[digits_start..self.pos];
        let value = u64::from_str_radix(digits, 16).map_err(|_| LexError::InvalidNumber {
            literal: self.input[start..self.pos].to_string(),
            position: start,
        })?;
        Ok(Token::new(
            TokenKind::Number(value as f64),
            Span::new(start, self.pos),
        ))
    }

    fn read_string(&mut self, quote: char, start: usize) -> LexResult<Token<'a>> {
        self.consume_char(); // opening quote
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    return Err(LexError::UnterminatedString { position: start });
                }
                Some(c) if c == quote => {
                    self.consume_char();
                    return Ok(Token::new(
                        TokenKind::Text(value),
                        Span::new(start, self.pos),
                    ));
                }
                Some('\\') => {
                    let escape_pos = self.pos;
                    self.consume_char();
                    let escape = self
                        .consume_char()
                        .ok_or(LexError::UnterminatedString { position: start })?;
                    value.push(match escape {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        '\\' | '\'' | '"' => escape,
                        other => {
                            return Err(LexError::InvalidEscape {
                                escape: other,
                                position: escape_pos,
                            });
                        }
                    });
                }
                Some(c) => {
                    self.consume_char();
                    value.push(c);
                }
            }
        }
    }

    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        self.consume_while(|c| c.is_alphanumeric() || c == '_');
        let ident = &self.input[start..self.pos];

        let kind = match ident {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "matches" => TokenKind::Matches,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ => TokenKind::Identifier(ident),
        };
        Token::new(kind, Span::new(start, self.pos))
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(|c| c == ' ' || c == '\t' || c == '\n' || c == '\r');
    }

    fn consume_while<P>(&mut self, keep_predicate: P) -> usize
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !keep_predicate(c) {
                break;
            }
            self.consume_char();
        }
        self.pos - start
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) => Some(Ok(token)),
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
