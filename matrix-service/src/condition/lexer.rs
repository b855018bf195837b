// Condition Lexer
// Tokenizes predicate expressions like "arch == 'x64' && libtorrent != '1.2.15'"

use std::fmt;
use thiserror::Error;

/// Token types for condition expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    True,
    False,
    String(String),
    Identifier(String),

    Eq,  // ==
    Ne,  // !=
    And, // &&
    Or,  // ||
    Not, // !

    LParen, // (
    RParen, // )
    Comma,  // ,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

/// Lexer error with byte position
#[derive(Debug, Clone, Error)]
#[error("lex error at position {position}: {message}")]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

/// Tokenizer for condition expressions
pub struct Lexer<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            position: 0,
        }
    }

    /// Tokenize the whole input, appending a trailing Eof
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let Some(&c) = self.input.get(self.position) else {
            return Ok(Token::Eof);
        };

        match c {
            b'(' => {
                self.position += 1;
                Ok(Token::LParen)
            }
            b')' => {
                self.position += 1;
                Ok(Token::RParen)
            }
            b',' => {
                self.position += 1;
                Ok(Token::Comma)
            }
            b'=' => self.expect_pair(b'=', Token::Eq),
            b'&' => self.expect_pair(b'&', Token::And),
            b'|' => self.expect_pair(b'|', Token::Or),
            b'!' => {
                if self.input.get(self.position + 1) == Some(&b'=') {
                    self.position += 2;
                    Ok(Token::Ne)
                } else {
                    self.position += 1;
                    Ok(Token::Not)
                }
            }
            b'\'' => self.lex_string(),
            c if c.is_ascii_alphabetic() || c == b'_' => Ok(self.lex_identifier()),
            c => Err(self.error(format!("unexpected character '{}'", c as char))),
        }
    }

    fn expect_pair(&mut self, second: u8, token: Token) -> Result<Token, LexError> {
        if self.input.get(self.position + 1) == Some(&second) {
            self.position += 2;
            Ok(token)
        } else {
            Err(self.error(format!(
                "expected '{}{}'",
                second as char, second as char
            )))
        }
    }

    fn lex_string(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        self.position += 1; // opening quote
        let mut value = String::new();
        while let Some(&c) = self.input.get(self.position) {
            self.position += 1;
            if c == b'\'' {
                // doubled quote is an escaped quote
                if self.input.get(self.position) == Some(&b'\'') {
                    value.push('\'');
                    self.position += 1;
                } else {
                    return Ok(Token::String(value));
                }
            } else {
                value.push(c as char);
            }
        }
        Err(LexError {
            message: "unterminated string literal".to_string(),
            position: start,
        })
    }

    fn lex_identifier(&mut self) -> Token {
        let start = self.position;
        while let Some(&c) = self.input.get(self.position) {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.position += 1;
            } else {
                break;
            }
        }
        let word = std::str::from_utf8(&self.input[start..self.position])
            .unwrap_or_default()
            .to_string();
        match word.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(word),
        }
    }

    fn skip_whitespace(&mut self) {
        while self
            .input
            .get(self.position)
            .is_some_and(|c| c.is_ascii_whitespace())
        {
            self.position += 1;
        }
    }

    fn error(&self, message: String) -> LexError {
        LexError {
            message,
            position: self.position,
        }
    }
}
