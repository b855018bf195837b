// Condition Parser
// Recursive descent over lexed tokens, precedence: ! > ==/!= > && > ||

use crate::condition::lexer::Token;

use thiserror::Error;

/// Parsed condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Str(String),
    Ident(String),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
}

impl Expr {
    /// Collect every identifier the expression references (call names are
    /// function names, not identifiers)
    pub fn identifiers(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_identifiers(&mut names);
        names
    }

    fn collect_identifiers(&self, names: &mut Vec<String>) {
        match self {
            Expr::Ident(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::Not(inner) => inner.collect_identifiers(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(names);
                rhs.collect_identifiers(names);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_identifiers(names);
                }
            }
            Expr::Bool(_) | Expr::Str(_) => {}
        }
    }
}

/// Parse error with the offending token
#[derive(Debug, Clone, Error)]
#[error("parse error: {message}")]
pub struct ParseExprError {
    pub message: String,
}

impl ParseExprError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parser over a token stream
pub struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse a complete expression, requiring all input to be consumed
    pub fn parse(mut self) -> Result<Expr, ParseExprError> {
        let expr = self.parse_or()?;
        match self.peek() {
            Token::Eof => Ok(expr),
            token => Err(ParseExprError::new(format!(
                "unexpected '{}' after expression",
                token
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseExprError> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseExprError> {
        let mut lhs = self.parse_comparison()?;
        while *self.peek() == Token::And {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseExprError> {
        let lhs = self.parse_unary()?;
        let op = match self.peek() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_unary()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseExprError> {
        if *self.peek() == Token::Not {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseExprError> {
        match self.peek().clone() {
            Token::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::String(value) => {
                self.advance();
                Ok(Expr::Str(value))
            }
            Token::Identifier(name) => {
                self.advance();
                if *self.peek() == Token::LParen {
                    self.parse_call(name)
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            token => Err(ParseExprError::new(format!(
                "expected a value, found '{}'",
                token
            ))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ParseExprError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            loop {
                args.push(self.parse_or()?);
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        Ok(Expr::Call { name, args })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseExprError> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(ParseExprError::new(format!(
                "expected '{}', found '{}'",
                token,
                self.peek()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::lexer::Lexer;

    fn parse(input: &str) -> Expr {
        ExprParser::new(Lexer::new(input).tokenize().unwrap())
            .parse()
            .unwrap()
    }

    #[test]
    fn test_parse_comparison() {
        let expr = parse("arch == 'x64'");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Eq,
                lhs: Box::new(Expr::Ident("arch".to_string())),
                rhs: Box::new(Expr::Str("x64".to_string())),
            }
        );
    }

    #[test]
    fn test_parse_precedence() {
        // a == 'x' || b == 'y' && c == 'z'  parses as  a==x || (b==y && c==z)
        let expr = parse("a == 'x' || b == 'y' && c == 'z'");
        match expr {
            Expr::Binary {
                op: BinaryOp::Or,
                rhs,
                ..
            } => match *rhs {
                Expr::Binary {
                    op: BinaryOp::And, ..
                } => {}
                other => panic!("expected && on the right, got {:?}", other),
            },
            other => panic!("expected || at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_call() {
        let expr = parse("eq(arch, 'x64')");
        assert_eq!(
            expr,
            Expr::Call {
                name: "eq".to_string(),
                args: vec![
                    Expr::Ident("arch".to_string()),
                    Expr::Str("x64".to_string())
                ],
            }
        );
    }

    #[test]
    fn test_parse_not_and_parens() {
        let expr = parse("!(arch == 'x86')");
        assert!(matches!(expr, Expr::Not(_)));
    }

    #[test]
    fn test_identifiers() {
        let expr = parse("arch == 'x64' && contains(libtorrent, '2.0') && arch != 'arm'");
        assert_eq!(expr.identifiers(), vec!["arch", "libtorrent"]);
    }

    #[test]
    fn test_parse_trailing_garbage() {
        let tokens = Lexer::new("arch == 'x64' 'y'").tokenize().unwrap();
        assert!(ExprParser::new(tokens).parse().is_err());
    }

    #[test]
    fn test_parse_dangling_operator() {
        let tokens = Lexer::new("arch ==").tokenize().unwrap();
        assert!(ExprParser::new(tokens).parse().is_err());
    }
}
