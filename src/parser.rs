use std::collections::HashMap;

use crate::ast::{Expression, Function, Prototype};
use crate::lexer::{Lexer, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("expected an expression, found {0}")]
    ExpectedExpression(Token),
    #[error("expected ')' or ',' in argument list, found {0}")]
    ExpectedArgumentSeparator(Token),
    #[error("expected ')', found {0}")]
    ExpectedCloseParen(Token),
    #[error("expected function name in prototype, found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected '(' in prototype, found {0}")]
    ExpectedPrototypeOpenParen(Token),
    #[error("expected ')' in prototype, found {0}")]
    ExpectedPrototypeCloseParen(Token),
    #[error("duplicate parameter {1} in prototype {0}")]
    DuplicateParameter(String, String),
}

pub type PartialParseResult = Result<Expression, ParserError>;

/// Binding power of anything that isn't a binary operator.
const NOT_AN_OPERATOR: i32 = -1;

/// Recursive descent parser holding one token of lookahead. Every entry point
/// expects `current` to be primed with the first token of its construct and
/// leaves it on the first token after it.
pub struct Parser<I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    current: Token,
    pub operator_precedence: HashMap<char, i32>,
}

impl<I: Iterator<Item = char>> Parser<I> {
    pub fn new(lexer: Lexer<I>) -> Self {
        let mut operator_precedence = HashMap::new();
        operator_precedence.insert('<', 10);
        operator_precedence.insert('+', 20);
        operator_precedence.insert('-', 20);
        operator_precedence.insert('*', 40);
        Self {
            lexer,
            current: Token::Eof,
            operator_precedence,
        }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    /// reads the next token into `current`
    pub fn advance(&mut self) -> &Token {
        self.current = self.lexer.next_token();
        &self.current
    }

    fn token_precedence(&self) -> i32 {
        match self.current {
            Token::Char(op) => match self.operator_precedence.get(&op) {
                Some(&pr) if pr > 0 => pr,
                _ => NOT_AN_OPERATOR,
            },
            _ => NOT_AN_OPERATOR,
        }
    }

    fn parse_number(&mut self, value: f64) -> PartialParseResult {
        self.advance();
        Ok(Expression::Literal(value))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.advance();
        let res = self.parse_expression()?;
        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedCloseParen(self.current.clone()));
        }
        self.advance();
        Ok(res)
    }

    fn parse_identifier(&mut self, ident: String) -> PartialParseResult {
        self.advance();
        if self.current != Token::Char('(') {
            return Ok(Expression::Variable(ident));
        }

        self.advance();
        let mut args = Vec::new();
        if self.current != Token::Char(')') {
            loop {
                args.push(self.parse_expression()?);
                match self.current {
                    Token::Char(')') => break,
                    Token::Char(',') => {
                        self.advance();
                    }
                    _ => return Err(ParserError::ExpectedArgumentSeparator(self.current.clone())),
                }
            }
        }
        self.advance();

        Ok(Expression::Call(ident, args))
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current.clone() {
            Token::Ident(ident) => self.parse_identifier(ident),
            Token::Number(value) => self.parse_number(value),
            Token::Char('(') => self.parse_nested(),
            tok => Err(ParserError::ExpectedExpression(tok)),
        }
    }

    fn parse_rhs(&mut self, expr_precedence: i32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let precedence = self.token_precedence();
            if precedence < expr_precedence {
                return Ok(result);
            }
            let operator = match self.current {
                Token::Char(op) => op,
                _ => unreachable!("only character tokens carry a precedence"),
            };
            self.advance();

            let mut rhs = self.parse_primary()?;

            if precedence < self.token_precedence() {
                rhs = self.parse_rhs(precedence + 1, rhs)?;
            }

            result = Expression::binary(operator, result, rhs);
        }
    }

    pub fn parse_expression(&mut self) -> PartialParseResult {
        let lhs = self.parse_primary()?;
        self.parse_rhs(0, lhs)
    }

    pub fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        let name = match self.current.clone() {
            Token::Ident(name) => name,
            tok => return Err(ParserError::ExpectedFunctionName(tok)),
        };
        self.advance();

        if self.current != Token::Char('(') {
            return Err(ParserError::ExpectedPrototypeOpenParen(self.current.clone()));
        }

        let mut args: Vec<String> = Vec::new();
        while let Token::Ident(arg) = self.advance().clone() {
            if args.contains(&arg) {
                return Err(ParserError::DuplicateParameter(name, arg));
            }
            args.push(arg);
        }

        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedPrototypeCloseParen(self.current.clone()));
        }
        self.advance();

        Ok(Prototype { name, args })
    }

    pub fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.advance();
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.advance();
        self.parse_prototype()
    }

    pub fn parse_top_level_expr(&mut self) -> Result<Function, ParserError> {
        let body = self.parse_expression()?;
        Ok(Function {
            prototype: Prototype::anonymous(),
            body,
        })
    }
}
