use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Ident(String),
    Number(f64),
    Char(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Ident(ident) => write!(f, "identifier '{}'", ident),
            Token::Number(num) => write!(f, "number {}", num),
            Token::Char(c) => write!(f, "'{}'", c),
        }
    }
}

lazy_static! {
    static ref NUMBER_PREFIX_RE: Regex = Regex::new(r"^\d*\.?\d*").unwrap();
}

/// parses the longest valid decimal prefix of a run of digits and dots, so
/// `1.2.3` reads as `1.2` and a lone `.` reads as `0`
fn parse_number(run: &str) -> f64 {
    NUMBER_PREFIX_RE
        .find(run)
        .and_then(|prefix| prefix.as_str().parse().ok())
        .unwrap_or(0.0)
}

/// Hand-rolled lexer with a single character of lookahead. Reading past the
/// end of the input keeps yielding `Token::Eof`.
pub struct Lexer<I: Iterator<Item = char>> {
    chars: I,
    last_char: Option<char>,
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(chars: I) -> Self {
        Self {
            chars,
            last_char: Some(' '),
        }
    }

    fn bump(&mut self) -> Option<char> {
        self.last_char = self.chars.next();
        self.last_char
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            while matches!(self.last_char, Some(c) if c.is_ascii_whitespace()) {
                self.bump();
            }

            let current = match self.last_char {
                Some(c) => c,
                None => return Token::Eof,
            };

            if current.is_ascii_alphabetic() {
                let mut ident = current.to_string();
                while let Some(c) = self.bump().filter(char::is_ascii_alphanumeric) {
                    ident.push(c);
                }
                return match ident.as_str() {
                    "def" => Token::Def,
                    "extern" => Token::Extern,
                    _ => Token::Ident(ident),
                };
            }

            if current.is_ascii_digit() || current == '.' {
                let mut run = current.to_string();
                while let Some(c) = self.bump().filter(|c| c.is_ascii_digit() || *c == '.') {
                    run.push(c);
                }
                return Token::Number(parse_number(&run));
            }

            if current == '#' {
                while !matches!(self.bump(), None | Some('\n') | Some('\r')) {}
                continue;
            }

            self.bump();
            return Token::Char(current);
        }
    }
}

/// lex a whole string, up to and including the first `Token::Eof`
pub fn lex(input: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(input.chars());
    let mut res = Vec::new();
    loop {
        let token = lexer.next_token();
        let is_eof = token == Token::Eof;
        res.push(token);
        if is_eof {
            break;
        }
    }
    res
}
