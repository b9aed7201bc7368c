//! The lexer.

use std::rc::Rc;

use crate::ll::error::{Error, ErrorKind, Location};

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i32),
    Number(f64),
    String(Rc<str>),

    Identifier(Rc<str>),

    True,
    False,
    Null,
    Undefined,

    Function,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,

    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %

    Increment, // ++
    Decrement, // --

    Bang,         // !
    And,          // &&
    Or,           // ||
    Equal,        // ==
    NotEqual,     // !=
    Less,         // <
    Greater,      // >
    LessEqual,    // <=
    GreaterEqual, // >=

    Assign,        // =
    PlusAssign,    // +=
    MinusAssign,   // -=
    StarAssign,    // *=
    SlashAssign,   // /=
    PercentAssign, // %=

    Question, // ?
    Colon,    // :
    Dot,      // .
    Comma,    // ,
    Semicolon, // ;

    LeftParen,    // (
    RightParen,   // )
    LeftBrace,    // {
    RightBrace,   // }
    LeftBracket,  // [
    RightBracket, // ]

    Eof,
}

impl TokenKind {
    /// A short human-readable description, used in error messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Int(_) => "int literal",
            Self::Number(_) => "number literal",
            Self::String(_) => "string literal",
            Self::Identifier(_) => "identifier",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Function => "function",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::Return => "return",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Increment => "++",
            Self::Decrement => "--",
            Self::Bang => "!",
            Self::And => "&&",
            Self::Or => "||",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::StarAssign => "*=",
            Self::SlashAssign => "/=",
            Self::PercentAssign => "%=",
            Self::Question => "?",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::LeftParen => "(",
            Self::RightParen => ")",
            Self::LeftBrace => "{",
            Self::RightBrace => "}",
            Self::LeftBracket => "[",
            Self::RightBracket => "]",
            Self::Eof => "end of file",
        }
    }
}

/// A token kind paired with its source code location.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
    /// Whether a line terminator appeared between the previous token and this one. Statements
    /// may end at a line break instead of a semicolon.
    pub line_break_before: bool,
}

/// Lexer state.
pub struct Lexer {
    pub module_name: Rc<str>,
    input: String,
    location: Location,
    token_start: Location,
    line_break_before: bool,
}

impl Lexer {
    /// The EOF sentinel character.
    const EOF: char = '\0';

    /// Creates a new lexer.
    pub fn new(module_name: Rc<str>, input: String) -> Self {
        Self {
            module_name,
            input,
            location: Default::default(),
            token_start: Default::default(),
            line_break_before: false,
        }
    }

    /// Emits an error.
    fn error(&self, kind: ErrorKind) -> Error {
        Error::Compile {
            module_name: Rc::clone(&self.module_name),
            kind,
            location: self.location,
        }
    }

    /// Emits a token at the `token_start` location.
    fn token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            location: self.token_start,
            line_break_before: self.line_break_before,
        }
    }

    /// Returns the character at the current position.
    fn get(&self) -> char {
        self.input[self.location.byte..].chars().next().unwrap_or(Self::EOF)
    }

    /// Advances the current position by a character.
    fn advance(&mut self) {
        self.location.byte += self.get().len_utf8();
        self.location.column += 1;
    }

    /// Advances the source location to the next line.
    fn advance_line(&mut self) {
        self.location.line += 1;
        self.location.column = 1;
    }

    /// Skips whitespace and `#` comments, noting whether a line terminator was crossed.
    fn skip_whitespace(&mut self) {
        loop {
            match self.get() {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '#' => {
                    while self.get() != '\n' && self.get() != Self::EOF {
                        self.advance();
                    }
                }
                '\n' => {
                    self.advance();
                    self.advance_line();
                    self.line_break_before = true;
                }
                _ => break,
            }
        }
    }

    /// Parses a number: an int literal, or a double when it has a decimal point or does not fit
    /// an `i32`.
    fn number(&mut self) -> Result<TokenKind, Error> {
        let start = self.location.byte;
        let mut is_double = false;
        while let '0'..='9' = self.get() {
            self.advance();
        }
        if self.get() == '.' {
            is_double = true;
            self.advance();
            if !self.get().is_ascii_digit() {
                return Err(self.error(ErrorKind::MissingDigitsAfterDecimalPoint));
            }
            while let '0'..='9' = self.get() {
                self.advance();
            }
        }
        let text = &self.input[start..self.location.byte];
        if !is_double {
            if let Ok(int) = text.parse::<i32>() {
                return Ok(TokenKind::Int(int));
            }
        }
        // Parsing here must succeed as we only allow decimal digits and a decimal point '.'.
        Ok(TokenKind::Number(text.parse().unwrap()))
    }

    /// Parses a string literal. There are no escape sequences.
    fn string(&mut self) -> Result<String, Error> {
        self.advance();
        let start = self.location.byte;
        while self.get() != '"' {
            if self.get() == Self::EOF {
                return Err(self.error(ErrorKind::MissingClosingQuote));
            }
            if self.get() == '\n' {
                self.advance();
                self.advance_line();
                continue;
            }
            self.advance();
        }
        let result = self.input[start..self.location.byte].to_owned();
        self.advance();
        Ok(result)
    }

    /// Parses a single character token.
    fn single_char_token(&mut self, kind: TokenKind) -> Token {
        self.advance();
        self.token(kind)
    }

    /// Parses a token that's either one or two characters.
    fn single_or_double_char_token(
        &mut self,
        single: TokenKind,
        second: char,
        double: TokenKind,
    ) -> Token {
        self.advance();
        if self.get() == second {
            self.advance();
            self.token(double)
        } else {
            self.token(single)
        }
    }

    /// Parses an operator that may be doubled (`++`) or followed by `=` (`+=`).
    fn arithmetic_token(
        &mut self,
        single: TokenKind,
        doubled: Option<TokenKind>,
        with_assign: TokenKind,
    ) -> Token {
        let first = self.get();
        self.advance();
        if let Some(doubled) = doubled {
            if self.get() == first {
                self.advance();
                return self.token(doubled);
            }
        }
        if self.get() == '=' {
            self.advance();
            return self.token(with_assign);
        }
        self.token(single)
    }

    /// Returns whether `c` can be the first character of an identifier.
    fn is_identifier_start_char(c: char) -> bool {
        c.is_alphabetic() || c == '_'
    }

    /// Returns whether `c` can be a continuing character of an identifier.
    fn is_identifier_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    /// Parses an identifier.
    fn identifier(&mut self) -> &str {
        let start = self.location.byte;
        while Self::is_identifier_char(self.get()) {
            self.advance();
        }
        let end = self.location.byte;
        &self.input[start..end]
    }

    /// Returns which keyword this identifier corresponds to, or `None` if the identifier is not
    /// reserved.
    fn keyword(identifier: &str) -> Option<TokenKind> {
        Some(match identifier {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "undefined" => TokenKind::Undefined,

            "function" => TokenKind::Function,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,

            _ => return None,
        })
    }

    /// Parses the next token and returns it.
    pub fn next_token(&mut self) -> Result<Token, Error> {
        self.line_break_before = false;
        self.skip_whitespace();
        self.token_start = self.location;

        let token = match self.get() {
            '0'..='9' => {
                let kind = self.number()?;
                Ok(self.token(kind))
            }
            '"' => {
                let string = self.string()?;
                Ok(self.token(TokenKind::String(Rc::from(string))))
            }

            c if Self::is_identifier_start_char(c) => {
                let identifier = self.identifier();
                Ok(if let Some(keyword) = Self::keyword(identifier) {
                    self.token(keyword)
                } else {
                    let identifier = Rc::from(identifier);
                    self.token(TokenKind::Identifier(identifier))
                })
            }

            '+' => Ok(self.arithmetic_token(
                TokenKind::Plus,
                Some(TokenKind::Increment),
                TokenKind::PlusAssign,
            )),
            '-' => Ok(self.arithmetic_token(
                TokenKind::Minus,
                Some(TokenKind::Decrement),
                TokenKind::MinusAssign,
            )),
            '*' => Ok(self.arithmetic_token(TokenKind::Star, None, TokenKind::StarAssign)),
            '/' => Ok(self.arithmetic_token(TokenKind::Slash, None, TokenKind::SlashAssign)),
            '%' => Ok(self.arithmetic_token(TokenKind::Percent, None, TokenKind::PercentAssign)),

            '=' => Ok(self.single_or_double_char_token(TokenKind::Assign, '=', TokenKind::Equal)),
            '!' => Ok(self.single_or_double_char_token(TokenKind::Bang, '=', TokenKind::NotEqual)),
            '<' => Ok(self.single_or_double_char_token(TokenKind::Less, '=', TokenKind::LessEqual)),
            '>' => {
                Ok(self.single_or_double_char_token(TokenKind::Greater, '=', TokenKind::GreaterEqual))
            }
            '&' => {
                self.advance();
                if self.get() == '&' {
                    self.advance();
                    Ok(self.token(TokenKind::And))
                } else {
                    Err(self.error(ErrorKind::InvalidCharacter('&')))
                }
            }
            '|' => {
                self.advance();
                if self.get() == '|' {
                    self.advance();
                    Ok(self.token(TokenKind::Or))
                } else {
                    Err(self.error(ErrorKind::InvalidCharacter('|')))
                }
            }

            '?' => Ok(self.single_char_token(TokenKind::Question)),
            ':' => Ok(self.single_char_token(TokenKind::Colon)),
            '.' => Ok(self.single_char_token(TokenKind::Dot)),
            ',' => Ok(self.single_char_token(TokenKind::Comma)),
            ';' => Ok(self.single_char_token(TokenKind::Semicolon)),

            '(' => Ok(self.single_char_token(TokenKind::LeftParen)),
            ')' => Ok(self.single_char_token(TokenKind::RightParen)),
            '{' => Ok(self.single_char_token(TokenKind::LeftBrace)),
            '}' => Ok(self.single_char_token(TokenKind::RightBrace)),
            '[' => Ok(self.single_char_token(TokenKind::LeftBracket)),
            ']' => Ok(self.single_char_token(TokenKind::RightBracket)),
            Self::EOF => Ok(self.token(TokenKind::Eof)),
            other => Err(self.error(ErrorKind::InvalidCharacter(other))),
        };
        token
    }

    /// Peeks at what the next token's going to be without advancing the lexer's position.
    pub fn peek_token(&mut self) -> Result<Token, Error> {
        let location = self.location;
        let line_break = self.line_break_before;
        let token = self.next_token()?;
        self.location = location;
        self.line_break_before = line_break;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(Rc::from("(test)"), input.to_owned());
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token().expect("the test input must lex");
            let done = token.kind == TokenKind::Eof;
            kinds.push(token.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex("+ ++ += - -- -= * *= == = != <= >= && ||"),
            vec![
                TokenKind::Plus,
                TokenKind::Increment,
                TokenKind::PlusAssign,
                TokenKind::Minus,
                TokenKind::Decrement,
                TokenKind::MinusAssign,
                TokenKind::Star,
                TokenKind::StarAssign,
                TokenKind::Equal,
                TokenKind::Assign,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            lex("0 42 3.25 2147483647 2147483648"),
            vec![
                TokenKind::Int(0),
                TokenKind::Int(42),
                TokenKind::Number(3.25),
                TokenKind::Int(i32::MAX),
                // Too big for an int literal; falls back to a double.
                TokenKind::Number(2147483648.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_have_no_escapes() {
        assert_eq!(
            lex(r#""foo" "a\b""#),
            vec![
                TokenKind::String(Rc::from("foo")),
                TokenKind::String(Rc::from(r"a\b")),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            lex("1 # comment ###\n2"),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            lex("function forx for returned return"),
            vec![
                TokenKind::Function,
                TokenKind::Identifier(Rc::from("forx")),
                TokenKind::For,
                TokenKind::Identifier(Rc::from("returned")),
                TokenKind::Return,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn line_breaks_are_recorded_on_the_following_token() {
        let mut lexer = Lexer::new(Rc::from("(test)"), "a\nb c".to_owned());
        assert!(!lexer.next_token().unwrap().line_break_before);
        assert!(lexer.next_token().unwrap().line_break_before);
        assert!(!lexer.next_token().unwrap().line_break_before);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut lexer = Lexer::new(Rc::from("(test)"), "\"abc".to_owned());
        assert!(lexer.next_token().is_err());
    }
}
