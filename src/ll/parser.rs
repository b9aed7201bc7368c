//! The parser.

use std::mem;
use std::rc::Rc;

use crate::ll::ast::{Ast, NodeId, NodeKind};
use crate::ll::error::{Error, ErrorKind};
use crate::ll::lexer::{Lexer, Token, TokenKind};

/// The parser's state.
pub struct Parser {
    lexer: Lexer,
    ast: Ast,
    /// Whether the statement being parsed sits inside a loop body; gates `break`/`continue`.
    in_loop: bool,
    /// Whether the statement being parsed sits inside a function body; gates `return`.
    in_function: bool,
}

impl Parser {
    /// Constructs a new parser from a lexer.
    pub fn new(lexer: Lexer) -> Self {
        Self {
            ast: Ast::new(Rc::clone(&lexer.module_name)),
            lexer,
            in_loop: false,
            in_function: false,
        }
    }

    /// Constructs a compilation error located at the given token.
    fn error(&self, token: &Token, kind: ErrorKind) -> Error {
        Error::Compile {
            module_name: Rc::clone(&self.lexer.module_name),
            kind,
            location: token.location,
        }
    }

    /// Returns an error if the next token is not of the given kind.
    fn expect(&mut self, kind: TokenKind) -> Result<Token, Error> {
        let next_token = self.lexer.peek_token()?;
        if next_token.kind == kind {
            Ok(self.lexer.next_token()?)
        } else {
            let error = ErrorKind::ExpectedToken {
                expected: kind.description(),
                got: next_token.kind.description(),
            };
            Err(self.error(&next_token, error))
        }
    }

    /// If the next token's kind is equal to `kind`, advances to the next token and returns the
    /// token. Otherwise returns `None`.
    fn try_next(&mut self, kind: TokenKind) -> Result<Option<Token>, Error> {
        let next_token = self.lexer.peek_token()?;
        Ok(if next_token.kind == kind {
            Some(self.lexer.next_token()?)
        } else {
            None
        })
    }

    /// Returns the precedence level of the given token kind.
    fn precedence(kind: &TokenKind) -> i8 {
        match kind {
            | TokenKind::Assign
            | TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign
            | TokenKind::PercentAssign => 1,
            TokenKind::Question => 2,
            TokenKind::Or => 3,
            TokenKind::And => 4,
            TokenKind::Equal | TokenKind::NotEqual => 5,
            | TokenKind::Less
            | TokenKind::Greater
            | TokenKind::LessEqual
            | TokenKind::GreaterEqual => 6,
            TokenKind::Plus | TokenKind::Minus => 7,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 8,
            TokenKind::Increment | TokenKind::Decrement => 9,
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot => 10,
            _ => 0,
        }
    }

    /// Returns the associativity of the given token kind.
    fn associativity(kind: &TokenKind) -> Associativity {
        match kind {
            | TokenKind::Assign
            | TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign
            | TokenKind::PercentAssign
            | TokenKind::Question => Associativity::Right,
            _ => Associativity::Left,
        }
    }

    /// Parses a "unit literal": a literal uniquely identified by a single token's kind.
    fn parse_unit(&mut self, token: Token, kind: NodeKind) -> NodeId {
        self.ast.build_node(kind, ()).with_location(token.location).done()
    }

    /// Parses an identifier in expression position.
    fn parse_identifier(&mut self, token: Token) -> Result<NodeId, Error> {
        if let TokenKind::Identifier(i) = token.kind {
            Ok(self
                .ast
                .build_node(NodeKind::Identifier, ())
                .with_location(token.location)
                .with_string(i.as_ref().to_owned())
                .done())
        } else {
            Err(self.error(&token, ErrorKind::IdentifierExpected))
        }
    }

    /// Parses an identifier used as data: a member name, parameter, or declaration name.
    fn parse_identifier_name(&mut self, token: Token) -> Result<NodeId, Error> {
        if let TokenKind::Identifier(i) = token.kind {
            Ok(self
                .ast
                .build_node(NodeKind::IdentifierName, ())
                .with_location(token.location)
                .with_string(i.as_ref().to_owned())
                .done())
        } else {
            Err(self.error(&token, ErrorKind::IdentifierExpected))
        }
    }

    /// Parses a unary operator.
    fn unary_operator(&mut self, token: Token, kind: NodeKind) -> Result<NodeId, Error> {
        let right = self.parse_expression(Self::precedence(&TokenKind::Star))?;
        Ok(self.ast.build_node(kind, right).with_location(token.location).done())
    }

    /// Parses a comma-separated list terminated by `end`.
    fn parse_comma_separated(
        &mut self,
        dest: &mut Vec<NodeId>,
        end: TokenKind,
        mut next: impl FnMut(&mut Self) -> Result<NodeId, Error>,
    ) -> Result<(), Error> {
        loop {
            let token = self.lexer.peek_token()?;
            match &token.kind {
                TokenKind::Eof => {
                    return Err(self.error(&token, ErrorKind::UnexpectedToken("end of file")))
                }
                kind if *kind == end => {
                    self.lexer.next_token()?;
                    return Ok(());
                }
                _ => (),
            }
            dest.push(next(self)?);
            let token = self.lexer.next_token()?;
            if token.kind == TokenKind::Comma {
                continue;
            }
            if token.kind == end {
                return Ok(());
            }
            let error = ErrorKind::ExpectedToken {
                expected: ",",
                got: token.kind.description(),
            };
            return Err(self.error(&token, error));
        }
    }

    /// Parses an array literal.
    fn parse_array_literal(&mut self, token: Token) -> Result<NodeId, Error> {
        let mut elements = Vec::new();
        self.parse_comma_separated(&mut elements, TokenKind::RightBracket, |p| {
            p.parse_expression(0)
        })?;
        Ok(self
            .ast
            .build_node(NodeKind::Array, ())
            .with_location(token.location)
            .with_children(elements)
            .done())
    }

    /// Parses an object literal.
    fn parse_object_literal(&mut self, token: Token) -> Result<NodeId, Error> {
        let mut properties = Vec::new();
        self.parse_comma_separated(&mut properties, TokenKind::RightBrace, |p| {
            p.parse_property()
        })?;
        Ok(self
            .ast
            .build_node(NodeKind::Object, ())
            .with_location(token.location)
            .with_children(properties)
            .done())
    }

    /// Parses one `key: value` of an object literal. Keys are identifiers or string literals.
    fn parse_property(&mut self) -> Result<NodeId, Error> {
        let token = self.lexer.next_token()?;
        let key = match &token.kind {
            TokenKind::Identifier(_) => self.parse_identifier_name(token.clone())?,
            TokenKind::String(s) => {
                let s = s.as_ref().to_owned();
                self.ast
                    .build_node(NodeKind::String, ())
                    .with_location(token.location)
                    .with_string(s)
                    .done()
            }
            _ => return Err(self.error(&token, ErrorKind::PropertyNameExpected)),
        };
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expression(0)?;
        Ok(self
            .ast
            .build_node(NodeKind::Pair, (key, value))
            .with_location(token.location)
            .done())
    }

    /// Parses a prefix expression.
    fn parse_prefix(&mut self, token: Token) -> Result<NodeId, Error> {
        match &token.kind {
            TokenKind::True => Ok(self.parse_unit(token, NodeKind::True)),
            TokenKind::False => Ok(self.parse_unit(token, NodeKind::False)),
            TokenKind::Null => Ok(self.parse_unit(token, NodeKind::Null)),
            TokenKind::Undefined => Ok(self.parse_unit(token, NodeKind::Undefined)),
            &TokenKind::Int(x) => Ok(self
                .ast
                .build_node(NodeKind::Int, ())
                .with_location(token.location)
                .with_number(f64::from(x))
                .done()),
            &TokenKind::Number(x) => Ok(self
                .ast
                .build_node(NodeKind::Number, ())
                .with_location(token.location)
                .with_number(x)
                .done()),
            TokenKind::String(s) => {
                let s = s.as_ref().to_owned();
                Ok(self
                    .ast
                    .build_node(NodeKind::String, ())
                    .with_location(token.location)
                    .with_string(s)
                    .done())
            }
            TokenKind::Identifier(_) => self.parse_identifier(token),

            TokenKind::Minus => self.unary_operator(token, NodeKind::Negate),
            TokenKind::Plus => self.unary_operator(token, NodeKind::UnaryPlus),
            TokenKind::Bang => self.unary_operator(token, NodeKind::Not),
            TokenKind::Increment => self.unary_operator(token, NodeKind::PreIncrement),
            TokenKind::Decrement => self.unary_operator(token, NodeKind::PreDecrement),

            TokenKind::LeftParen => {
                let inner = self.parse_expression(0)?;
                self.expect(TokenKind::RightParen)?;
                Ok(inner)
            }
            TokenKind::LeftBracket => self.parse_array_literal(token),
            TokenKind::LeftBrace => self.parse_object_literal(token),

            _ => Err(self.error(
                &token,
                ErrorKind::UnexpectedToken(token.kind.description()),
            )),
        }
    }

    /// Parses a binary operator.
    fn binary_operator(
        &mut self,
        left: NodeId,
        token: Token,
        kind: NodeKind,
    ) -> Result<NodeId, Error> {
        let precedence = Self::precedence(&token.kind)
            - (Self::associativity(&token.kind) == Associativity::Right) as i8;
        let right = self.parse_expression(precedence)?;
        Ok(self.ast.build_node(kind, (left, right)).with_location(token.location).done())
    }

    /// Parses an assignment. The target must be an lvalue: an identifier, an index, or a
    /// member access.
    fn assignment(&mut self, left: NodeId, token: Token, kind: NodeKind) -> Result<NodeId, Error> {
        if !matches!(
            self.ast.kind(left),
            NodeKind::Identifier | NodeKind::Index | NodeKind::Dot
        ) {
            return Err(self.error(&token, ErrorKind::InvalidAssignment));
        }
        self.binary_operator(left, token, kind)
    }

    /// Parses a `? :` conditional.
    fn conditional(&mut self, condition: NodeId, token: Token) -> Result<NodeId, Error> {
        let then = self.parse_expression(0)?;
        self.expect(TokenKind::Colon)?;
        let otherwise = self.parse_expression(Self::precedence(&TokenKind::Question) - 1)?;
        Ok(self
            .ast
            .build_node(NodeKind::Conditional, ())
            .with_location(token.location)
            .with_children(vec![condition, then, otherwise])
            .done())
    }

    /// Parses a function call.
    fn function_call(&mut self, left: NodeId, left_paren: Token) -> Result<NodeId, Error> {
        let mut arguments = Vec::new();
        self.parse_comma_separated(&mut arguments, TokenKind::RightParen, |p| {
            p.parse_expression(0)
        })?;
        Ok(self
            .ast
            .build_node(NodeKind::Call, left)
            .with_location(left_paren.location)
            .with_children(arguments)
            .done())
    }

    /// Parses an infix token.
    fn parse_infix(&mut self, left: NodeId, token: Token) -> Result<NodeId, Error> {
        match &token.kind {
            TokenKind::Plus => self.binary_operator(left, token, NodeKind::Add),
            TokenKind::Minus => self.binary_operator(left, token, NodeKind::Subtract),
            TokenKind::Star => self.binary_operator(left, token, NodeKind::Multiply),
            TokenKind::Slash => self.binary_operator(left, token, NodeKind::Divide),
            TokenKind::Percent => self.binary_operator(left, token, NodeKind::Modulo),

            TokenKind::And => self.binary_operator(left, token, NodeKind::And),
            TokenKind::Or => self.binary_operator(left, token, NodeKind::Or),
            TokenKind::Equal => self.binary_operator(left, token, NodeKind::Equal),
            TokenKind::NotEqual => self.binary_operator(left, token, NodeKind::NotEqual),
            TokenKind::Less => self.binary_operator(left, token, NodeKind::Less),
            TokenKind::Greater => self.binary_operator(left, token, NodeKind::Greater),
            TokenKind::LessEqual => self.binary_operator(left, token, NodeKind::LessEqual),
            TokenKind::GreaterEqual => self.binary_operator(left, token, NodeKind::GreaterEqual),

            TokenKind::Assign => self.assignment(left, token, NodeKind::Assign),
            TokenKind::PlusAssign => self.assignment(left, token, NodeKind::AddAssign),
            TokenKind::MinusAssign => self.assignment(left, token, NodeKind::SubtractAssign),
            TokenKind::StarAssign => self.assignment(left, token, NodeKind::MultiplyAssign),
            TokenKind::SlashAssign => self.assignment(left, token, NodeKind::DivideAssign),
            TokenKind::PercentAssign => self.assignment(left, token, NodeKind::ModuloAssign),

            TokenKind::Question => self.conditional(left, token),

            TokenKind::Increment => Ok(self
                .ast
                .build_node(NodeKind::PostIncrement, left)
                .with_location(token.location)
                .done()),
            TokenKind::Decrement => Ok(self
                .ast
                .build_node(NodeKind::PostDecrement, left)
                .with_location(token.location)
                .done()),

            TokenKind::LeftParen => self.function_call(left, token),
            TokenKind::LeftBracket => {
                let key = self.parse_expression(0)?;
                self.expect(TokenKind::RightBracket)?;
                Ok(self
                    .ast
                    .build_node(NodeKind::Index, (left, key))
                    .with_location(token.location)
                    .done())
            }
            TokenKind::Dot => {
                let name = self.lexer.next_token()?;
                let name = self.parse_identifier_name(name)?;
                Ok(self
                    .ast
                    .build_node(NodeKind::Dot, (left, name))
                    .with_location(token.location)
                    .done())
            }

            _ => Err(self.error(
                &token,
                ErrorKind::UnexpectedToken(token.kind.description()),
            )),
        }
    }

    /// Parses an expression.
    fn parse_expression(&mut self, precedence: i8) -> Result<NodeId, Error> {
        let token = self.lexer.next_token()?;
        let mut left = self.parse_prefix(token)?;

        while precedence < Self::precedence(&self.lexer.peek_token()?.kind) {
            let token = self.lexer.next_token()?;
            left = self.parse_infix(left, token)?;
        }

        Ok(left)
    }

    /// Consumes the end of a statement: a semicolon, a line break before the next token, a
    /// closing brace, or the end of input.
    fn expect_end(&mut self) -> Result<(), Error> {
        let token = self.lexer.peek_token()?;
        if token.kind == TokenKind::Semicolon {
            self.lexer.next_token()?;
            return Ok(());
        }
        if token.line_break_before
            || token.kind == TokenKind::RightBrace
            || token.kind == TokenKind::Eof
        {
            return Ok(());
        }
        let error = ErrorKind::ExpectedToken {
            expected: ";",
            got: token.kind.description(),
        };
        Err(self.error(&token, error))
    }

    /// Parses statements up to (and through) a closing brace.
    fn parse_statements_until_brace(&mut self) -> Result<Vec<NodeId>, Error> {
        let mut statements = Vec::new();
        loop {
            let token = self.lexer.peek_token()?;
            match token.kind {
                TokenKind::RightBrace => {
                    self.lexer.next_token()?;
                    return Ok(statements);
                }
                TokenKind::Eof => {
                    let error = ErrorKind::ExpectedToken {
                        expected: "}",
                        got: token.kind.description(),
                    };
                    return Err(self.error(&token, error));
                }
                _ => statements.push(self.parse_statement()?),
            }
        }
    }

    /// Parses a `{ ... }` block statement.
    fn parse_block(&mut self) -> Result<NodeId, Error> {
        let brace = self.lexer.next_token()?;
        let statements = self.parse_statements_until_brace()?;
        Ok(self
            .ast
            .build_node(NodeKind::Block, ())
            .with_location(brace.location)
            .with_children(statements)
            .done())
    }

    fn parse_if(&mut self) -> Result<NodeId, Error> {
        let if_token = self.lexer.next_token()?;
        self.expect(TokenKind::LeftParen)?;
        let condition = self.parse_expression(0)?;
        self.expect(TokenKind::RightParen)?;
        let then = self.parse_statement()?;
        let mut branches = Vec::new();
        if self.try_next(TokenKind::Else)?.is_some() {
            branches.push(self.parse_statement()?);
        }
        Ok(self
            .ast
            .build_node(NodeKind::If, (condition, then))
            .with_location(if_token.location)
            .with_children(branches)
            .done())
    }

    fn parse_while(&mut self) -> Result<NodeId, Error> {
        let while_token = self.lexer.next_token()?;
        self.expect(TokenKind::LeftParen)?;
        let condition = self.parse_expression(0)?;
        self.expect(TokenKind::RightParen)?;
        let body = self.parse_loop_body()?;
        Ok(self
            .ast
            .build_node(NodeKind::While, (condition, body))
            .with_location(while_token.location)
            .done())
    }

    fn parse_for(&mut self) -> Result<NodeId, Error> {
        let for_token = self.lexer.next_token()?;
        self.expect(TokenKind::LeftParen)?;
        let init = if self.lexer.peek_token()?.kind != TokenKind::Semicolon {
            self.parse_expression(0)?
        } else {
            NodeId::EMPTY
        };
        self.expect(TokenKind::Semicolon)?;
        let condition = if self.lexer.peek_token()?.kind != TokenKind::Semicolon {
            self.parse_expression(0)?
        } else {
            NodeId::EMPTY
        };
        self.expect(TokenKind::Semicolon)?;
        let update = if self.lexer.peek_token()?.kind != TokenKind::RightParen {
            self.parse_expression(0)?
        } else {
            NodeId::EMPTY
        };
        self.expect(TokenKind::RightParen)?;
        let body = self.parse_loop_body()?;
        Ok(self
            .ast
            .build_node(NodeKind::For, ())
            .with_location(for_token.location)
            .with_children(vec![init, condition, update, body])
            .done())
    }

    fn parse_loop_body(&mut self) -> Result<NodeId, Error> {
        let was_in_loop = mem::replace(&mut self.in_loop, true);
        let body = self.parse_statement();
        self.in_loop = was_in_loop;
        body
    }

    fn parse_return(&mut self) -> Result<NodeId, Error> {
        let return_token = self.lexer.next_token()?;
        let next = self.lexer.peek_token()?;
        let value = if next.line_break_before
            || matches!(
                next.kind,
                TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof
            ) {
            NodeId::EMPTY
        } else {
            self.parse_expression(0)?
        };
        self.expect_end()?;
        if !self.in_function {
            return Err(self.error(&return_token, ErrorKind::ReturnOutsideOfFunction));
        }
        Ok(self
            .ast
            .build_node(NodeKind::Return, value)
            .with_location(return_token.location)
            .done())
    }

    fn parse_break(&mut self) -> Result<NodeId, Error> {
        let token = self.lexer.next_token()?;
        self.expect_end()?;
        if !self.in_loop {
            return Err(self.error(&token, ErrorKind::BreakOutsideOfLoop));
        }
        Ok(self.ast.build_node(NodeKind::Break, ()).with_location(token.location).done())
    }

    fn parse_continue(&mut self) -> Result<NodeId, Error> {
        let token = self.lexer.next_token()?;
        self.expect_end()?;
        if !self.in_loop {
            return Err(self.error(&token, ErrorKind::ContinueOutsideOfLoop));
        }
        Ok(self
            .ast
            .build_node(NodeKind::Continue, ())
            .with_location(token.location)
            .done())
    }

    /// Parses a single statement.
    fn parse_statement(&mut self) -> Result<NodeId, Error> {
        let token = self.lexer.peek_token()?;
        match token.kind {
            TokenKind::LeftBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => self.parse_break(),
            TokenKind::Continue => self.parse_continue(),
            _ => {
                let expression = self.parse_expression(0)?;
                self.expect_end()?;
                Ok(expression)
            }
        }
    }

    /// Parses a `function name(a, b) { ... }` declaration. Declarations are only allowed at the
    /// top level.
    fn parse_function_declaration(&mut self) -> Result<NodeId, Error> {
        let function_token = self.lexer.next_token()?;
        let name = self.lexer.next_token()?;
        let name = self.parse_identifier_name(name)?;

        let left_paren = self.expect(TokenKind::LeftParen)?;
        let mut parameters = Vec::new();
        self.parse_comma_separated(&mut parameters, TokenKind::RightParen, |p| {
            let token = p.lexer.next_token()?;
            p.parse_identifier_name(token)
        })?;
        let parameters = self
            .ast
            .build_node(NodeKind::Parameters, ())
            .with_location(left_paren.location)
            .with_children(parameters)
            .done();

        self.expect(TokenKind::LeftBrace)?;
        let was_in_function = mem::replace(&mut self.in_function, true);
        let body = self.parse_statements_until_brace();
        self.in_function = was_in_function;
        let body = body?;

        Ok(self
            .ast
            .build_node(NodeKind::Func, (name, parameters))
            .with_location(function_token.location)
            .with_children(body)
            .done())
    }

    /// Parses a Kipper program.
    pub fn parse(mut self) -> Result<(Ast, NodeId), Error> {
        let first_token = self.lexer.peek_token()?;
        let mut main = Vec::new();
        loop {
            let token = self.lexer.peek_token()?;
            if token.kind == TokenKind::Eof {
                break;
            }
            if token.kind == TokenKind::Function {
                main.push(self.parse_function_declaration()?);
            } else {
                main.push(self.parse_statement()?);
            }
        }
        let main = self
            .ast
            .build_node(NodeKind::Main, ())
            .with_location(first_token.location)
            .with_children(main)
            .done();
        Ok((self.ast, main))
    }
}

/// The associativity of an infix token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
enum Associativity {
    Left,
    Right,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<(Ast, NodeId), Error> {
        let lexer = Lexer::new(Rc::from("(test)"), input.to_owned());
        Parser::new(lexer).parse()
    }

    fn first_statement(ast: &Ast, main: NodeId) -> NodeId {
        ast.children(main).unwrap()[0]
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let (ast, main) = parse("1 + 2 * 3").unwrap();
        let add = first_statement(&ast, main);
        assert_eq!(ast.kind(add), NodeKind::Add);
        let (left, right) = ast.node_pair(add);
        assert_eq!(ast.kind(left), NodeKind::Int);
        assert_eq!(ast.kind(right), NodeKind::Multiply);
    }

    #[test]
    fn assignment_is_right_associative() {
        let (ast, main) = parse("a = b = 1").unwrap();
        let outer = first_statement(&ast, main);
        assert_eq!(ast.kind(outer), NodeKind::Assign);
        let (_, inner) = ast.node_pair(outer);
        assert_eq!(ast.kind(inner), NodeKind::Assign);
    }

    #[test]
    fn unary_binds_tighter_than_multiplication() {
        let (ast, main) = parse("-a * b").unwrap();
        let multiply = first_statement(&ast, main);
        assert_eq!(ast.kind(multiply), NodeKind::Multiply);
        let (left, _) = ast.node_pair(multiply);
        assert_eq!(ast.kind(left), NodeKind::Negate);
    }

    #[test]
    fn member_call_chains() {
        let (ast, main) = parse("a.b[0](1, 2)").unwrap();
        let call = first_statement(&ast, main);
        assert_eq!(ast.kind(call), NodeKind::Call);
        assert_eq!(ast.children(call).unwrap().len(), 2);
        let (target, _) = ast.node_pair(call);
        assert_eq!(ast.kind(target), NodeKind::Index);
        let (dot, _) = ast.node_pair(target);
        assert_eq!(ast.kind(dot), NodeKind::Dot);
    }

    #[test]
    fn line_breaks_terminate_statements() {
        let (ast, main) = parse("a = 1\nb = 2").unwrap();
        assert_eq!(ast.children(main).unwrap().len(), 2);
    }

    #[test]
    fn missing_statement_terminator_is_an_error() {
        assert!(parse("a = 1 b = 2").is_err());
    }

    #[test]
    fn literals_to_assignment_targets_are_rejected() {
        let error = parse("1 = 2").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::InvalidAssignment));
        assert!(parse("f() = 2").is_err());
        assert!(parse("a.b = 2").is_ok());
        assert!(parse("a[0] = 2").is_ok());
    }

    #[test]
    fn break_and_continue_need_a_loop() {
        assert!(matches!(
            parse("break").unwrap_err().kind(),
            ErrorKind::BreakOutsideOfLoop
        ));
        assert!(matches!(
            parse("continue").unwrap_err().kind(),
            ErrorKind::ContinueOutsideOfLoop
        ));
        assert!(parse("while (1) break").is_ok());
        assert!(parse("for (;;) { continue }").is_ok());
        // A loop's breakability does not leak past its body.
        assert!(parse("while (1) {}\nbreak").is_err());
        // Nested loops keep the outer loop breakable after the inner one closes.
        assert!(parse("while (1) { while (0) {} break }").is_ok());
    }

    #[test]
    fn return_needs_a_function() {
        assert!(matches!(
            parse("return 1").unwrap_err().kind(),
            ErrorKind::ReturnOutsideOfFunction
        ));
        assert!(parse("function f() { return 1 }").is_ok());
        assert!(parse("function f() { return }").is_ok());
    }

    #[test]
    fn function_declarations_only_at_the_top_level() {
        assert!(parse("function f(a, b) { return a }").is_ok());
        assert!(parse("{ function f() {} }").is_err());
    }

    #[test]
    fn for_parts_are_optional() {
        let (ast, main) = parse("for (;;) {}").unwrap();
        let for_node = first_statement(&ast, main);
        let children = ast.children(for_node).unwrap();
        assert_eq!(children[0], NodeId::EMPTY);
        assert_eq!(children[1], NodeId::EMPTY);
        assert_eq!(children[2], NodeId::EMPTY);
        assert_eq!(ast.kind(children[3]), NodeKind::Block);
    }

    #[test]
    fn ternary_and_literals() {
        let (ast, main) = parse("x ? [1, 2] : {a: 1, \"b\": 2}").unwrap();
        let conditional = first_statement(&ast, main);
        assert_eq!(ast.kind(conditional), NodeKind::Conditional);
        let children = ast.children(conditional).unwrap();
        assert_eq!(ast.kind(children[1]), NodeKind::Array);
        assert_eq!(ast.kind(children[2]), NodeKind::Object);
        let pairs = ast.children(children[2]).unwrap();
        assert_eq!(ast.kind(pairs[0]), NodeKind::Pair);
    }

    #[test]
    fn postfix_and_prefix_increment() {
        let (ast, main) = parse("i++\n++i").unwrap();
        let statements = ast.children(main).unwrap();
        assert_eq!(ast.kind(statements[0]), NodeKind::PostIncrement);
        assert_eq!(ast.kind(statements[1]), NodeKind::PreIncrement);
    }
}
