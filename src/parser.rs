use thiserror::Error;

use crate::ast::{
    BinaryOperator, BoolOperator, CompareOperator, Expression, Program, Statement, UnaryOperator,
};
use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Expected {expected}, got {found} at line {line}, column {column}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },
}

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token<'a>>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !matches!(self.current().kind, TokenKind::Eof) {
            if self.consume_newlines() {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.current().kind {
            TokenKind::Def => self.parse_function_def(),
            TokenKind::While => self.parse_while(),
            TokenKind::If => self.parse_if(),
            TokenKind::Break => {
                let line = self.current().span.line;
                self.advance();
                self.expect_newline()?;
                Ok(Statement::Break { line })
            }
            TokenKind::Continue => {
                let line = self.current().span.line;
                self.advance();
                self.expect_newline()?;
                Ok(Statement::Continue { line })
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Print => self.parse_print_statement(),
            TokenKind::Identifier(_)
                if matches!(
                    self.peek().kind,
                    TokenKind::Equal
                        | TokenKind::PlusEqual
                        | TokenKind::MinusEqual
                        | TokenKind::StarEqual
                ) =>
            {
                self.parse_assignment()
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect_newline()?;
                Ok(Statement::Expr(expr))
            }
        }
    }

    fn parse_function_def(&mut self) -> Result<Statement, ParseError> {
        let line = self.current().span.line;
        self.advance();
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !matches!(self.current().kind, TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            while matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier()?);
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Statement::FunctionDef {
            name,
            params,
            body,
            line,
        })
    }

    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Statement::While { condition, body })
    }

    // `elif` chains parse as an `if` in the else branch.
    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;
        let else_body = match self.current().kind {
            TokenKind::Elif => vec![self.parse_if()?],
            TokenKind::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Statement::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_return(&mut self) -> Result<Statement, ParseError> {
        let line = self.current().span.line;
        self.advance();
        let value = if matches!(
            self.current().kind,
            TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof
        ) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_newline()?;
        Ok(Statement::Return { value, line })
    }

    /// `print(int(E))` collapses into a Print statement; any other shape is
    /// kept as a plain call for the semantic checker to reject.
    fn parse_print_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.current().span.line;
        self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = self.parse_arguments()?;
        self.expect(TokenKind::RParen, "')'")?;
        self.expect_newline()?;

        if args.len() == 1 {
            let arg = args.remove(0);
            match arg {
                Expression::Call {
                    name,
                    args: mut inner,
                    ..
                } if name == "int" && inner.len() == 1 => {
                    return Ok(Statement::Print {
                        value: inner.remove(0),
                        line,
                    });
                }
                arg @ Expression::Input { .. } => {
                    return Ok(Statement::Print { value: arg, line });
                }
                arg => args.insert(0, arg),
            }
        }
        Ok(Statement::Expr(Expression::Call {
            name: "print".to_string(),
            args,
            line,
        }))
    }

    fn parse_assignment(&mut self) -> Result<Statement, ParseError> {
        let line = self.current().span.line;
        let name = self.expect_identifier()?;
        let op = match self.current().kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOperator::Add),
            TokenKind::MinusEqual => Some(BinaryOperator::Sub),
            TokenKind::StarEqual => Some(BinaryOperator::Mul),
            _ => return Err(self.error("assignment operator")),
        };
        self.advance();
        let value = self.parse_expression()?;
        self.expect_newline()?;
        Ok(match op {
            None => Statement::Assign { name, value, line },
            Some(op) => Statement::AugAssign {
                name,
                op,
                value,
                line,
            },
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.expect(TokenKind::Colon, "':'")?;
        self.expect_newline()?;
        self.consume_newlines();
        self.expect(TokenKind::Indent, "indented block")?;

        let mut body = Vec::new();
        while !matches!(self.current().kind, TokenKind::Dedent | TokenKind::Eof) {
            if self.consume_newlines() {
                continue;
            }
            body.push(self.parse_statement()?);
        }
        self.expect(TokenKind::Dedent, "dedent")?;
        Ok(body)
    }

    fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let first = self.parse_and()?;
        if !matches!(self.current().kind, TokenKind::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while matches!(self.current().kind, TokenKind::Or) {
            self.advance();
            values.push(self.parse_and()?);
        }
        Ok(Expression::BoolOp {
            op: BoolOperator::Or,
            values,
        })
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let first = self.parse_not()?;
        if !matches!(self.current().kind, TokenKind::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while matches!(self.current().kind, TokenKind::And) {
            self.advance();
            values.push(self.parse_not()?);
        }
        Ok(Expression::BoolOp {
            op: BoolOperator::And,
            values,
        })
    }

    fn parse_not(&mut self) -> Result<Expression, ParseError> {
        if matches!(self.current().kind, TokenKind::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_additive()?;
        let op = match self.current().kind {
            TokenKind::Less => CompareOperator::Lt,
            TokenKind::Greater => CompareOperator::Gt,
            TokenKind::EqEq => CompareOperator::Eq,
            TokenKind::NotEq => CompareOperator::NotEq,
            TokenKind::LessEq => CompareOperator::Le,
            TokenKind::GreaterEq => CompareOperator::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expression::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = Expression::BinaryOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_unary()?;
        while matches!(self.current().kind, TokenKind::Star) {
            self.advance();
            let right = self.parse_unary()?;
            expr = Expression::BinaryOp {
                left: Box::new(expr),
                op: BinaryOperator::Mul,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        match self.current().kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::UnaryOp {
                    op: UnaryOperator::Neg,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let line = self.current().span.line;
        match self.current().kind {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expression::Integer(value))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Boolean(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Boolean(false))
            }
            TokenKind::Identifier(name) => {
                let name = name.to_string();
                self.advance();
                if matches!(self.current().kind, TokenKind::LParen) {
                    self.advance();
                    let args = self.parse_arguments()?;
                    self.expect(TokenKind::RParen, "')'")?;
                    Ok(Expression::Call { name, args, line })
                } else {
                    Ok(Expression::Name { name, line })
                }
            }
            TokenKind::Int => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let args = self.parse_arguments()?;
                self.expect(TokenKind::RParen, "')'")?;
                if let [Expression::Call {
                    name, args: inner, ..
                }] = &args[..]
                {
                    if name == "input" && inner.is_empty() {
                        return Ok(Expression::Input { line });
                    }
                }
                Ok(Expression::Call {
                    name: "int".to_string(),
                    args,
                    line,
                })
            }
            TokenKind::Input => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let args = self.parse_arguments()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expression::Call {
                    name: "input".to_string(),
                    args,
                    line,
                })
            }
            TokenKind::Print => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let args = self.parse_arguments()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expression::Call {
                    name: "print".to_string(),
                    args,
                    line,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(self.error("expression")),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut args = Vec::new();
        if matches!(self.current().kind, TokenKind::RParen) {
            return Ok(args);
        }
        args.push(self.parse_expression()?);
        while matches!(self.current().kind, TokenKind::Comma) {
            self.advance();
            args.push(self.parse_expression()?);
        }
        Ok(args)
    }

    fn consume_newlines(&mut self) -> bool {
        let mut consumed = false;
        while matches!(self.current().kind, TokenKind::Newline) {
            consumed = true;
            self.advance();
        }
        consumed
    }

    fn current(&self) -> &Token<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token<'a> {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn expect(&mut self, kind: TokenKind<'a>, expected: &str) -> Result<(), ParseError> {
        if self.current().kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = self.current().kind {
            let name = name.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("identifier"))
        }
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        // The last physical line may end at EOF without a trailing newline.
        if matches!(self.current().kind, TokenKind::Eof | TokenKind::Dedent) {
            return Ok(());
        }
        self.expect(TokenKind::Newline, "newline")
    }

    fn error(&self, expected: &str) -> ParseError {
        let token = self.current();
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: token.kind.describe(),
            line: token.span.line,
            column: token.span.column,
        }
    }
}

pub fn parse_tokens<'a>(tokens: Vec<Token<'a>>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}
