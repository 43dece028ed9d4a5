use std::{iter::Peekable, str::CharIndices};

use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at line {line}, column {column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("Tabs are not supported for indentation at line {line}, column {column}")]
    TabIndentation { line: usize, column: usize },
    #[error("Invalid dedent to {indent_level} spaces at line {line}, column {column}")]
    InvalidDedent {
        indent_level: usize,
        line: usize,
        column: usize,
    },
    #[error("Invalid integer literal '{literal}' at line {line}, column {column}")]
    InvalidIntegerLiteral {
        literal: String,
        line: usize,
        column: usize,
    },
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    indent_stack: Vec<usize>,
    pending_tokens: Vec<Token<'a>>,
    at_line_start: bool,
    eof_reached: bool,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            indent_stack: vec![0],
            pending_tokens: Vec::new(),
            at_line_start: true,
            eof_reached: false,
            line: 1,
            column: 0,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        if let Some(token) = self.pending_tokens.pop() {
            return Ok(token);
        }

        if self.eof_reached {
            return Ok(Token::new(TokenKind::Eof, self.here()));
        }

        if self.at_line_start {
            self.at_line_start = false;
            let indent_level = self.count_indentation()?;
            let current_indent = *self.indent_stack.last().unwrap();
            let span = self.here();

            if indent_level > current_indent {
                self.indent_stack.push(indent_level);
                return Ok(Token::new(TokenKind::Indent, span));
            } else if indent_level < current_indent {
                while let Some(&top) = self.indent_stack.last() {
                    if top > indent_level {
                        self.indent_stack.pop();
                        self.pending_tokens
                            .push(Token::new(TokenKind::Dedent, span));
                    } else {
                        break;
                    }
                }
                if *self.indent_stack.last().unwrap() != indent_level {
                    return Err(LexError::InvalidDedent {
                        indent_level,
                        line: self.line,
                        column: self.column,
                    });
                }
                if let Some(token) = self.pending_tokens.pop() {
                    return Ok(token);
                }
            }
        }

        self.skip_spaces();

        let (start_idx, ch) = match self.chars.peek() {
            Some(&(idx, c)) => (idx, c),
            None => return Ok(self.finish()),
        };

        let start_line = self.line;
        let start_column = self.column;
        match ch {
            '\n' => {
                self.advance_char();
                self.at_line_start = true;
                Ok(self.single(TokenKind::Newline, start_idx, start_line, start_column))
            }
            '#' => {
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance_char();
                }
                self.next_token()
            }
            '=' => {
                self.advance_char();
                if self.eat('=') {
                    Ok(self.double(TokenKind::EqEq, start_idx, start_line, start_column))
                } else {
                    Ok(self.single(TokenKind::Equal, start_idx, start_line, start_column))
                }
            }
            '!' => {
                self.advance_char();
                if self.eat('=') {
                    Ok(self.double(TokenKind::NotEq, start_idx, start_line, start_column))
                } else {
                    Err(LexError::UnexpectedCharacter {
                        character: '!',
                        line: start_line,
                        column: start_column,
                    })
                }
            }
            '<' => {
                self.advance_char();
                if self.eat('=') {
                    Ok(self.double(TokenKind::LessEq, start_idx, start_line, start_column))
                } else {
                    Ok(self.single(TokenKind::Less, start_idx, start_line, start_column))
                }
            }
            '>' => {
                self.advance_char();
                if self.eat('=') {
                    Ok(self.double(TokenKind::GreaterEq, start_idx, start_line, start_column))
                } else {
                    Ok(self.single(TokenKind::Greater, start_idx, start_line, start_column))
                }
            }
            '+' => {
                self.advance_char();
                if self.eat('=') {
                    Ok(self.double(TokenKind::PlusEqual, start_idx, start_line, start_column))
                } else {
                    Ok(self.single(TokenKind::Plus, start_idx, start_line, start_column))
                }
            }
            '-' => {
                self.advance_char();
                if self.eat('=') {
                    Ok(self.double(TokenKind::MinusEqual, start_idx, start_line, start_column))
                } else {
                    Ok(self.single(TokenKind::Minus, start_idx, start_line, start_column))
                }
            }
            '*' => {
                self.advance_char();
                if self.eat('=') {
                    Ok(self.double(TokenKind::StarEqual, start_idx, start_line, start_column))
                } else {
                    Ok(self.single(TokenKind::Star, start_idx, start_line, start_column))
                }
            }
            ':' => {
                self.advance_char();
                Ok(self.single(TokenKind::Colon, start_idx, start_line, start_column))
            }
            ',' => {
                self.advance_char();
                Ok(self.single(TokenKind::Comma, start_idx, start_line, start_column))
            }
            '(' => {
                self.advance_char();
                Ok(self.single(TokenKind::LParen, start_idx, start_line, start_column))
            }
            ')' => {
                self.advance_char();
                Ok(self.single(TokenKind::RParen, start_idx, start_line, start_column))
            }
            c if c.is_alphabetic() || c == '_' => {
                Ok(self.read_identifier(start_idx, start_line, start_column))
            }
            c if c.is_ascii_digit() => self.read_integer(start_idx, start_line, start_column),
            _ => Err(LexError::UnexpectedCharacter {
                character: ch,
                line: start_line,
                column: start_column,
            }),
        }
    }

    /// Drains remaining dedents at end of input, then reports EOF.
    fn finish(&mut self) -> Token<'a> {
        self.eof_reached = true;
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            let span = self.here();
            self.pending_tokens
                .push(Token::new(TokenKind::Dedent, span));
        }
        if let Some(token) = self.pending_tokens.pop() {
            return token;
        }
        Token::new(TokenKind::Eof, self.here())
    }

    fn count_indentation(&mut self) -> LexResult<usize> {
        // Blank and comment-only lines must not shift the indentation level,
        // so look ahead before consuming anything.
        let mut lookahead = self.chars.clone();
        let mut is_blank_line = false;

        while let Some(&(_, c)) = lookahead.peek() {
            if c == ' ' {
                lookahead.next();
            } else if c == '\t' {
                return Err(LexError::TabIndentation {
                    line: self.line,
                    column: self.column,
                });
            } else if c == '\n' || c == '#' {
                is_blank_line = true;
                break;
            } else {
                break;
            }
        }

        if is_blank_line {
            return Ok(*self.indent_stack.last().unwrap());
        }

        let mut count = 0;
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' {
                self.advance_char();
                count += 1;
            } else {
                break;
            }
        }

        Ok(count)
    }

    fn skip_spaces(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if let Some(&(_, c)) = self.chars.peek() {
            if c == expected {
                self.advance_char();
                return true;
            }
        }
        false
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token<'a> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        let kind = match ident {
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "while" => TokenKind::While,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "print" => TokenKind::Print,
            "input" => TokenKind::Input,
            "int" => TokenKind::Int,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            _ => TokenKind::Identifier(ident),
        };
        Token::new(
            kind,
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        )
    }

    fn read_integer(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token<'a>> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let literal = &self.input[start..end_idx];
        let value = literal
            .parse::<i64>()
            .map_err(|_| LexError::InvalidIntegerLiteral {
                literal: literal.to_string(),
                line,
                column,
            })?;
        Ok(Token::new(
            TokenKind::Integer(value),
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        ))
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn here(&mut self) -> Span {
        let index = self.current_index();
        Span {
            start: index,
            end: index,
            line: self.line,
            column: self.column,
        }
    }

    fn single(&self, kind: TokenKind<'a>, start: usize, line: usize, column: usize) -> Token<'a> {
        Token::new(
            kind,
            Span {
                start,
                end: start + 1,
                line,
                column,
            },
        )
    }

    fn double(&self, kind: TokenKind<'a>, start: usize, line: usize, column: usize) -> Token<'a> {
        Token::new(
            kind,
            Span {
                start,
                end: start + 2,
                line,
                column,
            },
        )
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

pub fn tokenize<'a>(input: &'a str) -> LexResult<Vec<Token<'a>>> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds<'a>(input: &'a str) -> Vec<TokenKind<'a>> {
        tokenize(input)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_function_with_indented_body() {
        let input = indoc! {"
            def double(n):
                return n * 2
            print(int(double(4)))
        "};
        let expected = vec![
            TokenKind::Def,
            TokenKind::Identifier("double"),
            TokenKind::LParen,
            TokenKind::Identifier("n"),
            TokenKind::RParen,
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Return,
            TokenKind::Identifier("n"),
            TokenKind::Star,
            TokenKind::Integer(2),
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Print,
            TokenKind::LParen,
            TokenKind::Int,
            TokenKind::LParen,
            TokenKind::Identifier("double"),
            TokenKind::LParen,
            TokenKind::Integer(4),
            TokenKind::RParen,
            TokenKind::RParen,
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn lexes_comparison_and_augmented_operators() {
        let input = "a <= b != c\na += 1\n";
        let expected = vec![
            TokenKind::Identifier("a"),
            TokenKind::LessEq,
            TokenKind::Identifier("b"),
            TokenKind::NotEq,
            TokenKind::Identifier("c"),
            TokenKind::Newline,
            TokenKind::Identifier("a"),
            TokenKind::PlusEqual,
            TokenKind::Integer(1),
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn comment_only_lines_do_not_change_indentation() {
        let input = indoc! {"
            while x < 3:
                # loop body
                x = x + 1
        "};
        let expected = vec![
            TokenKind::While,
            TokenKind::Identifier("x"),
            TokenKind::Less,
            TokenKind::Integer(3),
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Identifier("x"),
            TokenKind::Equal,
            TokenKind::Identifier("x"),
            TokenKind::Plus,
            TokenKind::Integer(1),
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn errors_on_invalid_character() {
        let err = tokenize("x = 1 @ 2\n").expect_err("expected lexing failure");
        assert!(
            err.to_string().contains("Unexpected character '@'"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn errors_on_bare_exclamation_mark() {
        let err = tokenize("x = 1 ! 2\n").expect_err("expected lexing failure");
        assert!(err.to_string().contains("Unexpected character '!'"));
    }

    #[test]
    fn errors_on_tab_indentation() {
        let err = tokenize("while x:\n\tx = 1\n").expect_err("expected lexing failure");
        assert!(err.to_string().contains("Tabs are not supported"));
    }

    #[test]
    fn errors_on_inconsistent_dedent() {
        let input = "while x:\n        x = 1\n    x = 2\n";
        let err = tokenize(input).expect_err("expected lexing failure");
        assert!(err.to_string().contains("Invalid dedent"));
    }

    #[test]
    fn errors_on_integer_overflow() {
        let err = tokenize("n = 99999999999999999999999999\n").expect_err("expected overflow");
        assert!(err.to_string().contains("Invalid integer literal"));
    }
}
