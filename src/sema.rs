use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::ast::{Expression, Program, Statement};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SemaError {
    #[error("Unknown name '{name}' on line {line}")]
    UnknownName { name: String, line: usize },
    #[error("Unknown function '{name}' on line {line}")]
    UnknownFunction { name: String, line: usize },
    #[error("Duplicate definition of function '{name}' on line {line}")]
    DuplicateFunction { name: String, line: usize },
    #[error("Duplicate parameter '{name}' of function '{function}' on line {line}")]
    DuplicateParameter {
        name: String,
        function: String,
        line: usize,
    },
    #[error("Function '{name}' expects {expected} arguments, got {found} on line {line}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        line: usize,
    },
    #[error("Function '{name}' cannot be used as a value on line {line}")]
    FunctionUsedAsValue { name: String, line: usize },
    #[error("Name '{name}' on line {line} would shadow a function")]
    FunctionShadowed { name: String, line: usize },
    #[error("print(...) must be a statement wrapping an int(...) cast on line {line}")]
    MalformedPrint { line: usize },
    #[error("int(...) is only supported wrapping input() on line {line}")]
    MalformedIntCast { line: usize },
    #[error("input() must appear as int(input()) on line {line}")]
    BareInput { line: usize },
    #[error("Nested function definitions are not supported on line {line}")]
    NestedFunctionDef { line: usize },
    #[error("return outside of a function on line {line}")]
    ReturnOutsideFunction { line: usize },
    #[error("'break' outside of a loop on line {line}")]
    BreakOutsideLoop { line: usize },
    #[error("'continue' outside of a loop on line {line}")]
    ContinueOutsideLoop { line: usize },
}

type SemaResult<T> = Result<T, SemaError>;

/// One compilation session's symbol tables: top-level functions plus the set
/// of names ever assigned at top level. Function bodies resolve names against
/// their own locals first and fall back to the globals.
struct Checker {
    functions: FxHashMap<String, usize>,
    globals: FxHashSet<String>,
}

struct Scope {
    in_function: bool,
    loop_depth: usize,
    defined: FxHashSet<String>,
}

pub fn check(program: &Program) -> SemaResult<()> {
    let mut checker = Checker {
        functions: FxHashMap::default(),
        globals: FxHashSet::default(),
    };

    for statement in &program.statements {
        if let Statement::FunctionDef {
            name, params, line, ..
        } = statement
        {
            if checker.functions.contains_key(name) {
                return Err(SemaError::DuplicateFunction {
                    name: name.clone(),
                    line: *line,
                });
            }
            let mut seen = FxHashSet::default();
            for param in params {
                if !seen.insert(param.as_str()) {
                    return Err(SemaError::DuplicateParameter {
                        name: param.clone(),
                        function: name.clone(),
                        line: *line,
                    });
                }
            }
            checker.functions.insert(name.clone(), params.len());
        } else {
            collect_assigned(statement, &mut checker.globals);
        }
    }

    let mut scope = Scope {
        in_function: false,
        loop_depth: 0,
        defined: FxHashSet::default(),
    };
    checker.check_statements(&program.statements, &mut scope)
}

/// Names assigned by a top-level statement, recursing through block bodies
/// but never into function definitions.
fn collect_assigned(statement: &Statement, names: &mut FxHashSet<String>) {
    match statement {
        Statement::Assign { name, .. } | Statement::AugAssign { name, .. } => {
            names.insert(name.clone());
        }
        Statement::While { body, .. } => {
            for statement in body {
                collect_assigned(statement, names);
            }
        }
        Statement::If {
            then_body,
            else_body,
            ..
        } => {
            for statement in then_body.iter().chain(else_body) {
                collect_assigned(statement, names);
            }
        }
        _ => {}
    }
}

impl Checker {
    fn check_statements(&self, statements: &[Statement], scope: &mut Scope) -> SemaResult<()> {
        for statement in statements {
            self.check_statement(statement, scope)?;
        }
        Ok(())
    }

    fn check_statement(&self, statement: &Statement, scope: &mut Scope) -> SemaResult<()> {
        match statement {
            Statement::FunctionDef {
                params, body, line, ..
            } => {
                if scope.in_function {
                    return Err(SemaError::NestedFunctionDef { line: *line });
                }
                for param in params {
                    if self.functions.contains_key(param) {
                        return Err(SemaError::FunctionShadowed {
                            name: param.clone(),
                            line: *line,
                        });
                    }
                }
                let mut function_scope = Scope {
                    in_function: true,
                    loop_depth: 0,
                    defined: params.iter().cloned().collect(),
                };
                self.check_statements(body, &mut function_scope)
            }
            Statement::Assign { name, value, line } => {
                self.check_expression(value, scope)?;
                if self.functions.contains_key(name) {
                    return Err(SemaError::FunctionShadowed {
                        name: name.clone(),
                        line: *line,
                    });
                }
                scope.defined.insert(name.clone());
                Ok(())
            }
            Statement::AugAssign {
                name, value, line, ..
            } => {
                self.check_expression(value, scope)?;
                if !self.is_readable(name, scope) {
                    return Err(SemaError::UnknownName {
                        name: name.clone(),
                        line: *line,
                    });
                }
                scope.defined.insert(name.clone());
                Ok(())
            }
            Statement::While { condition, body } => {
                self.check_expression(condition, scope)?;
                scope.loop_depth += 1;
                let result = self.check_statements(body, scope);
                scope.loop_depth -= 1;
                result
            }
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                self.check_expression(condition, scope)?;
                self.check_statements(then_body, scope)?;
                self.check_statements(else_body, scope)
            }
            Statement::Break { line } => {
                if scope.loop_depth == 0 {
                    return Err(SemaError::BreakOutsideLoop { line: *line });
                }
                Ok(())
            }
            Statement::Continue { line } => {
                if scope.loop_depth == 0 {
                    return Err(SemaError::ContinueOutsideLoop { line: *line });
                }
                Ok(())
            }
            Statement::Return { value, line } => {
                if !scope.in_function {
                    return Err(SemaError::ReturnOutsideFunction { line: *line });
                }
                if let Some(value) = value {
                    self.check_expression(value, scope)?;
                }
                Ok(())
            }
            Statement::Print { value, .. } => self.check_expression(value, scope),
            Statement::Expr(expr) => self.check_expression(expr, scope),
        }
    }

    fn check_expression(&self, expr: &Expression, scope: &Scope) -> SemaResult<()> {
        match expr {
            Expression::Integer(_) | Expression::Boolean(_) | Expression::Input { .. } => Ok(()),
            Expression::Name { name, line } => {
                if self.is_readable(name, scope) {
                    return Ok(());
                }
                if self.functions.contains_key(name) {
                    return Err(SemaError::FunctionUsedAsValue {
                        name: name.clone(),
                        line: *line,
                    });
                }
                Err(SemaError::UnknownName {
                    name: name.clone(),
                    line: *line,
                })
            }
            Expression::BinaryOp { left, right, .. } | Expression::Compare { left, right, .. } => {
                self.check_expression(left, scope)?;
                self.check_expression(right, scope)
            }
            Expression::UnaryOp { operand, .. } => self.check_expression(operand, scope),
            Expression::BoolOp { values, .. } => {
                for value in values {
                    self.check_expression(value, scope)?;
                }
                Ok(())
            }
            Expression::Call { name, args, line } => {
                match name.as_str() {
                    "print" => return Err(SemaError::MalformedPrint { line: *line }),
                    "int" => return Err(SemaError::MalformedIntCast { line: *line }),
                    "input" => return Err(SemaError::BareInput { line: *line }),
                    _ => {}
                }
                let Some(&expected) = self.functions.get(name) else {
                    return Err(SemaError::UnknownFunction {
                        name: name.clone(),
                        line: *line,
                    });
                };
                if args.len() != expected {
                    return Err(SemaError::ArityMismatch {
                        name: name.clone(),
                        expected,
                        found: args.len(),
                        line: *line,
                    });
                }
                for arg in args {
                    self.check_expression(arg, scope)?;
                }
                Ok(())
            }
        }
    }

    fn is_readable(&self, name: &str, scope: &Scope) -> bool {
        scope.defined.contains(name) || (scope.in_function && self.globals.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};
    use indoc::indoc;

    fn check_source(input: &str) -> SemaResult<()> {
        let tokens = lexer::tokenize(input).expect("tokenize should succeed");
        let program = parser::parse_tokens(tokens).expect("parse should succeed");
        check(&program)
    }

    #[test]
    fn accepts_functions_loops_and_io() {
        let input = indoc! {"
            base = int(input())
            def scale(n, factor):
                total = n * factor + base
                return total
            i = 0
            while i < 3:
                print(int(scale(i, 2)))
                i += 1
        "};
        check_source(input).expect("program should check");
    }

    #[test]
    fn rejects_unknown_name() {
        let err = check_source("print(int(x))\n").expect_err("expected failure");
        assert_eq!(
            err,
            SemaError::UnknownName {
                name: "x".to_string(),
                line: 1,
            }
        );
    }

    #[test]
    fn rejects_use_before_assignment_at_top_level() {
        let err = check_source("print(int(x))\nx = 1\n").expect_err("expected failure");
        assert!(matches!(err, SemaError::UnknownName { .. }));
    }

    #[test]
    fn function_body_reads_globals() {
        let input = indoc! {"
            def get():
                return base
            base = 7
            print(int(get()))
        "};
        check_source(input).expect("globals should be visible in function bodies");
    }

    #[test]
    fn rejects_arity_mismatch() {
        let input = indoc! {"
            def f(x, y):
                return x + y
            print(int(f(1)))
        "};
        let err = check_source(input).expect_err("expected failure");
        assert_eq!(
            err,
            SemaError::ArityMismatch {
                name: "f".to_string(),
                expected: 2,
                found: 1,
                line: 3,
            }
        );
    }

    #[test]
    fn rejects_duplicate_function_definitions() {
        let input = indoc! {"
            def f():
                return 1
            def f():
                return 2
        "};
        let err = check_source(input).expect_err("expected failure");
        assert!(matches!(err, SemaError::DuplicateFunction { .. }));
    }

    #[test]
    fn rejects_nested_function_definitions() {
        let input = indoc! {"
            def outer():
                def inner():
                    return 1
                return 2
        "};
        let err = check_source(input).expect_err("expected failure");
        assert!(matches!(err, SemaError::NestedFunctionDef { .. }));
    }

    #[test]
    fn rejects_print_without_int_cast() {
        let err = check_source("x = 1\nprint(x)\n").expect_err("expected failure");
        assert_eq!(err, SemaError::MalformedPrint { line: 2 });
    }

    #[test]
    fn rejects_int_cast_of_plain_expression() {
        let err = check_source("x = int(5)\n").expect_err("expected failure");
        assert_eq!(err, SemaError::MalformedIntCast { line: 1 });
    }

    #[test]
    fn rejects_unwrapped_input() {
        let err = check_source("x = input()\n").expect_err("expected failure");
        assert_eq!(err, SemaError::BareInput { line: 1 });
    }

    #[test]
    fn rejects_return_at_top_level() {
        let err = check_source("return 1\n").expect_err("expected failure");
        assert!(matches!(err, SemaError::ReturnOutsideFunction { .. }));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let err = check_source("break\n").expect_err("expected failure");
        assert!(matches!(err, SemaError::BreakOutsideLoop { .. }));
    }

    #[test]
    fn rejects_function_used_as_value() {
        let input = indoc! {"
            def f():
                return 1
            x = f
        "};
        let err = check_source(input).expect_err("expected failure");
        assert!(matches!(err, SemaError::FunctionUsedAsValue { .. }));
    }

    #[test]
    fn rejects_assignment_shadowing_a_function() {
        let input = indoc! {"
            def f():
                return 1
            f = 3
        "};
        let err = check_source(input).expect_err("expected failure");
        assert!(matches!(err, SemaError::FunctionShadowed { .. }));
    }

    #[test]
    fn rejects_augmented_assignment_to_undefined_name() {
        let err = check_source("x += 1\n").expect_err("expected failure");
        assert!(matches!(err, SemaError::UnknownName { .. }));
    }
}
