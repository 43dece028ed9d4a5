use std::fmt;

use anyhow::{Result, bail};
use rustc_hash::FxHashMap;

use crate::ast::{
    BinaryOperator, BoolOperator, CompareOperator, Expression, Program, Statement, UnaryOperator,
};

/// One target-machine operation, or a label definition marking an offset.
///
/// The `Display` rendering (one entry per line, labels as `name:`) is the
/// stable textual form of compiled programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Label(String),
    Push(i64),
    Load(String),
    Store(String),
    Add,
    Sub,
    Mul,
    Lt,
    Gt,
    Eq,
    Ne,
    Le,
    Ge,
    And,
    Or,
    Not,
    Jump(String),
    JumpF(String),
    Call { name: String, arity: usize },
    Return,
    Read,
    Write,
    Halt,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Label(name) => write!(f, "{name}:"),
            Instruction::Push(value) => write!(f, "PUSH {value}"),
            Instruction::Load(name) => write!(f, "LOAD {name}"),
            Instruction::Store(name) => write!(f, "STORE {name}"),
            Instruction::Add => write!(f, "ADD"),
            Instruction::Sub => write!(f, "SUB"),
            Instruction::Mul => write!(f, "MUL"),
            Instruction::Lt => write!(f, "LT"),
            Instruction::Gt => write!(f, "GT"),
            Instruction::Eq => write!(f, "EQ"),
            Instruction::Ne => write!(f, "NE"),
            Instruction::Le => write!(f, "LE"),
            Instruction::Ge => write!(f, "GE"),
            Instruction::And => write!(f, "AND"),
            Instruction::Or => write!(f, "OR"),
            Instruction::Not => write!(f, "NOT"),
            Instruction::Jump(label) => write!(f, "JUMP {label}"),
            Instruction::JumpF(label) => write!(f, "JUMPF {label}"),
            Instruction::Call { name, arity } => write!(f, "CALL {name} {arity}"),
            Instruction::Return => write!(f, "RETURN"),
            Instruction::Read => write!(f, "READ"),
            Instruction::Write => write!(f, "WRITE"),
            Instruction::Halt => write!(f, "HALT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub params: Vec<String>,
    pub entry: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub code: Vec<Instruction>,
    pub labels: FxHashMap<String, usize>,
    pub functions: FxHashMap<String, FunctionInfo>,
}

impl CompiledProgram {
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for instruction in &self.code {
            text.push_str(&instruction.to_string());
            text.push('\n');
        }
        text
    }
}

/// One code-generation session. Label and scratch-slot counters live here so
/// the same validated tree always produces the same instruction sequence.
struct Generator {
    code: Vec<Instruction>,
    labels: FxHashMap<String, usize>,
    functions: FxHashMap<String, FunctionInfo>,
    label_counts: FxHashMap<&'static str, usize>,
    temp_count: usize,
    loop_labels: Vec<(String, String)>,
}

pub fn compile(program: &Program) -> Result<CompiledProgram> {
    let mut generator = Generator {
        code: Vec::new(),
        labels: FxHashMap::default(),
        functions: FxHashMap::default(),
        label_counts: FxHashMap::default(),
        temp_count: 0,
        loop_labels: Vec::new(),
    };
    for statement in &program.statements {
        generator.emit_statement(statement)?;
    }
    generator.emit(Instruction::Halt);
    Ok(CompiledProgram {
        code: generator.code,
        labels: generator.labels,
        functions: generator.functions,
    })
}

impl Generator {
    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn define_label(&mut self, name: String) -> Result<()> {
        if self.labels.contains_key(&name) {
            bail!("Label '{name}' defined twice during code generation");
        }
        self.labels.insert(name.clone(), self.code.len());
        self.code.push(Instruction::Label(name));
        Ok(())
    }

    fn fresh_label(&mut self, prefix: &'static str) -> String {
        let count = self.label_counts.entry(prefix).or_insert(0);
        *count += 1;
        format!("{prefix}-{count}")
    }

    /// Scratch slot in the current frame. Dash-named, so it can never collide
    /// with a source identifier.
    fn fresh_temp(&mut self) -> String {
        self.temp_count += 1;
        format!("tmp-{}", self.temp_count)
    }

    fn emit_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::FunctionDef {
                name, params, body, ..
            } => {
                if self.functions.contains_key(name) {
                    bail!("Function '{name}' reached code generation twice");
                }
                let entry = format!("def-{name}");
                let end = format!("end-{name}");
                self.functions.insert(
                    name.clone(),
                    FunctionInfo {
                        params: params.clone(),
                        entry: entry.clone(),
                    },
                );
                // Definitions are only entered through CALL; jump over the
                // body when top-level execution reaches this point.
                self.emit(Instruction::Jump(end.clone()));
                self.define_label(entry)?;
                for statement in body {
                    self.emit_statement(statement)?;
                }
                // Falling off the end returns 0.
                self.emit(Instruction::Push(0));
                self.emit(Instruction::Return);
                self.define_label(end)?;
            }
            Statement::Assign { name, value, .. } => {
                self.emit_expression(value)?;
                self.emit(Instruction::Store(name.clone()));
            }
            Statement::AugAssign {
                name, op, value, ..
            } => {
                self.emit(Instruction::Load(name.clone()));
                self.emit_expression(value)?;
                self.emit(Self::binary_instruction(*op));
                self.emit(Instruction::Store(name.clone()));
            }
            Statement::While { condition, body } => {
                let start = self.fresh_label("start-while");
                let end = self.fresh_label("end-while");
                self.define_label(start.clone())?;
                self.emit_expression(condition)?;
                self.emit(Instruction::JumpF(end.clone()));
                self.loop_labels.push((start.clone(), end.clone()));
                let result = self.emit_statements(body);
                self.loop_labels.pop();
                result?;
                self.emit(Instruction::Jump(start));
                self.define_label(end)?;
            }
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                self.emit_expression(condition)?;
                if else_body.is_empty() {
                    let end = self.fresh_label("end-if");
                    self.emit(Instruction::JumpF(end.clone()));
                    self.emit_statements(then_body)?;
                    self.define_label(end)?;
                } else {
                    let else_label = self.fresh_label("else");
                    let end = self.fresh_label("end-if");
                    self.emit(Instruction::JumpF(else_label.clone()));
                    self.emit_statements(then_body)?;
                    self.emit(Instruction::Jump(end.clone()));
                    self.define_label(else_label)?;
                    self.emit_statements(else_body)?;
                    self.define_label(end)?;
                }
            }
            Statement::Break { .. } => {
                let Some((_, end)) = self.loop_labels.last() else {
                    bail!("'break' outside of a loop reached code generation");
                };
                let end = end.clone();
                self.emit(Instruction::Jump(end));
            }
            Statement::Continue { .. } => {
                let Some((start, _)) = self.loop_labels.last() else {
                    bail!("'continue' outside of a loop reached code generation");
                };
                let start = start.clone();
                self.emit(Instruction::Jump(start));
            }
            Statement::Return { value, .. } => {
                match value {
                    Some(value) => self.emit_expression(value)?,
                    None => self.emit(Instruction::Push(0)),
                }
                self.emit(Instruction::Return);
            }
            Statement::Print { value, .. } => {
                self.emit_expression(value)?;
                self.emit(Instruction::Write);
            }
            Statement::Expr(expr) => {
                // No POP opcode: park the unused result in a scratch slot so
                // loops cannot grow the operand stack.
                self.emit_expression(expr)?;
                let temp = self.fresh_temp();
                self.emit(Instruction::Store(temp));
            }
        }
        Ok(())
    }

    fn emit_statements(&mut self, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.emit_statement(statement)?;
        }
        Ok(())
    }

    fn emit_expression(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::Integer(value) => {
                self.emit(Instruction::Push(*value));
            }
            Expression::Boolean(value) => {
                self.emit(Instruction::Push(if *value { 1 } else { 0 }));
            }
            Expression::Name { name, .. } => {
                self.emit(Instruction::Load(name.clone()));
            }
            Expression::BinaryOp { left, op, right } => {
                self.emit_expression(left)?;
                self.emit_expression(right)?;
                self.emit(Self::binary_instruction(*op));
            }
            Expression::UnaryOp { op, operand } => match op {
                UnaryOperator::Neg => {
                    self.emit(Instruction::Push(0));
                    self.emit_expression(operand)?;
                    self.emit(Instruction::Sub);
                }
                UnaryOperator::Not => {
                    self.emit_expression(operand)?;
                    self.emit(Instruction::Not);
                }
            },
            Expression::Compare { left, op, right } => {
                self.emit_expression(left)?;
                self.emit_expression(right)?;
                self.emit(match op {
                    CompareOperator::Lt => Instruction::Lt,
                    CompareOperator::Gt => Instruction::Gt,
                    CompareOperator::Eq => Instruction::Eq,
                    CompareOperator::NotEq => Instruction::Ne,
                    CompareOperator::Le => Instruction::Le,
                    CompareOperator::Ge => Instruction::Ge,
                });
            }
            Expression::BoolOp { op, values } => match op {
                BoolOperator::And => self.emit_and(values)?,
                BoolOperator::Or => self.emit_or(values)?,
            },
            Expression::Call { name, args, .. } => {
                if matches!(name.as_str(), "print" | "int" | "input") {
                    bail!("Reserved call '{name}' reached code generation");
                }
                for arg in args {
                    self.emit_expression(arg)?;
                }
                self.emit(Instruction::Call {
                    name: name.clone(),
                    arity: args.len(),
                });
            }
            Expression::Input { .. } => {
                self.emit(Instruction::Read);
            }
        }
        Ok(())
    }

    /// `a and b and ...`: bail out past the remaining operands on the first
    /// falsy value. A falsy operand is always the integer 0, so the result
    /// can be re-materialized instead of preserved across the popping JUMPF.
    fn emit_and(&mut self, values: &[Expression]) -> Result<()> {
        let false_label = self.fresh_label("and-false");
        let end = self.fresh_label("end-and");
        for (index, value) in values.iter().enumerate() {
            self.emit_expression(value)?;
            if index + 1 < values.len() {
                self.emit(Instruction::JumpF(false_label.clone()));
            }
        }
        self.emit(Instruction::Jump(end.clone()));
        self.define_label(false_label)?;
        self.emit(Instruction::Push(0));
        self.define_label(end)?;
        Ok(())
    }

    /// `a or b or ...`: the result is the first truthy operand's value, so
    /// each operand is parked in a scratch slot before the falsiness test.
    fn emit_or(&mut self, values: &[Expression]) -> Result<()> {
        let temp = self.fresh_temp();
        let end = self.fresh_label("end-or");
        for (index, value) in values.iter().enumerate() {
            self.emit_expression(value)?;
            if index + 1 < values.len() {
                let next = self.fresh_label("or-next");
                self.emit(Instruction::Store(temp.clone()));
                self.emit(Instruction::Load(temp.clone()));
                self.emit(Instruction::JumpF(next.clone()));
                self.emit(Instruction::Load(temp.clone()));
                self.emit(Instruction::Jump(end.clone()));
                self.define_label(next)?;
            }
        }
        self.define_label(end)?;
        Ok(())
    }

    fn binary_instruction(op: BinaryOperator) -> Instruction {
        match op {
            BinaryOperator::Add => Instruction::Add,
            BinaryOperator::Sub => Instruction::Sub,
            BinaryOperator::Mul => Instruction::Mul,
        }
    }
}
