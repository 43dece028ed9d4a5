use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::codegen::{CompiledProgram, Instruction};
use crate::console::Console;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmFault {
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("RETURN with no active frame")]
    ReturnWithoutFrame,
    #[error("Unresolved label '{label}'")]
    UnresolvedLabel { label: String },
    #[error("Undefined function '{name}'")]
    UndefinedFunction { name: String },
    #[error("Function '{name}' expects {expected} arguments, got {found}")]
    CallArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("End of input")]
    EndOfInput,
    #[error("Malformed integer input '{text}'")]
    MalformedInput { text: String },
}

pub type VmResult<T> = Result<T, VmFault>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Halted,
    Faulted,
}

/// Activation record for one call: parameter/local bindings plus the offset
/// to resume at after RETURN. The caller is simply the frame below this one.
#[derive(Debug)]
struct Frame {
    locals: FxHashMap<String, i64>,
    return_ip: usize,
}

pub struct Vm<'a> {
    program: &'a CompiledProgram,
    console: &'a mut dyn Console,
    stack: Vec<i64>,
    frames: Vec<Frame>,
    globals: FxHashMap<String, i64>,
    ip: usize,
    state: VmState,
}

impl<'a> Vm<'a> {
    /// Validates every jump target and callee up front, so an unresolved
    /// reference is a load failure rather than a mid-run surprise.
    pub fn new(program: &'a CompiledProgram, console: &'a mut dyn Console) -> VmResult<Self> {
        for instruction in &program.code {
            match instruction {
                Instruction::Jump(label) | Instruction::JumpF(label) => {
                    if !program.labels.contains_key(label) {
                        return Err(VmFault::UnresolvedLabel {
                            label: label.clone(),
                        });
                    }
                }
                Instruction::Call { name, arity } => {
                    let Some(info) = program.functions.get(name) else {
                        return Err(VmFault::UndefinedFunction { name: name.clone() });
                    };
                    if info.params.len() != *arity {
                        return Err(VmFault::CallArityMismatch {
                            name: name.clone(),
                            expected: info.params.len(),
                            found: *arity,
                        });
                    }
                    if !program.labels.contains_key(&info.entry) {
                        return Err(VmFault::UnresolvedLabel {
                            label: info.entry.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            program,
            console,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: FxHashMap::default(),
            ip: 0,
            state: VmState::Running,
        })
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn run(&mut self) -> VmResult<()> {
        let result = self.execute();
        if result.is_err() {
            self.state = VmState::Faulted;
        }
        result
    }

    fn execute(&mut self) -> VmResult<()> {
        let program = self.program;
        while matches!(self.state, VmState::Running) {
            let Some(instruction) = program.code.get(self.ip) else {
                self.state = VmState::Halted;
                break;
            };
            match instruction {
                Instruction::Label(_) => self.ip += 1,
                Instruction::Push(value) => {
                    self.stack.push(*value);
                    self.ip += 1;
                }
                Instruction::Load(name) => {
                    let value = self.lookup(name)?;
                    self.stack.push(value);
                    self.ip += 1;
                }
                Instruction::Store(name) => {
                    let value = self.pop()?;
                    match self.frames.last_mut() {
                        Some(frame) => frame.locals.insert(name.clone(), value),
                        None => self.globals.insert(name.clone(), value),
                    };
                    self.ip += 1;
                }
                Instruction::Add => self.binary(|left, right| left.wrapping_add(right))?,
                Instruction::Sub => self.binary(|left, right| left.wrapping_sub(right))?,
                Instruction::Mul => self.binary(|left, right| left.wrapping_mul(right))?,
                Instruction::Lt => self.binary(|left, right| (left < right) as i64)?,
                Instruction::Gt => self.binary(|left, right| (left > right) as i64)?,
                Instruction::Eq => self.binary(|left, right| (left == right) as i64)?,
                Instruction::Ne => self.binary(|left, right| (left != right) as i64)?,
                Instruction::Le => self.binary(|left, right| (left <= right) as i64)?,
                Instruction::Ge => self.binary(|left, right| (left >= right) as i64)?,
                Instruction::And => self.binary(|left, right| (left != 0 && right != 0) as i64)?,
                Instruction::Or => self.binary(|left, right| (left != 0 || right != 0) as i64)?,
                Instruction::Not => {
                    let value = self.pop()?;
                    self.stack.push((value == 0) as i64);
                    self.ip += 1;
                }
                Instruction::Jump(label) => {
                    self.ip = self.resolve(label)?;
                }
                Instruction::JumpF(label) => {
                    let value = self.pop()?;
                    if value == 0 {
                        self.ip = self.resolve(label)?;
                    } else {
                        self.ip += 1;
                    }
                }
                Instruction::Call { name, arity } => {
                    let info = program
                        .functions
                        .get(name)
                        .ok_or_else(|| VmFault::UndefinedFunction { name: name.clone() })?;
                    if info.params.len() != *arity {
                        return Err(VmFault::CallArityMismatch {
                            name: name.clone(),
                            expected: info.params.len(),
                            found: *arity,
                        });
                    }
                    let mut args = Vec::with_capacity(*arity);
                    for _ in 0..*arity {
                        args.push(self.pop()?);
                    }
                    args.reverse();
                    let mut locals = FxHashMap::default();
                    for (param, value) in info.params.iter().zip(args) {
                        locals.insert(param.clone(), value);
                    }
                    self.frames.push(Frame {
                        locals,
                        return_ip: self.ip + 1,
                    });
                    self.ip = self.resolve(&info.entry)?;
                }
                Instruction::Return => {
                    let frame = self.frames.pop().ok_or(VmFault::ReturnWithoutFrame)?;
                    self.ip = frame.return_ip;
                }
                Instruction::Read => {
                    let line = self.console.next_line().ok_or(VmFault::EndOfInput)?;
                    let value =
                        line.trim()
                            .parse::<i64>()
                            .map_err(|_| VmFault::MalformedInput {
                                text: line.trim().to_string(),
                            })?;
                    self.stack.push(value);
                    self.ip += 1;
                }
                Instruction::Write => {
                    let value = self.pop()?;
                    self.console.emit(value);
                    self.ip += 1;
                }
                Instruction::Halt => {
                    self.state = VmState::Halted;
                }
            }
        }
        Ok(())
    }

    fn binary(&mut self, apply: impl Fn(i64, i64) -> i64) -> VmResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        self.stack.push(apply(left, right));
        self.ip += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<i64> {
        self.stack.pop().ok_or(VmFault::StackUnderflow)
    }

    fn lookup(&self, name: &str) -> VmResult<i64> {
        if let Some(frame) = self.frames.last() {
            if let Some(&value) = frame.locals.get(name) {
                return Ok(value);
            }
        }
        self.globals
            .get(name)
            .copied()
            .ok_or_else(|| VmFault::UndefinedVariable {
                name: name.to_string(),
            })
    }

    fn resolve(&self, label: &str) -> VmResult<usize> {
        self.program
            .labels
            .get(label)
            .copied()
            .ok_or_else(|| VmFault::UnresolvedLabel {
                label: label.to_string(),
            })
    }
}

/// Loads and runs a compiled program to completion against the given console.
pub fn run_program(program: &CompiledProgram, console: &mut dyn Console) -> VmResult<()> {
    let mut vm = Vm::new(program, console)?;
    vm.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::StaticConsole;
    use crate::{codegen, lexer, parser, sema};
    use indoc::indoc;
    use rustc_hash::FxHashMap;

    fn run_source(input: &str, stdin: &str) -> VmResult<Vec<i64>> {
        let tokens = lexer::tokenize(input).expect("tokenize should succeed");
        let program = parser::parse_tokens(tokens).expect("parse should succeed");
        sema::check(&program).expect("check should succeed");
        let compiled = codegen::compile(&program).expect("compile should succeed");
        let mut console = StaticConsole::from_text(stdin);
        run_program(&compiled, &mut console)?;
        Ok(console.output().to_vec())
    }

    fn raw_program(code: Vec<Instruction>) -> CompiledProgram {
        CompiledProgram {
            code,
            labels: FxHashMap::default(),
            functions: FxHashMap::default(),
        }
    }

    fn run_raw(code: Vec<Instruction>) -> VmResult<Vec<i64>> {
        let program = raw_program(code);
        let mut console = StaticConsole::new(Vec::new());
        run_program(&program, &mut console)?;
        Ok(console.output().to_vec())
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        let output = run_source("print(int(1 + 2 * 3))\n", "").expect("run");
        assert_eq!(output, vec![7]);
    }

    #[test]
    fn while_loop_counts_up_and_halts() {
        let input = indoc! {"
            x = 0
            while x < 3:
                print(int(x))
                x = x + 1
        "};
        let output = run_source(input, "").expect("run");
        assert_eq!(output, vec![0, 1, 2]);
    }

    #[test]
    fn calls_bind_arguments_positionally() {
        let input = indoc! {"
            def f(x, y):
                return x * 2 + y
            print(int(f(3, 4)))
        "};
        let output = run_source(input, "").expect("run");
        assert_eq!(output, vec![10]);
    }

    #[test]
    fn recursion_uses_one_frame_per_call() {
        let input = indoc! {"
            def fact(n):
                if n < 2:
                    return 1
                return n * fact(n - 1)
            print(int(fact(5)))
        "};
        let output = run_source(input, "").expect("run");
        assert_eq!(output, vec![120]);
    }

    #[test]
    fn falsy_and_never_evaluates_right_operand() {
        let input = indoc! {"
            def noisy():
                print(int(99))
                return 1
            print(int(0 and noisy()))
        "};
        let output = run_source(input, "").expect("run");
        assert_eq!(output, vec![0]);
    }

    #[test]
    fn boolean_operators_return_operand_values() {
        let input = indoc! {"
            print(int(5 and 0))
            print(int(5 or 0))
            print(int(0 or 7))
            print(int(2 and 3))
        "};
        let output = run_source(input, "").expect("run");
        assert_eq!(output, vec![0, 5, 7, 3]);
    }

    #[test]
    fn function_reads_global_but_writes_locally() {
        let input = indoc! {"
            base = 10
            def bump():
                n = base + 1
                return n
            print(int(bump()))
            print(int(base))
        "};
        let output = run_source(input, "").expect("run");
        assert_eq!(output, vec![11, 10]);
    }

    #[test]
    fn implicit_return_yields_zero() {
        let input = indoc! {"
            def nothing():
                x = 1
            print(int(nothing()))
        "};
        let output = run_source(input, "").expect("run");
        assert_eq!(output, vec![0]);
    }

    #[test]
    fn read_parses_input_lines() {
        let output = run_source("print(int(int(input()) + 1))\n", "41\n").expect("run");
        assert_eq!(output, vec![42]);
    }

    #[test]
    fn read_faults_on_malformed_integer() {
        let err = run_source("print(int(int(input())))\n", "forty\n").expect_err("expected fault");
        assert_eq!(
            err,
            VmFault::MalformedInput {
                text: "forty".to_string(),
            }
        );
    }

    #[test]
    fn read_faults_at_end_of_input() {
        let err = run_source("print(int(int(input())))\n", "").expect_err("expected fault");
        assert_eq!(err, VmFault::EndOfInput);
    }

    #[test]
    fn strict_boolean_opcodes_produce_zero_or_one() {
        let output = run_raw(vec![
            Instruction::Push(3),
            Instruction::Push(0),
            Instruction::And,
            Instruction::Write,
            Instruction::Push(3),
            Instruction::Push(0),
            Instruction::Or,
            Instruction::Write,
            Instruction::Push(5),
            Instruction::Not,
            Instruction::Write,
            Instruction::Push(0),
            Instruction::Not,
            Instruction::Write,
            Instruction::Halt,
        ])
        .expect("run");
        assert_eq!(output, vec![0, 1, 0, 1]);
    }

    #[test]
    fn arithmetic_wraps_at_machine_width() {
        let output = run_raw(vec![
            Instruction::Push(i64::MAX),
            Instruction::Push(1),
            Instruction::Add,
            Instruction::Write,
            Instruction::Halt,
        ])
        .expect("run");
        assert_eq!(output, vec![i64::MIN]);
    }

    #[test]
    fn faults_on_stack_underflow() {
        let err = run_raw(vec![Instruction::Add, Instruction::Halt]).expect_err("expected fault");
        assert_eq!(err, VmFault::StackUnderflow);
    }

    #[test]
    fn faults_on_return_without_frame() {
        let err = run_raw(vec![
            Instruction::Push(1),
            Instruction::Return,
            Instruction::Halt,
        ])
        .expect_err("expected fault");
        assert_eq!(err, VmFault::ReturnWithoutFrame);
    }

    #[test]
    fn load_rejects_unresolved_jump_target() {
        let program = raw_program(vec![Instruction::Jump("nowhere".to_string())]);
        let mut console = StaticConsole::new(Vec::new());
        let err = Vm::new(&program, &mut console).err().expect("load failure");
        assert_eq!(
            err,
            VmFault::UnresolvedLabel {
                label: "nowhere".to_string(),
            }
        );
    }

    #[test]
    fn load_rejects_call_to_unknown_function() {
        let program = raw_program(vec![Instruction::Call {
            name: "ghost".to_string(),
            arity: 0,
        }]);
        let mut console = StaticConsole::new(Vec::new());
        let err = Vm::new(&program, &mut console).err().expect("load failure");
        assert_eq!(
            err,
            VmFault::UndefinedFunction {
                name: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn halted_vm_reports_terminal_state_and_empty_frames() {
        let program = raw_program(vec![Instruction::Push(1), Instruction::Halt]);
        let mut console = StaticConsole::new(Vec::new());
        let mut vm = Vm::new(&program, &mut console).expect("load");
        vm.run().expect("run");
        assert_eq!(vm.state(), VmState::Halted);
        assert_eq!(vm.call_depth(), 0);
    }
}
