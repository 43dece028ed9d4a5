use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result, bail};

use pystack::console::StdConsole;
use pystack::{codegen, lexer, parser, sema, vm};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut emit_asm = false;
    let mut input_path: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--emit-asm" | "-S" => emit_asm = true,
            _ => {
                input_path = Some(arg);
                if args.next().is_some() {
                    bail!("Only one input file is supported");
                }
                break;
            }
        }
    }

    let source = if let Some(path) = input_path {
        fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    };

    let tokens = lexer::tokenize(&source)?;
    let program = parser::parse_tokens(tokens)?;
    sema::check(&program)?;
    let compiled = codegen::compile(&program)?;

    if emit_asm {
        print!("{}", compiled.to_text());
        return Ok(());
    }

    let mut console = StdConsole::new();
    vm::run_program(&compiled, &mut console)?;
    Ok(())
}
