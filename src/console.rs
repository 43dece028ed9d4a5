use std::io::{self, BufRead, Write};

/// Line-oriented I/O collaborator injected into the interpreter, so the core
/// never owns a terminal or file handle directly.
pub trait Console {
    /// Next input line, without its trailing newline. `None` means the input
    /// source is exhausted.
    fn next_line(&mut self) -> Option<String>;

    /// Emits one integer of program output.
    fn emit(&mut self, value: i64);
}

/// Standard-stream console: reads stdin line by line, prints each emitted
/// integer on its own stdout line as it happens.
pub struct StdConsole;

impl StdConsole {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for StdConsole {
    fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
        }
    }

    fn emit(&mut self, value: i64) {
        println!("{value}");
        let _ = io::stdout().flush();
    }
}

/// Scripted console for tests: a fixed list of input lines in, collected
/// integers out.
pub struct StaticConsole {
    input: std::vec::IntoIter<String>,
    output: Vec<i64>,
}

impl StaticConsole {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            input: lines.into_iter(),
            output: Vec::new(),
        }
    }

    pub fn from_text(text: &str) -> Self {
        let lines = text.lines().map(str::to_string).collect();
        Self::new(lines)
    }

    pub fn output(&self) -> &[i64] {
        &self.output
    }

    /// Output rendered one integer per line, the way `StdConsole` prints it.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Console for StaticConsole {
    fn next_line(&mut self) -> Option<String> {
        self.input.next()
    }

    fn emit(&mut self, value: i64) {
        self.output.push(value);
    }
}
