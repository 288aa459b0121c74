//! Pipeline driver.
//!
//! Batch mode feeds a whole file through lexer → parser → evaluator.
//! Interactive mode feeds one logical input at a time through the same
//! pipeline, asking the input callback for continuation lines while the
//! parser reports an incomplete prefix. The symbol table stack persists
//! across interactive inputs; each input's AST is discarded after
//! evaluation (shared function/command/class bodies stay alive through
//! the values that hold them).

use tracing::debug;

use crate::lexer;
use crate::parser::{self, ParseError};
use crate::runtime::builtins;
use crate::runtime::error::{ErrorCode, RuntimeError};
use crate::runtime::exec::{Executor, OutputSink};
use crate::runtime::scope::ScopeStack;
use crate::token::Position;

/// Result of feeding one (possibly partial) input through the pipeline.
enum Progress {
    Complete,
    NeedMoreInput,
}

pub struct Interpreter {
    stack: ScopeStack,
    executor: Executor,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_sink(OutputSink::Stdout)
    }

    pub fn with_sink(sink: OutputSink) -> Self {
        let stack = ScopeStack::new();
        builtins::register_prelude(&stack);
        Self {
            stack,
            executor: Executor::with_sink(sink),
        }
    }

    /// Interpreter wired to a capture buffer, for tests.
    pub fn capturing() -> (Self, OutputSink) {
        let sink = OutputSink::buffer();
        (Self::with_sink(sink.clone()), sink)
    }

    /// Batch execution of a complete source text.
    pub fn eval_source(&mut self, source: &str) -> Result<(), RuntimeError> {
        match self.run(source)? {
            Progress::Complete => Ok(()),
            Progress::NeedMoreInput => Err(RuntimeError::with_pos(
                ErrorCode::Syntax,
                "unexpected end of input",
                end_position(source),
            )),
        }
    }

    /// Interactive loop. The callback receives `true` when the pending
    /// input is an incomplete prefix and a continuation line is wanted;
    /// `None` means end of input. Errors are printed and the offending
    /// input discarded without losing the symbol table.
    pub fn exec_interactive<F>(&mut self, mut input: F)
    where
        F: FnMut(bool) -> Option<String>,
    {
        let mut pending = String::new();
        loop {
            let Some(line) = input(!pending.is_empty()) else {
                break;
            };
            pending.push_str(&line);
            if !pending.ends_with('\n') {
                pending.push('\n');
            }
            if pending.trim().is_empty() {
                pending.clear();
                continue;
            }
            match self.run(&pending) {
                Ok(Progress::NeedMoreInput) => continue,
                Ok(Progress::Complete) => pending.clear(),
                Err(error) => {
                    print_error(&error);
                    pending.clear();
                }
            }
        }
    }

    fn run(&mut self, source: &str) -> Result<Progress, RuntimeError> {
        let (tokens, messages) = lexer::tokenize(source);
        debug!(
            tokens = tokens.len(),
            diagnostics = messages.error_count(),
            "lexed input"
        );
        if messages.error_count() > 0 {
            let mut diagnostics = messages.into_vec();
            let first = diagnostics.remove(0);
            return Err(
                RuntimeError::with_pos(ErrorCode::Syntax, first.text, first.pos)
                    .with_messages(diagnostics),
            );
        }

        let program = match parser::parse(tokens) {
            Ok(program) => program,
            Err(ParseError::NeedMoreInput) => return Ok(Progress::NeedMoreInput),
            Err(ParseError::Syntax { message, pos }) => {
                return Err(RuntimeError::with_pos(ErrorCode::Syntax, message, pos))
            }
        };
        debug!(stmts = program.stmts.len(), "parsed program");

        self.executor.exec_program(&program, &mut self.stack)?;
        Ok(Progress::Complete)
    }
}

/// `Error: <line>: <col>: <message>`, then one line per secondary
/// diagnostic in the same shape.
pub fn print_error(error: &RuntimeError) {
    eprintln!("Error: {error}");
    for message in &error.messages {
        eprintln!("Error: {message}");
    }
}

fn end_position(source: &str) -> Position {
    let line = source.lines().count().max(1) as u32;
    let col = source.lines().last().map(|l| l.chars().count() + 1).unwrap_or(1) as u32;
    Position { line, col }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_capturing(source: &str) -> Result<String, RuntimeError> {
        let (mut interpreter, sink) = Interpreter::capturing();
        interpreter.eval_source(source)?;
        Ok(sink.captured().expect("buffer sink"))
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        let output = run_capturing("print(1 + 2 * 3)").expect("run failed");
        assert_eq!(output, "7\n");
    }

    #[test]
    fn lexer_errors_become_syntax_errors() {
        let error = run_capturing("let s = \"he").expect_err("expected error");
        assert_eq!(error.code, ErrorCode::Syntax);
        assert_eq!(error.to_string(), "1: 9: string literal not terminated");
    }

    #[test]
    fn incomplete_batch_input_is_a_syntax_error() {
        let error = run_capturing("func g(x) {").expect_err("expected error");
        assert_eq!(error.code, ErrorCode::Syntax);
        assert_eq!(error.message, "unexpected end of input");
    }

    #[test]
    fn interactive_continuation_keeps_state() {
        let lines = vec!["func g(x) {", "return x+1 }", "print(g(41))"];
        let mut continuation_flags = Vec::new();
        let mut supplied = lines.into_iter();
        let (mut interpreter, sink) = Interpreter::capturing();
        interpreter.exec_interactive(|continuing| {
            continuation_flags.push(continuing);
            supplied.next().map(|line| line.to_string())
        });
        assert_eq!(sink.captured().expect("buffer sink"), "42\n");
        assert_eq!(continuation_flags, vec![false, true, false, false]);
    }

    #[test]
    fn interactive_errors_do_not_lose_the_symbol_table() {
        let lines = vec!["let x = 10", "y)", "print(x)"];
        let mut supplied = lines.into_iter();
        let (mut interpreter, sink) = Interpreter::capturing();
        interpreter.exec_interactive(|_| supplied.next().map(|line| line.to_string()));
        assert_eq!(sink.captured().expect("buffer sink"), "10\n");
    }
}
