use thiserror::Error;

use crate::source::Message;
use crate::token::Position;

/// Closed set of runtime error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Syntax,
    IncompatibleType,
    OutOfRange,
    InvalidArgs,
    FuncParams,
    UndefinedSymbol,
    Assign,
    Import,
    File,
    Custom,
    Assert,
}

/// Typed runtime error carrying the offending position and any secondary
/// diagnostics accumulated on the way (e.g. per-token lexer errors).
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{}", render(.pos, .message))]
pub struct RuntimeError {
    pub code: ErrorCode,
    pub message: String,
    pub pos: Option<Position>,
    pub messages: Vec<Message>,
}

fn render(pos: &Option<Position>, message: &str) -> String {
    match pos {
        Some(pos) => format!("{}: {}: {}", pos.line, pos.col, message),
        None => message.to_string(),
    }
}

impl RuntimeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            pos: None,
            messages: Vec::new(),
        }
    }

    pub fn with_pos(code: ErrorCode, message: impl Into<String>, pos: Position) -> Self {
        Self {
            code,
            message: message.into(),
            pos: Some(pos),
            messages: Vec::new(),
        }
    }

    /// Attaches a position unless one is already set; the innermost
    /// position wins as the error bubbles outward.
    pub fn at(mut self, pos: Position) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_position_prefix() {
        let error = RuntimeError::with_pos(
            ErrorCode::UndefinedSymbol,
            "symbol 'x' not found",
            Position { line: 3, col: 7 },
        );
        assert_eq!(error.to_string(), "3: 7: symbol 'x' not found");
    }

    #[test]
    fn innermost_position_wins() {
        let error = RuntimeError::new(ErrorCode::OutOfRange, "index 4 out of bounds")
            .at(Position { line: 1, col: 2 })
            .at(Position { line: 9, col: 9 });
        assert_eq!(error.pos, Some(Position { line: 1, col: 2 }));
    }
}
