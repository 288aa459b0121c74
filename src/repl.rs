//! Line supplier for interactive mode.
//!
//! Prompts with `> ` for a fresh statement and `| ` for a continuation
//! line; EOF on stdin ends the session cleanly.

use std::io::{self, BufRead, Write};

pub fn stdin_reader() -> impl FnMut(bool) -> Option<String> {
    let stdin = io::stdin();
    move |continuation| {
        let prompt = if continuation { "| " } else { "> " };
        print!("{prompt}");
        io::stdout().flush().ok()?;

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    }
}
