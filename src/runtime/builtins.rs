//! Standard prelude functions.
//!
//! Registered as const global symbols, so user code can shadow them in
//! inner frames but never reassign the global binding.

use std::io::{self, BufRead};
use std::rc::Rc;

use crate::runtime::error::{ErrorCode, RuntimeError, RuntimeResult};
use crate::runtime::exec::OutputSink;
use crate::runtime::path::PathValue;
use crate::runtime::scope::ScopeStack;
use crate::runtime::value::{Builtin, Value};

pub fn register_prelude(stack: &ScopeStack) {
    for builtin in Builtin::ALL {
        stack.insert_const(builtin.name(), Value::Builtin(builtin));
    }
}

pub fn call(builtin: Builtin, args: Vec<Value>, sink: &OutputSink) -> RuntimeResult<Value> {
    match builtin {
        Builtin::Print => {
            let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
            sink.line(&rendered.join(" "));
            Ok(Value::Nil)
        }
        Builtin::PrintErr => {
            let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
            eprintln!("{}", rendered.join(" "));
            Ok(Value::Nil)
        }
        Builtin::Read => {
            expect_arity(builtin, &args, 0, 0)?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map_err(|error| {
                RuntimeError::new(ErrorCode::File, format!("read failed: {error}"))
            })?;
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(Value::string(line))
        }
        Builtin::Len => {
            expect_arity(builtin, &args, 1, 1)?;
            Ok(Value::Int(args[0].len()?))
        }
        Builtin::Assert => {
            expect_arity(builtin, &args, 1, 2)?;
            if args[0].truthy() {
                return Ok(Value::Nil);
            }
            let message = match args.get(1) {
                Some(Value::Str(text)) => text.as_ref().clone(),
                Some(other) => other.to_string(),
                None => "assertion failed".to_string(),
            };
            Err(RuntimeError::new(ErrorCode::Assert, message))
        }
        Builtin::Type => {
            expect_arity(builtin, &args, 1, 1)?;
            let name = match &args[0] {
                Value::Instance(instance) => instance.class.name.clone(),
                other => other.type_name().to_string(),
            };
            Ok(Value::string(name))
        }
        Builtin::Str => {
            expect_arity(builtin, &args, 1, 1)?;
            Ok(Value::string(args[0].to_string()))
        }
        Builtin::Int => {
            expect_arity(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::Int(v) => Ok(Value::Int(*v)),
                Value::Real(v) => Ok(Value::Int(*v as i64)),
                Value::Bool(v) => Ok(Value::Int(*v as i64)),
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    RuntimeError::new(
                        ErrorCode::InvalidArgs,
                        format!("cannot convert '{s}' to int"),
                    )
                }),
                other => Err(RuntimeError::new(
                    ErrorCode::InvalidArgs,
                    format!("cannot convert {} to int", other.type_name()),
                )),
            }
        }
        Builtin::Real => {
            expect_arity(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::Int(v) => Ok(Value::Real(*v as f64)),
                Value::Real(v) => Ok(Value::Real(*v)),
                Value::Bool(v) => Ok(Value::Real(*v as i64 as f64)),
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Real).map_err(|_| {
                    RuntimeError::new(
                        ErrorCode::InvalidArgs,
                        format!("cannot convert '{s}' to real"),
                    )
                }),
                other => Err(RuntimeError::new(
                    ErrorCode::InvalidArgs,
                    format!("cannot convert {} to real", other.type_name()),
                )),
            }
        }
        Builtin::Bool => {
            expect_arity(builtin, &args, 1, 1)?;
            Ok(Value::Bool(args[0].truthy()))
        }
        Builtin::Path => {
            expect_arity(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Path(Rc::new(PathValue::new(s.as_str())))),
                Value::Path(p) => Ok(Value::Path(p.clone())),
                other => Err(RuntimeError::new(
                    ErrorCode::InvalidArgs,
                    format!("path() expects a string, got {}", other.type_name()),
                )),
            }
        }
    }
}

fn expect_arity(builtin: Builtin, args: &[Value], min: usize, max: usize) -> RuntimeResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(RuntimeError::new(
            ErrorCode::FuncParams,
            format!(
                "{}() expects {expected} arguments, got {}",
                builtin.name(),
                args.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> OutputSink {
        OutputSink::buffer()
    }

    #[test]
    fn len_of_containers_and_strings() {
        let sink = capture();
        let out = call(Builtin::Len, vec![Value::string("héllo")], &sink).expect("len failed");
        assert!(matches!(out, Value::Int(5)));
        let error = call(Builtin::Len, vec![Value::Int(1)], &sink).expect_err("expected error");
        assert_eq!(error.code, ErrorCode::IncompatibleType);
    }

    #[test]
    fn assert_raises_with_custom_message() {
        let sink = capture();
        let error = call(
            Builtin::Assert,
            vec![Value::Bool(false), Value::string("boom")],
            &sink,
        )
        .expect_err("expected error");
        assert_eq!(error.code, ErrorCode::Assert);
        assert_eq!(error.message, "boom");
        assert!(call(Builtin::Assert, vec![Value::Bool(true)], &sink).is_ok());
    }

    #[test]
    fn conversions() {
        let sink = capture();
        let n = call(Builtin::Int, vec![Value::string(" 42 ")], &sink).expect("int failed");
        assert!(matches!(n, Value::Int(42)));
        let r = call(Builtin::Real, vec![Value::Int(2)], &sink).expect("real failed");
        assert!(matches!(r, Value::Real(v) if v == 2.0));
        let error =
            call(Builtin::Int, vec![Value::string("4x")], &sink).expect_err("expected error");
        assert_eq!(error.code, ErrorCode::InvalidArgs);
    }

    #[test]
    fn type_reports_class_name_for_instances() {
        let sink = capture();
        let name = call(Builtin::Type, vec![Value::Int(1)], &sink).expect("type failed");
        assert_eq!(name.to_string(), "int");
    }
}
