//! Filesystem path values.
//!
//! Paths stringify to their raw text, compare by filesystem equivalence
//! and join with `/`. Every filesystem failure surfaces as a FILE error.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use walkdir::WalkDir;

use crate::runtime::error::{ErrorCode, RuntimeError, RuntimeResult};
use crate::runtime::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValue {
    path: PathBuf,
}

impl PathValue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Equality is by canonicalization; operands that cannot be
    /// canonicalized (e.g. nonexistent files) reject the comparison.
    pub fn equivalent(&self, other: &PathValue) -> RuntimeResult<bool> {
        let left = fs::canonicalize(&self.path);
        let right = fs::canonicalize(&other.path);
        match (left, right) {
            (Ok(left), Ok(right)) => Ok(left == right),
            _ => Err(RuntimeError::new(
                ErrorCode::InvalidArgs,
                format!(
                    "operation not permitted: not valid paths {}, {}",
                    self.path.display(),
                    other.path.display()
                ),
            )),
        }
    }

    /// `path / (string | path)` joins.
    pub fn join(&self, other: &Value) -> RuntimeResult<Value> {
        let joined = match other {
            Value::Str(s) => self.path.join(s.as_str()),
            Value::Path(p) => self.path.join(&p.path),
            _ => {
                return Err(RuntimeError::new(
                    ErrorCode::IncompatibleType,
                    "given argument must be string or path object",
                ))
            }
        };
        Ok(path_value(joined))
    }
}

impl fmt::Display for PathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

fn path_value(path: impl Into<PathBuf>) -> Value {
    Value::Path(Rc::new(PathValue::new(path)))
}

fn file_error(error: impl fmt::Display) -> RuntimeError {
    RuntimeError::new(ErrorCode::File, error.to_string())
}

fn expect_no_args(method: &str, args: &[Value]) -> RuntimeResult<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(RuntimeError::new(
            ErrorCode::FuncParams,
            format!("{method}() takes no arguments, got {}", args.len()),
        ))
    }
}

/// Dispatches a method call on a path value.
pub fn call_method(path: &Rc<PathValue>, name: &str, args: &[Value]) -> RuntimeResult<Value> {
    let p = path.as_path();
    match name {
        "exists" => {
            expect_no_args(name, args)?;
            Ok(Value::Bool(p.exists()))
        }
        "is_regular_file" => {
            expect_no_args(name, args)?;
            Ok(Value::Bool(p.is_file()))
        }
        "is_dir" => {
            expect_no_args(name, args)?;
            Ok(Value::Bool(p.is_dir()))
        }
        "is_sym_link" => {
            expect_no_args(name, args)?;
            Ok(Value::Bool(p.is_symlink()))
        }
        "is_readable" => {
            expect_no_args(name, args)?;
            let readable = if p.is_dir() {
                fs::read_dir(p).is_ok()
            } else {
                fs::File::open(p).is_ok()
            };
            Ok(Value::Bool(readable))
        }
        "is_writable" => {
            expect_no_args(name, args)?;
            let writable = if p.is_dir() {
                fs::metadata(p)
                    .map(|m| m.permissions().mode() & 0o200 != 0)
                    .unwrap_or(false)
            } else {
                OpenOptions::new().append(true).open(p).is_ok()
            };
            Ok(Value::Bool(writable))
        }
        "is_exec" => {
            expect_no_args(name, args)?;
            let exec = fs::metadata(p)
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false);
            Ok(Value::Bool(exec))
        }
        "uid_owner" => {
            expect_no_args(name, args)?;
            let meta = fs::metadata(p).map_err(file_error)?;
            Ok(Value::Int(meta.uid() as i64))
        }
        "gid_owner" => {
            expect_no_args(name, args)?;
            let meta = fs::metadata(p).map_err(file_error)?;
            Ok(Value::Int(meta.gid() as i64))
        }
        "root_name" => {
            expect_no_args(name, args)?;
            let root = p
                .components()
                .find_map(|component| match component {
                    Component::Prefix(prefix) => Some(PathBuf::from(prefix.as_os_str())),
                    _ => None,
                })
                .unwrap_or_default();
            Ok(path_value(root))
        }
        "root_dir" => {
            expect_no_args(name, args)?;
            let root = if p.has_root() {
                PathBuf::from("/")
            } else {
                PathBuf::new()
            };
            Ok(path_value(root))
        }
        "root_path" => {
            expect_no_args(name, args)?;
            let root = if p.has_root() {
                PathBuf::from("/")
            } else {
                PathBuf::new()
            };
            Ok(path_value(root))
        }
        "relative_path" => {
            expect_no_args(name, args)?;
            let relative = p.strip_prefix("/").map(Path::to_path_buf).unwrap_or_else(|_| p.to_path_buf());
            Ok(path_value(relative))
        }
        "parent_path" => {
            expect_no_args(name, args)?;
            Ok(path_value(p.parent().map(Path::to_path_buf).unwrap_or_default()))
        }
        "filename" => {
            expect_no_args(name, args)?;
            Ok(path_value(
                p.file_name().map(PathBuf::from).unwrap_or_default(),
            ))
        }
        "stem" => {
            expect_no_args(name, args)?;
            Ok(path_value(
                p.file_stem().map(PathBuf::from).unwrap_or_default(),
            ))
        }
        "extension" => {
            expect_no_args(name, args)?;
            let ext = p
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            Ok(path_value(ext))
        }
        "absolute" => {
            expect_no_args(name, args)?;
            let canonical = fs::canonicalize(p).map_err(file_error)?;
            Ok(path_value(canonical))
        }
        "size" => size(p, args),
        _ => Err(RuntimeError::new(
            ErrorCode::UndefinedSymbol,
            format!("undefined method '{name}' for path"),
        )),
    }
}

/// `size()` returns an integer byte count; `size(unit)` with unit in
/// {"k", "M", "G"} divides down and returns a real. Directory size is
/// the recursive sum of regular file sizes.
fn size(path: &Path, args: &[Value]) -> RuntimeResult<Value> {
    if args.len() > 1 {
        return Err(RuntimeError::new(
            ErrorCode::FuncParams,
            format!("size() takes at most one argument, got {}", args.len()),
        ));
    }

    let bytes = total_size(path)?;
    let Some(unit) = args.first() else {
        return Ok(Value::Int(bytes as i64));
    };
    let Value::Str(unit) = unit else {
        return Err(RuntimeError::new(
            ErrorCode::IncompatibleType,
            "size unit must be a string",
        ));
    };
    match unit.as_str() {
        "k" => Ok(Value::Real((bytes / 1024) as f64)),
        "M" => Ok(Value::Real((bytes / (1024 * 1024)) as f64)),
        "G" => Ok(Value::Real((bytes / (1024 * 1024 * 1024)) as f64)),
        _ => Ok(Value::Int(bytes as i64)),
    }
}

fn total_size(path: &Path) -> RuntimeResult<u64> {
    if !path.exists() {
        return Err(RuntimeError::new(
            ErrorCode::File,
            format!("file '{}' not exists", path.display()),
        ));
    }
    if path.is_dir() {
        let mut sum = 0u64;
        for entry in WalkDir::new(path) {
            let entry = entry.map_err(file_error)?;
            if entry.file_type().is_file() {
                sum += entry.metadata().map_err(file_error)?.len();
            }
        }
        Ok(sum)
    } else {
        Ok(fs::metadata(path).map_err(file_error)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> Rc<PathValue> {
        Rc::new(PathValue::new(text))
    }

    #[test]
    fn join_with_string_and_path() {
        let base = path("/tmp/dir");
        let Value::Path(joined) = base.join(&Value::string("file.txt")).expect("join failed")
        else {
            panic!("expected path value");
        };
        assert_eq!(joined.to_string(), "/tmp/dir/file.txt");

        let error = base.join(&Value::Int(1)).expect_err("expected error");
        assert_eq!(error.code, ErrorCode::IncompatibleType);
    }

    #[test]
    fn filename_stem_and_extension() {
        let file = path("/tmp/archive.tar");
        let name = call_method(&file, "filename", &[]).expect("filename failed");
        assert_eq!(name.to_string(), "archive.tar");
        let stem = call_method(&file, "stem", &[]).expect("stem failed");
        assert_eq!(stem.to_string(), "archive");
        let ext = call_method(&file, "extension", &[]).expect("extension failed");
        assert_eq!(ext.to_string(), ".tar");
    }

    #[test]
    fn parent_and_roots() {
        let file = path("/a/b/c.txt");
        assert_eq!(
            call_method(&file, "parent_path", &[]).expect("parent failed").to_string(),
            "/a/b"
        );
        assert_eq!(
            call_method(&file, "root_dir", &[]).expect("root failed").to_string(),
            "/"
        );
        assert_eq!(
            call_method(&file, "relative_path", &[]).expect("relative failed").to_string(),
            "a/b/c.txt"
        );
    }

    #[test]
    fn size_of_missing_file_is_a_file_error() {
        let missing = path("/definitely/not/here/xyz");
        let error = call_method(&missing, "size", &[]).expect_err("expected error");
        assert_eq!(error.code, ErrorCode::File);
    }

    #[test]
    fn unknown_method_is_undefined() {
        let file = path("/tmp");
        let error = call_method(&file, "mangle", &[]).expect_err("expected error");
        assert_eq!(error.code, ErrorCode::UndefinedSymbol);
    }
}
