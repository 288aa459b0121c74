//! Runtime value model.
//!
//! Values are a closed tagged union with shared ownership: mutation
//! through one alias is observable through every other. The operator
//! protocol methods return fresh values or a typed `RuntimeError`
//! without a position; the evaluator attaches the offending node's
//! position as errors bubble out.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{Block, Param};
use crate::runtime::error::{ErrorCode, RuntimeError, RuntimeResult};
use crate::runtime::path::PathValue;
use crate::runtime::scope::ScopeStack;

#[derive(Clone)]
pub enum Value {
    Nil,
    Int(i64),
    Bool(bool),
    Real(f64),
    Str(Rc<String>),
    Tuple(Rc<Vec<Value>>),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<IndexMap<String, Value>>>),
    Slice(Rc<SliceValue>),
    Function(Rc<FunctionValue>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Class(Rc<ClassValue>),
    Interface(Rc<InterfaceValue>),
    Instance(Rc<InstanceValue>),
    Iter(Rc<RefCell<IterValue>>),
    Path(Rc<PathValue>),
    Module(Rc<ModuleValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    PrintErr,
    Read,
    Len,
    Assert,
    Type,
    Str,
    Int,
    Real,
    Bool,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub step: Option<i64>,
}

pub struct FunctionValue {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Rc<Block>,
    pub captured: ScopeStack,
    pub is_command: bool,
}

impl FunctionValue {
    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|param| param.variadic)
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

// The captured stack can reach back to this function through its own
// frame, so Debug stays shallow.
impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionValue({})", self.display_name())
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub function: Rc<FunctionValue>,
}

impl fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundMethod({})", self.function.display_name())
    }
}

pub struct ClassValue {
    pub name: String,
    pub parent: Option<Rc<ClassValue>>,
    pub interfaces: Vec<Rc<InterfaceValue>>,
    pub methods: IndexMap<String, Rc<FunctionValue>>,
    pub is_final: bool,
}

impl ClassValue {
    /// Method resolution: own table, then the parent chain, then
    /// interface defaults in declaration order.
    pub fn find_method(&self, name: &str) -> Option<Rc<FunctionValue>> {
        if let Some(method) = self.methods.get(name) {
            return Some(method.clone());
        }
        if let Some(parent) = &self.parent {
            if let Some(method) = parent.find_method(name) {
                return Some(method);
            }
        }
        self.interfaces
            .iter()
            .find_map(|interface| interface.methods.get(name).cloned())
    }
}

impl fmt::Debug for ClassValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassValue({})", self.name)
    }
}

pub struct InterfaceValue {
    pub name: String,
    pub methods: IndexMap<String, Rc<FunctionValue>>,
}

impl fmt::Debug for InterfaceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceValue({})", self.name)
    }
}

pub struct InstanceValue {
    pub class: Rc<ClassValue>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl fmt::Debug for InstanceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceValue({})", self.class.name)
    }
}

#[derive(Debug)]
pub struct ModuleValue {
    pub name: String,
    pub exports: IndexMap<String, Value>,
}

/// Iterators snapshot map entries at creation; arrays and tuples are
/// walked in place by index.
#[derive(Debug)]
pub enum IterValue {
    Array {
        items: Rc<RefCell<Vec<Value>>>,
        index: usize,
    },
    Tuple {
        items: Rc<Vec<Value>>,
        index: usize,
    },
    Map {
        entries: Vec<(String, Value)>,
        index: usize,
    },
    Str {
        chars: Vec<char>,
        index: usize,
    },
}

impl IterValue {
    pub fn has_next(&self) -> bool {
        match self {
            IterValue::Array { items, index } => *index < items.borrow().len(),
            IterValue::Tuple { items, index } => *index < items.len(),
            IterValue::Map { entries, index } => *index < entries.len(),
            IterValue::Str { chars, index } => *index < chars.len(),
        }
    }

    pub fn next(&mut self) -> Option<Value> {
        match self {
            IterValue::Array { items, index } => {
                let item = items.borrow().get(*index).cloned()?;
                *index += 1;
                Some(item)
            }
            IterValue::Tuple { items, index } => {
                let item = items.get(*index).cloned()?;
                *index += 1;
                Some(item)
            }
            IterValue::Map { entries, index } => {
                let (key, value) = entries.get(*index).cloned()?;
                *index += 1;
                Some(Value::Tuple(Rc::new(vec![Value::string(key), value])))
            }
            IterValue::Str { chars, index } => {
                let c = chars.get(*index).copied()?;
                *index += 1;
                Some(Value::string(c.to_string()))
            }
        }
    }
}

impl Builtin {
    pub const ALL: [Builtin; 11] = [
        Builtin::Print,
        Builtin::PrintErr,
        Builtin::Read,
        Builtin::Len,
        Builtin::Assert,
        Builtin::Type,
        Builtin::Str,
        Builtin::Int,
        Builtin::Real,
        Builtin::Bool,
        Builtin::Path,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::PrintErr => "print_err",
            Builtin::Read => "read",
            Builtin::Len => "len",
            Builtin::Assert => "assert",
            Builtin::Type => "type",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Real => "real",
            Builtin::Bool => "bool",
            Builtin::Path => "path",
        }
    }
}

enum Numeric {
    Ints(i64, i64),
    Reals(f64, f64),
}

fn as_number(value: &Value) -> Option<Value> {
    match value {
        Value::Int(_) | Value::Real(_) => Some(value.clone()),
        Value::Bool(b) => Some(Value::Int(*b as i64)),
        _ => None,
    }
}

/// int ⊗ real → real; bool coerces to 0/1.
fn numeric_pair(left: &Value, right: &Value) -> Option<Numeric> {
    match (as_number(left)?, as_number(right)?) {
        (Value::Int(a), Value::Int(b)) => Some(Numeric::Ints(a, b)),
        (Value::Int(a), Value::Real(b)) => Some(Numeric::Reals(a as f64, b)),
        (Value::Real(a), Value::Int(b)) => Some(Numeric::Reals(a, b as f64)),
        (Value::Real(a), Value::Real(b)) => Some(Numeric::Reals(a, b)),
        _ => None,
    }
}

fn int_pair(left: &Value, right: &Value, op: &str) -> RuntimeResult<(i64, i64)> {
    match numeric_pair(left, right) {
        Some(Numeric::Ints(a, b)) => Ok((a, b)),
        _ => Err(binary_type_error(op, left, right)),
    }
}

fn binary_type_error(op: &str, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::new(
        ErrorCode::IncompatibleType,
        format!(
            "operator '{op}' not supported between {} and {}",
            left.type_name(),
            right.type_name()
        ),
    )
}

fn unary_type_error(op: &str, value: &Value) -> RuntimeError {
    RuntimeError::new(
        ErrorCode::IncompatibleType,
        format!("operator '{op}' not supported for {}", value.type_name()),
    )
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Slice(_) => "slice",
            Value::Function(_) => "func",
            Value::Builtin(_) => "func",
            Value::Method(_) => "method",
            Value::Class(_) => "class",
            Value::Interface(_) => "interface",
            Value::Instance(_) => "instance",
            Value::Iter(_) => "iterator",
            Value::Path(_) => "path",
            Value::Module(_) => "module",
        }
    }

    /// nil, zero, the empty string and empty containers are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Int(v) => *v != 0,
            Value::Bool(v) => *v,
            Value::Real(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Array(items) => !items.borrow().is_empty(),
            Value::Map(entries) => !entries.borrow().is_empty(),
            _ => true,
        }
    }

    // ---- arithmetic ----

    pub fn add(&self, other: &Value) -> RuntimeResult<Value> {
        if let Some(pair) = numeric_pair(self, other) {
            return Ok(match pair {
                Numeric::Ints(a, b) => Value::Int(a.wrapping_add(b)),
                Numeric::Reals(a, b) => Value::Real(a + b),
            });
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::string(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::array(items))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                let mut items = a.as_ref().clone();
                items.extend(b.iter().cloned());
                Ok(Value::tuple(items))
            }
            _ => Err(binary_type_error("+", self, other)),
        }
    }

    pub fn sub(&self, other: &Value) -> RuntimeResult<Value> {
        match numeric_pair(self, other) {
            Some(Numeric::Ints(a, b)) => Ok(Value::Int(a.wrapping_sub(b))),
            Some(Numeric::Reals(a, b)) => Ok(Value::Real(a - b)),
            None => Err(binary_type_error("-", self, other)),
        }
    }

    pub fn mul(&self, other: &Value) -> RuntimeResult<Value> {
        match numeric_pair(self, other) {
            Some(Numeric::Ints(a, b)) => Ok(Value::Int(a.wrapping_mul(b))),
            Some(Numeric::Reals(a, b)) => Ok(Value::Real(a * b)),
            None => Err(binary_type_error("*", self, other)),
        }
    }

    pub fn div(&self, other: &Value) -> RuntimeResult<Value> {
        if let Value::Path(path) = self {
            return path.join(other);
        }
        match numeric_pair(self, other) {
            Some(Numeric::Ints(_, 0)) => Err(RuntimeError::new(
                ErrorCode::OutOfRange,
                "division by zero",
            )),
            Some(Numeric::Ints(a, b)) => Ok(Value::Int(a.wrapping_div(b))),
            Some(Numeric::Reals(a, b)) => Ok(Value::Real(a / b)),
            None => Err(binary_type_error("/", self, other)),
        }
    }

    pub fn rem(&self, other: &Value) -> RuntimeResult<Value> {
        match numeric_pair(self, other) {
            Some(Numeric::Ints(_, 0)) => Err(RuntimeError::new(
                ErrorCode::OutOfRange,
                "modulo by zero",
            )),
            Some(Numeric::Ints(a, b)) => Ok(Value::Int(a.wrapping_rem(b))),
            Some(Numeric::Reals(a, b)) => Ok(Value::Real(a % b)),
            None => Err(binary_type_error("%", self, other)),
        }
    }

    pub fn neg(&self) -> RuntimeResult<Value> {
        match as_number(self) {
            Some(Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
            Some(Value::Real(v)) => Ok(Value::Real(-v)),
            _ => Err(unary_type_error("-", self)),
        }
    }

    pub fn plus(&self) -> RuntimeResult<Value> {
        match as_number(self) {
            Some(v) => Ok(v),
            None => Err(unary_type_error("+", self)),
        }
    }

    pub fn shl(&self, other: &Value) -> RuntimeResult<Value> {
        let (a, b) = int_pair(self, other, "<<")?;
        if b < 0 {
            return Err(RuntimeError::new(
                ErrorCode::InvalidArgs,
                "negative shift amount",
            ));
        }
        Ok(Value::Int(a.wrapping_shl(b as u32)))
    }

    pub fn shr(&self, other: &Value) -> RuntimeResult<Value> {
        let (a, b) = int_pair(self, other, ">>")?;
        if b < 0 {
            return Err(RuntimeError::new(
                ErrorCode::InvalidArgs,
                "negative shift amount",
            ));
        }
        Ok(Value::Int(a.wrapping_shr(b as u32)))
    }

    pub fn bit_and(&self, other: &Value) -> RuntimeResult<Value> {
        let (a, b) = int_pair(self, other, "&")?;
        Ok(Value::Int(a & b))
    }

    pub fn bit_or(&self, other: &Value) -> RuntimeResult<Value> {
        let (a, b) = int_pair(self, other, "|")?;
        Ok(Value::Int(a | b))
    }

    pub fn bit_xor(&self, other: &Value) -> RuntimeResult<Value> {
        let (a, b) = int_pair(self, other, "^")?;
        Ok(Value::Int(a ^ b))
    }

    pub fn bit_not(&self) -> RuntimeResult<Value> {
        match as_number(self) {
            Some(Value::Int(v)) => Ok(Value::Int(!v)),
            _ => Err(unary_type_error("~", self)),
        }
    }

    // ---- comparison ----

    pub fn equals(&self, other: &Value) -> RuntimeResult<bool> {
        if let Some(pair) = numeric_pair(self, other) {
            return Ok(match pair {
                Numeric::Ints(a, b) => a == b,
                Numeric::Reals(a, b) => a == b,
            });
        }
        match (self, other) {
            (Value::Nil, Value::Nil) => Ok(true),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::Tuple(a), Value::Tuple(b)) => {
                elementwise_equal(a.iter(), b.iter(), a.len(), b.len())
            }
            (Value::Array(a), Value::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                elementwise_equal(a.iter(), b.iter(), a.len(), b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, left) in a.iter() {
                    match b.get(key) {
                        Some(right) if left.equals(right)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Value::Path(a), Value::Path(b)) => a.equivalent(b),
            (Value::Function(a), Value::Function(b)) => Ok(Rc::ptr_eq(a, b)),
            (Value::Builtin(a), Value::Builtin(b)) => Ok(a == b),
            (Value::Class(a), Value::Class(b)) => Ok(Rc::ptr_eq(a, b)),
            (Value::Instance(a), Value::Instance(b)) => Ok(Rc::ptr_eq(a, b)),
            _ => Ok(false),
        }
    }

    pub fn less_than(&self, other: &Value) -> RuntimeResult<bool> {
        if let Some(pair) = numeric_pair(self, other) {
            return Ok(match pair {
                Numeric::Ints(a, b) => a < b,
                Numeric::Reals(a, b) => a < b,
            });
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a < b),
            (Value::Tuple(a), Value::Tuple(b)) => elementwise_less(a, b),
            (Value::Array(a), Value::Array(b)) => elementwise_less(&a.borrow(), &b.borrow()),
            _ => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                format!(
                    "cannot order {} and {}",
                    self.type_name(),
                    other.type_name()
                ),
            )),
        }
    }

    // ---- containers ----

    pub fn len(&self) -> RuntimeResult<i64> {
        match self {
            Value::Str(s) => Ok(s.chars().count() as i64),
            Value::Tuple(items) => Ok(items.len() as i64),
            Value::Array(items) => Ok(items.borrow().len() as i64),
            Value::Map(entries) => Ok(entries.borrow().len() as i64),
            _ => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                format!("{} has no length", self.type_name()),
            )),
        }
    }

    pub fn contains(&self, needle: &Value) -> RuntimeResult<bool> {
        match self {
            Value::Array(items) => {
                for item in items.borrow().iter() {
                    if item.equals(needle)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Tuple(items) => {
                for item in items.iter() {
                    if item.equals(needle)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Map(entries) => match needle {
                Value::Str(key) => Ok(entries.borrow().contains_key(key.as_str())),
                _ => Err(RuntimeError::new(
                    ErrorCode::IncompatibleType,
                    "map keys are strings",
                )),
            },
            Value::Str(s) => match needle {
                Value::Str(sub) => Ok(s.contains(sub.as_str())),
                _ => Err(RuntimeError::new(
                    ErrorCode::IncompatibleType,
                    "string containment expects a string",
                )),
            },
            _ => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                format!("{} is not a container", self.type_name()),
            )),
        }
    }

    pub fn get_item(&self, index: &Value) -> RuntimeResult<Value> {
        match (self, index) {
            (Value::Array(items), Value::Slice(slice)) => {
                let items = items.borrow();
                let picked = slice_pick(&items, slice)?;
                Ok(Value::array(picked))
            }
            (Value::Array(items), _) => {
                let items = items.borrow();
                let i = normalize_index(index, items.len())?;
                Ok(items[i].clone())
            }
            (Value::Tuple(items), Value::Slice(slice)) => {
                Ok(Value::tuple(slice_pick(items, slice)?))
            }
            (Value::Tuple(items), _) => {
                let i = normalize_index(index, items.len())?;
                Ok(items[i].clone())
            }
            (Value::Str(s), Value::Slice(slice)) => {
                let chars: Vec<Value> = s.chars().map(|c| Value::string(c.to_string())).collect();
                let picked = slice_pick(&chars, slice)?;
                let mut out = String::new();
                for c in picked {
                    if let Value::Str(part) = c {
                        out.push_str(&part);
                    }
                }
                Ok(Value::string(out))
            }
            (Value::Str(s), _) => {
                let chars: Vec<char> = s.chars().collect();
                let i = normalize_index(index, chars.len())?;
                Ok(Value::string(chars[i].to_string()))
            }
            (Value::Map(entries), Value::Str(key)) => {
                entries.borrow().get(key.as_str()).cloned().ok_or_else(|| {
                    RuntimeError::new(ErrorCode::OutOfRange, format!("key '{key}' not found"))
                })
            }
            (Value::Map(_), _) => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                "map keys are strings",
            )),
            _ => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                format!("{} does not support indexing", self.type_name()),
            )),
        }
    }

    pub fn set_item(&self, index: &Value, value: Value) -> RuntimeResult<()> {
        match (self, index) {
            (Value::Array(items), _) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let i = normalize_index(index, len)?;
                items[i] = value;
                Ok(())
            }
            (Value::Map(entries), Value::Str(key)) => {
                entries.borrow_mut().insert(key.as_ref().clone(), value);
                Ok(())
            }
            (Value::Map(_), _) => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                "map keys are strings",
            )),
            (Value::Tuple(_), _) | (Value::Str(_), _) => Err(RuntimeError::new(
                ErrorCode::Assign,
                format!("{} does not support item assignment", self.type_name()),
            )),
            _ => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                format!("{} does not support indexing", self.type_name()),
            )),
        }
    }

    // ---- iteration ----

    pub fn iter(&self) -> RuntimeResult<Value> {
        let iter = match self {
            Value::Array(items) => IterValue::Array {
                items: items.clone(),
                index: 0,
            },
            Value::Tuple(items) => IterValue::Tuple {
                items: items.clone(),
                index: 0,
            },
            Value::Map(entries) => IterValue::Map {
                entries: entries
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
                index: 0,
            },
            Value::Str(s) => IterValue::Str {
                chars: s.chars().collect(),
                index: 0,
            },
            _ => {
                return Err(RuntimeError::new(
                    ErrorCode::IncompatibleType,
                    format!("{} is not iterable", self.type_name()),
                ))
            }
        };
        Ok(Value::Iter(Rc::new(RefCell::new(iter))))
    }

    // ---- conversions ----

    /// Rendering used for nested container elements: strings and map
    /// keys come out quoted.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{s}\""),
            _ => self.to_string(),
        }
    }

    /// String form used when a value is spliced into a command argument.
    pub fn to_cmd_arg(&self) -> RuntimeResult<String> {
        match self {
            Value::Int(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Real(v) => Ok(v.to_string()),
            Value::Str(s) => Ok(s.as_ref().clone()),
            Value::Path(path) => Ok(path.to_string()),
            Value::Array(items) => {
                let words: RuntimeResult<Vec<String>> =
                    items.borrow().iter().map(|item| item.to_cmd_arg()).collect();
                Ok(words?.join(" "))
            }
            Value::Tuple(items) => {
                let words: RuntimeResult<Vec<String>> =
                    items.iter().map(|item| item.to_cmd_arg()).collect();
                Ok(words?.join(" "))
            }
            _ => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                format!("cannot use {} as a command argument", self.type_name()),
            )),
        }
    }

    // ---- attributes ----

    pub fn get_attr(&self, name: &str) -> RuntimeResult<Value> {
        match self {
            Value::Instance(instance) => {
                if let Some(value) = instance.attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                if let Some(method) = instance.class.find_method(name) {
                    return Ok(Value::Method(Rc::new(BoundMethod {
                        receiver: self.clone(),
                        function: method,
                    })));
                }
                Err(RuntimeError::new(
                    ErrorCode::UndefinedSymbol,
                    format!(
                        "undefined attribute '{name}' for instance of '{}'",
                        instance.class.name
                    ),
                ))
            }
            Value::Module(module) => module.exports.get(name).cloned().ok_or_else(|| {
                RuntimeError::new(
                    ErrorCode::UndefinedSymbol,
                    format!("module '{}' has no symbol '{name}'", module.name),
                )
            }),
            Value::Class(class) => class.find_method(name).map(Value::Function).ok_or_else(|| {
                RuntimeError::new(
                    ErrorCode::UndefinedSymbol,
                    format!("class '{}' has no method '{name}'", class.name),
                )
            }),
            _ => Err(RuntimeError::new(
                ErrorCode::IncompatibleType,
                format!("{} has no attributes", self.type_name()),
            )),
        }
    }

    pub fn set_attr(&self, name: &str, value: Value) -> RuntimeResult<()> {
        match self {
            Value::Instance(instance) => {
                instance.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(RuntimeError::new(
                ErrorCode::Assign,
                format!("cannot set attribute on {}", self.type_name()),
            )),
        }
    }
}

fn elementwise_equal<'a>(
    left: impl Iterator<Item = &'a Value>,
    right: impl Iterator<Item = &'a Value>,
    left_len: usize,
    right_len: usize,
) -> RuntimeResult<bool> {
    if left_len != right_len {
        return Ok(false);
    }
    for (a, b) in left.zip(right) {
        if !a.equals(b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn elementwise_less(left: &[Value], right: &[Value]) -> RuntimeResult<bool> {
    for (a, b) in left.iter().zip(right.iter()) {
        if a.less_than(b)? {
            return Ok(true);
        }
        if !a.equals(b)? {
            return Ok(false);
        }
    }
    Ok(left.len() < right.len())
}

/// Integer index with negative values counting from the end.
fn normalize_index(index: &Value, len: usize) -> RuntimeResult<usize> {
    let Value::Int(raw) = index else {
        return Err(RuntimeError::new(
            ErrorCode::IncompatibleType,
            format!("index must be an integer, got {}", index.type_name()),
        ));
    };
    let len = len as i64;
    let adjusted = if *raw < 0 { raw + len } else { *raw };
    if adjusted < 0 || adjusted >= len {
        return Err(RuntimeError::new(
            ErrorCode::OutOfRange,
            format!("index {raw} out of bounds for length {len}"),
        ));
    }
    Ok(adjusted as usize)
}

/// Slice element selection with optional bounds and step, negative
/// values counting from the end.
fn slice_pick(items: &[Value], slice: &SliceValue) -> RuntimeResult<Vec<Value>> {
    let len = items.len() as i64;
    let step = slice.step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::new(
            ErrorCode::InvalidArgs,
            "slice step cannot be zero",
        ));
    }

    let adjust = |bound: i64| if bound < 0 { bound + len } else { bound };

    let mut picked = Vec::new();
    if step > 0 {
        let start = adjust(slice.start.unwrap_or(0)).clamp(0, len);
        let end = adjust(slice.end.unwrap_or(len)).clamp(0, len);
        let mut i = start;
        while i < end {
            picked.push(items[i as usize].clone());
            i += step;
        }
    } else {
        let start = adjust(slice.start.unwrap_or(len - 1)).clamp(-1, len - 1);
        let end = match slice.end {
            Some(bound) => adjust(bound).clamp(-1, len - 1),
            None => -1,
        };
        let mut i = start;
        while i > end {
            picked.push(items[i as usize].clone());
            i += step;
        }
    }
    Ok(picked)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{key}\": {}", value.repr())?;
                }
                write!(f, "}}")
            }
            Value::Slice(_) => write!(f, "<slice>"),
            Value::Function(function) => write!(f, "<func {}>", function.display_name()),
            Value::Builtin(builtin) => write!(f, "<built-in func {}>", builtin.name()),
            Value::Method(method) => {
                write!(f, "<bound method {}>", method.function.display_name())
            }
            Value::Class(class) => write!(f, "<class '{}'>", class.name),
            Value::Interface(interface) => write!(f, "<interface '{}'>", interface.name),
            Value::Instance(instance) => write!(f, "<{} instance>", instance.class.name),
            Value::Iter(_) => write!(f, "<iterator>"),
            Value::Path(path) => write!(f, "{path}"),
            Value::Module(module) => write!(f, "<module '{}'>", module.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({}: {})", self.type_name(), self)
    }
}
