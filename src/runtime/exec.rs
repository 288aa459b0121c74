//! Tree-walking evaluator.
//!
//! Statements produce a `ControlSignal`; blocks short-circuit on
//! anything other than `Normal`. Expressions produce a `Value`. Errors
//! pick up the offending node's position at the point of failure and
//! keep it while bubbling out.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::fs;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{
    AssignTarget, BinaryOp, Block, ClassDecl, CmdPiece, Expr, ExprKind, InterfaceDecl, LogicalOp,
    Program, Stmt, StmtKind, UnaryOp,
};
use crate::lexer;
use crate::parser::{self, ParseError};
use crate::runtime::builtins;
use crate::runtime::error::{ErrorCode, RuntimeError, RuntimeResult};
use crate::runtime::path;
use crate::runtime::scope::{ScopeStack, SymbolEntry};
use crate::runtime::value::{
    ClassValue, FunctionValue, InstanceValue, InterfaceValue, IterValue, ModuleValue, SliceValue,
    Value,
};
use crate::token::Position;

/// Per-statement control-flow marker.
pub enum ControlSignal {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Where `print` output lands; tests capture it through a buffer.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Buffer(Rc<RefCell<String>>),
}

impl OutputSink {
    pub fn buffer() -> Self {
        OutputSink::Buffer(Rc::new(RefCell::new(String::new())))
    }

    pub fn line(&self, text: &str) {
        match self {
            OutputSink::Stdout => println!("{text}"),
            OutputSink::Buffer(buffer) => {
                let mut buffer = buffer.borrow_mut();
                let _ = writeln!(buffer, "{text}");
            }
        }
    }

    pub fn captured(&self) -> Option<String> {
        match self {
            OutputSink::Stdout => None,
            OutputSink::Buffer(buffer) => Some(buffer.borrow().clone()),
        }
    }
}

pub struct Executor {
    sink: OutputSink,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            sink: OutputSink::Stdout,
        }
    }

    pub fn with_sink(sink: OutputSink) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn exec_program(
        &mut self,
        program: &Program,
        stack: &mut ScopeStack,
    ) -> RuntimeResult<()> {
        for stmt in &program.stmts {
            match self.exec_stmt(stmt, stack)? {
                ControlSignal::Normal => {}
                ControlSignal::Break => {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::InvalidArgs,
                        "'break' outside of a loop",
                        stmt.pos,
                    ))
                }
                ControlSignal::Continue => {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::InvalidArgs,
                        "'continue' outside of a loop",
                        stmt.pos,
                    ))
                }
                ControlSignal::Return(_) => {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::InvalidArgs,
                        "'return' outside of a function",
                        stmt.pos,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Blocks open a fresh frame; names declared inside never leak out.
    fn exec_block(&mut self, block: &Block, stack: &mut ScopeStack) -> RuntimeResult<ControlSignal> {
        stack.push_frame();
        let result = self.exec_stmts(&block.stmts, stack);
        stack.pop_frame();
        result
    }

    fn exec_stmts(&mut self, stmts: &[Stmt], stack: &mut ScopeStack) -> RuntimeResult<ControlSignal> {
        for stmt in stmts {
            match self.exec_stmt(stmt, stack)? {
                ControlSignal::Normal => {}
                signal => return Ok(signal),
            }
        }
        Ok(ControlSignal::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, stack: &mut ScopeStack) -> RuntimeResult<ControlSignal> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval_expr(expr, stack)?;
                Ok(ControlSignal::Normal)
            }
            StmtKind::Let { targets, value } => {
                let value = self.eval_expr(value, stack)?;
                self.destructure(targets, value, true, stack, stmt.pos)?;
                Ok(ControlSignal::Normal)
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value, stack)?;
                self.destructure(targets, value, false, stack, stmt.pos)?;
                Ok(ControlSignal::Normal)
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval_expr(cond, stack)?.truthy() {
                    self.exec_block(then_block, stack)
                } else if let Some(else_block) = else_block {
                    self.exec_block(else_block, stack)
                } else {
                    Ok(ControlSignal::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval_expr(cond, stack)?.truthy() {
                    match self.exec_block(body, stack)? {
                        ControlSignal::Normal | ControlSignal::Continue => {}
                        ControlSignal::Break => break,
                        signal @ ControlSignal::Return(_) => return Ok(signal),
                    }
                }
                Ok(ControlSignal::Normal)
            }
            StmtKind::For {
                names,
                rest,
                iterable,
                body,
            } => self.exec_for(names, rest, iterable, body, stack, stmt.pos),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, stack)?,
                    None => Value::Nil,
                };
                Ok(ControlSignal::Return(value))
            }
            StmtKind::Break => Ok(ControlSignal::Break),
            StmtKind::Continue => Ok(ControlSignal::Continue),
            StmtKind::FuncDecl(decl) => {
                let name = decl.name.clone().expect("declared functions are named");
                let function = FunctionValue {
                    name: Some(name.clone()),
                    params: decl.params.clone(),
                    body: decl.body.clone(),
                    captured: stack.snapshot(),
                    is_command: false,
                };
                stack.insert(name, Value::Function(Rc::new(function)));
                Ok(ControlSignal::Normal)
            }
            StmtKind::ClassDecl(decl) => {
                self.declare_class(decl, stack)?;
                Ok(ControlSignal::Normal)
            }
            StmtKind::InterfaceDecl(decl) => {
                self.declare_interface(decl, stack);
                Ok(ControlSignal::Normal)
            }
            StmtKind::CmdDecl { name, body } => {
                let command = FunctionValue {
                    name: Some(name.clone()),
                    params: Vec::new(),
                    body: body.clone(),
                    captured: stack.snapshot(),
                    is_command: true,
                };
                stack.insert(name.as_str(), Value::Function(Rc::new(command)));
                Ok(ControlSignal::Normal)
            }
            StmtKind::CmdCall { name, pieces } => {
                self.run_command(name, pieces, stack, stmt.pos)?;
                Ok(ControlSignal::Normal)
            }
            StmtKind::Import { path, alias } => {
                self.import_module(path, alias, stack, stmt.pos)?;
                Ok(ControlSignal::Normal)
            }
        }
    }

    fn exec_for(
        &mut self,
        names: &[String],
        rest: &Option<String>,
        iterable: &Expr,
        body: &Block,
        stack: &mut ScopeStack,
        pos: Position,
    ) -> RuntimeResult<ControlSignal> {
        let iterable = self.eval_expr(iterable, stack)?;
        let iter = iterable.iter().map_err(|error| error.at(pos))?;
        let Value::Iter(iter) = iter else {
            unreachable!("iter() returns an iterator value");
        };

        stack.push_frame();
        let result = self.run_for(&iter, names, rest, body, stack, pos);
        stack.pop_frame();
        result
    }

    fn run_for(
        &mut self,
        iter: &Rc<RefCell<IterValue>>,
        names: &[String],
        rest: &Option<String>,
        body: &Block,
        stack: &mut ScopeStack,
        pos: Position,
    ) -> RuntimeResult<ControlSignal> {
        loop {
            let item = {
                let mut iter = iter.borrow_mut();
                if !iter.has_next() {
                    break;
                }
                iter.next().expect("has_next checked above")
            };
            self.bind_loop_vars(names, rest, item, stack, pos)?;
            match self.exec_block(body, stack)? {
                ControlSignal::Normal | ControlSignal::Continue => {}
                ControlSignal::Break => break,
                signal @ ControlSignal::Return(_) => return Ok(signal),
            }
        }
        Ok(ControlSignal::Normal)
    }

    fn bind_loop_vars(
        &mut self,
        names: &[String],
        rest: &Option<String>,
        item: Value,
        stack: &ScopeStack,
        pos: Position,
    ) -> RuntimeResult<()> {
        if names.len() == 1 && rest.is_none() {
            stack.insert(names[0].as_str(), item);
            return Ok(());
        }
        let items = destructure_items(&item, pos)?;
        check_destructure_arity(names.len(), rest.is_some(), items.len(), pos)?;
        for (name, value) in names.iter().zip(items.iter()) {
            stack.insert(name.as_str(), value.clone());
        }
        if let Some(rest) = rest {
            stack.insert(rest.as_str(), Value::array(items[names.len()..].to_vec()));
        }
        Ok(())
    }

    fn destructure(
        &mut self,
        targets: &[AssignTarget],
        value: Value,
        declare: bool,
        stack: &mut ScopeStack,
        pos: Position,
    ) -> RuntimeResult<()> {
        if targets.len() == 1 && !matches!(targets[0], AssignTarget::Rest(_)) {
            return self.assign_target(&targets[0], value, declare, stack, pos);
        }
        let items = destructure_items(&value, pos)?;
        let has_rest = matches!(targets.last(), Some(AssignTarget::Rest(_)));
        let required = targets.len() - usize::from(has_rest);
        check_destructure_arity(required, has_rest, items.len(), pos)?;
        for (target, item) in targets[..required].iter().zip(items.iter()) {
            self.assign_target(target, item.clone(), declare, stack, pos)?;
        }
        if has_rest {
            let Some(AssignTarget::Rest(name)) = targets.last() else {
                unreachable!("has_rest checked above");
            };
            let remainder = Value::array(items[required..].to_vec());
            if declare {
                stack.insert(name.as_str(), remainder);
            } else {
                stack.assign(name, remainder).map_err(|error| error.at(pos))?;
            }
        }
        Ok(())
    }

    fn assign_target(
        &mut self,
        target: &AssignTarget,
        value: Value,
        declare: bool,
        stack: &mut ScopeStack,
        pos: Position,
    ) -> RuntimeResult<()> {
        match target {
            AssignTarget::Name(name) => {
                if declare {
                    stack.insert(name.as_str(), value);
                    Ok(())
                } else {
                    stack.assign(name, value).map_err(|error| error.at(pos))
                }
            }
            AssignTarget::Index { object, index } => {
                if declare {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::Assign,
                        "'let' target must be a name",
                        pos,
                    ));
                }
                let object_value = self.eval_expr(object, stack)?;
                let index_value = self.eval_expr(index, stack)?;
                object_value
                    .set_item(&index_value, value)
                    .map_err(|error| error.at(object.pos))
            }
            AssignTarget::Attr { object, name } => {
                if declare {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::Assign,
                        "'let' target must be a name",
                        pos,
                    ));
                }
                let object_value = self.eval_expr(object, stack)?;
                object_value
                    .set_attr(name, value)
                    .map_err(|error| error.at(object.pos))
            }
            AssignTarget::Rest(_) => Err(RuntimeError::with_pos(
                ErrorCode::Assign,
                "'...' target cannot stand alone",
                pos,
            )),
        }
    }

    // ---- expressions ----

    pub fn eval_expr(&mut self, expr: &Expr, stack: &mut ScopeStack) -> RuntimeResult<Value> {
        match &expr.kind {
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::Int(value) => Ok(Value::Int(*value)),
            ExprKind::Real(value) => Ok(Value::Real(*value)),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::Str(value) => Ok(Value::string(value.clone())),
            ExprKind::Ident(name) => stack.lookup(name).ok_or_else(|| {
                RuntimeError::with_pos(
                    ErrorCode::UndefinedSymbol,
                    format!("undefined symbol '{name}'"),
                    expr.pos,
                )
            }),
            ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand, stack)?;
                let result = match op {
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Pos => value.plus(),
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::BitNot => value.bit_not(),
                };
                result.map_err(|error| error.at(expr.pos))
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval_expr(left, stack)?;
                let right = self.eval_expr(right, stack)?;
                apply_binary(*op, &left, &right).map_err(|error| error.at(expr.pos))
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval_expr(left, stack)?.truthy();
                let result = match op {
                    LogicalOp::And => left && self.eval_expr(right, stack)?.truthy(),
                    LogicalOp::Or => left || self.eval_expr(right, stack)?.truthy(),
                };
                Ok(Value::Bool(result))
            }
            ExprKind::Call { callee, args } => {
                // Method calls stay one dispatch so bound receivers and
                // path methods resolve in a single place.
                if let ExprKind::Attr { object, name } = &callee.kind {
                    let receiver = self.eval_expr(object, stack)?;
                    let args = self.eval_args(args, stack)?;
                    return self.call_attr(receiver, name, args, expr.pos);
                }
                let callee_value = self.eval_expr(callee, stack)?;
                let args = self.eval_args(args, stack)?;
                self.call_value(callee_value, args, expr.pos)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval_expr(object, stack)?;
                let index = self.eval_expr(index, stack)?;
                object.get_item(&index).map_err(|error| error.at(expr.pos))
            }
            ExprKind::Slice {
                object,
                start,
                end,
                step,
            } => {
                let object = self.eval_expr(object, stack)?;
                let slice = SliceValue {
                    start: self.eval_slice_bound(start, stack)?,
                    end: self.eval_slice_bound(end, stack)?,
                    step: self.eval_slice_bound(step, stack)?,
                };
                object
                    .get_item(&Value::Slice(Rc::new(slice)))
                    .map_err(|error| error.at(expr.pos))
            }
            ExprKind::Attr { object, name } => {
                let object = self.eval_expr(object, stack)?;
                object.get_attr(name).map_err(|error| error.at(expr.pos))
            }
            ExprKind::Tuple(elems) => Ok(Value::tuple(self.eval_args(elems, stack)?)),
            ExprKind::Array(elems) => Ok(Value::array(self.eval_args(elems, stack)?)),
            ExprKind::Map(entries) => {
                let mut map = IndexMap::new();
                for (key, value) in entries {
                    let key_value = self.eval_expr(key, stack)?;
                    let Value::Str(key_text) = key_value else {
                        return Err(RuntimeError::with_pos(
                            ErrorCode::IncompatibleType,
                            format!("map keys must be strings, got {}", key_value.type_name()),
                            key.pos,
                        ));
                    };
                    map.insert(key_text.as_ref().clone(), self.eval_expr(value, stack)?);
                }
                Ok(Value::Map(Rc::new(RefCell::new(map))))
            }
            ExprKind::Function(decl) => {
                let function = FunctionValue {
                    name: None,
                    params: decl.params.clone(),
                    body: decl.body.clone(),
                    captured: stack.snapshot(),
                    is_command: false,
                };
                Ok(Value::Function(Rc::new(function)))
            }
        }
    }

    fn eval_args(&mut self, exprs: &[Expr], stack: &mut ScopeStack) -> RuntimeResult<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval_expr(expr, stack)?);
        }
        Ok(values)
    }

    fn eval_slice_bound(
        &mut self,
        bound: &Option<Box<Expr>>,
        stack: &mut ScopeStack,
    ) -> RuntimeResult<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval_expr(expr, stack)? {
            Value::Int(value) => Ok(Some(value)),
            other => Err(RuntimeError::with_pos(
                ErrorCode::IncompatibleType,
                format!("slice bounds must be integers, got {}", other.type_name()),
                expr.pos,
            )),
        }
    }

    // ---- calls ----

    fn call_attr(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        pos: Position,
    ) -> RuntimeResult<Value> {
        if let Value::Path(path) = &receiver {
            return path::call_method(path, name, &args).map_err(|error| error.at(pos));
        }
        let target = receiver.get_attr(name).map_err(|error| error.at(pos))?;
        self.call_value(target, args, pos)
    }

    pub fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        pos: Position,
    ) -> RuntimeResult<Value> {
        match callee {
            Value::Function(function) => {
                if function.is_command {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::IncompatibleType,
                        format!(
                            "'{}' is a command, invoke it without parentheses",
                            function.name.as_deref().unwrap_or("<anonymous>")
                        ),
                        pos,
                    ));
                }
                self.call_function(&function, args).map_err(|error| error.at(pos))
            }
            Value::Method(method) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(method.receiver.clone());
                full.extend(args);
                self.call_function(&method.function, full)
                    .map_err(|error| error.at(pos))
            }
            Value::Builtin(builtin) => {
                builtins::call(builtin, args, &self.sink).map_err(|error| error.at(pos))
            }
            Value::Class(class) => self.instantiate(&class, args, pos),
            other => Err(RuntimeError::with_pos(
                ErrorCode::IncompatibleType,
                format!("{} is not callable", other.type_name()),
                pos,
            )),
        }
    }

    /// Binds parameters left to right: positional arguments first, then
    /// defaults evaluated in the new frame, with surplus positionals
    /// collected into the trailing variadic parameter as a tuple.
    fn call_function(&mut self, func: &Rc<FunctionValue>, args: Vec<Value>) -> RuntimeResult<Value> {
        let name = func.name.clone().unwrap_or_else(|| "<anonymous>".to_string());
        let variadic = func.is_variadic();
        let fixed = func.params.len() - usize::from(variadic);
        if !variadic && args.len() > fixed {
            return Err(RuntimeError::new(
                ErrorCode::FuncParams,
                format!(
                    "function '{name}' takes {fixed} arguments, got {}",
                    args.len()
                ),
            ));
        }

        let mut local = func.captured.snapshot();
        local.push_frame();
        let mut supplied = args.into_iter();
        for param in &func.params[..fixed] {
            if let Some(value) = supplied.next() {
                local.insert(param.name.as_str(), value);
            } else if let Some(default) = &param.default {
                let value = self.eval_expr(default, &mut local)?;
                local.insert(param.name.as_str(), value);
            } else {
                return Err(RuntimeError::new(
                    ErrorCode::FuncParams,
                    format!("missing argument '{}' for function '{name}'", param.name),
                ));
            }
        }
        if variadic {
            let rest: Vec<Value> = supplied.collect();
            let param = func.params.last().expect("variadic parameter exists");
            local.insert(param.name.as_str(), Value::tuple(rest));
        }

        match self.exec_block(&func.body, &mut local)? {
            ControlSignal::Return(value) => Ok(value),
            ControlSignal::Normal => Ok(Value::Nil),
            ControlSignal::Break => Err(RuntimeError::with_pos(
                ErrorCode::InvalidArgs,
                "'break' outside of a loop",
                func.body.pos,
            )),
            ControlSignal::Continue => Err(RuntimeError::with_pos(
                ErrorCode::InvalidArgs,
                "'continue' outside of a loop",
                func.body.pos,
            )),
        }
    }

    /// Allocates an instance and runs the `init` constructor when the
    /// class declares one.
    fn instantiate(
        &mut self,
        class: &Rc<ClassValue>,
        args: Vec<Value>,
        pos: Position,
    ) -> RuntimeResult<Value> {
        let instance = Value::Instance(Rc::new(InstanceValue {
            class: class.clone(),
            attrs: RefCell::new(IndexMap::new()),
        }));
        if let Some(init) = class.find_method("init") {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(instance.clone());
            full.extend(args);
            self.call_function(&init, full).map_err(|error| error.at(pos))?;
        } else if !args.is_empty() {
            return Err(RuntimeError::with_pos(
                ErrorCode::FuncParams,
                format!(
                    "class '{}' has no 'init' constructor, got {} arguments",
                    class.name,
                    args.len()
                ),
                pos,
            ));
        }
        Ok(instance)
    }

    // ---- declarations ----

    /// The parent and interface links resolve at declaration time.
    fn declare_class(&mut self, decl: &Rc<ClassDecl>, stack: &mut ScopeStack) -> RuntimeResult<()> {
        let parent = match &decl.parent {
            Some(parent_name) => {
                let value = stack.lookup(parent_name).ok_or_else(|| {
                    RuntimeError::with_pos(
                        ErrorCode::UndefinedSymbol,
                        format!("undefined symbol '{parent_name}'"),
                        decl.pos,
                    )
                })?;
                let Value::Class(parent) = value else {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::IncompatibleType,
                        format!("'{parent_name}' is not a class"),
                        decl.pos,
                    ));
                };
                if parent.is_final {
                    return Err(RuntimeError::with_pos(
                        ErrorCode::InvalidArgs,
                        format!("cannot inherit from final class '{parent_name}'"),
                        decl.pos,
                    ));
                }
                Some(parent)
            }
            None => None,
        };

        let mut interfaces = Vec::with_capacity(decl.interfaces.len());
        for interface_name in &decl.interfaces {
            let value = stack.lookup(interface_name).ok_or_else(|| {
                RuntimeError::with_pos(
                    ErrorCode::UndefinedSymbol,
                    format!("undefined symbol '{interface_name}'"),
                    decl.pos,
                )
            })?;
            let Value::Interface(interface) = value else {
                return Err(RuntimeError::with_pos(
                    ErrorCode::IncompatibleType,
                    format!("'{interface_name}' is not an interface"),
                    decl.pos,
                ));
            };
            interfaces.push(interface);
        }

        let methods = self.method_table(&decl.methods, stack);
        let class = ClassValue {
            name: decl.name.clone(),
            parent,
            interfaces,
            methods,
            is_final: decl.is_final,
        };
        stack.insert(decl.name.as_str(), Value::Class(Rc::new(class)));
        Ok(())
    }

    fn declare_interface(&mut self, decl: &Rc<InterfaceDecl>, stack: &mut ScopeStack) {
        let interface = InterfaceValue {
            name: decl.name.clone(),
            methods: self.method_table(&decl.methods, stack),
        };
        stack.insert(decl.name.as_str(), Value::Interface(Rc::new(interface)));
    }

    fn method_table(
        &mut self,
        decls: &[Rc<crate::ast::FunctionDecl>],
        stack: &ScopeStack,
    ) -> IndexMap<String, Rc<FunctionValue>> {
        let mut methods = IndexMap::new();
        for decl in decls {
            let name = decl.name.clone().expect("methods are named");
            let method = FunctionValue {
                name: Some(name.clone()),
                params: decl.params.clone(),
                body: decl.body.clone(),
                captured: stack.snapshot(),
                is_command: false,
            };
            methods.insert(name, Rc::new(method));
        }
        methods
    }

    // ---- commands ----

    /// Runs a declared command with `args` bound to the array of WORD
    /// strings built from the invocation's pieces.
    fn run_command(
        &mut self,
        name: &str,
        pieces: &[CmdPiece],
        stack: &mut ScopeStack,
        pos: Position,
    ) -> RuntimeResult<()> {
        let mut words = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let word = match piece {
                CmdPiece::Word(word) => word.clone(),
                CmdPiece::Var { name, pos } => {
                    let value = stack.lookup(name).ok_or_else(|| {
                        RuntimeError::with_pos(
                            ErrorCode::UndefinedSymbol,
                            format!("undefined symbol '{name}'"),
                            *pos,
                        )
                    })?;
                    value.to_cmd_arg().map_err(|error| error.at(*pos))?
                }
                CmdPiece::Expr(expr) => {
                    let value = self.eval_expr(expr, stack)?;
                    value.to_cmd_arg().map_err(|error| error.at(expr.pos))?
                }
            };
            words.push(Value::string(word));
        }

        let Some(Value::Function(command)) = stack.lookup(name) else {
            return Err(RuntimeError::with_pos(
                ErrorCode::UndefinedSymbol,
                format!("undefined command '{name}'"),
                pos,
            ));
        };
        if !command.is_command {
            return Err(RuntimeError::with_pos(
                ErrorCode::IncompatibleType,
                format!("'{name}' is not a command"),
                pos,
            ));
        }

        let mut local = command.captured.snapshot();
        local.push_frame();
        local.insert("args", Value::array(words));
        match self.exec_block(&command.body, &mut local)? {
            ControlSignal::Normal | ControlSignal::Return(_) => Ok(()),
            ControlSignal::Break | ControlSignal::Continue => Err(RuntimeError::with_pos(
                ErrorCode::InvalidArgs,
                "loop control outside of a loop",
                pos,
            )),
        }
    }

    // ---- modules ----

    /// Executes the named file in a fresh global scope and binds its
    /// public globals as a module value.
    fn import_module(
        &mut self,
        module_path: &str,
        alias: &str,
        stack: &mut ScopeStack,
        pos: Position,
    ) -> RuntimeResult<()> {
        let source = fs::read_to_string(module_path).map_err(|error| {
            RuntimeError::with_pos(
                ErrorCode::File,
                format!("cannot read module '{module_path}': {error}"),
                pos,
            )
        })?;
        let (tokens, messages) = lexer::tokenize(&source);
        if messages.error_count() > 0 {
            return Err(RuntimeError::with_pos(
                ErrorCode::Import,
                format!("module '{module_path}' has syntax errors"),
                pos,
            )
            .with_messages(messages.into_vec()));
        }
        let program = parser::parse(tokens).map_err(|error| match error {
            ParseError::NeedMoreInput => RuntimeError::with_pos(
                ErrorCode::Import,
                format!("module '{module_path}': unexpected end of input"),
                pos,
            ),
            ParseError::Syntax { message, pos: module_pos } => RuntimeError::with_pos(
                ErrorCode::Import,
                format!("module '{module_path}': {message}"),
                module_pos,
            ),
        })?;

        let mut module_stack = ScopeStack::new();
        builtins::register_prelude(&module_stack);
        self.exec_program(&program, &mut module_stack)?;

        let mut exports = IndexMap::new();
        for (name, entry) in module_stack.globals().entries() {
            if !entry.is_const && SymbolEntry::is_public(&name) {
                exports.insert(name, entry.value);
            }
        }
        stack.insert(
            alias,
            Value::Module(Rc::new(ModuleValue {
                name: alias.to_string(),
                exports,
            })),
        );
        Ok(())
    }
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    match op {
        BinaryOp::Add => left.add(right),
        BinaryOp::Sub => left.sub(right),
        BinaryOp::Mul => left.mul(right),
        BinaryOp::Div => left.div(right),
        BinaryOp::Mod => left.rem(right),
        BinaryOp::Shl => left.shl(right),
        BinaryOp::Shr => left.shr(right),
        BinaryOp::BitAnd => left.bit_and(right),
        BinaryOp::BitOr => left.bit_or(right),
        BinaryOp::BitXor => left.bit_xor(right),
        BinaryOp::Equal => Ok(Value::Bool(left.equals(right)?)),
        BinaryOp::NotEqual => Ok(Value::Bool(!left.equals(right)?)),
        BinaryOp::Less => Ok(Value::Bool(left.less_than(right)?)),
        BinaryOp::LessEq => Ok(Value::Bool(!right.less_than(left)?)),
        BinaryOp::Greater => Ok(Value::Bool(right.less_than(left)?)),
        BinaryOp::GreaterEq => Ok(Value::Bool(!left.less_than(right)?)),
    }
}

fn destructure_items(value: &Value, pos: Position) -> RuntimeResult<Vec<Value>> {
    match value {
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Array(items) => Ok(items.borrow().clone()),
        other => Err(RuntimeError::with_pos(
            ErrorCode::IncompatibleType,
            format!("cannot destructure {}", other.type_name()),
            pos,
        )),
    }
}

fn check_destructure_arity(
    required: usize,
    has_rest: bool,
    found: usize,
    pos: Position,
) -> RuntimeResult<()> {
    let matches = if has_rest {
        found >= required
    } else {
        found == required
    };
    if matches {
        return Ok(());
    }
    let expected = if has_rest {
        format!("at least {required}")
    } else {
        format!("{required}")
    };
    Err(RuntimeError::with_pos(
        ErrorCode::InvalidArgs,
        format!("destructuring expected {expected} values, got {found}"),
        pos,
    ))
}
