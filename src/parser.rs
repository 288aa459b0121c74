//! Recursive-descent parser.
//!
//! One-token lookahead, with a second token of lookahead only to tell
//! `func` declarations from anonymous function expressions, to spot
//! command calls and `<:` interface clauses, and inside `for` target
//! lists. Reaching end-of-input in the middle of a construct yields
//! `ParseError::NeedMoreInput` so the interactive driver can ask for a
//! continuation line and re-parse.

use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    AssignTarget, BinaryOp, Block, ClassDecl, CmdPiece, Expr, ExprKind, FunctionDecl,
    InterfaceDecl, LogicalOp, Param, Program, Stmt, StmtKind, UnaryOp,
};
use crate::token::{Position, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The token stream is a syntactically incomplete prefix.
    #[error("unexpected end of input")]
    NeedMoreInput,
    #[error("{}: {}: {message}", .pos.line, .pos.col)]
    Syntax { message: String, pos: Position },
}

pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

/// Elements of an assignment target list before conversion.
enum TargetElem {
    Expr(Expr),
    Rest(String, Position),
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eos)) {
            tokens.push(Token::new(TokenKind::Eos, Position::default()));
        }
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut stmts = Vec::new();
        self.skip_terminators();
        while !self.check(&TokenKind::Eos) {
            let stmt = self.parse_stmt()?;
            let block_terminated = ends_with_block(&stmt.kind);
            stmts.push(stmt);
            if !block_terminated {
                self.expect_terminator()?;
            }
            self.skip_terminators();
        }
        Ok(Program { stmts })
    }

    // ---- statements ----

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        match self.kind() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::new(StmtKind::Break, pos))
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::new(StmtKind::Continue, pos))
            }
            TokenKind::Func if matches!(self.peek_kind(), TokenKind::Ident(_)) => {
                let decl = self.parse_function_decl()?;
                Ok(Stmt::new(StmtKind::FuncDecl(decl), pos))
            }
            TokenKind::Final => {
                self.advance();
                if !self.check(&TokenKind::Class) {
                    return Err(self.error("'class' after 'final'"));
                }
                self.parse_class(true, pos)
            }
            TokenKind::Class => self.parse_class(false, pos),
            TokenKind::Interface => self.parse_interface(),
            TokenKind::Cmd => self.parse_cmd_decl(),
            TokenKind::Let => self.parse_let(),
            TokenKind::Import => self.parse_import(),
            TokenKind::Ident(_) if is_command_arg_start(self.peek_kind()) => {
                self.parse_cmd_call()
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // if
        let cond = self.parse_expression()?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let nested_pos = self.here();
                let nested = self.parse_if()?;
                Some(Block {
                    stmts: vec![nested],
                    pos: nested_pos,
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then_block,
                else_block,
            },
            pos,
        ))
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // while
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::While { cond, body }, pos))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // for
        let mut names = vec![self.expect_ident("loop variable")?.0];
        let mut rest = None;
        while self.eat(&TokenKind::Comma) {
            if self.eat(&TokenKind::Ellipsis) {
                rest = Some(self.expect_ident("name after '...'")?.0);
                break;
            }
            names.push(self.expect_ident("loop variable")?.0);
        }
        self.expect(TokenKind::In, "'in'")?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::For {
                names,
                rest,
                iterable,
                body,
            },
            pos,
        ))
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // return
        let value = if self.at_terminator() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        Ok(Stmt::new(StmtKind::Return(value), pos))
    }

    fn parse_function_decl(&mut self) -> Result<Rc<FunctionDecl>, ParseError> {
        let pos = self.here();
        self.advance(); // func
        let (name, _) = self.expect_ident("function name")?;
        let params = self.parse_params()?;
        let body = Rc::new(self.parse_block()?);
        Ok(Rc::new(FunctionDecl {
            name: Some(name),
            params,
            body,
            pos,
        }))
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        self.skip_newlines();
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (name, name_pos) = self.expect_ident("parameter name")?;
                let variadic = self.eat(&TokenKind::Ellipsis);
                let default = if !variadic && self.eat(&TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                if variadic && !self.check(&TokenKind::RParen) {
                    return Err(ParseError::Syntax {
                        message: format!("variadic parameter '{name}' must be last"),
                        pos: name_pos,
                    });
                }
                params.push(Param {
                    name,
                    default,
                    variadic,
                });
                self.skip_newlines();
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn parse_class(&mut self, is_final: bool, pos: Position) -> Result<Stmt, ParseError> {
        self.advance(); // class
        let (name, _) = self.expect_ident("class name")?;
        let parent = if self.eat(&TokenKind::Colon) {
            Some(self.expect_ident("parent class name")?.0)
        } else {
            None
        };
        let mut interfaces = Vec::new();
        if self.check(&TokenKind::Less) && matches!(self.peek_kind(), TokenKind::Colon) {
            self.advance();
            self.advance();
            loop {
                interfaces.push(self.expect_ident("interface name")?.0);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let methods = self.parse_decl_block()?;
        Ok(Stmt::new(
            StmtKind::ClassDecl(Rc::new(ClassDecl {
                name,
                parent,
                interfaces,
                methods,
                is_final,
                pos,
            })),
            pos,
        ))
    }

    fn parse_interface(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // interface
        let (name, _) = self.expect_ident("interface name")?;
        let methods = self.parse_decl_block()?;
        Ok(Stmt::new(
            StmtKind::InterfaceDecl(Rc::new(InterfaceDecl { name, methods, pos })),
            pos,
        ))
    }

    /// Class and interface bodies hold only `func` declarations.
    fn parse_decl_block(&mut self) -> Result<Vec<Rc<FunctionDecl>>, ParseError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        self.skip_terminators();
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eos) {
                return Err(ParseError::NeedMoreInput);
            }
            if !self.check(&TokenKind::Func) {
                return Err(self.error("method declaration"));
            }
            methods.push(self.parse_function_decl()?);
            self.skip_terminators();
        }
        self.advance(); // }
        Ok(methods)
    }

    fn parse_cmd_decl(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // cmd
        let (name, _) = self.expect_ident("command name")?;
        let body = Rc::new(self.parse_block()?);
        Ok(Stmt::new(StmtKind::CmdDecl { name, body }, pos))
    }

    fn parse_let(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // let
        let elems = self.parse_target_list()?;
        self.expect(TokenKind::Assign, "'='")?;
        let value = self.parse_expression()?;
        let targets = self.convert_targets(elems)?;
        Ok(Stmt::new(StmtKind::Let { targets, value }, pos))
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        self.advance(); // import
        let path = match self.kind().clone() {
            TokenKind::Str(path) => {
                self.advance();
                path
            }
            _ => return Err(self.error("import path string")),
        };
        self.expect(TokenKind::As, "'as'")?;
        let (alias, _) = self.expect_ident("module alias")?;
        Ok(Stmt::new(StmtKind::Import { path, alias }, pos))
    }

    fn parse_cmd_call(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        let (name, _) = self.expect_ident("command name")?;
        let mut pieces = Vec::new();
        loop {
            match self.kind().clone() {
                TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::RBrace
                | TokenKind::Eos => break,
                TokenKind::Word(word) => {
                    self.advance();
                    pieces.push(CmdPiece::Word(word));
                }
                TokenKind::Ident(word) => {
                    self.advance();
                    pieces.push(CmdPiece::Word(word));
                }
                TokenKind::Str(word) => {
                    self.advance();
                    pieces.push(CmdPiece::Word(word));
                }
                TokenKind::Int(value) => {
                    self.advance();
                    pieces.push(CmdPiece::Word(value.to_string()));
                }
                TokenKind::Real(value) => {
                    self.advance();
                    pieces.push(CmdPiece::Word(value.to_string()));
                }
                TokenKind::AtSign => {
                    self.advance();
                    pieces.push(CmdPiece::Word("@".to_string()));
                }
                TokenKind::Dollar => {
                    let var_pos = self.here();
                    self.advance();
                    let (var, _) = self.expect_ident("variable name after '$'")?;
                    pieces.push(CmdPiece::Var {
                        name: var,
                        pos: var_pos,
                    });
                }
                TokenKind::DollarLParen => {
                    self.advance();
                    let expr = self.parse_expression()?;
                    self.expect(TokenKind::RParen, "')'")?;
                    pieces.push(CmdPiece::Expr(expr));
                }
                TokenKind::DollarLBrace => {
                    self.advance();
                    let expr = self.parse_expression()?;
                    self.expect(TokenKind::RBrace, "'}'")?;
                    pieces.push(CmdPiece::Expr(expr));
                }
                _ => return Err(self.error("command argument")),
            }
        }
        Ok(Stmt::new(StmtKind::CmdCall { name, pieces }, pos))
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.here();
        let elems = self.parse_target_list()?;

        if self.eat(&TokenKind::Assign) {
            let value = self.parse_expression()?;
            let targets = self.convert_targets(elems)?;
            return Ok(Stmt::new(StmtKind::Assign { targets, value }, pos));
        }

        if let Some(op) = compound_assign_op(self.kind()) {
            if elems.len() != 1 {
                return Err(self.error("'='"));
            }
            self.advance();
            let rhs = self.parse_expression()?;
            let targets = self.convert_targets(elems)?;
            let lhs = match &targets[0] {
                AssignTarget::Name(name) => Expr::new(ExprKind::Ident(name.clone()), pos),
                AssignTarget::Index { object, index } => Expr::new(
                    ExprKind::Index {
                        object: Box::new(object.clone()),
                        index: Box::new(index.clone()),
                    },
                    pos,
                ),
                AssignTarget::Attr { object, name } => Expr::new(
                    ExprKind::Attr {
                        object: Box::new(object.clone()),
                        name: name.clone(),
                    },
                    pos,
                ),
                AssignTarget::Rest(_) => return Err(self.error("'='")),
            };
            // x ⊗= y desugars to x = x ⊗ y.
            let value = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                pos,
            );
            return Ok(Stmt::new(StmtKind::Assign { targets, value }, pos));
        }

        let mut elems = elems;
        if elems.len() == 1 {
            match elems.pop().expect("single element") {
                TargetElem::Expr(expr) => return Ok(Stmt::new(StmtKind::Expr(expr), pos)),
                TargetElem::Rest(_, rest_pos) => {
                    return Err(ParseError::Syntax {
                        message: "'...' target outside of assignment".to_string(),
                        pos: rest_pos,
                    })
                }
            }
        }
        Err(self.error("'='"))
    }

    fn parse_target_list(&mut self) -> Result<Vec<TargetElem>, ParseError> {
        let mut elems = Vec::new();
        loop {
            if self.check(&TokenKind::Ellipsis) {
                let pos = self.here();
                self.advance();
                let (name, _) = self.expect_ident("name after '...'")?;
                elems.push(TargetElem::Rest(name, pos));
            } else {
                elems.push(TargetElem::Expr(self.parse_expression()?));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(elems)
    }

    fn convert_targets(&self, elems: Vec<TargetElem>) -> Result<Vec<AssignTarget>, ParseError> {
        let count = elems.len();
        let mut targets = Vec::with_capacity(count);
        for (i, elem) in elems.into_iter().enumerate() {
            let target = match elem {
                TargetElem::Rest(name, pos) => {
                    if i + 1 != count {
                        return Err(ParseError::Syntax {
                            message: format!("'...{name}' must be the last target"),
                            pos,
                        });
                    }
                    AssignTarget::Rest(name)
                }
                TargetElem::Expr(expr) => match expr.kind {
                    ExprKind::Ident(name) => AssignTarget::Name(name),
                    ExprKind::Index { object, index } => AssignTarget::Index {
                        object: *object,
                        index: *index,
                    },
                    ExprKind::Attr { object, name } => AssignTarget::Attr {
                        object: *object,
                        name,
                    },
                    _ => {
                        return Err(ParseError::Syntax {
                            message: "cannot assign to this expression".to_string(),
                            pos: expr.pos,
                        })
                    }
                },
            };
            targets.push(target);
        }
        Ok(targets)
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let pos = self.here();
        self.expect(TokenKind::LBrace, "'{'")?;
        self.skip_terminators();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eos) {
                return Err(ParseError::NeedMoreInput);
            }
            let stmt = self.parse_stmt()?;
            let block_terminated = ends_with_block(&stmt.kind);
            stmts.push(stmt);
            if !block_terminated {
                self.expect_terminator()?;
            }
            self.skip_terminators();
        }
        self.advance(); // }
        Ok(Block { stmts, pos })
    }

    // ---- expressions, loosest to tightest ----

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_logical_and()?;
        while self.check(&TokenKind::OrOr) {
            let pos = expr.pos;
            self.advance();
            let right = self.parse_logical_and()?;
            expr = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(expr)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_bit_or()?;
        while self.check(&TokenKind::AndAnd) {
            let pos = expr.pos;
            self.advance();
            let right = self.parse_bit_or()?;
            expr = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(expr)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_bit_xor()?;
        while self.check(&TokenKind::BitOr) {
            let pos = expr.pos;
            self.advance();
            let right = self.parse_bit_xor()?;
            expr = binary(BinaryOp::BitOr, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_bit_and()?;
        while self.check(&TokenKind::BitXor) {
            let pos = expr.pos;
            self.advance();
            let right = self.parse_bit_and()?;
            expr = binary(BinaryOp::BitXor, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_equality()?;
        while self.check(&TokenKind::BitAnd) {
            let pos = expr.pos;
            self.advance();
            let right = self.parse_equality()?;
            expr = binary(BinaryOp::BitAnd, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_relational()?;
        loop {
            let op = match self.kind() {
                TokenKind::Equal => BinaryOp::Equal,
                TokenKind::NotEqual => BinaryOp::NotEqual,
                _ => break,
            };
            let pos = expr.pos;
            self.advance();
            let right = self.parse_relational()?;
            expr = binary(op, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_shift()?;
        loop {
            let op = match self.kind() {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEq => BinaryOp::LessEq,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEq => BinaryOp::GreaterEq,
                _ => break,
            };
            let pos = expr.pos;
            self.advance();
            let right = self.parse_shift()?;
            expr = binary(op, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::Shl => BinaryOp::Shl,
                TokenKind::Shr => BinaryOp::Shr,
                _ => break,
            };
            let pos = expr.pos;
            self.advance();
            let right = self.parse_additive()?;
            expr = binary(op, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Add => BinaryOp::Add,
                TokenKind::Sub => BinaryOp::Sub,
                _ => break,
            };
            let pos = expr.pos;
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = binary(op, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Mul => BinaryOp::Mul,
                TokenKind::Div => BinaryOp::Div,
                TokenKind::Mod => BinaryOp::Mod,
                _ => break,
            };
            let pos = expr.pos;
            self.advance();
            let right = self.parse_unary()?;
            expr = binary(op, expr, right, pos);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.here();
        let op = match self.kind() {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Sub => UnaryOp::Neg,
            TokenKind::Add => UnaryOp::Pos,
            TokenKind::BitNot => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            pos,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.kind() {
                TokenKind::LParen => {
                    let pos = expr.pos;
                    self.advance();
                    self.skip_newlines();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            self.skip_newlines();
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                            self.skip_newlines();
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        pos,
                    );
                }
                TokenKind::LBracket => {
                    let pos = expr.pos;
                    self.advance();
                    self.skip_newlines();
                    expr = self.parse_index_or_slice(expr, pos)?;
                }
                TokenKind::Dot => {
                    let pos = expr.pos;
                    self.advance();
                    let (name, _) = self.expect_ident("attribute name")?;
                    expr = Expr::new(
                        ExprKind::Attr {
                            object: Box::new(expr),
                            name,
                        },
                        pos,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// The opening '[' is already consumed.
    fn parse_index_or_slice(&mut self, object: Expr, pos: Position) -> Result<Expr, ParseError> {
        let start = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        if !self.check(&TokenKind::Colon) {
            let index = start.ok_or_else(|| self.error("index expression"))?;
            self.expect(TokenKind::RBracket, "']'")?;
            return Ok(Expr::new(
                ExprKind::Index {
                    object: Box::new(object),
                    index,
                },
                pos,
            ));
        }

        self.advance(); // first ':'
        let end = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if self.eat(&TokenKind::Colon) {
            if self.check(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            }
        } else {
            None
        };
        self.expect(TokenKind::RBracket, "']'")?;
        Ok(Expr::new(
            ExprKind::Slice {
                object: Box::new(object),
                start,
                end,
                step,
            },
            pos,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.here();
        match self.kind().clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Int(value), pos))
            }
            TokenKind::Real(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Real(value), pos))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(value), pos))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), pos))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::new(ExprKind::Nil, pos))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Ident(name), pos))
            }
            TokenKind::Func => {
                self.advance();
                let params = self.parse_params()?;
                let body = Rc::new(self.parse_block()?);
                Ok(Expr::new(
                    ExprKind::Function(Rc::new(FunctionDecl {
                        name: None,
                        params,
                        body,
                        pos,
                    })),
                    pos,
                ))
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::new(ExprKind::Tuple(Vec::new()), pos));
                }
                let first = self.parse_expression()?;
                self.skip_newlines();
                if self.eat(&TokenKind::Comma) {
                    let mut elems = vec![first];
                    self.skip_newlines();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            elems.push(self.parse_expression()?);
                            self.skip_newlines();
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                            self.skip_newlines();
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    Ok(Expr::new(ExprKind::Tuple(elems), pos))
                } else {
                    self.expect(TokenKind::RParen, "')'")?;
                    Ok(first)
                }
            }
            TokenKind::LBracket => {
                self.advance();
                self.skip_newlines();
                let mut elems = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        elems.push(self.parse_expression()?);
                        self.skip_newlines();
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                        if self.check(&TokenKind::RBracket) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Expr::new(ExprKind::Array(elems), pos))
            }
            TokenKind::LBrace => {
                self.advance();
                self.skip_newlines();
                let mut entries = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expression()?;
                        self.expect(TokenKind::Colon, "':'")?;
                        let value = self.parse_expression()?;
                        entries.push((key, value));
                        self.skip_newlines();
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                        if self.check(&TokenKind::RBrace) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBrace, "'}'")?;
                Ok(Expr::new(ExprKind::Map(entries), pos))
            }
            _ => Err(self.error("expression")),
        }
    }

    // ---- plumbing ----

    fn kind(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].kind
    }

    fn here(&self) -> Position {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Position), ParseError> {
        let pos = self.here();
        if let TokenKind::Ident(name) = self.kind() {
            let name = name.clone();
            self.advance();
            Ok((name, pos))
        } else {
            Err(self.error(what))
        }
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eos
        )
    }

    fn expect_terminator(&mut self) -> Result<(), ParseError> {
        match self.kind() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eos => Ok(()),
            _ => Err(self.error("newline or ';'")),
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        if matches!(self.kind(), TokenKind::Eos) {
            ParseError::NeedMoreInput
        } else {
            ParseError::Syntax {
                message: format!("expected {expected}, got '{}'", self.kind()),
                pos: self.here(),
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, pos: Position) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        pos,
    )
}

fn compound_assign_op(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::AssignAdd => BinaryOp::Add,
        TokenKind::AssignSub => BinaryOp::Sub,
        TokenKind::AssignMul => BinaryOp::Mul,
        TokenKind::AssignDiv => BinaryOp::Div,
        TokenKind::AssignMod => BinaryOp::Mod,
        TokenKind::AssignAnd => BinaryOp::BitAnd,
        TokenKind::AssignOr => BinaryOp::BitOr,
        TokenKind::AssignXor => BinaryOp::BitXor,
        TokenKind::AssignShl => BinaryOp::Shl,
        TokenKind::AssignShr => BinaryOp::Shr,
        _ => return None,
    };
    Some(op)
}

/// Statements whose last token is a closing '}' terminate themselves;
/// the next statement may follow without a newline or ';'.
fn ends_with_block(kind: &StmtKind) -> bool {
    matches!(
        kind,
        StmtKind::If { .. }
            | StmtKind::While { .. }
            | StmtKind::For { .. }
            | StmtKind::FuncDecl(_)
            | StmtKind::ClassDecl(_)
            | StmtKind::InterfaceDecl(_)
            | StmtKind::CmdDecl { .. }
    )
}

/// A statement-initial identifier followed by one of these begins a
/// shell-style command invocation rather than an expression.
fn is_command_arg_start(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Word(_)
            | TokenKind::Ident(_)
            | TokenKind::Str(_)
            | TokenKind::Int(_)
            | TokenKind::Real(_)
            | TokenKind::Dollar
            | TokenKind::DollarLParen
            | TokenKind::DollarLBrace
            | TokenKind::AtSign
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Result<Program, ParseError> {
        let (tokens, messages) = tokenize(source);
        assert_eq!(messages.error_count(), 0, "unexpected lexer diagnostics");
        parse(tokens)
    }

    fn single_stmt(source: &str) -> StmtKind {
        let program = parse_source(source).expect("parse failed");
        assert_eq!(program.stmts.len(), 1, "expected one statement");
        program.stmts.into_iter().next().expect("statement").kind
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let StmtKind::Expr(expr) = single_stmt("1 + 2 * 3") else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary { op, right, .. } = expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn compound_assignment_desugars() {
        let StmtKind::Assign { targets, value } = single_stmt("x += 2") else {
            panic!("expected assignment");
        };
        assert_eq!(targets, vec![AssignTarget::Name("x".to_string())]);
        assert!(matches!(
            value.kind,
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn destructuring_targets_with_rest() {
        let StmtKind::Let { targets, .. } = single_stmt("let a, b, ...rest = xs") else {
            panic!("expected let");
        };
        assert_eq!(
            targets,
            vec![
                AssignTarget::Name("a".to_string()),
                AssignTarget::Name("b".to_string()),
                AssignTarget::Rest("rest".to_string()),
            ]
        );
    }

    #[test]
    fn rest_target_must_be_last() {
        let err = parse_source("let ...rest, a = xs").expect_err("expected failure");
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn function_declaration_with_default_and_variadic() {
        let StmtKind::FuncDecl(decl) = single_stmt("func f(a, b = 2, c...) { return a }") else {
            panic!("expected function declaration");
        };
        assert_eq!(decl.name.as_deref(), Some("f"));
        assert_eq!(decl.params.len(), 3);
        assert!(decl.params[1].default.is_some());
        assert!(decl.params[2].variadic);
        assert!(decl.is_variadic());
    }

    #[test]
    fn variadic_parameter_must_be_last() {
        let err = parse_source("func f(a..., b) {}").expect_err("expected failure");
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn anonymous_function_is_an_expression() {
        let StmtKind::Let { value, .. } = single_stmt("let f = func (x) { return x }") else {
            panic!("expected let");
        };
        assert!(matches!(value.kind, ExprKind::Function(_)));
    }

    #[test]
    fn class_with_parent_interfaces_and_final() {
        let StmtKind::ClassDecl(decl) =
            single_stmt("final class B : A <: Show, Countable { func init(self) { } }")
        else {
            panic!("expected class declaration");
        };
        assert_eq!(decl.name, "B");
        assert_eq!(decl.parent.as_deref(), Some("A"));
        assert_eq!(decl.interfaces, vec!["Show", "Countable"]);
        assert!(decl.is_final);
        assert_eq!(decl.methods.len(), 1);
    }

    #[test]
    fn command_call_with_words_and_interpolation() {
        let StmtKind::CmdCall { name, pieces } = single_stmt("copy ../a.txt $dest $(n + 1)")
        else {
            panic!("expected command call");
        };
        assert_eq!(name, "copy");
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], CmdPiece::Word("../a.txt".to_string()));
        assert!(matches!(pieces[1], CmdPiece::Var { ref name, .. } if name == "dest"));
        assert!(matches!(pieces[2], CmdPiece::Expr(_)));
    }

    #[test]
    fn identifier_call_is_not_a_command() {
        assert!(matches!(single_stmt("print(1)"), StmtKind::Expr(_)));
    }

    #[test]
    fn slice_with_optional_parts() {
        let StmtKind::Expr(expr) = single_stmt("xs[1:4:2]") else {
            panic!("expected expression");
        };
        let ExprKind::Slice {
            start, end, step, ..
        } = expr.kind
        else {
            panic!("expected slice");
        };
        assert!(start.is_some() && end.is_some() && step.is_some());

        let StmtKind::Expr(expr) = single_stmt("xs[:2]") else {
            panic!("expected expression");
        };
        let ExprKind::Slice {
            start, end, step, ..
        } = expr.kind
        else {
            panic!("expected slice");
        };
        assert!(start.is_none() && end.is_some() && step.is_none());
    }

    #[test]
    fn unclosed_block_requests_more_input() {
        let err = parse_source("func g(x) {").expect_err("expected incomplete input");
        assert_eq!(err, ParseError::NeedMoreInput);
    }

    #[test]
    fn unclosed_bracket_requests_more_input() {
        let err = parse_source("let xs = [1, 2,").expect_err("expected incomplete input");
        assert_eq!(err, ParseError::NeedMoreInput);
    }

    #[test]
    fn trailing_operator_requests_more_input() {
        let err = parse_source("1 +").expect_err("expected incomplete input");
        assert_eq!(err, ParseError::NeedMoreInput);
    }

    #[test]
    fn stray_paren_is_a_syntax_error() {
        let err = parse_source("1)").expect_err("expected syntax error");
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn import_statement() {
        let StmtKind::Import { path, alias } = single_stmt("import \"lib.sl\" as lib") else {
            panic!("expected import");
        };
        assert_eq!(path, "lib.sl");
        assert_eq!(alias, "lib");
    }

    #[test]
    fn else_if_chain_nests() {
        let StmtKind::If { else_block, .. } =
            single_stmt("if a { } else if b { } else { }")
        else {
            panic!("expected if");
        };
        let else_block = else_block.expect("else block");
        assert_eq!(else_block.stmts.len(), 1);
        assert!(matches!(else_block.stmts[0].kind, StmtKind::If { .. }));
    }
}
