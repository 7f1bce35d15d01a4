//! Recursive-descent parser for the snippet language.
//!
//! Expression nesting is bounded by [`MAX_NESTING`]: every nested
//! parenthesis, unary operator and chained binary operator or trailer counts
//! against it, which bounds the depth of the produced tree and therefore the
//! recursion of everything that later walks it.

use crate::lang::ast::*;
use crate::lang::lexer::{tokenize, tokenize_embedded};
use crate::lang::token::{is_keyword, Token, TokenKind};
use crate::lang::SyntaxError;
use std::collections::BTreeSet;
use std::rc::Rc;

pub const MAX_NESTING: usize = 200;

type PResult<T> = Result<T, SyntaxError>;

pub fn parse_module(source: &str) -> PResult<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, 0);
    parser.module()
}

/// Parse a standalone expression (tuples without parentheses allowed).
pub fn parse_expression(source: &str) -> PResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, 0);
    parser.skip_newlines();
    let expr = parser.testlist_star()?;
    parser.skip_newlines();
    parser.expect_end()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    function_depth: usize,
    loop_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            function_depth: 0,
            loop_depth: 0,
        }
    }

    // ---- token helpers ----

    fn peek(&self) -> &Token {
        let index = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check_op(&self, op: &str) -> bool {
        self.peek().is_op(op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<Token> {
        if self.check_op(op) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected '{}'", op)))
        }
    }

    fn check_kw(&self, keyword: &str) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn eat_kw(&mut self, keyword: &str) -> bool {
        if self.check_kw(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, keyword: &str) -> PResult<Token> {
        if self.check_kw(keyword) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected '{}'", keyword)))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match &self.peek().kind {
            TokenKind::Name(name) if !is_keyword(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.invalid_syntax()),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.peek();
        SyntaxError::new(message, token.line, token.col)
    }

    fn invalid_syntax(&self) -> SyntaxError {
        match &self.peek().kind {
            TokenKind::Indent => self.error_here("unexpected indent"),
            TokenKind::EndOfFile => self.error_here("unexpected end of input"),
            _ => self.error_here("invalid syntax"),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline) {
            self.advance();
        }
    }

    fn expect_end(&self) -> PResult<()> {
        match self.peek().kind {
            TokenKind::EndOfFile => Ok(()),
            _ => Err(self.invalid_syntax()),
        }
    }

    /// Whether the current token can begin an expression
    fn starts_expression(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Name(name) => {
                !is_keyword(name)
                    || matches!(name.as_str(), "True" | "False" | "None" | "not" | "lambda")
            }
            TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::Bytes(_)
            | TokenKind::FString(_) => true,
            TokenKind::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "*" | "..."),
            _ => false,
        }
    }

    fn enter(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("expression is nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    // ---- statements ----

    fn module(&mut self) -> PResult<Module> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek().kind {
                TokenKind::EndOfFile => break,
                TokenKind::Indent => return Err(self.error_here("unexpected indent")),
                TokenKind::Dedent => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(Module { body })
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        let token = self.peek().clone();
        if token.is_op("@") {
            return Ok(vec![self.decorated()?]);
        }
        if let TokenKind::Name(name) = &token.kind {
            match name.as_str() {
                "if" => return Ok(vec![self.if_stmt()?]),
                "while" => return Ok(vec![self.while_stmt()?]),
                "for" => return Ok(vec![self.for_stmt()?]),
                "try" => return Ok(vec![self.try_stmt()?]),
                "def" => return Ok(vec![self.funcdef(Vec::new())?]),
                "class" => return Ok(vec![self.classdef(Vec::new())?]),
                "with" => return Err(self.error_here("'with' statements are not supported")),
                "async" => return Err(self.error_here("'async' is not supported")),
                _ => {}
            }
        }
        self.simple_stmts()
    }

    fn simple_stmts(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.small_stmt()?];
        while self.eat_op(";") {
            if matches!(self.peek().kind, TokenKind::Newline | TokenKind::EndOfFile) {
                break;
            }
            stmts.push(self.small_stmt()?);
        }
        match self.peek().kind {
            TokenKind::Newline => {
                self.advance();
                Ok(stmts)
            }
            TokenKind::EndOfFile => Ok(stmts),
            _ => Err(self.invalid_syntax()),
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek().kind, TokenKind::Newline) {
            return self.simple_stmts();
        }
        self.advance();
        if !matches!(self.peek().kind, TokenKind::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::EndOfFile => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => return Err(self.error_here("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn small_stmt(&mut self) -> PResult<Stmt> {
        let start = self.peek().clone();
        let (line, col) = (start.line, start.col);
        let stmt = |kind| Stmt { kind, line, col };

        if let TokenKind::Name(name) = &start.kind {
            match name.as_str() {
                "pass" => {
                    self.advance();
                    return Ok(stmt(StmtKind::Pass));
                }
                "break" | "continue" => {
                    if self.loop_depth == 0 {
                        return Err(self.error_here(format!("'{}' outside loop", name)));
                    }
                    let kind = if name == "break" { StmtKind::Break } else { StmtKind::Continue };
                    self.advance();
                    return Ok(stmt(kind));
                }
                "return" => {
                    if self.function_depth == 0 {
                        return Err(self.error_here("'return' outside function"));
                    }
                    self.advance();
                    let value = if self.starts_expression() {
                        Some(self.testlist_star()?)
                    } else {
                        None
                    };
                    return Ok(stmt(StmtKind::Return(value)));
                }
                "raise" => {
                    self.advance();
                    let mut exc = None;
                    let mut cause = None;
                    if self.starts_expression() {
                        exc = Some(self.test()?);
                        if self.eat_kw("from") {
                            cause = Some(self.test()?);
                        }
                    }
                    return Ok(stmt(StmtKind::Raise { exc, cause }));
                }
                "global" | "nonlocal" => {
                    let is_global = name == "global";
                    if !is_global && self.function_depth == 0 {
                        return Err(self.error_here("nonlocal declaration not allowed at module level"));
                    }
                    self.advance();
                    let mut names = vec![self.expect_name()?];
                    while self.eat_op(",") {
                        names.push(self.expect_name()?);
                    }
                    let kind = if is_global {
                        StmtKind::Global(names)
                    } else {
                        StmtKind::Nonlocal(names)
                    };
                    return Ok(stmt(kind));
                }
                "del" => {
                    self.advance();
                    let targets = match self.target_list()? {
                        Expr {
                            kind: ExprKind::Tuple(items),
                            ..
                        } => items,
                        single => vec![single],
                    };
                    for target in &targets {
                        self.check_target(target, false)?;
                    }
                    return Ok(stmt(StmtKind::Delete(targets)));
                }
                "assert" => {
                    self.advance();
                    let test = self.test()?;
                    let msg = if self.eat_op(",") { Some(self.test()?) } else { None };
                    return Ok(stmt(StmtKind::Assert { test, msg }));
                }
                "import" => return self.import_stmt(),
                "from" => return self.from_import_stmt(),
                "yield" => return Err(self.error_here("'yield' is not supported")),
                "await" => return Err(self.error_here("'await' is not supported")),
                _ => {}
            }
        }

        let first = self.testlist_star()?;

        if self.check_op(":") {
            self.check_single_target(&first)?;
            self.advance();
            let annotation = self.test()?;
            let value = if self.eat_op("=") {
                Some(self.testlist_star()?)
            } else {
                None
            };
            return Ok(stmt(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            }));
        }

        if let TokenKind::Op(op) = self.peek().kind {
            if let Some(bin) = BinOp::from_augmented(op) {
                self.check_single_target(&first)?;
                self.advance();
                let value = self.testlist_star()?;
                return Ok(stmt(StmtKind::AugAssign {
                    target: first,
                    op: bin,
                    value,
                }));
            }
            if op == ":=" {
                return Err(self.error_here("assignment expressions are not supported"));
            }
        }

        if self.check_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.testlist_star()?);
            }
            let value = exprs.pop().ok_or_else(|| self.invalid_syntax())?;
            for target in &exprs {
                self.check_target(target, true)?;
            }
            return Ok(stmt(StmtKind::Assign {
                targets: exprs,
                value,
            }));
        }

        if let ExprKind::Starred(_) = first.kind {
            return Err(SyntaxError::new(
                "can't use starred expression here",
                first.line,
                first.col,
            ));
        }
        Ok(stmt(StmtKind::Expr(first)))
    }

    fn check_single_target(&self, target: &Expr) -> PResult<()> {
        match target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            _ => Err(SyntaxError::new(
                "illegal target for annotation or augmented assignment",
                target.line,
                target.col,
            )),
        }
    }

    fn check_target(&self, target: &Expr, allow_unpack: bool) -> PResult<()> {
        let fail = |what: &str| {
            Err(SyntaxError::new(
                format!("cannot {} {}", if allow_unpack { "assign to" } else { "delete" }, what),
                target.line,
                target.col,
            ))
        };
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let starred = items
                    .iter()
                    .filter(|item| matches!(item.kind, ExprKind::Starred(_)))
                    .count();
                if starred > 1 {
                    return Err(SyntaxError::new(
                        "multiple starred expressions in assignment",
                        target.line,
                        target.col,
                    ));
                }
                for item in items {
                    match &item.kind {
                        ExprKind::Starred(inner) if allow_unpack => self.check_target(inner, true)?,
                        _ => self.check_target(item, allow_unpack)?,
                    }
                }
                Ok(())
            }
            ExprKind::Starred(_) => fail("starred expression"),
            ExprKind::Call { .. } => fail("function call"),
            ExprKind::Constant(_) | ExprKind::JoinedStr(_) => fail("literal"),
            _ => fail("expression"),
        }
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance();
        let mut names = Vec::new();
        loop {
            let token = self.peek().clone();
            let name = self.dotted_name()?;
            let asname = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias {
                name,
                asname,
                line: token.line,
                col: token.col,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::Import(names),
            line: start.line,
            col: start.col,
        })
    }

    fn from_import_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance();
        let mut level = 0;
        loop {
            if self.eat_op(".") {
                level += 1;
            } else if self.eat_op("...") {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.check_kw("import") {
            None
        } else {
            Some(self.dotted_name()?)
        };
        if module.is_none() && level == 0 {
            return Err(self.invalid_syntax());
        }
        self.expect_kw("import")?;

        let mut names = Vec::new();
        if self.check_op("*") {
            let token = self.advance();
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
                line: token.line,
                col: token.col,
            });
        } else {
            let parenthesized = self.eat_op("(");
            loop {
                let token = self.peek().clone();
                let name = self.expect_name()?;
                let asname = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                names.push(Alias {
                    name,
                    asname,
                    line: token.line,
                    col: token.col,
                });
                if !self.eat_op(",") {
                    break;
                }
                if parenthesized && self.check_op(")") {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
        }
        Ok(Stmt {
            kind: StmtKind::ImportFrom {
                module,
                names,
                level,
            },
            line: start.line,
            col: start.col,
        })
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.check_kw("elif") {
            vec![self.if_stmt()?]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line: start.line,
            col: start.col,
        })
    }

    fn loop_body(&mut self) -> PResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance();
        let test = self.test()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw("else") { self.block()? } else { Vec::new() };
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            line: start.line,
            col: start.col,
        })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance();
        let target = self.target_list()?;
        self.check_target(&target, true)?;
        self.expect_kw("in")?;
        let iter = self.testlist_star()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw("else") { self.block()? } else { Vec::new() };
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            line: start.line,
            col: start.col,
        })
    }

    fn try_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance();
        let body = self.block()?;
        let mut handlers: Vec<ExceptHandler> = Vec::new();
        while self.check_kw("except") {
            let token = self.advance();
            if self.check_op("*") {
                return Err(self.error_here("'except*' is not supported"));
            }
            if handlers.last().is_some_and(|h| h.typ.is_none()) {
                return Err(SyntaxError::new("default 'except:' must be last", token.line, token.col));
            }
            let mut typ = None;
            let mut name = None;
            if !self.check_op(":") {
                typ = Some(self.test()?);
                if self.eat_kw("as") {
                    name = Some(self.expect_name()?);
                }
            }
            let body = self.block()?;
            handlers.push(ExceptHandler {
                typ,
                name,
                body,
                line: token.line,
                col: token.col,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") { self.block()? } else { Vec::new() };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error_here("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            line: start.line,
            col: start.col,
        })
    }

    fn decorated(&mut self) -> PResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.test()?);
            if !matches!(self.peek().kind, TokenKind::Newline) {
                return Err(self.invalid_syntax());
            }
            self.advance();
        }
        if self.check_kw("def") {
            self.funcdef(decorators)
        } else if self.check_kw("class") {
            self.classdef(decorators)
        } else {
            Err(self.invalid_syntax())
        }
    }

    fn params(&mut self, close: &str, annotations: bool) -> PResult<Params> {
        let mut params = Params::default();
        let mut seen = BTreeSet::new();
        let mut keyword_only = false;
        let mut saw_default = false;

        while !self.check_op(close) {
            let token = self.peek().clone();
            let added = if self.eat_op("**") {
                let param = self.param(annotations, false)?;
                let name = param.name.clone();
                params.kwarg = Some(param);
                Some(name)
            } else if self.eat_op("*") {
                if keyword_only {
                    return Err(SyntaxError::new("* argument may appear only once", token.line, token.col));
                }
                keyword_only = true;
                if self.check_op(",") || self.check_op(close) {
                    None
                } else {
                    let param = self.param(annotations, false)?;
                    let name = param.name.clone();
                    params.vararg = Some(param);
                    Some(name)
                }
            } else if self.eat_op("/") {
                // positional-only marker; every parameter is positional-or-keyword here
                None
            } else {
                let param = self.param(annotations, true)?;
                let name = param.name.clone();
                if keyword_only {
                    params.kwonly.push(param);
                } else {
                    if param.default.is_some() {
                        saw_default = true;
                    } else if saw_default {
                        return Err(SyntaxError::new(
                            "parameter without a default follows parameter with a default",
                            token.line,
                            token.col,
                        ));
                    }
                    params.args.push(param);
                }
                Some(name)
            };

            if let Some(name) = added {
                if !seen.insert(name.clone()) {
                    return Err(SyntaxError::new(
                        format!("duplicate argument '{}' in function definition", name),
                        token.line,
                        token.col,
                    ));
                }
            }
            if params.kwarg.is_some() {
                self.eat_op(",");
                if !self.check_op(close) {
                    return Err(self.error_here("arguments cannot follow var-keyword argument"));
                }
                break;
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn param(&mut self, annotations: bool, with_default: bool) -> PResult<Param> {
        let name = self.expect_name()?;
        let annotation = if annotations && self.eat_op(":") {
            Some(self.test()?)
        } else {
            None
        };
        let default = if with_default && self.eat_op("=") {
            Some(self.test()?)
        } else {
            None
        };
        Ok(Param {
            name,
            default,
            annotation,
        })
    }

    fn funcdef(&mut self, decorators: Vec<Expr>) -> PResult<Stmt> {
        let start = self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")", true)?;
        self.expect_op(")")?;
        let returns = if self.eat_op("->") { Some(self.test()?) } else { None };

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        let body = body?;

        let mut globals = BTreeSet::new();
        let mut nonlocals = BTreeSet::new();
        collect_declarations(&body, &mut globals, &mut nonlocals);

        let def = FunctionDef {
            name,
            params,
            body,
            decorators,
            returns,
            globals,
            nonlocals,
            line: start.line,
            col: start.col,
        };
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(def)),
            line: start.line,
            col: start.col,
        })
    }

    fn classdef(&mut self, decorators: Vec<Expr>) -> PResult<Stmt> {
        let start = self.advance();
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_op("(") {
            for arg in self.call_args()? {
                match arg {
                    Arg::Positional(base) => bases.push(base),
                    other => {
                        let value = other.value();
                        return Err(SyntaxError::new(
                            "class keyword and starred arguments are not supported",
                            value.line,
                            value.col,
                        ));
                    }
                }
            }
        }

        let saved_functions = std::mem::replace(&mut self.function_depth, 0);
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.block();
        self.function_depth = saved_functions;
        self.loop_depth = saved_loops;

        let def = ClassDef {
            name,
            bases,
            body: body?,
            decorators,
            line: start.line,
            col: start.col,
        };
        Ok(Stmt {
            kind: StmtKind::ClassDef(Rc::new(def)),
            line: start.line,
            col: start.col,
        })
    }

    // ---- expressions ----

    /// Comma-separated expressions (starred allowed); a tuple when a comma is present
    fn testlist_star(&mut self) -> PResult<Expr> {
        let first = self.test_or_star()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            items.push(self.test_or_star()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line, col))
    }

    /// Assignment-target list as used by `for`, comprehensions and `del`
    fn target_list(&mut self) -> PResult<Expr> {
        let first = self.target_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_kw("in") || !self.starts_expression() {
                break;
            }
            items.push(self.target_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line, col))
    }

    fn target_item(&mut self) -> PResult<Expr> {
        if self.check_op("*") {
            let star = self.advance();
            let inner = self.bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), star.line, star.col));
        }
        self.bitor()
    }

    fn test_or_star(&mut self) -> PResult<Expr> {
        if self.check_op("*") {
            let star = self.advance();
            let inner = self.bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), star.line, star.col));
        }
        self.test()
    }

    fn test(&mut self) -> PResult<Expr> {
        self.enter()?;
        let result = self.test_inner();
        self.leave(1);
        result
    }

    fn test_inner(&mut self) -> PResult<Expr> {
        if self.check_kw("lambda") {
            return self.lambda();
        }
        let expr = self.or_test()?;
        if self.check_op(":=") {
            return Err(self.error_here("assignment expressions are not supported"));
        }
        if self.check_kw("if") {
            // `x if c else y`; an `if` without `else` belongs to a comprehension
            let saved = self.pos;
            self.advance();
            let test = self.or_test()?;
            if !self.eat_kw("else") {
                self.pos = saved;
                return Ok(expr);
            }
            let orelse = self.test()?;
            let (line, col) = (expr.line, expr.col);
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(expr),
                    orelse: Box::new(orelse),
                },
                line,
                col,
            ));
        }
        Ok(expr)
    }

    fn lambda(&mut self) -> PResult<Expr> {
        let start = self.advance();
        let params = self.params(":", false)?;
        self.expect_op(":")?;
        let value = self.test()?;
        let (line, col) = (value.line, value.col);
        let def = FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt {
                kind: StmtKind::Return(Some(value)),
                line,
                col,
            }],
            decorators: Vec::new(),
            returns: None,
            globals: BTreeSet::new(),
            nonlocals: BTreeSet::new(),
            line: start.line,
            col: start.col,
        };
        Ok(Expr::new(ExprKind::Lambda(Rc::new(def)), start.line, start.col))
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let first = self.and_test()?;
        if !self.check_kw("or") {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut values = vec![first];
        while self.eat_kw("or") {
            values.push(self.and_test()?);
        }
        Ok(Expr::new(ExprKind::BoolOp { op: BoolOp::Or, values }, line, col))
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let first = self.not_test()?;
        if !self.check_kw("and") {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut values = vec![first];
        while self.eat_kw("and") {
            values.push(self.not_test()?);
        }
        Ok(Expr::new(ExprKind::BoolOp { op: BoolOp::And, values }, line, col))
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.check_kw("not") {
            let start = self.advance();
            self.enter()?;
            let operand = self.not_test();
            self.leave(1);
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand?),
                },
                start.line,
                start.col,
            ));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let next_is = |keyword: &str| self.peek_at(1).is_some_and(|t| t.is_keyword(keyword));
        let (op, width) = match &self.peek().kind {
            TokenKind::Op("==") => (CmpOp::Eq, 1),
            TokenKind::Op("!=") => (CmpOp::NotEq, 1),
            TokenKind::Op("<") => (CmpOp::Lt, 1),
            TokenKind::Op("<=") => (CmpOp::LtE, 1),
            TokenKind::Op(">") => (CmpOp::Gt, 1),
            TokenKind::Op(">=") => (CmpOp::GtE, 1),
            TokenKind::Name(n) if n == "in" => (CmpOp::In, 1),
            TokenKind::Name(n) if n == "not" && next_is("in") => (CmpOp::NotIn, 2),
            TokenKind::Name(n) if n == "is" && next_is("not") => (CmpOp::IsNot, 2),
            TokenKind::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        };
        for _ in 0..width {
            self.advance();
        }
        Some(op)
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let (line, col) = (left.line, left.col);
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            line,
            col,
        ))
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        ops: &[(&str, BinOp)],
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        let mut chained = 0;
        while let Some(op) = ops
            .iter()
            .find(|(symbol, _)| self.check_op(symbol))
            .map(|(_, op)| *op)
        {
            self.advance();
            self.enter()?;
            chained += 1;
            let right = next(self)?;
            let (line, col) = (left.line, left.col);
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                line,
                col,
            );
        }
        self.leave(chained);
        Ok(left)
    }

    fn bitor(&mut self) -> PResult<Expr> {
        self.binary_chain(Self::bitxor, &[("|", BinOp::BitOr)])
    }

    fn bitxor(&mut self) -> PResult<Expr> {
        self.binary_chain(Self::bitand, &[("^", BinOp::BitXor)])
    }

    fn bitand(&mut self) -> PResult<Expr> {
        self.binary_chain(Self::shift, &[("&", BinOp::BitAnd)])
    }

    fn shift(&mut self) -> PResult<Expr> {
        self.binary_chain(Self::arith, &[("<<", BinOp::LShift), (">>", BinOp::RShift)])
    }

    fn arith(&mut self) -> PResult<Expr> {
        self.binary_chain(Self::term, &[("+", BinOp::Add), ("-", BinOp::Sub)])
    }

    fn term(&mut self) -> PResult<Expr> {
        self.binary_chain(
            Self::factor,
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMul),
            ],
        )
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Op("-") => Some(UnaryOp::Neg),
            TokenKind::Op("+") => Some(UnaryOp::Pos),
            TokenKind::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        let Some(op) = op else {
            return self.power();
        };
        let start = self.advance();
        self.enter()?;
        let operand = self.factor();
        self.leave(1);
        let operand = operand?;

        // Fold negative numeric literals so `-9223372036854775808` style bounds stay constants
        if op == UnaryOp::Neg {
            if let ExprKind::Constant(Constant::Int(value)) = operand.kind {
                if let Some(negated) = value.checked_neg() {
                    return Ok(Expr::new(
                        ExprKind::Constant(Constant::Int(negated)),
                        start.line,
                        start.col,
                    ));
                }
            }
        }
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            start.line,
            start.col,
        ))
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.atom_expr()?;
        if !self.check_op("**") {
            return Ok(base);
        }
        self.advance();
        let exponent = self.factor()?;
        let (line, col) = (base.line, base.col);
        Ok(Expr::new(
            ExprKind::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            },
            line,
            col,
        ))
    }

    fn atom_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        let mut chained = 0;
        loop {
            let (line, col) = (expr.line, expr.col);
            if self.eat_op("(") {
                self.enter()?;
                chained += 1;
                let args = self.call_args()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                    line,
                    col,
                );
            } else if self.eat_op("[") {
                self.enter()?;
                chained += 1;
                let index = self.subscript_list()?;
                self.expect_op("]")?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                    col,
                );
            } else if self.eat_op(".") {
                self.enter()?;
                chained += 1;
                let attr = self.expect_name()?;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    line,
                    col,
                );
            } else {
                break;
            }
        }
        self.leave(chained);
        Ok(expr)
    }

    /// Arguments after an opening parenthesis, consuming the closing one
    fn call_args(&mut self) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        let mut keywords = BTreeSet::new();
        let mut saw_keyword = false;

        while !self.check_op(")") {
            let token = self.peek().clone();
            let arg = if self.eat_op("**") {
                saw_keyword = true;
                Arg::DoubleStarred(self.test()?)
            } else if self.eat_op("*") {
                Arg::Starred(self.test()?)
            } else if matches!(&token.kind, TokenKind::Name(n) if !is_keyword(n))
                && self.peek_at(1).is_some_and(|t| t.is_op("="))
            {
                let name = self.expect_name()?;
                self.advance();
                if !keywords.insert(name.clone()) {
                    return Err(SyntaxError::new(
                        format!("keyword argument repeated: {}", name),
                        token.line,
                        token.col,
                    ));
                }
                saw_keyword = true;
                Arg::Keyword(name, self.test()?)
            } else {
                let value = self.test()?;
                if self.check_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    let (line, col) = (value.line, value.col);
                    let genexp = Expr::new(
                        ExprKind::GeneratorExp {
                            elt: Box::new(value),
                            generators,
                        },
                        line,
                        col,
                    );
                    if !args.is_empty() || !self.check_op(")") {
                        return Err(SyntaxError::new(
                            "generator expression must be parenthesized",
                            line,
                            col,
                        ));
                    }
                    args.push(Arg::Positional(genexp));
                    break;
                }
                if saw_keyword {
                    return Err(SyntaxError::new(
                        "positional argument follows keyword argument",
                        value.line,
                        value.col,
                    ));
                }
                Arg::Positional(value)
            };
            args.push(arg);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn subscript_list(&mut self) -> PResult<Expr> {
        let first = self.subscript_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line, col))
    }

    fn subscript_item(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        let lower = if self.check_op(":") {
            None
        } else {
            Some(self.test()?)
        };
        if !self.eat_op(":") {
            return lower.ok_or_else(|| self.invalid_syntax());
        }
        let is_end = |p: &Self| p.check_op("]") || p.check_op(",") || p.check_op(":");
        let upper = if is_end(self) { None } else { Some(self.test()?) };
        let step = if self.eat_op(":") {
            if self.check_op("]") || self.check_op(",") {
                None
            } else {
                Some(self.test()?)
            }
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice {
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
                step: step.map(Box::new),
            },
            token.line,
            token.col,
        ))
    }

    fn comprehension_clauses(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.check_target(&target, true)?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        if self.check_kw("async") {
            return Err(self.error_here("'async' is not supported"));
        }
        Ok(generators)
    }

    fn atom(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        let (line, col) = (token.line, token.col);
        let constant = |c| Ok(Expr::new(ExprKind::Constant(c), line, col));

        match &token.kind {
            TokenKind::Int(value) => {
                let value = *value;
                self.advance();
                constant(Constant::Int(value))
            }
            TokenKind::Float(value) => {
                let value = *value;
                self.advance();
                constant(Constant::Float(value))
            }
            TokenKind::Str(_) | TokenKind::Bytes(_) | TokenKind::FString(_) => self.strings(),
            TokenKind::Name(name) => match name.as_str() {
                "None" => {
                    self.advance();
                    constant(Constant::None)
                }
                "True" => {
                    self.advance();
                    constant(Constant::Bool(true))
                }
                "False" => {
                    self.advance();
                    constant(Constant::Bool(false))
                }
                "yield" => Err(self.error_here("'yield' is not supported")),
                "await" => Err(self.error_here("'await' is not supported")),
                other if is_keyword(other) => Err(self.invalid_syntax()),
                other => {
                    let name = other.to_string();
                    self.advance();
                    Ok(Expr::new(ExprKind::Name(name), line, col))
                }
            },
            TokenKind::Op("...") => {
                self.advance();
                constant(Constant::Ellipsis)
            }
            TokenKind::Op("(") => {
                self.advance();
                self.parenthesized(line, col)
            }
            TokenKind::Op("[") => {
                self.advance();
                self.list_display(line, col)
            }
            TokenKind::Op("{") => {
                self.advance();
                self.brace_display(line, col)
            }
            _ => Err(self.invalid_syntax()),
        }
    }

    fn parenthesized(&mut self, line: u32, col: u32) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), line, col));
        }
        self.enter()?;
        let first = self.test_or_star()?;
        let result = if self.check_kw("for") {
            let generators = self.comprehension_clauses()?;
            Expr::new(
                ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                line,
                col,
            )
        } else if self.check_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.check_op(")") {
                    break;
                }
                items.push(self.test_or_star()?);
            }
            Expr::new(ExprKind::Tuple(items), line, col)
        } else {
            if let ExprKind::Starred(_) = first.kind {
                return Err(SyntaxError::new(
                    "cannot use starred expression here",
                    first.line,
                    first.col,
                ));
            }
            first
        };
        self.leave(1);
        self.expect_op(")")?;
        Ok(result)
    }

    fn list_display(&mut self, line: u32, col: u32) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::new(ExprKind::List(Vec::new()), line, col));
        }
        self.enter()?;
        let first = self.test_or_star()?;
        let result = if self.check_kw("for") {
            let generators = self.comprehension_clauses()?;
            ExprKind::ListComp {
                elt: Box::new(first),
                generators,
            }
        } else {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.check_op("]") {
                    break;
                }
                items.push(self.test_or_star()?);
            }
            ExprKind::List(items)
        };
        self.leave(1);
        self.expect_op("]")?;
        Ok(Expr::new(result, line, col))
    }

    fn brace_display(&mut self, line: u32, col: u32) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), line, col));
        }
        self.enter()?;

        let result = if self.eat_op("**") {
            let spread = self.bitor()?;
            self.dict_entries(vec![(None, spread)])?
        } else {
            let first = self.test_or_star()?;
            if !matches!(first.kind, ExprKind::Starred(_)) && self.eat_op(":") {
                let value = self.test()?;
                if self.check_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    ExprKind::DictComp {
                        key: Box::new(first),
                        value: Box::new(value),
                        generators,
                    }
                } else {
                    self.dict_entries(vec![(Some(first), value)])?
                }
            } else if self.check_kw("for") {
                let generators = self.comprehension_clauses()?;
                ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                }
            } else {
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.check_op("}") {
                        break;
                    }
                    items.push(self.test_or_star()?);
                }
                ExprKind::Set(items)
            }
        };

        self.leave(1);
        self.expect_op("}")?;
        Ok(Expr::new(result, line, col))
    }

    fn dict_entries(&mut self, mut entries: Vec<(Option<Expr>, Expr)>) -> PResult<ExprKind> {
        while self.eat_op(",") {
            if self.check_op("}") {
                break;
            }
            if self.eat_op("**") {
                entries.push((None, self.bitor()?));
            } else {
                let key = self.test()?;
                self.expect_op(":")?;
                let value = self.test()?;
                entries.push((Some(key), value));
            }
        }
        Ok(ExprKind::Dict(entries))
    }

    /// Adjacent string literals concatenate; any f-string makes the result a JoinedStr
    fn strings(&mut self) -> PResult<Expr> {
        let start = self.peek().clone();
        let mut text = String::new();
        let mut bytes: Option<Vec<u8>> = None;
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        let mut saw_text = false;

        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Str(s) => {
                    if bytes.is_some() {
                        return Err(self.error_here("cannot mix bytes and nonbytes literals"));
                    }
                    saw_text = true;
                    text.push_str(&s);
                }
                TokenKind::FString(body) => {
                    if bytes.is_some() {
                        return Err(self.error_here("cannot mix bytes and nonbytes literals"));
                    }
                    saw_text = true;
                    formatted = true;
                    if !text.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut text)));
                    }
                    parts.extend(self.fstring_parts(&body, token.line, token.col + 2)?);
                }
                TokenKind::Bytes(b) => {
                    if saw_text {
                        return Err(self.error_here("cannot mix bytes and nonbytes literals"));
                    }
                    bytes.get_or_insert_with(Vec::new).extend(b);
                }
                _ => break,
            }
            self.advance();
        }

        let kind = if let Some(bytes) = bytes {
            ExprKind::Constant(Constant::Bytes(Rc::from(bytes)))
        } else if formatted {
            if !text.is_empty() {
                parts.push(FStringPart::Literal(text));
            }
            ExprKind::JoinedStr(merge_literals(parts))
        } else {
            ExprKind::Constant(Constant::Str(Rc::from(text)))
        };
        Ok(Expr::new(kind, start.line, start.col))
    }

    fn fstring_parts(&mut self, body: &str, line: u32, col: u32) -> PResult<Vec<FStringPart>> {
        let chars: Vec<char> = body.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(SyntaxError::new("f-string: single '}' is not allowed", line, col));
            }
            if c != '{' {
                literal.push(c);
                i += 1;
                continue;
            }
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }

            i += 1;
            let start = i;
            let mut nesting = 0usize;
            let mut quote: Option<char> = None;
            while i < chars.len() {
                let c = chars[i];
                if let Some(q) = quote {
                    if c == q {
                        quote = None;
                    }
                } else if c == '\'' || c == '"' {
                    quote = Some(c);
                } else if "([{".contains(c) {
                    nesting += 1;
                } else if ")]}".contains(c) && nesting > 0 {
                    nesting -= 1;
                } else if nesting == 0
                    && (c == '}'
                        || c == ':'
                        || (c == '!' && chars.get(i + 1) != Some(&'=')))
                {
                    break;
                }
                i += 1;
            }
            if i >= chars.len() {
                return Err(SyntaxError::new("f-string: expecting '}'", line, col));
            }

            let mut expr_text: String = chars[start..i].iter().collect();
            let mut conversion = None;
            let mut debug = false;
            let mut explicit = false;
            let trimmed = expr_text.trim_end();
            if trimmed.ends_with('=')
                && !["==", "!=", "<=", ">="].iter().any(|op| trimmed.ends_with(op))
            {
                literal.push_str(&expr_text);
                let without = trimmed.len() - 1;
                expr_text.truncate(without);
                conversion = Some('r');
                debug = true;
            }
            if expr_text.trim().is_empty() {
                return Err(SyntaxError::new("f-string: empty expression not allowed", line, col));
            }

            if chars[i] == '!' {
                let conv = chars.get(i + 1).copied();
                match conv {
                    Some(c @ ('r' | 's' | 'a')) => {
                        conversion = Some(c);
                        explicit = true;
                    }
                    _ => {
                        return Err(SyntaxError::new(
                            "f-string: invalid conversion character",
                            line,
                            col,
                        ))
                    }
                }
                i += 2;
            }

            let mut spec = Vec::new();
            if chars.get(i) == Some(&':') {
                i += 1;
                let spec_start = i;
                let mut depth = 0usize;
                while i < chars.len() {
                    match chars[i] {
                        '{' => depth += 1,
                        '}' if depth == 0 => break,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                }
                let spec_text: String = chars[spec_start..i].iter().collect();
                spec = self.fstring_parts(&spec_text, line, col)?;
                if debug && !explicit && !spec.is_empty() {
                    conversion = None;
                }
            }
            if chars.get(i) != Some(&'}') {
                return Err(SyntaxError::new("f-string: expecting '}'", line, col));
            }
            i += 1;

            if !literal.is_empty() {
                parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
            }
            let offset = col + start as u32;
            let tokens = tokenize_embedded(&expr_text, line, offset)?;
            let mut sub = Parser::new(tokens, self.depth);
            let value = sub.testlist_star()?;
            sub.expect_end()?;
            parts.push(FStringPart::Field {
                value: Box::new(value),
                conversion,
                spec,
            });
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }
}

fn merge_literals(parts: Vec<FStringPart>) -> Vec<FStringPart> {
    let mut merged: Vec<FStringPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(FStringPart::Literal(prev)), FStringPart::Literal(next)) => prev.push_str(&next),
            (_, part) => merged.push(part),
        }
    }
    merged
}

fn collect_declarations(body: &[Stmt], globals: &mut BTreeSet<String>, nonlocals: &mut BTreeSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => nonlocals.extend(names.iter().cloned()),
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => {
                collect_declarations(body, globals, nonlocals);
                collect_declarations(orelse, globals, nonlocals);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_declarations(body, globals, nonlocals);
                for handler in handlers {
                    collect_declarations(&handler.body, globals, nonlocals);
                }
                collect_declarations(orelse, globals, nonlocals);
                collect_declarations(finalbody, globals, nonlocals);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stmt(source: &str) -> StmtKind {
        parse_module(source).unwrap().body.remove(0).kind
    }

    fn expr(source: &str) -> ExprKind {
        parse_expression(source).unwrap().kind
    }

    #[test]
    fn test_precedence() {
        let ExprKind::BinOp { op, right, .. } = expr("1 + 2 * 3") else {
            panic!("expected binop");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_power_is_right_associative() {
        let ExprKind::BinOp { right, .. } = expr("2 ** 3 ** 2") else {
            panic!("expected binop");
        };
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
    }

    #[test]
    fn test_chained_comparison() {
        let ExprKind::Compare { ops, .. } = expr("a < b <= c not in d is not e") else {
            panic!("expected compare");
        };
        assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::NotIn, CmpOp::IsNot]);
    }

    #[test]
    fn test_function_definition() {
        let source = "def f(a, b=2, *args, c, **kw) -> int:\n    global g\n    return a\n";
        let StmtKind::FunctionDef(def) = first_stmt(source) else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.args.len(), 2);
        assert_eq!(def.params.vararg.as_ref().unwrap().name, "args");
        assert_eq!(def.params.kwonly[0].name, "c");
        assert_eq!(def.params.kwarg.as_ref().unwrap().name, "kw");
        assert!(def.globals.contains("g"));
    }

    #[test]
    fn test_class_with_base() {
        let StmtKind::ClassDef(def) = first_stmt("class A(B):\n    x = 1\n") else {
            panic!("expected class");
        };
        assert_eq!(def.bases.len(), 1);
        assert_eq!(def.body.len(), 1);
    }

    #[test]
    fn test_import_forms() {
        let StmtKind::Import(names) = first_stmt("import os.path as p, sys") else {
            panic!("expected import");
        };
        assert_eq!(names[0].name, "os.path");
        assert_eq!(names[0].asname.as_deref(), Some("p"));

        let StmtKind::ImportFrom { module, level, .. } = first_stmt("from .. import x") else {
            panic!("expected from-import");
        };
        assert_eq!(module, None);
        assert_eq!(level, 2);
    }

    #[test]
    fn test_unpacking_assignment() {
        let StmtKind::Assign { targets, .. } = first_stmt("a, *b = c = [1, 2, 3]") else {
            panic!("expected assign");
        };
        assert_eq!(targets.len(), 2);
        assert!(matches!(targets[0].kind, ExprKind::Tuple(_)));
    }

    #[test]
    fn test_comprehensions() {
        assert!(matches!(expr("[x for x in y if x]"), ExprKind::ListComp { .. }));
        assert!(matches!(expr("{k: v for k, v in y}"), ExprKind::DictComp { .. }));
        assert!(matches!(expr("{x for x in y}"), ExprKind::SetComp { .. }));
        let ExprKind::Call { args, .. } = expr("sum(x for x in y)") else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Arg::Positional(Expr { kind: ExprKind::GeneratorExp { .. }, .. })));
    }

    #[test]
    fn test_conditional_expression_inside_comprehension() {
        let ExprKind::ListComp { elt, generators } = expr("[a if a else b for a in c if a]") else {
            panic!("expected listcomp");
        };
        assert!(matches!(elt.kind, ExprKind::IfExp { .. }));
        assert_eq!(generators[0].ifs.len(), 1);
    }

    #[test]
    fn test_slices() {
        let ExprKind::Subscript { index, .. } = expr("a[1:2:3]") else {
            panic!("expected subscript");
        };
        assert!(matches!(index.kind, ExprKind::Slice { .. }));
        let ExprKind::Subscript { index, .. } = expr("a[::-1]") else {
            panic!("expected subscript");
        };
        let ExprKind::Slice { lower, upper, step } = index.kind else {
            panic!("expected slice");
        };
        assert!(lower.is_none() && upper.is_none() && step.is_some());
    }

    #[test]
    fn test_fstring_fields() {
        let ExprKind::JoinedStr(parts) = expr("f'x={x!r:>{w}} {{y}}'") else {
            panic!("expected joined string");
        };
        assert_eq!(parts[0], FStringPart::Literal("x=".into()));
        let FStringPart::Field { conversion, spec, .. } = &parts[1] else {
            panic!("expected field");
        };
        assert_eq!(*conversion, Some('r'));
        assert_eq!(spec.len(), 2);
        assert_eq!(parts[2], FStringPart::Literal(" {y}".into()));
    }

    #[test]
    fn test_fstring_call_keeps_position() {
        let ExprKind::JoinedStr(parts) = expr("f'{eval(s)}'") else {
            panic!("expected joined string");
        };
        let FStringPart::Field { value, .. } = &parts[0] else {
            panic!("expected field");
        };
        assert!(matches!(value.kind, ExprKind::Call { .. }));
        assert_eq!(value.line, 1);
        assert_eq!(value.col, 3);
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(
            expr("-9223372036854775807"),
            ExprKind::Constant(Constant::Int(-9223372036854775807))
        );
    }

    #[test]
    fn test_unsupported_statements() {
        for source in ["with open('f') as f:\n    pass\n", "async def f():\n    pass\n"] {
            let err = parse_module(source).unwrap_err();
            assert!(err.message.contains("not supported"), "{}", err.message);
        }
        let err = parse_module("def f():\n    yield 1\n").unwrap_err();
        assert!(err.message.contains("'yield'"));
        let err = parse_module("(y := 1)").unwrap_err();
        assert!(err.message.contains("assignment expressions"));
    }

    #[test]
    fn test_annotations_are_parsed() {
        let StmtKind::AnnAssign { value, .. } = first_stmt("x: int = 5") else {
            panic!("expected annotated assignment");
        };
        assert!(value.is_some());
    }

    #[test]
    fn test_misplaced_control_flow() {
        assert!(parse_module("return 1").is_err());
        assert!(parse_module("break").is_err());
        assert!(parse_module("def f():\n    for x in y:\n        pass\n    break\n").is_err());
        assert!(parse_module("nonlocal x").is_err());
    }

    #[test]
    fn test_invalid_targets() {
        let err = parse_module("f() = 1").unwrap_err();
        assert_eq!(err.message, "cannot assign to function call");
        assert!(parse_module("1 += 2").is_err());
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse_module("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.line, 2);
        let err = parse_module("x = = 1").unwrap_err();
        assert_eq!((err.line, err.column), (1, 4));
    }

    /// Parse on a thread sized like the ones that parse in production
    fn parse_on_large_stack(source: String) -> Result<(), SyntaxError> {
        std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(move || parse_module(&source).map(drop))
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_on_large_stack(source).unwrap_err();
        assert!(err.message.contains("nested too deeply"));

        let chain = format!("x = 1{}", " + 1".repeat(1000));
        assert!(parse_on_large_stack(chain).is_err());

        let attrs = format!("x = a{}", ".b".repeat(1000));
        assert!(parse_on_large_stack(attrs).is_err());
    }

    #[test]
    fn test_moderate_chains_parse() {
        let chain = format!("x = 1{}", " + 1".repeat(100));
        assert!(parse_module(&chain).is_ok());
    }

    #[test]
    fn test_decorators_and_lambda() {
        let StmtKind::FunctionDef(def) = first_stmt("@dec(1)\n@other\ndef f():\n    pass\n") else {
            panic!("expected def");
        };
        assert_eq!(def.decorators.len(), 2);
        assert!(matches!(expr("lambda x, y=1: x + y"), ExprKind::Lambda(_)));
    }

    #[test]
    fn test_try_statement() {
        let source = "try:\n    x\nexcept (KeyError, ValueError) as e:\n    pass\nexcept:\n    pass\nelse:\n    y\nfinally:\n    z\n";
        let StmtKind::Try { handlers, orelse, finalbody, .. } = first_stmt(source) else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(orelse.len(), 1);
        assert_eq!(finalbody.len(), 1);
    }
}
