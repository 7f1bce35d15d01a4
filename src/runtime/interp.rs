//! Tree-walking interpreter.
//!
//! Statements run against a chain of [`Scope`]s. Control flow that leaves a
//! block early (`break`, `continue`, `return`) travels as [`Flow`]; raised
//! exceptions travel as the `Err` side of [`RResult`] and pick up a
//! traceback snapshot at the innermost statement they escape from.

use crate::config::types::{Limits, Violation};
use crate::lang::ast::*;
use crate::lang::{parse_expression, parse_module, SyntaxError};
use crate::runtime::builtins;
use crate::runtime::error::*;
use crate::runtime::import::{HostImporter, ImportHook};
use crate::runtime::methods;
use crate::runtime::scope::{Scope, ScopeKind};
use crate::runtime::value::*;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::rc::Rc;

/// Depth bound for native recursion (repr, equality, json encoding)
pub const NATIVE_DEPTH_LIMIT: usize = 1000;

/// Ceilings enforced by the interpreter itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub max_recursion_depth: usize,
    pub max_sequence_len: usize,
}

impl From<&Limits> for RuntimeLimits {
    fn from(limits: &Limits) -> Self {
        Self {
            max_recursion_depth: limits.max_recursion_depth,
            max_sequence_len: limits.max_sequence_len,
        }
    }
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self::from(&crate::config::presets::standard_limits())
    }
}

/// Block exit
#[derive(Debug)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub(crate) struct ActiveFrame {
    pub name: Rc<str>,
    pub file: &'static str,
    pub line: u32,
    pub col: u32,
    pub scope: Option<Rc<Scope>>,
    pub function: Option<Rc<Function>>,
    pub receiver: Option<Value>,
}

pub struct Interpreter {
    builtins: IndexMap<String, Value>,
    globals: Rc<Scope>,
    limits: RuntimeLimits,
    pub(crate) frames: Vec<ActiveFrame>,
    call_depth: usize,
    pub(crate) native_depth: usize,
    importer: Rc<dyn ImportHook>,
    modules: HashMap<String, Value>,
    attribute_guard: BTreeSet<String>,
    stdout: Box<dyn Write>,
    exc_classes: HashMap<ExcKind, Rc<Class>>,
    object_class: Rc<Class>,
    security_events: Vec<Violation>,
    handling: Vec<Box<Exception>>,
    pub(crate) repr_guard: Vec<usize>,
}

impl Interpreter {
    /// An interpreter with the full host builtin table and host importer
    pub fn new(limits: RuntimeLimits, stdout: Box<dyn Write>) -> Self {
        let globals = Scope::module();
        globals.assign("__name__", Value::str("__main__"));
        let mut interp = Self {
            builtins: IndexMap::new(),
            globals,
            limits,
            frames: Vec::new(),
            call_depth: 0,
            native_depth: 0,
            importer: Rc::new(HostImporter),
            modules: HashMap::new(),
            attribute_guard: BTreeSet::new(),
            stdout,
            exc_classes: HashMap::new(),
            object_class: Rc::new(Class::new("object", None)),
            security_events: Vec::new(),
            handling: Vec::new(),
            repr_guard: Vec::new(),
        };
        interp.exc_classes = builtins::exception_classes();
        interp.builtins = builtins::host_namespace(&interp);
        interp
    }

    pub fn limits(&self) -> RuntimeLimits {
        self.limits
    }

    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.builtins.keys().map(String::as_str)
    }

    pub fn builtin(&self, name: &str) -> Option<&Value> {
        self.builtins.get(name)
    }

    /// Replace the base namespace
    pub fn set_builtins(&mut self, builtins: IndexMap<String, Value>) {
        self.builtins = builtins;
    }

    pub fn take_builtins(&mut self) -> IndexMap<String, Value> {
        std::mem::take(&mut self.builtins)
    }

    pub fn set_importer(&mut self, importer: Rc<dyn ImportHook>) {
        self.importer = importer;
        self.modules.clear();
    }

    /// Attribute names rejected at run time
    pub fn set_attribute_guard(&mut self, names: BTreeSet<String>) {
        self.attribute_guard = names;
    }

    pub fn globals(&self) -> &Rc<Scope> {
        &self.globals
    }

    pub fn exc_class(&self, kind: ExcKind) -> Rc<Class> {
        match self.exc_classes.get(&kind) {
            Some(class) => class.clone(),
            None => Rc::new(Class {
                exception: Some(kind),
                ..Class::new(kind.name(), None)
            }),
        }
    }

    pub(crate) fn object_class(&self) -> Rc<Class> {
        self.object_class.clone()
    }

    /// Run-time security events recorded so far, caught or not
    pub fn take_security_events(&mut self) -> Vec<Violation> {
        std::mem::take(&mut self.security_events)
    }

    /// A trapped operation happened; from here on no handler or `finally`
    /// block runs and the exception unwinds to the top
    pub fn breached(&self) -> bool {
        !self.security_events.is_empty()
    }

    /// Record a trapped operation and build the `SecurityError` to raise
    pub fn security_violation(&mut self, message: impl Into<String>) -> Box<Exception> {
        let message = message.into();
        let (line, col) = self
            .frames
            .iter()
            .rev()
            .find(|frame| frame.file != SANDBOX_FILE)
            .map(|frame| (frame.line, frame.col))
            .unwrap_or((1, 0));
        self.security_events
            .push(Violation::new(line, col, message.clone()));
        Exception::new(ExcKind::SecurityError, message)
    }

    /// Raise `MemoryError` before materializing more than the sequence ceiling
    pub fn check_len(&self, len: usize) -> RResult<()> {
        if len > self.limits.max_sequence_len {
            return memory_error(format!(
                "sequence of length {} exceeds the limit of {}",
                len, self.limits.max_sequence_len
            ));
        }
        Ok(())
    }

    pub fn write_stdout(&mut self, text: &str) {
        // A vanished reader only loses output; the run itself continues
        let _ = self.stdout.write_all(text.as_bytes());
        let _ = self.stdout.flush();
    }

    // ---- entry points ----

    /// Execute a module body as the submitted snippet
    pub fn run(&mut self, source: &str) -> RResult<()> {
        let module = parse_module(source).map_err(|err| syntax_exception(&err, SNIPPET_FILE))?;
        let globals = self.globals.clone();
        self.frames.push(ActiveFrame {
            name: Rc::from("<module>"),
            file: SNIPPET_FILE,
            line: 1,
            col: 0,
            scope: Some(globals.clone()),
            function: None,
            receiver: None,
        });
        let result = self.exec_body(&module.body, &globals);
        self.frames.pop();
        result.map(|_| ())
    }

    /// Scope of the innermost frame that is running source code
    pub(crate) fn caller_scope(&self) -> Rc<Scope> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.scope.clone())
            .unwrap_or_else(|| self.globals.clone())
    }

    /// `eval` of an expression string in the caller's scope
    pub fn eval_string(&mut self, source: &str) -> RResult<Value> {
        let expr = parse_expression(source).map_err(|err| syntax_exception(&err, STRING_FILE))?;
        let scope = self.caller_scope();
        self.push_frame("<module>", STRING_FILE, Some(scope.clone()), None, None);
        let result = self.eval(&expr, &scope);
        self.frames.pop();
        result
    }

    /// `exec` of a module string in the caller's scope
    pub fn exec_string(&mut self, source: &str) -> RResult<()> {
        let module = parse_module(source).map_err(|err| syntax_exception(&err, STRING_FILE))?;
        let scope = self.caller_scope();
        self.push_frame("<module>", STRING_FILE, Some(scope.clone()), None, None);
        let result = self.exec_body(&module.body, &scope);
        self.frames.pop();
        result.map(|_| ())
    }

    fn push_frame(
        &mut self,
        name: &str,
        file: &'static str,
        scope: Option<Rc<Scope>>,
        function: Option<Rc<Function>>,
        receiver: Option<Value>,
    ) {
        let (line, col) = match &function {
            Some(func) => (func.def.line, func.def.col),
            None => (0, 0),
        };
        self.frames.push(ActiveFrame {
            name: Rc::from(name),
            file,
            line,
            col,
            scope,
            function,
            receiver,
        });
    }

    fn snapshot(&self) -> Vec<Frame> {
        self.frames
            .iter()
            .map(|frame| Frame {
                name: frame.name.clone(),
                file: frame.file,
                line: frame.line,
            })
            .collect()
    }

    // ---- exceptions ----

    /// Bind an exception to a value, materializing native payloads
    pub fn exception_value(&mut self, exc: &mut Exception) -> Value {
        let native = match &exc.payload {
            Payload::Native { kind, message } => Some((*kind, message.clone())),
            Payload::Instance(_) => None,
        };
        if let Some((kind, message)) = native {
            let instance = Rc::new(Instance::new(self.exc_class(kind)));
            let args = if message.is_empty() {
                Vec::new()
            } else {
                vec![Value::str(&message)]
            };
            instance
                .attrs
                .borrow_mut()
                .insert("args".to_string(), Value::tuple(args));
            exc.payload = Payload::Instance(instance);
        }
        match &exc.payload {
            Payload::Instance(instance) => Value::Instance(instance.clone()),
            Payload::Native { .. } => Value::None,
        }
    }

    /// Text after the class name in a traceback summary
    pub fn exception_message(&mut self, exc: &Exception) -> String {
        match &exc.payload {
            Payload::Native { message, .. } => message.clone(),
            Payload::Instance(instance) => self
                .to_str(&Value::Instance(instance.clone()))
                .unwrap_or_else(|_| "<exception str() failed>".to_string()),
        }
    }

    pub fn exception_summary(&mut self, exc: &Exception) -> String {
        let message = self.exception_message(exc);
        if message.is_empty() {
            exc.class_name()
        } else {
            format!("{}: {}", exc.class_name(), message)
        }
    }

    /// Full traceback text with sandbox frames removed
    pub fn format_exception(&mut self, exc: &Exception) -> String {
        let mut out = String::new();
        if let Some(cause) = &exc.cause {
            out.push_str(&self.format_exception(cause));
            out.push_str(
                "\nThe above exception was the direct cause of the following exception:\n\n",
            );
        }
        let summary = self.exception_summary(exc);
        out.push_str(&render_traceback(&exc.traceback, &summary));
        out
    }

    fn make_exception(&mut self, value: Value) -> RResult<Box<Exception>> {
        match value {
            Value::Class(class) if class.builtin_exception().is_some() => {
                let instance = self.instantiate(&class, Args::default())?;
                self.make_exception(instance)
            }
            Value::Instance(instance) if instance.class.builtin_exception().is_some() => {
                Ok(Exception::from_instance(instance))
            }
            _ => type_error("exceptions must derive from BaseException"),
        }
    }

    fn exception_matches(&mut self, exc: &Exception, handler: &Value) -> RResult<bool> {
        match handler {
            Value::Class(class) if class.builtin_exception().is_some() => Ok(match &exc.payload {
                Payload::Native { kind, .. } => class
                    .exception
                    .is_some_and(|target| kind.is_subclass_of(target)),
                Payload::Instance(instance) => instance.class.is_subclass_of(class),
            }),
            Value::Tuple(items) => {
                for item in items.iter() {
                    if self.exception_matches(exc, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => type_error("catching classes that do not inherit from BaseException is not allowed"),
        }
    }

    // ---- imports ----

    pub fn import_module(&mut self, name: &str, level: u32) -> RResult<Value> {
        if level == 0 {
            if let Some(module) = self.modules.get(name) {
                return Ok(module.clone());
            }
        }
        let importer = self.importer.clone();
        let native = importer.load(self, name, level)?;
        let module = Value::Module(Rc::new(crate::runtime::value::Module::new(native.name(), native.members())));
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    // ---- statements ----

    pub(crate) fn exec_body(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> RResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> RResult<Flow> {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = stmt.line;
            frame.col = stmt.col;
        }
        self.exec_stmt_inner(stmt, scope).map_err(|mut exc| {
            if exc.traceback.is_empty() {
                exc.traceback = self.snapshot();
            }
            exc
        })
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> RResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, scope)?,
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval(value, scope)?;
                    self.assign(target, value, scope)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval_truthy(test, scope)? { body } else { orelse };
                return self.exec_body(branch, scope);
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval_truthy(test, scope)? {
                    match self.exec_body(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                return self.exec_body(orelse, scope);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                let cursor = self.iterate(&iterable)?;
                while let Some(item) = self.next_item(&cursor)? {
                    self.assign(target, item, scope)?;
                    match self.exec_body(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                return self.exec_body(orelse, scope);
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::FunctionDef(def) => {
                let mut value = self.make_function(def, scope)?;
                for decorator in def.decorators.iter().rev() {
                    let decorator = self.eval(decorator, scope)?;
                    value = self.call(&decorator, Args::new(vec![value]))?;
                }
                scope.assign(&def.name, value);
            }
            StmtKind::ClassDef(def) => self.exec_class(def, scope)?,
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import_module(&alias.name, 0)?;
                    match &alias.asname {
                        Some(asname) => scope.assign(asname, module),
                        None => {
                            let top = alias.name.split('.').next().unwrap_or(&alias.name);
                            let top_module = if top == alias.name {
                                module
                            } else {
                                self.import_module(top, 0)?
                            };
                            scope.assign(top, top_module);
                        }
                    }
                }
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                let name = module.clone().unwrap_or_default();
                let module = self.import_module(&name, *level)?;
                let Value::Module(module) = module else {
                    return import_error(format!("cannot import from '{}'", name));
                };
                for alias in names {
                    if alias.name == "*" {
                        let members: Vec<(String, Value)> = module
                            .attrs
                            .borrow()
                            .iter()
                            .filter(|(key, _)| !key.starts_with('_'))
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect();
                        for (key, value) in members {
                            scope.assign(&key, value);
                        }
                        continue;
                    }
                    let value = module.attrs.borrow().get(&alias.name).cloned();
                    let Some(value) = value else {
                        return import_error(format!(
                            "cannot import name '{}' from '{}'",
                            alias.name, module.name
                        ));
                    };
                    scope.assign(alias.asname.as_ref().unwrap_or(&alias.name), value);
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval_truthy(test, scope)? {
                    let message = match msg {
                        Some(msg) => {
                            let value = self.eval(msg, scope)?;
                            self.to_str(&value)?
                        }
                        None => String::new(),
                    };
                    return Err(Exception::new(ExcKind::AssertionError, message));
                }
            }
            StmtKind::Raise { exc, cause } => {
                let Some(exc) = exc else {
                    return match self.handling.last() {
                        Some(active) => Err(active.clone()),
                        None => runtime_error("No active exception to reraise"),
                    };
                };
                let value = self.eval(exc, scope)?;
                let mut exception = self.make_exception(value)?;
                if let Some(cause) = cause {
                    let cause = self.eval(cause, scope)?;
                    if !cause.is_none() {
                        exception.cause = Some(self.make_exception(cause)?);
                    }
                }
                return Err(exception);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let outcome = match self.exec_body(body, scope) {
                    Ok(Flow::Normal) => self.exec_body(orelse, scope),
                    Ok(flow) => Ok(flow),
                    Err(exc) => self.handle_exception(exc, handlers, scope),
                };
                if finalbody.is_empty() || (outcome.is_err() && self.breached()) {
                    return outcome;
                }
                return match self.exec_body(finalbody, scope)? {
                    Flow::Normal => outcome,
                    flow => Ok(flow),
                };
            }
        }
        Ok(Flow::Normal)
    }

    fn handle_exception(
        &mut self,
        mut exc: Box<Exception>,
        handlers: &[ExceptHandler],
        scope: &Rc<Scope>,
    ) -> RResult<Flow> {
        if self.breached() {
            return Err(exc);
        }
        for handler in handlers {
            let matched = match &handler.typ {
                None => true,
                Some(typ) => {
                    let typ = self.eval(typ, scope)?;
                    self.exception_matches(&exc, &typ)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                let value = self.exception_value(&mut exc);
                scope.assign(name, value);
            }
            self.handling.push(exc);
            let result = self.exec_body(&handler.body, scope);
            self.handling.pop();
            if let Some(name) = &handler.name {
                scope.delete(name);
            }
            return result;
        }
        Err(exc)
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, scope: &Rc<Scope>) -> RResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load_name(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                scope.assign(name, result);
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                let current = self.get_attr(&object, attr)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.set_attr(&object, attr, result)?;
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.set_item(&object, &index, result)?;
            }
            _ => return Err(Exception::new(ExcKind::SyntaxError, "illegal expression for augmented assignment")),
        }
        Ok(())
    }

    fn exec_class(&mut self, def: &Rc<ClassDef>, scope: &Rc<Scope>) -> RResult<()> {
        let mut bases = Vec::new();
        for base in &def.bases {
            bases.push(self.eval(base, scope)?);
        }
        if bases.len() > 1 {
            return type_error("multiple inheritance is not supported");
        }
        let base = match bases.pop() {
            None | Some(Value::Type(TypeKind::Object)) => None,
            Some(Value::Class(class)) => Some(class),
            Some(Value::Type(kind)) => {
                return type_error(format!("subclassing '{}' is not supported", kind.name()))
            }
            Some(other) => {
                return type_error(format!(
                    "class base must be a class, not '{}'",
                    other.type_name()
                ))
            }
        };

        let body_scope = Scope::child(scope, ScopeKind::Class, None);
        self.push_frame(&def.name, self.current_file(), Some(body_scope.clone()), None, None);
        let result = self.exec_body(&def.body, &body_scope);
        self.frames.pop();
        result?;

        let class = Rc::new(Class::new(def.name.clone(), base));
        {
            let mut attrs = class.attrs.borrow_mut();
            let mut names: Vec<(String, Value)> = body_scope.vars.borrow_mut().drain().collect();
            names.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, value) in names {
                if let Value::Function(func) = &value {
                    *func.owner.borrow_mut() = Some(Rc::downgrade(&class));
                }
                attrs.insert(name, value);
            }
        }
        let mut value = Value::Class(class);
        for decorator in def.decorators.iter().rev() {
            let decorator = self.eval(decorator, scope)?;
            value = self.call(&decorator, Args::new(vec![value]))?;
        }
        scope.assign(&def.name, value);
        Ok(())
    }

    fn current_file(&self) -> &'static str {
        self.frames
            .iter()
            .rev()
            .map(|frame| frame.file)
            .find(|file| *file != SANDBOX_FILE)
            .unwrap_or(SNIPPET_FILE)
    }

    // ---- binding ----

    pub(crate) fn load_name(&self, name: &str, scope: &Rc<Scope>) -> RResult<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        match self.builtins.get(name) {
            Some(value) => Ok(value.clone()),
            None => name_error(format!("name '{}' is not defined", name)),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> RResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                scope.assign(name, value);
                Ok(())
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                self.set_attr(&object, attr, value)
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                self.set_item(&object, &index, value)
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                self.unpack(targets, value, scope)
            }
            _ => Err(Exception::new(ExcKind::SyntaxError, "cannot assign to expression")),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value, scope: &Rc<Scope>) -> RResult<()> {
        let items = self.collect(&value)?;
        let star = targets
            .iter()
            .position(|t| matches!(t.kind, ExprKind::Starred(_)));
        match star {
            None => {
                if items.len() < targets.len() {
                    return value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ));
                }
                if items.len() > targets.len() {
                    return value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        targets.len() - 1,
                        items.len()
                    ));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                if let ExprKind::Starred(inner) = &targets[star].kind {
                    self.assign(inner, Value::list(middle), scope)?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item, scope)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr, scope: &Rc<Scope>) -> RResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if scope.delete(name) {
                    Ok(())
                } else {
                    name_error(format!("name '{}' is not defined", name))
                }
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, scope)?;
                self.del_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value, scope)?;
                let index = self.eval(index, scope)?;
                self.del_item(&object, &index)
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
                Ok(())
            }
            _ => Err(Exception::new(ExcKind::SyntaxError, "cannot delete expression")),
        }
    }

    // ---- expressions ----

    fn eval_truthy(&mut self, expr: &Expr, scope: &Rc<Scope>) -> RResult<bool> {
        let value = self.eval(expr, scope)?;
        self.truthy(&value)
    }

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> RResult<Value> {
        match &expr.kind {
            ExprKind::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::Str(s.clone()),
                Constant::Bytes(b) => Value::Bytes(b.clone()),
                Constant::Ellipsis => Value::Ellipsis,
            }),
            ExprKind::JoinedStr(parts) => {
                let text = self.eval_fstring(parts, scope)?;
                Ok(Value::str(text))
            }
            ExprKind::Name(name) => self.load_name(name, scope),
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, scope)?;
                self.get_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value, scope)?;
                let index = self.eval(index, scope)?;
                self.get_item(&object, &index)
            }
            ExprKind::Slice { lower, upper, step } => {
                let mut bound = |part: &Option<Box<Expr>>| -> RResult<Option<i64>> {
                    match part {
                        None => Ok(None),
                        Some(expr) => match self.eval(expr, scope)? {
                            Value::None => Ok(None),
                            value => match value.as_int() {
                                Some(i) => Ok(Some(i)),
                                None => type_error(
                                    "slice indices must be integers or None or have an __index__ method",
                                ),
                            },
                        },
                    }
                };
                let slice = SliceValue {
                    lower: bound(lower)?,
                    upper: bound(upper)?,
                    step: bound(step)?,
                };
                Ok(Value::Slice(Rc::new(slice)))
            }
            ExprKind::Call { func, args } => {
                let callee = self.eval(func, scope)?;
                let args = self.eval_args(args, scope)?;
                self.call(&callee, args)
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary_op(*op, &left, &right)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand, scope)?;
                self.unary_op(*op, &operand)
            }
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::None;
                for (index, expr) in values.iter().enumerate() {
                    result = self.eval(expr, scope)?;
                    if index + 1 == values.len() {
                        break;
                    }
                    let truthy = self.truthy(&result)?;
                    match op {
                        BoolOp::And if !truthy => break,
                        BoolOp::Or if truthy => break,
                        _ => {}
                    }
                }
                Ok(result)
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut current = self.eval(left, scope)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let next = self.eval(comparator, scope)?;
                    if !self.compare(*op, &current, &next)? {
                        return Ok(Value::Bool(false));
                    }
                    current = next;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval_truthy(test, scope)? {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def, scope),
            ExprKind::List(items) => {
                let items = self.eval_items(items, scope)?;
                Ok(Value::list(items))
            }
            ExprKind::Tuple(items) => {
                let items = self.eval_items(items, scope)?;
                Ok(Value::tuple(items))
            }
            ExprKind::Set(items) => {
                let items = self.eval_items(items, scope)?;
                let mut set = Set::new();
                for item in items {
                    set.insert(item.hash_key()?, item);
                }
                Ok(Value::set(set))
            }
            ExprKind::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    match key {
                        Some(key) => {
                            let key = self.eval(key, scope)?;
                            let value = self.eval(value, scope)?;
                            dict.insert(key.hash_key()?, key, value);
                        }
                        None => {
                            let mapping = self.eval(value, scope)?;
                            let Value::Dict(source) = mapping else {
                                return type_error(format!(
                                    "'{}' object is not a mapping",
                                    mapping.type_name()
                                ));
                            };
                            for (key, value) in source.borrow().items() {
                                dict.insert(key.hash_key()?, key, value);
                            }
                        }
                    }
                }
                Ok(Value::dict(dict))
            }
            ExprKind::Starred(_) => Err(Exception::new(
                ExcKind::SyntaxError,
                "can't use starred expression here",
            )),
            ExprKind::ListComp { elt, generators } | ExprKind::GeneratorExp { elt, generators } => {
                let comp_scope = Scope::child(scope, ScopeKind::Function, None);
                let mut items = Vec::new();
                self.run_generators(generators, &comp_scope, &mut |interp: &mut Interpreter, scope: &Rc<Scope>| {
                    let value = interp.eval(elt, scope)?;
                    interp.check_len(items.len() + 1)?;
                    items.push(value);
                    Ok(())
                })?;
                Ok(match &expr.kind {
                    ExprKind::GeneratorExp { .. } => Value::iterator(items),
                    _ => Value::list(items),
                })
            }
            ExprKind::SetComp { elt, generators } => {
                let comp_scope = Scope::child(scope, ScopeKind::Function, None);
                let mut set = Set::new();
                self.run_generators(generators, &comp_scope, &mut |interp: &mut Interpreter, scope: &Rc<Scope>| {
                    let value = interp.eval(elt, scope)?;
                    interp.check_len(set.len() + 1)?;
                    set.insert(value.hash_key()?, value);
                    Ok(())
                })?;
                Ok(Value::set(set))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let comp_scope = Scope::child(scope, ScopeKind::Function, None);
                let mut dict = Dict::new();
                self.run_generators(generators, &comp_scope, &mut |interp: &mut Interpreter, scope: &Rc<Scope>| {
                    let k = interp.eval(key, scope)?;
                    let v = interp.eval(value, scope)?;
                    interp.check_len(dict.len() + 1)?;
                    dict.insert(k.hash_key()?, k, v);
                    Ok(())
                })?;
                Ok(Value::dict(dict))
            }
        }
    }

    fn run_generators(
        &mut self,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
        emit: &mut dyn FnMut(&mut Interpreter, &Rc<Scope>) -> RResult<()>,
    ) -> RResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self, scope);
        };
        let iterable = self.eval(&first.iter, scope)?;
        let cursor = self.iterate(&iterable)?;
        'items: while let Some(item) = self.next_item(&cursor)? {
            self.assign(&first.target, item, scope)?;
            for condition in &first.ifs {
                if !self.eval_truthy(condition, scope)? {
                    continue 'items;
                }
            }
            self.run_generators(rest, scope, emit)?;
        }
        Ok(())
    }

    fn eval_items(&mut self, items: &[Expr], scope: &Rc<Scope>) -> RResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => {
                    let value = self.eval(inner, scope)?;
                    let values = self.collect(&value)?;
                    self.check_len(out.len() + values.len())?;
                    out.extend(values);
                }
                _ => out.push(self.eval(item, scope)?),
            }
        }
        Ok(out)
    }

    fn eval_fstring(&mut self, parts: &[FStringPart], scope: &Rc<Scope>) -> RResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    value,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(value, scope)?;
                    let value = match conversion {
                        Some('r') => Value::str(self.repr(&value)?),
                        Some('a') => Value::str(crate::runtime::format::ascii(&self.repr(&value)?)),
                        Some(_) => Value::str(self.to_str(&value)?),
                        None => value,
                    };
                    let spec = self.eval_fstring(spec, scope)?;
                    out.push_str(&self.format_value(&value, &spec)?);
                }
            }
            self.check_len(out.len())?;
        }
        Ok(out)
    }

    fn eval_args(&mut self, args: &[Arg], scope: &Rc<Scope>) -> RResult<Args> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => out.positional.push(self.eval(expr, scope)?),
                Arg::Starred(expr) => {
                    let value = self.eval(expr, scope)?;
                    let items = self.collect(&value)?;
                    out.positional.extend(items);
                }
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr, scope)?;
                    out.keywords.push((name.clone(), value));
                }
                Arg::DoubleStarred(expr) => {
                    let mapping = self.eval(expr, scope)?;
                    let Value::Dict(dict) = &mapping else {
                        return type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            mapping.type_name()
                        ));
                    };
                    for (key, value) in dict.borrow().items() {
                        let Value::Str(key) = key else {
                            return type_error("keywords must be strings");
                        };
                        if out.keywords.iter().any(|(k, _)| **k == *key) {
                            return type_error(format!(
                                "got multiple values for keyword argument '{}'",
                                key
                            ));
                        }
                        out.keywords.push((key.to_string(), value));
                    }
                }
            }
        }
        Ok(out)
    }

    // ---- functions and calls ----

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> RResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.args.len());
        for param in &def.params.args {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(def.params.kwonly.len());
        for param in &def.params.kwonly {
            kw_defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            kw_defaults,
            closure: scope.closure_target(),
            file: self.current_file(),
            owner: RefCell::new(None),
            attrs: RefCell::new(IndexMap::new()),
        })))
    }

    pub fn call(&mut self, callee: &Value, args: Args) -> RResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, args),
            Value::Native(native) => {
                self.push_frame(&native.name, SANDBOX_FILE, None, None, None);
                let result = (native.func)(self, args);
                self.frames.pop();
                result
            }
            Value::Method(method) => match &method.method {
                Method::Builtin(name) => {
                    self.push_frame(name, SANDBOX_FILE, None, None, None);
                    let result = match &method.receiver {
                        Value::Object(object) => object.call_method(self, name, args),
                        receiver => methods::call_method(self, receiver, name, args),
                    };
                    self.frames.pop();
                    result
                }
                Method::User(func) => {
                    let mut args = args;
                    args.positional.insert(0, method.receiver.clone());
                    self.call(func, args)
                }
            },
            Value::Class(class) => self.instantiate(class, args),
            Value::Type(kind) => {
                self.push_frame(kind.name(), SANDBOX_FILE, None, None, None);
                let result = builtins::construct(self, *kind, args);
                self.frames.pop();
                result
            }
            Value::Object(object) if object.is_callable() => {
                self.push_frame(object.type_name(), SANDBOX_FILE, None, None, None);
                let result = object.call(self, args);
                self.frames.pop();
                result
            }
            Value::Instance(instance) => match instance.class.lookup("__call__") {
                Some(func) => {
                    let mut args = args;
                    args.positional.insert(0, callee.clone());
                    self.call(&func, args)
                }
                None => type_error(format!("'{}' object is not callable", instance.class.name)),
            },
            other => type_error(format!("'{}' object is not callable", other.type_name())),
        }
    }

    /// Call with positional arguments only
    pub fn call_with(&mut self, callee: &Value, positional: Vec<Value>) -> RResult<Value> {
        self.call(callee, Args::new(positional))
    }

    pub fn is_callable(&self, value: &Value) -> bool {
        match value {
            Value::Function(_)
            | Value::Native(_)
            | Value::Method(_)
            | Value::Class(_)
            | Value::Type(_) => true,
            Value::Object(object) => object.is_callable(),
            Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
            _ => false,
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: Args) -> RResult<Value> {
        if self.call_depth >= self.limits.max_recursion_depth {
            return recursion_error("maximum recursion depth exceeded");
        }
        let scope = Scope::child(&func.closure, ScopeKind::Function, Some(func.def.clone()));
        let receiver = args.positional.first().cloned();
        self.bind_params(func, args, &scope)?;

        self.push_frame(&func.def.name, func.file, Some(scope.clone()), Some(func.clone()), receiver);
        self.call_depth += 1;
        let result = self.exec_body(&func.def.body, &scope);
        self.call_depth -= 1;
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn bind_params(&mut self, func: &Rc<Function>, args: Args, scope: &Rc<Scope>) -> RResult<()> {
        let params = &func.def.params;
        let name = func.name();
        let mut vars = scope.vars.borrow_mut();
        let Args {
            positional,
            keywords,
        } = args;

        let given = positional.len();
        let mut positional = positional.into_iter();
        for param in &params.args {
            match positional.next() {
                Some(value) => {
                    vars.insert(param.name.clone(), value);
                }
                None => break,
            }
        }
        let extra: Vec<Value> = positional.collect();
        match &params.vararg {
            Some(vararg) => {
                vars.insert(vararg.name.clone(), Value::tuple(extra));
            }
            None if !extra.is_empty() => {
                return type_error(format!(
                    "{}() takes {} positional argument{} but {} were given",
                    name,
                    params.args.len(),
                    if params.args.len() == 1 { "" } else { "s" },
                    given
                ));
            }
            None => {}
        }

        let mut extra_keywords = Dict::new();
        for (key, value) in keywords {
            let is_param = params.args.iter().any(|p| p.name == key)
                || params.kwonly.iter().any(|p| p.name == key);
            if is_param {
                if vars.contains_key(&key) {
                    return type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        name, key
                    ));
                }
                vars.insert(key, value);
            } else if params.kwarg.is_some() {
                extra_keywords.set_str(&key, value);
            } else {
                return type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, key
                ));
            }
        }
        if let Some(kwarg) = &params.kwarg {
            vars.insert(kwarg.name.clone(), Value::dict(extra_keywords));
        }

        let mut missing = Vec::new();
        for (param, default) in params.args.iter().zip(&func.defaults) {
            if vars.contains_key(&param.name) {
                continue;
            }
            match default {
                Some(value) => {
                    vars.insert(param.name.clone(), value.clone());
                }
                None => missing.push(format!("'{}'", param.name)),
            }
        }
        if !missing.is_empty() {
            return type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(", ")
            ));
        }
        for (param, default) in params.kwonly.iter().zip(&func.kw_defaults) {
            if vars.contains_key(&param.name) {
                continue;
            }
            match default {
                Some(value) => {
                    vars.insert(param.name.clone(), value.clone());
                }
                None => {
                    return type_error(format!(
                        "{}() missing 1 required keyword-only argument: '{}'",
                        name, param.name
                    ))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn instantiate(&mut self, class: &Rc<Class>, args: Args) -> RResult<Value> {
        let instance = Rc::new(Instance::new(class.clone()));
        let value = Value::Instance(instance.clone());
        let is_exception = class.builtin_exception().is_some();
        if is_exception {
            instance
                .attrs
                .borrow_mut()
                .insert("args".to_string(), Value::tuple(args.positional.clone()));
        }
        match class.lookup("__init__") {
            Some(init) => {
                let mut args = args;
                args.positional.insert(0, value.clone());
                let result = self.call(&init, args)?;
                if !result.is_none() {
                    return type_error("__init__() should return None");
                }
            }
            None if !args.is_empty() && !is_exception => {
                return type_error(format!("{}() takes no arguments", class.name));
            }
            None => {}
        }
        Ok(value)
    }

    /// Call a dunder method looked up on an instance's class
    pub(crate) fn call_special(
        &mut self,
        instance: &Rc<Instance>,
        name: &str,
        mut args: Vec<Value>,
    ) -> RResult<Option<Value>> {
        let Some(method) = instance.class.lookup(name) else {
            return Ok(None);
        };
        args.insert(0, Value::Instance(instance.clone()));
        self.call(&method, Args::new(args)).map(Some)
    }

    // ---- attributes ----

    fn check_attribute(&mut self, name: &str) -> RResult<()> {
        if self.attribute_guard.contains(name) {
            return Err(self.security_violation(format!(
                "Access to attribute '{}' is not allowed",
                name
            )));
        }
        Ok(())
    }

    fn bind(receiver: &Value, value: Value) -> Value {
        match value {
            Value::Function(_) | Value::Native(_) => Value::Method(Rc::new(BoundMethod {
                receiver: receiver.clone(),
                method: Method::User(value),
            })),
            other => other,
        }
    }

    pub fn get_attr(&mut self, object: &Value, name: &str) -> RResult<Value> {
        self.check_attribute(name)?;
        if let Some(value) = self.lookup_attr(object, name)? {
            return Ok(value);
        }
        if let Value::Instance(instance) = object {
            if let Some(getattr) = instance.class.lookup("__getattr__") {
                return self.call(&getattr, Args::new(vec![object.clone(), Value::str(name)]));
            }
        }
        let owner = match object {
            Value::Module(module) => {
                return attribute_error(format!(
                    "module '{}' has no attribute '{}'",
                    module.name, name
                ))
            }
            Value::Class(class) => {
                return attribute_error(format!(
                    "type object '{}' has no attribute '{}'",
                    class.name, name
                ))
            }
            Value::Type(kind) => {
                return attribute_error(format!(
                    "type object '{}' has no attribute '{}'",
                    kind.name(),
                    name
                ))
            }
            other => other.type_name(),
        };
        attribute_error(format!("'{}' object has no attribute '{}'", owner, name))
    }

    pub fn has_attr(&mut self, object: &Value, name: &str) -> RResult<bool> {
        match self.get_attr(object, name) {
            Ok(_) => Ok(true),
            Err(exc) if exc.is(ExcKind::AttributeError) => Ok(false),
            Err(exc) => Err(exc),
        }
    }

    fn lookup_attr(&mut self, object: &Value, name: &str) -> RResult<Option<Value>> {
        let value = match object {
            Value::Instance(instance) => {
                if let Some(value) = instance.attrs.borrow().get(name) {
                    return Ok(Some(value.clone()));
                }
                match name {
                    "__class__" => Some(Value::Class(instance.class.clone())),
                    "__dict__" => {
                        let mut dict = Dict::new();
                        for (key, value) in instance.attrs.borrow().iter() {
                            dict.set_str(key, value.clone());
                        }
                        Some(Value::dict(dict))
                    }
                    _ => instance
                        .class
                        .lookup(name)
                        .map(|value| Self::bind(object, value)),
                }
            }
            Value::Class(class) => match name {
                "__name__" | "__qualname__" => Some(Value::str(&class.name)),
                "__base__" => Some(
                    class
                        .base
                        .clone()
                        .map(Value::Class)
                        .unwrap_or(Value::Type(TypeKind::Object)),
                ),
                _ => class.lookup(name),
            },
            Value::Module(module) => match name {
                "__name__" => Some(Value::str(&module.name)),
                _ => module.attrs.borrow().get(name).cloned(),
            },
            Value::Function(func) => {
                if let Some(value) = func.attrs.borrow().get(name) {
                    return Ok(Some(value.clone()));
                }
                match name {
                    "__name__" | "__qualname__" => Some(Value::str(func.name())),
                    "__module__" => Some(Value::str("__main__")),
                    "__doc__" => Some(match func.def.body.first().map(|s| &s.kind) {
                        Some(StmtKind::Expr(Expr {
                            kind: ExprKind::Constant(Constant::Str(doc)),
                            ..
                        })) => Value::Str(doc.clone()),
                        _ => Value::None,
                    }),
                    _ => None,
                }
            }
            Value::Native(native) => match name {
                "__name__" | "__qualname__" => Some(Value::Str(native.name.clone())),
                _ => None,
            },
            Value::Method(method) => match name {
                "__self__" => Some(method.receiver.clone()),
                "__func__" => match &method.method {
                    Method::User(func) => Some(func.clone()),
                    Method::Builtin(_) => None,
                },
                "__name__" => match &method.method {
                    Method::Builtin(name) => Some(Value::Str(name.clone())),
                    Method::User(func) => return self.lookup_attr(&func.clone(), "__name__"),
                },
                _ => None,
            },
            Value::Super(proxy) => {
                let found = proxy.class.base.as_ref().and_then(|base| base.lookup(name));
                match found {
                    Some(value) => Some(Self::bind(&proxy.receiver, value)),
                    None if name == "__init__" => Some(Value::native("__init__", |_, _| Ok(Value::None))),
                    None => None,
                }
            }
            Value::Object(native) => {
                if let Some(value) = native.get_attr(self, name)? {
                    return Ok(Some(value));
                }
                native.has_method(name).then(|| {
                    Value::Method(Rc::new(BoundMethod {
                        receiver: object.clone(),
                        method: Method::Builtin(Rc::from(name)),
                    }))
                })
            }
            Value::Type(kind) => builtins::type_attribute(*kind, name),
            Value::Range(range) => match name {
                "start" => Some(Value::Int(range.start)),
                "stop" => Some(Value::Int(range.stop)),
                "step" => Some(Value::Int(range.step)),
                _ => methods::has_method(object, name).then(|| builtin_method(object, name)),
            },
            Value::Int(_) | Value::Bool(_) => match name {
                "real" | "numerator" => Some(Value::Int(object.as_int().unwrap_or(0))),
                "imag" => Some(Value::Int(0)),
                "denominator" => Some(Value::Int(1)),
                _ => methods::has_method(object, name).then(|| builtin_method(object, name)),
            },
            Value::Float(f) => match name {
                "real" => Some(Value::Float(*f)),
                "imag" => Some(Value::Float(0.0)),
                _ => methods::has_method(object, name).then(|| builtin_method(object, name)),
            },
            _ => methods::has_method(object, name).then(|| builtin_method(object, name)),
        };
        Ok(value)
    }

    pub fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> RResult<()> {
        self.check_attribute(name)?;
        match object {
            Value::Instance(instance) => {
                if let Some(setattr) = instance.class.lookup("__setattr__") {
                    self.call(
                        &setattr,
                        Args::new(vec![object.clone(), Value::str(name), value]),
                    )?;
                    return Ok(());
                }
                instance.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                if let Value::Function(func) = &value {
                    *func.owner.borrow_mut() = Some(Rc::downgrade(class));
                }
                class.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Function(func) => {
                func.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Module(module) => {
                module.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Object(native) => native.set_attr(self, name, value),
            other => attribute_error(format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                name
            )),
        }
    }

    pub fn del_attr(&mut self, object: &Value, name: &str) -> RResult<()> {
        self.check_attribute(name)?;
        let removed = match object {
            Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Class(class) => class.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Function(func) => func.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Module(module) => module.attrs.borrow_mut().shift_remove(name).is_some(),
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            attribute_error(format!(
                "'{}' object has no attribute '{}'",
                object.type_name(),
                name
            ))
        }
    }

    // ---- iteration ----

    pub fn iterate(&mut self, value: &Value) -> RResult<Rc<RefCell<IterState>>> {
        let state = match value {
            Value::Iterator(cursor) => return Ok(cursor.clone()),
            Value::List(list) => IterState::List {
                list: list.clone(),
                pos: 0,
            },
            Value::Tuple(items) => IterState::Items {
                items: items.to_vec(),
                pos: 0,
            },
            Value::Str(s) => IterState::Items {
                items: s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect(),
                pos: 0,
            },
            Value::Bytes(bytes) => IterState::Items {
                items: bytes.iter().map(|b| Value::Int(*b as i64)).collect(),
                pos: 0,
            },
            Value::Dict(dict) => IterState::Items {
                items: dict.borrow().keys(),
                pos: 0,
            },
            Value::Set(set) => IterState::Items {
                items: set.borrow().values(),
                pos: 0,
            },
            Value::Range(range) => IterState::Range {
                next: range.start,
                remaining: range.len(),
                step: range.step,
            },
            Value::Instance(instance) => {
                if let Some(iterator) = self.call_special(instance, "__iter__", Vec::new())? {
                    if let Value::Instance(inner) = &iterator {
                        if inner.class.lookup("__next__").is_some() {
                            return Ok(Rc::new(RefCell::new(IterState::Protocol(iterator))));
                        }
                    }
                    return self.iterate(&iterator);
                }
                if instance.class.lookup("__next__").is_some() {
                    IterState::Protocol(value.clone())
                } else {
                    return type_error(format!("'{}' object is not iterable", instance.class.name));
                }
            }
            Value::Object(native) => match native.iter_values(self)? {
                Some(items) => IterState::Items { items, pos: 0 },
                None => {
                    return type_error(format!("'{}' object is not iterable", native.type_name()))
                }
            },
            other => return type_error(format!("'{}' object is not iterable", other.type_name())),
        };
        Ok(Rc::new(RefCell::new(state)))
    }

    pub fn next_item(&mut self, cursor: &RefCell<IterState>) -> RResult<Option<Value>> {
        let protocol = {
            let mut state = cursor.borrow_mut();
            match &mut *state {
                IterState::Items { items, pos } => {
                    let item = items.get(*pos).cloned();
                    if item.is_some() {
                        *pos += 1;
                    }
                    return Ok(item);
                }
                IterState::List { list, pos } => {
                    let item = list.borrow().get(*pos).cloned();
                    if item.is_some() {
                        *pos += 1;
                    }
                    return Ok(item);
                }
                IterState::Range {
                    next,
                    remaining,
                    step,
                } => {
                    if *remaining == 0 {
                        return Ok(None);
                    }
                    let value = *next;
                    *remaining -= 1;
                    *next = next.wrapping_add(*step);
                    return Ok(Some(Value::Int(value)));
                }
                IterState::Exhausted => return Ok(None),
                IterState::Protocol(object) => object.clone(),
            }
        };
        let Value::Instance(instance) = &protocol else {
            return Ok(None);
        };
        match self.call_special(instance, "__next__", Vec::new()) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => type_error(format!(
                "'{}' object is not an iterator",
                instance.class.name
            )),
            Err(exc) if exc.is(ExcKind::StopIteration) => {
                *cursor.borrow_mut() = IterState::Exhausted;
                Ok(None)
            }
            Err(exc) => Err(exc),
        }
    }

    /// Materialize any iterable, bounded by the sequence ceiling
    pub fn collect(&mut self, value: &Value) -> RResult<Vec<Value>> {
        match value {
            Value::List(list) => return Ok(list.borrow().clone()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            Value::Range(range) => {
                self.check_len(range.len())?;
                return Ok((0..range.len()).map(|i| Value::Int(range.get(i))).collect());
            }
            _ => {}
        }
        let cursor = self.iterate(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_item(&cursor)? {
            self.check_len(items.len() + 1)?;
            items.push(item);
        }
        Ok(items)
    }
}

pub(crate) fn builtin_method(receiver: &Value, name: &str) -> Value {
    Value::Method(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        method: Method::Builtin(Rc::from(name)),
    }))
}

fn syntax_exception(err: &SyntaxError, file: &'static str) -> Box<Exception> {
    let mut exc = Exception::new(ExcKind::SyntaxError, err.message.clone());
    exc.traceback.push(Frame {
        name: Rc::from("<module>"),
        file,
        line: err.line,
    });
    exc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SharedBuffer;

    fn run(source: &str) -> (RResult<()>, String) {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        let result = interp.run(source);
        (result, buffer.contents())
    }

    fn output(source: &str) -> String {
        let (result, out) = run(source);
        if let Err(exc) = result {
            panic!("unexpected error {}: {}", exc, out);
        }
        out
    }

    fn error_kind(source: &str) -> String {
        match run(source).0 {
            Err(exc) => exc.class_name(),
            Ok(()) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_function_call() {
        assert_eq!(output("def f(n):\n    return n*n\nprint(f(5))\n"), "25\n");
    }

    #[test]
    fn test_closures_and_nonlocal() {
        let source = "\
def counter():
    count = 0
    def bump():
        nonlocal count
        count += 1
        return count
    return bump
c = counter()
c()
print(c(), c())
";
        assert_eq!(output(source), "2 3\n");
    }

    #[test]
    fn test_global_declaration() {
        assert_eq!(
            output("total = 0\ndef add(n):\n    global total\n    total += n\nadd(2)\nadd(3)\nprint(total)\n"),
            "5\n"
        );
    }

    #[test]
    fn test_default_and_keyword_arguments() {
        let source = "\
def f(a, b=2, *rest, c, d=4, **extra):
    return (a, b, rest, c, d, sorted(extra))
print(f(1, c=3))
print(f(1, 5, 6, 7, c=3, z=0, y=1))
";
        assert_eq!(
            output(source),
            "(1, 2, (), 3, 4, [])\n(1, 5, (6, 7), 3, 4, ['y', 'z'])\n"
        );
    }

    #[test]
    fn test_argument_errors() {
        let (result, _) = run("def f(a):\n    pass\nf()\n");
        let exc = result.unwrap_err();
        assert_eq!(
            exc.to_string(),
            "TypeError: f() missing 1 required positional argument: 'a'"
        );
        assert_eq!(error_kind("def f():\n    pass\nf(x=1)\n"), "TypeError");
    }

    #[test]
    fn test_loops_with_else() {
        let source = "\
for i in range(3):
    if i == 5:
        break
else:
    print('no break')
n = 0
while n < 10:
    n += 1
    if n == 4:
        break
else:
    print('unreachable')
print(n)
";
        assert_eq!(output(source), "no break\n4\n");
    }

    #[test]
    fn test_unpacking() {
        let source = "\
a, (b, c) = 1, [2, 3]
first, *middle, last = range(5)
print(a, b, c, first, middle, last)
";
        assert_eq!(output(source), "1 2 3 0 [1, 2, 3] 4\n");
        assert_eq!(error_kind("a, b = [1, 2, 3]\n"), "ValueError");
    }

    #[test]
    fn test_comprehensions() {
        let source = "\
print([x * x for x in range(5) if x % 2 == 0])
print({k: v for k, v in zip('ab', [1, 2])})
print(sorted({c for c in 'hello'}))
print(sum(x for x in range(4)))
print([(i, j) for i in range(2) for j in range(i)])
";
        assert_eq!(
            output(source),
            "[0, 4, 16]\n{'a': 1, 'b': 2}\n['e', 'h', 'l', 'o']\n6\n[(1, 0)]\n"
        );
    }

    #[test]
    fn test_classes_and_inheritance() {
        let source = "\
class Animal:
    sound = 'generic'
    def __init__(self, name):
        self.name = name
    def speak(self):
        return self.name + ' says ' + self.sound
class Dog(Animal):
    sound = 'woof'
    def speak(self):
        return super().speak() + '!'
d = Dog('rex')
print(d.speak())
print(isinstance(d, Animal), isinstance(d, Dog), issubclass(Dog, Animal))
";
        assert_eq!(output(source), "rex says woof!\nTrue True True\n");
    }

    #[test]
    fn test_dunder_methods() {
        let source = "\
class V:
    def __init__(self, x):
        self.x = x
    def __add__(self, other):
        return V(self.x + other.x)
    def __eq__(self, other):
        return self.x == other.x
    def __lt__(self, other):
        return self.x < other.x
    def __repr__(self):
        return 'V(' + str(self.x) + ')'
    def __len__(self):
        return self.x
print(V(1) + V(2), V(3) == V(3), len(V(4)))
print(sorted([V(3), V(1), V(2)]))
";
        assert_eq!(output(source), "V(3) True 4\n[V(1), V(2), V(3)]\n");
    }

    #[test]
    fn test_try_except_finally() {
        let source = "\
def f(x):
    try:
        return 10 / x
    except ZeroDivisionError as e:
        print('caught', e)
        return -1
    finally:
        print('finally')
print(f(0))
print(f(5))
try:
    raise ValueError('bad')
except (TypeError, ValueError) as e:
    print(type(e).__name__, e.args)
";
        assert_eq!(
            output(source),
            "caught division by zero\nfinally\n-1\nfinally\n2.0\nValueError ('bad',)\n"
        );
    }

    #[test]
    fn test_user_exception_classes() {
        let source = "\
class AppError(Exception):
    def __init__(self, message, code):
        super().__init__(message)
        self.code = code
try:
    raise AppError('broken', 7)
except Exception as e:
    print(e, e.code)
";
        assert_eq!(output(source), "broken 7\n");
        let (result, _) = run("class E(ValueError):\n    pass\nraise E('x')\n");
        assert_eq!(result.unwrap_err().class_name(), "E");
    }

    #[test]
    fn test_exception_does_not_match_unrelated_handler() {
        assert_eq!(
            error_kind("try:\n    [][1]\nexcept KeyError:\n    pass\n"),
            "IndexError"
        );
    }

    #[test]
    fn test_bare_raise_reraises() {
        assert_eq!(
            error_kind("try:\n    1/0\nexcept ZeroDivisionError:\n    raise\n"),
            "ZeroDivisionError"
        );
    }

    /// Deep snippet recursion needs the stack the child gives its evaluator
    fn on_large_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_recursion_limit() {
        let kind = on_large_stack(|| error_kind("def f(n):\n    return f(n + 1)\nf(0)\n"));
        assert_eq!(kind, "RecursionError");
    }

    #[test]
    fn test_sequence_ceiling() {
        assert_eq!(error_kind("x = 'a' * 100000000\n"), "MemoryError");
        assert_eq!(error_kind("x = list(range(100000000))\n"), "MemoryError");
    }

    #[test]
    fn test_traceback_lines() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        let exc = interp
            .run("def f():\n    return 1 / 0\n\nf()\n")
            .unwrap_err();
        let text = interp.format_exception(&exc);
        assert!(text.starts_with("Traceback (most recent call last):\n"));
        assert!(text.contains("File \"<snippet>\", line 4, in <module>"));
        assert!(text.contains("File \"<snippet>\", line 2, in f"));
        assert!(text.ends_with("ZeroDivisionError: division by zero\n"));
    }

    #[test]
    fn test_traceback_hides_native_frames() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        let exc = interp
            .run("def key(x):\n    return 1 / x\nsorted([1, 0], key=key)\n")
            .unwrap_err();
        let text = interp.format_exception(&exc);
        assert!(text.contains("line 3, in <module>"));
        assert!(text.contains("line 2, in key"));
        assert!(!text.contains("<sandbox>"));
    }

    #[test]
    fn test_lambda_and_decorators() {
        let source = "\
def twice(f):
    def wrapper(x):
        return f(f(x))
    return wrapper
@twice
def inc(x):
    return x + 1
print(inc(1), (lambda a, b=3: a * b)(2))
";
        assert_eq!(output(source), "3 6\n");
    }

    #[test]
    fn test_iterator_protocol() {
        let source = "\
class Countdown:
    def __init__(self, n):
        self.n = n
    def __iter__(self):
        return self
    def __next__(self):
        if self.n == 0:
            raise StopIteration
        self.n -= 1
        return self.n
print(list(Countdown(3)))
it = iter([1, 2])
print(next(it), next(it), next(it, 'done'))
";
        assert_eq!(output(source), "[2, 1, 0]\n1 2 done\n");
    }

    #[test]
    fn test_attribute_guard_records_violation() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        interp.set_attribute_guard(["__class__".to_string()].into_iter().collect());
        let source = "x = 1\ntry:\n    y = x.__class__\nexcept BaseException:\n    pass\n";
        let exc = interp.run(source).unwrap_err();
        assert_eq!(exc.class_name(), "SecurityError");
        let events = interp.take_security_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line, 3);
        assert_eq!(events[0].message, "Access to attribute '__class__' is not allowed");
    }

    #[test]
    fn test_security_error_escapes_except_exception() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        interp.set_attribute_guard(["__class__".to_string()].into_iter().collect());
        let exc = interp
            .run("try:\n    (1).__class__\nexcept Exception:\n    pass\n")
            .unwrap_err();
        assert_eq!(exc.class_name(), "SecurityError");
    }

    #[test]
    fn test_trapped_violation_skips_handlers_and_finally() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        interp.set_attribute_guard(["__class__".to_string()].into_iter().collect());
        let source = "\
try:
    try:
        (1).__class__
    except:
        print('bare')
    finally:
        print('finally')
except SecurityError:
    print('named')
print('after')
";
        let exc = interp.run(source).unwrap_err();
        assert_eq!(exc.class_name(), "SecurityError");
        assert_eq!(buffer.contents(), "");
        assert!(interp.breached());
    }

    #[test]
    fn test_user_raised_security_error_is_catchable() {
        assert_eq!(
            output("try:\n    raise SecurityError('mine')\nexcept SecurityError as e:\n    print(e)\n"),
            "mine\n"
        );
    }

    #[test]
    fn test_host_eval_and_exec() {
        assert_eq!(output("x = 2\nprint(eval('x * 21'))\nexec('y = x + 1')\nprint(y)\n"), "42\n3\n");
    }

    #[test]
    fn test_import_from_host_module() {
        assert_eq!(output("from math import sqrt\nimport string as s\nprint(sqrt(16), s.digits)\n"), "4.0 0123456789\n");
        assert_eq!(error_kind("import socket\n"), "ModuleNotFoundError");
    }
}
