//! Name binding.
//!
//! Scopes form a parent chain. Function closures never capture a class
//! body scope, so methods resolve free names in the enclosing function or
//! module like the source language does.

use crate::lang::ast::FunctionDef;
use crate::runtime::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Class,
}

pub struct Scope {
    pub vars: RefCell<HashMap<String, Value>>,
    pub parent: Option<Rc<Scope>>,
    pub kind: ScopeKind,
    /// Definition whose `global`/`nonlocal` declarations apply here
    pub def: Option<Rc<FunctionDef>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("names", &self.vars.borrow().len())
            .finish()
    }
}

impl Scope {
    pub fn module() -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            kind: ScopeKind::Module,
            def: None,
        })
    }

    pub fn child(parent: &Rc<Scope>, kind: ScopeKind, def: Option<Rc<FunctionDef>>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            kind,
            def,
        })
    }

    /// The scope a function defined here closes over
    pub fn closure_target(self: &Rc<Self>) -> Rc<Scope> {
        let mut current = self.clone();
        while current.kind == ScopeKind::Class {
            match &current.parent {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }
        current
    }

    pub fn root(self: &Rc<Self>) -> Rc<Scope> {
        let mut current = self.clone();
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    fn declares_global(&self, name: &str) -> bool {
        self.def.as_ref().is_some_and(|def| def.globals.contains(name))
    }

    fn declares_nonlocal(&self, name: &str) -> bool {
        self.def.as_ref().is_some_and(|def| def.nonlocals.contains(name))
    }

    /// Resolve a name through the chain; class scopes are only visible to
    /// code running directly in them
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        if self.declares_global(name) {
            return self.root().vars.borrow().get(name).cloned();
        }
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        let mut current = self.parent.clone();
        while let Some(scope) = current {
            if scope.kind != ScopeKind::Class {
                if let Some(value) = scope.vars.borrow().get(name) {
                    return Some(value.clone());
                }
            }
            current = scope.parent.clone();
        }
        None
    }

    /// Scope that receives an assignment to `name` made here
    fn target(self: &Rc<Self>, name: &str) -> Rc<Scope> {
        if self.declares_global(name) {
            return self.root();
        }
        if self.declares_nonlocal(name) {
            let mut current = self.parent.clone();
            let mut fallback = None;
            while let Some(scope) = current {
                if scope.kind == ScopeKind::Function {
                    if scope.vars.borrow().contains_key(name) {
                        return scope;
                    }
                    fallback.get_or_insert_with(|| scope.clone());
                }
                current = scope.parent.clone();
            }
            if let Some(scope) = fallback {
                return scope;
            }
        }
        self.clone()
    }

    pub fn assign(self: &Rc<Self>, name: &str, value: Value) {
        self.target(name)
            .vars
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    pub fn delete(self: &Rc<Self>, name: &str) -> bool {
        self.target(name).vars.borrow_mut().remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parse_module;
    use crate::lang::ast::StmtKind;

    fn function_def(source: &str) -> Rc<FunctionDef> {
        let module = parse_module(source).unwrap();
        match &module.body[0].kind {
            StmtKind::FunctionDef(def) => def.clone(),
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_skips_class_scopes() {
        let module = Scope::module();
        module.assign("x", Value::Int(1));
        let class = Scope::child(&module, ScopeKind::Class, None);
        class.assign("x", Value::Int(2));
        assert!(matches!(class.lookup("x"), Some(Value::Int(2))));

        let method = Scope::child(&class.closure_target(), ScopeKind::Function, None);
        assert!(matches!(method.lookup("x"), Some(Value::Int(1))));
    }

    #[test]
    fn test_global_declaration_writes_module_scope() {
        let module = Scope::module();
        let def = function_def("def f():\n    global counter\n    counter = 1\n");
        let local = Scope::child(&module, ScopeKind::Function, Some(def));
        local.assign("counter", Value::Int(5));
        assert!(matches!(module.lookup("counter"), Some(Value::Int(5))));
        assert!(local.vars.borrow().is_empty());
    }

    #[test]
    fn test_nonlocal_declaration_writes_enclosing_function() {
        let module = Scope::module();
        let outer = Scope::child(&module, ScopeKind::Function, None);
        outer.assign("n", Value::Int(0));
        let def = function_def("def g():\n    nonlocal n\n    n = 1\n");
        let inner = Scope::child(&outer, ScopeKind::Function, Some(def));
        inner.assign("n", Value::Int(3));
        assert!(matches!(outer.lookup("n"), Some(Value::Int(3))));
    }
}
