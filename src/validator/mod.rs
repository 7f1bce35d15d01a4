//! Static validator
//!
//! Parses a submission and walks the tree looking for disallowed imports,
//! calls to disallowed identifiers and access to disallowed attributes. The
//! source is never executed; the result depends only on the source text and
//! the allow-list.
//!
//! Parsing and the tree walk recurse once per nesting level, so both run on
//! a dedicated thread with [`CHECK_STACK_BYTES`] of stack whatever thread the
//! caller is on.

use crate::config::allowlist::AllowList;
use crate::config::types::Violation;
use crate::lang::ast::{Expr, ExprKind, Stmt, StmtKind};
use crate::lang::parse_module;
use crate::lang::visit::{walk_expr, walk_module, walk_stmt, Visitor};
use std::sync::Arc;
use std::thread;

/// Stack for the checking thread, sized for the deepest tree the parser accepts
pub const CHECK_STACK_BYTES: usize = 32 * 1024 * 1024;

/// Attribute names whose call is a dynamic import regardless of receiver
const DYNAMIC_IMPORT_ATTRIBUTES: &[&str] = &["import_module"];

/// Violations plus how the check failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckReport {
    pub violations: Vec<Violation>,
    /// The source did not parse; `violations` holds the single syntax error
    pub syntax_error: bool,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Validator {
    allowlist: Arc<AllowList>,
}

impl Validator {
    pub fn new(allowlist: Arc<AllowList>) -> Self {
        Self { allowlist }
    }

    pub fn allowlist(&self) -> &AllowList {
        &self.allowlist
    }

    /// Violations in source order; empty iff the source parses and is clean
    pub fn check(&self, source: &str) -> Vec<Violation> {
        self.check_report(source).violations
    }

    pub fn check_report(&self, source: &str) -> CheckReport {
        thread::scope(|scope| {
            let checker = thread::Builder::new()
                .name("validator".to_string())
                .stack_size(CHECK_STACK_BYTES)
                .spawn_scoped(scope, || self.check_here(source));
            match checker {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| unchecked("validator panicked".to_string())),
                Err(err) => unchecked(format!("cannot start validator thread: {}", err)),
            }
        })
    }

    fn check_here(&self, source: &str) -> CheckReport {
        let module = match parse_module(source) {
            Ok(module) => module,
            Err(err) => {
                return CheckReport {
                    violations: vec![Violation::new(
                        err.line,
                        err.column,
                        format!("SyntaxError: {}", err.message),
                    )],
                    syntax_error: true,
                }
            }
        };

        let mut walker = PolicyWalker {
            allowlist: &self.allowlist,
            violations: Vec::new(),
        };
        walk_module(&mut walker, &module);

        let mut violations = walker.violations;
        violations.sort_by_key(|v| (v.line, v.column));
        CheckReport {
            violations,
            syntax_error: false,
        }
    }
}

/// A submission that could not be checked is never clean
fn unchecked(reason: String) -> CheckReport {
    log::error!("{}", reason);
    CheckReport {
        violations: vec![Violation::new(1, 0, format!("Source could not be checked: {}", reason))],
        syntax_error: false,
    }
}

struct PolicyWalker<'a> {
    allowlist: &'a AllowList,
    violations: Vec<Violation>,
}

impl PolicyWalker<'_> {
    fn report(&mut self, line: u32, column: u32, message: String) {
        self.violations.push(Violation::new(line, column, message));
    }

    fn check_module(&mut self, module: &str, line: u32, column: u32) {
        if !self.allowlist.is_import_allowed(module) {
            let top = module.split('.').next().unwrap_or(module);
            self.report(line, column, format!("Import of module '{}' is not allowed", top));
        }
    }
}

impl Visitor for PolicyWalker<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import(names) => {
                for alias in names {
                    self.check_module(&alias.name, alias.line, alias.col);
                }
            }
            StmtKind::ImportFrom { module, level, .. } => {
                if *level > 0 {
                    self.report(stmt.line, stmt.col, "Relative imports are not allowed".to_string());
                } else if let Some(module) = module {
                    self.check_module(module, stmt.line, stmt.col);
                }
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Call { func, .. } => match &func.kind {
                ExprKind::Name(name) if self.allowlist.is_call_disallowed(name) => {
                    self.report(expr.line, expr.col, format!("Call to '{}' is not allowed", name));
                }
                ExprKind::Attribute { attr, .. }
                    if DYNAMIC_IMPORT_ATTRIBUTES.contains(&attr.as_str()) =>
                {
                    self.report(expr.line, expr.col, format!("Call to '{}' is not allowed", attr));
                }
                _ => {}
            },
            ExprKind::Attribute { attr, .. } if self.allowlist.is_attribute_disallowed(attr) => {
                self.report(
                    expr.line,
                    expr.col,
                    format!("Access to attribute '{}' is not allowed", attr),
                );
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::standard_allowlist;

    fn validator() -> Validator {
        Validator::new(Arc::new(standard_allowlist()))
    }

    fn messages(source: &str) -> Vec<String> {
        validator()
            .check(source)
            .into_iter()
            .map(|v| v.message)
            .collect()
    }

    #[test]
    fn test_clean_source_has_no_violations() {
        let source = "import math\nfrom random import randint\n\ndef f(n):\n    return n * n\nprint(f(5), math.sqrt(4))\n";
        assert!(validator().check(source).is_empty());
    }

    #[test]
    fn test_deep_nesting_is_safe_on_a_small_caller_stack() {
        let validator = validator();
        let report = thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(move || {
                let source = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
                validator.check_report(&source)
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(report.syntax_error);
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].message.contains("nested too deeply"));
    }

    #[test]
    fn test_deepest_accepted_nesting_checks_on_a_small_caller_stack() {
        let validator = validator();
        let report = thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(move || {
                let source = format!("x = {}1{}\nimport os\n", "(".repeat(150), ")".repeat(150));
                validator.check_report(&source)
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(!report.syntax_error);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].line, 2);
    }

    #[test]
    fn test_disallowed_import() {
        let violations = validator().check("import socket");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].message, "Import of module 'socket' is not allowed");
        assert_eq!((violations[0].line, violations[0].column), (1, 7));
    }

    #[test]
    fn test_dotted_import_reports_top_level_name() {
        assert_eq!(messages("import os.path"), vec!["Import of module 'os' is not allowed"]);
        assert_eq!(
            messages("from subprocess.x import run"),
            vec!["Import of module 'subprocess' is not allowed"]
        );
    }

    #[test]
    fn test_relative_import() {
        assert_eq!(messages("from . import x"), vec!["Relative imports are not allowed"]);
    }

    #[test]
    fn test_disallowed_calls() {
        assert_eq!(
            messages("eval('1')\nx = exec\nopen('f')"),
            vec!["Call to 'eval' is not allowed", "Call to 'open' is not allowed"]
        );
    }

    #[test]
    fn test_dynamic_import_attribute() {
        let found = messages("import math\nmath.import_module('os')");
        assert_eq!(found, vec!["Call to 'import_module' is not allowed"]);
    }

    #[test]
    fn test_disallowed_attributes_in_any_context() {
        let found = messages("x = ().__class__.__bases__[0].__subclasses__()\ny.__dict__ = 1\ndel z.__globals__");
        assert_eq!(
            found,
            vec![
                "Access to attribute '__subclasses__' is not allowed",
                "Access to attribute '__bases__' is not allowed",
                "Access to attribute '__class__' is not allowed",
                "Access to attribute '__dict__' is not allowed",
                "Access to attribute '__globals__' is not allowed",
            ]
        );
    }

    #[test]
    fn test_violations_sorted_by_position() {
        let violations = validator().check("import os\nprint(1); eval('2')\nimport sys");
        let positions: Vec<_> = violations.iter().map(|v| (v.line, v.column)).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_nested_scopes_are_checked() {
        let source = "def outer():\n    def inner():\n        return lambda: eval('1')\n    return inner\nclass C:\n    x = [getattr(o, 'a') for o in []]\nf'{compile(s)}'\n";
        assert_eq!(
            messages(source),
            vec![
                "Call to 'eval' is not allowed",
                "Call to 'getattr' is not allowed",
                "Call to 'compile' is not allowed",
            ]
        );
    }

    #[test]
    fn test_syntax_error_short_circuits() {
        let report = validator().check_report("import socket\nx = (");
        assert!(report.syntax_error);
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].message.starts_with("SyntaxError:"));
        assert_eq!(report.violations[0].line, 2);
    }

    #[test]
    fn test_check_is_idempotent() {
        let source = "import os\n__import__('sys')\nx.__mro__";
        let v = validator();
        assert_eq!(v.check(source), v.check(source));
    }
}
