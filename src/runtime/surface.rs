//! Capability-limited execution environment.
//!
//! [`build`] turns an [`AllowList`] into a [`RestrictedSurface`]: the set of
//! base names kept from the host builtin table, an import hook that only
//! resolves allowed modules (through their bounded proxy where one exists)
//! and the attribute names trapped at run time. A surface is built and
//! installed once per child process.

use crate::config::allowlist::{AllowList, ProxyCeilings};
use crate::config::types::Result;
use crate::runtime::error::*;
use crate::runtime::host_catalog;
use crate::runtime::import::ImportHook;
use crate::runtime::interp::Interpreter;
use crate::runtime::modules;
use crate::runtime::proxy;
use crate::runtime::value::NativeModule;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Import hook consulting the allow-listed module set
#[derive(Debug)]
pub struct RestrictedImporter {
    allowed: BTreeSet<String>,
    ceilings: ProxyCeilings,
}

impl ImportHook for RestrictedImporter {
    fn load(&self, interp: &mut Interpreter, name: &str, level: u32) -> RResult<Rc<dyn NativeModule>> {
        if level > 0 {
            return Err(interp.security_violation("Relative imports are not allowed"));
        }
        let top = name.split('.').next().unwrap_or(name);
        if !self.allowed.contains(top) {
            return Err(interp.security_violation(format!(
                "Import of module '{}' is not allowed",
                top
            )));
        }
        if top != name {
            return module_not_found(format!(
                "No module named '{}'; '{}' is not a package",
                name, top
            ));
        }
        match proxy::proxy_module(name, &self.ceilings).or_else(|| modules::host_module(name)) {
            Some(module) => Ok(module),
            None => module_not_found(format!("No module named '{}'", name)),
        }
    }
}

/// Everything the child installs before evaluating a snippet
#[derive(Debug)]
pub struct RestrictedSurface {
    builtins: BTreeSet<String>,
    importer: Rc<RestrictedImporter>,
    attribute_guard: BTreeSet<String>,
}

impl RestrictedSurface {
    /// Names that will remain in the base namespace
    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.builtins.iter().map(String::as_str)
    }

    /// Replace the interpreter's namespace, importer and attribute guard
    pub fn install(self, interp: &mut Interpreter) {
        let mut table = interp.take_builtins();
        table.retain(|name, _| self.builtins.contains(name));
        interp.set_builtins(table);
        interp.set_importer(self.importer);
        interp.set_attribute_guard(self.attribute_guard);
    }
}

/// Build the restricted surface for `allowlist`.
///
/// Fails when the allow-list does not agree with the host interpreter.
pub fn build(allowlist: &AllowList) -> Result<RestrictedSurface> {
    allowlist.verify_against(&host_catalog())?;
    Ok(RestrictedSurface {
        builtins: allowlist.allowed_builtins.clone(),
        importer: Rc::new(RestrictedImporter {
            allowed: allowlist.allowed_imports.clone(),
            ceilings: allowlist.ceilings.clone(),
        }),
        attribute_guard: allowlist.disallowed_attributes.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::standard_allowlist;
    use crate::runtime::proxy::testing::{failure, restricted};

    #[test]
    fn test_namespace_keeps_only_allowed_names() {
        let (mut interp, buffer) = restricted();
        let allowlist = standard_allowlist();
        let names: BTreeSet<String> = interp.builtin_names().map(String::from).collect();
        assert_eq!(names, allowlist.allowed_builtins);
        assert_eq!(
            failure(&mut interp, "eval('1 + 1')\n"),
            "NameError: name 'eval' is not defined"
        );
        interp.run("print(sorted([3, 1, 2]), len('abc'))\n").unwrap();
        assert_eq!(buffer.contents(), "[1, 2, 3] 3\n");
    }

    #[test]
    fn test_imports_outside_allowlist_raise_security_error() {
        let (mut interp, _) = restricted();
        assert_eq!(
            failure(&mut interp, "import socket\n"),
            "SecurityError: Import of module 'socket' is not allowed"
        );
        assert_eq!(
            failure(&mut interp, "from os.path import join\n"),
            "SecurityError: Import of module 'os' is not allowed"
        );
        assert_eq!(
            failure(&mut interp, "from . import helpers\n"),
            "SecurityError: Relative imports are not allowed"
        );
        let events = interp.take_security_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "Import of module 'socket' is not allowed");
    }

    #[test]
    fn test_allowed_modules_resolve() {
        let (mut interp, buffer) = restricted();
        interp
            .run("import json, math\nfrom string import digits\nprint(json.dumps([math.floor(2.5)]), digits[:3])\n")
            .unwrap();
        assert_eq!(buffer.contents(), "[2] 012\n");
    }

    #[test]
    fn test_attribute_guard_traps_dunder_access() {
        let (mut interp, _) = restricted();
        assert_eq!(
            failure(&mut interp, "x = (1).__class__\n"),
            "SecurityError: Access to attribute '__class__' is not allowed"
        );
        assert_eq!(
            failure(&mut interp, "def f():\n    pass\nf.__globals__\n"),
            "SecurityError: Access to attribute '__globals__' is not allowed"
        );
    }

    #[test]
    fn test_build_rejects_inconsistent_allowlist() {
        let mut allowlist = standard_allowlist();
        allowlist.allowed_builtins.insert("nonexistent".to_string());
        assert!(build(&allowlist).is_err());

        let mut allowlist = standard_allowlist();
        allowlist.allowed_imports.insert("socket".to_string());
        assert!(build(&allowlist).is_err());
    }
}
