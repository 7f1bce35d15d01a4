//! Module resolution seam.

use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::modules;
use crate::runtime::value::NativeModule;
use std::rc::Rc;

/// Resolves `import` statements to native modules
pub trait ImportHook {
    fn load(&self, interp: &mut Interpreter, name: &str, level: u32) -> RResult<Rc<dyn NativeModule>>;
}

/// Unrestricted resolution against the host module registry
pub struct HostImporter;

impl ImportHook for HostImporter {
    fn load(&self, _interp: &mut Interpreter, name: &str, level: u32) -> RResult<Rc<dyn NativeModule>> {
        if level > 0 {
            return import_error("attempted relative import with no known parent package");
        }
        match modules::host_module(name) {
            Some(module) => Ok(module),
            None => module_not_found(format!("No module named '{}'", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interp::RuntimeLimits;
    use crate::runtime::SharedBuffer;

    #[test]
    fn test_host_importer_resolves_registry() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        interp
            .run("import math\nfrom string import digits\nprint(math.sqrt(16), digits)\n")
            .unwrap();
        assert_eq!(buffer.contents(), "4.0 0123456789\n");
    }

    #[test]
    fn test_unknown_module_not_found() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        let exc = interp.run("import socket\n").unwrap_err();
        assert!(exc.is(ExcKind::ModuleNotFoundError));
        assert_eq!(interp.exception_summary(&exc), "ModuleNotFoundError: No module named 'socket'");
    }
}
