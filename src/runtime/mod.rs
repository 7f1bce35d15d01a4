//! Snippet interpreter and the restricted surface it runs under.
//!
//! - [`interp`]: tree-walking evaluator over [`crate::lang`] syntax trees
//! - [`builtins`], [`modules`]: the unrestricted host tables
//! - [`proxy`]: bounded adapters over a few host modules
//! - [`surface`]: allow-list driven namespace, import hook and attribute guard

pub mod builtins;
pub mod error;
pub mod format;
pub mod import;
pub mod interp;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod proxy;
pub mod scope;
pub mod surface;
pub mod value;

use crate::config::allowlist::HostCatalog;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

pub use error::{ExcKind, Exception, RResult};
pub use interp::{Interpreter, RuntimeLimits};
pub use surface::{build, RestrictedSurface};

/// Names of everything the host interpreter provides
pub fn host_catalog() -> HostCatalog {
    HostCatalog {
        builtins: builtins::host_names().into_iter().map(String::from).collect(),
        modules: modules::HOST_MODULES.iter().map(|name| name.to_string()).collect(),
    }
}

/// In-memory `Write` sink whose clones share one buffer
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::standard_allowlist;

    #[test]
    fn test_standard_allowlist_matches_host_catalog() {
        let catalog = host_catalog();
        standard_allowlist().verify_against(&catalog).unwrap();
        assert!(catalog.modules.contains("decimal"));
        assert!(catalog.builtins.contains("SecurityError"));
        assert!(!catalog.builtins.contains("SyntaxError"));
    }

    #[test]
    fn test_every_proxied_module_is_a_host_module() {
        for name in proxy::PROXIED_MODULES {
            assert!(modules::HOST_MODULES.contains(name), "{} has no host module", name);
        }
    }
}
