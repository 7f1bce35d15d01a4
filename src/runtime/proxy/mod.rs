//! Bounded proxy modules.
//!
//! Each proxy implements [`NativeModule`] over a private instance of the host
//! module it wraps. Safe members pass through untouched; bulk or blocking
//! members are replaced by wrappers that check the configured ceiling and
//! raise `SecurityError` before delegating.

pub mod decimal;
pub mod functools;
pub mod random;
pub mod re;
pub mod time;

use crate::config::allowlist::ProxyCeilings;
use crate::runtime::value::{Args, NativeModule, Value};
use std::rc::Rc;

/// Module names served by a bounded proxy instead of the host module
pub const PROXIED_MODULES: &[&str] = &["decimal", "functools", "random", "re", "time"];

/// The bounded replacement for `name`, if the module is proxied
pub fn proxy_module(name: &str, ceilings: &ProxyCeilings) -> Option<Rc<dyn NativeModule>> {
    Some(match name {
        "decimal" => Rc::new(decimal::BoundedDecimal::new(ceilings.decimal_max_precision)),
        "functools" => Rc::new(functools::BoundedFunctools::new(ceilings.lru_cache_max_size)),
        "random" => Rc::new(random::BoundedRandom::new(
            ceilings.random_max_count,
            ceilings.random_max_bytes,
        )),
        "re" => Rc::new(re::BoundedRe::new(
            ceilings.regex_max_pattern_len,
            ceilings.regex_max_subject_len,
        )),
        "time" => Rc::new(time::BoundedTime::new()),
        _ => return None,
    })
}

/// Host members with some of them swapped for bounded wrappers
pub(crate) fn override_members(
    host: &dyn NativeModule,
    overrides: Vec<(&'static str, Value)>,
) -> Vec<(&'static str, Value)> {
    let mut members = host.members();
    for (name, value) in overrides {
        match members.iter_mut().find(|(member, _)| *member == name) {
            Some(slot) => slot.1 = value,
            None => members.push((name, value)),
        }
    }
    members
}

/// Argument passed either by keyword `name` or at `index`
pub(crate) fn arg<'a>(args: &'a Args, index: usize, name: &str) -> Option<&'a Value> {
    args.keywords
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
        .or_else(|| args.positional.get(index))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::allowlist::ProxyCeilings;
    use crate::config::presets::{standard_allowlist, standard_ceilings};
    use crate::runtime::interp::{Interpreter, RuntimeLimits};
    use crate::runtime::surface;
    use crate::runtime::SharedBuffer;

    /// Interpreter with the standard restricted surface installed
    pub fn restricted() -> (Interpreter, SharedBuffer) {
        restricted_with(standard_ceilings())
    }

    pub fn restricted_with(ceilings: ProxyCeilings) -> (Interpreter, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        let mut allowlist = standard_allowlist();
        allowlist.ceilings = ceilings;
        let surface = surface::build(&allowlist).unwrap();
        surface.install(&mut interp);
        (interp, buffer)
    }

    /// Summary line of the exception raised by `source`
    pub fn failure(interp: &mut Interpreter, source: &str) -> String {
        match interp.run(source) {
            Ok(()) => String::from("<no exception>"),
            Err(exc) => interp.exception_summary(&exc),
        }
    }
}
