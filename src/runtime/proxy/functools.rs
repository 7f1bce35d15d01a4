use super::override_members;
use crate::runtime::modules::functools::{lru_cache_request, FunctoolsModule};
use crate::runtime::modules::member;
use crate::runtime::value::{NativeModule, Value};

/// `functools` whose caches must be bounded by the configured size
pub struct BoundedFunctools {
    host: FunctoolsModule,
    max_size: usize,
}

impl BoundedFunctools {
    pub fn new(max_size: usize) -> Self {
        Self {
            host: FunctoolsModule,
            max_size,
        }
    }
}

impl NativeModule for BoundedFunctools {
    fn name(&self) -> &'static str {
        "functools"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let max_size = self.max_size;
        let mut overrides = vec![(
            "cache",
            Value::native("cache", |interp, _| {
                Err(interp.security_violation("functools.cache() is unbounded and not allowed"))
            }),
        )];
        if let Ok(host_lru) = member(&self.host, "lru_cache") {
            overrides.push((
                "lru_cache",
                Value::native("lru_cache", move |interp, args| {
                    match lru_cache_request(interp, &args)? {
                        (_, None) => Err(interp.security_violation(
                            "functools.lru_cache() requires a bounded maxsize",
                        )),
                        (_, Some(n)) if n > 0 && n as u64 > max_size as u64 => {
                            Err(interp.security_violation(format!(
                                "functools.lru_cache() maxsize={} exceeds the limit of {}",
                                n, max_size
                            )))
                        }
                        _ => interp.call(&host_lru, args),
                    }
                }),
            ));
        }
        override_members(&self.host, overrides)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::presets::standard_ceilings;
    use crate::runtime::proxy::testing::{failure, restricted, restricted_with};

    #[test]
    fn test_unbounded_caches_are_rejected_at_decoration() {
        let (mut interp, _) = restricted();
        interp.run("import functools\n").unwrap();
        assert_eq!(
            failure(&mut interp, "@functools.lru_cache(maxsize=None)\ndef f(x):\n    return x\n"),
            "SecurityError: functools.lru_cache() requires a bounded maxsize"
        );
        assert_eq!(
            failure(&mut interp, "@functools.lru_cache(maxsize=5000)\ndef f(x):\n    return x\n"),
            "SecurityError: functools.lru_cache() maxsize=5000 exceeds the limit of 1024"
        );
        assert_eq!(
            failure(&mut interp, "@functools.cache\ndef f(x):\n    return x\n"),
            "SecurityError: functools.cache() is unbounded and not allowed"
        );
    }

    #[test]
    fn test_default_size_is_checked_against_ceiling() {
        let mut ceilings = standard_ceilings();
        ceilings.lru_cache_max_size = 64;
        let (mut interp, _) = restricted_with(ceilings);
        assert_eq!(
            failure(&mut interp, "from functools import lru_cache\n@lru_cache\ndef f(x):\n    return x\n"),
            "SecurityError: functools.lru_cache() maxsize=128 exceeds the limit of 64"
        );
    }

    #[test]
    fn test_bounded_cache_works() {
        let (mut interp, buffer) = restricted();
        let source = "\
from functools import lru_cache, reduce
@lru_cache(maxsize=256)
def fib(n):
    return n if n < 2 else fib(n - 1) + fib(n - 2)
print(fib(60), reduce(lambda a, b: a + b, range(5)))
";
        interp.run(source).unwrap();
        assert_eq!(buffer.contents(), "1548008755920 10\n");
    }
}
