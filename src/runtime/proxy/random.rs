use super::{arg, override_members};
use crate::runtime::error::RResult;
use crate::runtime::interp::Interpreter;
use crate::runtime::modules::{member, random::RandomModule};
use crate::runtime::value::{Args, NativeModule, Value};

/// `random` with bulk generation capped
pub struct BoundedRandom {
    host: RandomModule,
    max_count: usize,
    max_bytes: usize,
}

impl BoundedRandom {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            host: RandomModule::new(),
            max_count,
            max_bytes,
        }
    }
}

/// Reject `requested` above `limit`; non-integers are left to the host
fn check_size(
    interp: &mut Interpreter,
    func: &str,
    param: &str,
    requested: Option<&Value>,
    limit: usize,
) -> RResult<()> {
    if let Some(Value::Int(n)) = requested {
        if *n > 0 && *n as u64 > limit as u64 {
            return Err(interp.security_violation(format!(
                "random.{}() {}={} exceeds the limit of {}",
                func, param, n, limit
            )));
        }
    }
    Ok(())
}

/// Wrap the host member `func`, checking the size argument found at
/// `index` or keyword `param` first
fn bounded(
    host: &dyn NativeModule,
    func: &'static str,
    param: &'static str,
    index: usize,
    limit: usize,
) -> RResult<(&'static str, Value)> {
    let target = member(host, func)?;
    Ok((
        func,
        Value::native(func, move |interp, args: Args| {
            let requested = arg(&args, index, param).cloned();
            check_size(interp, func, param, requested.as_ref(), limit)?;
            interp.call(&target, args)
        }),
    ))
}

impl NativeModule for BoundedRandom {
    fn name(&self) -> &'static str {
        "random"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let overrides = [
            bounded(&self.host, "choices", "k", 3, self.max_count),
            bounded(&self.host, "sample", "k", 1, self.max_count),
            bounded(&self.host, "randbytes", "n", 0, self.max_bytes),
        ];
        override_members(&self.host, overrides.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::presets::standard_ceilings;
    use crate::runtime::proxy::testing::{failure, restricted, restricted_with};

    #[test]
    fn test_bulk_requests_above_ceiling_are_rejected() {
        let mut ceilings = standard_ceilings();
        ceilings.random_max_count = 100;
        ceilings.random_max_bytes = 16;
        let (mut interp, _) = restricted_with(ceilings);
        interp.run("import random\n").unwrap();
        assert_eq!(
            failure(&mut interp, "random.randbytes(17)\n"),
            "SecurityError: random.randbytes() n=17 exceeds the limit of 16"
        );
        assert_eq!(
            failure(&mut interp, "random.choices([1, 2], k=101)\n"),
            "SecurityError: random.choices() k=101 exceeds the limit of 100"
        );
        assert_eq!(
            failure(&mut interp, "random.sample(range(1000), 500)\n"),
            "SecurityError: random.sample() k=500 exceeds the limit of 100"
        );
        assert_eq!(interp.take_security_events().len(), 3);
    }

    #[test]
    fn test_violation_cannot_be_caught() {
        let (mut interp, buffer) = restricted();
        let source = "\
import random
try:
    random.randbytes(10 ** 6)
except SecurityError as exc:
    print('caught', exc)
print('escaped')
";
        assert_eq!(
            failure(&mut interp, source),
            "SecurityError: random.randbytes() n=1000000 exceeds the limit of 65536"
        );
        assert_eq!(buffer.contents(), "");
        assert_eq!(interp.take_security_events().len(), 1);
    }

    #[test]
    fn test_requests_within_ceiling_pass_through() {
        let (mut interp, buffer) = restricted();
        let source = "\
import random
random.seed(3)
print(len(random.randbytes(8)), len(random.choices('abc', k=5)), len(random.sample(range(50), 10)))
print(1 <= random.randint(1, 6) <= 6, random.choice(['only']))
";
        interp.run(source).unwrap();
        assert_eq!(buffer.contents(), "8 5 10\nTrue only\n");
    }
}
