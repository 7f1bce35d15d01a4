use super::override_members;
use crate::runtime::modules::time::TimeModule;
use crate::runtime::value::{NativeModule, Value};

/// `time` with clocks and formatting only; `sleep` is trapped
pub struct BoundedTime {
    host: TimeModule,
}

impl BoundedTime {
    pub fn new() -> Self {
        Self {
            host: TimeModule::new(),
        }
    }
}

impl Default for BoundedTime {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeModule for BoundedTime {
    fn name(&self) -> &'static str {
        "time"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        override_members(
            &self.host,
            vec![(
                "sleep",
                Value::native("sleep", |interp, _| {
                    Err(interp.security_violation("time.sleep() is not allowed"))
                }),
            )],
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::proxy::testing::{failure, restricted};

    #[test]
    fn test_sleep_is_trapped_and_recorded() {
        let (mut interp, _) = restricted();
        assert_eq!(
            failure(&mut interp, "import time\ntime.sleep(10)\n"),
            "SecurityError: time.sleep() is not allowed"
        );
        let events = interp.take_security_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line, 2);
    }

    #[test]
    fn test_clocks_pass_through() {
        let (mut interp, buffer) = restricted();
        let source = "\
import time
t0 = time.perf_counter()
print(time.time() > 0, time.perf_counter() >= t0, time.strftime('%Y', time.gmtime(0)))
";
        interp.run(source).unwrap();
        assert_eq!(buffer.contents(), "True True 1970\n");
    }
}
