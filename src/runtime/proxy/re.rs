use super::{arg, override_members};
use crate::lang::ast::CmpOp;
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::modules::re::{pattern_arg, ReModule, SUBJECT_METHODS};
use crate::runtime::modules::{int_arg, member};
use crate::runtime::value::{Args, HashKey, NativeModule, NativeObject, Value};
use std::any::Any;
use std::rc::Rc;

#[derive(Clone, Copy, Debug)]
struct Bounds {
    pattern: usize,
    subject: usize,
}

impl Bounds {
    fn check_pattern(&self, interp: &mut Interpreter, pattern: Option<&Value>) -> RResult<()> {
        if let Some(Value::Str(source)) = pattern {
            let len = source.chars().count();
            if len > self.pattern {
                return Err(interp.security_violation(format!(
                    "Regex pattern length {} exceeds the limit of {}",
                    len, self.pattern
                )));
            }
        }
        Ok(())
    }

    fn check_subject(&self, interp: &mut Interpreter, subject: Option<&Value>) -> RResult<()> {
        if let Some(Value::Str(text)) = subject {
            let len = text.chars().count();
            if len > self.subject {
                return Err(interp.security_violation(format!(
                    "Regex subject length {} exceeds the limit of {}",
                    len, self.subject
                )));
            }
        }
        Ok(())
    }
}

/// Position of the subject string among a pattern method's arguments
fn subject_index(method: &str) -> usize {
    match method {
        "sub" | "subn" => 1,
        _ => 0,
    }
}

/// Compiled pattern whose subject strings are length-checked
#[derive(Debug)]
pub struct BoundedPattern {
    inner: Rc<dyn NativeObject>,
    bounds: Bounds,
}

impl NativeObject for BoundedPattern {
    fn type_name(&self) -> &'static str {
        "re.Pattern"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        self.inner.get_attr(interp, name)
    }

    fn has_method(&self, name: &str) -> bool {
        self.inner.has_method(name)
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        if SUBJECT_METHODS.contains(&name) {
            let subject = arg(&args, subject_index(name), "string").cloned();
            self.bounds.check_subject(interp, subject.as_ref())?;
        }
        self.inner.call_method(interp, name, args)
    }

    fn repr(&self, interp: &mut Interpreter) -> RResult<String> {
        self.inner.repr(interp)
    }

    fn compare(&self, interp: &mut Interpreter, op: CmpOp, other: &Value) -> RResult<Option<bool>> {
        self.inner.compare(interp, op, other)
    }

    fn hash_key(&self) -> Option<HashKey> {
        self.inner.hash_key()
    }
}

/// `re` with pattern and subject length ceilings
pub struct BoundedRe {
    host: ReModule,
    bounds: Bounds,
}

impl BoundedRe {
    pub fn new(max_pattern_len: usize, max_subject_len: usize) -> Self {
        Self {
            host: ReModule,
            bounds: Bounds {
                pattern: max_pattern_len,
                subject: max_subject_len,
            },
        }
    }

    /// Module-level `re.<name>(pattern, ...)` with both checks in front
    fn function(&self, name: &'static str) -> RResult<(&'static str, Value)> {
        let target = member(&self.host, name)?;
        let bounds = self.bounds;
        Ok((
            name,
            Value::native(name, move |interp, args| {
                let pattern = arg(&args, 0, "pattern").cloned();
                bounds.check_pattern(interp, pattern.as_ref())?;
                let subject = arg(&args, subject_index(name) + 1, "string").cloned();
                bounds.check_subject(interp, subject.as_ref())?;
                interp.call(&target, args)
            }),
        ))
    }
}

impl NativeModule for BoundedRe {
    fn name(&self) -> &'static str {
        "re"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let bounds = self.bounds;
        let mut overrides: Vec<(&'static str, Value)> = SUBJECT_METHODS
            .iter()
            .filter_map(|name| self.function(*name).ok())
            .collect();
        overrides.push((
            "compile",
            Value::native("compile", move |interp, args| {
                let [pattern, flags] = args.bind("compile", ["pattern", "flags"], 1)?;
                let pattern = pattern.unwrap_or(Value::None);
                if let Value::Object(object) = &pattern {
                    if object.as_any().is::<BoundedPattern>() && flags.is_none() {
                        return Ok(pattern.clone());
                    }
                }
                bounds.check_pattern(interp, Some(&pattern))?;
                let flags = match flags {
                    Some(flags) => int_arg(&flags, "compile")?,
                    None => 0,
                };
                Ok(Value::object(BoundedPattern {
                    inner: pattern_arg(&pattern, flags)?,
                    bounds,
                }))
            }),
        ));
        override_members(&self.host, overrides)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::presets::standard_ceilings;
    use crate::runtime::interp::Interpreter;
    use crate::runtime::proxy::testing::{failure, restricted_with};
    use crate::runtime::SharedBuffer;

    fn small() -> (Interpreter, SharedBuffer) {
        let mut ceilings = standard_ceilings();
        ceilings.regex_max_pattern_len = 10;
        ceilings.regex_max_subject_len = 20;
        restricted_with(ceilings)
    }

    #[test]
    fn test_long_patterns_and_subjects_are_rejected() {
        let (mut interp, _) = small();
        interp.run("import re\n").unwrap();
        assert_eq!(
            failure(&mut interp, "re.compile('a' * 11)\n"),
            "SecurityError: Regex pattern length 11 exceeds the limit of 10"
        );
        assert_eq!(
            failure(&mut interp, "re.search('a+', 'b' * 21)\n"),
            "SecurityError: Regex subject length 21 exceeds the limit of 20"
        );
        assert_eq!(
            failure(&mut interp, "re.sub('a', 'b', 'c' * 30)\n"),
            "SecurityError: Regex subject length 30 exceeds the limit of 20"
        );
        assert_eq!(
            failure(&mut interp, "p = re.compile('x')\np.findall('x' * 25)\n"),
            "SecurityError: Regex subject length 25 exceeds the limit of 20"
        );
        assert_eq!(interp.take_security_events().len(), 4);
    }

    #[test]
    fn test_bounded_patterns_still_match() {
        let (mut interp, buffer) = small();
        let source = "\
import re
p = re.compile(r'(\\d+)')
print(p.findall('a1b22c333'), re.sub(p, '#', 'x1y2'), p.pattern)
m = re.match(r'(?P<w>\\w+)', 'hello 42')
print(m.group('w'), m.span())
";
        interp.run(source).unwrap();
        assert_eq!(
            buffer.contents(),
            "['1', '22', '333'] x#y# (\\d+)\n\
             hello (0, 5)\n"
        );
    }
}
