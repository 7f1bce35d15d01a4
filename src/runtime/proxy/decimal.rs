use super::override_members;
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::modules::decimal::DecimalModule;
use crate::runtime::modules::member;
use crate::runtime::value::{Args, NativeModule, NativeObject, Value};
use std::any::Any;
use std::rc::Rc;

/// `getcontext()` result whose precision cannot rise above the ceiling
#[derive(Debug)]
pub struct BoundedContext {
    inner: Rc<dyn NativeObject>,
    max_precision: u32,
}

impl BoundedContext {
    fn precision(&self, interp: &mut Interpreter) -> RResult<i64> {
        match self.inner.get_attr(interp, "prec")? {
            Some(Value::Int(prec)) => Ok(prec.min(self.max_precision as i64)),
            _ => Ok(self.max_precision as i64),
        }
    }
}

impl NativeObject for BoundedContext {
    fn type_name(&self) -> &'static str {
        "Context"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        match name {
            "prec" => Ok(Some(Value::Int(self.precision(interp)?))),
            _ => self.inner.get_attr(interp, name),
        }
    }

    fn set_attr(&self, interp: &mut Interpreter, name: &str, value: Value) -> RResult<()> {
        if name == "prec" {
            if let Value::Int(prec) = value {
                if prec > self.max_precision as i64 {
                    return Err(interp.security_violation(format!(
                        "decimal precision {} exceeds the limit of {}",
                        prec, self.max_precision
                    )));
                }
            }
        }
        self.inner.set_attr(interp, name, value)
    }

    fn repr(&self, interp: &mut Interpreter) -> RResult<String> {
        let rounding = match self.inner.get_attr(interp, "rounding")? {
            Some(value) => interp.to_str(&value)?,
            None => String::new(),
        };
        Ok(format!(
            "Context(prec={}, rounding={})",
            self.precision(interp)?,
            rounding
        ))
    }
}

/// `decimal` with a capped context precision
pub struct BoundedDecimal {
    host: DecimalModule,
    max_precision: u32,
}

impl BoundedDecimal {
    pub fn new(max_precision: u32) -> Self {
        Self {
            host: DecimalModule::with_precision(max_precision),
            max_precision,
        }
    }
}

impl NativeModule for BoundedDecimal {
    fn name(&self) -> &'static str {
        "decimal"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let max_precision = self.max_precision;
        let mut overrides = Vec::new();
        if let Ok(getcontext) = member(&self.host, "getcontext") {
            overrides.push((
                "getcontext",
                Value::native("getcontext", move |interp, args: Args| {
                    match interp.call(&getcontext, args)? {
                        Value::Object(inner) => Ok(Value::object(BoundedContext {
                            inner,
                            max_precision,
                        })),
                        other => Ok(other),
                    }
                }),
            ));
        }
        overrides.push(("MAX_PREC", Value::Int(max_precision as i64)));
        override_members(&self.host, overrides)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::presets::standard_ceilings;
    use crate::runtime::proxy::testing::{failure, restricted_with};

    #[test]
    fn test_precision_is_capped() {
        let mut ceilings = standard_ceilings();
        ceilings.decimal_max_precision = 10;
        let (mut interp, buffer) = restricted_with(ceilings);
        let source = "\
from decimal import Decimal, getcontext
print(getcontext().prec, Decimal(1) / Decimal(3))
getcontext().prec = 4
print(getcontext().prec, Decimal(2) / Decimal(3))
";
        interp.run(source).unwrap();
        assert_eq!(buffer.contents(), "10 0.3333333333\n4 0.6667\n");
        assert_eq!(
            failure(&mut interp, "getcontext().prec = 11\n"),
            "SecurityError: decimal precision 11 exceeds the limit of 10"
        );
        assert_eq!(interp.take_security_events().len(), 1);
    }
}
