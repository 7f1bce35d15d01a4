//! Host module registry.
//!
//! These are the unrestricted native modules. The restricted surface never
//! hands them out directly when a bounded proxy exists for the name.

pub mod decimal;
pub mod functools;
pub mod json;
pub mod math;
pub mod random;
pub mod re;
pub mod string;
pub mod time;

use crate::runtime::error::*;
use crate::runtime::value::{NativeModule, Value};
use std::rc::Rc;

/// Names resolvable by the host importer
pub const HOST_MODULES: &[&str] = &[
    "decimal",
    "functools",
    "json",
    "math",
    "random",
    "re",
    "string",
    "time",
];

/// A fresh instance of a host module
pub fn host_module(name: &str) -> Option<Rc<dyn NativeModule>> {
    Some(match name {
        "decimal" => Rc::new(decimal::DecimalModule::new()),
        "functools" => Rc::new(functools::FunctoolsModule),
        "json" => Rc::new(json::JsonModule),
        "math" => Rc::new(math::MathModule),
        "random" => Rc::new(random::RandomModule::new()),
        "re" => Rc::new(re::ReModule),
        "string" => Rc::new(string::StringModule),
        "time" => Rc::new(time::TimeModule::new()),
        _ => return None,
    })
}

/// Look up a member the module is known to export
pub(crate) fn member(module: &dyn NativeModule, name: &str) -> RResult<Value> {
    module
        .members()
        .into_iter()
        .find(|(member, _)| *member == name)
        .map(|(_, value)| value)
        .ok_or_else(|| {
            Exception::new(
                ExcKind::AttributeError,
                format!("module '{}' has no attribute '{}'", module.name(), name),
            )
        })
}

/// Integer argument check shared by the numeric modules
pub(crate) fn int_arg(value: &Value, func: &str) -> RResult<i64> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(value.as_int().unwrap_or(0)),
        other => type_error(format!(
            "{}(): '{}' object cannot be interpreted as an integer",
            func,
            other.type_name()
        )),
    }
}

/// Float argument check shared by the numeric modules
pub(crate) fn float_arg(value: &Value, func: &str) -> RResult<f64> {
    match value {
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => Ok(value.as_float().unwrap_or(0.0)),
        Value::Object(object) => match object.to_float() {
            Some(f) => Ok(f),
            None => type_error(format!(
                "{}(): must be real number, not {}",
                func,
                object.type_name()
            )),
        },
        other => type_error(format!(
            "{}(): must be real number, not {}",
            func,
            other.type_name()
        )),
    }
}

/// String argument check
pub(crate) fn str_arg(value: &Value, func: &str) -> RResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => type_error(format!(
            "{}() argument must be str, not {}",
            func,
            other.type_name()
        )),
    }
}
