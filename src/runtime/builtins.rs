//! The host builtin table.
//!
//! This is the complete, unrestricted operation table of the interpreter,
//! dangerous entries included. The restricted surface copies it and keeps
//! only the allow-listed names; every name here must be classified by the
//! allow-list self-check as either allowed or disallowed.

use crate::lang::ast::BinOp;
use crate::lang::{parse_expression, parse_module};
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::methods;
use crate::runtime::value::*;
use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::BufRead;
use std::rc::Rc;

type Builtin = fn(&mut Interpreter, Args) -> RResult<Value>;

/// Types callable as constructors
const TYPES: &[(&str, TypeKind)] = &[
    ("bool", TypeKind::Bool),
    ("bytes", TypeKind::Bytes),
    ("dict", TypeKind::Dict),
    ("float", TypeKind::Float),
    ("int", TypeKind::Int),
    ("list", TypeKind::List),
    ("object", TypeKind::Object),
    ("range", TypeKind::Range),
    ("set", TypeKind::Set),
    ("str", TypeKind::Str),
    ("tuple", TypeKind::Tuple),
    ("type", TypeKind::Type),
];

const FUNCTIONS: &[(&str, Builtin)] = &[
    ("abs", builtin_abs),
    ("all", builtin_all),
    ("any", builtin_any),
    ("bin", builtin_bin),
    ("callable", builtin_callable),
    ("chr", builtin_chr),
    ("divmod", builtin_divmod),
    ("enumerate", builtin_enumerate),
    ("filter", builtin_filter),
    ("format", builtin_format),
    ("hasattr", builtin_hasattr),
    ("hash", builtin_hash),
    ("hex", builtin_hex),
    ("id", builtin_id),
    ("isinstance", builtin_isinstance),
    ("issubclass", builtin_issubclass),
    ("iter", builtin_iter),
    ("len", builtin_len),
    ("map", builtin_map),
    ("max", builtin_max),
    ("min", builtin_min),
    ("next", builtin_next),
    ("oct", builtin_oct),
    ("ord", builtin_ord),
    ("pow", builtin_pow),
    ("print", builtin_print),
    ("repr", builtin_repr),
    ("reversed", builtin_reversed),
    ("round", builtin_round),
    ("sorted", builtin_sorted),
    ("sum", builtin_sum),
    ("super", builtin_super),
    ("zip", builtin_zip),
    // Present in the host so the restricted surface has something to remove
    ("__import__", builtin_import),
    ("breakpoint", builtin_breakpoint),
    ("compile", builtin_compile),
    ("delattr", builtin_delattr),
    ("eval", builtin_eval),
    ("exec", builtin_exec),
    ("exit", builtin_exit),
    ("getattr", builtin_getattr),
    ("globals", builtin_globals),
    ("input", builtin_input),
    ("locals", builtin_locals),
    ("open", builtin_open),
    ("quit", builtin_exit),
    ("setattr", builtin_setattr),
    ("vars", builtin_vars),
];

/// Every name the host table provides
pub fn host_names() -> Vec<&'static str> {
    TYPES
        .iter()
        .map(|(name, _)| *name)
        .chain(FUNCTIONS.iter().map(|(name, _)| *name))
        .chain(ExcKind::builtin_names())
        .collect()
}

pub fn host_namespace(interp: &Interpreter) -> IndexMap<String, Value> {
    let mut table = IndexMap::new();
    for (name, kind) in TYPES {
        table.insert(name.to_string(), Value::Type(*kind));
    }
    for (name, func) in FUNCTIONS {
        let func = *func;
        table.insert(name.to_string(), Value::native(name, func));
    }
    for kind in ExcKind::ALL {
        if *kind != ExcKind::SyntaxError {
            table.insert(kind.name().to_string(), Value::Class(interp.exc_class(*kind)));
        }
    }
    table
}

fn exception_args(instance: &Value) -> Vec<Value> {
    match instance {
        Value::Instance(instance) => match instance.attrs.borrow().get("args") {
            Some(Value::Tuple(items)) => items.to_vec(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Built-in exception classes, each linked to its parent
pub fn exception_classes() -> HashMap<ExcKind, Rc<Class>> {
    let mut classes: HashMap<ExcKind, Rc<Class>> = HashMap::new();
    for kind in ExcKind::ALL {
        let base = kind.parent().and_then(|parent| classes.get(&parent).cloned());
        let class = Class {
            exception: Some(*kind),
            ..Class::new(kind.name(), base)
        };
        if *kind == ExcKind::BaseException {
            let mut attrs = class.attrs.borrow_mut();
            attrs.insert(
                "__init__".to_string(),
                Value::native("__init__", |_, mut args| {
                    if args.positional.is_empty() {
                        return type_error("__init__() missing 'self'");
                    }
                    let receiver = args.positional.remove(0);
                    if let Value::Instance(instance) = &receiver {
                        instance
                            .attrs
                            .borrow_mut()
                            .insert("args".to_string(), Value::tuple(args.positional));
                    }
                    none()
                }),
            );
            attrs.insert(
                "__str__".to_string(),
                Value::native("__str__", |interp, args| {
                    let [receiver] = args.exactly("__str__")?;
                    let mut items = exception_args(&receiver);
                    Ok(Value::str(match items.len() {
                        0 => String::new(),
                        1 => interp.to_str(&items.remove(0))?,
                        _ => interp.repr(&Value::tuple(items))?,
                    }))
                }),
            );
            attrs.insert(
                "__repr__".to_string(),
                Value::native("__repr__", |interp, args| {
                    let [receiver] = args.exactly("__repr__")?;
                    let name = receiver.type_name();
                    let mut items = exception_args(&receiver);
                    Ok(Value::str(match items.len() {
                        1 => format!("{}({})", name, interp.repr(&items.remove(0))?),
                        _ => format!("{}{}", name, interp.repr(&Value::tuple(items))?),
                    }))
                }),
            );
        }
        classes.insert(*kind, Rc::new(class));
    }
    classes
}

/// Attributes looked up on a built-in type object
pub fn type_attribute(kind: TypeKind, name: &str) -> Option<Value> {
    match (kind, name) {
        (_, "__name__" | "__qualname__") => Some(Value::str(kind.name())),
        (TypeKind::Dict, "fromkeys") => Some(Value::native("fromkeys", |interp, args| {
            let [keys, value] = args.bind("fromkeys", ["iterable", "value"], 1)?;
            let value = value.unwrap_or(Value::None);
            let mut dict = Dict::new();
            for key in interp.collect(&keys.unwrap_or(Value::None))? {
                dict.insert(key.hash_key()?, key, value.clone());
            }
            Ok(Value::dict(dict))
        })),
        _ => methods::unbound(kind, name),
    }
}

// ---- conversions ----

fn float_to_int(f: f64) -> RResult<i64> {
    if f.is_nan() {
        return value_error("cannot convert float NaN to integer");
    }
    if f.is_infinite() {
        return overflow_error("cannot convert float infinity to integer");
    }
    let truncated = f.trunc();
    if !(-9.223_372_036_854_776e18..9.223_372_036_854_776e18).contains(&truncated) {
        return overflow_error("integer overflow");
    }
    Ok(truncated as i64)
}

fn parse_int(text: &str, base: u32) -> RResult<i64> {
    let invalid = || {
        Exception::new(
            ExcKind::ValueError,
            format!(
                "invalid literal for int() with base {}: {}",
                base,
                crate::runtime::format::str_repr(text)
            ),
        )
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = unsigned.to_ascii_lowercase();
    let prefixed = |prefix: &str| lower.strip_prefix(prefix).map(str::to_string);
    let (radix, digits) = match base {
        0 => {
            if let Some(rest) = prefixed("0x") {
                (16, rest)
            } else if let Some(rest) = prefixed("0o") {
                (8, rest)
            } else if let Some(rest) = prefixed("0b") {
                (2, rest)
            } else {
                (10, lower.clone())
            }
        }
        16 => (16, prefixed("0x").unwrap_or_else(|| lower.clone())),
        8 => (8, prefixed("0o").unwrap_or_else(|| lower.clone())),
        2 => (2, prefixed("0b").unwrap_or_else(|| lower.clone())),
        radix => (radix, lower.clone()),
    };
    let digits = digits.strip_prefix('_').unwrap_or(&digits).to_string();
    if digits.is_empty()
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c == '_' || c.is_digit(radix))
    {
        return Err(invalid());
    }
    let clean: String = digits.chars().filter(|c| *c != '_').collect();
    let signed = if negative { format!("-{}", clean) } else { clean };
    i64::from_str_radix(&signed, radix).or_else(|_| overflow_error("integer overflow"))
}

fn parse_float(text: &str) -> RResult<f64> {
    let trimmed = text.trim();
    let valid_underscores = !trimmed.starts_with('_') && !trimmed.ends_with('_') && !trimmed.contains("__");
    let clean: String = trimmed.chars().filter(|c| *c != '_').collect();
    match clean.parse::<f64>() {
        Ok(value) if valid_underscores && !clean.is_empty() => Ok(value),
        _ => value_error(format!(
            "could not convert string to float: {}",
            crate::runtime::format::str_repr(text)
        )),
    }
}

fn to_int(interp: &mut Interpreter, value: &Value) -> RResult<i64> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(value.as_int().unwrap_or(0)),
        Value::Float(f) => float_to_int(*f),
        Value::Str(s) => parse_int(s, 10),
        Value::Instance(instance) => match interp.call_special(instance, "__int__", Vec::new())? {
            Some(Value::Int(i)) => Ok(i),
            Some(other) => type_error(format!(
                "__int__ returned non-int (type {})",
                other.type_name()
            )),
            None => type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                instance.class.name
            )),
        },
        Value::Object(object) => match object.to_int() {
            Some(i) => Ok(i),
            None => type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                object.type_name()
            )),
        },
        other => type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        )),
    }
}

fn to_float(interp: &mut Interpreter, value: &Value) -> RResult<f64> {
    match value {
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => Ok(value.as_float().unwrap_or(0.0)),
        Value::Str(s) => parse_float(s),
        Value::Instance(instance) => match interp.call_special(instance, "__float__", Vec::new())? {
            Some(Value::Float(f)) => Ok(f),
            Some(other) => type_error(format!(
                "__float__ returned non-float (type {})",
                other.type_name()
            )),
            None => type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                instance.class.name
            )),
        },
        Value::Object(object) => match object.to_float() {
            Some(f) => Ok(f),
            None => type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                object.type_name()
            )),
        },
        other => type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name()
        )),
    }
}

fn range_arg(value: &Value) -> RResult<i64> {
    value.as_int().ok_or_else(|| {
        Exception::new(
            ExcKind::TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ),
        )
    })
}

/// Calling a built-in type
pub fn construct(interp: &mut Interpreter, kind: TypeKind, args: Args) -> RResult<Value> {
    match kind {
        TypeKind::Bool => {
            let [value] = args.bind("bool", ["x"], 0)?;
            match value {
                Some(value) => Ok(Value::Bool(interp.truthy(&value)?)),
                None => Ok(Value::Bool(false)),
            }
        }
        TypeKind::Int => {
            let [value, base] = args.bind("int", ["x", "base"], 0)?;
            match (value, base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(value), None) => Ok(Value::Int(to_int(interp, &value)?)),
                (Some(Value::Str(text)), Some(base)) => {
                    let base = range_arg(&base)?;
                    if base != 0 && !(2..=36).contains(&base) {
                        return value_error("int() base must be >= 2 and <= 36, or 0");
                    }
                    Ok(Value::Int(parse_int(&text, base as u32)?))
                }
                (Some(_), Some(_)) => type_error("int() can't convert non-string with explicit base"),
            }
        }
        TypeKind::Float => {
            let [value] = args.bind("float", ["x"], 0)?;
            match value {
                Some(value) => Ok(Value::Float(to_float(interp, &value)?)),
                None => Ok(Value::Float(0.0)),
            }
        }
        TypeKind::Str => {
            let [value, encoding, _errors] = args.bind("str", ["object", "encoding", "errors"], 0)?;
            match (value, encoding) {
                (None, _) => Ok(Value::str("")),
                (Some(Value::Bytes(bytes)), Some(_)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => Ok(Value::str(text)),
                    Err(_) => value_error("'utf-8' codec can't decode bytes"),
                },
                (Some(value), _) => Ok(Value::str(interp.to_str(&value)?)),
            }
        }
        TypeKind::Bytes => {
            let [value, _encoding, _errors] = args.bind("bytes", ["source", "encoding", "errors"], 0)?;
            match value {
                None => Ok(Value::bytes(Vec::new())),
                Some(Value::Str(text)) => Ok(Value::bytes(text.as_bytes().to_vec())),
                Some(Value::Bytes(bytes)) => Ok(Value::Bytes(bytes)),
                Some(Value::Int(n)) => {
                    if n < 0 {
                        return value_error("negative count");
                    }
                    interp.check_len(n as usize)?;
                    Ok(Value::bytes(vec![0; n as usize]))
                }
                Some(iterable) => {
                    let mut out = Vec::new();
                    for item in interp.collect(&iterable)? {
                        match item.as_int().map(u8::try_from) {
                            Some(Ok(byte)) => out.push(byte),
                            Some(Err(_)) => return value_error("bytes must be in range(0, 256)"),
                            None => {
                                return type_error(format!(
                                    "'{}' object cannot be interpreted as an integer",
                                    item.type_name()
                                ))
                            }
                        }
                    }
                    Ok(Value::bytes(out))
                }
            }
        }
        TypeKind::List => {
            let [value] = args.bind("list", ["iterable"], 0)?;
            match value {
                Some(value) => Ok(Value::list(interp.collect(&value)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        TypeKind::Tuple => {
            let [value] = args.bind("tuple", ["iterable"], 0)?;
            match value {
                Some(Value::Tuple(items)) => Ok(Value::Tuple(items)),
                Some(value) => Ok(Value::tuple(interp.collect(&value)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        TypeKind::Set => {
            let [value] = args.bind("set", ["iterable"], 0)?;
            let mut set = Set::new();
            if let Some(value) = value {
                for item in interp.collect(&value)? {
                    set.insert(item.hash_key()?, item);
                }
            }
            Ok(Value::set(set))
        }
        TypeKind::Dict => {
            let Args {
                mut positional,
                keywords,
            } = args;
            if positional.len() > 1 {
                return type_error(format!(
                    "dict expected at most 1 argument, got {}",
                    positional.len()
                ));
            }
            let dict = RefCell::new(Dict::new());
            if let Some(source) = positional.pop() {
                methods::merge_into(interp, &dict, &source)?;
            }
            for (key, value) in keywords {
                dict.borrow_mut().set_str(&key, value);
            }
            Ok(Value::dict(dict.into_inner()))
        }
        TypeKind::Range => {
            args.no_keywords("range")?;
            let bounds = args
                .positional
                .iter()
                .map(range_arg)
                .collect::<RResult<Vec<i64>>>()?;
            let (start, stop, step) = match bounds[..] {
                [stop] => (0, stop, 1),
                [start, stop] => (start, stop, 1),
                [start, stop, step] => (start, stop, step),
                _ => {
                    return type_error(format!(
                        "range expected at most 3 arguments, got {}",
                        bounds.len()
                    ))
                }
            };
            if step == 0 {
                return value_error("range() arg 3 must not be zero");
            }
            Ok(Value::Range(RangeValue { start, stop, step }))
        }
        TypeKind::Slice => {
            args.no_keywords("slice")?;
            let bound = |value: &Value| -> RResult<Option<i64>> {
                match value {
                    Value::None => Ok(None),
                    other => range_arg(other).map(Some),
                }
            };
            let parts = args
                .positional
                .iter()
                .map(bound)
                .collect::<RResult<Vec<_>>>()?;
            let slice = match parts[..] {
                [upper] => SliceValue { lower: None, upper, step: None },
                [lower, upper] => SliceValue { lower, upper, step: None },
                [lower, upper, step] => SliceValue { lower, upper, step },
                _ => return type_error("slice expected 1 to 3 arguments"),
            };
            Ok(Value::Slice(Rc::new(slice)))
        }
        TypeKind::Object => {
            args.exactly::<0>("object")?;
            Ok(Value::Instance(Rc::new(Instance::new(interp.object_class()))))
        }
        TypeKind::Type => {
            let [value] = args.exactly("type")?;
            Ok(match &value {
                Value::Instance(instance) => Value::Class(instance.class.clone()),
                Value::Object(object) => Value::object(NativeClass {
                    name: object.type_name(),
                    module: "builtins",
                    constructor: None,
                }),
                other => Value::Type(other.builtin_type().unwrap_or(TypeKind::Object)),
            })
        }
        other => type_error(format!("cannot create '{}' instances", other.name())),
    }
}

// ---- predicates and introspection ----

fn class_matches(interp: &mut Interpreter, value: &Value, classinfo: &Value) -> RResult<bool> {
    match classinfo {
        Value::Type(TypeKind::Object) => Ok(true),
        Value::Type(kind) => Ok(value
            .builtin_type()
            .is_some_and(|actual| actual.is_subtype_of(*kind))),
        Value::Class(class) => Ok(match value {
            Value::Instance(instance) => instance.class.is_subclass_of(class),
            _ => false,
        }),
        Value::Object(object) => match object.as_any().downcast_ref::<NativeClass>() {
            Some(native) => Ok(native.instance_check(value)),
            None => type_error("isinstance() arg 2 must be a type, a tuple of types, or a union"),
        },
        Value::Tuple(options) => {
            for option in options.iter() {
                if class_matches(interp, value, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => type_error("isinstance() arg 2 must be a type, a tuple of types, or a union"),
    }
}

fn builtin_isinstance(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value, classinfo] = args.exactly("isinstance")?;
    Ok(Value::Bool(class_matches(interp, &value, &classinfo)?))
}

fn builtin_issubclass(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [class, classinfo] = args.exactly("issubclass")?;
    fn check(class: &Value, classinfo: &Value) -> RResult<bool> {
        match (class, classinfo) {
            (_, Value::Tuple(options)) => {
                for option in options.iter() {
                    if check(class, option)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Value::Class(_) | Value::Type(_), Value::Type(TypeKind::Object)) => Ok(true),
            (Value::Class(sub), Value::Class(sup)) => Ok(sub.is_subclass_of(sup)),
            (Value::Type(sub), Value::Type(sup)) => Ok(sub.is_subtype_of(*sup)),
            (Value::Class(_), Value::Type(_)) | (Value::Type(_), Value::Class(_)) => Ok(false),
            (Value::Class(_) | Value::Type(_), _) => {
                type_error("issubclass() arg 2 must be a class, a tuple of classes, or a union")
            }
            _ => type_error("issubclass() arg 1 must be a class"),
        }
    }
    Ok(Value::Bool(check(&class, &classinfo)?))
}

fn builtin_callable(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("callable")?;
    Ok(Value::Bool(interp.is_callable(&value)))
}

fn builtin_hasattr(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [object, name] = args.exactly("hasattr")?;
    let Value::Str(name) = name else {
        return type_error("hasattr(): attribute name must be string");
    };
    Ok(Value::Bool(interp.has_attr(&object, &name)?))
}

fn builtin_hash(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("hash")?;
    if let Value::Instance(instance) = &value {
        if let Some(result) = interp.call_special(instance, "__hash__", Vec::new())? {
            return match result.as_int() {
                Some(_) => Ok(result),
                None => type_error("__hash__ method should return an integer"),
            };
        }
    }
    Ok(Value::Int(value.hash_key()?.hash_value()))
}

fn builtin_id(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("id")?;
    Ok(Value::Int(value.id() as i64))
}

fn builtin_len(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("len")?;
    Ok(Value::Int(interp.len_of(&value)? as i64))
}

fn builtin_repr(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("repr")?;
    Ok(Value::str(interp.repr(&value)?))
}

fn builtin_format(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value, spec] = args.bind("format", ["value", "format_spec"], 1)?;
    let spec = match spec {
        None => String::new(),
        Some(Value::Str(spec)) => spec.to_string(),
        Some(other) => {
            return type_error(format!(
                "format() argument 2 must be str, not {}",
                other.type_name()
            ))
        }
    };
    Ok(Value::str(interp.format_value(&value.unwrap_or(Value::None), &spec)?))
}

/// Zero-argument form resolves the class that defined the running method
fn builtin_super(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    args.no_keywords("super")?;
    let (class, receiver) = match args.positional.len() {
        0 => {
            let frame = interp
                .frames
                .iter()
                .rev()
                .find(|frame| frame.function.is_some());
            let Some(frame) = frame else {
                return runtime_error("super(): no arguments");
            };
            let owner = frame
                .function
                .as_ref()
                .and_then(|func| func.owner.borrow().as_ref().and_then(|owner| owner.upgrade()));
            match (owner, frame.receiver.clone()) {
                (Some(owner), Some(receiver)) => (owner, receiver),
                _ => return runtime_error("super(): __class__ cell not found"),
            }
        }
        2 => {
            let [class, receiver] = args.exactly("super")?;
            let Value::Class(class) = class else {
                return type_error("super() argument 1 must be a type");
            };
            (class, receiver)
        }
        n => return type_error(format!("super() takes 0 or 2 arguments ({} given)", n)),
    };
    Ok(Value::Super(Rc::new(SuperProxy { class, receiver })))
}

// ---- numbers ----

fn builtin_abs(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("abs")?;
    match &value {
        Value::Int(_) | Value::Bool(_) => match value.as_int().unwrap_or(0).checked_abs() {
            Some(i) => Ok(Value::Int(i)),
            None => overflow_error("integer overflow"),
        },
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Instance(instance) => match interp.call_special(instance, "__abs__", Vec::new())? {
            Some(result) => Ok(result),
            None => type_error(format!(
                "bad operand type for abs(): '{}'",
                instance.class.name
            )),
        },
        Value::Object(object) if object.has_method("__abs__") => {
            object.call_method(interp, "__abs__", Args::default())
        }
        other => type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        )),
    }
}

fn int_text(value: &Value, radix: u32, prefix: &str) -> RResult<Value> {
    let Some(i) = value.as_int() else {
        return type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ));
    };
    let magnitude = i.unsigned_abs();
    let digits = match radix {
        2 => format!("{:b}", magnitude),
        8 => format!("{:o}", magnitude),
        _ => format!("{:x}", magnitude),
    };
    Ok(Value::str(format!(
        "{}{}{}",
        if i < 0 { "-" } else { "" },
        prefix,
        digits
    )))
}

fn builtin_bin(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("bin")?;
    int_text(&value, 2, "0b")
}

fn builtin_oct(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("oct")?;
    int_text(&value, 8, "0o")
}

fn builtin_hex(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("hex")?;
    int_text(&value, 16, "0x")
}

fn builtin_chr(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("chr")?;
    let code = range_arg(&value)?;
    match u32::try_from(code).ok().and_then(char::from_u32) {
        Some(c) => Ok(Value::str(c.to_string())),
        None => value_error("chr() arg not in range(0x110000)"),
    }
}

fn builtin_ord(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [value] = args.exactly("ord")?;
    match &value {
        Value::Str(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                )),
            }
        }
        Value::Bytes(b) if b.len() == 1 => Ok(Value::Int(b[0] as i64)),
        other => type_error(format!(
            "ord() expected string of length 1, but {} found",
            other.type_name()
        )),
    }
}

fn builtin_divmod(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [a, b] = args.exactly("divmod")?;
    let quotient = interp.binary_op(BinOp::FloorDiv, &a, &b)?;
    let remainder = interp.binary_op(BinOp::Mod, &a, &b)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn builtin_pow(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [base, exp, modulus] = args.bind("pow", ["base", "exp", "mod"], 2)?;
    let (base, exp) = (base.unwrap_or(Value::None), exp.unwrap_or(Value::None));
    let modulus = match modulus {
        None | Some(Value::None) => return interp.binary_op(BinOp::Pow, &base, &exp),
        Some(modulus) => modulus,
    };
    let (Some(b), Some(e), Some(m)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
        return type_error("pow() 3rd argument not allowed unless all arguments are integers");
    };
    if m == 0 {
        return value_error("pow() 3rd argument cannot be 0");
    }
    if e < 0 {
        return value_error("pow() 2nd argument cannot be negative when 3rd argument specified");
    }
    let m = m as i128;
    let mut result: i128 = 1;
    let mut b = (b as i128).rem_euclid(m.abs());
    let mut e = e;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m.abs());
        }
        b = (b * b).rem_euclid(m.abs());
        e >>= 1;
    }
    result %= m.abs();
    if m < 0 && result != 0 {
        result += m;
    }
    Ok(Value::Int(result as i64))
}

fn round_float(f: f64, digits: i64) -> f64 {
    if !f.is_finite() {
        return f;
    }
    if digits >= 0 {
        let digits = digits.min(300) as usize;
        format!("{:.*}", digits, f).parse().unwrap_or(f)
    } else {
        let scale = 10f64.powi((-digits).min(308) as i32);
        (f / scale).round_ties_even() * scale
    }
}

fn builtin_round(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [number, ndigits] = args.bind("round", ["number", "ndigits"], 1)?;
    let number = number.unwrap_or(Value::None);
    let digits = match ndigits {
        None | Some(Value::None) => None,
        Some(value) => Some(range_arg(&value)?),
    };
    match (&number, digits) {
        (Value::Float(f), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Value::Float(f), Some(digits)) => Ok(Value::Float(round_float(*f, digits))),
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(number.as_int().unwrap_or(0))),
        (Value::Int(_) | Value::Bool(_), Some(digits)) => {
            let i = number.as_int().unwrap_or(0);
            if digits >= 0 || digits < -18 {
                return Ok(Value::Int(if digits >= 0 { i } else { 0 }));
            }
            let scale = 10i128.pow((-digits) as u32);
            let value = i as i128;
            let quotient = value.div_euclid(scale);
            let remainder = value.rem_euclid(scale);
            let rounded = match (remainder * 2).cmp(&scale) {
                std::cmp::Ordering::Greater => quotient + 1,
                std::cmp::Ordering::Less => quotient,
                std::cmp::Ordering::Equal => quotient + (quotient & 1),
            };
            i64::try_from(rounded * scale)
                .map(Value::Int)
                .or_else(|_| overflow_error("integer overflow"))
        }
        (Value::Instance(instance), _) => {
            let extra = digits.map(Value::Int).into_iter().collect();
            match interp.call_special(instance, "__round__", extra)? {
                Some(result) => Ok(result),
                None => type_error(format!(
                    "type {} doesn't define __round__ method",
                    instance.class.name
                )),
            }
        }
        (Value::Object(object), _) if object.has_method("__round__") => {
            let extra = digits.map(Value::Int).into_iter().collect();
            object.call_method(interp, "__round__", Args::new(extra))
        }
        (other, _) => type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        )),
    }
}

fn builtin_sum(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterable, start] = args.bind("sum", ["iterable", "start"], 1)?;
    let mut total = start.unwrap_or(Value::Int(0));
    match &total {
        Value::Str(_) => return type_error("sum() can't sum strings [use ''.join(seq) instead]"),
        Value::Bytes(_) => return type_error("sum() can't sum bytes [use b''.join(seq) instead]"),
        _ => {}
    }
    let cursor = interp.iterate(&iterable.unwrap_or(Value::None))?;
    while let Some(item) = interp.next_item(&cursor)? {
        total = interp.binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn extremum(interp: &mut Interpreter, mut args: Args, name: &str, want_max: bool) -> RResult<Value> {
    let key = args.take_keyword("key").filter(|key| !key.is_none());
    let default = args.take_keyword("default");
    if let Some((keyword, _)) = args.keywords.first() {
        return type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, keyword
        ));
    }
    let items = match args.positional.len() {
        0 => {
            return type_error(format!("{} expected at least 1 argument, got 0", name));
        }
        1 => {
            let iterable = args.positional.remove(0);
            interp.collect(&iterable)?
        }
        _ => {
            if default.is_some() {
                return type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                ));
            }
            args.positional
        }
    };
    let mut items = items.into_iter();
    let Some(mut best) = items.next() else {
        return match default {
            Some(default) => Ok(default),
            None => value_error(format!("{}() arg is an empty sequence", name)),
        };
    };
    let mut best_key = match &key {
        Some(key) => interp.call_with(key, vec![best.clone()])?,
        None => best.clone(),
    };
    for item in items {
        let item_key = match &key {
            Some(key) => interp.call_with(key, vec![item.clone()])?,
            None => item.clone(),
        };
        let better = if want_max {
            interp.less_than(&best_key, &item_key)?
        } else {
            interp.less_than(&item_key, &best_key)?
        };
        if better {
            best = item;
            best_key = item_key;
        }
    }
    Ok(best)
}

fn builtin_max(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    extremum(interp, args, "max", true)
}

fn builtin_min(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    extremum(interp, args, "min", false)
}

// ---- iteration ----

fn builtin_all(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterable] = args.exactly("all")?;
    let cursor = interp.iterate(&iterable)?;
    while let Some(item) = interp.next_item(&cursor)? {
        if !interp.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn builtin_any(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterable] = args.exactly("any")?;
    let cursor = interp.iterate(&iterable)?;
    while let Some(item) = interp.next_item(&cursor)? {
        if interp.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn builtin_enumerate(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterable, start] = args.bind("enumerate", ["iterable", "start"], 1)?;
    let mut index = match start {
        Some(start) => range_arg(&start)?,
        None => 0,
    };
    let items = interp.collect(&iterable.unwrap_or(Value::None))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(Value::tuple(vec![Value::Int(index), item]));
        index += 1;
    }
    Ok(Value::iterator(out))
}

fn builtin_filter(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [func, iterable] = args.exactly("filter")?;
    let mut out = Vec::new();
    for item in interp.collect(&iterable)? {
        let keep = if func.is_none() {
            interp.truthy(&item)?
        } else {
            let result = interp.call_with(&func, vec![item.clone()])?;
            interp.truthy(&result)?
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::iterator(out))
}

fn builtin_map(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    args.no_keywords("map")?;
    let mut positional = args.positional.into_iter();
    let Some(func) = positional.next() else {
        return type_error("map() must have at least two arguments.");
    };
    let columns = positional
        .map(|iterable| interp.collect(&iterable))
        .collect::<RResult<Vec<_>>>()?;
    if columns.is_empty() {
        return type_error("map() must have at least two arguments.");
    }
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let row = columns.iter().map(|column| column[i].clone()).collect();
        out.push(interp.call_with(&func, row)?);
    }
    Ok(Value::iterator(out))
}

fn builtin_zip(interp: &mut Interpreter, mut args: Args) -> RResult<Value> {
    let strict = match args.take_keyword("strict") {
        Some(value) => interp.truthy(&value)?,
        None => false,
    };
    args.no_keywords("zip")?;
    let columns = args
        .positional
        .iter()
        .map(|iterable| interp.collect(iterable))
        .collect::<RResult<Vec<_>>>()?;
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    if strict && columns.iter().any(|column| column.len() != len) {
        return value_error("zip() arguments have different lengths");
    }
    let rows = (0..len)
        .map(|i| Value::tuple(columns.iter().map(|column| column[i].clone()).collect()))
        .collect();
    Ok(Value::iterator(rows))
}

fn builtin_iter(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterable] = args.exactly("iter")?;
    Ok(Value::Iterator(interp.iterate(&iterable)?))
}

fn builtin_next(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterator, default] = args.bind("next", ["iterator", "default"], 1)?;
    let iterator = iterator.unwrap_or(Value::None);
    let item = match &iterator {
        Value::Iterator(cursor) => interp.next_item(cursor)?,
        Value::Instance(instance) if instance.class.lookup("__next__").is_some() => {
            match interp.call_special(instance, "__next__", Vec::new()) {
                Ok(item) => item,
                Err(exc) if exc.is(ExcKind::StopIteration) && default.is_some() => None,
                Err(exc) => return Err(exc),
            }
        }
        other => {
            return type_error(format!(
                "'{}' object is not an iterator",
                other.type_name()
            ))
        }
    };
    match (item, default) {
        (Some(item), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => stop_iteration(""),
    }
}

fn builtin_reversed(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [sequence] = args.exactly("reversed")?;
    let mut items = match &sequence {
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Bytes(_) | Value::Range(_) => {
            interp.collect(&sequence)?
        }
        Value::Dict(dict) => dict.borrow().keys(),
        Value::Instance(instance) => {
            if let Some(result) = interp.call_special(instance, "__reversed__", Vec::new())? {
                return Ok(result);
            }
            let len = interp.len_of(&sequence)?;
            let mut items = Vec::with_capacity(len);
            for i in 0..len {
                items.push(interp.get_item(&sequence, &Value::Int(i as i64))?);
            }
            items
        }
        other => {
            return type_error(format!(
                "'{}' object is not reversible",
                other.type_name()
            ))
        }
    };
    items.reverse();
    Ok(Value::iterator(items))
}

fn builtin_sorted(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterable, key, reverse] = args.bind("sorted", ["iterable", "key", "reverse"], 1)?;
    let items = interp.collect(&iterable.unwrap_or(Value::None))?;
    let reverse = match reverse {
        Some(value) => interp.truthy(&value)?,
        None => false,
    };
    let sorted = interp.sort_values(items, key.as_ref(), reverse)?;
    Ok(Value::list(sorted))
}

fn builtin_print(interp: &mut Interpreter, mut args: Args) -> RResult<Value> {
    let mut text_option = |name: &str, default: &str| -> RResult<String> {
        match args.take_keyword(name) {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => type_error(format!(
                "{} must be None or a string, not {}",
                name,
                other.type_name()
            )),
        }
    };
    let sep = text_option("sep", " ")?;
    let end = text_option("end", "\n")?;
    args.take_keyword("flush");
    match args.take_keyword("file") {
        None | Some(Value::None) => {}
        Some(_) => return type_error("print() only writes to standard output"),
    }
    args.no_keywords("print")?;
    let mut parts = Vec::with_capacity(args.positional.len());
    for value in &args.positional {
        parts.push(interp.to_str(value)?);
    }
    let mut text = parts.join(&sep);
    text.push_str(&end);
    interp.write_stdout(&text);
    none()
}

// ---- dangerous host operations ----

/// Result of `compile()`
#[derive(Debug)]
struct CodeObject {
    source: String,
    mode: String,
}

impl NativeObject for CodeObject {
    fn type_name(&self) -> &'static str {
        "code"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn source_arg(value: &Value, func: &str) -> RResult<(String, Option<String>)> {
    match value {
        Value::Str(s) => Ok((s.to_string(), None)),
        Value::Object(object) => match object.as_any().downcast_ref::<CodeObject>() {
            Some(code) => Ok((code.source.clone(), Some(code.mode.clone()))),
            None => type_error(format!("{}() arg 1 must be a string or code object", func)),
        },
        _ => type_error(format!("{}() arg 1 must be a string or code object", func)),
    }
}

fn builtin_eval(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [source] = args.exactly("eval")?;
    let (source, mode) = source_arg(&source, "eval")?;
    if mode.as_deref() == Some("exec") {
        interp.exec_string(&source)?;
        return none();
    }
    interp.eval_string(source.trim())
}

fn builtin_exec(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [source] = args.exactly("exec")?;
    let (source, _) = source_arg(&source, "exec")?;
    interp.exec_string(&source)?;
    none()
}

fn builtin_compile(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [source, _filename, mode] = args.bind("compile", ["source", "filename", "mode"], 3)?;
    let source = match source {
        Some(Value::Str(s)) => s.to_string(),
        _ => return type_error("compile() arg 1 must be a string"),
    };
    let mode = match mode {
        Some(Value::Str(mode)) if matches!(&*mode, "exec" | "eval" | "single") => mode.to_string(),
        _ => return value_error("compile() mode must be 'exec', 'eval' or 'single'"),
    };
    let checked = if mode == "eval" {
        parse_expression(source.trim()).map(|_| ())
    } else {
        parse_module(&source).map(|_| ())
    };
    if let Err(err) = checked {
        return Err(Exception::new(ExcKind::SyntaxError, err.message));
    }
    Ok(Value::object(CodeObject { source, mode }))
}

fn builtin_import(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [name, _globals, _locals, _fromlist, level] = args.bind(
        "__import__",
        ["name", "globals", "locals", "fromlist", "level"],
        1,
    )?;
    let Some(Value::Str(name)) = name else {
        return type_error("__import__() argument 1 must be str");
    };
    let level = match level {
        Some(level) => range_arg(&level)?.max(0) as u32,
        None => 0,
    };
    interp.import_module(&name, level)
}

fn builtin_breakpoint(_interp: &mut Interpreter, _args: Args) -> RResult<Value> {
    none()
}

fn builtin_exit(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [code] = args.bind("exit", ["code"], 0)?;
    let message = match code {
        None | Some(Value::None) => String::new(),
        Some(code) => interp.to_str(&code)?,
    };
    Err(Exception::new(ExcKind::SystemExit, message))
}

fn attr_name(value: &Value, func: &str) -> RResult<Rc<str>> {
    match value {
        Value::Str(name) => Ok(name.clone()),
        _ => type_error(format!("{}(): attribute name must be string", func)),
    }
}

fn builtin_getattr(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [object, name, default] = args.bind("getattr", ["object", "name", "default"], 2)?;
    let object = object.unwrap_or(Value::None);
    let name = attr_name(&name.unwrap_or(Value::None), "getattr")?;
    match (interp.get_attr(&object, &name), default) {
        (Ok(value), _) => Ok(value),
        (Err(exc), Some(default)) if exc.is(ExcKind::AttributeError) => Ok(default),
        (Err(exc), _) => Err(exc),
    }
}

fn builtin_setattr(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [object, name, value] = args.exactly("setattr")?;
    let name = attr_name(&name, "setattr")?;
    interp.set_attr(&object, &name, value)?;
    none()
}

fn builtin_delattr(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [object, name] = args.exactly("delattr")?;
    let name = attr_name(&name, "delattr")?;
    interp.del_attr(&object, &name)?;
    none()
}

fn scope_dict(vars: &HashMap<String, Value>) -> Value {
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();
    let mut dict = Dict::new();
    for name in names {
        if let Some(value) = vars.get(name) {
            dict.set_str(name, value.clone());
        }
    }
    Value::dict(dict)
}

fn builtin_globals(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    args.exactly::<0>("globals")?;
    let globals = interp.globals().clone();
    let vars = globals.vars.borrow();
    Ok(scope_dict(&vars))
}

fn builtin_locals(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    args.exactly::<0>("locals")?;
    let scope = interp.caller_scope();
    let vars = scope.vars.borrow();
    Ok(scope_dict(&vars))
}

fn builtin_vars(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [object] = args.bind("vars", ["object"], 0)?;
    match object {
        None => builtin_locals(interp, Args::default()),
        Some(object) => interp.get_attr(&object, "__dict__"),
    }
}

fn builtin_input(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [prompt] = args.bind("input", ["prompt"], 0)?;
    if let Some(prompt) = prompt {
        let prompt = interp.to_str(&prompt)?;
        interp.write_stdout(&prompt);
    }
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) => runtime_error("EOF when reading a line"),
        Ok(_) => Ok(Value::str(line.trim_end_matches(['\n', '\r']))),
        Err(err) => runtime_error(format!("input(): {}", err)),
    }
}

/// Read-only text file returned by `open()`
#[derive(Debug)]
struct TextFile {
    name: String,
    contents: String,
    position: RefCell<usize>,
}

impl NativeObject for TextFile {
    fn type_name(&self) -> &'static str {
        "TextIOWrapper"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "name" => Some(Value::str(&self.name)),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "read" | "readline" | "readlines" | "close")
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        args.exactly::<0>(name)?;
        let mut position = self.position.borrow_mut();
        let rest = &self.contents[*position..];
        match name {
            "read" => {
                *position = self.contents.len();
                Ok(Value::str(rest))
            }
            "readline" => {
                let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
                *position += end;
                Ok(Value::str(&rest[..end]))
            }
            "readlines" => {
                *position = self.contents.len();
                Ok(Value::list(rest.split_inclusive('\n').map(Value::str).collect()))
            }
            _ => none(),
        }
    }

    fn iter_values(&self, _interp: &mut Interpreter) -> RResult<Option<Vec<Value>>> {
        let mut position = self.position.borrow_mut();
        let lines = self.contents[*position..]
            .split_inclusive('\n')
            .map(Value::str)
            .collect();
        *position = self.contents.len();
        Ok(Some(lines))
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        Ok(format!("<_io.TextIOWrapper name='{}' mode='r'>", self.name))
    }
}

fn builtin_open(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [file, mode] = args.bind("open", ["file", "mode"], 1)?;
    let Some(Value::Str(name)) = file else {
        return type_error("open() argument 'file' must be str");
    };
    if let Some(mode) = mode {
        let mode = interp.to_str(&mode)?;
        if mode.contains(['w', 'a', 'x', '+']) {
            return runtime_error(format!("open(): mode '{}' is not supported", mode));
        }
    }
    match std::fs::read_to_string(&*name) {
        Ok(contents) => {
            interp.check_len(contents.len())?;
            Ok(Value::object(TextFile {
                name: name.to_string(),
                contents,
                position: RefCell::new(0),
            }))
        }
        Err(err) => runtime_error(format!("{}: '{}'", err, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interp::RuntimeLimits;
    use crate::runtime::SharedBuffer;
    use std::collections::BTreeSet;

    fn run(source: &str) -> String {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        if let Err(exc) = interp.run(source) {
            panic!("{}", interp.format_exception(&exc));
        }
        buffer.contents()
    }

    fn error(source: &str) -> String {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        match interp.run(source) {
            Ok(()) => panic!("expected an error"),
            Err(exc) => interp.exception_summary(&exc),
        }
    }

    #[test]
    fn test_host_names_match_namespace() {
        let buffer = SharedBuffer::default();
        let interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        let table: BTreeSet<&str> = interp.builtin_names().collect();
        let names: BTreeSet<&str> = host_names().into_iter().collect();
        assert_eq!(table, names);
        assert!(names.contains("eval"));
        assert!(names.contains("SecurityError"));
    }

    #[test]
    fn test_conversions() {
        let source = "\
print(int('  42 '), int('-0x1f', 16), int('0b101', 0), int(3.9), int('1_000'))
print(float('2.5'), float('-inf'), str(12), bool([]), bool('x'))
print(list('ab'), tuple(range(3)), sorted(set([3, 1, 1])), dict([('a', 1)], b=2))
print(bytes([104, 105]), bytes(2), type(1) is int, type('s').__name__)
";
        assert_eq!(
            run(source),
            "42 -31 5 3 1000\n\
             2.5 -inf 12 False True\n\
             ['a', 'b'] (0, 1, 2) [1, 3] {'a': 1, 'b': 2}\n\
             b'hi' b'\\x00\\x00' True str\n"
        );
        assert_eq!(
            error("int('abc')\n"),
            "ValueError: invalid literal for int() with base 10: 'abc'"
        );
        assert_eq!(
            error("float('x1')\n"),
            "ValueError: could not convert string to float: 'x1'"
        );
    }

    #[test]
    fn test_numeric_builtins() {
        let source = "\
print(abs(-3), abs(-2.5), divmod(7, -2), pow(2, 10), pow(3, 4, 5))
print(round(2.5), round(3.5), round(2.675, 2), round(1250, -2), round(-0.5))
print(bin(5), hex(-255), oct(8), chr(65), ord('a'))
print(max(3, 9, 2), min([4, 1, 8]), max(['aa', 'b'], key=len), min([], default=0))
print(sum([1, 2, 3]), sum([0.5, 0.25], 1))
";
        assert_eq!(
            run(source),
            "3 2.5 (-4, -1) 1024 1\n\
             2 4 2.67 1200 0\n\
             0b101 -0xff 0o10 A 97\n\
             9 1 aa 0\n\
             6 1.75\n"
        );
        assert_eq!(error("max([])\n"), "ValueError: max() arg is an empty sequence");
    }

    #[test]
    fn test_iteration_builtins() {
        let source = "\
print(list(enumerate('ab', 1)), list(zip([1, 2, 3], 'xy')))
print(list(map(lambda a, b: a + b, [1, 2], [10, 20])), list(filter(None, [0, 1, '', 'a'])))
print(list(reversed([1, 2, 3])), all([]), any([0, 0]), sorted('cab', reverse=True))
print('a', 'b', sep='-', end='!\\n')
";
        assert_eq!(
            run(source),
            "[(1, 'a'), (2, 'b')] [(1, 'x'), (2, 'y')]\n\
             [11, 22] [1, 'a']\n\
             [3, 2, 1] True False ['c', 'b', 'a']\n\
             a-b!\n"
        );
    }

    #[test]
    fn test_exception_str_and_repr() {
        let source = "\
e = ValueError('bad', 2)
print(str(e), repr(ValueError('x')), repr(KeyError()))
print(isinstance(e, Exception), isinstance(e, (TypeError, LookupError)))
print(issubclass(KeyError, LookupError), issubclass(bool, int))
";
        assert_eq!(
            run(source),
            "('bad', 2) ValueError('x') KeyError()\nTrue False\nTrue True\n"
        );
    }

    #[test]
    fn test_dangerous_builtins_work_in_host_table() {
        let source = "\
class C:
    pass
c = C()
setattr(c, 'x', 5)
print(getattr(c, 'x'), getattr(c, 'y', 'none'), hasattr(c, 'x'))
delattr(c, 'x')
print(hasattr(c, 'x'), eval(compile('1 + 1', '<s>', 'eval')))
g = globals()
print('C' in g, vars(c))
";
        assert_eq!(run(source), "5 none True\nFalse 2\nTrue {}\n");
        assert_eq!(error("exit(3)\n"), "SystemExit: 3");
    }

    #[test]
    fn test_open_reads_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "one\ntwo\n").unwrap();
        let source = format!(
            "f = open({:?})\nprint(f.readline().strip(), f.readlines())\n",
            path.display().to_string()
        );
        assert_eq!(run(&source), "one ['two\\n']\n");
        assert!(error("open('/nonexistent/file')\n").starts_with("RuntimeError:"));
    }
}
