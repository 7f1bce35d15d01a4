//! Methods of the built-in types (`str`, `list`, `dict`, `set`, ...).
//!
//! Bound methods of built-in values are represented as
//! [`Method::Builtin`] and dispatched here by name.

use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::*;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

const STR_METHODS: &[&str] = &[
    "capitalize", "casefold", "center", "count", "encode", "endswith", "find", "format",
    "index", "isalnum", "isalpha", "isdecimal", "isdigit", "islower", "isnumeric",
    "isspace", "istitle", "isupper", "join", "ljust", "lower", "lstrip", "partition",
    "removeprefix", "removesuffix", "replace", "rfind", "rindex", "rjust", "rpartition",
    "rsplit", "rstrip", "split", "splitlines", "startswith", "strip", "swapcase", "title",
    "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove",
    "reverse", "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update",
    "values",
];

const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "difference_update", "discard", "intersection",
    "intersection_update", "isdisjoint", "issubset", "issuperset", "pop", "remove",
    "symmetric_difference", "union", "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];
const BYTES_METHODS: &[&str] = &["count", "decode", "endswith", "hex", "startswith"];
const INT_METHODS: &[&str] = &["bit_length", "conjugate"];
const FLOAT_METHODS: &[&str] = &["conjugate", "is_integer"];

fn method_names(kind: TypeKind) -> &'static [&'static str] {
    match kind {
        TypeKind::Str => STR_METHODS,
        TypeKind::List => LIST_METHODS,
        TypeKind::Dict => DICT_METHODS,
        TypeKind::Set => SET_METHODS,
        TypeKind::Tuple | TypeKind::Range => TUPLE_METHODS,
        TypeKind::Bytes => BYTES_METHODS,
        TypeKind::Int | TypeKind::Bool => INT_METHODS,
        TypeKind::Float => FLOAT_METHODS,
        _ => &[],
    }
}

pub fn has_method(receiver: &Value, name: &str) -> bool {
    receiver
        .builtin_type()
        .is_some_and(|kind| method_names(kind).contains(&name))
}

/// `str.upper` and friends looked up on the type itself
pub fn unbound(kind: TypeKind, name: &str) -> Option<Value> {
    if !method_names(kind).contains(&name) {
        return None;
    }
    let method: Rc<str> = Rc::from(name);
    Some(Value::native(name, move |interp, mut args| {
        if args.positional.is_empty() {
            return type_error(format!(
                "unbound method {}.{}() needs an argument",
                kind.name(),
                method
            ));
        }
        let receiver = args.positional.remove(0);
        if !receiver
            .builtin_type()
            .is_some_and(|actual| actual.is_subtype_of(kind))
        {
            return type_error(format!(
                "descriptor '{}' for '{}' objects doesn't apply to a '{}' object",
                method,
                kind.name(),
                receiver.type_name()
            ));
        }
        call_method(interp, &receiver, &method, args)
    }))
}

pub fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> RResult<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(list) => list_method(interp, list, name, args),
        Value::Dict(dict) => dict_method(interp, dict, name, args),
        Value::Set(set) => set_method(interp, set, name, args),
        Value::Tuple(items) => sequence_method(interp, items, "tuple", name, args),
        Value::Range(range) => {
            let [item] = args.exactly(name)?;
            let found = match item.as_int() {
                Some(i) if range.contains(i) => Some(((i - range.start) / range.step) as usize),
                _ => None,
            };
            match (name, found) {
                ("count", found) => Ok(Value::Int(found.is_some() as i64)),
                (_, Some(index)) => Ok(Value::Int(index as i64)),
                (_, None) => value_error(format!("{} is not in range", interp.repr(&item)?)),
            }
        }
        Value::Bytes(bytes) => bytes_method(bytes, name, args),
        Value::Int(_) | Value::Bool(_) => {
            args.exactly::<0>(name)?;
            let i = receiver.as_int().unwrap_or(0);
            match name {
                "bit_length" => Ok(Value::Int(64 - i.unsigned_abs().leading_zeros() as i64)),
                _ => Ok(Value::Int(i)),
            }
        }
        Value::Float(f) => {
            args.exactly::<0>(name)?;
            match name {
                "is_integer" => Ok(Value::Bool(f.is_finite() && f.fract() == 0.0)),
                _ => Ok(Value::Float(*f)),
            }
        }
        other => attribute_error(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        )),
    }
}

fn expect_str(value: &Value, context: &str) -> RResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => type_error(format!(
            "{} must be str, not {}",
            context,
            other.type_name()
        )),
    }
}

fn expect_int(value: &Value, context: &str) -> RResult<i64> {
    match value.as_int() {
        Some(i) => Ok(i),
        None => type_error(format!(
            "'{}' object cannot be interpreted as an integer{}",
            value.type_name(),
            if context.is_empty() { String::new() } else { format!(" ({})", context) }
        )),
    }
}

fn optional_int(value: Option<Value>) -> RResult<Option<i64>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => expect_int(&value, "").map(Some),
    }
}

/// Char-range of `s` selected by optional `start`/`end` arguments
fn char_window(s: &str, start: Option<i64>, end: Option<i64>) -> RResult<(usize, usize)> {
    let len = s.chars().count();
    let slice = SliceValue {
        lower: start,
        upper: end,
        step: None,
    };
    let (start, stop, _, _) = slice.indices(len)?;
    Ok((start as usize, (stop.max(start)) as usize))
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

fn find_in(s: &str, sub: &str, start: Option<i64>, end: Option<i64>, reverse: bool) -> RResult<Option<usize>> {
    let (start, end) = char_window(s, start, end)?;
    let (from, to) = (byte_offset(s, start), byte_offset(s, end));
    let window = &s[from..to];
    let found = if reverse { window.rfind(sub) } else { window.find(sub) };
    Ok(found.map(|byte| start + window[..byte].chars().count()))
}

fn prefix_match(s: &str, args: Args, name: &str) -> RResult<bool> {
    let [pattern, start, end] = args.bind(name, ["prefix", "start", "end"], 1)?;
    let (start, end) = char_window(s, optional_int(start)?, optional_int(end)?)?;
    let window = &s[byte_offset(s, start)..byte_offset(s, end)];
    let patterns = match pattern.unwrap_or(Value::None) {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other],
    };
    for pattern in patterns {
        let pattern = match pattern {
            Value::Str(p) => p,
            other => {
                return type_error(format!(
                    "{} first arg must be str or a tuple of str, not {}",
                    name,
                    other.type_name()
                ))
            }
        };
        let hit = if name == "startswith" {
            window.starts_with(&*pattern)
        } else {
            window.ends_with(&*pattern)
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn strip_chars(s: &str, chars: Option<Value>, left: bool, right: bool) -> RResult<String> {
    let set: Option<Vec<char>> = match chars {
        None | Some(Value::None) => None,
        Some(value) => Some(expect_str(&value, "strip arg")?.chars().collect()),
    };
    let matches = |c: char| match &set {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let mut text = s;
    if left {
        text = text.trim_start_matches(matches);
    }
    if right {
        text = text.trim_end_matches(matches);
    }
    Ok(text.to_string())
}

fn split_whitespace(s: &str, maxsplit: i64, reverse: bool) -> Vec<Value> {
    let mut parts: Vec<&str> = Vec::new();
    if maxsplit < 0 {
        return s.split_whitespace().map(Value::str).collect();
    }
    let mut rest = if reverse { s.trim_end() } else { s.trim_start() };
    while !rest.is_empty() {
        if parts.len() as i64 == maxsplit {
            parts.push(if reverse { rest.trim_end() } else { rest.trim_start() });
            break;
        }
        if reverse {
            match rest.rfind(char::is_whitespace) {
                Some(i) => {
                    let ws_len = rest[i..].chars().next().map_or(1, char::len_utf8);
                    parts.push(&rest[i + ws_len..]);
                    rest = rest[..i].trim_end();
                }
                None => {
                    parts.push(rest);
                    rest = "";
                }
            }
        } else {
            match rest.find(char::is_whitespace) {
                Some(i) => {
                    parts.push(&rest[..i]);
                    rest = rest[i..].trim_start();
                }
                None => {
                    parts.push(rest);
                    rest = "";
                }
            }
        }
    }
    if reverse {
        parts.reverse();
    }
    parts.into_iter().map(Value::str).collect()
}

fn split_on(s: &str, sep: &str, maxsplit: i64, reverse: bool) -> Vec<Value> {
    let parts: Vec<&str> = match (maxsplit < 0, reverse) {
        (true, _) => s.split(sep).collect(),
        (false, false) => s.splitn(maxsplit as usize + 1, sep).collect(),
        (false, true) => {
            let mut parts: Vec<&str> = s.rsplitn(maxsplit as usize + 1, sep).collect();
            parts.reverse();
            parts
        }
    };
    parts.into_iter().map(Value::str).collect()
}

fn pad(interp: &Interpreter, s: &str, args: Args, name: &str) -> RResult<Value> {
    let [width, fill] = args.bind(name, ["width", "fillchar"], 1)?;
    let width = expect_int(&width.unwrap_or(Value::None), "")?.max(0) as usize;
    interp.check_len(width)?;
    let fill = match fill {
        None => ' ',
        Some(value) => {
            let text = expect_str(&value, "fill character")?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return type_error("The fill character must be exactly one character long"),
            }
        }
    };
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::str(s));
    }
    let total = width - len;
    let (left, right) = match name {
        "ljust" => (0, total),
        "rjust" => (total, 0),
        _ => {
            let left = total / 2 + (total & width & 1);
            (left, total - left)
        }
    };
    let fills = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(Value::str(format!("{}{}{}", fills(left), s, fills(right))))
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn str_method(interp: &mut Interpreter, s: &Rc<str>, name: &str, args: Args) -> RResult<Value> {
    let text: &str = s;
    let predicate = |check: fn(char) -> bool| -> RResult<Value> {
        Ok(Value::Bool(!text.is_empty() && text.chars().all(check)))
    };
    match name {
        "upper" | "lower" | "casefold" | "swapcase" | "title" | "capitalize" => {
            args.exactly::<0>(name)?;
            let out = match name {
                "upper" => text.to_uppercase(),
                "lower" | "casefold" => text.to_lowercase(),
                "swapcase" => text
                    .chars()
                    .flat_map(|c| -> Vec<char> {
                        if c.is_uppercase() {
                            c.to_lowercase().collect()
                        } else {
                            c.to_uppercase().collect()
                        }
                    })
                    .collect(),
                "title" => title_case(text),
                _ => {
                    let mut chars = text.chars();
                    match chars.next() {
                        Some(first) => {
                            format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase())
                        }
                        None => String::new(),
                    }
                }
            };
            Ok(Value::str(out))
        }
        "isdigit" | "isdecimal" | "isnumeric" => {
            args.exactly::<0>(name)?;
            predicate(|c| c.is_ascii_digit() || c.is_numeric())
        }
        "isalpha" => {
            args.exactly::<0>(name)?;
            predicate(char::is_alphabetic)
        }
        "isalnum" => {
            args.exactly::<0>(name)?;
            predicate(char::is_alphanumeric)
        }
        "isspace" => {
            args.exactly::<0>(name)?;
            predicate(char::is_whitespace)
        }
        "islower" | "isupper" => {
            args.exactly::<0>(name)?;
            let cased: Vec<char> = text.chars().filter(|c| c.is_lowercase() || c.is_uppercase()).collect();
            let ok = !cased.is_empty()
                && cased.iter().all(|c| if name == "islower" { c.is_lowercase() } else { c.is_uppercase() });
            Ok(Value::Bool(ok))
        }
        "istitle" => {
            args.exactly::<0>(name)?;
            Ok(Value::Bool(
                text.chars().any(char::is_alphabetic) && title_case(text) == text,
            ))
        }
        "strip" | "lstrip" | "rstrip" => {
            let [chars] = args.bind(name, ["chars"], 0)?;
            let out = strip_chars(text, chars, name != "rstrip", name != "lstrip")?;
            Ok(Value::str(out))
        }
        "split" | "rsplit" => {
            let [sep, maxsplit] = args.bind(name, ["sep", "maxsplit"], 0)?;
            let maxsplit = optional_int(maxsplit)?.unwrap_or(-1);
            let reverse = name == "rsplit";
            let parts = match sep {
                None | Some(Value::None) => split_whitespace(text, maxsplit, reverse),
                Some(sep) => {
                    let sep = expect_str(&sep, "sep")?;
                    if sep.is_empty() {
                        return value_error("empty separator");
                    }
                    split_on(text, &sep, maxsplit, reverse)
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => {
            let [keepends] = args.bind(name, ["keepends"], 0)?;
            let keep = match keepends {
                Some(value) => interp.truthy(&value)?,
                None => false,
            };
            let mut lines = Vec::new();
            let mut rest = text;
            while !rest.is_empty() {
                match rest.find(['\n', '\r']) {
                    Some(i) => {
                        let ending = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                        let end = if keep { i + ending } else { i };
                        lines.push(Value::str(&rest[..end]));
                        rest = &rest[i + ending..];
                    }
                    None => {
                        lines.push(Value::str(rest));
                        rest = "";
                    }
                }
            }
            Ok(Value::list(lines))
        }
        "join" => {
            let [iterable] = args.exactly(name)?;
            let items = interp.collect(&iterable)?;
            let mut parts = Vec::with_capacity(items.len());
            let mut total = 0;
            for (index, item) in items.iter().enumerate() {
                match item {
                    Value::Str(part) => {
                        total += part.len() + text.len();
                        interp.check_len(total)?;
                        parts.push(part.to_string());
                    }
                    other => {
                        return type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            index,
                            other.type_name()
                        ))
                    }
                }
            }
            Ok(Value::str(parts.join(text)))
        }
        "replace" => {
            let [old, new, count] = args.bind(name, ["old", "new", "count"], 2)?;
            let old = expect_str(&old.unwrap_or(Value::None), "replace() argument 1")?;
            let new = expect_str(&new.unwrap_or(Value::None), "replace() argument 2")?;
            let count = optional_int(count)?.unwrap_or(-1);
            let occurrences = if old.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(&*old).count()
            };
            let replaced = if count < 0 { occurrences } else { occurrences.min(count as usize) };
            interp.check_len(text.len().saturating_add(replaced.saturating_mul(new.len())))?;
            let out = if count < 0 {
                text.replace(&*old, &new)
            } else {
                text.replacen(&*old, &new, count as usize)
            };
            Ok(Value::str(out))
        }
        "find" | "rfind" | "index" | "rindex" | "count" => {
            let [sub, start, end] = args.bind(name, ["sub", "start", "end"], 1)?;
            let sub = expect_str(&sub.unwrap_or(Value::None), "must be str")?;
            let (start, end) = (optional_int(start)?, optional_int(end)?);
            if name == "count" {
                let (from, to) = char_window(text, start, end)?;
                let window = &text[byte_offset(text, from)..byte_offset(text, to)];
                let count = if sub.is_empty() {
                    window.chars().count() + 1
                } else {
                    window.matches(&*sub).count()
                };
                return Ok(Value::Int(count as i64));
            }
            let reverse = name.starts_with('r');
            match find_in(text, &sub, start, end, reverse)? {
                Some(index) => Ok(Value::Int(index as i64)),
                None if name.ends_with("find") => Ok(Value::Int(-1)),
                None => value_error("substring not found"),
            }
        }
        "startswith" | "endswith" => Ok(Value::Bool(prefix_match(text, args, name)?)),
        "partition" | "rpartition" => {
            let [sep] = args.exactly(name)?;
            let sep = expect_str(&sep, "sep")?;
            if sep.is_empty() {
                return value_error("empty separator");
            }
            let found = if name == "partition" { text.find(&*sep) } else { text.rfind(&*sep) };
            let parts = match found {
                Some(i) => [&text[..i], &sep[..], &text[i + sep.len()..]],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Ok(Value::tuple(parts.iter().map(Value::str).collect()))
        }
        "removeprefix" | "removesuffix" => {
            let [affix] = args.exactly(name)?;
            let affix = expect_str(&affix, name)?;
            let out = if name == "removeprefix" {
                text.strip_prefix(&*affix).unwrap_or(text)
            } else {
                text.strip_suffix(&*affix).unwrap_or(text)
            };
            Ok(Value::str(out))
        }
        "center" | "ljust" | "rjust" => pad(interp, text, args, name),
        "zfill" => {
            let [width] = args.exactly(name)?;
            let width = expect_int(&width, "")?.max(0) as usize;
            interp.check_len(width)?;
            let len = text.chars().count();
            if len >= width {
                return Ok(Value::str(text));
            }
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                _ => (String::new(), text),
            };
            Ok(Value::str(format!("{}{}{}", sign, "0".repeat(width - len), digits)))
        }
        "format" => Ok(Value::str(interp.str_format(text, &args)?)),
        "encode" => {
            let [encoding, _errors] = args.bind(name, ["encoding", "errors"], 0)?;
            if let Some(encoding) = encoding {
                let encoding = expect_str(&encoding, "encoding")?.to_lowercase();
                if !matches!(encoding.as_str(), "utf-8" | "utf8" | "ascii") {
                    return Err(Exception::new(
                        ExcKind::LookupError,
                        format!("unknown encoding: {}", encoding),
                    ));
                }
                if encoding == "ascii" && !text.is_ascii() {
                    return value_error("'ascii' codec can't encode characters");
                }
            }
            Ok(Value::bytes(text.as_bytes().to_vec()))
        }
        _ => attribute_error(format!("'str' object has no attribute '{}'", name)),
    }
}

fn sequence_method(
    interp: &mut Interpreter,
    items: &[Value],
    type_name: &str,
    name: &str,
    args: Args,
) -> RResult<Value> {
    match name {
        "count" => {
            let [item] = args.exactly(name)?;
            let mut count = 0;
            for candidate in items {
                if candidate.is(&item) || interp.eq(candidate, &item)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "index" => {
            let [item, start, stop] = args.bind(name, ["value", "start", "stop"], 1)?;
            let item = item.unwrap_or(Value::None);
            let slice = SliceValue {
                lower: optional_int(start)?,
                upper: optional_int(stop)?,
                step: None,
            };
            let (start, stop, _, _) = slice.indices(items.len())?;
            for index in start.max(0) as usize..stop.max(0) as usize {
                if items[index].is(&item) || interp.eq(&items[index], &item)? {
                    return Ok(Value::Int(index as i64));
                }
            }
            if type_name == "list" {
                value_error(format!("{} is not in list", interp.repr(&item)?))
            } else {
                value_error(format!("{}.index(x): x not in {}", type_name, type_name))
            }
        }
        _ => attribute_error(format!(
            "'{}' object has no attribute '{}'",
            type_name, name
        )),
    }
}

fn list_method(
    interp: &mut Interpreter,
    list: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: Args,
) -> RResult<Value> {
    match name {
        "append" => {
            let [item] = args.exactly(name)?;
            interp.check_len(list.borrow().len() + 1)?;
            list.borrow_mut().push(item);
            none()
        }
        "extend" => {
            let [iterable] = args.exactly(name)?;
            let items = interp.collect(&iterable)?;
            interp.check_len(list.borrow().len() + items.len())?;
            list.borrow_mut().extend(items);
            none()
        }
        "insert" => {
            let [index, item] = args.exactly(name)?;
            let index = expect_int(&index, "")?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, item);
            none()
        }
        "pop" => {
            let [index] = args.bind(name, ["index"], 0)?;
            let index = optional_int(index)?.unwrap_or(-1);
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return index_error("pop from empty list");
            }
            let len = items.len() as i64;
            let at = if index < 0 { index + len } else { index };
            if !(0..len).contains(&at) {
                return index_error("pop index out of range");
            }
            Ok(items.remove(at as usize))
        }
        "remove" => {
            let [item] = args.exactly(name)?;
            let snapshot = list.borrow().clone();
            for (index, candidate) in snapshot.iter().enumerate() {
                if candidate.is(&item) || interp.eq(candidate, &item)? {
                    list.borrow_mut().remove(index);
                    return none();
                }
            }
            value_error("list.remove(x): x not in list")
        }
        "clear" => {
            args.exactly::<0>(name)?;
            list.borrow_mut().clear();
            none()
        }
        "copy" => {
            args.exactly::<0>(name)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "reverse" => {
            args.exactly::<0>(name)?;
            list.borrow_mut().reverse();
            none()
        }
        "sort" => {
            if !args.positional.is_empty() {
                return type_error("sort() takes no positional arguments");
            }
            let [key, reverse] = args.bind(name, ["key", "reverse"], 0)?;
            let reverse = match reverse {
                Some(value) => interp.truthy(&value)?,
                None => false,
            };
            let items = std::mem::take(&mut *list.borrow_mut());
            let sorted = interp.sort_values(items.clone(), key.as_ref(), reverse);
            match sorted {
                Ok(sorted) => {
                    *list.borrow_mut() = sorted;
                    none()
                }
                Err(exc) => {
                    *list.borrow_mut() = items;
                    Err(exc)
                }
            }
        }
        "count" | "index" => {
            let items = list.borrow().clone();
            sequence_method(interp, &items, "list", name, args)
        }
        _ => attribute_error(format!("'list' object has no attribute '{}'", name)),
    }
}

/// Insert every pair of `source` (a mapping or an iterable of pairs) into `dict`
pub(crate) fn merge_into(interp: &mut Interpreter, dict: &RefCell<Dict>, source: &Value) -> RResult<()> {
    if let Value::Dict(other) = source {
        let items = other.borrow().items();
        let mut target = dict.borrow_mut();
        for (key, value) in items {
            target.insert(key.hash_key()?, key, value);
        }
        return Ok(());
    }
    let items = interp.collect(source)?;
    for (index, item) in items.into_iter().enumerate() {
        let pair = interp.collect(&item)?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            Exception::new(
                ExcKind::ValueError,
                format!(
                    "dictionary update sequence element #{} has length {}; 2 is required",
                    index,
                    pair.len()
                ),
            )
        })?;
        dict.borrow_mut().insert(key.hash_key()?, key, value);
    }
    Ok(())
}

fn dict_method(
    interp: &mut Interpreter,
    dict: &Rc<RefCell<Dict>>,
    name: &str,
    mut args: Args,
) -> RResult<Value> {
    match name {
        "keys" | "values" | "items" => {
            args.exactly::<0>(name)?;
            let kind = match name {
                "keys" => ViewKind::Keys,
                "values" => ViewKind::Values,
                _ => ViewKind::Items,
            };
            Ok(Value::object(DictView {
                kind,
                dict: dict.clone(),
            }))
        }
        "get" => {
            let [key, default] = args.bind(name, ["key", "default"], 1)?;
            let key = key.unwrap_or(Value::None);
            let found = dict.borrow().get(&key.hash_key()?).cloned();
            Ok(found.or(default).unwrap_or(Value::None))
        }
        "pop" => {
            let [key, default] = args.bind(name, ["key", "default"], 1)?;
            let key = key.unwrap_or(Value::None);
            let removed = dict.borrow_mut().remove(&key.hash_key()?);
            match (removed, default) {
                (Some((_, value)), _) => Ok(value),
                (None, Some(default)) => Ok(default),
                (None, None) => key_error(interp.repr(&key)?),
            }
        }
        "popitem" => {
            args.exactly::<0>(name)?;
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((key, value)) => Ok(Value::tuple(vec![key, value])),
                None => key_error("'popitem(): dictionary is empty'"),
            }
        }
        "setdefault" => {
            let [key, default] = args.bind(name, ["key", "default"], 1)?;
            let key = key.unwrap_or(Value::None);
            let hash = key.hash_key()?;
            let existing = dict.borrow().get(&hash).cloned();
            match existing {
                Some(value) => Ok(value),
                None => {
                    let value = default.unwrap_or(Value::None);
                    dict.borrow_mut().insert(hash, key, value.clone());
                    Ok(value)
                }
            }
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            if args.positional.len() > 1 {
                return type_error(format!(
                    "update expected at most 1 argument, got {}",
                    args.positional.len()
                ));
            }
            if let Some(source) = args.positional.pop() {
                merge_into(interp, dict, &source)?;
            }
            let mut target = dict.borrow_mut();
            for (key, value) in keywords {
                target.set_str(&key, value);
            }
            none()
        }
        "clear" => {
            args.exactly::<0>(name)?;
            dict.borrow_mut().clear();
            none()
        }
        "copy" => {
            args.exactly::<0>(name)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => attribute_error(format!("'dict' object has no attribute '{}'", name)),
    }
}

fn to_set(interp: &mut Interpreter, value: &Value) -> RResult<Set> {
    if let Value::Set(set) = value {
        return Ok(set.borrow().clone());
    }
    let mut set = Set::new();
    for item in interp.collect(value)? {
        set.insert(item.hash_key()?, item);
    }
    Ok(set)
}

fn set_method(
    interp: &mut Interpreter,
    set: &Rc<RefCell<Set>>,
    name: &str,
    args: Args,
) -> RResult<Value> {
    match name {
        "add" => {
            let [item] = args.exactly(name)?;
            interp.check_len(set.borrow().len() + 1)?;
            set.borrow_mut().insert(item.hash_key()?, item);
            none()
        }
        "remove" => {
            let [item] = args.exactly(name)?;
            let removed = set.borrow_mut().remove(&item.hash_key()?);
            match removed {
                Some(_) => none(),
                None => key_error(interp.repr(&item)?),
            }
        }
        "discard" => {
            let [item] = args.exactly(name)?;
            set.borrow_mut().remove(&item.hash_key()?);
            none()
        }
        "pop" => {
            args.exactly::<0>(name)?;
            let first = set.borrow_mut().pop_first();
            match first {
                Some(item) => Ok(item),
                None => key_error("'pop from an empty set'"),
            }
        }
        "clear" => {
            args.exactly::<0>(name)?;
            set.borrow_mut().clear();
            none()
        }
        "copy" => {
            args.exactly::<0>(name)?;
            Ok(Value::set(set.borrow().clone()))
        }
        "union" | "intersection" | "difference" | "symmetric_difference" | "update"
        | "intersection_update" | "difference_update" => {
            args.no_keywords(name)?;
            let mut result = set.borrow().clone();
            for other in &args.positional {
                let other = to_set(interp, other)?;
                result = match name {
                    "union" | "update" => {
                        let mut merged = result;
                        for (key, value) in other.iter() {
                            merged.insert(key.clone(), value.clone());
                        }
                        merged
                    }
                    "intersection" | "intersection_update" => {
                        let mut kept = Set::new();
                        for (key, value) in result.iter() {
                            if other.contains(key) {
                                kept.insert(key.clone(), value.clone());
                            }
                        }
                        kept
                    }
                    "difference" | "difference_update" => {
                        let mut kept = Set::new();
                        for (key, value) in result.iter() {
                            if !other.contains(key) {
                                kept.insert(key.clone(), value.clone());
                            }
                        }
                        kept
                    }
                    _ => {
                        let mut kept = Set::new();
                        for (key, value) in result.iter() {
                            if !other.contains(key) {
                                kept.insert(key.clone(), value.clone());
                            }
                        }
                        for (key, value) in other.iter() {
                            if !result.contains(key) {
                                kept.insert(key.clone(), value.clone());
                            }
                        }
                        kept
                    }
                };
                interp.check_len(result.len())?;
            }
            if name.ends_with("update") {
                *set.borrow_mut() = result;
                none()
            } else {
                Ok(Value::set(result))
            }
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            let [other] = args.exactly(name)?;
            let other = to_set(interp, &other)?;
            let own = set.borrow();
            let result = match name {
                "issubset" => own.keys().all(|key| other.contains(key)),
                "issuperset" => other.keys().all(|key| own.contains(key)),
                _ => own.keys().all(|key| !other.contains(key)),
            };
            Ok(Value::Bool(result))
        }
        _ => attribute_error(format!("'set' object has no attribute '{}'", name)),
    }
}

fn bytes_method(bytes: &Rc<[u8]>, name: &str, args: Args) -> RResult<Value> {
    match name {
        "decode" => {
            let [_encoding, _errors] = args.bind(name, ["encoding", "errors"], 0)?;
            match std::str::from_utf8(bytes) {
                Ok(text) => Ok(Value::str(text)),
                Err(err) => value_error(format!(
                    "'utf-8' codec can't decode byte at position {}",
                    err.valid_up_to()
                )),
            }
        }
        "hex" => {
            args.exactly::<0>(name)?;
            Ok(Value::str(bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>()))
        }
        "count" => {
            let [sub] = args.exactly(name)?;
            let count = match &sub {
                Value::Bytes(sub) if sub.is_empty() => bytes.len() + 1,
                Value::Bytes(sub) => {
                    let mut count = 0;
                    let mut i = 0;
                    while i + sub.len() <= bytes.len() {
                        if bytes[i..i + sub.len()] == sub[..] {
                            count += 1;
                            i += sub.len();
                        } else {
                            i += 1;
                        }
                    }
                    count
                }
                Value::Int(b) => bytes.iter().filter(|x| **x as i64 == *b).count(),
                other => {
                    return type_error(format!(
                        "argument should be integer or bytes-like object, not '{}'",
                        other.type_name()
                    ))
                }
            };
            Ok(Value::Int(count as i64))
        }
        "startswith" | "endswith" => {
            let [affix] = args.exactly(name)?;
            let Value::Bytes(affix) = affix else {
                return type_error(format!(
                    "{} first arg must be bytes or a tuple of bytes, not {}",
                    name,
                    affix.type_name()
                ));
            };
            let hit = if name == "startswith" {
                bytes.starts_with(&affix)
            } else {
                bytes.ends_with(&affix)
            };
            Ok(Value::Bool(hit))
        }
        _ => attribute_error(format!("'bytes' object has no attribute '{}'", name)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ViewKind {
    Keys,
    Values,
    Items,
}

/// Live `dict.keys()` / `values()` / `items()` view
#[derive(Debug)]
struct DictView {
    kind: ViewKind,
    dict: Rc<RefCell<Dict>>,
}

impl DictView {
    fn items(&self) -> Vec<Value> {
        let dict = self.dict.borrow();
        match self.kind {
            ViewKind::Keys => dict.keys(),
            ViewKind::Values => dict.values(),
            ViewKind::Items => dict
                .items()
                .into_iter()
                .map(|(key, value)| Value::tuple(vec![key, value]))
                .collect(),
        }
    }
}

impl NativeObject for DictView {
    fn type_name(&self) -> &'static str {
        match self.kind {
            ViewKind::Keys => "dict_keys",
            ViewKind::Values => "dict_values",
            ViewKind::Items => "dict_items",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self, interp: &mut Interpreter) -> RResult<String> {
        let list = Value::list(self.items());
        Ok(format!("{}({})", self.type_name(), interp.repr(&list)?))
    }

    fn len(&self) -> Option<usize> {
        Some(self.dict.borrow().len())
    }

    fn truthy(&self) -> bool {
        !self.dict.borrow().is_empty()
    }

    fn iter_values(&self, _interp: &mut Interpreter) -> RResult<Option<Vec<Value>>> {
        Ok(Some(self.items()))
    }

    fn contains(&self, interp: &mut Interpreter, item: &Value) -> RResult<Option<bool>> {
        match self.kind {
            ViewKind::Keys => Ok(Some(self.dict.borrow().contains(&item.hash_key()?))),
            ViewKind::Items => {
                let Value::Tuple(pair) = item else {
                    return Ok(Some(false));
                };
                if pair.len() != 2 {
                    return Ok(Some(false));
                }
                let found = self.dict.borrow().get(&pair[0].hash_key()?).cloned();
                match found {
                    Some(value) => Ok(Some(interp.eq(&value, &pair[1])?)),
                    None => Ok(Some(false)),
                }
            }
            ViewKind::Values => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interp::RuntimeLimits;
    use crate::runtime::SharedBuffer;

    fn run(source: &str) -> String {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        if let Err(exc) = interp.run(source) {
            panic!("{}", interp.format_exception(&exc));
        }
        buffer.contents()
    }

    #[test]
    fn test_string_methods() {
        let source = "\
print('a,b,,c'.split(','), '  x  y '.split(), 'a b c'.rsplit(None, 1))
print('-'.join(['x', 'y']), 'Hello'.upper(), 'hello world'.title())
print('abcabc'.find('c'), 'abcabc'.rfind('c'), 'abc'.find('z'), 'aaa'.count('a'))
print('xxhixx'.strip('x'), 'hi'.center(6, '*'), '42'.zfill(5), '-7'.zfill(4))
print('k=v=w'.partition('='), 'k=v=w'.rpartition('='))
print('a\\nb\\r\\nc'.splitlines(), 'abc'.startswith(('x', 'a')), 'abc'.endswith('bc'))
print('aXbX'.replace('X', '-'), 'aXbX'.replace('X', '-', 1), str.upper('q'))
";
        assert_eq!(
            run(source),
            "['a', 'b', '', 'c'] ['x', 'y'] ['a b', 'c']\n\
             x-y HELLO Hello World\n\
             2 5 -1 3\n\
             hi **hi** 00042 -007\n\
             ('k', '=', 'v=w') ('k=v', '=', 'w')\n\
             ['a', 'b', 'c'] True True\n\
             a-b- a-bX Q\n"
        );
    }

    #[test]
    fn test_list_methods() {
        let source = "\
xs = [3, 1, 2]
xs.append(4)
xs.extend((5, 6))
xs.insert(0, 0)
print(xs, xs.pop(), xs.pop(0), xs.index(2), xs.count(1))
xs.remove(1)
xs.sort(reverse=True)
print(xs)
words = ['bb', 'a', 'ccc']
words.sort(key=len)
print(words)
";
        assert_eq!(
            run(source),
            "[3, 1, 2, 4, 5] 6 0 2 1\n[5, 4, 3, 2]\n['a', 'bb', 'ccc']\n"
        );
    }

    #[test]
    fn test_dict_methods_and_views() {
        let source = "\
d = {'a': 1}
d.update({'b': 2}, c=3)
keys = d.keys()
d['e'] = 5
print(keys, len(keys), 'e' in keys)
print(d.get('z'), d.get('z', 0), d.pop('a'), d.setdefault('f', 6))
print(sorted(d.items()), list(d.values()))
print(dict.fromkeys(['x', 'y'], 0))
";
        assert_eq!(
            run(source),
            "dict_keys(['a', 'b', 'c', 'e']) 4 True\n\
             None 0 1 6\n\
             [('b', 2), ('c', 3), ('e', 5), ('f', 6)] [2, 3, 5, 6]\n\
             {'x': 0, 'y': 0}\n"
        );
    }

    #[test]
    fn test_set_methods() {
        let source = "\
s = {1, 2, 3}
s.add(4)
s.discard(9)
print(sorted(s.union([5])), sorted(s.intersection({2, 3, 7})), sorted(s.difference([1])))
print({1, 2}.issubset(s), s.issuperset({9}), s.isdisjoint([8, 9]))
";
        assert_eq!(run(source), "[1, 2, 3, 4, 5] [2, 3] [2, 3, 4]\nTrue False True\n");
    }

    #[test]
    fn test_missing_list_item_message() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        let exc = interp.run("[1, 2].index('q')\n").unwrap_err();
        assert_eq!(exc.to_string(), "ValueError: 'q' is not in list");
    }
}
