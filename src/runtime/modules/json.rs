use super::int_arg;
use crate::runtime::error::*;
use crate::runtime::format::float_repr;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::{Args, Dict, NativeModule, Value};

pub struct JsonModule;

struct Encoder {
    indent: Option<String>,
    item_sep: String,
    key_sep: String,
    sort_keys: bool,
    ensure_ascii: bool,
    /// Containers currently being encoded
    stack: Vec<usize>,
}

fn quote(text: &str, ensure_ascii: bool, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (ensure_ascii && !c.is_ascii()) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

impl Encoder {
    fn newline(&self, depth: usize, out: &mut String) {
        if let Some(indent) = &self.indent {
            out.push('\n');
            for _ in 0..depth {
                out.push_str(indent);
            }
        }
    }

    fn key(&self, interp: &mut Interpreter, key: &Value) -> RResult<String> {
        Ok(match key {
            Value::Str(s) => s.to_string(),
            Value::None => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(_) => interp.repr(key)?,
            other => {
                return type_error(format!(
                    "keys must be str, int, float, bool or None, not {}",
                    other.type_name()
                ))
            }
        })
    }

    fn enter(&mut self, interp: &mut Interpreter, id: usize) -> RResult<()> {
        if self.stack.contains(&id) {
            return value_error("Circular reference detected");
        }
        interp.enter_native()?;
        self.stack.push(id);
        Ok(())
    }

    fn leave(&mut self, interp: &mut Interpreter) {
        self.stack.pop();
        interp.leave_native();
    }

    fn encode(&mut self, interp: &mut Interpreter, value: &Value, depth: usize, out: &mut String) -> RResult<()> {
        interp.check_len(out.len())?;
        match value {
            Value::None => out.push_str("null"),
            Value::Bool(true) => out.push_str("true"),
            Value::Bool(false) => out.push_str("false"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) if f.is_nan() => out.push_str("NaN"),
            Value::Float(f) if f.is_infinite() => {
                out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => quote(s, self.ensure_ascii, out),
            Value::List(_) | Value::Tuple(_) => {
                let items = match value {
                    Value::List(items) => items.borrow().clone(),
                    Value::Tuple(items) => items.to_vec(),
                    _ => Vec::new(),
                };
                if items.is_empty() {
                    out.push_str("[]");
                    return Ok(());
                }
                self.enter(interp, value.id())?;
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(&self.item_sep);
                    }
                    self.newline(depth + 1, out);
                    if let Err(err) = self.encode(interp, item, depth + 1, out) {
                        self.leave(interp);
                        return Err(err);
                    }
                }
                self.newline(depth, out);
                out.push(']');
                self.leave(interp);
            }
            Value::Dict(dict) => {
                let mut items = dict.borrow().items();
                if items.is_empty() {
                    out.push_str("{}");
                    return Ok(());
                }
                self.enter(interp, value.id())?;
                let result = (|| -> RResult<()> {
                    let mut keyed = Vec::with_capacity(items.len());
                    for (key, item) in items.drain(..) {
                        keyed.push((self.key(interp, &key)?, item));
                    }
                    if self.sort_keys {
                        keyed.sort_by(|a, b| a.0.cmp(&b.0));
                    }
                    out.push('{');
                    for (i, (key, item)) in keyed.iter().enumerate() {
                        if i > 0 {
                            out.push_str(&self.item_sep);
                        }
                        self.newline(depth + 1, out);
                        quote(key, self.ensure_ascii, out);
                        out.push_str(&self.key_sep);
                        self.encode(interp, item, depth + 1, out)?;
                    }
                    self.newline(depth, out);
                    out.push('}');
                    Ok(())
                })();
                self.leave(interp);
                result?;
            }
            other => {
                return type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                ))
            }
        }
        Ok(())
    }
}

fn dumps(interp: &mut Interpreter, mut args: Args) -> RResult<Value> {
    let indent = match args.take_keyword("indent") {
        None | Some(Value::None) => None,
        Some(Value::Str(s)) => Some(s.to_string()),
        Some(n) => Some(" ".repeat(int_arg(&n, "dumps")?.clamp(0, 64) as usize)),
    };
    let sort_keys = match args.take_keyword("sort_keys") {
        Some(value) => interp.truthy(&value)?,
        None => false,
    };
    let ensure_ascii = match args.take_keyword("ensure_ascii") {
        Some(value) => interp.truthy(&value)?,
        None => true,
    };
    let (item_sep, key_sep) = match args.take_keyword("separators") {
        None | Some(Value::None) => (
            if indent.is_some() { "," } else { ", " }.to_string(),
            ": ".to_string(),
        ),
        Some(value) => {
            let parts = interp.collect(&value)?;
            match &parts[..] {
                [Value::Str(item), Value::Str(key)] => (item.to_string(), key.to_string()),
                _ => return type_error("separators must be a (item_separator, key_separator) tuple"),
            }
        }
    };
    let [obj] = args.exactly("dumps")?;
    let mut encoder = Encoder {
        indent,
        item_sep,
        key_sep,
        sort_keys,
        ensure_ascii,
        stack: Vec::new(),
    };
    let mut out = String::new();
    encoder.encode(interp, &obj, 0, &mut out)?;
    interp.check_len(out.len())?;
    Ok(Value::str(out))
}

fn convert(interp: &Interpreter, value: serde_json::Value) -> RResult<Value> {
    Ok(match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => match n.as_u64() {
                Some(_) => return overflow_error("integer overflow"),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
        },
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            interp.check_len(items.len())?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(convert(interp, item)?);
            }
            Value::list(out)
        }
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (key, item) in map {
                let item = convert(interp, item)?;
                dict.set_str(&key, item);
            }
            Value::dict(dict)
        }
    })
}

fn loads(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [text] = args.exactly("loads")?;
    let text = match &text {
        Value::Str(s) => s.to_string(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        other => {
            return type_error(format!(
                "the JSON object must be str, bytes or bytearray, not {}",
                other.type_name()
            ))
        }
    };
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(parsed) => convert(interp, parsed),
        Err(err) => value_error(format!("JSONDecodeError: {}", err)),
    }
}

impl NativeModule for JsonModule {
    fn name(&self) -> &'static str {
        "json"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("dumps", Value::native("dumps", dumps)),
            ("loads", Value::native("loads", loads)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::interp::{Interpreter, RuntimeLimits};
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
    fn test_dumps_default_layout() {
        let source = r#"
import json
print(json.dumps({'b': [1, 2.5, None], 'a': True, 'é': 'x"y'}))
print(json.dumps({'b': 1, 'a': {}}, sort_keys=True, indent=2))
print(json.dumps([1, 2], separators=(',', ':')), json.dumps({1: 'one'}))
"#;
        assert_eq!(
            run(source),
            "{\"b\": [1, 2.5, null], \"a\": true, \"\\u00e9\": \"x\\\"y\"}\n\
             {\n  \"a\": {},\n  \"b\": 1\n}\n\
             [1,2] {\"1\": \"one\"}\n"
        );
    }

    #[test]
    fn test_loads_preserves_key_order() {
        let source = r#"
import json
data = json.loads('{"z": 1, "a": [true, null, 1.5, "s"]}')
print(data, list(data))
"#;
        assert_eq!(run(source), "{'z': 1, 'a': [True, None, 1.5, 's']} ['z', 'a']\n");
    }

    #[test]
    fn test_circular_and_unsupported_values_fail() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        let exc = interp.run("import json\nx = []\nx.append(x)\njson.dumps(x)\n").unwrap_err();
        assert_eq!(interp.exception_summary(&exc), "ValueError: Circular reference detected");
        let exc = interp.run("json.dumps({1, 2})\n").unwrap_err();
        assert_eq!(
            interp.exception_summary(&exc),
            "TypeError: Object of type set is not JSON serializable"
        );
    }
}
