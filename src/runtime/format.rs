//! Text conversion: `repr`, `str`, format specs, `str.format` and
//! `%`-formatting.

use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::*;

/// Shortest round-trip float text, positional between 1e-4 and 1e16
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let sci = format!("{:e}", f);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let mut out = String::new();
    if f < 0.0 {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        if exp >= 0 {
            let point = exp as usize + 1;
            if digits.len() <= point {
                out.push_str(&digits);
                out.push_str(&"0".repeat(point - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            }
        } else {
            out.push_str("0.");
            out.push_str(&"0".repeat((-exp - 1) as usize));
            out.push_str(&digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push_str(&format!("e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.abs()));
    }
    out
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::from("b");
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push(quote as char);
    out
}

/// Escape everything outside ASCII, as `ascii()` does to a repr
pub fn ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        match code {
            0..=0x7f => out.push(c),
            0x80..=0xff => out.push_str(&format!("\\x{:02x}", code)),
            0x100..=0xffff => out.push_str(&format!("\\u{:04x}", code)),
            _ => out.push_str(&format!("\\U{:08x}", code)),
        }
    }
    out
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(separator);
        }
        out.push(*c);
    }
    out
}

fn strip_trailing_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn exponent_text(exp: i32, upper: bool) -> String {
    format!(
        "{}{}{:02}",
        if upper { 'E' } else { 'e' },
        if exp < 0 { '-' } else { '+' },
        exp.abs()
    )
}

fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

fn exp_format(magnitude: f64, precision: usize, upper: bool) -> String {
    let sci = format!("{:.*e}", precision, magnitude);
    let (mantissa, exp) = split_exponent(&sci);
    format!("{}{}", mantissa, exponent_text(exp, upper))
}

fn general_format(magnitude: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let precision = precision.max(1);
    if magnitude == 0.0 {
        return if alternate {
            format!("{:.*}", precision - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let sci = format!("{:.*e}", precision - 1, magnitude);
    let (mantissa, exp) = split_exponent(&sci);
    if (-4..precision as i32).contains(&exp) {
        let decimals = (precision as i32 - 1 - exp) as usize;
        let fixed = format!("{:.*}", decimals, magnitude);
        if alternate {
            fixed
        } else {
            strip_trailing_zeros(&fixed)
        }
    } else {
        let mantissa = if alternate {
            mantissa.to_string()
        } else {
            strip_trailing_zeros(mantissa)
        };
        format!("{}{}", mantissa, exponent_text(exp, upper))
    }
}

/// Parsed format-spec mini-language
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub alternate: bool,
    pub zero: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: None,
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

impl FormatSpec {
    pub fn parse(spec: &str) -> RResult<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');
        let mut out = FormatSpec::default();
        let mut i = 0;
        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            i = 2;
        } else if chars.first().is_some_and(|c| is_align(*c)) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
            out.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            out.zero = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            out.width = digits.parse().unwrap_or(usize::MAX);
        }
        if let Some(&c @ (',' | '_')) = chars.get(i) {
            out.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i == start {
                return value_error("Format specifier missing precision");
            }
            let digits: String = chars[start..i].iter().collect();
            out.precision = Some(digits.parse().unwrap_or(usize::MAX));
        }
        if let Some(&c) = chars.get(i) {
            out.ty = Some(c);
            i += 1;
        }
        if i < chars.len() {
            return value_error("Invalid format specifier");
        }
        Ok(out)
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        if negative {
            return "-";
        }
        match self.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    }

    fn pad(&self, sign: &str, body: &str, numeric: bool) -> String {
        let (fill, align) = if self.zero && self.align.is_none() && numeric {
            ('0', '=')
        } else {
            (self.fill, self.align.unwrap_or(if numeric { '>' } else { '<' }))
        };
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{}{}", sign, body);
        }
        let padding = self.width - len;
        let fills = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
        match align {
            '<' => format!("{}{}{}", sign, body, fills(padding)),
            '^' => format!(
                "{}{}{}{}",
                fills(padding / 2),
                sign,
                body,
                fills(padding - padding / 2)
            ),
            '=' => format!("{}{}{}", sign, fills(padding), body),
            _ => format!("{}{}{}", fills(padding), sign, body),
        }
    }

    pub fn format_int(&self, value: i64) -> RResult<String> {
        if matches!(self.ty, Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%')) {
            return self.format_float(value as f64);
        }
        if self.precision.is_some() {
            return value_error("Precision not allowed in integer format specifier");
        }
        let magnitude = value.unsigned_abs();
        let (prefix, digits, every) = match self.ty {
            None | Some('d') | Some('n') => ("", magnitude.to_string(), 3),
            Some('b') => ("0b", format!("{:b}", magnitude), 4),
            Some('o') => ("0o", format!("{:o}", magnitude), 4),
            Some('x') => ("0x", format!("{:x}", magnitude), 4),
            Some('X') => ("0X", format!("{:X}", magnitude), 4),
            Some('c') => {
                let c = u32::try_from(value)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| Exception::new(ExcKind::OverflowError, "%c arg not in range(0x110000)"))?;
                return Ok(self.pad("", &c.to_string(), false));
            }
            Some(other) => {
                return value_error(format!(
                    "Unknown format code '{}' for object of type 'int'",
                    other
                ))
            }
        };
        let digits = match self.grouping {
            Some(separator) => group_digits(&digits, separator, every),
            None => digits,
        };
        let prefix = if self.alternate { prefix } else { "" };
        let sign = format!("{}{}", self.sign_for(value < 0), prefix);
        Ok(self.pad(&sign, &digits, true))
    }

    pub fn format_float(&self, value: f64) -> RResult<String> {
        let negative = value.is_sign_negative() && !value.is_nan();
        let magnitude = value.abs();
        let upper = matches!(self.ty, Some('E' | 'F' | 'G'));
        let mut body = if !magnitude.is_finite() {
            let text = if magnitude.is_nan() { "nan" } else { "inf" };
            let text = if upper { text.to_uppercase() } else { text.to_string() };
            if self.ty == Some('%') {
                format!("{}%", text)
            } else {
                text
            }
        } else {
            match self.ty {
                Some('f' | 'F') => {
                    let fixed = format!("{:.*}", self.precision.unwrap_or(6), magnitude);
                    if self.alternate && !fixed.contains('.') {
                        format!("{}.", fixed)
                    } else {
                        fixed
                    }
                }
                Some('e' | 'E') => exp_format(magnitude, self.precision.unwrap_or(6), upper),
                Some('g' | 'G' | 'n') => {
                    general_format(magnitude, self.precision.unwrap_or(6), self.alternate, upper)
                }
                Some('%') => format!("{:.*}%", self.precision.unwrap_or(6), magnitude * 100.0),
                None => match self.precision {
                    None => float_repr(magnitude),
                    Some(precision) => {
                        let text = general_format(magnitude, precision, self.alternate, false);
                        if text.contains(['.', 'e']) {
                            text
                        } else {
                            format!("{}.0", text)
                        }
                    }
                },
                Some(other) => {
                    return value_error(format!(
                        "Unknown format code '{}' for object of type 'float'",
                        other
                    ))
                }
            }
        };
        if let Some(separator) = self.grouping {
            let split = body.find(['.', 'e', '%']).unwrap_or(body.len());
            if body[..split].chars().all(|c| c.is_ascii_digit()) {
                body = format!("{}{}", group_digits(&body[..split], separator, 3), &body[split..]);
            }
        }
        Ok(self.pad(self.sign_for(negative), &body, true))
    }

    pub fn format_str(&self, value: &str) -> RResult<String> {
        if let Some(ty) = self.ty.filter(|ty| *ty != 's') {
            return value_error(format!(
                "Unknown format code '{}' for object of type 'str'",
                ty
            ));
        }
        if self.sign.is_some() {
            return value_error("Sign not allowed in string format specifier");
        }
        if self.align == Some('=') {
            return value_error("'=' alignment not allowed in string format specifier");
        }
        let text: String = match self.precision {
            Some(precision) => value.chars().take(precision).collect(),
            None => value.to_string(),
        };
        Ok(self.pad("", &text, false))
    }
}

impl Interpreter {
    fn guarded(
        &mut self,
        value: &Value,
        placeholder: &str,
        render: impl FnOnce(&mut Self) -> RResult<String>,
    ) -> RResult<String> {
        let id = value.id();
        if self.repr_guard.contains(&id) {
            return Ok(placeholder.to_string());
        }
        self.enter_native()?;
        self.repr_guard.push(id);
        let result = render(self);
        self.repr_guard.pop();
        self.leave_native();
        result
    }

    fn join_reprs(&mut self, items: &[Value]) -> RResult<String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(self.repr(item)?);
        }
        Ok(parts.join(", "))
    }

    pub fn repr(&mut self, value: &Value) -> RResult<String> {
        Ok(match value {
            Value::None => "None".to_string(),
            Value::Ellipsis => "Ellipsis".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => str_repr(s),
            Value::Bytes(b) => bytes_repr(b),
            Value::List(list) => self.guarded(value, "[...]", |interp| {
                let items = list.borrow().clone();
                Ok(format!("[{}]", interp.join_reprs(&items)?))
            })?,
            Value::Tuple(items) => {
                if items.len() == 1 {
                    format!("({},)", self.repr(&items[0])?)
                } else {
                    self.guarded(value, "(...)", |interp| {
                        Ok(format!("({})", interp.join_reprs(items)?))
                    })?
                }
            }
            Value::Dict(dict) => self.guarded(value, "{...}", |interp| {
                let entries = dict.borrow().items();
                let mut parts = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    parts.push(format!("{}: {}", interp.repr(&key)?, interp.repr(&value)?));
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            })?,
            Value::Set(set) => {
                let items = set.borrow().values();
                if items.is_empty() {
                    "set()".to_string()
                } else {
                    format!("{{{}}}", self.join_reprs(&items)?)
                }
            }
            Value::Range(range) => {
                if range.step == 1 {
                    format!("range({}, {})", range.start, range.stop)
                } else {
                    format!("range({}, {}, {})", range.start, range.stop, range.step)
                }
            }
            Value::Slice(slice) => {
                let part = |p: Option<i64>| p.map_or("None".to_string(), |v| v.to_string());
                format!(
                    "slice({}, {}, {})",
                    part(slice.lower),
                    part(slice.upper),
                    part(slice.step)
                )
            }
            Value::Function(func) => format!("<function {} at 0x{:x}>", func.name(), value.id()),
            Value::Native(native) => format!("<built-in function {}>", native.name),
            Value::Method(method) => match &method.method {
                Method::Builtin(name) => format!(
                    "<built-in method {} of {} object at 0x{:x}>",
                    name,
                    method.receiver.type_name(),
                    method.receiver.id()
                ),
                Method::User(func) => {
                    let name = match func {
                        Value::Function(func) => func.name(),
                        other => other.type_name(),
                    };
                    let receiver = self.repr(&method.receiver)?;
                    format!(
                        "<bound method {}.{} of {}>",
                        method.receiver.type_name(),
                        name,
                        receiver
                    )
                }
            },
            Value::Class(class) => {
                if class.exception.is_some() {
                    format!("<class '{}'>", class.name)
                } else {
                    format!("<class '__main__.{}'>", class.name)
                }
            }
            Value::Type(kind) => format!("<class '{}'>", kind.name()),
            Value::Instance(instance) => {
                match self.call_special(instance, "__repr__", Vec::new())? {
                    Some(Value::Str(s)) => s.to_string(),
                    Some(other) => {
                        return type_error(format!(
                            "__repr__ returned non-string (type {})",
                            other.type_name()
                        ))
                    }
                    None => format!(
                        "<__main__.{} object at 0x{:x}>",
                        instance.class.name,
                        value.id()
                    ),
                }
            }
            Value::Module(module) => format!("<module '{}' (built-in)>", module.name),
            Value::Object(object) => object.repr(self)?,
            Value::Iterator(_) => format!("<iterator object at 0x{:x}>", value.id()),
            Value::Super(proxy) => format!("<super: <class '{}'>, <{} object>>", proxy.class.name, proxy.receiver.type_name()),
        })
    }

    pub fn to_str(&mut self, value: &Value) -> RResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Instance(instance) => match self.call_special(instance, "__str__", Vec::new())? {
                Some(Value::Str(s)) => Ok(s.to_string()),
                Some(other) => type_error(format!(
                    "__str__ returned non-string (type {})",
                    other.type_name()
                )),
                None => self.repr(value),
            },
            Value::Object(object) => object.str(self),
            other => self.repr(other),
        }
    }

    /// `format(value, spec)`
    pub fn format_value(&mut self, value: &Value, spec: &str) -> RResult<String> {
        if let Value::Instance(instance) = value {
            if let Some(result) = self.call_special(instance, "__format__", vec![Value::str(spec)])? {
                return match result {
                    Value::Str(s) => Ok(s.to_string()),
                    other => type_error(format!(
                        "__format__ must return a str, not {}",
                        other.type_name()
                    )),
                };
            }
        }
        if spec.is_empty() {
            return self.to_str(value);
        }
        let parsed = FormatSpec::parse(spec)?;
        self.check_len(parsed.width)?;
        self.check_len(parsed.precision.unwrap_or(0))?;
        match value {
            Value::Bool(_) if parsed.ty.is_none() => {
                let text = self.to_str(value)?;
                parsed.format_str(&text)
            }
            Value::Int(_) | Value::Bool(_) => parsed.format_int(value.as_int().unwrap_or(0)),
            Value::Float(f) => parsed.format_float(*f),
            Value::Str(s) => parsed.format_str(s),
            Value::Object(object) => {
                if let Some(text) = object.format_spec(self, spec)? {
                    return Ok(text);
                }
                match object.to_float() {
                    Some(f) => parsed.format_float(f),
                    None => type_error(format!(
                        "unsupported format string passed to {}.__format__",
                        object.type_name()
                    )),
                }
            }
            other => type_error(format!(
                "unsupported format string passed to {}.__format__",
                other.type_name()
            )),
        }
    }

    /// `str.format`
    pub fn str_format(&mut self, template: &str, args: &Args) -> RResult<String> {
        let mut numbering = None;
        let mut auto = 0;
        self.str_format_inner(template, args, &mut auto, &mut numbering)
    }

    fn str_format_inner(
        &mut self,
        template: &str,
        args: &Args,
        auto: &mut usize,
        numbering: &mut Option<bool>,
    ) -> RResult<String> {
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    out.push('{');
                    i += 2;
                }
                '{' => {
                    let mut depth = 1;
                    let mut j = i + 1;
                    while j < chars.len() {
                        match chars[j] {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        j += 1;
                    }
                    if j >= chars.len() {
                        return value_error("Single '{' encountered in format string");
                    }
                    let field: String = chars[i + 1..j].iter().collect();
                    let text = self.format_field(&field, args, auto, numbering)?;
                    out.push_str(&text);
                    i = j + 1;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    out.push('}');
                    i += 2;
                }
                '}' => return value_error("Single '}' encountered in format string"),
                c => {
                    out.push(c);
                    i += 1;
                }
            }
            self.check_len(out.len())?;
        }
        Ok(out)
    }

    fn format_field(
        &mut self,
        field: &str,
        args: &Args,
        auto: &mut usize,
        numbering: &mut Option<bool>,
    ) -> RResult<String> {
        let mut in_brackets = false;
        let mut name_end = field.len();
        for (index, c) in field.char_indices() {
            match c {
                '[' => in_brackets = true,
                ']' => in_brackets = false,
                '!' | ':' if !in_brackets => {
                    name_end = index;
                    break;
                }
                _ => {}
            }
        }
        let (name, rest) = field.split_at(name_end);
        let (conversion, spec) = match rest.strip_prefix('!') {
            Some(after) => {
                let mut chars = after.chars();
                let conversion = chars.next();
                let remaining = chars.as_str();
                let spec = match remaining.strip_prefix(':') {
                    Some(spec) => spec,
                    None if remaining.is_empty() => "",
                    None => return value_error("expected ':' after conversion specifier"),
                };
                (conversion, spec)
            }
            None => (None, rest.strip_prefix(':').unwrap_or("")),
        };
        let spec = if spec.contains('{') {
            self.str_format_inner(spec, args, auto, numbering)?
        } else {
            spec.to_string()
        };

        let head_end = name.find(['.', '[']).unwrap_or(name.len());
        let (head, mut tail) = name.split_at(head_end);
        let mut value = if head.is_empty() {
            if *numbering == Some(true) {
                return value_error(
                    "cannot switch from manual field specification to automatic field numbering",
                );
            }
            *numbering = Some(false);
            let index = *auto;
            *auto += 1;
            match args.positional.get(index) {
                Some(value) => value.clone(),
                None => {
                    return index_error(format!(
                        "Replacement index {} out of range for positional args tuple",
                        index
                    ))
                }
            }
        } else if let Ok(index) = head.parse::<usize>() {
            if *numbering == Some(false) {
                return value_error(
                    "cannot switch from automatic field numbering to manual field specification",
                );
            }
            *numbering = Some(true);
            match args.positional.get(index) {
                Some(value) => value.clone(),
                None => {
                    return index_error(format!(
                        "Replacement index {} out of range for positional args tuple",
                        index
                    ))
                }
            }
        } else {
            match args.keywords.iter().find(|(key, _)| key == head) {
                Some((_, value)) => value.clone(),
                None => return key_error(str_repr(head)),
            }
        };

        while !tail.is_empty() {
            if let Some(rest) = tail.strip_prefix('.') {
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                value = self.get_attr(&value, &rest[..end])?;
                tail = &rest[end..];
            } else if let Some(rest) = tail.strip_prefix('[') {
                let Some(close) = rest.find(']') else {
                    return value_error("Missing ']' in format string");
                };
                let key = &rest[..close];
                let key = match key.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::str(key),
                };
                value = self.get_item(&value, &key)?;
                tail = &rest[close + 1..];
            } else {
                return value_error("Only '.' or '[' may follow ']' in format field specifier");
            }
        }

        let value = match conversion {
            None => value,
            Some('r') => Value::str(self.repr(&value)?),
            Some('s') => Value::str(self.to_str(&value)?),
            Some('a') => Value::str(ascii(&self.repr(&value)?)),
            Some(other) => {
                return value_error(format!(
                    "Unknown conversion specifier {}",
                    other
                ))
            }
        };
        self.format_value(&value, &spec)
    }

    /// `template % values`
    pub fn percent_format(&mut self, template: &str, values: &Value) -> RResult<String> {
        let (items, mapping) = match values {
            Value::Tuple(items) => (items.to_vec(), None),
            Value::Dict(_) => (vec![values.clone()], Some(values.clone())),
            other => (vec![other.clone()], None),
        };
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::new();
        let mut next = 0;
        let mut used_mapping = false;
        let mut i = 0;
        let mut take = |next: &mut usize| -> RResult<Value> {
            let value = items.get(*next).cloned();
            *next += 1;
            value.ok_or_else(|| {
                Exception::new(ExcKind::TypeError, "not enough arguments for format string")
            })
        };
        while i < chars.len() {
            if chars[i] != '%' {
                out.push(chars[i]);
                i += 1;
                continue;
            }
            i += 1;
            let Some(&first) = chars.get(i) else {
                return value_error("incomplete format");
            };
            if first == '%' {
                out.push('%');
                i += 1;
                continue;
            }

            let mut keyed = None;
            if first == '(' {
                let Some(close) = chars[i..].iter().position(|c| *c == ')') else {
                    return value_error("incomplete format key");
                };
                let key: String = chars[i + 1..i + close].iter().collect();
                let Some(mapping) = &mapping else {
                    return type_error("format requires a mapping");
                };
                keyed = Some(self.get_item(mapping, &Value::str(key))?);
                used_mapping = true;
                i += close + 1;
            }

            let mut spec = FormatSpec::default();
            let mut left = false;
            while let Some(&flag) = chars.get(i) {
                match flag {
                    '-' => left = true,
                    '+' => spec.sign = Some('+'),
                    ' ' if spec.sign.is_none() => spec.sign = Some(' '),
                    ' ' => {}
                    '0' => spec.zero = true,
                    '#' => spec.alternate = true,
                    _ => break,
                }
                i += 1;
            }
            if chars.get(i) == Some(&'*') {
                let width = take(&mut next)?;
                spec.width = width.as_int().unwrap_or(0).max(0) as usize;
                i += 1;
            } else {
                let start = i;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                if i > start {
                    let digits: String = chars[start..i].iter().collect();
                    spec.width = digits.parse().unwrap_or(usize::MAX);
                }
            }
            if chars.get(i) == Some(&'.') {
                i += 1;
                let start = i;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                spec.precision = Some(digits.parse().unwrap_or(0));
            }
            self.check_len(spec.width)?;
            let Some(&ty) = chars.get(i) else {
                return value_error("incomplete format");
            };
            i += 1;
            if left {
                spec.align = Some('<');
                spec.zero = false;
            }
            let value = match keyed {
                Some(value) => value,
                None => take(&mut next)?,
            };

            let text = match ty {
                's' | 'r' | 'a' => {
                    let text = match ty {
                        's' => self.to_str(&value)?,
                        'r' => self.repr(&value)?,
                        _ => ascii(&self.repr(&value)?),
                    };
                    if !left {
                        spec.align = Some('>');
                    }
                    spec.sign = None;
                    spec.zero = false;
                    spec.format_str(&text)?
                }
                'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                    let number = match &value {
                        Value::Float(f) => f.trunc() as i64,
                        other => match other.as_int() {
                            Some(i) => i,
                            None => {
                                return type_error(format!(
                                    "%{} format: a real number is required, not {}",
                                    ty,
                                    other.type_name()
                                ))
                            }
                        },
                    };
                    spec.precision = None;
                    spec.ty = match ty {
                        'x' | 'X' | 'o' => Some(ty),
                        _ => None,
                    };
                    spec.format_int(number)?
                }
                'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                    let number = match &value {
                        Value::Object(object) => object.to_float(),
                        other => other.as_float(),
                    };
                    let Some(number) = number else {
                        return type_error(format!(
                            "must be real number, not {}",
                            value.type_name()
                        ));
                    };
                    spec.ty = Some(ty);
                    spec.format_float(number)?
                }
                'c' => {
                    let c = match &value {
                        Value::Str(s) if s.chars().count() == 1 => s.to_string(),
                        other => match other.as_int().and_then(|i| u32::try_from(i).ok()).and_then(char::from_u32) {
                            Some(c) => c.to_string(),
                            None => return type_error("%c requires int or char"),
                        },
                    };
                    spec.sign = None;
                    if !left {
                        spec.align = Some('>');
                    }
                    spec.format_str(&c)?
                }
                other => {
                    return value_error(format!(
                        "unsupported format character '{}' (0x{:x}) at index {}",
                        other,
                        other as u32,
                        i - 1
                    ))
                }
            };
            out.push_str(&text);
            self.check_len(out.len())?;
        }
        if !used_mapping && next < items.len() && mapping.is_none() {
            return type_error("not all arguments converted during string formatting");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interp::RuntimeLimits;
    use crate::runtime::SharedBuffer;

    fn interp() -> Interpreter {
        Interpreter::new(RuntimeLimits::default(), Box::new(SharedBuffer::default()))
    }

    #[test]
    fn test_float_repr_matches_shortest_form() {
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(123456789.0), "123456789.0");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
    }

    #[test]
    fn test_string_repr_quoting() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
        assert_eq!(bytes_repr(b"hi\x00"), "b'hi\\x00'");
    }

    #[test]
    fn test_format_spec_numbers() {
        let mut interp = interp();
        let cases = [
            (Value::Float(3.14159), ".2f", "3.14"),
            (Value::Int(1234567), ",", "1,234,567"),
            (Value::Int(42), "08b", "00101010"),
            (Value::Int(255), "#x", "0xff"),
            (Value::Int(-5), "+d", "-5"),
            (Value::Int(5), "+d", "+5"),
            (Value::Float(0.25), ".1%", "25.0%"),
            (Value::Float(12345.678), "e", "1.234568e+04"),
            (Value::Float(0.00001234), "g", "1.234e-05"),
            (Value::Float(1234.5), ".2", "1.2e+03"),
            (Value::Float(3.0), ".2", "3.0"),
            (Value::Int(7), "^5", "  7  "),
        ];
        for (value, spec, expected) in cases {
            assert_eq!(interp.format_value(&value, spec).unwrap(), expected, "spec {spec}");
        }
    }

    #[test]
    fn test_format_spec_strings() {
        let mut interp = interp();
        let value = Value::str("ab");
        assert_eq!(interp.format_value(&value, "*>5").unwrap(), "***ab");
        assert_eq!(interp.format_value(&value, "<4").unwrap(), "ab  ");
        assert_eq!(interp.format_value(&Value::str("abcdef"), ".3").unwrap(), "abc");
        assert!(interp.format_value(&value, "d").is_err());
    }

    #[test]
    fn test_str_format_fields() {
        let mut interp = interp();
        let mut args = Args::new(vec![Value::Int(1), Value::list(vec![Value::str("x")])]);
        args.keywords.push(("name".to_string(), Value::str("snip")));
        let text = interp
            .str_format("{} {1[0]} {name!r:>8} {{}}", &args)
            .unwrap_err();
        assert!(text.is(ExcKind::ValueError));
        let text = interp
            .str_format("{0} {1[0]} {name!r:>8} {{}}", &args)
            .unwrap();
        assert_eq!(text, "1 x   'snip' {}");
    }

    #[test]
    fn test_percent_format() {
        let mut interp = interp();
        let values = Value::tuple(vec![Value::str("a"), Value::Int(5), Value::Float(2.5)]);
        assert_eq!(
            interp.percent_format("%s=%03d (%.2f) 100%%", &values).unwrap(),
            "a=005 (2.50) 100%"
        );
        let mut dict = Dict::new();
        dict.set_str("k", Value::Int(1));
        assert_eq!(
            interp.percent_format("%(k)s-%(k)r", &Value::dict(dict)).unwrap(),
            "1-1"
        );
        let err = interp
            .percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)]))
            .unwrap_err();
        assert!(err.is(ExcKind::TypeError));
    }

    #[test]
    fn test_recursive_list_repr() {
        let mut interp = interp();
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        assert_eq!(interp.repr(&list).unwrap(), "[1, [...]]");
        if let Value::List(inner) = &list {
            inner.borrow_mut().clear();
        }
    }
}
