//! Regular expressions on top of the `regex` crate.
//!
//! Matching is linear-time, so patterns needing backtracking features
//! (backreferences, lookaround) are rejected at compile time. Positions
//! reported to snippets are character offsets.

use super::{int_arg, str_arg};
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::{Args, Dict, NativeModule, NativeObject, Value};
use regex::{Captures, Regex, RegexBuilder};
use std::any::Any;
use std::rc::Rc;

pub const IGNORECASE: i64 = 2;
pub const MULTILINE: i64 = 8;
pub const DOTALL: i64 = 16;
pub const VERBOSE: i64 = 64;

/// Compiled pattern
#[derive(Debug)]
pub struct Pattern {
    source: String,
    flags: i64,
    search: Regex,
    anchored: Regex,
    full: Regex,
    names: Rc<Vec<Option<String>>>,
}

fn translate(pattern: &str) -> String {
    // `\Z` is spelled `\z` by the regex crate
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Z') => out.push_str("\\z"),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn build(pattern: &str, flags: i64) -> RResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags & IGNORECASE != 0)
        .multi_line(flags & MULTILINE != 0)
        .dot_matches_new_line(flags & DOTALL != 0)
        .ignore_whitespace(flags & VERBOSE != 0)
        .build()
        .or_else(|err| value_error(format!("invalid regular expression: {}", last_line(&err.to_string()))))
}

fn last_line(text: &str) -> &str {
    text.lines().last().unwrap_or(text).trim()
}

impl Pattern {
    pub fn compile(source: &str, flags: i64) -> RResult<Self> {
        let translated = translate(source);
        let search = build(&translated, flags)?;
        let anchored = build(&format!("\\A(?:{})", translated), flags)?;
        let full = build(&format!("\\A(?:{})\\z", translated), flags)?;
        let names = Rc::new(search.capture_names().map(|name| name.map(str::to_string)).collect());
        Ok(Self {
            source: source.to_string(),
            flags,
            search,
            anchored,
            full,
            names,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn group_count(&self) -> usize {
        self.search.captures_len() - 1
    }

    fn to_match(&self, string: &Rc<str>, caps: &Captures) -> Value {
        let spans = (0..caps.len())
            .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
            .collect();
        Value::object(ReMatch {
            string: string.clone(),
            spans,
            names: self.names.clone(),
        })
    }

    fn match_with(&self, regex: &Regex, string: &Rc<str>) -> Value {
        match regex.captures(string) {
            Some(caps) => self.to_match(string, &caps),
            None => Value::None,
        }
    }

    fn findall(&self, string: &Rc<str>) -> Vec<Value> {
        let groups = self.group_count();
        self.search
            .captures_iter(string)
            .map(|caps| {
                let text = |i: usize| Value::str(caps.get(i).map_or("", |m| m.as_str()));
                match groups {
                    0 => text(0),
                    1 => text(1),
                    n => Value::tuple((1..=n).map(text).collect()),
                }
            })
            .collect()
    }

    fn split(&self, string: &Rc<str>, maxsplit: usize) -> Vec<Value> {
        let mut out = Vec::new();
        let mut last = 0;
        for (count, caps) in self.search.captures_iter(string).enumerate() {
            if maxsplit > 0 && count >= maxsplit {
                break;
            }
            let Some(whole) = caps.get(0) else { continue };
            out.push(Value::str(&string[last..whole.start()]));
            for i in 1..caps.len() {
                out.push(caps.get(i).map_or(Value::None, |m| Value::str(m.as_str())));
            }
            last = whole.end();
        }
        out.push(Value::str(&string[last..]));
        out
    }

    fn sub(
        &self,
        interp: &mut Interpreter,
        repl: &Value,
        string: &Rc<str>,
        count: usize,
    ) -> RResult<(String, usize)> {
        let mut out = String::with_capacity(string.len());
        let mut last = 0;
        let mut replaced = 0;
        for caps in self.search.captures_iter(string) {
            if count > 0 && replaced >= count {
                break;
            }
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&string[last..whole.start()]);
            match repl {
                Value::Str(template) => expand(template, &caps, &self.names, &mut out)?,
                callable => {
                    let found = self.to_match(string, &caps);
                    match interp.call_with(callable, vec![found])? {
                        Value::Str(text) => out.push_str(&text),
                        other => {
                            return type_error(format!(
                                "expected str instance, {} found",
                                other.type_name()
                            ))
                        }
                    }
                }
            }
            interp.check_len(out.len())?;
            last = whole.end();
            replaced += 1;
        }
        out.push_str(&string[last..]);
        interp.check_len(out.len())?;
        Ok((out, replaced))
    }

    /// Dispatch a pattern method; `string` is the subject argument
    fn call(&self, interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        match name {
            "search" | "match" | "fullmatch" => {
                let [string] = args.bind(name, ["string"], 1)?;
                let string = str_arg(&string.unwrap_or(Value::None), name)?;
                let regex = match name {
                    "search" => &self.search,
                    "match" => &self.anchored,
                    _ => &self.full,
                };
                Ok(self.match_with(regex, &string))
            }
            "findall" => {
                let [string] = args.bind(name, ["string"], 1)?;
                let string = str_arg(&string.unwrap_or(Value::None), name)?;
                Ok(Value::list(self.findall(&string)))
            }
            "finditer" => {
                let [string] = args.bind(name, ["string"], 1)?;
                let string = str_arg(&string.unwrap_or(Value::None), name)?;
                let matches = self
                    .search
                    .captures_iter(&string)
                    .map(|caps| self.to_match(&string, &caps))
                    .collect();
                Ok(Value::iterator(matches))
            }
            "split" => {
                let [string, maxsplit] = args.bind(name, ["string", "maxsplit"], 1)?;
                let string = str_arg(&string.unwrap_or(Value::None), name)?;
                let maxsplit = match maxsplit {
                    Some(value) => int_arg(&value, name)?.max(0) as usize,
                    None => 0,
                };
                Ok(Value::list(self.split(&string, maxsplit)))
            }
            "sub" | "subn" => {
                let [repl, string, count] = args.bind(name, ["repl", "string", "count"], 2)?;
                let repl = repl.unwrap_or(Value::None);
                let string = str_arg(&string.unwrap_or(Value::None), name)?;
                let count = match count {
                    Some(value) => int_arg(&value, name)?.max(0) as usize,
                    None => 0,
                };
                let (text, replaced) = self.sub(interp, &repl, &string, count)?;
                Ok(if name == "sub" {
                    Value::str(text)
                } else {
                    Value::tuple(vec![Value::str(text), Value::Int(replaced as i64)])
                })
            }
            _ => attribute_error(format!("'re.Pattern' object has no attribute '{}'", name)),
        }
    }
}

/// Names of the pattern methods taking a subject string
pub const SUBJECT_METHODS: &[&str] = &[
    "search", "match", "fullmatch", "findall", "finditer", "split", "sub", "subn",
];

impl NativeObject for Pattern {
    fn type_name(&self) -> &'static str {
        "re.Pattern"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "pattern" => Some(Value::str(&self.source)),
            "flags" => Some(Value::Int(self.flags)),
            "groups" => Some(Value::Int(self.group_count() as i64)),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        SUBJECT_METHODS.contains(&name)
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        self.call(interp, name, args)
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        Ok(format!("re.compile({})", crate::runtime::format::str_repr(&self.source)))
    }
}

fn group_ref(template: &[char], names: &[Option<String>], start: usize) -> RResult<(usize, usize)> {
    // `\g<name>` or `\g<3>`, `start` points just past `g`
    if template.get(start) != Some(&'<') {
        return value_error("missing < in group reference");
    }
    let Some(close) = template[start..].iter().position(|c| *c == '>') else {
        return value_error("missing >, unterminated name");
    };
    let name: String = template[start + 1..start + close].iter().collect();
    let index = match name.parse::<usize>() {
        Ok(index) => index,
        Err(_) => match names.iter().position(|n| n.as_deref() == Some(name.as_str())) {
            Some(index) => index,
            None => return Err(Exception::new(ExcKind::IndexError, format!("unknown group name '{}'", name))),
        },
    };
    Ok((index, start + close + 1))
}

/// Expand a replacement template (`\1`, `\g<name>`, escapes)
fn expand(template: &str, caps: &Captures, names: &[Option<String>], out: &mut String) -> RResult<()> {
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    let push_group = |index: usize, out: &mut String| -> RResult<()> {
        if index >= caps.len() {
            return value_error(format!("invalid group reference {}", index));
        }
        if let Some(m) = caps.get(index) {
            out.push_str(m.as_str());
        }
        Ok(())
    };
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' || i + 1 == chars.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let next = chars[i + 1];
        match next {
            'g' => {
                let (index, end) = group_ref(&chars, names, i + 2)?;
                push_group(index, out)?;
                i = end;
                continue;
            }
            d if d.is_ascii_digit() => {
                let mut end = i + 2;
                if end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                let index: String = chars[i + 1..end].iter().collect();
                push_group(index.parse().unwrap_or(0), out)?;
                i = end;
                continue;
            }
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'a' => out.push('\x07'),
            '\\' => out.push('\\'),
            other if other.is_ascii_alphabetic() => {
                return value_error(format!("bad escape \\{}", other));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        i += 2;
    }
    Ok(())
}

/// `re.Match`; spans are byte offsets into `string`
#[derive(Debug)]
pub struct ReMatch {
    string: Rc<str>,
    spans: Vec<Option<(usize, usize)>>,
    names: Rc<Vec<Option<String>>>,
}

impl ReMatch {
    fn index(&self, group: &Value) -> RResult<usize> {
        let index = match group {
            Value::Str(name) => self
                .names
                .iter()
                .position(|n| n.as_deref() == Some(&**name)),
            other => other.as_int().and_then(|i| usize::try_from(i).ok()),
        };
        match index {
            Some(index) if index < self.spans.len() => Ok(index),
            _ => index_error("no such group"),
        }
    }

    fn chars_before(&self, byte: usize) -> i64 {
        self.string[..byte].chars().count() as i64
    }

    fn group(&self, index: usize) -> Value {
        match self.spans[index] {
            Some((start, end)) => Value::str(&self.string[start..end]),
            None => Value::None,
        }
    }

    fn span(&self, index: usize) -> (i64, i64) {
        match self.spans[index] {
            Some((start, end)) => (self.chars_before(start), self.chars_before(end)),
            None => (-1, -1),
        }
    }
}

impl NativeObject for ReMatch {
    fn type_name(&self) -> &'static str {
        "re.Match"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "string" => Some(Value::Str(self.string.clone())),
            "pos" => Some(Value::Int(0)),
            "endpos" => Some(Value::Int(self.chars_before(self.string.len()))),
            "lastindex" => Some(
                (1..self.spans.len())
                    .rev()
                    .find(|i| self.spans[*i].is_some())
                    .map_or(Value::None, |i| Value::Int(i as i64)),
            ),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(
            name,
            "group" | "groups" | "groupdict" | "start" | "end" | "span" | "__getitem__"
        )
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        match name {
            "group" => {
                args.no_keywords(name)?;
                match args.positional.len() {
                    0 => Ok(self.group(0)),
                    1 => Ok(self.group(self.index(&args.positional[0])?)),
                    _ => {
                        let mut out = Vec::with_capacity(args.positional.len());
                        for group in &args.positional {
                            out.push(self.group(self.index(group)?));
                        }
                        Ok(Value::tuple(out))
                    }
                }
            }
            "__getitem__" => {
                let [group] = args.exactly(name)?;
                Ok(self.group(self.index(&group)?))
            }
            "groups" => {
                let [default] = args.bind(name, ["default"], 0)?;
                let default = default.unwrap_or(Value::None);
                Ok(Value::tuple(
                    (1..self.spans.len())
                        .map(|i| match self.group(i) {
                            Value::None => default.clone(),
                            found => found,
                        })
                        .collect(),
                ))
            }
            "groupdict" => {
                let [default] = args.bind(name, ["default"], 0)?;
                let default = default.unwrap_or(Value::None);
                let mut dict = Dict::new();
                for (i, group_name) in self.names.iter().enumerate() {
                    if let Some(group_name) = group_name {
                        let value = match self.group(i) {
                            Value::None => default.clone(),
                            found => found,
                        };
                        dict.set_str(group_name, value);
                    }
                }
                Ok(Value::dict(dict))
            }
            _ => {
                let [group] = args.bind(name, ["group"], 0)?;
                let index = match group {
                    Some(group) => self.index(&group)?,
                    None => 0,
                };
                let (start, end) = self.span(index);
                Ok(match name {
                    "start" => Value::Int(start),
                    "end" => Value::Int(end),
                    _ => Value::tuple(vec![Value::Int(start), Value::Int(end)]),
                })
            }
        }
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        let (start, end) = self.span(0);
        let text = match self.group(0) {
            Value::Str(text) => text.to_string(),
            _ => String::new(),
        };
        Ok(format!(
            "<re.Match object; span=({}, {}), match={}>",
            start,
            end,
            crate::runtime::format::str_repr(&text)
        ))
    }
}

/// Resolve a pattern argument that may already be compiled
pub fn pattern_arg(value: &Value, flags: i64) -> RResult<Rc<dyn NativeObject>> {
    match value {
        Value::Str(source) => Ok(Rc::new(Pattern::compile(source, flags)?)),
        Value::Object(object) if object.type_name() == "re.Pattern" => {
            if flags != 0 {
                return value_error("cannot process flags argument with a compiled pattern");
            }
            Ok(object.clone())
        }
        other => type_error(format!(
            "first argument must be string or compiled pattern, not {}",
            other.type_name()
        )),
    }
}

/// Characters `re.escape` backslash-escapes
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "()[]{}?*+-|^$\\.&~# \t\n\r\x0b\x0c".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Module-level function: compile `pattern` then call the method of the same name
fn delegate(name: &'static str, params: &'static [&'static str]) -> (&'static str, Value) {
    (
        name,
        Value::native(name, move |interp, mut args| {
            let flags = match args.take_keyword("flags") {
                Some(flags) => int_arg(&flags, name)?,
                None if args.positional.len() > params.len() + 1 => {
                    let flags = args.positional.remove(params.len() + 1);
                    int_arg(&flags, name)?
                }
                None => 0,
            };
            let pattern = match args.take_keyword("pattern") {
                Some(pattern) => pattern,
                None if !args.positional.is_empty() => args.positional.remove(0),
                None => return type_error(format!("{}() missing required argument 'pattern'", name)),
            };
            let pattern = pattern_arg(&pattern, flags)?;
            pattern.call_method(interp, name, args)
        }),
    )
}

pub struct ReModule;

impl NativeModule for ReModule {
    fn name(&self) -> &'static str {
        "re"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("I", Value::Int(IGNORECASE)),
            ("IGNORECASE", Value::Int(IGNORECASE)),
            ("M", Value::Int(MULTILINE)),
            ("MULTILINE", Value::Int(MULTILINE)),
            ("S", Value::Int(DOTALL)),
            ("DOTALL", Value::Int(DOTALL)),
            ("X", Value::Int(VERBOSE)),
            ("VERBOSE", Value::Int(VERBOSE)),
            (
                "compile",
                Value::native("compile", |_, args| {
                    let [pattern, flags] = args.bind("compile", ["pattern", "flags"], 1)?;
                    let flags = match flags {
                        Some(flags) => int_arg(&flags, "compile")?,
                        None => 0,
                    };
                    Ok(Value::Object(pattern_arg(&pattern.unwrap_or(Value::None), flags)?))
                }),
            ),
            delegate("search", &["string"]),
            delegate("match", &["string"]),
            delegate("fullmatch", &["string"]),
            delegate("findall", &["string"]),
            delegate("finditer", &["string"]),
            delegate("split", &["string", "maxsplit"]),
            delegate("sub", &["repl", "string", "count"]),
            delegate("subn", &["repl", "string", "count"]),
            (
                "escape",
                Value::native("escape", |_, args| {
                    let [pattern] = args.exactly("escape")?;
                    Ok(Value::str(escape(&str_arg(&pattern, "escape")?)))
                }),
            ),
            ("purge", Value::native("purge", |_, _| Ok(Value::None))),
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
    fn test_search_and_groups() {
        let source = r#"
import re
m = re.search(r'(?P<key>\w+)=(\d+)', 'x: width=42;')
print(m.group(), m.group('key'), m.group(2), m.groups(), m.span(), m.start(2))
print(m.groupdict(), m[1], re.match('a', 'ba'), re.fullmatch(r'\d+', '123') is not None)
print(m)
"#;
        assert_eq!(
            run(source),
            "width=42 width 42 ('width', '42') (3, 11) 9\n\
             {'key': 'width'} width None True\n\
             <re.Match object; span=(3, 11), match='width=42'>\n"
        );
    }

    #[test]
    fn test_findall_split_sub() {
        let source = r#"
import re
print(re.findall(r'\d+', 'a1b22c333'), re.findall(r'(\w)(\d)', 'a1 b2'))
print(re.split(r'(,)\s*', 'a, b,c'), re.split(',', 'a,b,c', maxsplit=1))
print(re.sub(r'(\w+)@(\w+)', r'\2 at \g<1>', 'me@host'), re.subn('x*', '-', 'abc'))
print(re.sub(r'\d', lambda m: str(int(m.group()) * 2), 'a1b4'), re.sub('A', 'b', 'aA', flags=re.I))
p = re.compile(r'^\w', re.M)
print(p.findall('ab\ncd'), p.pattern, re.escape('a.b*c'))
"#;
        assert_eq!(
            run(source),
            "['1', '22', '333'] [('a', '1'), ('b', '2')]\n\
             ['a', ',', 'b', ',', 'c'] ['a', 'b,c']\n\
             host at me ('-a-b-c-', 4)\n\
             a2b8 bb\n\
             ['a', 'c'] ^\\w a\\.b\\*c\n"
        );
    }

    #[test]
    fn test_char_offsets_for_non_ascii_subjects() {
        assert_eq!(run("import re\nprint(re.search('b', 'äb').span())\n"), "(1, 2)\n");
    }
}
