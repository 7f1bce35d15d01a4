use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::{Args, Dict, HashKey, NativeModule, NativeObject, Value};
use indexmap::IndexMap;
use std::any::Any;
use std::cell::{Cell, RefCell};

/// Default size of `lru_cache` when used without arguments
pub const DEFAULT_MAXSIZE: i64 = 128;

pub struct FunctoolsModule;

/// `functools.partial` object
#[derive(Debug)]
pub struct Partial {
    func: Value,
    args: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl NativeObject for Partial {
    fn type_name(&self) -> &'static str {
        "functools.partial"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "func" => Some(self.func.clone()),
            "args" => Some(Value::tuple(self.args.clone())),
            "keywords" => {
                let mut dict = Dict::new();
                for (key, value) in &self.keywords {
                    dict.set_str(key, value.clone());
                }
                Some(Value::dict(dict))
            }
            _ => None,
        })
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, interp: &mut Interpreter, args: Args) -> RResult<Value> {
        let mut positional = self.args.clone();
        positional.extend(args.positional);
        let mut keywords = self.keywords.clone();
        for (key, value) in args.keywords {
            match keywords.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = value,
                None => keywords.push((key, value)),
            }
        }
        interp.call(&self.func, Args { positional, keywords })
    }

    fn repr(&self, interp: &mut Interpreter) -> RResult<String> {
        let mut parts = vec![interp.repr(&self.func)?];
        for value in &self.args {
            parts.push(interp.repr(value)?);
        }
        for (key, value) in &self.keywords {
            parts.push(format!("{}={}", key, interp.repr(value)?));
        }
        Ok(format!("functools.partial({})", parts.join(", ")))
    }
}

/// Memoizing wrapper produced by `lru_cache`; `maxsize: None` is unbounded
pub struct LruCache {
    func: Value,
    maxsize: Option<usize>,
    entries: RefCell<IndexMap<HashKey, Value>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<functools._lru_cache_wrapper maxsize={:?}>", self.maxsize)
    }
}

impl LruCache {
    pub fn new(func: Value, maxsize: Option<usize>) -> Self {
        Self {
            func,
            maxsize,
            entries: RefCell::new(IndexMap::new()),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    pub fn maxsize(&self) -> Option<usize> {
        self.maxsize
    }

    fn key(args: &Args) -> RResult<HashKey> {
        let mut parts = args.positional.clone();
        let mut keywords: Vec<&(String, Value)> = args.keywords.iter().collect();
        keywords.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in keywords {
            parts.push(Value::str(key));
            parts.push(value.clone());
        }
        Value::tuple(parts).hash_key()
    }
}

impl NativeObject for LruCache {
    fn type_name(&self) -> &'static str {
        "functools._lru_cache_wrapper"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "__wrapped__" => Some(self.func.clone()),
            "__name__" | "__qualname__" => Some(interp.get_attr(&self.func, name)?),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "cache_info" | "cache_clear")
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        args.exactly::<0>(name)?;
        match name {
            "cache_clear" => {
                self.entries.borrow_mut().clear();
                self.hits.set(0);
                self.misses.set(0);
                Ok(Value::None)
            }
            _ => Ok(Value::object(CacheInfo {
                hits: self.hits.get(),
                misses: self.misses.get(),
                maxsize: self.maxsize,
                currsize: self.entries.borrow().len(),
            })),
        }
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, interp: &mut Interpreter, args: Args) -> RResult<Value> {
        let key = Self::key(&args)?;
        let cached = self.entries.borrow_mut().shift_remove(&key);
        if let Some(value) = cached {
            self.hits.set(self.hits.get() + 1);
            self.entries.borrow_mut().insert(key, value.clone());
            return Ok(value);
        }
        self.misses.set(self.misses.get() + 1);
        let value = interp.call(&self.func, args)?;
        if self.maxsize != Some(0) {
            let mut entries = self.entries.borrow_mut();
            entries.insert(key, value.clone());
            if let Some(maxsize) = self.maxsize {
                while entries.len() > maxsize {
                    entries.shift_remove_index(0);
                }
            }
        }
        Ok(value)
    }

    fn repr(&self, interp: &mut Interpreter) -> RResult<String> {
        let name = interp.get_attr(&self.func, "__name__")?;
        Ok(format!("<functools._lru_cache_wrapper {}>", interp.to_str(&name)?))
    }
}

#[derive(Debug)]
struct CacheInfo {
    hits: u64,
    misses: u64,
    maxsize: Option<usize>,
    currsize: usize,
}

impl NativeObject for CacheInfo {
    fn type_name(&self) -> &'static str {
        "CacheInfo"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "hits" => Some(Value::Int(self.hits as i64)),
            "misses" => Some(Value::Int(self.misses as i64)),
            "maxsize" => Some(self.maxsize.map_or(Value::None, |m| Value::Int(m as i64))),
            "currsize" => Some(Value::Int(self.currsize as i64)),
            _ => None,
        })
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        let maxsize = self.maxsize.map_or("None".to_string(), |m| m.to_string());
        Ok(format!(
            "CacheInfo(hits={}, misses={}, maxsize={}, currsize={})",
            self.hits, self.misses, maxsize, self.currsize
        ))
    }
}

/// Split `lru_cache` arguments into the wrapped function (bare decorator
/// form) and the requested size
pub fn lru_cache_request(interp: &Interpreter, args: &Args) -> RResult<(Option<Value>, Option<i64>)> {
    let maxsize = args
        .positional
        .first()
        .or_else(|| args.keywords.iter().find(|(k, _)| k == "maxsize").map(|(_, v)| v));
    match maxsize {
        None => Ok((None, Some(DEFAULT_MAXSIZE))),
        Some(value) if interp.is_callable(value) => Ok((Some(value.clone()), Some(DEFAULT_MAXSIZE))),
        Some(Value::None) => Ok((None, None)),
        Some(Value::Int(n)) => Ok((None, Some(*n))),
        Some(_) => type_error("Expected first argument to be an integer, a callable, or None"),
    }
}

fn lru_cache(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let (func, maxsize) = lru_cache_request(interp, &args)?;
    let maxsize = maxsize.map(|n| n.max(0) as usize);
    match func {
        Some(func) => Ok(Value::object(LruCache::new(func, maxsize))),
        None => Ok(Value::native("decorating_function", move |_, args| {
            let [func] = args.exactly("decorating_function")?;
            Ok(Value::object(LruCache::new(func, maxsize)))
        })),
    }
}

fn reduce(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [func, iterable, initial] = args.bind("reduce", ["function", "iterable", "initial"], 2)?;
    let func = func.unwrap_or(Value::None);
    let mut items = interp.collect(&iterable.unwrap_or(Value::None))?.into_iter();
    let mut acc = match initial.or_else(|| items.next()) {
        Some(value) => value,
        None => return type_error("reduce() of empty iterable with no initial value"),
    };
    for item in items {
        acc = interp.call_with(&func, vec![acc, item])?;
    }
    Ok(acc)
}

fn partial(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let Args {
        positional,
        keywords,
    } = args;
    let mut positional = positional.into_iter();
    let Some(func) = positional.next() else {
        return type_error("partial() missing required argument 'func'");
    };
    if !interp.is_callable(&func) {
        return type_error("the first argument must be callable");
    }
    Ok(Value::object(Partial {
        func,
        args: positional.collect(),
        keywords,
    }))
}

impl NativeModule for FunctoolsModule {
    fn name(&self) -> &'static str {
        "functools"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("reduce", Value::native("reduce", reduce)),
            ("partial", Value::native("partial", partial)),
            ("lru_cache", Value::native("lru_cache", lru_cache)),
            (
                "cache",
                Value::native("cache", |_, args| {
                    let [func] = args.exactly("cache")?;
                    Ok(Value::object(LruCache::new(func, None)))
                }),
            ),
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
        interp.run(source).unwrap();
        buffer.contents()
    }

    #[test]
    fn test_lru_cache_memoizes_and_evicts() {
        let source = "\
from functools import lru_cache
calls = []
@lru_cache(maxsize=2)
def square(n):
    calls.append(n)
    return n * n
print(square(2), square(3), square(2), square(4), square(3))
print(calls, square.cache_info())
@lru_cache
def fib(n):
    return n if n < 2 else fib(n - 1) + fib(n - 2)
print(fib(60))
";
        assert_eq!(
            run(source),
            "4 9 4 16 9\n[2, 3, 4, 3] CacheInfo(hits=1, misses=4, maxsize=2, currsize=2)\n1548008755920\n"
        );
    }

    #[test]
    fn test_reduce_and_partial() {
        let source = "\
import functools
print(functools.reduce(lambda a, b: a * b, [1, 2, 3, 4]), functools.reduce(lambda a, b: a + b, [], 10))
base2 = functools.partial(int, base=2)
print(base2('101'), functools.partial(max, 5)(3, 9))
";
        assert_eq!(run(source), "24 10\n5 9\n");
    }
}
