//! Runtime values.
//!
//! Containers are reference counted with interior mutability so aliasing
//! behaves like the source language (`b = a; b.append(1)` mutates `a`).
//! Everything here is single threaded; an interpreter never leaves the
//! thread that created it.

use crate::lang::ast::{BinOp, CmpOp, FunctionDef, UnaryOp};
use crate::runtime::error::{type_error, ExcKind, RResult};
use crate::runtime::interp::Interpreter;
use crate::runtime::scope::Scope;
use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Built-in types that are not user classes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Slice,
    Function,
    BuiltinFunction,
    Method,
    Module,
    Type,
    Object,
    Iterator,
    Ellipsis,
    Super,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::Bytes => "bytes",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Range => "range",
            TypeKind::Slice => "slice",
            TypeKind::Function => "function",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Method => "method",
            TypeKind::Module => "module",
            TypeKind::Type => "type",
            TypeKind::Object => "object",
            TypeKind::Iterator => "iterator",
            TypeKind::Ellipsis => "ellipsis",
            TypeKind::Super => "super",
        }
    }

    /// `bool` is the only built-in subtype relation besides `object`
    pub fn is_subtype_of(self, other: TypeKind) -> bool {
        self == other || other == TypeKind::Object || (self == TypeKind::Bool && other == TypeKind::Int)
    }
}

/// Key used by dicts and sets.
///
/// Values that compare equal map to the same key: `True`, `1` and `1.0`
/// all become `Int(1)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Ellipsis,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[HashKey]>),
    Type(TypeKind),
    /// Canonical text for native values with value semantics
    Text(&'static str, String),
    Identity(usize),
}

impl HashKey {
    pub fn from_float(f: f64) -> HashKey {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18 {
            HashKey::Int(f as i64)
        } else if f.is_nan() {
            HashKey::Float(f64::NAN.to_bits())
        } else {
            HashKey::Float(f.to_bits())
        }
    }

    /// Stable integer used by `hash()`
    pub fn hash_value(&self) -> i64 {
        use std::hash::{Hash, Hasher};
        match self {
            HashKey::Int(i) => {
                if *i == -1 {
                    -2
                } else {
                    *i
                }
            }
            other => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                other.hash(&mut hasher);
                hasher.finish() as i64
            }
        }
    }
}

/// Insertion-ordered mapping that remembers the original key values
#[derive(Clone, Debug, Default)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert keeping the first-seen key object and position
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        match self.entries.get_mut(&hash) {
            Some(slot) => slot.1 = value,
            None => {
                self.entries.insert(hash, (key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop().map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }

    /// Insert a string-keyed entry
    pub fn set_str(&mut self, key: &str, value: Value) {
        let key: Rc<str> = Rc::from(key);
        self.insert(HashKey::Str(key.clone()), Value::Str(key), value);
    }
}

/// Insertion-ordered set
#[derive(Clone, Debug, Default)]
pub struct Set {
    items: IndexMap<HashKey, Value>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn insert(&mut self, key: HashKey, value: Value) -> bool {
        if self.items.contains_key(&key) {
            return false;
        }
        self.items.insert(key, value);
        true
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        self.items.shift_remove(key)
    }

    pub fn pop_first(&mut self) -> Option<Value> {
        self.items.shift_remove_index(0).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.items.iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.items.values().cloned().collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &HashKey> {
        self.items.keys()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        n.min(usize::MAX as i128) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> i64 {
        self.start + self.step * index as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value - self.start) % self.step == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceValue {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceValue {
    /// Resolve against a sequence length: (start, stop, step, count)
    pub fn indices(&self, len: usize) -> RResult<(i64, i64, i64, usize)> {
        let len = len as i64;
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(crate::runtime::error::Exception::new(
                ExcKind::ValueError,
                "slice step cannot be zero",
            ));
        }
        let clamp = |value: Option<i64>, default: i64, low: i64, high: i64| match value {
            None => default,
            Some(v) if v < 0 => (v + len).max(low),
            Some(v) => v.min(high),
        };
        let (start, stop) = if step > 0 {
            (clamp(self.lower, 0, 0, len), clamp(self.upper, len, 0, len))
        } else {
            (
                clamp(self.lower, len - 1, -1, len - 1),
                clamp(self.upper, -1, -1, len - 1),
            )
        };
        let count = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        Ok((start, stop, step, count as usize))
    }
}

/// A function defined in source
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// Evaluated defaults, aligned with `def.params.args`
    pub defaults: Vec<Option<Value>>,
    /// Evaluated defaults, aligned with `def.params.kwonly`
    pub kw_defaults: Vec<Option<Value>>,
    pub closure: Rc<Scope>,
    pub file: &'static str,
    /// Class whose body defined this function; used by zero-argument `super()`
    pub owner: RefCell<Option<Weak<Class>>>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Function {
    pub fn name(&self) -> String {
        match self.attrs.borrow().get("__name__") {
            Some(Value::Str(name)) => name.to_string(),
            _ => self.def.name.clone(),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.def.name)
    }
}

pub type NativeFn = dyn Fn(&mut Interpreter, Args) -> RResult<Value>;

/// A function implemented in Rust
pub struct NativeFunction {
    pub name: Rc<str>,
    pub func: Box<NativeFn>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

#[derive(Debug)]
pub enum Method {
    /// Method of a built-in type or native object, dispatched by name
    Builtin(Rc<str>),
    /// Function found on a class
    User(Value),
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Method,
}

pub struct Class {
    pub name: String,
    pub base: Option<Rc<Class>>,
    pub attrs: RefCell<IndexMap<String, Value>>,
    /// Set on the built-in exception classes
    pub exception: Option<ExcKind>,
}

impl Class {
    pub fn new(name: impl Into<String>, base: Option<Rc<Class>>) -> Self {
        Self {
            name: name.into(),
            base,
            attrs: RefCell::new(IndexMap::new()),
            exception: None,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.borrow().get(name) {
            return Some(value.clone());
        }
        self.base.as_ref().and_then(|base| base.lookup(name))
    }

    pub fn builtin_exception(&self) -> Option<ExcKind> {
        self.exception
            .or_else(|| self.base.as_ref().and_then(|base| base.builtin_exception()))
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if Rc::ptr_eq(&class, other) {
                return true;
            }
            current = class.base.clone();
        }
        false
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            attrs: RefCell::new(IndexMap::new()),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object>", self.class.name)
    }
}

pub struct Module {
    pub name: String,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Module {
    pub fn new(name: impl Into<String>, members: Vec<(&'static str, Value)>) -> Self {
        Self {
            name: name.into(),
            attrs: RefCell::new(
                members
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module '{}'>", self.name)
    }
}

/// Result of `super()`: attribute lookup starts above `class`
#[derive(Debug)]
pub struct SuperProxy {
    pub class: Rc<Class>,
    pub receiver: Value,
}

#[derive(Debug)]
pub enum IterState {
    Items { items: Vec<Value>, pos: usize },
    /// Walks a live list so appends during iteration are seen
    List { list: Rc<RefCell<Vec<Value>>>, pos: usize },
    Range { next: i64, remaining: usize, step: i64 },
    /// User object implementing `__next__`
    Protocol(Value),
    Exhausted,
}

/// Call arguments
#[derive(Debug, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(index).1)
    }

    pub fn no_keywords(&self, func: &str) -> RResult<()> {
        match self.keywords.first() {
            Some(_) => type_error(format!("{}() takes no keyword arguments", func)),
            None => Ok(()),
        }
    }

    /// Bind to named parameters; the first `required` must be present
    pub fn bind<const N: usize>(
        mut self,
        func: &str,
        names: [&str; N],
        required: usize,
    ) -> RResult<[Option<Value>; N]> {
        if self.positional.len() > N {
            return type_error(format!(
                "{}() takes at most {} arguments ({} given)",
                func,
                N,
                self.positional.len()
            ));
        }
        let mut slots: [Option<Value>; N] = std::array::from_fn(|_| None);
        for (slot, value) in slots.iter_mut().zip(self.positional.drain(..)) {
            *slot = Some(value);
        }
        for (key, value) in self.keywords {
            let Some(index) = names.iter().position(|name| *name == key) else {
                return type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    func, key
                ));
            };
            if slots[index].is_some() {
                return type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    func, key
                ));
            }
            slots[index] = Some(value);
        }
        if let Some(missing) = slots.iter().take(required).position(|slot| slot.is_none()) {
            return type_error(format!(
                "{}() missing required argument '{}'",
                func, names[missing]
            ));
        }
        Ok(slots)
    }

    /// Exactly `N` positional arguments, no keywords
    pub fn exactly<const N: usize>(self, func: &str) -> RResult<[Value; N]> {
        self.no_keywords(func)?;
        let given = self.positional.len();
        <[Value; N]>::try_from(self.positional).or_else(|_| {
            type_error(format!(
                "{}() takes exactly {} argument{} ({} given)",
                func,
                N,
                if N == 1 { "" } else { "s" },
                given
            ))
        })
    }
}

/// Objects implemented in Rust (compiled patterns, decimals, caches...)
pub trait NativeObject: fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn get_attr(&self, _interp: &mut Interpreter, _name: &str) -> RResult<Option<Value>> {
        Ok(None)
    }

    fn set_attr(&self, _interp: &mut Interpreter, name: &str, _value: Value) -> RResult<()> {
        crate::runtime::error::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            self.type_name(),
            name
        ))
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, _args: Args) -> RResult<Value> {
        crate::runtime::error::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            self.type_name(),
            name
        ))
    }

    fn is_callable(&self) -> bool {
        false
    }

    fn call(&self, _interp: &mut Interpreter, _args: Args) -> RResult<Value> {
        type_error(format!("'{}' object is not callable", self.type_name()))
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        Ok(format!("<{} object>", self.type_name()))
    }

    fn str(&self, interp: &mut Interpreter) -> RResult<String> {
        self.repr(interp)
    }

    /// Custom `format()` handling; `None` falls back to the numeric value
    fn format_spec(&self, _interp: &mut Interpreter, _spec: &str) -> RResult<Option<String>> {
        Ok(None)
    }

    /// `None` means the operation is not supported for these operands
    fn binary_op(
        &self,
        _interp: &mut Interpreter,
        _op: BinOp,
        _other: &Value,
        _reflected: bool,
    ) -> RResult<Option<Value>> {
        Ok(None)
    }

    fn unary_op(&self, _interp: &mut Interpreter, _op: UnaryOp) -> RResult<Option<Value>> {
        Ok(None)
    }

    fn compare(&self, _interp: &mut Interpreter, _op: CmpOp, _other: &Value) -> RResult<Option<bool>> {
        Ok(None)
    }

    /// `None` hashes by identity
    fn hash_key(&self) -> Option<HashKey> {
        None
    }

    fn truthy(&self) -> bool {
        true
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn iter_values(&self, _interp: &mut Interpreter) -> RResult<Option<Vec<Value>>> {
        Ok(None)
    }

    fn contains(&self, _interp: &mut Interpreter, _item: &Value) -> RResult<Option<bool>> {
        Ok(None)
    }

    fn to_float(&self) -> Option<f64> {
        None
    }

    fn to_int(&self) -> Option<i64> {
        None
    }
}

/// A module implemented in Rust
pub trait NativeModule {
    fn name(&self) -> &'static str;

    fn members(&self) -> Vec<(&'static str, Value)>;
}

/// Type object of a native object kind such as `decimal.Decimal`
pub struct NativeClass {
    pub name: &'static str,
    pub module: &'static str,
    pub constructor: Option<Box<NativeFn>>,
}

impl NativeClass {
    pub fn new(
        module: &'static str,
        name: &'static str,
        constructor: impl Fn(&mut Interpreter, Args) -> RResult<Value> + 'static,
    ) -> Self {
        Self {
            name,
            module,
            constructor: Some(Box::new(constructor)),
        }
    }

    pub fn instance_check(&self, value: &Value) -> bool {
        matches!(value, Value::Object(object) if object.type_name() == self.name)
    }
}

impl fmt::Debug for NativeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}.{}'>", self.module, self.name)
    }
}

impl NativeObject for NativeClass {
    fn type_name(&self) -> &'static str {
        "type"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "__name__" | "__qualname__" => Some(Value::str(self.name)),
            "__module__" => Some(Value::str(self.module)),
            _ => None,
        })
    }

    fn is_callable(&self) -> bool {
        self.constructor.is_some()
    }

    fn call(&self, interp: &mut Interpreter, args: Args) -> RResult<Value> {
        match &self.constructor {
            Some(constructor) => constructor(interp, args),
            None => type_error(format!("cannot create '{}' instances", self.name)),
        }
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        Ok(format!("<class '{}.{}'>", self.module, self.name))
    }
}

#[derive(Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Range(RangeValue),
    Slice(Rc<SliceValue>),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    Method(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Type(TypeKind),
    Module(Rc<Module>),
    Object(Rc<dyn NativeObject>),
    Iterator(Rc<RefCell<IterState>>),
    Super(Rc<SuperProxy>),
}

fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: Set) -> Value {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn bytes(data: Vec<u8>) -> Value {
        Value::Bytes(Rc::from(data))
    }

    pub fn object(object: impl NativeObject + 'static) -> Value {
        Value::Object(Rc::new(object))
    }

    pub fn iterator(items: Vec<Value>) -> Value {
        Value::Iterator(Rc::new(RefCell::new(IterState::Items { items, pos: 0 })))
    }

    pub fn native(
        name: &str,
        func: impl Fn(&mut Interpreter, Args) -> RResult<Value> + 'static,
    ) -> Value {
        Value::Native(Rc::new(NativeFunction {
            name: Rc::from(name),
            func: Box::new(func),
        }))
    }

    pub fn builtin_type(&self) -> Option<TypeKind> {
        Some(match self {
            Value::None => TypeKind::NoneType,
            Value::Ellipsis => TypeKind::Ellipsis,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Str(_) => TypeKind::Str,
            Value::Bytes(_) => TypeKind::Bytes,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::Range(_) => TypeKind::Range,
            Value::Slice(_) => TypeKind::Slice,
            Value::Function(_) => TypeKind::Function,
            Value::Native(_) => TypeKind::BuiltinFunction,
            Value::Method(_) => TypeKind::Method,
            Value::Class(_) | Value::Type(_) => TypeKind::Type,
            Value::Module(_) => TypeKind::Module,
            Value::Iterator(_) => TypeKind::Iterator,
            Value::Super(_) => TypeKind::Super,
            Value::Instance(_) | Value::Object(_) => return None,
        })
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Instance(instance) => instance.class.name.clone(),
            Value::Object(object) => object.type_name().to_string(),
            other => other
                .builtin_type()
                .map(TypeKind::name)
                .unwrap_or("object")
                .to_string(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Identity as reported by `id()` and used by `is`
    pub fn id(&self) -> usize {
        match self {
            Value::None => 0x1000,
            Value::Ellipsis => 0x1010,
            Value::Bool(b) => 0x1020 + *b as usize,
            Value::Int(i) => *i as usize,
            Value::Float(f) => f.to_bits() as usize,
            Value::Str(s) => addr(s),
            Value::Bytes(b) => addr(b),
            Value::List(l) => addr(l),
            Value::Tuple(t) => addr(t),
            Value::Dict(d) => addr(d),
            Value::Set(s) => addr(s),
            Value::Range(r) => (r.start ^ r.stop.rotate_left(21) ^ r.step.rotate_left(42)) as usize,
            Value::Slice(s) => addr(s),
            Value::Function(f) => addr(f),
            Value::Native(n) => addr(n),
            Value::Method(m) => addr(m),
            Value::Class(c) => addr(c),
            Value::Instance(i) => addr(i),
            Value::Type(kind) => 0x2000 + *kind as usize,
            Value::Module(m) => addr(m),
            Value::Object(o) => addr(o),
            Value::Iterator(i) => addr(i),
            Value::Super(s) => addr(s),
        }
    }

    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            (a, b) => {
                std::mem::discriminant(a) == std::mem::discriminant(b) && a.id() == b.id()
            }
        }
    }

    pub fn hash_key(&self) -> RResult<HashKey> {
        Ok(match self {
            Value::None => HashKey::None,
            Value::Ellipsis => HashKey::Ellipsis,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => HashKey::from_float(*f),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Bytes(b) => HashKey::Bytes(b.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(Value::hash_key)
                    .collect::<RResult<Vec<_>>>()?
                    .into(),
            ),
            Value::Type(kind) => HashKey::Type(*kind),
            Value::Range(r) => HashKey::Text("range", format!("{}:{}:{}", r.start, r.stop, r.step)),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
                return type_error(format!("unhashable type: '{}'", self.type_name()))
            }
            Value::Object(object) => object
                .hash_key()
                .unwrap_or_else(|| HashKey::Identity(self.id())),
            other => HashKey::Identity(other.id()),
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Ellipsis => f.write_str("Ellipsis"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes({:?})", b),
            Value::List(items) => write!(f, "List(len={})", items.borrow().len()),
            Value::Tuple(items) => write!(f, "Tuple(len={})", items.len()),
            Value::Dict(d) => write!(f, "Dict(len={})", d.borrow().len()),
            Value::Set(s) => write!(f, "Set(len={})", s.borrow().len()),
            Value::Range(r) => write!(f, "Range({}, {}, {})", r.start, r.stop, r.step),
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Native(native) => write!(f, "{:?}", native),
            Value::Class(class) => write!(f, "{:?}", class),
            Value::Instance(instance) => write!(f, "{:?}", instance),
            Value::Module(module) => write!(f, "{:?}", module),
            Value::Object(object) => write!(f, "{:?}", object),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_numbers_share_a_hash_key() {
        assert_eq!(Value::Bool(true).hash_key().unwrap(), HashKey::Int(1));
        assert_eq!(Value::Float(1.0).hash_key().unwrap(), HashKey::Int(1));
        assert_ne!(Value::Float(1.5).hash_key().unwrap(), HashKey::Int(1));
    }

    #[test]
    fn test_mutable_containers_are_unhashable() {
        let err = Value::list(vec![]).hash_key().unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unhashable type: 'list'");
        assert!(Value::tuple(vec![Value::Int(1), Value::str("a")]).hash_key().is_ok());
        assert!(Value::tuple(vec![Value::list(vec![])]).hash_key().is_err());
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = RangeValue { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let down = RangeValue { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert!(down.contains(1));
        assert!(RangeValue { start: 3, stop: 3, step: 1 }.is_empty());
    }

    #[test]
    fn test_slice_indices() {
        let all_reversed = SliceValue { lower: None, upper: None, step: Some(-1) };
        assert_eq!(all_reversed.indices(4).unwrap(), (3, -1, -1, 4));
        let tail = SliceValue { lower: Some(-2), upper: None, step: None };
        assert_eq!(tail.indices(5).unwrap(), (3, 5, 1, 2));
        let zero = SliceValue { lower: None, upper: None, step: Some(0) };
        assert!(zero.indices(3).is_err());
    }

    #[test]
    fn test_dict_keeps_first_key_and_order() {
        let mut dict = Dict::new();
        dict.insert(HashKey::Int(1), Value::Int(1), Value::str("a"));
        dict.insert(HashKey::Int(2), Value::Int(2), Value::str("b"));
        dict.insert(HashKey::Int(1), Value::Float(1.0), Value::str("c"));
        let items = dict.items();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], (Value::Int(1), Value::Str(ref s)) if &**s == "c"));
    }

    #[test]
    fn test_bind_arguments() {
        let mut args = Args::new(vec![Value::Int(1)]);
        args.keywords.push(("step".to_string(), Value::Int(2)));
        let [start, stop, step] = args.bind("f", ["start", "stop", "step"], 1).unwrap();
        assert!(matches!(start, Some(Value::Int(1))));
        assert!(stop.is_none());
        assert!(matches!(step, Some(Value::Int(2))));

        let err = Args::new(vec![]).bind("f", ["x"], 1).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'x'"));
    }
}
