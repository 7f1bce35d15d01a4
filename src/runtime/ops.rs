//! Operator semantics: truthiness, equality, ordering, arithmetic,
//! containment and subscription.

use crate::lang::ast::{BinOp, CmpOp, UnaryOp};
use crate::runtime::error::*;
use crate::runtime::interp::{Interpreter, NATIVE_DEPTH_LIMIT};
use crate::runtime::value::*;
use std::cmp::Ordering;
use std::rc::Rc;

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn num_cmp(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

fn holds(op: CmpOp, ordering: Ordering) -> bool {
    match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::LtE => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::GtE => ordering != Ordering::Less,
        CmpOp::Eq => ordering == Ordering::Equal,
        _ => ordering != Ordering::Equal,
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtE => ">=",
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
        CmpOp::Is => "is",
        CmpOp::IsNot => "is not",
    }
}

fn swapped(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Gt,
        CmpOp::LtE => CmpOp::GtE,
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::GtE => CmpOp::LtE,
        other => other,
    }
}

fn compare_dunder(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "__lt__",
        CmpOp::LtE => "__le__",
        CmpOp::Gt => "__gt__",
        CmpOp::GtE => "__ge__",
        CmpOp::NotEq => "__ne__",
        _ => "__eq__",
    }
}

/// (`__op__`, `__rop__`, `__iop__`)
fn binary_dunders(op: BinOp) -> (&'static str, &'static str, &'static str) {
    match op {
        BinOp::Add => ("__add__", "__radd__", "__iadd__"),
        BinOp::Sub => ("__sub__", "__rsub__", "__isub__"),
        BinOp::Mul => ("__mul__", "__rmul__", "__imul__"),
        BinOp::MatMul => ("__matmul__", "__rmatmul__", "__imatmul__"),
        BinOp::Div => ("__truediv__", "__rtruediv__", "__itruediv__"),
        BinOp::FloorDiv => ("__floordiv__", "__rfloordiv__", "__ifloordiv__"),
        BinOp::Mod => ("__mod__", "__rmod__", "__imod__"),
        BinOp::Pow => ("__pow__", "__rpow__", "__ipow__"),
        BinOp::LShift => ("__lshift__", "__rlshift__", "__ilshift__"),
        BinOp::RShift => ("__rshift__", "__rrshift__", "__irshift__"),
        BinOp::BitOr => ("__or__", "__ror__", "__ior__"),
        BinOp::BitXor => ("__xor__", "__rxor__", "__ixor__"),
        BinOp::BitAnd => ("__and__", "__rand__", "__iand__"),
    }
}

fn overflow() -> Box<Exception> {
    Exception::new(ExcKind::OverflowError, "integer overflow")
}

pub(crate) fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

pub(crate) fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x.wrapping_rem(y);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

pub(crate) fn int_pow(base: i64, exp: i64) -> Option<i64> {
    match (base, exp) {
        (_, 0) => Some(1),
        (0 | 1, _) => Some(base),
        (-1, _) => Some(if exp % 2 == 0 { 1 } else { -1 }),
        _ => u32::try_from(exp).ok().and_then(|e| base.checked_pow(e)),
    }
}

pub(crate) fn float_mod(x: f64, y: f64) -> f64 {
    let r = x % y;
    if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
        r + y
    } else {
        r
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> RResult<Option<Value>> {
    let value = match op {
        BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinOp::Div => {
            if y == 0 {
                return zero_division("division by zero");
            }
            return Ok(Some(Value::Float(x as f64 / y as f64)));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return zero_division("integer division or modulo by zero");
            }
            floor_div(x, y).ok_or_else(overflow)?
        }
        BinOp::Mod => {
            if y == 0 {
                return zero_division("integer modulo by zero");
            }
            floor_mod(x, y)
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return zero_division("0.0 cannot be raised to a negative power");
                }
                return Ok(Some(Value::Float((x as f64).powf(y as f64))));
            }
            int_pow(x, y).ok_or_else(overflow)?
        }
        BinOp::LShift => {
            if y < 0 {
                return value_error("negative shift count");
            }
            if x == 0 {
                0
            } else if y >= 63 {
                return Err(overflow());
            } else {
                let shifted = x << y;
                if shifted >> y != x {
                    return Err(overflow());
                }
                shifted
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return value_error("negative shift count");
            }
            if y >= 64 {
                if x < 0 {
                    -1
                } else {
                    0
                }
            } else {
                x >> y
            }
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::MatMul => return Ok(None),
    };
    Ok(Some(Value::Int(value)))
}

fn float_op(op: BinOp, x: f64, y: f64) -> RResult<Option<Value>> {
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return zero_division("float division by zero");
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return zero_division("float floor division by zero");
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return zero_division("float modulo");
            }
            float_mod(x, y)
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return zero_division("0.0 cannot be raised to a negative power");
            }
            if x < 0.0 && y.fract() != 0.0 {
                return value_error("math domain error");
            }
            let result = x.powf(y);
            if result.is_infinite() && x.is_finite() && y.is_finite() {
                return overflow_error("(34, 'Numerical result out of range')");
            }
            result
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

fn normalize(index: i64, len: usize) -> Option<usize> {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    (0..len as i64).contains(&adjusted).then_some(adjusted as usize)
}

fn int_index(index: &Value, kind: &str) -> RResult<i64> {
    match index.as_int() {
        Some(i) => Ok(i),
        None => type_error(format!(
            "{} indices must be integers or slices, not {}",
            kind,
            index.type_name()
        )),
    }
}

fn slice_items<T: Clone>(items: &[T], slice: &SliceValue) -> RResult<Vec<T>> {
    let (start, _, step, count) = slice.indices(items.len())?;
    Ok((0..count)
        .map(|k| items[(start + k as i64 * step) as usize].clone())
        .collect())
}

impl Interpreter {
    pub(crate) fn enter_native(&mut self) -> RResult<()> {
        if self.native_depth >= NATIVE_DEPTH_LIMIT {
            return recursion_error("maximum recursion depth exceeded");
        }
        self.native_depth += 1;
        Ok(())
    }

    pub(crate) fn leave_native(&mut self) {
        self.native_depth = self.native_depth.saturating_sub(1);
    }

    pub fn truthy(&mut self, value: &Value) -> RResult<bool> {
        Ok(match value {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(list) => !list.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Set(set) => !set.borrow().is_empty(),
            Value::Range(range) => !range.is_empty(),
            Value::Instance(instance) => {
                if let Some(result) = self.call_special(instance, "__bool__", Vec::new())? {
                    return match result {
                        Value::Bool(b) => Ok(b),
                        other => type_error(format!(
                            "__bool__ should return bool, returned {}",
                            other.type_name()
                        )),
                    };
                }
                match self.call_special(instance, "__len__", Vec::new())? {
                    Some(len) => len.as_int().unwrap_or(0) != 0,
                    None => true,
                }
            }
            Value::Object(object) => object.truthy(),
            _ => true,
        })
    }

    pub fn len_of(&mut self, value: &Value) -> RResult<usize> {
        Ok(match value {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::List(list) => list.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(dict) => dict.borrow().len(),
            Value::Set(set) => set.borrow().len(),
            Value::Range(range) => range.len(),
            Value::Instance(instance) => match self.call_special(instance, "__len__", Vec::new())? {
                Some(len) => match len.as_int() {
                    Some(n) if n >= 0 => n as usize,
                    Some(_) => return value_error("__len__() should return >= 0"),
                    None => {
                        return type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            len.type_name()
                        ))
                    }
                },
                None => {
                    return type_error(format!(
                        "object of type '{}' has no len()",
                        instance.class.name
                    ))
                }
            },
            Value::Object(object) => match object.len() {
                Some(n) => n,
                None => {
                    return type_error(format!(
                        "object of type '{}' has no len()",
                        object.type_name()
                    ))
                }
            },
            other => {
                return type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))
            }
        })
    }

    // ---- comparison ----

    pub fn eq(&mut self, a: &Value, b: &Value) -> RResult<bool> {
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            return Ok(x == y);
        }
        if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
            return Ok(num_cmp(x, y) == Some(Ordering::Equal));
        }
        match (a, b) {
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => Ok(true),
            (Value::Bytes(x), Value::Bytes(y)) => Ok(x == y),
            (Value::List(x), Value::List(y)) => {
                if Rc::ptr_eq(x, y) {
                    return Ok(true);
                }
                let (x, y) = (x.borrow().clone(), y.borrow().clone());
                self.seq_eq(&x, &y)
            }
            (Value::Tuple(x), Value::Tuple(y)) => self.seq_eq(x, y),
            (Value::Dict(x), Value::Dict(y)) => {
                if Rc::ptr_eq(x, y) {
                    return Ok(true);
                }
                if x.borrow().len() != y.borrow().len() {
                    return Ok(false);
                }
                let entries = x.borrow().items();
                self.enter_native()?;
                let mut result = Ok(true);
                for (key, value) in entries {
                    let other = match key.hash_key() {
                        Ok(hash) => y.borrow().get(&hash).cloned(),
                        Err(exc) => {
                            result = Err(exc);
                            break;
                        }
                    };
                    let same = match other {
                        Some(other) => self.eq(&value, &other),
                        None => Ok(false),
                    };
                    match same {
                        Ok(true) => {}
                        other => {
                            result = other;
                            break;
                        }
                    }
                }
                self.leave_native();
                result
            }
            (Value::Set(x), Value::Set(y)) => {
                let (x, y) = (x.borrow(), y.borrow());
                Ok(x.len() == y.len() && x.keys().all(|key| y.contains(key)))
            }
            (Value::Range(x), Value::Range(y)) => {
                let len = x.len();
                Ok(len == y.len()
                    && (len == 0 || (x.start == y.start && (len == 1 || x.step == y.step))))
            }
            (Value::Instance(instance), _) => {
                if let Some(result) = self.call_special(instance, "__eq__", vec![b.clone()])? {
                    return self.truthy(&result);
                }
                if let Value::Instance(other) = b {
                    if let Some(result) = self.call_special(other, "__eq__", vec![a.clone()])? {
                        return self.truthy(&result);
                    }
                }
                Ok(a.is(b))
            }
            (_, Value::Instance(instance)) => {
                match self.call_special(instance, "__eq__", vec![a.clone()])? {
                    Some(result) => self.truthy(&result),
                    None => Ok(false),
                }
            }
            (Value::Object(object), _) => Ok(object.compare(self, CmpOp::Eq, b)?.unwrap_or(a.is(b))),
            (_, Value::Object(object)) => Ok(object.compare(self, CmpOp::Eq, a)?.unwrap_or(false)),
            _ => Ok(a.is(b)),
        }
    }

    fn seq_eq(&mut self, x: &[Value], y: &[Value]) -> RResult<bool> {
        if x.len() != y.len() {
            return Ok(false);
        }
        self.enter_native()?;
        let mut result = Ok(true);
        for (a, b) in x.iter().zip(y) {
            if a.is(b) {
                continue;
            }
            match self.eq(a, b) {
                Ok(true) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.leave_native();
        result
    }

    pub fn compare(&mut self, op: CmpOp, a: &Value, b: &Value) -> RResult<bool> {
        match op {
            CmpOp::Eq => self.eq(a, b),
            CmpOp::NotEq => {
                if let Value::Instance(instance) = a {
                    if let Some(result) = self.call_special(instance, "__ne__", vec![b.clone()])? {
                        return self.truthy(&result);
                    }
                }
                Ok(!self.eq(a, b)?)
            }
            CmpOp::Is => Ok(a.is(b)),
            CmpOp::IsNot => Ok(!a.is(b)),
            CmpOp::In => self.contains(b, a),
            CmpOp::NotIn => Ok(!self.contains(b, a)?),
            _ => self.order(op, a, b),
        }
    }

    pub fn less_than(&mut self, a: &Value, b: &Value) -> RResult<bool> {
        self.order(CmpOp::Lt, a, b)
    }

    fn order(&mut self, op: CmpOp, a: &Value, b: &Value) -> RResult<bool> {
        if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
            return Ok(num_cmp(x, y).is_some_and(|ordering| holds(op, ordering)));
        }
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => return Ok(holds(op, x.cmp(y))),
            (Value::Bytes(x), Value::Bytes(y)) => return Ok(holds(op, x.cmp(y))),
            (Value::List(x), Value::List(y)) => {
                let (x, y) = (x.borrow().clone(), y.borrow().clone());
                return self.seq_order(op, &x, &y);
            }
            (Value::Tuple(x), Value::Tuple(y)) => return self.seq_order(op, x, y),
            (Value::Set(x), Value::Set(y)) => {
                let (x, y) = (x.borrow(), y.borrow());
                let subset = |small: &Set, big: &Set| small.keys().all(|key| big.contains(key));
                return Ok(match op {
                    CmpOp::Lt => x.len() < y.len() && subset(&x, &y),
                    CmpOp::LtE => subset(&x, &y),
                    CmpOp::Gt => x.len() > y.len() && subset(&y, &x),
                    _ => subset(&y, &x),
                });
            }
            _ => {}
        }
        if let Value::Instance(instance) = a {
            if let Some(result) = self.call_special(instance, compare_dunder(op), vec![b.clone()])? {
                return self.truthy(&result);
            }
        }
        if let Value::Instance(instance) = b {
            let reflected = compare_dunder(swapped(op));
            if let Some(result) = self.call_special(instance, reflected, vec![a.clone()])? {
                return self.truthy(&result);
            }
        }
        if let Value::Object(object) = a {
            if let Some(result) = object.compare(self, op, b)? {
                return Ok(result);
            }
        }
        if let Value::Object(object) = b {
            if let Some(result) = object.compare(self, swapped(op), a)? {
                return Ok(result);
            }
        }
        type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            cmp_symbol(op),
            a.type_name(),
            b.type_name()
        ))
    }

    fn seq_order(&mut self, op: CmpOp, x: &[Value], y: &[Value]) -> RResult<bool> {
        self.enter_native()?;
        let result = (|| {
            for (a, b) in x.iter().zip(y) {
                if !self.eq(a, b)? {
                    return self.order(op, a, b);
                }
            }
            Ok(holds(op, x.len().cmp(&y.len())))
        })();
        self.leave_native();
        result
    }

    /// Stable sort using `<` only
    pub fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> RResult<Vec<Value>> {
        let keys = match key {
            Some(func) if !func.is_none() => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call_with(func, vec![item.clone()])?);
                }
                keys
            }
            _ => items.clone(),
        };
        let mut paired: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
        if reverse {
            paired.reverse();
        }
        let mut sorted = self.merge_sort(paired)?;
        if reverse {
            sorted.reverse();
        }
        Ok(sorted.into_iter().map(|(_, value)| value).collect())
    }

    fn merge_sort(&mut self, mut items: Vec<(Value, Value)>) -> RResult<Vec<(Value, Value)>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items)?;
        let right = self.merge_sort(right)?;
        let mut out = Vec::with_capacity(left.len() + right.len());
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            if self.less_than(&right[j].0, &left[i].0)? {
                out.push(right[j].clone());
                j += 1;
            } else {
                out.push(left[i].clone());
                i += 1;
            }
        }
        out.extend_from_slice(&left[i..]);
        out.extend_from_slice(&right[j..]);
        Ok(out)
    }

    // ---- arithmetic ----

    pub fn binary_op(&mut self, op: BinOp, a: &Value, b: &Value) -> RResult<Value> {
        if let Value::Object(object) = a {
            if let Some(value) = object.binary_op(self, op, b, false)? {
                return Ok(value);
            }
        }
        if let Value::Object(object) = b {
            if let Some(value) = object.binary_op(self, op, a, true)? {
                return Ok(value);
            }
        }
        if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
            let result = match (x, y) {
                (Num::Int(x), Num::Int(y)) => int_op(op, x, y)?,
                _ => float_op(op, x.as_f64(), y.as_f64())?,
            };
            if let Some(value) = result {
                return Ok(value);
            }
        }
        if let Some(value) = self.sequence_op(op, a, b)? {
            return Ok(value);
        }
        let (forward, reflected, _) = binary_dunders(op);
        if let Value::Instance(instance) = a {
            if let Some(value) = self.call_special(instance, forward, vec![b.clone()])? {
                return Ok(value);
            }
        }
        if let Value::Instance(instance) = b {
            if let Some(value) = self.call_special(instance, reflected, vec![a.clone()])? {
                return Ok(value);
            }
        }
        type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))
    }

    fn repeat<T: Clone>(&self, items: &[T], count: &Value) -> RResult<Option<Vec<T>>> {
        let Some(count) = count.as_int() else {
            return Ok(None);
        };
        let count = count.max(0) as usize;
        let total = items
            .len()
            .checked_mul(count)
            .ok_or_else(|| Exception::new(ExcKind::MemoryError, "repeated sequence is too long"))?;
        self.check_len(total)?;
        let mut out = Vec::with_capacity(total);
        for _ in 0..count {
            out.extend_from_slice(items);
        }
        Ok(Some(out))
    }

    fn sequence_op(&mut self, op: BinOp, a: &Value, b: &Value) -> RResult<Option<Value>> {
        let value = match (op, a, b) {
            (BinOp::Add, Value::Str(x), Value::Str(y)) => {
                self.check_len(x.len() + y.len())?;
                Value::str(format!("{}{}", x, y))
            }
            (BinOp::Add, Value::List(x), Value::List(y)) => {
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                self.check_len(items.len())?;
                Value::list(items)
            }
            (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
                self.check_len(x.len() + y.len())?;
                Value::tuple(x.iter().chain(y.iter()).cloned().collect())
            }
            (BinOp::Add, Value::Bytes(x), Value::Bytes(y)) => {
                self.check_len(x.len() + y.len())?;
                Value::bytes([&x[..], &y[..]].concat())
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) => {
                let chars: Vec<char> = s.chars().collect();
                match self.repeat(&chars, n)? {
                    Some(chars) => Value::str(chars.into_iter().collect::<String>()),
                    None => return Ok(None),
                }
            }
            (BinOp::Mul, Value::List(list), n) | (BinOp::Mul, n, Value::List(list)) => {
                let items = list.borrow().clone();
                match self.repeat(&items, n)? {
                    Some(items) => Value::list(items),
                    None => return Ok(None),
                }
            }
            (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items)) => {
                match self.repeat(items, n)? {
                    Some(items) => Value::tuple(items),
                    None => return Ok(None),
                }
            }
            (BinOp::Mul, Value::Bytes(bytes), n) | (BinOp::Mul, n, Value::Bytes(bytes)) => {
                match self.repeat(bytes, n)? {
                    Some(bytes) => Value::bytes(bytes),
                    None => return Ok(None),
                }
            }
            (BinOp::Mod, Value::Str(template), values) => {
                Value::str(self.percent_format(template, values)?)
            }
            (
                BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor,
                Value::Set(x),
                Value::Set(y),
            ) => {
                let (x, y) = (x.borrow(), y.borrow());
                Value::set(set_op(op, &x, &y))
            }
            (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
                let mut merged = Dict::new();
                for (key, value) in x.borrow().items().into_iter().chain(y.borrow().items()) {
                    merged.insert(key.hash_key()?, key, value);
                }
                Value::dict(merged)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Augmented assignment; mutable containers update in place
    pub fn inplace_op(&mut self, op: BinOp, a: &Value, b: &Value) -> RResult<Value> {
        match (op, a) {
            (BinOp::Add, Value::List(list)) => {
                let items = self.collect(b)?;
                self.check_len(list.borrow().len() + items.len())?;
                list.borrow_mut().extend(items);
                return Ok(a.clone());
            }
            (BinOp::Mul, Value::List(list)) if b.as_int().is_some() => {
                let items = list.borrow().clone();
                if let Some(repeated) = self.repeat(&items, b)? {
                    *list.borrow_mut() = repeated;
                }
                return Ok(a.clone());
            }
            (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(set)) => {
                if let Value::Set(other) = b {
                    let result = set_op(op, &set.borrow(), &other.borrow());
                    *set.borrow_mut() = result;
                    return Ok(a.clone());
                }
            }
            (BinOp::BitOr, Value::Dict(dict)) => {
                if let Value::Dict(other) = b {
                    let entries = other.borrow().items();
                    for (key, value) in entries {
                        let hash = key.hash_key()?;
                        dict.borrow_mut().insert(hash, key, value);
                    }
                    return Ok(a.clone());
                }
            }
            (_, Value::Instance(instance)) => {
                let (_, _, inplace) = binary_dunders(op);
                if let Some(value) = self.call_special(instance, inplace, vec![b.clone()])? {
                    return Ok(value);
                }
            }
            _ => {}
        }
        self.binary_op(op, a, b)
    }

    pub fn unary_op(&mut self, op: UnaryOp, value: &Value) -> RResult<Value> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!self.truthy(value)?));
        }
        match (op, value) {
            (UnaryOp::Neg, Value::Float(f)) => return Ok(Value::Float(-f)),
            (UnaryOp::Pos, Value::Float(f)) => return Ok(Value::Float(*f)),
            (_, Value::Int(_) | Value::Bool(_)) => {
                let i = value.as_int().unwrap_or(0);
                return Ok(Value::Int(match op {
                    UnaryOp::Neg => i.checked_neg().ok_or_else(overflow)?,
                    UnaryOp::Invert => !i,
                    _ => i,
                }));
            }
            (_, Value::Instance(instance)) => {
                let name = match op {
                    UnaryOp::Neg => "__neg__",
                    UnaryOp::Pos => "__pos__",
                    _ => "__invert__",
                };
                if let Some(result) = self.call_special(instance, name, Vec::new())? {
                    return Ok(result);
                }
            }
            (_, Value::Object(object)) => {
                if let Some(result) = object.unary_op(self, op)? {
                    return Ok(result);
                }
            }
            _ => {}
        }
        let symbol = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            _ => "~",
        };
        type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            value.type_name()
        ))
    }

    // ---- containment and subscription ----

    pub fn contains(&mut self, container: &Value, item: &Value) -> RResult<bool> {
        match container {
            Value::Str(s) => match item {
                Value::Str(sub) => Ok(s.contains(&**sub)),
                other => type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )),
            },
            Value::Bytes(bytes) => match item {
                Value::Int(i) => match u8::try_from(*i) {
                    Ok(byte) => Ok(bytes.contains(&byte)),
                    Err(_) => value_error("byte must be in range(0, 256)"),
                },
                Value::Bytes(sub) => Ok(sub.is_empty() || bytes.windows(sub.len()).any(|w| w == &sub[..])),
                other => type_error(format!(
                    "a bytes-like object is required, not '{}'",
                    other.type_name()
                )),
            },
            Value::List(list) => {
                let items = list.borrow().clone();
                self.any_equal(&items, item)
            }
            Value::Tuple(items) => self.any_equal(items, item),
            Value::Dict(dict) => {
                let key = item.hash_key()?;
                Ok(dict.borrow().contains(&key))
            }
            Value::Set(set) => {
                let key = item.hash_key()?;
                Ok(set.borrow().contains(&key))
            }
            Value::Range(range) => Ok(match item {
                Value::Int(_) | Value::Bool(_) => range.contains(item.as_int().unwrap_or(0)),
                Value::Float(f) if f.fract() == 0.0 => range.contains(*f as i64),
                _ => false,
            }),
            Value::Instance(instance) => {
                if let Some(result) =
                    self.call_special(instance, "__contains__", vec![item.clone()])?
                {
                    return self.truthy(&result);
                }
                self.scan_for(container, item)
            }
            Value::Object(object) => match object.contains(self, item)? {
                Some(found) => Ok(found),
                None => self.scan_for(container, item),
            },
            Value::Iterator(_) => self.scan_for(container, item),
            other => type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )),
        }
    }

    fn any_equal(&mut self, items: &[Value], item: &Value) -> RResult<bool> {
        for candidate in items {
            if candidate.is(item) || self.eq(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn scan_for(&mut self, container: &Value, item: &Value) -> RResult<bool> {
        let cursor = self.iterate(container)?;
        while let Some(candidate) = self.next_item(&cursor)? {
            if candidate.is(item) || self.eq(&candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn get_item(&mut self, object: &Value, index: &Value) -> RResult<Value> {
        match object {
            Value::List(list) => {
                let list = list.borrow();
                if let Value::Slice(slice) = index {
                    return Ok(Value::list(slice_items(&list, slice)?));
                }
                let i = int_index(index, "list")?;
                match normalize(i, list.len()) {
                    Some(i) => Ok(list[i].clone()),
                    None => index_error("list index out of range"),
                }
            }
            Value::Tuple(items) => {
                if let Value::Slice(slice) = index {
                    return Ok(Value::tuple(slice_items(items, slice)?));
                }
                let i = int_index(index, "tuple")?;
                match normalize(i, items.len()) {
                    Some(i) => Ok(items[i].clone()),
                    None => index_error("tuple index out of range"),
                }
            }
            Value::Str(s) => {
                if let Value::Slice(slice) = index {
                    let chars: Vec<char> = s.chars().collect();
                    return Ok(Value::str(slice_items(&chars, slice)?.into_iter().collect::<String>()));
                }
                let Some(i) = index.as_int() else {
                    return type_error(format!(
                        "string indices must be integers, not '{}'",
                        index.type_name()
                    ));
                };
                let len = if s.is_ascii() { s.len() } else { s.chars().count() };
                match normalize(i, len).and_then(|i| s.chars().nth(i)) {
                    Some(c) => Ok(Value::str(c.to_string())),
                    None => index_error("string index out of range"),
                }
            }
            Value::Bytes(bytes) => {
                if let Value::Slice(slice) = index {
                    return Ok(Value::bytes(slice_items(bytes, slice)?));
                }
                let i = int_index(index, "byte")?;
                match normalize(i, bytes.len()) {
                    Some(i) => Ok(Value::Int(bytes[i] as i64)),
                    None => index_error("index out of range"),
                }
            }
            Value::Range(range) => {
                if let Value::Slice(slice) = index {
                    let (start, _, step, count) = slice.indices(range.len())?;
                    let new_start = range.start.wrapping_add(start.wrapping_mul(range.step));
                    let new_step = range.step.wrapping_mul(step);
                    return Ok(Value::Range(RangeValue {
                        start: new_start,
                        stop: new_start.wrapping_add(new_step.wrapping_mul(count as i64)),
                        step: new_step,
                    }));
                }
                let i = int_index(index, "range")?;
                match normalize(i, range.len()) {
                    Some(i) => Ok(Value::Int(range.get(i))),
                    None => index_error("range object index out of range"),
                }
            }
            Value::Dict(dict) => {
                let key = index.hash_key()?;
                let found = dict.borrow().get(&key).cloned();
                match found {
                    Some(value) => Ok(value),
                    None => {
                        let text = self.repr(index)?;
                        key_error(text)
                    }
                }
            }
            Value::Instance(instance) => {
                match self.call_special(instance, "__getitem__", vec![index.clone()])? {
                    Some(value) => Ok(value),
                    None => type_error(format!(
                        "'{}' object is not subscriptable",
                        instance.class.name
                    )),
                }
            }
            Value::Object(native) if native.has_method("__getitem__") => {
                native.call_method(self, "__getitem__", Args::new(vec![index.clone()]))
            }
            // Generic aliases such as `list[int]` evaluate to the bare type
            Value::Type(_) => Ok(object.clone()),
            other => type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )),
        }
    }

    pub fn set_item(&mut self, object: &Value, index: &Value, value: Value) -> RResult<()> {
        match object {
            Value::List(list) => {
                if let Value::Slice(slice) = index {
                    let values = self.collect(&value)?;
                    let mut list = list.borrow_mut();
                    let (start, stop, step, count) = slice.indices(list.len())?;
                    if step == 1 {
                        let start = start as usize;
                        let stop = (stop.max(start as i64) as usize).min(list.len());
                        list.splice(start..stop, values);
                        drop(list);
                        return Ok(());
                    }
                    if values.len() != count {
                        return value_error(format!(
                            "attempt to assign sequence of size {} to extended slice of size {}",
                            values.len(),
                            count
                        ));
                    }
                    for (k, item) in values.into_iter().enumerate() {
                        list[(start + k as i64 * step) as usize] = item;
                    }
                    return Ok(());
                }
                let i = int_index(index, "list")?;
                let mut list = list.borrow_mut();
                match normalize(i, list.len()) {
                    Some(i) => {
                        list[i] = value;
                        Ok(())
                    }
                    None => index_error("list assignment index out of range"),
                }
            }
            Value::Dict(dict) => {
                let key = index.hash_key()?;
                self.check_len(dict.borrow().len() + 1)?;
                dict.borrow_mut().insert(key, index.clone(), value);
                Ok(())
            }
            Value::Instance(instance) => {
                match self.call_special(instance, "__setitem__", vec![index.clone(), value])? {
                    Some(_) => Ok(()),
                    None => type_error(format!(
                        "'{}' object does not support item assignment",
                        instance.class.name
                    )),
                }
            }
            Value::Object(native) if native.has_method("__setitem__") => {
                native.call_method(self, "__setitem__", Args::new(vec![index.clone(), value]))?;
                Ok(())
            }
            other => type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            )),
        }
    }

    pub fn del_item(&mut self, object: &Value, index: &Value) -> RResult<()> {
        match object {
            Value::List(list) => {
                let mut list = list.borrow_mut();
                if let Value::Slice(slice) = index {
                    let (start, _, step, count) = slice.indices(list.len())?;
                    let mut positions: Vec<usize> = (0..count)
                        .map(|k| (start + k as i64 * step) as usize)
                        .collect();
                    positions.sort_unstable_by(|a, b| b.cmp(a));
                    for position in positions {
                        list.remove(position);
                    }
                    return Ok(());
                }
                let i = int_index(index, "list")?;
                match normalize(i, list.len()) {
                    Some(i) => {
                        list.remove(i);
                        Ok(())
                    }
                    None => index_error("list assignment index out of range"),
                }
            }
            Value::Dict(dict) => {
                let key = index.hash_key()?;
                let removed = dict.borrow_mut().remove(&key);
                match removed {
                    Some(_) => Ok(()),
                    None => {
                        let text = self.repr(index)?;
                        key_error(text)
                    }
                }
            }
            Value::Instance(instance) => {
                match self.call_special(instance, "__delitem__", vec![index.clone()])? {
                    Some(_) => Ok(()),
                    None => type_error(format!(
                        "'{}' object does not support item deletion",
                        instance.class.name
                    )),
                }
            }
            other => type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            )),
        }
    }
}

fn set_op(op: BinOp, x: &Set, y: &Set) -> Set {
    let mut out = Set::new();
    match op {
        BinOp::BitOr => {
            for (key, value) in x.iter().chain(y.iter()) {
                out.insert(key.clone(), value.clone());
            }
        }
        BinOp::BitAnd => {
            for (key, value) in x.iter().filter(|(key, _)| y.contains(key)) {
                out.insert(key.clone(), value.clone());
            }
        }
        BinOp::Sub => {
            for (key, value) in x.iter().filter(|(key, _)| !y.contains(key)) {
                out.insert(key.clone(), value.clone());
            }
        }
        _ => {
            for (key, value) in x.iter().filter(|(key, _)| !y.contains(key)) {
                out.insert(key.clone(), value.clone());
            }
            for (key, value) in y.iter().filter(|(key, _)| !x.contains(key)) {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
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
    fn test_floor_division_and_modulo_follow_divisor_sign() {
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_mod(-7, 2), 1);
        assert_eq!(floor_mod(7, -2), -1);
        assert_eq!(floor_div(i64::MIN, -1), None);
        assert_eq!(float_mod(-7.5, 2.0), 0.5);
    }

    #[test]
    fn test_integer_overflow_raises() {
        let mut interp = interp();
        let err = interp
            .binary_op(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2))
            .unwrap_err();
        assert!(err.is(ExcKind::OverflowError));
        let err = interp
            .binary_op(BinOp::Pow, &Value::Int(10), &Value::Int(30))
            .unwrap_err();
        assert!(err.is(ExcKind::OverflowError));
        assert!(matches!(
            interp.binary_op(BinOp::Pow, &Value::Int(-1), &Value::Int(1_000_001)),
            Ok(Value::Int(-1))
        ));
    }

    #[test]
    fn test_mixed_numeric_equality() {
        let mut interp = interp();
        assert!(interp.eq(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(interp.eq(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!interp.eq(&Value::Float(f64::NAN), &Value::Float(f64::NAN)).unwrap());
    }

    #[test]
    fn test_sequence_ordering() {
        let mut interp = interp();
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert!(interp.less_than(&a, &b).unwrap());
        let short = Value::tuple(vec![Value::Int(1)]);
        assert!(interp.less_than(&short, &a).unwrap());
        let err = interp.less_than(&Value::Int(1), &Value::str("a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: '<' not supported between instances of 'int' and 'str'"
        );
    }

    #[test]
    fn test_sort_is_stable_and_reversible() {
        let mut interp = interp();
        let items = vec![
            Value::tuple(vec![Value::Int(2), Value::str("a")]),
            Value::tuple(vec![Value::Int(1), Value::str("b")]),
            Value::tuple(vec![Value::Int(2), Value::str("c")]),
        ];
        let key = Value::native("first", |interp, args| {
            let [item] = args.exactly::<1>("first")?;
            interp.get_item(&item, &Value::Int(0))
        });
        let sorted = interp.sort_values(items.clone(), Some(&key), false).unwrap();
        let labels: Vec<String> = sorted
            .iter()
            .map(|item| interp.get_item(item, &Value::Int(1)).unwrap())
            .map(|label| label.as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(labels, ["b", "a", "c"]);

        let sorted = interp.sort_values(items, Some(&key), true).unwrap();
        let first = interp.get_item(&sorted[0], &Value::Int(1)).unwrap();
        assert_eq!(first.as_str(), Some("a"));
    }

    #[test]
    fn test_slicing() {
        let mut interp = interp();
        let list = Value::list((0..10).map(Value::Int).collect());
        let slice = Value::Slice(Rc::new(SliceValue {
            lower: Some(-3),
            upper: None,
            step: None,
        }));
        let tail = interp.get_item(&list, &slice).unwrap();
        assert_eq!(interp.repr(&tail).unwrap(), "[7, 8, 9]");
        let reversed = Value::Slice(Rc::new(SliceValue {
            lower: None,
            upper: None,
            step: Some(-1),
        }));
        let text = interp.get_item(&Value::str("héllo"), &reversed).unwrap();
        assert_eq!(text.as_str(), Some("olléh"));
    }

    #[test]
    fn test_missing_key_message_is_repr() {
        let mut interp = interp();
        let err = interp
            .get_item(&Value::dict(Dict::new()), &Value::str("a"))
            .unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'a'");
    }

    #[test]
    fn test_in_place_list_extend_keeps_identity() {
        let mut interp = interp();
        let list = Value::list(vec![Value::Int(1)]);
        let result = interp
            .inplace_op(BinOp::Add, &list, &Value::tuple(vec![Value::Int(2)]))
            .unwrap();
        assert!(result.is(&list));
        assert_eq!(interp.len_of(&list).unwrap(), 2);
    }
}
