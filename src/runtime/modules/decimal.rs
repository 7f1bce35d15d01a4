use super::int_arg;
use crate::config::validator::DECIMAL_PRECISION_LIMIT;
use crate::lang::ast::{BinOp, CmpOp, UnaryOp};
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::{Args, HashKey, NativeClass, NativeModule, NativeObject, Value};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;
use std::str::FromStr;

const ROUNDINGS: &[(&str, RoundingStrategy)] = &[
    ("ROUND_HALF_EVEN", RoundingStrategy::MidpointNearestEven),
    ("ROUND_HALF_UP", RoundingStrategy::MidpointAwayFromZero),
    ("ROUND_HALF_DOWN", RoundingStrategy::MidpointTowardZero),
    ("ROUND_DOWN", RoundingStrategy::ToZero),
    ("ROUND_UP", RoundingStrategy::AwayFromZero),
    ("ROUND_FLOOR", RoundingStrategy::ToNegativeInfinity),
    ("ROUND_CEILING", RoundingStrategy::ToPositiveInfinity),
];

fn rounding_named(name: &str) -> RResult<RoundingStrategy> {
    match ROUNDINGS.iter().find(|(n, _)| *n == name) {
        Some((_, strategy)) => Ok(*strategy),
        None => value_error(format!("invalid rounding mode: '{}'", name)),
    }
}

/// Arithmetic context shared by every decimal created through one module
#[derive(Debug)]
pub struct ContextState {
    prec: Cell<u32>,
    rounding: Cell<usize>,
}

impl ContextState {
    fn new(prec: u32) -> Self {
        Self {
            prec: Cell::new(prec.clamp(1, DECIMAL_PRECISION_LIMIT)),
            rounding: Cell::new(0),
        }
    }

    pub fn prec(&self) -> u32 {
        self.prec.get()
    }

    fn strategy(&self) -> RoundingStrategy {
        ROUNDINGS[self.rounding.get()].1
    }

    /// Round to the context precision when the value carries more digits
    fn apply(&self, value: Decimal) -> RResult<Decimal> {
        let prec = self.prec.get();
        if significant_digits(&value) <= prec {
            return Ok(value);
        }
        match value.round_sf_with_strategy(prec, self.strategy()) {
            Some(rounded) => Ok(rounded),
            None => overflow_error("decimal overflow"),
        }
    }
}

fn significant_digits(value: &Decimal) -> u32 {
    let mantissa = value.mantissa().unsigned_abs();
    if mantissa == 0 {
        1
    } else {
        mantissa.to_string().len() as u32
    }
}

/// `decimal.Context` view returned by `getcontext()`
#[derive(Debug)]
pub struct DecimalContext {
    state: Rc<ContextState>,
}

impl NativeObject for DecimalContext {
    fn type_name(&self) -> &'static str {
        "Context"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(match name {
            "prec" => Some(Value::Int(self.state.prec() as i64)),
            "rounding" => Some(Value::str(ROUNDINGS[self.state.rounding.get()].0)),
            _ => None,
        })
    }

    fn set_attr(&self, _interp: &mut Interpreter, name: &str, value: Value) -> RResult<()> {
        match name {
            "prec" => {
                let prec = int_arg(&value, "prec")?;
                if prec < 1 {
                    return value_error("valid range for prec is [1, MAX_PREC]");
                }
                if prec > DECIMAL_PRECISION_LIMIT as i64 {
                    return value_error(format!(
                        "precision above {} digits is not supported",
                        DECIMAL_PRECISION_LIMIT
                    ));
                }
                self.state.prec.set(prec as u32);
                Ok(())
            }
            "rounding" => {
                let Value::Str(mode) = &value else {
                    return type_error("rounding must be a string");
                };
                rounding_named(mode)?;
                let index = ROUNDINGS.iter().position(|(n, _)| **n == **mode).unwrap_or(0);
                self.state.rounding.set(index);
                Ok(())
            }
            _ => attribute_error(format!("'Context' object has no attribute '{}'", name)),
        }
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        Ok(format!(
            "Context(prec={}, rounding={})",
            self.state.prec(),
            ROUNDINGS[self.state.rounding.get()].0
        ))
    }
}

/// `decimal.Decimal` instance
#[derive(Debug)]
pub struct DecimalValue {
    value: Decimal,
    context: Rc<ContextState>,
}

impl DecimalValue {
    fn wrap(&self, value: Decimal) -> Value {
        Value::object(DecimalValue {
            value,
            context: self.context.clone(),
        })
    }

    fn of(value: &Value) -> Option<Decimal> {
        match value {
            Value::Int(_) | Value::Bool(_) => value.as_int().map(Decimal::from),
            Value::Object(object) => object.as_any().downcast_ref::<DecimalValue>().map(|d| d.value),
            _ => None,
        }
    }

    fn arithmetic(&self, op: BinOp, a: Decimal, b: Decimal) -> RResult<Option<Decimal>> {
        let overflow = || Exception::new(ExcKind::OverflowError, "decimal overflow");
        let result = match op {
            BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
            BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
            BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
            BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b.is_zero() => {
                return zero_division("decimal division by zero")
            }
            BinOp::Div => a.checked_div(b).ok_or_else(overflow)?,
            BinOp::FloorDiv => a.checked_div(b).ok_or_else(overflow)?.trunc(),
            BinOp::Mod => a.checked_rem(b).ok_or_else(overflow)?,
            BinOp::Pow => {
                if a.is_zero() && b.is_sign_negative() {
                    return zero_division("0 cannot be raised to a negative power");
                }
                let integral = b.fract().is_zero();
                match b.to_i64() {
                    Some(exp) if integral => a.checked_powi(exp).ok_or_else(overflow)?,
                    _ if a.is_sign_negative() => {
                        return value_error("negative number cannot be raised to a fractional power")
                    }
                    _ => a.checked_powd(b).ok_or_else(overflow)?,
                }
            }
            _ => return Ok(None),
        };
        self.context.apply(result).map(Some)
    }

    fn call_round(&self, args: Args) -> RResult<Value> {
        let [digits] = args.bind("__round__", ["ndigits"], 0)?;
        match digits {
            None | Some(Value::None) => {
                let rounded = self.value.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
                match rounded.to_i64() {
                    Some(i) => Ok(Value::Int(i)),
                    None => overflow_error("cannot convert Decimal to integer"),
                }
            }
            Some(n) => {
                let n = int_arg(&n, "round")?;
                let scale = n.clamp(0, 28) as u32;
                let mut rounded = self
                    .value
                    .round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
                rounded.rescale(scale);
                Ok(self.wrap(rounded))
            }
        }
    }

    fn quantize(&self, interp: &mut Interpreter, args: Args) -> RResult<Value> {
        let [exp, rounding] = args.bind("quantize", ["exp", "rounding"], 1)?;
        let exp = exp.unwrap_or(Value::None);
        let Some(exp) = Self::of(&exp) else {
            return type_error(format!(
                "conversion from {} to Decimal is not supported",
                exp.type_name()
            ));
        };
        let strategy = match rounding {
            None | Some(Value::None) => self.context.strategy(),
            Some(mode) => rounding_named(&interp.to_str(&mode)?)?,
        };
        let scale = exp.scale();
        let mut rounded = self.value.round_dp_with_strategy(scale, strategy);
        rounded.rescale(scale);
        if rounded.scale() != scale || significant_digits(&rounded) > self.context.prec() {
            return value_error("quantize result has too many digits for current context");
        }
        Ok(self.wrap(rounded))
    }
}

impl NativeObject for DecimalValue {
    fn type_name(&self) -> &'static str {
        "Decimal"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(
            name,
            "quantize"
                | "sqrt"
                | "to_integral_value"
                | "normalize"
                | "is_zero"
                | "is_signed"
                | "copy_abs"
                | "__round__"
                | "__abs__"
        )
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        match name {
            "quantize" => return self.quantize(interp, args),
            "__round__" => return self.call_round(args),
            _ => {}
        }
        args.exactly::<0>(name)?;
        match name {
            "sqrt" => {
                if self.value.is_sign_negative() && !self.value.is_zero() {
                    return value_error("square root of a negative number");
                }
                match self.value.sqrt() {
                    Some(root) => Ok(self.wrap(self.context.apply(root)?)),
                    None => overflow_error("decimal overflow"),
                }
            }
            "to_integral_value" => Ok(self.wrap(
                self.value
                    .round_dp_with_strategy(0, self.context.strategy()),
            )),
            "normalize" => Ok(self.wrap(self.context.apply(self.value)?.normalize())),
            "is_zero" => Ok(Value::Bool(self.value.is_zero())),
            "is_signed" => Ok(Value::Bool(self.value.is_sign_negative())),
            "copy_abs" => Ok(self.wrap(self.value.abs())),
            "__abs__" => Ok(self.wrap(self.context.apply(self.value.abs())?)),
            _ => attribute_error(format!("'decimal.Decimal' object has no attribute '{}'", name)),
        }
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        Ok(format!("Decimal('{}')", self.value))
    }

    fn str(&self, _interp: &mut Interpreter) -> RResult<String> {
        Ok(self.value.to_string())
    }

    fn format_spec(&self, _interp: &mut Interpreter, spec: &str) -> RResult<Option<String>> {
        if spec.is_empty() {
            return Ok(Some(self.value.to_string()));
        }
        // Plain fixed-point (".2f") keeps exact decimal digits
        let fixed = spec
            .strip_prefix('.')
            .and_then(|rest| rest.strip_suffix('f'))
            .and_then(|digits| digits.parse::<u32>().ok());
        Ok(fixed.map(|scale| {
            let scale = scale.min(28);
            let mut rounded = self
                .value
                .round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
            rounded.rescale(scale);
            rounded.to_string()
        }))
    }

    fn binary_op(
        &self,
        _interp: &mut Interpreter,
        op: BinOp,
        other: &Value,
        reflected: bool,
    ) -> RResult<Option<Value>> {
        if let Value::Float(_) = other {
            if matches!(
                op,
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow
            ) {
                let (left, right) = if reflected {
                    ("float", "decimal.Decimal")
                } else {
                    ("decimal.Decimal", "float")
                };
                return type_error(format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    left,
                    right
                ));
            }
        }
        let Some(other) = Self::of(other) else {
            return Ok(None);
        };
        let (a, b) = if reflected {
            (other, self.value)
        } else {
            (self.value, other)
        };
        Ok(self.arithmetic(op, a, b)?.map(|result| self.wrap(result)))
    }

    fn unary_op(&self, _interp: &mut Interpreter, op: UnaryOp) -> RResult<Option<Value>> {
        Ok(match op {
            UnaryOp::Neg => Some(self.wrap(self.context.apply(-self.value)?)),
            UnaryOp::Pos => Some(self.wrap(self.context.apply(self.value)?)),
            _ => None,
        })
    }

    fn compare(&self, _interp: &mut Interpreter, op: CmpOp, other: &Value) -> RResult<Option<bool>> {
        let ordering = match (Self::of(other), other) {
            (Some(other), _) => Some(self.value.cmp(&other)),
            (None, Value::Float(f)) => self.value.to_f64().and_then(|mine| mine.partial_cmp(f)),
            _ => return Ok(None),
        };
        let Some(ordering) = ordering else {
            return Ok(Some(op == CmpOp::NotEq));
        };
        Ok(match op {
            CmpOp::Eq => Some(ordering.is_eq()),
            CmpOp::NotEq => Some(ordering.is_ne()),
            CmpOp::Lt => Some(ordering.is_lt()),
            CmpOp::LtE => Some(ordering.is_le()),
            CmpOp::Gt => Some(ordering.is_gt()),
            CmpOp::GtE => Some(ordering.is_ge()),
            _ => None,
        })
    }

    fn hash_key(&self) -> Option<HashKey> {
        match self.value.to_i64() {
            Some(i) if self.value.fract().is_zero() => Some(HashKey::Int(i)),
            _ => Some(HashKey::from_float(self.value.to_f64().unwrap_or(f64::NAN))),
        }
    }

    fn truthy(&self) -> bool {
        !self.value.is_zero()
    }

    fn to_float(&self) -> Option<f64> {
        self.value.to_f64()
    }

    fn to_int(&self) -> Option<i64> {
        self.value.trunc().to_i64()
    }
}

fn parse_decimal(text: &str) -> RResult<Decimal> {
    let clean: String = text.trim().chars().filter(|c| *c != '_').collect();
    let parsed = if clean.contains(['e', 'E']) {
        Decimal::from_scientific(&clean)
    } else {
        Decimal::from_str(&clean)
    };
    match parsed {
        Ok(value) => Ok(value),
        Err(_) => value_error(format!(
            "invalid literal for Decimal: {}",
            crate::runtime::format::str_repr(text)
        )),
    }
}

/// Host `decimal` module
pub struct DecimalModule {
    context: Rc<ContextState>,
}

impl DecimalModule {
    pub fn new() -> Self {
        Self::with_precision(DECIMAL_PRECISION_LIMIT)
    }

    /// Module whose context starts at `prec` significant digits
    pub fn with_precision(prec: u32) -> Self {
        Self {
            context: Rc::new(ContextState::new(prec)),
        }
    }
}

impl Default for DecimalModule {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeModule for DecimalModule {
    fn name(&self) -> &'static str {
        "decimal"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let context = self.context.clone();
        let class = NativeClass::new("decimal", "Decimal", move |_, args| {
            let [value] = args.bind("Decimal", ["value"], 0)?;
            let value = match value.unwrap_or(Value::Int(0)) {
                Value::Str(text) => parse_decimal(&text)?,
                Value::Float(f) => match Decimal::from_f64_retain(f) {
                    Some(value) => value,
                    None => return value_error(format!("cannot convert {} to Decimal", f)),
                },
                other => match DecimalValue::of(&other) {
                    Some(value) => value,
                    None => {
                        return type_error(format!(
                            "conversion from {} to Decimal is not supported",
                            other.type_name()
                        ))
                    }
                },
            };
            Ok(Value::object(DecimalValue {
                value,
                context: context.clone(),
            }))
        });
        let context = self.context.clone();
        let mut members = vec![
            ("Decimal", Value::object(class)),
            (
                "getcontext",
                Value::native("getcontext", move |_, args| {
                    args.exactly::<0>("getcontext")?;
                    Ok(Value::object(DecimalContext {
                        state: context.clone(),
                    }))
                }),
            ),
            ("MAX_PREC", Value::Int(DECIMAL_PRECISION_LIMIT as i64)),
        ];
        members.extend(ROUNDINGS.iter().map(|(name, _)| (*name, Value::str(*name))));
        members
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::interp::{Interpreter, RuntimeLimits};
    use crate::runtime::SharedBuffer;

    fn interp() -> (Interpreter, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        (interp, buffer)
    }

    #[test]
    fn test_exact_arithmetic() {
        let (mut interp, buffer) = interp();
        let source = "\
from decimal import Decimal
print(Decimal('0.1') + Decimal('0.2'), Decimal('1.30') + Decimal('1.20'), repr(Decimal('2.50')))
print(Decimal(1) / Decimal(3))
print(Decimal(-7) // Decimal(2), Decimal(-7) % Decimal(2), Decimal('1.5') * 2, 3 - Decimal('0.5'))
print(Decimal('1.0') == 1, Decimal('0.5') < 1, float(Decimal('2.5')), int(Decimal('-2.7')))
print(Decimal('1.005').quantize(Decimal('0.01')), round(Decimal('2.675'), 2), round(Decimal('2.5')))
pi = Decimal('3.14159')
print(isinstance(Decimal(3), Decimal), f'{pi:.2f}')
";
        interp.run(source).unwrap();
        assert_eq!(
            buffer.contents(),
            "0.3 2.50 Decimal('2.50')\n\
             0.3333333333333333333333333333\n\
             -3 -1 3.0 2.5\n\
             True True 2.5 -2\n\
             1.00 2.68 2\n\
             True 3.14\n"
        );
    }

    #[test]
    fn test_context_precision_rounds_results() {
        let (mut interp, buffer) = interp();
        let source = "\
import decimal
ctx = decimal.getcontext()
ctx.prec = 6
print(decimal.Decimal(1) / decimal.Decimal(7), ctx.prec, ctx.rounding)
";
        interp.run(source).unwrap();
        assert_eq!(buffer.contents(), "0.142857 6 ROUND_HALF_EVEN\n");
        let exc = interp.run("ctx.prec = 40\n").unwrap_err();
        assert!(exc.is(crate::runtime::error::ExcKind::ValueError));
    }

    #[test]
    fn test_invalid_operands() {
        let (mut interp, _) = interp();
        interp.run("from decimal import Decimal\n").unwrap();
        let exc = interp.run("Decimal('1.5') + 0.5\n").unwrap_err();
        assert_eq!(
            interp.exception_summary(&exc),
            "TypeError: unsupported operand type(s) for +: 'decimal.Decimal' and 'float'"
        );
        let exc = interp.run("Decimal(1) / 0\n").unwrap_err();
        assert!(exc.is(crate::runtime::error::ExcKind::ZeroDivisionError));
        let exc = interp.run("Decimal('abc')\n").unwrap_err();
        assert!(exc.is(crate::runtime::error::ExcKind::ValueError));
    }
}
