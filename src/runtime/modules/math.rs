use super::{float_arg, int_arg};
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::{Args, NativeModule, Value};

pub struct MathModule;

fn domain_error<T>() -> RResult<T> {
    value_error("math domain error")
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> (&'static str, Value) {
    (
        name,
        Value::native(name, move |_, args| {
            let [x] = args.exactly(name)?;
            let result = f(float_arg(&x, name)?);
            if result.is_nan() && !float_arg(&x, name)?.is_nan() {
                return domain_error();
            }
            Ok(Value::Float(result))
        }),
    )
}

fn rounding(name: &'static str, f: fn(f64) -> f64) -> (&'static str, Value) {
    (
        name,
        Value::native(name, move |_, args| {
            let [x] = args.exactly(name)?;
            if let Value::Int(_) | Value::Bool(_) = x {
                return Ok(Value::Int(x.as_int().unwrap_or(0)));
            }
            let value = f(float_arg(&x, name)?);
            if value.is_nan() {
                return value_error("cannot convert float NaN to integer");
            }
            if value.is_infinite() || value.abs() >= 9.2e18 {
                return overflow_error("cannot convert float infinity to integer");
            }
            Ok(Value::Int(value as i64))
        }),
    )
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a as i64
}

fn int_result(value: Option<i64>) -> RResult<Value> {
    value
        .map(Value::Int)
        .ok_or_else(|| Exception::new(ExcKind::OverflowError, "integer overflow"))
}

fn log(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [x, base] = args.bind("log", ["x", "base"], 1)?;
    let x = float_arg(&x.unwrap_or(Value::None), "log")?;
    if x <= 0.0 {
        return domain_error();
    }
    match base {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = float_arg(&base, "log")?;
            if base <= 0.0 || base == 1.0 {
                return domain_error();
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
    }
}

fn factorial(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [n] = args.exactly("factorial")?;
    let n = int_arg(&n, "factorial")?;
    if n < 0 {
        return value_error("factorial() not defined for negative values");
    }
    int_result((1..=n).try_fold(1i64, |acc, k| acc.checked_mul(k)))
}

fn comb(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [n, k] = args.exactly("comb")?;
    let (n, k) = (int_arg(&n, "comb")?, int_arg(&k, "comb")?);
    if n < 0 || k < 0 {
        return value_error("comb() arguments must be non-negative");
    }
    if k > n {
        return Ok(Value::Int(0));
    }
    let k = k.min(n - k);
    let mut result: i128 = 1;
    for i in 0..k {
        result = result * (n - i) as i128 / (i + 1) as i128;
        if result > i64::MAX as i128 {
            return overflow_error("integer overflow");
        }
    }
    Ok(Value::Int(result as i64))
}

fn perm(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [n, k] = args.bind("perm", ["n", "k"], 1)?;
    let n = int_arg(&n.unwrap_or(Value::None), "perm")?;
    let k = match k {
        Some(Value::None) | None => n,
        Some(k) => int_arg(&k, "perm")?,
    };
    if n < 0 || k < 0 {
        return value_error("perm() arguments must be non-negative");
    }
    if k > n {
        return Ok(Value::Int(0));
    }
    int_result((n - k + 1..=n).try_fold(1i64, |acc, v| acc.checked_mul(v)))
}

fn isqrt(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [n] = args.exactly("isqrt")?;
    let n = int_arg(&n, "isqrt")?;
    if n < 0 {
        return value_error("isqrt() argument must be nonnegative");
    }
    let mut root = (n as f64).sqrt() as i64;
    while root.checked_mul(root).map_or(true, |sq| sq > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).is_some_and(|sq| sq <= n) {
        root += 1;
    }
    Ok(Value::Int(root))
}

fn reduce_ints(args: Args, name: &str, f: fn(i64, i64) -> Option<i64>) -> RResult<Value> {
    args.no_keywords(name)?;
    let mut values = Vec::with_capacity(args.positional.len());
    for value in &args.positional {
        values.push(int_arg(value, name)?);
    }
    let mut iter = values.into_iter();
    let Some(first) = iter.next() else {
        return Ok(Value::Int(if name == "gcd" { 0 } else { 1 }));
    };
    let mut acc = first.checked_abs();
    for value in iter {
        acc = acc.and_then(|acc| f(acc, value));
    }
    int_result(acc)
}

fn isclose(_interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [a, b, rel_tol, abs_tol] = args.bind("isclose", ["a", "b", "rel_tol", "abs_tol"], 2)?;
    let a = float_arg(&a.unwrap_or(Value::None), "isclose")?;
    let b = float_arg(&b.unwrap_or(Value::None), "isclose")?;
    let rel_tol = match rel_tol {
        Some(value) => float_arg(&value, "isclose")?,
        None => 1e-9,
    };
    let abs_tol = match abs_tol {
        Some(value) => float_arg(&value, "isclose")?,
        None => 0.0,
    };
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return value_error("tolerances must be non-negative");
    }
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    Ok(Value::Bool(
        diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol,
    ))
}

/// Neumaier-compensated sum
fn fsum(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [iterable] = args.exactly("fsum")?;
    let mut sum = 0.0f64;
    let mut compensation = 0.0f64;
    for item in interp.collect(&iterable)? {
        let x = float_arg(&item, "fsum")?;
        let t = sum + x;
        if sum.abs() >= x.abs() {
            compensation += (sum - t) + x;
        } else {
            compensation += (x - t) + sum;
        }
        sum = t;
    }
    Ok(Value::Float(sum + compensation))
}

fn prod(interp: &mut Interpreter, mut args: Args) -> RResult<Value> {
    let start = args.take_keyword("start").unwrap_or(Value::Int(1));
    let [iterable] = args.exactly("prod")?;
    let mut total = start;
    for item in interp.collect(&iterable)? {
        total = interp.binary_op(crate::lang::ast::BinOp::Mul, &total, &item)?;
    }
    Ok(total)
}

fn binary_float(name: &'static str, f: fn(f64, f64) -> RResult<f64>) -> (&'static str, Value) {
    (
        name,
        Value::native(name, move |_, args| {
            let [x, y] = args.exactly(name)?;
            Ok(Value::Float(f(float_arg(&x, name)?, float_arg(&y, name)?)?))
        }),
    )
}

impl NativeModule for MathModule {
    fn name(&self) -> &'static str {
        "math"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("pi", Value::Float(std::f64::consts::PI)),
            ("e", Value::Float(std::f64::consts::E)),
            ("tau", Value::Float(std::f64::consts::TAU)),
            ("inf", Value::Float(f64::INFINITY)),
            ("nan", Value::Float(f64::NAN)),
            unary("sqrt", f64::sqrt),
            unary("exp", f64::exp),
            unary("log2", |x| if x > 0.0 { x.log2() } else { f64::NAN }),
            unary("log10", |x| if x > 0.0 { x.log10() } else { f64::NAN }),
            unary("sin", f64::sin),
            unary("cos", f64::cos),
            unary("tan", f64::tan),
            unary("asin", f64::asin),
            unary("acos", f64::acos),
            unary("atan", f64::atan),
            unary("sinh", f64::sinh),
            unary("cosh", f64::cosh),
            unary("tanh", f64::tanh),
            unary("fabs", f64::abs),
            unary("degrees", f64::to_degrees),
            unary("radians", f64::to_radians),
            rounding("floor", f64::floor),
            rounding("ceil", f64::ceil),
            rounding("trunc", f64::trunc),
            ("log", Value::native("log", log)),
            ("factorial", Value::native("factorial", factorial)),
            ("comb", Value::native("comb", comb)),
            ("perm", Value::native("perm", perm)),
            ("isqrt", Value::native("isqrt", isqrt)),
            (
                "gcd",
                Value::native("gcd", |_, args| reduce_ints(args, "gcd", |a, b| Some(gcd(a, b)))),
            ),
            (
                "lcm",
                Value::native("lcm", |_, args| {
                    reduce_ints(args, "lcm", |a, b| match gcd(a, b) {
                        0 => Some(0),
                        g => (a / g).checked_mul(b).map(i64::abs),
                    })
                }),
            ),
            ("isclose", Value::native("isclose", isclose)),
            ("fsum", Value::native("fsum", fsum)),
            ("prod", Value::native("prod", prod)),
            binary_float("pow", |x, y| {
                let result = x.powf(y);
                if result.is_nan() && !x.is_nan() && !y.is_nan() {
                    return domain_error();
                }
                Ok(result)
            }),
            binary_float("atan2", |y, x| Ok(y.atan2(x))),
            binary_float("copysign", |x, y| Ok(x.copysign(y))),
            binary_float("fmod", |x, y| {
                if y == 0.0 {
                    return domain_error();
                }
                Ok(x % y)
            }),
            (
                "hypot",
                Value::native("hypot", |_, args| {
                    args.no_keywords("hypot")?;
                    let mut total = 0.0f64;
                    for value in &args.positional {
                        let x = float_arg(value, "hypot")?;
                        total = total.hypot(x);
                    }
                    Ok(Value::Float(total))
                }),
            ),
            (
                "modf",
                Value::native("modf", |_, args| {
                    let [x] = args.exactly("modf")?;
                    let x = float_arg(&x, "modf")?;
                    Ok(Value::tuple(vec![Value::Float(x.fract()), Value::Float(x.trunc())]))
                }),
            ),
            (
                "isfinite",
                Value::native("isfinite", |_, args| {
                    let [x] = args.exactly("isfinite")?;
                    Ok(Value::Bool(float_arg(&x, "isfinite")?.is_finite()))
                }),
            ),
            (
                "isinf",
                Value::native("isinf", |_, args| {
                    let [x] = args.exactly("isinf")?;
                    Ok(Value::Bool(float_arg(&x, "isinf")?.is_infinite()))
                }),
            ),
            (
                "isnan",
                Value::native("isnan", |_, args| {
                    let [x] = args.exactly("isnan")?;
                    Ok(Value::Bool(float_arg(&x, "isnan")?.is_nan()))
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
    fn test_math_functions() {
        let source = "\
import math
print(math.sqrt(2.25), math.floor(-1.5), math.ceil(1.2), math.factorial(5))
print(math.gcd(12, 18), math.lcm(4, 6), math.comb(5, 2), math.isqrt(17))
print(math.log(8, 2), math.isclose(0.1 + 0.2, 0.3), math.fsum([0.1] * 10))
print(math.prod([2, 3, 4]), math.hypot(3, 4), math.pi > 3.14)
";
        assert_eq!(
            run(source),
            "1.5 -2 2 120\n6 12 10 4\n3.0 True 1.0\n24 5.0 True\n"
        );
    }

    #[test]
    fn test_domain_errors() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer));
        let exc = interp.run("import math\nmath.sqrt(-1)\n").unwrap_err();
        assert_eq!(interp.exception_summary(&exc), "ValueError: math domain error");
    }
}
