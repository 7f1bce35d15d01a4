use super::{float_arg, int_arg};
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::{Args, NativeModule, Value};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

type SharedRng = Rc<RefCell<SmallRng>>;

/// Host `random` module; every function shares one generator
pub struct RandomModule {
    rng: SharedRng,
}

impl RandomModule {
    pub fn new() -> Self {
        Self {
            rng: Rc::new(RefCell::new(SmallRng::from_entropy())),
        }
    }
}

impl Default for RandomModule {
    fn default() -> Self {
        Self::new()
    }
}

fn count_arg(value: &Value, func: &str) -> RResult<usize> {
    let n = int_arg(value, func)?;
    usize::try_from(n).or_else(|_| value_error(format!("{}(): negative argument not allowed", func)))
}

fn randrange(rng: &SharedRng, start: i64, stop: i64, step: i64) -> RResult<Value> {
    if step == 0 {
        return value_error("zero step for randrange()");
    }
    let span = if step > 0 {
        (stop - start + step - 1).div_euclid(step)
    } else {
        (start - stop - step - 1).div_euclid(-step)
    };
    if span <= 0 {
        return value_error(format!("empty range for randrange() ({}, {}, {})", start, stop, step));
    }
    let index = rng.borrow_mut().gen_range(0..span);
    Ok(Value::Int(start + index * step))
}

fn with_rng(
    rng: &SharedRng,
    name: &'static str,
    func: fn(&SharedRng, &mut Interpreter, Args) -> RResult<Value>,
) -> (&'static str, Value) {
    let rng = rng.clone();
    (name, Value::native(name, move |interp, args| func(&rng, interp, args)))
}

fn random(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    args.exactly::<0>("random")?;
    Ok(Value::Float(rng.borrow_mut().gen::<f64>()))
}

fn uniform(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [a, b] = args.exactly("uniform")?;
    let (a, b) = (float_arg(&a, "uniform")?, float_arg(&b, "uniform")?);
    Ok(Value::Float(a + (b - a) * rng.borrow_mut().gen::<f64>()))
}

fn randint(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [a, b] = args.exactly("randint")?;
    let (a, b) = (int_arg(&a, "randint")?, int_arg(&b, "randint")?);
    randrange(rng, a, b.saturating_add(1), 1)
}

fn randrange_fn(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [start, stop, step] = args.bind("randrange", ["start", "stop", "step"], 1)?;
    let start = int_arg(&start.unwrap_or(Value::None), "randrange")?;
    let step = match step {
        Some(step) => int_arg(&step, "randrange")?,
        None => 1,
    };
    match stop {
        None | Some(Value::None) => randrange(rng, 0, start, step),
        Some(stop) => randrange(rng, start, int_arg(&stop, "randrange")?, step),
    }
}

fn choice(rng: &SharedRng, interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [seq] = args.exactly("choice")?;
    let items = interp.collect(&seq)?;
    match items.choose(&mut *rng.borrow_mut()) {
        Some(item) => Ok(item.clone()),
        None => index_error("Cannot choose from an empty sequence"),
    }
}

fn choices(rng: &SharedRng, interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [population, weights, cum_weights, k] =
        args.bind("choices", ["population", "weights", "cum_weights", "k"], 1)?;
    let population = interp.collect(&population.unwrap_or(Value::None))?;
    let k = match k {
        Some(k) => count_arg(&k, "choices")?,
        None => 1,
    };
    interp.check_len(k)?;
    let cumulative = match (weights, cum_weights) {
        (Some(Value::None) | None, Some(Value::None) | None) => None,
        (Some(weights), None | Some(Value::None)) => {
            let mut total = 0.0;
            let mut out = Vec::new();
            for weight in interp.collect(&weights)? {
                total += float_arg(&weight, "choices")?;
                out.push(total);
            }
            Some(out)
        }
        (None | Some(Value::None), Some(cum)) => Some(
            interp
                .collect(&cum)?
                .iter()
                .map(|w| float_arg(w, "choices"))
                .collect::<RResult<Vec<f64>>>()?,
        ),
        _ => return type_error("Cannot specify both weights and cumulative weights"),
    };
    if population.is_empty() {
        return index_error("Cannot choose from an empty population");
    }
    let mut rng = rng.borrow_mut();
    let mut out = Vec::with_capacity(k);
    match cumulative {
        None => {
            for _ in 0..k {
                out.push(population[rng.gen_range(0..population.len())].clone());
            }
        }
        Some(cumulative) => {
            if cumulative.len() != population.len() {
                return value_error("The number of weights does not match the population");
            }
            let total = cumulative.last().copied().unwrap_or(0.0);
            if total <= 0.0 || !total.is_finite() {
                return value_error("Total of weights must be greater than zero");
            }
            for _ in 0..k {
                let target = rng.gen::<f64>() * total;
                let index = cumulative.partition_point(|w| *w <= target).min(population.len() - 1);
                out.push(population[index].clone());
            }
        }
    }
    Ok(Value::list(out))
}

fn sample(rng: &SharedRng, interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [population, k] = args.bind("sample", ["population", "k"], 2)?;
    let population = interp.collect(&population.unwrap_or(Value::None))?;
    let k = int_arg(&k.unwrap_or(Value::None), "sample")?;
    if k < 0 || k as usize > population.len() {
        return value_error("Sample larger than population or is negative");
    }
    let picked = population
        .choose_multiple(&mut *rng.borrow_mut(), k as usize)
        .cloned()
        .collect();
    Ok(Value::list(picked))
}

fn shuffle(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [list] = args.exactly("shuffle")?;
    match &list {
        Value::List(items) => {
            items.borrow_mut().shuffle(&mut *rng.borrow_mut());
            Ok(Value::None)
        }
        other => type_error(format!(
            "shuffle() argument must be a mutable sequence, not {}",
            other.type_name()
        )),
    }
}

fn randbytes(rng: &SharedRng, interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [n] = args.exactly("randbytes")?;
    let n = count_arg(&n, "randbytes")?;
    interp.check_len(n)?;
    let mut out = vec![0u8; n];
    rng.borrow_mut().fill_bytes(&mut out);
    Ok(Value::bytes(out))
}

fn getrandbits(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [k] = args.exactly("getrandbits")?;
    match int_arg(&k, "getrandbits")? {
        k if k < 0 => value_error("number of bits must be non-negative"),
        0 => Ok(Value::Int(0)),
        k if k <= 63 => Ok(Value::Int((rng.borrow_mut().next_u64() >> (64 - k)) as i64)),
        _ => overflow_error("getrandbits() is limited to 63 bits"),
    }
}

/// Box-Muller
fn gauss(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [mu, sigma] = args.bind("gauss", ["mu", "sigma"], 0)?;
    let mu = mu.map_or(Ok(0.0), |v| float_arg(&v, "gauss"))?;
    let sigma = sigma.map_or(Ok(1.0), |v| float_arg(&v, "gauss"))?;
    let mut rng = rng.borrow_mut();
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    Ok(Value::Float(mu + sigma * z))
}

fn seed(rng: &SharedRng, _interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [a] = args.bind("seed", ["a"], 0)?;
    let generator = match a {
        None | Some(Value::None) => SmallRng::from_entropy(),
        Some(Value::Int(n)) => SmallRng::seed_from_u64(n as u64),
        Some(value) => {
            let key = value.hash_key()?;
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            SmallRng::seed_from_u64(hasher.finish())
        }
    };
    *rng.borrow_mut() = generator;
    Ok(Value::None)
}

impl NativeModule for RandomModule {
    fn name(&self) -> &'static str {
        "random"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let rng = &self.rng;
        vec![
            with_rng(rng, "random", random),
            with_rng(rng, "uniform", uniform),
            with_rng(rng, "randint", randint),
            with_rng(rng, "randrange", randrange_fn),
            with_rng(rng, "choice", choice),
            with_rng(rng, "choices", choices),
            with_rng(rng, "sample", sample),
            with_rng(rng, "shuffle", shuffle),
            with_rng(rng, "randbytes", randbytes),
            with_rng(rng, "getrandbits", getrandbits),
            with_rng(rng, "gauss", gauss),
            with_rng(rng, "seed", seed),
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
    fn test_seed_makes_sequences_repeatable() {
        let source = "\
import random
random.seed(7)
a = [random.randint(1, 100) for _ in range(5)]
random.seed(7)
b = [random.randint(1, 100) for _ in range(5)]
print(a == b, all(1 <= x <= 100 for x in a))
";
        assert_eq!(run(source), "True True\n");
    }

    #[test]
    fn test_collection_helpers() {
        let source = "\
import random
xs = list(range(10))
random.shuffle(xs)
s = random.sample(xs, 3)
print(sorted(xs) == list(range(10)), len(s), len(set(s)), all(x in xs for x in s))
print(len(random.choices('ab', k=4)), len(random.randbytes(5)), random.choice([42]))
print(random.choices(['x', 'y'], weights=[0, 1], k=3), 0 <= random.random() < 1)
print(random.randrange(5, 6), random.getrandbits(0))
";
        assert_eq!(
            run(source),
            "True 3 3 True\n4 5 42\n['y', 'y', 'y'] True\n5 0\n"
        );
    }
}
