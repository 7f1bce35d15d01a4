use super::{float_arg, int_arg, str_arg};
use crate::runtime::error::*;
use crate::runtime::interp::Interpreter;
use crate::runtime::value::{Args, NativeModule, NativeObject, Value};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use nix::time::{clock_gettime, ClockId};
use std::any::Any;
use std::fmt::Write as _;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const FIELDS: [&str; 9] = [
    "tm_year", "tm_mon", "tm_mday", "tm_hour", "tm_min", "tm_sec", "tm_wday", "tm_yday", "tm_isdst",
];

/// `time.struct_time`
#[derive(Debug, Clone, Copy)]
pub struct StructTime {
    fields: [i64; 9],
}

impl StructTime {
    fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self {
            fields: [
                dt.year() as i64,
                dt.month() as i64,
                dt.day() as i64,
                dt.hour() as i64,
                dt.minute() as i64,
                dt.second() as i64,
                dt.weekday().num_days_from_monday() as i64,
                dt.ordinal() as i64,
                0,
            ],
        }
    }

    fn from_value(interp: &mut Interpreter, value: &Value) -> RResult<Self> {
        if let Value::Object(object) = value {
            if let Some(st) = object.as_any().downcast_ref::<StructTime>() {
                return Ok(*st);
            }
        }
        let items = interp.collect(value)?;
        if items.len() != 9 {
            return type_error("time tuple must have exactly 9 elements");
        }
        let mut fields = [0i64; 9];
        for (field, item) in fields.iter_mut().zip(&items) {
            *field = int_arg(item, "strftime")?;
        }
        Ok(Self { fields })
    }

    fn to_naive(self) -> RResult<NaiveDateTime> {
        let [year, month, day, hour, minute, second, ..] = self.fields;
        NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second.min(59) as u32))
            .ok_or_else(|| Exception::new(ExcKind::ValueError, "time tuple out of range"))
    }
}

impl NativeObject for StructTime {
    fn type_name(&self) -> &'static str {
        "struct_time"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, _interp: &mut Interpreter, name: &str) -> RResult<Option<Value>> {
        Ok(FIELDS
            .iter()
            .position(|field| *field == name)
            .map(|index| Value::Int(self.fields[index])))
    }

    fn has_method(&self, name: &str) -> bool {
        name == "__getitem__"
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> RResult<Value> {
        let [index] = args.exactly(name)?;
        let tuple = Value::tuple(self.fields.iter().map(|f| Value::Int(*f)).collect());
        interp.get_item(&tuple, &index)
    }

    fn len(&self) -> Option<usize> {
        Some(9)
    }

    fn iter_values(&self, _interp: &mut Interpreter) -> RResult<Option<Vec<Value>>> {
        Ok(Some(self.fields.iter().map(|f| Value::Int(*f)).collect()))
    }

    fn repr(&self, _interp: &mut Interpreter) -> RResult<String> {
        let parts: Vec<String> = FIELDS
            .iter()
            .zip(self.fields)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        Ok(format!("time.struct_time({})", parts.join(", ")))
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

fn timestamp_arg(args: Args, func: &str) -> RResult<DateTime<Utc>> {
    let [secs] = args.bind(func, ["secs"], 0)?;
    let secs = match secs {
        None | Some(Value::None) => seconds(SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()),
        Some(value) => float_arg(&value, func)?,
    };
    if !secs.is_finite() {
        return overflow_error("timestamp out of range for platform time_t");
    }
    let whole = secs.floor();
    DateTime::from_timestamp(whole as i64, ((secs - whole) * 1e9) as u32)
        .ok_or_else(|| Exception::new(ExcKind::OverflowError, "timestamp out of range for platform time_t"))
}

fn strftime(interp: &mut Interpreter, args: Args) -> RResult<Value> {
    let [format, t] = args.bind("strftime", ["format", "t"], 1)?;
    let format = str_arg(&format.unwrap_or(Value::None), "strftime")?;
    let naive = match t {
        Some(t) => StructTime::from_value(interp, &t)?.to_naive()?,
        None => Local::now().naive_local(),
    };
    let items: Vec<Item> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return value_error("Invalid format string");
    }
    let mut out = String::new();
    if write!(out, "{}", naive.format_with_items(items.into_iter())).is_err() {
        return value_error("Invalid format string");
    }
    interp.check_len(out.len())?;
    Ok(Value::str(out))
}

/// Host `time` module; `sleep` really blocks
pub struct TimeModule {
    origin: Instant,
}

impl TimeModule {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TimeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeModule for TimeModule {
    fn name(&self) -> &'static str {
        "time"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let origin = self.origin;
        let elapsed = move |_: &mut Interpreter, args: Args| -> RResult<Value> {
            args.exactly::<0>("monotonic")?;
            Ok(Value::Float(seconds(origin.elapsed())))
        };
        vec![
            (
                "time",
                Value::native("time", |_, args| {
                    args.exactly::<0>("time")?;
                    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
                    Ok(Value::Float(seconds(now)))
                }),
            ),
            ("monotonic", Value::native("monotonic", elapsed)),
            ("perf_counter", Value::native("perf_counter", elapsed)),
            (
                "process_time",
                Value::native("process_time", |_, args| {
                    args.exactly::<0>("process_time")?;
                    match clock_gettime(ClockId::CLOCK_PROCESS_CPUTIME_ID) {
                        Ok(spec) => Ok(Value::Float(
                            spec.tv_sec() as f64 + spec.tv_nsec() as f64 / 1e9,
                        )),
                        Err(err) => runtime_error(format!("process_time(): {}", err)),
                    }
                }),
            ),
            (
                "sleep",
                Value::native("sleep", |_, args| {
                    let [secs] = args.exactly("sleep")?;
                    let secs = float_arg(&secs, "sleep")?;
                    if !secs.is_finite() || secs < 0.0 {
                        return value_error("sleep length must be non-negative");
                    }
                    std::thread::sleep(Duration::from_secs_f64(secs));
                    Ok(Value::None)
                }),
            ),
            (
                "gmtime",
                Value::native("gmtime", |_, args| {
                    let dt = timestamp_arg(args, "gmtime")?;
                    Ok(Value::object(StructTime::from_datetime(&dt)))
                }),
            ),
            (
                "localtime",
                Value::native("localtime", |_, args| {
                    let dt = timestamp_arg(args, "localtime")?;
                    Ok(Value::object(StructTime::from_datetime(&dt.with_timezone(&Local))))
                }),
            ),
            ("strftime", Value::native("strftime", strftime)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::interp::{Interpreter, RuntimeLimits};
    use crate::runtime::SharedBuffer;

    #[test]
    fn test_gmtime_and_strftime() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        let source = "\
import time
t = time.gmtime(86400 * 366)
print(t.tm_year, t.tm_mon, t.tm_mday, t[6], len(t))
print(time.strftime('%Y-%m-%d %H:%M', t))
print(time.monotonic() <= time.monotonic(), time.time() > 1.6e9)
";
        interp.run(source).unwrap();
        assert_eq!(buffer.contents(), "1971 1 2 5 9\n1971-01-02 00:00\nTrue True\n");
    }
}
