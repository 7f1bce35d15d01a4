//! Exceptions raised inside the interpreter.
//!
//! Native code raises lightweight `Payload::Native` exceptions without
//! touching the interpreter; they are turned into real exception instances
//! only when user code binds them (`except E as e`).

use crate::runtime::value::{Instance, Value};
use std::fmt;
use std::rc::Rc;

/// File name reported for frames of the submitted source
pub const SNIPPET_FILE: &str = "<snippet>";
/// File name reported for frames of native machinery
pub const SANDBOX_FILE: &str = "<sandbox>";
/// File name of code compiled at run time by `eval`/`exec`
pub const STRING_FILE: &str = "<string>";

macro_rules! exc_kinds {
    ($($kind:ident => $parent:expr),* $(,)?) => {
        /// Built-in exception classes
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ExcKind {
            $($kind),*
        }

        impl ExcKind {
            pub const ALL: &'static [ExcKind] = &[$(ExcKind::$kind),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(ExcKind::$kind => stringify!($kind)),*
                }
            }

            pub fn parent(self) -> Option<ExcKind> {
                match self {
                    $(ExcKind::$kind => $parent),*
                }
            }
        }
    };
}

exc_kinds! {
    BaseException => None,
    Exception => Some(ExcKind::BaseException),
    SystemExit => Some(ExcKind::BaseException),
    SecurityError => Some(ExcKind::BaseException),
    ArithmeticError => Some(ExcKind::Exception),
    ZeroDivisionError => Some(ExcKind::ArithmeticError),
    OverflowError => Some(ExcKind::ArithmeticError),
    LookupError => Some(ExcKind::Exception),
    IndexError => Some(ExcKind::LookupError),
    KeyError => Some(ExcKind::LookupError),
    ValueError => Some(ExcKind::Exception),
    TypeError => Some(ExcKind::Exception),
    NameError => Some(ExcKind::Exception),
    AttributeError => Some(ExcKind::Exception),
    RuntimeError => Some(ExcKind::Exception),
    RecursionError => Some(ExcKind::RuntimeError),
    NotImplementedError => Some(ExcKind::RuntimeError),
    ImportError => Some(ExcKind::Exception),
    ModuleNotFoundError => Some(ExcKind::ImportError),
    AssertionError => Some(ExcKind::Exception),
    StopIteration => Some(ExcKind::Exception),
    MemoryError => Some(ExcKind::Exception),
    SyntaxError => Some(ExcKind::Exception),
}

impl ExcKind {
    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Exception classes installed in the host builtin table
    pub fn builtin_names() -> impl Iterator<Item = &'static str> {
        ExcKind::ALL
            .iter()
            .filter(|kind| **kind != ExcKind::SyntaxError)
            .map(|kind| kind.name())
    }
}

/// One traceback entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub name: Rc<str>,
    pub file: &'static str,
    pub line: u32,
}

#[derive(Clone, Debug)]
pub enum Payload {
    /// Raised by native code; materialized on demand
    Native { kind: ExcKind, message: String },
    /// An exception instance (user class or materialized builtin)
    Instance(Rc<Instance>),
}

#[derive(Clone, Debug)]
pub struct Exception {
    pub payload: Payload,
    /// Outermost frame first; empty until the interpreter annotates it
    pub traceback: Vec<Frame>,
    pub cause: Option<Box<Exception>>,
}

pub type RResult<T> = Result<T, Box<Exception>>;

impl Exception {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            payload: Payload::Native {
                kind,
                message: message.into(),
            },
            traceback: Vec::new(),
            cause: None,
        })
    }

    pub fn from_instance(instance: Rc<Instance>) -> Box<Self> {
        Box::new(Self {
            payload: Payload::Instance(instance),
            traceback: Vec::new(),
            cause: None,
        })
    }

    /// Class name used as the outcome's error kind
    pub fn class_name(&self) -> String {
        match &self.payload {
            Payload::Native { kind, .. } => kind.name().to_string(),
            Payload::Instance(instance) => instance.class.name.clone(),
        }
    }

    /// Builtin kind of the payload or of the nearest builtin ancestor class
    pub fn builtin_kind(&self) -> Option<ExcKind> {
        match &self.payload {
            Payload::Native { kind, .. } => Some(*kind),
            Payload::Instance(instance) => instance.class.builtin_exception(),
        }
    }

    pub fn is(&self, kind: ExcKind) -> bool {
        self.builtin_kind().is_some_and(|k| k.is_subclass_of(kind))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Native { kind, message } if message.is_empty() => f.write_str(kind.name()),
            Payload::Native { kind, message } => write!(f, "{}: {}", kind.name(), message),
            Payload::Instance(instance) => f.write_str(&instance.class.name),
        }
    }
}

macro_rules! raise_fns {
    ($($fn_name:ident => $kind:ident),* $(,)?) => {
        $(
            pub fn $fn_name<T>(message: impl Into<String>) -> RResult<T> {
                Err(Exception::new(ExcKind::$kind, message))
            }
        )*
    };
}

raise_fns! {
    type_error => TypeError,
    value_error => ValueError,
    index_error => IndexError,
    key_error => KeyError,
    name_error => NameError,
    attribute_error => AttributeError,
    zero_division => ZeroDivisionError,
    overflow_error => OverflowError,
    runtime_error => RuntimeError,
    recursion_error => RecursionError,
    memory_error => MemoryError,
    security_error => SecurityError,
    import_error => ImportError,
    module_not_found => ModuleNotFoundError,
    stop_iteration => StopIteration,
    not_implemented => NotImplementedError,
}

/// Render a traceback keeping only frames attributable to submitted code
pub fn render_traceback(frames: &[Frame], summary: &str) -> String {
    let mut out = String::from("Traceback (most recent call last):\n");
    for frame in sanitize(frames) {
        out.push_str(&format!(
            "  File \"{}\", line {}, in {}\n",
            frame.file, frame.line, frame.name
        ));
    }
    out.push_str(summary);
    out.push('\n');
    out
}

/// Drop frames that belong to native sandbox machinery
pub fn sanitize(frames: &[Frame]) -> impl Iterator<Item = &Frame> {
    frames.iter().filter(|frame| frame.file != SANDBOX_FILE)
}

/// Convenience for building `Value::None` results in native functions
pub fn none() -> RResult<Value> {
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::ArithmeticError));
        assert!(ExcKind::KeyError.is_subclass_of(ExcKind::Exception));
        assert!(ExcKind::ModuleNotFoundError.is_subclass_of(ExcKind::ImportError));
        assert!(!ExcKind::SecurityError.is_subclass_of(ExcKind::Exception));
        assert!(ExcKind::SecurityError.is_subclass_of(ExcKind::BaseException));
    }

    #[test]
    fn test_traceback_drops_sandbox_frames() {
        let frames = vec![
            Frame {
                name: Rc::from("<module>"),
                file: SNIPPET_FILE,
                line: 3,
            },
            Frame {
                name: Rc::from("sorted"),
                file: SANDBOX_FILE,
                line: 0,
            },
            Frame {
                name: Rc::from("key"),
                file: SNIPPET_FILE,
                line: 1,
            },
        ];
        let text = render_traceback(&frames, "ZeroDivisionError: division by zero");
        assert!(text.contains("line 3, in <module>"));
        assert!(text.contains("line 1, in key"));
        assert!(!text.contains("<sandbox>"));
        assert!(text.ends_with("ZeroDivisionError: division by zero\n"));
    }

    #[test]
    fn test_syntax_error_is_not_a_builtin_name() {
        assert!(ExcKind::builtin_names().all(|name| name != "SyntaxError"));
        assert!(ExcKind::builtin_names().any(|name| name == "SecurityError"));
    }
}
