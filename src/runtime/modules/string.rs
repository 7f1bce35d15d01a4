use crate::runtime::value::{NativeModule, Value};

pub const ASCII_LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
pub const ASCII_UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const DIGITS: &str = "0123456789";
pub const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

pub struct StringModule;

impl NativeModule for StringModule {
    fn name(&self) -> &'static str {
        "string"
    }

    fn members(&self) -> Vec<(&'static str, Value)> {
        let letters = format!("{}{}", ASCII_LOWERCASE, ASCII_UPPERCASE);
        let whitespace = " \t\n\r\x0b\x0c";
        vec![
            ("ascii_lowercase", Value::str(ASCII_LOWERCASE)),
            ("ascii_uppercase", Value::str(ASCII_UPPERCASE)),
            ("ascii_letters", Value::str(&letters)),
            ("digits", Value::str(DIGITS)),
            ("hexdigits", Value::str("0123456789abcdefABCDEF")),
            ("octdigits", Value::str("01234567")),
            ("punctuation", Value::str(PUNCTUATION)),
            ("whitespace", Value::str(whitespace)),
            (
                "printable",
                Value::str(format!("{}{}{}{}", DIGITS, letters, PUNCTUATION, whitespace)),
            ),
            (
                "capwords",
                Value::native("capwords", |interp, args| {
                    let [text, sep] = args.bind("capwords", ["s", "sep"], 1)?;
                    let text = interp.to_str(&text.unwrap_or(Value::None))?;
                    let sep = match sep {
                        None | Some(Value::None) => None,
                        Some(sep) => Some(interp.to_str(&sep)?),
                    };
                    let capitalize = |word: &str| {
                        let mut chars = word.chars();
                        match chars.next() {
                            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                            None => String::new(),
                        }
                    };
                    let words: Vec<String> = match &sep {
                        Some(sep) => text.split(sep.as_str()).map(capitalize).collect(),
                        None => text.split_whitespace().map(capitalize).collect(),
                    };
                    Ok(Value::str(words.join(sep.as_deref().unwrap_or(" "))))
                }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::interp::{Interpreter, RuntimeLimits};
    use crate::runtime::SharedBuffer;

    #[test]
    fn test_constants_and_capwords() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::new(RuntimeLimits::default(), Box::new(buffer.clone()));
        let source = "\
import string
print(len(string.ascii_letters), string.hexdigits[-1], string.capwords('hello   wORLD'))
print(len(string.printable), '!' in string.punctuation)
";
        interp.run(source).unwrap();
        assert_eq!(buffer.contents(), "52 F Hello World\n100 True\n");
    }
}
