//! Attribute kinds and value validation.

use crate::err::ValidationError;
use std::convert::TryFrom;
use crate::meta::genres;
use crate::meta::picture::Picture;
use crate::string;

/// The kind of an attribute, driving how raw values coerce.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Kind {
    /// A non-empty string, whitespace-trimmed and NUL-scrubbed.
    Text,
    /// An integer in `1..=65535`. Zero unsets the attribute.
    Uint16,
    /// An integer in `1..=u32::MAX`. Zero unsets the attribute.
    Uint32,
    /// An "a of b" pair, as used by track and disk numbers.
    Uint16X2,
    Bool,
    /// Text that also accepts an index into the genre table.
    Genre,
    /// A relative volume percentage in `-99.9..=100.0`.
    Volume,
    Image,
    /// A `(language, key)` keyed text mapping. Managed, never assigned
    /// directly.
    Dict,
    /// A key-keyed image mapping. Managed, never assigned directly.
    IDict,
}

/// A raw or validated attribute value.
///
/// Decoders and callers hand these to [`Metadata::set`](crate::Metadata::set),
/// which coerces them through [`validate`](validate) into the canonical shape
/// for the field's kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    /// Undecoded text, interpreted as ASCII with non-ASCII bytes dropped.
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Pair(u16, u16),
    Image(Picture),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(u16, u16)> {
        match self {
            Self::Pair(a, b) => Some((*a, *b)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_volume(&self) -> Option<f64> {
        match self {
            Self::Float(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Picture> {
        match self {
            Self::Image(val) => Some(val),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(other: &str) -> Self {
        Self::Text(other.to_string())
    }
}

impl From<String> for Value {
    fn from(other: String) -> Self {
        Self::Text(other)
    }
}

impl From<i64> for Value {
    fn from(other: i64) -> Self {
        Self::Int(other)
    }
}

impl From<u32> for Value {
    fn from(other: u32) -> Self {
        Self::Int(i64::from(other))
    }
}

impl From<f64> for Value {
    fn from(other: f64) -> Self {
        Self::Float(other)
    }
}

impl From<bool> for Value {
    fn from(other: bool) -> Self {
        Self::Bool(other)
    }
}

impl From<(u16, u16)> for Value {
    fn from(other: (u16, u16)) -> Self {
        Self::Pair(other.0, other.1)
    }
}

impl From<Picture> for Value {
    fn from(other: Picture) -> Self {
        Self::Image(other)
    }
}

const TRUE_WORDS: &[&str] = &["y", "yes", "true", "t", "1", "on"];
const FALSE_WORDS: &[&str] = &["n", "no", "false", "f", "0", "off"];

/// Coerces `value` into the canonical shape for `kind`.
///
/// `Ok(None)` means the value unsets the attribute: empty text, zero
/// integers, a `(0, 0)` pair. Validation is idempotent, so an already
/// validated value passes through unchanged.
pub(crate) fn validate(
    field: &str,
    value: Value,
    kind: Kind,
) -> Result<Option<Value>, ValidationError> {
    match kind {
        Kind::Text => Ok(text(field, value)?.map(Value::Text)),

        Kind::Genre => match value {
            Value::Int(index) => match usize::try_from(index)
                .ok()
                .filter(|&index| index <= 0xFF)
                .and_then(genres::name)
            {
                Some(name) => Ok(Some(Value::Text(name.to_string()))),
                None => Err(ValidationError::new(
                    field,
                    format!("no genre at index {}", index),
                )),
            },
            other => Ok(text(field, other)?.map(Value::Text)),
        },

        Kind::Uint16 => Ok(uint(field, value, 0xFFFF)?.map(Value::Int)),
        Kind::Uint32 => Ok(uint(field, value, 0xFFFF_FFFF)?.map(Value::Int)),

        Kind::Uint16X2 => {
            let (a, b) = match value {
                Value::Pair(a, b) => (a, b),
                Value::Int(n) => (clamped(field, n)?, 0),
                Value::Float(n) => (clamped(field, n as i64)?, 0),
                other => match text(field, other)? {
                    None => return Ok(None),
                    Some(text) => {
                        let mut halves = text.split('/');
                        let a = pair_half(halves.next());
                        let b = pair_half(halves.next());

                        if halves.next().is_some() {
                            return Err(ValidationError::new(field, "must have 1 or 2 items"));
                        }

                        (a, b)
                    }
                },
            };

            if (a, b) == (0, 0) {
                Ok(None)
            } else {
                Ok(Some(Value::Pair(a, b)))
            }
        }

        Kind::Bool => match value {
            Value::Bool(val) => Ok(Some(Value::Bool(val))),
            Value::Int(val) => Ok(Some(Value::Bool(val != 0))),
            other => {
                // The raw one-byte forms come first, since NUL scrubbing
                // would otherwise eat them.
                if let Some(raw) = other.as_text() {
                    match raw {
                        "\x01" => return Ok(Some(Value::Bool(true))),
                        "\x00" => return Ok(Some(Value::Bool(false))),
                        _ => {}
                    }
                }

                let text = match text(field, other)? {
                    Some(text) => text.to_lowercase(),
                    None => return Ok(None),
                };

                if TRUE_WORDS.contains(&text.as_str()) {
                    Ok(Some(Value::Bool(true)))
                } else if FALSE_WORDS.contains(&text.as_str()) {
                    Ok(Some(Value::Bool(false)))
                } else {
                    Err(ValidationError::new(field, "not a boolean"))
                }
            }
        },

        Kind::Volume => {
            let val = match value {
                Value::Float(val) => val,
                Value::Int(val) => val as f64,
                other => match text(field, other)? {
                    None => return Ok(None),
                    Some(text) => text
                        .parse::<f64>()
                        .map_err(|_| ValidationError::new(field, "not a number"))?,
                },
            };

            // Zero is a real adjustment, not an unset.
            Ok(Some(Value::Float(val.clamp(-99.9, 100.0))))
        }

        Kind::Image => match value {
            Value::Image(picture) => Ok(Some(Value::Image(picture))),
            Value::Bytes(data) => Picture::from_bytes(data)
                .map(|picture| Some(Value::Image(picture)))
                .map_err(|err| ValidationError::new(field, err.to_string())),
            Value::Text(path) => {
                let data = std::fs::read(&path)
                    .map_err(|err| ValidationError::new(field, err.to_string()))?;
                Picture::from_bytes(data)
                    .map(|picture| Some(Value::Image(picture)))
                    .map_err(|err| ValidationError::new(field, err.to_string()))
            }
            _ => Err(ValidationError::new(field, "not an image")),
        },

        Kind::Dict | Kind::IDict => Err(ValidationError::new(field, "not a scalar attribute")),
    }
}

/// Coerces `value` into scrubbed text, or `None` when nothing is left.
fn text(field: &str, value: Value) -> Result<Option<String>, ValidationError> {
    let raw = match value {
        Value::Text(val) => val,
        Value::Bytes(val) => string::decode_ascii(&val),
        Value::Int(val) => val.to_string(),
        Value::Float(val) => val.to_string(),
        Value::Bool(val) => val.to_string(),
        Value::Pair(a, b) => format!("{}/{}", a, b),
        Value::Image(_) => return Err(ValidationError::new(field, "not text")),
    };

    let scrubbed = raw.replace('\x00', "");
    let scrubbed = scrubbed.trim();

    if scrubbed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(scrubbed.to_string()))
    }
}

fn uint(field: &str, value: Value, max: i64) -> Result<Option<i64>, ValidationError> {
    let val = match value {
        Value::Int(val) => val,
        Value::Float(val) => val as i64,
        other => match text(field, other)? {
            None => return Ok(None),
            Some(text) => text
                .parse::<i64>()
                .map_err(|_| ValidationError::new(field, "not an integer"))?,
        },
    };

    if val < 0 {
        return Err(ValidationError::new(field, "negative"));
    }

    let val = i64::min(val, max);

    if val == 0 {
        Ok(None)
    } else {
        Ok(Some(val))
    }
}

fn clamped(field: &str, val: i64) -> Result<u16, ValidationError> {
    if val < 0 {
        return Err(ValidationError::new(field, "negative"));
    }

    Ok(u16::try_from(i64::min(val, 0xFFFF)).unwrap_or(u16::MAX))
}

/// One half of an "a/b" pair. Anything that does not parse as a number
/// counts as zero.
fn pair_half(half: Option<&str>) -> u16 {
    match half.map(|half| half.trim().parse::<u64>()) {
        Some(Ok(val)) => u64::min(val, 0xFFFF) as u16,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(value: impl Into<Value>, kind: Kind) -> Option<Value> {
        validate("test", value.into(), kind).unwrap()
    }

    fn check_err(value: impl Into<Value>, kind: Kind) {
        assert!(validate("test", value.into(), kind).is_err());
    }

    #[test]
    fn text_scrubs() {
        assert_eq!(
            check("  My\x00 Song \x00 ", Kind::Text),
            Some(Value::Text("My Song".to_string()))
        );
        assert_eq!(check("", Kind::Text), None);
        assert_eq!(check(" \x00 ", Kind::Text), None);
    }

    #[test]
    fn text_from_bytes() {
        assert_eq!(
            check(Value::Bytes(b"My S\xF3ng".to_vec()), Kind::Text),
            Some(Value::Text("My Sng".to_string()))
        );
    }

    #[test]
    fn uint16_coerces() {
        assert_eq!(check(12i64, Kind::Uint16), Some(Value::Int(12)));
        assert_eq!(check("12", Kind::Uint16), Some(Value::Int(12)));
        assert_eq!(check(12.7f64, Kind::Uint16), Some(Value::Int(12)));
        assert_eq!(check(0x1_0000i64, Kind::Uint16), Some(Value::Int(0xFFFF)));
        assert_eq!(check(0i64, Kind::Uint16), None);
        check_err(-1i64, Kind::Uint16);
        check_err("twelve", Kind::Uint16);
    }

    #[test]
    fn uint32_range() {
        assert_eq!(
            check(0x1_0000_0000i64, Kind::Uint32),
            Some(Value::Int(0xFFFF_FFFF))
        );
        assert_eq!(check(0i64, Kind::Uint32), None);
    }

    #[test]
    fn pair_coerces() {
        assert_eq!(check("3/10", Kind::Uint16X2), Some(Value::Pair(3, 10)));
        assert_eq!(check(5i64, Kind::Uint16X2), Some(Value::Pair(5, 0)));
        assert_eq!(check("0/0", Kind::Uint16X2), None);
        assert_eq!(check("/4", Kind::Uint16X2), Some(Value::Pair(0, 4)));
        assert_eq!(check("7", Kind::Uint16X2), Some(Value::Pair(7, 0)));
        check_err("1/2/3", Kind::Uint16X2);
    }

    #[test]
    fn bool_words() {
        for word in &["yes", "Y", "TRUE", "t", "1", "on", "\x01"] {
            assert_eq!(check(*word, Kind::Bool), Some(Value::Bool(true)));
        }

        for word in &["no", "N", "FALSE", "f", "0", "off", "\x00"] {
            assert_eq!(check(*word, Kind::Bool), Some(Value::Bool(false)));
        }

        assert_eq!(check(2i64, Kind::Bool), Some(Value::Bool(true)));
        check_err("maybe", Kind::Bool);
    }

    #[test]
    fn genre_indices() {
        assert_eq!(
            check(20i64, Kind::Genre),
            Some(Value::Text("Alternative".to_string()))
        );
        assert_eq!(check("Ska", Kind::Genre), Some(Value::Text("Ska".to_string())));
        check_err(999i64, Kind::Genre);
        check_err(148i64, Kind::Genre);
        check_err(-1i64, Kind::Genre);
    }

    #[test]
    fn volume_clamps() {
        assert_eq!(check(12.5f64, Kind::Volume), Some(Value::Float(12.5)));
        assert_eq!(check(-200.0f64, Kind::Volume), Some(Value::Float(-99.9)));
        assert_eq!(check(200.0f64, Kind::Volume), Some(Value::Float(100.0)));
        assert_eq!(check(0.0f64, Kind::Volume), Some(Value::Float(0.0)));
        assert_eq!(check("1.5", Kind::Volume), Some(Value::Float(1.5)));
    }

    #[test]
    fn idempotent() {
        let cases: Vec<(Value, Kind)> = vec![
            (Value::Text(" padded ".to_string()), Kind::Text),
            (Value::Int(70000), Kind::Uint16),
            (Value::Text("3/10".to_string()), Kind::Uint16X2),
            (Value::Text("yes".to_string()), Kind::Bool),
            (Value::Int(21), Kind::Genre),
            (Value::Float(150.0), Kind::Volume),
        ];

        for (value, kind) in cases {
            let once = validate("test", value, kind).unwrap().unwrap();
            let twice = validate("test", once.clone(), kind).unwrap().unwrap();
            assert_eq!(once, twice);
        }
    }
}
