//! Typed-argument payloads: a name plus an ordered list of scalar arguments.
//!
//! ```text
//! [u32 nameLen][name][u16 argCount][argCount × Arg]
//! Arg = [u8 tag][value]
//!   tag 0  Int    4 bytes LE i32
//!   tag 1  Str    [u32 len][len bytes utf-8]
//!   tag 2  Bool   1 byte, nonzero = true
//! ```
//!
//! Arguments are positional. Bytes after the last argument are ignored.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ArgError;

const TAG_INT: u8 = 0;
const TAG_STR: u8 = 1;
const TAG_BOOL: u8 = 2;

/// One scalar argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i32),
    Str(String),
    Bool(bool),
}

impl Arg {
    fn tag(&self) -> u8 {
        match self {
            Arg::Int(_) => TAG_INT,
            Arg::Str(_) => TAG_STR,
            Arg::Bool(_) => TAG_BOOL,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

/// A named call with positional arguments.
///
/// The same shape carries renderer API requests, host responses, event
/// dispatches and keybind invocations; the enclosing envelope kind tells
/// them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgCall {
    pub name: String,
    pub args: Vec<Arg>,
}

impl ArgCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument (builder style).
    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn int_at(&self, index: usize) -> Option<i32> {
        self.args.get(index).and_then(Arg::as_int)
    }

    pub fn str_at(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Arg::as_str)
    }

    pub fn bool_at(&self, index: usize) -> Option<bool> {
        self.args.get(index).and_then(Arg::as_bool)
    }

    /// Serialize into a payload.
    pub fn encode(&self) -> Result<Bytes, ArgError> {
        let count =
            u16::try_from(self.args.len()).map_err(|_| ArgError::TooManyArgs(self.args.len()))?;

        let mut buf = BytesMut::with_capacity(4 + self.name.len() + 2 + self.args.len() * 8);
        put_str(&mut buf, "name", &self.name)?;
        buf.put_u16_le(count);

        for arg in &self.args {
            buf.put_u8(arg.tag());
            match arg {
                Arg::Int(v) => buf.put_i32_le(*v),
                Arg::Str(v) => put_str(&mut buf, "string argument", v)?,
                Arg::Bool(v) => buf.put_u8(u8::from(*v)),
            }
        }

        Ok(buf.freeze())
    }

    /// Parse a payload. Truncation and unknown tags are errors, never guesses.
    pub fn decode(payload: &[u8]) -> Result<Self, ArgError> {
        let mut cursor = Cursor { rest: payload };

        let name = cursor.string("name")?;
        let count = u16::from_le_bytes(cursor.array::<2>("argument count")?);

        let mut args = Vec::with_capacity(usize::from(count).min(cursor.rest.len()));
        for index in 0..usize::from(count) {
            let [tag] = cursor.array::<1>("argument tag")?;
            let arg = match tag {
                TAG_INT => Arg::Int(i32::from_le_bytes(cursor.array::<4>("int argument")?)),
                TAG_STR => Arg::Str(cursor.string("string argument")?),
                TAG_BOOL => Arg::Bool(cursor.array::<1>("bool argument")?[0] != 0),
                tag => return Err(ArgError::UnknownTag { tag, index }),
            };
            args.push(arg);
        }

        Ok(Self { name, args })
    }
}

fn put_str(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), ArgError> {
    let len = u32::try_from(value.len()).map_err(|_| ArgError::TooLong {
        field,
        len: value.len(),
    })?;
    buf.put_u32_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

struct Cursor<'a> {
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], ArgError> {
        if self.rest.len() < needed {
            return Err(ArgError::Truncated {
                field,
                needed,
                remaining: self.rest.len(),
            });
        }
        let (head, tail) = self.rest.split_at(needed);
        self.rest = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], ArgError> {
        let bytes = self.take(field, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn string(&mut self, field: &'static str) -> Result<String, ArgError> {
        let len = u32::from_le_bytes(self.array::<4>(field)?) as usize;
        let bytes = self.take(field, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ArgError::InvalidUtf8 { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn async_response() -> ArgCall {
        ArgCall::new("nexus:async:response")
            .arg(42)
            .arg(true)
            .arg("{\"available\":true}")
    }

    #[test]
    fn encodes_documented_layout() {
        let call = ArgCall::new("ab").arg(-1).arg("x").arg(false);
        let bytes = call.encode().unwrap();

        let expected: Vec<u8> = [
            &[2, 0, 0, 0][..],
            b"ab",
            &[3, 0],
            &[0, 0xFF, 0xFF, 0xFF, 0xFF],
            &[1, 1, 0, 0, 0, b'x'],
            &[2, 0],
        ]
        .concat();
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn decodes_what_it_encodes() {
        let call = async_response();
        let decoded = ArgCall::decode(&call.encode().unwrap()).unwrap();
        assert_eq!(decoded, call);
        assert_eq!(decoded.int_at(0), Some(42));
        assert_eq!(decoded.bool_at(1), Some(true));
        assert_eq!(decoded.str_at(2), Some("{\"available\":true}"));
        assert_eq!(decoded.str_at(0), None);
        assert_eq!(decoded.int_at(7), None);
    }

    #[test]
    fn nonzero_bool_byte_is_true() {
        let mut bytes = ArgCall::new("b").arg(false).encode().unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] = 7;
        assert_eq!(ArgCall::decode(&bytes).unwrap().bool_at(0), Some(true));
    }

    #[test]
    fn every_truncation_is_rejected() {
        let bytes = async_response().encode().unwrap();
        for cut in 0..bytes.len() {
            let err = ArgCall::decode(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, ArgError::Truncated { .. }),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = ArgCall::new("t").arg(1).encode().unwrap().to_vec();
        // name len (4) + name (1) + count (2) puts the first tag at offset 7
        bytes[7] = 9;
        assert_eq!(
            ArgCall::decode(&bytes).unwrap_err(),
            ArgError::UnknownTag { tag: 9, index: 0 }
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let bytes = [1, 0, 0, 0, 0xFF, 0, 0];
        assert_eq!(
            ArgCall::decode(&bytes).unwrap_err(),
            ArgError::InvalidUtf8 { field: "name" }
        );
    }

    #[test]
    fn huge_declared_count_does_not_preallocate() {
        // count 65535 with no argument bytes behind it
        let bytes = [0, 0, 0, 0, 0xFF, 0xFF];
        assert!(matches!(
            ArgCall::decode(&bytes),
            Err(ArgError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = ArgCall::new("t").arg(5).encode().unwrap().to_vec();
        bytes.extend_from_slice(&[0xEE, 0xEE]);
        assert_eq!(ArgCall::decode(&bytes).unwrap().int_at(0), Some(5));
    }

    #[test]
    fn too_many_args_fails_to_encode() {
        let mut call = ArgCall::new("many");
        call.args = vec![Arg::Bool(true); usize::from(u16::MAX) + 1];
        assert_eq!(
            call.encode().unwrap_err(),
            ArgError::TooManyArgs(usize::from(u16::MAX) + 1)
        );
    }

    fn arg_strategy() -> impl Strategy<Value = Arg> {
        prop_oneof![
            any::<i32>().prop_map(Arg::Int),
            ".{0,24}".prop_map(Arg::Str),
            any::<bool>().prop_map(Arg::Bool),
        ]
    }

    proptest! {
        #[test]
        fn round_trips_any_call(name in ".{0,32}", args in prop::collection::vec(arg_strategy(), 0..12)) {
            let call = ArgCall { name, args };
            let decoded = ArgCall::decode(&call.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, call);
        }

        #[test]
        fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = ArgCall::decode(&bytes);
        }
    }
}
