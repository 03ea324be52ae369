//! Message Codec (C3, §4.3): a self-describing object tree and the three
//! message shapes built on top of it.

use std::fmt;

/// A synthetic msgid substituted when a message fails classification (§4.3).
pub const MESSAGE_RESPONSE_UNKNOWN: u32 = u32::MAX;

const TAG_NIL: u8 = 0x00;
const TAG_UINT: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_STR: u8 = 0x03;
const TAG_ARRAY: u8 = 0x04;
const TAG_BOOL: u8 = 0x05;
const TAG_FLOAT: u8 = 0x06;
const TAG_BIN: u8 = 0x07;

/// A self-describing object: `{NIL, UINT, INT, STR, ARRAY, BOOL, FLOAT, BIN}`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Uint(u64),
    Int(i64),
    Str(String),
    Array(Vec<Value>),
    Bool(bool),
    Float(f64),
    Bin(Vec<u8>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Uint(_) => "uint",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Array(_) => "array",
            Self::Bool(_) => "bool",
            Self::Float(_) => "float",
            Self::Bin(_) => "bin",
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Value::Nil => out.push(TAG_NIL),
            Value::Uint(v) => {
                out.push(TAG_UINT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::Str(s) => {
                out.push(TAG_STR);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Array(items) => {
                out.push(TAG_ARRAY);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.serialize(out);
                }
            }
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(if *b { 1 } else { 0 });
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_be_bytes());
            }
            Value::Bin(bytes) => {
                out.push(TAG_BIN);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }
}

/// Errors raised while deserializing a [`Value`] tree or classifying a message.
#[derive(Clone, Debug, PartialEq)]
pub enum CodecError {
    UnexpectedEof,
    UnknownTag(u8),
    InvalidUtf8,
    /// A deserialized message didn't match any of Request/Response/ErrorResponse.
    NotAMessage,
    /// A field had the wrong type or arity for its message kind.
    FieldMismatch { expected: &'static str, got: &'static str },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::UnknownTag(t) => write!(f, "unknown value tag 0x{t:02x}"),
            Self::InvalidUtf8 => write!(f, "string field was not valid UTF-8"),
            Self::NotAMessage => write!(f, "value did not classify as a request or response"),
            Self::FieldMismatch { expected, got } => {
                write!(f, "expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// A cursor over an in-memory buffer of zero or more serialized [`Value`]s.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// Deserialize exactly one [`Value`] at the cursor's current position.
    pub fn read_value(&mut self) -> Result<Value, CodecError> {
        match self.take_u8()? {
            TAG_NIL => Ok(Value::Nil),
            TAG_UINT => Ok(Value::Uint(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))),
            TAG_INT => Ok(Value::Int(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))),
            TAG_STR => {
                let len = self.take_u32()? as usize;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Str(s.to_string()))
            }
            TAG_ARRAY => {
                let len = self.take_u32()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            TAG_BOOL => Ok(Value::Bool(self.take_u8()? != 0)),
            TAG_FLOAT => Ok(Value::Float(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))),
            TAG_BIN => {
                let len = self.take_u32()? as usize;
                Ok(Value::Bin(self.take(len)?.to_vec()))
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

pub fn serialize_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    value.serialize(&mut out);
    out
}

// ─── Message shapes (§4.3) ─────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct RequestMessage {
    pub msgid: u32,
    pub method: String,
    pub params: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseMessage {
    pub msgid: u32,
    pub params: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorResponseMessage {
    pub msgid: u32,
    pub error: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
    ErrorResponse(ErrorResponseMessage),
}

impl RequestMessage {
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Uint(0),
            Value::Uint(self.msgid as u64),
            Value::Str(self.method.clone()),
            Value::Array(self.params.clone()),
        ])
    }
}

impl ResponseMessage {
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Uint(1),
            Value::Uint(self.msgid as u64),
            Value::Nil,
            Value::Array(self.params.clone()),
        ])
    }
}

impl ErrorResponseMessage {
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Uint(1),
            Value::Uint(self.msgid as u64),
            self.error.clone(),
            Value::Nil,
        ])
    }
}

/// Classify a deserialized [`Value`] as a Request, Response, or ErrorResponse
/// using arity and the element-2/element-0 discriminators (§4.3). Any
/// mismatch is a [`CodecError::NotAMessage`] / [`CodecError::FieldMismatch`],
/// which callers surface as a validation error with [`MESSAGE_RESPONSE_UNKNOWN`].
pub fn classify(value: Value) -> Result<Message, CodecError> {
    let mut items = match value {
        Value::Array(items) if items.len() == 4 => items,
        other => {
            return Err(CodecError::FieldMismatch {
                expected: "arity-4 array",
                got: type_name_of(&other),
            })
        }
    };
    // Safe to index/remove in reverse since we checked len == 4 above.
    let params_or_error = items.pop().unwrap();
    let third = items.pop().unwrap();
    let second = items.pop().unwrap();
    let first = items.pop().unwrap();

    let discriminator = match first {
        Value::Uint(0) => 0,
        Value::Uint(1) => 1,
        other => {
            return Err(CodecError::FieldMismatch { expected: "uint 0 or 1", got: type_name_of(&other) })
        }
    };
    let msgid = match second {
        Value::Uint(v) => v as u32,
        other => return Err(CodecError::FieldMismatch { expected: "uint msgid", got: type_name_of(&other) }),
    };

    if discriminator == 0 {
        let method = match third {
            Value::Str(s) => s,
            other => return Err(CodecError::FieldMismatch { expected: "str method", got: type_name_of(&other) }),
        };
        let params = match params_or_error {
            Value::Array(p) => p,
            other => return Err(CodecError::FieldMismatch { expected: "array params", got: type_name_of(&other) }),
        };
        return Ok(Message::Request(RequestMessage { msgid, method, params }));
    }

    match (third, params_or_error) {
        (Value::Nil, Value::Array(params)) => {
            Ok(Message::Response(ResponseMessage { msgid, params }))
        }
        (error @ Value::Array(_), Value::Nil) => {
            Ok(Message::ErrorResponse(ErrorResponseMessage { msgid, error }))
        }
        (third, params_or_error) => Err(CodecError::FieldMismatch {
            expected: "(nil, array) or (array, nil)",
            got: {
                let _ = (&third, &params_or_error);
                "incompatible third/fourth element"
            },
        }),
    }
}

fn type_name_of(v: &Value) -> &'static str {
    v.type_name()
}
