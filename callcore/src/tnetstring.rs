//! Typed netstrings, the framing used on the data channel.
//!
//! Every value is encoded as `<size>:<payload><tag>` where `size` is the
//! decimal byte length of `payload` and `tag` names the type:
//!
//! | tag | type |
//! |-----|------|
//! | `~` | null (empty payload) |
//! | `!` | boolean (`true` / `false`) |
//! | `#` | integer |
//! | `^` | float |
//! | `,` | byte string (text and binary chunks alike) |
//! | `]` | list of encoded values |
//! | `}` | dict of alternating encoded keys and values |
//!
//! Values are self-delimiting, so a stream of them needs no extra framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;
use std::collections::BTreeMap;
use thiserror::Error;

const TAG_NULL: u8 = b'~';
const TAG_BOOL: u8 = b'!';
const TAG_INTEGER: u8 = b'#';
const TAG_FLOAT: u8 = b'^';
const TAG_BYTES: u8 = b',';
const TAG_LIST: u8 = b']';
const TAG_DICT: u8 = b'}';

/// Longest accepted size prefix, in digits.
pub const MAX_SIZE_DIGITS: usize = 10;
/// Deepest accepted nesting of lists and dicts.
pub const MAX_DEPTH: usize = 64;
/// Largest frame a [`FrameDecoder`] buffers unless told otherwise.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input")]
    Truncated,
    #[error("invalid size prefix")]
    InvalidSize,
    #[error("unknown type tag {0:#04x}")]
    UnknownTag(u8),
    #[error("invalid {kind} payload")]
    InvalidPayload { kind: &'static str },
    #[error("dict key is not valid UTF-8")]
    NonUtf8Key,
    #[error("dict has a key without a value")]
    OddDict,
    #[error("nesting deeper than {MAX_DEPTH}")]
    TooDeep,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Bytes(Bytes),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::Bytes(Bytes::from(s.into()))
    }

    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string as text, when it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Dict lookup; `None` for non-dicts and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

pub fn encode(value: &Value) -> Bytes {
    let mut out = BytesMut::new();
    encode_into(value, &mut out);
    out.freeze()
}

pub fn encode_into(value: &Value, out: &mut BytesMut) {
    match value {
        Value::Null => put_item(out, b"", TAG_NULL),
        Value::Bool(true) => put_item(out, b"true", TAG_BOOL),
        Value::Bool(false) => put_item(out, b"false", TAG_BOOL),
        Value::Integer(i) => put_item(out, i.to_string().as_bytes(), TAG_INTEGER),
        Value::Float(f) => put_item(out, format_float(*f).as_bytes(), TAG_FLOAT),
        Value::Bytes(b) => put_item(out, b, TAG_BYTES),
        Value::List(items) => {
            let mut payload = BytesMut::new();
            for item in items {
                encode_into(item, &mut payload);
            }
            put_item(out, &payload, TAG_LIST);
        }
        Value::Dict(entries) => {
            let mut payload = BytesMut::new();
            for (key, item) in entries {
                put_item(&mut payload, key.as_bytes(), TAG_BYTES);
                encode_into(item, &mut payload);
            }
            put_item(out, &payload, TAG_DICT);
        }
    }
}

fn put_item(out: &mut BytesMut, payload: &[u8], tag: u8) {
    out.put_slice(payload.len().to_string().as_bytes());
    out.put_u8(b':');
    out.put_slice(payload);
    out.put_u8(tag);
}

fn format_float(f: f64) -> String {
    // Keep a decimal point so peers can tell it apart from an integer.
    let s = f.to_string();
    if s.contains(['.', 'e', 'E']) || !f.is_finite() {
        s
    } else {
        format!("{s}.0")
    }
}

/// Decode exactly one value; anything after it is an error.
pub fn decode(data: &[u8]) -> Result<Value, CodecError> {
    let (value, used) = decode_prefix(data)?;
    if used != data.len() {
        return Err(CodecError::TrailingBytes(data.len() - used));
    }
    Ok(value)
}

/// Decode the value at the start of `data`, returning it with the number of
/// bytes it spans.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), CodecError> {
    decode_at(data, 0)
}

/// Parse `<size>:`, returning the payload size and the header length.
fn read_header(data: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let Some(colon) = data.iter().take(MAX_SIZE_DIGITS + 1).position(|&b| b == b':') else {
        if data.len() > MAX_SIZE_DIGITS || data.iter().any(|b| !b.is_ascii_digit()) {
            return Err(CodecError::InvalidSize);
        }
        return Ok(None);
    };
    let digits = &data[..colon];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(CodecError::InvalidSize);
    }
    let size = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(CodecError::InvalidSize)?;
    Ok(Some((size, colon + 1)))
}

fn decode_at(data: &[u8], depth: usize) -> Result<(Value, usize), CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }
    let (size, header) = read_header(data)?.ok_or(CodecError::Truncated)?;
    let end = header.checked_add(size).ok_or(CodecError::InvalidSize)?;
    if data.len() <= end {
        return Err(CodecError::Truncated);
    }
    let payload = &data[header..end];
    let tag = data[end];

    let value = match tag {
        TAG_NULL if payload.is_empty() => Value::Null,
        TAG_NULL => return Err(CodecError::InvalidPayload { kind: "null" }),
        TAG_BOOL => match payload {
            b"true" => Value::Bool(true),
            b"false" => Value::Bool(false),
            _ => return Err(CodecError::InvalidPayload { kind: "boolean" }),
        },
        TAG_INTEGER => Value::Integer(
            parse_text(payload).ok_or(CodecError::InvalidPayload { kind: "integer" })?,
        ),
        TAG_FLOAT => {
            Value::Float(parse_text(payload).ok_or(CodecError::InvalidPayload { kind: "float" })?)
        }
        TAG_BYTES => Value::Bytes(Bytes::copy_from_slice(payload)),
        TAG_LIST => Value::List(decode_items(payload, depth)?),
        TAG_DICT => {
            let items = decode_items(payload, depth)?;
            if items.len() % 2 != 0 {
                return Err(CodecError::OddDict);
            }
            let mut dict = BTreeMap::new();
            let mut iter = items.into_iter();
            while let (Some(key), Some(item)) = (iter.next(), iter.next()) {
                let key = match key {
                    Value::Bytes(b) => {
                        String::from_utf8(b.to_vec()).map_err(|_| CodecError::NonUtf8Key)?
                    }
                    _ => return Err(CodecError::NonUtf8Key),
                };
                dict.insert(key, item);
            }
            Value::Dict(dict)
        }
        other => return Err(CodecError::UnknownTag(other)),
    };
    Ok((value, end + 1))
}

fn decode_items(mut payload: &[u8], depth: usize) -> Result<Vec<Value>, CodecError> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, used) = decode_at(payload, depth + 1)?;
        items.push(item);
        payload = &payload[used..];
    }
    Ok(items)
}

fn parse_text<T: std::str::FromStr>(payload: &[u8]) -> Option<T> {
    std::str::from_utf8(payload).ok()?.parse().ok()
}

/// Buffers incoming bytes and yields complete values.
///
/// The data channel is message oriented, but a message may carry several
/// values back to back, or a value split across messages when the peer
/// writes a partial buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject frames whose declared payload is larger than `max_frame`
    /// before buffering them.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete value, `Ok(None)` when more bytes are needed.
    ///
    /// On error the buffer is cleared: a corrupt stream cannot be resynced.
    pub fn decode_frame(&mut self) -> Result<Option<Value>, CodecError> {
        let header = match read_header(&self.buffer) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.buffer.clear();
                return Err(e);
            }
        };
        let (size, header_len) = header;
        if size > self.max_frame {
            self.buffer.clear();
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame,
            });
        }
        let frame_len = header_len + size + 1;
        if self.buffer.len() < frame_len {
            return Ok(None);
        }
        match decode_prefix(&self.buffer[..frame_len]) {
            Ok((value, used)) => {
                self.buffer.advance(used);
                trace!("<-- Decoded frame: {used} bytes");
                Ok(Some(value))
            }
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(&encode(&Value::Null)[..], b"0:~");
        assert_eq!(&encode(&Value::Bool(true))[..], b"4:true!");
        assert_eq!(&encode(&Value::Bool(false))[..], b"5:false!");
        assert_eq!(&encode(&Value::Integer(-42))[..], b"3:-42#");
        assert_eq!(&encode(&Value::Float(1.5))[..], b"3:1.5^");
        assert_eq!(&encode(&Value::Float(2.0))[..], b"3:2.0^");
        assert_eq!(&encode(&"somedata".into())[..], b"8:somedata,");
    }

    #[test]
    fn test_list_and_dict_encoding() {
        let list = Value::List(vec![Value::Integer(1), "a".into()]);
        assert_eq!(&encode(&list)[..], b"8:1:1#1:a,]");

        let dict = Value::dict([("id", Value::from("x"))]);
        assert_eq!(&encode(&dict)[..], b"8:2:id,1:x,}");

        assert_eq!(&encode(&Value::List(vec![]))[..], b"0:]");
        assert_eq!(&encode(&Value::dict::<String, _>([]))[..], b"0:}");
    }

    #[test]
    fn test_binary_payload_kept_verbatim() {
        let raw = Bytes::from_static(&[0, 255, b':', b',', 10]);
        let encoded = encode(&Value::Bytes(raw.clone()));
        assert_eq!(decode(&encoded).unwrap(), Value::Bytes(raw));
    }

    #[test]
    fn test_nested_message() {
        let message = Value::dict([
            ("type", Value::from("file:chunk")),
            (
                "message",
                Value::dict([
                    ("id", Value::from("abc")),
                    ("chunk", Value::Bytes(Bytes::from_static(b"con"))),
                ]),
            ),
        ]);
        let decoded = decode(&encode(&message)).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(
            decoded.get("message").and_then(|m| m.get("id")).and_then(Value::as_str),
            Some("abc")
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(b"5:abc"), Err(CodecError::Truncated));
        assert_eq!(decode(b"x:abc,"), Err(CodecError::InvalidSize));
        assert_eq!(decode(b"3:abc?"), Err(CodecError::UnknownTag(b'?')));
        assert_eq!(
            decode(b"3:yes!"),
            Err(CodecError::InvalidPayload { kind: "boolean" })
        );
        assert_eq!(
            decode(b"2:1a#"),
            Err(CodecError::InvalidPayload { kind: "integer" })
        );
        assert_eq!(decode(b"4:1:a,}"), Err(CodecError::OddDict));
        assert_eq!(decode(b"0:~0:~"), Err(CodecError::TrailingBytes(3)));
        assert_eq!(decode(b"99999999999:"), Err(CodecError::InvalidSize));
    }

    #[test]
    fn test_depth_limit() {
        let mut value = Value::Null;
        for _ in 0..=MAX_DEPTH + 1 {
            value = Value::List(vec![value]);
        }
        assert_eq!(decode(&encode(&value)), Err(CodecError::TooDeep));
    }

    #[test]
    fn test_frame_decoder_partial() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"8:some");
        assert_eq!(decoder.decode_frame(), Ok(None));
        decoder.feed(b"data,");
        assert_eq!(decoder.decode_frame(), Ok(Some("somedata".into())));
        assert_eq!(decoder.decode_frame(), Ok(None));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_decoder_multiple_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"3:1st,3:2nd,0:~");
        assert_eq!(decoder.decode_frame(), Ok(Some("1st".into())));
        assert_eq!(decoder.decode_frame(), Ok(Some("2nd".into())));
        assert_eq!(decoder.decode_frame(), Ok(Some(Value::Null)));
        assert_eq!(decoder.decode_frame(), Ok(None));
    }

    #[test]
    fn test_frame_decoder_clears_on_error() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"3:abc?3:1st,");
        assert_eq!(decoder.decode_frame(), Err(CodecError::UnknownTag(b'?')));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_decoder_rejects_oversized_frame() {
        let mut decoder = FrameDecoder::with_max_frame(8);
        decoder.feed(b"9999999999:");
        assert_eq!(
            decoder.decode_frame(),
            Err(CodecError::FrameTooLarge {
                size: 9_999_999_999,
                max: 8
            })
        );
        assert_eq!(decoder.buffered(), 0);

        decoder.feed(b"8:12345678,");
        assert_eq!(decoder.decode_frame(), Ok(Some("12345678".into())));
    }
}
