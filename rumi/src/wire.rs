//! Wire codec for invocation and reply frames.
//!
//! An inbound invocation frame is `[method id][arg0]..[argN-1]`. A
//! synchronous reply frame is a status tag optionally followed by an
//! encoded return value; boolean returns fold into the tag itself.
//! Asynchronous methods never produce a reply frame.
//!
//! All multi-byte values are big-endian. Strings and serialized objects
//! are length-prefixed with a `u32`; serialized objects and marshalled
//! throwables use MessagePack for their payload.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    buffered::BufferedReader,
    error::{Error, ErrorKind, Result},
    info::{MethodId, RemoteParameter},
};

pub(crate) const TAG_OK: u8 = 0;
pub(crate) const TAG_OK_TRUE: u8 = 1;
pub(crate) const TAG_OK_FALSE: u8 = 2;
pub(crate) const TAG_THROWABLE: u8 = 3;

/// Upper bound for any single length-prefixed segment.
const MAX_SEGMENT_SIZE: usize = 16 << 20;

/// A decoded parameter or return value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Char(char),
    Str(String),
    /// MessagePack bytes of a serialized object.
    Object(Bytes),
    /// A reference to an object living behind another remote interface.
    Remote { interface: u64, object: u64 },
}

impl Value {
    /// Serializes `value` into an opaque object payload.
    ///
    /// # Errors
    pub fn object<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Value::Object(rmp_serde::to_vec(value)?.into()))
    }

    /// # Errors
    pub fn decode_object<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Value::Object(bytes) => Ok(rmp_serde::from_slice(bytes)?),
            other => Err(mismatch("object", other)),
        }
    }

    /// # Errors
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }

    /// # Errors
    pub fn as_byte(&self) -> Result<u8> {
        match self {
            Value::Byte(v) => Ok(*v),
            other => Err(mismatch("byte", other)),
        }
    }

    /// # Errors
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            other => Err(mismatch("i32", other)),
        }
    }

    /// # Errors
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::I64(v) => Ok(*v),
            other => Err(mismatch("i64", other)),
        }
    }

    /// # Errors
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(mismatch("f64", other)),
        }
    }

    /// # Errors
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(mismatch("string", other)),
        }
    }
}

fn mismatch(expected: &str, got: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidArgument,
        format!("expected {expected}, got {got:?}"),
    )
}

/// # Errors
pub async fn read_method_id<R: AsyncRead + Unpin>(
    reader: &mut BufferedReader<R>,
) -> Result<MethodId> {
    Ok(MethodId::new(reader.read_u64().await?))
}

/// # Errors
pub async fn write_method_id<W: AsyncWrite + Unpin>(writer: &mut W, id: MethodId) -> Result<()> {
    write_all(writer, &id.value().to_be_bytes()).await
}

async fn read_segment<R: AsyncRead + Unpin>(reader: &mut BufferedReader<R>) -> Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_SEGMENT_SIZE {
        return Err(Error::new(
            ErrorKind::MalformedFrame,
            format!("segment too long: {len}"),
        ));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(bytes)
}

async fn write_segment<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())?;
    write_all(writer, &len.to_be_bytes()).await?;
    write_all(writer, bytes).await
}

/// Decodes one parameter according to its descriptor.
///
/// # Errors
///
/// `MalformedFrame` if the bytes do not form a valid value of the
/// described type; `UnexpectedEof` from a truncated frame is propagated
/// unchanged.
pub async fn read_param<R: AsyncRead + Unpin>(
    reader: &mut BufferedReader<R>,
    param: &RemoteParameter,
) -> Result<Value> {
    let value = match param {
        RemoteParameter::Bool => Value::Bool(reader.read_u8().await? != 0),
        RemoteParameter::Byte => Value::Byte(reader.read_u8().await?),
        RemoteParameter::I16 => Value::I16(reader.read_i16().await?),
        RemoteParameter::U16 => Value::U16(reader.read_u16().await?),
        RemoteParameter::I32 => Value::I32(reader.read_i32().await?),
        RemoteParameter::I64 => Value::I64(reader.read_i64().await?),
        RemoteParameter::F32 => Value::F32(reader.read_f32().await?),
        RemoteParameter::F64 => Value::F64(reader.read_f64().await?),
        RemoteParameter::Char => {
            let scalar = reader.read_u32().await?;
            let c = char::from_u32(scalar).ok_or_else(|| {
                Error::new(
                    ErrorKind::MalformedFrame,
                    format!("invalid char scalar: {scalar:#x}"),
                )
            })?;
            Value::Char(c)
        }
        RemoteParameter::Str => {
            let bytes = read_segment(reader).await?;
            let s = String::from_utf8(bytes)
                .map_err(|e| Error::new(ErrorKind::MalformedFrame, e.to_string()))?;
            Value::Str(s)
        }
        RemoteParameter::Object => Value::Object(read_segment(reader).await?.into()),
        RemoteParameter::Remote(_) => Value::Remote {
            interface: reader.read_u64().await?,
            object: reader.read_u64().await?,
        },
    };
    Ok(value)
}

/// Encodes one value according to its descriptor.
///
/// # Errors
///
/// `InvalidArgument` if the value does not match the descriptor.
pub async fn write_param<W: AsyncWrite + Unpin>(
    writer: &mut W,
    param: &RemoteParameter,
    value: &Value,
) -> Result<()> {
    match (param, value) {
        (RemoteParameter::Bool, Value::Bool(v)) => write_all(writer, &[u8::from(*v)]).await,
        (RemoteParameter::Byte, Value::Byte(v)) => write_all(writer, &[*v]).await,
        (RemoteParameter::I16, Value::I16(v)) => write_all(writer, &v.to_be_bytes()).await,
        (RemoteParameter::U16, Value::U16(v)) => write_all(writer, &v.to_be_bytes()).await,
        (RemoteParameter::I32, Value::I32(v)) => write_all(writer, &v.to_be_bytes()).await,
        (RemoteParameter::I64, Value::I64(v)) => write_all(writer, &v.to_be_bytes()).await,
        (RemoteParameter::F32, Value::F32(v)) => write_all(writer, &v.to_be_bytes()).await,
        (RemoteParameter::F64, Value::F64(v)) => write_all(writer, &v.to_be_bytes()).await,
        (RemoteParameter::Char, Value::Char(v)) => {
            write_all(writer, &u32::from(*v).to_be_bytes()).await
        }
        (RemoteParameter::Str, Value::Str(v)) => write_segment(writer, v.as_bytes()).await,
        (RemoteParameter::Object, Value::Object(v)) => write_segment(writer, v).await,
        (RemoteParameter::Remote(_), Value::Remote { interface, object }) => {
            write_all(writer, &interface.to_be_bytes()).await?;
            write_all(writer, &object.to_be_bytes()).await
        }
        (param, value) => Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("value {value:?} does not encode as {param:?}"),
        )),
    }
}

/// Writes the `OK` status tag of a void or non-boolean reply.
///
/// # Errors
pub async fn write_ok<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    write_all(writer, &[TAG_OK]).await
}

/// Writes a boolean reply folded into the status tag; no payload follows.
///
/// # Errors
pub async fn write_ok_bool<W: AsyncWrite + Unpin>(writer: &mut W, value: bool) -> Result<()> {
    let tag = if value { TAG_OK_TRUE } else { TAG_OK_FALSE };
    write_all(writer, &[tag]).await
}

/// Writes the `THROWABLE` tag followed by the marshalled error.
///
/// # Errors
pub async fn write_throwable<W: AsyncWrite + Unpin>(writer: &mut W, error: &Error) -> Result<()> {
    write_all(writer, &[TAG_THROWABLE]).await?;
    write_segment(writer, &rmp_serde::to_vec(error)?).await
}

/// Reads a synchronous reply frame: the status tag, then the return value
/// described by `returns` when the tag calls for one.
///
/// # Errors
///
/// A `THROWABLE` frame is surfaced as the marshalled error itself.
pub async fn read_reply<R: AsyncRead + Unpin>(
    reader: &mut BufferedReader<R>,
    returns: Option<&RemoteParameter>,
) -> Result<Option<Value>> {
    match reader.read_u8().await? {
        TAG_OK => match returns {
            Some(RemoteParameter::Bool) => Err(Error::new(
                ErrorKind::MalformedFrame,
                "boolean reply must fold into the status tag".into(),
            )),
            Some(param) => Ok(Some(read_param(reader, param).await?)),
            None => Ok(None),
        },
        TAG_OK_TRUE => Ok(Some(Value::Bool(true))),
        TAG_OK_FALSE => Ok(Some(Value::Bool(false))),
        TAG_THROWABLE => {
            let bytes = read_segment(reader).await?;
            Err(rmp_serde::from_slice(&bytes)?)
        }
        tag => Err(Error::new(
            ErrorKind::MalformedFrame,
            format!("unknown status tag: {tag}"),
        )),
    }
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer
        .write_all(bytes)
        .await
        .map_err(|e| Error::new(ErrorKind::SendFailed, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(param: RemoteParameter, value: Value) {
        let mut bytes = Vec::new();
        write_param(&mut bytes, &param, &value).await.unwrap();
        let mut reader = BufferedReader::new(bytes.as_slice());
        let decoded = read_param(&mut reader, &param).await.unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn test_param_round_trip() {
        round_trip(RemoteParameter::Bool, Value::Bool(true)).await;
        round_trip(RemoteParameter::Byte, Value::Byte(0xA5)).await;
        round_trip(RemoteParameter::I16, Value::I16(-2)).await;
        round_trip(RemoteParameter::U16, Value::U16(40_000)).await;
        round_trip(RemoteParameter::I32, Value::I32(i32::MIN)).await;
        round_trip(RemoteParameter::I64, Value::I64(1 << 40)).await;
        round_trip(RemoteParameter::F32, Value::F32(0.25)).await;
        round_trip(RemoteParameter::F64, Value::F64(-1234.5)).await;
        round_trip(RemoteParameter::Char, Value::Char('本')).await;
        round_trip(RemoteParameter::Str, Value::Str("hi".into())).await;
        round_trip(
            RemoteParameter::Remote(9),
            Value::Remote {
                interface: 9,
                object: 42,
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_object_round_trip() {
        let value = Value::object(&("pair", 3u32)).unwrap();
        round_trip(RemoteParameter::Object, value.clone()).await;
        let decoded: (String, u32) = value.decode_object().unwrap();
        assert_eq!(decoded, ("pair".to_string(), 3));
    }

    #[tokio::test]
    async fn test_method_id_round_trip() {
        let id = MethodId::new(0xFEED_FACE_CAFE_BEEF);
        let mut bytes = Vec::new();
        write_method_id(&mut bytes, id).await.unwrap();
        let mut reader = BufferedReader::new(bytes.as_slice());
        assert_eq!(read_method_id(&mut reader).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_boolean_reply_folds_into_tag() {
        let mut bytes = Vec::new();
        write_ok_bool(&mut bytes, true).await.unwrap();
        assert_eq!(bytes, [TAG_OK_TRUE]);

        let mut reader = BufferedReader::new(bytes.as_slice());
        let reply = read_reply(&mut reader, Some(&RemoteParameter::Bool))
            .await
            .unwrap();
        assert_eq!(reply, Some(Value::Bool(true)));

        let mut bytes = Vec::new();
        write_ok_bool(&mut bytes, false).await.unwrap();
        assert_eq!(bytes, [TAG_OK_FALSE]);
    }

    #[tokio::test]
    async fn test_void_reply_is_tag_only() {
        let mut bytes = Vec::new();
        write_ok(&mut bytes).await.unwrap();
        assert_eq!(bytes, [TAG_OK]);

        let mut reader = BufferedReader::new(bytes.as_slice());
        assert_eq!(read_reply(&mut reader, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_throwable_round_trip() {
        let error = Error::new(ErrorKind::Unknown("ArithmeticError".into()), "x".into());
        let mut bytes = Vec::new();
        write_throwable(&mut bytes, &error).await.unwrap();
        assert_eq!(bytes[0], TAG_THROWABLE);

        let mut reader = BufferedReader::new(bytes.as_slice());
        let err = read_reply(&mut reader, None).await.unwrap_err();
        assert_eq!(err, error);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_malformed() {
        let data = [0xEEu8];
        let mut reader = BufferedReader::new(data.as_slice());
        let err = read_reply(&mut reader, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedFrame);
    }

    #[tokio::test]
    async fn test_invalid_char_is_malformed() {
        let bytes = 0xD800u32.to_be_bytes();
        let mut reader = BufferedReader::new(bytes.as_slice());
        let err = read_param(&mut reader, &RemoteParameter::Char)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedFrame);
    }

    #[tokio::test]
    async fn test_truncated_param_is_eof() {
        let bytes = 5u32.to_be_bytes(); // length prefix without payload
        let mut reader = BufferedReader::new(bytes.as_slice());
        let err = read_param(&mut reader, &RemoteParameter::Str)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_param_type_mismatch_rejected() {
        let mut bytes = Vec::new();
        let err = write_param(&mut bytes, &RemoteParameter::I32, &Value::Str("no".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(bytes.is_empty());
    }
}
