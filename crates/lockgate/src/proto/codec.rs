//! Length-prefixed binary framing for the wire schema.
//!
//! Every frame is a u32 big-endian payload length followed by the payload.
//! Strings travel as u16-prefixed UTF-8 and integers big-endian; field
//! order matches the schema exactly.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{LockKind, LockRequest, LockResponse};

/// Frames larger than this are a protocol error and close the connection.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const LEN_PREFIX: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),
	#[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
	FrameTooLarge(usize),
	#[error("frame payload ended early")]
	Truncated,
	#[error("invalid lock type {0}")]
	InvalidKind(u8),
	#[error("{0} is not valid UTF-8")]
	InvalidString(&'static str),
	#[error("{0} exceeds the u16 length limit")]
	FieldTooLong(&'static str),
}

/// Client side: encodes requests, decodes responses.
#[derive(Debug, Default)]
pub struct ClientCodec;

/// Server side: decodes requests, encodes responses.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl Encoder<LockRequest> for ClientCodec {
	type Error = CodecError;

	fn encode(&mut self, item: LockRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
		encode_frame(dst, |buf| {
			put_string(buf, "key", &item.key)?;
			put_string(buf, "application", &item.application)?;
			put_string(buf, "thread", &item.thread)?;
			buf.put_u8(item.kind.as_u8());
			buf.put_u8(item.is_lock as u8);
			buf.put_u8(item.try_lock as u8);
			buf.put_i64(item.time);
			buf.put_u8(item.read_lock as u8);
			buf.put_i64(item.identity);
			Ok(())
		})
	}
}

impl Decoder for ClientCodec {
	type Item = LockResponse;
	type Error = CodecError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		let Some(mut payload) = take_frame(src)? else {
			return Ok(None);
		};
		let key = get_string(&mut payload, "key")?;
		let identity = get_i64(&mut payload)?;
		let success = get_bool(&mut payload)?;
		let cause = get_string(&mut payload, "cause")?;
		let is_lock_response = get_bool(&mut payload)?;
		Ok(Some(LockResponse {
			key,
			identity,
			success,
			cause,
			is_lock_response,
		}))
	}
}

impl Encoder<LockResponse> for ServerCodec {
	type Error = CodecError;

	fn encode(&mut self, item: LockResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
		encode_frame(dst, |buf| {
			put_string(buf, "key", &item.key)?;
			buf.put_i64(item.identity);
			buf.put_u8(item.success as u8);
			put_string(buf, "cause", &item.cause)?;
			buf.put_u8(item.is_lock_response as u8);
			Ok(())
		})
	}
}

impl Decoder for ServerCodec {
	type Item = LockRequest;
	type Error = CodecError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		let Some(mut payload) = take_frame(src)? else {
			return Ok(None);
		};
		let key = get_string(&mut payload, "key")?;
		let application = get_string(&mut payload, "application")?;
		let thread = get_string(&mut payload, "thread")?;
		let kind = LockKind::try_from(get_u8(&mut payload)?)?;
		let is_lock = get_bool(&mut payload)?;
		let try_lock = get_bool(&mut payload)?;
		let time = get_i64(&mut payload)?;
		let read_lock = get_bool(&mut payload)?;
		let identity = get_i64(&mut payload)?;
		Ok(Some(LockRequest {
			key,
			application,
			thread,
			kind,
			is_lock,
			try_lock,
			time,
			read_lock,
			identity,
		}))
	}
}

fn encode_frame(
	dst: &mut BytesMut,
	write: impl FnOnce(&mut BytesMut) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
	// Reserve the length slot, write the payload, then back-patch.
	let start = dst.len();
	dst.put_u32(0);
	write(dst)?;
	let payload_len = dst.len() - start - LEN_PREFIX;
	if payload_len > MAX_FRAME_LEN {
		return Err(CodecError::FrameTooLarge(payload_len));
	}
	dst[start..start + LEN_PREFIX].copy_from_slice(&(payload_len as u32).to_be_bytes());
	Ok(())
}

fn take_frame(src: &mut BytesMut) -> Result<Option<BytesMut>, CodecError> {
	if src.len() < LEN_PREFIX {
		return Ok(None);
	}
	let len = u32::from_be_bytes(src[..LEN_PREFIX].try_into().expect("4 bytes")) as usize;
	if len > MAX_FRAME_LEN {
		return Err(CodecError::FrameTooLarge(len));
	}
	if src.len() < LEN_PREFIX + len {
		src.reserve(LEN_PREFIX + len - src.len());
		return Ok(None);
	}
	src.advance(LEN_PREFIX);
	Ok(Some(src.split_to(len)))
}

fn put_string(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), CodecError> {
	let Ok(len) = u16::try_from(value.len()) else {
		return Err(CodecError::FieldTooLong(field));
	};
	buf.put_u16(len);
	buf.put_slice(value.as_bytes());
	Ok(())
}

fn get_string(buf: &mut BytesMut, field: &'static str) -> Result<String, CodecError> {
	if buf.remaining() < 2 {
		return Err(CodecError::Truncated);
	}
	let len = buf.get_u16() as usize;
	if buf.remaining() < len {
		return Err(CodecError::Truncated);
	}
	let raw = buf.split_to(len);
	String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidString(field))
}

fn get_u8(buf: &mut BytesMut) -> Result<u8, CodecError> {
	if buf.remaining() < 1 {
		return Err(CodecError::Truncated);
	}
	Ok(buf.get_u8())
}

fn get_bool(buf: &mut BytesMut) -> Result<bool, CodecError> {
	Ok(get_u8(buf)? != 0)
}

fn get_i64(buf: &mut BytesMut) -> Result<i64, CodecError> {
	if buf.remaining() < 8 {
		return Err(CodecError::Truncated);
	}
	Ok(buf.get_i64())
}
