//! Wire schema shared by client and server.
//!
//! Requests and responses travel as length-prefixed binary frames over a
//! long-lived TCP connection. Multiple requests may be in flight on a single
//! connection; responses are correlated by `identity`, never by ordering.

mod codec;

pub use codec::{ClientCodec, CodecError, MAX_FRAME_LEN, ServerCodec};

/// The four lock flavors. Discriminants are the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LockKind {
	Simple = 1,
	Timeout = 2,
	Reentrant = 4,
	ReadWrite = 8,
}

impl LockKind {
	pub fn as_u8(self) -> u8 {
		self as u8
	}
}

impl TryFrom<u8> for LockKind {
	type Error = CodecError;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(LockKind::Simple),
			2 => Ok(LockKind::Timeout),
			4 => Ok(LockKind::Reentrant),
			8 => Ok(LockKind::ReadWrite),
			other => Err(CodecError::InvalidKind(other)),
		}
	}
}

impl std::fmt::Display for LockKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			LockKind::Simple => f.write_str("simple"),
			LockKind::Timeout => f.write_str("timeout"),
			LockKind::Reentrant => f.write_str("reentrant"),
			LockKind::ReadWrite => f.write_str("read-write"),
		}
	}
}

/// A lock or unlock request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
	/// Non-empty lock name.
	pub key: String,
	/// Originating client id. Opaque; used for logging and the read/write
	/// downgrade check.
	pub application: String,
	/// Caller label within the application. Opaque, same uses as above.
	pub thread: String,
	pub kind: LockKind,
	/// true = acquire, false = release.
	pub is_lock: bool,
	/// Non-blocking attempt; meaningful only when `is_lock`.
	pub try_lock: bool,
	/// Expiration in milliseconds; meaningful only for Timeout acquires.
	pub time: i64,
	/// Read side vs write side; meaningful only for ReadWrite.
	pub read_lock: bool,
	/// Client-unique sequence number; the sole request/response correlation
	/// token.
	pub identity: i64,
}

impl LockRequest {
	/// Same `(application, thread)` pair: the ownership test for timeout
	/// unlock and the read/write downgrade window.
	pub fn same_caller(&self, other: &LockRequest) -> bool {
		self.application == other.application && self.thread == other.thread
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockResponse {
	pub key: String,
	/// Copied verbatim from the request.
	pub identity: i64,
	pub success: bool,
	pub cause: String,
	/// Inverted from `request.is_lock` to distinguish the ack class.
	pub is_lock_response: bool,
}

impl LockResponse {
	pub fn granted(request: &LockRequest) -> LockResponse {
		LockResponse {
			key: request.key.clone(),
			identity: request.identity,
			success: true,
			cause: String::new(),
			is_lock_response: !request.is_lock,
		}
	}

	pub fn denied(request: &LockRequest, cause: impl Into<String>) -> LockResponse {
		LockResponse {
			key: request.key.clone(),
			identity: request.identity,
			success: false,
			cause: cause.into(),
			is_lock_response: !request.is_lock,
		}
	}

	/// Benign outcome: nothing further to do, but not an error. Used by the
	/// timeout flavor when an unlock arrives after the lock was reaped.
	pub fn benign(request: &LockRequest, cause: impl Into<String>) -> LockResponse {
		LockResponse {
			key: request.key.clone(),
			identity: request.identity,
			success: true,
			cause: cause.into(),
			is_lock_response: !request.is_lock,
		}
	}
}

/// Normative cause strings carried in [`LockResponse::cause`].
pub mod cause {
	pub const LOCKED_ALREADY: &str = "Lock has been locked already.";
	pub const READ_BLOCKED_BY_WRITE: &str = "Locked by a write lock, read locking fails.";
	pub const WRITE_BLOCKED_BY_READ: &str = "Locked by a read lock, write locking fails.";
	pub const WRITE_BLOCKED_BY_WRITE: &str = "Locked by a write lock, write locking fails.";
	pub const LOCK_EXPIRED: &str = "Lock has expired already.";
	pub const EMPTY_KEY: &str = "Lock key must not be empty.";

	pub fn connection_failed(identity: i64) -> String {
		format!("Connection to server fails, request {identity} cancelled")
	}
}
