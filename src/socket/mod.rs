mod interface;
mod options;
mod raw;

pub use self::interface::{IfFlags, if_index, get_iff, set_iff, apply_iff};
pub use self::options::{set_int_option, set_bool_option, set_linger, set_bind_to_device,
						set_status_flag, set_descriptor_flag, set_reuse_addr};
pub use self::raw::{Socket, Shutdown};
pub(crate) use self::raw::{local_addr_of, shutdown_fd};

/// Socket type, as passed to the `socket()` syscall.
///
/// - `Stream`: byte stream (TCP, UNIX stream)
/// - `Datagram`: UDP, UNIX datagram
/// - `SeqPacket`: connected, keeps message boundaries
/// - `Raw`: packet sockets on an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockType {
	Stream,
	Datagram,
	SeqPacket,
	Raw,
}

impl SockType {
	/// Returns the libc constant for this socket type.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			SockType::Stream => libc::SOCK_STREAM,
			SockType::Datagram => libc::SOCK_DGRAM,
			SockType::SeqPacket => libc::SOCK_SEQPACKET,
			SockType::Raw => libc::SOCK_RAW,
		}
	}

	pub fn from_raw(raw: libc::c_int) -> Option<Self> {
		match raw {
			libc::SOCK_STREAM => Some(SockType::Stream),
			libc::SOCK_DGRAM => Some(SockType::Datagram),
			libc::SOCK_SEQPACKET => Some(SockType::SeqPacket),
			libc::SOCK_RAW => Some(SockType::Raw),
			_ => None,
		}
	}

	/// True for types that connect and accept.
	pub fn is_connection_oriented(self) -> bool {
		matches!(self, SockType::Stream | SockType::SeqPacket)
	}
}

/*
  ┌───────────┬────────────────┬───────────────┐
  │  Variant  │    Constant    │ Value (Linux) │
  ├───────────┼────────────────┼───────────────┤
  │ Stream    │ SOCK_STREAM    │ 1             │
  │ Datagram  │ SOCK_DGRAM     │ 2             │
  │ Raw       │ SOCK_RAW       │ 3             │
  │ SeqPacket │ SOCK_SEQPACKET │ 5             │
  └───────────┴────────────────┴───────────────┘
*/
