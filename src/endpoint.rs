//! One opened side of a relay: the descriptor plus the policy and cleanup
//! state that came with opening it.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};
use std::time::Duration;

use log::{debug, warn};

use crate::addr::SockAddr;
use crate::lifecycle::Cleanup;
use crate::socket::{IfFlags, Shutdown, SockType, shutdown_fd};

/// Access the caller wants on the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Read,
	Write,
	ReadWrite,
}

impl Direction {
	pub(crate) fn name(self) -> &'static str {
		match self {
			Direction::Read => "read",
			Direction::Write => "write",
			Direction::ReadWrite => "read/write",
		}
	}
}

/// What happens to the descriptor at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HowToEnd {
	/// Leave it open, it is not ours.
	None,
	/// `shutdown(SHUT_RDWR)` before closing.
	Shutdown,
	Close,
}

/// Retry budget of an endpoint.
///
/// `retry == 0 && !forever` means no further attempt remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub retry: u32,
	pub forever: bool,
	pub interval: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { retry: 0, forever: false, interval: Duration::from_secs(1) }
	}
}

impl RetryPolicy {
	pub fn remaining(&self) -> bool {
		self.forever || self.retry > 0
	}

	/// Uses up one retry. Returns false when none was left.
	pub fn consume(&mut self) -> bool {
		if self.forever {
			return true;
		}
		if self.retry == 0 {
			return false;
		}
		self.retry -= 1;
		true
	}

	/// A forked child does not inherit the parent's budget.
	pub fn clear(&mut self) {
		self.retry = 0;
		self.forever = false;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixParams {
	/// Address length from the path instead of the full structure size.
	pub tight: bool,
}

impl Default for UnixParams {
	fn default() -> Self {
		Self { tight: true }
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceParams {
	pub name: String,
	pub index: u32,
	/// Flags to turn on.
	pub set: IfFlags,
	/// Flags to turn off.
	pub clear: IfFlags,
}

/// Per-endpoint parameter block written by parameter options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
	/// Explicit `shut-*` choice; openers fill in their default otherwise.
	pub how_to_end: Option<HowToEnd>,
	pub retry: RetryPolicy,
	pub unix: UnixParams,
	pub interface: InterfaceParams,
}

/// How data moves through the opened descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
	Stream,
	SeqPacket,
	/// Datagrams addressed per send to the fixed peer.
	SendTo,
	/// Datagrams on a connected socket, plain read and write.
	Datagram,
	/// Datagrams; the first sender becomes the peer.
	RecvFromOne,
	/// Datagrams from anyone, read only.
	Recv,
	/// Link-layer frames; `skip_ip` strips an IP header on receive.
	Packet { skip_ip: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
	Init,
	Resolving,
	Attempting,
	Connected,
	Listening,
	Open,
}

#[derive(Debug)]
pub struct Endpoint {
	fd: Option<OwnedFd>,
	pub label: String,
	pub direction: Direction,
	pub params: Params,
	pub peer: Option<SockAddr>,
	pub local: Option<SockAddr>,
	pub sock_type: Option<SockType>,
	pub transfer: TransferMode,
	pub state: OpenState,
	pub is_child: bool,
	pub cleanup: Cleanup,
}

impl Endpoint {
	pub fn new(label: &str, direction: Direction) -> Self {
		Self {
			fd: None,
			label: label.to_owned(),
			direction,
			params: Params::default(),
			peer: None,
			local: None,
			sock_type: None,
			transfer: TransferMode::Stream,
			state: OpenState::Init,
			is_child: false,
			cleanup: Cleanup::new(),
		}
	}

	pub fn fd(&self) -> Option<BorrowedFd<'_>> {
		self.fd.as_ref().map(|fd| fd.as_fd())
	}

	pub fn set_fd(&mut self, fd: OwnedFd) {
		self.fd = Some(fd);
	}

	/// Takes the descriptor out, leaving cleanup to the caller.
	pub fn take_fd(&mut self) -> Option<OwnedFd> {
		self.fd.take()
	}

	pub fn how_to_end(&self) -> HowToEnd {
		self.params.how_to_end.unwrap_or(HowToEnd::Close)
	}

	/// Sets the close policy unless an option chose one already.
	pub(crate) fn default_how_to_end(&mut self, how: HowToEnd) {
		self.params.how_to_end.get_or_insert(how);
	}

	/// Releases the endpoint.
	///
	/// Restores interface flags and terminal attributes, ends the descriptor
	/// according to `how_to_end`, then removes the owned UNIX path.
	pub fn close(&mut self) {
		if let Some(fd) = self.fd.take() {
			self.cleanup.restore(fd.as_fd());
			match self.how_to_end() {
				HowToEnd::None => {
					let raw = fd.into_raw_fd();
					debug!("{}: leaving descriptor {} open", self.label, raw);
				}
				HowToEnd::Shutdown => {
					if let Err(err) = shutdown_fd(fd.as_raw_fd(), Shutdown::ReadWrite) {
						if err.errno() != Some(libc::ENOTCONN) {
							warn!("{}: {}", self.label, err);
						}
					}
				}
				HowToEnd::Close => {}
			}
		}
		self.cleanup.run_unlink();
	}
}

impl Drop for Endpoint {
	fn drop(&mut self) {
		self.close();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Read;
	use std::os::unix::net::UnixStream;

	#[test]
	fn retry_budget_counts_down() {
		let mut retry = RetryPolicy { retry: 2, ..Default::default() };
		assert!(retry.consume());
		assert!(retry.consume());
		assert!(!retry.remaining());
		assert!(!retry.consume());

		let mut forever = RetryPolicy { forever: true, ..Default::default() };
		assert!(forever.consume());
		forever.clear();
		assert!(!forever.remaining());
	}

	#[test]
	fn defaults() {
		let params = Params::default();
		assert!(params.unix.tight);
		assert_eq!(params.retry.interval, Duration::from_secs(1));
		assert_eq!(Endpoint::new("X", Direction::ReadWrite).how_to_end(), HowToEnd::Close);
	}

	#[test]
	fn shutdown_close_reaches_peer() {
		let (a, mut b) = UnixStream::pair().unwrap();
		let mut ep = Endpoint::new("UNIX-CONNECT", Direction::ReadWrite);
		ep.set_fd(OwnedFd::from(a));
		ep.default_how_to_end(HowToEnd::Shutdown);
		ep.close();
		let mut buf = [0u8; 1];
		assert_eq!(b.read(&mut buf).unwrap(), 0);
	}

	#[test]
	fn explicit_choice_beats_default() {
		let mut ep = Endpoint::new("FD", Direction::ReadWrite);
		ep.params.how_to_end = Some(HowToEnd::Close);
		ep.default_how_to_end(HowToEnd::None);
		assert_eq!(ep.how_to_end(), HowToEnd::Close);
	}
}
