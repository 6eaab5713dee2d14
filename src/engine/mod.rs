//! The connection state machine.
//!
//! Openers describe what to open in a plan; the loops here drive socket
//! creation, bind, connect or listen/accept, phase-ordered option
//! application, retries and forking. All syscalls that may fail transiently
//! go through `Dialer` and all process creation through `Spawner`, so the
//! loops can be exercised without a network or a real fork.

mod connect;
mod dgram;
mod listen;

use std::time::Duration;

use log::{Level, log};

use crate::addr::{Family, SockAddr};
use crate::config::XioConfig;
use crate::endpoint::{Endpoint, OpenState};
use crate::error::{OpenError, SocketError};
use crate::opts::{OptSet, Phase};
use crate::process::{Spawned, Spawner};
use crate::resolve::Resolver;
use crate::socket::{SockType, Socket};

pub(crate) use self::connect::{ConnectPlan, Fallback, connect_loop};
pub(crate) use self::dgram::{DgramPlan, open_dgram};
pub(crate) use self::listen::{ListenPlan, accept_loop, listen_loop};

/// Socket syscalls the state machine depends on.
pub trait Dialer {
	fn socket(&mut self, family: Family, sock_type: SockType, protocol: libc::c_int) -> Result<Socket, SocketError>;

	fn bind(&mut self, sock: &Socket, addr: &SockAddr) -> Result<(), SocketError>;

	fn connect(&mut self, sock: &Socket, addr: &SockAddr) -> Result<(), SocketError>;

	fn listen(&mut self, sock: &Socket, backlog: i32) -> Result<(), SocketError>;

	fn accept(&mut self, sock: &Socket) -> Result<(std::os::fd::OwnedFd, SockAddr), SocketError>;

	/// Waits out the retry interval.
	fn pause(&mut self, interval: Duration) {
		std::thread::sleep(interval);
	}
}

/// Dialer that performs the real syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysDialer;

impl Dialer for SysDialer {
	fn socket(&mut self, family: Family, sock_type: SockType, protocol: libc::c_int) -> Result<Socket, SocketError> {
		Socket::new(family, sock_type, protocol)
	}

	fn bind(&mut self, sock: &Socket, addr: &SockAddr) -> Result<(), SocketError> {
		sock.bind(addr)
	}

	fn connect(&mut self, sock: &Socket, addr: &SockAddr) -> Result<(), SocketError> {
		sock.connect(addr)
	}

	fn listen(&mut self, sock: &Socket, backlog: i32) -> Result<(), SocketError> {
		sock.listen(backlog)
	}

	fn accept(&mut self, sock: &Socket) -> Result<(std::os::fd::OwnedFd, SockAddr), SocketError> {
		sock.accept()
	}
}

/// Everything an opener needs from outside the endpoint.
pub struct OpenContext<'a> {
	pub config: &'a XioConfig,
	pub resolver: &'a dyn Resolver,
	pub dialer: &'a mut dyn Dialer,
	pub spawner: &'a mut dyn Spawner,
}

/// Wraps the last transient failure once the budget is spent.
pub(crate) fn exhausted(ep: &Endpoint, attempts: u64, last: OpenError) -> OpenError {
	OpenError::Exhausted { addr: ep.label.clone(), attempts, last: Box::new(last) }
}

/// Level of a failure message: informational while something is left to try.
pub(crate) fn attempt_level(more: bool) -> Level {
	if more { Level::Info } else { Level::Error }
}

/// Forks, retrying failed forks against the endpoint's budget.
pub(crate) fn spawn_with_retry(ctx: &mut OpenContext<'_>, ep: &mut Endpoint, attempts: &mut u64) -> Result<Spawned, OpenError> {
	loop {
		match ctx.spawner.spawn_child() {
			Ok(spawned) => return Ok(spawned),
			Err(err) => {
				let level = if ep.params.retry.remaining() { Level::Warn } else { Level::Error };
				log!(level, "{}: {}", ep.label, err);
				if !err.is_retryable() {
					return Err(err);
				}
				if !ep.params.retry.consume() {
					return Err(exhausted(ep, *attempts, err));
				}
				*attempts += 1;
				ctx.dialer.pause(ep.params.retry.interval);
			}
		}
	}
}

/// Marks the calling process as the forked child of `ep`.
pub(crate) fn become_child(ep: &mut Endpoint) {
	ep.is_child = true;
	ep.params.retry.clear();
}

/// Final phase of every opener: `Late` options, leftovers, then `Open`.
pub(crate) fn open_late(config: &XioConfig, ep: &mut Endpoint, mut opts: OptSet) -> Result<(), OpenError> {
	opts.apply(Phase::Late, ep.fd())?;
	opts.finish(config.strict_opts)?;
	ep.state = OpenState::Open;
	Ok(())
}
