use std::os::fd::AsFd;

use log::{debug, info, log};

use crate::addr::SockAddr;
use crate::endpoint::{Endpoint, OpenState, TransferMode};
use crate::error::{OpenError, SocketError};
use crate::opts::{OptSet, Phase};
use crate::process::Spawned;
use crate::socket::{SockType, Socket};
use super::{OpenContext, attempt_level, become_child, exhausted, spawn_with_retry};

/// Socket types tried after the first one refuses with `EPROTOTYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fallback {
	None,
	SeqPacket,
	/// `SEQPACKET`, then an unconnected `DGRAM` socket in sendto mode.
	SeqPacketThenDgram,
}

impl Fallback {
	fn types(self, first: SockType) -> Vec<SockType> {
		match self {
			Fallback::None => vec![first],
			Fallback::SeqPacket => vec![first, SockType::SeqPacket],
			Fallback::SeqPacketThenDgram => vec![first, SockType::SeqPacket, SockType::Datagram],
		}
	}
}

/// What a client opener asks the connect loop to do.
#[derive(Debug, Clone)]
pub(crate) struct ConnectPlan {
	/// Resolved remote candidates, tried in order.
	pub candidates: Vec<SockAddr>,
	pub local: Option<SockAddr>,
	pub sock_type: SockType,
	pub protocol: libc::c_int,
	pub fallback: Fallback,
	/// Pick a free local port in 640..=1023.
	pub lowport: bool,
	pub fork: bool,
}

/// A socket that completed one attempt.
struct Connection {
	sock: Socket,
	peer: SockAddr,
	transfer: TransferMode,
	opts: OptSet,
}

/// Client loop: walk the candidates, retry within the budget, optionally
/// fork per successful connect.
///
/// Only the process that leaves the loop returns: the forked child, or the
/// caller itself without `fork`. Returns the option set still to be applied
/// on the connected descriptor.
pub(crate) fn connect_loop(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	opts: OptSet,
	plan: &ConnectPlan,
) -> Result<OptSet, OpenError> {
	let pristine = opts;
	let mut attempts: u64 = 0;

	if plan.candidates.is_empty() {
		return Err(OpenError::Invariant { addr: ep.label.clone(), reason: "no candidate addresses" });
	}

	let conn = loop {
		attempts += 1;
		ep.state = OpenState::Attempting;

		let conn = match attempt(ctx, ep, &pristine, plan) {
			Ok(conn) => conn,
			Err(err) if err.is_retryable() => {
				if !ep.params.retry.consume() {
					return Err(exhausted(ep, attempts, err));
				}
				ctx.dialer.pause(ep.params.retry.interval);
				continue;
			}
			Err(err) => return Err(err),
		};

		if !plan.fork {
			break conn;
		}

		match spawn_with_retry(ctx, ep, &mut attempts)? {
			Spawned::Child => {
				become_child(ep);
				break conn;
			}
			Spawned::Parent(child) => {
				debug!("{}: connection handed to child {}", ep.label, child.pid);
				// parent keeps nothing of this connection
				drop(conn);
				ctx.dialer.pause(ep.params.retry.interval);
			}
		}
	};

	let local = conn.sock.local_addr().ok().or_else(|| plan.local.clone());
	ep.sock_type = Some(conn.sock.sock_type());
	ep.transfer = conn.transfer;
	ep.peer = Some(conn.peer);
	ep.local = local;
	ep.set_fd(conn.sock.into_fd());
	ep.state = OpenState::Connected;
	Ok(conn.opts)
}

/// One pass over the candidate list.
fn attempt(
	ctx: &mut OpenContext<'_>,
	ep: &Endpoint,
	pristine: &OptSet,
	plan: &ConnectPlan,
) -> Result<Connection, OpenError> {
	let mut last = None;
	let count = plan.candidates.len();

	for (i, target) in plan.candidates.iter().enumerate() {
		info!("opening connection to {}", target);
		let more = i + 1 < count || ep.params.retry.remaining();

		// a failed candidate must not leak consumed items into the next one
		let mut working = pristine.clone();
		match dial(ctx, &mut working, target, plan) {
			Ok((sock, transfer)) => {
				return Ok(Connection { sock, peer: target.clone(), transfer, opts: working });
			}
			Err(err) => {
				log!(attempt_level(more), "{}: {}", ep.label, err);
				if !err.is_retryable() {
					return Err(err);
				}
				last = Some(err);
			}
		}
	}

	Err(last.unwrap_or(OpenError::Invariant { addr: ep.label.clone(), reason: "no candidate addresses" }))
}

/// Connects to one target, walking the socket type fallbacks.
fn dial(
	ctx: &mut OpenContext<'_>,
	working: &mut OptSet,
	target: &SockAddr,
	plan: &ConnectPlan,
) -> Result<(Socket, TransferMode), OpenError> {
	let start = working.clone();
	let types = plan.fallback.types(plan.sock_type);

	for (k, &sock_type) in types.iter().enumerate() {
		if k > 0 {
			*working = start.clone();
		}
		match dial_typed(ctx, working, target, sock_type, plan) {
			Ok(done) => return Ok(done),
			Err(err) if err.errno() == Some(libc::EPROTOTYPE) && k + 1 < types.len() => {
				debug!("{}: {:?} refused with protocol mismatch, trying {:?}", target, sock_type, types[k + 1]);
			}
			Err(err) => return Err(err),
		}
	}
	Err(OpenError::Invariant { addr: target.to_string(), reason: "no socket type left to try" })
}

fn dial_typed(
	ctx: &mut OpenContext<'_>,
	working: &mut OptSet,
	target: &SockAddr,
	sock_type: SockType,
	plan: &ConnectPlan,
) -> Result<(Socket, TransferMode), OpenError> {
	let sock = ctx.dialer.socket(target.family(), sock_type, plan.protocol)?;
	working.apply(Phase::Fd, Some(sock.as_fd()))?;
	working.apply(Phase::PreBind, Some(sock.as_fd()))?;

	if let Some(local) = &plan.local {
		working.apply(Phase::Bind, Some(sock.as_fd()))?;
		if plan.lowport {
			bind_low_port(ctx, &sock, local)?;
		} else {
			ctx.dialer.bind(&sock, local)?;
		}
	}

	// from here on a bound path is ours: a failure must not leave it behind
	// for the next socket type or the next attempt
	match finish_dial(ctx, working, target, &sock, sock_type, plan) {
		Ok(transfer) => Ok((sock, transfer)),
		Err(err) => {
			drop(sock);
			release_bound_path(plan);
			Err(err)
		}
	}
}

fn finish_dial(
	ctx: &mut OpenContext<'_>,
	working: &mut OptSet,
	target: &SockAddr,
	sock: &Socket,
	sock_type: SockType,
	plan: &ConnectPlan,
) -> Result<TransferMode, OpenError> {
	if plan.local.is_some() {
		working.apply(Phase::PastBind, Some(sock.as_fd()))?;
	}

	let fallback_dgram = sock_type == SockType::Datagram && plan.fallback == Fallback::SeqPacketThenDgram;
	if fallback_dgram {
		// the peer is addressed per datagram, nothing to connect
		return Ok(TransferMode::SendTo);
	}

	ctx.dialer.connect(sock, target)?;
	working.apply(Phase::Connected, Some(sock.as_fd()))?;

	Ok(match sock_type {
		SockType::SeqPacket => TransferMode::SeqPacket,
		SockType::Datagram => TransferMode::Datagram,
		_ => TransferMode::Stream,
	})
}

/// Binds to the first free privileged port, scanning down from 1023.
fn bind_low_port(ctx: &mut OpenContext<'_>, sock: &Socket, local: &SockAddr) -> Result<(), OpenError> {
	let mut last = None;
	for port in (640..=1023u16).rev() {
		match ctx.dialer.bind(sock, &local.with_port(port)) {
			Ok(()) => return Ok(()),
			Err(err) if err.errno() == Some(libc::EADDRINUSE) => last = Some(err),
			Err(err) => return Err(err.into()),
		}
	}
	Err(last.unwrap_or(SocketError::Bind { errno: libc::EADDRINUSE, addr: local.to_string() }).into())
}

/// Frees a bound filesystem path so the next socket type can bind it again.
fn release_bound_path(plan: &ConnectPlan) {
	if let Some(path) = plan.local.as_ref().and_then(SockAddr::as_unix).and_then(|u| u.as_pathname()) {
		if let Err(err) = std::fs::remove_file(path) {
			debug!("unlink(\"{}\"): {}", path.display(), err);
		}
	}
}
