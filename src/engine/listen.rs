use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;

use log::{debug, info, log};

use crate::addr::SockAddr;
use crate::endpoint::{Endpoint, OpenState, TransferMode};
use crate::error::OpenError;
use crate::lifecycle::{ensure_absent, unlink_early};
use crate::opts::{OptSet, Phase};
use crate::process::Spawned;
use crate::socket::{SockType, Socket, set_reuse_addr};
use super::{OpenContext, attempt_level, become_child, exhausted, spawn_with_retry};

/// What a listening opener asks the listen loop to do.
#[derive(Debug, Clone)]
pub(crate) struct ListenPlan {
	pub local: SockAddr,
	pub sock_type: SockType,
	pub protocol: libc::c_int,
	pub backlog: i32,
	pub fork: bool,
	/// Filesystem path of a UNIX listener, for the pre-bind check.
	pub path: Option<PathBuf>,
	/// Remove a stale entry at `path` instead of refusing to bind.
	pub unlink_early: bool,
	/// The listening process removes `path` at close.
	pub unlink_close: bool,
	/// Turn on SO_REUSEADDR before options are applied.
	pub reuse_addr: bool,
}

/// Listener loop: bind, listen and accept, retrying within the budget.
///
/// With `fork` every accepted connection goes to a child and the parent
/// accepts again; only the child returns. Returns the option set still to
/// be applied on the accepted descriptor.
pub(crate) fn listen_loop(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	opts: OptSet,
	plan: &ListenPlan,
) -> Result<OptSet, OpenError> {
	let pristine = opts;
	let mut attempts: u64 = 0;

	let (listener, working) = loop {
		attempts += 1;
		ep.state = OpenState::Attempting;
		let mut working = pristine.clone();

		match listen_once(ctx, &mut working, plan) {
			Ok(listener) => break (listener, working),
			Err(err) if err.is_retryable() => {
				log!(attempt_level(ep.params.retry.remaining()), "{}: {}", ep.label, err);
				if !ep.params.retry.consume() {
					return Err(exhausted(ep, attempts, err));
				}
				ctx.dialer.pause(ep.params.retry.interval);
			}
			Err(err) => return Err(err),
		}
	};

	if plan.unlink_close {
		if let Some(path) = &plan.path {
			ep.cleanup.schedule_unlink(path);
		}
	}
	ep.local = listener.local_addr().ok().or_else(|| Some(plan.local.clone()));
	ep.state = OpenState::Listening;
	info!("listening on {}", plan.local);

	accept_loop(ctx, ep, listener, working, plan.fork, &mut attempts)
}

/// Pre-bind path handling, socket, bind and listen.
fn listen_once(ctx: &mut OpenContext<'_>, working: &mut OptSet, plan: &ListenPlan) -> Result<Socket, OpenError> {
	if let Some(path) = &plan.path {
		if plan.unlink_early {
			unlink_early(path)?;
		} else {
			ensure_absent(path)?;
		}
	}

	let sock = ctx.dialer.socket(plan.local.family(), plan.sock_type, plan.protocol)?;
	if plan.reuse_addr {
		set_reuse_addr(&sock, true)?;
	}
	working.apply(Phase::Fd, Some(sock.as_fd()))?;
	working.apply(Phase::PreBind, Some(sock.as_fd()))?;
	working.apply(Phase::Bind, Some(sock.as_fd()))?;
	ctx.dialer.bind(&sock, &plan.local)?;

	// the path was absent before bind, so whatever is there now is ours
	if let Err(err) = past_bind(ctx, working, &sock, plan) {
		drop(sock);
		if let Some(path) = &plan.path {
			if let Err(unlink) = std::fs::remove_file(path) {
				debug!("unlink(\"{}\"): {}", path.display(), unlink);
			}
		}
		return Err(err);
	}
	Ok(sock)
}

fn past_bind(ctx: &mut OpenContext<'_>, working: &mut OptSet, sock: &Socket, plan: &ListenPlan) -> Result<(), OpenError> {
	working.apply(Phase::PastBind, Some(sock.as_fd()))?;
	if plan.sock_type.is_connection_oriented() {
		ctx.dialer.listen(sock, plan.backlog)?;
	}
	Ok(())
}

/// Accepts on `listener` until a connection is kept by this process.
///
/// `EINTR` and `ECONNABORTED` restart the accept. Other accept failures and
/// failed forks count against the retry budget.
pub(crate) fn accept_loop(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	listener: Socket,
	working: OptSet,
	fork: bool,
	attempts: &mut u64,
) -> Result<OptSet, OpenError> {
	loop {
		let (conn, peer) = match ctx.dialer.accept(&listener) {
			Ok(accepted) => accepted,
			Err(err) if matches!(err.errno(), Some(libc::EINTR) | Some(libc::ECONNABORTED)) => {
				debug!("{}: {}, accepting again", ep.label, err);
				continue;
			}
			Err(err) => {
				let err = OpenError::from(err);
				log!(attempt_level(ep.params.retry.remaining()), "{}: {}", ep.label, err);
				if !ep.params.retry.consume() {
					return Err(exhausted(ep, *attempts, err));
				}
				*attempts += 1;
				ctx.dialer.pause(ep.params.retry.interval);
				continue;
			}
		};
		info!("accepting connection from {} on {}", peer, ep.local.as_ref().unwrap_or(&SockAddr::Unspec));

		if fork {
			match spawn_with_retry(ctx, ep, attempts)? {
				Spawned::Parent(child) => {
					debug!("{}: connection handed to child {}", ep.label, child.pid);
					drop(conn);
					continue;
				}
				Spawned::Child => {
					become_child(ep);
					// the listener and its path stay with the parent
					ep.cleanup.disown_unlink();
				}
			}
		}

		drop(listener);
		return keep_connection(ep, conn, peer, working);
	}
}

fn keep_connection(ep: &mut Endpoint, conn: OwnedFd, peer: SockAddr, mut working: OptSet) -> Result<OptSet, OpenError> {
	let sock = Socket::adopt(conn)?;
	working.apply(Phase::Connected, Some(sock.as_fd()))?;
	ep.sock_type = Some(sock.sock_type());
	ep.transfer = match sock.sock_type() {
		SockType::SeqPacket => TransferMode::SeqPacket,
		_ => TransferMode::Stream,
	};
	ep.local = sock.local_addr().ok().or(ep.local.take());
	ep.peer = Some(peer);
	ep.set_fd(sock.into_fd());
	ep.state = OpenState::Connected;
	Ok(working)
}
