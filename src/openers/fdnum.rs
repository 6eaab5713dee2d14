//! Inherited file descriptors: `FD` uses one as is, `ACCEPT-FD` accepts on it.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use log::{info, warn};

use crate::endpoint::{Endpoint, HowToEnd, OpenState};
use crate::engine::{OpenContext, accept_loop, open_late};
use crate::error::{OpenError, SocketError, errno};
use crate::opts::{OptCode, OptSet, Phase, parse_number};
use crate::registry::AddrDesc;
use crate::socket::{Socket, local_addr_of, set_descriptor_flag};

/// Parses the descriptor number and checks that it is open.
fn inherited(ep: &Endpoint, arg: &str) -> Result<OwnedFd, OpenError> {
	let num = parse_number(arg)
		.and_then(|n| RawFd::try_from(n).ok())
		.filter(|n| *n >= 0)
		.ok_or_else(|| OpenError::BadArgument { addr: ep.label.clone(), arg: arg.to_owned(), reason: "not a descriptor number" })?;

	if unsafe { libc::fcntl(num, libc::F_GETFD) } == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_GETFD" }.into());
	}
	// SAFETY: the descriptor is open; the endpoint's close policy decides
	// whether it is ever closed
	Ok(unsafe { OwnedFd::from_raw_fd(num) })
}

/// Child processes started later must not see the descriptor.
fn hide_from_exec(ep: &Endpoint, fd: BorrowedFd<'_>) {
	if let Err(err) = set_descriptor_flag(&fd, libc::FD_CLOEXEC, true) {
		warn!("{}: {}", ep.label, err);
	}
}

pub(crate) fn open_fd(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	_desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
) -> Result<(), OpenError> {
	ep.default_how_to_end(HowToEnd::None);
	let fd = inherited(ep, args[0])?;
	hide_from_exec(ep, fd.as_fd());
	info!("using file descriptor {} for {}", args[0], ep.direction.name());
	if ep.cleanup.capture_termios(fd.as_fd()) {
		info!("{}: terminal attributes saved", ep.label);
	}
	ep.set_fd(fd);
	opts.apply_range(Phase::Init, Phase::Fd, ep.fd())?;
	ep.state = OpenState::Connected;
	open_late(ctx.config, ep, opts)
}

pub(crate) fn open_accept_fd(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	_desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
) -> Result<(), OpenError> {
	ep.default_how_to_end(HowToEnd::Shutdown);
	let fd = inherited(ep, args[0])?;
	hide_from_exec(ep, fd.as_fd());

	match local_addr_of(fd.as_raw_fd()) {
		Ok(addr) => ep.local = Some(addr),
		Err(err) => warn!("{}: {}", ep.label, err),
	}
	let listener = Socket::adopt(fd)?;
	info!("using file descriptor {} accepting a connection for {}", args[0], ep.direction.name());

	let fork = opts.take_bool(OptCode::Fork).unwrap_or(false);
	opts.apply_range(Phase::Init, Phase::Early, None)?;
	opts.apply_range(Phase::Fd, Phase::PastBind, Some(listener.as_fd()))?;
	ep.state = OpenState::Listening;

	let mut attempts = 1;
	let opts = accept_loop(ctx, ep, listener, opts, fork, &mut attempts)?;
	open_late(ctx.config, ep, opts)
}
