use std::os::fd::AsFd;

use log::{debug, info};

use crate::addr::{Family, SockAddr};
use crate::endpoint::{Endpoint, OpenState, TransferMode};
use crate::error::OpenError;
use crate::opts::{OptSet, Phase};
use crate::socket::SockType;
use super::OpenContext;

/// What a datagram or raw opener asks for: a socket, an optional bind and a
/// fixed peer for sendto.
#[derive(Debug, Clone)]
pub(crate) struct DgramPlan {
	pub family: Family,
	pub sock_type: SockType,
	pub protocol: libc::c_int,
	pub local: Option<SockAddr>,
	pub peer: Option<SockAddr>,
	pub transfer: TransferMode,
}

/// Opens an unconnected socket. Datagram endpoints do not retry or fork.
pub(crate) fn open_dgram(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	mut opts: OptSet,
	plan: &DgramPlan,
) -> Result<OptSet, OpenError> {
	ep.state = OpenState::Attempting;
	let sock = ctx.dialer.socket(plan.family, plan.sock_type, plan.protocol)?;
	opts.apply(Phase::Fd, Some(sock.as_fd()))?;
	opts.apply(Phase::PreBind, Some(sock.as_fd()))?;

	if let Some(local) = &plan.local {
		opts.apply(Phase::Bind, Some(sock.as_fd()))?;
		ctx.dialer.bind(&sock, local)?;
		info!("{}: bound to {}", ep.label, local);
		opts.apply(Phase::PastBind, Some(sock.as_fd()))?;
	}
	opts.apply(Phase::Connected, Some(sock.as_fd()))?;

	if let Some(peer) = &plan.peer {
		debug!("{}: sending to {}", ep.label, peer);
	}
	ep.local = sock.local_addr().ok().or_else(|| plan.local.clone());
	ep.peer = plan.peer.clone();
	ep.sock_type = Some(plan.sock_type);
	ep.transfer = plan.transfer;
	ep.set_fd(sock.into_fd());
	ep.state = OpenState::Connected;
	Ok(opts)
}
