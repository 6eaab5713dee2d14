//! TCP and UDP over IPv4/IPv6.

use log::debug;

use crate::addr::{Family, SockAddr};
use crate::endpoint::{Endpoint, HowToEnd, OpenState};
use crate::engine::{ConnectPlan, Fallback, ListenPlan, OpenContext, connect_loop, listen_loop, open_late};
use crate::error::OpenError;
use crate::opts::{OptCode, OptSet, Phase};
use crate::registry::AddrDesc;
use crate::resolve::{LocalSpec, resolve_local, resolve_remote, split_host_port, with_source_port};
use crate::socket::SockType;
use super::{take_family, take_protocol, take_sock_type};

const DEFAULT_BACKLOG: i32 = 5;

fn bad_argument(ep: &Endpoint, arg: &str, reason: &'static str) -> OpenError {
	OpenError::BadArgument { addr: ep.label.clone(), arg: arg.to_owned(), reason }
}

/// `TCP*:<host>:<port>` and `UDP*:<host>:<port>`.
pub(crate) fn open_connect(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
) -> Result<(), OpenError> {
	let (host, port) = split_host_port(args[0], ctx.config).map_err(|reason| bad_argument(ep, args[0], reason))?;
	if port.is_empty() {
		return Err(bad_argument(ep, args[0], "missing port"));
	}

	ep.default_how_to_end(HowToEnd::Shutdown);
	let family = take_family(&mut opts, desc.family())?;
	let sock_type = take_sock_type(&mut opts)?.or(desc.sock_type()).unwrap_or(SockType::Stream);
	let protocol = take_protocol(&mut opts, desc.arg3);
	opts.apply_range(Phase::Init, Phase::Early, None)?;

	ep.state = OpenState::Resolving;
	let mut candidates = resolve_remote(ctx.resolver, ctx.config, host, port, family, sock_type, protocol)?;
	// local and remote must agree on the family, the first candidate decides
	let local_family = if family == Family::Unspec { candidates[0].family() } else { family };

	let bind = opts.take_str(OptCode::Bind);
	let spec = LocalSpec { family: local_family, sock_type, protocol, is_abstract: false, tight: true };
	let mut local = resolve_local(ctx.resolver, ctx.config, &ep.label, bind.as_deref(), spec)?;
	if let Some(port) = opts.take_u16(OptCode::SourcePort) {
		local = with_source_port(local, local_family, port);
	}
	let lowport = opts.take_bool(OptCode::LowPort).unwrap_or(false);
	if lowport && local.is_none() {
		local = SockAddr::wildcard(local_family, 0);
	}
	if let Some(local) = &local {
		candidates.retain(|c| c.family() == local.family());
		debug!("{}: {} candidate(s) match local {}", ep.label, candidates.len(), local);
	}
	let fork = opts.take_bool(OptCode::Fork).unwrap_or(false);

	let plan = ConnectPlan { candidates, local, sock_type, protocol, fallback: Fallback::None, lowport, fork };
	let opts = connect_loop(ctx, ep, opts, &plan)?;
	open_late(ctx.config, ep, opts)
}

/// `TCP*-LISTEN:<port>`, optionally bound to the host given with `bind`.
pub(crate) fn open_listen(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
) -> Result<(), OpenError> {
	let port = args[0];
	if port.is_empty() {
		return Err(bad_argument(ep, port, "missing port"));
	}

	ep.default_how_to_end(HowToEnd::Shutdown);
	let family = match desc.family() {
		Family::Unspec => ctx.config.default_family(),
		family => family,
	};
	let family = take_family(&mut opts, family)?;
	let sock_type = take_sock_type(&mut opts)?.or(desc.sock_type()).unwrap_or(SockType::Stream);
	let protocol = take_protocol(&mut opts, desc.arg3);
	opts.apply_range(Phase::Init, Phase::Early, None)?;

	let bind = opts.take_str(OptCode::Bind);
	let host = match &bind {
		Some(text) => split_host_port(text, ctx.config).map_err(|reason| bad_argument(ep, text, reason))?.0,
		None => "",
	};
	ep.state = OpenState::Resolving;
	let local = ctx
		.resolver
		.resolve(host, port, family, sock_type, protocol, true)?
		.into_iter()
		.find(|addr| addr.family() == family)
		.ok_or_else(|| OpenError::Resolve {
			host: host.to_owned(),
			port: port.to_owned(),
			reason: "no address of the requested family".into(),
		})?;

	let plan = ListenPlan {
		local,
		sock_type,
		protocol,
		backlog: opts.take_int(OptCode::Backlog).unwrap_or(DEFAULT_BACKLOG),
		fork: opts.take_bool(OptCode::Fork).unwrap_or(false),
		path: None,
		unlink_early: false,
		unlink_close: false,
		reuse_addr: true,
	};
	let opts = listen_loop(ctx, ep, opts, &plan)?;
	open_late(ctx.config, ep, opts)
}
