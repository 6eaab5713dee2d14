//! UNIX domain addresses, filesystem and abstract.

use std::path::PathBuf;

use log::info;

use crate::addr::{Family, SockAddr, UnixAddr, build_unix_address};
use crate::endpoint::{Endpoint, HowToEnd, TransferMode};
use crate::engine::{
	ConnectPlan, DgramPlan, Fallback, ListenPlan, OpenContext, connect_loop, listen_loop, open_dgram, open_late,
};
use crate::error::{OpenError, OptionFault};
use crate::lifecycle::unlink_early;
use crate::opts::{Group, OptCode, OptSet, Phase};
use crate::registry::AddrDesc;
use crate::resolve::{LocalSpec, resolve_local};
use crate::socket::SockType;
use super::{take_protocol, take_sock_type};

const DEFAULT_BACKLOG: i32 = 5;

/// Parts every UNIX opener works out the same way.
struct Prepared {
	name: String,
	is_abstract: bool,
	/// Explicit `so-type`; disables the socket type fallbacks.
	explicit_type: Option<SockType>,
	protocol: libc::c_int,
	/// Remove the bound path at close. Always false for abstract names.
	unlink_close: bool,
}

fn prepare(ep: &mut Endpoint, desc: &AddrDesc, args: &[&str], opts: &mut OptSet) -> Result<Prepared, OpenError> {
	let is_abstract = desc.is_abstract();
	ep.default_how_to_end(HowToEnd::Shutdown);

	let explicit_type = take_sock_type(opts)?;
	let protocol = take_protocol(opts, 0);
	// unlink-close is NAMED, so an abstract address never carries it
	let unlink_close = opts.take_bool(OptCode::UnlinkClose).unwrap_or(!is_abstract);

	opts.apply_range(Phase::Init, Phase::Early, None)?;
	Ok(Prepared { name: args[0].to_owned(), is_abstract, explicit_type, protocol, unlink_close })
}

impl Prepared {
	fn address(&self, ep: &Endpoint) -> UnixAddr {
		build_unix_address(self.name.as_bytes(), self.is_abstract, ep.params.unix.tight)
	}

	fn path(&self) -> Option<PathBuf> {
		(!self.is_abstract).then(|| PathBuf::from(&self.name))
	}

	/// The optional `bind` value as a local address. Filesystem options need
	/// a bound path to act on; `unlink-early` clears it once per open.
	fn local(&self, ctx: &OpenContext<'_>, ep: &Endpoint, opts: &mut OptSet, sock_type: SockType) -> Result<Option<SockAddr>, OpenError> {
		let bind = opts.take_str(OptCode::Bind);
		let spec = LocalSpec {
			family: Family::Unix,
			sock_type,
			protocol: self.protocol,
			is_abstract: self.is_abstract,
			tight: ep.params.unix.tight,
		};
		let local = resolve_local(ctx.resolver, ctx.config, &ep.label, bind.as_deref(), spec)?;
		if local.is_none() {
			if let Some(named) = opts.search_group(Group::NAMED) {
				return Err(opts.fault(named.desc.name, OptionFault::NeedsBind));
			}
		}
		if opts.take_bool(OptCode::UnlinkEarly).unwrap_or(false) {
			if let Some(path) = local.as_ref().and_then(SockAddr::as_unix).and_then(UnixAddr::as_pathname) {
				unlink_early(path)?;
			}
		}
		Ok(local)
	}
}

/// Makes `ep` own the filesystem path of `local`, if it has one.
fn own_bound_path(ep: &mut Endpoint, local: Option<&SockAddr>, unlink_close: bool) {
	if !unlink_close {
		return;
	}
	if let Some(path) = local.and_then(SockAddr::as_unix).and_then(UnixAddr::as_pathname) {
		ep.cleanup.schedule_unlink(path);
	}
}

pub(crate) fn open_connect(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	opts: OptSet,
) -> Result<(), OpenError> {
	connect_with(ctx, ep, desc, args, opts, Fallback::SeqPacket)
}

/// Like `UNIX-CONNECT`, additionally falling back to an unconnected datagram socket.
pub(crate) fn open_client(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	opts: OptSet,
) -> Result<(), OpenError> {
	connect_with(ctx, ep, desc, args, opts, Fallback::SeqPacketThenDgram)
}

fn connect_with(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
	fallback: Fallback,
) -> Result<(), OpenError> {
	let prep = prepare(ep, desc, args, &mut opts)?;
	let sock_type = prep.explicit_type.unwrap_or(SockType::Stream);
	let them = prep.address(ep);
	let local = prep.local(ctx, ep, &mut opts, sock_type)?;
	let fork = opts.take_bool(OptCode::Fork).unwrap_or(false);

	let plan = ConnectPlan {
		candidates: vec![SockAddr::Unix(them)],
		local,
		sock_type,
		protocol: prep.protocol,
		fallback: if prep.explicit_type.is_some() { Fallback::None } else { fallback },
		lowport: false,
		fork,
	};
	let opts = connect_loop(ctx, ep, opts, &plan)?;
	// only the process that left the loop owns the bound path
	own_bound_path(ep, plan.local.as_ref(), prep.unlink_close);
	open_late(ctx.config, ep, opts)
}

pub(crate) fn open_listen(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
) -> Result<(), OpenError> {
	let unlink_early = opts.take_bool(OptCode::UnlinkEarly).unwrap_or(false);
	let prep = prepare(ep, desc, args, &mut opts)?;
	let local = SockAddr::Unix(prep.address(ep));
	let backlog = opts.take_int(OptCode::Backlog).unwrap_or(DEFAULT_BACKLOG);
	let fork = opts.take_bool(OptCode::Fork).unwrap_or(false);

	let plan = ListenPlan {
		local,
		sock_type: prep.explicit_type.unwrap_or(SockType::Stream),
		protocol: prep.protocol,
		backlog,
		fork,
		path: prep.path(),
		unlink_early,
		unlink_close: prep.unlink_close,
		reuse_addr: false,
	};
	let opts = listen_loop(ctx, ep, opts, &plan)?;
	open_late(ctx.config, ep, opts)
}

pub(crate) fn open_sendto(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
) -> Result<(), OpenError> {
	let prep = prepare(ep, desc, args, &mut opts)?;
	let sock_type = prep.explicit_type.unwrap_or(SockType::Datagram);
	let them = SockAddr::Unix(prep.address(ep));
	let local = prep.local(ctx, ep, &mut opts, sock_type)?;
	info!("{}: sending to {}", ep.label, them);

	let plan = DgramPlan {
		family: Family::Unix,
		sock_type,
		protocol: prep.protocol,
		local,
		peer: Some(them),
		transfer: TransferMode::SendTo,
	};
	let opts = open_dgram(ctx, ep, opts, &plan)?;
	own_bound_path(ep, plan.local.as_ref(), prep.unlink_close);
	open_late(ctx.config, ep, opts)
}

pub(crate) fn open_recvfrom(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	opts: OptSet,
) -> Result<(), OpenError> {
	receive_with(ctx, ep, desc, args, opts, TransferMode::RecvFromOne)
}

pub(crate) fn open_recv(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	opts: OptSet,
) -> Result<(), OpenError> {
	receive_with(ctx, ep, desc, args, opts, TransferMode::Recv)
}

/// Datagram socket bound to the address itself.
fn receive_with(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
	transfer: TransferMode,
) -> Result<(), OpenError> {
	let early = opts.take_bool(OptCode::UnlinkEarly).unwrap_or(false);
	let prep = prepare(ep, desc, args, &mut opts)?;
	let local = SockAddr::Unix(prep.address(ep));

	if early {
		if let Some(path) = prep.path() {
			unlink_early(&path)?;
		}
	}

	let plan = DgramPlan {
		family: Family::Unix,
		sock_type: prep.explicit_type.unwrap_or(SockType::Datagram),
		protocol: prep.protocol,
		local: Some(local),
		peer: None,
		transfer,
	};
	let opts = open_dgram(ctx, ep, opts, &plan)?;
	own_bound_path(ep, plan.local.as_ref(), prep.unlink_close);
	open_late(ctx.config, ep, opts)
}

#[cfg(test)]
mod tests {
	use std::io::{Read, Write};
	use std::os::unix::fs::FileTypeExt;
	use std::os::unix::net::{UnixDatagram, UnixListener};

	use super::*;
	use crate::config::XioConfig;
	use crate::endpoint::{Direction, OpenState};
	use crate::engine::SysDialer;
	use crate::engine::mock::{FixedResolver, ScriptedSpawner};
	use crate::opts::OptValue;
	use crate::registry::open_with;

	fn open(tokens: &[&str], opts: OptSet) -> Result<Endpoint, OpenError> {
		open_for(tokens, opts, Direction::ReadWrite)
	}

	fn open_for(tokens: &[&str], opts: OptSet, dir: Direction) -> Result<Endpoint, OpenError> {
		let config = XioConfig::default();
		let resolver = FixedResolver(vec![]);
		let mut dialer = SysDialer;
		let mut spawner = ScriptedSpawner::default();
		let mut ctx = OpenContext { config: &config, resolver: &resolver, dialer: &mut dialer, spawner: &mut spawner };
		open_with(&mut ctx, tokens, opts, dir)
	}

	#[test]
	fn connect_to_listener_transfers_bytes() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("srv");
		let listener = UnixListener::bind(&path).unwrap();

		let ep = open(&["UNIX-CONNECT", path.to_str().unwrap()], OptSet::new()).unwrap();
		let (mut conn, _) = listener.accept().unwrap();

		assert_eq!(ep.state, OpenState::Open);
		assert_eq!(ep.transfer, TransferMode::Stream);
		let fd = ep.fd().unwrap().try_clone_to_owned().unwrap();
		let mut ours = std::os::unix::net::UnixStream::from(fd);
		ours.write_all(b"ping").unwrap();
		let mut buf = [0u8; 4];
		conn.read_exact(&mut buf).unwrap();
		assert_eq!(&buf, b"ping");
	}

	#[test]
	fn named_option_without_bind() {
		let dir = tempfile::tempdir().unwrap();
		let mut opts = OptSet::new();
		opts.insert("unlink-early", OptValue::Bool(true)).unwrap();
		let err = open(&["UNIX-CONNECT", dir.path().join("s").to_str().unwrap()], opts).unwrap_err();
		assert!(matches!(err, OpenError::Option { fault: OptionFault::NeedsBind, .. }));
	}

	#[test]
	fn connect_with_bind_owns_client_path() {
		let dir = tempfile::tempdir().unwrap();
		let srv = dir.path().join("srv");
		let cli = dir.path().join("cli");
		let _listener = UnixListener::bind(&srv).unwrap();

		let mut opts = OptSet::new();
		opts.insert_str("bind", cli.to_str().unwrap()).unwrap();
		let mut ep = open(&["UNIX-CONNECT", srv.to_str().unwrap()], opts).unwrap();
		assert_eq!(ep.cleanup.unlink_path(), Some(cli.as_path()));
		assert!(cli.exists());
		ep.close();
		assert!(!cli.exists());
	}

	#[test]
	fn sendto_reaches_bound_receiver() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("dgram");
		let receiver = UnixDatagram::bind(&path).unwrap();

		let ep = open(&["UNIX-SENDTO", path.to_str().unwrap()], OptSet::new()).unwrap();
		assert_eq!(ep.transfer, TransferMode::SendTo);
		let fd = ep.fd().unwrap().try_clone_to_owned().unwrap();
		let sender = UnixDatagram::from(fd);
		sender.send_to(b"hi", &path).unwrap();
		let mut buf = [0u8; 8];
		assert_eq!(receiver.recv(&mut buf).unwrap(), 2);
	}

	#[test]
	fn sendto_bind_clears_stale_entry() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("dgram");
		let cli = dir.path().join("cli");
		let _receiver = UnixDatagram::bind(&path).unwrap();
		std::fs::write(&cli, b"stale").unwrap();

		let mut opts = OptSet::new();
		opts.insert_str("bind", cli.to_str().unwrap()).unwrap();
		opts.insert("unlink-early", OptValue::Bool(true)).unwrap();
		let mut ep = open(&["UNIX-SENDTO", path.to_str().unwrap()], opts).unwrap();
		assert_eq!(ep.cleanup.unlink_path(), Some(cli.as_path()));
		assert!(std::fs::symlink_metadata(&cli).unwrap().file_type().is_socket());
		ep.close();
		assert!(!cli.exists());
	}

	#[test]
	fn recv_binds_and_removes_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("in");
		std::fs::write(&path, b"stale").unwrap();

		let mut opts = OptSet::new();
		opts.insert("unlink-early", OptValue::Bool(true)).unwrap();
		let mut ep = open_for(&["UNIX-RECV", path.to_str().unwrap()], opts, Direction::Read).unwrap();
		assert_eq!(ep.transfer, TransferMode::Recv);
		assert!(path.exists());
		ep.close();
		assert!(!path.exists());
	}

	#[test]
	fn abstract_listener_has_no_path() {
		let name = format!("addrlane-test-{}", std::process::id());
		let mut ep = Endpoint::new("ABSTRACT-LISTEN", Direction::ReadWrite);
		let desc = crate::registry::lookup("ABSTRACT-LISTEN").unwrap();
		let mut opts = OptSet::new();
		let prep = prepare(&mut ep, desc, &[name.as_str()], &mut opts).unwrap();
		assert!(!prep.unlink_close);
		assert!(prep.path().is_none());
		assert!(prep.address(&ep).is_abstract());
		assert_eq!(ep.how_to_end(), HowToEnd::Shutdown);
	}
}
