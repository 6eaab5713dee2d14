//! Raw packet socket on a network interface.

use log::{debug, info, warn};

use crate::addr::{Family, LinkAddr, SockAddr};
use crate::endpoint::{Endpoint, HowToEnd, TransferMode};
use crate::engine::{DgramPlan, OpenContext, open_dgram, open_late};
use crate::error::OpenError;
use crate::opts::{OptCode, OptSet, Phase};
use crate::registry::AddrDesc;
use crate::socket::{SockType, apply_iff, if_index, set_int_option};
use super::{take_family, take_sock_type};

// linux/if_packet.h
const PACKET_IGNORE_OUTGOING: libc::c_int = 23;

pub(crate) fn open_interface(
	ctx: &mut OpenContext<'_>,
	ep: &mut Endpoint,
	desc: &AddrDesc,
	args: &[&str],
	mut opts: OptSet,
) -> Result<(), OpenError> {
	let name = args[0];
	let index = if_index(name).ok_or_else(|| OpenError::UnknownInterface { addr: ep.label.clone(), name: name.to_owned() })?;

	ep.default_how_to_end(HowToEnd::Close);
	let sock_type = take_sock_type(&mut opts)?.unwrap_or(SockType::Raw);
	let family = take_family(&mut opts, desc.family())?;
	opts.apply_range(Phase::Init, Phase::Early, None)?;

	if let Some(bind) = opts.take_str(OptCode::Bind) {
		debug!("{}: bind \"{}\" ignored, bound to the interface", ep.label, bind);
	}

	let eth_p_all = libc::ETH_P_ALL as u16;
	let link = SockAddr::Link(LinkAddr::new(index as i32, eth_p_all));
	ep.params.interface.name = name.to_owned();
	ep.params.interface.index = index;

	let plan = DgramPlan {
		family,
		sock_type,
		protocol: libc::c_int::from(eth_p_all.to_be()),
		local: Some(link.clone()),
		peer: Some(link),
		transfer: TransferMode::Packet { skip_ip: family == Family::Inet },
	};
	let opts = open_dgram(ctx, ep, opts, &plan)?;

	let (set, clear) = (ep.params.interface.set, ep.params.interface.clear);
	let mut saved = None;
	if let Some(fd) = ep.fd() {
		if !set.is_empty() || !clear.is_empty() {
			saved = Some(apply_iff(&fd, name, set, clear)?);
		}
		if let Err(err) = set_int_option(&fd, libc::SOL_PACKET, PACKET_IGNORE_OUTGOING, 1, "PACKET_IGNORE_OUTGOING") {
			warn!("{}: {}", ep.label, err);
		}
	}
	if let Some(saved) = saved {
		ep.cleanup.save_iff(name, saved);
	}
	info!("{}: reading and writing on \"{}\" (index {})", ep.label, name, index);
	open_late(ctx.config, ep, opts)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::XioConfig;
	use crate::endpoint::Direction;
	use crate::engine::mock::{FixedResolver, ScriptedDialer, ScriptedSpawner};
	use crate::error::ErrorClass;
	use crate::registry::open_with;

	fn ctx_open(dialer: &mut ScriptedDialer, tokens: &[&str]) -> Result<Endpoint, OpenError> {
		let config = XioConfig::default();
		let resolver = FixedResolver(vec![]);
		let mut spawner = ScriptedSpawner::default();
		let mut ctx = OpenContext { config: &config, resolver: &resolver, dialer, spawner: &mut spawner };
		open_with(&mut ctx, tokens, OptSet::new(), Direction::ReadWrite)
	}

	#[test]
	fn unknown_interface_is_configuration_error() {
		let mut dialer = ScriptedDialer::default();
		let err = ctx_open(&mut dialer, &["INTERFACE", "nonexistent0"]).unwrap_err();
		assert!(matches!(&err, OpenError::UnknownInterface { name, .. } if name == "nonexistent0"));
		assert_eq!(err.class(), ErrorClass::Configuration);
		assert_eq!(dialer.sockets, 0);
	}

	#[test]
	fn binds_to_loopback_index() {
		let mut dialer = ScriptedDialer::default();
		let ep = ctx_open(&mut dialer, &["INTERFACE", "lo"]).unwrap();
		let index = if_index("lo").unwrap() as i32;
		assert_eq!(dialer.binds, vec![SockAddr::Link(LinkAddr::new(index, libc::ETH_P_ALL as u16))]);
		assert_eq!(ep.transfer, TransferMode::Packet { skip_ip: false });
		assert_eq!(ep.params.interface.name, "lo");
		// no masks, nothing to restore
		assert!(ep.cleanup.saved_iff().is_none());
	}
}
