//! Openers, one module per address family.
//!
//! An opener turns the positional arguments and its `Spec` options into a
//! plan for the engine, then runs the late phase on whatever descriptor the
//! engine left in the endpoint.

pub(crate) mod fdnum;
pub(crate) mod interface;
pub(crate) mod ipapp;
pub(crate) mod unix;

use crate::addr::Family;
use crate::error::{OpenError, OptionFault};
use crate::opts::{OptCode, OptSet};
use crate::socket::SockType;

/// `protocol-family`, or `default` when not given.
fn take_family(opts: &mut OptSet, default: Family) -> Result<Family, OpenError> {
	match opts.take_str(OptCode::ProtocolFamily) {
		Some(name) => Family::from_name(&name).ok_or_else(|| opts.fault("protocol-family", OptionFault::BadValue(name))),
		None => Ok(default),
	}
}

/// `so-type`, when given.
fn take_sock_type(opts: &mut OptSet) -> Result<Option<SockType>, OpenError> {
	match opts.take_int(OptCode::SoType) {
		Some(raw) => SockType::from_raw(raw)
			.map(Some)
			.ok_or_else(|| opts.fault("so-type", OptionFault::BadValue(raw.to_string()))),
		None => Ok(None),
	}
}

fn take_protocol(opts: &mut OptSet, default: libc::c_int) -> libc::c_int {
	opts.take_int(OptCode::SoPrototype).unwrap_or(default)
}
