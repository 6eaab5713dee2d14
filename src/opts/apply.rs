use std::os::fd::BorrowedFd;

use crate::endpoint::Params;
use crate::error::SocketError;
use crate::socket::{set_bind_to_device, set_bool_option, set_descriptor_flag, set_int_option, set_linger, set_status_flag};
use super::{Opt, OptFunc, OptValue};

/// Writes a parameter-block item.
pub(super) fn apply_param(opt: &Opt, params: &mut Params) {
	match opt.desc.func {
		OptFunc::Param(write) => write(params, &opt.value),
		OptFunc::Iff(flag) => {
			let iface = &mut params.interface;
			if let OptValue::Bool(on) = opt.value {
				// a later item for the same bit overrides an earlier one
				if on {
					iface.set |= flag;
					iface.clear &= !flag;
				} else {
					iface.clear |= flag;
					iface.set &= !flag;
				}
			}
		}
		_ => {}
	}
}

/// Applies a descriptor item to `fd`.
pub(super) fn apply_fd(opt: &Opt, fd: &BorrowedFd<'_>) -> Result<(), SocketError> {
	let label = opt.desc.name;
	match (opt.desc.func, &opt.value) {
		(OptFunc::Sockopt { level, name }, OptValue::Bool(b)) => set_bool_option(fd, level, name, *b, label),
		(OptFunc::Sockopt { level, name }, OptValue::Int(n)) => set_int_option(fd, level, name, *n, label),
		(OptFunc::Linger, OptValue::Int(n)) => set_linger(fd, u32::try_from(*n).ok()),
		(OptFunc::BindToDevice, OptValue::Str(dev)) => set_bind_to_device(fd, dev),
		(OptFunc::StatusFlag(flag), OptValue::Bool(b)) => set_status_flag(fd, flag, *b),
		(OptFunc::DescriptorFlag(flag), OptValue::Bool(b)) => set_descriptor_flag(fd, flag, *b),
		_ => Err(SocketError::InvalidAddress { reason: "option value does not fit its applier" }),
	}
}
