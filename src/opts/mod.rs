//! Typed option items and the phase-ordered option set.
//!
//! An `OptSet` is filled by the caller, checked against the address type's
//! capability groups once, and then drained phase by phase while the address
//! is being opened. Items are removed as they are applied or retrieved, so
//! whatever is left at the end was never used.

mod apply;
mod table;

use std::os::fd::BorrowedFd;
use std::time::Duration;

use bitflags::bitflags;
use log::{trace, warn};

use crate::endpoint::Params;
use crate::error::{OpenError, OptionFault};
use crate::socket::IfFlags;

pub use self::table::{OPTIONS, lookup};

/// Stage of the open sequence in which an option takes effect.
///
/// The order of the variants is the order of application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
	/// Before anything exists; validates and captures state.
	Init,
	/// Before name resolution and filesystem access.
	Early,
	/// A descriptor exists, nothing is bound yet.
	Fd,
	/// Shape of the socket and its address length.
	PreBind,
	Bind,
	PastBind,
	Connected,
	/// Final descriptor tuning, e.g. non-blocking mode.
	Late,
}

impl Phase {
	pub const ALL: [Phase; 8] = [
		Phase::Init,
		Phase::Early,
		Phase::Fd,
		Phase::PreBind,
		Phase::Bind,
		Phase::PastBind,
		Phase::Connected,
		Phase::Late,
	];
}

bitflags! {
	/// Capability groups.
	///
	/// Every option belongs to one group and every address type declares the
	/// groups it accepts; an option is legal iff the two intersect.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct Group: u32 {
		const FD = 1 << 0;
		const NAMED = 1 << 1;
		const SOCKET = 1 << 2;
		const SOCK_UNIX = 1 << 3;
		const SOCK_IP = 1 << 4;
		const IPAPP = 1 << 5;
		const TCP = 1 << 6;
		const LISTEN = 1 << 7;
		const CHILD = 1 << 8;
		const RETRY = 1 << 9;
		const INTERFACE = 1 << 10;
		const TERMIOS = 1 << 11;
		const FIFO = 1 << 12;
		const CHR = 1 << 13;
		const BLK = 1 << 14;
		const FILE = 1 << 15;
		const RANGE = 1 << 16;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptType {
	Bool,
	Int,
	UInt,
	/// Two bytes, e.g. a port number.
	Bytes2,
	Str,
	/// Seconds with fractional part.
	Timespec,
}

impl OptType {
	fn name(self) -> &'static str {
		match self {
			OptType::Bool => "boolean",
			OptType::Int => "integer",
			OptType::UInt => "unsigned integer",
			OptType::Bytes2 => "2-byte",
			OptType::Str => "string",
			OptType::Timespec => "timespec",
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptValue {
	Bool(bool),
	Int(i32),
	UInt(u32),
	Bytes2(u16),
	Str(String),
	Timespec(Duration),
}

impl OptValue {
	pub fn ty(&self) -> OptType {
		match self {
			OptValue::Bool(_) => OptType::Bool,
			OptValue::Int(_) => OptType::Int,
			OptValue::UInt(_) => OptType::UInt,
			OptValue::Bytes2(_) => OptType::Bytes2,
			OptValue::Str(_) => OptType::Str,
			OptValue::Timespec(_) => OptType::Timespec,
		}
	}

	/// Converts option text into a value of type `ty`.
	///
	/// An empty boolean means "on", as in `fork` written without `=1`.
	pub fn parse(ty: OptType, text: &str) -> Result<Self, OptionFault> {
		let bad = || OptionFault::BadValue(text.to_owned());
		match ty {
			OptType::Bool => match text.to_ascii_lowercase().as_str() {
				"" | "1" | "true" | "yes" | "on" => Ok(OptValue::Bool(true)),
				"0" | "false" | "no" | "off" => Ok(OptValue::Bool(false)),
				_ => Err(bad()),
			},
			OptType::Int => parse_number(text)
				.and_then(|n| i32::try_from(n).ok())
				.map(OptValue::Int)
				.ok_or_else(bad),
			OptType::UInt => parse_number(text)
				.and_then(|n| u32::try_from(n).ok())
				.map(OptValue::UInt)
				.ok_or_else(bad),
			OptType::Bytes2 => parse_number(text)
				.and_then(|n| u16::try_from(n).ok())
				.map(OptValue::Bytes2)
				.ok_or_else(bad),
			OptType::Str => Ok(OptValue::Str(text.to_owned())),
			OptType::Timespec => {
				let secs: f64 = text.trim().parse().map_err(|_| bad())?;
				Duration::try_from_secs_f64(secs).map(OptValue::Timespec).map_err(|_| bad())
			}
		}
	}
}

/// Parses an integer the way `strtol(.., 0)` does: `0x` hex, leading `0`
/// octal, decimal otherwise, with an optional sign.
pub fn parse_number(text: &str) -> Option<i64> {
	let text = text.trim();
	let (negative, digits) = match text.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, text.strip_prefix('+').unwrap_or(text)),
	};
	let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
		i64::from_str_radix(hex, 16).ok()?
	} else if digits.len() > 1 && digits.starts_with('0') {
		i64::from_str_radix(&digits[1..], 8).ok()?
	} else {
		digits.parse::<i64>().ok()?
	};
	Some(if negative { -magnitude } else { magnitude })
}

/// Identity of an option, independent of its spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptCode {
	Fork,
	Retry,
	Forever,
	Interval,
	ShutNone,
	ShutDown,
	ShutClose,
	ProtocolFamily,
	SoType,
	SoPrototype,
	Bind,
	UnixTightSockLen,
	UnlinkEarly,
	UnlinkClose,
	SourcePort,
	LowPort,
	Backlog,
	SoReuseAddr,
	SoReusePort,
	SoKeepAlive,
	SoRcvBuf,
	SoSndBuf,
	SoLinger,
	SoBindToDevice,
	TcpNoDelay,
	TcpKeepIdle,
	TcpKeepIntvl,
	TcpKeepCnt,
	NonBlock,
	CloExec,
	IffUp,
	IffBroadcast,
	IffDebug,
	IffLoopback,
	IffPointopoint,
	IffNoTrailers,
	IffRunning,
	IffNoArp,
	IffPromisc,
	IffAllMulti,
	IffMaster,
	IffSlave,
	IffMulticast,
	IffPortSel,
	IffAutoMedia,
}

/// How an item reaches its target.
#[derive(Clone, Copy)]
pub enum OptFunc {
	/// Retrieved explicitly by the opener through the `take_*` methods.
	Spec,
	/// Writes into the endpoint's parameter block at open start.
	Param(fn(&mut Params, &OptValue)),
	/// Integer or boolean `setsockopt`.
	Sockopt { level: libc::c_int, name: libc::c_int },
	Linger,
	BindToDevice,
	/// One `F_SETFL` status flag.
	StatusFlag(libc::c_int),
	/// One `F_SETFD` descriptor flag.
	DescriptorFlag(libc::c_int),
	/// One bit of the interface set/clear mask pair.
	Iff(IfFlags),
}

impl std::fmt::Debug for OptFunc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OptFunc::Spec => write!(f, "Spec"),
			OptFunc::Param(_) => write!(f, "Param"),
			OptFunc::Sockopt { level, name } => write!(f, "Sockopt({level}, {name})"),
			OptFunc::Linger => write!(f, "Linger"),
			OptFunc::BindToDevice => write!(f, "BindToDevice"),
			OptFunc::StatusFlag(flag) => write!(f, "StatusFlag(0x{flag:x})"),
			OptFunc::DescriptorFlag(flag) => write!(f, "DescriptorFlag(0x{flag:x})"),
			OptFunc::Iff(flag) => write!(f, "Iff({flag:?})"),
		}
	}
}

/// Static description of one option.
#[derive(Debug)]
pub struct OptDesc {
	pub name: &'static str,
	pub alias: Option<&'static str>,
	pub code: OptCode,
	pub group: Group,
	pub phase: Phase,
	pub ty: OptType,
	pub func: OptFunc,
}

impl OptDesc {
	pub fn matches(&self, name: &str) -> bool {
		self.name.eq_ignore_ascii_case(name)
			|| self.alias.is_some_and(|alias| alias.eq_ignore_ascii_case(name))
	}

	/// True for items applied at open start rather than in their phase.
	fn is_param(&self) -> bool {
		matches!(self.func, OptFunc::Param(_) | OptFunc::Iff(_))
	}
}

/// One option item: a descriptor and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Opt {
	pub desc: &'static OptDesc,
	pub value: OptValue,
}

impl PartialEq for OptDesc {
	fn eq(&self, other: &Self) -> bool {
		self.code == other.code
	}
}

/// Ordered, consumable set of option items.
///
/// `Clone` takes the pristine copy used to restart a failed attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptSet {
	items: Vec<Opt>,
	/// Address type the set is being applied for, used in error messages.
	label: String,
}

impl OptSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds an item, checking that the name exists and the value has its type.
	pub fn insert(&mut self, name: &str, value: OptValue) -> Result<&mut Self, OptionFault> {
		let desc = lookup(name).ok_or(OptionFault::Unknown)?;
		if desc.ty != value.ty() {
			return Err(OptionFault::WrongType { expected: desc.ty.name() });
		}
		self.items.push(Opt { desc, value });
		Ok(self)
	}

	/// Adds an item from its textual value.
	pub fn insert_str(&mut self, name: &str, text: &str) -> Result<&mut Self, OptionFault> {
		let desc = lookup(name).ok_or(OptionFault::Unknown)?;
		let value = OptValue::parse(desc.ty, text)?;
		self.items.push(Opt { desc, value });
		Ok(self)
	}

	pub(crate) fn set_label(&mut self, label: &str) {
		self.label = label.to_owned();
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Opt> {
		self.items.iter()
	}

	/// Names of the remaining items, in insertion order.
	pub fn names(&self) -> Vec<&'static str> {
		self.items.iter().map(|opt| opt.desc.name).collect()
	}

	pub fn contains(&self, code: OptCode) -> bool {
		self.items.iter().any(|opt| opt.desc.code == code)
	}

	/// Rejects any item whose group is not among `groups`.
	pub fn check_groups(&self, groups: Group) -> Result<(), OpenError> {
		match self.items.iter().find(|opt| !opt.desc.group.intersects(groups)) {
			Some(opt) => Err(self.fault(opt.desc.name, OptionFault::WrongGroup)),
			None => Ok(()),
		}
	}

	/// First remaining item of `group`, if any.
	pub fn search_group(&self, group: Group) -> Option<&Opt> {
		self.items.iter().find(|opt| opt.desc.group.intersects(group))
	}

	/// Applies and removes every parameter-block item, whatever its phase.
	pub fn apply_params(&mut self, params: &mut Params) {
		self.items.retain(|opt| {
			if !opt.desc.is_param() {
				return true;
			}
			trace!("option \"{}\" = {:?} into parameters", opt.desc.name, opt.value);
			apply::apply_param(opt, params);
			false
		});
	}

	/// Applies and removes exactly the items declared for `phase`.
	///
	/// `Spec` items stay for their opener to retrieve. Items of other phases
	/// are never touched.
	pub fn apply(&mut self, phase: Phase, fd: Option<BorrowedFd<'_>>) -> Result<(), OpenError> {
		let mut i = 0;
		while i < self.items.len() {
			let desc = self.items[i].desc;
			if desc.phase != phase || matches!(desc.func, OptFunc::Spec) || desc.is_param() {
				i += 1;
				continue;
			}
			let opt = self.items.remove(i);
			self.apply_item(&opt, fd)?;
		}
		Ok(())
	}

	/// Applies the phases `from..=to` in order.
	pub fn apply_range(&mut self, from: Phase, to: Phase, fd: Option<BorrowedFd<'_>>) -> Result<(), OpenError> {
		for phase in Phase::ALL.into_iter().filter(|p| (from..=to).contains(p)) {
			self.apply(phase, fd)?;
		}
		Ok(())
	}

	/// Applies the single option `code` now, in `phase`.
	///
	/// Returns whether an item was present. An item declared for another
	/// phase is a configuration error.
	pub fn apply_one(&mut self, code: OptCode, phase: Phase, fd: Option<BorrowedFd<'_>>) -> Result<bool, OpenError> {
		let Some(pos) = self.items.iter().position(|opt| opt.desc.code == code) else {
			return Ok(false);
		};
		let desc = self.items[pos].desc;
		if desc.phase != phase {
			return Err(self.fault(desc.name, OptionFault::WrongPhase { declared: desc.phase, current: phase }));
		}
		let opt = self.items.remove(pos);
		self.apply_item(&opt, fd)?;
		Ok(true)
	}

	fn apply_item(&self, opt: &Opt, fd: Option<BorrowedFd<'_>>) -> Result<(), OpenError> {
		let Some(fd) = fd else {
			return Err(OpenError::Invariant { addr: self.label.clone(), reason: "option needs a descriptor" });
		};
		trace!("applying option \"{}\" = {:?} in phase {:?}", opt.desc.name, opt.value, opt.desc.phase);
		apply::apply_fd(opt, &fd)?;
		Ok(())
	}

	/// Removes every item with `code`, returning the last value.
	fn take(&mut self, code: OptCode) -> Option<OptValue> {
		let mut last = None;
		self.items.retain(|opt| {
			if opt.desc.code == code {
				last = Some(opt.value.clone());
				false
			} else {
				true
			}
		});
		last
	}

	pub fn take_bool(&mut self, code: OptCode) -> Option<bool> {
		match self.take(code)? {
			OptValue::Bool(b) => Some(b),
			_ => None,
		}
	}

	pub fn take_int(&mut self, code: OptCode) -> Option<i32> {
		match self.take(code)? {
			OptValue::Int(n) => Some(n),
			OptValue::UInt(n) => i32::try_from(n).ok(),
			_ => None,
		}
	}

	pub fn take_u16(&mut self, code: OptCode) -> Option<u16> {
		match self.take(code)? {
			OptValue::Bytes2(n) => Some(n),
			_ => None,
		}
	}

	pub fn take_str(&mut self, code: OptCode) -> Option<String> {
		match self.take(code)? {
			OptValue::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn take_duration(&mut self, code: OptCode) -> Option<Duration> {
		match self.take(code)? {
			OptValue::Timespec(d) => Some(d),
			_ => None,
		}
	}

	/// Reports items that were never applied.
	///
	/// Each one is a warning, or a `NotApplied` error with `strict` set.
	pub fn finish(&mut self, strict: bool) -> Result<(), OpenError> {
		if let Some(opt) = self.items.first() {
			if strict {
				return Err(self.fault(opt.desc.name, OptionFault::NotApplied));
			}
		}
		for opt in self.items.drain(..) {
			warn!("{}: option \"{}\" not applied", self.label, opt.desc.name);
		}
		Ok(())
	}

	pub(crate) fn fault(&self, option: &str, fault: OptionFault) -> OpenError {
		OpenError::option(&self.label, option, fault)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ErrorClass;

	fn set(items: &[(&str, &str)]) -> OptSet {
		let mut opts = OptSet::new();
		for (name, value) in items {
			opts.insert_str(name, value).unwrap();
		}
		opts.set_label("TEST");
		opts
	}

	#[test]
	fn phases_are_strictly_ordered() {
		for pair in Phase::ALL.windows(2) {
			assert!(pair[0] < pair[1]);
		}
	}

	#[test]
	fn insert_checks_name_and_type() {
		let mut opts = OptSet::new();
		assert_eq!(opts.insert("no-such-option", OptValue::Bool(true)).unwrap_err(), OptionFault::Unknown);
		assert_eq!(
			opts.insert("fork", OptValue::Int(1)).unwrap_err(),
			OptionFault::WrongType { expected: "boolean" },
		);
		opts.insert("sp", OptValue::Bytes2(2000)).unwrap();
		assert_eq!(opts.names(), vec!["sourceport"]);
	}

	#[test]
	fn text_values_convert_by_type() {
		assert_eq!(OptValue::parse(OptType::Bool, "").unwrap(), OptValue::Bool(true));
		assert_eq!(OptValue::parse(OptType::Int, "0x10").unwrap(), OptValue::Int(16));
		assert_eq!(OptValue::parse(OptType::Int, "010").unwrap(), OptValue::Int(8));
		assert_eq!(OptValue::parse(OptType::Timespec, "0.25").unwrap(), OptValue::Timespec(Duration::from_millis(250)));
		assert!(OptValue::parse(OptType::Bytes2, "70000").is_err());
		assert!(OptValue::parse(OptType::Timespec, "-1").is_err());
	}

	#[test]
	fn apply_leaves_other_phases_alone() {
		let mut opts = set(&[("nonblock", "1"), ("so-reuseaddr", "1"), ("bind", "/tmp/x"), ("backlog", "5")]);
		let before = opts.clone();
		let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
		use std::os::fd::AsFd;

		for phase in [Phase::Init, Phase::Early, Phase::PreBind, Phase::Bind, Phase::PastBind, Phase::Connected] {
			opts.apply(phase, Some(a.as_fd())).unwrap();
		}
		// Spec items (bind, backlog) are never applied by phase, late and fd items remain
		assert_eq!(opts, before);

		opts.apply(Phase::Fd, Some(a.as_fd())).unwrap();
		assert_eq!(opts.names(), vec!["nonblock", "bind", "backlog"]);
		opts.apply(Phase::Late, Some(a.as_fd())).unwrap();
		assert_eq!(opts.names(), vec!["bind", "backlog"]);
	}

	#[test]
	fn apply_one_in_wrong_phase_is_configuration_error() {
		let mut opts = set(&[("nonblock", "1")]);
		let err = opts.apply_one(OptCode::NonBlock, Phase::PreBind, None).unwrap_err();
		assert_eq!(err.class(), ErrorClass::Configuration);
		assert!(matches!(err, OpenError::Option { fault: OptionFault::WrongPhase { declared: Phase::Late, current: Phase::PreBind }, .. }));
		assert_eq!(opts.len(), 1);
		assert!(!opts.apply_one(OptCode::CloExec, Phase::Late, None).unwrap());
	}

	#[test]
	fn groups_must_intersect() {
		let opts = set(&[("unlink-early", "1")]);
		assert!(opts.check_groups(Group::NAMED | Group::SOCKET).is_ok());
		let err = opts.check_groups(Group::SOCKET | Group::SOCK_UNIX).unwrap_err();
		assert_eq!(err.to_string(), "TEST: option \"unlink-early\": not applicable to this address type");
	}

	#[test]
	fn take_consumes_all_copies_last_wins() {
		let mut opts = set(&[("fork", "0"), ("backlog", "3"), ("fork", "1")]);
		assert_eq!(opts.take_bool(OptCode::Fork), Some(true));
		assert!(!opts.contains(OptCode::Fork));
		assert_eq!(opts.take_int(OptCode::Backlog), Some(3));
		assert!(opts.is_empty());
		assert_eq!(opts.take_bool(OptCode::Fork), None);

		let mut opts = set(&[("intervall", "2")]);
		assert_eq!(opts.take_int(OptCode::Interval), None);
		let mut opts = set(&[("intervall", "2")]);
		assert_eq!(opts.take_duration(OptCode::Interval), Some(Duration::from_secs(2)));
	}

	#[test]
	fn params_are_applied_at_open_start() {
		let mut opts = set(&[("retry", "3"), ("interval", "0.5"), ("fork", "1"), ("tightsocklen", "0"), ("iff-promisc", "1"), ("up", "0")]);
		let mut params = Params::default();
		opts.apply_params(&mut params);
		assert_eq!(params.retry.retry, 3);
		assert_eq!(params.retry.interval, Duration::from_millis(500));
		assert!(!params.unix.tight);
		assert_eq!(params.interface.set, IfFlags::PROMISC);
		assert_eq!(params.interface.clear, IfFlags::UP);
		assert_eq!(opts.names(), vec!["fork"]);
	}

	#[test]
	fn pristine_copy_restores_consumed_items() {
		let pristine = set(&[("fork", "1"), ("so-keepalive", "1"), ("backlog", "2")]);
		let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
		use std::os::fd::AsFd;
		for _ in 0..3 {
			let mut working = pristine.clone();
			assert_eq!(working, pristine);
			working.take_bool(OptCode::Fork);
			working.apply(Phase::Fd, Some(a.as_fd())).unwrap();
			assert_eq!(working.names(), vec!["backlog"]);
		}
		assert_eq!(pristine.len(), 3);
	}

	#[test]
	fn leftovers_warn_or_fail() {
		let mut opts = set(&[("backlog", "1")]);
		let err = opts.clone().finish(true).unwrap_err();
		assert!(matches!(err, OpenError::Option { fault: OptionFault::NotApplied, .. }));
		opts.finish(false).unwrap();
		assert!(opts.is_empty());
	}
}
