//! Process-wide parameters of the address engine.
//!
//! Built once at startup, installed once, then only read. Openers receive a
//! `&XioConfig` explicitly; `global()` exists for hosts that do not want to
//! thread it through themselves.

use std::sync::OnceLock;

use crate::addr::Family;
use crate::error::ConfigError;

static GLOBAL: OnceLock<XioConfig> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XioConfig {
	/// Unapplied options are errors instead of warnings.
	pub strict_opts: bool,
	pub pipe_sep: String,
	pub param_sep: String,
	pub option_sep: String,
	pub ip4_port_sep: char,
	pub ip6_port_sep: char,
	pub log_opt: Option<char>,
	pub syslog_fac: Option<String>,
	/// Family of listeners when none is given: '4' or '6'.
	pub default_ip: char,
	/// Family sorted first in resolver results: '4', '6' or '0' for none.
	pub preferred_ip: char,
	pub experimental: bool,
}

impl Default for XioConfig {
	fn default() -> Self {
		Self {
			strict_opts: false,
			pipe_sep: "!!".into(),
			param_sep: ":".into(),
			option_sep: ",".into(),
			ip4_port_sep: ':',
			ip6_port_sep: ':',
			log_opt: None,
			syslog_fac: None,
			default_ip: '4',
			preferred_ip: '4',
			experimental: false,
		}
	}
}

/// Answer of `XioConfig::inquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
	Bool(bool),
	Char(Option<char>),
	Text(String),
}

impl XioConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn strict_opts(mut self, strict: bool) -> Self {
		self.strict_opts = strict;
		self
	}

	pub fn pipe_sep(mut self, sep: &str) -> Self {
		self.pipe_sep = sep.to_owned();
		self
	}

	pub fn ip4_port_sep(mut self, sep: char) -> Self {
		self.ip4_port_sep = sep;
		self
	}

	pub fn ip6_port_sep(mut self, sep: char) -> Self {
		self.ip6_port_sep = sep;
		self
	}

	pub fn default_ip(mut self, ip: char) -> Self {
		self.default_ip = ip;
		self
	}

	pub fn preferred_ip(mut self, ip: char) -> Self {
		self.preferred_ip = ip;
		self
	}

	pub fn experimental(mut self, enable: bool) -> Self {
		self.experimental = enable;
		self
	}

	/// Sets one parameter by its command-line switch letter.
	///
	/// `s` strict options, `p` pipe separator, `o` IPv4 port separator,
	/// `l` log option, `y` syslog facility.
	pub fn set(&mut self, what: char, arg: &str) -> Result<(), ConfigError> {
		match what {
			's' => self.strict_opts = true,
			'p' => self.pipe_sep = arg.to_owned(),
			'o' => {
				let mut chars = arg.chars();
				match (chars.next(), chars.next()) {
					(Some(c), None) => self.ip4_port_sep = c,
					_ => {
						return Err(ConfigError::BadArgument {
							what,
							arg: arg.to_owned(),
							reason: "port separator must be single character",
						});
					}
				}
			}
			'l' => self.log_opt = arg.chars().next(),
			'y' => self.syslog_fac = Some(arg.to_owned()),
			_ => return Err(ConfigError::UnknownSwitch(what)),
		}
		Ok(())
	}

	/// Reads one parameter by its switch letter.
	pub fn inquire(&self, what: char) -> Result<ConfigValue, ConfigError> {
		match what {
			's' => Ok(ConfigValue::Bool(self.strict_opts)),
			'p' => Ok(ConfigValue::Text(self.pipe_sep.clone())),
			'o' => Ok(ConfigValue::Char(Some(self.ip4_port_sep))),
			'l' => Ok(ConfigValue::Char(self.log_opt)),
			'y' => Ok(ConfigValue::Text(self.syslog_fac.clone().unwrap_or_default())),
			_ => Err(ConfigError::UnknownSwitch(what)),
		}
	}

	/// Family used when an address leaves it open.
	pub fn default_family(&self) -> Family {
		if self.default_ip == '6' { Family::Inet6 } else { Family::Inet }
	}

	pub fn preferred_family(&self) -> Option<Family> {
		match self.preferred_ip {
			'4' => Some(Family::Inet),
			'6' => Some(Family::Inet6),
			_ => None,
		}
	}

	/// Makes `self` the process-wide instance. Only the first call succeeds.
	pub fn install(self) -> Result<&'static XioConfig, ConfigError> {
		let mut fresh = Some(self);
		let installed = GLOBAL.get_or_init(|| fresh.take().unwrap_or_default());
		if fresh.is_some() {
			return Err(ConfigError::AlreadyInstalled);
		}
		Ok(installed)
	}

	/// The installed instance, or the defaults if none was installed.
	pub fn global() -> &'static XioConfig {
		GLOBAL.get_or_init(XioConfig::default)
	}
}
