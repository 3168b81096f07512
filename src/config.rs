use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::UartError;

/// Widest address/data field we can carry in a `u64`.
pub const MAX_FIELD_WIDTH: usize = 8;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(try_from = "u8")]
pub enum StopBits {
	One,
	Two,
}

impl StopBits {
	pub fn count(self) -> usize {
		match self {
			StopBits::One => 1,
			StopBits::Two => 2,
		}
	}
}

impl Default for StopBits {
	fn default() -> Self {
		StopBits::One
	}
}

impl std::convert::TryFrom<u8> for StopBits {
	type Error = String;

	fn try_from(n: u8) -> Result<Self, Self::Error> {
		match n {
			1 => Ok(StopBits::One),
			2 => Ok(StopBits::Two),
			_ => Err(format!("stop bits must be 1 or 2, not {}", n)),
		}
	}
}

/// What to do with a value that doesn't fit into its frame field.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
	/// keep the low-order bytes (wire behaviour of the reference host)
	Truncate,
	Reject,
}

impl Default for OverflowPolicy {
	fn default() -> Self {
		OverflowPolicy::Truncate
	}
}

/// What to do when fewer response bytes than `data_byte_width` arrive
/// before the read deadline.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortReadPolicy {
	Error,
	/// treat missing high-order bytes as zero
	ZeroPad,
}

impl Default for ShortReadPolicy {
	fn default() -> Self {
		ShortReadPolicy::Error
	}
}

/// Session parameters; fixed once a session is opened.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SessionConfig {
	pub com_port: Option<String>,
	pub baud_rate: u32,
	pub addr_byte_width: usize,
	pub data_byte_width: usize,
	pub stop_bits: StopBits,
	pub read_timeout: Duration,
	pub overflow: OverflowPolicy,
	pub short_read: ShortReadPolicy,
}

impl SessionConfig {
	pub fn new(baud_rate: u32, addr_byte_width: usize, data_byte_width: usize) -> Self {
		SessionConfig {
			com_port: None,
			baud_rate,
			addr_byte_width,
			data_byte_width,
			stop_bits: StopBits::One,
			read_timeout: DEFAULT_READ_TIMEOUT,
			overflow: OverflowPolicy::default(),
			short_read: ShortReadPolicy::default(),
		}
	}

	pub fn validate(&self) -> crate::AResult<()> {
		fn config_error(msg: String) -> crate::AResult<()> {
			Err(UartError::Config(msg).into())
		}

		if self.baud_rate == 0 {
			return config_error("baud_rate must be positive".into());
		}
		// the receiver waits half a bit before sampling
		if 1_000_000_000 / u64::from(self.baud_rate) < 2 {
			return config_error(format!("baud_rate {} too high", self.baud_rate));
		}
		for &(name, width) in &[("addr_byte", self.addr_byte_width), ("data_byte", self.data_byte_width)] {
			if width == 0 || width > MAX_FIELD_WIDTH {
				return config_error(format!("{} must be within 1..={}, not {}", name, MAX_FIELD_WIDTH, width));
			}
		}
		Ok(())
	}

	pub fn from_json_str(s: &str) -> crate::AResult<Self> {
		let file: ConfigFile = serde_json::from_str(s)
			.map_err(|e| UartError::Config(e.to_string()))?;
		let config = file.into_config();
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: &Path) -> crate::AResult<Self> {
		let content = with_context!(("couldn't read config file {}", path.display()), {
			Ok(fs::read_to_string(path)?)
		})?;
		with_context!(("invalid config file {}", path.display()), {
			SessionConfig::from_json_str(&content)
		})
	}

	pub fn com_port(&self) -> crate::AResult<&str> {
		match self.com_port {
			Some(ref p) => Ok(p),
			None => Err(UartError::Config("com_port missing".into()).into()),
		}
	}

	/// Highest value (exclusive) representable in `width` bytes.
	pub fn field_limit(width: usize) -> Option<u64> {
		if width >= MAX_FIELD_WIDTH {
			None
		} else {
			Some(1u64 << (8 * width))
		}
	}
}

// on-disk layout, key names as used by the original tool
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
	com_port: Option<String>,
	baud_rate: u32,
	#[serde(alias = "addr_byte_width")]
	addr_byte: usize,
	#[serde(alias = "data_byte_width")]
	data_byte: usize,
	#[serde(default)]
	stop_bits: StopBits,
	read_timeout_ms: Option<u64>,
	#[serde(default)]
	overflow: OverflowPolicy,
	#[serde(default)]
	short_read: ShortReadPolicy,
}

impl ConfigFile {
	fn into_config(self) -> SessionConfig {
		SessionConfig {
			com_port: self.com_port,
			baud_rate: self.baud_rate,
			addr_byte_width: self.addr_byte,
			data_byte_width: self.data_byte,
			stop_bits: self.stop_bits,
			read_timeout: self.read_timeout_ms.map_or(DEFAULT_READ_TIMEOUT, Duration::from_millis),
			overflow: self.overflow,
			short_read: self.short_read,
		}
	}
}
