//! Command frames exchanged with the target.
//!
//! Wire format (all fields little-endian, i.e. least significant byte
//! first):
//! - `0x01` READ, `addr_byte_width` address bytes; the target replies with
//!   `data_byte_width` data bytes
//! - `0x02` WRITE, `addr_byte_width` address bytes, `data_byte_width` data
//!   bytes; no reply
//! - `0xFE` RESET_ASSERT, no payload
//! - `0xFF` RESET_DEASSERT, no payload

use std::fmt;

use crate::config::{
	OverflowPolicy,
	SessionConfig,
};
use crate::error::{
	Field,
	UartError,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Opcode {
	Read,
	Write,
	ResetAssert,
	ResetDeassert,
}

impl Opcode {
	pub fn byte(self) -> u8 {
		match self {
			Opcode::Read => 0x01,
			Opcode::Write => 0x02,
			Opcode::ResetAssert => 0xFE,
			Opcode::ResetDeassert => 0xFF,
		}
	}

	pub fn from_byte(byte: u8) -> Option<Self> {
		match byte {
			0x01 => Some(Opcode::Read),
			0x02 => Some(Opcode::Write),
			0xFE => Some(Opcode::ResetAssert),
			0xFF => Some(Opcode::ResetDeassert),
			_ => None,
		}
	}

	pub fn has_address(self) -> bool {
		match self {
			Opcode::Read | Opcode::Write => true,
			Opcode::ResetAssert | Opcode::ResetDeassert => false,
		}
	}
}

impl fmt::Display for Opcode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Opcode::Read => "READ",
			Opcode::Write => "WRITE",
			Opcode::ResetAssert => "RESET_ASSERT",
			Opcode::ResetDeassert => "RESET_DEASSERT",
		};
		f.write_str(name)
	}
}

/// One logical operation; reset frames carry address 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Frame {
	pub opcode: Opcode,
	pub address: u64,
	pub data: Option<u64>,
}

impl Frame {
	pub fn read(address: u64) -> Self {
		Frame {
			opcode: Opcode::Read,
			address,
			data: None,
		}
	}

	pub fn write(address: u64, data: u64) -> Self {
		Frame {
			opcode: Opcode::Write,
			address,
			data: Some(data),
		}
	}

	pub fn reset(assert: bool) -> Self {
		Frame {
			opcode: if assert { Opcode::ResetAssert } else { Opcode::ResetDeassert },
			address: 0,
			data: None,
		}
	}
}

impl fmt::Display for Frame {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.opcode)?;
		if self.opcode.has_address() {
			write!(f, "(0x{:x}", self.address)?;
			if let Some(data) = self.data {
				write!(f, ", 0x{:x}", data)?;
			}
			write!(f, ")")?;
		}
		Ok(())
	}
}

/// `width` low-order bytes of `value`, least significant first.
pub fn encode_le(value: u64, width: usize) -> impl Iterator<Item = u8> {
	(0..width).map(move |i| if i < 8 { (value >> (8 * i)) as u8 } else { 0 })
}

/// Little-endian reassembly; at most 8 bytes are significant.
pub fn decode_le(bytes: &[u8]) -> u64 {
	bytes.iter()
		.take(8)
		.enumerate()
		.fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i)))
}

/// Stateless frame encoder/decoder for one session's field widths.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CommandFramer {
	addr_byte_width: usize,
	data_byte_width: usize,
	overflow: OverflowPolicy,
}

impl CommandFramer {
	pub fn new(config: &SessionConfig) -> Self {
		CommandFramer {
			addr_byte_width: config.addr_byte_width,
			data_byte_width: config.data_byte_width,
			overflow: config.overflow,
		}
	}

	pub fn addr_byte_width(&self) -> usize {
		self.addr_byte_width
	}

	pub fn data_byte_width(&self) -> usize {
		self.data_byte_width
	}

	/// number of bytes the target answers a READ with
	pub fn response_len(&self) -> usize {
		self.data_byte_width
	}

	fn push_field(&self, out: &mut Vec<u8>, field: Field, value: u64, width: usize) -> crate::AResult<()> {
		if let Some(limit) = SessionConfig::field_limit(width) {
			if value >= limit {
				match self.overflow {
					OverflowPolicy::Reject => {
						return Err(UartError::ValueTooWide { field, value, width }.into());
					},
					OverflowPolicy::Truncate => {
						debug!("{} 0x{:x} truncated to {} bytes", field, value, width);
					},
				}
			}
		}
		out.extend(encode_le(value, width));
		Ok(())
	}

	pub fn encode_write(&self, address: u64, data: u64) -> crate::AResult<Vec<u8>> {
		let mut out = Vec::with_capacity(1 + self.addr_byte_width + self.data_byte_width);
		out.push(Opcode::Write.byte());
		self.push_field(&mut out, Field::Address, address, self.addr_byte_width)?;
		self.push_field(&mut out, Field::Data, data, self.data_byte_width)?;
		Ok(out)
	}

	pub fn encode_read(&self, address: u64) -> crate::AResult<Vec<u8>> {
		let mut out = Vec::with_capacity(1 + self.addr_byte_width);
		out.push(Opcode::Read.byte());
		self.push_field(&mut out, Field::Address, address, self.addr_byte_width)?;
		Ok(out)
	}

	pub fn encode_reset(&self, assert: bool) -> Vec<u8> {
		vec![Frame::reset(assert).opcode.byte()]
	}

	pub fn encode(&self, frame: &Frame) -> crate::AResult<Vec<u8>> {
		match frame.opcode {
			Opcode::Read => self.encode_read(frame.address),
			Opcode::Write => self.encode_write(frame.address, frame.data.unwrap_or(0)),
			Opcode::ResetAssert => Ok(self.encode_reset(true)),
			Opcode::ResetDeassert => Ok(self.encode_reset(false)),
		}
	}

	/// Decode a READ response.
	///
	/// Missing high-order bytes (short read) count as zero; bytes beyond
	/// `data_byte_width` are ignored.
	pub fn decode_data(&self, bytes: &[u8]) -> u64 {
		let n = bytes.len().min(self.data_byte_width);
		decode_le(&bytes[..n])
	}

	/// Parse the host→target frame at the start of `bytes`.
	///
	/// Returns the frame and the number of bytes it used, or `None` if
	/// `bytes` doesn't hold a complete frame yet.
	pub fn decode(&self, bytes: &[u8]) -> crate::AResult<Option<(Frame, usize)>> {
		let opcode = match bytes.first() {
			None => return Ok(None),
			Some(&b) => match Opcode::from_byte(b) {
				Some(op) => op,
				None => bail!("invalid opcode 0x{:02x}", b),
			},
		};

		let aw = self.addr_byte_width;
		let dw = self.data_byte_width;
		let len = match opcode {
			Opcode::Read => 1 + aw,
			Opcode::Write => 1 + aw + dw,
			Opcode::ResetAssert | Opcode::ResetDeassert => 1,
		};
		if bytes.len() < len {
			return Ok(None);
		}

		let frame = match opcode {
			Opcode::Read => Frame::read(decode_le(&bytes[1..1 + aw])),
			Opcode::Write => Frame::write(decode_le(&bytes[1..1 + aw]), decode_le(&bytes[1 + aw..len])),
			Opcode::ResetAssert => Frame::reset(true),
			Opcode::ResetDeassert => Frame::reset(false),
		};
		Ok(Some((frame, len)))
	}
}
