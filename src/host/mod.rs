//! Host side of the debug link: executes READ/WRITE/RESET requests one at
//! a time over a [`Transport`].

mod serial;
mod sim;
mod transport;

pub use self::serial::SerialTransport;
pub use self::sim::SimTransport;
pub use self::transport::Transport;

use std::ops::{
	Deref,
	DerefMut,
};

use crate::config::{
	SessionConfig,
	ShortReadPolicy,
};
use crate::error::UartError;
use crate::protocol::CommandFramer;

pub struct HostDriver<T: Transport> {
	transport: T,
	framer: CommandFramer,
	short_read: ShortReadPolicy,
}

impl<T: Transport> HostDriver<T> {
	pub fn new(config: &SessionConfig, transport: T) -> crate::AResult<Self> {
		config.validate()?;
		Ok(HostDriver {
			transport,
			framer: CommandFramer::new(config),
			short_read: config.short_read,
		})
	}

	pub fn framer(&self) -> &CommandFramer {
		&self.framer
	}

	pub fn transport(&self) -> &T {
		&self.transport
	}

	pub fn transport_mut(&mut self) -> &mut T {
		&mut self.transport
	}

	pub fn into_transport(self) -> T {
		self.transport
	}

	pub fn write(&mut self, address: u64, data: u64) -> crate::AResult<()> {
		let frame = self.framer.encode_write(address, data)?;
		debug!("[Write] Address = 0x{:x}, Write data = 0x{:x}", address, data);
		self.transport.send(&frame)
	}

	pub fn read(&mut self, address: u64) -> crate::AResult<u64> {
		let frame = self.framer.encode_read(address)?;
		// a reply arriving after an earlier timeout must not be taken for ours
		self.transport.clear_input()?;
		self.transport.send(&frame)?;

		let expected = self.framer.response_len();
		let response = self.transport.receive(expected)?;
		if response.len() < expected {
			match self.short_read {
				ShortReadPolicy::Error => {
					return Err(UartError::Timeout {
						expected,
						received: response.len(),
					}.into());
				},
				ShortReadPolicy::ZeroPad => {
					warn!("Read 0x{:x}: only {} of {} bytes received, padding with zero", address, response.len(), expected);
				},
			}
		}

		let data = self.framer.decode_data(&response);
		debug!("[Read] Address = 0x{:x}, read data = 0x{:x}", address, data);
		Ok(data)
	}

	pub fn reset(&mut self, assert: bool) -> crate::AResult<()> {
		debug!("[RST] {} the reset", if assert { "Assert" } else { "De-assert" });
		let frame = self.framer.encode_reset(assert);
		self.transport.send(&frame)
	}

	/// Assert reset until the returned guard is released or dropped.
	pub fn hold_reset(&mut self) -> crate::AResult<ResetAsserted<T>> {
		self.reset(true)?;
		Ok(ResetAsserted {
			driver: self,
			armed: true,
		})
	}
}

/// Target held in reset; dropping deasserts it (logging failures).
///
/// Use [`ResetAsserted::release`] to see deassert errors, or
/// [`ResetAsserted::keep_asserted`] to leave the target in reset.
pub struct ResetAsserted<'a, T: Transport + 'a> {
	driver: &'a mut HostDriver<T>,
	armed: bool,
}

impl<'a, T: Transport> ResetAsserted<'a, T> {
	pub fn release(mut self) -> crate::AResult<()> {
		self.armed = false;
		self.driver.reset(false)
	}

	pub fn keep_asserted(mut self) {
		warn!("Leaving target in reset");
		self.armed = false;
	}
}

impl<'a, T: Transport> Drop for ResetAsserted<'a, T> {
	fn drop(&mut self) {
		if self.armed {
			if let Err(e) = self.driver.reset(false) {
				error!("Couldn't deassert reset: {}", e);
			}
		}
	}
}

impl<'a, T: Transport> Deref for ResetAsserted<'a, T> {
	type Target = HostDriver<T>;

	fn deref(&self) -> &Self::Target {
		&self.driver
	}
}

impl<'a, T: Transport> DerefMut for ResetAsserted<'a, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.driver
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use std::collections::VecDeque;

	use crate::protocol::{
		CommandFramer,
		Frame,
		Opcode,
	};

	use super::Transport;

	/// Records the frames sent; answers reads from a queue.
	pub struct RecordingTransport {
		framer: CommandFramer,
		pub frames: Vec<Frame>,
		pub responses: VecDeque<u8>,
		/// fail the n-th (0-based) WRITE frame
		pub fail_write: Option<usize>,
		writes: usize,
	}

	impl RecordingTransport {
		pub fn new(framer: CommandFramer) -> Self {
			RecordingTransport {
				framer,
				frames: Vec::new(),
				responses: VecDeque::new(),
				fail_write: None,
				writes: 0,
			}
		}
	}

	impl Transport for RecordingTransport {
		fn send(&mut self, bytes: &[u8]) -> crate::AResult<()> {
			let frame = match self.framer.decode(bytes)? {
				Some((frame, len)) if len == bytes.len() => frame,
				_ => bail!("not a single frame: {:02x?}", bytes),
			};
			if frame.opcode == Opcode::Write {
				let n = self.writes;
				self.writes += 1;
				if self.fail_write == Some(n) {
					bail!("link down");
				}
			}
			self.frames.push(frame);
			Ok(())
		}

		fn receive(&mut self, count: usize) -> crate::AResult<Vec<u8>> {
			let n = count.min(self.responses.len());
			Ok(self.responses.drain(..n).collect())
		}
	}
}
