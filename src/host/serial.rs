use std::io::{
	self,
	Read,
	Write,
};
use std::time::{
	Duration,
	Instant,
};

use serialport::{
	ClearBuffer,
	DataBits,
	FlowControl,
	Parity,
	SerialPort,
};

use crate::config::{
	SessionConfig,
	StopBits,
};

use super::Transport;

/// Physical serial port (8 data bits, no parity, no flow control).
pub struct SerialTransport {
	name: String,
	port: Box<dyn SerialPort>,
	read_timeout: Duration,
}

impl SerialTransport {
	pub fn open(config: &SessionConfig) -> crate::AResult<Self> {
		config.validate()?;
		let name = config.com_port()?.to_string();
		let stop_bits = match config.stop_bits {
			StopBits::One => serialport::StopBits::One,
			StopBits::Two => serialport::StopBits::Two,
		};
		let port = with_context!(("couldn't open serial port {}", name), {
			Ok(serialport::new(name.as_str(), config.baud_rate)
				.data_bits(DataBits::Eight)
				.parity(Parity::None)
				.stop_bits(stop_bits)
				.flow_control(FlowControl::None)
				.timeout(config.read_timeout)
				.open()?)
		})?;
		info!("Opened {} @ {} baud", name, config.baud_rate);

		Ok(SerialTransport {
			name,
			port,
			read_timeout: config.read_timeout,
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn set_read_timeout(&mut self, timeout: Duration) {
		self.read_timeout = timeout;
	}
}

impl Transport for SerialTransport {
	fn send(&mut self, bytes: &[u8]) -> crate::AResult<()> {
		trace!("{}: tx {:02x?}", self.name, bytes);
		self.port.write_all(bytes)?;
		self.port.flush()?;
		Ok(())
	}

	fn receive(&mut self, count: usize) -> crate::AResult<Vec<u8>> {
		let deadline = Instant::now() + self.read_timeout;
		let mut buf = vec![0u8; count];
		let mut filled = 0;

		while filled < count {
			let now = Instant::now();
			if now >= deadline {
				break;
			}
			self.port.set_timeout(deadline - now)?;
			match self.port.read(&mut buf[filled..]) {
				Ok(0) => break,
				Ok(n) => filled += n,
				Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
				Err(e) => return Err(e.into()),
			}
		}

		buf.truncate(filled);
		trace!("{}: rx {:02x?}", self.name, buf);
		Ok(buf)
	}

	fn clear_input(&mut self) -> crate::AResult<()> {
		let pending = self.port.bytes_to_read()?;
		if pending > 0 {
			debug!("{}: discarding {} stale input bytes", self.name, pending);
		}
		self.port.clear(ClearBuffer::Input)?;
		Ok(())
	}
}
