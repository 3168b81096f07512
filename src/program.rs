//! Bulk programming of contiguous target memory from a value list.

use std::fs;
use std::io::{
	BufRead,
	BufReader,
};
use std::path::Path;

use crate::config::SessionConfig;
use crate::error::UartError;
use crate::host::{
	HostDriver,
	Transport,
};

/// How the values of a memory image are written.
///
/// Detected once from the first value: if it consists only of `0`/`1`
/// digits the whole image is binary, otherwise every line is hex (`0x`
/// prefix) or decimal on its own.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueEncoding {
	Binary,
	HexOrDecimal,
}

impl ValueEncoding {
	pub fn detect(first: &str) -> Self {
		let first = first.trim();
		if !first.is_empty() && first.chars().all(|c| c == '0' || c == '1') {
			ValueEncoding::Binary
		} else {
			ValueEncoding::HexOrDecimal
		}
	}

	pub fn parse(self, value: &str) -> crate::AResult<u64> {
		let value = value.trim();
		match self {
			ValueEncoding::Binary => with_context!(("invalid binary value {:?}", value), {
				Ok(u64::from_str_radix(value, 2)?)
			}),
			ValueEncoding::HexOrDecimal => crate::parse_number(value),
		}
	}
}

/// Ordered values to be written to consecutive addresses.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MemoryImage {
	encoding: ValueEncoding,
	values: Vec<u64>,
}

impl MemoryImage {
	/// Parse one value per line; blank lines are skipped.
	pub fn from_lines<I, S>(lines: I) -> crate::AResult<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut encoding = None;
		let mut values = Vec::new();
		for (lineno, line) in lines.into_iter().enumerate() {
			let line = line.as_ref().trim();
			if line.is_empty() {
				continue;
			}
			let enc = *encoding.get_or_insert_with(|| ValueEncoding::detect(line));
			let value = with_context!(("line {}", lineno + 1), enc.parse(line))?;
			values.push(value);
		}
		ensure!(!values.is_empty(), "memory image is empty");
		Ok(MemoryImage {
			encoding: encoding.unwrap_or(ValueEncoding::HexOrDecimal),
			values,
		})
	}

	pub fn from_reader<R: BufRead>(reader: R) -> crate::AResult<Self> {
		let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
		MemoryImage::from_lines(lines)
	}

	pub fn load(path: &Path) -> crate::AResult<Self> {
		with_context!(("couldn't load memory image {}", path.display()), {
			let file = fs::File::open(path)?;
			MemoryImage::from_reader(BufReader::new(file))
		})
	}

	pub fn encoding(&self) -> ValueEncoding {
		self.encoding
	}

	pub fn values(&self) -> &[u64] {
		&self.values
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// (offset index, value) pairs in order
	pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
		self.values.iter().cloned().enumerate()
	}
}

/// Whether a failed programming run leaves the target in reset.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResetOnError {
	Release,
	Hold,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemoryProgrammer {
	stride: u64,
	on_error: ResetOnError,
}

impl MemoryProgrammer {
	/// Addresses advance by `addr_byte_width` per value.
	pub fn new(config: &SessionConfig) -> Self {
		MemoryProgrammer {
			stride: config.addr_byte_width as u64,
			on_error: ResetOnError::Release,
		}
	}

	pub fn with_stride(mut self, stride: u64) -> Self {
		self.stride = stride;
		self
	}

	pub fn on_error(mut self, on_error: ResetOnError) -> Self {
		self.on_error = on_error;
		self
	}

	pub fn stride(&self) -> u64 {
		self.stride
	}

	/// Write `image` to `start`, `start + stride`, ... with the target held
	/// in reset; returns the number of values written.
	///
	/// A failing write aborts with [`UartError::ProgramAbort`] as context;
	/// reset is deasserted on every exit path unless configured with
	/// [`ResetOnError::Hold`].
	pub fn program<T: Transport>(&self, driver: &mut HostDriver<T>, start: u64, image: &MemoryImage) -> crate::AResult<usize> {
		info!("Assert reset");
		let mut held = driver.hold_reset()?;
		info!("Programming {} values starting at address 0x{:x}", image.len(), start);

		for (index, value) in image.iter() {
			let address = (index as u64).checked_mul(self.stride)
				.and_then(|offset| offset.checked_add(start));
			let result = match address {
				Some(address) => held.write(address, value),
				None => Err(format_err!("address overflow at index {}", index)),
			};
			if let Err(e) = result {
				if self.on_error == ResetOnError::Hold {
					held.keep_asserted();
				}
				let abort = UartError::ProgramAbort {
					line: index,
					address: address.unwrap_or(u64::max_value()),
				};
				error!("{}: {}", abort, e);
				return Err(e.context(abort).into());
			}
			trace!("[{}] 0x{:x} <- 0x{:x}", index, address.unwrap_or(0), value);
		}

		info!("De-assert reset");
		held.release()?;
		Ok(image.len())
	}
}

#[cfg(test)]
mod test {
	use std::io::Cursor;

	use super::*;
	use crate::error::error_kind;
	use crate::host::SimTransport;
	use crate::host::testing::RecordingTransport;
	use crate::protocol::{
		CommandFramer,
		Frame,
	};

	fn recording_driver(config: &SessionConfig) -> HostDriver<RecordingTransport> {
		HostDriver::new(config, RecordingTransport::new(CommandFramer::new(config))).unwrap()
	}

	#[test]
	fn encoding_detection() {
		assert_eq!(ValueEncoding::detect("0101"), ValueEncoding::Binary);
		assert_eq!(ValueEncoding::detect("5"), ValueEncoding::HexOrDecimal);
		assert_eq!(ValueEncoding::detect("0x5"), ValueEncoding::HexOrDecimal);
		assert_eq!(ValueEncoding::Binary.parse("0101").unwrap(), 5);
		assert_eq!(ValueEncoding::HexOrDecimal.parse("5").unwrap(), 5);
		assert_eq!(ValueEncoding::HexOrDecimal.parse("0x5").unwrap(), 5);
		assert_eq!(ValueEncoding::HexOrDecimal.parse("0X1f").unwrap(), 0x1f);
		assert!(ValueEncoding::Binary.parse("2").is_err());
	}

	#[test]
	fn first_line_decides() {
		// "10" is binary because the first line is
		let image = MemoryImage::from_lines(&["0001", "10", "11"]).unwrap();
		assert_eq!(image.encoding(), ValueEncoding::Binary);
		assert_eq!(image.values(), &[1, 2, 3]);

		// ... and decimal when it isn't
		let image = MemoryImage::from_lines(&["7", "10", "0x10", "11"]).unwrap();
		assert_eq!(image.encoding(), ValueEncoding::HexOrDecimal);
		assert_eq!(image.values(), &[7, 10, 16, 11]);

		// binary image with a non-binary line fails
		assert!(MemoryImage::from_lines(&["01", "0x5"]).is_err());
		// "1" looks binary too, so "2" is rejected
		assert!(MemoryImage::from_lines(&["1", "2"]).is_err());
	}

	#[test]
	fn image_from_reader() {
		let image = MemoryImage::from_reader(Cursor::new("  0x10\n\n20\r\n0xff  \n")).unwrap();
		assert_eq!(image.values(), &[0x10, 20, 0xff]);
		assert_eq!(image.iter().collect::<Vec<_>>(), vec![(0, 0x10), (1, 20), (2, 0xff)]);
		assert!(MemoryImage::from_reader(Cursor::new("\n \n")).is_err());
		assert!(MemoryImage::from_reader(Cursor::new("12\nzz\n")).is_err());
	}

	#[test]
	fn programming_sequence() {
		let config = SessionConfig::new(115_200, 2, 2);
		let image = MemoryImage::from_lines(&["0001", "0010", "0011"]).unwrap();
		let mut driver = recording_driver(&config);
		let written = MemoryProgrammer::new(&config).program(&mut driver, 0x10, &image).unwrap();
		assert_eq!(written, 3);
		assert_eq!(driver.transport().frames, vec![
			Frame::reset(true),
			Frame::write(0x10, 1),
			Frame::write(0x12, 2),
			Frame::write(0x14, 3),
			Frame::reset(false),
		]);
	}

	#[test]
	fn programming_sequence_on_wire() {
		let config = SessionConfig::new(115_200, 2, 2);
		let image = MemoryImage::from_lines(&["0001", "0010", "0011"]).unwrap();
		let mut driver = HostDriver::new(&config, SimTransport::new(&config).unwrap()).unwrap();
		MemoryProgrammer::new(&config).program(&mut driver, 0x10, &image).unwrap();

		let target = driver.transport().target();
		assert_eq!(target.operations(), vec![
			Frame::reset(true),
			Frame::write(0x10, 1),
			Frame::write(0x12, 2),
			Frame::write(0x14, 3),
			Frame::reset(false),
		]);
		assert!(!target.in_reset());
		assert_eq!(driver.read(0x12).unwrap(), 2);
	}

	#[test]
	fn stride_follows_address_width() {
		let config = SessionConfig::new(115_200, 4, 1);
		let image = MemoryImage::from_lines(&["0x1", "0x2"]).unwrap();

		let mut driver = recording_driver(&config);
		MemoryProgrammer::new(&config).program(&mut driver, 0, &image).unwrap();
		assert_eq!(driver.transport().frames[1..3], [Frame::write(0, 1), Frame::write(4, 2)]);

		let mut driver = recording_driver(&config);
		MemoryProgrammer::new(&config).with_stride(1).program(&mut driver, 0, &image).unwrap();
		assert_eq!(driver.transport().frames[1..3], [Frame::write(0, 1), Frame::write(1, 2)]);
	}

	#[test]
	fn failed_write_releases_reset() {
		let config = SessionConfig::new(115_200, 2, 2);
		let image = MemoryImage::from_lines(&["0x1", "0x2", "0x3"]).unwrap();
		let mut driver = recording_driver(&config);
		driver.transport_mut().fail_write = Some(1);

		let e = MemoryProgrammer::new(&config).program(&mut driver, 0x10, &image).unwrap_err();
		assert_eq!(error_kind(&e), Some(&UartError::ProgramAbort { line: 1, address: 0x12 }));
		assert_eq!(driver.transport().frames, vec![
			Frame::reset(true),
			Frame::write(0x10, 1),
			Frame::reset(false),
		]);
	}

	#[test]
	fn failed_write_can_hold_reset() {
		let config = SessionConfig::new(115_200, 2, 2);
		let image = MemoryImage::from_lines(&["0x1", "0x2", "0x3"]).unwrap();
		let mut driver = recording_driver(&config);
		driver.transport_mut().fail_write = Some(0);

		let programmer = MemoryProgrammer::new(&config).on_error(ResetOnError::Hold);
		let e = programmer.program(&mut driver, 0x10, &image).unwrap_err();
		assert_eq!(error_kind(&e), Some(&UartError::ProgramAbort { line: 0, address: 0x10 }));
		assert_eq!(driver.transport().frames, vec![Frame::reset(true)]);
	}

	#[test]
	fn address_overflow_aborts() {
		let config = SessionConfig::new(115_200, 8, 1);
		let image = MemoryImage::from_lines(&["0x1", "0x2"]).unwrap();
		let mut driver = recording_driver(&config);
		let e = MemoryProgrammer::new(&config).program(&mut driver, u64::max_value(), &image).unwrap_err();
		match error_kind(&e) {
			Some(UartError::ProgramAbort { line: 1, .. }) => (),
			other => panic!("unexpected error {:?}", other),
		}
		assert_eq!(driver.transport().frames.last(), Some(&Frame::reset(false)));
	}
}
