//! Bit-level model of an asynchronous serial transceiver (8 data bits, no
//! parity, 1 or 2 stop bits, LSB first).

use crate::config::StopBits;
use crate::error::UartError;

use super::line::Line;
use super::scheduler::Simulator;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BitTiming {
	pub interval_ns: u64,
}

impl BitTiming {
	pub fn from_baud(baud_rate: u32) -> Self {
		BitTiming {
			interval_ns: 1_000_000_000 / u64::from(baud_rate),
		}
	}

	// offset from the falling start edge to the first sample point
	pub fn half_interval_ns(&self) -> u64 {
		self.interval_ns / 2
	}

	/// time on the wire for one byte including start and stop bits
	pub fn frame_ns(&self, stop_bits: StopBits) -> u64 {
		(1 + 8 + stop_bits.count() as u64) * self.interval_ns
	}
}

/// Transmit one byte: start bit, 8 data bits LSB first, then `stop_bits`
/// high bits. Takes exactly `timing.frame_ns(stop_bits)`.
pub async fn send(line: &Line, timing: BitTiming, byte: u8, stop_bits: StopBits) {
	let sim = line.sim();
	trace!("uart @{}: send 0x{:02x}", sim.now(), byte);

	line.drive(false);
	sim.timer(timing.interval_ns).await;

	for bit in 0..8 {
		line.drive(0 != (byte >> bit) & 1);
		sim.timer(timing.interval_ns).await;
	}

	for _ in 0..stop_bits.count() {
		line.drive(true);
		sim.timer(timing.interval_ns).await;
	}
}

/// Receive one byte, sampling each bit at its center.
///
/// Fails with [`UartError::Framing`] if a stop bit isn't high; the
/// receiver does not try to resynchronize.
pub async fn receive(line: &Line, timing: BitTiming, stop_bits: StopBits) -> crate::AResult<u8> {
	let sim = line.sim();

	line.falling_edge().await;
	let start = sim.now();
	sim.timer(timing.half_interval_ns()).await;

	let mut data = 0u8;
	for _ in 0..8 {
		sim.timer(timing.interval_ns).await;
		let bit = line.level() as u8;
		data = (data >> 1) | (bit << 7);
	}

	for stop_bit in 0..stop_bits.count() {
		sim.timer(timing.interval_ns).await;
		if !line.level() {
			debug!("uart @{}: stop bit {} low (start edge @{})", sim.now(), stop_bit, start);
			return Err(UartError::Framing {
				stop_bit,
				at_ns: sim.now(),
			}.into());
		}
	}

	trace!("uart @{}: received 0x{:02x}", sim.now(), data);
	Ok(data)
}

/// Bus functional model of one UART endpoint: drives `tx`, samples `rx`.
///
/// For a loop-back setup pass the same line twice.
#[derive(Clone)]
pub struct UartBfm {
	pub timing: BitTiming,
	pub stop_bits: StopBits,
	tx: Line,
	rx: Line,
}

impl UartBfm {
	pub fn new(timing: BitTiming, stop_bits: StopBits, tx: Line, rx: Line) -> Self {
		UartBfm {
			timing,
			stop_bits,
			tx,
			rx,
		}
	}

	pub fn tx(&self) -> &Line {
		&self.tx
	}

	pub fn rx(&self) -> &Line {
		&self.rx
	}

	pub async fn send(&self, byte: u8) {
		send(&self.tx, self.timing, byte, self.stop_bits).await
	}

	pub async fn send_all(&self, bytes: &[u8]) {
		for &b in bytes {
			self.send(b).await;
		}
	}

	pub async fn receive(&self) -> crate::AResult<u8> {
		receive(&self.rx, self.timing, self.stop_bits).await
	}
}

/// Send `values` over a single loop-backed line while concurrently
/// receiving; returns the received bytes and the simulated duration.
pub fn loopback(timing: BitTiming, stop_bits: StopBits, values: &[u8]) -> crate::AResult<(Vec<u8>, u64)> {
	let sim = Simulator::new();
	let line = Line::new(&sim.handle());
	let bfm = UartBfm::new(timing, stop_bits, line.clone(), line);

	// receiver has to be waiting before the first start bit
	let rx = bfm.clone();
	let count = values.len();
	let receiver = sim.spawn(async move {
		let mut received = Vec::with_capacity(count);
		for _ in 0..count {
			received.push(rx.receive().await?);
		}
		Ok::<_, failure::Error>(received)
	});

	let values = values.to_vec();
	sim.block_on(async move {
		bfm.send_all(&values).await;
	})?;
	sim.run_until(|| receiver.is_finished(), None);

	match receiver.try_take() {
		Some(received) => Ok((received?, sim.now())),
		None => Err(UartError::SimulationStalled(sim.now()).into()),
	}
}
