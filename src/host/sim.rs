use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::sim::{
	BitTiming,
	JoinHandle,
	Line,
	Simulator,
	TargetModel,
	UartBfm,
};

use super::Transport;

#[derive(Default)]
struct RxFifo {
	bytes: VecDeque<u8>,
	error: Option<failure::Error>,
}

/// Transport to a [`TargetModel`] over a pair of simulated serial lines.
///
/// A host receiver task runs continuously (like a UART RX FIFO), so
/// replies starting before the host finished its last stop bit are not
/// lost. The read deadline counts simulated time; if the simulation runs
/// out of events the deadline is considered expired right away.
///
/// Once the target model stopped (e.g. on a framing error) every further
/// operation fails.
pub struct SimTransport {
	sim: Simulator,
	host: UartBfm,
	fifo: Rc<RefCell<RxFifo>>,
	target: TargetModel,
	target_task: JoinHandle<crate::AResult<()>>,
	target_stopped: Option<String>,
	read_timeout_ns: u64,
}

impl SimTransport {
	pub fn new(config: &SessionConfig) -> crate::AResult<Self> {
		SimTransport::with_target(config, TargetModel::new(config))
	}

	pub fn with_target(config: &SessionConfig, target: TargetModel) -> crate::AResult<Self> {
		config.validate()?;
		let sim = Simulator::new();
		let h = sim.handle();
		let timing = BitTiming::from_baud(config.baud_rate);

		let to_target = Line::new(&h);
		let to_host = Line::new(&h);
		let host = UartBfm::new(timing, config.stop_bits, to_target.clone(), to_host.clone());
		let device = UartBfm::new(timing, config.stop_bits, to_host, to_target);

		let target_task = target.spawn(&h, device);

		let fifo = Rc::new(RefCell::new(RxFifo::default()));
		let rx = host.clone();
		let rx_fifo = fifo.clone();
		h.spawn(async move {
			loop {
				match rx.receive().await {
					Ok(byte) => rx_fifo.borrow_mut().bytes.push_back(byte),
					Err(e) => {
						rx_fifo.borrow_mut().error = Some(e);
						break;
					},
				}
			}
		});

		Ok(SimTransport {
			sim,
			host,
			fifo,
			target,
			target_task,
			target_stopped: None,
			read_timeout_ns: config.read_timeout.as_nanos() as u64,
		})
	}

	pub fn target(&self) -> &TargetModel {
		&self.target
	}

	pub fn timing(&self) -> BitTiming {
		self.host.timing
	}

	/// current simulation time in ns
	pub fn now(&self) -> u64 {
		self.sim.now()
	}

	pub fn set_read_timeout(&mut self, timeout: Duration) {
		self.read_timeout_ns = timeout.as_nanos() as u64;
	}

	fn check_target(&mut self) -> crate::AResult<()> {
		if let Some(result) = self.target_task.try_take() {
			let e = match result {
				Ok(()) => format_err!("target exited"),
				Err(e) => e,
			};
			error!("simulated target stopped: {}", e);
			self.target_stopped = Some(e.to_string());
			return Err(e.context("simulated target stopped").into());
		}
		match self.target_stopped {
			Some(ref reason) => bail!("simulated target stopped earlier: {}", reason),
			None => Ok(()),
		}
	}
}

impl Transport for SimTransport {
	fn send(&mut self, bytes: &[u8]) -> crate::AResult<()> {
		let host = self.host.clone();
		let bytes = bytes.to_vec();
		self.sim.block_on(async move {
			host.send_all(&bytes).await;
		})?;
		self.check_target()
	}

	fn receive(&mut self, count: usize) -> crate::AResult<Vec<u8>> {
		let deadline = self.sim.now() + self.read_timeout_ns;
		let fifo = self.fifo.clone();
		self.sim.run_until(|| {
			let fifo = fifo.borrow();
			fifo.bytes.len() >= count || fifo.error.is_some()
		}, Some(deadline));
		self.check_target()?;

		let mut fifo = self.fifo.borrow_mut();
		if let Some(e) = fifo.error.take() {
			return Err(e);
		}
		let n = count.min(fifo.bytes.len());
		Ok(fifo.bytes.drain(..n).collect())
	}

	fn clear_input(&mut self) -> crate::AResult<()> {
		// let a pending reply finish; the host samples its last stop bit
		// before the target stops driving it
		let target = self.target.clone();
		self.sim.run_until(|| !target.is_replying(), None);
		self.check_target()?;

		let mut fifo = self.fifo.borrow_mut();
		if !fifo.bytes.is_empty() {
			debug!("sim: discarding {} stale input bytes", fifo.bytes.len());
			fifo.bytes.clear();
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::config::{
		ShortReadPolicy,
		StopBits,
	};
	use crate::error::{
		UartError,
		error_kind,
	};
	use crate::host::HostDriver;
	use crate::protocol::Frame;

	fn check_roundtrip(aw: usize, dw: usize, stop_bits: StopBits, pairs: &[(u64, u64)]) {
		let mut config = SessionConfig::new(115_200, aw, dw);
		config.stop_bits = stop_bits;
		let mut driver = HostDriver::new(&config, SimTransport::new(&config).unwrap()).unwrap();
		for &(address, data) in pairs {
			driver.write(address, data).unwrap();
			assert_eq!(driver.read(address).unwrap(), data,
				"aw {} dw {}: read back 0x{:x}", aw, dw, address);
		}
		let target = driver.transport().target();
		for &(address, data) in pairs {
			assert_eq!(target.memory_at(address), Some(data));
		}
	}

	#[test]
	fn roundtrip_all_addresses_one_byte() {
		let pairs: Vec<(u64, u64)> = (0..=0xffu64).map(|a| (a, a ^ 0x5a)).collect();
		check_roundtrip(1, 1, StopBits::One, &pairs);
	}

	#[test]
	fn roundtrip_field_limits() {
		check_roundtrip(2, 2, StopBits::One, &[(0, 0), (0xffff, 0xffff), (0x5555, 0x1234), (0x00ff, 0xff00)]);
		check_roundtrip(2, 2, StopBits::Two, &[(0x1234, 0xa5a5), (0x8000, 0x0001)]);
		check_roundtrip(1, 4, StopBits::One, &[(0xff, 0xdead_beef), (0x00, 0xffff_ffff)]);
		check_roundtrip(4, 1, StopBits::Two, &[(0xffff_ffff, 0x7f), (0x8000_0000, 0x80)]);
		check_roundtrip(8, 8, StopBits::One, &[(u64::max_value(), u64::max_value()), (1, 1 << 63)]);
	}

	#[test]
	fn unwritten_memory_reads_zero() {
		let config = SessionConfig::new(115_200, 2, 2);
		let mut driver = HostDriver::new(&config, SimTransport::new(&config).unwrap()).unwrap();
		assert_eq!(driver.read(0x42).unwrap(), 0);
	}

	// target configured with a narrower data field answers short
	fn short_read_setup(policy: ShortReadPolicy) -> HostDriver<SimTransport> {
		let mut config = SessionConfig::new(115_200, 2, 2);
		config.short_read = policy;
		let target = TargetModel::new(&SessionConfig::new(115_200, 2, 1));
		target.preload(0x10, 0xab);
		HostDriver::new(&config, SimTransport::with_target(&config, target).unwrap()).unwrap()
	}

	#[test]
	fn short_read_error() {
		let mut driver = short_read_setup(ShortReadPolicy::Error);
		let e = driver.read(0x10).unwrap_err();
		assert_eq!(error_kind(&e), Some(&UartError::Timeout { expected: 2, received: 1 }));
	}

	#[test]
	fn short_read_zero_pad() {
		let mut driver = short_read_setup(ShortReadPolicy::ZeroPad);
		assert_eq!(driver.read(0x10).unwrap(), 0xab);
	}

	#[test]
	fn sequencing_observed_by_target() {
		let config = SessionConfig::new(115_200, 2, 2);
		let mut driver = HostDriver::new(&config, SimTransport::new(&config).unwrap()).unwrap();
		driver.reset(true).unwrap();
		assert!(driver.transport().target().in_reset());
		driver.write(0x10, 1).unwrap();
		driver.reset(false).unwrap();
		assert!(!driver.transport().target().in_reset());
		assert_eq!(driver.transport().target().operations(), vec![
			Frame::reset(true),
			Frame::write(0x10, 1),
			Frame::reset(false),
		]);
	}

	#[test]
	fn read_takes_wire_time() {
		let config = SessionConfig::new(115_200, 2, 2);
		let mut driver = HostDriver::new(&config, SimTransport::new(&config).unwrap()).unwrap();
		driver.read(0).unwrap();
		let transport = driver.transport();
		let byte_ns = transport.timing().frame_ns(StopBits::One);
		let half_bit = transport.timing().half_interval_ns();
		// 3 request bytes, the reply starts when the target sampled the
		// last stop bit, and the host has its 2 reply bytes after sampling
		// their stop bits
		assert_eq!(transport.now(), 3 * byte_ns - half_bit + 2 * byte_ns - half_bit);
	}

	#[test]
	fn commands_after_read() {
		let config = SessionConfig::new(115_200, 2, 2);
		let mut driver = HostDriver::new(&config, SimTransport::new(&config).unwrap()).unwrap();
		driver.write(0x10, 0x1234).unwrap();
		assert_eq!(driver.read(0x10).unwrap(), 0x1234);
		driver.write(0x12, 0xffff).unwrap();
		assert_eq!(driver.read(0x12).unwrap(), 0xffff);
		driver.reset(true).unwrap();
		assert_eq!(driver.read(0x10).unwrap(), 0x1234);
		assert_eq!(driver.transport().target().operations(), vec![
			Frame::write(0x10, 0x1234),
			Frame::read(0x10),
			Frame::write(0x12, 0xffff),
			Frame::read(0x12),
			Frame::reset(true),
			Frame::read(0x10),
		]);
	}

	#[test]
	fn retry_after_timeout() {
		let mut config = SessionConfig::new(115_200, 2, 2);
		// shorter than the two reply bytes take on the wire
		config.read_timeout = Duration::from_micros(50);
		let target = TargetModel::new(&config);
		target.preload(0x10, 0x1111);
		target.preload(0x20, 0x2222);
		let mut driver = HostDriver::new(&config, SimTransport::with_target(&config, target).unwrap()).unwrap();

		let e = driver.read(0x10).unwrap_err();
		assert_eq!(error_kind(&e), Some(&UartError::Timeout { expected: 2, received: 0 }));

		driver.transport_mut().set_read_timeout(Duration::from_secs(1));
		assert_eq!(driver.read(0x20).unwrap(), 0x2222);
		driver.write(0x30, 3).unwrap();
		assert_eq!(driver.read(0x30).unwrap(), 3);
		assert_eq!(driver.transport().target().operations(), vec![
			Frame::read(0x10),
			Frame::read(0x20),
			Frame::write(0x30, 3),
			Frame::read(0x30),
		]);
	}

	#[test]
	fn stopped_target_keeps_failing() {
		let config = SessionConfig::new(115_200, 2, 2);
		let mut transport = SimTransport::new(&config).unwrap();
		// let the target start listening, then hold its line low for a
		// whole frame: the stop bit is sampled low
		transport.sim.run_for(0);
		transport.host.tx().drive(false);
		transport.sim.run_for(transport.timing().frame_ns(StopBits::One));
		transport.host.tx().drive(true);

		let mut driver = HostDriver::new(&config, transport).unwrap();
		let e = driver.write(0x10, 1).unwrap_err();
		match error_kind(&e) {
			Some(UartError::Framing { stop_bit: 0, .. }) => (),
			other => panic!("unexpected error {:?}", other),
		}
		for _ in 0..2 {
			let e = driver.write(0x12, 2).unwrap_err();
			assert!(e.to_string().contains("simulated target stopped"), "{}", e);
		}
		assert!(driver.reset(false).is_err());
		assert!(driver.read(0x10).is_err());
		assert!(driver.transport().target().operations().is_empty());
	}
}
