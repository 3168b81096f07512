use std::cell::{
	Cell,
	RefCell,
};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::SessionConfig;
use crate::protocol::{
	CommandFramer,
	Frame,
	Opcode,
	decode_le,
	encode_le,
};

use super::scheduler::{
	JoinHandle,
	SimHandle,
};
use super::uart::UartBfm;

struct TargetState {
	memory: RefCell<BTreeMap<u64, u64>>,
	operations: RefCell<Vec<Frame>>,
	in_reset: Cell<bool>,
	// READ replies queued or on the wire
	replies_pending: Cell<usize>,
}

/// Target side of the protocol: decodes frames from its UART and serves
/// them from a sparse word memory (unwritten addresses read as zero).
///
/// The receiver keeps listening while a reply is transmitted, like a UART
/// with independent RX and TX; replies go out in request order.
///
/// Clones share state, so a clone kept outside the simulation can inspect
/// what the running model did.
#[derive(Clone)]
pub struct TargetModel {
	framer: CommandFramer,
	state: Rc<TargetState>,
}

impl TargetModel {
	pub fn new(config: &SessionConfig) -> Self {
		TargetModel {
			framer: CommandFramer::new(config),
			state: Rc::new(TargetState {
				memory: RefCell::new(BTreeMap::new()),
				operations: RefCell::new(Vec::new()),
				in_reset: Cell::new(false),
				replies_pending: Cell::new(0),
			}),
		}
	}

	pub fn preload(&self, address: u64, data: u64) {
		self.state.memory.borrow_mut().insert(address, data);
	}

	pub fn memory_at(&self, address: u64) -> Option<u64> {
		self.state.memory.borrow().get(&address).cloned()
	}

	/// every frame served so far, in order
	pub fn operations(&self) -> Vec<Frame> {
		self.state.operations.borrow().clone()
	}

	pub fn in_reset(&self) -> bool {
		self.state.in_reset.get()
	}

	/// whether a READ reply is still queued or being transmitted
	pub fn is_replying(&self) -> bool {
		self.state.replies_pending.get() > 0
	}

	pub fn spawn(&self, sim: &SimHandle, uart: UartBfm) -> JoinHandle<crate::AResult<()>> {
		let target = self.clone();
		sim.spawn(async move { target.serve(uart).await })
	}

	async fn receive_field(&self, uart: &UartBfm, width: usize) -> crate::AResult<u64> {
		let mut bytes = Vec::with_capacity(width);
		for _ in 0..width {
			bytes.push(uart.receive().await?);
		}
		Ok(decode_le(&bytes))
	}

	// queue `response` behind the reply currently on the wire (if any)
	fn reply(&self, uart: &UartBfm, previous: Option<JoinHandle<()>>, response: Vec<u8>) -> JoinHandle<()> {
		let state = self.state.clone();
		let tx = uart.clone();
		state.replies_pending.set(state.replies_pending.get() + 1);
		uart.tx().sim().spawn(async move {
			if let Some(previous) = previous {
				previous.await;
			}
			tx.send_all(&response).await;
			state.replies_pending.set(state.replies_pending.get() - 1);
		})
	}

	async fn serve(self, uart: UartBfm) -> crate::AResult<()> {
		let mut transmitter: Option<JoinHandle<()>> = None;
		loop {
			let byte = uart.receive().await?;
			let opcode = match Opcode::from_byte(byte) {
				Some(op) => op,
				None => {
					warn!("target: ignoring unknown opcode 0x{:02x}", byte);
					continue;
				},
			};

			let frame = match opcode {
				Opcode::Read => {
					let address = self.receive_field(&uart, self.framer.addr_byte_width()).await?;
					let data = self.memory_at(address).unwrap_or(0);
					debug!("target: read 0x{:x} -> 0x{:x}", address, data);
					let response: Vec<u8> = encode_le(data, self.framer.data_byte_width()).collect();
					transmitter = Some(self.reply(&uart, transmitter.take(), response));
					Frame::read(address)
				},
				Opcode::Write => {
					let address = self.receive_field(&uart, self.framer.addr_byte_width()).await?;
					let data = self.receive_field(&uart, self.framer.data_byte_width()).await?;
					debug!("target: write 0x{:x} <- 0x{:x}", address, data);
					self.state.memory.borrow_mut().insert(address, data);
					Frame::write(address, data)
				},
				Opcode::ResetAssert => {
					debug!("target: reset asserted");
					self.state.in_reset.set(true);
					Frame::reset(true)
				},
				Opcode::ResetDeassert => {
					debug!("target: reset deasserted");
					self.state.in_reset.set(false);
					Frame::reset(false)
				},
			};
			self.state.operations.borrow_mut().push(frame);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::config::StopBits;
	use crate::sim::{
		BitTiming,
		Line,
		Simulator,
	};

	#[test]
	fn serve_frames() {
		let config = SessionConfig::new(115_200, 1, 2);
		let framer = CommandFramer::new(&config);
		let timing = BitTiming::from_baud(config.baud_rate);

		let sim = Simulator::new();
		let h = sim.handle();
		let to_target = Line::new(&h);
		let to_host = Line::new(&h);
		let host = UartBfm::new(timing, StopBits::One, to_target.clone(), to_host.clone());
		let device = UartBfm::new(timing, StopBits::One, to_host, to_target);

		let target = TargetModel::new(&config);
		target.preload(0x20, 0xBEEF);
		let _task = target.spawn(&h, device);

		let mut request = framer.encode_reset(true);
		request.extend(framer.encode_write(0x10, 0x1234).unwrap());
		request.extend(framer.encode_read(0x20).unwrap());
		let response = sim.block_on(async move {
			let rx = host.clone();
			let reply = h.spawn(async move {
				let lo = rx.receive().await?;
				let hi = rx.receive().await?;
				Ok::<_, failure::Error>(vec![lo, hi])
			});
			host.send_all(&request).await;
			// half duplex: wait for the reply before the next command
			let response = reply.await?;
			host.send(0x00).await; // garbage opcode, ignored
			host.send(0xFF).await;
			Ok::<_, failure::Error>(response)
		}).unwrap().unwrap();

		assert_eq!(response, vec![0xEF, 0xBE]);
		assert_eq!(target.memory_at(0x10), Some(0x1234));
		assert!(!target.in_reset());
		assert_eq!(target.operations(), vec![
			Frame::reset(true),
			Frame::write(0x10, 0x1234),
			Frame::read(0x20),
			Frame::reset(false),
		]);
	}

	#[test]
	fn receives_while_replying() {
		let config = SessionConfig::new(115_200, 1, 2);
		let framer = CommandFramer::new(&config);
		let timing = BitTiming::from_baud(config.baud_rate);

		let sim = Simulator::new();
		let h = sim.handle();
		let to_target = Line::new(&h);
		let to_host = Line::new(&h);
		let host = UartBfm::new(timing, StopBits::One, to_target.clone(), to_host.clone());
		let device = UartBfm::new(timing, StopBits::One, to_host, to_target);

		let target = TargetModel::new(&config);
		target.preload(0x20, 0xBEEF);
		let _task = target.spawn(&h, device);

		let read = framer.encode_read(0x20).unwrap();
		let write = framer.encode_write(0x21, 0x5A5A).unwrap();
		let observer = target.clone();
		let (response, replying) = sim.block_on(async move {
			let rx = host.clone();
			let reply = h.spawn(async move {
				let lo = rx.receive().await?;
				let hi = rx.receive().await?;
				Ok::<_, failure::Error>(vec![lo, hi])
			});
			host.send_all(&read).await;
			let replying = observer.is_replying();
			// the write goes out while the reply is still on the wire
			host.send_all(&write).await;
			let response = reply.await?;
			Ok::<_, failure::Error>((response, replying))
		}).unwrap().unwrap();

		assert!(replying);
		assert_eq!(response, vec![0xEF, 0xBE]);
		assert_eq!(target.memory_at(0x21), Some(0x5A5A));
		assert_eq!(target.operations(), vec![Frame::read(0x20), Frame::write(0x21, 0x5A5A)]);
		assert!(!target.is_replying());
	}
}
