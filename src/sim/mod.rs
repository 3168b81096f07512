//! Discrete-event verification model of the serial link.
//!
//! Tasks are plain futures driven by [`Simulator`]; they only suspend on
//! line edges, simulated timers and other tasks, which keeps every run
//! deterministic.

mod line;
mod scheduler;
mod target;
mod uart;

pub use self::line::{
	Drive,
	Edge,
	EdgeWait,
	Line,
};

pub use self::scheduler::{
	JoinHandle,
	SimHandle,
	Simulator,
	Timer,
};

pub use self::target::TargetModel;

pub use self::uart::{
	BitTiming,
	UartBfm,
	loopback,
	receive,
	send,
};
