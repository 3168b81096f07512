use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{
	Context,
	Poll,
};

use super::scheduler::{
	SimHandle,
	Wakeup,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Edge {
	Rising,
	Falling,
}

/// A recorded drive of a line; see [`Line::traced`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Drive {
	pub at_ns: u64,
	pub level: bool,
}

struct LineState {
	level: bool,
	waiters: Vec<(Edge, Rc<Wakeup>)>,
	trace: Option<Vec<Drive>>,
}

/// Single-bit signal (one serial wire); idles high.
#[derive(Clone)]
pub struct Line {
	sim: SimHandle,
	state: Rc<RefCell<LineState>>,
}

impl Line {
	pub fn new(sim: &SimHandle) -> Self {
		Line::with_trace(sim, None)
	}

	/// Line that records every drive (also those not changing the level).
	pub fn traced(sim: &SimHandle) -> Self {
		Line::with_trace(sim, Some(Vec::new()))
	}

	fn with_trace(sim: &SimHandle, trace: Option<Vec<Drive>>) -> Self {
		Line {
			sim: sim.clone(),
			state: Rc::new(RefCell::new(LineState {
				level: true,
				waiters: Vec::new(),
				trace,
			})),
		}
	}

	pub fn sim(&self) -> &SimHandle {
		&self.sim
	}

	pub fn level(&self) -> bool {
		self.state.borrow().level
	}

	pub fn drive(&self, level: bool) {
		let fired = {
			let mut state = self.state.borrow_mut();
			if let Some(ref mut trace) = state.trace {
				trace.push(Drive {
					at_ns: self.sim.now(),
					level,
				});
			}
			if state.level == level {
				return;
			}
			state.level = level;
			let edge = if level { Edge::Rising } else { Edge::Falling };
			let (fired, waiting): (Vec<_>, Vec<_>) = state.waiters.drain(..).partition(|(e, _)| *e == edge);
			state.waiters = waiting;
			fired
		};
		for (_, wakeup) in fired {
			wakeup.fire();
		}
	}

	/// Suspend until the next transition in direction `edge`.
	pub fn edge(&self, edge: Edge) -> EdgeWait {
		EdgeWait {
			line: self.clone(),
			edge,
			wakeup: None,
		}
	}

	pub fn falling_edge(&self) -> EdgeWait {
		self.edge(Edge::Falling)
	}

	pub fn rising_edge(&self) -> EdgeWait {
		self.edge(Edge::Rising)
	}

	/// Recorded drives; empty unless created with [`Line::traced`].
	pub fn trace(&self) -> Vec<Drive> {
		self.state.borrow().trace.clone().unwrap_or_default()
	}
}

pub struct EdgeWait {
	line: Line,
	edge: Edge,
	wakeup: Option<Rc<Wakeup>>,
}

impl Future for EdgeWait {
	type Output = ();

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
		let this = &mut *self;
		let wakeup = match this.wakeup {
			Some(ref w) => w.clone(),
			None => {
				let w = Rc::new(Wakeup::default());
				this.line.state.borrow_mut().waiters.push((this.edge, w.clone()));
				this.wakeup = Some(w.clone());
				w
			}
		};
		wakeup.poll(cx)
	}
}
