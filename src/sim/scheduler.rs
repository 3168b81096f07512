use std::cell::{
	Cell,
	RefCell,
};
use std::collections::{
	BTreeMap,
	HashMap,
	VecDeque,
};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{
	Arc,
	Mutex,
};
use std::task::{
	Context,
	Poll,
	Wake,
	Waker,
};

use crate::error::UartError;

type TaskId = u64;
type ReadyQueue = Arc<Mutex<VecDeque<TaskId>>>;

struct TaskWaker {
	id: TaskId,
	ready: ReadyQueue,
}

impl Wake for TaskWaker {
	fn wake(self: Arc<Self>) {
		self.wake_by_ref();
	}

	fn wake_by_ref(self: &Arc<Self>) {
		let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
		ready.push_back(self.id);
	}
}

/// One-shot wakeup shared between a pending future and the event
/// completing it.
#[derive(Default)]
pub(crate) struct Wakeup {
	fired: Cell<bool>,
	waker: RefCell<Option<Waker>>,
}

impl Wakeup {
	pub(crate) fn fire(&self) {
		self.fired.set(true);
		let waker = self.waker.borrow_mut().take();
		if let Some(waker) = waker {
			waker.wake();
		}
	}

	pub(crate) fn poll(&self, cx: &mut Context) -> Poll<()> {
		if self.fired.get() {
			Poll::Ready(())
		} else {
			*self.waker.borrow_mut() = Some(cx.waker().clone());
			Poll::Pending
		}
	}
}

struct Task {
	future: Pin<Box<dyn Future<Output = ()>>>,
	waker: Waker,
}

struct Core {
	now: Cell<u64>,
	next_seq: Cell<u64>,
	next_task: Cell<TaskId>,
	// (wake time, insertion order) keeps equal-time wakeups FIFO
	timers: RefCell<BTreeMap<(u64, u64), Rc<Wakeup>>>,
	tasks: RefCell<HashMap<TaskId, Task>>,
	ready: ReadyQueue,
}

/// Cheap handle to the simulator for use inside tasks.
#[derive(Clone)]
pub struct SimHandle(Rc<Core>);

impl SimHandle {
	/// current simulation time in ns
	pub fn now(&self) -> u64 {
		self.0.now.get()
	}

	/// Suspend for `ns` nanoseconds of simulated time.
	pub fn timer(&self, ns: u64) -> Timer {
		Timer {
			sim: self.clone(),
			duration: ns,
			wakeup: None,
		}
	}

	pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
	where
		F: Future<Output = T> + 'static,
		T: 'static,
	{
		let slot = Rc::new(JoinSlot {
			value: RefCell::new(None),
			waker: RefCell::new(None),
		});
		let task_slot = slot.clone();
		let id = self.0.next_task.get();
		self.0.next_task.set(id + 1);

		let waker = Waker::from(Arc::new(TaskWaker {
			id,
			ready: self.0.ready.clone(),
		}));
		let task = Task {
			future: Box::pin(async move {
				let value = future.await;
				*task_slot.value.borrow_mut() = Some(value);
				let waker = task_slot.waker.borrow_mut().take();
				if let Some(waker) = waker {
					waker.wake();
				}
			}),
			waker: waker.clone(),
		};
		trace!("sim @{}: spawn task {}", self.now(), id);
		self.0.tasks.borrow_mut().insert(id, task);
		waker.wake();

		JoinHandle { slot }
	}

	fn schedule(&self, at: u64, wakeup: Rc<Wakeup>) {
		let seq = self.0.next_seq.get();
		self.0.next_seq.set(seq + 1);
		self.0.timers.borrow_mut().insert((at, seq), wakeup);
	}
}

pub struct Timer {
	sim: SimHandle,
	duration: u64,
	wakeup: Option<Rc<Wakeup>>,
}

impl Future for Timer {
	type Output = ();

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
		let this = &mut *self;
		let wakeup = match this.wakeup {
			Some(ref w) => w.clone(),
			None => {
				if this.duration == 0 {
					return Poll::Ready(());
				}
				let w = Rc::new(Wakeup::default());
				this.sim.schedule(this.sim.now() + this.duration, w.clone());
				this.wakeup = Some(w.clone());
				w
			}
		};
		wakeup.poll(cx)
	}
}

struct JoinSlot<T> {
	value: RefCell<Option<T>>,
	waker: RefCell<Option<Waker>>,
}

/// Result of a spawned task; can be awaited from another task or
/// inspected from outside the simulation.
pub struct JoinHandle<T> {
	slot: Rc<JoinSlot<T>>,
}

impl<T> JoinHandle<T> {
	pub fn is_finished(&self) -> bool {
		self.slot.value.borrow().is_some()
	}

	pub fn try_take(&self) -> Option<T> {
		self.slot.value.borrow_mut().take()
	}
}

impl<T> Future for JoinHandle<T> {
	type Output = T;

	fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<T> {
		match self.slot.value.borrow_mut().take() {
			Some(value) => Poll::Ready(value),
			None => {
				*self.slot.waker.borrow_mut() = Some(cx.waker().clone());
				Poll::Pending
			}
		}
	}
}

/// Single-threaded discrete-event scheduler.
///
/// Tasks only suspend on simulated timers, line edges or other tasks;
/// time jumps straight to the next pending timer once every task is
/// blocked, so runs are deterministic and independent of wall clock.
pub struct Simulator {
	handle: SimHandle,
}

impl Simulator {
	pub fn new() -> Self {
		Simulator {
			handle: SimHandle(Rc::new(Core {
				now: Cell::new(0),
				next_seq: Cell::new(0),
				next_task: Cell::new(0),
				timers: RefCell::new(BTreeMap::new()),
				tasks: RefCell::new(HashMap::new()),
				ready: Arc::new(Mutex::new(VecDeque::new())),
			})),
		}
	}

	pub fn handle(&self) -> SimHandle {
		self.handle.clone()
	}

	pub fn now(&self) -> u64 {
		self.handle.now()
	}

	pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
	where
		F: Future<Output = T> + 'static,
		T: 'static,
	{
		self.handle.spawn(future)
	}

	fn next_ready(&self) -> Option<TaskId> {
		let mut ready = self.handle.0.ready.lock().unwrap_or_else(|e| e.into_inner());
		ready.pop_front()
	}

	// poll tasks until none is runnable at the current time
	fn poll_ready(&self) {
		while let Some(id) = self.next_ready() {
			// take the task out while polling so it can spawn new tasks
			let task = self.handle.0.tasks.borrow_mut().remove(&id);
			let mut task = match task {
				Some(t) => t,
				None => continue, // already finished
			};
			let waker = task.waker.clone();
			let mut cx = Context::from_waker(&waker);
			match task.future.as_mut().poll(&mut cx) {
				Poll::Ready(()) => trace!("sim @{}: task {} finished", self.now(), id),
				Poll::Pending => {
					self.handle.0.tasks.borrow_mut().insert(id, task);
				},
			}
		}
	}

	// fire all timers of the next pending time step, unless that is
	// beyond `deadline`; returns false if nothing was fired
	fn advance(&self, deadline: Option<u64>) -> bool {
		let core = &self.handle.0;
		let at = match core.timers.borrow().keys().next() {
			None => return false,
			Some(&(at, _)) => at,
		};
		if deadline.map_or(false, |d| at > d) {
			return false;
		}
		core.now.set(at);
		loop {
			let wakeup = {
				let mut timers = core.timers.borrow_mut();
				let key = match timers.keys().next() {
					Some(&key) if key.0 == at => key,
					_ => break,
				};
				timers.remove(&key)
			};
			if let Some(wakeup) = wakeup {
				wakeup.fire();
			}
		}
		true
	}

	/// Run until `done` returns true, simulated time would pass
	/// `deadline`, or no further events are pending.
	///
	/// Returns whether `done` was reached. When stopping at (or stalling
	/// before) a deadline, the clock is moved forward to the deadline.
	pub fn run_until<F>(&self, mut done: F, deadline: Option<u64>) -> bool
	where
		F: FnMut() -> bool,
	{
		loop {
			self.poll_ready();
			if done() {
				return true;
			}
			if !self.advance(deadline) {
				if let Some(d) = deadline {
					if d > self.now() {
						self.handle.0.now.set(d);
					}
				}
				return false;
			}
		}
	}

	/// Advance simulated time by `ns`, running everything that happens
	/// in between.
	pub fn run_for(&self, ns: u64) {
		let deadline = self.now() + ns;
		self.run_until(|| false, Some(deadline));
	}

	/// Run `future` as a task to completion.
	pub fn block_on<F, T>(&self, future: F) -> crate::AResult<T>
	where
		F: Future<Output = T> + 'static,
		T: 'static,
	{
		let handle = self.spawn(future);
		self.run_until(|| handle.is_finished(), None);
		match handle.try_take() {
			Some(value) => Ok(value),
			None => Err(UartError::SimulationStalled(self.now()).into()),
		}
	}
}

impl Default for Simulator {
	fn default() -> Self {
		Simulator::new()
	}
}

impl Drop for Simulator {
	fn drop(&mut self) {
		// pending tasks hold handles to the core; break the cycle
		let tasks = std::mem::replace(&mut *self.handle.0.tasks.borrow_mut(), HashMap::new());
		drop(tasks);
		let timers = std::mem::replace(&mut *self.handle.0.timers.borrow_mut(), BTreeMap::new());
		drop(timers);
	}
}
