use failure::{
	Context,
	Fail,
};

/// Which frame field a value was meant for
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Field {
	Address,
	Data,
}

impl std::fmt::Display for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Field::Address => write!(f, "address"),
			Field::Data => write!(f, "data"),
		}
	}
}

/// Error kinds callers may want to tell apart.
///
/// Everything else (I/O failures, parse errors) travels as a plain
/// `failure::Error`; use [`error_kind`] to classify an error chain.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum UartError {
	#[fail(display = "invalid session configuration: {}", _0)]
	Config(String),

	/// a stop bit was sampled low
	#[fail(display = "framing error: stop bit {} sampled low at {} ns", stop_bit, at_ns)]
	Framing {
		stop_bit: usize,
		at_ns: u64,
	},

	#[fail(display = "transport timeout: received {} of {} bytes", received, expected)]
	Timeout {
		expected: usize,
		received: usize,
	},

	#[fail(display = "{} 0x{:x} doesn't fit into {} bytes", field, value, width)]
	ValueTooWide {
		field: Field,
		value: u64,
		width: usize,
	},

	#[fail(display = "programming aborted at line {} (address 0x{:x})", line, address)]
	ProgramAbort {
		line: usize,
		address: u64,
	},

	#[fail(display = "unknown command {:?}", _0)]
	UnknownCommand(String),

	#[fail(display = "simulation stalled at {} ns", _0)]
	SimulationStalled(u64),
}

/// Find the first [`UartError`] in the cause chain of `err`, either raised
/// directly or attached as context.
pub fn error_kind(err: &failure::Error) -> Option<&UartError> {
	for cause in err.iter_chain() {
		if let Some(kind) = cause.downcast_ref::<UartError>() {
			return Some(kind);
		}
		if let Some(ctx) = cause.downcast_ref::<Context<UartError>>() {
			return Some(ctx.get_context());
		}
	}
	None
}
