/// Byte pipe to the target.
///
/// Implementations: [`super::SerialTransport`] for a real port,
/// [`super::SimTransport`] for the simulated target.
pub trait Transport {
	/// Transmit all `bytes` in order.
	fn send(&mut self, bytes: &[u8]) -> crate::AResult<()>;

	/// Wait (bounded by the transport's read deadline) for `count` bytes.
	///
	/// On deadline expiry returns what arrived so far, which may be fewer
	/// than `count` bytes (or none at all).
	fn receive(&mut self, count: usize) -> crate::AResult<Vec<u8>>;

	/// Discard input that arrived outside of a request, e.g. the late
	/// reply to a READ that timed out.
	fn clear_input(&mut self) -> crate::AResult<()> {
		Ok(())
	}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
	fn send(&mut self, bytes: &[u8]) -> crate::AResult<()> {
		(**self).send(bytes)
	}

	fn receive(&mut self, count: usize) -> crate::AResult<Vec<u8>> {
		(**self).receive(count)
	}

	fn clear_input(&mut self) -> crate::AResult<()> {
		(**self).clear_input()
	}
}

impl<'a, T: Transport + ?Sized> Transport for &'a mut T {
	fn send(&mut self, bytes: &[u8]) -> crate::AResult<()> {
		(**self).send(bytes)
	}

	fn receive(&mut self, count: usize) -> crate::AResult<Vec<u8>> {
		(**self).receive(count)
	}

	fn clear_input(&mut self) -> crate::AResult<()> {
		(**self).clear_input()
	}
}
