/* Server::Player::AckQueue */

/// Fixed-capacity ring of checksums that a player has reported but that
/// have not yet been compared against the other players.
#[derive(Debug)]
pub struct AckQueue
{
	buffer: Box<[u32]>,
	head: usize,
	len: usize,
	received: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

impl AckQueue
{
	pub fn with_capacity(capacity: usize) -> AckQueue
	{
		AckQueue {
			buffer: vec![0; capacity.max(1)].into_boxed_slice(),
			head: 0,
			len: 0,
			received: 0,
		}
	}

	pub fn push(&mut self, checksum: u32) -> Result<(), Overflow>
	{
		if self.len == self.buffer.len()
		{
			return Err(Overflow);
		}
		let index = (self.head + self.len) % self.buffer.len();
		self.buffer[index] = checksum;
		self.len += 1;
		self.received = self.received.wrapping_add(1);
		Ok(())
	}

	/// Counts a checksum without keeping it.
	pub fn skip(&mut self)
	{
		self.received = self.received.wrapping_add(1);
	}

	pub fn pop(&mut self) -> Option<u32>
	{
		if self.len == 0
		{
			return None;
		}
		let checksum = self.buffer[self.head];
		self.head = (self.head + 1) % self.buffer.len();
		self.len -= 1;
		Some(checksum)
	}

	pub fn len(&self) -> usize
	{
		self.len
	}

	pub fn is_empty(&self) -> bool
	{
		self.len == 0
	}

	/// Total number of checksums ever pushed, which is also the tick
	/// that the most recent checksum belongs to.
	pub fn received(&self) -> u32
	{
		self.received
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn test_wraps_around()
	{
		let mut queue = AckQueue::with_capacity(3);
		assert_eq!(queue.pop(), None);
		for round in 0..5u32
		{
			queue.push(round * 10).unwrap();
			queue.push(round * 10 + 1).unwrap();
			assert_eq!(queue.pop(), Some(round * 10));
			assert_eq!(queue.pop(), Some(round * 10 + 1));
		}
		assert!(queue.is_empty());
		assert_eq!(queue.received(), 10);
	}

	#[test]
	fn test_overflow_is_refused()
	{
		let mut queue = AckQueue::with_capacity(2);
		queue.push(1).unwrap();
		queue.push(2).unwrap();
		assert_eq!(queue.push(3), Err(Overflow));
		assert_eq!(queue.len(), 2);
		assert_eq!(queue.received(), 2);
		assert_eq!(queue.pop(), Some(1));
		queue.push(3).unwrap();
		assert_eq!(queue.pop(), Some(2));
		assert_eq!(queue.pop(), Some(3));
	}
}
