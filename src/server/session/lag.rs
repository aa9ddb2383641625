/* Server::Session::Lag */

use crate::server::message;

use std::time::Duration;

use vec_drain_where::VecDrainWhereExt;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lagger
{
	pub player_id: u8,
	pub duration: Duration,
	/// Players that may proceed without this one, fixed when it started
	/// lagging: the other occupied non-observer seats.
	pub allowed: u64,
	announced: bool,
}

impl Lagger
{
	pub fn as_message(&self) -> message::Lagger
	{
		let ms = self.duration.as_millis().min(u32::MAX as u128) as u32;
		message::Lagger {
			player_id: self.player_id,
			duration_ms: ms,
		}
	}
}

/// Players that currently stall the session, in the order they started.
#[derive(Debug, Default)]
pub struct Roster
{
	laggers: Vec<Lagger>,
}

impl Roster
{
	pub fn is_empty(&self) -> bool
	{
		self.laggers.is_empty()
	}

	pub fn contains(&self, player_id: u8) -> bool
	{
		self.laggers.iter().any(|x| x.player_id == player_id)
	}

	pub fn add(&mut self, player_id: u8, allowed: u64) -> bool
	{
		if self.contains(player_id)
		{
			return false;
		}
		self.laggers.push(Lagger {
			player_id,
			duration: Duration::from_millis(0),
			allowed: allowed & !bit(player_id),
			announced: false,
		});
		true
	}

	pub fn remove(&mut self, player_id: u8) -> Option<Lagger>
	{
		self.laggers
			.e_drain_where(|x| x.player_id == player_id)
			.next()
	}

	/// Adds the stalled time to every lagger. Returns the full lag screen
	/// if it has to be (re)announced because someone new is on it.
	pub fn accumulate(&mut self, elapsed: Duration)
		-> Option<Vec<message::Lagger>>
	{
		let mut fresh = false;
		for lagger in self.laggers.iter_mut()
		{
			lagger.duration += elapsed;
			if !lagger.announced
			{
				lagger.announced = true;
				fresh = true;
			}
		}
		if fresh
		{
			Some(self.laggers.iter().map(Lagger::as_message).collect())
		}
		else
		{
			None
		}
	}

	/// Everyone past the hard ceiling; failing that, the longest lagger if
	/// it is past the soft ceiling.
	pub fn victims(&self, soft_limit: Duration, hard_limit: Duration)
		-> Vec<u8>
	{
		let hard: Vec<u8> = self
			.laggers
			.iter()
			.filter(|x| x.duration >= hard_limit)
			.map(|x| x.player_id)
			.collect();
		if !hard.is_empty()
		{
			return hard;
		}
		self.laggers
			.iter()
			.max_by_key(|x| x.duration)
			.filter(|x| x.duration >= soft_limit)
			.map(|x| vec![x.player_id])
			.unwrap_or_default()
	}

	pub fn snapshot(&self) -> Vec<Lagger>
	{
		self.laggers.clone()
	}
}

/// Observers whose connection stalled. They never pause the match, but
/// the ack detector stops waiting for them once the grace period is over.
#[derive(Debug, Default)]
pub struct Stalls
{
	since: Vec<(u8, Instant)>,
}

impl Stalls
{
	pub fn add(&mut self, player_id: u8, now: Instant) -> bool
	{
		if self.since.iter().any(|(x, _)| *x == player_id)
		{
			return false;
		}
		self.since.push((player_id, now));
		true
	}

	pub fn remove(&mut self, player_id: u8) -> bool
	{
		self.since
			.e_drain_where(|(x, _)| *x == player_id)
			.next()
			.is_some()
	}

	/// The stalled observers as laggers that nobody has to wait for.
	pub fn snapshot(&self, now: Instant) -> Vec<Lagger>
	{
		self.since
			.iter()
			.map(|&(player_id, since)| Lagger {
				player_id,
				duration: now.saturating_duration_since(since),
				allowed: !0,
				announced: true,
			})
			.collect()
	}
}

/// Laggers past the grace period that every other active player is
/// allowed to leave behind.
pub fn droppable(laggers: &[Lagger], grace: Duration, active: u64) -> u64
{
	laggers
		.iter()
		.filter(|x| x.duration >= grace)
		.filter(|x| active & !bit(x.player_id) & !x.allowed == 0)
		.fold(0, |mask, x| mask | bit(x.player_id))
}

pub fn bit(player_id: u8) -> u64
{
	1u64 << (player_id as u32 % 64)
}
