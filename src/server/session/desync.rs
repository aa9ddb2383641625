/* Server::Session::Desync */

use super::lag;

use crate::server::error::Error;
use crate::server::player::Player;

use std::collections::HashMap;
use std::sync;
use std::time::Duration;

use log::*;

struct Member
{
	player: sync::Arc<Player>,
	weight: u32,
	observer: bool,
}

/// What a drained round revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict
{
	/// The listed players disagree with the weighted majority.
	Split
	{
		majority: u32,
		minority: Vec<(u8, u32)>,
	},
	/// No checksum carries a strict majority of the weight.
	Tied
	{
		checksums: Vec<(u8, u32)>,
	},
	/// Players whose missing acks kept another player's queue deeper
	/// than the look-ahead allows, while neither lagging nor stalled.
	Straggling
	{
		players: Vec<u8>,
	},
}

/// Compares the checksums that seated players report after every tick.
#[derive(Default)]
pub struct AckState
{
	members: Vec<Member>,
	/// Players with nothing queued that the next round has to wait for.
	blocking: u64,
	/// Players that lost a vote or straggled and are about to be kicked.
	excluded: u64,
	/// Rounds that went ahead without these players while they lagged;
	/// their acks for those ticks are discarded on arrival.
	owed: HashMap<u8, u32>,
	scratch: Vec<(u8, u32, u32)>,
	lookahead: usize,
}

impl AckState
{
	pub fn begin(
		&mut self,
		seating: Vec<(sync::Arc<Player>, bool)>,
		player_weight: u32,
		observer_weight: u32,
		lookahead: usize,
	)
	{
		self.members = seating
			.into_iter()
			.map(|(player, observer)| Member {
				player,
				weight: if observer
				{
					observer_weight
				}
				else
				{
					player_weight
				},
				observer,
			})
			.collect();
		self.blocking = self.mask();
		self.excluded = 0;
		self.owed.clear();
		self.lookahead = lookahead.max(1);
	}

	fn mask(&self) -> u64
	{
		self.members
			.iter()
			.fold(0, |mask, x| mask | lag::bit(x.player.id))
	}

	/// Seated non-observers.
	pub fn active(&self) -> u64
	{
		self.members
			.iter()
			.filter(|x| !x.observer)
			.fold(0, |mask, x| mask | lag::bit(x.player.id))
	}

	pub fn on_ack(
		&mut self,
		player: &sync::Arc<Player>,
		checksum: u32,
		current_tick: u32,
		laggers: &[lag::Lagger],
		grace: Duration,
	) -> Result<Vec<Verdict>, Error>
	{
		let id = player.id;
		let bit = lag::bit(id);
		if self.excluded & bit != 0
		{
			return Ok(Vec::new());
		}
		if !self.members.iter().any(|x| sync::Arc::ptr_eq(&x.player, player))
		{
			return Err(Error::InvalidPacket);
		}

		{
			let mut queue = player.acks();
			let tick = queue.received().wrapping_add(1);
			if tick > current_tick
			{
				warn!(
					"Player {} acknowledged tick {} before tick {}.",
					id, tick, current_tick
				);
				return Err(Error::InvalidPacket);
			}
			if let Some(owed) = self.owed.get_mut(&id).filter(|x| **x > 0)
			{
				*owed -= 1;
				queue.skip();
				return Ok(Vec::new());
			}
			queue.push(checksum).map_err(|_| Error::InvalidPacket)?;
		}

		self.blocking &= !bit;
		let mut verdicts = self.settle(laggers, grace);

		let depth = player.acks().len();
		if depth > self.lookahead
		{
			let stalled = laggers
				.iter()
				.fold(0, |mask, x| mask | lag::bit(x.player_id));
			let stragglers = self.blocking & !stalled;
			if stragglers != 0
			{
				let players: Vec<u8> = self
					.members
					.iter()
					.map(|x| x.player.id)
					.filter(|&x| stragglers & lag::bit(x) != 0)
					.collect();
				warn!(
					"Player {} is {} ticks ahead of players {:?}.",
					id, depth, players
				);
				self.excluded |= stragglers;
				self.blocking &= !stragglers;
				verdicts.push(Verdict::Straggling { players });
				verdicts.extend(self.settle(laggers, grace));
			}
		}
		Ok(verdicts)
	}

	/// Forgets a player; its pending acks no longer hold anyone up.
	pub fn remove(
		&mut self,
		player_id: u8,
		laggers: &[lag::Lagger],
		grace: Duration,
	) -> Vec<Verdict>
	{
		let bit = lag::bit(player_id);
		let before = self.members.len();
		self.members.retain(|x| x.player.id != player_id);
		self.excluded &= !bit;
		self.blocking &= !bit;
		self.owed.remove(&player_id);
		if self.members.len() == before
		{
			return Vec::new();
		}
		self.settle(laggers, grace)
	}

	/// Drains every round that can be drained now.
	pub fn settle(&mut self, laggers: &[lag::Lagger], grace: Duration)
		-> Vec<Verdict>
	{
		let dropped = lag::droppable(laggers, grace, self.active());
		self.blocking &= !dropped;
		if self.blocking != 0
		{
			return Vec::new();
		}

		let mut verdicts = Vec::new();
		loop
		{
			let mut blocking = 0;
			let mut pending = false;
			for member in self.members.iter()
			{
				let bit = lag::bit(member.player.id);
				if self.excluded & bit != 0
				{
					continue;
				}
				if member.player.acks().is_empty()
				{
					if dropped & bit == 0
					{
						blocking |= bit;
					}
				}
				else
				{
					pending = true;
				}
			}
			if blocking != 0 || !pending
			{
				self.blocking = blocking;
				break;
			}

			self.scratch.clear();
			for member in self.members.iter()
			{
				let id = member.player.id;
				if self.excluded & lag::bit(id) != 0
				{
					continue;
				}
				match member.player.acks().pop()
				{
					Some(checksum) => self.scratch.push((id, checksum, member.weight)),
					None => *self.owed.entry(id).or_insert(0) += 1,
				}
			}
			if let Some(verdict) = self.vote()
			{
				verdicts.push(verdict);
			}
		}
		verdicts
	}

	fn vote(&mut self) -> Option<Verdict>
	{
		let mut tally: Vec<(u32, u64)> = Vec::new();
		for &(_, checksum, weight) in self.scratch.iter()
		{
			match tally.iter_mut().find(|(x, _)| *x == checksum)
			{
				Some((_, total)) => *total += weight as u64,
				None => tally.push((checksum, weight as u64)),
			}
		}
		if tally.len() <= 1
		{
			return None;
		}

		let top = tally.iter().map(|(_, total)| *total).max().unwrap_or(0);
		let leaders: Vec<u32> = tally
			.iter()
			.filter(|(_, total)| *total == top)
			.map(|(checksum, _)| *checksum)
			.collect();
		if leaders.len() > 1
		{
			let checksums = self
				.scratch
				.iter()
				.map(|&(id, checksum, _)| (id, checksum))
				.collect();
			return Some(Verdict::Tied { checksums });
		}

		let majority = leaders[0];
		let minority: Vec<(u8, u32)> = self
			.scratch
			.iter()
			.filter(|(_, checksum, _)| *checksum != majority)
			.map(|&(id, checksum, _)| (id, checksum))
			.collect();
		for &(id, _) in minority.iter()
		{
			self.excluded |= lag::bit(id);
		}
		Some(Verdict::Split { majority, minority })
	}
}
