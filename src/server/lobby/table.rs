/* Server::Lobby::Table */

use crate::server::error::Error;
use crate::server::slot::*;

use enumset::EnumSet;

use rand::seq::SliceRandom;
use rand::Rng;

/// The slot array of a lobby together with the assignment rules of its
/// layout. Every mutation either succeeds or leaves the table untouched.
#[derive(Debug, Clone)]
pub struct Table
{
	template: Vec<Slot>,
	slots: Vec<Slot>,
	flags: EnumSet<LayoutFlag>,
	num_colors: u8,
	observer_team: Option<u8>,
	max_players: usize,
	locked: bool,
}

impl Table
{
	/// Fails with `InvalidArgument` if a template slot holds a human, a
	/// color or team outside the color set (other than the observer team)
	/// or a handicap above the maximum.
	pub fn new(layout: &Layout, encoding: Encoding) -> Result<Table, Error>
	{
		let num_colors = encoding.num_colors();
		let observer_team = if layout.observers
		{
			Some(num_colors)
		}
		else
		{
			None
		};
		for slot in layout.slots.iter()
		{
			let team_known =
				slot.team < num_colors || Some(slot.team) == observer_team;
			if !team_known
				|| slot.color >= num_colors
				|| slot.handicap > MAX_HANDICAP
				|| slot.is_human()
			{
				return Err(Error::InvalidArgument);
			}
		}
		let capacity = layout.slots.len().min(num_colors as usize);
		let max_players = if layout.max_players > 0
		{
			capacity.min(layout.max_players as usize)
		}
		else
		{
			capacity
		};
		Ok(Table {
			template: layout.slots.clone(),
			slots: layout.slots.clone(),
			flags: layout.flags,
			num_colors,
			observer_team,
			max_players,
			locked: false,
		})
	}

	pub fn slots(&self) -> &[Slot]
	{
		&self.slots
	}

	pub fn template(&self) -> &[Slot]
	{
		&self.template
	}

	pub fn observer_team(&self) -> Option<u8>
	{
		self.observer_team
	}

	pub fn is_locked(&self) -> bool
	{
		self.locked
	}

	pub fn lock(&mut self)
	{
		self.locked = true;
	}

	pub fn unlock(&mut self)
	{
		self.locked = false;
	}

	pub fn is_observer(&self, slot: &Slot) -> bool
	{
		Some(slot.team) == self.observer_team
	}

	fn is_player(&self, slot: &Slot) -> bool
	{
		slot.is_occupied() && !self.is_observer(slot)
	}

	fn custom_forces(&self) -> bool
	{
		self.flags.contains(LayoutFlag::CustomForces)
	}

	fn fixed_player_settings(&self) -> bool
	{
		self.flags.contains(LayoutFlag::FixedPlayerSettings)
	}

	/// Occupied non-observer slots, computers included.
	pub fn count_players(&self) -> usize
	{
		self.slots.iter().filter(|x| self.is_player(x)).count()
	}

	/// Occupied and closed slots.
	pub fn slots_used(&self) -> usize
	{
		self.slots
			.iter()
			.filter(|x| x.status != SlotStatus::Open)
			.count()
	}

	pub fn slots_available(&self) -> usize
	{
		self.slots.len() - self.slots_used()
	}

	pub fn find_player(&self, player_id: u8) -> Option<usize>
	{
		if player_id == NO_PLAYER
		{
			return None;
		}
		self.slots
			.iter()
			.position(|x| x.is_human() && x.player_id == player_id)
	}

	/// Claims a slot for a newcomer, returning its index and player id.
	pub fn join(&mut self) -> Result<(usize, u8), Error>
	{
		self.check_unlocked()?;
		let player_id = self.free_player_id().ok_or(Error::Full)?;

		let has_room = self.count_players() < self.max_players;
		let candidates: Vec<usize> = (0..self.slots.len())
			.filter(|&i| self.slots[i].status == SlotStatus::Open)
			.collect();
		if candidates.is_empty()
		{
			return Err(Error::Full);
		}

		let pick = if self.custom_forces()
		{
			candidates.iter().copied().find(|&i| {
				has_room || self.is_observer(&self.template[i])
			})
		}
		else if has_room
		{
			candidates.first().copied()
		}
		else
		{
			self.observer_team.and(candidates.first().copied())
		};
		let index = pick.ok_or(Error::Full)?;
		let observer = if self.custom_forces()
		{
			self.is_observer(&self.template[index])
		}
		else
		{
			!has_room
		};

		self.transact(|table| {
			let mut slot = table.template[index];
			slot.status = SlotStatus::Occupied;
			slot.player_id = player_id;
			slot.computer = false;
			slot.download_status = DOWNLOAD_UNKNOWN;
			if !table.custom_forces()
			{
				slot.team = match table.observer_team
				{
					Some(team) if observer => team,
					_ => table.free_team(index).ok_or(Error::Full)?,
				};
			}
			if !table.fixed_player_settings() && !observer
			{
				slot.color = table.free_color(index).ok_or(Error::Full)?;
			}
			table.slots[index] = slot;
			Ok(())
		})?;
		Ok((index, player_id))
	}

	/// Reverts the slot of a departing human to its template.
	pub fn leave(&mut self, player_id: u8) -> Option<usize>
	{
		let index = self.find_player(player_id)?;
		self.slots[index] = self.template[index];
		Some(index)
	}

	/// Opens a slot, returning the id of a human that had to be evicted.
	pub fn open(&mut self, index: usize, kick: bool)
		-> Result<Option<u8>, Error>
	{
		self.reset(index, SlotStatus::Open, kick)
	}

	/// Closes a slot, returning the id of a human that had to be evicted.
	pub fn close(&mut self, index: usize, kick: bool)
		-> Result<Option<u8>, Error>
	{
		self.reset(index, SlotStatus::Closed, kick)
	}

	fn reset(
		&mut self,
		index: usize,
		status: SlotStatus,
		kick: bool,
	) -> Result<Option<u8>, Error>
	{
		self.check_unlocked()?;
		self.check_index(index)?;
		let current = self.slots[index];
		let evicted = if current.is_human()
		{
			if !kick
			{
				return Err(Error::SlotOccupied);
			}
			Some(current.player_id)
		}
		else
		{
			None
		};
		let mut slot = self.template[index];
		slot.status = status;
		slot.player_id = NO_PLAYER;
		slot.computer = false;
		slot.download_status = DOWNLOAD_UNKNOWN;
		self.slots[index] = slot;
		Ok(evicted)
	}

	pub fn swap(&mut self, a: usize, b: usize) -> Result<(), Error>
	{
		self.check_unlocked()?;
		self.check_index(a)?;
		self.check_index(b)?;
		if a == b
		{
			return Ok(());
		}
		let pin_team = self.custom_forces();
		self.transact(|table| {
			let (x, y) = (table.slots[a], table.slots[b]);
			table.slots[a] = table.carry(&y, &x, pin_team);
			table.slots[b] = table.carry(&x, &y, pin_team);
			table.fix_color(a)?;
			table.fix_color(b)
		})
	}

	/// Randomly permutes the occupants of the non-observer, non-closed
	/// slots. With custom forces, teams stay with the slots and the
	/// occupants either stay within their team or, with `shuffle_teams`,
	/// move across teams.
	pub fn shuffle<R>(&mut self, shuffle_teams: bool, rng: &mut R)
		-> Result<(), Error>
	where
		R: Rng + ?Sized,
	{
		self.check_unlocked()?;
		let candidates: Vec<usize> = (0..self.slots.len())
			.filter(|&i| self.slots[i].status != SlotStatus::Closed)
			.filter(|&i| !self.is_observer(&self.template[i]))
			.filter(|&i| !self.is_observer(&self.slots[i]))
			.collect();
		let mut groups: Vec<Vec<usize>> = Vec::new();
		if self.custom_forces() && !shuffle_teams
		{
			for &i in &candidates
			{
				let team = self.template[i].team;
				match groups
					.iter()
					.position(|group| self.template[group[0]].team == team)
				{
					Some(g) => groups[g].push(i),
					None => groups.push(vec![i]),
				}
			}
		}
		else
		{
			groups.push(candidates);
		}

		let pin_team = self.custom_forces();
		self.transact(|table| {
			for group in groups
			{
				let mut occupants: Vec<Slot> =
					group.iter().map(|&i| table.slots[i]).collect();
				occupants.shuffle(rng);
				for (&i, occupant) in group.iter().zip(occupants.iter())
				{
					table.slots[i] = table.carry(occupant, &table.slots[i], pin_team);
				}
			}
			Ok(())
		})
	}

	pub fn change_team(&mut self, index: usize, team: u8) -> Result<(), Error>
	{
		self.check_unlocked()?;
		self.check_occupied(index)?;
		if team >= self.num_colors && Some(team) != self.observer_team
		{
			return Err(Error::InvalidArgument);
		}
		if self.slots[index].team == team
		{
			return Ok(());
		}

		if self.custom_forces()
		{
			// Teams belong to slots, so changing team means changing slot.
			let target = (0..self.slots.len())
				.find(|&i| {
					self.slots[i].status == SlotStatus::Open
						&& self.template[i].team == team
				})
				.ok_or(Error::Full)?;
			return self.transact(|table| {
				let moved = table.carry(&table.slots[index], &table.slots[target], true);
				table.slots[target] = moved;
				table.slots[index] = table.template[index];
				table.fix_color(target)
			});
		}

		self.transact(|table| {
			table.slots[index].team = team;
			table.fix_color(index)
		})
	}

	pub fn change_color(&mut self, index: usize, color: u8)
		-> Result<(), Error>
	{
		self.check_unlocked()?;
		self.check_occupied(index)?;
		if self.fixed_player_settings() || color >= self.num_colors
		{
			return Err(Error::InvalidArgument);
		}
		if self.slots[index].color == color
		{
			return Ok(());
		}
		if self.is_player(&self.slots[index]) && self.color_taken(color, index)
		{
			return Err(Error::ColorOccupied);
		}
		self.slots[index].color = color;
		Ok(())
	}

	/// Accepts a race byte as sent by a client: exactly one playable race,
	/// optionally with the selectable flag.
	pub fn change_race(&mut self, index: usize, race: u8) -> Result<(), Error>
	{
		self.check_unlocked()?;
		self.check_occupied(index)?;
		if self.fixed_player_settings()
			|| !self.slots[index].race.contains(Race::Selectable)
		{
			return Err(Error::InvalidArgument);
		}
		let requested =
			EnumSet::<Race>::try_from_u8(race).ok_or(Error::InvalidArgument)?;
		let chosen = requested & Race::playable();
		if chosen.len() != 1
		{
			return Err(Error::InvalidArgument);
		}
		self.slots[index].race = chosen | Race::Selectable;
		Ok(())
	}

	pub fn change_handicap(&mut self, index: usize, handicap: u8)
		-> Result<(), Error>
	{
		self.check_unlocked()?;
		self.check_occupied(index)?;
		if self.fixed_player_settings() || handicap > MAX_HANDICAP
		{
			return Err(Error::InvalidArgument);
		}
		self.slots[index].handicap = handicap;
		Ok(())
	}

	/// Puts a computer in a slot or changes its difficulty.
	pub fn change_computer(&mut self, index: usize, difficulty: Difficulty)
		-> Result<(), Error>
	{
		self.check_unlocked()?;
		self.check_index(index)?;
		let current = self.slots[index];
		if current.is_human()
		{
			return Err(Error::SlotOccupied);
		}
		if current.computer && current.is_occupied()
		{
			self.slots[index].computer_type = difficulty;
			return Ok(());
		}
		if self.is_observer(&self.template[index])
		{
			return Err(Error::InvalidSlot);
		}

		self.transact(|table| {
			let mut slot = table.template[index];
			slot.status = SlotStatus::Occupied;
			slot.player_id = NO_PLAYER;
			slot.computer = true;
			slot.computer_type = difficulty;
			slot.download_status = DOWNLOAD_COMPLETE;
			if !table.custom_forces()
			{
				slot.team =
					table.free_team(index).ok_or(Error::PlayersOccupied)?;
			}
			if !table.fixed_player_settings()
			{
				slot.color =
					table.free_color(index).ok_or(Error::PlayersOccupied)?;
			}
			table.slots[index] = slot;
			Ok(())
		})
	}

	pub fn set_download_status(&mut self, index: usize, progress: u8)
	{
		if let Some(slot) = self.slots.get_mut(index)
		{
			slot.download_status = progress.min(DOWNLOAD_COMPLETE);
		}
	}

	/// Runs a mutation and restores the previous slots if it or the
	/// subsequent validation fails.
	fn transact<F>(&mut self, mutation: F) -> Result<(), Error>
	where
		F: FnOnce(&mut Table) -> Result<(), Error>,
	{
		let backup = self.slots.clone();
		let result = mutation(self).and_then(|()| self.validate());
		if result.is_err()
		{
			self.slots = backup;
		}
		result
	}

	fn validate(&self) -> Result<(), Error>
	{
		if self.count_players() > self.max_players
		{
			return Err(Error::PlayersOccupied);
		}
		let mut colors: u64 = 0;
		let mut teams: u64 = 0;
		for slot in self.slots.iter().filter(|x| self.is_player(x))
		{
			let color = 1u64 << slot.color;
			if colors & color != 0
			{
				return Err(Error::ColorOccupied);
			}
			colors |= color;
			if !self.custom_forces()
			{
				let team = 1u64 << slot.team;
				if teams & team != 0
				{
					return Err(Error::SlotOccupied);
				}
				teams |= team;
			}
		}
		let mut ids: u64 = 0;
		for slot in self.slots.iter().filter(|x| x.is_human())
		{
			let id = 1u64 << slot.player_id;
			if ids & id != 0
			{
				return Err(Error::InvalidSlot);
			}
			ids |= id;
		}
		Ok(())
	}

	/// The occupant fields of `source` placed into the slot `destination`.
	/// Fields pinned by the layout stay with the destination.
	fn carry(&self, source: &Slot, destination: &Slot, pin_team: bool)
		-> Slot
	{
		let mut slot = *destination;
		slot.player_id = source.player_id;
		slot.download_status = source.download_status;
		slot.status = source.status;
		slot.computer = source.computer;
		slot.computer_type = source.computer_type;
		if !pin_team
		{
			slot.team = source.team;
		}
		if !self.fixed_player_settings()
		{
			slot.color = source.color;
			slot.race = source.race;
			slot.handicap = source.handicap;
		}
		slot
	}

	/// Gives a player that ended up sharing a color the lowest free one.
	fn fix_color(&mut self, index: usize) -> Result<(), Error>
	{
		let slot = self.slots[index];
		if self.fixed_player_settings()
			|| !self.is_player(&slot)
			|| !self.color_taken(slot.color, index)
		{
			return Ok(());
		}
		let color = self.free_color(index).ok_or(Error::PlayersOccupied)?;
		self.slots[index].color = color;
		Ok(())
	}

	fn color_taken(&self, color: u8, except: usize) -> bool
	{
		self.slots.iter().enumerate().any(|(i, x)| {
			i != except && self.is_player(x) && x.color == color
		})
	}

	fn team_taken(&self, team: u8, except: usize) -> bool
	{
		self.slots.iter().enumerate().any(|(i, x)| {
			i != except && self.is_player(x) && x.team == team
		})
	}

	fn free_color(&self, except: usize) -> Option<u8>
	{
		(0..self.num_colors).find(|&x| !self.color_taken(x, except))
	}

	fn free_team(&self, except: usize) -> Option<u8>
	{
		(0..self.num_colors).find(|&x| !self.team_taken(x, except))
	}

	fn free_player_id(&self) -> Option<u8>
	{
		(1..=MAX_PLAYER_ID).find(|&id| self.find_player(id).is_none())
	}

	fn check_unlocked(&self) -> Result<(), Error>
	{
		if self.locked
		{
			Err(Error::Locked)
		}
		else
		{
			Ok(())
		}
	}

	fn check_index(&self, index: usize) -> Result<(), Error>
	{
		if index < self.slots.len()
		{
			Ok(())
		}
		else
		{
			Err(Error::InvalidSlot)
		}
	}

	fn check_occupied(&self, index: usize) -> Result<(), Error>
	{
		self.check_index(index)?;
		if self.slots[index].is_occupied()
		{
			Ok(())
		}
		else
		{
			Err(Error::InvalidSlot)
		}
	}
}
