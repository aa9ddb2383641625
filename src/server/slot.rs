/* Server::Slot */

use enumset::{EnumSet, EnumSetType};

use serde_derive::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Player id stored in slots that have no human occupant.
pub const NO_PLAYER: u8 = 0;
pub const MAX_PLAYER_ID: u8 = 32;

/// Download progress of a slot whose occupant has not reported yet.
pub const DOWNLOAD_UNKNOWN: u8 = 255;
pub const DOWNLOAD_COMPLETE: u8 = 100;

pub const MAX_HANDICAP: u8 = 100;

#[derive(
	PartialEq, Eq, Copy, Clone, Serialize_repr, Deserialize_repr, Debug,
)]
#[repr(u8)]
pub enum SlotStatus
{
	Open = 0,
	Closed = 1,
	Occupied = 2,
}

#[derive(
	PartialEq, Eq, Copy, Clone, Serialize_repr, Deserialize_repr, Debug,
)]
#[repr(u8)]
pub enum Difficulty
{
	Easy = 0,
	Normal = 1,
	Insane = 2,
}

#[derive(EnumSetType, Debug)]
#[enumset(serialize_repr = "u8")]
pub enum Race
{
	Human = 0,
	Orc = 1,
	NightElf = 2,
	Undead = 3,
	Random = 5,
	Selectable = 6,
}

impl Race
{
	/// The races a player can actually pick, as opposed to flags.
	pub fn playable() -> EnumSet<Race>
	{
		Race::Human | Race::Orc | Race::NightElf | Race::Undead | Race::Random
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Slot
{
	pub player_id: u8,
	pub download_status: u8,
	pub status: SlotStatus,
	pub computer: bool,
	pub team: u8,
	pub color: u8,
	pub race: EnumSet<Race>,
	pub computer_type: Difficulty,
	pub handicap: u8,
}

impl Slot
{
	pub fn open(team: u8, color: u8) -> Slot
	{
		Slot {
			player_id: NO_PLAYER,
			download_status: DOWNLOAD_UNKNOWN,
			status: SlotStatus::Open,
			computer: false,
			team,
			color,
			race: Race::Random | Race::Selectable,
			computer_type: Difficulty::Normal,
			handicap: MAX_HANDICAP,
		}
	}

	pub fn is_human(&self) -> bool
	{
		self.status == SlotStatus::Occupied && !self.computer
	}

	pub fn is_occupied(&self) -> bool
	{
		self.status == SlotStatus::Occupied
	}
}

#[derive(EnumSetType, Debug)]
#[enumset(serialize_repr = "u8")]
pub enum LayoutFlag
{
	/// Every slot belongs to a fixed team; players move between slots
	/// instead of changing team values.
	CustomForces = 0,
	/// Color, race and handicap belong to the slot, not to the player.
	FixedPlayerSettings = 1,
}

/// The slot template a lobby is created with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Layout
{
	pub slots: Vec<Slot>,
	pub flags: EnumSet<LayoutFlag>,
	pub observers: bool,
	/// Maximum number of non-observers; zero means no limit
	/// beyond the number of slots and colors.
	#[serde(default)]
	pub max_players: u8,
}

impl Layout
{
	/// A melee layout where every slot is its own team.
	pub fn free_for_all(num_slots: usize, observers: bool) -> Layout
	{
		let slots = (0..num_slots)
			.map(|i| Slot::open(i as u8, i as u8))
			.collect();
		Layout {
			slots,
			flags: EnumSet::empty(),
			observers,
			max_players: 0,
		}
	}

	pub fn custom_forces(&self) -> bool
	{
		self.flags.contains(LayoutFlag::CustomForces)
	}

	pub fn fixed_player_settings(&self) -> bool
	{
		self.flags.contains(LayoutFlag::FixedPlayerSettings)
	}
}

/// Describes how messages are encoded for the clients of this lobby.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Encoding
{
	pub game_version: u32,
}

impl Encoding
{
	/// Number of distinct player colors (and player teams).
	pub fn num_colors(&self) -> u8
	{
		if self.game_version >= 29
		{
			24
		}
		else
		{
			12
		}
	}
}

impl Default for Encoding
{
	fn default() -> Encoding
	{
		Encoding { game_version: 26 }
	}
}

/// Sent verbatim to every joiner so that it can verify its copy of the map.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MapCheck
{
	pub path: String,
	pub size: u32,
	pub checksum: u32,
}
