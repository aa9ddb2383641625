/* Server::Message */

use crate::server::slot::{Layout, LayoutFlag, MapCheck, Slot};

use enumset::EnumSet;

use serde_derive::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Message
{
	/* Handshake. */
	Join
	{
		name: String,
		#[serde(default)]
		join_counter: u32,
	},
	RejectJoin
	{
		reason: RejectReason,
	},
	SlotInfoJoin
	{
		player_id: u8,
		slot_info: SlotInfo,
	},

	/* Lobby. */
	SlotInfo
	{
		slot_info: SlotInfo,
	},
	PlayerInfo
	{
		player_id: u8,
		name: String,
		join_counter: u32,
	},
	PlayerLeft
	{
		player_id: u8,
		reason: LeaveReason,
	},
	Kicked
	{
		reason: LeaveReason,
	},
	Leave
	{
		reason: LeaveReason,
	},
	MapCheck
	{
		map: MapCheck,
	},
	MapState
	{
		ready: bool,
		size: u32,
	},
	ChangeColor
	{
		color: u8,
	},
	ChangeTeam
	{
		team: u8,
	},
	ChangeRace
	{
		race: u8,
	},
	ChangeHandicap
	{
		handicap: u8,
	},
	Chat
	{
		text: String,

		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		recipients: Vec<u8>,

		#[serde(default, skip_serializing_if = "Option::is_none")]
		sender: Option<u8>,
	},

	/* Timing. */
	Ping
	{
		nonce: u32,
	},
	Pong
	{
		nonce: u32,
	},

	/* Loading. */
	CountdownStart,
	CountdownEnd,
	Loaded,
	PlayerLoaded
	{
		player_id: u8,
	},

	/* Playing. */
	Action
	{
		payload: Vec<u8>,
	},
	TimeSlot
	{
		#[serde(default, skip_serializing_if = "is_false")]
		fragment: bool,
		increment_ms: u16,
		actions: Vec<PlayerAction>,
	},
	Ack
	{
		checksum: u32,
	},
	StartLag
	{
		laggers: Vec<Lagger>,
	},
	StopLag
	{
		lagger: Lagger,
	},
}

impl Message
{
	/// Whether only the server is allowed to send this message.
	pub fn is_from_server(&self) -> bool
	{
		match self
		{
			Message::RejectJoin { .. }
			| Message::SlotInfoJoin { .. }
			| Message::SlotInfo { .. }
			| Message::PlayerInfo { .. }
			| Message::PlayerLeft { .. }
			| Message::Kicked { .. }
			| Message::MapCheck { .. }
			| Message::Ping { .. }
			| Message::CountdownStart
			| Message::CountdownEnd
			| Message::PlayerLoaded { .. }
			| Message::TimeSlot { .. }
			| Message::StartLag { .. }
			| Message::StopLag { .. } => true,
			_ => false,
		}
	}
}

fn is_false(x: &bool) -> bool
{
	!*x
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SlotInfo
{
	pub slots: Vec<Slot>,
	pub random_seed: u32,
	pub layout: EnumSet<LayoutFlag>,
	pub num_players: u8,
}

impl SlotInfo
{
	pub fn new(slots: &[Slot], layout: &Layout, random_seed: u32) -> SlotInfo
	{
		SlotInfo {
			slots: slots.to_vec(),
			random_seed,
			layout: layout.flags,
			num_players: slots.len() as u8,
		}
	}
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct PlayerAction
{
	pub player_id: u8,
	pub payload: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Lagger
{
	pub player_id: u8,
	pub duration_ms: u32,
}

#[derive(
	PartialEq, Eq, Copy, Clone, Serialize_repr, Deserialize_repr, Debug,
)]
#[repr(u8)]
pub enum LeaveReason
{
	Disconnect = 1,
	Lost = 7,
	LostBuildings = 8,
	Won = 9,
	Draw = 10,
	Observer = 11,
	Lobby = 13,
}

#[derive(
	PartialEq, Eq, Copy, Clone, Serialize_repr, Deserialize_repr, Debug,
)]
#[repr(u8)]
pub enum RejectReason
{
	Invalid = 7,
	Full = 9,
	Started = 10,
}
