/* Server::Lobby */

mod table;

pub use table::Table;

use crate::server::error::Error;
use crate::server::event::{Event, Events};
use crate::server::limits::*;
use crate::server::message::*;
use crate::server::player::{Handler, Inbox, Player};
use crate::server::settings::Config;
use crate::server::slot::*;
use crate::server::wire;

use std::sync;

use log::*;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// The slot table and the players seated in it, guarded together.
struct Roster
{
	table: Table,
	players: Vec<sync::Arc<Player>>,
}

pub struct Lobby
{
	layout: Layout,
	map: MapCheck,
	config: Config,
	random_seed: u32,

	roster: sync::Mutex<Roster>,
	canary: sync::Mutex<Option<mpsc::Sender<()>>>,
	drain: sync::Mutex<Option<mpsc::Receiver<()>>>,

	pub events: Events,
}

impl Lobby
{
	pub fn new(
		encoding: Encoding,
		layout: Layout,
		map: MapCheck,
		config: Config,
	) -> Result<Lobby, Error>
	{
		let (canary_in, canary_out) = mpsc::channel::<()>(1);
		let table = Table::new(&layout, encoding)?;
		Ok(Lobby {
			layout,
			map,
			config,
			random_seed: rand::random(),
			roster: sync::Mutex::new(Roster {
				table,
				players: Vec::new(),
			}),
			canary: sync::Mutex::new(Some(canary_in)),
			drain: sync::Mutex::new(Some(canary_out)),
			events: Events::default(),
		})
	}

	pub fn config(&self) -> &Config
	{
		&self.config
	}

	pub fn map(&self) -> &MapCheck
	{
		&self.map
	}

	fn roster(&self) -> sync::MutexGuard<Roster>
	{
		self.roster.lock().unwrap_or_else(sync::PoisonError::into_inner)
	}

	/// Seats a connection whose handshake was already read.
	pub fn join<S>(
		self: &sync::Arc<Self>,
		socket: S,
		name: String,
		join_counter: u32,
	) -> Result<sync::Arc<Player>, Error>
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let handler: sync::Arc<dyn Handler> = self.clone();
		self.join_with(handler, socket, name, join_counter)
	}

	/// Like `join`, but the player's messages go to `handler`, which is
	/// expected to pass whatever it does not handle itself back to
	/// `handle_lobby_message`.
	pub fn join_with<S>(
		&self,
		handler: sync::Arc<dyn Handler>,
		socket: S,
		name: String,
		join_counter: u32,
	) -> Result<sync::Arc<Player>, Error>
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let registered = self.register(name, join_counter);
		let (player, inbox, canary, slot_info) = match registered
		{
			Ok(registered) => registered,
			Err(error) =>
			{
				info!("Rejecting join: {}", error);
				reject(socket, error, &self.config);
				return Err(error);
			}
		};

		self.announce_slots(slot_info, Some(player.id));
		player.start(inbox, socket, handler, self.config.clone(), canary);

		self.events.fire(&Event::PlayerJoined {
			player_id: player.id,
			name: player.name.clone(),
		});
		Ok(player)
	}

	/// Reads the join request from a fresh connection and seats it.
	pub async fn accept<S>(
		self: &sync::Arc<Self>,
		socket: S,
	) -> Result<sync::Arc<Player>, Error>
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let handler: sync::Arc<dyn Handler> = self.clone();
		self.accept_with(handler, socket).await
	}

	pub async fn accept_with<S>(
		&self,
		handler: sync::Arc<dyn Handler>,
		mut socket: S,
	) -> Result<sync::Arc<Player>, Error>
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		match handshake(&mut socket, &self.config).await
		{
			Ok((name, join_counter)) =>
			{
				self.join_with(handler, socket, name, join_counter)
			}
			Err(error) =>
			{
				reject(socket, error, &self.config);
				Err(error)
			}
		}
	}

	fn register(
		&self,
		name: String,
		join_counter: u32,
	) -> Result<(sync::Arc<Player>, Inbox, mpsc::Sender<()>, SlotInfo), Error>
	{
		if name.is_empty() || name.len() > NAME_LENGTH_LIMIT
		{
			return Err(Error::InvalidArgument);
		}

		let mut roster = self.roster();
		if roster.players.iter().any(|x| x.name == name)
		{
			return Err(Error::InvalidArgument);
		}
		let canary = self
			.canary
			.lock()
			.unwrap_or_else(sync::PoisonError::into_inner)
			.clone()
			.ok_or(Error::Locked)?;

		let (_index, player_id) = roster.table.join()?;
		let (player, inbox) = Player::new(player_id, name, join_counter);
		debug!("Player {} joined as '{}'.", player_id, player.name);

		player.send(Message::SlotInfoJoin {
			player_id,
			slot_info: self.slot_info_of(&roster.table),
		});
		for other in roster.players.iter()
		{
			player.send(Message::PlayerInfo {
				player_id: other.id,
				name: other.name.clone(),
				join_counter: other.join_counter,
			});
			other.send(Message::PlayerInfo {
				player_id,
				name: player.name.clone(),
				join_counter,
			});
		}
		player.send(Message::MapCheck {
			map: self.map.clone(),
		});

		roster.players.push(player.clone());
		let slot_info = self.slot_info_of(&roster.table);
		Ok((player, inbox, canary, slot_info))
	}

	/// Kicks the player with the given id, if present.
	pub fn kick(&self, player_id: u8, reason: LeaveReason) -> bool
	{
		match self.find(player_id)
		{
			Some(player) => self.kick_player(&player, reason),
			None => false,
		}
	}

	/// Closes the player's connection and removes it from the roster right
	/// away. A notice is queued first unless the reason is a disconnect.
	pub fn kick_player(
		&self,
		player: &sync::Arc<Player>,
		reason: LeaveReason,
	) -> bool
	{
		player.set_leave_reason(reason);
		if reason != LeaveReason::Disconnect
		{
			player.send(Message::Kicked { reason });
		}
		player.close();

		let removed = self.detach(player);
		if removed
		{
			info!("Kicked player {} ({:?}).", player.id, reason);
			self.events.fire(&Event::PlayerKicked {
				player_id: player.id,
				reason,
			});
			self.events.fire(&Event::PlayerLeft {
				player_id: player.id,
				reason: player.leave_reason(),
			});
		}
		removed
	}

	/// Removes a player whose connection has ended. Idempotent.
	pub fn remove_player(&self, player: &sync::Arc<Player>) -> bool
	{
		let removed = self.detach(player);
		if removed
		{
			self.events.fire(&Event::PlayerLeft {
				player_id: player.id,
				reason: player.leave_reason(),
			});
		}
		removed
	}

	fn detach(&self, player: &sync::Arc<Player>) -> bool
	{
		let slot_info = {
			let mut roster = self.roster();
			let position = roster
				.players
				.iter()
				.position(|x| sync::Arc::ptr_eq(x, player));
			let position = match position
			{
				Some(position) => position,
				None => return false,
			};
			roster.players.remove(position);
			roster.table.leave(player.id);

			let reason = player.leave_reason();
			for other in roster.players.iter()
			{
				other.send(Message::PlayerLeft {
					player_id: player.id,
					reason,
				});
			}
			self.slot_info_of(&roster.table)
		};
		self.announce_slots(slot_info, None);
		true
	}

	/// Closes every connection and refuses further joins. Idempotent.
	pub fn close(&self)
	{
		let roster = self.roster();
		self.release_canary();
		for player in roster.players.iter()
		{
			player.close();
		}
	}

	/// Runs `check` and locks the slot table, atomically with respect to
	/// joins. Returns the seated players. Fails with `Locked` if the lobby
	/// was already frozen or closed.
	pub fn freeze<F>(&self, check: F) -> Result<Vec<sync::Arc<Player>>, Error>
	where
		F: FnOnce(&[sync::Arc<Player>]) -> Result<(), Error>,
	{
		let mut roster = self.roster();
		let open = self
			.canary
			.lock()
			.unwrap_or_else(sync::PoisonError::into_inner)
			.is_some();
		if !open
		{
			return Err(Error::Locked);
		}
		check(&roster.players)?;
		roster.table.lock();
		self.release_canary();
		Ok(roster.players.clone())
	}

	fn release_canary(&self)
	{
		let mut canary = self
			.canary
			.lock()
			.unwrap_or_else(sync::PoisonError::into_inner);
		*canary = None;
	}

	/// The receiver that completes once the lobby is frozen or closed and
	/// every player task has ended. Can be taken once.
	pub fn take_drain(&self) -> Option<mpsc::Receiver<()>>
	{
		self.drain
			.lock()
			.unwrap_or_else(sync::PoisonError::into_inner)
			.take()
	}

	pub fn broadcast(&self, message: Message)
	{
		let roster = self.roster();
		for player in roster.players.iter()
		{
			player.send(message.clone());
		}
	}

	pub fn send_to(&self, player_ids: &[u8], message: Message)
	{
		let roster = self.roster();
		for player in roster.players.iter()
		{
			if player_ids.contains(&player.id)
			{
				player.send(message.clone());
			}
		}
	}

	/// Tells the observers about a changed slot table and, unless one of
	/// them prevents it, sends the table to every player but `except`.
	/// Players get the table as it is when sending, so the last broadcast
	/// always carries the latest state. Must not be called with the roster
	/// locked.
	fn announce_slots(&self, slot_info: SlotInfo, except: Option<u8>)
	{
		let dispatch = self.events.fire(&Event::SlotsChanged { slot_info });
		if dispatch.is_prevented()
		{
			return;
		}
		let roster = self.roster();
		let slot_info = self.slot_info_of(&roster.table);
		for player in roster.players.iter()
		{
			if Some(player.id) != except
			{
				player.send(Message::SlotInfo {
					slot_info: slot_info.clone(),
				});
			}
		}
	}

	fn slot_info_of(&self, table: &Table) -> SlotInfo
	{
		SlotInfo::new(table.slots(), &self.layout, self.random_seed)
	}

	pub fn slot_info(&self) -> SlotInfo
	{
		self.slot_info_of(&self.roster().table)
	}

	pub fn count_players(&self) -> usize
	{
		self.roster().table.count_players()
	}

	pub fn slots_used(&self) -> usize
	{
		self.roster().table.slots_used()
	}

	pub fn slots_available(&self) -> usize
	{
		self.roster().table.slots_available()
	}

	pub fn count_ready(&self) -> usize
	{
		self.roster()
			.players
			.iter()
			.filter(|x| x.is_ready())
			.count()
	}

	pub fn players(&self) -> Vec<sync::Arc<Player>>
	{
		self.roster().players.clone()
	}

	pub fn find(&self, player_id: u8) -> Option<sync::Arc<Player>>
	{
		self.roster()
			.players
			.iter()
			.find(|x| x.id == player_id)
			.cloned()
	}

	/// Seated players paired with whether they sit on the observer team.
	pub fn seating(&self) -> Vec<(sync::Arc<Player>, bool)>
	{
		let roster = self.roster();
		roster
			.players
			.iter()
			.map(|player| {
				let observer = match roster.table.find_player(player.id)
				{
					Some(index) =>
					{
						roster.table.is_observer(&roster.table.slots()[index])
					}
					None => false,
				};
				(player.clone(), observer)
			})
			.collect()
	}

	/// Applies a slot mutation and broadcasts the result.
	fn mutate<T, F>(&self, mutation: F) -> Result<T, Error>
	where
		F: FnOnce(&mut Table) -> Result<T, Error>,
	{
		let (value, slot_info) = {
			let mut roster = self.roster();
			let value = mutation(&mut roster.table)?;
			(value, self.slot_info_of(&roster.table))
		};
		self.announce_slots(slot_info, None);
		Ok(value)
	}

	pub fn open_slot(&self, index: usize, kick: bool) -> Result<(), Error>
	{
		let evicted = self.mutate(|table| table.open(index, kick))?;
		self.evict(evicted);
		Ok(())
	}

	pub fn close_slot(&self, index: usize, kick: bool) -> Result<(), Error>
	{
		let evicted = self.mutate(|table| table.close(index, kick))?;
		self.evict(evicted);
		Ok(())
	}

	fn evict(&self, evicted: Option<u8>)
	{
		if let Some(player_id) = evicted
		{
			self.kick(player_id, LeaveReason::Lobby);
		}
	}

	pub fn swap_slots(&self, a: usize, b: usize) -> Result<(), Error>
	{
		self.mutate(|table| table.swap(a, b))
	}

	pub fn shuffle_slots(&self, shuffle_teams: bool) -> Result<(), Error>
	{
		self.mutate(|table| {
			table.shuffle(shuffle_teams, &mut rand::thread_rng())
		})
	}

	pub fn change_race(&self, index: usize, race: u8) -> Result<(), Error>
	{
		self.mutate(|table| table.change_race(index, race))
	}

	pub fn change_team(&self, index: usize, team: u8) -> Result<(), Error>
	{
		self.mutate(|table| table.change_team(index, team))
	}

	pub fn change_color(&self, index: usize, color: u8) -> Result<(), Error>
	{
		self.mutate(|table| table.change_color(index, color))
	}

	pub fn change_handicap(&self, index: usize, handicap: u8)
		-> Result<(), Error>
	{
		self.mutate(|table| table.change_handicap(index, handicap))
	}

	pub fn change_computer(&self, index: usize, difficulty: Difficulty)
		-> Result<(), Error>
	{
		self.mutate(|table| table.change_computer(index, difficulty))
	}

	pub fn lock(&self)
	{
		self.roster().table.lock();
	}

	pub fn unlock(&self)
	{
		self.roster().table.unlock();
	}

	/// Applies a change that a player requested for its own slot.
	fn request<F>(&self, player: &sync::Arc<Player>, mutation: F)
	where
		F: FnOnce(&mut Table, usize) -> Result<(), Error>,
	{
		let (result, slot_info) = {
			let mut roster = self.roster();
			let result = match roster.table.find_player(player.id)
			{
				Some(index) => mutation(&mut roster.table, index),
				None => Err(Error::InvalidSlot),
			};
			(result, self.slot_info_of(&roster.table))
		};
		match result
		{
			Ok(()) => self.announce_slots(slot_info, None),
			Err(error) if error.is_violation() =>
			{
				self.violation(player, error)
			}
			Err(error) =>
			{
				debug!("Request of player {} failed: {}", player.id, error);
				self.announce_slots(slot_info, None);
			}
		}
	}

	/// A player broke the protocol.
	pub fn violation(&self, player: &sync::Arc<Player>, error: Error)
	{
		warn!("Protocol violation by player {}: {}", player.id, error);
		self.events.fire(&Event::Error {
			player_id: Some(player.id),
			error,
		});
		self.kick_player(player, LeaveReason::Lobby);
	}

	pub fn handle_lobby_message(
		&self,
		player: &sync::Arc<Player>,
		message: Message,
	)
	{
		match message
		{
			Message::MapState { ready, size } =>
			{
				self.handle_map_state(player, ready, size)
			}
			Message::ChangeColor { color } =>
			{
				self.request(player, |table, i| table.change_color(i, color))
			}
			Message::ChangeTeam { team } =>
			{
				self.request(player, |table, i| table.change_team(i, team))
			}
			Message::ChangeRace { race } =>
			{
				self.request(player, |table, i| table.change_race(i, race))
			}
			Message::ChangeHandicap { handicap } =>
			{
				self.request(player, |table, i| {
					table.change_handicap(i, handicap)
				})
			}
			Message::Chat {
				text,
				recipients,
				sender: _,
			} => self.handle_chat(player, text, recipients),
			message if message.is_from_server() =>
			{
				warn!(
					"Player {} sent a server message: {:?}",
					player.id, message
				);
				self.violation(player, Error::InvalidPacket)
			}
			message =>
			{
				debug!(
					"Unexpected message from player {}: {:?}",
					player.id, message
				);
				self.violation(player, Error::InvalidPacket)
			}
		}
	}

	fn handle_map_state(&self, player: &sync::Arc<Player>, ready: bool, size: u32)
	{
		if !ready
		{
			warn!("Player {} does not have the map.", player.id);
			self.events.fire(&Event::Error {
				player_id: Some(player.id),
				error: Error::MapUnavailable,
			});
			return;
		}

		let progress = if size == self.map.size
		{
			DOWNLOAD_COMPLETE
		}
		else if self.map.size == 0
		{
			0
		}
		else
		{
			let percentage = (size as u64) * 100 / (self.map.size as u64);
			percentage.min((DOWNLOAD_COMPLETE - 1) as u64) as u8
		};

		let changed = {
			let mut roster = self.roster();
			match roster.table.find_player(player.id)
			{
				Some(index)
					if roster.table.slots()[index].download_status
						!= progress =>
				{
					roster.table.set_download_status(index, progress);
					Some(self.slot_info_of(&roster.table))
				}
				_ => None,
			}
		};
		if let Some(slot_info) = changed
		{
			self.announce_slots(slot_info, None);
		}

		if progress == DOWNLOAD_COMPLETE
		{
			player.set_map_ready();
		}
	}

	fn handle_chat(
		&self,
		player: &sync::Arc<Player>,
		text: String,
		recipients: Vec<u8>,
	)
	{
		if text.len() > CHAT_LENGTH_LIMIT
		{
			self.violation(player, Error::InvalidPacket);
			return;
		}

		let dispatch = self.events.fire(&Event::Chat {
			sender: player.id,
			text: text.clone(),
			recipients: recipients.clone(),
		});
		if dispatch.is_prevented()
		{
			debug!("Chat from player {} was not relayed.", player.id);
			return;
		}

		let message = Message::Chat {
			text,
			recipients: Vec::new(),
			sender: Some(player.id),
		};
		let roster = self.roster();
		for other in roster.players.iter()
		{
			if other.id == player.id
			{
				continue;
			}
			if recipients.is_empty() || recipients.contains(&other.id)
			{
				other.send(message.clone());
			}
		}
	}
}

impl Handler for Lobby
{
	fn handle_message(&self, player: &sync::Arc<Player>, message: Message)
	{
		self.handle_lobby_message(player, message)
	}

	fn handle_lag(&self, player: &sync::Arc<Player>, lagging: bool)
	{
		trace!("Player {} lagging in lobby: {}", player.id, lagging);
	}

	fn handle_exit(&self, player: &sync::Arc<Player>)
	{
		self.remove_player(player);
	}
}

async fn handshake<S>(socket: &mut S, config: &Config)
	-> Result<(String, u32), Error>
where
	S: AsyncRead + Unpin,
{
	match timeout(config.handshake_timeout, wire::read_message(socket)).await
	{
		Ok(Ok(Message::Join { name, join_counter })) => Ok((name, join_counter)),
		Ok(Ok(message)) =>
		{
			warn!("Expected join request, got {:?}.", message);
			Err(Error::InvalidPacket)
		}
		Ok(Err(error)) =>
		{
			warn!("Failed to read join request: {}", error);
			Err(Error::InvalidPacket)
		}
		Err(_elapsed) =>
		{
			warn!("Connection did not send a join request in time.");
			Err(Error::InvalidPacket)
		}
	}
}

/// Tells a refused connection why, without waiting for it.
fn reject<S>(mut socket: S, error: Error, config: &Config)
where
	S: AsyncWrite + Send + Unpin + 'static,
{
	let reason = match error
	{
		Error::Full | Error::PlayersOccupied => RejectReason::Full,
		Error::Locked => RejectReason::Started,
		_ => RejectReason::Invalid,
	};
	let write_timeout = config.write_timeout;
	tokio::spawn(async move {
		let message = Message::RejectJoin { reason };
		let written =
			timeout(write_timeout, wire::write_message(&mut socket, &message))
				.await;
		match written
		{
			Ok(Ok(())) => (),
			Ok(Err(error)) => debug!("Failed to reject join: {}", error),
			Err(_elapsed) => debug!("Failed to reject join in time."),
		}
		match socket.shutdown().await
		{
			Ok(()) => (),
			Err(error) => trace!("Failed to shut down: {}", error),
		}
	});
}

#[cfg(test)]
mod tests
{
	use super::*;

	use crate::server::testclient::{eventually, Behavior, TestClient};

	use std::sync::atomic;

	fn melee(num_slots: usize) -> sync::Arc<Lobby>
	{
		let map = MapCheck {
			path: "Maps/test.w3x".to_string(),
			size: 1000,
			checksum: 0xabcd,
		};
		let lobby = Lobby::new(
			Encoding::default(),
			Layout::free_for_all(num_slots, false),
			map,
			Config::default(),
		);
		sync::Arc::new(lobby.unwrap())
	}

	async fn connect(lobby: &sync::Arc<Lobby>, name: &str) -> TestClient
	{
		let (client, socket) = TestClient::pair(name, Behavior::default()).await;
		lobby.accept(socket).await.unwrap();
		client
	}

	#[tokio::test]
	async fn test_join_welcome_and_leave()
	{
		let lobby = melee(2);
		let mut alice = connect(&lobby, "alice").await;
		let welcome = alice.wait_for(|x| matches!(x, Message::SlotInfoJoin { .. })).await;
		match welcome
		{
			Some(Message::SlotInfoJoin { player_id, slot_info }) =>
			{
				assert_eq!(player_id, 1);
				assert_eq!(slot_info.slots[0].player_id, 1);
			}
			other => panic!("unexpected {:?}", other),
		}
		assert!(alice.wait_for(|x| matches!(x, Message::MapCheck { .. })).await.is_some());
		assert_eq!(lobby.slots_used(), 1);
		assert_eq!(lobby.slots_available(), 1);

		lobby.change_team(0, 1).unwrap();
		lobby.change_color(0, 10).unwrap();
		lobby.change_handicap(0, 42).unwrap();
		let slot = lobby.slot_info().slots[0];
		assert_eq!((slot.team, slot.color, slot.handicap), (1, 10, 42));

		let mut bob = connect(&lobby, "bob").await;
		let info = bob.wait_for(|x| matches!(x, Message::PlayerInfo { .. })).await;
		assert_eq!(
			info,
			Some(Message::PlayerInfo {
				player_id: 1,
				name: "alice".to_string(),
				join_counter: 0,
			})
		);

		alice.send(Message::Leave {
			reason: LeaveReason::Lost,
		});
		let left = bob.wait_for(|x| matches!(x, Message::PlayerLeft { .. })).await;
		assert_eq!(
			left,
			Some(Message::PlayerLeft {
				player_id: 1,
				reason: LeaveReason::Lost,
			})
		);
		assert_eq!(lobby.slot_info().slots[0], Layout::free_for_all(2, false).slots[0]);
		assert_eq!(lobby.slots_used(), 1);
	}

	#[tokio::test]
	async fn test_rejected_joins()
	{
		let lobby = melee(1);
		let _alice = connect(&lobby, "alice").await;

		let (mut again, socket) =
			TestClient::pair("alice", Behavior::default()).await;
		assert_eq!(lobby.accept(socket).await.err(), Some(Error::InvalidArgument));
		let rejected = again.wait_for(|x| matches!(x, Message::RejectJoin { .. })).await;
		assert_eq!(rejected, Some(Message::RejectJoin { reason: RejectReason::Invalid }));

		let (mut bob, socket) = TestClient::pair("bob", Behavior::default()).await;
		assert_eq!(lobby.accept(socket).await.err(), Some(Error::Full));
		let rejected = bob.wait_for(|x| matches!(x, Message::RejectJoin { .. })).await;
		assert_eq!(rejected, Some(Message::RejectJoin { reason: RejectReason::Full }));

		lobby.close();
		let (_carol, socket) = TestClient::pair("carol", Behavior::default()).await;
		assert_eq!(lobby.accept(socket).await.err(), Some(Error::Locked));
	}

	#[tokio::test]
	async fn test_ready_in_either_order()
	{
		let lobby = melee(2);
		let mut silent = Behavior::default();
		silent.pong = false;
		let (mut alice, socket) = TestClient::pair("alice", silent).await;
		let player = lobby.accept(socket).await.unwrap();
		alice.wait_for(|x| matches!(x, Message::Ping { .. })).await;
		eventually(|| player.is_map_ready()).await;
		assert!(!player.is_ready());
		alice.set_pong(true);
		eventually(|| player.is_ready()).await;

		let mut no_map = Behavior::default();
		no_map.map = false;
		let (bob, socket) = TestClient::pair("bob", no_map).await;
		let player = lobby.accept(socket).await.unwrap();
		eventually(|| player.rtt().is_some()).await;
		assert!(!player.is_ready());
		bob.send(Message::MapState {
			ready: true,
			size: 1000,
		});
		eventually(|| player.is_ready()).await;
		assert_eq!(lobby.count_ready(), 2);
	}

	#[tokio::test]
	async fn test_invalid_requests_kick_only_the_sender()
	{
		let lobby = melee(12);
		let kicks = sync::Arc::new(atomic::AtomicUsize::new(0));
		let k = kicks.clone();
		lobby.events.on(crate::server::event::Tag::PlayerKicked, move |_, _| {
			k.fetch_add(1, atomic::Ordering::SeqCst);
		});

		let mut clients = Vec::new();
		for i in 0..9
		{
			clients.push(connect(&lobby, &format!("player{}", i)).await);
		}
		assert_eq!(lobby.slots_used(), 9);

		let invalid = vec![
			Message::ChangeColor { color: 12 },
			Message::ChangeHandicap { handicap: 101 },
			Message::ChangeTeam { team: 200 },
			Message::ChangeRace { race: 0b0000_0011 },
			Message::ChangeRace { race: 0b1000_0000 },
			Message::Chat {
				text: "x".repeat(CHAT_LENGTH_LIMIT + 1),
				recipients: Vec::new(),
				sender: None,
			},
		];
		for (i, message) in invalid.into_iter().enumerate()
		{
			clients[i].send(message);
			let kicked = clients[i].wait_for(|x| matches!(x, Message::Kicked { .. })).await;
			assert_eq!(kicked, Some(Message::Kicked { reason: LeaveReason::Lobby }));
		}
		eventually(|| lobby.slots_used() == 3).await;
		assert_eq!(kicks.load(atomic::Ordering::SeqCst), 6);
		assert_eq!(lobby.players().len(), 3);
		for client in &mut clients[6..]
		{
			client.send(Message::ChangeHandicap { handicap: 50 });
		}
		eventually(|| {
			let slots = lobby.slot_info().slots;
			slots.iter().filter(|x| x.handicap == 50).count() == 3
		})
		.await;
		assert_eq!(kicks.load(atomic::Ordering::SeqCst), 6);
	}

	#[tokio::test]
	async fn test_surplus_pongs_do_not_stall_the_reader()
	{
		let lobby = melee(2);
		let mut alice = connect(&lobby, "alice").await;
		let mut bob = connect(&lobby, "bob").await;
		let ping = alice.wait_for(|x| matches!(x, Message::Ping { .. })).await;
		assert!(ping.is_some());
		for nonce in 0..64
		{
			alice.send(Message::Pong { nonce });
		}
		alice.send(Message::Chat {
			text: "still here".to_string(),
			recipients: Vec::new(),
			sender: None,
		});
		let relayed = timeout(
			std::time::Duration::from_secs(2),
			bob.wait_for(|x| matches!(x, Message::Chat { .. })),
		)
		.await;
		assert!(matches!(relayed, Ok(Some(Message::Chat { .. }))));
	}

	#[tokio::test]
	async fn test_chat_relay_and_veto()
	{
		let lobby = melee(3);
		let mut alice = connect(&lobby, "alice").await;
		let mut bob = connect(&lobby, "bob").await;
		alice.send(Message::Chat {
			text: "hello".to_string(),
			recipients: Vec::new(),
			sender: None,
		});
		let relayed = bob.wait_for(|x| matches!(x, Message::Chat { .. })).await;
		assert_eq!(
			relayed,
			Some(Message::Chat {
				text: "hello".to_string(),
				recipients: Vec::new(),
				sender: Some(1),
			})
		);

		lobby.events.on(crate::server::event::Tag::Chat, |_, dispatch| {
			dispatch.prevent_default();
		});
		alice.send(Message::Chat {
			text: "secret".to_string(),
			recipients: Vec::new(),
			sender: None,
		});
		alice.send(Message::ChangeHandicap { handicap: 70 });
		let next = bob
			.wait_for(|x| {
				matches!(x, Message::Chat { .. })
					|| matches!(x, Message::SlotInfo { slot_info } if slot_info.slots[0].handicap == 70)
			})
			.await;
		assert!(matches!(next, Some(Message::SlotInfo { .. })));
	}

	#[tokio::test]
	async fn test_closing_a_slot_kicks_its_occupant()
	{
		let lobby = melee(2);
		let mut alice = connect(&lobby, "alice").await;
		assert_eq!(lobby.close_slot(0, false), Err(Error::SlotOccupied));
		assert_eq!(lobby.close_slot(0, true), Ok(()));
		let kicked = alice.wait_for(|x| matches!(x, Message::Kicked { .. })).await;
		assert_eq!(kicked, Some(Message::Kicked { reason: LeaveReason::Lobby }));
		assert!(lobby.players().is_empty());
		assert_eq!(lobby.slots_used(), 1);
		assert_eq!(lobby.slots_available(), 1);
	}

	#[tokio::test]
	async fn test_slot_observers_may_query_the_lobby()
	{
		let lobby = melee(3);
		let seen = sync::Arc::new(sync::Mutex::new(Vec::new()));
		let s = seen.clone();
		let weak = sync::Arc::downgrade(&lobby);
		lobby.events.on(crate::server::event::Tag::SlotsChanged, move |event, dispatch| {
			let lobby = match weak.upgrade()
			{
				Some(lobby) => lobby,
				None => return,
			};
			if let Event::SlotsChanged { slot_info } = event
			{
				let status = slot_info.slots[1].status;
				s.lock().unwrap().push((lobby.slots_used(), status));
				if status == SlotStatus::Closed
				{
					dispatch.prevent_default();
				}
			}
		});

		let mut no_map = Behavior::default();
		no_map.map = false;
		let (mut alice, socket) = TestClient::pair("alice", no_map).await;
		lobby.accept(socket).await.unwrap();
		assert_eq!(lobby.close_slot(1, false), Ok(()));
		assert_eq!(lobby.open_slot(1, false), Ok(()));
		let info = alice.wait_for(|x| matches!(x, Message::SlotInfo { .. })).await;
		match info
		{
			Some(Message::SlotInfo { slot_info }) =>
			{
				assert_eq!(slot_info.slots[1].status, SlotStatus::Open);
			}
			other => panic!("unexpected {:?}", other),
		}
		assert_eq!(
			*seen.lock().unwrap(),
			vec![
				(1, SlotStatus::Open),
				(2, SlotStatus::Closed),
				(1, SlotStatus::Open),
			]
		);
	}

	#[tokio::test]
	async fn test_host_slot_operations()
	{
		let lobby = melee(3);
		let mut alice = connect(&lobby, "alice").await;
		lobby.swap_slots(0, 2).unwrap();
		let slots = lobby.slot_info().slots;
		assert_eq!(slots[2].player_id, 1);
		assert_eq!(slots[0].status, SlotStatus::Open);

		lobby.close_slot(1, false).unwrap();
		assert_eq!(lobby.slots_used(), 2);
		lobby.shuffle_slots(false).unwrap();
		let slots = lobby.slot_info().slots;
		assert_eq!(slots[1].status, SlotStatus::Closed);
		assert_eq!(slots.iter().filter(|x| x.player_id == 1).count(), 1);

		lobby.open_slot(1, false).unwrap();
		assert_eq!(lobby.slots_used(), 1);
		assert_eq!(lobby.swap_slots(0, 3), Err(Error::InvalidSlot));

		let seat = lobby.slot_info().slots.iter().position(|x| x.player_id == 1);
		let seat = seat.unwrap();
		let free = (0..3).find(|&i| i != seat).unwrap();
		lobby.change_race(seat, 0b0000_0100).unwrap();
		lobby.change_computer(free, Difficulty::Insane).unwrap();
		assert_eq!(lobby.count_players(), 2);
		assert_eq!(
			lobby.change_computer(seat, Difficulty::Easy),
			Err(Error::SlotOccupied)
		);
		lobby.lock();
		assert_eq!(lobby.swap_slots(0, 1), Err(Error::Locked));
		lobby.unlock();
		assert_eq!(lobby.swap_slots(0, 1), Ok(()));

		lobby.send_to(
			&[1],
			Message::Chat {
				text: "welcome".to_string(),
				recipients: Vec::new(),
				sender: None,
			},
		);
		let chat = alice.wait_for(|x| matches!(x, Message::Chat { .. })).await;
		assert_eq!(
			chat,
			Some(Message::Chat {
				text: "welcome".to_string(),
				recipients: Vec::new(),
				sender: None,
			})
		);
	}
}
