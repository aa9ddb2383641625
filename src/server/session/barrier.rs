/* Server::Session::Barrier */

use super::lag;
use super::ticker;
use super::{Session, Stage};

use crate::server::error::Error;
use crate::server::event::Event;
use crate::server::limits::*;
use crate::server::message::{LeaveReason, Message};
use crate::server::player::Player;
use crate::server::settings::Config;

use std::sync;

use log::*;

use tokio::time::{sleep, Instant};

impl Session
{
	/// Freezes the roster and starts loading. Fails with `Locked` unless the
	/// session is still in the lobby, and with `NotReady` while a seated
	/// player has not answered a probe or does not have the map.
	pub fn start(&self) -> Result<(), Error>
	{
		let players = self.lobby.freeze(|players| {
			if let Some(player) = players.iter().find(|x| !x.is_ready())
			{
				debug!("Cannot start: player {} is not ready.", player.id);
				return Err(Error::NotReady);
			}
			if !self.swap_stage(Stage::Lobby, Stage::Loading)
			{
				return Err(Error::Locked);
			}
			Ok(())
		})?;
		self.announce_stage(Stage::Loading);

		info!("Starting with {} players.", players.len());
		self.lobby.broadcast(Message::CountdownStart);
		self.lobby.broadcast(Message::CountdownEnd);
		for player in players.iter()
		{
			self.arm_load_timer(player);
		}
		self.check_loaded();
		Ok(())
	}

	fn arm_load_timer(&self, player: &sync::Arc<Player>)
	{
		let session = self.weak.clone();
		let player_ref = sync::Arc::downgrade(player);
		let load_timeout = self.config().load_timeout;
		let timer = tokio::spawn(async move {
			sleep(load_timeout).await;
			let session = session.upgrade();
			let player = player_ref.upgrade();
			let (session, player) = match (session, player)
			{
				(Some(session), Some(player)) => (session, player),
				_ => return,
			};
			if !player.is_loaded()
			{
				warn!("Player {} failed to load in time.", player.id);
				session.kick_player(&player, LeaveReason::Disconnect);
			}
		});
		self.load_timers().insert(player.id, timer);
	}

	pub(super) fn on_loaded(&self, player: &sync::Arc<Player>)
	{
		if self.stage() == Stage::Lobby
		{
			debug!("Player {} loaded before the game started.", player.id);
			self.violation(player, Error::InvalidPacket);
			return;
		}
		if !player.mark_loaded()
		{
			return;
		}

		if let Some(timer) = self.load_timers().remove(&player.id)
		{
			timer.abort();
		}
		debug!("Player {} has loaded.", player.id);
		self.lobby.broadcast(Message::PlayerLoaded {
			player_id: player.id,
		});
		self.check_loaded();
	}

	/// Starts playing once every seated player has loaded or left.
	pub(super) fn check_loaded(&self)
	{
		if self.stage() != Stage::Loading
		{
			return;
		}
		if self.lobby.players().iter().any(|x| !x.is_loaded())
		{
			return;
		}
		if self.try_transition(Stage::Loading, Stage::Playing)
		{
			self.begin_playing();
		}
	}

	fn begin_playing(&self)
	{
		let config = self.config();
		let seating = self.lobby.seating();
		self.acks().begin(
			seating.clone(),
			config.player_vote_weight,
			config.observer_vote_weight,
			lookahead(config),
		);

		let active = seating
			.iter()
			.filter(|(_, observer)| !observer)
			.fold(0, |mask, (x, _)| mask | lag::bit(x.id));
		let mut lagging = Vec::new();
		{
			let mut roster = self.lag();
			for (player, observer) in seating.iter()
			{
				if !observer
					&& player.is_lagging()
					&& roster.add(player.id, active)
				{
					lagging.push(player.id);
				}
			}
		}
		{
			let now = Instant::now();
			let mut stalls = self.stalls();
			for (player, observer) in seating.iter()
			{
				if *observer && player.is_lagging()
				{
					stalls.add(player.id, now);
				}
			}
		}
		for player_id in lagging
		{
			info!("Player {} is lagging from the start.", player_id);
			self.lobby.events.fire(&Event::LagStarted { player_id });
		}

		// A player that left after the seating was copied was forgotten
		// before the ack state knew about it.
		for (player, _) in seating.iter()
		{
			let seated = self
				.lobby
				.find(player.id)
				.map_or(false, |x| sync::Arc::ptr_eq(&x, player));
			if !seated
			{
				self.forget(player);
			}
		}

		match (self.weak.upgrade(), self.lobby.take_drain())
		{
			(Some(session), Some(drain)) =>
			{
				tokio::spawn(ticker::run(session, drain));
			}
			_ => error!("Cannot schedule ticks without a drain."),
		}
	}
}

/// The number of unacknowledged ticks a player may run ahead.
fn lookahead(config: &Config) -> usize
{
	let ticks =
		config.ack_lookahead.as_millis() * (config.turn_rate as u128) / 1000;
	ticks.max(1).min(ACK_QUEUE_CAPACITY as u128) as usize
}
