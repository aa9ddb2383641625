/* Server::Session */

mod barrier;
mod desync;
mod lag;
mod ticker;

use crate::server::error::Error;
use crate::server::event::Event;
use crate::server::limits::*;
use crate::server::lobby::Lobby;
use crate::server::message::*;
use crate::server::player::{Handler, Player};
use crate::server::settings::Config;
use crate::server::slot::{Encoding, Layout, MapCheck};

use std::collections::HashMap;
use std::sync;
use std::sync::atomic;
use std::time::Duration;

use log::*;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage
{
	Lobby = 0,
	Loading = 1,
	Playing = 2,
	Done = 3,
}

impl Stage
{
	fn from_u8(x: u8) -> Stage
	{
		match x
		{
			0 => Stage::Lobby,
			1 => Stage::Loading,
			2 => Stage::Playing,
			_ => Stage::Done,
		}
	}
}

/// A lobby that turns into a lockstep match once it is started.
pub struct Session
{
	pub lobby: Lobby,
	weak: sync::Weak<Session>,

	stage: atomic::AtomicU8,
	tick: atomic::AtomicU32,
	done: watch::Sender<bool>,
	done_out: watch::Receiver<bool>,

	actions: sync::Mutex<Vec<PlayerAction>>,
	lag: sync::Mutex<lag::Roster>,
	stalls: sync::Mutex<lag::Stalls>,
	acks: sync::Mutex<desync::AckState>,
	load_timers: sync::Mutex<HashMap<u8, JoinHandle<()>>>,
}

impl Session
{
	pub fn new(
		encoding: Encoding,
		layout: Layout,
		map: MapCheck,
		config: Config,
	) -> Result<sync::Arc<Session>, Error>
	{
		let lobby = Lobby::new(encoding, layout, map, config)?;
		let (done, done_out) = watch::channel(false);
		let session = sync::Arc::new_cyclic(|weak| Session {
			lobby,
			weak: weak.clone(),
			stage: atomic::AtomicU8::new(Stage::Lobby as u8),
			tick: atomic::AtomicU32::new(0),
			done,
			done_out,
			actions: sync::Mutex::new(Vec::new()),
			lag: sync::Mutex::new(lag::Roster::default()),
			stalls: sync::Mutex::new(lag::Stalls::default()),
			acks: sync::Mutex::new(desync::AckState::default()),
			load_timers: sync::Mutex::new(HashMap::new()),
		});
		Ok(session)
	}

	pub fn stage(&self) -> Stage
	{
		Stage::from_u8(self.stage.load(atomic::Ordering::SeqCst))
	}

	/// The number of ticks relayed so far.
	pub fn tick(&self) -> u32
	{
		self.tick.load(atomic::Ordering::SeqCst)
	}

	fn config(&self) -> &Config
	{
		self.lobby.config()
	}

	fn lag(&self) -> sync::MutexGuard<lag::Roster>
	{
		self.lag.lock().unwrap_or_else(sync::PoisonError::into_inner)
	}

	fn stalls(&self) -> sync::MutexGuard<lag::Stalls>
	{
		self.stalls.lock().unwrap_or_else(sync::PoisonError::into_inner)
	}

	/// Everyone the ack detector may stop waiting for: lagging players and
	/// stalled observers.
	fn laggers(&self) -> Vec<lag::Lagger>
	{
		let mut laggers = self.lag().snapshot();
		laggers.extend(self.stalls().snapshot(Instant::now()));
		laggers
	}

	fn acks(&self) -> sync::MutexGuard<desync::AckState>
	{
		self.acks.lock().unwrap_or_else(sync::PoisonError::into_inner)
	}

	fn actions(&self) -> sync::MutexGuard<Vec<PlayerAction>>
	{
		self.actions
			.lock()
			.unwrap_or_else(sync::PoisonError::into_inner)
	}

	fn load_timers(&self) -> sync::MutexGuard<HashMap<u8, JoinHandle<()>>>
	{
		self.load_timers
			.lock()
			.unwrap_or_else(sync::PoisonError::into_inner)
	}

	/// Moves the stage forward along one edge. Anything else is a bug.
	fn transition(&self, from: Stage, to: Stage)
	{
		if !self.try_transition(from, to)
		{
			panic!(
				"Illegal stage transition from {:?} to {:?}, stage is {:?}.",
				from,
				to,
				self.stage()
			);
		}
	}

	fn try_transition(&self, from: Stage, to: Stage) -> bool
	{
		let moved = self.swap_stage(from, to);
		if moved
		{
			self.announce_stage(to);
		}
		moved
	}

	/// The transition without its announcement, for callers that hold a
	/// lobby lock and announce once they have released it.
	fn swap_stage(&self, from: Stage, to: Stage) -> bool
	{
		let moved = self
			.stage
			.compare_exchange(
				from as u8,
				to as u8,
				atomic::Ordering::SeqCst,
				atomic::Ordering::SeqCst,
			)
			.is_ok();
		if moved
		{
			info!("Stage changed from {:?} to {:?}.", from, to);
		}
		moved
	}

	fn announce_stage(&self, stage: Stage)
	{
		self.lobby.events.fire(&Event::StageChanged { stage });
		if stage == Stage::Done
		{
			if let Err(error) = self.done.send(true)
			{
				trace!("Nobody waits for the session: {}", error);
			}
		}
	}

	/// Completes once the session has reached `Done`.
	pub async fn wait_until_done(&self)
	{
		let mut done = self.done_out.clone();
		while !*done.borrow()
		{
			if done.changed().await.is_err()
			{
				break;
			}
		}
	}

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
		self.lobby.join_with(handler, socket, name, join_counter)
	}

	pub async fn accept<S>(
		self: &sync::Arc<Self>,
		socket: S,
	) -> Result<sync::Arc<Player>, Error>
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let handler: sync::Arc<dyn Handler> = self.clone();
		self.lobby.accept_with(handler, socket).await
	}

	/// Closes every connection. A session that never started is done
	/// right away; otherwise it is done once every player task has ended.
	pub fn close(&self)
	{
		self.lobby.close();
		self.try_transition(Stage::Lobby, Stage::Done);
	}

	pub fn kick(&self, player_id: u8, reason: LeaveReason) -> bool
	{
		match self.lobby.find(player_id)
		{
			Some(player) => self.kick_player(&player, reason),
			None => false,
		}
	}

	pub fn kick_player(
		&self,
		player: &sync::Arc<Player>,
		reason: LeaveReason,
	) -> bool
	{
		let removed = self.lobby.kick_player(player, reason);
		self.forget(player);
		removed
	}

	/// A player broke the in-game protocol.
	fn violation(&self, player: &sync::Arc<Player>, error: Error)
	{
		warn!("Player {} violated the protocol: {}", player.id, error);
		self.lobby.events.fire(&Event::Error {
			player_id: Some(player.id),
			error,
		});
		self.kick_player(player, LeaveReason::Disconnect);
	}

	/// Drops everything the match tracks about a player that is gone.
	/// Idempotent.
	fn forget(&self, player: &sync::Arc<Player>)
	{
		if let Some(timer) = self.load_timers().remove(&player.id)
		{
			timer.abort();
		}

		let removed = self.lag().remove(player.id);
		if let Some(lagger) = removed
		{
			self.stop_lag(lagger);
		}
		self.stalls().remove(player.id);

		let laggers = self.laggers();
		let grace = self.config().lag_grace;
		let verdicts = self.acks().remove(player.id, &laggers, grace);
		self.judge(verdicts);

		self.check_loaded();
	}

	fn on_action(&self, player: &sync::Arc<Player>, payload: Vec<u8>)
	{
		if self.stage() != Stage::Playing
		{
			debug!("Action from player {} outside of play.", player.id);
			self.violation(player, Error::InvalidPacket);
			return;
		}
		if payload.len() > ACTION_SIZE_LIMIT
		{
			debug!(
				"Action of {} bytes from player {}.",
				payload.len(),
				player.id
			);
			self.violation(player, Error::InvalidPacket);
			return;
		}
		self.actions().push(PlayerAction {
			player_id: player.id,
			payload,
		});
	}

	fn on_ack(&self, player: &sync::Arc<Player>, checksum: u32)
	{
		if self.stage() != Stage::Playing
		{
			debug!("Ack from player {} outside of play.", player.id);
			self.violation(player, Error::InvalidPacket);
			return;
		}
		let laggers = self.laggers();
		let grace = self.config().lag_grace;
		let tick = self.tick();
		let result =
			self.acks()
				.on_ack(player, checksum, tick, &laggers, grace);
		match result
		{
			Ok(verdicts) => self.judge(verdicts),
			Err(error) => self.violation(player, error),
		}
	}

	fn judge(&self, verdicts: Vec<desync::Verdict>)
	{
		for verdict in verdicts
		{
			match verdict
			{
				desync::Verdict::Split { majority, minority } =>
				{
					for (player_id, checksum) in minority
					{
						warn!(
							"Player {} desynced: {:08x} instead of {:08x}.",
							player_id, checksum, majority
						);
						self.lobby.events.fire(&Event::Desync {
							player_id,
							checksum,
							majority,
						});
						self.lobby.events.fire(&Event::Error {
							player_id: Some(player_id),
							error: Error::Desync,
						});
						self.kick(player_id, LeaveReason::Lost);
					}
				}
				desync::Verdict::Tied { checksums } =>
				{
					error!("No majority among checksums {:?}.", checksums);
					self.lobby.events.fire(&Event::Error {
						player_id: None,
						error: Error::Desync,
					});
				}
				desync::Verdict::Straggling { players } =>
				{
					for player_id in players
					{
						warn!("Player {} stopped acknowledging ticks.", player_id);
						self.lobby.events.fire(&Event::Error {
							player_id: Some(player_id),
							error: Error::Straggling,
						});
						self.kick(player_id, LeaveReason::Disconnect);
					}
				}
			}
		}
	}

	fn start_lag(&self, player: &sync::Arc<Player>)
	{
		if self.stage() != Stage::Playing
		{
			return;
		}
		let seating = self.lobby.seating();
		let seat = seating.iter().find(|(x, _)| sync::Arc::ptr_eq(x, player));
		match seat
		{
			Some((_, false)) => (),
			Some((_, true)) =>
			{
				if self.stalls().add(player.id, Instant::now())
				{
					debug!("Observer {} stalled.", player.id);
				}
				return;
			}
			None => return,
		}
		let allowed = seating
			.iter()
			.filter(|(_, observer)| !observer)
			.fold(0, |mask, (x, _)| mask | lag::bit(x.id));

		let added = self.lag().add(player.id, allowed);
		if added
		{
			info!("Player {} started lagging.", player.id);
			self.lobby.events.fire(&Event::LagStarted {
				player_id: player.id,
			});
		}
	}

	fn stop_lag(&self, lagger: lag::Lagger)
	{
		let notice = lagger.as_message();
		info!(
			"Player {} stopped lagging after {}ms.",
			notice.player_id, notice.duration_ms
		);
		if lagger.duration > Duration::from_millis(0)
		{
			self.lobby.broadcast(Message::StopLag { lagger: notice });
		}
		self.lobby.events.fire(&Event::LagStopped {
			player_id: notice.player_id,
			duration_ms: notice.duration_ms,
		});
	}
}

impl Handler for Session
{
	fn handle_message(&self, player: &sync::Arc<Player>, message: Message)
	{
		match message
		{
			Message::Loaded => self.on_loaded(player),
			Message::Action { payload } => self.on_action(player, payload),
			Message::Ack { checksum } => self.on_ack(player, checksum),
			message => self.lobby.handle_lobby_message(player, message),
		}
	}

	fn handle_lag(&self, player: &sync::Arc<Player>, lagging: bool)
	{
		if lagging
		{
			self.start_lag(player);
		}
		else
		{
			let removed = self.lag().remove(player.id);
			if let Some(lagger) = removed
			{
				self.stop_lag(lagger);
			}
			if self.stalls().remove(player.id)
			{
				debug!("Observer {} recovered.", player.id);
			}
		}
	}

	fn handle_exit(&self, player: &sync::Arc<Player>)
	{
		self.lobby.remove_player(player);
		self.forget(player);
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	use crate::server::event::Tag;
	use crate::server::testclient::{eventually, Behavior, TestClient};

	use tokio::time::sleep;

	const MAP_SIZE: u32 = 4096;

	fn ms(x: u64) -> Duration
	{
		Duration::from_millis(x)
	}

	fn quick() -> Config
	{
		Config {
			ping_interval: ms(50),
			lag_delay: ms(200),
			recover_interval: ms(20),
			load_timeout: ms(2000),
			turn_rate: 50,
			lag_grace: ms(100),
			lag_soft_limit: ms(500),
			lag_hard_limit: ms(5000),
			..Config::default()
		}
	}

	fn session(num_slots: usize, config: Config) -> sync::Arc<Session>
	{
		with_layout(Layout::free_for_all(num_slots, false), config)
	}

	/// Two players and one observer seat.
	fn observed(config: Config) -> sync::Arc<Session>
	{
		let mut layout = Layout::free_for_all(3, true);
		layout.max_players = 2;
		with_layout(layout, config)
	}

	fn with_layout(layout: Layout, config: Config) -> sync::Arc<Session>
	{
		let map = MapCheck {
			path: "Maps/duel.w3x".to_string(),
			size: MAP_SIZE,
			checksum: 0x1234,
		};
		Session::new(Encoding::default(), layout, map, config).unwrap()
	}

	fn record_errors(session: &Session) -> sync::Arc<sync::Mutex<Vec<Event>>>
	{
		let errors = sync::Arc::new(sync::Mutex::new(Vec::new()));
		let e = errors.clone();
		session.lobby.events.on(Tag::Error, move |event, _| {
			e.lock().unwrap().push(event.clone());
		});
		errors
	}

	async fn seat(
		session: &sync::Arc<Session>,
		behaviors: Vec<Behavior>,
	) -> (Vec<TestClient>, Vec<sync::Arc<Player>>)
	{
		let mut clients = Vec::new();
		let mut players = Vec::new();
		for (i, behavior) in behaviors.into_iter().enumerate()
		{
			let (client, socket) =
				TestClient::pair(&format!("player{}", i + 1), behavior).await;
			players.push(session.accept(socket).await.unwrap());
			clients.push(client);
		}
		let seated = players.clone();
		eventually(move || seated.iter().all(|x| x.is_ready())).await;
		(clients, players)
	}

	fn acking(checksum: u32) -> Behavior
	{
		Behavior {
			ack: Some(checksum),
			..Behavior::default()
		}
	}

	#[tokio::test]
	async fn test_start_requires_readiness()
	{
		let session = session(2, quick());
		let stages = sync::Arc::new(sync::Mutex::new(Vec::new()));
		let s = stages.clone();
		let weak = sync::Arc::downgrade(&session);
		session.lobby.events.on(Tag::StageChanged, move |event, _| {
			if let (Event::StageChanged { stage }, Some(session)) =
				(event, weak.upgrade())
			{
				let seated = session.lobby.players().len();
				s.lock().unwrap().push((*stage, seated));
			}
		});
		let silent = Behavior {
			pong: false,
			..Behavior::default()
		};
		let (alice, socket) = TestClient::pair("alice", silent).await;
		let player = session.accept(socket).await.unwrap();
		eventually(|| player.is_map_ready()).await;
		assert_eq!(session.start(), Err(Error::NotReady));
		assert_eq!(session.stage(), Stage::Lobby);

		alice.set_pong(true);
		eventually(|| player.is_ready()).await;
		assert_eq!(session.start(), Ok(()));
		assert_eq!(session.start(), Err(Error::Locked));

		let (_bob, socket) = TestClient::pair("bob", Behavior::default()).await;
		assert_eq!(session.accept(socket).await.err(), Some(Error::Locked));
		eventually(|| session.stage() == Stage::Playing).await;
		eventually(|| stages.lock().unwrap().len() == 2).await;
		assert_eq!(
			*stages.lock().unwrap(),
			vec![(Stage::Loading, 1), (Stage::Playing, 1)]
		);
	}

	#[tokio::test]
	async fn test_ticks_relay_actions_in_order()
	{
		let session = session(2, quick());
		let ticks = sync::Arc::new(sync::Mutex::new(Vec::new()));
		let t = ticks.clone();
		session.lobby.events.on(Tag::TickAdvanced, move |event, _| {
			if let Event::TickAdvanced { tick, .. } = event
			{
				t.lock().unwrap().push(*tick);
			}
		});
		let (mut clients, _players) =
			seat(&session, vec![acking(7), acking(7)]).await;
		session.start().unwrap();

		let started = clients[0]
			.wait_for(|x| matches!(x, Message::CountdownEnd))
			.await;
		assert!(started.is_some());
		eventually(|| session.stage() == Stage::Playing).await;
		eventually(|| session.tick() >= 5).await;

		clients[0].send(Message::Action {
			payload: vec![1, 2, 3],
		});
		clients[0].send(Message::Action { payload: vec![4] });
		let slot = clients[1]
			.wait_for(|x| match x
			{
				Message::TimeSlot { actions, .. } => !actions.is_empty(),
				_ => false,
			})
			.await;
		match slot
		{
			Some(Message::TimeSlot {
				fragment,
				increment_ms,
				actions,
			}) =>
			{
				assert!(!fragment);
				assert!(increment_ms >= 1);
				assert_eq!(
					actions,
					vec![
						PlayerAction {
							player_id: 1,
							payload: vec![1, 2, 3],
						},
						PlayerAction {
							player_id: 1,
							payload: vec![4],
						},
					]
				);
			}
			other => panic!("unexpected {:?}", other),
		}

		let seen = ticks.lock().unwrap().clone();
		assert!(seen.windows(2).all(|x| x[1] == x[0] + 1));
		assert_eq!(seen[0], 1);

		for client in clients.iter()
		{
			client.hang_up();
		}
		session.wait_until_done().await;
		assert_eq!(session.stage(), Stage::Done);
	}

	#[tokio::test]
	async fn test_desynced_minority_is_kicked()
	{
		let session = session(3, quick());
		let desyncs = sync::Arc::new(sync::Mutex::new(Vec::new()));
		let d = desyncs.clone();
		session.lobby.events.on(Tag::Desync, move |event, _| {
			d.lock().unwrap().push(event.clone());
		});
		let (mut clients, _players) =
			seat(&session, vec![acking(7), acking(7), acking(9)]).await;
		session.start().unwrap();

		let kicked = clients[2]
			.wait_for(|x| matches!(x, Message::Kicked { .. }))
			.await;
		assert_eq!(
			kicked,
			Some(Message::Kicked {
				reason: LeaveReason::Lost
			})
		);
		let left = clients[0]
			.wait_for(|x| matches!(x, Message::PlayerLeft { .. }))
			.await;
		assert_eq!(
			left,
			Some(Message::PlayerLeft {
				player_id: 3,
				reason: LeaveReason::Lost,
			})
		);
		assert_eq!(
			desyncs.lock().unwrap()[0],
			Event::Desync {
				player_id: 3,
				checksum: 9,
				majority: 7,
			}
		);

		let tick = session.tick();
		eventually(|| session.tick() > tick + 5).await;
		assert_eq!(session.lobby.players().len(), 2);
		assert_eq!(desyncs.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_lagger_is_kicked_past_soft_limit()
	{
		let session = session(2, quick());
		let (mut clients, players) =
			seat(&session, vec![acking(5), acking(5)]).await;
		session.start().unwrap();
		eventually(|| session.tick() >= 3).await;

		clients[1].set_pong(false);
		let screen = clients[0]
			.wait_for(|x| matches!(x, Message::StartLag { .. }))
			.await;
		match screen
		{
			Some(Message::StartLag { laggers }) =>
			{
				assert_eq!(laggers.len(), 1);
				assert_eq!(laggers[0].player_id, 2);
			}
			other => panic!("unexpected {:?}", other),
		}
		let stalled = session.tick();

		let stop = clients[0]
			.wait_for(|x| matches!(x, Message::StopLag { .. }))
			.await;
		match stop
		{
			Some(Message::StopLag { lagger }) =>
			{
				assert_eq!(lagger.player_id, 2);
				assert!(lagger.duration_ms >= 500);
			}
			other => panic!("unexpected {:?}", other),
		}
		assert!(clients[1].closed().await);
		assert_eq!(players[1].leave_reason(), LeaveReason::Disconnect);
		eventually(|| session.tick() > stalled + 3).await;
	}

	#[tokio::test]
	async fn test_lagger_that_recovers_stays()
	{
		let session = session(2, quick());
		let stopped = sync::Arc::new(atomic::AtomicBool::new(false));
		let s = stopped.clone();
		session.lobby.events.on(Tag::LagStopped, move |_, _| {
			s.store(true, atomic::Ordering::SeqCst);
		});
		let (mut clients, _players) =
			seat(&session, vec![acking(5), acking(5)]).await;
		session.start().unwrap();
		eventually(|| session.tick() >= 3).await;

		clients[1].set_pong(false);
		clients[0]
			.wait_for(|x| matches!(x, Message::StartLag { .. }))
			.await;
		clients[1].set_pong(true);
		let stop = clients[0]
			.wait_for(|x| matches!(x, Message::StopLag { .. }))
			.await;
		assert!(matches!(stop, Some(Message::StopLag { .. })));
		eventually(|| stopped.load(atomic::Ordering::SeqCst)).await;
		let tick = session.tick();
		eventually(|| session.tick() > tick + 3).await;
		assert_eq!(session.lobby.players().len(), 2);
	}

	#[tokio::test]
	async fn test_stalled_observer_does_not_hold_players_back()
	{
		let config = Config {
			ack_lookahead: ms(2000),
			..quick()
		};
		let session = observed(config);
		let errors = record_errors(&session);
		let (clients, players) = seat(
			&session,
			vec![acking(7), acking(7), Behavior::default()],
		)
		.await;
		let seating = session.lobby.seating();
		assert_eq!(seating.iter().filter(|(_, observer)| *observer).count(), 1);
		assert!(seating[2].1);
		session.start().unwrap();
		eventually(|| session.stage() == Stage::Playing).await;

		clients[2].set_pong(false);
		eventually(|| players[2].is_lagging()).await;
		let tick = session.tick();
		eventually(|| session.tick() > tick + 150).await;
		assert_eq!(session.lobby.players().len(), 3);
		assert!(players[0].acks().len() < 100);
		assert!(errors.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_silent_observer_is_kicked_for_straggling()
	{
		let config = Config {
			ack_lookahead: ms(200),
			..quick()
		};
		let session = observed(config);
		let errors = record_errors(&session);
		let (mut clients, players) = seat(
			&session,
			vec![acking(7), acking(7), Behavior::default()],
		)
		.await;
		session.start().unwrap();

		assert!(clients[2].closed().await);
		assert_eq!(players[2].leave_reason(), LeaveReason::Disconnect);
		assert_eq!(
			errors.lock().unwrap()[0],
			Event::Error {
				player_id: Some(3),
				error: Error::Straggling,
			}
		);
		let tick = session.tick();
		eventually(|| session.tick() > tick + 20).await;
		assert_eq!(session.lobby.players().len(), 2);
		assert_eq!(errors.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_load_timeout_kicks_only_the_slow_player()
	{
		let config = Config {
			load_timeout: ms(200),
			..quick()
		};
		let session = session(2, config);
		let slow = Behavior {
			load: false,
			..Behavior::default()
		};
		let (mut clients, players) =
			seat(&session, vec![Behavior::default(), slow]).await;
		session.start().unwrap();
		assert_eq!(session.stage(), Stage::Loading);

		let loaded = clients[1]
			.wait_for(|x| matches!(x, Message::PlayerLoaded { .. }))
			.await;
		assert_eq!(loaded, Some(Message::PlayerLoaded { player_id: 1 }));
		assert!(clients[1].closed().await);
		assert_eq!(players[1].leave_reason(), LeaveReason::Disconnect);

		let left = clients[0]
			.wait_for(|x| matches!(x, Message::PlayerLeft { .. }))
			.await;
		assert_eq!(
			left,
			Some(Message::PlayerLeft {
				player_id: 2,
				reason: LeaveReason::Disconnect,
			})
		);
		eventually(|| session.stage() == Stage::Playing).await;
		assert!(players[0].is_loaded());
	}

	#[tokio::test]
	async fn test_zero_turn_rate_never_ticks()
	{
		let config = Config {
			turn_rate: 0,
			..quick()
		};
		let session = session(2, config);
		let (clients, _players) =
			seat(&session, vec![Behavior::default(), Behavior::default()])
				.await;
		session.start().unwrap();
		eventually(|| session.stage() == Stage::Playing).await;
		sleep(ms(100)).await;
		assert_eq!(session.tick(), 0);

		for client in clients.iter()
		{
			client.hang_up();
		}
		session.wait_until_done().await;
	}

	#[tokio::test]
	async fn test_protocol_violations_during_play()
	{
		let config = Config {
			turn_rate: 2,
			..quick()
		};
		let session = session(3, config);
		let (mut clients, _players) = seat(
			&session,
			vec![Behavior::default(), Behavior::default(), acking(1)],
		)
		.await;
		session.start().unwrap();
		eventually(|| session.stage() == Stage::Playing).await;

		// Nothing has been relayed yet, so there is nothing to acknowledge.
		clients[1].send(Message::Ack { checksum: 1 });
		assert!(clients[1].closed().await);
		clients[0].send(Message::Action {
			payload: vec![0; ACTION_SIZE_LIMIT + 1],
		});
		assert!(clients[0].closed().await);

		assert_eq!(session.lobby.players().len(), 1);
		eventually(|| session.tick() >= 2).await;
		assert_eq!(session.lobby.players().len(), 1);
	}

	#[tokio::test]
	async fn test_close_before_start()
	{
		let session = session(2, quick());
		let (mut clients, _players) =
			seat(&session, vec![Behavior::default()]).await;
		session.close();
		assert_eq!(session.stage(), Stage::Done);
		assert!(clients[0].closed().await);
		assert_eq!(session.start(), Err(Error::Locked));
		session.wait_until_done().await;
	}
}
