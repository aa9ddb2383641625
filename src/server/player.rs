/* Server::Player */

mod ackqueue;
mod ping;
mod receive;
mod send;

pub use ackqueue::{AckQueue, Overflow};

use crate::server::limits::*;
use crate::server::message::{LeaveReason, Message};
use crate::server::settings::Config;

use std::sync;
use std::sync::atomic;
use std::time::Duration;

use log::*;

use futures::select;
use futures::FutureExt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::watch;

/// Whatever owns the players: receives their messages and lifecycle events.
/// Callbacks run on the player's own tasks.
pub trait Handler: Send + Sync + 'static
{
	fn handle_message(&self, player: &sync::Arc<Player>, message: Message);

	/// Called when a player stops or resumes answering timing probes.
	fn handle_lag(&self, player: &sync::Arc<Player>, lagging: bool);

	/// Called exactly once, after all of the player's tasks have ended.
	fn handle_exit(&self, player: &sync::Arc<Player>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State
{
	Connecting = 0,
	Active = 1,
	Leaving = 2,
	Closed = 3,
}

impl State
{
	fn from_u8(x: u8) -> State
	{
		match x
		{
			0 => State::Connecting,
			1 => State::Active,
			2 => State::Leaving,
			_ => State::Closed,
		}
	}
}

/// Round trip time of a player that has not answered any probe yet.
const RTT_UNSET: u32 = u32::MAX;
/// Leave reason of a player that has not announced one.
const REASON_UNSET: u8 = 0;

pub struct Player
{
	pub id: u8,
	pub name: String,
	pub join_counter: u32,

	sendbuffer: mpsc::Sender<Message>,
	closing: watch::Sender<bool>,
	closed: watch::Receiver<bool>,

	state: atomic::AtomicU8,
	rtt_ms: atomic::AtomicU32,
	pong_received: atomic::AtomicBool,
	map_ready: atomic::AtomicBool,
	ready: atomic::AtomicBool,
	loaded: atomic::AtomicBool,
	lagging: atomic::AtomicBool,
	leave_reason: atomic::AtomicU8,

	acks: sync::Mutex<AckQueue>,
}

/// The receiving end of a player's sendbuffer, handed to its send task
/// once the connection starts.
pub struct Inbox
{
	sendbuffer: mpsc::Receiver<Message>,
}

impl Player
{
	pub fn new(
		id: u8,
		name: String,
		join_counter: u32,
	) -> (sync::Arc<Player>, Inbox)
	{
		let (sendbuffer_in, sendbuffer_out) = mpsc::channel(SENDBUFFER_SIZE);
		let (closing_in, closing_out) = watch::channel(false);
		let player = Player {
			id,
			name,
			join_counter,
			sendbuffer: sendbuffer_in,
			closing: closing_in,
			closed: closing_out,
			state: atomic::AtomicU8::new(State::Connecting as u8),
			rtt_ms: atomic::AtomicU32::new(RTT_UNSET),
			pong_received: atomic::AtomicBool::new(false),
			map_ready: atomic::AtomicBool::new(false),
			ready: atomic::AtomicBool::new(false),
			loaded: atomic::AtomicBool::new(false),
			lagging: atomic::AtomicBool::new(false),
			leave_reason: atomic::AtomicU8::new(REASON_UNSET),
			acks: sync::Mutex::new(AckQueue::with_capacity(ACK_QUEUE_CAPACITY)),
		};
		let inbox = Inbox {
			sendbuffer: sendbuffer_out,
		};
		(sync::Arc::new(player), inbox)
	}

	/// Spawns the tasks that serve this player's connection. The canary is
	/// held until every task has ended.
	pub fn start<S>(
		self: &sync::Arc<Self>,
		inbox: Inbox,
		socket: S,
		handler: sync::Arc<dyn Handler>,
		config: Config,
		canary: mpsc::Sender<()>,
	) where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let task = run(self.clone(), inbox, socket, handler, config, canary);
		tokio::spawn(task);
	}

	/// Queues a message without waiting. A player whose sendbuffer is full
	/// is not keeping up and gets disconnected.
	pub fn send(&self, message: Message)
	{
		if self.is_closing()
		{
			return;
		}
		match self.sendbuffer.try_send(message)
		{
			Ok(()) => (),
			Err(mpsc::error::TrySendError::Full(_)) =>
			{
				error!("Sendbuffer of player {} is full.", self.id);
				self.close();
			}
			Err(mpsc::error::TrySendError::Closed(_)) => (),
		}
	}

	/// Starts closing the connection. Idempotent.
	pub fn close(&self)
	{
		let mut current = self.state.load(atomic::Ordering::SeqCst);
		loop
		{
			if current >= State::Leaving as u8
			{
				return;
			}
			match self.state.compare_exchange(
				current,
				State::Leaving as u8,
				atomic::Ordering::SeqCst,
				atomic::Ordering::SeqCst,
			)
			{
				Ok(_) => break,
				Err(actual) => current = actual,
			}
		}
		debug!("Closing player {}...", self.id);
		if let Err(error) = self.closing.send(true)
		{
			trace!("Player {} has no tasks left: {}", self.id, error);
		}
	}

	pub fn state(&self) -> State
	{
		State::from_u8(self.state.load(atomic::Ordering::SeqCst))
	}

	pub fn is_closing(&self) -> bool
	{
		self.state() as u8 >= State::Leaving as u8
	}

	pub fn rtt(&self) -> Option<Duration>
	{
		match self.rtt_ms.load(atomic::Ordering::Relaxed)
		{
			RTT_UNSET => None,
			ms => Some(Duration::from_millis(ms as u64)),
		}
	}

	fn record_pong(&self, rtt: Option<Duration>)
	{
		if let Some(rtt) = rtt
		{
			let ms = rtt.as_millis().min((RTT_UNSET - 1) as u128) as u32;
			self.rtt_ms.store(ms, atomic::Ordering::Relaxed);
		}
		if !self.pong_received.swap(true, atomic::Ordering::SeqCst)
		{
			self.update_ready();
		}
	}

	pub fn set_map_ready(&self)
	{
		if !self.map_ready.swap(true, atomic::Ordering::SeqCst)
		{
			self.update_ready();
		}
	}

	pub fn is_map_ready(&self) -> bool
	{
		self.map_ready.load(atomic::Ordering::SeqCst)
	}

	fn update_ready(&self)
	{
		if self.pong_received.load(atomic::Ordering::SeqCst)
			&& self.map_ready.load(atomic::Ordering::SeqCst)
			&& !self.ready.swap(true, atomic::Ordering::SeqCst)
		{
			debug!("Player {} is ready.", self.id);
		}
	}

	/// True once a timing reply and a map-ready report have both arrived.
	pub fn is_ready(&self) -> bool
	{
		self.ready.load(atomic::Ordering::SeqCst)
	}

	/// Returns true only for the first call.
	pub fn mark_loaded(&self) -> bool
	{
		!self.loaded.swap(true, atomic::Ordering::SeqCst)
	}

	pub fn is_loaded(&self) -> bool
	{
		self.loaded.load(atomic::Ordering::SeqCst)
	}

	pub fn is_lagging(&self) -> bool
	{
		self.lagging.load(atomic::Ordering::SeqCst)
	}

	/// First writer wins; returns whether this call set the reason.
	pub fn set_leave_reason(&self, reason: LeaveReason) -> bool
	{
		self.leave_reason
			.compare_exchange(
				REASON_UNSET,
				reason as u8,
				atomic::Ordering::SeqCst,
				atomic::Ordering::SeqCst,
			)
			.is_ok()
	}

	pub fn leave_reason(&self) -> LeaveReason
	{
		match self.leave_reason.load(atomic::Ordering::SeqCst)
		{
			7 => LeaveReason::Lost,
			8 => LeaveReason::LostBuildings,
			9 => LeaveReason::Won,
			10 => LeaveReason::Draw,
			11 => LeaveReason::Observer,
			13 => LeaveReason::Lobby,
			_ => LeaveReason::Disconnect,
		}
	}

	pub fn acks(&self) -> sync::MutexGuard<AckQueue>
	{
		self.acks.lock().unwrap_or_else(sync::PoisonError::into_inner)
	}

	fn closed(&self) -> watch::Receiver<bool>
	{
		self.closed.clone()
	}
}

impl std::fmt::Debug for Player
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		f.debug_struct("Player")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("state", &self.state())
			.finish()
	}
}

/// Resolves once the player starts closing.
async fn wait_until_closing(closed: &mut watch::Receiver<bool>)
{
	loop
	{
		if *closed.borrow()
		{
			return;
		}
		if closed.changed().await.is_err()
		{
			return;
		}
	}
}

async fn run<S>(
	player: sync::Arc<Player>,
	inbox: Inbox,
	socket: S,
	handler: sync::Arc<dyn Handler>,
	config: Config,
	canary: mpsc::Sender<()>,
) where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	let id = player.id;
	match player.state.compare_exchange(
		State::Connecting as u8,
		State::Active as u8,
		atomic::Ordering::SeqCst,
		atomic::Ordering::SeqCst,
	)
	{
		Ok(_) => trace!("Player {} is active.", id),
		Err(_) => debug!("Player {} closed before starting.", id),
	}

	let (reader, writer) = tokio::io::split(socket);
	let (pongs_in, pongs_out) = mpsc::channel::<u32>(8);

	let receive_task = receive::run(
		player.clone(),
		handler.clone(),
		reader,
		pongs_in,
		config.read_timeout,
	);
	let ping_task =
		ping::run(player.clone(), handler.clone(), pongs_out, config.clone());
	let send_task = send::run(
		id,
		inbox.sendbuffer,
		writer,
		config.write_timeout,
		player.closed(),
	);

	let mut closed = player.closed();
	let support_task = async {
		select! {
			result = receive_task.fuse() => match result
			{
				Ok(()) => debug!("Player {} stopped receiving.", id),
				Err(error) => info!("Receive error from player {}: {}", id, error),
			},
			result = ping_task.fuse() => match result
			{
				Ok(()) => debug!("Player {} stopped pinging.", id),
				Err(error) => info!("Ping error for player {}: {}", id, error),
			},
			() = wait_until_closing(&mut closed).fuse() => (),
		}
		player.close();
	};
	let ((), sent) = futures::join!(support_task, send_task);
	match sent
	{
		Ok(()) => debug!("Player {} stopped sending.", id),
		Err(error) => info!("Send error for player {}: {}", id, error),
	}

	player
		.state
		.store(State::Closed as u8, atomic::Ordering::SeqCst);
	handler.handle_exit(&player);
	debug!("Player {} has disconnected.", id);
	let _discarded = canary;
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn test_ready_requires_pong_and_map_in_either_order()
	{
		let (a, _inbox_a) = Player::new(1, "alice".to_string(), 0);
		a.record_pong(Some(Duration::from_millis(30)));
		assert!(!a.is_ready());
		a.set_map_ready();
		assert!(a.is_ready());

		let (b, _inbox_b) = Player::new(2, "bob".to_string(), 0);
		b.set_map_ready();
		assert!(!b.is_ready());
		b.record_pong(None);
		assert!(b.is_ready());
		assert_eq!(b.rtt(), None);
		assert_eq!(a.rtt(), Some(Duration::from_millis(30)));
	}

	#[test]
	fn test_leave_reason_first_writer_wins()
	{
		let (player, _inbox) = Player::new(1, "alice".to_string(), 0);
		assert_eq!(player.leave_reason(), LeaveReason::Disconnect);
		assert!(player.set_leave_reason(LeaveReason::Lost));
		assert!(!player.set_leave_reason(LeaveReason::Won));
		assert_eq!(player.leave_reason(), LeaveReason::Lost);
	}

	#[test]
	fn test_close_is_idempotent()
	{
		let (player, mut inbox) = Player::new(1, "alice".to_string(), 0);
		player.send(Message::Loaded);
		player.close();
		player.close();
		assert_eq!(player.state(), State::Leaving);
		player.send(Message::CountdownStart);
		assert_eq!(inbox.sendbuffer.try_recv().ok(), Some(Message::Loaded));
		assert!(inbox.sendbuffer.try_recv().is_err());
	}
}
