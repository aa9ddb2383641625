/* Server::Event */

use crate::server::error::Error;
use crate::server::message::{LeaveReason, SlotInfo};
use crate::server::session::Stage;

use std::collections::HashMap;
use std::sync;
use std::sync::atomic;

#[derive(Debug, Clone, PartialEq)]
pub enum Event
{
	PlayerJoined
	{
		player_id: u8,
		name: String,
	},
	PlayerLeft
	{
		player_id: u8,
		reason: LeaveReason,
	},
	PlayerKicked
	{
		player_id: u8,
		reason: LeaveReason,
	},
	Chat
	{
		sender: u8,
		text: String,
		recipients: Vec<u8>,
	},
	SlotsChanged
	{
		slot_info: SlotInfo,
	},
	StageChanged
	{
		stage: Stage,
	},
	TickAdvanced
	{
		tick: u32,
		increment_ms: u16,
		num_actions: usize,
	},
	LagStarted
	{
		player_id: u8,
	},
	LagStopped
	{
		player_id: u8,
		duration_ms: u32,
	},
	Desync
	{
		player_id: u8,
		checksum: u32,
		majority: u32,
	},
	Error
	{
		player_id: Option<u8>,
		error: Error,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag
{
	PlayerJoined,
	PlayerLeft,
	PlayerKicked,
	Chat,
	SlotsChanged,
	StageChanged,
	TickAdvanced,
	LagStarted,
	LagStopped,
	Desync,
	Error,
}

impl Event
{
	pub fn tag(&self) -> Tag
	{
		match self
		{
			Event::PlayerJoined { .. } => Tag::PlayerJoined,
			Event::PlayerLeft { .. } => Tag::PlayerLeft,
			Event::PlayerKicked { .. } => Tag::PlayerKicked,
			Event::Chat { .. } => Tag::Chat,
			Event::SlotsChanged { .. } => Tag::SlotsChanged,
			Event::StageChanged { .. } => Tag::StageChanged,
			Event::TickAdvanced { .. } => Tag::TickAdvanced,
			Event::LagStarted { .. } => Tag::LagStarted,
			Event::LagStopped { .. } => Tag::LagStopped,
			Event::Desync { .. } => Tag::Desync,
			Event::Error { .. } => Tag::Error,
		}
	}
}

/// Per-dispatch state that handlers can use to steer the dispatch.
#[derive(Debug, Default)]
pub struct Dispatch
{
	stopped: bool,
	prevented: bool,
}

impl Dispatch
{
	/// No further handlers see this event.
	pub fn stop_propagation(&mut self)
	{
		self.stopped = true;
	}

	/// The server skips its default reaction, such as relaying a chat
	/// message or broadcasting the slot table.
	pub fn prevent_default(&mut self)
	{
		self.prevented = true;
	}

	pub fn is_prevented(&self) -> bool
	{
		self.prevented
	}
}

pub type Handler = sync::Arc<dyn Fn(&Event, &mut Dispatch) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Default)]
struct Registry
{
	catch_all: Vec<(Subscription, Handler)>,
	by_tag: HashMap<Tag, Vec<(Subscription, Handler)>>,
}

/// Observers of a lobby. Handlers run synchronously on whichever task
/// fires the event; no lobby lock is held while they run.
#[derive(Default)]
pub struct Events
{
	registry: sync::RwLock<Registry>,
	ticker: atomic::AtomicU64,
}

impl Events
{
	pub fn on_all<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Event, &mut Dispatch) + Send + Sync + 'static,
	{
		let subscription = self.next_subscription();
		let handler: Handler = sync::Arc::new(handler);
		let mut registry = write(&self.registry);
		registry.catch_all.push((subscription, handler));
		subscription
	}

	pub fn on<F>(&self, tag: Tag, handler: F) -> Subscription
	where
		F: Fn(&Event, &mut Dispatch) + Send + Sync + 'static,
	{
		let subscription = self.next_subscription();
		let handler: Handler = sync::Arc::new(handler);
		let mut registry = write(&self.registry);
		registry
			.by_tag
			.entry(tag)
			.or_default()
			.push((subscription, handler));
		subscription
	}

	pub fn off(&self, subscription: Subscription)
	{
		let mut registry = write(&self.registry);
		registry.catch_all.retain(|(x, _)| *x != subscription);
		for handlers in registry.by_tag.values_mut()
		{
			handlers.retain(|(x, _)| *x != subscription);
		}
	}

	/// Runs the catch-all handlers, then the handlers for the event's tag.
	pub fn fire(&self, event: &Event) -> Dispatch
	{
		let handlers: Vec<Handler> = {
			let registry = match self.registry.read()
			{
				Ok(guard) => guard,
				Err(poisoned) => poisoned.into_inner(),
			};
			let specific = registry.by_tag.get(&event.tag());
			registry
				.catch_all
				.iter()
				.chain(specific.into_iter().flatten())
				.map(|(_, handler)| handler.clone())
				.collect()
		};

		let mut dispatch = Dispatch::default();
		for handler in handlers
		{
			(*handler)(event, &mut dispatch);
			if dispatch.stopped
			{
				break;
			}
		}
		dispatch
	}

	fn next_subscription(&self) -> Subscription
	{
		Subscription(self.ticker.fetch_add(1, atomic::Ordering::Relaxed))
	}
}

fn write(
	registry: &sync::RwLock<Registry>,
) -> sync::RwLockWriteGuard<'_, Registry>
{
	match registry.write()
	{
		Ok(guard) => guard,
		Err(poisoned) => poisoned.into_inner(),
	}
}
