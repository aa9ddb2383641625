/* Server::Session::Ticker */

use super::{Session, Stage};

use crate::server::error::Error;
use crate::server::event::Event;
use crate::server::limits::*;
use crate::server::message::{LeaveReason, Message, PlayerAction};

use std::sync;
use std::sync::atomic;

use log::*;

use futures::select;
use futures::FutureExt;

use tokio::sync::mpsc;
use tokio::time as timer;
use tokio::time::Duration;

/// Drives the session until every player task has ended.
pub async fn run(session: sync::Arc<Session>, mut drain: mpsc::Receiver<()>)
{
	match session.lobby.config().tick_period()
	{
		Some(period) =>
		{
			let mut interval = timer::interval(period);
			let mut last = interval.tick().await;
			loop
			{
				select! {
					x = drain.recv().fuse() => match x
					{
						Some(()) => continue,
						None => break,
					},
					now = interval.tick().fuse() =>
					{
						session.on_tick(now - last);
						last = now;
					}
				}
			}
		}
		None =>
		{
			info!("Turn rate is zero; not scheduling ticks.");
			while let Some(()) = drain.recv().await {}
		}
	}

	debug!("All players have left; session is done.");
	session.finish();
}

impl Session
{
	fn on_tick(&self, elapsed: Duration)
	{
		let config = self.config();
		let stalled = {
			let mut roster = self.lag();
			if roster.is_empty()
			{
				None
			}
			else
			{
				let screen = roster.accumulate(elapsed);
				let victims =
					roster.victims(config.lag_soft_limit, config.lag_hard_limit);
				Some((screen, victims))
			}
		};

		match stalled
		{
			Some((screen, victims)) =>
			{
				if let Some(laggers) = screen
				{
					self.lobby.broadcast(Message::StartLag { laggers });
				}
				for player_id in victims
				{
					warn!("Player {} lagged for too long.", player_id);
					self.lobby.events.fire(&Event::Error {
						player_id: Some(player_id),
						error: Error::HighPing,
					});
					self.kick(player_id, LeaveReason::Disconnect);
				}
				let laggers = self.laggers();
				let verdicts = self.acks().settle(&laggers, config.lag_grace);
				self.judge(verdicts);
			}
			None => self.advance(elapsed),
		}
	}

	fn advance(&self, elapsed: Duration)
	{
		let increment_ms = increment(elapsed);
		let actions = std::mem::take(&mut *self.actions());
		let num_actions = actions.len();
		let tick = self.tick.fetch_add(1, atomic::Ordering::SeqCst) + 1;
		for message in pack(increment_ms, actions)
		{
			self.lobby.broadcast(message);
		}
		trace!("Tick {} (+{}ms, {} actions).", tick, increment_ms, num_actions);
		self.lobby.events.fire(&Event::TickAdvanced {
			tick,
			increment_ms,
			num_actions,
		});
	}

	fn finish(&self)
	{
		self.transition(Stage::Playing, Stage::Done);
	}
}

/// Rounds the time since the previous tick to the increment it announces.
pub fn increment(elapsed: Duration) -> u16
{
	let ms = (elapsed.as_micros() + 500) / 1000;
	ms.max(1).min(u16::MAX as u128) as u16
}

/// Splits the actions of one tick over as many time slots as needed to
/// stay under the transport ceiling. All but the last are fragments.
pub fn pack(increment_ms: u16, actions: Vec<PlayerAction>) -> Vec<Message>
{
	let mut messages = Vec::new();
	let mut batch = Vec::new();
	let mut size = TIME_SLOT_HEADER_SIZE;
	for action in actions
	{
		let cost = ACTION_OVERHEAD_SIZE + action.payload.len();
		if !batch.is_empty() && size + cost > TIME_SLOT_SIZE_LIMIT
		{
			messages.push(Message::TimeSlot {
				fragment: true,
				increment_ms,
				actions: std::mem::take(&mut batch),
			});
			size = TIME_SLOT_HEADER_SIZE;
		}
		size += cost;
		batch.push(action);
	}
	messages.push(Message::TimeSlot {
		fragment: false,
		increment_ms,
		actions: batch,
	});
	messages
}

#[cfg(test)]
mod tests
{
	use super::*;

	fn action(player_id: u8, size: usize) -> PlayerAction
	{
		PlayerAction {
			player_id,
			payload: vec![player_id; size],
		}
	}

	fn wire_size(message: &Message) -> usize
	{
		match message
		{
			Message::TimeSlot { actions, .. } =>
			{
				TIME_SLOT_HEADER_SIZE
					+ actions
						.iter()
						.map(|x| ACTION_OVERHEAD_SIZE + x.payload.len())
						.sum::<usize>()
			}
			_ => unreachable!(),
		}
	}

	#[test]
	fn test_empty_tick_is_one_slot()
	{
		assert_eq!(
			pack(100, Vec::new()),
			vec![Message::TimeSlot {
				fragment: false,
				increment_ms: 100,
				actions: Vec::new(),
			}]
		);
	}

	#[test]
	fn test_large_batches_are_fragmented_in_order()
	{
		let actions: Vec<PlayerAction> =
			(0..40u8).map(|i| action(i % 4 + 1, 97)).collect();
		let messages = pack(50, actions.clone());
		assert_eq!(messages.len(), 4);

		let mut relayed = Vec::new();
		for (i, message) in messages.iter().enumerate()
		{
			assert!(wire_size(message) <= TIME_SLOT_SIZE_LIMIT);
			match message
			{
				Message::TimeSlot {
					fragment,
					increment_ms,
					actions,
				} =>
				{
					assert_eq!(*fragment, i + 1 < messages.len());
					assert_eq!(*increment_ms, 50);
					relayed.extend(actions.iter().cloned());
				}
				_ => unreachable!(),
			}
		}
		assert_eq!(relayed, actions);
	}

	#[test]
	fn test_maximal_action_fits_alone()
	{
		let messages = pack(1, vec![action(1, 5), action(2, ACTION_SIZE_LIMIT)]);
		assert_eq!(messages.len(), 2);
		assert_eq!(wire_size(&messages[1]), TIME_SLOT_SIZE_LIMIT);
	}

	#[test]
	fn test_increment_rounding()
	{
		assert_eq!(increment(Duration::from_micros(100)), 1);
		assert_eq!(increment(Duration::from_micros(99_400)), 99);
		assert_eq!(increment(Duration::from_micros(99_500)), 100);
		assert_eq!(increment(Duration::from_secs(100)), u16::MAX);
	}
}
