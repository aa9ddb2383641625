/* Server::Player::Ping */

use super::{Handler, Player};

use crate::server::message::Message;
use crate::server::settings::Config;

use std::sync;

use log::*;

use futures::select;
use futures::FutureExt;

use tokio::sync::mpsc;
use tokio::time as timer;
use tokio::time::{Duration, Instant};

pub async fn run(
	player: sync::Arc<Player>,
	handler: sync::Arc<dyn Handler>,
	mut pongs: mpsc::Receiver<u32>,
	config: Config,
) -> Result<(), Error>
{
	let mut nonce: u32 = rand::random();
	let mut lagging = false;

	loop
	{
		nonce = nonce.wrapping_add(1);
		let sendtime = Instant::now();
		player.send(Message::Ping { nonce });

		let tolerance = if lagging
		{
			config.recover_interval
		}
		else
		{
			config.lag_delay
		};
		let event =
			wait_for_pong(&mut pongs, nonce, lagging, sendtime, tolerance)
				.await?;

		match event
		{
			PongEvent::Received { rtt } =>
			{
				if let Some(rtt) = rtt
				{
					trace!("Player {} has {}ms ping.", player.id, rtt.as_millis());
				}
				player.record_pong(rtt);
				if lagging
				{
					lagging = false;
					player.lagging.store(false, sync::atomic::Ordering::SeqCst);
					info!("Player {} stopped lagging.", player.id);
					handler.handle_lag(&player, false);
				}
				timer::sleep_until(sendtime + config.ping_interval).await;
			}
			PongEvent::Timeout =>
			{
				if !lagging
				{
					lagging = true;
					player.lagging.store(true, sync::atomic::Ordering::SeqCst);
					info!("Player {} started lagging.", player.id);
					handler.handle_lag(&player, true);
				}
			}
		}
	}
}

/// While lagging, any late reply to an earlier probe also proves that the
/// player is alive again; otherwise only the current probe counts.
async fn wait_for_pong(
	pongs: &mut mpsc::Receiver<u32>,
	nonce: u32,
	lagging: bool,
	sendtime: Instant,
	tolerance: Duration,
) -> Result<PongEvent, Error>
{
	let deadline = sendtime + tolerance;
	loop
	{
		let event = select! {
			x = pongs.recv().fuse() => match x
			{
				Some(received) => received,
				None => return Err(Error::NoMorePongs),
			},
			() = timer::sleep_until(deadline).fuse() =>
			{
				return Ok(PongEvent::Timeout)
			}
		};

		if event == nonce
		{
			return Ok(PongEvent::Received {
				rtt: Some(sendtime.elapsed()),
			});
		}
		else if lagging && nonce.wrapping_sub(event) < (1 << 31)
		{
			return Ok(PongEvent::Received { rtt: None });
		}
		else
		{
			trace!("Ignoring stale pong {} (expecting {}).", event, nonce);
		}
	}
}

enum PongEvent
{
	Received
	{
		rtt: Option<Duration>,
	},
	Timeout,
}

#[derive(Debug)]
pub enum Error
{
	NoMorePongs,
}

impl std::fmt::Display for Error
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		match self
		{
			Error::NoMorePongs => write!(f, "Pong stream ended"),
		}
	}
}
