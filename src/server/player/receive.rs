/* Server::Player::Receive */

use super::{Handler, Player};

use crate::server::message::Message;
use crate::server::wire;

use std::sync;

use log::*;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

pub async fn run<R>(
	player: sync::Arc<Player>,
	handler: sync::Arc<dyn Handler>,
	mut socket: R,
	pongs: mpsc::Sender<u32>,
	read_timeout: Duration,
) -> Result<(), Error>
where
	R: AsyncRead + Unpin,
{
	loop
	{
		let received = timeout(read_timeout, wire::read_message(&mut socket))
			.await
			.map_err(|_elapsed| Error::Timeout)?;
		let message = match received
		{
			Ok(message) => message,
			Err(error) if !error.is_fatal() =>
			{
				warn!("Ignoring message from player {}: {}", player.id, error);
				continue;
			}
			Err(error) => return Err(error.into()),
		};

		match message
		{
			Message::Pong { nonce } => match pongs.try_send(nonce)
			{
				Ok(()) => (),
				Err(mpsc::error::TrySendError::Full(_)) =>
				{
					trace!("Dropping surplus pong from player {}.", player.id);
				}
				Err(mpsc::error::TrySendError::Closed(_)) =>
				{
					return Err(Error::NoMorePings);
				}
			},
			Message::Leave { reason } =>
			{
				debug!("Player {} leaves ({:?}).", player.id, reason);
				player.set_leave_reason(reason);
				player.close();
				return Ok(());
			}
			message => handler.handle_message(&player, message),
		}
	}
}

#[derive(Debug)]
pub enum Error
{
	Timeout,
	NoMorePings,
	Wire(wire::Error),
}

impl From<wire::Error> for Error
{
	fn from(error: wire::Error) -> Error
	{
		Error::Wire(error)
	}
}

impl std::fmt::Display for Error
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		match self
		{
			Error::Timeout => write!(f, "Player stayed silent for too long"),
			Error::NoMorePings => write!(f, "Ping task ended"),
			Error::Wire(error) => error.fmt(f),
		}
	}
}
