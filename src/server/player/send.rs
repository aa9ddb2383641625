/* Server::Player::Send */

use crate::server::message::Message;
use crate::server::wire;

use log::*;

use futures::select;
use futures::FutureExt;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

/// Writes queued messages until the player starts closing, then flushes
/// whatever is still queued (such as a kick notice) and shuts down.
pub async fn run<W>(
	player_id: u8,
	mut sendbuffer: mpsc::Receiver<Message>,
	mut socket: W,
	write_timeout: Duration,
	mut closed: watch::Receiver<bool>,
) -> Result<(), Error>
where
	W: AsyncWrite + Unpin,
{
	loop
	{
		let message = select! {
			x = sendbuffer.recv().fuse() => match x
			{
				Some(message) => message,
				None => break,
			},
			() = super::wait_until_closing(&mut closed).fuse() => break,
		};
		send(&mut socket, &message, write_timeout).await?;
	}

	sendbuffer.close();
	while let Some(message) = sendbuffer.recv().await
	{
		send(&mut socket, &message, write_timeout).await?;
	}

	trace!("Shutting down connection of player {}...", player_id);
	timeout(write_timeout, socket.shutdown())
		.await
		.map_err(|_elapsed| Error::Timeout)??;
	Ok(())
}

async fn send<W>(
	socket: &mut W,
	message: &Message,
	write_timeout: Duration,
) -> Result<(), Error>
where
	W: AsyncWrite + Unpin,
{
	timeout(write_timeout, wire::write_message(socket, message))
		.await
		.map_err(|_elapsed| Error::Timeout)??;
	Ok(())
}

#[derive(Debug)]
pub enum Error
{
	Timeout,
	Wire(wire::Error),
}

impl From<wire::Error> for Error
{
	fn from(error: wire::Error) -> Error
	{
		Error::Wire(error)
	}
}

impl From<std::io::Error> for Error
{
	fn from(error: std::io::Error) -> Error
	{
		Error::Wire(wire::Error::Io(error))
	}
}

impl std::fmt::Display for Error
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		match self
		{
			Error::Timeout => write!(f, "Write deadline exceeded"),
			Error::Wire(error) => error.fmt(f),
		}
	}
}
