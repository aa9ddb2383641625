/* Server::Host */

use crate::server::session::{Session, Stage};
use crate::server::settings::Settings;

use std::net::SocketAddr;
use std::sync;

use log::*;

use anyhow::Context;

use futures::select;
use futures::FutureExt;

use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::SignalKind;
use tokio::time::{interval, Duration};

const AUTOSTART_INTERVAL: Duration = Duration::from_millis(500);

/// Hosts a single session until it is done or the process is told to stop.
#[tokio::main]
pub async fn run_server(settings: &Settings) -> Result<(), anyhow::Error>
{
	increase_sockets().context("raising the open file limit")?;

	let session = Session::new(
		settings.encoding(),
		settings.layout(),
		settings.map(),
		settings.config(),
	)
	.context("creating the session")?;

	let address: SocketAddr =
		format!("{}:{}", settings.get_server(), settings.get_port())
			.parse()
			.context("parsing the listening address")?;
	let listener = TcpListener::bind(&address)
		.await
		.with_context(|| format!("binding to {}", address))?;
	info!("Listening on {}.", address);

	let mut terminate = tokio::signal::unix::signal(SignalKind::terminate())?;
	let mut autostart_timer = interval(AUTOSTART_INTERVAL);

	loop
	{
		select! {
			listened = listener.accept().fuse() => match listened
			{
				Ok((socket, peer)) =>
				{
					debug!("Incoming connection from {}.", peer);
					accept(&session, socket);
				}
				Err(error) => warn!("Failed to accept connection: {}", error),
			},
			_ = autostart_timer.tick().fuse() =>
			{
				autostart(&session, settings.autostart);
			}
			_ = terminate.recv().fuse() =>
			{
				info!("Received SIGTERM.");
				break;
			}
			_ = tokio::signal::ctrl_c().fuse() =>
			{
				info!("Received interrupt.");
				break;
			}
			() = session.wait_until_done().fuse() => break,
		}
	}

	session.close();
	session.wait_until_done().await;
	info!("Session ended after {} ticks.", session.tick());
	Ok(())
}

fn accept(session: &sync::Arc<Session>, socket: TcpStream)
{
	if let Err(error) = socket.set_nodelay(true)
	{
		warn!("Failed to disable Nagle's algorithm: {}", error);
	}
	let session = session.clone();
	tokio::spawn(async move {
		match session.accept(socket).await
		{
			Ok(player) =>
			{
				info!("Player {} joined as '{}'.", player.id, player.name)
			}
			Err(error) => info!("Refused connection: {}", error),
		}
	});
}

/// Starts the session once enough players are ready.
fn autostart(session: &Session, threshold: Option<usize>)
{
	let threshold = match threshold
	{
		Some(threshold) if threshold > 0 => threshold,
		_ => return,
	};
	if session.stage() != Stage::Lobby
	{
		return;
	}
	if session.lobby.count_ready() < threshold
	{
		return;
	}
	match session.start()
	{
		Ok(()) => info!("Autostarted with {} ready players.", threshold),
		Err(error) => debug!("Not starting yet: {}", error),
	}
}

#[cfg(not(feature = "no-increase-sockets"))]
fn increase_sockets() -> std::io::Result<()>
{
	const MAX_SOCKETS: rlimit::rlim = 16384;
	rlimit::Resource::NOFILE.set(MAX_SOCKETS, MAX_SOCKETS)
}

#[cfg(feature = "no-increase-sockets")]
fn increase_sockets() -> std::io::Result<()>
{
	Ok(())
}
