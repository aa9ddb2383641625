/* Server::TestClient */

use crate::server::message::Message;
use crate::server::wire;

use std::sync;
use std::sync::atomic;

use futures::select;
use futures::FutureExt;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};

const PATIENCE: Duration = Duration::from_secs(10);

/// What the client answers on its own.
#[derive(Debug, Clone)]
pub struct Behavior
{
	pub pong: bool,
	pub map: bool,
	pub load: bool,
	pub ack: Option<u32>,
}

impl Default for Behavior
{
	fn default() -> Behavior
	{
		Behavior {
			pong: true,
			map: true,
			load: true,
			ack: None,
		}
	}
}

/// A scripted game client on the other end of an in-memory connection.
pub struct TestClient
{
	outgoing: mpsc::UnboundedSender<Message>,
	incoming: mpsc::UnboundedReceiver<Message>,
	hangup: watch::Sender<bool>,
	pong: sync::Arc<atomic::AtomicBool>,
}

impl TestClient
{
	/// Returns the client and the server side of its connection, with the
	/// join request already written.
	pub async fn pair(name: &str, behavior: Behavior) -> (TestClient, DuplexStream)
	{
		let (client, server) = tokio::io::duplex(1 << 20);
		let (mut reader, mut writer) = tokio::io::split(client);
		let join = Message::Join {
			name: name.to_string(),
			join_counter: 0,
		};
		wire::write_message(&mut writer, &join).await.unwrap();

		let (outgoing_in, mut outgoing_out) = mpsc::unbounded_channel();
		let (incoming_in, incoming_out) = mpsc::unbounded_channel();
		let (hangup_in, mut hangup_out) = watch::channel(false);
		let pong = sync::Arc::new(atomic::AtomicBool::new(behavior.pong));

		tokio::spawn(async move {
			loop
			{
				let message = select! {
					x = outgoing_out.recv().fuse() => match x
					{
						Some(message) => message,
						None => break,
					},
					_ = hangup_out.changed().fuse() => break,
				};
				if wire::write_message(&mut writer, &message).await.is_err()
				{
					break;
				}
			}
			let _ = writer.shutdown().await;
		});

		let answers = outgoing_in.clone();
		let auto_pong = pong.clone();
		tokio::spawn(async move {
			loop
			{
				let message = match wire::read_message(&mut reader).await
				{
					Ok(message) => message,
					Err(error) if error.is_fatal() => break,
					Err(_) => continue,
				};
				let answer = match &message
				{
					Message::Ping { nonce } if auto_pong.load(atomic::Ordering::SeqCst) =>
					{
						Some(Message::Pong { nonce: *nonce })
					}
					Message::MapCheck { map } if behavior.map => Some(Message::MapState {
						ready: true,
						size: map.size,
					}),
					Message::CountdownEnd if behavior.load => Some(Message::Loaded),
					Message::TimeSlot {
						fragment: false, ..
					} => behavior.ack.map(|checksum| Message::Ack { checksum }),
					_ => None,
				};
				if let Some(answer) = answer
				{
					let _ = answers.send(answer);
				}
				if incoming_in.send(message).is_err()
				{
					break;
				}
			}
		});

		let client = TestClient {
			outgoing: outgoing_in,
			incoming: incoming_out,
			hangup: hangup_in,
			pong,
		};
		(client, server)
	}

	pub fn send(&self, message: Message)
	{
		let _ = self.outgoing.send(message);
	}

	pub fn set_pong(&self, pong: bool)
	{
		self.pong.store(pong, atomic::Ordering::SeqCst);
	}

	/// Closes the client's writing side, like a dropped connection.
	pub fn hang_up(&self)
	{
		let _ = self.hangup.send(true);
	}

	pub async fn recv(&mut self) -> Option<Message>
	{
		timeout(PATIENCE, self.incoming.recv()).await.ok().flatten()
	}

	/// Skips messages until one matches; None if the connection ends first.
	pub async fn wait_for<F>(&mut self, predicate: F) -> Option<Message>
	where
		F: Fn(&Message) -> bool,
	{
		loop
		{
			let message = self.recv().await?;
			if predicate(&message)
			{
				return Some(message);
			}
		}
	}

	/// Whether the server closes the connection within the patience limit.
	pub async fn closed(&mut self) -> bool
	{
		let deadline = Instant::now() + PATIENCE;
		loop
		{
			let remaining = deadline.saturating_duration_since(Instant::now());
			match timeout(remaining, self.incoming.recv()).await
			{
				Ok(Some(_)) => continue,
				Ok(None) => return true,
				Err(_elapsed) => return false,
			}
		}
	}
}

/// Polls a condition until it holds, panicking after the patience limit.
pub async fn eventually<F>(condition: F)
where
	F: Fn() -> bool,
{
	let start = Instant::now();
	while !condition()
	{
		assert!(start.elapsed() < PATIENCE, "condition never became true");
		sleep(Duration::from_millis(5)).await;
	}
}
