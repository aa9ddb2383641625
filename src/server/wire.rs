/* Server::Wire */

use crate::server::limits::*;
use crate::server::message::Message;

use log::*;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use itertools::Itertools;

pub async fn read_message<R>(socket: &mut R) -> Result<Message, Error>
where
	R: AsyncRead + Unpin,
{
	let length = socket.read_u32().await?;

	if length as usize >= MESSAGE_SIZE_LIMIT
	{
		warn!(
			"Refusing to receive very large message of length {}, \
			 which is more than MESSAGE_SIZE_LIMIT.",
			length
		);
		return Err(Error::MessageTooLarge { length });
	}
	else if length as usize >= MESSAGE_SIZE_WARNING_LIMIT
	{
		warn!("Receiving very large message of length {}...", length);
	}

	let mut buffer = vec![0; length as usize];
	socket.read_exact(&mut buffer).await?;

	trace!("Received message of length {}.", buffer.len());
	parse_message(buffer)
}

fn parse_message(buffer: Vec<u8>) -> Result<Message, Error>
{
	let jsonstr = String::from_utf8(buffer).map_err(|_| Error::Malformed)?;

	if log_enabled!(log::Level::Trace)
	{
		trace!(
			"Received message: {}",
			jsonstr
				.chars()
				.take(500)
				.map(|x| x.escape_debug().to_string())
				.format("")
		);
	}

	match serde_json::from_str(&jsonstr)
	{
		Ok(message) => Ok(message),
		Err(error) => match error.classify()
		{
			serde_json::error::Category::Data => Err(Error::UnknownMessage),
			serde_json::error::Category::Io => Err(Error::Malformed),
			serde_json::error::Category::Syntax => Err(Error::Malformed),
			serde_json::error::Category::Eof => Err(Error::Malformed),
		},
	}
}

pub async fn write_message<W>(
	socket: &mut W,
	message: &Message,
) -> Result<(), Error>
where
	W: AsyncWrite + Unpin,
{
	let buffer = prepare_message(message)?;
	socket.write_all(&buffer).await?;
	socket.flush().await?;
	trace!("Sent {} bytes.", buffer.len());
	Ok(())
}

fn prepare_message(message: &Message) -> Result<Vec<u8>, Error>
{
	let jsonstr = serde_json::to_string(message).map_err(|e| {
		error!("Invalid message: {:?}", e);
		Error::Malformed
	})?;

	if jsonstr.len() >= MESSAGE_SIZE_LIMIT
	{
		error!(
			"Cannot send message of length {}, \
			 which is larger than MESSAGE_SIZE_LIMIT.",
			jsonstr.len()
		);
		return Err(Error::MessageTooLarge {
			length: jsonstr.len() as u32,
		});
	}

	let length = jsonstr.len() as u32;
	let mut buffer = length.to_be_bytes().to_vec();
	buffer.append(&mut jsonstr.into_bytes());
	Ok(buffer)
}

#[derive(Debug)]
pub enum Error
{
	Malformed,
	UnknownMessage,
	MessageTooLarge
	{
		length: u32,
	},
	Io(std::io::Error),
}

impl Error
{
	/// Errors after which the connection can no longer be read from.
	pub fn is_fatal(&self) -> bool
	{
		match self
		{
			Error::Malformed => false,
			Error::UnknownMessage => false,
			Error::MessageTooLarge { .. } => true,
			Error::Io(_) => true,
		}
	}
}

impl From<std::io::Error> for Error
{
	fn from(error: std::io::Error) -> Error
	{
		Error::Io(error)
	}
}

impl std::fmt::Display for Error
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		match self
		{
			Error::Malformed => write!(f, "malformed message"),
			Error::UnknownMessage => write!(f, "unknown message"),
			Error::MessageTooLarge { length } => write!(
				f,
				"Refusing message of length {}, \
				 which is more than MESSAGE_SIZE_LIMIT.",
				length
			),
			Error::Io(error) => error.fmt(f),
		}
	}
}

impl std::error::Error for Error {}
