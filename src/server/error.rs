/* Server::Error */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error
{
	Full,
	PlayersOccupied,
	Locked,
	NotReady,
	InvalidSlot,
	InvalidArgument,
	InvalidPacket,
	SlotOccupied,
	ColorOccupied,
	HighPing,
	Straggling,
	Desync,
	MapUnavailable,
}

impl Error
{
	/// Whether a player that caused this error by sending a request
	/// has broken the protocol, as opposed to merely losing a race.
	pub fn is_violation(&self) -> bool
	{
		match self
		{
			Error::InvalidSlot => true,
			Error::InvalidArgument => true,
			Error::InvalidPacket => true,
			_ => false,
		}
	}
}

impl std::fmt::Display for Error
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		match self
		{
			Error::Full => write!(f, "no open slot available"),
			Error::PlayersOccupied =>
			{
				write!(f, "maximum number of players reached")
			}
			Error::Locked => write!(f, "slots are locked"),
			Error::NotReady => write!(f, "not every player is ready"),
			Error::InvalidSlot => write!(f, "invalid slot"),
			Error::InvalidArgument => write!(f, "invalid argument"),
			Error::InvalidPacket => write!(f, "invalid packet"),
			Error::SlotOccupied => write!(f, "slot is occupied"),
			Error::ColorOccupied => write!(f, "color is occupied"),
			Error::HighPing => write!(f, "ping too high"),
			Error::Straggling =>
			{
				write!(f, "held back other players for too long")
			}
			Error::Desync => write!(f, "game state desynchronized"),
			Error::MapUnavailable => write!(f, "map unavailable"),
		}
	}
}

impl std::error::Error for Error {}
