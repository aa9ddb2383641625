/* This file defines some sanity limits for networking. */
pub const MESSAGE_SIZE_LIMIT: usize = 524288;
pub const MESSAGE_SIZE_WARNING_LIMIT: usize = 65537;

/* Relayed time slots must fit in a single datagram-sized transport unit. */
pub const TIME_SLOT_SIZE_LIMIT: usize = 1200;
pub const TIME_SLOT_HEADER_SIZE: usize = 8;
pub const ACTION_OVERHEAD_SIZE: usize = 3;
pub const ACTION_SIZE_LIMIT: usize =
	TIME_SLOT_SIZE_LIMIT - TIME_SLOT_HEADER_SIZE - ACTION_OVERHEAD_SIZE;

pub const NAME_LENGTH_LIMIT: usize = 15;
pub const CHAT_LENGTH_LIMIT: usize = 254;

pub const ACK_QUEUE_CAPACITY: usize = 2048;
pub const SENDBUFFER_SIZE: usize = 1000;
