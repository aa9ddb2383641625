/* Server::Settings */

use crate::common::log;
use crate::server::slot::{Encoding, Layout, LayoutFlag, MapCheck};

use std::path::Path;
use std::time::Duration;

use enumset::EnumSet;

use serde_derive::Deserialize;

use anyhow::Context;

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Settings
{
	#[serde(default)]
	pub logname: Option<String>,
	#[serde(default)]
	pub loglevel: Option<log::Level>,

	#[serde(default)]
	pub server: Option<String>,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub autostart: Option<usize>,

	#[serde(default)]
	pub game_version: Option<u32>,
	#[serde(default)]
	pub slots: Option<usize>,
	#[serde(default)]
	pub observers: Option<bool>,
	#[serde(default)]
	pub max_players: Option<u8>,
	#[serde(default)]
	pub custom_forces: Option<bool>,
	#[serde(default)]
	pub fixed_player_settings: Option<bool>,

	#[serde(default)]
	pub map_path: Option<String>,
	#[serde(default)]
	pub map_size: Option<u32>,
	#[serde(default)]
	pub map_checksum: Option<u32>,

	#[serde(default)]
	pub turn_rate: Option<u32>,
	#[serde(default)]
	pub ping_interval_ms: Option<u64>,
	#[serde(default)]
	pub lag_delay_ms: Option<u64>,
	#[serde(default)]
	pub recover_interval_ms: Option<u64>,
	#[serde(default)]
	pub read_timeout_ms: Option<u64>,
	#[serde(default)]
	pub write_timeout_ms: Option<u64>,
	#[serde(default)]
	pub load_timeout_ms: Option<u64>,
	#[serde(default)]
	pub lag_grace_ms: Option<u64>,
	#[serde(default)]
	pub lag_soft_limit_ms: Option<u64>,
	#[serde(default)]
	pub lag_hard_limit_ms: Option<u64>,
	#[serde(default)]
	pub player_vote_weight: Option<u32>,
	#[serde(default)]
	pub observer_vote_weight: Option<u32>,
}

impl Settings
{
	pub fn load(filename: &str) -> Result<Settings, anyhow::Error>
	{
		let filename = Path::new(filename);
		let raw = std::fs::read_to_string(filename).with_context(|| {
			format!("reading settings from '{}'", filename.display())
		})?;
		let is_toml = filename.extension().map_or(false, |x| x == "toml");
		let settings = if is_toml
		{
			toml::from_str(&raw).with_context(|| {
				format!("parsing settings from '{}'", filename.display())
			})?
		}
		else
		{
			serde_json::from_str(&raw).with_context(|| {
				format!("parsing settings from '{}'", filename.display())
			})?
		};
		Ok(settings)
	}

	pub fn get_server(&self) -> &str
	{
		self.server.as_deref().unwrap_or("0.0.0.0")
	}

	pub fn get_port(&self) -> u16
	{
		self.port.unwrap_or(6112)
	}

	pub fn encoding(&self) -> Encoding
	{
		match self.game_version
		{
			Some(game_version) => Encoding { game_version },
			None => Encoding::default(),
		}
	}

	pub fn layout(&self) -> Layout
	{
		let num_slots = self
			.slots
			.unwrap_or(12)
			.min(self.encoding().num_colors() as usize);
		let observers = self.observers.unwrap_or(false);
		let mut layout = Layout::free_for_all(num_slots, observers);
		let mut flags = EnumSet::empty();
		if self.custom_forces.unwrap_or(false)
		{
			flags |= LayoutFlag::CustomForces;
		}
		if self.fixed_player_settings.unwrap_or(false)
		{
			flags |= LayoutFlag::FixedPlayerSettings;
		}
		layout.flags = flags;
		layout.max_players = self.max_players.unwrap_or(0);
		layout
	}

	pub fn map(&self) -> MapCheck
	{
		MapCheck {
			path: self.map_path.clone().unwrap_or_default(),
			size: self.map_size.unwrap_or(0),
			checksum: self.map_checksum.unwrap_or(0),
		}
	}

	pub fn config(&self) -> Config
	{
		let defaults = Config::default();
		let ms = |x: Option<u64>, default: Duration| {
			x.map(Duration::from_millis).unwrap_or(default)
		};
		Config {
			ping_interval: ms(self.ping_interval_ms, defaults.ping_interval),
			lag_delay: ms(self.lag_delay_ms, defaults.lag_delay),
			recover_interval: ms(
				self.recover_interval_ms,
				defaults.recover_interval,
			),
			read_timeout: ms(self.read_timeout_ms, defaults.read_timeout),
			write_timeout: ms(self.write_timeout_ms, defaults.write_timeout),
			handshake_timeout: defaults.handshake_timeout,
			load_timeout: ms(self.load_timeout_ms, defaults.load_timeout),
			turn_rate: self.turn_rate.unwrap_or(defaults.turn_rate),
			lag_grace: ms(self.lag_grace_ms, defaults.lag_grace),
			lag_soft_limit: ms(self.lag_soft_limit_ms, defaults.lag_soft_limit),
			lag_hard_limit: ms(self.lag_hard_limit_ms, defaults.lag_hard_limit),
			ack_lookahead: defaults.ack_lookahead,
			player_vote_weight: self
				.player_vote_weight
				.unwrap_or(defaults.player_vote_weight),
			observer_vote_weight: self
				.observer_vote_weight
				.unwrap_or(defaults.observer_vote_weight),
		}
	}
}

/// Timing and policy knobs of a lobby and the session built on top of it.
#[derive(Clone, Debug)]
pub struct Config
{
	/// Time between timing probes while replies arrive in time.
	pub ping_interval: Duration,
	/// How long a probe may go unanswered before the player is lagging.
	pub lag_delay: Duration,
	/// Time between probes while the player is lagging.
	pub recover_interval: Duration,
	/// A connection that stays silent for this long is dropped.
	pub read_timeout: Duration,
	pub write_timeout: Duration,
	pub handshake_timeout: Duration,

	pub load_timeout: Duration,
	/// Ticks per second; zero disables the tick scheduler.
	pub turn_rate: u32,

	/// Lag after which the other players may drain acks without the lagger.
	pub lag_grace: Duration,
	pub lag_soft_limit: Duration,
	pub lag_hard_limit: Duration,
	/// How far (in game time) a player may run ahead of the slowest player.
	pub ack_lookahead: Duration,

	pub player_vote_weight: u32,
	pub observer_vote_weight: u32,
}

impl Config
{
	pub fn tick_period(&self) -> Option<Duration>
	{
		if self.turn_rate == 0
		{
			None
		}
		else
		{
			Some(Duration::from_secs(1) / self.turn_rate)
		}
	}
}

impl Default for Config
{
	fn default() -> Config
	{
		Config {
			ping_interval: Duration::from_secs(5),
			lag_delay: Duration::from_secs(2),
			recover_interval: Duration::from_secs(1),
			read_timeout: Duration::from_secs(300),
			write_timeout: Duration::from_secs(1),
			handshake_timeout: Duration::from_secs(5),
			load_timeout: Duration::from_secs(120),
			turn_rate: 10,
			lag_grace: Duration::from_secs(5),
			lag_soft_limit: Duration::from_secs(25),
			lag_hard_limit: Duration::from_secs(180),
			ack_lookahead: Duration::from_secs(30),
			player_vote_weight: 255,
			observer_vote_weight: 1,
		}
	}
}
