/* Server */

use lockstep_lobby::common::log;
use lockstep_lobby::server::host;
use lockstep_lobby::server::settings::Settings;

use docopt::Docopt;

use serde_derive::Deserialize;

const USAGE: &str = "
Lockstep lobby server.

Usage:
  server [--settings=<file>] [--port=<port>] [--autostart=<n>]
  server (-h | --help)

Options:
  -h --help          Show this screen.
  --settings=<file>  Settings file, either JSON or TOML.
  --port=<port>      Port to listen on, overriding the settings.
  --autostart=<n>    Start the game once this many players are ready.
";

#[derive(Debug, Deserialize)]
struct Args
{
	flag_settings: Option<String>,
	flag_port: Option<u16>,
	flag_autostart: Option<usize>,
}

fn main() -> Result<(), anyhow::Error>
{
	let args: Args = Docopt::new(USAGE)
		.and_then(|d| d.deserialize())
		.unwrap_or_else(|e| e.exit());

	let mut settings = match &args.flag_settings
	{
		Some(filename) => Settings::load(filename)?,
		None => Settings::default(),
	};
	if let Some(port) = args.flag_port
	{
		settings.port = Some(port);
	}
	if let Some(autostart) = args.flag_autostart
	{
		settings.autostart = Some(autostart);
	}

	let logname = settings
		.logname
		.clone()
		.unwrap_or_else(|| "server".to_string());
	let loglevel = settings.loglevel.unwrap_or_default();
	log::start(&logname, loglevel)?;

	println!(
		"[ Lockstep Lobby Server ] ({} v{})",
		logname,
		env!("CARGO_PKG_VERSION")
	);
	println!();

	host::run_server(&settings)?;

	println!();
	println!("[ Done ]");
	Ok(())
}
