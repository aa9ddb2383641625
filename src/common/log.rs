/* Log */

use serde_derive::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level
{
	Error,
	Warning,
	Info,
	Debug,
	Verbose,
}

impl Default for Level
{
	fn default() -> Level
	{
		Level::Info
	}
}

impl From<Level> for log::LevelFilter
{
	fn from(level: Level) -> log::LevelFilter
	{
		match level
		{
			Level::Error => log::LevelFilter::Error,
			Level::Warning => log::LevelFilter::Warn,
			Level::Info => log::LevelFilter::Info,
			Level::Debug => log::LevelFilter::Debug,
			Level::Verbose => log::LevelFilter::Trace,
		}
	}
}

pub fn trace_filename(logname: &str) -> String
{
	format!("logs/{}.trace.log", logname)
}

pub fn info_filename(logname: &str) -> String
{
	format!("logs/{}.info.log", logname)
}

pub fn error_filename(logname: &str) -> String
{
	format!("logs/{}.error.log", logname)
}

pub fn start(logname: &str, level: Level) -> Result<(), fern::InitError>
{
	std::fs::create_dir_all("logs")?;

	let tracelog = fern::Dispatch::new()
		.level(log::LevelFilter::from(level))
		.chain(fern::log_file(trace_filename(logname))?);
	let infolog = fern::Dispatch::new()
		.level(log::LevelFilter::Info)
		.chain(fern::log_file(info_filename(logname))?)
		.chain(std::io::stdout());
	let errorlog = fern::Dispatch::new()
		.level(log::LevelFilter::Warn)
		.chain(fern::log_file(error_filename(logname))?);

	fern::Dispatch::new()
		.format(|out, message, record| {
			out.finish(format_args!(
				"{time} {lvl:5} [{tid:x}] [{target}.rs:{ln}] {msg}",
				time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
				lvl = record.level(),
				tid = thread_id::get(),
				target = record.target(),
				ln = record.line().unwrap_or(0),
				msg = message
			))
		})
		.level(log::LevelFilter::from(level))
		.chain(tracelog)
		.chain(infolog)
		.chain(errorlog)
		.apply()?;
	Ok(())
}
