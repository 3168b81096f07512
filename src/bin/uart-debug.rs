#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate uart_debug;
use uart_debug::*;

use std::convert::TryFrom;
use std::io;
use std::path::Path;
use std::process::exit;

use uart_debug::config::StopBits;
use uart_debug::host::{
	SerialTransport,
	SimTransport,
	Transport,
};
use uart_debug::program::ResetOnError;
use uart_debug::shell::Shell;
use uart_debug::sim::BitTiming;

const DEFAULT_CONFIG: &str = "config.json";

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	match get_opt_param(matches, name)? {
		Some(p) => Ok(p),
		None => bail!("missing parameter {}", name),
	}
}

fn get_opt_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<Option<T>>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => return Ok(None),
	};
	param.parse::<T>().map(Some).map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter {}: {}", name, e);
		e.context(msg).into()
	})
}

fn get_number(matches: &clap::ArgMatches, name: &str) -> AResult<Option<u64>> {
	match matches.value_of(name) {
		Some(p) => parse_number(p).map(Some).map_err(|e| {
			let msg = format!("invalid parameter {}", name);
			e.context(msg).into()
		}),
		None => Ok(None),
	}
}

fn load_config(matches: &clap::ArgMatches) -> AResult<SessionConfig> {
	let path = Path::new(matches.value_of("config").unwrap_or(DEFAULT_CONFIG));
	let mut config = if matches.is_present("config") || path.exists() {
		SessionConfig::load(path)?
	} else {
		info!("No config file {}, using defaults", path.display());
		SessionConfig::new(115_200, 2, 2)
	};

	if let Some(port) = matches.value_of("port") {
		config.com_port = Some(port.to_string());
	}
	if let Some(baud) = get_opt_param(matches, "baud")? {
		config.baud_rate = baud;
	}
	if let Some(width) = get_opt_param(matches, "addr_bytes")? {
		config.addr_byte_width = width;
	}
	if let Some(width) = get_opt_param(matches, "data_bytes")? {
		config.data_byte_width = width;
	}
	if let Some(n) = get_opt_param::<u8>(matches, "stop_bits")? {
		config.stop_bits = StopBits::try_from(n).map_err(failure::err_msg)?;
	}
	config.validate()?;
	Ok(config)
}

fn open_driver(matches: &clap::ArgMatches, config: &SessionConfig) -> AResult<HostDriver<Box<dyn Transport>>> {
	let transport: Box<dyn Transport> = if matches.is_present("sim") {
		info!("Using simulated target");
		Box::new(SimTransport::new(config)?)
	} else {
		Box::new(SerialTransport::open(config)?)
	};
	HostDriver::new(config, transport)
}

fn programmer(config: &SessionConfig, sub_m: &clap::ArgMatches) -> AResult<MemoryProgrammer> {
	let mut programmer = MemoryProgrammer::new(config);
	if let Some(stride) = get_number(sub_m, "stride")? {
		programmer = programmer.with_stride(stride);
	}
	if sub_m.is_present("hold") {
		programmer = programmer.on_error(ResetOnError::Hold);
	}
	Ok(programmer)
}

fn shell(matches: &clap::ArgMatches, config: &SessionConfig) -> AResult<()> {
	let driver = open_driver(matches, config)?;
	let mut shell = Shell::new(driver, MemoryProgrammer::new(config));
	let stdin = io::stdin();
	shell.run(stdin.lock(), &mut io::stdout())
}

fn read(matches: &clap::ArgMatches, config: &SessionConfig, sub_m: &clap::ArgMatches) -> AResult<()> {
	let address = get_number(sub_m, "ADDR")?.unwrap_or(0);
	let mut driver = open_driver(matches, config)?;
	let data = driver.read(address)?;
	println!("Data returned from address 0x{:x} is 0x{:x}", address, data);
	Ok(())
}

fn write(matches: &clap::ArgMatches, config: &SessionConfig, sub_m: &clap::ArgMatches) -> AResult<()> {
	let address = get_number(sub_m, "ADDR")?.unwrap_or(0);
	let data = get_number(sub_m, "DATA")?.unwrap_or(0);
	let mut driver = open_driver(matches, config)?;
	driver.write(address, data)
}

fn reset(matches: &clap::ArgMatches, config: &SessionConfig, sub_m: &clap::ArgMatches) -> AResult<()> {
	let assert = match sub_m.value_of("STATE") {
		Some("assert") => true,
		Some("deassert") => false,
		state => bail!("invalid reset state {:?}, expected assert or deassert", state),
	};
	let mut driver = open_driver(matches, config)?;
	driver.reset(assert)
}

fn program(matches: &clap::ArgMatches, config: &SessionConfig, sub_m: &clap::ArgMatches) -> AResult<()> {
	let file: String = get_param(sub_m, "FILE")?;
	let address = get_number(sub_m, "ADDR")?.unwrap_or(0);
	let image = MemoryImage::load(Path::new(&file))?;
	let programmer = programmer(config, sub_m)?;

	let mut driver = open_driver(matches, config)?;
	info!("Program file to target. Starting address 0x{:x}. File: {}", address, file);
	let written = programmer.program(&mut driver, address, &image)?;
	info!("Programmed {} values", written);
	Ok(())
}

fn loopback(config: &SessionConfig) -> AResult<()> {
	let values: Vec<u8> = (0..=0xffu8).collect();
	let timing = BitTiming::from_baud(config.baud_rate);
	let (received, duration_ns) = sim::loopback(timing, config.stop_bits, &values)?;
	ensure!(received.len() == values.len(), "received {} of {} bytes", received.len(), values.len());
	for (i, (&sent, &got)) in values.iter().zip(received.iter()).enumerate() {
		ensure!(sent == got, "byte {}: sent 0x{:02x}, received 0x{:02x}", i, sent, got);
	}
	info!("Loopback OK: {} bytes in {} ns simulated ({} ns per bit)", values.len(), duration_ns, timing.interval_ns);
	Ok(())
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg config: -c --config +takes_value "JSON config file (default config.json)")
		(@arg port: -p --port +takes_value "serial port, overrides com_port")
		(@arg baud: -b --baud +takes_value "baud rate, overrides baud_rate")
		(@arg addr_bytes: --addr_bytes +takes_value "address field width in bytes")
		(@arg data_bytes: --data_bytes +takes_value "data field width in bytes")
		(@arg stop_bits: --stop_bits +takes_value "stop bits (1 or 2)")
		(@arg sim: --sim "talk to a simulated target instead of a serial port")
		(@subcommand shell =>
			(about: "interactive command shell (default)")
		)
		(@subcommand read =>
			(about: "read a word from target memory")
			(@arg ADDR: +required "address (decimal or 0x hex)")
		)
		(@subcommand write =>
			(about: "write a word to target memory")
			(@arg ADDR: +required "address (decimal or 0x hex)")
			(@arg DATA: +required "data (decimal or 0x hex)")
		)
		(@subcommand reset =>
			(about: "assert or de-assert the target reset")
			(@arg STATE: +required possible_value[assert deassert] "reset state")
		)
		(@subcommand program =>
			(about: "program a memory image file to the target")
			(@arg stride: --stride +takes_value "address increment per value (default: address width)")
			(@arg hold: --hold "keep the target in reset if programming fails")
			(@arg FILE: +required "memory image, one value per line")
			(@arg ADDR: "start address (default 0)")
		)
		(@subcommand loopback =>
			(about: "send all byte values through a simulated loop-backed line")
		)
	).get_matches();

	let config = load_config(&matches)?;

	match matches.subcommand() {
		("", _) | ("shell", _) => {
			shell(&matches, &config)
		},
		("read", Some(sub_m)) => {
			read(&matches, &config, sub_m)
		},
		("write", Some(sub_m)) => {
			write(&matches, &config, sub_m)
		},
		("reset", Some(sub_m)) => {
			reset(&matches, &config, sub_m)
		},
		("program", Some(sub_m)) => {
			program(&matches, &config, sub_m)
		},
		("loopback", _) => {
			loopback(&config)
		},
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		for cause in e.iter_causes() {
			error!("  caused by: {}", cause);
		}
		exit(1);
	}
}
