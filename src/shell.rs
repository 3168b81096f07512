//! Line-based interactive command shell.

use std::io::{
	BufRead,
	Write,
};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{
	UartError,
	error_kind,
};
use crate::host::{
	HostDriver,
	Transport,
};
use crate::program::{
	MemoryImage,
	MemoryProgrammer,
};

pub const USAGE: &str = "\
SUPPORTED COMMANDS
    help
        Print this help message.

    exit
        Exit the command shell.

    read <addr>
        Read data at the specified <addr>.

    write <addr> <data>
        Write <data> to the specified <addr>.

    program <addr> <file>
        Program a RAM or continuous memory space starting at <addr> using the
        contents of <file> (one binary, hex or decimal value per line).

    reset <assert|deassert>
        Assert or de-assert the target reset.

Numbers are decimal or hexadecimal with a 0x prefix.
";

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Command {
	Help,
	Exit,
	Read { address: u64 },
	Write { address: u64, data: u64 },
	Program { address: u64, file: PathBuf },
	Reset { assert: bool },
}

fn expect_args<'a>(cmd: &str, args: &'a [&'a str], count: usize) -> crate::AResult<&'a [&'a str]> {
	ensure!(args.len() == count, "{} takes {} argument(s), got {}", cmd, count, args.len());
	Ok(args)
}

impl FromStr for Command {
	type Err = failure::Error;

	fn from_str(line: &str) -> crate::AResult<Self> {
		let words: Vec<&str> = line.split_whitespace().collect();
		let (cmd, args) = match words.split_first() {
			Some((cmd, args)) => (*cmd, args),
			None => bail!("empty command"),
		};

		Ok(match cmd {
			"help" => {
				expect_args(cmd, args, 0)?;
				Command::Help
			},
			"exit" => {
				expect_args(cmd, args, 0)?;
				Command::Exit
			},
			"read" => {
				let args = expect_args(cmd, args, 1)?;
				Command::Read { address: crate::parse_number(args[0])? }
			},
			"write" => {
				let args = expect_args(cmd, args, 2)?;
				Command::Write {
					address: crate::parse_number(args[0])?,
					data: crate::parse_number(args[1])?,
				}
			},
			"program" => {
				let args = expect_args(cmd, args, 2)?;
				Command::Program {
					address: crate::parse_number(args[0])?,
					file: PathBuf::from(args[1]),
				}
			},
			"reset" => {
				let args = expect_args(cmd, args, 1)?;
				let assert = match args[0] {
					"assert" | "1" | "on" => true,
					"deassert" | "de-assert" | "0" | "off" => false,
					other => bail!("invalid reset state {:?}, expected assert or deassert", other),
				};
				Command::Reset { assert }
			},
			_ => return Err(UartError::UnknownCommand(cmd.to_string()).into()),
		})
	}
}

pub struct Shell<T: Transport> {
	driver: HostDriver<T>,
	programmer: MemoryProgrammer,
}

impl<T: Transport> Shell<T> {
	pub fn new(driver: HostDriver<T>, programmer: MemoryProgrammer) -> Self {
		Shell { driver, programmer }
	}

	pub fn driver(&self) -> &HostDriver<T> {
		&self.driver
	}

	pub fn into_driver(self) -> HostDriver<T> {
		self.driver
	}

	/// Run a single command; returns `false` once the shell should stop.
	pub fn execute<W: Write>(&mut self, command: &Command, out: &mut W) -> crate::AResult<bool> {
		match *command {
			Command::Help => write!(out, "{}", USAGE)?,
			Command::Exit => return Ok(false),
			Command::Read { address } => {
				let data = self.driver.read(address)?;
				writeln!(out, "Data returned from address 0x{:x} is 0x{:x}", address, data)?;
			},
			Command::Write { address, data } => {
				self.driver.write(address, data)?;
			},
			Command::Program { address, ref file } => {
				let image = MemoryImage::load(file)?;
				writeln!(out, "Program file to target. Starting address 0x{:x}. File: {}", address, file.display())?;
				let written = self.programmer.program(&mut self.driver, address, &image)?;
				writeln!(out, "Programmed {} values", written)?;
			},
			Command::Reset { assert } => {
				self.driver.reset(assert)?;
				writeln!(out, "{} reset", if assert { "Assert" } else { "De-assert" })?;
			},
		}
		Ok(true)
	}

	/// Read commands from `input` until `exit` or end of input.
	///
	/// Failing commands are reported on `out` and the loop continues.
	pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> crate::AResult<()> {
		let mut lines = input.lines();
		loop {
			write!(out, "> ")?;
			out.flush()?;
			let line = match lines.next() {
				Some(line) => line?,
				None => {
					writeln!(out)?;
					return Ok(());
				},
			};
			let line = line.trim();
			if line.is_empty() {
				continue;
			}

			let result = line.parse::<Command>().and_then(|command| self.execute(&command, out));
			match result {
				Ok(true) => (),
				Ok(false) => return Ok(()),
				Err(e) => match error_kind(&e) {
					Some(UartError::UnknownCommand(_)) => {
						writeln!(out, "Unsupported command. You can type help to see all the available commands")?;
					},
					_ => {
						writeln!(out, "Error: {}", e)?;
						for cause in e.iter_causes() {
							writeln!(out, "  caused by: {}", cause)?;
						}
					},
				},
			}
		}
	}
}
