#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

macro_rules! with_context {
	(( $fmt:tt $($t:tt)* ), $e:expr) => {{
		use failure::Error;

		match (|| { $e })() {
			Ok(v) => Ok(v),
			Err(e) => {
				let e: Error = e;
				let msg = format!(concat!($fmt, ": {}") $($t)*, e);
				Err(Error::from(e.context(msg)))
			}
		}
	}};

	($msg:expr, $e:expr) => {
		with_context!(("{}", $msg), $e)
	};
}

pub type AResult<T> = Result<T, failure::Error>;

pub mod config;
pub mod error;
pub mod host;
pub mod program;
pub mod protocol;
pub mod shell;
pub mod sim;

pub use self::config::SessionConfig;
pub use self::error::{
	UartError,
	error_kind,
};
pub use self::host::HostDriver;
pub use self::program::{
	MemoryImage,
	MemoryProgrammer,
};

/// Parse a number as hexadecimal (`0x` prefix, any case) or decimal.
pub fn parse_number(s: &str) -> AResult<u64> {
	let s = s.trim();
	with_context!(("invalid number {:?}", s), {
		match s.get(..2) {
			Some(prefix) if prefix.eq_ignore_ascii_case("0x") => Ok(u64::from_str_radix(&s[2..], 16)?),
			_ => Ok(s.parse::<u64>()?),
		}
	})
}

#[cfg(test)]
mod test {
	use super::parse_number;

	#[test]
	fn numbers() {
		assert_eq!(parse_number("5").unwrap(), 5);
		assert_eq!(parse_number("0x5").unwrap(), 5);
		assert_eq!(parse_number("0XfF").unwrap(), 0xff);
		assert_eq!(parse_number(" 1234 ").unwrap(), 1234);
		assert!(parse_number("").is_err());
		assert!(parse_number("0x").is_err());
		assert!(parse_number("12a").is_err());
	}
}
