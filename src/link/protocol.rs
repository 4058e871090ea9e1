//! Line protocol between the CPU and the memory service.
//!
//! One request per line:
//! - `r<addr>`: read, answered with one line holding the decimal value
//! - `w<addr>:<value>`: write, no answer
//! - `e`: end, the service stops

use crate::cpu::memory::PortError;
use std::str::FromStr;
use thiserror::Error;

pub const READ_COMMAND: char = 'r';
pub const WRITE_COMMAND: char = 'w';
pub const END_COMMAND: char = 'e';

/// A request from the CPU to the memory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Read(i32),
    Write(i32, i32),
    End,
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Read(addr) => write!(f, "{}{}", READ_COMMAND, addr),
            Request::Write(addr, value) => write!(f, "{}{}:{}", WRITE_COMMAND, addr, value),
            Request::End => write!(f, "{}", END_COMMAND),
        }
    }
}

impl FromStr for Request {
    type Err = RequestError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let mut chars = line.chars();
        let command = chars.next().ok_or(RequestError::Empty)?;
        let args = chars.as_str();

        match command {
            READ_COMMAND => Ok(Request::Read(parse_number(args)?)),
            WRITE_COMMAND => {
                let (addr, value) = args
                    .split_once(':')
                    .ok_or_else(|| RequestError::MissingValue(line.to_string()))?;
                Ok(Request::Write(parse_number(addr)?, parse_number(value)?))
            }
            END_COMMAND => Ok(Request::End),
            other => Err(RequestError::UnknownCommand(other)),
        }
    }
}

fn parse_number(text: &str) -> Result<i32, RequestError> {
    text.trim()
        .parse()
        .map_err(|_| RequestError::BadNumber(text.to_string()))
}

/// Parse the service's answer to a read.
pub fn parse_response(line: &str) -> Result<i32, PortError> {
    line.trim()
        .parse()
        .map_err(|_| PortError::Protocol(line.trim_end().to_string()))
}

/// A request line the service could not understand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("empty request")]
    Empty,

    #[error("unknown command {0:?}")]
    UnknownCommand(char),

    #[error("malformed number {0:?}")]
    BadNumber(String),

    #[error("write request without value: {0:?}")]
    MissingValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        assert_eq!(Request::Read(1500).to_string(), "r1500");
        assert_eq!(Request::Write(999, -4).to_string(), "w999:-4");
        assert_eq!(Request::End.to_string(), "e");
    }

    #[test]
    fn test_parse_requests() {
        assert_eq!("r12".parse(), Ok(Request::Read(12)));
        assert_eq!("w1999:1000\n".parse(), Ok(Request::Write(1999, 1000)));
        assert_eq!("  e  ".parse(), Ok(Request::End));
    }

    #[test]
    fn test_parse_request_errors() {
        assert_eq!("".parse::<Request>(), Err(RequestError::Empty));
        assert_eq!("x1".parse::<Request>(), Err(RequestError::UnknownCommand('x')));
        assert_eq!("rabc".parse::<Request>(), Err(RequestError::BadNumber("abc".into())));
        assert_eq!("w12".parse::<Request>(), Err(RequestError::MissingValue("w12".into())));
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response("42\n"), Ok(42));
        assert_eq!(parse_response("-7"), Ok(-7));
        assert_eq!(parse_response("oops\n"), Err(PortError::Protocol("oops".into())));
    }
}
