//! Text protocol client.
//!
//! [`LinkPort`] speaks the line protocol over any reader/writer pair. The
//! usual pairing is a child process running `dualmode-emu memory`, wired up
//! by [`spawn_service`].

use crate::cpu::memory::{MemoryPort, PortError};
use crate::link::protocol::{parse_response, Request};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::trace;

/// A memory port backed by the text protocol.
pub struct LinkPort<R: BufRead, W: Write> {
    reader: R,
    writer: W,
    line: String,
}

impl<R: BufRead, W: Write> LinkPort<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    fn send(&mut self, request: Request) -> Result<(), PortError> {
        trace!(%request, "->");
        writeln!(self.writer, "{}", request)
            .and_then(|()| self.writer.flush())
            .map_err(|e| PortError::Io(e.to_string()))
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: BufRead, W: Write> MemoryPort for LinkPort<R, W> {
    fn read(&mut self, addr: i32) -> Result<i32, PortError> {
        self.send(Request::Read(addr))?;

        self.line.clear();
        let n = self
            .reader
            .read_line(&mut self.line)
            .map_err(|e| PortError::Io(e.to_string()))?;
        if n == 0 {
            return Err(PortError::Disconnected);
        }
        parse_response(&self.line)
    }

    fn write(&mut self, addr: i32, value: i32) -> Result<(), PortError> {
        self.send(Request::Write(addr, value))
    }

    fn terminate(&mut self) -> Result<(), PortError> {
        self.send(Request::End)
    }
}

/// Port to a memory service running as a child process.
pub type ChildPort = LinkPort<BufReader<ChildStdout>, ChildStdin>;

/// Start `exe memory <program>` and connect to it.
pub fn spawn_service(exe: &Path, program: &Path) -> Result<(ChildPort, Child), PortError> {
    let mut child = Command::new(exe)
        .arg("memory")
        .arg(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| PortError::Io(e.to_string()))?;

    let stdin = child.stdin.take().ok_or(PortError::Disconnected)?;
    let stdout = child.stdout.take().ok_or(PortError::Disconnected)?;

    Ok((LinkPort::new(BufReader::new(stdout), stdin), child))
}
