//! Message-passing memory port.
//!
//! Runs a [`MemoryService`] on its own thread and talks to it with paired
//! request/reply channels. Every read blocks on its reply before the next
//! request is sent, so the exchange stays strictly half-duplex.

use crate::cpu::memory::{MemoryPort, PortError};
use crate::link::protocol::Request;
use crate::link::service::{MemoryService, ServiceError};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// A memory port connected to a service thread.
pub struct ChannelPort {
    requests: Sender<Request>,
    replies: Receiver<i32>,
    handle: JoinHandle<Result<MemoryService, ServiceError>>,
}

impl ChannelPort {
    /// Move `service` onto a new thread and connect to it.
    pub fn spawn(service: MemoryService) -> Self {
        let (requests, request_rx) = mpsc::channel();
        let (reply_tx, replies) = mpsc::channel();

        let handle = thread::spawn(move || {
            let mut service = service;
            service.serve_channel(request_rx, reply_tx)?;
            Ok(service)
        });

        Self { requests, replies, handle }
    }

    /// Hang up and wait for the service to stop, returning it.
    pub fn join(self) -> Result<MemoryService, ServiceError> {
        let Self { requests, replies, handle } = self;
        drop(requests);
        drop(replies);
        handle.join().map_err(|_| ServiceError::Panicked)?
    }
}

impl MemoryPort for ChannelPort {
    fn read(&mut self, addr: i32) -> Result<i32, PortError> {
        self.requests
            .send(Request::Read(addr))
            .map_err(|_| PortError::Disconnected)?;
        self.replies.recv().map_err(|_| PortError::Disconnected)
    }

    fn write(&mut self, addr: i32, value: i32) -> Result<(), PortError> {
        self.requests
            .send(Request::Write(addr, value))
            .map_err(|_| PortError::Disconnected)
    }

    fn terminate(&mut self) -> Result<(), PortError> {
        self.requests
            .send(Request::End)
            .map_err(|_| PortError::Disconnected)
    }
}
