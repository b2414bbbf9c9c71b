//! The VPC service bus: the message-based request/response facility
//! guest code uses in place of real syscalls.
//!
//! Grounded on `arch/misc/clock.go` and `arch/screen/screen.go` in
//! `examples/original_source/` for the clock and screen wire protocols.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use vmx_memory::PhysicalMemory;

/// ok status.
pub const STATUS_OK: i32 = 0;
/// recognized error: the request bytes were malformed for the service.
pub const ERR_INVALID_ARG: i32 = -1;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum VpcError {
    #[error("unknown service id {0}")]
    UnknownService(u16),
    #[error("memory error while servicing VPC request: {0}")]
    Memory(#[from] vmx_memory::MemoryError),
}

/// The outcome of handling one request.
pub enum HandleResult {
    /// The reply is ready immediately.
    Done(Vec<u8>, i32),
    /// The service cannot answer yet; the bus queues the call and
    /// retries via [`Service::try_complete`] on a later tick.
    Deferred,
}

/// A host-registered service, addressable by a 16-bit service id.
pub trait Service {
    /// Handles one request's argument bytes, producing a response
    /// buffer and a status code (0 = ok, negative = generic error,
    /// positive = service-specific).
    fn handle(&mut self, req: &[u8]) -> HandleResult;

    /// Called once per tick for any call this service previously
    /// deferred, oldest first. Returning `None` means "still pending".
    fn try_complete(&mut self) -> Option<(Vec<u8>, i32)> {
        None
    }

    /// The minimum wall-clock duration the embedder may sleep before
    /// the next tick without missing a timer this service has armed.
    fn next_deadline(&self) -> Option<Duration> {
        None
    }
}

struct PendingCall {
    resp_ptr: u32,
    resp_cap: u32,
    status_ptr: u32,
    service: u16,
}

/// Fixed byte layout of the request/response descriptor guest code
/// writes into `pageRPC` before raising a trap.
pub struct Descriptor {
    pub service_id: u16,
    pub arg_ptr: u32,
    pub arg_len: u32,
    pub resp_ptr: u32,
    pub resp_cap: u32,
}

impl Descriptor {
    pub const SIZE: u32 = 24;

    /// Reads the descriptor at `base` (the start of `pageRPC`).
    pub fn read(mem: &PhysicalMemory, base: u32) -> Result<Self, VpcError> {
        let word0 = mem.read_word(base)?;
        Ok(Self {
            service_id: (word0 & 0xffff) as u16,
            arg_ptr: mem.read_word(base + 4)?,
            arg_len: mem.read_word(base + 8)?,
            resp_ptr: mem.read_word(base + 12)?,
            resp_cap: mem.read_word(base + 16)?,
        })
    }

    fn status_addr(base: u32) -> u32 {
        base + 20
    }
}

/// The bus owning all registered services and the deferred-reply FIFO.
#[derive(Default)]
pub struct Bus {
    services: HashMap<u16, Box<dyn Service>>,
    pending: VecDeque<PendingCall>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn register(&mut self, id: u16, service: Box<dyn Service>) {
        self.services.insert(id, service);
    }

    /// Reads the descriptor at `base`, dispatches to the registered
    /// service, and writes the response/status back into memory.
    pub fn dispatch(&mut self, mem: &mut PhysicalMemory, base: u32) -> Result<(), VpcError> {
        let desc = Descriptor::read(mem, base)?;
        let service = self
            .services
            .get_mut(&desc.service_id)
            .ok_or(VpcError::UnknownService(desc.service_id))?;

        let mut arg = Vec::with_capacity(desc.arg_len as usize);
        for i in 0..desc.arg_len {
            arg.push(mem.read_byte(desc.arg_ptr + i)?);
        }

        match service.handle(&arg) {
            HandleResult::Done(resp, status) => {
                Self::write_reply(mem, desc.resp_ptr, desc.resp_cap, &resp)?;
                mem.write_word(Descriptor::status_addr(base), status as u32)?;
            }
            HandleResult::Deferred => {
                self.pending.push_back(PendingCall {
                    resp_ptr: desc.resp_ptr,
                    resp_cap: desc.resp_cap,
                    status_ptr: Descriptor::status_addr(base),
                    service: desc.service_id,
                });
            }
        }
        Ok(())
    }

    fn write_reply(
        mem: &mut PhysicalMemory,
        resp_ptr: u32,
        resp_cap: u32,
        resp: &[u8],
    ) -> Result<(), VpcError> {
        let n = resp.len().min(resp_cap as usize);
        mem.write_bytes(resp_ptr, &resp[..n])?;
        Ok(())
    }

    /// Attempts to complete deferred replies, oldest first, stopping at
    /// the first one that is still pending (FIFO order is preserved).
    pub fn drain_pending(&mut self, mem: &mut PhysicalMemory) -> Result<(), VpcError> {
        while let Some(call) = self.pending.front() {
            let service = self
                .services
                .get_mut(&call.service)
                .ok_or(VpcError::UnknownService(call.service))?;
            match service.try_complete() {
                Some((resp, status)) => {
                    let call = self.pending.pop_front().unwrap();
                    Self::write_reply(mem, call.resp_ptr, call.resp_cap, &resp)?;
                    mem.write_word(call.status_ptr, status as u32)?;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Number of calls queued but not yet delivered.
    pub fn queue_len(&self) -> usize {
        self.pending.len()
    }

    /// Minimum sleep time across all services' armed timers.
    pub fn sleep_time(&self) -> Option<Duration> {
        self.services.values().filter_map(|s| s.next_deadline()).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl Service for Echo {
        fn handle(&mut self, req: &[u8]) -> HandleResult {
            HandleResult::Done(req.to_vec(), STATUS_OK)
        }
    }

    struct AlwaysDefer {
        answered: bool,
    }
    impl Service for AlwaysDefer {
        fn handle(&mut self, _req: &[u8]) -> HandleResult {
            HandleResult::Deferred
        }
        fn try_complete(&mut self) -> Option<(Vec<u8>, i32)> {
            if self.answered {
                Some((vec![42], STATUS_OK))
            } else {
                None
            }
        }
    }

    fn write_descriptor(mem: &mut PhysicalMemory, base: u32, service: u16, arg: &[u8]) -> (u32, u32) {
        let arg_ptr = base + 1024;
        let resp_ptr = base + 2048;
        let resp_cap = 64;
        mem.write_bytes(arg_ptr, arg).unwrap();
        mem.write_word(base, service as u32).unwrap();
        mem.write_word(base + 4, arg_ptr).unwrap();
        mem.write_word(base + 8, arg.len() as u32).unwrap();
        mem.write_word(base + 12, resp_ptr).unwrap();
        mem.write_word(base + 16, resp_cap).unwrap();
        (resp_ptr, resp_cap)
    }

    #[test]
    fn synchronous_echo_round_trip() {
        let mut mem = PhysicalMemory::new(0);
        let mut bus = Bus::new();
        bus.register(1, Box::new(Echo));

        let base = 0x10000;
        let (resp_ptr, _) = write_descriptor(&mut mem, base, 1, b"hi");
        bus.dispatch(&mut mem, base).unwrap();

        assert_eq!(mem.read_byte(resp_ptr).unwrap(), b'h');
        assert_eq!(mem.read_word(base + 20).unwrap(), 0);
    }

    #[test]
    fn deferred_reply_queues_until_completed() {
        let mut mem = PhysicalMemory::new(0);
        let mut bus = Bus::new();
        bus.register(2, Box::new(AlwaysDefer { answered: false }));

        let base = 0x10000;
        write_descriptor(&mut mem, base, 2, b"");
        bus.dispatch(&mut mem, base).unwrap();
        assert_eq!(bus.queue_len(), 1);

        bus.drain_pending(&mut mem).unwrap();
        assert_eq!(bus.queue_len(), 1, "still pending, handler not ready");
    }

    #[test]
    fn unknown_service_is_an_error() {
        let mut mem = PhysicalMemory::new(0);
        let mut bus = Bus::new();
        let base = 0x10000;
        write_descriptor(&mut mem, base, 99, b"");
        assert_eq!(
            bus.dispatch(&mut mem, base).unwrap_err(),
            VpcError::UnknownService(99)
        );
    }
}
