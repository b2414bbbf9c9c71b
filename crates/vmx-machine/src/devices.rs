//! Memory-mapped devices and the core-provided VPC services.
//!
//! The console, clock and screen wire protocols are grounded on
//! `arch/misc/clock.go` and `arch/screen/screen.go` in
//! `examples/original_source/`.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::time::Duration;

use vmx_memory::PhysicalMemory;

use crate::vpc::{HandleResult, Service, ERR_INVALID_ARG, STATUS_OK};

/// A device is ticked once per machine tick, in registration order,
/// before any core executes.
pub trait Device {
    fn tick(&mut self, mem: &mut PhysicalMemory);
}

/// A byte-cursor decoder for VPC request payloads. Grounded on the
/// `coder.Decoder` helper `arch/screen/screen.go` consumes (not itself
/// in the retrieved source, but its shape is fully implied by the call
/// site: sequential, fallible `u8`/`u32` reads over a byte slice).
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    pub err: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            err: false,
        }
    }

    pub fn u8(&mut self) -> u8 {
        if self.err || self.pos >= self.buf.len() {
            self.err = true;
            return 0;
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    pub fn u32(&mut self) -> u32 {
        if self.err || self.pos + 4 > self.buf.len() {
            self.err = true;
            return 0;
        }
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }
}

/// Console service + device: writes are emitted to `Output` immediately;
/// reads are deferred until the embedder supplies input via
/// [`Console::supply_input`].
pub struct Console {
    output: Box<dyn Write>,
    input: VecDeque<u8>,
    pending_read_len: Option<usize>,
}

impl Console {
    pub fn new(output: Box<dyn Write>) -> Self {
        Self {
            output,
            input: VecDeque::new(),
            pending_read_len: None,
        }
    }

    /// Feeds bytes the guest will see on its next read request.
    pub fn supply_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }
}

/// Console VPC command selectors, public so guest-side runtime code
/// (e.g. `vmx-lang`'s `print` builtin) can build request bytes without
/// duplicating the numbering.
pub const CONSOLE_CMD_WRITE: u8 = 0;
pub const CONSOLE_CMD_READ: u8 = 1;

impl Service for Console {
    fn handle(&mut self, req: &[u8]) -> HandleResult {
        let mut dec = Decoder::new(req);
        let cmd = dec.u8();
        match cmd {
            CONSOLE_CMD_WRITE => {
                let rest = &req[1..];
                let _ = self.output.write_all(rest);
                HandleResult::Done(Vec::new(), STATUS_OK)
            }
            CONSOLE_CMD_READ => {
                let want = dec.u32() as usize;
                if dec.err {
                    return HandleResult::Done(Vec::new(), ERR_INVALID_ARG);
                }
                if self.input.is_empty() {
                    self.pending_read_len = Some(want);
                    HandleResult::Deferred
                } else {
                    let n = want.min(self.input.len());
                    let resp: Vec<u8> = self.input.drain(..n).collect();
                    HandleResult::Done(resp, STATUS_OK)
                }
            }
            _ => HandleResult::Done(Vec::new(), ERR_INVALID_ARG),
        }
    }

    fn try_complete(&mut self) -> Option<(Vec<u8>, i32)> {
        let want = self.pending_read_len?;
        if self.input.is_empty() {
            return None;
        }
        let n = want.min(self.input.len());
        let resp: Vec<u8> = self.input.drain(..n).collect();
        self.pending_read_len = None;
        Some((resp, STATUS_OK))
    }
}

impl Device for Console {
    fn tick(&mut self, _mem: &mut PhysicalMemory) {}
}

impl Device for std::rc::Rc<std::cell::RefCell<Ticker>> {
    fn tick(&mut self, mem: &mut PhysicalMemory) {
        self.borrow_mut().tick(mem)
    }
}

/// Ticks a free-running counter into `pageBasicIO`, used by guests and
/// embedders for coarse timing/fairness observation.
pub struct Ticker {
    count: u32,
    offset: u32,
}

impl Ticker {
    pub fn new(offset: u32) -> Self {
        Self { count: 0, offset }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Device for Ticker {
    fn tick(&mut self, mem: &mut PhysicalMemory) {
        self.count = self.count.wrapping_add(1);
        let _ = mem.write_word(self.offset, self.count);
    }
}

/// A tiny deterministic PRNG (xorshift64*), seedable so simulation
/// stays reproducible; a zero seed is replaced with a time-derived one
/// at construction, exactly once, per spec.
pub struct Rand {
    state: u64,
}

impl Rand {
    pub fn new(seed: i64) -> Self {
        let seed = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9e3779b97f4a7c15)
        } else {
            seed as u64
        };
        Self {
            state: seed | 1, // xorshift requires a non-zero state
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }
}

impl Service for Rand {
    fn handle(&mut self, req: &[u8]) -> HandleResult {
        if req.len() != 4 {
            return HandleResult::Done(Vec::new(), ERR_INVALID_ARG);
        }
        let n = u32::from_le_bytes(req.try_into().unwrap()) as usize;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            out.extend_from_slice(&self.next_u64().to_le_bytes());
        }
        out.truncate(n);
        HandleResult::Done(out, STATUS_OK)
    }
}

/// Wall-clock / monotonic time service. Grounded on
/// `arch/misc/clock.go`: empty request equals request `[0]`, byte 0 is
/// wall-clock nanoseconds, byte 1 is monotonic nanoseconds, anything
/// else is invalid-arg.
pub struct Clock {
    pub perf_now: Option<Box<dyn Fn() -> Duration>>,
}

impl Clock {
    pub fn new() -> Self {
        Self { perf_now: None }
    }

    fn wall_now_nanos() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for Clock {
    fn handle(&mut self, req: &[u8]) -> HandleResult {
        let selector = if req.is_empty() { 0 } else { req[0] };
        if req.len() > 1 {
            return HandleResult::Done(Vec::new(), ERR_INVALID_ARG);
        }
        match selector {
            0 => HandleResult::Done(Self::wall_now_nanos().to_le_bytes().to_vec(), STATUS_OK),
            1 => match &self.perf_now {
                Some(f) => HandleResult::Done((f().as_nanos() as u64).to_le_bytes().to_vec(), STATUS_OK),
                None => HandleResult::Done(Vec::new(), STATUS_OK),
            },
            _ => HandleResult::Done(Vec::new(), ERR_INVALID_ARG),
        }
    }
}

/// Width of the text/color screen grid, in columns.
pub const SCREEN_WIDTH: u32 = 80;

/// Abstract screen renderer; concrete rendering is an external
/// collaborator per spec scope.
pub trait ScreenRender {
    fn update_text(&mut self, cells: &HashMap<u32, u8>);
    fn update_color(&mut self, cells: &HashMap<u32, u8>);
    fn need_update(&self) -> bool;
}

/// Screen service + device: buffers text/color cell writes and flushes
/// them to the renderer on tick or on demand.
pub struct Screen {
    text_update: HashMap<u32, u8>,
    color_update: HashMap<u32, u8>,
    render: Box<dyn ScreenRender>,
}

const SCREEN_CMD_TEXT: u8 = 0;
const SCREEN_CMD_COLOR: u8 = 1;

impl Screen {
    pub fn new(render: Box<dyn ScreenRender>) -> Self {
        Self {
            text_update: HashMap::new(),
            color_update: HashMap::new(),
            render,
        }
    }

    pub fn flush(&mut self) {
        if !self.text_update.is_empty() {
            self.render.update_text(&self.text_update);
            self.text_update.clear();
        }
        if !self.color_update.is_empty() {
            self.render.update_color(&self.color_update);
            self.color_update.clear();
        }
    }
}

impl Service for Screen {
    fn handle(&mut self, req: &[u8]) -> HandleResult {
        let mut dec = Decoder::new(req);
        let cmd = dec.u8();
        if dec.err {
            return HandleResult::Done(Vec::new(), ERR_INVALID_ARG);
        }
        match cmd {
            SCREEN_CMD_TEXT | SCREEN_CMD_COLOR => {
                let c = dec.u8();
                let line = dec.u8() as u32;
                let col = dec.u8() as u32;
                if dec.err {
                    return HandleResult::Done(Vec::new(), ERR_INVALID_ARG);
                }
                let key = line * SCREEN_WIDTH + col;
                if cmd == SCREEN_CMD_TEXT {
                    self.text_update.insert(key, c);
                } else {
                    self.color_update.insert(key, c);
                }
                HandleResult::Done(Vec::new(), STATUS_OK)
            }
            _ => HandleResult::Done(Vec::new(), ERR_INVALID_ARG),
        }
    }
}

impl Device for Screen {
    fn tick(&mut self, _mem: &mut PhysicalMemory) {
        if self.render.need_update() {
            self.flush();
        }
    }
}

/// Table peripheral: command bytes and click injection are opaque to
/// the core per spec; we retain the raw command stream for the
/// embedder-supplied renderer to interpret.
pub struct Table {
    commands: Vec<Vec<u8>>,
}

impl Table {
    pub fn new() -> Self {
        Self { commands: Vec::new() }
    }

    pub fn click(&mut self, pos: u8) {
        self.commands.push(vec![0xff, pos]);
    }

    pub fn commands(&self) -> &[Vec<u8>] {
        &self.commands
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for Table {
    fn handle(&mut self, req: &[u8]) -> HandleResult {
        self.commands.push(req.to_vec());
        HandleResult::Done(Vec::new(), STATUS_OK)
    }
}

impl Device for Table {
    fn tick(&mut self, _mem: &mut PhysicalMemory) {}
}

/// Read-only ROM window mapped into `pageBasicIO`.
pub struct Rom {
    data: Vec<u8>,
    offset: u32,
}

impl Rom {
    pub fn new(data: Vec<u8>, offset: u32) -> Self {
        Self { data, offset }
    }
}

impl Device for Rom {
    fn tick(&mut self, mem: &mut PhysicalMemory) {
        let _ = mem.write_bytes(self.offset, &self.data);
    }
}

/// Screen and Console each implement both `Service` and `Device`, but a
/// `Bus` and a `Machine`'s device list each want their own owned
/// `Box<dyn Trait>`. Rather than split the state in two, the machine
/// holds one `Rc<RefCell<_>>` and registers the same shared cell in
/// both places; these blanket impls let the cell itself stand in for
/// the device. The simulator is single-threaded and cooperative (no
/// `Send` bound on either trait object), so `Rc` costs nothing here.
impl Service for std::rc::Rc<std::cell::RefCell<Screen>> {
    fn handle(&mut self, req: &[u8]) -> HandleResult {
        self.borrow_mut().handle(req)
    }
}

impl Device for std::rc::Rc<std::cell::RefCell<Screen>> {
    fn tick(&mut self, mem: &mut PhysicalMemory) {
        self.borrow_mut().tick(mem)
    }
}

impl Service for std::rc::Rc<std::cell::RefCell<Console>> {
    fn handle(&mut self, req: &[u8]) -> HandleResult {
        self.borrow_mut().handle(req)
    }

    fn try_complete(&mut self) -> Option<(Vec<u8>, i32)> {
        self.borrow_mut().try_complete()
    }
}

impl Device for std::rc::Rc<std::cell::RefCell<Console>> {
    fn tick(&mut self, mem: &mut PhysicalMemory) {
        self.borrow_mut().tick(mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRender;
    impl ScreenRender for NullRender {
        fn update_text(&mut self, _cells: &HashMap<u32, u8>) {}
        fn update_color(&mut self, _cells: &HashMap<u32, u8>) {}
        fn need_update(&self) -> bool {
            false
        }
    }

    #[test]
    fn clock_empty_request_equals_byte_zero() {
        let mut c = Clock::new();
        let a = match c.handle(&[]) {
            HandleResult::Done(v, s) => (v, s),
            _ => panic!("clock never defers"),
        };
        let b = match c.handle(&[0]) {
            HandleResult::Done(v, s) => (v, s),
            _ => panic!("clock never defers"),
        };
        assert_eq!(a.1, b.1);
        assert_eq!(a.0.len(), b.0.len());
    }

    #[test]
    fn clock_rejects_unknown_selector() {
        let mut c = Clock::new();
        match c.handle(&[2]) {
            HandleResult::Done(_, status) => assert_eq!(status, ERR_INVALID_ARG),
            _ => panic!("clock never defers"),
        }
    }

    #[test]
    fn console_read_defers_until_input_supplied() {
        let mut console = Console::new(Box::new(Vec::new()));
        let req = [CONSOLE_CMD_READ, 3, 0, 0, 0];
        match console.handle(&req) {
            HandleResult::Deferred => {}
            _ => panic!("expected deferred read"),
        }
        assert!(console.try_complete().is_none());
        console.supply_input(b"abc");
        let (resp, status) = console.try_complete().unwrap();
        assert_eq!(resp, b"abc");
        assert_eq!(status, STATUS_OK);
    }

    #[test]
    fn screen_buffers_and_flushes_on_tick() {
        let mut screen = Screen::new(Box::new(NullRender));
        let req = [SCREEN_CMD_TEXT, b'x', 2, 5];
        screen.handle(&req);
        assert_eq!(screen.text_update.get(&(2 * SCREEN_WIDTH + 5)), Some(&b'x'));
    }
}
