//! Multi-core machine assembly: ties paged memory, cores, devices and
//! the VPC bus together into one simulated system.
//!
//! Grounded on `arch/machine.go` in `examples/original_source/` for the
//! construction order (devices before cores start ticking, sys-info
//! page written once at boot, boot argument written at a fixed
//! address).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use vmx_memory::PhysicalMemory;

use crate::core::{Core, CoreException, ExceptionKind};
use crate::devices::{Clock, Console, Device, Rand, Rom, Screen, ScreenRender, Table, Ticker};
use crate::vpc::Bus;

/// Page holding device registers (ticker counter, ROM window, ...).
pub const PAGE_BASIC_IO: u32 = 1;
/// Page holding the VPC request/response descriptor.
pub const PAGE_RPC: u32 = 2;
/// Page holding `{npage@0, ncore@4}`.
pub const PAGE_SYS_INFO: u32 = 3;

/// Fixed physical address receiving the boot argument.
pub const ADDR_BOOT_ARG: u32 = PAGE_SYS_INFO * vmx_memory::PAGE_SIZE + 8;

const TICKER_OFFSET: u32 = PAGE_BASIC_IO * vmx_memory::PAGE_SIZE;
const ROM_OFFSET: u32 = PAGE_BASIC_IO * vmx_memory::PAGE_SIZE + 64;
const RPC_BASE: u32 = PAGE_RPC * vmx_memory::PAGE_SIZE;

/// Service IDs on the VPC bus (§4.4). Public so guest-side runtime code
/// (e.g. `vmx-lang`'s `print` builtin) can address them without
/// duplicating the numbering.
pub const SERVICE_CONSOLE: u16 = 1;
pub const SERVICE_RAND: u16 = 2;
pub const SERVICE_CLOCK: u16 = 3;
pub const SERVICE_SCREEN: u16 = 4;
pub const SERVICE_TABLE: u16 = 5;

/// Default stack-pointer base and per-core stride (spec §4.10).
pub const DEFAULT_SP_BASE: u32 = 0x20000;
pub const DEFAULT_SP_STRIDE: u32 = 0x2000;

/// Construction-time configuration for a [`Machine`].
pub struct Config {
    pub ncore: u8,
    pub mem_size: u32,
    pub rand_seed: i64,
    pub init_pc: u32,
    pub init_sp: u32,
    pub stack_per_core: u32,
    pub rom: Option<Vec<u8>>,
    pub boot_arg: u32,
    pub output: Box<dyn Write>,
    pub screen: Option<Box<dyn ScreenRender>>,
    pub perf_now: Option<Box<dyn Fn() -> Duration>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ncore: 1,
            mem_size: 0,
            rand_seed: 0,
            init_pc: 0,
            init_sp: DEFAULT_SP_BASE,
            stack_per_core: DEFAULT_SP_STRIDE,
            rom: None,
            boot_arg: 0,
            output: Box::new(Vec::new()),
            screen: None,
            perf_now: None,
        }
    }
}

/// A multi-core shared-memory simulated machine.
pub struct Machine {
    mem: PhysicalMemory,
    cores: Vec<Core>,
    devices: Vec<Box<dyn Device>>,
    vpc: Bus,
    ticker: Rc<RefCell<Ticker>>,
    console: Rc<RefCell<Console>>,
}

impl Machine {
    /// Builds a machine according to `config`. `ncore == 0` is treated
    /// as 1, matching the original's `NewMachine`.
    pub fn new(mut config: Config) -> Self {
        if config.ncore == 0 {
            config.ncore = 1;
        }
        let mut mem = PhysicalMemory::new(config.mem_size);

        let console = Rc::new(RefCell::new(Console::new(config.output)));

        let mut vpc = Bus::new();
        vpc.register(SERVICE_CONSOLE, Box::new(console.clone()));
        vpc.register(SERVICE_RAND, Box::new(Rand::new(config.rand_seed)));
        vpc.register(
            SERVICE_CLOCK,
            Box::new(Clock {
                perf_now: config.perf_now,
            }),
        );

        let mut devices: Vec<Box<dyn Device>> = Vec::new();
        devices.push(Box::new(console.clone()));
        let ticker = Rc::new(RefCell::new(Ticker::new(TICKER_OFFSET)));
        devices.push(Box::new(ticker.clone()));

        if let Some(render) = config.screen {
            let screen = Rc::new(RefCell::new(Screen::new(render)));
            vpc.register(SERVICE_SCREEN, Box::new(screen.clone()));
            devices.push(Box::new(screen));
        }
        vpc.register(SERVICE_TABLE, Box::new(Table::new()));

        if let Some(data) = config.rom {
            devices.push(Box::new(Rom::new(data, ROM_OFFSET)));
        }

        let mut cores = Vec::with_capacity(config.ncore as usize);
        for i in 0..config.ncore {
            cores.push(Core::new(i));
        }

        let sp_base = config.init_sp;
        let stride = config.stack_per_core;
        for (i, core) in cores.iter_mut().enumerate() {
            core.regs[crate::core::SP] = sp_base.wrapping_add(stride.wrapping_mul(i as u32));
            core.pc = config.init_pc;
        }

        let npage = mem.npage();
        let _ = mem.write_word(PAGE_SYS_INFO * vmx_memory::PAGE_SIZE, npage);
        let _ = mem.write_word(PAGE_SYS_INFO * vmx_memory::PAGE_SIZE + 4, config.ncore as u32);
        let _ = mem.write_word(ADDR_BOOT_ARG, config.boot_arg);

        Self {
            mem,
            cores,
            devices,
            vpc,
            ticker,
            console,
        }
    }

    /// The free-running tick counter also mapped into `pageBasicIO`.
    pub fn ticker_count(&self) -> u32 {
        self.ticker.borrow().count()
    }

    /// Advances the simulation by one tick: every device's `Tick` runs
    /// in registration order, then one round of core ticks in index
    /// order. The round stops at the first exception; remaining cores
    /// that round do not execute.
    pub fn tick(&mut self) -> Option<CoreException> {
        for d in self.devices.iter_mut() {
            d.tick(&mut self.mem);
        }
        let _ = self.vpc.drain_pending(&mut self.mem);

        for core in self.cores.iter_mut() {
            if let Some(e) = core.tick(&mut self.mem, &mut self.vpc, RPC_BASE) {
                tracing::warn!(core = e.core, pc = format!("{:#x}", e.pc), kind = ?e.kind, "tick aborted");
                return Some(e);
            }
        }
        None
    }

    /// Runs up to `nticks` ticks (0 = unbounded), stopping at the first
    /// exception. Returns the number of ticks completed and the
    /// exception, if any.
    pub fn run(&mut self, nticks: usize) -> (usize, Option<CoreException>) {
        let mut n = 0;
        loop {
            if nticks != 0 && n >= nticks {
                return (n, None);
            }
            let e = self.tick();
            n += 1;
            if let Some(e) = e {
                return (n, Some(e));
            }
        }
    }

    /// Writes raw bytes into memory starting at `addr`.
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), vmx_memory::MemoryError> {
        self.mem.write_bytes(addr, bytes)
    }

    /// Sets every core's program counter (used when loading an image).
    pub fn set_pc(&mut self, pc: u32) {
        for core in self.cores.iter_mut() {
            core.pc = pc;
        }
    }

    pub fn dump_regs(&self, core: usize) -> [u32; crate::core::NUM_REGS] {
        self.cores[core].regs
    }

    pub fn pc(&self, core: usize) -> u32 {
        self.cores[core].pc
    }

    pub fn read_word(&self, addr: u32) -> Result<u32, vmx_memory::MemoryError> {
        self.mem.read_word(addr)
    }

    pub fn has_pending(&self) -> bool {
        self.vpc.queue_len() > 0
    }

    pub fn sleep_time(&self) -> Option<Duration> {
        self.vpc.sleep_time()
    }

    /// Feeds bytes the guest will see on its next console read request.
    pub fn supply_console_input(&mut self, bytes: &[u8]) {
        self.console.borrow_mut().supply_input(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{encode, Instr};

    fn machine_with_program(program: &[Instr]) -> Machine {
        let mut cfg = Config {
            init_pc: 0x8000,
            ..Config::default()
        };
        cfg.output = Box::new(Vec::new());
        let mut m = Machine::new(cfg);
        let mut bytes = Vec::new();
        for i in program {
            bytes.extend_from_slice(&encode(*i));
        }
        m.write_bytes(0x8000, &bytes).unwrap();
        m.set_pc(0x8000);
        m
    }

    #[test]
    fn halts_cleanly() {
        let mut m = machine_with_program(&[Instr::Halt]);
        let (n, e) = m.run(0);
        assert_eq!(n, 1);
        assert_eq!(e.unwrap().kind, ExceptionKind::Halt);
    }

    #[test]
    fn sys_info_page_has_npage_and_ncore() {
        let cfg = Config {
            ncore: 2,
            mem_size: vmx_memory::PAGE_SIZE * 16,
            ..Config::default()
        };
        let m = Machine::new(cfg);
        assert_eq!(m.read_word(PAGE_SYS_INFO * vmx_memory::PAGE_SIZE).unwrap(), 16);
        assert_eq!(m.read_word(PAGE_SYS_INFO * vmx_memory::PAGE_SIZE + 4).unwrap(), 2);
    }

    #[test]
    fn stacks_do_not_overlap_across_cores() {
        let cfg = Config { ncore: 3, ..Config::default() };
        let m = Machine::new(cfg);
        let sp0 = m.dump_regs(0)[crate::core::SP];
        let sp1 = m.dump_regs(1)[crate::core::SP];
        let sp2 = m.dump_regs(2)[crate::core::SP];
        assert_eq!(sp0, DEFAULT_SP_BASE);
        assert_eq!(sp1, DEFAULT_SP_BASE + DEFAULT_SP_STRIDE);
        assert_eq!(sp2, DEFAULT_SP_BASE + 2 * DEFAULT_SP_STRIDE);
    }

    #[test]
    fn determinism_same_config_same_image_same_ticks() {
        let program = [
            Instr::LoadImm { rd: 0, imm: 2 },
            Instr::LoadImm { rd: 1, imm: 3 },
            Instr::Add { rd: 2, ra: 0, rb: 1 },
            Instr::Halt,
        ];
        let mut a = machine_with_program(&program);
        let mut b = machine_with_program(&program);
        let (na, _) = a.run(0);
        let (nb, _) = b.run(0);
        assert_eq!(na, nb);
        assert_eq!(a.dump_regs(0), b.dump_regs(0));
    }
}
