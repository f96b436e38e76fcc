//! AT&T 3B1 (UNIX PC) core: paged memory map, bus decode, and the
//! floppy subsystem.
//!
//! The 68010 interpreter lives outside this crate and drives the
//! machine one bus cycle at a time through the entry points
//! (`read_8`..`write_32`), receiving faults and timeslice requests back
//! over the [`CpuLines`] seam. Video output, serial ports, and the hard
//! disk controller are not modeled; their register windows accept
//! writes and read back as idle.
//!
//! Every cycle goes through the same pipeline: apply the ROM overlay
//! bit, run the permission check against the live status register,
//! then dispatch by address range to ROM, paged RAM, Map RAM, video
//! RAM, or the I/O register file.

#![allow(clippy::cast_possible_truncation)]

pub mod config;
mod io;
pub mod mcp;
pub mod memory;

pub use config::{ConfigError, SystemConfig};
pub use wd_2797;
pub use wd_2797::Wd2797;

use crate::memory::{
    MemStatus, Memory, Region, EXP_RAM_BASE, IO_A_BASE, IO_A_END, MAP_RAM_TOP, RAM_END, ROM_BASE,
    ROM_END, VRAM_TOP,
};
use wd_2797::{ImageError, SectorStore};

/// Value returned by faulted or unhandled reads.
pub(crate) const ALL_ONES: u32 = 0xFFFF_FFFF;

/// Lines the machine drives on (and samples from) the external 68010.
///
/// The interpreter supplies an implementation; the machine never owns
/// the CPU.
pub trait CpuLines {
    /// Live read of the status register. The S bit gates supervisor
    /// accesses.
    fn status_register(&self) -> u16;

    /// Assert /BERR for the cycle in flight.
    fn pulse_bus_error(&mut self);

    /// Ask the interpreter to wind up its timeslice so interrupt lines
    /// are re-sampled promptly.
    fn end_timeslice(&mut self);
}

/// Bus cycle width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Word,
    Long,
}

impl Width {
    fn bits(self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::Word => 16,
            Self::Long => 32,
        }
    }

    /// Trim a register-file result to the width of the cycle, as the
    /// narrower bus entry points do.
    fn trim(self, data: u32) -> u32 {
        match self {
            Self::Byte => data & 0xFF,
            Self::Word => data & 0xFFFF,
            Self::Long => data,
        }
    }
}

fn region_load(region: &Region, addr: u32, width: Width) -> u32 {
    match width {
        Width::Byte => u32::from(region.load_8(addr)),
        Width::Word => u32::from(region.load_16(addr)),
        Width::Long => region.load_32(addr),
    }
}

fn region_store(region: &mut Region, addr: u32, width: Width, value: u32) {
    match width {
        Width::Byte => region.store_8(addr, value as u8),
        Width::Word => region.store_16(addr, value as u16),
        Width::Long => region.store_32(addr, value),
    }
}

/// The 3B1 machine: backing stores, system control registers, the DMA
/// engine, and the floppy controller.
pub struct UnixPc {
    pub memory: Memory,
    pub fdc: Wd2797,

    /// General status register; latches the fault code on a bus error.
    pub genstat: u16,
    pub bsr0: u16,
    pub bsr1: u16,

    /// Words remaining + 1 (the CPU writes N-1; the hardware runs N+1).
    pub dma_count: u16,
    /// 22-bit byte address, assembled from two address-as-data writes.
    pub dma_address: u32,
    /// Inhibit DMA read/write.
    pub idmarw: bool,
    pub dmaen: bool,
    /// Direction: set moves words peripheral -> RAM.
    pub dma_reading: bool,

    /// Front-panel lamps, a bit per lamp, lit when set.
    pub leds: u8,
    /// Parity interrupt enable; folds into the fault code.
    pub pie: bool,
    /// Low-map select: while clear, the low window decodes into ROM.
    pub romlmap: bool,
}

impl UnixPc {
    /// Build the standard machine around a boot ROM image.
    pub fn new(rom: Vec<u8>) -> Result<Self, ConfigError> {
        Self::new_with_config(SystemConfig::new(rom))
    }

    pub fn new_with_config(config: SystemConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut machine = Self {
            memory: Memory::new(config.rom, config.base_ram_size, config.exp_ram_size),
            fdc: Wd2797::new(),
            genstat: 0xFFFF,
            bsr0: 0xFFFF,
            bsr1: 0xFFFF,
            dma_count: 0,
            dma_address: 0,
            idmarw: false,
            dmaen: false,
            dma_reading: false,
            leds: 0,
            pie: false,
            romlmap: false,
        };
        machine.reset();
        Ok(machine)
    }

    /// Power-on state: status registers all-ones, ROM overlaid over the
    /// low window, page table empty, floppy controller reset.
    pub fn reset(&mut self) {
        self.genstat = 0xFFFF;
        self.bsr0 = 0xFFFF;
        self.bsr1 = 0xFFFF;
        self.romlmap = false;
        for i in 0..memory::MAP_RAM_SIZE as u32 {
            self.memory.map.store_8(i, 0);
        }
        self.fdc.reset();
    }

    /// Attach a floppy image to the controller.
    pub fn load_floppy(
        &mut self,
        store: Box<dyn SectorStore>,
        sector_size: u32,
        sectors_per_track: u32,
        heads: u32,
        writeable: bool,
    ) -> Result<(), ImageError> {
        self.fdc.load(store, sector_size, sectors_per_track, heads, writeable)
    }

    pub fn eject_floppy(&mut self) {
        self.fdc.unload();
    }

    /// Floppy interrupt line, as the interrupt logic samples it.
    #[must_use]
    pub fn floppy_irq(&self) -> bool {
        self.fdc.irq()
    }

    // -----------------------------------------------------------------
    // CPU bus cycle hooks
    // -----------------------------------------------------------------

    /// 8-bit read. Returns the data, or all-ones after a fault.
    pub fn read_8(&mut self, cpu: &mut dyn CpuLines, addr: u32) -> u32 {
        self.cycle_read(cpu, addr, Width::Byte)
    }

    /// 16-bit read.
    pub fn read_16(&mut self, cpu: &mut dyn CpuLines, addr: u32) -> u32 {
        self.cycle_read(cpu, addr, Width::Word)
    }

    /// 32-bit read.
    pub fn read_32(&mut self, cpu: &mut dyn CpuLines, addr: u32) -> u32 {
        self.cycle_read(cpu, addr, Width::Long)
    }

    /// 8-bit write.
    pub fn write_8(&mut self, cpu: &mut dyn CpuLines, addr: u32, value: u32) {
        self.cycle_write(cpu, addr, value, Width::Byte);
    }

    /// 16-bit write.
    pub fn write_16(&mut self, cpu: &mut dyn CpuLines, addr: u32, value: u32) {
        self.cycle_write(cpu, addr, value, Width::Word);
    }

    /// 32-bit write.
    pub fn write_32(&mut self, cpu: &mut dyn CpuLines, addr: u32, value: u32) {
        self.cycle_write(cpu, addr, value, Width::Long);
    }

    /// Disassembler fetches take the same paths as live reads.
    pub fn disassembler_read_8(&mut self, cpu: &mut dyn CpuLines, addr: u32) -> u32 {
        self.read_8(cpu, addr)
    }

    pub fn disassembler_read_16(&mut self, cpu: &mut dyn CpuLines, addr: u32) -> u32 {
        self.read_16(cpu, addr)
    }

    pub fn disassembler_read_32(&mut self, cpu: &mut dyn CpuLines, addr: u32) -> u32 {
        self.read_32(cpu, addr)
    }

    /// Side-effect-free byte read for debuggers: applies the overlay and
    /// page map without touching referenced/dirty bits or device state.
    /// I/O space reads as all-ones.
    #[must_use]
    pub fn peek_8(&self, addr: u32) -> u8 {
        let addr = self.overlay(addr & 0xFF_FFFF);
        if (ROM_BASE..=ROM_END).contains(&addr) {
            return self.memory.rom.load_8(addr);
        }
        if addr <= RAM_END {
            let phys = self.memory.translate(addr);
            if phys < EXP_RAM_BASE {
                return self.memory.base_ram.load_8(phys);
            }
            let offset = phys - EXP_RAM_BASE;
            if (offset as usize) < self.memory.exp_ram.len() {
                return self.memory.exp_ram.load_8(offset);
            }
            return 0xFF;
        }
        if (IO_A_BASE..=IO_A_END).contains(&addr) {
            match addr & 0x0F_0000 {
                0x00_0000 => return self.memory.map.load_8(addr),
                0x02_0000 => return self.memory.vram.load_8(addr),
                _ => {}
            }
        }
        0xFF
    }

    // -----------------------------------------------------------------
    // DMA engine
    // -----------------------------------------------------------------

    /// Move one word between the floppy controller and mapped RAM.
    ///
    /// Returns `false` when the engine is idle (disabled or DRQ low) or
    /// when the counter underflowed, which signals a DMA miss to the
    /// controller and drops the enable.
    pub fn dma_tick(&mut self) -> bool {
        if !self.dmaen || !self.fdc.drq() {
            return false;
        }
        if self.dma_count == 0 {
            // Counter ran out with the peripheral still asking: the
            // rest of the transfer is lost.
            self.fdc.dma_miss();
            self.dmaen = false;
            return false;
        }

        let addr = self.dma_address & 0x3F_FFFE;
        if self.dma_reading {
            let hi = self.fdc.read_reg(wd_2797::REG_DATA);
            let lo = self.fdc.read_reg(wd_2797::REG_DATA);
            let word = (u32::from(hi) << 8) | u32::from(lo);
            self.ram_write(addr, word, Width::Word);
        } else {
            let word = self.ram_read(addr, Width::Word);
            self.fdc.write_reg(wd_2797::REG_DATA, (word >> 8) as u8);
            self.fdc.write_reg(wd_2797::REG_DATA, word as u8);
        }
        self.dma_address = (self.dma_address + 2) & 0x3F_FFFF;
        self.dma_count -= 1;
        true
    }

    /// Drain the controller's request line: keep moving words until DRQ
    /// drops or the counter runs dry. Returns the words moved.
    pub fn dma_pump(&mut self) -> u32 {
        let mut moved = 0;
        while self.dma_tick() {
            moved += 1;
        }
        moved
    }

    // -----------------------------------------------------------------
    // Cycle internals
    // -----------------------------------------------------------------

    fn overlay(&self, addr: u32) -> u32 {
        // With ROMLMAP clear the low window decodes into ROM, so the
        // CPU fetches its reset vectors from the boot PROM.
        if self.romlmap {
            addr
        } else {
            addr | 0x80_0000
        }
    }

    fn cycle_read(&mut self, cpu: &mut dyn CpuLines, addr: u32, width: Width) -> u32 {
        let addr = self.overlay(addr & 0xFF_FFFF);

        let verdict = self.memory.check_access(addr, cpu.status_register(), false);
        if verdict != MemStatus::Allowed {
            self.raise_bus_fault(cpu, addr, width, false, verdict);
            return ALL_ONES;
        }

        if (ROM_BASE..=ROM_END).contains(&addr) {
            return region_load(&self.memory.rom, addr, width);
        }
        if addr <= RAM_END {
            return self.ram_read(addr, width);
        }
        if (IO_A_BASE..=IO_A_END).contains(&addr) {
            return match addr & 0x0F_0000 {
                0x00_0000 => {
                    if addr > MAP_RAM_TOP {
                        eprintln!(
                            "NOTE: RD{} from MapRAM mirror, addr=0x{addr:08X}",
                            width.bits()
                        );
                    }
                    region_load(&self.memory.map, addr, width)
                }
                0x02_0000 => {
                    if addr > VRAM_TOP {
                        eprintln!(
                            "NOTE: RD{} from VideoRAM mirror, addr=0x{addr:08X}",
                            width.bits()
                        );
                    }
                    region_load(&self.memory.vram, addr, width)
                }
                _ => width.trim(self.io_read(cpu, addr, width.bits())),
            };
        }
        width.trim(self.io_read(cpu, addr, width.bits()))
    }

    fn cycle_write(&mut self, cpu: &mut dyn CpuLines, addr: u32, value: u32, width: Width) {
        let addr = self.overlay(addr & 0xFF_FFFF);

        let verdict = self.memory.check_access(addr, cpu.status_register(), true);
        if verdict != MemStatus::Allowed {
            self.raise_bus_fault(cpu, addr, width, true, verdict);
            return;
        }

        if (ROM_BASE..=ROM_END).contains(&addr) {
            // ROM is read-only; the write is dropped on the floor.
            return;
        }
        if addr <= RAM_END {
            self.ram_write(addr, value, width);
            return;
        }
        if (IO_A_BASE..=IO_A_END).contains(&addr) {
            match addr & 0x0F_0000 {
                0x00_0000 => {
                    if addr > MAP_RAM_TOP {
                        eprintln!(
                            "NOTE: WR{} to MapRAM mirror, addr=0x{addr:08X}, data=0x{value:04X}",
                            width.bits()
                        );
                    }
                    region_store(&mut self.memory.map, addr, width, value);
                }
                0x02_0000 => {
                    if addr > VRAM_TOP {
                        eprintln!(
                            "NOTE: WR{} to VideoRAM mirror, addr=0x{addr:08X}, data=0x{value:04X}",
                            width.bits()
                        );
                    }
                    region_store(&mut self.memory.vram, addr, width, value);
                }
                _ => self.io_write(cpu, addr, value, width.bits()),
            }
            return;
        }
        self.io_write(cpu, addr, value, width.bits());
    }

    fn ram_read(&mut self, addr: u32, width: Width) -> u32 {
        let phys = self.memory.map_addr(addr, false);
        if phys < EXP_RAM_BASE {
            return region_load(&self.memory.base_ram, phys, width);
        }
        let offset = phys - EXP_RAM_BASE;
        if (offset as usize) < self.memory.exp_ram.len() {
            region_load(&self.memory.exp_ram, offset, width)
        } else {
            // Nothing installed up there.
            match width {
                Width::Byte => 0xFF,
                Width::Word => 0xFFFF,
                Width::Long => ALL_ONES,
            }
        }
    }

    fn ram_write(&mut self, addr: u32, value: u32, width: Width) {
        let phys = self.memory.map_addr(addr, true);
        if phys < EXP_RAM_BASE {
            region_store(&mut self.memory.base_ram, phys, width, value);
            return;
        }
        let offset = phys - EXP_RAM_BASE;
        if (offset as usize) < self.memory.exp_ram.len() {
            region_store(&mut self.memory.exp_ram, offset, width, value);
        }
        // Writes beyond the installed expansion RAM are dropped.
    }

    fn raise_bus_fault(
        &mut self,
        cpu: &mut dyn CpuLines,
        addr: u32,
        width: Width,
        writing: bool,
        verdict: MemStatus,
    ) {
        let pie = if self.pie { 0x0400 } else { 0 };
        match verdict {
            MemStatus::Allowed => return,
            MemStatus::PageFault => {
                self.genstat = (if writing { 0x8BFF } else { 0xCBFF }) | pie;
            }
            MemStatus::UserOutsideRam => {
                self.genstat = (if writing { 0x9AFF } else { 0xDAFF }) | pie;
            }
            MemStatus::KernelProtected | MemStatus::WriteProtected => {
                // TODO: work out from the TRM which status registers the
                // hardware latches for these two faults; genstat is left
                // untouched until then.
            }
        }

        let encoding: u16 = match width {
            Width::Byte if addr & 1 != 0 => 0x7D00,
            Width::Byte => 0x7E00,
            _ => 0x7C00,
        };
        self.bsr0 = encoding | ((addr >> 16) & 0xFF) as u16;
        self.bsr1 = addr as u16;

        eprintln!(
            "ERR: bus error on {}{}, addr=0x{addr:08X}",
            if writing { "WR" } else { "RD" },
            width.bits()
        );
        cpu.pulse_bus_error();
    }
}
