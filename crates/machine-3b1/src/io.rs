//! The 3B1's memory-mapped I/O register file.
//!
//! Zone A (0x400000-0x7FFFFF) carries the system board registers,
//! selected by address bits 16-19. Zone B (0xC00000-0xFFFFFF) carries
//! the expansion slots and the peripheral chip windows. Registers with
//! no device behind them accept writes and read back as all-ones.

use crate::{CpuLines, UnixPc, ALL_ONES};

/// Duplicate a 16-bit register into both halves of the data bus.
fn dup16(value: u16) -> u32 {
    (u32::from(value) << 16) | u32::from(value)
}

/// Warn when a register is poked at a width its hardware latch lacks.
fn enforce_size(bits: u32, addr: u32, reading: bool, allowed: u32, name: &str) {
    if bits & allowed == 0 {
        eprintln!(
            "WARNING: {} 0x{addr:08X} ({name}) with invalid size {bits}!",
            if reading { "read from" } else { "write to" },
        );
    }
}

impl UnixPc {
    pub(crate) fn io_read(&mut self, cpu: &mut dyn CpuLines, addr: u32, bits: u32) -> u32 {
        if (0x40_0000..=0x7F_FFFF).contains(&addr) {
            match addr & 0x0F_0000 {
                0x01_0000 => {
                    enforce_size(bits, addr, true, 16, "GENSTAT");
                    return dup16(self.genstat);
                }
                0x03_0000 => {
                    enforce_size(bits, addr, true, 16, "BSR0");
                    return dup16(self.bsr0);
                }
                0x04_0000 => {
                    enforce_size(bits, addr, true, 16, "BSR1");
                    return dup16(self.bsr1);
                }
                0x05_0000 => {
                    // Phone status: telephony is not modeled.
                    enforce_size(bits, addr, true, 8 | 16, "PHONE STATUS");
                }
                0x06_0000 => {
                    enforce_size(bits, addr, true, 16, "DMACOUNT");
                    // U/OERR- idle and the unused bit 14 both read set.
                    return u32::from(self.dma_count & 0x3FFF) | 0xC000;
                }
                0x07_0000 => {
                    // Printer idle, no parity error; bit 3 mirrors the
                    // floppy IRQ line.
                    let mut data = 0x0012_0012;
                    if self.fdc.irq() {
                        data |= 0x0008_0008;
                    }
                    return data;
                }
                0x08_0000 => {
                    eprintln!("READ NOTIMP: Realtime Clock");
                }
                0x0A_0000 | 0x0C_0000 => {
                    // MISCCON and CLRSTAT are write-only.
                    return ALL_ONES;
                }
                _ => {}
            }
        } else if addr >= 0xC0_0000 {
            match addr & 0xF0_0000 {
                0xC0_0000 | 0xD0_0000 => {
                    eprintln!("NOTE: RD{bits} from expansion card space, addr=0x{addr:08X}");
                    return ALL_ONES;
                }
                _ => match addr & 0x07_0000 {
                    0x01_0000 => {
                        enforce_size(bits, addr, true, 16, "FDC REGISTERS");
                        cpu.end_timeslice();
                        return u32::from(self.fdc.read_reg(((addr >> 1) & 3) as u8));
                    }
                    0x04_0000 => {
                        if matches!(
                            addr & 0x07_7000,
                            0x04_0000 | 0x04_1000 | 0x04_2000 | 0x04_3000 | 0x04_4000 | 0x04_5000
                                | 0x04_6000
                        ) {
                            // General control registers are all write-only.
                            return ALL_ONES;
                        }
                    }
                    _ => {}
                },
            }
        }

        eprintln!("unhandled read{bits:02}, addr=0x{addr:08X}");
        ALL_ONES
    }

    pub(crate) fn io_write(&mut self, cpu: &mut dyn CpuLines, addr: u32, data: u32, bits: u32) {
        if (0x40_0000..=0x7F_FFFF).contains(&addr) {
            match addr & 0x0F_0000 {
                0x01_0000 => {
                    if bits == 16 {
                        self.genstat = data as u16;
                    } else if bits == 8 {
                        if addr & 1 != 0 {
                            self.genstat = (self.genstat & 0xFF00) | (data as u16 & 0x00FF);
                        } else {
                            self.genstat = (self.genstat & 0x00FF) | ((data as u16) << 8);
                        }
                    }
                    return;
                }
                0x06_0000 => {
                    enforce_size(bits, addr, false, 16, "DMACOUNT");
                    self.dma_count = (data & 0x3FFF) as u16;
                    self.idmarw = data & 0x4000 != 0;
                    self.dmaen = data & 0x8000 != 0;
                    // The "dummy DMA transfer" of the hardware docs: with
                    // IDMARW low, loading the counter also pushes a
                    // throwaway word through the page map.
                    if !self.idmarw {
                        let phys = self.memory.map_addr(addr, true);
                        self.memory.base_ram.store_32(phys, 0xDEAD);
                    }
                    self.dma_count += 1;
                    return;
                }
                0x0A_0000 => {
                    enforce_size(bits, addr, false, 16, "MISCCON");
                    self.dma_reading = data & 0x4000 != 0;
                    self.leds = ((!data & 0xF00) >> 8) as u8;
                    eprintln!(
                        "LEDs: {} {} {} {}",
                        if self.leds & 8 != 0 { "R" } else { "-" },
                        if self.leds & 4 != 0 { "G" } else { "-" },
                        if self.leds & 2 != 0 { "Y" } else { "-" },
                        if self.leds & 1 != 0 { "R" } else { "-" },
                    );
                    return;
                }
                0x0C_0000 => {
                    // Any write clears the fault registers.
                    self.genstat = 0xFFFF;
                    self.bsr0 = 0xFFFF;
                    self.bsr1 = 0xFFFF;
                    return;
                }
                0x0D_0000 => {
                    // DMA address: the data bus is ignored, the address
                    // lines carry the value. A14 picks the half.
                    if addr & 0x4000 != 0 {
                        self.dma_address = (self.dma_address & 0x1FE) | ((addr & 0x3FFE) << 8);
                    } else {
                        self.dma_address = (self.dma_address & 0x3F_FE00) | (addr & 0x1FE);
                    }
                    return;
                }
                0x0E_0000 => {
                    enforce_size(bits, addr, false, 16, "DISKCON");
                    // Bit 7 low holds the floppy controller in reset.
                    // Drive select, motor and the HDD bits are accepted
                    // without effect.
                    if data & 0x80 == 0 {
                        self.fdc.reset();
                    }
                    return;
                }
                _ => {}
            }
        } else if addr >= 0xC0_0000 {
            match addr & 0xF0_0000 {
                0xC0_0000 | 0xD0_0000 => {
                    eprintln!(
                        "NOTE: WR{bits} to expansion card space, addr=0x{addr:08X}, data=0x{data:08X}"
                    );
                    return;
                }
                _ => match addr & 0x07_0000 {
                    0x01_0000 => {
                        enforce_size(bits, addr, false, 16, "FDC REGISTERS");
                        cpu.end_timeslice();
                        self.fdc.write_reg(((addr >> 1) & 3) as u8, data as u8);
                        return;
                    }
                    0x04_0000 => {
                        match addr & 0x07_7000 {
                            0x04_1000 => {
                                enforce_size(bits, addr, false, 16, "PIE");
                                self.pie = data & 0x8000 != 0;
                            }
                            0x04_3000 => {
                                enforce_size(bits, addr, false, 16, "ROMLMAP");
                                self.romlmap = data & 0x8000 != 0;
                            }
                            0x04_4000 => enforce_size(bits, addr, false, 16, "L1 MODEM"),
                            0x04_5000 => enforce_size(bits, addr, false, 16, "L2 MODEM"),
                            0x04_6000 => enforce_size(bits, addr, false, 16, "D/N CONNECT"),
                            0x04_7000 => {
                                enforce_size(bits, addr, false, 16, "WHOLE SCREEN REVERSE VIDEO");
                            }
                            // EE and BP latches: accepted, nothing behind
                            // them.
                            _ => {}
                        }
                        return;
                    }
                    _ => {}
                },
            }
        }

        eprintln!("unhandled write{bits:02}, addr=0x{addr:08X}, data=0x{data:08X}");
    }
}
