//! Bus-level fault and protection behavior, driven through the CPU
//! entry points.

use machine_3b1::{CpuLines, SystemConfig, UnixPc};

const GENSTAT: u32 = 0x41_0000;
const BSR0: u32 = 0x43_0000;
const CLRSTAT: u32 = 0x4C_0000;
const ROMLMAP_REG: u32 = 0xE4_3000;
const PIE_REG: u32 = 0xE4_1000;

struct TestCpu {
    sr: u16,
    bus_errors: u32,
}

impl TestCpu {
    fn supervisor() -> Self {
        Self {
            sr: 0x2700,
            bus_errors: 0,
        }
    }

    fn user() -> Self {
        Self {
            sr: 0x0000,
            bus_errors: 0,
        }
    }
}

impl CpuLines for TestCpu {
    fn status_register(&self) -> u16 {
        self.sr
    }

    fn pulse_bus_error(&mut self) {
        self.bus_errors += 1;
    }

    fn end_timeslice(&mut self) {}
}

fn make_machine() -> UnixPc {
    let mut rom = vec![0u8; 32 * 1024];
    rom[0..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    rom[4..8].copy_from_slice(&[0x00, 0x80, 0x00, 0x08]);
    UnixPc::new(rom).expect("valid config")
}

fn map_page(machine: &mut UnixPc, page: u32, entry: u16) {
    machine.memory.map.store_16(page * 2, entry);
}

#[test]
fn rom_overlay_serves_boot_vectors_from_low_addresses() {
    let mut machine = make_machine();
    let mut cpu = TestCpu::supervisor();

    let low = machine.read_32(&mut cpu, 0x00_0000);
    let rom = machine.read_32(&mut cpu, 0x80_0000);
    assert_eq!(low, rom, "low window mirrors ROM while ROMLMAP is clear");
    assert_eq!(low, 0xDEAD_BEEF);

    // Lift the overlay and map virtual page 0 onto physical page 0.
    machine.write_16(&mut cpu, ROMLMAP_REG, 0x8000);
    assert!(machine.romlmap);
    map_page(&mut machine, 0, 0xE000);

    machine.write_32(&mut cpu, 0x00_0000, 0x1234_5678);
    assert_eq!(machine.read_32(&mut cpu, 0x00_0000), 0x1234_5678);
    assert_eq!(cpu.bus_errors, 0);
}

#[test]
fn page_fault_read_sets_the_fault_registers() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::user();

    let value = machine.read_8(&mut cpu, 0x10_0000);
    assert_eq!(value, 0xFFFF_FFFF, "faulted reads return all-ones");
    assert_eq!(cpu.bus_errors, 1);
    assert_eq!(machine.genstat, 0xCBFF);
    assert_eq!(machine.bsr0, 0x7E10, "even byte access, high address bits");
    assert_eq!(machine.bsr1, 0x0000);
}

#[test]
fn fault_codes_encode_direction_and_kind() {
    let mut machine = make_machine();
    machine.romlmap = true;

    let mut cpu = TestCpu::user();
    machine.write_16(&mut cpu, 0x10_0000, 0);
    assert_eq!(machine.genstat, 0x8BFF, "page fault on write");
    assert_eq!(machine.bsr0, 0x7C10);

    machine.read_16(&mut cpu, 0x50_0000);
    assert_eq!(machine.genstat, 0xDAFF, "user read above the RAM window");
    assert_eq!(machine.bsr0, 0x7C50);
    assert_eq!(machine.bsr1, 0x0000);

    machine.write_16(&mut cpu, 0x50_0000, 0);
    assert_eq!(machine.genstat, 0x9AFF, "user write above the RAM window");
    assert_eq!(cpu.bus_errors, 3);
}

#[test]
fn pie_folds_into_the_fault_code() {
    let mut machine = make_machine();
    let mut supervisor = TestCpu::supervisor();
    machine.write_16(&mut supervisor, ROMLMAP_REG, 0x8000);
    machine.write_16(&mut supervisor, PIE_REG, 0x8000);
    assert!(machine.pie);

    let mut cpu = TestCpu::user();
    machine.read_8(&mut cpu, 0x10_0000);
    assert_eq!(machine.genstat, 0xCFFF, "0xCBFF with bit 10 set");
}

#[test]
fn byte_faults_encode_address_parity_in_bsr0() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::user();

    machine.read_8(&mut cpu, 0x10_0001);
    assert_eq!(machine.bsr0, 0x7D10, "odd byte");

    machine.read_8(&mut cpu, 0x10_0000);
    assert_eq!(machine.bsr0, 0x7E10, "even byte");

    machine.read_32(&mut cpu, 0x10_0000);
    assert_eq!(machine.bsr0, 0x7C10, "word and long use the word encoding");
}

#[test]
fn kernel_and_write_protect_faults_leave_genstat_alone() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut supervisor = TestCpu::supervisor();
    machine.write_16(&mut supervisor, CLRSTAT, 0);

    // Present and write-enabled, but inside the kernel's low range.
    map_page(&mut machine, 0x10, 0xA000);
    let mut cpu = TestCpu::user();
    machine.read_8(&mut cpu, 0x01_0000);
    assert_eq!(cpu.bus_errors, 1, "the bus-error pulse still fires");
    assert_eq!(machine.genstat, 0xFFFF, "genstat is not latched");
    assert_eq!(machine.bsr0, 0x7E01, "the address is still recorded");

    // Present but not write-enabled, above the kernel range.
    machine.write_16(&mut supervisor, CLRSTAT, 0);
    map_page(&mut machine, 0x100, 0x2000);
    machine.write_16(&mut cpu, 0x10_0000, 0);
    assert_eq!(cpu.bus_errors, 2);
    assert_eq!(machine.genstat, 0xFFFF);
    assert_eq!(machine.bsr0, 0x7C10);
}

#[test]
fn supervisor_bypasses_every_protection() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::supervisor();

    // Unmapped page, kernel range, I/O space: all allowed.
    machine.read_8(&mut cpu, 0x10_0000);
    machine.write_16(&mut cpu, 0x01_0000, 0xBEEF);
    assert_eq!(machine.read_16(&mut cpu, 0x01_0000), 0xBEEF);
    assert_eq!(cpu.bus_errors, 0);
}

#[test]
fn allowed_user_accesses_promote_the_page_bits() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::user();

    map_page(&mut machine, 0x100, 0xA000);
    machine.write_16(&mut cpu, 0x10_0000, 0x1234);
    assert_eq!(cpu.bus_errors, 0);
    assert_eq!(
        machine.memory.map.load_8(0x100 * 2),
        0xA0 | 0x60,
        "write sets referenced + dirty"
    );
    assert_eq!(machine.read_16(&mut cpu, 0x10_0000), 0x1234);

    map_page(&mut machine, 0x101, 0x2000);
    machine.read_8(&mut cpu, 0x10_1000);
    assert_eq!(
        machine.memory.map.load_8(0x101 * 2) & 0x40,
        0x40,
        "read sets referenced"
    );
}

#[test]
fn clrstat_resets_all_three_status_registers() {
    let mut machine = make_machine();
    machine.romlmap = true;

    let mut user = TestCpu::user();
    machine.read_8(&mut user, 0x10_0000);
    assert_ne!(machine.genstat, 0xFFFF);

    let mut cpu = TestCpu::supervisor();
    machine.write_16(&mut cpu, CLRSTAT, 0x0000);
    assert_eq!(machine.genstat, 0xFFFF);
    assert_eq!(machine.bsr0, 0xFFFF);
    assert_eq!(machine.bsr1, 0xFFFF);

    // Any write will do, including a byte.
    machine.read_8(&mut user, 0x10_0000);
    machine.write_8(&mut cpu, CLRSTAT, 0);
    assert_eq!(machine.genstat, 0xFFFF);
}

#[test]
fn status_registers_read_duplicated_on_both_bus_halves() {
    let mut machine = make_machine();
    machine.romlmap = true;

    let mut user = TestCpu::user();
    machine.read_8(&mut user, 0x10_0000);

    let mut cpu = TestCpu::supervisor();
    assert_eq!(machine.read_32(&mut cpu, GENSTAT), 0xCBFF_CBFF);
    assert_eq!(machine.read_32(&mut cpu, BSR0), 0x7E10_7E10);
    assert_eq!(machine.read_16(&mut cpu, GENSTAT), 0xCBFF);
}

#[test]
fn genstat_byte_writes_select_the_byte_by_parity() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::supervisor();

    machine.write_8(&mut cpu, GENSTAT, 0x12);
    machine.write_8(&mut cpu, GENSTAT + 1, 0x34);
    assert_eq!(machine.read_16(&mut cpu, GENSTAT), 0x1234);
}

#[test]
fn map_and_video_ram_windows_mirror_their_stores() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::supervisor();

    machine.write_16(&mut cpu, 0x40_0200, 0xA55A);
    assert_eq!(machine.read_16(&mut cpu, 0x40_0200), 0xA55A);
    assert_eq!(
        machine.read_16(&mut cpu, 0x40_0A00),
        0xA55A,
        "Map RAM repeats every 2 KiB"
    );

    machine.write_16(&mut cpu, 0x42_0100, 0x1357);
    assert_eq!(machine.read_16(&mut cpu, 0x42_0100), 0x1357);
    assert_eq!(
        machine.read_16(&mut cpu, 0x42_8100),
        0x1357,
        "video RAM repeats every 32 KiB"
    );
}

#[test]
fn ram_round_trips_at_all_widths() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::supervisor();
    map_page(&mut machine, 2, 0xE002);

    machine.write_8(&mut cpu, 0x2001, 0xAB);
    assert_eq!(machine.read_8(&mut cpu, 0x2001), 0xAB);
    machine.write_16(&mut cpu, 0x2002, 0x1234);
    assert_eq!(machine.read_16(&mut cpu, 0x2002), 0x1234);
    machine.write_32(&mut cpu, 0x2004, 0xCAFE_F00D);
    assert_eq!(machine.read_32(&mut cpu, 0x2004), 0xCAFE_F00D);
    assert_eq!(machine.read_16(&mut cpu, 0x2004), 0xCAFE, "big-endian layout");
}

#[test]
fn missing_expansion_ram_reads_all_ones_and_drops_writes() {
    let mut machine = make_machine();
    machine.romlmap = true;
    let mut cpu = TestCpu::supervisor();

    // Map virtual page 0 to physical page 0x200, the first expansion
    // page, on a machine with no expansion card.
    map_page(&mut machine, 0, 0xE200);
    machine.write_16(&mut cpu, 0x0000, 0x1234);
    assert_eq!(machine.read_16(&mut cpu, 0x0000), 0xFFFF);
    assert_eq!(machine.read_32(&mut cpu, 0x0000), 0xFFFF_FFFF);
    assert_eq!(cpu.bus_errors, 0, "open RAM is not a bus error");
}

#[test]
fn installed_expansion_ram_round_trips() {
    let mut config = SystemConfig::new(vec![0u8; 32 * 1024]);
    config.exp_ram_size = 512 * 1024;
    let mut machine = UnixPc::new_with_config(config).expect("valid config");
    machine.romlmap = true;
    let mut cpu = TestCpu::supervisor();

    map_page(&mut machine, 0, 0xE200);
    machine.write_32(&mut cpu, 0x0000, 0x0BAD_CAFE);
    assert_eq!(machine.read_32(&mut cpu, 0x0000), 0x0BAD_CAFE);
}

#[test]
fn disassembler_reads_match_live_reads() {
    let mut machine = make_machine();
    let mut cpu = TestCpu::supervisor();

    assert_eq!(
        machine.disassembler_read_32(&mut cpu, 0x00_0000),
        machine.read_32(&mut cpu, 0x00_0000)
    );
    assert_eq!(
        machine.disassembler_read_16(&mut cpu, 0x80_0000),
        0xDEAD
    );
    assert_eq!(machine.disassembler_read_8(&mut cpu, 0x80_0003), 0xEF);
}
