//! Western Digital WD2797 floppy disk controller.
//!
//! Standalone IC emulation with no dependencies: the controller knows
//! nothing about the machine around it and talks to the world through
//! its four registers, its IRQ and DRQ output lines, and a pluggable
//! image store.
//!
//! # Register interface
//!
//! Four registers selected by the A1/A2 pins:
//! - **STATUS** (read) / **COMMAND** (write)
//! - **TRACK**
//! - **SECTOR**
//! - **DATA**
//!
//! # Command classes
//!
//! Type-1 commands (RESTORE/SEEK/STEP) position the head and complete
//! immediately. Type-2/3 commands (sector reads and writes, READ
//! ADDRESS, FORMAT TRACK) stream bytes through the data register, with
//! DRQ asserted while the internal buffer holds data. Timing is not
//! modeled: a command's data is staged in full the moment the command
//! byte lands.

#![allow(clippy::cast_possible_truncation)]

pub mod image;

pub use image::{DiskGeometry, ImageError, SectorStore};

/// Register select values (the chip's A1/A2 pins).
pub const REG_STATUS: u8 = 0;
pub const REG_TRACK: u8 = 1;
pub const REG_SECTOR: u8 = 2;
pub const REG_DATA: u8 = 3;

const CMD_MASK: u8 = 0xF0;
const CMD_RESTORE: u8 = 0x00;
const CMD_SEEK: u8 = 0x10;
const CMD_STEP: u8 = 0x20;
const CMD_STEP_TU: u8 = 0x30;
const CMD_STEPIN: u8 = 0x40;
const CMD_STEPIN_TU: u8 = 0x50;
const CMD_STEPOUT: u8 = 0x60;
const CMD_STEPOUT_TU: u8 = 0x70;
const CMD_READ_SECTOR: u8 = 0x80;
const CMD_READ_SECTOR_MULTI: u8 = 0x90;
const CMD_WRITE_SECTOR: u8 = 0xA0;
const CMD_WRITE_SECTOR_MULTI: u8 = 0xB0;
const CMD_READ_ADDRESS: u8 = 0xC0;
const CMD_FORCE_INTERRUPT: u8 = 0xD0;
const CMD_READ_TRACK: u8 = 0xE0;
const CMD_FORMAT_TRACK: u8 = 0xF0;

/// Raw byte count the FORMAT TRACK command consumes, gaps included.
const FORMAT_TRACK_BYTES: usize = 7170;

/// Western Digital WD2797 floppy disk controller.
pub struct Wd2797 {
    geom: DiskGeometry,
    track: u32,
    head: u32,
    sector: u8,
    track_reg: u8,
    data_reg: u8,
    /// -1 steps toward track 0, +1 toward the spindle.
    last_step_dir: i8,
    /// One track of staging between the image and the data register.
    data: Vec<u8>,
    data_pos: usize,
    data_len: usize,
    status: u8,
    irq: bool,
    /// Whether the last command reports DRQ in its status byte.
    cmd_has_drq: bool,
    formatting: bool,
    writeable: bool,
    /// Image byte offset for the buffered write in flight, if any.
    write_pos: Option<u64>,
    image: Option<Box<dyn SectorStore>>,
}

impl Wd2797 {
    /// Create a controller with no image attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            geom: DiskGeometry::default(),
            track: 0,
            head: 0,
            sector: 0,
            track_reg: 0,
            data_reg: 0,
            last_step_dir: -1,
            data: Vec::new(),
            data_pos: 0,
            data_len: 0,
            status: 0,
            irq: false,
            cmd_has_drq: false,
            formatting: false,
            writeable: false,
            write_pos: None,
            image: None,
        }
    }

    /// Hardware reset (the machine's DISKCON bit 7 pulled low). Clears
    /// positioning, IRQ and the transfer buffer; the image and its
    /// geometry stay attached.
    pub fn reset(&mut self) {
        self.track = 0;
        self.head = 0;
        self.sector = 0;
        self.track_reg = 0;
        self.irq = false;
        self.data_pos = 0;
        self.data_len = 0;
        self.status = 0;
        self.data_reg = 0;
        self.last_step_dir = -1;
    }

    /// Attach a disk image. Geometry is derived from the store's length,
    /// which must divide into whole tracks of the given shape.
    pub fn load(
        &mut self,
        mut store: Box<dyn SectorStore>,
        sector_size: u32,
        sectors_per_track: u32,
        heads: u32,
        writeable: bool,
    ) -> Result<(), ImageError> {
        let size = store.len()?;
        let geom = DiskGeometry::from_image_size(size, sector_size, sectors_per_track, heads)?;

        // One track of sector data, with headroom for the raw byte count
        // FORMAT TRACK pushes through the data register.
        let track_bytes = (sector_size * sectors_per_track) as usize;
        self.data = vec![0; track_bytes.max(FORMAT_TRACK_BYTES)];
        self.data_pos = 0;
        self.data_len = 0;

        self.image = Some(store);
        self.geom = geom;
        self.writeable = writeable;
        Ok(())
    }

    /// Detach the image and forget its geometry.
    pub fn unload(&mut self) {
        self.data = Vec::new();
        self.data_pos = 0;
        self.data_len = 0;
        self.image = None;
        self.geom = DiskGeometry::default();
        self.writeable = false;
    }

    /// IRQ line: raised on command completion or error, cleared by a
    /// status read or the next command write.
    #[must_use]
    pub fn irq(&self) -> bool {
        self.irq
    }

    /// DRQ line: high while transfer bytes remain in the buffer.
    #[must_use]
    pub fn drq(&self) -> bool {
        self.data_pos < self.data_len
    }

    /// Latched status byte, without the read side effects.
    #[must_use]
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Current head position (cylinder under the head, not the track
    /// register).
    #[must_use]
    pub fn track(&self) -> u32 {
        self.track
    }

    /// Sector register.
    #[must_use]
    pub fn sector(&self) -> u8 {
        self.sector
    }

    /// Geometry of the attached image, if any.
    #[must_use]
    pub fn geometry(&self) -> Option<DiskGeometry> {
        self.image.is_some().then_some(self.geom)
    }

    /// Read one of the four registers. A STATUS read clears the IRQ
    /// line before returning; draining the last buffered byte through
    /// DATA raises it.
    pub fn read_reg(&mut self, reg: u8) -> u8 {
        match reg & 0x03 {
            REG_STATUS => {
                self.irq = false;
                let pending = self.data_pos < self.data_len;
                if self.cmd_has_drq {
                    let mut st = self.status & !0x03;
                    if pending {
                        // Data still staged: DRQ up, controller busy.
                        st |= 0x83;
                    }
                    st
                } else {
                    let mut st = self.status & !0x01;
                    if pending {
                        st |= 0x01;
                    }
                    st
                }
            }
            REG_TRACK => self.track_reg,
            REG_SECTOR => self.sector,
            REG_DATA => {
                if self.data_pos < self.data_len {
                    if self.data_pos == self.data_len - 1 {
                        self.irq = true;
                    }
                    let byte = self.data[self.data_pos];
                    self.data_pos += 1;
                    byte
                } else {
                    self.data_reg
                }
            }
            _ => 0xFF,
        }
    }

    /// Write one of the four registers. A write to the STATUS offset is
    /// a command.
    pub fn write_reg(&mut self, reg: u8, val: u8) {
        match reg & 0x03 {
            REG_STATUS => self.command(val),
            REG_TRACK => {
                self.track = u32::from(val);
                self.track_reg = val;
            }
            REG_SECTOR => self.sector = val,
            REG_DATA => self.write_data(val),
            _ => {}
        }
    }

    /// DMA engine failed to service DRQ in time: drop the rest of the
    /// transfer and report lost data.
    pub fn dma_miss(&mut self) {
        self.data_pos = self.data_len;
        self.write_pos = Some(0);
        self.status = 0x04;
        self.irq = true;
    }

    fn command(&mut self, val: u8) {
        let cmd = val & CMD_MASK;

        // A command write clears any pending interrupt.
        self.irq = false;

        if self.image.is_none() {
            // Drive not ready.
            self.status = 0x80;
            self.irq = true;
            return;
        }

        match cmd {
            CMD_RESTORE | CMD_SEEK | CMD_STEP | CMD_STEP_TU | CMD_STEPIN | CMD_STEPIN_TU
            | CMD_STEPOUT | CMD_STEPOUT_TU => self.position_head(cmd),
            _ => self.transfer_command(cmd, val),
        }
    }

    /// Type-1 commands: move the head, no data transfer.
    fn position_head(&mut self, cmd: u8) {
        let mut seek_error = false;

        match cmd {
            CMD_RESTORE => {
                self.track = 0;
                self.track_reg = 0;
            }
            CMD_SEEK => {
                if u32::from(self.data_reg) < self.geom.tracks {
                    self.track = u32::from(self.data_reg);
                    self.track_reg = self.data_reg;
                } else {
                    seek_error = true;
                }
            }
            _ => {
                // STEP IN/OUT latch a new direction; plain STEP reuses the
                // last one. Command bit 4 copies the result into the track
                // register.
                if cmd & !0x10 == CMD_STEPIN {
                    self.last_step_dir = 1;
                } else if cmd & !0x10 == CMD_STEPOUT {
                    self.last_step_dir = -1;
                }
                let stepped = i64::from(self.track) + i64::from(self.last_step_dir);
                if stepped < 0 {
                    self.track = 0;
                } else if stepped as u32 >= self.geom.tracks {
                    // Stepped off the end of the disc.
                    seek_error = true;
                    self.track = self.geom.tracks - 1;
                } else {
                    self.track = stepped as u32;
                }
                if cmd & 0x10 != 0 {
                    self.track_reg = self.track as u8;
                }
            }
        }

        // Positioning cancels any transfer in flight.
        self.data_len = 0;
        self.data_pos = 0;
        self.cmd_has_drq = false;

        // Head loaded, plus track-0 and seek-error flags as they now
        // stand.
        self.status = 0x20;
        if self.track == 0 {
            self.status |= 0x04;
        }
        if seek_error {
            self.status |= 0x10;
        }
        self.irq = true;
    }

    /// Type-2/3/4 commands: sector transfers, ID reads, track format,
    /// forced interrupt.
    fn transfer_command(&mut self, cmd: u8, val: u8) {
        // All of these report DRQ through the status register.
        self.cmd_has_drq = true;

        // Write commands bail early on a protected disc.
        if !self.writeable
            && matches!(cmd, CMD_WRITE_SECTOR | CMD_WRITE_SECTOR_MULTI | CMD_FORMAT_TRACK)
        {
            self.status = 0x40;
            self.irq = true;
            return;
        }

        match cmd {
            CMD_READ_ADDRESS => self.read_address(val),
            CMD_READ_SECTOR | CMD_READ_SECTOR_MULTI => self.read_sectors(cmd, val),
            CMD_WRITE_SECTOR | CMD_WRITE_SECTOR_MULTI => self.write_sectors(cmd, val),
            CMD_READ_TRACK => {
                // Raw track reads are not supported by this model.
                self.status = 0x10;
                self.irq = true;
            }
            CMD_FORMAT_TRACK => self.format_track(val),
            CMD_FORCE_INTERRUPT => self.force_interrupt(val),
            _ => {}
        }
    }

    fn read_address(&mut self, val: u8) {
        self.head = u32::from((val >> 1) & 1);

        // Six-byte ID record: C, H, R, size code, two CRC placeholders.
        let id = [
            self.track as u8,
            self.head as u8,
            self.sector,
            match self.geom.sector_size {
                128 => 0,
                256 => 1,
                512 => 2,
                1024 => 3,
                _ => 0xFF,
            },
            0,
            0,
        ];
        self.data[..id.len()].copy_from_slice(&id);
        self.data_pos = 0;
        self.data_len = id.len();

        self.status = if self.drq() { 0x02 } else { 0 };
    }

    fn read_sectors(&mut self, cmd: u8, val: u8) {
        self.head = u32::from((val >> 1) & 1);

        if self.track >= self.geom.tracks
            || self.head >= self.geom.heads
            || self.sector == 0
            || u32::from(self.sector) > self.geom.sectors_per_track
        {
            // CHS out of range: record not found.
            self.status = 0x10;
            self.irq = true;
            return;
        }

        self.data_pos = 0;
        self.data_len = 0;

        let count = if cmd == CMD_READ_SECTOR_MULTI {
            self.geom.sectors_per_track
        } else {
            1
        };

        let geom = self.geom;
        let secsz = geom.sector_size as usize;
        let (track, head, sector) = (self.track, self.head, u32::from(self.sector));
        let Some(image) = self.image.as_mut() else {
            return;
        };

        let mut len = 0;
        for i in 0..count {
            let offset = geom.sector_offset(track, head, sector + i);
            if image.read_at(offset, &mut self.data[len..len + secsz]).is_err() {
                self.status = 0x10;
                self.irq = true;
                return;
            }
            len += secsz;
        }
        self.data_len = len;

        self.status = if self.drq() { 0x02 } else { 0 };
    }

    fn write_sectors(&mut self, cmd: u8, val: u8) {
        self.head = u32::from((val >> 1) & 1);

        let count = if cmd == CMD_WRITE_SECTOR_MULTI {
            self.geom.sectors_per_track
        } else {
            1
        };

        self.data_pos = 0;
        self.data_len = (count * self.geom.sector_size) as usize;
        self.write_pos = Some(self.geom.sector_offset(
            self.track,
            self.head,
            u32::from(self.sector),
        ));

        self.status = if self.drq() { 0x02 } else { 0 };
    }

    fn format_track(&mut self, val: u8) {
        self.head = u32::from((val >> 1) & 1);

        // The emulated geometry is fixed, so the raw format stream is
        // counted and discarded.
        self.data_pos = 0;
        self.data_len = FORMAT_TRACK_BYTES;
        self.formatting = true;

        self.status = if self.drq() { 0x02 } else { 0 };
    }

    fn force_interrupt(&mut self, val: u8) {
        self.status = 0x20;
        if !self.writeable {
            self.status |= 0x40;
        }
        if self.track == 0 {
            self.status |= 0x04;
        }
        self.data_pos = 0;
        self.data_len = 0;
        // The immediate-interrupt condition bit is the only one modeled.
        if val & 0x08 != 0 {
            self.irq = true;
        }
    }

    fn write_data(&mut self, val: u8) {
        self.data_reg = val;

        // Only meaningful while a write or format command is draining.
        if self.data_pos >= self.data_len || (self.write_pos.is_none() && !self.formatting) {
            return;
        }

        if !self.formatting {
            self.data[self.data_pos] = val;
        }
        self.data_pos += 1;

        if self.data_pos == self.data_len {
            if !self.formatting {
                if let (Some(pos), Some(image)) = (self.write_pos, self.image.as_mut()) {
                    let committed = image
                        .write_at(pos, &self.data[..self.data_len])
                        .and_then(|()| image.flush());
                    if committed.is_err() {
                        self.status = 0x10;
                    }
                }
            }
            self.irq = true;
            self.write_pos = None;
            self.formatting = false;
        }
    }
}

impl Default for Wd2797 {
    fn default() -> Self {
        Self::new()
    }
}
