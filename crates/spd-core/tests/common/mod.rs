//! Simulated programmer firmware for integration tests.
//!
//! `SimDevice` answers every opcode the way the firmware does for a single
//! module on the bus, with knobs for injecting faults and alerts.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use spd_core::protocol::{Opcode, encode_alert, encode_response};
use spd_core::protocol::constants::*;
use spd_core::{
    MockTransport, ModuleType, Programmer, ProgrammerConfig, RecordingObserver, SerialTransport,
    TransportError,
};

pub const FIRMWARE_VERSION: u32 = 20240314;
pub const DEFAULT_NAME: &str = "SPD Programmer";

pub struct SimState {
    pub address: u8,
    pub kind: ModuleType,
    pub size: usize,
    pub eeprom: Vec<u8>,
    pub pmic: Option<(u8, Vec<u8>)>,
    pub page: u8,
    pub page_log: Vec<u8>,
    pub rswp: u16,
    pub rswp_supported: bool,
    pub pswp: bool,
    pub ddr5_detect_supported: bool,
    pub name: String,
    pub clock: u8,
    pub pins: [u8; 10],
    pub settings: Vec<u8>,
    /// Physical offset whose reads go unanswered, and how many more times.
    pub fail_read_at: Option<(usize, usize)>,
    /// Unanswered reads regardless of offset.
    pub silent_reads: usize,
    /// Reads whose payload gets a flipped bit.
    pub corrupt_reads: usize,
    /// Page writes answered with a zero byte.
    pub failed_page_writes: usize,
    /// Opcodes left unanswered, with how many more times.
    pub silent: Vec<(Opcode, usize)>,
    /// Alert codes sent ahead of the next reply.
    pub pending_alerts: Vec<u8>,
    pub page_writes: Vec<(usize, usize)>,
    pub byte_writes: Vec<usize>,
}

impl SimState {
    fn new(kind: ModuleType, size: usize) -> Self {
        Self {
            address: 0x50,
            kind,
            size,
            eeprom: (0..size).map(|i| (i as u8) ^ ((i >> 8) as u8).wrapping_mul(0x5A)).collect(),
            pmic: None,
            page: 0,
            page_log: Vec::new(),
            rswp: 0,
            rswp_supported: true,
            pswp: false,
            ddr5_detect_supported: true,
            name: DEFAULT_NAME.to_string(),
            clock: 0,
            pins: [0; 10],
            settings: vec![0xA5; 32],
            fail_read_at: None,
            silent_reads: 0,
            corrupt_reads: 0,
            failed_page_writes: 0,
            silent: Vec::new(),
            pending_alerts: Vec::new(),
            page_writes: Vec::new(),
            byte_writes: Vec::new(),
        }
    }

    /// Map a wire offset to an EEPROM index.
    fn physical(&self, wire: usize) -> usize {
        if self.kind == ModuleType::Ddr5 && wire & SPD5_NVM_SELECT as usize != 0 {
            self.page as usize * DDR5_PAGE_SIZE + (wire & 0x7F)
        } else {
            wire
        }
    }

    fn block_of(&self, offset: usize) -> u16 {
        match self.kind {
            ModuleType::Ddr5 => (offset / 64) as u16,
            ModuleType::Ddr4 => (offset / 128) as u16,
            _ => 0,
        }
    }

    fn writable(&self, offset: usize) -> bool {
        !self.pswp && self.rswp & (1 << self.block_of(offset)) == 0
    }

    fn respond(&mut self, command: &[u8]) -> Vec<u8> {
        let Some((&opcode, params)) = command.split_first() else {
            return Vec::new();
        };
        let Some(opcode) = Opcode::from_byte(opcode) else {
            return vec![UNKNOWN_MARKER];
        };
        if let Some((_, remaining)) = self
            .silent
            .iter_mut()
            .find(|(op, remaining)| *op == opcode && *remaining > 0)
        {
            *remaining -= 1;
            return Vec::new();
        }

        let mut out: Vec<u8> = self.pending_alerts.drain(..).flat_map(encode_alert).collect();
        let reply = self.handle(opcode, params);
        out.extend(reply);
        out
    }

    fn handle(&mut self, opcode: Opcode, p: &[u8]) -> Vec<u8> {
        let ok = |b: bool| encode_response(&[b as u8]);
        match opcode {
            Opcode::Ping => vec![READY_MARKER],
            Opcode::Version => encode_response(&FIRMWARE_VERSION.to_le_bytes()),
            Opcode::Name => {
                if p == [GET] {
                    let mut bytes = self.name.as_bytes().to_vec();
                    bytes.push(0);
                    encode_response(&bytes)
                } else {
                    let len = p[0] as usize;
                    self.name = String::from_utf8_lossy(&p[1..1 + len]).into_owned();
                    ok(true)
                }
            }
            Opcode::FactoryReset => {
                self.name = DEFAULT_NAME.to_string();
                self.clock = 0;
                self.pins = [0; 10];
                ok(true)
            }
            Opcode::SpdReadPage => self.read(p[0], u16::from_be_bytes([p[1], p[2]]) as usize, p[3] as usize),
            Opcode::SpdWriteByte => {
                let wire = u16::from_be_bytes([p[1], p[2]]) as usize;
                if let Some((pmic_address, registers)) = self.pmic.as_mut()
                    && *pmic_address == p[0]
                {
                    registers[wire] = p[3];
                    return ok(true);
                }
                let offset = self.physical(wire);
                if p[0] != self.address || offset >= self.size || !self.writable(offset) {
                    return ok(false);
                }
                self.eeprom[offset] = p[3];
                self.byte_writes.push(offset);
                ok(true)
            }
            Opcode::SpdWritePage => {
                let offset = self.physical(u16::from_be_bytes([p[1], p[2]]) as usize);
                let len = p[3] as usize;
                let data = &p[4..4 + len];
                if self.failed_page_writes > 0 {
                    self.failed_page_writes -= 1;
                    return ok(false);
                }
                if p[0] != self.address
                    || offset + len > self.size
                    || !(offset..offset + len).all(|o| self.writable(o))
                {
                    return ok(false);
                }
                self.eeprom[offset..offset + len].copy_from_slice(data);
                self.page_writes.push((offset, len));
                ok(true)
            }
            Opcode::SpdWriteTest => ok(p[0] == self.address && !self.pswp),
            Opcode::Ddr4Detect => ok(p[0] == self.address && self.kind == ModuleType::Ddr4),
            Opcode::Ddr5Detect => {
                if !self.ddr5_detect_supported {
                    return vec![UNKNOWN_MARKER];
                }
                ok(p[0] == self.address && self.kind == ModuleType::Ddr5)
            }
            Opcode::Spd5HubReg => {
                let register = p[1];
                if p[2] == GET {
                    let value = match register {
                        MR11_PAGE_SELECT => self.page,
                        MR12_RSWP_LOW => self.rswp as u8,
                        MR13_RSWP_HIGH => (self.rswp >> 8) as u8,
                        _ => 0,
                    };
                    return encode_response(&[value]);
                }
                let value = p[3];
                match register {
                    MR11_PAGE_SELECT => {
                        self.page = value;
                        self.page_log.push(value);
                    }
                    MR12_RSWP_LOW => self.rswp = (self.rswp & 0xFF00) | value as u16,
                    MR13_RSWP_HIGH => self.rswp = (self.rswp & 0x00FF) | ((value as u16) << 8),
                    _ => return ok(false),
                }
                ok(true)
            }
            Opcode::SpdSize => {
                let code = match (p[0] == self.address, self.size) {
                    (false, _) => 0,
                    (true, 256) => 1,
                    (true, 512) => 2,
                    (true, 1024) => 3,
                    _ => 0,
                };
                encode_response(&[code])
            }
            Opcode::ScanBus => encode_response(&[1 << (self.address - SPD_ADDRESS_FIRST)]),
            Opcode::BusClock => {
                if p[0] == GET {
                    encode_response(&[self.clock])
                } else {
                    self.clock = p[0];
                    ok(true)
                }
            }
            Opcode::ProbeAddress => {
                let pmic = self.pmic.as_ref().is_some_and(|(a, _)| *a == p[0]);
                ok(p[0] == self.address || pmic)
            }
            Opcode::PinControl => {
                let pin = p[0] as usize;
                if p[1] == GET {
                    encode_response(&[self.pins[pin]])
                } else {
                    self.pins[pin] = p[1];
                    ok(true)
                }
            }
            Opcode::PinReset => {
                self.pins = [0; 10];
                ok(true)
            }
            Opcode::Rswp => {
                let block = p[0];
                match p[1] {
                    GET => ok(self.rswp & (1 << block) != 0),
                    DISABLE => {
                        if !self.rswp_supported {
                            return ok(false);
                        }
                        self.rswp = 0;
                        ok(true)
                    }
                    _ => {
                        if !self.rswp_supported {
                            return ok(false);
                        }
                        self.rswp |= 1 << block;
                        ok(true)
                    }
                }
            }
            Opcode::Pswp => {
                if p[1] == GET {
                    ok(self.pswp)
                } else {
                    self.pswp = true;
                    ok(true)
                }
            }
            Opcode::RswpReport => {
                let bits = if self.rswp_supported {
                    RSWP_SUPPORT_DDR3 | RSWP_SUPPORT_DDR4 | RSWP_SUPPORT_DDR5
                } else {
                    0
                };
                encode_response(&[bits])
            }
            Opcode::Eeprom => encode_response(&[self.settings[p[1] as usize]]),
        }
    }

    fn read(&mut self, address: u8, wire: usize, len: usize) -> Vec<u8> {
        if let Some((pmic_address, registers)) = self.pmic.as_ref()
            && *pmic_address == address
        {
            return encode_response(&registers[wire..wire + len]);
        }
        if address != self.address {
            return encode_response(&[0]);
        }

        let offset = self.physical(wire);
        if self.silent_reads > 0 {
            self.silent_reads -= 1;
            return Vec::new();
        }
        if let Some((at, remaining)) = self.fail_read_at.as_mut()
            && *at == offset
            && *remaining > 0
        {
            *remaining -= 1;
            return Vec::new();
        }
        if offset + len > self.size {
            return encode_response(&[0]);
        }

        let payload = &self.eeprom[offset..offset + len];
        if self.corrupt_reads > 0 {
            self.corrupt_reads -= 1;
            let mut frame = encode_response(payload);
            frame[2] ^= 0x10;
            return frame;
        }
        encode_response(payload)
    }
}

/// Handle on the simulated firmware's state.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new(kind: ModuleType, size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(kind, size))),
        }
    }

    pub fn ddr3() -> Self {
        Self::new(ModuleType::Ddr3OrOther, 256)
    }

    pub fn ddr4() -> Self {
        Self::new(ModuleType::Ddr4, 512)
    }

    pub fn ddr5() -> Self {
        Self::new(ModuleType::Ddr5, 1024)
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn transport(&self) -> MockTransport {
        let state = self.state.clone();
        MockTransport::with_responder(move |command| state.lock().unwrap().respond(command))
    }

    pub fn connect(&self) -> Connected {
        let mock = self.transport();
        let observer = Arc::new(RecordingObserver::new());
        let programmer =
            Programmer::connect(mock.clone(), ProgrammerConfig::for_testing(), observer.clone())
                .unwrap();
        mock.clear_writes();
        Connected {
            programmer,
            mock,
            observer,
        }
    }
}

pub struct Connected {
    pub programmer: Programmer<MockTransport, RecordingObserver>,
    pub mock: MockTransport,
    pub observer: Arc<RecordingObserver>,
}

impl Connected {
    /// Captured writes carrying `opcode`.
    pub fn commands(&self, opcode: Opcode) -> Vec<Vec<u8>> {
        self.mock
            .get_writes()
            .into_iter()
            .filter(|w| w.first() == Some(&opcode.as_byte()))
            .collect()
    }
}

/// Wraps a transport and holds back the reply to the `nth` (zero based)
/// `opcode` command until `delay` after it was sent.
pub struct LateReply {
    inner: MockTransport,
    opcode: Opcode,
    nth: usize,
    delay: Duration,
    seen: usize,
    held: Option<(Instant, Vec<u8>)>,
}

impl LateReply {
    pub fn new(inner: MockTransport, opcode: Opcode, nth: usize, delay: Duration) -> Self {
        Self {
            inner,
            opcode,
            nth,
            delay,
            seen: 0,
            held: None,
        }
    }

    fn due(&self) -> Option<Instant> {
        self.held.as_ref().map(|(due, _)| *due)
    }

    fn release_due(&mut self) {
        if self.due().is_some_and(|due| Instant::now() >= due)
            && let Some((_, bytes)) = self.held.take()
        {
            self.inner.push_rx(&bytes);
        }
    }
}

impl SerialTransport for LateReply {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.release_due();
        self.inner.write(data)?;
        if data.first() == Some(&self.opcode.as_byte()) {
            if self.seen == self.nth {
                let mut bytes = Vec::new();
                while self.inner.pending_rx() > 0 {
                    bytes.push(self.inner.read_byte(Duration::ZERO)?);
                }
                self.held = Some((Instant::now() + self.delay, bytes));
            }
            self.seen += 1;
        }
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError> {
        self.release_due();
        if self.inner.pending_rx() == 0
            && let Some(due) = self.due()
        {
            let wait = due.saturating_duration_since(Instant::now()).min(timeout);
            thread::sleep(wait);
            self.release_due();
        }
        self.inner.read_byte(timeout)
    }

    fn discard_buffers(&mut self) -> Result<(), TransportError> {
        self.release_due();
        self.inner.discard_buffers()
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn port_name(&self) -> &str {
        self.inner.port_name()
    }
}
