//! Typed command wrappers.
//!
//! Each method validates its arguments, sends one command and decodes one
//! reply. Invalid arguments fail before anything is written. Boolean
//! commands return `Ok(false)` when the device answers with anything other
//! than a single `0x01`.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument};

use crate::error::{Result, SpdError};
use crate::events::SpdObserver;
use crate::module::{ClockMode, ModuleInfo, ModuleType, Pin, RswpSupport, size_from_code};
use crate::programmer::Programmer;
use crate::protocol::constants::*;
use crate::protocol::Command;
use crate::transport::SerialTransport;

fn decode_bool(payload: &[u8]) -> bool {
    payload == [SUCCESS]
}

fn single_byte(command: Opcode, payload: Vec<u8>) -> Result<u8> {
    match payload.as_slice() {
        [b] => Ok(*b),
        _ => Err(SpdError::UnexpectedResponse { command, payload }),
    }
}

fn check_spd_address(address: u8) -> Result<()> {
    if is_spd_address(address) {
        Ok(())
    } else {
        Err(SpdError::invalid(format!(
            "SPD address 0x{:02X} outside 0x{:02X}-0x{:02X}",
            address, SPD_ADDRESS_FIRST, SPD_ADDRESS_LAST
        )))
    }
}

fn check_pmic_address(address: u8) -> Result<()> {
    if is_pmic_address(address) {
        Ok(())
    } else {
        Err(SpdError::invalid(format!(
            "PMIC address 0x{:02X} outside 0x{:02X}-0x{:02X}",
            address, PMIC_ADDRESS_FIRST, PMIC_ADDRESS_LAST
        )))
    }
}

fn check_span(offset: usize, len: usize, max_len: usize, space: usize) -> Result<()> {
    if len == 0 || len > max_len {
        return Err(SpdError::invalid(format!(
            "length {} outside 1-{}",
            len, max_len
        )));
    }
    if offset + len > space {
        return Err(SpdError::invalid(format!(
            "offset 0x{:04X} + {} bytes exceeds 0x{:04X}",
            offset, len, space
        )));
    }
    Ok(())
}

fn check_hub_register(register: u8) -> Result<()> {
    if register > HUB_REGISTER_LAST {
        return Err(SpdError::invalid(format!(
            "hub register {} outside 0-{}",
            register, HUB_REGISTER_LAST
        )));
    }
    Ok(())
}

fn check_block(block: u8) -> Result<()> {
    if block > MAX_RSWP_BLOCK {
        return Err(SpdError::invalid(format!(
            "RSWP block {} outside 0-{}",
            block, MAX_RSWP_BLOCK
        )));
    }
    Ok(())
}

impl<T: SerialTransport, O: SpdObserver> Programmer<T, O> {
    // ------------------------------------------------------------------
    // Device
    // ------------------------------------------------------------------

    /// True when the device answers READY.
    pub fn ping(&self) -> Result<bool> {
        let payload = self.exchange(Command::bare(Opcode::Ping))?;
        Ok(payload == [READY_MARKER])
    }

    /// Firmware version, e.g. `20231021`.
    pub fn version(&self) -> Result<u32> {
        let payload = self.exchange(Command::bare(Opcode::Version))?;
        if payload.len() != 4 {
            return Err(SpdError::UnexpectedResponse {
                command: Opcode::Version,
                payload,
            });
        }
        Ok(LittleEndian::read_u32(&payload))
    }

    /// Device name, cut at the first NUL.
    pub fn name(&self) -> Result<String> {
        let payload = self.exchange(Command::new(Opcode::Name, &[GET]))?;
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        Ok(String::from_utf8_lossy(&payload[..end]).into_owned())
    }

    pub fn set_name(&self, name: &str) -> Result<bool> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LENGTH {
            return Err(SpdError::invalid(format!(
                "name must be 1-{} characters",
                MAX_NAME_LENGTH
            )));
        }
        if !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(SpdError::invalid("name must be printable ASCII"));
        }
        let mut params = Vec::with_capacity(bytes.len() + 1);
        params.push(bytes.len() as u8);
        params.extend_from_slice(bytes);
        let payload = self.exchange(Command::new(Opcode::Name, &params))?;
        Ok(decode_bool(&payload))
    }

    /// Restore firmware defaults (name, clock mode, pins).
    #[instrument(skip(self))]
    pub fn factory_reset(&self) -> Result<bool> {
        let payload = self.exchange(Command::bare(Opcode::FactoryReset))?;
        Ok(decode_bool(&payload))
    }

    /// Internal settings byte at `offset`.
    pub fn read_setting(&self, offset: u8) -> Result<u8> {
        let payload = self.exchange(Command::new(Opcode::Eeprom, &[GET, offset]))?;
        single_byte(Opcode::Eeprom, payload)
    }

    // ------------------------------------------------------------------
    // Bus
    // ------------------------------------------------------------------

    /// SPD addresses that acknowledged.
    pub fn scan_bus(&self) -> Result<Vec<u8>> {
        let payload = self.exchange(Command::bare(Opcode::ScanBus))?;
        let mask = single_byte(Opcode::ScanBus, payload)?;
        let found: Vec<u8> = (0..8)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| SPD_ADDRESS_FIRST + i)
            .collect();
        debug!(mask = %format!("0b{:08b}", mask), count = found.len(), "Bus scan");
        Ok(found)
    }

    /// Whether anything acknowledges `address` (SPD or PMIC range).
    pub fn probe_address(&self, address: u8) -> Result<bool> {
        if !is_spd_address(address) && !is_pmic_address(address) {
            return Err(SpdError::invalid(format!(
                "address 0x{:02X} is neither SPD nor PMIC",
                address
            )));
        }
        let payload = self.exchange(Command::new(Opcode::ProbeAddress, &[address]))?;
        Ok(decode_bool(&payload))
    }

    pub fn clock_mode(&self) -> Result<ClockMode> {
        let payload = self.exchange(Command::new(Opcode::BusClock, &[GET]))?;
        let byte = single_byte(Opcode::BusClock, payload)?;
        ClockMode::from_byte(byte).ok_or(SpdError::UnexpectedResponse {
            command: Opcode::BusClock,
            payload: vec![byte],
        })
    }

    pub fn set_clock_mode(&self, mode: ClockMode) -> Result<bool> {
        let payload = self.exchange(Command::new(Opcode::BusClock, &[mode.as_byte()]))?;
        Ok(decode_bool(&payload))
    }

    // ------------------------------------------------------------------
    // Detection
    // ------------------------------------------------------------------

    pub fn ddr4_detect(&self, address: u8) -> Result<bool> {
        check_spd_address(address)?;
        let payload = self.exchange(Command::new(Opcode::Ddr4Detect, &[address]))?;
        Ok(decode_bool(&payload))
    }

    pub fn ddr5_detect(&self, address: u8) -> Result<bool> {
        check_spd_address(address)?;
        let payload = self.exchange(Command::new(Opcode::Ddr5Detect, &[address]))?;
        Ok(decode_bool(&payload))
    }

    /// EEPROM size in bytes as reported by the firmware.
    pub fn spd_size(&self, address: u8) -> Result<usize> {
        check_spd_address(address)?;
        let payload = self.exchange(Command::new(Opcode::SpdSize, &[address]))?;
        let code = single_byte(Opcode::SpdSize, payload)?;
        size_from_code(code).ok_or(SpdError::UnexpectedResponse {
            command: Opcode::SpdSize,
            payload: vec![code],
        })
    }

    /// Whether the module accepts writes.
    pub fn test_write(&self, address: u8) -> Result<bool> {
        check_spd_address(address)?;
        let payload = self.exchange(Command::new(Opcode::SpdWriteTest, &[address]))?;
        Ok(decode_bool(&payload))
    }

    /// Work out generation and size of the module at `address`.
    #[instrument(skip(self), fields(address = %format!("0x{:02X}", address)))]
    pub fn detect_module(&self, address: u8) -> Result<ModuleInfo> {
        check_spd_address(address)?;

        if !self.probe_address(address)? {
            return Ok(ModuleInfo::not_detected(address));
        }

        // Older firmware rejects DDR5 detection outright.
        let is_ddr5 = match self.ddr5_detect(address) {
            Ok(found) => found,
            Err(SpdError::UnsupportedHardware { .. }) => false,
            Err(e) => return Err(e),
        };
        let info = if is_ddr5 {
            ModuleInfo::new(address, ModuleType::Ddr5, DDR5_SPD_SIZE)
        } else if self.ddr4_detect(address)? {
            ModuleInfo::new(address, ModuleType::Ddr4, DDR4_SPD_SIZE)
        } else {
            let size = match self.spd_size(address)? {
                0 => DDR3_SPD_SIZE,
                size => size,
            };
            ModuleInfo::new(address, ModuleType::Ddr3OrOther, size)
        };

        debug!(module = %info, "Module detected");
        Ok(info)
    }

    // ------------------------------------------------------------------
    // SPD access
    // ------------------------------------------------------------------

    /// Read up to 64 bytes starting at `offset`.
    ///
    /// SPD access waits for any whole-image transfer to finish, since on
    /// DDR5 the offset is relative to the selected page.
    pub fn read_spd(&self, address: u8, offset: u16, len: usize) -> Result<Vec<u8>> {
        check_spd_address(address)?;
        check_span(offset as usize, len, MAX_READ_LENGTH, MAX_SPD_SIZE)?;
        let _transfer = self.transfer_lock();
        self.read_chunk(address, offset, len)
    }

    pub fn read_spd_byte(&self, address: u8, offset: u16) -> Result<u8> {
        Ok(self.read_spd(address, offset, 1)?[0])
    }

    pub fn write_spd_byte(&self, address: u8, offset: u16, value: u8) -> Result<bool> {
        check_spd_address(address)?;
        check_span(offset as usize, 1, 1, MAX_SPD_SIZE)?;
        let _transfer = self.transfer_lock();
        self.write_byte_raw(address, offset, value)
    }

    /// Write up to 16 bytes in one page write.
    pub fn write_spd_page(&self, address: u8, offset: u16, data: &[u8]) -> Result<bool> {
        check_spd_address(address)?;
        check_span(offset as usize, data.len(), MAX_WRITE_LENGTH, MAX_SPD_SIZE)?;
        let _transfer = self.transfer_lock();
        self.write_page_raw(address, offset, data)
    }

    /// SPD_READ_PAGE without range checks. A reply shorter or longer than
    /// `len` (the firmware answers a failed read with a lone zero) is a
    /// device failure.
    pub(crate) fn read_chunk(&self, address: u8, wire_offset: u16, len: usize) -> Result<Vec<u8>> {
        let [hi, lo] = wire_offset.to_be_bytes();
        let payload = self.exchange(Command::new(
            Opcode::SpdReadPage,
            &[address, hi, lo, len as u8],
        ))?;
        if payload.len() != len {
            return Err(SpdError::failure(
                Opcode::SpdReadPage,
                format!(
                    "read of {} bytes at 0x{:02X}:0x{:04X} returned {} bytes",
                    len,
                    address,
                    wire_offset,
                    payload.len()
                ),
            ));
        }
        Ok(payload)
    }

    pub(crate) fn write_byte_raw(&self, address: u8, wire_offset: u16, value: u8) -> Result<bool> {
        let [hi, lo] = wire_offset.to_be_bytes();
        let payload = self.exchange(Command::new(
            Opcode::SpdWriteByte,
            &[address, hi, lo, value],
        ))?;
        Ok(decode_bool(&payload))
    }

    pub(crate) fn write_page_raw(&self, address: u8, wire_offset: u16, data: &[u8]) -> Result<bool> {
        let [hi, lo] = wire_offset.to_be_bytes();
        let mut params = Vec::with_capacity(4 + data.len());
        params.extend_from_slice(&[address, hi, lo, data.len() as u8]);
        params.extend_from_slice(data);
        let payload = self.exchange(Command::new(Opcode::SpdWritePage, &params))?;
        Ok(decode_bool(&payload))
    }

    // ------------------------------------------------------------------
    // PMIC access
    // ------------------------------------------------------------------

    pub fn read_pmic(&self, address: u8, register: u8, len: usize) -> Result<Vec<u8>> {
        check_pmic_address(address)?;
        check_span(register as usize, len, MAX_READ_LENGTH, PMIC_REGISTER_SPACE)?;
        self.read_chunk(address, register as u16, len)
    }

    pub fn write_pmic(&self, address: u8, register: u8, value: u8) -> Result<bool> {
        check_pmic_address(address)?;
        self.write_byte_raw(address, register as u16, value)
    }

    // ------------------------------------------------------------------
    // SPD5 hub registers
    // ------------------------------------------------------------------

    pub fn read_hub_register(&self, address: u8, register: u8) -> Result<u8> {
        check_spd_address(address)?;
        check_hub_register(register)?;
        let payload = self.exchange(Command::new(
            Opcode::Spd5HubReg,
            &[address, register, GET],
        ))?;
        single_byte(Opcode::Spd5HubReg, payload)
    }

    /// Write MR11, MR12 or MR13. Every other register is refused locally.
    pub fn write_hub_register(&self, address: u8, register: u8, value: u8) -> Result<bool> {
        check_spd_address(address)?;
        check_hub_register(register)?;
        if !WRITABLE_HUB_REGISTERS.contains(&register) {
            return Err(SpdError::invalid(format!(
                "hub register MR{} is read-only",
                register
            )));
        }
        let _transfer = self.transfer_lock();
        self.write_hub_raw(address, register, value)
    }

    pub(crate) fn write_hub_raw(&self, address: u8, register: u8, value: u8) -> Result<bool> {
        let payload = self.exchange(Command::new(
            Opcode::Spd5HubReg,
            &[address, register, ENABLE, value],
        ))?;
        Ok(decode_bool(&payload))
    }

    // ------------------------------------------------------------------
    // Write protection
    // ------------------------------------------------------------------

    pub fn set_rswp(&self, block: u8) -> Result<bool> {
        check_block(block)?;
        let payload = self.exchange(Command::new(Opcode::Rswp, &[block, ENABLE]))?;
        Ok(decode_bool(&payload))
    }

    pub fn get_rswp(&self, block: u8) -> Result<bool> {
        check_block(block)?;
        let payload = self.exchange(Command::new(Opcode::Rswp, &[block, GET]))?;
        Ok(decode_bool(&payload))
    }

    /// Clear reversible protection on all blocks.
    pub fn clear_rswp(&self) -> Result<bool> {
        let payload = self.exchange(Command::new(Opcode::Rswp, &[0, DISABLE]))?;
        Ok(decode_bool(&payload))
    }

    pub fn rswp_support(&self) -> Result<RswpSupport> {
        let payload = self.exchange(Command::bare(Opcode::RswpReport))?;
        Ok(RswpSupport::from_bits(single_byte(Opcode::RswpReport, payload)?))
    }

    /// Permanently protect the module. This cannot be undone.
    #[instrument(skip(self), fields(address = %format!("0x{:02X}", address)))]
    pub fn set_pswp(&self, address: u8) -> Result<bool> {
        check_spd_address(address)?;
        let payload = self.exchange(Command::new(Opcode::Pswp, &[address, ENABLE]))?;
        Ok(decode_bool(&payload))
    }

    pub fn get_pswp(&self, address: u8) -> Result<bool> {
        check_spd_address(address)?;
        let payload = self.exchange(Command::new(Opcode::Pswp, &[address, GET]))?;
        Ok(decode_bool(&payload))
    }

    // ------------------------------------------------------------------
    // Pins
    // ------------------------------------------------------------------

    pub fn get_pin(&self, pin: Pin) -> Result<bool> {
        let payload = self.exchange(Command::new(Opcode::PinControl, &[pin.as_byte(), GET]))?;
        Ok(single_byte(Opcode::PinControl, payload)? == ENABLE)
    }

    pub fn set_pin(&self, pin: Pin, state: bool) -> Result<bool> {
        let value = if state { ENABLE } else { DISABLE };
        let payload = self.exchange(Command::new(Opcode::PinControl, &[pin.as_byte(), value]))?;
        Ok(decode_bool(&payload))
    }

    /// Return all control pins to their defaults.
    pub fn reset_pins(&self) -> Result<bool> {
        let payload = self.exchange(Command::bare(Opcode::PinReset))?;
        Ok(decode_bool(&payload))
    }
}
