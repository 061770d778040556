//! Modbus PDU construction and parsing.
//!
//! Fixed-size stack buffer, no heap allocation on the request path.

use crate::error::{ModbusError, ModbusResult};

/// Maximum PDU length per the Modbus specification
const MAX_PDU_SIZE: usize = 253;

/// Function code: read coils (0x01)
pub const FC_READ_COILS: u8 = 0x01;
/// Function code: write single coil (0x05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Modbus PDU backed by a fixed stack buffer
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Append a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a big-endian u16
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    /// View the PDU bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// PDU length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the PDU is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Whether this PDU is an exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().map(|fc| fc & 0x80 != 0).unwrap_or(false)
    }

    /// Exception code from an exception response
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a read-coils request PDU (function 0x01)
pub fn build_read_coils(start_address: u16, quantity: u16) -> ModbusResult<ModbusPdu> {
    if quantity == 0 || quantity > 2000 {
        return Err(ModbusError::invalid_request(format!(
            "Coil quantity out of range: {}",
            quantity
        )));
    }
    let mut pdu = ModbusPdu::new();
    pdu.push(FC_READ_COILS)?;
    pdu.push_u16(start_address)?;
    pdu.push_u16(quantity)?;
    Ok(pdu)
}

/// Build a write-single-coil request PDU (function 0x05)
pub fn build_write_single_coil(address: u16, value: bool) -> ModbusResult<ModbusPdu> {
    let coil_value: u16 = if value { 0xFF00 } else { 0x0000 };
    let mut pdu = ModbusPdu::new();
    pdu.push(FC_WRITE_SINGLE_COIL)?;
    pdu.push_u16(address)?;
    pdu.push_u16(coil_value)?;
    Ok(pdu)
}

/// Parse a read-coils response PDU into `expected_count` booleans.
///
/// The response carries a byte count followed by packed bits, LSB first.
pub fn parse_coil_response(pdu: &ModbusPdu, expected_count: u16) -> ModbusResult<Vec<bool>> {
    if let Some(code) = pdu.exception_code() {
        return Err(ModbusError::Exception { code });
    }

    let data = pdu.as_slice();
    if data.len() < 2 || data[0] != FC_READ_COILS {
        return Err(ModbusError::protocol("Malformed read-coils response"));
    }

    let byte_count = data[1] as usize;
    let packed = &data[2..];
    if packed.len() < byte_count || byte_count * 8 < expected_count as usize {
        return Err(ModbusError::protocol(format!(
            "Read-coils response too short: {} data bytes for {} coils",
            packed.len(),
            expected_count
        )));
    }

    let mut coils = Vec::with_capacity(expected_count as usize);
    for &byte in packed.iter().take(byte_count) {
        for bit in 0..8 {
            if coils.len() >= expected_count as usize {
                break;
            }
            coils.push((byte >> bit) & 1 != 0);
        }
    }
    coils.truncate(expected_count as usize);
    Ok(coils)
}

/// Validate a write-single-coil response PDU (the device echoes the request)
pub fn parse_write_coil_response(pdu: &ModbusPdu, address: u16, value: bool) -> ModbusResult<()> {
    if let Some(code) = pdu.exception_code() {
        return Err(ModbusError::Exception { code });
    }

    let data = pdu.as_slice();
    if data.len() < 5 || data[0] != FC_WRITE_SINGLE_COIL {
        return Err(ModbusError::protocol("Malformed write-coil response"));
    }

    let echoed_address = u16::from_be_bytes([data[1], data[2]]);
    let echoed_value = u16::from_be_bytes([data[3], data[4]]);
    let expected_value: u16 = if value { 0xFF00 } else { 0x0000 };
    if echoed_address != address || echoed_value != expected_value {
        return Err(ModbusError::protocol(format!(
            "Write-coil echo mismatch: addr {} value 0x{:04X}",
            echoed_address, echoed_value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_coils_request_layout() {
        let pdu = build_read_coils(0x0010, 8).unwrap();
        assert_eq!(pdu.as_slice(), &[0x01, 0x00, 0x10, 0x00, 0x08]);
    }

    #[test]
    fn write_coil_request_layout() {
        let on = build_write_single_coil(0x0013, true).unwrap();
        assert_eq!(on.as_slice(), &[0x05, 0x00, 0x13, 0xFF, 0x00]);

        let off = build_write_single_coil(0x0013, false).unwrap();
        assert_eq!(off.as_slice(), &[0x05, 0x00, 0x13, 0x00, 0x00]);
    }

    #[test]
    fn coil_quantity_validated() {
        assert!(build_read_coils(0, 0).is_err());
        assert!(build_read_coils(0, 2001).is_err());
    }

    #[test]
    fn parse_coil_response_unpacks_bits() {
        // 0b0000_0101 -> coils 0 and 2 on
        let pdu = ModbusPdu::from_slice(&[0x01, 0x01, 0b0000_0101]).unwrap();
        let coils = parse_coil_response(&pdu, 8).unwrap();
        assert_eq!(
            coils,
            vec![true, false, true, false, false, false, false, false]
        );
    }

    #[test]
    fn parse_coil_response_rejects_short_payload() {
        let pdu = ModbusPdu::from_slice(&[0x01, 0x02, 0xFF]).unwrap();
        assert!(parse_coil_response(&pdu, 16).is_err());
    }

    #[test]
    fn exception_response_detected() {
        let pdu = ModbusPdu::from_slice(&[0x81, 0x02]).unwrap();
        assert!(pdu.is_exception());
        match parse_coil_response(&pdu, 8) {
            Err(ModbusError::Exception { code }) => assert_eq!(code, 0x02),
            other => panic!("expected exception, got {:?}", other),
        }
    }

    #[test]
    fn write_coil_echo_validated() {
        let pdu = ModbusPdu::from_slice(&[0x05, 0x00, 0x13, 0xFF, 0x00]).unwrap();
        assert!(parse_write_coil_response(&pdu, 0x0013, true).is_ok());
        assert!(parse_write_coil_response(&pdu, 0x0013, false).is_err());
        assert!(parse_write_coil_response(&pdu, 0x0014, true).is_err());
    }
}
