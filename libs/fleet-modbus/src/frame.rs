//! Modbus TCP (MBAP) framing.

use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// MBAP header length: transaction id + protocol id + length + unit id
pub const MBAP_HEADER_LEN: usize = 7;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier, echoed by the device
    pub transaction_id: u16,
    /// Protocol identifier, always 0 for Modbus
    pub protocol_id: u16,
    /// Byte count of unit id + PDU
    pub length: u16,
    /// Unit identifier (slave address)
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse a header from the first [`MBAP_HEADER_LEN`] bytes of a frame
    pub fn parse(data: &[u8]) -> ModbusResult<Self> {
        if data.len() < MBAP_HEADER_LEN {
            return Err(ModbusError::protocol("MBAP header too short"));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }

    /// Number of bytes that follow the 7-byte header (the PDU)
    pub fn pdu_len(&self) -> ModbusResult<usize> {
        if self.length == 0 {
            return Err(ModbusError::protocol("MBAP length field is zero"));
        }
        Ok(self.length as usize - 1)
    }
}

/// Build a complete Modbus TCP frame: MBAP header followed by the PDU
pub fn build_frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16; // unit id + PDU
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu.as_slice());
    frame
}

/// Validate a response header against the request it answers
pub fn check_response_header(
    header: &MbapHeader,
    transaction_id: u16,
    unit_id: u8,
) -> ModbusResult<()> {
    if header.protocol_id != 0 {
        return Err(ModbusError::protocol(format!(
            "Unexpected protocol id {}",
            header.protocol_id
        )));
    }
    if header.transaction_id != transaction_id {
        return Err(ModbusError::protocol(format!(
            "Transaction id mismatch: sent {}, got {}",
            transaction_id, header.transaction_id
        )));
    }
    if header.unit_id != unit_id {
        return Err(ModbusError::protocol(format!(
            "Unit id mismatch: sent {}, got {}",
            unit_id, header.unit_id
        )));
    }
    Ok(())
}
