//! TraCI wire format
//!
//! Protocol:
//! - Message: [total length u32 BE, includes these 4 bytes][command]...
//! - Command: [len u8][id][content] or, if the command exceeds 255 bytes,
//!   [0x00][len u32 BE][id][content]. The length covers the length field(s)
//!   and the id byte.
//! - String: [len u32 BE][UTF-8 bytes]; string list: [count u32 BE][string]...
//! - Every command is answered by a status command
//!   [len][id][result u8][description string]; get commands additionally
//!   return [len][id + 0x10][variable][object id][type][value].

use anyhow::{anyhow, bail, Context};
use bytes::{Buf, BufMut, Bytes, BytesMut};

// Control commands
pub const CMD_GETVERSION: u8 = 0x00;
pub const CMD_SIMSTEP: u8 = 0x02;
pub const CMD_CLOSE: u8 = 0x7F;

// Variable domains
pub const CMD_GET_VEHICLE_VARIABLE: u8 = 0xa4;
pub const CMD_GET_SIM_VARIABLE: u8 = 0xab;
pub const CMD_GET_PERSON_VARIABLE: u8 = 0xae;
pub const CMD_SET_TL_VARIABLE: u8 = 0xc2;

/// Offset between a get command id and its response id
pub const RESPONSE_OFFSET: u8 = 0x10;

// Variables
pub const VAR_ID_LIST: u8 = 0x00;
pub const VAR_ID_COUNT: u8 = 0x01;
pub const VAR_TYPE: u8 = 0x4f;
pub const VAR_TIME: u8 = 0x66;
pub const VAR_MIN_EXPECTED_VEHICLES: u8 = 0x7d;
pub const TL_PHASE_INDEX: u8 = 0x22;

// Data types
pub const TYPE_INTEGER: u8 = 0x09;
pub const TYPE_DOUBLE: u8 = 0x0B;
pub const TYPE_STRING: u8 = 0x0C;
pub const TYPE_STRINGLIST: u8 = 0x0E;

// Status results
pub const RTYPE_OK: u8 = 0x00;
pub const RTYPE_NOTIMPLEMENTED: u8 = 0x01;
pub const RTYPE_ERR: u8 = 0xFF;

/// Largest message we accept from the simulator
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// A single outgoing command
#[derive(Debug, Clone)]
pub struct Command {
    id: u8,
    content: BytesMut,
}

impl Command {
    pub fn new(id: u8) -> Self {
        Self { id, content: BytesMut::new() }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.content.put_u8(v);
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.content.put_i32(v);
        self
    }

    pub fn f64(mut self, v: f64) -> Self {
        self.content.put_f64(v);
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self.content.put_u32(s.len() as u32);
        self.content.put_slice(s.as_bytes());
        self
    }

    /// Variable retrieval: [variable][object id]
    pub fn get(domain: u8, variable: u8, object_id: &str) -> Self {
        Self::new(domain).u8(variable).string(object_id)
    }

    /// Integer variable change: [variable][object id][TYPE_INTEGER][value]
    pub fn set_int(domain: u8, variable: u8, object_id: &str, value: i32) -> Self {
        Self::new(domain).u8(variable).string(object_id).u8(TYPE_INTEGER).i32(value)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        let short_len = 1 + 1 + self.content.len();
        if short_len <= u8::MAX as usize {
            buf.put_u8(short_len as u8);
        } else {
            buf.put_u8(0);
            buf.put_u32((1 + 4 + 1 + self.content.len()) as u32);
        }
        buf.put_u8(self.id);
        buf.put_slice(&self.content);
    }
}

/// Frame commands into one message with the u32 total-length header
pub fn encode_message(commands: &[Command]) -> BytesMut {
    let mut body = BytesMut::new();
    for cmd in commands {
        cmd.encode_into(&mut body);
    }
    let mut msg = BytesMut::with_capacity(4 + body.len());
    msg.put_u32((4 + body.len()) as u32);
    msg.put_slice(&body);
    msg
}

/// Cursor over a received message body (without the u32 header)
#[derive(Debug)]
pub struct Reader {
    buf: Bytes,
}

impl Reader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> anyhow::Result<()> {
        if self.buf.remaining() < n {
            bail!("truncated traci response reading {} ({} < {})", what, self.buf.remaining(), n);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i32(&mut self) -> anyhow::Result<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    pub fn read_f64(&mut self) -> anyhow::Result<f64> {
        self.need(8, "f64")?;
        Ok(self.buf.get_f64())
    }

    pub fn read_string(&mut self) -> anyhow::Result<String> {
        let len = self.read_u32()? as usize;
        self.need(len, "string")?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).context("traci string is not UTF-8")
    }

    pub fn read_string_list(&mut self) -> anyhow::Result<Vec<String>> {
        let count = self.read_u32()? as usize;
        // each entry needs at least its length prefix
        self.need(count.saturating_mul(4), "string list")?;
        (0..count).map(|_| self.read_string()).collect()
    }

    /// Read a command header, returning (command id, content length)
    pub fn read_command_header(&mut self) -> anyhow::Result<(u8, usize)> {
        let short = self.read_u8()?;
        let (len, header) = if short == 0 { (self.read_u32()? as usize, 5) } else { (short as usize, 1) };
        let id = self.read_u8()?;
        let content = len
            .checked_sub(header + 1)
            .ok_or_else(|| anyhow!("invalid traci command length {}", len))?;
        self.need(content, "command content")?;
        Ok((id, content))
    }

    /// Consume the status answer for `expected` and fail on a non-OK result
    pub fn read_status(&mut self, expected: u8) -> anyhow::Result<()> {
        let (id, _) = self.read_command_header()?;
        let result = self.read_u8()?;
        let description = self.read_string()?;
        if id != expected {
            bail!("traci status for 0x{:02X}, expected 0x{:02X}", id, expected);
        }
        match result {
            RTYPE_OK => Ok(()),
            RTYPE_NOTIMPLEMENTED => {
                bail!("traci command 0x{:02X} not implemented: {}", id, description)
            }
            RTYPE_ERR => bail!("traci command 0x{:02X} failed: {}", id, description),
            other => bail!("traci command 0x{:02X} unknown result 0x{:02X}: {}", id, other, description),
        }
    }

    /// Consume a get response header and return the value's type byte
    pub fn read_get_response(&mut self, domain: u8, variable: u8) -> anyhow::Result<u8> {
        let (id, _) = self.read_command_header()?;
        let expected = domain.wrapping_add(RESPONSE_OFFSET);
        if id != expected {
            bail!("traci response 0x{:02X}, expected 0x{:02X}", id, expected);
        }
        let var = self.read_u8()?;
        if var != variable {
            bail!("traci response for variable 0x{:02X}, expected 0x{:02X}", var, variable);
        }
        let _object_id = self.read_string()?;
        self.read_u8()
    }
}

pub fn expect_type(actual: u8, expected: u8) -> anyhow::Result<()> {
    if actual != expected {
        bail!("traci value type 0x{:02X}, expected 0x{:02X}", actual, expected);
    }
    Ok(())
}
