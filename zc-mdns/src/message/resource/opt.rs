use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::*;
use shared::error::*;

// A single EDNS(0) option: code plus opaque data.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct DnsOption {
    pub(crate) code: u16,
    pub(crate) data: Vec<u8>,
}

// An OptResource is the EDNS(0) pseudo-record. The interesting parameter,
// the sender's UDP payload size, travels in the record header's class
// field; the body is the option list, which mDNS only logs.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct OptResource {
    pub(crate) options: Vec<DnsOption>,
}

impl fmt::Display for OptResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message.OptResource{{{} options}}", self.options.len())
    }
}

impl ResourceBody for OptResource {
    fn real_type(&self) -> DnsType {
        DnsType::Opt
    }

    fn pack(
        &self,
        mut msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        for option in &self.options {
            msg = pack_uint16(msg, option.code);
            msg = pack_uint16(msg, option.data.len() as u16);
            msg = pack_bytes(msg, &option.data);
        }
        Ok(msg)
    }

    fn unpack(&mut self, msg: &[u8], mut off: usize, length: usize) -> Result<usize> {
        let end = off + length;
        if end > msg.len() {
            return Err(Error::ErrCalcLen);
        }
        while off < end {
            let (code, new_off) = unpack_uint16(msg, off)?;
            let (data_len, new_off) = unpack_uint16(msg, new_off)?;
            let data_end = new_off + data_len as usize;
            if data_end > end {
                return Err(Error::ErrCalcLen);
            }
            self.options.push(DnsOption {
                code,
                data: msg[new_off..data_end].to_vec(),
            });
            off = data_end;
        }
        Ok(end)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
