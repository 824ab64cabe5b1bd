use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::*;
use shared::error::*;

// An AaaaResource is an IPv6 address record.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct AaaaResource {
    pub(crate) aaaa: [u8; 16],
}

impl fmt::Display for AaaaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message.AaaaResource{{AAAA: {:?}}}", self.aaaa)
    }
}

impl ResourceBody for AaaaResource {
    fn real_type(&self) -> DnsType {
        DnsType::Aaaa
    }

    fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        Ok(pack_bytes(msg, &self.aaaa))
    }

    fn unpack(&mut self, msg: &[u8], off: usize, _length: usize) -> Result<usize> {
        unpack_bytes(msg, off, &mut self.aaaa)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
