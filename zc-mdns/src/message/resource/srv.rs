use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::*;
use shared::error::*;

// An SrvResource is a service location record: priority, weight, port and
// the target host name.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct SrvResource {
    pub(crate) priority: u16,
    pub(crate) weight: u16,
    pub(crate) port: u16,
    pub(crate) target: Name,
}

impl fmt::Display for SrvResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message.SrvResource{{Priority: {}, Weight: {}, Port: {}, Target: {}}}",
            self.priority, self.weight, self.port, self.target
        )
    }
}

impl ResourceBody for SrvResource {
    fn real_type(&self) -> DnsType {
        DnsType::Srv
    }

    fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        let msg = pack_uint16(msg, self.priority);
        let msg = pack_uint16(msg, self.weight);
        let msg = pack_uint16(msg, self.port);
        // RFC 2782 forbids compressing the target name.
        self.target.pack(msg, &mut None, compression_off)
    }

    fn unpack(&mut self, msg: &[u8], off: usize, _length: usize) -> Result<usize> {
        let (priority, off) = unpack_uint16(msg, off)?;
        self.priority = priority;
        let (weight, off) = unpack_uint16(msg, off)?;
        self.weight = weight;
        let (port, off) = unpack_uint16(msg, off)?;
        self.port = port;
        self.target.unpack(msg, off)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
