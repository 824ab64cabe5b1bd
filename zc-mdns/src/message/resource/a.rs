use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::*;
use shared::error::*;

// An AResource is an IPv4 address record.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct AResource {
    pub(crate) a: [u8; 4],
}

impl fmt::Display for AResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message.AResource{{A: {}.{}.{}.{}}}",
            self.a[0], self.a[1], self.a[2], self.a[3]
        )
    }
}

impl ResourceBody for AResource {
    fn real_type(&self) -> DnsType {
        DnsType::A
    }

    fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        Ok(pack_bytes(msg, &self.a))
    }

    fn unpack(&mut self, msg: &[u8], off: usize, _length: usize) -> Result<usize> {
        unpack_bytes(msg, off, &mut self.a)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
