use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::*;
use shared::error::*;

// A TxtResource carries the raw TXT record data. DNS-SD layers its
// length-prefixed key=value pairs on top; the codec does not interpret
// them.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct TxtResource {
    pub(crate) txt: Vec<u8>,
}

impl fmt::Display for TxtResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message.TxtResource{{TXT: {} bytes}}", self.txt.len())
    }
}

impl ResourceBody for TxtResource {
    fn real_type(&self) -> DnsType {
        DnsType::Txt
    }

    fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        Ok(pack_bytes(msg, &self.txt))
    }

    fn unpack(&mut self, msg: &[u8], off: usize, length: usize) -> Result<usize> {
        let end = off + length;
        if end > msg.len() {
            return Err(Error::ErrCalcLen);
        }
        self.txt = msg[off..end].to_vec();
        Ok(end)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
