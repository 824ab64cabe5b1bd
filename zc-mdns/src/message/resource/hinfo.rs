use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::*;
use shared::error::*;

// A HinfoResource describes the host: a single length-prefixed character
// string holding "<cpu> <os>", split on the first space when decoding.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct HinfoResource {
    pub(crate) cpu: String,
    pub(crate) os: String,
}

impl fmt::Display for HinfoResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message.HinfoResource{{CPU: {}, OS: {}}}",
            self.cpu, self.os
        )
    }
}

impl ResourceBody for HinfoResource {
    fn real_type(&self) -> DnsType {
        DnsType::Hinfo
    }

    fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        let info = if self.os.is_empty() {
            self.cpu.clone()
        } else {
            format!("{} {}", self.cpu, self.os)
        };
        pack_str(msg, &info)
    }

    fn unpack(&mut self, msg: &[u8], off: usize, _length: usize) -> Result<usize> {
        let (info, off) = unpack_str(msg, off)?;
        match info.split_once(' ') {
            Some((cpu, os)) => {
                self.cpu = cpu.trim().to_owned();
                self.os = os.trim().to_owned();
            }
            None => {
                self.cpu = info.trim().to_owned();
                self.os = String::new();
            }
        }
        Ok(off)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
