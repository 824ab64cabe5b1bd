use std::collections::HashMap;
use std::fmt;

use shared::error::*;

// Maximum length of a domain name in presentation format.
const NAME_LEN: usize = 255;

// A Name is a DNS domain name in presentation format, e.g. "device.local.".
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Name {
    pub(crate) data: String,
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl Name {
    pub(crate) fn new(data: &str) -> Result<Self> {
        if data.len() > NAME_LEN {
            Err(Error::ErrNameTooLong)
        } else {
            Ok(Name {
                data: data.to_owned(),
            })
        }
    }

    // pack appends the wire format of the name to msg.
    //
    // compression maps previously packed suffixes to their offsets relative
    // to compression_off, so a matching tail can be replaced by a 14-bit
    // back reference. Pass None to disable compression; SRV targets require
    // this.
    pub(crate) fn pack(
        &self,
        mut msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        if self.data.len() > NAME_LEN {
            return Err(Error::ErrNameTooLong);
        }
        if self.data.is_empty() || self.data == "." {
            msg.push(0);
            return Ok(msg);
        }
        let data = self.data.as_bytes();
        if data[data.len() - 1] != b'.' {
            return Err(Error::ErrNonCanonicalName);
        }

        let mut begin = 0;
        for i in 0..data.len() {
            if data[i] != b'.' {
                continue;
            }
            // Reuse an identical suffix that was already packed.
            if let Some(table) = compression
                && let Some(&ptr) = table.get(&self.data[begin..])
                && ptr < 1 << 14
            {
                msg.push(0xC0 | (ptr >> 8) as u8);
                msg.push(ptr as u8);
                return Ok(msg);
            }
            let label_len = i - begin;
            if label_len == 0 {
                return Err(Error::ErrZeroSegLen);
            }
            if label_len > 63 {
                return Err(Error::ErrSegTooLong);
            }
            if let Some(table) = compression
                && msg.len() >= compression_off
            {
                table.insert(self.data[begin..].to_owned(), msg.len() - compression_off);
            }
            msg.push(label_len as u8);
            msg.extend_from_slice(&data[begin..i]);
            begin = i + 1;
        }
        msg.push(0);
        Ok(msg)
    }

    // unpack parses a name out of msg starting at off, following
    // compression pointers.
    //
    // To rule out pointer loops, the lowest offset visited since the start
    // of this name is tracked and every pointer must land strictly before
    // it. After the first pointer, the outer record resumes at the byte
    // following that pointer.
    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let mut curr_off = off;
        let mut new_off = off;
        let mut first = off;
        let mut ptr_seen = false;
        let mut name = String::with_capacity(NAME_LEN);

        loop {
            if curr_off >= msg.len() {
                return Err(Error::ErrBaseLen);
            }
            let c = msg[curr_off];
            match c & 0xC0 {
                0x00 => {
                    // Standard label: length byte followed by UTF-8 data.
                    if c == 0x00 {
                        curr_off += 1;
                        break;
                    }
                    let label_end = curr_off + 1 + c as usize;
                    if label_end > msg.len() {
                        return Err(Error::ErrCalcLen);
                    }
                    name.push_str(&String::from_utf8_lossy(&msg[curr_off + 1..label_end]));
                    name.push('.');
                    curr_off = label_end;
                }
                0xC0 => {
                    // Compression pointer: 14-bit offset into the message.
                    if curr_off + 1 >= msg.len() {
                        return Err(Error::ErrInvalidPtr);
                    }
                    let c1 = msg[curr_off + 1];
                    if !ptr_seen {
                        ptr_seen = true;
                        new_off = curr_off + 2;
                    }
                    let ptr = ((c as usize & 0x3F) << 8) | c1 as usize;
                    if ptr >= first {
                        return Err(Error::MalformedMessage {
                            offset: curr_off,
                            reason: "compression pointer does not point backwards",
                        });
                    }
                    first = ptr;
                    curr_off = ptr;
                }
                _ => {
                    // 0x40 (extended label) and 0x80 are reserved.
                    return Err(Error::ErrReserved);
                }
            }
        }
        if name.is_empty() {
            name.push('.');
        }
        if name.len() > NAME_LEN {
            return Err(Error::ErrNameTooLong);
        }
        self.data = name;
        Ok(if ptr_seen { new_off } else { curr_off })
    }

    // skip advances past a packed name without decoding it.
    pub(crate) fn skip(msg: &[u8], off: usize) -> Result<usize> {
        let mut new_off = off;
        loop {
            if new_off >= msg.len() {
                return Err(Error::ErrBaseLen);
            }
            let c = msg[new_off];
            match c & 0xC0 {
                0x00 => {
                    if c == 0x00 {
                        return Ok(new_off + 1);
                    }
                    new_off += 1 + c as usize;
                    if new_off > msg.len() {
                        return Err(Error::ErrBaseLen);
                    }
                }
                0xC0 => {
                    if new_off + 1 >= msg.len() {
                        return Err(Error::ErrInvalidPtr);
                    }
                    return Ok(new_off + 2);
                }
                _ => return Err(Error::ErrReserved),
            }
        }
    }
}
