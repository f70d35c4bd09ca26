//! OP_USB_NOTICE payload: asynchronous notifications from the device.

use byteorder::{ByteOrder, LittleEndian};

use super::PayloadError;
use crate::protocol::header::Header;

/// A decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Notification code, from `hdata`.
    pub code: u16,
    /// Optional code-specific word (first payload word, when present).
    pub extra_data: Option<u32>,
    /// Optional NUL-terminated message text following the extra word.
    pub message: Option<String>,
}

impl Notice {
    pub fn decode(header: &Header, data: &[u8]) -> Result<Self, PayloadError> {
        let mut notice = Notice {
            code: header.hdata,
            extra_data: None,
            message: None,
        };
        if !data.is_empty() {
            if data.len() < 4 {
                return Err(PayloadError::TooShort {
                    what: "notice extra data",
                    expected: 4,
                    got: data.len(),
                });
            }
            notice.extra_data = Some(LittleEndian::read_u32(&data[0..4]));
        }
        if data.len() > 4 {
            let raw = &data[4..];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            notice.message = Some(String::from_utf8_lossy(&raw[..end]).into_owned());
        }
        Ok(notice)
    }
}
