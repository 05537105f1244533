//! pkt-line framing
//!
//! Every line on the wire is prefixed with its total length as four hex
//! digits. `0000` (flush), `0001` (delimiter) and `0002` (response end)
//! carry no payload.

use crate::{Error, Result, Service};
use bytes::{BufMut, Bytes, BytesMut};

pub const FLUSH_PKT: &[u8] = b"0000";

/// Largest frame allowed by git, length prefix included
pub const MAX_PKT_LINE: usize = 65520;

/// Preamble git clients expect in front of a v0/v1 ref advertisement:
/// `# service=<rpc>\n` followed by a flush.
pub fn service_announcement(service: Service) -> Bytes {
    let line = format!("# service={}\n", service.as_str());
    let mut buf = BytesMut::with_capacity(line.len() + 8);
    buf.put_slice(format!("{:04x}", line.len() + 4).as_bytes());
    buf.put_slice(line.as_bytes());
    buf.put_slice(FLUSH_PKT);
    buf.freeze()
}

/// True when the `Git-Protocol` header asks for protocol v2.
///
/// The header is a colon separated list of `key=value` parameters.
pub fn is_protocol_v2(git_protocol: Option<&str>) -> bool {
    git_protocol
        .map(|p| p.split(':').any(|param| param.trim() == "version=2"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine<'a> {
    Flush,
    Delimiter,
    ResponseEnd,
    Data(&'a [u8]),
}

/// Zero-copy reader over a buffered pkt-line stream
pub struct PktLineReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktLineReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn next_line(&mut self) -> Result<Option<PktLine<'a>>> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        if rest.len() < 4 {
            return Err(Error::ProtocolError("truncated pkt-line length".into()));
        }

        let len_hex = std::str::from_utf8(&rest[..4])
            .map_err(|_| Error::ProtocolError("invalid pkt-line length".into()))?;
        let len = usize::from_str_radix(len_hex, 16)
            .map_err(|_| Error::ProtocolError(format!("invalid pkt-line length {:?}", len_hex)))?;

        let line = match len {
            0 => PktLine::Flush,
            1 => PktLine::Delimiter,
            2 => PktLine::ResponseEnd,
            3 => return Err(Error::ProtocolError("pkt-line length too small".into())),
            n if n > MAX_PKT_LINE => {
                return Err(Error::ProtocolError("pkt-line too large".into()))
            }
            n if n > rest.len() => {
                return Err(Error::ProtocolError("pkt-line truncated".into()))
            }
            n => PktLine::Data(&rest[4..n]),
        };

        self.pos += match line {
            PktLine::Data(payload) => payload.len() + 4,
            _ => 4,
        };
        Ok(Some(line))
    }

    /// Text payloads up to (not including) the next flush
    pub fn lines_until_flush(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line()? {
            match line {
                PktLine::Flush | PktLine::ResponseEnd => break,
                PktLine::Delimiter => continue,
                PktLine::Data(data) => {
                    let text = String::from_utf8_lossy(data);
                    lines.push(text.trim_end_matches('\n').to_string());
                }
            }
        }
        Ok(lines)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}
