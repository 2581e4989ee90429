// Copyright 2025 Laptrace (https://github.com/laptrace)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! RESP2 wire client
//!
//! Minimal blocking client side of the cache store protocol: commands
//! go out as arrays of bulk strings, replies come back as one of the
//! five RESP2 frame kinds. One connection, one request in flight.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use laptrace_core::{LaptraceError, Result};

/// One parsed reply frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    Simple(String),
    Error(String),
    Int(i64),
    /// `None` is the null bulk string.
    Bulk(Option<Vec<u8>>),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn expect_ok(self) -> Result<()> {
        match self {
            Reply::Simple(_) => Ok(()),
            Reply::Error(msg) => Err(server_error(&msg)),
            other => Err(protocol_error(&format!("expected status reply, got {other:?}"))),
        }
    }

    pub fn into_int(self) -> Result<i64> {
        match self {
            Reply::Int(n) => Ok(n),
            Reply::Error(msg) => Err(server_error(&msg)),
            other => Err(protocol_error(&format!("expected integer reply, got {other:?}"))),
        }
    }

    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Array(items) => Ok(items),
            Reply::Error(msg) => Err(server_error(&msg)),
            other => Err(protocol_error(&format!("expected array reply, got {other:?}"))),
        }
    }

    /// Bulk payload as UTF-8, `None` for the null bulk string.
    pub fn into_string(self) -> Result<Option<String>> {
        match self {
            Reply::Bulk(Some(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| protocol_error("bulk reply is not valid UTF-8")),
            Reply::Bulk(None) => Ok(None),
            Reply::Simple(s) => Ok(Some(s)),
            Reply::Error(msg) => Err(server_error(&msg)),
            other => Err(protocol_error(&format!("expected bulk reply, got {other:?}"))),
        }
    }
}

fn io_error(err: std::io::Error) -> LaptraceError {
    LaptraceError::CacheUnavailable(format!("connection failed: {err}"))
}

fn server_error(msg: &str) -> LaptraceError {
    LaptraceError::CacheUnavailable(format!("server error: {msg}"))
}

fn protocol_error(msg: &str) -> LaptraceError {
    LaptraceError::CacheUnavailable(format!("protocol error: {msg}"))
}

/// Blocking connection speaking RESP2.
#[derive(Debug)]
pub(crate) struct RespConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl RespConnection {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let mut last_err = None;
        let addrs = addr
            .to_socket_addrs()
            .map_err(|e| LaptraceError::CacheUnavailable(format!("cannot resolve '{addr}': {e}")))?;
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => return Self::over(stream, timeout),
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => io_error(e),
            None => LaptraceError::CacheUnavailable(format!("'{addr}' resolves to no address")),
        })
    }

    fn over(stream: TcpStream, timeout: Duration) -> Result<Self> {
        stream.set_nodelay(true).map_err(io_error)?;
        stream.set_read_timeout(Some(timeout)).map_err(io_error)?;
        stream.set_write_timeout(Some(timeout)).map_err(io_error)?;
        let writer = stream.try_clone().map_err(io_error)?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// One round-trip: send a command, read its reply.
    pub fn command(&mut self, parts: &[&[u8]]) -> Result<Reply> {
        self.send(parts)?;
        self.read_reply()
    }

    fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        let mut frame = Vec::with_capacity(32);
        frame.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
        for part in parts {
            frame.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
            frame.extend_from_slice(part);
            frame.extend_from_slice(b"\r\n");
        }
        self.writer.write_all(&frame).map_err(io_error)?;
        self.writer.flush().map_err(io_error)
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        self.reader.read_until(b'\n', &mut line).map_err(io_error)?;
        if !line.ends_with(b"\r\n") {
            return Err(protocol_error("truncated line"));
        }
        line.truncate(line.len() - 2);
        String::from_utf8(line).map_err(|_| protocol_error("line is not valid UTF-8"))
    }

    fn read_reply(&mut self) -> Result<Reply> {
        let line = self.read_line()?;
        let (kind, rest) = match line.as_bytes().first() {
            Some(b) => (*b, &line[1..]),
            None => return Err(protocol_error("empty reply")),
        };
        match kind {
            b'+' => Ok(Reply::Simple(rest.to_string())),
            b'-' => Ok(Reply::Error(rest.to_string())),
            b':' => rest
                .parse()
                .map(Reply::Int)
                .map_err(|_| protocol_error("malformed integer reply")),
            b'$' => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| protocol_error("malformed bulk length"))?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                let mut payload = vec![0u8; len as usize];
                self.reader.read_exact(&mut payload).map_err(io_error)?;
                let mut crlf = [0u8; 2];
                self.reader.read_exact(&mut crlf).map_err(io_error)?;
                if &crlf != b"\r\n" {
                    return Err(protocol_error("bulk payload not terminated"));
                }
                Ok(Reply::Bulk(Some(payload)))
            }
            b'*' => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| protocol_error("malformed array length"))?;
                if len < 0 {
                    return Ok(Reply::Array(Vec::new()));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(self.read_reply()?);
                }
                Ok(Reply::Array(items))
            }
            other => Err(protocol_error(&format!("unknown reply marker '{}'", other as char))),
        }
    }
}
