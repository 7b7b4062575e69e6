//! The dispatcher wire format. Every message is a length-prefixed frame; a
//! request carries a sequence number, an opcode, an object handle and an
//! opaque payload, a response echoes the sequence number followed by a
//! status byte. Payloads use the same binary conventions as the
//! knowledgebase serialization, see [`lernen::codec`].

use std::io::{self, Read, Write};

use lernen::{
    codec::{self, Reader},
    error::{Error, ErrorKind},
};

/// Frames larger than this are rejected as a protocol violation on both
/// sides. Large enough for a full knowledgebase serialization, small enough
/// that a corrupt length prefix cannot trigger a giant allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// The closed set of operations. There is no name-based dispatch over the
/// wire, a remote call is nothing but an opcode applied to a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    CreateKnowledgebase,
    CreateLearner,
    CreateLogger,
    Release,
    KbAddKnowledge,
    KbResolveOrAddQuery,
    KbGetQueries,
    KbSerialize,
    KbDeserialize,
    KbClear,
    AlgAdvance,
    AlgAddCounterexample,
    AlgSetLogger,
    AlgRemoveLogger,
    LoggerReceiveAndFlush,
}

impl Opcode {
    pub fn code(self) -> u8 {
        match self {
            Opcode::CreateKnowledgebase => 0x01,
            Opcode::CreateLearner => 0x02,
            Opcode::CreateLogger => 0x03,
            Opcode::Release => 0x04,
            Opcode::KbAddKnowledge => 0x10,
            Opcode::KbResolveOrAddQuery => 0x11,
            Opcode::KbGetQueries => 0x12,
            Opcode::KbSerialize => 0x13,
            Opcode::KbDeserialize => 0x14,
            Opcode::KbClear => 0x15,
            Opcode::AlgAdvance => 0x20,
            Opcode::AlgAddCounterexample => 0x21,
            Opcode::AlgSetLogger => 0x22,
            Opcode::AlgRemoveLogger => 0x23,
            Opcode::LoggerReceiveAndFlush => 0x30,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Opcode::CreateKnowledgebase),
            0x02 => Some(Opcode::CreateLearner),
            0x03 => Some(Opcode::CreateLogger),
            0x04 => Some(Opcode::Release),
            0x10 => Some(Opcode::KbAddKnowledge),
            0x11 => Some(Opcode::KbResolveOrAddQuery),
            0x12 => Some(Opcode::KbGetQueries),
            0x13 => Some(Opcode::KbSerialize),
            0x14 => Some(Opcode::KbDeserialize),
            0x15 => Some(Opcode::KbClear),
            0x20 => Some(Opcode::AlgAdvance),
            0x21 => Some(Opcode::AlgAddCounterexample),
            0x22 => Some(Opcode::AlgSetLogger),
            0x23 => Some(Opcode::AlgRemoveLogger),
            0x30 => Some(Opcode::LoggerReceiveAndFlush),
            _ => None,
        }
    }
}

/// One call: `[len][sequence][opcode][handle][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub sequence: u32,
    pub opcode: Opcode,
    pub handle: u32,
    pub payload: Vec<u8>,
}

/// One answer: `[len][sequence][status][payload]`, where a zero status
/// carries a result payload and any other status is an [`ErrorKind`] code
/// followed by the error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub sequence: u32,
    pub result: Result<Vec<u8>, Error>,
}

/// What the server sees when it pulls the next frame off a connection.
#[derive(Debug)]
pub enum Incoming {
    Request(Request),
    /// The frame arrived but does not parse as a request; the sequence
    /// number is the best-effort correlation extracted from it.
    Malformed { sequence: u32, error: Error },
    /// The peer closed the connection cleanly between frames.
    Disconnected,
}

fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(body)?;
    writer.flush()
}

/// Reads one length-prefixed frame. `Ok(None)` means the peer closed the
/// connection before the next frame started.
fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> io::Result<()> {
    let mut body = Vec::with_capacity(9 + request.payload.len());
    codec::put_u32(&mut body, request.sequence);
    codec::put_u8(&mut body, request.opcode.code());
    codec::put_u32(&mut body, request.handle);
    body.extend_from_slice(&request.payload);
    write_frame(writer, &body)
}

/// Pulls the next request off the stream, server side. I/O failures bubble
/// up; a frame that parses incorrectly is reported as [`Incoming::Malformed`]
/// so the server can answer it with a protocol error while the stream stays
/// aligned on frame boundaries.
pub fn read_request<R: Read>(reader: &mut R) -> io::Result<Incoming> {
    let Some(body) = read_frame(reader)? else {
        return Ok(Incoming::Disconnected);
    };

    let mut cursor = Reader::new(&body);
    let sequence = cursor.u32().unwrap_or(0);
    let header = (|| {
        let code = cursor.u8()?;
        let handle = cursor.u32()?;
        Ok::<_, lernen::codec::CodecError>((code, handle))
    })();
    let (code, handle) = match header {
        Ok(parts) => parts,
        Err(err) => {
            return Ok(Incoming::Malformed {
                sequence,
                error: Error::Protocol(format!("malformed request frame: {err}")),
            })
        }
    };
    let Some(opcode) = Opcode::from_code(code) else {
        return Ok(Incoming::Malformed {
            sequence,
            error: Error::Protocol(format!("unknown opcode {code:#04x}")),
        });
    };

    let payload = body[9..].to_vec();
    Ok(Incoming::Request(Request {
        sequence,
        opcode,
        handle,
        payload,
    }))
}

pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    let mut body = Vec::new();
    codec::put_u32(&mut body, response.sequence);
    match &response.result {
        Ok(payload) => {
            codec::put_u8(&mut body, 0);
            body.extend_from_slice(payload);
        }
        Err(error) => {
            codec::put_u8(&mut body, error.kind().code());
            codec::put_str(&mut body, error.message());
        }
    }
    write_frame(writer, &body)
}

/// Reads one response, client side. Transport failures (including read
/// timeouts) surface as [`Error::Connection`], anything that arrives but
/// does not parse as [`Error::Protocol`].
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response, Error> {
    let body = match read_frame(reader) {
        Ok(Some(body)) => body,
        Ok(None) => {
            return Err(Error::Connection(
                "server closed the connection".to_string(),
            ))
        }
        Err(err) => return Err(connection_error(err)),
    };

    let mut cursor = Reader::new(&body);
    let sequence = cursor
        .u32()
        .map_err(|err| Error::Protocol(format!("malformed response frame: {err}")))?;
    let status = cursor
        .u8()
        .map_err(|err| Error::Protocol(format!("malformed response frame: {err}")))?;

    let result = if status == 0 {
        Ok(body[5..].to_vec())
    } else {
        let kind = ErrorKind::from_code(status)
            .ok_or_else(|| Error::Protocol(format!("unknown error status {status}")))?;
        let message = cursor
            .str()
            .map_err(|err| Error::Protocol(format!("malformed error payload: {err}")))?;
        Err(Error::from_kind(kind, message.to_string()))
    };
    Ok(Response { sequence, result })
}

/// Maps a transport failure to [`Error::Connection`], keeping timeouts
/// recognizable in the message.
pub fn connection_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            Error::Connection(format!("receive timed out: {err}"))
        }
        _ => Error::Connection(err.to_string()),
    }
}
