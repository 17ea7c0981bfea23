//! The closed set of control messages exchanged between a controller and the
//! master (spec §4.1). Wire form is a printable string so a captured frame is
//! trivially human-loggable; each message self-identifies its type and sender.

use std::fmt;
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::task::{EncodedTask, TaskId};

/// field separator used on the wire (ASCII unit separator, never appears in a
/// hostname, tid or decimal number)
const SEP: char = '\u{1f}';

/// Maximum frame size accepted from the wire, guards against a bogus/garbled
/// length prefix turning into an unbounded allocation
const MAX_FRAME_LEN: u32 = 1 << 20;

/// A controller or master identity, as carried by every message's `sender`
/// field
pub type Sender = String;

/// The closed set of Cyclone control messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// controller -> master: "give me a task"
    TaskRequest { sender: Sender },
    /// controller -> master: "this task is done"
    TaskFinished { sender: Sender, tid: TaskId },
    /// controller -> master: "I'm alive, no task to report"
    Heartbeat { sender: Sender },
    /// master -> controller: here is a task to run
    TaskAssign { task: EncodedTask },
    /// master -> controller: nothing for you yet, retry in N seconds
    Wait { duration_seconds: u64 },
    /// master -> controller: your last message was processed
    Acknowledge,
    /// master -> controller: stop requesting tasks, drain and exit
    Exit,
}

impl Message {
    /// The sender of this message, if it carries one (only controller ->
    /// master messages do; spec §4.7 step 1 treats a message with no sender
    /// as a decode error)
    pub fn sender(&self) -> Option<&str> {
        match self {
            Message::TaskRequest { sender }
            | Message::TaskFinished { sender, .. }
            | Message::Heartbeat { sender } => Some(sender),
            Message::TaskAssign { .. } | Message::Wait { .. } | Message::Acknowledge | Message::Exit => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Message::TaskRequest { .. } => "TASK_REQUEST",
            Message::TaskFinished { .. } => "TASK_FINISHED",
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::TaskAssign { .. } => "TASK_ASSIGN",
            Message::Wait { .. } => "WAIT",
            Message::Acknowledge => "ACKNOWLEDGE",
            Message::Exit => "EXIT",
        }
    }

    /// Encodes the message to its printable wire string
    pub fn encode(&self) -> String {
        match self {
            Message::TaskRequest { sender } => format!("TASK_REQUEST{SEP}{sender}"),
            Message::TaskFinished { sender, tid } => format!("TASK_FINISHED{SEP}{sender}{SEP}{tid}"),
            Message::Heartbeat { sender } => format!("HEARTBEAT{SEP}{sender}"),
            Message::TaskAssign { task } => {
                format!("TASK_ASSIGN{SEP}{}{SEP}{}", task.tid, task.body)
            }
            Message::Wait { duration_seconds } => format!("WAIT{SEP}{duration_seconds}"),
            Message::Acknowledge => "ACKNOWLEDGE".to_string(),
            Message::Exit => "EXIT".to_string(),
        }
    }

    /// Decodes a message from its printable wire string. A malformed string
    /// fails this individual message only; it never panics.
    pub fn decode(raw: &str) -> Result<Self> {
        let mut parts = raw.split(SEP);
        let kind = parts.next().ok_or_else(|| Error::decode("empty message"))?;
        match kind {
            "TASK_REQUEST" => {
                let sender = next_field(&mut parts, "sender")?;
                Ok(Message::TaskRequest { sender })
            }
            "TASK_FINISHED" => {
                let sender = next_field(&mut parts, "sender")?;
                let tid = next_field(&mut parts, "tid")?;
                Ok(Message::TaskFinished { sender, tid })
            }
            "HEARTBEAT" => {
                let sender = next_field(&mut parts, "sender")?;
                Ok(Message::Heartbeat { sender })
            }
            "TASK_ASSIGN" => {
                let tid = next_field(&mut parts, "tid")?;
                let body = parts.collect::<Vec<_>>().join(&SEP.to_string());
                Ok(Message::TaskAssign {
                    task: EncodedTask { tid, body },
                })
            }
            "WAIT" => {
                let secs = next_field(&mut parts, "duration_seconds")?;
                let duration_seconds = secs
                    .parse()
                    .map_err(|_| Error::decode(format!("invalid WAIT duration: {secs}")))?;
                Ok(Message::Wait { duration_seconds })
            }
            "ACKNOWLEDGE" => Ok(Message::Acknowledge),
            "EXIT" => Ok(Message::Exit),
            other => Err(Error::decode(format!("unknown message type: {other}"))),
        }
    }
}

fn next_field<'a, I: Iterator<Item = &'a str>>(parts: &mut I, name: &str) -> Result<String> {
    parts
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::decode(format!("missing field: {name}")))
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// Writes a single length-prefixed frame (4-byte big-endian length, then the
/// encoded message bytes) to `w`.
pub fn write_frame<W: Write>(w: &mut W, msg: &Message) -> Result<()> {
    let encoded = msg.encode();
    let bytes = encoded.as_bytes();
    let len = u32::try_from(bytes.len()).map_err(|_| Error::transport("frame too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(bytes)?;
    w.flush()?;
    Ok(())
}

/// Reads a single length-prefixed frame from `r` and decodes it. A transport
/// failure (I/O error, oversized frame) is distinct from a `DecodeError`: the
/// former means the connection is unusable, the latter means only this
/// message was malformed.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Message> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::transport(format!("frame of {len} bytes exceeds limit")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    let raw = String::from_utf8(buf).map_err(|e| Error::decode(format!("non-utf8 frame: {e}")))?;
    Message::decode(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_message_kind() {
        let msgs = vec![
            Message::TaskRequest {
                sender: "c1".into(),
            },
            Message::TaskFinished {
                sender: "c1".into(),
                tid: "T1".into(),
            },
            Message::Heartbeat {
                sender: "c1".into(),
            },
            Message::TaskAssign {
                task: EncodedTask {
                    tid: "T1".into(),
                    body: "probe:oss1/ost0".into(),
                },
            },
            Message::Wait {
                duration_seconds: 5,
            },
            Message::Acknowledge,
            Message::Exit,
        ];
        for msg in msgs {
            let encoded = msg.encode();
            let decoded = Message::decode(&encoded).unwrap();
            assert_eq!(msg, decoded);
        }
    }

    #[test]
    fn decode_error_does_not_panic_on_garbage() {
        assert!(Message::decode("").is_err());
        assert!(Message::decode("NOT_A_REAL_TYPE").is_err());
        assert!(Message::decode("TASK_REQUEST").is_err());
    }

    #[test]
    fn frame_round_trip_over_a_buffer() {
        let msg = Message::TaskFinished {
            sender: "controller-7".into(),
            tid: "T42".into(),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).unwrap();
        assert_eq!(msg, read_back);
    }

    #[test]
    fn oversized_frame_is_rejected_as_transport_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn task_assign_body_may_contain_the_separator() {
        let task = EncodedTask {
            tid: "T9".into(),
            body: format!("a{SEP}b"),
        };
        let msg = Message::TaskAssign { task: task.clone() };
        let decoded = Message::decode(&msg.encode()).unwrap();
        match decoded {
            Message::TaskAssign { task: t } => assert_eq!(t.body, task.body),
            _ => panic!("expected TaskAssign"),
        }
    }
}
