//! Race message codec
//!
//! Encodes the game-level frames carried inside transport `Data` packets.
//! Every frame is self-describing: a leading tag byte selects the variant and
//! fixed-width fields follow in big-endian order. No version field beyond the
//! tag; both ends of a session always run the same protocol revision.
//!
//! # Wire Format
//!
//! ```text
//! 0x01 ControlInput    [velocity_x:f32][velocity_y:f32]
//! 0x02 RaceState       [lap:u32][elapsed_time:f64][waypoint_index:u32]
//! 0x03 Handshake       [len:u16][display_name:utf8]
//! 0x04 TrackSelection  [len:u16][track:utf8][len:u16][car:utf8]
//! 0x05 RaceCommand     [command:u8]
//! ```
//!
//! The transport delivers whole datagrams, so frames carry no outer length
//! prefix.


pub const TAG_CONTROL_INPUT: u8 = 0x01;
pub const TAG_RACE_STATE: u8 = 0x02;
pub const TAG_HANDSHAKE: u8 = 0x03;
pub const TAG_TRACK_SELECTION: u8 = 0x04;
pub const TAG_RACE_COMMAND: u8 = 0x05;

/// Longest string field accepted on the wire, in bytes.
pub const MAX_STRING_FIELD_LEN: usize = 255;

/// One game-level frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Joystick vector from a Controller
    ControlInput { velocity_x: f32, velocity_y: f32 },
    /// Race progress from a Display
    RaceState {
        lap: u32,
        elapsed_time: f64,
        waypoint_index: u32,
    },
    /// Sender's display name, consumed by the session to bind the peer
    Handshake { display_name: String },
    /// Track and car picked on the Controller before a race
    TrackSelection { track: String, car: String },
    /// Pause/resume/quit from either side
    RaceCommand(RaceCommand),
}

/// Race flow commands issued from the pause overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceCommand {
    Pause,
    Resume,
    Quit,
}

impl RaceCommand {
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Pause => 1,
            Self::Resume => 2,
            Self::Quit => 3,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Pause),
            2 => Some(Self::Resume),
            3 => Some(Self::Quit),
            _ => None,
        }
    }
}

/// A buffer that does not decode to a [`Message`].
///
/// Receivers drop the offending frame and keep going; one bad frame never
/// poisons the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    #[error("empty frame")]
    Empty,
    #[error("unknown tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("truncated {field}: needed {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("{field} is {len} bytes, over the string field limit")]
    StringTooLong { field: &'static str, len: usize },
    #[error("unknown race command {0}")]
    UnknownCommand(u8),
}

impl Message {
    /// Tag byte identifying this variant on the wire.
    pub const fn tag(&self) -> u8 {
        match self {
            Self::ControlInput { .. } => TAG_CONTROL_INPUT,
            Self::RaceState { .. } => TAG_RACE_STATE,
            Self::Handshake { .. } => TAG_HANDSHAKE,
            Self::TrackSelection { .. } => TAG_TRACK_SELECTION,
            Self::RaceCommand(_) => TAG_RACE_COMMAND,
        }
    }

    /// Serialize to a frame.
    ///
    /// String fields longer than [`MAX_STRING_FIELD_LEN`] bytes are cut at a
    /// character boundary so the result always decodes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17);
        out.push(self.tag());
        match self {
            Self::ControlInput {
                velocity_x,
                velocity_y,
            } => {
                out.extend_from_slice(&velocity_x.to_be_bytes());
                out.extend_from_slice(&velocity_y.to_be_bytes());
            }
            Self::RaceState {
                lap,
                elapsed_time,
                waypoint_index,
            } => {
                out.extend_from_slice(&lap.to_be_bytes());
                out.extend_from_slice(&elapsed_time.to_be_bytes());
                out.extend_from_slice(&waypoint_index.to_be_bytes());
            }
            Self::Handshake { display_name } => put_str(&mut out, display_name),
            Self::TrackSelection { track, car } => {
                put_str(&mut out, track);
                put_str(&mut out, car);
            }
            Self::RaceCommand(command) => out.push(command.to_byte()),
        }
        out
    }

    /// Parse a frame. Never panics, whatever the input.
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedMessage> {
        let (&tag, body) = bytes.split_first().ok_or(MalformedMessage::Empty)?;
        let mut reader = Reader { buf: body };

        let message = match tag {
            TAG_CONTROL_INPUT => Self::ControlInput {
                velocity_x: f32::from_be_bytes(reader.array("velocity_x")?),
                velocity_y: f32::from_be_bytes(reader.array("velocity_y")?),
            },
            TAG_RACE_STATE => Self::RaceState {
                lap: u32::from_be_bytes(reader.array("lap")?),
                elapsed_time: f64::from_be_bytes(reader.array("elapsed_time")?),
                waypoint_index: u32::from_be_bytes(reader.array("waypoint_index")?),
            },
            TAG_HANDSHAKE => Self::Handshake {
                display_name: reader.string("display_name")?,
            },
            TAG_TRACK_SELECTION => Self::TrackSelection {
                track: reader.string("track")?,
                car: reader.string("car")?,
            },
            TAG_RACE_COMMAND => {
                let [byte] = reader.array("command")?;
                Self::RaceCommand(
                    RaceCommand::from_byte(byte).ok_or(MalformedMessage::UnknownCommand(byte))?,
                )
            }
            other => return Err(MalformedMessage::UnknownTag(other)),
        };

        reader.finish()?;
        Ok(message)
    }
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    let mut end = value.len().min(MAX_STRING_FIELD_LEN);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    out.extend_from_slice(&(end as u16).to_be_bytes());
    out.extend_from_slice(&value.as_bytes()[..end]);
}

/// Bounds-checked cursor over a frame body.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], MalformedMessage> {
        if self.buf.len() < needed {
            return Err(MalformedMessage::Truncated {
                field,
                needed,
                available: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(needed);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], MalformedMessage> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    fn string(&mut self, field: &'static str) -> Result<String, MalformedMessage> {
        let len = u16::from_be_bytes(self.array(field)?) as usize;
        if len > MAX_STRING_FIELD_LEN {
            return Err(MalformedMessage::StringTooLong { field, len });
        }
        let raw = self.take(field, len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| MalformedMessage::InvalidUtf8(field))
    }

    fn finish(self) -> Result<(), MalformedMessage> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(MalformedMessage::TrailingBytes(self.buf.len()))
        }
    }
}
