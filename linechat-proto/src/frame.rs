//! Line protocol frames exchanged between LineChat clients and servers.
//!
//! Every frame is one `\n`-terminated line. The first line a client sends is
//! its plaintext username; everything after that is a [`ClientFrame`]. The
//! server answers with [`ServerFrame`]s.
//!
//! Fields are separated by `:`. Where a field may itself contain colons
//! (IPv6 addresses, file names) the outermost fields are split off first.

/// Sent by the server to every session right before it shuts down.
pub const SHUTDOWN_SENTINEL: &str = "SERVER_SHUTDOWN";

/// Prefix of the line a client sends to leave: `DISCONNECT:{user}:{ip}:{port}`.
pub const DISCONNECT_PREFIX: &str = "DISCONNECT:";

/// Prefix of a file announcement frame.
pub const FILE_PREFIX: &str = "FILE:";

/// Suffix of the system notice broadcast when a user arrives.
pub const JOINED_SUFFIX: &str = " joined";

/// Suffix of the system notice broadcast when a user leaves.
pub const LEFT_SUFFIX: &str = " left";

/// Separator between sender and body in a relayed chat line.
pub const CHAT_SEPARATOR: &str = ": ";

/// Maximum accepted line length in bytes, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Which frame a malformed line was trying to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A `DISCONNECT:` line.
    Disconnect,
    /// A `FILE:` line.
    FileAnnouncement,
}

/// A line carried a reserved prefix but its fields did not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// `DISCONNECT:` line without the expected `user:ip:port` fields.
    #[error("malformed disconnect frame: {0:?}")]
    MalformedDisconnect(String),

    /// `FILE:` line without a name or with a non-numeric size.
    #[error("malformed file announcement: {0:?}")]
    MalformedFile(String),
}

impl FrameError {
    /// Returns the kind of frame that failed to parse.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::MalformedDisconnect(_) => FrameKind::Disconnect,
            Self::MalformedFile(_) => FrameKind::FileAnnouncement,
        }
    }

    /// Text the server sends back to the client that sent the bad line.
    ///
    /// Unlike the `Display` form it never echoes the offending line and
    /// never contains [`CHAT_SEPARATOR`], so [`ServerFrame::parse`] always
    /// classifies it as a [`ServerFrame::Notice`].
    #[must_use]
    pub const fn notice(&self) -> &'static str {
        match self {
            Self::MalformedDisconnect(_) => {
                "malformed disconnect ignored, expected DISCONNECT:user:ip:port"
            }
            Self::MalformedFile(_) => "malformed file announcement ignored, expected FILE:name:size",
        }
    }
}

/// Fields of a client's `DISCONNECT:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    /// Username the client registered with.
    pub username: String,
    /// Client's local IP address as it sees it.
    pub ip: String,
    /// Client's local port.
    pub port: u16,
}

/// Announcement of a file. Only metadata travels; no bytes are transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnnouncement {
    /// User offering the file. Empty on the client-to-server leg, where the
    /// server fills it in from the session.
    pub sender: String,
    /// File name as given by the sender.
    pub filename: String,
    /// Size in bytes.
    pub filesize: u64,
}

/// A frame sent from a client after its username line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// The client is leaving.
    Disconnect(DisconnectNotice),
    /// `FILE:{filename}:{filesize}`.
    File(FileAnnouncement),
    /// Anything else: an encoded chat line.
    Chat(String),
}

impl ClientFrame {
    /// Parses one line received from a client.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when a line carries the disconnect or file
    /// prefix but its fields are malformed. Callers should check
    /// [`FrameError::kind`]: a malformed disconnect still ends the session.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        if let Some(rest) = line.strip_prefix(DISCONNECT_PREFIX) {
            return parse_disconnect(rest)
                .map(Self::Disconnect)
                .ok_or_else(|| FrameError::MalformedDisconnect(line.to_string()));
        }
        if let Some(rest) = line.strip_prefix(FILE_PREFIX) {
            let (filename, filesize) = split_file_fields(rest)
                .ok_or_else(|| FrameError::MalformedFile(line.to_string()))?;
            return Ok(Self::File(FileAnnouncement {
                sender: String::new(),
                filename,
                filesize,
            }));
        }
        Ok(Self::Chat(line.to_string()))
    }

    /// Renders the frame as a line without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Disconnect(n) => {
                format!("{DISCONNECT_PREFIX}{}:{}:{}", n.username, n.ip, n.port)
            }
            Self::File(f) => format!("{FILE_PREFIX}{}:{}", f.filename, f.filesize),
            Self::Chat(body) => body.clone(),
        }
    }
}

/// A frame sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// The server is shutting down.
    Shutdown,
    /// `FILE:{sender}:{filename}:{filesize}`.
    File(FileAnnouncement),
    /// `"{username} joined"`.
    Joined(String),
    /// `"{username} left"`.
    Left(String),
    /// `"{sender}: {body}"` where `body` is cipher text.
    Chat {
        /// Username of the sender.
        sender: String,
        /// Encoded message body.
        body: String,
    },
    /// Any other informational line.
    Notice(String),
}

impl ServerFrame {
    /// Classifies one line received from the server.
    ///
    /// Join/leave detection is a plain substring match, applied before chat
    /// parsing, so such lines are never decoded.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MalformedFile`] for a `FILE:` line that does not
    /// carry `sender:filename:filesize`.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        if line == SHUTDOWN_SENTINEL {
            return Ok(Self::Shutdown);
        }
        if let Some(rest) = line.strip_prefix(FILE_PREFIX) {
            let parsed = rest.split_once(':').and_then(|(sender, tail)| {
                let (filename, filesize) = split_file_fields(tail)?;
                (!sender.is_empty()).then(|| FileAnnouncement {
                    sender: sender.to_string(),
                    filename,
                    filesize,
                })
            });
            return parsed
                .map(Self::File)
                .ok_or_else(|| FrameError::MalformedFile(line.to_string()));
        }
        if let Some(name) = line.strip_suffix(JOINED_SUFFIX) {
            return Ok(Self::Joined(name.to_string()));
        }
        if let Some(name) = line.strip_suffix(LEFT_SUFFIX) {
            return Ok(Self::Left(name.to_string()));
        }
        if line.contains(JOINED_SUFFIX) || line.contains(LEFT_SUFFIX) {
            return Ok(Self::Notice(line.to_string()));
        }
        if let Some((sender, body)) = line.split_once(CHAT_SEPARATOR) {
            return Ok(Self::Chat {
                sender: sender.to_string(),
                body: body.to_string(),
            });
        }
        Ok(Self::Notice(line.to_string()))
    }

    /// Renders the frame as a line without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Shutdown => SHUTDOWN_SENTINEL.to_string(),
            Self::File(f) => format!("{FILE_PREFIX}{}:{}:{}", f.sender, f.filename, f.filesize),
            Self::Joined(name) => format!("{name}{JOINED_SUFFIX}"),
            Self::Left(name) => format!("{name}{LEFT_SUFFIX}"),
            Self::Chat { sender, body } => format!("{sender}{CHAT_SEPARATOR}{body}"),
            Self::Notice(text) => text.clone(),
        }
    }
}

/// `{username}:{ip}:{port}`; the IP may contain colons.
fn parse_disconnect(rest: &str) -> Option<DisconnectNotice> {
    let (username, tail) = rest.split_once(':')?;
    let (ip, port) = tail.rsplit_once(':')?;
    if username.is_empty() || ip.is_empty() {
        return None;
    }
    Some(DisconnectNotice {
        username: username.to_string(),
        ip: ip.to_string(),
        port: port.trim().parse().ok()?,
    })
}

/// `{filename}:{filesize}`; the file name may contain colons.
fn split_file_fields(rest: &str) -> Option<(String, u64)> {
    let (filename, size) = rest.rsplit_once(':')?;
    if filename.is_empty() {
        return None;
    }
    Some((filename.to_string(), size.trim().parse().ok()?))
}
