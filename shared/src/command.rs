//! Command identifiers carried in the first byte of every frame

use std::fmt;

/// Wire discriminant of an envelope
///
/// Game commands occupy `1..=21`, file transfer commands `0x21..=0x30`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    PlayerDc = 1,
    PlayerJoin = 2,
    ReplyPlayerJoin = 3,
    NewPlayerJoin = 4,
    StateUpdate = 5,
    BulletCollide = 6,
    BulletCreated = 7,
    AsteroidCreated = 8,
    AsteroidUpdate = 9,
    AsteroidDestroyed = 10,
    ShipRespawn = 11,
    ShipMove = 12,
    ShipCollide = 13,
    ReqHighscore = 14,
    ClientReqHighscore = 15,
    NewHighscore = 16,
    GameStart = 17,
    GameOver = 18,
    PacketError = 19,
    Heartbeat = 20,
    ShipScore = 21,

    ReqDownload = 0x21,
    RspDownload = 0x22,
    ReqListFiles = 0x23,
    RspListFiles = 0x24,
    FileData = 0x25,
    DownloadError = 0x30,
}

impl Command {
    pub const ALL: [Command; 27] = [
        Command::PlayerDc,
        Command::PlayerJoin,
        Command::ReplyPlayerJoin,
        Command::NewPlayerJoin,
        Command::StateUpdate,
        Command::BulletCollide,
        Command::BulletCreated,
        Command::AsteroidCreated,
        Command::AsteroidUpdate,
        Command::AsteroidDestroyed,
        Command::ShipRespawn,
        Command::ShipMove,
        Command::ShipCollide,
        Command::ReqHighscore,
        Command::ClientReqHighscore,
        Command::NewHighscore,
        Command::GameStart,
        Command::GameOver,
        Command::PacketError,
        Command::Heartbeat,
        Command::ShipScore,
        Command::ReqDownload,
        Command::RspDownload,
        Command::ReqListFiles,
        Command::RspListFiles,
        Command::FileData,
        Command::DownloadError,
    ];

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Relay commands describe something the originating client already
    /// applied locally, so a broadcast skips the originating slot
    pub fn is_relay(self) -> bool {
        matches!(
            self,
            Command::ShipMove
                | Command::BulletCreated
                | Command::AsteroidUpdate
                | Command::NewPlayerJoin
        )
    }

    /// Commands that belong on the file transfer socket
    pub fn is_transfer(self) -> bool {
        self.as_byte() >= Command::ReqDownload.as_byte()
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.as_byte() == byte)
            .ok_or(byte)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.as_byte())
    }
}
