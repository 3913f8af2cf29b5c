//! Typed messages for both directions of the game socket and the transfer socket
//!
//! Every variant maps onto exactly one [`Command`]. `to_envelope` never emits
//! more than `MAX_BODY_LEN` payload bytes and `from_envelope` insists the
//! payload is consumed exactly, so a frame with trailing garbage is rejected
//! rather than half-applied.

use crate::codec::{CodecError, Reader, WireDecode, WireEncode, Writer};
use crate::command::Command;
use crate::envelope::{DecodeError, Envelope};
use crate::transfer::DataFrame;
use crate::{
    read_opt_slot, read_slot, write_opt_slot, write_slot, AsteroidState, HighScoreEntry, Motion,
    PlayerSnapshot, ShipState, SlotId, Vec2,
};

/// Movement report; identical layout in both directions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShipMove {
    pub slot: SlotId,
    /// Milliseconds since the sending client started
    pub time_diff: u64,
    /// Bitmask of held input keys
    pub input: u32,
    pub motion: Motion,
}

impl WireEncode for ShipMove {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        write_slot(w, self.slot)?;
        w.put_u64(self.time_diff)?;
        w.put_u32(self.input)?;
        w.put(&self.motion)
    }
}

impl WireDecode for ShipMove {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(ShipMove {
            slot: read_slot(r)?,
            time_diff: r.get_u64()?,
            input: r.get_u32()?,
            motion: r.get()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinReply {
    Accepted {
        slot: SlotId,
        /// The endpoint resumed a slot it held before
        rejoined: bool,
        ship: ShipState,
        /// Next id in this slot's bullet ring
        next_bullet_id: u32,
        /// Every other connected slot
        roster: Vec<PlayerSnapshot>,
    },
    /// All slots are taken
    Rejected,
}

const JOIN_ACCEPTED: u8 = 0;
const JOIN_FULL: u8 = 1;

/// Messages a game client sends to the session server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    PlayerJoin { name: String },
    PlayerDc { slot: SlotId },
    Heartbeat,
    ShipMove(ShipMove),
    BulletCreated { predicted_id: u32, motion: Motion },
    BulletCollide { bullet_id: u32, asteroid_id: u32 },
    ShipCollide { asteroid_id: u32 },
    AsteroidUpdate(AsteroidState),
    AsteroidDestroyed { asteroid_id: u32 },
    ClientReqHighscore,
    NewHighscore { name: String, score: u32 },
    GameStart,
}

/// Messages the session server sends to game clients
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ReplyPlayerJoin(JoinReply),
    NewPlayerJoin(PlayerSnapshot),
    StateUpdate(Vec<PlayerSnapshot>),
    ShipMove(ShipMove),
    ShipCollide { slot: SlotId, asteroid_id: u32 },
    ShipRespawn { slot: SlotId, pos: Vec2 },
    ShipScore { slot: SlotId, score: u32 },
    BulletCreated { owner: SlotId, bullet_id: u32, motion: Motion },
    BulletCollide { owner: SlotId, bullet_id: u32, asteroid_id: u32 },
    AsteroidCreated(Vec<AsteroidState>),
    AsteroidUpdate(AsteroidState),
    AsteroidDestroyed { asteroid_id: u32 },
    PlayerDc { slot: SlotId },
    HighScores(Vec<HighScoreEntry>),
    HighscoreResult { added: bool },
    GameStart,
    GameOver {
        winner: Option<SlotId>,
        name: String,
        score: u32,
    },
}

/// Codes carried by `DOWNLOAD_ERROR`
pub mod download_error {
    pub const NOT_FOUND: u8 = 1;
    pub const INVALID_NAME: u8 = 2;
    pub const READ_FAILED: u8 = 3;
    pub const RETRIES_EXHAUSTED: u8 = 4;
    pub const TOO_LARGE: u8 = 5;
}

/// Requests arriving on the transfer socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    ListFiles,
    Download { name: String },
}

/// Replies leaving the transfer socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResponse {
    FileList(Vec<String>),
    DownloadStarted {
        session: u32,
        file_length: u32,
        frame_count: u32,
    },
    DownloadError { code: u8, message: String },
    FileData(DataFrame),
}

fn build<F>(command: Command, body: F) -> Result<Envelope, CodecError>
where
    F: FnOnce(&mut Writer) -> Result<(), CodecError>,
{
    let mut w = Writer::new();
    body(&mut w)?;
    Ok(Envelope::from_writer(command, w))
}

fn put_list<T: WireEncode>(w: &mut Writer, items: &[T]) -> Result<(), CodecError> {
    w.put_u32(items.len() as u32)?;
    for item in items {
        w.put(item)?;
    }
    Ok(())
}

fn get_items<T: WireDecode>(r: &mut Reader<'_>, count: usize) -> Result<Vec<T>, CodecError> {
    // A bogus count must not be able to reserve more than the payload could hold
    let mut items = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        items.push(r.get()?);
    }
    Ok(items)
}

fn get_list<T: WireDecode>(r: &mut Reader<'_>) -> Result<Vec<T>, CodecError> {
    let count = r.get_u32()? as usize;
    get_items(r, count)
}

fn finish<T>(r: Reader<'_>, value: T) -> Result<T, DecodeError> {
    match r.remaining() {
        0 => Ok(value),
        extra => Err(DecodeError::TrailingBytes(extra)),
    }
}

impl ClientMessage {
    pub fn command(&self) -> Command {
        match self {
            ClientMessage::PlayerJoin { .. } => Command::PlayerJoin,
            ClientMessage::PlayerDc { .. } => Command::PlayerDc,
            ClientMessage::Heartbeat => Command::Heartbeat,
            ClientMessage::ShipMove(_) => Command::ShipMove,
            ClientMessage::BulletCreated { .. } => Command::BulletCreated,
            ClientMessage::BulletCollide { .. } => Command::BulletCollide,
            ClientMessage::ShipCollide { .. } => Command::ShipCollide,
            ClientMessage::AsteroidUpdate(_) => Command::AsteroidUpdate,
            ClientMessage::AsteroidDestroyed { .. } => Command::AsteroidDestroyed,
            ClientMessage::ClientReqHighscore => Command::ClientReqHighscore,
            ClientMessage::NewHighscore { .. } => Command::NewHighscore,
            ClientMessage::GameStart => Command::GameStart,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, CodecError> {
        build(self.command(), |w| match self {
            ClientMessage::PlayerJoin { name } => w.put_str(name),
            ClientMessage::PlayerDc { slot } => write_slot(w, *slot),
            ClientMessage::Heartbeat
            | ClientMessage::ClientReqHighscore
            | ClientMessage::GameStart => Ok(()),
            ClientMessage::ShipMove(mv) => w.put(mv),
            ClientMessage::BulletCreated {
                predicted_id,
                motion,
            } => {
                w.put_u32(*predicted_id)?;
                w.put(motion)
            }
            ClientMessage::BulletCollide {
                bullet_id,
                asteroid_id,
            } => {
                w.put_u32(*bullet_id)?;
                w.put_u32(*asteroid_id)
            }
            ClientMessage::ShipCollide { asteroid_id }
            | ClientMessage::AsteroidDestroyed { asteroid_id } => w.put_u32(*asteroid_id),
            ClientMessage::AsteroidUpdate(asteroid) => w.put(asteroid),
            ClientMessage::NewHighscore { name, score } => {
                w.put_str(name)?;
                w.put_u32(*score)
            }
        })
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, DecodeError> {
        let mut r = env.reader();
        let msg = match env.command {
            Command::PlayerJoin => ClientMessage::PlayerJoin {
                name: r.get_str()?,
            },
            Command::PlayerDc => ClientMessage::PlayerDc {
                slot: read_slot(&mut r)?,
            },
            Command::Heartbeat => ClientMessage::Heartbeat,
            Command::ShipMove => ClientMessage::ShipMove(r.get()?),
            Command::BulletCreated => ClientMessage::BulletCreated {
                predicted_id: r.get_u32()?,
                motion: r.get()?,
            },
            Command::BulletCollide => ClientMessage::BulletCollide {
                bullet_id: r.get_u32()?,
                asteroid_id: r.get_u32()?,
            },
            Command::ShipCollide => ClientMessage::ShipCollide {
                asteroid_id: r.get_u32()?,
            },
            Command::AsteroidUpdate => ClientMessage::AsteroidUpdate(r.get()?),
            Command::AsteroidDestroyed => ClientMessage::AsteroidDestroyed {
                asteroid_id: r.get_u32()?,
            },
            Command::ClientReqHighscore => ClientMessage::ClientReqHighscore,
            Command::NewHighscore => ClientMessage::NewHighscore {
                name: r.get_str()?,
                score: r.get_u32()?,
            },
            Command::GameStart => ClientMessage::GameStart,
            other => return Err(DecodeError::UnexpectedCommand(other)),
        };
        finish(r, msg)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        Self::from_envelope(&Envelope::decode(datagram)?)
    }
}

impl ServerMessage {
    pub fn command(&self) -> Command {
        match self {
            ServerMessage::ReplyPlayerJoin(_) => Command::ReplyPlayerJoin,
            ServerMessage::NewPlayerJoin(_) => Command::NewPlayerJoin,
            ServerMessage::StateUpdate(_) => Command::StateUpdate,
            ServerMessage::ShipMove(_) => Command::ShipMove,
            ServerMessage::ShipCollide { .. } => Command::ShipCollide,
            ServerMessage::ShipRespawn { .. } => Command::ShipRespawn,
            ServerMessage::ShipScore { .. } => Command::ShipScore,
            ServerMessage::BulletCreated { .. } => Command::BulletCreated,
            ServerMessage::BulletCollide { .. } => Command::BulletCollide,
            ServerMessage::AsteroidCreated(_) => Command::AsteroidCreated,
            ServerMessage::AsteroidUpdate(_) => Command::AsteroidUpdate,
            ServerMessage::AsteroidDestroyed { .. } => Command::AsteroidDestroyed,
            ServerMessage::PlayerDc { .. } => Command::PlayerDc,
            ServerMessage::HighScores(_) => Command::ReqHighscore,
            ServerMessage::HighscoreResult { .. } => Command::NewHighscore,
            ServerMessage::GameStart => Command::GameStart,
            ServerMessage::GameOver { .. } => Command::GameOver,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, CodecError> {
        build(self.command(), |w| match self {
            ServerMessage::ReplyPlayerJoin(JoinReply::Rejected) => w.put_u8(JOIN_FULL),
            ServerMessage::ReplyPlayerJoin(JoinReply::Accepted {
                slot,
                rejoined,
                ship,
                next_bullet_id,
                roster,
            }) => {
                w.put_u8(JOIN_ACCEPTED)?;
                write_slot(w, *slot)?;
                w.put_bool(*rejoined)?;
                w.put(ship)?;
                w.put_u32(*next_bullet_id)?;
                put_list(w, roster)
            }
            ServerMessage::NewPlayerJoin(snapshot) => w.put(snapshot),
            ServerMessage::StateUpdate(players) => put_list(w, players),
            ServerMessage::ShipMove(mv) => w.put(mv),
            ServerMessage::ShipCollide { slot, asteroid_id } => {
                write_slot(w, *slot)?;
                w.put_u32(*asteroid_id)
            }
            ServerMessage::ShipRespawn { slot, pos } => {
                write_slot(w, *slot)?;
                w.put(pos)
            }
            ServerMessage::ShipScore { slot, score } => {
                write_slot(w, *slot)?;
                w.put_u32(*score)
            }
            ServerMessage::BulletCreated {
                owner,
                bullet_id,
                motion,
            } => {
                write_slot(w, *owner)?;
                w.put_u32(*bullet_id)?;
                w.put(motion)
            }
            ServerMessage::BulletCollide {
                owner,
                bullet_id,
                asteroid_id,
            } => {
                write_slot(w, *owner)?;
                w.put_u32(*bullet_id)?;
                w.put_u32(*asteroid_id)
            }
            ServerMessage::AsteroidCreated(batch) => put_list(w, batch),
            ServerMessage::AsteroidUpdate(asteroid) => w.put(asteroid),
            ServerMessage::AsteroidDestroyed { asteroid_id } => w.put_u32(*asteroid_id),
            ServerMessage::PlayerDc { slot } => write_slot(w, *slot),
            ServerMessage::HighScores(entries) => {
                w.put_u16(entries.len() as u16)?;
                for entry in entries {
                    w.put(entry)?;
                }
                Ok(())
            }
            ServerMessage::HighscoreResult { added } => w.put_bool(*added),
            ServerMessage::GameStart => Ok(()),
            ServerMessage::GameOver {
                winner,
                name,
                score,
            } => {
                write_opt_slot(w, *winner)?;
                w.put_str(name)?;
                w.put_u32(*score)
            }
        })
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, DecodeError> {
        let mut r = env.reader();
        let msg = match env.command {
            Command::ReplyPlayerJoin => match r.get_u8()? {
                JOIN_FULL => ServerMessage::ReplyPlayerJoin(JoinReply::Rejected),
                JOIN_ACCEPTED => ServerMessage::ReplyPlayerJoin(JoinReply::Accepted {
                    slot: read_slot(&mut r)?,
                    rejoined: r.get_bool()?,
                    ship: r.get()?,
                    next_bullet_id: r.get_u32()?,
                    roster: get_list(&mut r)?,
                }),
                status => {
                    return Err(CodecError::InvalidValue {
                        field: "join status",
                        value: i64::from(status),
                    }
                    .into())
                }
            },
            Command::NewPlayerJoin => ServerMessage::NewPlayerJoin(r.get()?),
            Command::StateUpdate => ServerMessage::StateUpdate(get_list(&mut r)?),
            Command::ShipMove => ServerMessage::ShipMove(r.get()?),
            Command::ShipCollide => ServerMessage::ShipCollide {
                slot: read_slot(&mut r)?,
                asteroid_id: r.get_u32()?,
            },
            Command::ShipRespawn => ServerMessage::ShipRespawn {
                slot: read_slot(&mut r)?,
                pos: r.get()?,
            },
            Command::ShipScore => ServerMessage::ShipScore {
                slot: read_slot(&mut r)?,
                score: r.get_u32()?,
            },
            Command::BulletCreated => ServerMessage::BulletCreated {
                owner: read_slot(&mut r)?,
                bullet_id: r.get_u32()?,
                motion: r.get()?,
            },
            Command::BulletCollide => ServerMessage::BulletCollide {
                owner: read_slot(&mut r)?,
                bullet_id: r.get_u32()?,
                asteroid_id: r.get_u32()?,
            },
            Command::AsteroidCreated => ServerMessage::AsteroidCreated(get_list(&mut r)?),
            Command::AsteroidUpdate => ServerMessage::AsteroidUpdate(r.get()?),
            Command::AsteroidDestroyed => ServerMessage::AsteroidDestroyed {
                asteroid_id: r.get_u32()?,
            },
            Command::PlayerDc => ServerMessage::PlayerDc {
                slot: read_slot(&mut r)?,
            },
            Command::ReqHighscore => {
                let count = r.get_u16()? as usize;
                ServerMessage::HighScores(get_items(&mut r, count)?)
            }
            Command::NewHighscore => ServerMessage::HighscoreResult {
                added: r.get_bool()?,
            },
            Command::GameStart => ServerMessage::GameStart,
            Command::GameOver => ServerMessage::GameOver {
                winner: read_opt_slot(&mut r)?,
                name: r.get_str()?,
                score: r.get_u32()?,
            },
            other => return Err(DecodeError::UnexpectedCommand(other)),
        };
        finish(r, msg)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        Self::from_envelope(&Envelope::decode(datagram)?)
    }
}

impl TransferRequest {
    pub fn to_envelope(&self) -> Result<Envelope, CodecError> {
        match self {
            TransferRequest::ListFiles => Ok(Envelope::empty(Command::ReqListFiles)),
            TransferRequest::Download { name } => {
                build(Command::ReqDownload, |w| w.put_str(name))
            }
        }
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, DecodeError> {
        let mut r = env.reader();
        let req = match env.command {
            Command::ReqListFiles => TransferRequest::ListFiles,
            Command::ReqDownload => TransferRequest::Download {
                name: r.get_str()?,
            },
            other => return Err(DecodeError::UnexpectedCommand(other)),
        };
        finish(r, req)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        Self::from_envelope(&Envelope::decode(datagram)?)
    }
}

impl TransferResponse {
    pub fn to_envelope(&self) -> Result<Envelope, CodecError> {
        match self {
            TransferResponse::FileList(names) => build(Command::RspListFiles, |w| {
                w.put_u32(names.len() as u32)?;
                for name in names {
                    w.put_str(name)?;
                }
                Ok(())
            }),
            TransferResponse::DownloadStarted {
                session,
                file_length,
                frame_count,
            } => build(Command::RspDownload, |w| {
                w.put_u32(*session)?;
                w.put_u32(*file_length)?;
                w.put_u32(*frame_count)
            }),
            TransferResponse::DownloadError { code, message } => {
                build(Command::DownloadError, |w| {
                    w.put_u8(*code)?;
                    w.put_str(message)
                })
            }
            TransferResponse::FileData(frame) => build(Command::FileData, |w| w.put(frame)),
        }
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, DecodeError> {
        let mut r = env.reader();
        let rsp = match env.command {
            Command::RspListFiles => {
                let count = r.get_u32()? as usize;
                let mut names = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    names.push(r.get_str()?);
                }
                TransferResponse::FileList(names)
            }
            Command::RspDownload => TransferResponse::DownloadStarted {
                session: r.get_u32()?,
                file_length: r.get_u32()?,
                frame_count: r.get_u32()?,
            },
            Command::DownloadError => TransferResponse::DownloadError {
                code: r.get_u8()?,
                message: r.get_str()?,
            },
            Command::FileData => TransferResponse::FileData(r.get()?),
            other => return Err(DecodeError::UnexpectedCommand(other)),
        };
        finish(r, rsp)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        Self::from_envelope(&Envelope::decode(datagram)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ship_at(x: f32, y: f32, score: u32) -> ShipState {
        ShipState {
            motion: Motion {
                pos: Vec2::new(x, y),
                vel: Vec2::ZERO,
                dir: 0.0,
            },
            score,
        }
    }

    #[test]
    fn test_join_reply_with_roster() {
        let msg = ServerMessage::ReplyPlayerJoin(JoinReply::Accepted {
            slot: 1,
            rejoined: false,
            ship: ShipState::default(),
            next_bullet_id: 200,
            roster: vec![PlayerSnapshot {
                slot: 0,
                ship: ship_at(5.0, 6.0, 100),
            }],
        });
        let frame = msg.to_envelope().unwrap().encode();
        assert_eq!(frame[0], Command::ReplyPlayerJoin.as_byte());
        assert_eq!(ServerMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_rejected_join_is_single_status_byte() {
        let env = ServerMessage::ReplyPlayerJoin(JoinReply::Rejected)
            .to_envelope()
            .unwrap();
        assert_eq!(env.payload(), &[JOIN_FULL]);
    }

    #[test]
    fn test_bad_join_status() {
        let env = Envelope::new(Command::ReplyPlayerJoin, vec![9]).unwrap();
        assert!(matches!(
            ServerMessage::from_envelope(&env),
            Err(DecodeError::Codec(CodecError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_long_player_name_survives() {
        let name = "a player name well beyond twenty bytes".to_string();
        let msg = ClientMessage::PlayerJoin { name: name.clone() };
        let frame = msg.to_envelope().unwrap().encode();
        match ClientMessage::decode(&frame).unwrap() {
            ClientMessage::PlayerJoin { name: decoded } => assert_eq!(decoded, name),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let env = Envelope::new(Command::AsteroidDestroyed, vec![0, 0, 0, 7, 1]).unwrap();
        assert_eq!(
            ClientMessage::from_envelope(&env),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_short_payload_rejected() {
        let env = Envelope::new(Command::BulletCollide, vec![0, 0, 0, 100]).unwrap();
        assert!(matches!(
            ClientMessage::from_envelope(&env),
            Err(DecodeError::Codec(CodecError::OutOfBounds { .. }))
        ));
    }

    #[test]
    fn test_direction_is_enforced() {
        let env = Envelope::empty(Command::GameOver);
        assert_eq!(
            ClientMessage::from_envelope(&env),
            Err(DecodeError::UnexpectedCommand(Command::GameOver))
        );
        let env = Envelope::empty(Command::Heartbeat);
        assert_eq!(
            ServerMessage::from_envelope(&env),
            Err(DecodeError::UnexpectedCommand(Command::Heartbeat))
        );
    }

    #[test]
    fn test_relayed_ship_move_is_byte_identical() {
        let mv = ShipMove {
            slot: 2,
            time_diff: 123_456,
            input: 0b101,
            motion: ship_at(-3.5, 8.25, 0).motion,
        };
        let up = ClientMessage::ShipMove(mv).to_envelope().unwrap();
        let down = ServerMessage::ShipMove(mv).to_envelope().unwrap();
        assert_eq!(up.encode(), down.encode());
    }

    #[test]
    fn test_game_over_without_winner() {
        let msg = ServerMessage::GameOver {
            winner: None,
            name: String::new(),
            score: 0,
        };
        let frame = msg.to_envelope().unwrap().encode();
        assert_eq!(ServerMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_high_scores_use_short_count() {
        let entries = vec![
            HighScoreEntry {
                name: "ada".into(),
                score: 900,
                timestamp: 1_700_000_000,
            },
            HighScoreEntry {
                name: "bob".into(),
                score: 400,
                timestamp: 1_700_000_100,
            },
        ];
        let env = ServerMessage::HighScores(entries.clone()).to_envelope().unwrap();
        assert_eq!(&env.payload()[..2], &[0, 2]);
        assert_eq!(
            ServerMessage::from_envelope(&env).unwrap(),
            ServerMessage::HighScores(entries)
        );
    }

    #[test]
    fn test_huge_list_count_fails_cleanly() {
        let env = Envelope::new(Command::StateUpdate, vec![0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert!(ServerMessage::from_envelope(&env).is_err());
    }

    #[test]
    fn test_transfer_messages() {
        let req = TransferRequest::Download {
            name: "level1.dat".into(),
        };
        let env = req.to_envelope().unwrap();
        assert_eq!(env.command, Command::ReqDownload);
        assert_eq!(TransferRequest::from_envelope(&env).unwrap(), req);

        let rsp = TransferResponse::FileList(vec!["a.txt".into(), "b.bin".into()]);
        let env = rsp.to_envelope().unwrap();
        assert_eq!(TransferResponse::from_envelope(&env).unwrap(), rsp);

        let err = TransferResponse::DownloadError {
            code: download_error::NOT_FOUND,
            message: "no such file".into(),
        };
        let env = err.to_envelope().unwrap();
        assert_eq!(TransferResponse::from_envelope(&env).unwrap(), err);
    }
}
