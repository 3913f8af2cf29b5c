use shared::MAX_ASTEROIDS;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Everything `Server::bind` needs; the binary builds it from its arguments
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub game_addr: SocketAddr,
    /// `None` disables the file service
    pub transfer_addr: Option<SocketAddr>,
    /// Broadcaster flush period
    pub tick: Duration,
    pub wave_interval: Duration,
    pub state_update_interval: Duration,
    pub client_timeout: Duration,
    pub asteroid_capacity: usize,
    /// `None` keeps high scores in memory only
    pub highscores: Option<PathBuf>,
    /// Directory served by the file service
    pub files_dir: Option<PathBuf>,
    /// Probability of dropping an inbound game datagram, for exercising loss
    pub loss_rate: f64,
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            game_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            transfer_addr: None,
            tick: Duration::from_millis(5),
            wave_interval: Duration::from_secs(4),
            state_update_interval: Duration::from_millis(100),
            client_timeout: Duration::from_secs(10),
            asteroid_capacity: MAX_ASTEROIDS,
            highscores: None,
            files_dir: None,
            loss_rate: 0.0,
            seed: 0,
        }
    }
}
