//! Reliable file download service on its own UDP socket
//!
//! Requests arrive as regular envelopes. Every 8-byte datagram is an
//! acknowledgement and is routed to the task driving that transfer. Each
//! accepted download runs in its own task with a [`SendWindow`]; the service
//! loop owns those tasks and waits for them on shutdown.

use log::{debug, error, info, warn};
use shared::codec::MAX_STR_LEN;
use shared::envelope::{HEADER_LEN, MAX_FRAME_LEN};
use shared::messages::{download_error, TransferRequest, TransferResponse};
use shared::transfer::{
    Ack, DataFrame, SendWindow, TimeoutOutcome, TransferConfig, TransferError, TransferReport,
    MAX_TRANSFER_LEN,
};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Duration};

/// Serves regular files from one directory, never below or above it
#[derive(Debug)]
pub struct FileService {
    root: Option<PathBuf>,
    config: TransferConfig,
    next_session: u32,
}

fn refusal(code: u8, message: impl Into<String>) -> TransferResponse {
    TransferResponse::DownloadError {
        code,
        message: message.into(),
    }
}

impl FileService {
    pub fn new(root: Option<PathBuf>, config: TransferConfig) -> Self {
        Self {
            root,
            config,
            next_session: 1,
        }
    }

    /// File names that fit in one `RSP_LISTFILES`, sorted
    pub fn list(&self) -> io::Result<Vec<String>> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.len() <= MAX_STR_LEN {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        // count field, then u16 length + bytes per name
        let mut room = MAX_FRAME_LEN - HEADER_LEN - 4;
        names.retain(|name| {
            let cost = 2 + name.len();
            if cost > room {
                return false;
            }
            room -= cost;
            true
        });
        Ok(names)
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, TransferResponse> {
        let Some(root) = &self.root else {
            return Err(refusal(download_error::NOT_FOUND, "no files are served"));
        };
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(refusal(download_error::INVALID_NAME, "invalid file name")),
        }
        let path = root.join(name);
        if !path.is_file() {
            return Err(refusal(download_error::NOT_FOUND, format!("{} not found", name)));
        }
        Ok(path)
    }

    /// Reads the file and prepares its transfer, or says why not
    pub fn open(&mut self, name: &str) -> Result<SendWindow, TransferResponse> {
        let path = self.resolve(name)?;
        let data = fs::read(&path).map_err(|e| {
            warn!("Failed to read {}: {}", path.display(), e);
            refusal(download_error::READ_FAILED, "could not read file")
        })?;
        if data.len() as u64 > u64::from(MAX_TRANSFER_LEN) {
            return Err(refusal(download_error::TOO_LARGE, "file too large"));
        }
        let session = self.next_session;
        self.next_session = self.next_session.wrapping_add(1).max(1);
        Ok(SendWindow::new(session, data, self.config))
    }
}

async fn send_response(
    socket: &UdpSocket,
    peer: SocketAddr,
    response: &TransferResponse,
) -> Result<(), TransferError> {
    let frame = response.to_envelope()?.encode();
    socket.send_to(&frame, peer).await?;
    Ok(())
}

async fn send_frames(
    socket: &UdpSocket,
    peer: SocketAddr,
    frames: Vec<DataFrame>,
) -> Result<(), TransferError> {
    for frame in frames {
        send_response(socket, peer, &TransferResponse::FileData(frame)).await?;
    }
    Ok(())
}

/// Drives one transfer to completion, exhaustion or shutdown
///
/// On exhaustion the peer gets a `DOWNLOAD_ERROR` saying how many frames it
/// acknowledged.
pub async fn run_transfer(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    mut window: SendWindow,
    mut acks: mpsc::UnboundedReceiver<Ack>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<TransferReport, TransferError> {
    loop {
        let fresh = window.poll_transmit(Instant::now());
        send_frames(&socket, peer, fresh).await?;
        if window.is_complete() {
            return Ok(window.report());
        }

        let deadline = window
            .deadline()
            .unwrap_or_else(|| Instant::now() + Duration::from_millis(1));
        tokio::select! {
            ack = acks.recv() => match ack {
                Some(ack) => {
                    if let Err(e) = window.on_ack(ack) {
                        debug!("Transfer {}: ignoring ack: {}", window.session(), e);
                    }
                }
                None => return Err(TransferError::Cancelled),
            },
            _ = sleep_until(deadline.into()) => match window.on_timeout(Instant::now()) {
                TimeoutOutcome::Pending => {}
                TimeoutOutcome::Retransmit(frames) => {
                    debug!(
                        "Transfer {}: retransmitting {} frames",
                        window.session(),
                        frames.len()
                    );
                    send_frames(&socket, peer, frames).await?;
                }
                TimeoutOutcome::Abandoned => {
                    let report = window.report();
                    error!(
                        "Transfer {} to {} abandoned with {}/{} frames acknowledged",
                        report.session, peer, report.acked, report.frames
                    );
                    let notice = refusal(
                        download_error::RETRIES_EXHAUSTED,
                        format!("retries exhausted: {}/{} frames acknowledged", report.acked, report.frames),
                    );
                    send_response(&socket, peer, &notice).await?;
                    return Err(window.exhausted_error());
                }
            },
            _ = shutdown.changed() => return Err(TransferError::Cancelled),
        }
    }
}

/// Ack channels of running transfers, each bound to the peer it serves
#[derive(Debug, Default)]
struct AckRoutes {
    routes: HashMap<u32, (SocketAddr, mpsc::UnboundedSender<Ack>)>,
}

impl AckRoutes {
    fn open(&mut self, session: u32, peer: SocketAddr) -> mpsc::UnboundedReceiver<Ack> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(session, (peer, tx));
        rx
    }

    /// Hands `ack` to its transfer if `from` is the peer that transfer serves
    fn route(&self, ack: Ack, from: SocketAddr) -> bool {
        match self.routes.get(&ack.session) {
            Some((peer, tx)) if *peer == from => tx.send(ack).is_ok(),
            Some((peer, _)) => {
                warn!(
                    "Dropping ack for transfer {} from {}, which belongs to {}",
                    ack.session, from, peer
                );
                false
            }
            None => {
                debug!("Ack for finished transfer {} from {}", ack.session, from);
                false
            }
        }
    }

    fn prune(&mut self) {
        self.routes.retain(|_, (_, tx)| !tx.is_closed());
    }
}

/// Serves list and download requests until shutdown, then waits for every
/// running transfer to stop
pub async fn run_file_service(
    socket: Arc<UdpSocket>,
    mut service: FileService,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut transfers = AckRoutes::default();
    let mut tasks = JoinSet::new();
    let mut buffer = [0u8; 2048];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buffer) => match result {
                Ok((len, peer)) => {
                    let datagram = &buffer[..len];
                    if let Some(ack) = Ack::from_bytes(datagram) {
                        transfers.route(ack, peer);
                        continue;
                    }

                    let request = match TransferRequest::decode(datagram) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!("Dropping malformed transfer datagram from {}: {}", peer, e);
                            continue;
                        }
                    };

                    match request {
                        TransferRequest::ListFiles => {
                            let names = service.list().unwrap_or_else(|e| {
                                error!("Failed to list files: {}", e);
                                Vec::new()
                            });
                            if let Err(e) = send_response(&socket, peer, &TransferResponse::FileList(names)).await {
                                error!("Failed to send file list to {}: {}", peer, e);
                            }
                        }
                        TransferRequest::Download { name } => {
                            let window = match service.open(&name) {
                                Ok(window) => window,
                                Err(refused) => {
                                    info!("Refusing download of {:?} by {}", name, peer);
                                    if let Err(e) = send_response(&socket, peer, &refused).await {
                                        error!("Failed to send refusal to {}: {}", peer, e);
                                    }
                                    continue;
                                }
                            };
                            let started = TransferResponse::DownloadStarted {
                                session: window.session(),
                                file_length: window.file_length(),
                                frame_count: window.frame_count(),
                            };
                            if let Err(e) = send_response(&socket, peer, &started).await {
                                error!("Failed to start transfer to {}: {}", peer, e);
                                continue;
                            }
                            info!(
                                "Transfer {}: sending {} ({} bytes) to {}",
                                window.session(), name, window.file_length(), peer
                            );
                            let rx = transfers.open(window.session(), peer);
                            tasks.spawn(run_transfer(
                                Arc::clone(&socket),
                                peer,
                                window,
                                rx,
                                shutdown.clone(),
                            ));
                        }
                    }
                }
                Err(e) => {
                    error!("Error receiving on transfer socket: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                match finished {
                    Ok(Ok(report)) => info!(
                        "Transfer {} complete: {} frames, {} bytes, {} retries",
                        report.session, report.frames, report.bytes, report.retries
                    ),
                    Ok(Err(e)) => warn!("Transfer failed: {}", e),
                    Err(e) => error!("Transfer task panicked: {}", e),
                }
                transfers.prune();
            }
            _ = shutdown.changed() => break,
        }
    }

    while let Some(finished) = tasks.join_next().await {
        if let Err(e) = finished {
            error!("Transfer task panicked: {}", e);
        }
    }
    info!("File service stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("file-service-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_list_and_open() {
        let root = temp_root("list");
        fs::write(root.join("b.txt"), b"bravo").unwrap();
        fs::write(root.join("a.txt"), vec![7u8; 3000]).unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();

        let mut service = FileService::new(Some(root.clone()), TransferConfig::default());
        assert_eq!(service.list().unwrap(), vec!["a.txt", "b.txt"]);

        let window = service.open("a.txt").unwrap();
        assert_eq!(window.file_length(), 3000);
        assert_eq!(window.frame_count(), 3);
        let next = service.open("b.txt").unwrap();
        assert_ne!(next.session(), window.session());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_refuses_unsafe_and_missing_names() {
        let root = temp_root("refuse");
        let mut service = FileService::new(Some(root.clone()), TransferConfig::default());

        for name in ["../secret", "/etc/passwd", "nested/file", "", ".."] {
            match service.open(name) {
                Err(TransferResponse::DownloadError { code, .. }) => {
                    assert_eq!(code, download_error::INVALID_NAME, "{:?}", name)
                }
                other => panic!("{:?} was not refused: {:?}", name, other),
            }
        }
        assert!(matches!(
            service.open("missing.bin"),
            Err(TransferResponse::DownloadError {
                code: download_error::NOT_FOUND,
                ..
            })
        ));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_no_root_serves_nothing() {
        let mut service = FileService::new(None, TransferConfig::default());
        assert!(service.list().unwrap().is_empty());
        assert!(service.open("anything").is_err());
    }

    #[test]
    fn test_acks_only_reach_the_transfer_owner() {
        let owner: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let stranger: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let mut routes = AckRoutes::default();
        let mut acks = routes.open(3, owner);

        assert!(!routes.route(Ack { session: 3, seq: 0 }, stranger));
        assert!(acks.try_recv().is_err());

        assert!(routes.route(Ack { session: 3, seq: 1 }, owner));
        assert_eq!(acks.try_recv().unwrap(), Ack { session: 3, seq: 1 });

        assert!(!routes.route(Ack { session: 4, seq: 0 }, owner));

        drop(acks);
        routes.prune();
        assert!(!routes.route(Ack { session: 3, seq: 2 }, owner));
    }
}
