//! File listing and reliable download against the server's transfer socket

use log::{debug, info, warn};
use shared::messages::{TransferRequest, TransferResponse};
use shared::transfer::{ReceiveBuffer, TransferError};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

/// Longest silence from the sender before a download is given up
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// A finished download
#[derive(Debug)]
pub struct Download {
    pub session: u32,
    pub data: Vec<u8>,
}

async fn request(
    socket: &UdpSocket,
    server: SocketAddr,
    req: &TransferRequest,
) -> Result<(), TransferError> {
    let frame = req.to_envelope()?.encode();
    socket.send_to(&frame, server).await?;
    Ok(())
}

/// Waits for the next response from `server`, ignoring anyone else
async fn next_response(
    socket: &UdpSocket,
    server: SocketAddr,
    idle: Duration,
) -> Result<TransferResponse, TransferError> {
    let mut buffer = [0u8; 2048];
    loop {
        let (len, from) = timeout(idle, socket.recv_from(&mut buffer))
            .await
            .map_err(|_| TransferError::TimedOut(idle))??;
        if from != server {
            debug!("Ignoring datagram from {}", from);
            continue;
        }
        match TransferResponse::decode(&buffer[..len]) {
            Ok(response) => return Ok(response),
            Err(e) => warn!("Dropping malformed transfer datagram: {}", e),
        }
    }
}

fn rejected(code: u8, message: String) -> TransferError {
    TransferError::Rejected { code, message }
}

pub async fn list_files(socket: &UdpSocket, server: SocketAddr) -> Result<Vec<String>, TransferError> {
    request(socket, server, &TransferRequest::ListFiles).await?;
    loop {
        match next_response(socket, server, IDLE_TIMEOUT).await? {
            TransferResponse::FileList(names) => return Ok(names),
            TransferResponse::DownloadError { code, message } => return Err(rejected(code, message)),
            other => debug!("Ignoring {:?} while waiting for a file list", other),
        }
    }
}

/// Downloads `name`, acknowledging every frame including duplicates
///
/// Completes once every frame has arrived. A `DOWNLOAD_ERROR` from the
/// sender, or `idle` without any traffic, ends the download with an error.
pub async fn download(
    socket: &UdpSocket,
    server: SocketAddr,
    name: &str,
    idle: Duration,
) -> Result<Download, TransferError> {
    request(
        socket,
        server,
        &TransferRequest::Download {
            name: name.to_string(),
        },
    )
    .await?;

    let (session, mut buffer) = loop {
        match next_response(socket, server, idle).await? {
            TransferResponse::DownloadStarted {
                session,
                file_length,
                frame_count,
            } => {
                info!(
                    "Transfer {}: receiving {} ({} bytes in {} frames)",
                    session, name, file_length, frame_count
                );
                break (session, ReceiveBuffer::new(session, file_length, frame_count)?);
            }
            TransferResponse::DownloadError { code, message } => return Err(rejected(code, message)),
            other => debug!("Ignoring {:?} before the transfer started", other),
        }
    };

    while !buffer.is_complete() {
        match next_response(socket, server, idle).await? {
            TransferResponse::FileData(frame) => match buffer.accept(&frame) {
                Ok(ack) => {
                    socket.send_to(&ack.to_bytes(), server).await?;
                }
                Err(e) => debug!("Transfer {}: dropping frame: {}", session, e),
            },
            TransferResponse::DownloadError { code, message } => return Err(rejected(code, message)),
            other => debug!("Ignoring {:?} during transfer {}", other, session),
        }
    }

    info!(
        "Transfer {}: complete after {} frames",
        session,
        buffer.received_frames()
    );
    Ok(Download {
        session,
        data: buffer.into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::messages::download_error;
    use shared::transfer::{Ack, DataFrame};

    async fn pair() -> (UdpSocket, UdpSocket, SocketAddr) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        (server, client, server_addr)
    }

    async fn reply(server: &UdpSocket, to: SocketAddr, response: TransferResponse) {
        let frame = response.to_envelope().unwrap().encode();
        server.send_to(&frame, to).await.unwrap();
    }

    #[tokio::test]
    async fn test_download_acks_duplicates_and_reassembles() {
        let (server, client, server_addr) = pair().await;
        let client_addr = client.local_addr().unwrap();

        let fake_sender = async {
            let mut buf = [0u8; 2048];
            let (len, _) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(
                TransferRequest::decode(&buf[..len]).unwrap(),
                TransferRequest::Download {
                    name: "letters.txt".into()
                }
            );

            reply(
                &server,
                client_addr,
                TransferResponse::DownloadStarted {
                    session: 9,
                    file_length: 1027,
                    frame_count: 2,
                },
            )
            .await;
            let head = DataFrame {
                session: 9,
                seq: 0,
                file_length: 1027,
                offset: 0,
                data: vec![b'a'; 1024],
            };
            let tail = DataFrame {
                seq: 1,
                offset: 1024,
                data: b"def".to_vec(),
                ..head.clone()
            };
            let frames = [tail.clone(), tail, head];
            for frame in frames {
                reply(&server, client_addr, TransferResponse::FileData(frame)).await;
            }

            let mut acks = Vec::new();
            for _ in 0..3 {
                let (len, _) = server.recv_from(&mut buf).await.unwrap();
                acks.push(Ack::from_bytes(&buf[..len]).unwrap().seq);
            }
            acks
        };

        let (result, acks) = tokio::join!(
            download(&client, server_addr, "letters.txt", Duration::from_secs(2)),
            fake_sender
        );
        let done = result.unwrap();
        assert_eq!(done.session, 9);
        assert_eq!(done.data.len(), 1027);
        assert!(done.data[..1024].iter().all(|&b| b == b'a'));
        assert_eq!(&done.data[1024..], b"def");
        assert_eq!(acks, vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn test_inconsistent_header_is_refused() {
        let (server, client, server_addr) = pair().await;
        let client_addr = client.local_addr().unwrap();

        let lying_sender = async {
            let mut buf = [0u8; 2048];
            server.recv_from(&mut buf).await.unwrap();
            reply(
                &server,
                client_addr,
                TransferResponse::DownloadStarted {
                    session: 4,
                    file_length: 4096,
                    frame_count: 1,
                },
            )
            .await;
        };
        let (result, ()) = tokio::join!(
            download(&client, server_addr, "big.bin", Duration::from_secs(2)),
            lying_sender
        );
        assert!(matches!(
            result,
            Err(TransferError::FrameCountMismatch {
                declared: 1,
                expected: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_download_error_is_reported() {
        let (server, client, server_addr) = pair().await;
        let client_addr = client.local_addr().unwrap();

        let refuse = async {
            let mut buf = [0u8; 2048];
            server.recv_from(&mut buf).await.unwrap();
            reply(
                &server,
                client_addr,
                TransferResponse::DownloadError {
                    code: download_error::NOT_FOUND,
                    message: "missing.bin not found".into(),
                },
            )
            .await;
        };
        let (result, ()) = tokio::join!(
            download(&client, server_addr, "missing.bin", Duration::from_secs(2)),
            refuse
        );
        assert!(matches!(
            result,
            Err(TransferError::Rejected {
                code: download_error::NOT_FOUND,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (_server, client, server_addr) = pair().await;
        let result = download(&client, server_addr, "x", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransferError::TimedOut(_))));
    }
}
