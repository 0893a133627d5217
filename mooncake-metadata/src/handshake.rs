//! RDMA connection handshake (spec §4.4): active side dials the passive
//! side's TCP listener, both exchange a `HandshakeDesc` and tune the QP to
//! RTR/RTS locally. Wire protocol is length-prefixed JSON: an 8-byte
//! little-endian length followed by the UTF-8 body.

use mooncake_common::{EngineError, NicPath, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Per-QP connection parameters exchanged by both sides of a handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QpExchange {
    pub qp_num: u32,
    pub lid: u16,
    pub gid: [u8; 16],
}

/// Body of the handshake frame. The active side sends its local NIC path,
/// the peer NIC path it is dialing, and one `QpExchange` per QP; the passive
/// side replies with the same shape carrying its own parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeDesc {
    pub local_nic_path: String,
    pub peer_nic_path: String,
    pub qps: Vec<QpExchange>,
}

impl HandshakeDesc {
    pub fn new(local: &NicPath, peer: &NicPath, qps: Vec<QpExchange>) -> Self {
        HandshakeDesc {
            local_nic_path: local.as_str().to_string(),
            peer_nic_path: peer.as_str().to_string(),
            qps,
        }
    }
}

/// Writes one length-prefixed JSON frame: 8-byte LE length, then body.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, desc: &HandshakeDesc) -> Result<()> {
    let body = serde_json::to_vec(desc)?;
    writer.write_all(&(body.len() as u64).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed JSON frame. `max_len` bounds the length prefix
/// against a misbehaving or garbled peer.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R, max_len: u64) -> Result<HandshakeDesc> {
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf).await?;
    let len = u64::from_le_bytes(len_buf);
    if len > max_len {
        return Err(EngineError::HandshakeFailed(
            "peer".to_string(),
            format!("frame length {len} exceeds limit {max_len}"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let desc: HandshakeDesc = serde_json::from_slice(&body)?;
    Ok(desc)
}

const MAX_FRAME_LEN: u64 = 1 << 20;

/// Active side of the handshake (spec §4.4): dial `addr`, send our side of
/// the exchange, and return what the passive side sent back.
pub async fn connect_and_handshake(addr: &str, desc: &HandshakeDesc) -> Result<HandshakeDesc> {
    let mut stream = TcpStream::connect(addr).await.map_err(|e| {
        EngineError::HandshakeFailed(desc.peer_nic_path.clone(), e.to_string())
    })?;
    write_frame(&mut stream, desc).await?;
    read_frame(&mut stream, MAX_FRAME_LEN).await
}

/// Passive side: binds `addr`, accepts a single connection, reads the
/// active side's descriptor, and hands it to `respond` to build the reply.
pub async fn listen_and_respond<F>(addr: &str, respond: F) -> Result<()>
where
    F: FnOnce(&HandshakeDesc) -> HandshakeDesc,
{
    let listener = TcpListener::bind(addr).await?;
    let (mut stream, _) = listener.accept().await?;
    let incoming = read_frame(&mut stream, MAX_FRAME_LEN).await?;
    let reply = respond(&incoming);
    write_frame(&mut stream, &reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_desc(tag: &str) -> HandshakeDesc {
        HandshakeDesc {
            local_nic_path: format!("{tag}@mlx5_0"),
            peer_nic_path: "peer@mlx5_0".to_string(),
            qps: vec![QpExchange { qp_num: 42, lid: 7, gid: [0; 16] }],
        }
    }

    #[tokio::test]
    async fn frame_round_trips_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let sent = sample_desc("local");
        write_frame(&mut a, &sent).await.unwrap();
        let got = read_frame(&mut b, MAX_FRAME_LEN).await.unwrap();
        assert_eq!(got.local_nic_path, sent.local_nic_path);
        assert_eq!(got.qps[0].qp_num, 42);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        a.write_all(&(100u64).to_le_bytes()).await.unwrap();
        drop(a);
        let err = read_frame(&mut b, 10).await.unwrap_err();
        assert!(matches!(err, EngineError::HandshakeFailed(_, _)));
    }

    #[tokio::test]
    async fn active_and_passive_exchange_over_loopback() {
        let listener_desc = sample_desc("passive");
        let server = tokio::spawn(async move {
            listen_and_respond("127.0.0.1:18791", move |incoming| {
                assert_eq!(incoming.local_nic_path, "active@mlx5_0");
                listener_desc.clone()
            })
            .await
            .unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let reply = connect_and_handshake("127.0.0.1:18791", &sample_desc("active")).await.unwrap();
        assert_eq!(reply.local_nic_path, "passive@mlx5_0");
        server.await.unwrap();
    }
}
