//! Control-channel read/write: the bounded CRLF-delimited line reader and
//! the reply writer, with transparent ChaCha20 encryption applied above the
//! socket when the cipher is active (spec.md §4.3.1, §4.3.2, §9's "keep the
//! XOR a transparent wrapper on the I/O side of SESSION").

use super::Session;
use crate::error::{Error, ErrorKind};
use crate::proto::Reply;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

impl Session {
    /// Reads one CRLF-delimited line, one byte at a time, into a buffer
    /// bounded by `config.cmd_buffer_len`. Returns `Ok(None)` on peer close
    /// (a zero-byte read).
    pub async fn read_line(&mut self) -> Result<Option<String>, Error> {
        let mut buf: Vec<u8> = Vec::with_capacity(64);
        let mut byte = [0u8; 1];
        loop {
            let n = loop {
                match self.ctrl.read(&mut byte).await {
                    Ok(n) => break n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::with_source(ErrorKind::SocketRecv, e)),
                }
            };
            if n == 0 {
                return Ok(None);
            }
            if self.crypto.is_active() {
                self.crypto.xor(&mut byte);
            }
            if byte[0] == b'\n' && buf.last() == Some(&b'\r') {
                buf.pop();
                return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
            }
            buf.push(byte[0]);
            if buf.len() >= self.config.cmd_buffer_len {
                return Err(Error::new(ErrorKind::Protocol));
            }
        }
    }

    /// Sends a reply. Short writes are fatal per spec.md §4.3.2; `write_all`
    /// already treats any write error (including a short write that can't
    /// make progress) as fatal. Encrypts first when the cipher is active.
    pub async fn send_reply(&mut self, reply: &Reply) -> Result<(), Error> {
        let mut bytes = reply.to_wire();
        if self.crypto.is_active() {
            self.crypto.xor(&mut bytes);
        }
        self.ctrl.write_all(&bytes).await.map_err(|e| Error::with_source(ErrorKind::SocketSend, e))?;
        self.ctrl.flush().await.map_err(|e| Error::with_source(ErrorKind::SocketSend, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufpool::BufferPool;
    use crate::config::Config;
    use crate::proto::ReplyCode;
    use crate::session::{AtomicSessionState, SessionStats};
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    async fn session_pair() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_sock, peer) = listener.accept().await.unwrap();
        let config = Arc::new(Config::builder(addr, "/tmp").build());
        let bufpool = Arc::new(BufferPool::new(1, 1024));
        let session = Session::new(1, server_sock, peer, Arc::new(AtomicSessionState::default()), Arc::new(SessionStats::default()), config, bufpool);
        (session, client)
    }

    #[tokio::test]
    async fn reads_crlf_delimited_line() {
        let (mut session, mut client) = session_pair().await;
        client.write_all(b"NOOP\r\n").await.unwrap();
        let line = session.read_line().await.unwrap().unwrap();
        assert_eq!(line, "NOOP");
    }

    #[tokio::test]
    async fn peer_close_yields_none() {
        let (mut session, client) = session_pair().await;
        drop(client);
        assert!(session.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_line_without_crlf_fails_protocol() {
        let (mut session, mut client) = session_pair().await;
        session.config = Arc::new(Config::builder(session.config.bind_addr, "/tmp").cmd_buffer_len(8).build());
        client.write_all(b"TOOLONGLINE").await.unwrap();
        let err = session.read_line().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn reply_round_trips_through_cipher() {
        let (mut session, mut client) = session_pair().await;
        let key = [9u8; 32];
        let nonce = [1u8; 12];
        session.crypto.init(&key, &nonce);
        session.send_reply(&Reply::new(ReplyCode::CommandOk, "ok")).await.unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        let mut decrypt = crate::crypto::ChaCha20::new();
        decrypt.init(&key, &nonce);
        decrypt.xor(&mut buf[..n]);
        assert_eq!(&buf[..n], b"200 ok\r\n");
    }
}
