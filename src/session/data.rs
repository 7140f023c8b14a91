//! Data-channel lifecycle (open/close), `PORT`, and `PASV`. Grounded in
//! spec.md §4.3.4 and §4.3.6.

use super::{DataMode, Session};
use crate::error::{Error, ErrorKind};
use crate::pal::net;
use std::net::{IpAddr, SocketAddr};

impl Session {
    /// Opens the data channel for the currently-armed mode: connects out
    /// for ACTIVE, accepts once (then drops the listener) for PASSIVE.
    pub async fn open_data(&mut self) -> Result<(), Error> {
        match self.data_mode {
            DataMode::Active => {
                let addr = self.data_peer_addr.ok_or_else(|| Error::new(ErrorKind::InvalidParam))?;
                let stream = net::connect_active(addr, self.config.data_connect_timeout)
                    .await
                    .map_err(|e| Error::with_source(ErrorKind::SocketAccept, e))?;
                net::configure_bulk(&stream, self.config.sndbuf, self.config.rcvbuf, self.config.data_linger, self.config.data_timeout)
                    .map_err(|e| Error::with_source(ErrorKind::SocketAccept, e))?;
                self.data_channel = Some(stream);
                Ok(())
            }
            DataMode::Passive => {
                let listener = self.pasv_listener.take().ok_or_else(|| Error::new(ErrorKind::InvalidParam))?;
                let (stream, _peer) = listener.accept().await.map_err(|e| Error::with_source(ErrorKind::SocketAccept, e))?;
                net::configure_bulk(&stream, self.config.sndbuf, self.config.rcvbuf, self.config.data_linger, self.config.data_timeout)
                    .map_err(|e| Error::with_source(ErrorKind::SocketAccept, e))?;
                self.data_channel = Some(stream);
                Ok(())
            }
            DataMode::None => Err(Error::new(ErrorKind::InvalidParam)),
        }
    }

    /// Closes both the data stream and any still-listening passive listener,
    /// resets `data_mode`, and clears the single-shot restart offset.
    pub fn close_data(&mut self) {
        self.data_channel = None;
        self.pasv_listener = None;
        self.data_mode = DataMode::None;
        self.clear_restart_offset();
    }

    /// `PORT h1,h2,h3,h4,p1,p2`: parses six 0-255 decimal numbers, rejects
    /// the command if the composed IP differs from the control-channel
    /// peer's IP (anti-bounce), and arms ACTIVE mode.
    pub fn handle_port(&mut self, arg: &str) -> Result<(), Error> {
        let parts: Vec<&str> = arg.split(',').collect();
        if parts.len() != 6 {
            return Err(Error::new(ErrorKind::InvalidParam));
        }
        let mut nums = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            let v: u16 = part.parse().map_err(|_| Error::new(ErrorKind::InvalidParam))?;
            if v > 255 {
                return Err(Error::new(ErrorKind::InvalidParam));
            }
            nums[i] = v as u8;
        }
        let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
        if ip != self.ctrl_peer.ip() {
            return Err(Error::new(ErrorKind::InvalidParam));
        }
        let port = ((nums[4] as u16) << 8) | nums[5] as u16;
        self.data_peer_addr = Some(SocketAddr::new(ip, port));
        self.data_mode = DataMode::Active;
        Ok(())
    }

    /// `PASV`: binds an ephemeral listener, arms PASSIVE mode, and returns
    /// the address to advertise in the `227` reply.
    pub async fn handle_pasv(&mut self) -> Result<SocketAddr, Error> {
        let local_addr = self.ctrl.get_ref().local_addr().map_err(|e| Error::with_source(ErrorKind::SocketCreate, e))?;
        let advertise_ip = net::advertised_passive_ip(local_addr).await;
        let std_listener = net::bind_passive_listener(advertise_ip).map_err(|e| Error::with_source(ErrorKind::SocketListen, e))?;
        let bound_addr = std_listener.local_addr().map_err(|e| Error::with_source(ErrorKind::SocketListen, e))?;
        let listener = net::into_tokio_listener(std_listener).map_err(|e| Error::with_source(ErrorKind::SocketListen, e))?;
        self.pasv_listener = Some(listener);
        self.data_mode = DataMode::Passive;
        Ok(SocketAddr::new(advertise_ip, bound_addr.port()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufpool::BufferPool;
    use crate::config::Config;
    use crate::session::{AtomicSessionState, SessionStats};
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    async fn session() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_sock, peer) = listener.accept().await.unwrap();
        let config = Arc::new(Config::builder(addr, "/tmp").build());
        let bufpool = Arc::new(BufferPool::new(1, 1024));
        (Session::new(1, server_sock, peer, Arc::new(AtomicSessionState::default()), Arc::new(SessionStats::default()), config, bufpool), client)
    }

    #[tokio::test]
    async fn port_rejects_spoofed_ip() {
        let (mut s, _client) = session().await;
        // ctrl_peer is 127.0.0.1; spoof a different address.
        let err = s.handle_port("10,0,0,2,0,21").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert_eq!(s.data_mode, DataMode::None);
    }

    #[tokio::test]
    async fn port_accepts_matching_peer_ip() {
        let (mut s, _client) = session().await;
        s.handle_port("127,0,0,1,0,21").unwrap();
        assert_eq!(s.data_mode, DataMode::Active);
        assert_eq!(s.data_peer_addr.unwrap().port(), 21);
    }

    #[tokio::test]
    async fn port_rejects_out_of_range_byte() {
        let (mut s, _client) = session().await;
        assert!(s.handle_port("127,0,0,1,999,21").is_err());
    }

    #[tokio::test]
    async fn pasv_arms_passive_mode() {
        let (mut s, _client) = session().await;
        let addr = s.handle_pasv().await.unwrap();
        assert_eq!(s.data_mode, DataMode::Passive);
        assert!(addr.port() > 0);
    }
}
