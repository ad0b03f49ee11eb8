use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use anyhow::Context;
use pigment_contracts::protocol::Frame;
use reqwest::Url;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::HandshakeError;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{client_tls, Message as WsMessage, WebSocket};

use crate::connection::{ConnectError, Connector, FrameChannel, FrameRead};

/// Blocking tungstenite transport; `wss://` goes through rustls.
#[derive(Debug, Clone)]
pub struct WsConnector {
    poll_interval: Duration,
}

impl WsConnector {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        endpoint: &str,
        deadline: Instant,
    ) -> Result<Box<dyn FrameChannel>, ConnectError> {
        let url = Url::parse(endpoint)
            .map_err(|err| ConnectError::Failed(format!("invalid endpoint {endpoint}: {err}")))?;
        let default_port = match url.scheme() {
            "ws" => 80,
            "wss" => 443,
            other => {
                return Err(ConnectError::Failed(format!(
                    "unsupported websocket scheme: {other}"
                )))
            }
        };
        let addrs = url
            .socket_addrs(|| Some(default_port))
            .map_err(|err| ConnectError::Failed(format!("failed to resolve {endpoint}: {err}")))?;

        let stream = connect_before(&addrs, deadline)?;
        let control = stream
            .try_clone()
            .map_err(|err| ConnectError::Failed(format!("failed to clone socket: {err}")))?;
        let request = endpoint
            .into_client_request()
            .map_err(|err| ConnectError::Failed(format!("invalid websocket request: {err}")))?;

        let Some(remaining) = remaining_until(deadline) else {
            abort(&control);
            return Err(ConnectError::Timeout);
        };
        let _ = control.set_read_timeout(Some(remaining));
        let _ = control.set_write_timeout(Some(remaining));

        let mut pending = client_tls(request, stream);
        loop {
            match pending {
                Ok((ws, _response)) => {
                    let _ = control.set_read_timeout(Some(self.poll_interval));
                    let _ = control.set_write_timeout(None);
                    return Ok(Box::new(WsChannel { ws, control }));
                }
                Err(HandshakeError::Interrupted(mid)) => {
                    let Some(remaining) = remaining_until(deadline) else {
                        abort(&control);
                        return Err(ConnectError::Timeout);
                    };
                    let _ = control.set_read_timeout(Some(remaining));
                    pending = mid.handshake();
                }
                Err(HandshakeError::Failure(err)) => {
                    abort(&control);
                    if is_timeout_error(&err) || remaining_until(deadline).is_none() {
                        return Err(ConnectError::Timeout);
                    }
                    return Err(ConnectError::Failed(format!("websocket handshake failed: {err}")));
                }
            }
        }
    }
}

struct WsChannel {
    ws: WebSocket<MaybeTlsStream<TcpStream>>,
    control: TcpStream,
}

impl FrameChannel for WsChannel {
    fn read_frame(&mut self) -> anyhow::Result<FrameRead> {
        match self.ws.read() {
            Ok(WsMessage::Binary(bytes)) => Ok(FrameRead::Frame(Frame::Binary(bytes.to_vec()))),
            Ok(WsMessage::Text(text)) => Ok(FrameRead::Frame(Frame::Text(text.to_string()))),
            Ok(WsMessage::Close(_)) => Ok(FrameRead::Closed),
            Ok(_) => Ok(FrameRead::Idle),
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(FrameRead::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(FrameRead::Closed)
            }
            Err(err) => Err(err).context("websocket read failed"),
        }
    }

    fn close(&mut self) {
        let _ = self.ws.close(None);
        let _ = self.ws.flush();
        abort(&self.control);
    }
}

fn connect_before(addrs: &[SocketAddr], deadline: Instant) -> Result<TcpStream, ConnectError> {
    let mut last_error = None;
    for addr in addrs {
        let Some(remaining) = remaining_until(deadline) else {
            return Err(ConnectError::Timeout);
        };
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(err) if err.kind() == ErrorKind::TimedOut => {
                last_error = Some(ConnectError::Timeout);
            }
            Err(err) => {
                last_error = Some(ConnectError::Failed(format!("connect {addr}: {err}")));
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| ConnectError::Failed("endpoint resolved to no addresses".to_string())))
}

fn remaining_until(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        None
    } else {
        Some(remaining)
    }
}

fn abort(stream: &TcpStream) {
    let _ = stream.shutdown(Shutdown::Both);
}

fn is_timeout_error(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Io(io_err) => is_timeout_kind(io_err),
        _ => false,
    }
}

fn is_timeout_kind(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use anyhow::{anyhow, Result};

    use super::*;

    type ServerSocket = WebSocket<TcpStream>;

    fn serve<F>(script: F) -> Result<(String, thread::JoinHandle<Result<()>>)>
    where
        F: FnOnce(&mut ServerSocket) -> Result<()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let endpoint = format!("ws://{}/ws", listener.local_addr()?);
        let handle = thread::spawn(move || -> Result<()> {
            let (stream, _) = listener.accept()?;
            let mut ws = tungstenite::accept(stream).map_err(|err| anyhow!("accept: {err}"))?;
            script(&mut ws)?;
            let _ = ws.close(None);
            while ws.read().is_ok() {}
            Ok(())
        });
        Ok((endpoint, handle))
    }

    fn read_until_closed(channel: &mut dyn FrameChannel) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for _ in 0..200 {
            match channel.read_frame()? {
                FrameRead::Frame(frame) => frames.push(frame),
                FrameRead::Idle => continue,
                FrameRead::Closed => return Ok(frames),
            }
        }
        Err(anyhow!("channel never closed; got {} frames", frames.len()))
    }

    #[test]
    fn delivers_text_and_binary_frames_in_order() -> Result<()> {
        let (endpoint, server) = serve(|ws| {
            ws.send(WsMessage::Text(
                r#"{"type":"progress","data":{"value":1,"max":2}}"#.into(),
            ))?;
            ws.send(WsMessage::Binary(vec![0, 0, 0, 1, 0, 0, 0, 2, 7, 7, 7].into()))?;
            ws.send(WsMessage::Text(
                r#"{"type":"executing","data":{"node":null}}"#.into(),
            ))?;
            Ok(())
        })?;

        let connector = WsConnector::new(Duration::from_millis(50));
        let mut channel = connector
            .connect(&endpoint, Instant::now() + Duration::from_secs(5))
            .map_err(|err| anyhow!("{err}"))?;
        let frames = read_until_closed(channel.as_mut())?;
        channel.close();
        server.join().map_err(|_| anyhow!("server panicked"))??;

        assert_eq!(
            frames,
            vec![
                Frame::Text(r#"{"type":"progress","data":{"value":1,"max":2}}"#.to_string()),
                Frame::Binary(vec![0, 0, 0, 1, 0, 0, 0, 2, 7, 7, 7]),
                Frame::Text(r#"{"type":"executing","data":{"node":null}}"#.to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn silent_server_times_out_the_handshake() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let endpoint = format!("ws://{}/ws", listener.local_addr()?);
        let holder = thread::spawn(move || {
            let held = listener.accept();
            thread::sleep(Duration::from_millis(800));
            drop(held);
        });

        let connector = WsConnector::new(Duration::from_millis(50));
        let started = Instant::now();
        let result = connector.connect(&endpoint, Instant::now() + Duration::from_millis(200));

        assert!(matches!(result, Err(ConnectError::Timeout)));
        assert!(started.elapsed() < Duration::from_millis(750));
        let _ = holder.join();
        Ok(())
    }

    #[test]
    fn refused_endpoint_fails_without_timeout() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let endpoint = format!("ws://{}/ws", listener.local_addr()?);
        drop(listener);

        let connector = WsConnector::new(Duration::from_millis(50));
        let result = connector.connect(&endpoint, Instant::now() + Duration::from_secs(2));
        assert!(matches!(result, Err(ConnectError::Failed(_))));
        Ok(())
    }

    #[test]
    fn non_websocket_scheme_is_rejected_up_front() {
        let connector = WsConnector::new(Duration::from_millis(50));
        let result = connector.connect(
            "http://127.0.0.1:1/ws",
            Instant::now() + Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ConnectError::Failed(ref reason)) if reason.contains("unsupported")));
    }
}
