use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::connector::{ConnectionState, WsConnection};
use crate::error::{DerivError, DerivResult};

/// What one poll of the socket produced.
#[derive(Debug)]
enum Inbound {
    Text(String),
    Skip,
    Invalid(String),
    Closed(String),
    Failed(WsError),
}

fn classify(frame: Option<Result<Message, WsError>>) -> Inbound {
    match frame {
        Some(Ok(Message::Text(text))) => Inbound::Text(text.to_string()),
        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Inbound::Text(text),
            Err(_) => Inbound::Invalid(format!(
                "binary frame of {} bytes is not UTF-8",
                data.len()
            )),
        },
        Some(Ok(Message::Close(frame))) => Inbound::Closed(match frame {
            Some(frame) => format!("peer closed the connection ({} {})", frame.code, frame.reason),
            None => "peer closed the connection".to_string(),
        }),
        // tungstenite queues the pong itself
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Inbound::Skip,
        Some(Err(err)) => Inbound::Failed(err),
        None => Inbound::Closed("connection stream ended".to_string()),
    }
}

/// Resolves once the connection leaves the `Open` state.
async fn left_open(mut state: watch::Receiver<ConnectionState>) {
    loop {
        if *state.borrow_and_update() != ConnectionState::Open {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

impl WsConnection {
    pub(crate) async fn read_text(&self) -> DerivResult<String> {
        let mut ws_read = self.reader.lock().await;

        let closed = left_open(self.state.subscribe());
        tokio::pin!(closed);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            let Some(stream) = ws_read.as_mut() else {
                return Err(DerivError::Connection("socket is not open".to_string()));
            };

            let inbound = tokio::select! {
                biased;

                () = &mut closed => {
                    Inbound::Closed("connection closed while waiting for a frame".to_string())
                }
                frame = stream.next() => classify(frame),
                () = &mut deadline => {
                    return Err(DerivError::Timeout {
                        task: "receive_text".to_string(),
                        duration: self.timeout,
                    });
                }
            };

            match inbound {
                Inbound::Text(text) => {
                    tracing::debug!("Text message: {}", text);
                    return Ok(text);
                }
                Inbound::Skip => continue,
                Inbound::Invalid(reason) => return Err(DerivError::Protocol(reason)),
                Inbound::Closed(reason) => {
                    tracing::warn!("Connection closed: {}", reason);
                    ws_read.take();
                    self.release_writer().await;
                    return Err(DerivError::Connection(reason));
                }
                Inbound::Failed(err) => {
                    tracing::error!("Error reading message: {}", err);
                    ws_read.take();
                    self.release_writer().await;
                    return Err(err.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Connector;
    use crate::settings::ClientConfig;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Bytes;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_text_and_utf8_binary_frames_are_text() {
        let frame = Some(Ok(Message::text(r#"{"ping":"pong"}"#)));
        assert!(matches!(classify(frame), Inbound::Text(text) if text == r#"{"ping":"pong"}"#));

        let frame = Some(Ok(Message::Binary(Bytes::from_static(b"{}"))));
        assert!(matches!(classify(frame), Inbound::Text(text) if text == "{}"));
    }

    #[test]
    fn test_non_utf8_binary_frame_is_invalid() {
        let frame = Some(Ok(Message::Binary(Bytes::from_static(&[0xff, 0xfe]))));
        assert!(matches!(classify(frame), Inbound::Invalid(_)));
    }

    #[test]
    fn test_control_frames_are_skipped() {
        assert!(matches!(
            classify(Some(Ok(Message::Ping(Bytes::new())))),
            Inbound::Skip
        ));
        assert!(matches!(
            classify(Some(Ok(Message::Pong(Bytes::new())))),
            Inbound::Skip
        ));
    }

    #[test]
    fn test_close_and_end_of_stream_are_closed() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        };
        let inbound = classify(Some(Ok(Message::Close(Some(frame)))));
        assert!(matches!(inbound, Inbound::Closed(reason) if reason.contains("maintenance")));
        assert!(matches!(classify(None), Inbound::Closed(_)));
    }

    #[tokio::test]
    async fn test_peer_close_releases_both_halves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket.close(None).await.unwrap();
            // keep the TCP side up until the client lets go
            while socket.next().await.is_some() {}
        });

        let config = ClientConfig::new("1089")
            .with_endpoint(format!("ws://{addr}/websockets/v3"))
            .with_timeout_secs(2.0);
        let connection = WsConnection::new(&config);
        connection.open().await.unwrap();

        let err = connection.read_text().await.unwrap_err();

        assert!(err.is_connection());
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.writer.lock().await.is_none());
        assert!(connection.reader.lock().await.is_none());
        connection.close(1000, "done").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_without_socket_fails() {
        let connection = WsConnection::new(&ClientConfig::new("1089"));

        let err = connection.read_text().await.unwrap_err();
        assert!(err.is_connection());
    }
}
