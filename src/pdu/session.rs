// PDUとのセッション
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::connection_settings::{ConnectionTarget, Timeouts};
use crate::error::{Error, Result};
use crate::pdu::line::LineReader;
use crate::pdu::parser::{self, strip_prompt};
use crate::pdu::{Ack, Command, Connector, Received, UsageReading, receive, send};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// セッションの状態
///
/// Disconnected -> Connecting -> Connected -> (Reading | Resetting) -> Connected -> Disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
    Resetting,
}

// 取り交わしの失敗
enum Failure {
    Io(std::io::Error),
    Protocol(String),
}

/// 1台のPDUとの接続
///
/// 取り交わしが`Protocol`か`Timeout`で失敗したら相手の状態が分からないので
/// その場で切断する。以後の操作は`NotConnected`になる。
#[derive(Debug)]
pub struct Session<S> {
    stream: Option<S>,
    reader: LineReader,
    state: SessionState,
    endpoint: String,
    read_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// 接続する
    pub async fn connect<C>(
        connector: &mut C,
        target: &ConnectionTarget,
        timeouts: &Timeouts,
    ) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        tracing::debug!(state = ?SessionState::Connecting, "connecting to {target}");
        match connector.connect(target, timeouts.connect).await {
            Ok(stream) => {
                tracing::debug!(state = ?SessionState::Connected, "connected to {target}");
                Ok(Self::from_stream(stream, target.endpoint(), timeouts.read))
            }
            Err(e) => {
                tracing::debug!(state = ?SessionState::Disconnected, "{e}");
                Err(e)
            }
        }
    }

    /// 接続済みの通信路からセッションを作る
    pub fn from_stream(stream: S, endpoint: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            reader: LineReader::new(),
            state: SessionState::Connected,
            endpoint: endpoint.into(),
            read_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 現在の電力(kW)を得る
    pub async fn read_usage(&mut self) -> Result<UsageReading> {
        let line = self
            .exchange(SessionState::Reading, Command::ShowPower)
            .await?;
        let parsed = parser::parse_usage(&line);
        self.settle(parsed).await
    }

    /// 積算電力量カウンタをリセットする
    pub async fn reset_counter(&mut self) -> Result<Ack> {
        let line = self
            .exchange(SessionState::Resetting, Command::ResetCounter)
            .await?;
        let parsed = parser::parse_ack(&line);
        self.settle(parsed).await
    }

    /// 切断する。何度呼んでもよい
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("shutdown {}: {e}", self.endpoint);
            }
            tracing::debug!(state = ?SessionState::Disconnected, "disconnected from {}", self.endpoint);
        }
        self.state = SessionState::Disconnected;
    }

    // コマンドを送って応答行を得る
    async fn exchange(&mut self, busy: SessionState, command: Command) -> Result<String> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::NotConnected {
                endpoint: self.endpoint.clone(),
            });
        };
        self.state = busy;
        tracing::debug!(state = ?busy, "{command}");

        // 送信から応答行の受信までをひとつの期限で区切る
        // 遠い期限でも溢れない
        let outcome = timeout(self.read_timeout, transact(stream, &mut self.reader, command)).await;
        let error = match outcome {
            Ok(Ok(line)) => return Ok(line),
            Ok(Err(Failure::Io(source))) => Error::Connection {
                endpoint: self.endpoint.clone(),
                source,
            },
            Ok(Err(Failure::Protocol(reason))) => Error::Protocol {
                endpoint: self.endpoint.clone(),
                reason,
            },
            Err(_elapsed) => Error::Timeout {
                endpoint: self.endpoint.clone(),
                command: command.to_string(),
            },
        };
        self.abort(&error).await;
        Err(error)
    }

    // 応答の解析結果で状態を決める
    async fn settle<T>(&mut self, parsed: std::result::Result<T, String>) -> Result<T> {
        match parsed {
            Ok(v) => {
                self.state = SessionState::Connected;
                Ok(v)
            }
            Err(reason) => {
                let error = Error::Protocol {
                    endpoint: self.endpoint.clone(),
                    reason,
                };
                self.abort(&error).await;
                Err(error)
            }
        }
    }

    async fn abort(&mut self, error: &Error) {
        tracing::warn!("{error}, closing the session");
        self.close().await;
    }
}

// 送信して、エコーバックを読み飛ばした最初の行を返す
async fn transact<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    reader: &mut LineReader,
    command: Command,
) -> std::result::Result<String, Failure> {
    send(stream, &command.to_line()).await.map_err(Failure::Io)?;
    loop {
        match receive(stream, reader).await.map_err(Failure::Io)? {
            Received::Line(line) if strip_prompt(&line) == command.as_str() => {
                tracing::trace!("echo back skipped");
            }
            Received::Line(line) => return Ok(line),
            Received::Closed { partial: true } => {
                return Err(Failure::Protocol(
                    "connection closed before line terminator".to_string(),
                ));
            }
            Received::Closed { partial: false } => {
                return Err(Failure::Protocol("connection closed without reply".to_string()));
            }
            Received::TooLong(e) => return Err(Failure::Protocol(e.to_string())),
        }
    }
}

#[cfg(test)]
const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(test)]
fn session_replying(reply: &[u8]) -> Session<tokio::io::DuplexStream> {
    Session::from_stream(
        crate::pdu::fake_device::scripted(reply.to_vec()),
        "pdu:23",
        READ_TIMEOUT,
    )
}

#[tokio::test]
async fn test_read_usage() {
    let mut session = session_replying(b"1.250 kW\n");
    assert_eq!(session.read_usage().await.unwrap().kw(), rust_decimal::dec!(1.25));
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_read_usage_sends_command() {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let (client, server) = tokio::io::duplex(256);
    let device = tokio::spawn(async move {
        let mut lines = BufReader::new(server);
        let mut command = String::new();
        lines.read_line(&mut command).await.unwrap();
        lines.get_mut().write_all(b"> 0.75 kW\r\n").await.unwrap();
        command
    });
    let mut session = Session::from_stream(client, "pdu:23", READ_TIMEOUT);
    assert_eq!(session.read_usage().await.unwrap().kw(), rust_decimal::dec!(0.75));
    assert_eq!(device.await.unwrap(), "linesensor 1 9 value show\n");
}

#[tokio::test]
async fn test_echo_back_is_skipped() {
    let mut session = session_replying(b"linesensor 1 9 value show\r\n> 2 kW\r\n");
    assert_eq!(session.read_usage().await.unwrap().kw(), rust_decimal::dec!(2));
}

#[tokio::test]
async fn test_malformed_reply_closes_session() {
    for reply in [&b"abc\r\n"[..], b"\r\n", b"> \r\n", b"1.25 kW extra\r\n"] {
        let mut session = session_replying(reply);
        let result = session.read_usage().await;
        assert!(
            matches!(result, Err(Error::Protocol { .. })),
            "{:?} -> {:?}",
            reply,
            result
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        // 再利用しない
        assert!(matches!(
            session.read_usage().await,
            Err(Error::NotConnected { .. })
        ));
    }
}

#[tokio::test]
async fn test_closed_before_terminator() {
    use tokio::io::AsyncReadExt;

    let (client, mut server) = tokio::io::duplex(256);
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let _ = server.read(&mut buf).await;
        let _ = server.write_all(b"1.2").await;
    });
    let mut session = Session::from_stream(client, "pdu:23", READ_TIMEOUT);
    assert!(matches!(
        session.read_usage().await,
        Err(Error::Protocol { .. })
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out() {
    use tokio::time::Instant;

    let mut session =
        Session::from_stream(crate::pdu::fake_device::silent(), "pdu:23", READ_TIMEOUT);
    let started = Instant::now();
    let result = session.read_usage().await;
    assert!(matches!(result, Err(Error::Timeout { .. })), "{:?}", result);
    assert!(started.elapsed() >= READ_TIMEOUT);
    assert!(started.elapsed() < READ_TIMEOUT * 2);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_missing_terminator_times_out() {
    let mut session = session_replying(b"1.250 kW");
    assert!(matches!(
        session.read_usage().await,
        Err(Error::Timeout { .. })
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reset_times_out() {
    let mut session =
        Session::from_stream(crate::pdu::fake_device::silent(), "pdu:23", READ_TIMEOUT);
    assert!(matches!(
        session.reset_counter().await,
        Err(Error::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_far_future_read_timeout() {
    // 現在時刻に足すと溢れる待ち時間
    let read_timeout = Duration::from_secs_f64(1e19);
    let mut session = Session::from_stream(
        crate::pdu::fake_device::scripted(b"1.5 kW\r\n".to_vec()),
        "pdu:23",
        read_timeout,
    );
    assert_eq!(session.read_usage().await.unwrap().kw(), rust_decimal::dec!(1.5));
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_reset_rejected() {
    let mut session = session_replying(b"Invalid command\r\n");
    assert!(matches!(
        session.reset_counter().await,
        Err(Error::Protocol { .. })
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let mut session = session_replying(b"1 kW\r\n");
    session.close().await;
    session.close().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(
        session.reset_counter().await,
        Err(Error::NotConnected { .. })
    ));
}

#[tokio::test]
async fn test_connect_failure() {
    let mut connector = crate::pdu::fake_device::ScriptedConnector::refusing();
    let target = ConnectionTarget {
        interface: None,
        host: "pdu".to_string(),
        port: 23,
    };
    let result = Session::connect(&mut connector, &target, &Timeouts::default()).await;
    assert!(matches!(result, Err(Error::Connection { .. })));
    assert_eq!(connector.attempts, 1);
}

#[tokio::test]
async fn test_reset_then_read_on_fake_pdu() {
    use rust_decimal::dec;

    let addr = crate::pdu::fake_device::spawn_fake_pdu(dec!(1.250)).await;
    let target = ConnectionTarget {
        interface: None,
        host: addr.ip().to_string(),
        port: addr.port(),
    };
    let mut connector = crate::pdu::TcpConnector;
    let mut session = Session::connect(&mut connector, &target, &Timeouts::default())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.read_usage().await.unwrap().kw(), dec!(1.25));
    assert_eq!(session.reset_counter().await.unwrap(), Ack("OK.".to_string()));
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.read_usage().await.unwrap().kw(), dec!(0));
    session.close().await;
    assert_eq!(session.state(), SessionState::Disconnected);
}
