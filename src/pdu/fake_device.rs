// 試験用の偽PDU
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::connection_settings::ConnectionTarget;
use crate::error::{Error, Result};
use crate::pdu::{Command, Connector};
use rust_decimal::Decimal;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;

/// コマンドを1つ受けたら決まった応答を返す通信路
pub(crate) fn scripted(reply: Vec<u8>) -> DuplexStream {
    let (client, mut server) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        match server.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if server.write_all(&reply).await.is_err() {
            return;
        }
        // 相手が閉じるまで開けておく
        while let Ok(n) = server.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });
    client
}

/// 何も返さない通信路
pub(crate) fn silent() -> DuplexStream {
    scripted(Vec::new())
}

/// 接続ごとに同じ応答を返す
#[derive(Debug, Default)]
pub(crate) struct ScriptedConnector {
    /// Noneなら接続拒否
    pub reply: Option<Vec<u8>>,
    pub attempts: usize,
}

impl ScriptedConnector {
    pub fn replying(reply: &[u8]) -> Self {
        Self {
            reply: Some(reply.to_vec()),
            attempts: 0,
        }
    }

    pub fn refusing() -> Self {
        Self::default()
    }
}

impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    async fn connect(
        &mut self,
        target: &ConnectionTarget,
        _timeout: Duration,
    ) -> Result<DuplexStream> {
        self.attempts += 1;
        match &self.reply {
            Some(reply) => Ok(scripted(reply.clone())),
            None => Err(Error::Connection {
                endpoint: target.endpoint(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        }
    }
}

/// telnetコンソールを真似たPDU
/// 電力値はカウンタの値をそのまま返す
pub(crate) async fn spawn_fake_pdu(initial: Decimal) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut counter = initial;
        while let Ok((stream, _)) = listener.accept().await {
            let (rx, mut tx) = stream.into_split();
            let mut lines = BufReader::new(rx).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match line.trim() {
                    s if s == Command::ShowPower.as_str() => format!("{} kW\r\n> ", counter),
                    s if s == Command::ResetCounter.as_str() => {
                        counter = Decimal::ZERO;
                        "OK.\r\n> ".to_string()
                    }
                    _ => "Invalid command\r\n> ".to_string(),
                };
                if tx.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });
    addr
}
