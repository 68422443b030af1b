// telnet 送受信
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::pdu::line::{LineReader, LineTooLong};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 受信結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Line(String),             // 1行
    Closed { partial: bool }, // 相手が切断した
    TooLong(LineTooLong),     // 行末が来ない
}

/// コマンドを送信する
pub async fn send<W: AsyncWrite + Unpin>(w: &mut W, command: &[u8]) -> io::Result<()> {
    tracing::trace!(target:"Tx->","{}", String::from_utf8_lossy(command).escape_debug());
    w.write_all(command).await?;
    w.flush().await
}

/// 1行受信する
pub async fn receive<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    reader: &mut LineReader,
) -> io::Result<Received> {
    let mut buf = [0u8; 256];
    loop {
        let line = reader.next_line();
        // オプション交渉を拒否する
        let replies = reader.take_replies();
        if !replies.is_empty() {
            send(stream, &replies).await?;
        }
        match line {
            Ok(Some(line)) => {
                tracing::trace!(target:"<-Rx","{}", line.escape_debug());
                return Ok(Received::Line(line));
            }
            Ok(None) => {} // つづけて受信する
            Err(e) => return Ok(Received::TooLong(e)),
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(Received::Closed {
                partial: reader.has_partial(),
            });
        }
        reader.extend(&buf[..n]);
    }
}

#[tokio::test]
async fn test_receive_lines() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let mut reader = LineReader::new();
    server.write_all(b"first\r\nsec").await.unwrap();
    assert_eq!(
        receive(&mut client, &mut reader).await.unwrap(),
        Received::Line("first".to_string())
    );
    server.write_all(b"ond\n").await.unwrap();
    assert_eq!(
        receive(&mut client, &mut reader).await.unwrap(),
        Received::Line("second".to_string())
    );
    server.write_all(b"thi").await.unwrap();
    drop(server);
    assert_eq!(
        receive(&mut client, &mut reader).await.unwrap(),
        Received::Closed { partial: true }
    );
}

#[tokio::test]
async fn test_receive_answers_negotiation() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let mut reader = LineReader::new();
    // IAC DO TERMINAL-TYPE
    server.write_all(&[255, 253, 24]).await.unwrap();
    server.write_all(b"> 1 kW\r\n").await.unwrap();
    assert_eq!(
        receive(&mut client, &mut reader).await.unwrap(),
        Received::Line("> 1 kW".to_string())
    );
    // IAC WONT TERMINAL-TYPE
    let mut answer = [0u8; 3];
    server.read_exact(&mut answer).await.unwrap();
    assert_eq!(answer, [255, 252, 24]);
}

#[tokio::test]
async fn test_send() {
    let (mut client, mut server) = tokio::io::duplex(64);
    send(&mut client, b"linesensor 1 9 value show\n").await.unwrap();
    drop(client);
    let mut sent = String::new();
    server.read_to_string(&mut sent).await.unwrap();
    assert_eq!(sent, "linesensor 1 9 value show\n");
}
