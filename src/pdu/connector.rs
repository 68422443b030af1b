// PDUへのTCP接続
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::connection_settings::ConnectionTarget;
use crate::error::{Error, Result};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, lookup_host};

/// 接続を開く
///
/// セッションはこれを通して通信路を得るので、試験では偽の通信路に差し替えられる。
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin;

    async fn connect(&mut self, target: &ConnectionTarget, timeout: Duration)
    -> Result<Self::Stream>;
}

/// TCP接続
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&mut self, target: &ConnectionTarget, timeout: Duration) -> Result<TcpStream> {
        let attempt = async {
            let addr = lookup_host((target.host.as_str(), target.port))
                .await?
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))?;
            tracing::trace!("{} resolved to {}", target.host, addr);
            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4()?,
                SocketAddr::V6(_) => TcpSocket::new_v6()?,
            };
            if let Some(interface) = &target.interface {
                bind_interface(&socket, interface);
            }
            socket.connect(addr).await
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(Error::Connection {
                endpoint: target.endpoint(),
                source,
            }),
            Err(_elapsed) => Err(Error::Connection {
                endpoint: target.endpoint(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("not connected within {:?}", timeout),
                ),
            }),
        }
    }
}

/// 送信元インターフェースを指定する(SO_BINDTODEVICE)
/// 失敗しても警告を出して接続を続ける
#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_interface(socket: &TcpSocket, interface: &str) {
    match socket.bind_device(Some(interface.as_bytes())) {
        Ok(()) => tracing::debug!(r#"bound to interface "{interface}""#),
        Err(e) => tracing::warn!(r#"Unable to bind to interface "{interface}", reason:{e}"#),
    }
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_interface(_socket: &TcpSocket, interface: &str) {
    tracing::warn!(r#"binding to interface "{interface}" is not supported on this platform"#);
}

#[tokio::test]
async fn test_connect_refused() {
    // 空いているポートを得てから閉じる
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let target = ConnectionTarget {
        interface: None,
        host: "127.0.0.1".to_string(),
        port,
    };
    let timeout = Duration::from_millis(500);
    let started = std::time::Instant::now();
    let result = TcpConnector.connect(&target, timeout).await;
    assert!(matches!(result, Err(Error::Connection { .. })));
    assert!(started.elapsed() < timeout * 2);
}

#[tokio::test]
async fn test_connect_unreachable_is_bounded() {
    // TEST-NET-1 (RFC 5737) には誰もいない
    let target = ConnectionTarget {
        interface: None,
        host: "192.0.2.1".to_string(),
        port: 23,
    };
    let timeout = Duration::from_millis(200);
    let started = std::time::Instant::now();
    let result = TcpConnector.connect(&target, timeout).await;
    assert!(matches!(result, Err(Error::Connection { .. })));
    assert!(started.elapsed() < timeout * 2);
}

#[tokio::test]
async fn test_connect_accepted() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = ConnectionTarget {
        interface: None,
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
    };
    let stream = TcpConnector
        .connect(&target, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(stream.peer_addr().unwrap(), listener.local_addr().unwrap());
}
