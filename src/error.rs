// エラー型
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// 設定の誤り(ネットワークに触れる前に検出する)
    #[error("configuration: {0}")]
    Configuration(String),

    #[error(r#"connection to {endpoint} failed "{source}""#)]
    Connection {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("session to {endpoint} is not connected")]
    NotConnected { endpoint: String },

    #[error(r#"timed out waiting for "{command}" reply from {endpoint}"#)]
    Timeout { endpoint: String, command: String },

    #[error("protocol error from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    #[error(r#"standard output "{0}""#)]
    Output(#[source] io::Error),

    #[error(r#"log file "{}" "{source}""#, .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// 取り交わしが壊れたのでセッションを再利用してはならない
    pub fn poisons_session(&self) -> bool {
        matches!(self, Error::Protocol { .. } | Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[test]
fn test_poisons_session() {
    let endpoint = "192.0.2.1:23".to_string();
    assert!(
        Error::Timeout {
            endpoint: endpoint.clone(),
            command: "linesensor 1 9 value show".to_string(),
        }
        .poisons_session()
    );
    assert!(
        Error::Protocol {
            endpoint: endpoint.clone(),
            reason: "empty reply".to_string(),
        }
        .poisons_session()
    );
    assert!(!Error::NotConnected { endpoint }.poisons_session());
    assert!(!Error::Configuration("bad".to_string()).poisons_session());
}

#[test]
fn test_message_names_endpoint() {
    let e = Error::Connection {
        endpoint: "192.0.2.1:23".to_string(),
        source: io::Error::from(io::ErrorKind::ConnectionRefused),
    };
    assert!(e.to_string().contains("192.0.2.1:23"));
}
