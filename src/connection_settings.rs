// PDU接続情報
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// telnetポート
pub const DEFAULT_PORT: u16 = 23;
/// 記録ファイル
pub const DEFAULT_LOG_FILE: &str = "./stat.txt";
/// 接続待ち時間
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// 応答待ち時間
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// 接続先
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// 送信元ネットワークインターフェース
    pub interface: Option<String>,
    pub host: String,
    pub port: u16,
}

impl ConnectionTarget {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.interface {
            Some(interface) => write!(f, "{} via {}", self.endpoint(), interface),
            None => write!(f, "{}", self.endpoint()),
        }
    }
}

/// 待ち時間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// 秒数を待ち時間にする
pub fn timeout_from_secs(name: &str, secs: f64) -> Result<Duration> {
    let invalid = |reason: String| {
        Error::Configuration(format!(
            "{name} must be a positive number of seconds, got {secs} ({reason})"
        ))
    };
    if secs.is_nan() || secs <= 0.0 {
        return Err(invalid("not positive".to_string()));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(e.to_string()))
}

/// 設定ファイル(TOML)
/// 全ての項目は省略できる。コマンドライン引数が優先される。
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[allow(non_snake_case)]
pub struct ConnectionSettings {
    pub Host: Option<String>,
    pub Port: Option<u16>,
    pub Interface: Option<String>,
    pub LogFile: Option<PathBuf>,
    pub ConnectTimeout: Option<f64>,
    pub ReadTimeout: Option<f64>,
}

impl ConnectionSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(r#"setting file "{}" read error. {e}"#, path.display()))
        })?;
        toml::from_str::<ConnectionSettings>(&text).map_err(|e| {
            Error::Configuration(format!(r#"setting file "{}" parse error. {e}"#, path.display()))
        })
    }
}

#[test]
fn test_endpoint() {
    let target = ConnectionTarget {
        interface: Some("eth0".to_string()),
        host: "192.168.0.10".to_string(),
        port: DEFAULT_PORT,
    };
    assert_eq!(target.endpoint(), "192.168.0.10:23");
    assert_eq!(target.to_string(), "192.168.0.10:23 via eth0");
}

#[test]
fn test_timeout_from_secs() {
    assert_eq!(
        timeout_from_secs("read_timeout", 0.5).unwrap(),
        Duration::from_millis(500)
    );
    assert!(matches!(
        timeout_from_secs("read_timeout", 0.0),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        timeout_from_secs("read_timeout", -1.0),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        timeout_from_secs("read_timeout", f64::NAN),
        Err(Error::Configuration(_))
    ));
    // Durationに収まらない
    assert!(matches!(
        timeout_from_secs("connect_timeout", 1e20),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        timeout_from_secs("connect_timeout", f64::INFINITY),
        Err(Error::Configuration(_))
    ));
    assert!(timeout_from_secs("read_timeout", 1e19).is_ok());
}

#[test]
fn test_load_settings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut file,
        b"# gudepower\nHost = \"pdu.local\"\nPort = 2323\nReadTimeout = 2.5\n",
    )
    .unwrap();
    let settings = ConnectionSettings::load(file.path()).unwrap();
    assert_eq!(
        settings,
        ConnectionSettings {
            Host: Some("pdu.local".to_string()),
            Port: Some(2323),
            ReadTimeout: Some(2.5),
            ..Default::default()
        }
    );
}

#[test]
fn test_load_settings_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = ConnectionSettings::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(Error::Configuration(_))));
}
