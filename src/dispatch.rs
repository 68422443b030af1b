// 動作を選んでPDUに対して実行する
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::connection_settings::{
    self, ConnectionSettings, ConnectionTarget, DEFAULT_LOG_FILE, DEFAULT_PORT, Timeouts,
};
use crate::error::{Error, Result};
use crate::pdu::{Ack, Connector, Session, UsageReading};
use crate::usage_log::{self, LogRecord};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

/// 動作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PrintUsageInKw,
    LogUsageInKw,
    ResetCounter,
}

impl Action {
    pub const NAMES: [&'static str; 3] = ["log_usage_in_kw", "reset_counter", "print_usage_in_kw"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::PrintUsageInKw => "print_usage_in_kw",
            Action::LogUsageInKw => "log_usage_in_kw",
            Action::ResetCounter => "reset_counter",
        }
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "print_usage_in_kw" => Ok(Action::PrintUsageInKw),
            "log_usage_in_kw" => Ok(Action::LogUsageInKw),
            "reset_counter" => Ok(Action::ResetCounter),
            _ => Err(Error::Configuration(format!(
                r#"invalid action "{}", choose from {}"#,
                s,
                Action::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// コマンドライン引数
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    pub interface: Option<String>,
    pub host: Option<String>,
    pub action: String,
    pub port: Option<u16>,
    pub log_file: Option<PathBuf>,
    pub connect_timeout: Option<f64>,
    pub read_timeout: Option<f64>,
}

/// 1回の実行の設定
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// 実行時に検証する
    pub action: String,
    pub target: ConnectionTarget,
    pub log_file: PathBuf,
    pub timeouts: Timeouts,
}

impl Config {
    /// 既定値で作る
    pub fn new(target: ConnectionTarget) -> Self {
        Self {
            action: Action::PrintUsageInKw.to_string(),
            target,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            timeouts: Timeouts::default(),
        }
    }

    /// コマンドライン引数 > 設定ファイル > 既定値 の順に決める
    pub fn resolve(args: Arguments, settings: ConnectionSettings) -> Result<Self> {
        let host = args
            .host
            .or(settings.Host)
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration("PDU host is not given, use --host or PDU_HOST".to_string())
            })?;
        let target = ConnectionTarget {
            interface: args.interface.or(settings.Interface),
            host,
            port: args.port.or(settings.Port).unwrap_or(DEFAULT_PORT),
        };
        let mut timeouts = Timeouts::default();
        if let Some(secs) = args.connect_timeout.or(settings.ConnectTimeout) {
            timeouts.connect = connection_settings::timeout_from_secs("connect_timeout", secs)?;
        }
        if let Some(secs) = args.read_timeout.or(settings.ReadTimeout) {
            timeouts.read = connection_settings::timeout_from_secs("read_timeout", secs)?;
        }
        Ok(Self {
            action: args.action,
            target,
            log_file: args
                .log_file
                .or(settings.LogFile)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            timeouts,
        })
    }
}

/// 実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Printed(UsageReading),
    Logged(LogRecord),
    Reset(Ack),
}

// セッションで得たもの
enum Exchanged {
    Usage(UsageReading),
    Ack(Ack),
}

/// 動作を実行する
///
/// 動作名はネットワークに触れる前に検証する。
/// セッションはどの経路でも閉じる。
pub async fn run<C: Connector>(
    config: &Config,
    connector: &mut C,
    stdout: &mut dyn io::Write,
) -> Result<Outcome> {
    let action = config.action.parse::<Action>()?;
    tracing::debug!(%action, "target {}", config.target);

    let mut session = Session::connect(connector, &config.target, &config.timeouts).await?;
    let exchanged = match action {
        Action::PrintUsageInKw | Action::LogUsageInKw => {
            session.read_usage().await.map(Exchanged::Usage)
        }
        Action::ResetCounter => session.reset_counter().await.map(Exchanged::Ack),
    };
    session.close().await;

    match exchanged? {
        Exchanged::Usage(usage) if action == Action::LogUsageInKw => {
            let record = LogRecord::now(usage);
            usage_log::append(&config.log_file, &record)?;
            Ok(Outcome::Logged(record))
        }
        Exchanged::Usage(usage) => {
            writeln!(stdout, "{usage}")
                .and_then(|_| stdout.flush())
                .map_err(Error::Output)?;
            Ok(Outcome::Printed(usage))
        }
        Exchanged::Ack(ack) => {
            tracing::info!("counter reset, device answered {ack}");
            Ok(Outcome::Reset(ack))
        }
    }
}

#[cfg(test)]
fn config(action: &str, log_file: PathBuf) -> Config {
    Config {
        action: action.to_string(),
        log_file,
        ..Config::new(ConnectionTarget {
            interface: None,
            host: "pdu".to_string(),
            port: DEFAULT_PORT,
        })
    }
}

#[test]
fn test_action_names() {
    for name in Action::NAMES {
        assert_eq!(name.parse::<Action>().unwrap().as_str(), name);
    }
    assert!(matches!(
        "print_usage".parse::<Action>(),
        Err(Error::Configuration(_))
    ));
}

#[tokio::test]
async fn test_unknown_action_never_connects() {
    let mut connector = crate::pdu::fake_device::ScriptedConnector::replying(b"1 kW\r\n");
    let mut stdout = Vec::new();
    let result = run(
        &config("delete_everything", PathBuf::from("unused")),
        &mut connector,
        &mut stdout,
    )
    .await;
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert_eq!(connector.attempts, 0);
    assert!(stdout.is_empty());
}

#[tokio::test]
async fn test_print_usage() {
    let mut connector = crate::pdu::fake_device::ScriptedConnector::replying(b"> 1.250 kW\r\n");
    let mut stdout = Vec::new();
    let outcome = run(
        &config("print_usage_in_kw", PathBuf::from("unused")),
        &mut connector,
        &mut stdout,
    )
    .await
    .unwrap();
    assert_eq!(
        outcome,
        Outcome::Printed(UsageReading::from_device(rust_decimal::dec!(1.25), None))
    );
    assert_eq!(String::from_utf8(stdout).unwrap(), "1.25\n");
    assert_eq!(connector.attempts, 1);
}

#[tokio::test]
async fn test_log_usage_appends_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stat.txt");
    let replies = ["0.5 kW\r\n", "750 W\r\n", "1.000 kW\r\n"];
    for reply in replies {
        let mut connector =
            crate::pdu::fake_device::ScriptedConnector::replying(reply.as_bytes());
        let mut stdout = Vec::new();
        let outcome = run(
            &config("log_usage_in_kw", path.clone()),
            &mut connector,
            &mut stdout,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, Outcome::Logged(_)));
        assert!(stdout.is_empty());
    }
    let text = std::fs::read_to_string(&path).unwrap();
    let logged: Vec<String> = text
        .lines()
        .map(|line| line.parse::<LogRecord>().unwrap().usage.to_string())
        .collect();
    assert_eq!(logged, vec!["0.5", "0.75", "1"]);
}

#[tokio::test]
async fn test_failed_reading_writes_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stat.txt");
    let mut connector = crate::pdu::fake_device::ScriptedConnector::replying(b"garbage\r\n");
    let mut stdout = Vec::new();
    let result = run(
        &config("log_usage_in_kw", path.clone()),
        &mut connector,
        &mut stdout,
    )
    .await;
    assert!(matches!(result, Err(Error::Protocol { .. })));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_connection_refused() {
    let mut connector = crate::pdu::fake_device::ScriptedConnector::refusing();
    let mut stdout = Vec::new();
    let result = run(
        &config("reset_counter", PathBuf::from("unused")),
        &mut connector,
        &mut stdout,
    )
    .await;
    assert!(matches!(result, Err(Error::Connection { .. })));
    assert_eq!(connector.attempts, 1);
}

#[tokio::test]
async fn test_reset_then_print_on_fake_pdu() {
    let addr = crate::pdu::fake_device::spawn_fake_pdu(rust_decimal::dec!(3.5)).await;
    let target = ConnectionTarget {
        interface: None,
        host: addr.ip().to_string(),
        port: addr.port(),
    };
    let mut connector = crate::pdu::TcpConnector;
    let mut stdout = Vec::new();

    let mut cfg = Config::new(target);
    cfg.action = "reset_counter".to_string();
    let outcome = run(&cfg, &mut connector, &mut stdout).await.unwrap();
    assert_eq!(outcome, Outcome::Reset(Ack("OK.".to_string())));

    cfg.action = "print_usage_in_kw".to_string();
    run(&cfg, &mut connector, &mut stdout).await.unwrap();
    assert_eq!(String::from_utf8(stdout).unwrap(), "0\n");
}

#[test]
fn test_resolve_precedence() {
    let settings = ConnectionSettings {
        Host: Some("pdu.local".to_string()),
        Port: Some(2323),
        LogFile: Some(PathBuf::from("/var/log/pdu.txt")),
        ReadTimeout: Some(2.0),
        ..Default::default()
    };
    let args = Arguments {
        interface: Some("eth0".to_string()),
        action: "log_usage_in_kw".to_string(),
        port: Some(23),
        ..Default::default()
    };
    let cfg = Config::resolve(args, settings).unwrap();
    assert_eq!(cfg.target.host, "pdu.local");
    assert_eq!(cfg.target.port, 23);
    assert_eq!(cfg.target.interface.as_deref(), Some("eth0"));
    assert_eq!(cfg.log_file, PathBuf::from("/var/log/pdu.txt"));
    assert_eq!(cfg.timeouts.read, std::time::Duration::from_secs(2));
    assert_eq!(cfg.timeouts.connect, Timeouts::default().connect);
}

#[test]
fn test_resolve_defaults() {
    let args = Arguments {
        host: Some("192.168.1.20".to_string()),
        action: "print_usage_in_kw".to_string(),
        ..Default::default()
    };
    let cfg = Config::resolve(args, ConnectionSettings::default()).unwrap();
    assert_eq!(cfg.target.port, 23);
    assert_eq!(cfg.log_file, PathBuf::from("./stat.txt"));
    assert_eq!(cfg.timeouts, Timeouts::default());
}

#[test]
fn test_resolve_errors() {
    let no_host = Arguments {
        action: "print_usage_in_kw".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        Config::resolve(no_host, ConnectionSettings::default()),
        Err(Error::Configuration(_))
    ));

    let bad_timeout = Arguments {
        host: Some("pdu".to_string()),
        read_timeout: Some(0.0),
        ..Default::default()
    };
    assert!(matches!(
        Config::resolve(bad_timeout, ConnectionSettings::default()),
        Err(Error::Configuration(_))
    ));

    // Durationに収まらない
    let huge_timeout = Arguments {
        host: Some("pdu".to_string()),
        connect_timeout: Some(1e20),
        ..Default::default()
    };
    assert!(matches!(
        Config::resolve(huge_timeout, ConnectionSettings::default()),
        Err(Error::Configuration(_))
    ));
    let huge_in_file = ConnectionSettings {
        Host: Some("pdu".to_string()),
        ReadTimeout: Some(f64::MAX),
        ..Default::default()
    };
    assert!(matches!(
        Config::resolve(Arguments::default(), huge_in_file),
        Err(Error::Configuration(_))
    ));
}

#[tokio::test]
async fn test_print_usage_with_far_future_read_timeout() {
    let args = Arguments {
        host: Some("pdu".to_string()),
        action: "print_usage_in_kw".to_string(),
        read_timeout: Some(1e19),
        ..Default::default()
    };
    let cfg = Config::resolve(args, ConnectionSettings::default()).unwrap();
    let mut connector = crate::pdu::fake_device::ScriptedConnector::replying(b"2.5 kW\r\n");
    let mut stdout = Vec::new();
    run(&cfg, &mut connector, &mut stdout).await.unwrap();
    assert_eq!(String::from_utf8(stdout).unwrap(), "2.5\n");
}
