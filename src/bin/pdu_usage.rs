// PDU(Gude 8311-1)の消費電力を表示、記録する。カウンタをリセットする。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::Context;
use clap::Parser;
use gudepower::ConnectionSettings;
use gudepower::dispatch::{self, Arguments, Config, Outcome};
use gudepower::pdu::TcpConnector;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// PDUから消費電力(kW)を得る。
/// ログは標準エラー出力に出る。レベルは RUST_LOG 環境変数で設定できる。
#[derive(Parser, Debug)]
#[command(name = "pdu_usage")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 送信元ネットワークインターフェース名
    interface_name: String,

    /// PDUのアドレス
    #[arg(long, env = "PDU_HOST")]
    host: Option<String>,

    /// 動作(log_usage_in_kw, reset_counter, print_usage_in_kw)
    #[arg(long, default_value = "print_usage_in_kw")]
    action: String,

    /// 記録ファイル名 [default: ./stat.txt]
    #[arg(long = "log_file")]
    log_file: Option<PathBuf>,

    /// ポート番号 [default: 23]
    #[arg(long)]
    port: Option<u16>,

    /// 接続待ち時間(秒) [default: 3]
    #[arg(long = "connect_timeout")]
    connect_timeout: Option<f64>,

    /// 応答待ち時間(秒) [default: 1]
    #[arg(long = "read_timeout")]
    read_timeout: Option<f64>,

    /// 設定ファイル名(TOML)
    #[arg(short = 'S', long = "config_file")]
    config_file: Option<PathBuf>,
}

impl From<&Cli> for Arguments {
    fn from(cli: &Cli) -> Self {
        Arguments {
            interface: Some(cli.interface_name.clone()),
            host: cli.host.clone(),
            action: cli.action.clone(),
            port: cli.port,
            log_file: cli.log_file.clone(),
            connect_timeout: cli.connect_timeout,
            read_timeout: cli.read_timeout,
        }
    }
}

async fn exec(cli: &Cli) -> anyhow::Result<()> {
    // 設定ファイルは無くてもよい
    let settings = match &cli.config_file {
        Some(path) => ConnectionSettings::load(path)?,
        None => ConnectionSettings::default(),
    };
    let config = Config::resolve(Arguments::from(cli), settings)?;

    let mut stdout = io::stdout().lock();
    let outcome = dispatch::run(&config, &mut TcpConnector, &mut stdout)
        .await
        .with_context(|| format!(r#"action "{}" on {}"#, config.action, config.target))?;

    match outcome {
        Outcome::Printed(usage) => tracing::debug!("{usage} kW"),
        Outcome::Logged(record) => {
            tracing::info!(r#""{record}" logged to "{}""#, config.log_file.display())
        }
        Outcome::Reset(ack) => tracing::info!("counter reset ({ack})"),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    // 標準出力は測定値だけにする
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_timer(LocalTime::rfc_3339())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    // プログラムの情報
    let app_info = format!(
        "{} / {}{}",
        built_info::PKG_NAME,
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH_SHORT
            .map(|s| format!(" ({s})"))
            .unwrap_or_default()
    );
    tracing::debug!("{app_info} started. {cli:?}");

    match exec(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
