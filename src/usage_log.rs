// 電力値の記録ファイル
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::error::{Error, Result};
use crate::pdu::UsageReading;
use chrono::{Local, NaiveDateTime, Timelike};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// 記録の時刻書式
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// 記録1行
/// "19-10-2026 14:03:00 - 1.25"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub usage: UsageReading,
}

impl LogRecord {
    /// 現在時刻(秒単位)で作る
    pub fn now(usage: UsageReading) -> Self {
        let now = Local::now().naive_local();
        Self {
            timestamp: now.with_nanosecond(0).unwrap_or(now),
            usage,
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.usage
        )
    }
}

impl FromStr for LogRecord {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (timestamp, usage) = s
            .trim_end()
            .split_once(" - ")
            .ok_or_else(|| format!("not a log record {:?}", s))?;
        Ok(Self {
            timestamp: NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
                .map_err(|e| format!("bad timestamp {:?}, {e}", timestamp))?,
            usage: usage
                .parse::<UsageReading>()
                .map_err(|e| format!("bad reading {:?}, {e}", usage))?,
        })
    }
}

/// 1行追記する
///
/// 追記モードで開いて1回の書き込みで1行を書くので、
/// 同時に動く別のプロセスと行が混ざることはない。
pub fn append(path: &Path, record: &LogRecord) -> Result<()> {
    let file_error = |source| Error::File {
        path: path.to_path_buf(),
        source,
    };
    let line = format!("{record}\n");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(file_error)?;
    file.write_all(line.as_bytes()).map_err(file_error)?;
    file.flush().map_err(file_error)?;
    tracing::debug!(r#""{}" appended to "{}""#, record, path.display());
    Ok(())
}

#[test]
fn test_record_format() {
    use chrono::NaiveDate;
    use rust_decimal::dec;

    let record = LogRecord {
        timestamp: NaiveDate::from_ymd_opt(2026, 10, 19)
            .and_then(|d| d.and_hms_opt(14, 3, 0))
            .unwrap(),
        usage: UsageReading::from_device(dec!(1.250), None),
    };
    assert_eq!(record.to_string(), "19-10-2026 14:03:00 - 1.25");
    assert_eq!(record.to_string().parse::<LogRecord>().unwrap(), record);
}

#[test]
fn test_record_parse_error() {
    assert!("19-10-2026 14:03:00 - N/A".parse::<LogRecord>().is_err());
    assert!("2026-10-19T14:03:00 - 1.25".parse::<LogRecord>().is_err());
    assert!("1.25".parse::<LogRecord>().is_err());
}

#[test]
fn test_append_in_order() {
    use rust_decimal::Decimal;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stat.txt");
    let readings: Vec<UsageReading> = (0..5)
        .map(|n| UsageReading::from_device(Decimal::new(n * 125, 3), None))
        .collect();
    for r in readings.iter() {
        append(&path, &LogRecord::now(*r)).unwrap();
    }

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.ends_with('\n'));
    let parsed: Vec<UsageReading> = text
        .lines()
        .map(|line| line.parse::<LogRecord>().unwrap().usage)
        .collect();
    assert_eq!(parsed, readings);
}

#[test]
fn test_append_keeps_existing_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stat.txt");
    std::fs::write(&path, "01-01-2026 00:00:00 - 0.5\n").unwrap();
    let usage = "0.75".parse::<UsageReading>().unwrap();
    append(&path, &LogRecord::now(usage)).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "01-01-2026 00:00:00 - 0.5");
    assert!(lines[1].ends_with(" - 0.75"));
}

#[test]
fn test_append_unwritable() {
    let dir = tempfile::tempdir().unwrap();
    // ディレクトリには追記できない
    let usage = "1".parse::<UsageReading>().unwrap();
    let result = append(dir.path(), &LogRecord::now(usage));
    assert!(matches!(result, Err(Error::File { .. })));
}

#[test]
fn test_concurrent_appends_keep_whole_lines() {
    use rust_decimal::Decimal;

    const WRITERS: usize = 8;
    const RECORDS: usize = 200;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stat.txt");
    std::thread::scope(|s| {
        for writer in 0..WRITERS {
            let path = &path;
            s.spawn(move || {
                for n in 0..RECORDS {
                    let usage = UsageReading::from_device(
                        Decimal::new((writer * RECORDS + n) as i64, 3),
                        None,
                    );
                    append(path, &LogRecord::now(usage)).unwrap();
                }
            });
        }
    });

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.ends_with('\n'));
    let mut logged: Vec<UsageReading> = text
        .lines()
        .map(|line| line.parse::<LogRecord>().unwrap().usage)
        .collect();
    assert_eq!(logged.len(), WRITERS * RECORDS);
    // 書き手ごとの値は重ならないので全て1回ずつ現れる
    logged.sort_by_key(|u| u.kw());
    let expected: Vec<UsageReading> = (0..WRITERS * RECORDS)
        .map(|n| UsageReading::from_device(Decimal::new(n as i64, 3), None))
        .collect();
    assert_eq!(logged, expected);
}
