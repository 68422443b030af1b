// Gude 8311 telnetコンソールのコマンドと応答
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// コマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 有効電力を読む
    ShowPower,
    /// 積算電力量カウンタをリセットする
    ResetCounter,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::ShowPower => "linesensor 1 9 value show",
            Command::ResetCounter => "linesensor 1 counter reset",
        }
    }

    /// 改行で終端した送信データ
    pub fn to_line(&self) -> Vec<u8> {
        format!("{}\n", self.as_str()).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 応答値の単位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Kilowatt,
    KilowattHour,
    Watt,
    WattHour,
}

impl Unit {
    /// キロ単位に換算する
    pub fn to_kilo(&self, value: Decimal) -> Decimal {
        match self {
            Unit::Kilowatt | Unit::KilowattHour => value,
            Unit::Watt | Unit::WattHour => value / Decimal::ONE_THOUSAND,
        }
    }
}

/// 電力(kW)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageReading(Decimal);

impl UsageReading {
    /// 単位なしの値はkWとみなす
    pub fn from_device(value: Decimal, unit: Option<Unit>) -> Self {
        let kw = unit.map_or(value, |u| u.to_kilo(value));
        Self(kw.normalize())
    }

    pub fn kw(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for UsageReading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UsageReading {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(|v| Self(v.normalize()))
    }
}

/// リセット応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack(pub String);

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "(empty acknowledgement)")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[test]
fn test_command_line() {
    assert_eq!(
        Command::ShowPower.to_line(),
        b"linesensor 1 9 value show\n".to_vec()
    );
    assert_eq!(
        Command::ResetCounter.to_line(),
        b"linesensor 1 counter reset\n".to_vec()
    );
}

#[test]
fn test_normalize() {
    use rust_decimal::dec;
    let r = UsageReading::from_device(dec!(1.250), Some(Unit::Kilowatt));
    assert_eq!(r.kw(), dec!(1.25));
    assert_eq!(r.to_string(), "1.25");

    let r = UsageReading::from_device(dec!(1250), Some(Unit::Watt));
    assert_eq!(r.to_string(), "1.25");

    let r = UsageReading::from_device(dec!(0.000), None);
    assert_eq!(r.to_string(), "0");
}

#[test]
fn test_from_str() {
    use rust_decimal::dec;
    assert_eq!(
        UsageReading::from_str(" 2.500").unwrap().kw(),
        dec!(2.5)
    );
    assert!(UsageReading::from_str("N/A").is_err());
}
