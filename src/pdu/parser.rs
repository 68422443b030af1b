// Gude 8311 telnetコンソールの応答パーサー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::pdu::{Ack, Unit, UsageReading};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, digit1, one_of, space0};
use nom::combinator::{all_consuming, map_res, opt, recognize, value};
use nom::Parser;
use rust_decimal::Decimal;
use std::str::FromStr;

// プロンプト(">")と空白
fn prompt(input: &str) -> nom::IResult<&str, &str> {
    take_while(|c: char| c == '>' || c.is_whitespace()).parse(input)
}

// 10進数(符号, 小数部は任意)
fn decimal(input: &str) -> nom::IResult<&str, Decimal> {
    let parser = recognize((opt(one_of("+-")), digit1, opt((char('.'), digit1))));
    map_res(parser, Decimal::from_str).parse(input)
}

// 単位
fn unit(input: &str) -> nom::IResult<&str, Unit> {
    alt((
        // 長い方から試す
        value(Unit::KilowattHour, tag("kWh")),
        value(Unit::Kilowatt, tag("kW")),
        value(Unit::WattHour, tag("Wh")),
        value(Unit::Watt, tag("W")),
    ))
    .parse(input)
}

// > 1.250 kW
fn usage(s: &str) -> nom::IResult<&str, UsageReading> {
    let (s, _) = prompt.parse(s)?;
    let (s, v) = decimal.parse(s)?;
    let (s, _) = space0.parse(s)?;
    let (s, u) = opt(unit).parse(s)?;
    let (s, _) = space0.parse(s)?;
    Ok((s, UsageReading::from_device(v, u)))
}

/// 電力値の応答行を解析する
pub fn parse_usage(line: &str) -> Result<UsageReading, String> {
    if strip_prompt(line).is_empty() {
        return Err("empty reply".to_string());
    }
    all_consuming(usage)
        .parse(line.trim_end())
        .map(|(_, reading)| reading)
        .map_err(|_| format!("unexpected reply {:?}", line))
}

/// リセット応答行を解析する
pub fn parse_ack(line: &str) -> Result<Ack, String> {
    let text = strip_prompt(line);
    let lower = text.to_ascii_lowercase();
    if ["err", "invalid", "unknown"]
        .iter()
        .any(|p| lower.starts_with(p))
    {
        Err(format!("device rejected the command {:?}", text))
    } else {
        Ok(Ack(text.to_string()))
    }
}

/// プロンプトを取り除く
pub fn strip_prompt(line: &str) -> &str {
    match prompt(line) {
        Ok((rest, _)) => rest.trim_end(),
        Err(_) => line.trim(),
    }
}

#[test]
fn test_usage() {
    use rust_decimal::dec;

    assert_eq!(parse_usage("1.250 kW").unwrap().kw(), dec!(1.25));
    assert_eq!(parse_usage("  1.250 kW \t").unwrap().kw(), dec!(1.25));
    assert_eq!(parse_usage("> 1.250kW").unwrap().kw(), dec!(1.25));
    assert_eq!(parse_usage(">0.042").unwrap().kw(), dec!(0.042));
    assert_eq!(parse_usage("230 W").unwrap().kw(), dec!(0.23));
    assert_eq!(parse_usage("12.5 kWh").unwrap().kw(), dec!(12.5));
    assert_eq!(parse_usage("500 Wh").unwrap().kw(), dec!(0.5));
    assert_eq!(parse_usage("0").unwrap().kw(), dec!(0));
    assert_eq!(parse_usage("+3 kW").unwrap().kw(), dec!(3));
}

#[test]
fn test_malformed_usage() {
    for line in [
        "",
        "   ",
        ">",
        "> ",
        "N/A",
        "kW",
        "1.25 kW 3",
        "1.25 2.50",
        "1.25 MW",
        "1.25 kWx",
        "1.",
        "1,25 kW",
        "Invalid command",
    ] {
        assert!(parse_usage(line).is_err(), "{:?} must be rejected", line);
    }
    assert_eq!(parse_usage("").unwrap_err(), "empty reply");
}

#[test]
fn test_ack() {
    assert_eq!(parse_ack("> OK.").unwrap(), Ack("OK.".to_string()));
    assert_eq!(parse_ack("").unwrap(), Ack("".to_string()));
    assert!(parse_ack("ERROR: unknown sensor").is_err());
    assert!(parse_ack("> Invalid parameter").is_err());
    assert!(parse_ack("Unknown command").is_err());
}

#[test]
fn test_decimal() {
    use rust_decimal::dec;
    assert_eq!(decimal("-0.5 kW").unwrap(), (" kW", dec!(-0.5)));
    assert!(decimal("x1").is_err());
}
