// 受信バイト列から行を切り出す
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::collections::VecDeque;
use std::fmt;

/// 1行の最大長
pub const MAX_LINE_LENGTH: usize = 1024;

// telnetコマンド(RFC 854)
const SE: u8 = 240;
const SB: u8 = 250;
const WILL: u8 = 251;
const WONT: u8 = 252;
const DO: u8 = 253;
const DONT: u8 = 254;
const IAC: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Telnet {
    Data,              // データ
    Iac,               // IACを受信した
    Negotiate(u8),     // WILL/WONT/DO/DONTのオプション待ち
    SubNegotiation,    // SB .. IAC SE
    SubNegotiationIac, // SB中にIACを受信した
}

/// 行末が現れないまま最大長を超えた
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTooLong;

impl fmt::Display for LineTooLong {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "reply exceeds {MAX_LINE_LENGTH} bytes without line terminator")
    }
}

/// 行受信の状態機械
///
/// telnetのオプション交渉を取り除いて、全て拒否する応答を作る。
/// 行は "\n" で終わり、直前の "\r" は捨てる。
#[derive(Debug)]
pub struct LineReader {
    telnet: Telnet,
    line: Vec<u8>,
    unread: VecDeque<u8>,
    replies: Vec<u8>,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            telnet: Telnet::Data,
            line: Vec::new(),
            unread: VecDeque::new(),
            replies: Vec::new(),
        }
    }

    /// 受信したバイト列を積む
    pub fn extend(&mut self, bytes: &[u8]) {
        self.unread.extend(bytes);
    }

    /// 1行取り出す。行末がまだ来ていなければNone
    pub fn next_line(&mut self) -> Result<Option<String>, LineTooLong> {
        while let Some(byte) = self.unread.pop_front() {
            match self.step(byte) {
                Some(b'\n') => {
                    let mut bytes = std::mem::take(&mut self.line);
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(data) if self.line.len() < MAX_LINE_LENGTH => self.line.push(data),
                Some(_) => return Err(LineTooLong),
                None => {}
            }
        }
        Ok(None)
    }

    /// 行の途中まで受信している
    pub fn has_partial(&self) -> bool {
        !self.line.is_empty()
    }

    /// オプション交渉への返信を取り出す
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    fn step(&mut self, byte: u8) -> Option<u8> {
        let (next, data) = match (self.telnet, byte) {
            (Telnet::Data, IAC) => (Telnet::Iac, None),
            (Telnet::Data, b) => (Telnet::Data, Some(b)),
            (Telnet::Iac, IAC) => (Telnet::Data, Some(IAC)), // IAC IAC = 0xFF
            (Telnet::Iac, WILL | WONT | DO | DONT) => (Telnet::Negotiate(byte), None),
            (Telnet::Iac, SB) => (Telnet::SubNegotiation, None),
            (Telnet::Iac, _) => (Telnet::Data, None), // NOP, GA など
            (Telnet::Negotiate(verb), option) => {
                self.refuse(verb, option);
                (Telnet::Data, None)
            }
            (Telnet::SubNegotiation, IAC) => (Telnet::SubNegotiationIac, None),
            (Telnet::SubNegotiation, _) => (Telnet::SubNegotiation, None),
            (Telnet::SubNegotiationIac, SE) => (Telnet::Data, None),
            (Telnet::SubNegotiationIac, _) => (Telnet::SubNegotiation, None),
        };
        self.telnet = next;
        data
    }

    fn refuse(&mut self, verb: u8, option: u8) {
        let answer = match verb {
            DO => WONT,
            WILL => DONT,
            _ => return,
        };
        self.replies.extend([IAC, answer, option]);
    }
}

#[test]
fn test_lines() {
    let mut reader = LineReader::new();
    reader.extend(b"1.250 kW\r\n> ");
    assert_eq!(reader.next_line(), Ok(Some("1.250 kW".to_string())));
    assert_eq!(reader.next_line(), Ok(None));
    assert!(reader.has_partial());

    reader.extend(b"OK\n");
    assert_eq!(reader.next_line(), Ok(Some("> OK".to_string())));
    assert!(!reader.has_partial());
}

#[test]
fn test_partial_reads() {
    let mut reader = LineReader::new();
    for chunk in [&b"1."[..], b"2", b"5 k", b"W\r"] {
        reader.extend(chunk);
        assert_eq!(reader.next_line(), Ok(None));
    }
    reader.extend(b"\n");
    assert_eq!(reader.next_line(), Ok(Some("1.25 kW".to_string())));
}

#[test]
fn test_telnet_negotiation() {
    let mut reader = LineReader::new();
    // IAC DO ECHO, IAC WILL SGA, IAC SB TTYPE SEND IAC SE, IAC WONT LINEMODE
    reader.extend(&[IAC, DO, 1, IAC, WILL, 3, IAC, SB, 24, 1, IAC, SE, IAC, WONT, 34]);
    reader.extend(b"0.5\r\n");
    assert_eq!(reader.next_line(), Ok(Some("0.5".to_string())));
    assert_eq!(reader.take_replies(), vec![IAC, WONT, 1, IAC, DONT, 3]);
    assert!(reader.take_replies().is_empty());
}

#[test]
fn test_escaped_iac() {
    let mut reader = LineReader::new();
    reader.extend(&[b'a', IAC, IAC, b'b', b'\n']);
    assert_eq!(
        reader.next_line(),
        Ok(Some(String::from_utf8_lossy(&[b'a', IAC, b'b']).into_owned()))
    );
}

#[test]
fn test_line_too_long() {
    let mut reader = LineReader::new();
    reader.extend(&[b'x'; MAX_LINE_LENGTH]);
    assert_eq!(reader.next_line(), Ok(None));
    reader.extend(b"x");
    assert_eq!(reader.next_line(), Err(LineTooLong));
}
