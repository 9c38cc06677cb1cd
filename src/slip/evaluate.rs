//! Heuristic scoring of OCR'd slip text.
//!
//! Everything in here is pure: text in, [`Verdict`] out. The evaluator sits
//! behind [`SlipEvaluator`] so the pipeline can swap it out in tests.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::fetch::sha256_hex;
use crate::config::ReceiverConfig;

const SUCCESS_PHRASES: &[&str] = &[
    "โอนเงินสำเร็จ",
    "ทำรายการสำเร็จ",
    "รายการสำเร็จ",
    "สำเร็จ",
    "transfer successful",
    "transfer success",
    "successful transfer",
    "transaction successful",
    "payment successful",
    "completed",
];

const AMOUNT_KEYWORDS: &[&str] = &["ยอดเงิน", "จำนวนเงิน", "ยอดโอน", "จำนวน", "amount", "total"];

/// Weaker amount hint: only consulted when no labelled amount line exists.
const CURRENCY_KEYWORDS: &[&str] = &["thb", "บาท", "฿"];

/// Fee lines carry currency units too but never the transfer amount.
const FEE_KEYWORDS: &[&str] = &["ค่าธรรมเนียม", "fee"];

const NAME_KEYWORDS: &[&str] = &[
    "ผู้รับ", "ไปยัง", "ถึง", "receiver", "recipient", "transfer to", "to:",
];

const BANK_KEYWORDS: &[&str] = &["ธนาคาร", "bank"];

const ACCOUNT_KEYWORDS: &[&str] = &["เลขที่บัญชี", "บัญชี", "account", "acc"];

/// Thai month abbreviations as printed on slips, then English.
const MONTHS: &[(&str, u32)] = &[
    ("ม.ค.", 1), ("ก.พ.", 2), ("มี.ค.", 3), ("เม.ย.", 4), ("พ.ค.", 5), ("มิ.ย.", 6),
    ("ก.ค.", 7), ("ส.ค.", 8), ("ก.ย.", 9), ("ต.ค.", 10), ("พ.ย.", 11), ("ธ.ค.", 12),
    ("jan", 1), ("feb", 2), ("mar", 3), ("apr", 4), ("may", 5), ("jun", 6),
    ("jul", 7), ("aug", 8), ("sep", 9), ("oct", 10), ("nov", 11), ("dec", 12),
];

/// Buddhist-era year offset.
const BE_OFFSET: i32 = 543;

/// Slip times are printed in Bangkok local time.
const SLIP_UTC_OFFSET_SECS: i32 = 7 * 3600;

// Score weights in points out of 100.
const WEIGHT_SUCCESS: u32 = 20;
const WEIGHT_AMOUNT: u32 = 40;
const WEIGHT_NAME: u32 = 20;
const WEIGHT_BANK: u32 = 10;
const WEIGHT_ACCOUNT: u32 = 10;
const VERIFIED_THRESHOLD: u32 = 75;

static NUMBER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9][0-9,]*(?:\.[0-9]+)?").expect("valid number regex"));

static GROUPED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]+)?$").expect("valid grouping regex")
});

static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([0-9]{1,2})[/\-.]([0-9]{1,2})[/\-.]([0-9]{2,4})\b").expect("valid date regex")
});

static NAMED_MONTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    let months = MONTHS
        .iter()
        .map(|(name, _)| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)([0-9]{{1,2}})\s*({})[a-z]*\.?\s*([0-9]{{2,4}})", months))
        .expect("valid month regex")
});

static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([0-9]{1,2}):([0-9]{2})(?::([0-9]{2}))?\b").expect("valid time regex")
});

/// What a genuine slip for one order must show.
#[derive(Debug, Clone)]
pub struct Expectations {
    pub amount: Decimal,
    pub receiver_name: String,
    pub receiver_banks: Vec<String>,
    pub receiver_account: String,
    pub account_tail_length: usize,
}

impl Expectations {
    pub fn new(amount: Decimal, receiver: &ReceiverConfig) -> Self {
        Self {
            amount,
            receiver_name: receiver.name.clone(),
            receiver_banks: receiver.banks.clone(),
            receiver_account: receiver.account.clone(),
            account_tail_length: receiver.account_tail_length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Verified,
    Rejected,
    PendingReview,
}

/// Why a slip ended up where it did. Stored as the order's status reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Verified,
    AmountMissing,
    AmountMismatch,
    LowConfidence,
    DuplicateSlip,
    InvalidUrl,
    PayloadTooLarge,
    FetchFailed,
    OcrFailed,
    DuplicateCheckFailed,
}

impl VerdictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::AmountMissing => "amount_missing",
            Self::AmountMismatch => "amount_mismatch",
            Self::LowConfidence => "low_confidence",
            Self::DuplicateSlip => "duplicate_slip",
            Self::InvalidUrl => "invalid_url",
            Self::PayloadTooLarge => "payload_too_large",
            Self::FetchFailed => "fetch_failed",
            Self::OcrFailed => "ocr_failed",
            Self::DuplicateCheckFailed => "duplicate_check_failed",
        }
    }
}

impl std::fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    pub success_phrase: bool,
    pub amount_found: bool,
    pub amount_match: bool,
    pub name_match: bool,
    pub bank_match: bool,
    pub account_match: bool,
}

impl Signals {
    fn points(&self) -> u32 {
        let mut points = 0;
        if self.success_phrase {
            points += WEIGHT_SUCCESS;
        }
        if self.amount_match {
            points += WEIGHT_AMOUNT;
        }
        if self.name_match {
            points += WEIGHT_NAME;
        }
        if self.bank_match {
            points += WEIGHT_BANK;
        }
        if self.account_match {
            points += WEIGHT_ACCOUNT;
        }
        points
    }
}

/// Receiver fields as read off the slip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverSignals {
    pub name: Option<String>,
    pub bank: Option<String>,
    pub account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub reason: VerdictReason,
    /// Weighted confidence in `[0, 1]`.
    pub score: f64,
    pub signals: Signals,
    pub receiver: ReceiverSignals,
    pub amount: Option<Decimal>,
    /// Best-effort transfer time (unix seconds, UTC).
    pub timestamp: Option<i64>,
    /// Filled by the pipeline once the image has been fetched.
    pub image_hash: Option<String>,
    /// SHA-256 of the normalized text. Empty text hashes to `None`.
    pub text_hash: Option<String>,
}

/// Strategy seam for slip text scoring.
pub trait SlipEvaluator: Send + Sync {
    fn evaluate(&self, text: &str, expected: &Expectations) -> Verdict;
}

/// Keyword and pattern heuristics tuned for Thai mobile-banking slips.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEvaluator;

impl SlipEvaluator for HeuristicEvaluator {
    fn evaluate(&self, text: &str, expected: &Expectations) -> Verdict {
        let lines = normalize_lines(text);
        let joined = lines.join("\n");
        let folded_text = fold(&joined);

        let success_phrase = SUCCESS_PHRASES
            .iter()
            .any(|p| folded_text.contains(&fold(p)));

        let amount = extract_amount(&lines);
        let amount_match = amount
            .map(|a| (a - expected.amount).abs() < Decimal::new(1, 2))
            .unwrap_or(false);

        let receiver = ReceiverSignals {
            name: field_after_keyword(&lines, NAME_KEYWORDS),
            bank: field_after_keyword(&lines, BANK_KEYWORDS),
            account: field_after_keyword(&lines, ACCOUNT_KEYWORDS),
        };

        let name_match = matches_expected(
            receiver.name.as_deref(),
            &folded_text,
            std::slice::from_ref(&expected.receiver_name),
        );
        let bank_match =
            matches_expected(receiver.bank.as_deref(), &folded_text, &expected.receiver_banks);
        let account_match = account_tail_matches(
            &lines,
            &expected.receiver_account,
            expected.account_tail_length,
        );

        let signals = Signals {
            success_phrase,
            amount_found: amount.is_some(),
            amount_match,
            name_match,
            bank_match,
            account_match,
        };
        let points = signals.points();

        let (status, reason) = if amount.is_none() {
            (VerdictStatus::PendingReview, VerdictReason::AmountMissing)
        } else if !amount_match {
            (VerdictStatus::Rejected, VerdictReason::AmountMismatch)
        } else if points >= VERIFIED_THRESHOLD {
            (VerdictStatus::Verified, VerdictReason::Verified)
        } else {
            (VerdictStatus::PendingReview, VerdictReason::LowConfidence)
        };

        Verdict {
            status,
            reason,
            score: f64::from(points) / 100.0,
            signals,
            receiver,
            amount,
            timestamp: parse_timestamp(&lines),
            image_hash: None,
            text_hash: (!joined.is_empty()).then(|| sha256_hex(joined.as_bytes())),
        }
    }
}

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}')
}

/// Thai digits to ASCII; NFKC leaves them alone.
fn ascii_digit(c: char) -> char {
    match c {
        '๐'..='๙' => char::from_u32('0' as u32 + (c as u32 - '๐' as u32)).unwrap_or(c),
        _ => c,
    }
}

/// NFKC, drop zero-width characters, trim and collapse whitespace per line,
/// and drop empty lines.
pub fn normalize_lines(text: &str) -> Vec<String> {
    let cleaned: String = text
        .nfkc()
        .filter(|c| !is_invisible(*c))
        .map(ascii_digit)
        .collect();

    cleaned
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Case- and space-insensitive form for phrase matching.
fn fold(s: &str) -> String {
    s.nfkc()
        .filter(|c| !is_invisible(*c) && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn contains_keyword(line: &str, keywords: &[&str]) -> bool {
    let folded = fold(line);
    keywords.iter().any(|k| folded.contains(&fold(k)))
}

/// Parse a numeric token as money. Rejects malformed digit grouping and
/// more than two decimal places.
fn parse_money(token: &str) -> Option<Decimal> {
    let token = token.trim_end_matches(',');
    if token.contains(',') && !GROUPED_NUMBER.is_match(token) {
        return None;
    }
    if let Some((_, frac)) = token.split_once('.')
        && frac.len() > 2
    {
        return None;
    }
    Decimal::from_str(&token.replace(',', "")).ok()
}

fn is_money_formatted(token: &str) -> bool {
    let token = token.trim_end_matches(',');
    token.contains(',') || token.contains('.')
}

fn first_money_token(line: &str) -> Option<Decimal> {
    NUMBER_TOKEN
        .find_iter(line)
        .find_map(|m| parse_money(m.as_str()))
}

/// Labelled amount lines first, then lines that only carry a currency unit,
/// otherwise the largest money-formatted token. Fee lines are never read.
fn extract_amount(lines: &[String]) -> Option<Decimal> {
    let candidates: Vec<&String> = lines
        .iter()
        .filter(|l| !contains_keyword(l, FEE_KEYWORDS))
        .collect();

    for keywords in [AMOUNT_KEYWORDS, CURRENCY_KEYWORDS] {
        let found = candidates
            .iter()
            .filter(|l| contains_keyword(l, keywords))
            .find_map(|l| first_money_token(l));
        if found.is_some() {
            return found;
        }
    }

    candidates
        .iter()
        .flat_map(|line| NUMBER_TOKEN.find_iter(line))
        .filter(|m| is_money_formatted(m.as_str()))
        .filter_map(|m| parse_money(m.as_str()))
        .max()
}

/// End offset of the first standalone occurrence of `key` in `line`.
/// ASCII keywords must start a word, so `bank` does not hit inside `kbank`.
fn keyword_end(line: &str, key: &str) -> Option<usize> {
    let needs_boundary = key.starts_with(|c: char| c.is_ascii_alphabetic());
    line.match_indices(key)
        .find(|(pos, _)| {
            !needs_boundary
                || !line[..*pos]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_ascii_alphanumeric())
        })
        .map(|(pos, _)| pos + key.len())
}

/// Text following the first keyword hit, or the next line when the keyword
/// stands alone.
fn field_after_keyword(lines: &[String], keywords: &[&str]) -> Option<String> {
    for (idx, line) in lines.iter().enumerate() {
        let lower: String = line.nfkc().flat_map(char::to_lowercase).collect();
        let hit = keywords.iter().find_map(|k| {
            let key: String = k.nfkc().flat_map(char::to_lowercase).collect();
            keyword_end(&lower, &key)
        });
        let Some(end) = hit else {
            continue;
        };

        let rest = lower[end..]
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '.' | '：'))
            .trim();
        if !rest.is_empty() {
            return Some(rest.to_string());
        }
        return lines.get(idx + 1).map(|next| next.to_lowercase());
    }
    None
}

/// Candidate-first substring match; without a candidate, search the full text.
fn matches_expected(candidate: Option<&str>, folded_text: &str, expected: &[String]) -> bool {
    let wanted: Vec<String> = expected
        .iter()
        .map(|e| fold(e))
        .filter(|e| !e.is_empty())
        .collect();
    if wanted.is_empty() {
        return false;
    }

    match candidate.map(fold).filter(|c| !c.is_empty()) {
        Some(candidate) => wanted.iter().any(|w| {
            candidate.contains(w.as_str())
                || (candidate.chars().count() >= 3 && w.contains(candidate.as_str()))
        }),
        None => wanted.iter().any(|w| folded_text.contains(w.as_str())),
    }
}

/// Only the last `tail_len` digits of the account are compared, so masked
/// displays (`xxx-x-x1234-x`) and OCR noise on leading digits still match.
fn account_tail_matches(lines: &[String], account: &str, tail_len: usize) -> bool {
    let digits: Vec<char> = account.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return false;
    }
    let take = if tail_len == 0 {
        digits.len()
    } else {
        tail_len.min(digits.len())
    };
    let tail: String = digits[digits.len() - take..].iter().collect();

    lines.iter().any(|line| {
        let line_digits: String = line.chars().filter(char::is_ascii_digit).collect();
        line_digits.contains(&tail)
    })
}

/// Two-digit years are Buddhist era when they would otherwise land in the
/// future (slips print "67" for 2567).
fn resolve_year(raw: &str, thai_month: bool) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    let current = Utc::now().year();
    let year = match raw.len() {
        4 if year > 2400 => year - BE_OFFSET,
        4 => year,
        2 if thai_month => 2500 + year - BE_OFFSET,
        2 if 2000 + year > current + 1 => 2500 + year - BE_OFFSET,
        2 => 2000 + year,
        _ => return None,
    };
    Some(year)
}

fn month_from_name(name: &str) -> Option<(u32, bool)> {
    let name = name.to_lowercase();
    MONTHS
        .iter()
        .enumerate()
        .find(|(_, (m, _))| name.starts_with(*m))
        .map(|(idx, (_, month))| (*month, idx < 12))
}

/// Best-effort transfer time. Returns `None` rather than guessing when no
/// date is recognizable.
fn parse_timestamp(lines: &[String]) -> Option<i64> {
    for line in lines {
        let date = if let Some(caps) = NAMED_MONTH_DATE.captures(line) {
            let day: u32 = caps[1].parse().ok()?;
            let (month, thai) = month_from_name(&caps[2])?;
            let year = resolve_year(&caps[3], thai)?;
            NaiveDate::from_ymd_opt(year, month, day)
        } else if let Some(caps) = NUMERIC_DATE.captures(line) {
            let day: u32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            let year = resolve_year(&caps[3], false)?;
            NaiveDate::from_ymd_opt(year, month, day)
        } else {
            None
        };
        let Some(date) = date else {
            continue;
        };

        let time = lines
            .iter()
            .find_map(|l| CLOCK.captures(l))
            .and_then(|caps| {
                let h: u32 = caps[1].parse().ok()?;
                let m: u32 = caps[2].parse().ok()?;
                let s: u32 = caps.get(3).and_then(|s| s.as_str().parse().ok()).unwrap_or(0);
                NaiveTime::from_hms_opt(h, m, s)
            })
            .unwrap_or(NaiveTime::MIN);

        let offset = FixedOffset::east_opt(SLIP_UTC_OFFSET_SECS)?;
        return offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.timestamp());
    }
    None
}
