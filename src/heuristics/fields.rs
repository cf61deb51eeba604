use super::{AMOUNT_NOT_FOUND, DATE_UNKNOWN, ExtractedFields};
use regex::Regex;
use time::{Date, Month};

/// Main extraction entry point: first-line merchant, max-value amount, first parseable date.
pub fn extract(text: &str) -> ExtractedFields {
    ExtractedFields {
        merchant_name: extract_merchant_name(text),
        total_amount: extract_total_amount(text),
        purchased_at: extract_purchase_date(text),
    }
}

// ---------------------------------------------------------------------------
// Merchant
// ---------------------------------------------------------------------------

fn extract_merchant_name(text: &str) -> String {
    // The store name is usually printed as the receipt header.
    text.split('\n').next().unwrap_or_default().trim().to_string()
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

fn extract_total_amount(text: &str) -> String {
    let Ok(re) = Regex::new(r"[0-9,]+\.[0-9]{2}") else {
        return AMOUNT_NOT_FOUND.to_string();
    };

    // The grand total is typically the largest number on a receipt.
    let max = re
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        // Digit runs past f64 range parse as infinity.
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

    match max {
        Some(v) => format_amount(v),
        None => AMOUNT_NOT_FOUND.to_string(),
    }
}

/// Render with comma thousands separators and two fraction digits: `1,234.56`.
pub(crate) fn format_amount(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let digits = int_part.as_bytes();
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, &b) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(b as char);
    }

    let sign = if value.is_sign_negative() && value != 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

// ---------------------------------------------------------------------------
// Purchase date
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum FieldOrder {
    DayMonthYear,
    MonthDayYear,
    YearMonthDay,
}

#[derive(Debug, Clone, Copy)]
enum YearDigits {
    Four,
    Two,
}

#[derive(Debug, Clone, Copy)]
struct DateFormat {
    separator: char,
    order: FieldOrder,
    year: YearDigits,
}

/// Tried in order for each candidate; an ambiguous `01/02/2024` resolves to
/// day/month because that format comes first.
const DATE_FORMATS: [DateFormat; 6] = [
    DateFormat { separator: '/', order: FieldOrder::DayMonthYear, year: YearDigits::Four },
    DateFormat { separator: '/', order: FieldOrder::MonthDayYear, year: YearDigits::Four },
    DateFormat { separator: '/', order: FieldOrder::YearMonthDay, year: YearDigits::Four },
    DateFormat { separator: '-', order: FieldOrder::YearMonthDay, year: YearDigits::Four },
    DateFormat { separator: '/', order: FieldOrder::MonthDayYear, year: YearDigits::Two },
    DateFormat { separator: '-', order: FieldOrder::DayMonthYear, year: YearDigits::Two },
];

fn extract_purchase_date(text: &str) -> String {
    let Ok(re) = Regex::new(r"[0-9]{2,4}[-/][0-9]{2}[-/][0-9]{2,4}") else {
        return DATE_UNKNOWN.to_string();
    };

    re.find_iter(text)
        .find_map(|m| DATE_FORMATS.iter().find_map(|fmt| parse_date(m.as_str(), fmt)))
        .map(|d| format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day()))
        .unwrap_or_else(|| DATE_UNKNOWN.to_string())
}

fn parse_date(candidate: &str, fmt: &DateFormat) -> Option<Date> {
    let parts: Vec<&str> = candidate.split(fmt.separator).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };

    let (day, month, year) = match fmt.order {
        FieldOrder::DayMonthYear => (*a, *b, *c),
        FieldOrder::MonthDayYear => (*b, *a, *c),
        FieldOrder::YearMonthDay => (*c, *b, *a),
    };

    let day = parse_day_or_month(day)?;
    let month = parse_day_or_month(month)?;
    let year = parse_year(year, fmt.year)?;

    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

fn parse_day_or_month(s: &str) -> Option<u8> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_year(s: &str, digits: YearDigits) -> Option<i32> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits {
        YearDigits::Four if s.len() == 4 => s.parse().ok().filter(|&y| y >= 1),
        // 69..=99 → 1900s, 00..=68 → 2000s
        YearDigits::Two if s.len() == 2 => {
            let y: i32 = s.parse().ok()?;
            Some(if y >= 69 { 1900 + y } else { 2000 + y })
        }
        _ => None,
    }
}
