//! Duration specs and the free-text duration parser
//!
//! Grants and entitlements are issued for human-written validity periods
//! such as `"10 horas"`, `"1 día"` or `"3 MESES"`. [`DurationSpec::parse`]
//! turns that text into a canonical value that carries both the calendar
//! unit and count (for calendar arithmetic) and a minute count (for fixed
//! arithmetic).
//!
//! Minute multipliers use fixed approximations: a month is 30 days and a
//! year is 365 days. Calendar-mode expiry does not use these.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// `<integer><optional space><unit word>`
static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9]+)\s?([\p{L}\p{M}]+)\s*$").expect("duration pattern is valid")
});

pub const MINUTES_PER_HOUR: i64 = 60;
pub const MINUTES_PER_DAY: i64 = 1_440;
pub const MINUTES_PER_WEEK: i64 = 10_080;
pub const MINUTES_PER_MONTH: i64 = 43_200;
pub const MINUTES_PER_YEAR: i64 = 525_600;

/// Why a duration text was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("'{0}' does not look like '<number> <unit>'")]
    NoMatch(String),

    #[error("duration count must be positive, got {0}")]
    NonPositive(i64),

    #[error("duration count '{0}' is too large")]
    Overflow(String),

    #[error("unknown duration unit '{0}'")]
    UnknownUnit(String),
}

/// Calendar unit a duration was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl CalendarUnit {
    /// Fixed-length approximation of one unit, in minutes
    pub fn minutes(self) -> i64 {
        match self {
            CalendarUnit::Hour => MINUTES_PER_HOUR,
            CalendarUnit::Day => MINUTES_PER_DAY,
            CalendarUnit::Week => MINUTES_PER_WEEK,
            CalendarUnit::Month => MINUTES_PER_MONTH,
            CalendarUnit::Year => MINUTES_PER_YEAR,
        }
    }

    /// Resolve a unit word. Accepts singular and plural Spanish forms in any
    /// case, with or without accents.
    pub fn from_word(word: &str) -> Result<Self, ParseError> {
        match normalize_unit(word).as_str() {
            "hora" => Ok(CalendarUnit::Hour),
            "dia" => Ok(CalendarUnit::Day),
            "semana" => Ok(CalendarUnit::Week),
            "mes" => Ok(CalendarUnit::Month),
            "ano" => Ok(CalendarUnit::Year),
            _ => Err(ParseError::UnknownUnit(word.to_string())),
        }
    }

    fn label(self, count: u32) -> &'static str {
        let singular = count == 1;
        match self {
            CalendarUnit::Hour if singular => "hora",
            CalendarUnit::Hour => "horas",
            CalendarUnit::Day if singular => "día",
            CalendarUnit::Day => "días",
            CalendarUnit::Week if singular => "semana",
            CalendarUnit::Week => "semanas",
            CalendarUnit::Month if singular => "mes",
            CalendarUnit::Month => "meses",
            CalendarUnit::Year if singular => "año",
            CalendarUnit::Year => "años",
        }
    }
}

/// Lower-case, strip diacritics and the plural suffix. Accents may be
/// precomposed or trailing combining marks (NFD input).
///
/// `"Días"` -> `"dia"`, `"AÑOS"` -> `"ano"`, `"meses"` -> `"mes"`.
fn normalize_unit(word: &str) -> String {
    let folded: String = word
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| !('\u{0300}'..='\u{036F}').contains(c))
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect();

    match folded.as_str() {
        "mes" | "meses" => "mes".to_string(),
        other => other.strip_suffix('s').unwrap_or(other).to_string(),
    }
}

/// Canonical validity period.
///
/// `CalendarUnits` is what the parser produces; `FixedMinutes` covers
/// structured inputs that carry no calendar unit (integer day counts,
/// explicit minute counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationSpec {
    FixedMinutes(i64),
    CalendarUnits { count: u32, unit: CalendarUnit },
}

impl DurationSpec {
    /// Parse free text such as `"10 horas"`, `"1día"` or `"2 AÑOS"`
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let caps = DURATION_PATTERN
            .captures(text)
            .ok_or_else(|| ParseError::NoMatch(text.to_string()))?;

        let digits = &caps[1];
        let count: u32 = digits
            .parse()
            .map_err(|_| ParseError::Overflow(digits.to_string()))?;

        Self::from_parts(count as i64, &caps[2])
    }

    /// Build from a structured (count, unit word) pair, e.g. `(3, "meses")`
    pub fn from_parts(count: i64, unit: &str) -> Result<Self, ParseError> {
        if count <= 0 {
            return Err(ParseError::NonPositive(count));
        }
        let count = u32::try_from(count).map_err(|_| ParseError::Overflow(count.to_string()))?;
        let unit = CalendarUnit::from_word(unit)?;
        Ok(Self::CalendarUnits { count, unit })
    }

    /// Validity expressed as a whole number of days, without calendar unit
    pub fn days(days: i64) -> Result<Self, ParseError> {
        if days <= 0 {
            return Err(ParseError::NonPositive(days));
        }
        days.checked_mul(MINUTES_PER_DAY)
            .map(Self::FixedMinutes)
            .ok_or_else(|| ParseError::Overflow(days.to_string()))
    }

    /// Canonical length in minutes (calendar units use the fixed multipliers)
    pub fn minutes(&self) -> i64 {
        match *self {
            DurationSpec::FixedMinutes(minutes) => minutes,
            DurationSpec::CalendarUnits { count, unit } => count as i64 * unit.minutes(),
        }
    }

    /// Calendar unit and count, if the duration was written with one
    pub fn calendar(&self) -> Option<(u32, CalendarUnit)> {
        match *self {
            DurationSpec::FixedMinutes(_) => None,
            DurationSpec::CalendarUnits { count, unit } => Some((count, unit)),
        }
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DurationSpec::FixedMinutes(1) => write!(f, "1 minuto"),
            DurationSpec::FixedMinutes(minutes) => write!(f, "{} minutos", minutes),
            DurationSpec::CalendarUnits { count, unit } => {
                write!(f, "{} {}", count, unit.label(count))
            }
        }
    }
}

impl DurationSpec {
    /// Read back the text produced by `Display`.
    ///
    /// Accepts everything [`DurationSpec::parse`] does plus the
    /// `"<n> minutos"` rendering of `FixedMinutes`.
    pub fn from_display(text: &str) -> Result<Self, ParseError> {
        let trimmed = text.trim();
        let minutes = trimmed
            .strip_suffix("minutos")
            .or_else(|| trimmed.strip_suffix("minuto"))
            .and_then(|n| n.trim().parse::<i64>().ok());

        match minutes {
            Some(m) if m <= 0 => Err(ParseError::NonPositive(m)),
            Some(m) => Ok(DurationSpec::FixedMinutes(m)),
            None => Self::parse(text),
        }
    }
}

impl FromStr for DurationSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DurationSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DurationSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        DurationSpec::from_display(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT_FORMS: &[(&str, i64)] = &[
        ("hora", MINUTES_PER_HOUR),
        ("horas", MINUTES_PER_HOUR),
        ("HORAS", MINUTES_PER_HOUR),
        ("día", MINUTES_PER_DAY),
        ("días", MINUTES_PER_DAY),
        ("dia", MINUTES_PER_DAY),
        ("dias", MINUTES_PER_DAY),
        ("DÍAS", MINUTES_PER_DAY),
        ("semana", MINUTES_PER_WEEK),
        ("semanas", MINUTES_PER_WEEK),
        ("mes", MINUTES_PER_MONTH),
        ("meses", MINUTES_PER_MONTH),
        ("Meses", MINUTES_PER_MONTH),
        ("año", MINUTES_PER_YEAR),
        ("años", MINUTES_PER_YEAR),
        ("ano", MINUTES_PER_YEAR),
        ("anos", MINUTES_PER_YEAR),
        ("AÑOS", MINUTES_PER_YEAR),
    ];

    #[test]
    fn test_all_unit_forms() {
        for &(unit, multiplier) in UNIT_FORMS {
            for n in [1i64, 2, 7, 30, 365] {
                for text in [format!("{n} {unit}"), format!("{n}{unit}")] {
                    let spec = DurationSpec::parse(&text)
                        .unwrap_or_else(|e| panic!("{text:?} failed: {e}"));
                    assert_eq!(spec.minutes(), n * multiplier, "{text:?}");
                }
            }
        }
    }

    #[test]
    fn test_parse_keeps_calendar_unit() {
        let spec = DurationSpec::parse("3 meses").unwrap();
        assert_eq!(spec.calendar(), Some((3, CalendarUnit::Month)));

        let spec = DurationSpec::parse("10 horas").unwrap();
        assert_eq!(spec.calendar(), Some((10, CalendarUnit::Hour)));
    }

    #[test]
    fn test_surrounding_whitespace_allowed() {
        assert_eq!(DurationSpec::parse("  1 día ").unwrap().minutes(), MINUTES_PER_DAY);
    }

    #[test]
    fn test_rejects_non_positive() {
        assert_eq!(DurationSpec::parse("0 días"), Err(ParseError::NonPositive(0)));
        assert!(matches!(DurationSpec::parse("-3 días"), Err(ParseError::NoMatch(_))));
        assert!(matches!(DurationSpec::from_parts(-1, "horas"), Err(ParseError::NonPositive(-1))));
    }

    #[test]
    fn test_rejects_unknown_units_and_garbage() {
        assert!(matches!(DurationSpec::parse("5 minutos"), Err(ParseError::UnknownUnit(_))));
        assert!(matches!(DurationSpec::parse("2 weeks"), Err(ParseError::UnknownUnit(_))));
        assert!(matches!(DurationSpec::parse("me"), Err(ParseError::NoMatch(_))));
        assert!(matches!(DurationSpec::parse("días 3"), Err(ParseError::NoMatch(_))));
        assert!(matches!(DurationSpec::parse("3  días"), Err(ParseError::NoMatch(_))));
        assert!(matches!(DurationSpec::parse(""), Err(ParseError::NoMatch(_))));
    }

    #[test]
    fn test_decomposed_accents() {
        // "días" and "años" in NFD: base letter plus U+0301 / U+0303
        assert_eq!(DurationSpec::parse("3 di\u{301}as").unwrap().minutes(), 3 * MINUTES_PER_DAY);
        assert_eq!(DurationSpec::parse("1 an\u{303}o").unwrap().minutes(), MINUTES_PER_YEAR);
        assert_eq!(
            DurationSpec::parse("2 A\u{303}NOS").unwrap().calendar(),
            Some((2, CalendarUnit::Year))
        );
    }

    #[test]
    fn test_only_ascii_digits_count() {
        // Arabic-Indic and fullwidth digits
        assert!(matches!(DurationSpec::parse("\u{663} días"), Err(ParseError::NoMatch(_))));
        assert!(matches!(DurationSpec::parse("\u{ff13} días"), Err(ParseError::NoMatch(_))));
    }

    #[test]
    fn test_rejects_overflowing_count() {
        assert!(matches!(
            DurationSpec::parse("99999999999 días"),
            Err(ParseError::Overflow(_))
        ));
    }

    #[test]
    fn test_display_singular_plural() {
        assert_eq!(DurationSpec::parse("1 dias").unwrap().to_string(), "1 día");
        assert_eq!(DurationSpec::parse("3 MES").unwrap().to_string(), "3 meses");
        assert_eq!(DurationSpec::parse("2 ano").unwrap().to_string(), "2 años");
        assert_eq!(DurationSpec::days(30).unwrap().to_string(), "43200 minutos");
    }

    #[test]
    fn test_display_parses_back() {
        for text in ["1 hora", "12 horas", "1 día", "3 semanas", "1 mes", "6 meses", "1 año"] {
            let spec = DurationSpec::parse(text).unwrap();
            assert_eq!(DurationSpec::from_display(&spec.to_string()).unwrap(), spec);
        }
        let fixed = DurationSpec::FixedMinutes(90);
        assert_eq!(DurationSpec::from_display(&fixed.to_string()).unwrap(), fixed);
        assert!("90 minutos".parse::<DurationSpec>().is_err());
    }

    #[test]
    fn test_days_constructor() {
        assert_eq!(DurationSpec::days(2).unwrap(), DurationSpec::FixedMinutes(2 * MINUTES_PER_DAY));
        assert!(DurationSpec::days(0).is_err());
    }

    #[test]
    fn test_serde_uses_display_text() {
        let spec = DurationSpec::parse("2 semanas").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"2 semanas\"");
        let back: DurationSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
