use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// The longest accepted duration, `i64::MAX` nanoseconds or roughly 292 years.
const MAX_NANOS: u128 = i64::MAX as u128;

/// Raised if a [`HumanDuration`] cannot be parsed from a string.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseDurationError {
    /// The string was empty.
    #[error("empty duration")]
    Empty,
    /// A component did not start with a valid number.
    #[error("invalid number in duration")]
    InvalidNumber,
    /// A component used a unit other than `ns`, `us`, `ms`, `s`, `m` or `h`.
    #[error("unknown unit {0:?} in duration")]
    UnknownUnit(String),
    /// The duration exceeds `i64::MAX` nanoseconds.
    #[error("duration out of range")]
    Overflow,
}

/// A [`Duration`] written as a sequence of decimal numbers with unit suffixes.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`, for example `30s`, `1m30s`,
/// `1.5h` or `500ms`. A bare number is interpreted as seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    /// Creates a duration of the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Returns the wrapped [`Duration`].
    pub const fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3_600 * NANOS_PER_SEC,
        _ => return None,
    })
}

/// Splits off the leading `<int>[.<frac>]` of a component and returns it with the remainder.
fn split_number(s: &str) -> Result<(&str, &str, &str), ParseDurationError> {
    let int_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (int, rest) = s.split_at(int_end);

    let (frac, rest) = match rest.strip_prefix('.') {
        Some(rest) => {
            let frac_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            rest.split_at(frac_end)
        }
        None => ("", rest),
    };

    if int.is_empty() && frac.is_empty() {
        return Err(ParseDurationError::InvalidNumber);
    }

    Ok((int, frac, rest))
}

fn parse_digits(digits: &str) -> Result<u128, ParseDurationError> {
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse().map_err(|_| ParseDurationError::Overflow)
}

impl FromStr for HumanDuration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseDurationError::Empty);
        }

        // Plain seconds, as accepted by most command line tools.
        if let Ok(secs) = s.parse::<u64>() {
            if u128::from(secs) * NANOS_PER_SEC > MAX_NANOS {
                return Err(ParseDurationError::Overflow);
            }
            return Ok(Self::from_secs(secs));
        }

        let mut total: u128 = 0;
        let mut rest = s;

        while !rest.is_empty() {
            let (int, frac, tail) = split_number(rest)?;

            let unit_end = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);
            if unit.is_empty() {
                return Err(ParseDurationError::UnknownUnit(String::new()));
            }
            let scale =
                unit_nanos(unit).ok_or_else(|| ParseDurationError::UnknownUnit(unit.to_owned()))?;

            // Keep at most nanosecond precision of the fraction.
            let frac = &frac[..frac.len().min(18)];
            let frac_scale = 10u128.pow(frac.len() as u32);

            let whole = parse_digits(int)?
                .checked_mul(scale)
                .ok_or(ParseDurationError::Overflow)?;
            let part = parse_digits(frac)?
                .checked_mul(scale)
                .ok_or(ParseDurationError::Overflow)?
                / frac_scale;

            total = total
                .checked_add(whole)
                .and_then(|t| t.checked_add(part))
                .ok_or(ParseDurationError::Overflow)?;
            rest = tail;
        }

        if total > MAX_NANOS {
            return Err(ParseDurationError::Overflow);
        }

        let secs = (total / NANOS_PER_SEC) as u64;
        let nanos = (total % NANOS_PER_SEC) as u32;
        Ok(Self(Duration::new(secs, nanos)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();

        if secs == 0 {
            return match nanos {
                0 => f.write_str("0s"),
                n if n % 1_000_000 == 0 => write!(f, "{}ms", n / 1_000_000),
                n if n % 1_000 == 0 => write!(f, "{}us", n / 1_000),
                n => write!(f, "{n}ns"),
            };
        }

        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        if nanos > 0 {
            let frac = format!("{nanos:09}");
            write!(f, "{seconds}.{}s", frac.trim_end_matches('0'))?;
        } else if seconds > 0 {
            write!(f, "{seconds}s")?;
        }

        Ok(())
    }
}

relay_common::impl_str_serde!(HumanDuration, "a duration such as 30s or 1m");

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Duration {
        s.parse::<HumanDuration>().unwrap().as_duration()
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse("1m"), Duration::from_secs(60));
        assert_eq!(parse("30s"), Duration::from_secs(30));
        assert_eq!(parse("500ms"), Duration::from_millis(500));
        assert_eq!(parse("1h"), Duration::from_secs(3600));
        assert_eq!(parse("250us"), Duration::from_micros(250));
        assert_eq!(parse("7ns"), Duration::from_nanos(7));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse("1m30s"), Duration::from_secs(90));
        assert_eq!(parse("1h0m0s"), Duration::from_secs(3600));
        assert_eq!(parse("1.5s"), Duration::from_millis(1500));
        assert_eq!(parse(".5m"), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_bare_seconds() {
        assert_eq!(parse("60"), Duration::from_secs(60));
        assert_eq!(parse("0"), Duration::ZERO);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<HumanDuration>(), Err(ParseDurationError::Empty));
        assert_eq!(
            "ms".parse::<HumanDuration>(),
            Err(ParseDurationError::InvalidNumber)
        );
        assert_eq!(
            "10 days".parse::<HumanDuration>(),
            Err(ParseDurationError::UnknownUnit(" days".to_owned()))
        );
        assert_eq!(
            "1.5".parse::<HumanDuration>(),
            Err(ParseDurationError::UnknownUnit(String::new()))
        );
    }

    #[test]
    fn test_parse_out_of_range() {
        assert_eq!(
            "18446744073709551615".parse::<HumanDuration>(),
            Err(ParseDurationError::Overflow)
        );
        assert_eq!(
            "9223372037s".parse::<HumanDuration>(),
            Err(ParseDurationError::Overflow)
        );
        assert_eq!(
            "2562048h".parse::<HumanDuration>(),
            Err(ParseDurationError::Overflow)
        );

        // The largest accepted value, 2562047h47m16.854775807s.
        assert_eq!(
            parse("9223372036854775807ns"),
            Duration::new(9_223_372_036, 854_775_807)
        );
        assert_eq!(parse("9223372036"), Duration::from_secs(9_223_372_036));
    }

    #[test]
    fn test_display() {
        assert_eq!(HumanDuration::from_secs(60).to_string(), "1m");
        assert_eq!(HumanDuration::from_secs(90).to_string(), "1m30s");
        assert_eq!(HumanDuration::from_secs(3605).to_string(), "1h5s");
        assert_eq!(
            HumanDuration(Duration::from_millis(1500)).to_string(),
            "1.5s"
        );
        assert_eq!(HumanDuration(Duration::from_millis(20)).to_string(), "20ms");
        assert_eq!(HumanDuration::default().to_string(), "0s");
    }

    #[test]
    fn test_serde() {
        let duration: HumanDuration = serde_json::from_str("\"2m\"").unwrap();
        assert_eq!(duration, HumanDuration::from_secs(120));
        assert_eq!(serde_json::to_string(&duration).unwrap(), "\"2m\"");
    }
}
