//! Normalizes operator input into a value the target VR accepts.

use thiserror::Error;

use crate::dataset::Vr;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {vr} value {value:?}: {message}")]
pub struct CoercionError {
    pub vr: Vr,
    pub value: String,
    pub message: String,
}

pub fn coerce(vr: Vr, raw: &str) -> Result<String, CoercionError> {
    let value = raw.trim();
    let fail = |message: String| CoercionError {
        vr,
        value: value.to_string(),
        message,
    };

    reject_control_chars(vr, value).map_err(fail)?;

    match vr {
        Vr::DS if value.is_empty() => Ok("0".to_string()),
        Vr::IS if value.is_empty() => Ok("0".to_string()),
        Vr::DS => each_component(value, check_decimal).map_err(fail),
        Vr::IS => each_component(value, check_integer).map_err(fail),
        Vr::AS => each_component(value, check_age).map_err(fail),
        Vr::DA => each_component(value, check_date).map_err(fail),
        Vr::TM => each_component(value, check_time).map_err(fail),
        Vr::DT => each_component(value, check_datetime).map_err(fail),
        Vr::CS => each_component(value, check_code_string).map_err(fail),
        Vr::SH => each_component(value, |part| check_length(part, 16)).map_err(fail),
        Vr::LO => each_component(value, |part| check_length(part, 64)).map_err(fail),
        Vr::PN => each_component(value, check_person_name).map_err(fail),
        Vr::ST => check_length(value, 1024).map(|_| value.to_string()).map_err(fail),
        Vr::LT => check_length(value, 10240).map(|_| value.to_string()).map_err(fail),
        _ => Ok(value.to_string()),
    }
}

fn each_component<F>(value: &str, check: F) -> Result<String, String>
where
    F: Fn(&str) -> Result<(), String>,
{
    let parts = value.split('\\').map(str::trim).collect::<Vec<_>>();
    for part in &parts {
        if !part.is_empty() {
            check(part)?;
        }
    }
    Ok(parts.join("\\"))
}

fn reject_control_chars(vr: Vr, value: &str) -> Result<(), String> {
    let allows_layout = matches!(vr, Vr::ST | Vr::LT | Vr::UT);
    let offending = value.chars().find(|c| {
        c.is_control()
            && *c != '\u{1b}'
            && !(allows_layout && matches!(c, '\r' | '\n' | '\t' | '\u{0c}'))
    });
    match offending {
        Some(c) => Err(format!("control character {:?} is not allowed", c)),
        None => Ok(()),
    }
}

fn check_length(part: &str, max: usize) -> Result<(), String> {
    let len = part.chars().count();
    if len > max {
        return Err(format!("{len} characters exceeds the limit of {max}"));
    }
    Ok(())
}

fn check_decimal(part: &str) -> Result<(), String> {
    check_length(part, 16)?;
    let digits_ok = part
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    match part.parse::<f64>() {
        Ok(number) if digits_ok && number.is_finite() => Ok(()),
        _ => Err("expected a decimal number".to_string()),
    }
}

fn check_integer(part: &str) -> Result<(), String> {
    check_length(part, 12)?;
    part.parse::<i32>()
        .map(|_| ())
        .map_err(|_| "expected an integer in 32-bit range".to_string())
}

fn check_age(part: &str) -> Result<(), String> {
    let bytes = part.as_bytes();
    let valid = bytes.len() == 4
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && matches!(bytes[3], b'D' | b'W' | b'M' | b'Y');
    if valid {
        Ok(())
    } else {
        Err("expected nnnD, nnnW, nnnM or nnnY".to_string())
    }
}

fn all_digits(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Accepts YYYY, YYYYMM or YYYYMMDD. DA itself requires all eight digits.
fn check_date_prefix(part: &str) -> Result<(), String> {
    if !all_digits(part) || !matches!(part.len(), 4 | 6 | 8) {
        return Err("expected YYYY[MM[DD]]".to_string());
    }
    let year = part[..4].parse::<u32>().unwrap_or(0);
    if part.len() >= 6 {
        let month = part[4..6].parse::<u32>().unwrap_or(0);
        if !(1..=12).contains(&month) {
            return Err(format!("month {month} is out of range"));
        }
        if part.len() == 8 {
            let day = part[6..8].parse::<u32>().unwrap_or(0);
            if day == 0 || day > days_in_month(year, month) {
                return Err(format!("day {day} is out of range"));
            }
        }
    }
    Ok(())
}

fn check_date(part: &str) -> Result<(), String> {
    if part.len() != 8 {
        return Err("expected YYYYMMDD".to_string());
    }
    check_date_prefix(part)
}

fn check_time(part: &str) -> Result<(), String> {
    let (clock, fraction) = match part.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (part, None),
    };
    if !all_digits(clock) || !matches!(clock.len(), 2 | 4 | 6) {
        return Err("expected HH[MM[SS[.FFFFFF]]]".to_string());
    }
    if let Some(fraction) = fraction {
        if clock.len() != 6 || !all_digits(fraction) || fraction.len() > 6 {
            return Err("fraction needs HHMMSS and 1 to 6 digits".to_string());
        }
    }

    let field = |range: std::ops::Range<usize>| {
        clock.get(range).and_then(|s| s.parse::<u32>().ok())
    };
    if field(0..2).is_some_and(|hours| hours > 23) {
        return Err("hours must be below 24".to_string());
    }
    if field(2..4).is_some_and(|minutes| minutes > 59) {
        return Err("minutes must be below 60".to_string());
    }
    if field(4..6).is_some_and(|seconds| seconds > 59) {
        return Err("seconds must be below 60".to_string());
    }
    Ok(())
}

fn check_datetime(part: &str) -> Result<(), String> {
    let (body, offset) = match part.rfind(['+', '-']) {
        Some(position) => (&part[..position], Some(&part[position + 1..])),
        None => (part, None),
    };
    if let Some(offset) = offset {
        if offset.len() != 4 || !all_digits(offset) {
            return Err("offset must be +HHMM or -HHMM".to_string());
        }
        let hours = offset[..2].parse::<u32>().unwrap_or(99);
        let minutes = offset[2..].parse::<u32>().unwrap_or(99);
        if hours > 14 || minutes > 59 {
            return Err("offset is out of range".to_string());
        }
    }

    let date_len = body
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(index, _)| index)
        .unwrap_or(body.len())
        .min(8);
    let date_len = match date_len {
        len if len >= 8 => 8,
        len if len >= 6 && body.len() == len => 6,
        len if len >= 4 && body.len() == len => 4,
        _ => return Err("expected YYYY[MM[DD[HH[MM[SS[.F]]]]]]".to_string()),
    };
    check_date_prefix(&body[..date_len])?;

    let time = &body[date_len..];
    if time.is_empty() {
        Ok(())
    } else {
        check_time(time)
    }
}

fn check_code_string(part: &str) -> Result<(), String> {
    check_length(part, 16)?;
    if part
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == ' ' || c == '_')
    {
        Ok(())
    } else {
        Err("only A-Z, 0-9, space and underscore are allowed".to_string())
    }
}

fn check_person_name(part: &str) -> Result<(), String> {
    for group in part.split('=') {
        check_length(group, 64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_default_to_zero_when_blank() {
        assert_eq!(coerce(Vr::DS, "  ").expect("blank DS"), "0");
        assert_eq!(coerce(Vr::IS, "").expect("blank IS"), "0");
    }

    #[test]
    fn decimal_strings_are_validated_per_component() {
        assert_eq!(coerce(Vr::DS, " 1.5 \\ -2e3 ").expect("valid DS"), "1.5\\-2e3");
        assert!(coerce(Vr::DS, "abc").is_err());
        assert!(coerce(Vr::DS, "inf").is_err());
        assert!(coerce(Vr::DS, "12345678901234567").is_err());
    }

    #[test]
    fn integer_strings_must_fit_in_i32() {
        assert_eq!(coerce(Vr::IS, "42").expect("valid IS"), "42");
        assert!(coerce(Vr::IS, "2147483648").is_err());
        assert!(coerce(Vr::IS, "1.5").is_err());
    }

    #[test]
    fn dates_require_real_calendar_days() {
        assert!(coerce(Vr::DA, "20240229").is_ok());
        assert!(coerce(Vr::DA, "20230229").is_err());
        assert!(coerce(Vr::DA, "20241301").is_err());
        assert!(coerce(Vr::DA, "2024-01-01").is_err());
    }

    #[test]
    fn times_accept_partial_precision() {
        for ok in ["07", "0730", "073015", "073015.123456"] {
            assert!(coerce(Vr::TM, ok).is_ok(), "{ok}");
        }
        for bad in ["24", "0760", "073060", "0730.5", "073015.1234567"] {
            assert!(coerce(Vr::TM, bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn datetimes_combine_date_time_and_offset() {
        for ok in ["2024", "202403", "20240315", "20240315073015", "20240315073015.5+0100"] {
            assert!(coerce(Vr::DT, ok).is_ok(), "{ok}");
        }
        for bad in ["20241315", "2024031599", "20240315+01", "20240315-2500"] {
            assert!(coerce(Vr::DT, bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn ages_and_code_strings_follow_their_alphabets() {
        assert!(coerce(Vr::AS, "045Y").is_ok());
        assert!(coerce(Vr::AS, "45Y").is_err());
        assert!(coerce(Vr::CS, "ORIGINAL\\PRIMARY").is_ok());
        assert!(coerce(Vr::CS, "lower").is_err());
        assert!(coerce(Vr::CS, "A_VERY_LONG_CODE_STRING").is_err());
    }

    #[test]
    fn length_limits_apply_per_vr() {
        assert!(coerce(Vr::SH, &"x".repeat(16)).is_ok());
        assert!(coerce(Vr::SH, &"x".repeat(17)).is_err());
        assert!(coerce(Vr::LO, &"x".repeat(65)).is_err());
        assert!(coerce(Vr::ST, &"x".repeat(1024)).is_ok());
        assert!(coerce(Vr::ST, &"x".repeat(1025)).is_err());
        assert!(coerce(Vr::UT, &"x".repeat(20_000)).is_ok());
    }

    #[test]
    fn control_characters_only_allowed_in_long_text() {
        assert!(coerce(Vr::LO, "line\nbreak").is_err());
        assert!(coerce(Vr::LT, "line\nbreak").is_ok());
        assert!(coerce(Vr::ST, "bell\u{7}").is_err());
    }

    #[test]
    fn errors_name_the_vr_and_value() {
        let err = coerce(Vr::DA, "soon").unwrap_err();
        assert_eq!(err.vr, Vr::DA);
        assert!(err.to_string().contains("DA"));
        assert!(err.to_string().contains("soon"));
    }
}
