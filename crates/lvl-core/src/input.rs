//! Validated parsing of user-supplied fields. A missing or malformed value is
//! always `InvalidInput`; nothing falls back to zero.

use crate::LevelError;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
/// Upper bound for a single task, which caps one completion at 1000 levels.
pub const MAX_TASK_XP: u32 = 1_000_000;

pub fn required<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, LevelError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(LevelError::invalid(format!("{field} is required"))),
    }
}

pub fn parse_integer(field: &str, value: Option<&str>) -> Result<i64, LevelError> {
    let raw = required(field, value)?;
    raw.parse::<i64>()
        .map_err(|_| LevelError::invalid(format!("{field} must be a whole number, got {raw:?}")))
}

pub fn task_name(name: &str) -> Result<String, LevelError> {
    bounded_text("name", name, MAX_NAME_LEN)
}

pub fn unlockable_description(description: &str) -> Result<String, LevelError> {
    bounded_text("description", description, MAX_DESCRIPTION_LEN)
}

pub fn task_xp(xp: i64) -> Result<u32, LevelError> {
    if xp <= 0 {
        return Err(LevelError::invalid(format!("xp must be positive, got {xp}")));
    }
    u32::try_from(xp)
        .ok()
        .filter(|xp| *xp <= MAX_TASK_XP)
        .ok_or_else(|| LevelError::invalid(format!("xp must be at most {MAX_TASK_XP}, got {xp}")))
}

pub fn unlockable_level(level: i64) -> Result<u64, LevelError> {
    u64::try_from(level)
        .map_err(|_| LevelError::invalid(format!("level must not be negative, got {level}")))
}

fn bounded_text(field: &str, value: &str, max_chars: usize) -> Result<String, LevelError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LevelError::invalid(format!("{field} must not be empty")));
    }
    if value.chars().count() > max_chars {
        return Err(LevelError::invalid(format!(
            "{field} is longer than {max_chars} characters"
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_blank_fields_are_rejected() {
        assert!(matches!(
            required("xp", None),
            Err(LevelError::InvalidInput(_))
        ));
        assert!(matches!(
            required("xp", Some("   ")),
            Err(LevelError::InvalidInput(_))
        ));
        assert_eq!(required("xp", Some(" 12 ")).expect("present"), "12");
    }

    #[test]
    fn integers_never_default_to_zero() {
        assert_eq!(parse_integer("xp", Some("250")).expect("number"), 250);
        assert_eq!(parse_integer("level", Some(" -1 ")).expect("number"), -1);
        for bad in ["abc", "12abc", "1.5", ""] {
            assert!(
                matches!(parse_integer("xp", Some(bad)), Err(LevelError::InvalidInput(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn xp_must_be_positive_and_fit() {
        assert!(task_xp(0).is_err());
        assert!(task_xp(-5).is_err());
        assert!(task_xp(i64::from(u32::MAX) + 1).is_err());
        assert!(task_xp(i64::from(MAX_TASK_XP) + 1).is_err());
        assert_eq!(task_xp(100).expect("positive"), 100);
        assert_eq!(task_xp(i64::from(MAX_TASK_XP)).expect("cap"), MAX_TASK_XP);
    }

    #[test]
    fn level_must_not_be_negative() {
        assert!(unlockable_level(-1).is_err());
        assert_eq!(unlockable_level(0).expect("zero ok"), 0);
        assert_eq!(unlockable_level(12).expect("positive"), 12);
    }

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(task_name("  Clean desk ").expect("name"), "Clean desk");
        assert!(task_name(" ").is_err());
        assert!(unlockable_description("").is_err());
        assert!(task_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
