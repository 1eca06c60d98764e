//! Phone number normalization.
//!
//! Every number that is stored, looked up, or compared goes through
//! [`normalize_phone`] first. Two call sites disagreeing on the format is
//! enough to break reply correlation silently.

/// Canonicalize a phone number to its directory key.
///
/// Strips everything that is not an ASCII digit. An 11-digit result that
/// starts with the `1` country code loses that leading digit; any other
/// length passes through unchanged.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// Format a normalized number for the provider's REST API (E.164).
///
/// Ten-digit directory keys are North American numbers whose country code was
/// stripped by [`normalize_phone`], so it is restored here.
pub fn to_e164(normalized: &str) -> String {
    let digits = normalize_phone(normalized);
    if digits.len() == 10 {
        format!("+1{digits}")
    } else {
        format!("+{digits}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_us_country_code() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "5551234567");
        assert_eq!(normalize_phone("15551234567"), "5551234567");
    }

    #[test]
    fn ten_digits_pass_through() {
        assert_eq!(normalize_phone("555.123.4567"), "5551234567");
    }

    #[test]
    fn eleven_digits_without_leading_one_are_kept() {
        assert_eq!(normalize_phone("+4 4555123456"), "44555123456");
    }

    #[test]
    fn other_lengths_only_lose_punctuation() {
        assert_eq!(normalize_phone("+44 20 7946 0958"), "442079460958");
        assert_eq!(normalize_phone("1-800"), "1800");
        assert_eq!(normalize_phone(""), "");
        assert_eq!(normalize_phone("no digits"), "");
    }

    #[test]
    fn twelve_digits_starting_with_one_are_kept() {
        assert_eq!(normalize_phone("155512345678"), "155512345678");
    }

    #[test]
    fn e164_restores_country_code() {
        assert_eq!(to_e164("5551234567"), "+15551234567");
        assert_eq!(to_e164("(555) 123-4567"), "+15551234567");
        assert_eq!(to_e164("442079460958"), "+442079460958");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "+1 (555) 123-4567",
            "15551234567",
            "5551234567",
            "+44 20 7946 0958",
            "1-800",
            "11111111111",
            "",
        ] {
            let once = normalize_phone(raw);
            assert_eq!(normalize_phone(&once), once, "input: {raw}");
        }
    }
}
