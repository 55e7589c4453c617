use std::sync::LazyLock;

use regex::Regex;

/// Longest miner name the write endpoint accepts.
pub const MINER_NAME_MAX_LEN: usize = 32;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static pattern compiles"));

/// Reduce a miner name to the characters the write endpoint accepts.
///
/// Keeps ASCII letters, digits, `-` and `_`, then truncates to
/// [`MINER_NAME_MAX_LEN`]. May return an empty string.
pub fn sanitize_miner_name(name: &str) -> String {
    let mut sanitized = DISALLOWED.replace_all(name, "").into_owned();
    // Only ASCII survives the filter, so byte truncation is char-safe.
    sanitized.truncate(MINER_NAME_MAX_LEN);
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Garage", "Garage"; "plain")]
    #[test_case("bitaxe-gamma_01", "bitaxe-gamma_01"; "dash_and_underscore")]
    #[test_case("Office Desk #2", "OfficeDesk2"; "spaces_and_symbols")]
    #[test_case("bitaxe.local", "bitaxelocal"; "dots")]
    #[test_case("größe", "gre"; "non_ascii")]
    #[test_case("", ""; "empty")]
    #[test_case("***", ""; "nothing_left")]
    fn sanitizes(input: &str, expected: &str) {
        assert_eq!(sanitize_miner_name(input), expected);
    }

    #[test]
    fn truncates_to_max_len() {
        let long = "a".repeat(40);
        assert_eq!(sanitize_miner_name(&long).len(), MINER_NAME_MAX_LEN);
    }
}
