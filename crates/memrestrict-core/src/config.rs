//! Configuration snapshot consulted by the budget gate and the diagnostics.

use serde::{Deserialize, Serialize};

/// Environment variable holding the byte budget.
pub const THRESHOLD_VAR: &str = "MR_THRESHOLD";

/// Environment variable switching diagnostics on.
pub const DEBUG_VAR: &str = "MR_DEBUG";

/// 2 MiB.
pub const DEFAULT_THRESHOLD_BYTES: usize = 2 * 1_048_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictConfig {
    /// Maximum number of live tracked bytes. Zero denies every non-empty request.
    pub threshold_bytes: usize,

    /// Emit a diagnostic line for every decision.
    pub debug: bool,
}

impl Default for RestrictConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            debug: false,
        }
    }
}

impl RestrictConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MR_THRESHOLD`: byte budget
    /// - `MR_DEBUG`: non-zero enables diagnostics
    pub fn from_env() -> Self {
        Self::from_lookup(|key| {
            std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
        })
    }

    /// Same as [`RestrictConfig::from_env`] but reading through `lookup`.
    ///
    /// Values are parsed the way C `strtol(value, NULL, 0)` parses them, so
    /// `0x100000`, `010` and `4096kb` are all accepted. Garbage parses as 0.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(s) = lookup(THRESHOLD_VAR) {
            // Negative budgets clamp to zero rather than wrapping to "unlimited".
            cfg.threshold_bytes = usize::try_from(parse_c_long(&s).max(0)).unwrap_or(usize::MAX);
        }

        if let Some(s) = lookup(DEBUG_VAR) {
            cfg.debug = parse_c_long(&s) != 0;
        }

        cfg
    }

    pub fn threshold(&self) -> usize {
        self.threshold_bytes
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }
}

/// Best-effort integer parse with `strtol(s, NULL, 0)` semantics.
///
/// Leading whitespace and an optional sign are accepted, `0x`/`0X` selects
/// hex, a leading `0` selects octal, and parsing stops at the first character
/// that is not a digit of the selected radix. Out-of-range values saturate.
pub fn parse_c_long(input: &str) -> i64 {
    let s = input.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '\x0b');

    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let hex_digits = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .filter(|d| d.starts_with(|c: char| c.is_ascii_hexdigit()));

    let (radix, digits) = match hex_digits {
        Some(d) => (16, d),
        None if rest.starts_with('0') => (8, rest),
        None => (10, rest),
    };

    let mut magnitude: i128 = 0;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else {
            break;
        };
        magnitude = magnitude * i128::from(radix) + i128::from(d);
        if magnitude > i128::from(i64::MAX) + 1 {
            // Saturated; keep consuming digits without growing.
            magnitude = i128::from(i64::MAX) + 1;
        }
    }

    let signed = if negative { -magnitude } else { magnitude };
    signed.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}
