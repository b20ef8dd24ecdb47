//! Password strength rules, generation and scoring.
//!
//! Works on plaintext candidates only; hashing lives in `password`.

use rand::{rngs::OsRng, seq::SliceRandom};
use serde::Serialize;

pub const MIN_LENGTH: usize = 8;
/// Length of administrator-generated passwords.
pub const GENERATED_LENGTH: usize = 16;

pub const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
pub const DIGITS: &[u8] = b"0123456789";
pub const SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{};:,.<>?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    TooShort,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
}

impl Violation {
    pub fn message(self) -> String {
        match self {
            Self::TooShort => format!("Password must be at least {MIN_LENGTH} characters long"),
            Self::MissingUppercase => "Password must contain at least one uppercase letter".into(),
            Self::MissingLowercase => "Password must contain at least one lowercase letter".into(),
            Self::MissingDigit => "Password must contain at least one number".into(),
            Self::MissingSymbol => format!(
                "Password must contain at least one special character ({})",
                String::from_utf8_lossy(SYMBOLS)
            ),
        }
    }
}

fn is_symbol(c: char) -> bool {
    c.is_ascii() && SYMBOLS.contains(&(c as u8))
}

#[derive(Default)]
struct Coverage {
    upper: bool,
    lower: bool,
    digit: bool,
    symbol: bool,
}

fn coverage(password: &str) -> Coverage {
    let mut c = Coverage::default();
    for ch in password.chars() {
        c.upper |= ch.is_ascii_uppercase();
        c.lower |= ch.is_ascii_lowercase();
        c.digit |= ch.is_ascii_digit();
        c.symbol |= is_symbol(ch);
    }
    c
}

/// Every rule `password` breaks, in a stable order. Empty means acceptable.
pub fn validate(password: &str) -> Vec<Violation> {
    let c = coverage(password);
    let mut out = Vec::new();
    if password.chars().count() < MIN_LENGTH {
        out.push(Violation::TooShort);
    }
    if !c.upper {
        out.push(Violation::MissingUppercase);
    }
    if !c.lower {
        out.push(Violation::MissingLowercase);
    }
    if !c.digit {
        out.push(Violation::MissingDigit);
    }
    if !c.symbol {
        out.push(Violation::MissingSymbol);
    }
    out
}

/// Random password of `GENERATED_LENGTH` drawn from the OS CSPRNG, with at
/// least one character of every class at an unpredictable position.
pub fn generate() -> String {
    let mut rng = OsRng;
    let classes = [UPPERCASE, LOWERCASE, DIGITS, SYMBOLS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = Vec::with_capacity(GENERATED_LENGTH);
    for class in classes {
        if let Some(&c) = class.choose(&mut rng) {
            chars.push(c);
        }
    }
    while chars.len() < GENERATED_LENGTH {
        if let Some(&c) = all.choose(&mut rng) {
            chars.push(c);
        }
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

/// UX-only score in `0..=4`. Never used to accept or reject.
pub fn strength_score(password: &str) -> u8 {
    let len = password.chars().count();
    let c = coverage(password);
    let mut score = 0u8;
    if len >= MIN_LENGTH {
        score += 1;
    }
    if len >= 12 {
        score += 1;
    }
    if c.upper && c.lower {
        score += 1;
    }
    if c.digit {
        score += 1;
    }
    if c.symbol {
        score += 1;
    }
    score.min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_password_has_no_violations() {
        assert!(validate("NewPassword456!").is_empty());
    }

    #[test]
    fn reports_every_missing_class_at_once() {
        assert_eq!(
            validate("abc"),
            vec![
                Violation::TooShort,
                Violation::MissingUppercase,
                Violation::MissingDigit,
                Violation::MissingSymbol,
            ]
        );
        assert_eq!(validate("ALLUPPER123!"), vec![Violation::MissingLowercase]);
        assert_eq!(validate("NoDigits!!"), vec![Violation::MissingDigit]);
        assert_eq!(validate("NoSymbol123"), vec![Violation::MissingSymbol]);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // 7 characters, more than 8 bytes.
        assert!(validate("Aé1!ééé").contains(&Violation::TooShort));
    }

    #[test]
    fn non_listed_punctuation_is_not_a_symbol() {
        assert!(validate("Password123~").contains(&Violation::MissingSymbol));
    }

    #[test]
    fn generated_passwords_satisfy_policy() {
        for _ in 0..200 {
            let pw = generate();
            assert_eq!(pw.chars().count(), GENERATED_LENGTH);
            assert!(validate(&pw).is_empty(), "generated {pw:?} violates policy");
        }
    }

    #[test]
    fn generated_passwords_differ() {
        assert_ne!(generate(), generate());
    }

    #[test]
    fn guaranteed_characters_are_not_pinned_to_the_front() {
        // With a fixed class order the first char would always be uppercase.
        let leading_upper = (0..200)
            .filter(|_| generate().starts_with(|c: char| c.is_ascii_uppercase()))
            .count();
        assert!(leading_upper < 200);
    }

    #[test]
    fn score_tiers() {
        assert_eq!(strength_score(""), 0);
        assert_eq!(strength_score("abcdefgh"), 1);
        assert_eq!(strength_score("abcdefghijkl"), 2);
        assert_eq!(strength_score("Abcdefghijkl"), 3);
        assert_eq!(strength_score("Abcdefghijk1!"), 4);
        assert_eq!(strength_score("Ab1!"), 3);
    }
}
