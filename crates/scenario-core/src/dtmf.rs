//! DTMF digits, per-call receive buffers and pattern matching

use std::fmt;

use tracing::warn;

/// One DTMF key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtmfDigit {
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Star,
    Pound,
    A,
    B,
    C,
    D,
}

impl DtmfDigit {
    pub fn to_char(self) -> char {
        match self {
            Self::Digit0 => '0',
            Self::Digit1 => '1',
            Self::Digit2 => '2',
            Self::Digit3 => '3',
            Self::Digit4 => '4',
            Self::Digit5 => '5',
            Self::Digit6 => '6',
            Self::Digit7 => '7',
            Self::Digit8 => '8',
            Self::Digit9 => '9',
            Self::Star => '*',
            Self::Pound => '#',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Digit0),
            '1' => Some(Self::Digit1),
            '2' => Some(Self::Digit2),
            '3' => Some(Self::Digit3),
            '4' => Some(Self::Digit4),
            '5' => Some(Self::Digit5),
            '6' => Some(Self::Digit6),
            '7' => Some(Self::Digit7),
            '8' => Some(Self::Digit8),
            '9' => Some(Self::Digit9),
            '*' => Some(Self::Star),
            '#' => Some(Self::Pound),
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            'C' | 'c' => Some(Self::C),
            'D' | 'd' => Some(Self::D),
            _ => None,
        }
    }
}

impl fmt::Display for DtmfDigit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Characters of `digits` that are not DTMF keys
pub fn invalid_digits(digits: &str) -> Vec<char> {
    digits
        .chars()
        .filter(|c| DtmfDigit::from_char(*c).is_none())
        .collect()
}

/// Whether `received` satisfies an expected digit pattern.
///
/// The pattern must be a prefix of what arrived; later digits are ignored.
pub fn matches_prefix(received: &str, expected: &str) -> bool {
    received.starts_with(expected)
}

/// Bounded record of the digits received on one call
#[derive(Debug, Clone)]
pub struct DtmfBuffer {
    digits: String,
    capacity: usize,
    dropped: usize,
}

impl DtmfBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            digits: String::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append a digit; digits past the capacity are dropped
    pub fn push(&mut self, digit: char) -> bool {
        if self.digits.chars().count() >= self.capacity {
            if self.dropped == 0 {
                warn!(
                    "DTMF buffer full ({} digits), dropping further digits",
                    self.capacity
                );
            }
            self.dropped += 1;
            return false;
        }
        self.digits.push(digit);
        true
    }

    pub fn as_str(&self) -> &str {
        &self.digits
    }

    pub fn len(&self) -> usize {
        self.digits.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    /// Digits discarded because the buffer was full
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn matches(&self, expected: &str) -> bool {
        matches_prefix(&self.digits, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matching() {
        assert!(matches_prefix("123456", "123"));
        assert!(matches_prefix("123", "123"));
        assert!(matches_prefix("9", ""));
        assert!(!matches_prefix("9123", "123"));
        assert!(!matches_prefix("12", "123"));
    }

    #[test]
    fn test_buffer_truncates_at_capacity() {
        let mut buffer = DtmfBuffer::new(3);
        for c in "12345".chars() {
            buffer.push(c);
        }
        assert_eq!(buffer.as_str(), "123");
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        assert!(buffer.matches("12"));
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_digit_chars() {
        for c in "0123456789*#ABCD".chars() {
            assert_eq!(DtmfDigit::from_char(c).map(DtmfDigit::to_char), Some(c));
        }
        assert_eq!(DtmfDigit::from_char('b'), Some(DtmfDigit::B));
        assert_eq!(invalid_digits("12x#e"), vec!['x', 'e']);
    }
}
