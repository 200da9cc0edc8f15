//! Meter ID Codec
//!
//! Translates between the QoS controller's external meter-ID strings and
//! internal integer IDs.
//!
//! Decode rules, checked in this order:
//! 1. `"1a"`..`"1f"` → base-16 value of the two characters (26..=31)
//! 2. all digits, value ≤ 9 → value
//! 3. all digits, value ≥ 10 → value + 6 (10..=15 belong to the letters)
//! 4. single `a`..`f` → 10..=15
//! 5. anything else → [`FormatError`]
//!
//! `"20"`..`"25"` decode to 26..=31 through rule 3 and so alias `"1a"`..`"1f"`.
//! [`encode_meter_id`] always produces the canonical form, and forms beyond
//! `"1f"` that mix digits and letters are rejected rather than guessed.

/// Offset applied to multi-digit decimal IDs
const DECIMAL_OFFSET: u32 = 6;

/// First internal ID reached by the `"1a"`..`"1f"` forms
const HEX_PAIR_FIRST: u32 = 0x1a;
const HEX_PAIR_LAST: u32 = 0x1f;

/// Meter ID string outside the accepted domain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid meter id {input:?}: {reason}")]
pub struct FormatError {
    pub input: String,
    pub reason: &'static str,
}

impl FormatError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// External meter-ID string → internal integer ID
pub fn decode_meter_id(external: &str) -> Result<u32, FormatError> {
    let bytes = external.as_bytes();

    if bytes.is_empty() {
        return Err(FormatError::new(external, "empty"));
    }

    // "1a".."1f" must win before the digit rules get a look
    if bytes.len() == 2 && bytes[0] == b'1' && is_hex_letter(bytes[1]) {
        return u32::from_str_radix(external, 16)
            .map_err(|_| FormatError::new(external, "not a hex literal"));
    }

    if bytes.iter().all(u8::is_ascii_digit) {
        let value: u32 = external
            .parse()
            .map_err(|_| FormatError::new(external, "numeric value out of range"))?;

        return if value <= 9 {
            Ok(value)
        } else {
            value
                .checked_add(DECIMAL_OFFSET)
                .ok_or_else(|| FormatError::new(external, "numeric value out of range"))
        };
    }

    if bytes.len() == 1 && is_hex_letter(bytes[0]) {
        return Ok(10 + u32::from(bytes[0] - b'a'));
    }

    Err(FormatError::new(external, "not a recognised meter id form"))
}

/// Internal integer ID → canonical external meter-ID string
pub fn encode_meter_id(internal: u32) -> String {
    match internal {
        0..=9 => internal.to_string(),
        10..=15 => char::from(b'a' + (internal - 10) as u8).to_string(),
        HEX_PAIR_FIRST..=HEX_PAIR_LAST => format!("{:x}", internal),
        _ => (internal - DECIMAL_OFFSET).to_string(),
    }
}

#[inline]
fn is_hex_letter(b: u8) -> bool {
    (b'a'..=b'f').contains(&b)
}
