/// Validates an Israeli national ID number (Teudat Zehut).
///
/// A valid ID is:
/// - At most 9 ASCII digits (shorter IDs are left-padded with zeros)
/// - Check-digited: digits at odd positions are doubled (and reduced by 9
///   when the product exceeds 9), and the digit sum is divisible by 10
#[must_use]
pub fn is_valid_israeli_id(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() || s.len() > 9 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let padded = format!("{s:0>9}");
    let sum: u32 = padded
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 0 {
                digit
            } else {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            }
        })
        .sum();
    sum % 10 == 0
}
