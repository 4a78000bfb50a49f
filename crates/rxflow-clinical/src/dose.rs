//! Dose text parsing.

/// Parse a free-text dose such as `"500 mg"`, `"0.5g"` or `"250 mcg twice"`
/// into milligrams.
///
/// The text must start with a non-negative number followed by a unit of
/// `mg`, `g`, `mcg` (or `ug`/`µg`). Anything else yields `None`.
pub fn parse_dose_mg(text: &str) -> Option<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, rest) = text.split_at(split);
    let amount: f64 = number.parse().ok()?;

    let unit: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect();

    let factor = match unit.as_str() {
        "mg" => 1.0,
        "g" => 1000.0,
        "mcg" | "ug" | "µg" => 0.001,
        _ => return None,
    };
    Some(amount * factor)
}
