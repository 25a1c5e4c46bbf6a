//! Helpers for dissecting contract symbols.

use chrono::{Datelike, NaiveDate};

use crate::{Exchange, Product};

/// Split a qualified symbol into its plain symbol and exchange parts.
///
/// Returns `None` when the exchange suffix is missing or unknown.
#[must_use]
pub fn split_vt_symbol(vt_symbol: &str) -> Option<(&str, Exchange)> {
    let (symbol, suffix) = vt_symbol.rsplit_once('.')?;
    Some((symbol, Exchange::parse(suffix)?))
}

/// Extract the product code: the leading alphabetic run of the plain symbol.
#[must_use]
pub fn product_of_symbol(vt_symbol: &str) -> Product {
    let symbol = vt_symbol.split('.').next().unwrap_or(vt_symbol);
    symbol
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect()
}

/// Estimate the expiry date encoded in a futures symbol.
///
/// Four trailing digits (`rb2501`) encode year and month directly; three
/// trailing digits (CZCE style, `SA501`) omit the decade, which is inferred
/// from `today`. Domestic contracts expire mid-month, so the 15th is used as
/// the reference day for the rollover rule. Returns `None` when the symbol
/// carries no parsable date or the month is out of range.
#[must_use]
pub fn expiry_from_symbol(symbol: &str, today: NaiveDate) -> Option<NaiveDate> {
    let plain = symbol.split('.').next().unwrap_or(symbol);
    let digits: String = plain
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let current_year = today.year();

    let (year, month) = match digits.len() {
        4 => {
            let year_suffix: i32 = digits[..2].parse().ok()?;
            let month: u32 = digits[2..].parse().ok()?;
            (2000 + year_suffix, month)
        }
        3 => {
            let year_suffix: i32 = digits[..1].parse().ok()?;
            let month: u32 = digits[1..].parse().ok()?;
            let mut year = (current_year / 10) * 10 + year_suffix;
            // A stale-looking year means the symbol belongs to the next decade.
            if year < current_year - 1 {
                year += 10;
            }
            (year, month)
        }
        _ => return None,
    };

    if !(1..=12).contains(&month) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, 15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn four_digit_symbols() {
        let today = d(2025, 1, 10);
        assert_eq!(expiry_from_symbol("rb2501", today), Some(d(2025, 1, 15)));
        assert_eq!(expiry_from_symbol("m2505", today), Some(d(2025, 5, 15)));
        assert_eq!(
            expiry_from_symbol("rb2505.SHFE", today),
            Some(d(2025, 5, 15))
        );
    }

    #[test]
    fn three_digit_symbols_infer_decade() {
        let today = d(2025, 1, 10);
        let decade = (today.year() / 10) * 10;
        assert_eq!(
            expiry_from_symbol("SA501", today),
            Some(d(decade + 5, 1, 15))
        );
    }

    #[test]
    fn unparsable_symbols() {
        let today = d(2025, 1, 10);
        assert_eq!(expiry_from_symbol("rb", today), None);
        // 123 -> year suffix 1, month 23: out of range.
        assert_eq!(expiry_from_symbol("123", today), None);
        assert_eq!(expiry_from_symbol("rb2513", today), None);
    }

    #[test]
    fn product_extraction() {
        assert_eq!(product_of_symbol("rb2505.SHFE"), "rb");
        assert_eq!(product_of_symbol("SA501.CZCE"), "SA");
        assert_eq!(product_of_symbol("rb"), "rb");
    }

    #[test]
    fn vt_symbol_split() {
        let (symbol, exchange) = split_vt_symbol("rb2505.SHFE").unwrap();
        assert_eq!(symbol, "rb2505");
        assert_eq!(exchange, Exchange::Shfe);
        assert!(split_vt_symbol("rb2505").is_none());
        assert!(split_vt_symbol("rb2505.NYSE").is_none());
    }
}
