//! Display formatting for the `list` and `show` commands.

/// Format a price or market value for display.
///
/// Values of 1 and above are rounded to whole units with thousands
/// separators. Values between 0 and 1 keep enough decimals to show the
/// first two significant digits, at least 2 and at most 8. Anything else
/// (zero, negative, NaN, infinite) renders as `{symbol}0`.
pub fn format_money(value: f64, symbol: &str) -> String {
    if !value.is_finite() || value <= 0.0 {
        return format!("{}0", symbol);
    }

    if value >= 1.0 {
        return format!("{}{}", symbol, group_thousands(value.round()));
    }

    let decimals = (-(value.log10().floor()) as i64 + 1).clamp(2, 8) as usize;
    format!("{}{:.*}", symbol, decimals, value)
}

/// Symbol for a currency code; unknown codes render as `"{CODE} "`.
pub fn currency_symbol(code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    let symbol = match code.as_str() {
        "USD" | "AUD" | "CAD" | "NZD" | "SGD" | "HKD" | "MXN" => "$",
        "EUR" => "€",
        "GBP" => "£",
        "JPY" | "CNY" => "¥",
        "KRW" => "₩",
        "INR" => "₹",
        "RUB" => "₽",
        "TRY" => "₺",
        "BRL" => "R$",
        "CHF" => "CHF ",
        "BTC" => "₿",
        _ => return format!("{} ", code),
    };
    symbol.to_string()
}

fn group_thousands(whole: f64) -> String {
    let digits = format!("{:.0}", whole);
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
