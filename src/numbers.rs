//! Human-readable numeric rendering
//!
//! Byte sizes use binary multiples (KiB, MiB, ...), plain numbers use SI
//! multiples (K, M, ...). The decimal separator is passed in by the caller so
//! that the same rendering serves both `.` and `,` locales.

const BINARY_UNITS: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const SI_UNITS: [&str; 7] = ["", "K", "M", "G", "T", "P", "E"];

/// Render a byte count, e.g. `20.0 MiB`
pub fn human_bytes(value: f64, decimals: usize, max_multiple: Option<&str>, decimal_separator: char) -> String {
    let (scaled, unit) = scale(value, 1024.0, &BINARY_UNITS, max_multiple.map(|m| format!("{}i", m)));
    format!("{} {}B", fixed(scaled, decimals, decimal_separator, max_multiple.is_some()), unit)
}

/// Render a plain quantity with SI multiples, e.g. `8.4 M`
pub fn human_number(value: f64, decimals: usize, decimal_separator: char) -> String {
    let (scaled, unit) = scale(value, 1000.0, &SI_UNITS, None);
    let rendered = fixed(scaled, decimals, decimal_separator, false);
    if unit.is_empty() {
        rendered
    } else {
        format!("{} {}", rendered, unit)
    }
}

/// Bytes expressed in GiB with nine decimals
pub fn gib(value: f64, decimal_separator: char) -> String {
    fixed(value / 1024f64.powi(3), 9, decimal_separator, false)
}

/// Fixed-point rendering with a custom decimal separator and optional thousands grouping
pub fn fixed(value: f64, decimals: usize, decimal_separator: char, group_thousands: bool) -> String {
    let rendered = format!("{:.*}", decimals, value);
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (rendered, None),
    };

    let int_part = if group_thousands {
        group(&int_part)
    } else {
        int_part
    };

    match frac_part {
        Some(frac) => format!("{}{}{}", int_part, decimal_separator, frac),
        None => int_part,
    }
}

fn group(int_part: &str) -> String {
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(d) => ("-", d),
        None => ("", int_part),
    };
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    format!("{}{}", sign, out)
}

fn scale<'a>(value: f64, base: f64, units: &[&'a str], max_unit: Option<String>) -> (f64, &'a str) {
    let mut scaled = value;
    let mut index = 0;
    while scaled.abs() >= base && index + 1 < units.len() {
        if let Some(max) = &max_unit {
            if units[index] == max.as_str() {
                break;
            }
        }
        scaled /= base;
        index += 1;
    }
    (scaled, units[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        let value = (8 * 1024 * 1024) as f64;
        assert_eq!(human_bytes(value, 1, None, ','), "8,0 MiB");
        assert_eq!(human_bytes(value, 2, Some("K"), ','), "8 192,00 KiB");
        assert_eq!(human_bytes(512.0, 1, None, '.'), "512.0 B");
    }

    #[test]
    fn test_human_number() {
        let value = (8 * 1024 * 1024) as f64;
        assert_eq!(human_number(value, 1, ','), "8,4 M");
        assert_eq!(human_number(12.0, 0, '.'), "12");
    }

    #[test]
    fn test_gib() {
        assert_eq!(gib(20971520.0, ','), "0,019531250");
        assert_eq!(gib(21474836480.0, '.'), "20.000000000");
    }
}
