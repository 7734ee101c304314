//! Byte-order-mark and delimiter detection

const BOM: char = '\u{feff}';
const SAMPLE_LINES: usize = 5;

/// Strip a leading UTF-8 byte-order-mark
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix(BOM).unwrap_or(text)
}

/// Same as [`strip_bom`], on raw bytes
pub fn strip_bom_bytes(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

/// Characters appearing outside quotes on one line
fn unquoted_chars(line: &str, quote: char) -> impl Iterator<Item = char> + '_ {
    let mut in_quotes = false;
    line.chars().filter(move |c| {
        if *c == quote {
            in_quotes = !in_quotes;
            return false;
        }
        !in_quotes
    })
}

/// Pick a delimiter from the first lines of a sample
///
/// The first sampled line with an unquoted comma decides for comma, then the
/// first with a semicolon, then tab. An empty or undecidable sample yields comma.
pub fn sniff_delimiter(sample: &str, quote: char) -> char {
    let lines: Vec<&str> = strip_bom(sample)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect();

    for candidate in [',', ';', '\t'] {
        if lines
            .iter()
            .any(|line| unquoted_chars(line, quote).any(|c| c == candidate))
        {
            return candidate;
        }
    }
    ','
}

/// Name of a delimiter for display
pub fn delimiter_name(delimiter: char) -> String {
    match delimiter {
        ',' => "comma".to_string(),
        ';' => "semicolon".to_string(),
        '\t' => "tab".to_string(),
        other => format!("'{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semicolon_csv() {
        assert_eq!(sniff_delimiter("A;B\nE;F", '"'), ';');
        assert_eq!(sniff_delimiter("A,B\nE;E,F;F", '"'), ',');
        assert_eq!(sniff_delimiter("A\nE;E,F;F", '"'), ',');
    }

    #[test]
    fn test_quoted_commas_are_ignored() {
        assert_eq!(sniff_delimiter("\"a,b\";c\n1;2", '"'), ';');
        assert_eq!(sniff_delimiter("a\tb\n1\t2", '"'), '\t');
    }

    #[test]
    fn test_empty_sample_defaults_to_comma() {
        assert_eq!(sniff_delimiter("", '"'), ',');
        assert_eq!(sniff_delimiter("\u{feff}single", '"'), ',');
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{feff}id;name"), "id;name");
        assert_eq!(strip_bom_bytes(b"\xEF\xBB\xBFid"), b"id");
    }
}
