//! OCR-tolerant text normalization.

/// Single-character folds applied after whitespace removal.
const CHAR_FOLDS: &[(char, char)] = &[
    ('l', 'I'),
    ('O', '0'),
    ('o', '0'),
    ('1', 'I'),
    ('S', '5'),
    ('Z', '2'),
    ('G', '6'),
    ('B', '8'),
    ('。', '.'),
    ('！', '!'),
    ('，', ','),
    ('(', '（'),
    (')', '）'),
    (':', '：'),
    ('[', '【'),
    (']', '】'),
    ('“', '"'),
    ('”', '"'),
    ('\'', '"'),
];

/// Normalizes text so that strings differing only by visually confusable
/// characters, punctuation width or whitespace compare equal.
///
/// Whitespace is removed, confusable characters are folded (`l`/`1` → `I`,
/// `O`/`o` → `0`, `S` → `5`, `Z` → `2`, `G` → `6`, `B` → `8`), punctuation is
/// unified and the result is uppercased. Blank input yields an empty string.
///
/// # Examples
///
/// ```
/// use vision_flow_core::template::normalize_text;
///
/// assert_eq!(normalize_text(" Lot 1O: "), "L0TI0：");
/// assert_eq!(normalize_text("25°C"), "25℃");
/// ```
pub fn normalize_text(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '\t' | '\r' | '\n' | ' '))
        .map(|c| {
            CHAR_FOLDS
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |(_, to)| *to)
        })
        .collect();
    stripped
        .replace("°C", "℃")
        .replace('°', "")
        .replace('—', "-")
        .replace("--", "-")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \t\n"), "");
    }

    #[test]
    fn test_confusable_characters() {
        assert_eq!(normalize_text("l1O"), normalize_text("II0"));
        assert_eq!(normalize_text("SZGB"), "5268");
        assert_eq!(normalize_text("batch o"), "BATCH0");
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(normalize_text("a(b):[c]"), "A（B）：【C】");
        assert_eq!(normalize_text("“x”"), "\"X\"");
        assert_eq!(normalize_text("a—b--c"), "A-B-C");
        assert_eq!(normalize_text("。！，"), ".!,");
        assert_eq!(normalize_text("30°"), "30");
    }

    #[test]
    fn test_whitespace_inside() {
        assert_eq!(normalize_text("MADE IN\tCHINA"), "MADEINCHINA");
    }
}
