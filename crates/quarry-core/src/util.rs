/// Case-fold and collapse runs of whitespace into single spaces.
///
/// Example: `"  Senior\tProduct   Manager "` → `"senior product manager"`
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Legal-entity suffixes ignored when comparing company names.
const COMPANY_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "co", "gmbh", "plc",
    "sa", "ag",
];

/// Normalize a company name for equality comparison.
///
/// Drops punctuation and trailing legal suffixes so `"Acme, Inc."` and
/// `"ACME"` compare equal, while `"Acme Labs"` stays distinct.
pub fn normalize_company(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut words: Vec<String> = cleaned.split_whitespace().map(str::to_lowercase).collect();
    while words.len() > 1
        && words
            .last()
            .is_some_and(|w| COMPANY_SUFFIXES.contains(&w.as_str()))
    {
        words.pop();
    }
    words.join(" ")
}
