//! Id and name normalization

use rustc_hash::FxHashSet;

/// Trailing words dropped from entity names
const LEGAL_SUFFIXES: &[&str] = &[
    "LTDA", "LTD", "ME", "MEI", "EPP", "EIRELI", "SA", "SAS", "CIA", "INC", "LLC", "CORP", "CO",
    "PLC", "GMBH",
];

/// Words of this length or shorter do not count toward similarity
const MIN_WORD_LEN: usize = 3;

/// Keep only ASCII digits.
pub fn normalize_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// An id is usable if it has at least `min_digits` digits and is not a single
/// repeated digit (`00000000000`, `11111111111`, ...).
pub fn is_valid_id(digits: &str, min_digits: usize) -> bool {
    if digits.len() < min_digits || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match digits.as_bytes().first() {
        Some(&first) => !digits.bytes().all(|b| b == first),
        None => false,
    }
}

fn fold_diacritic(c: char) -> char {
    match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'Ç' => 'C',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'Ñ' => 'N',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => 'O',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'Ý' | 'Ÿ' => 'Y',
        other => other,
    }
}

/// Canonical form of an entity name.
///
/// Uppercases, folds Latin diacritics, removes dots, turns other punctuation
/// into spaces, drops trailing legal-entity suffixes and collapses whitespace.
/// `"Padaria São João Ltda."` and `"PADARIA SAO JOAO"` normalize identically.
pub fn normalize_name(raw: &str) -> String {
    let upper: String = raw
        .to_uppercase()
        .chars()
        .map(fold_diacritic)
        .filter(|&c| c != '.')
        .collect();
    let upper = upper.replace("S/A", "SA");
    let cleaned: String = upper
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while words.len() > 1 && words.last().is_some_and(|w| LEGAL_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

fn significant_words(name: &str) -> FxHashSet<&str> {
    name.split_whitespace()
        .filter(|w| w.len() >= MIN_WORD_LEN)
        .collect()
}

/// Intersection over union of the significant word sets of two names.
///
/// Zero when either side has no significant words.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = significant_words(a);
    let b = significant_words(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}
