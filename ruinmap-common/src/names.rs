//! Site-name normalization
//!
//! Two comparisons exist and are deliberately kept apart:
//! - [`normalize_name`] strips diacritics and punctuation. Used for canonical
//!   records, the name index, the Matcher and duplicate suppression.
//! - [`fold_case`] only trims and lowercases. Used when aggregating evidence
//!   for a Discovery, which correlates with how the evidence was filed.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a site name for matching.
///
/// NFD decomposition, combining marks dropped, lowercase, every
/// non-alphanumeric run replaced by a single space, trimmed.
///
/// ```
/// use ruinmap_common::names::normalize_name;
///
/// assert_eq!(normalize_name("Göbekli Tepe"), "gobekli tepe");
/// assert_eq!(normalize_name("  Sayburç, (Şanlıurfa) "), "sayburc sanlıurfa");
/// ```
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized name with all spaces removed ("gobekli tepe" → "gobeklitepe")
pub fn spaceless(normalized: &str) -> String {
    normalized.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Case-fold only: trim and Unicode lowercase, diacritics preserved
pub fn fold_case(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Alternate country names mapped to the English short name used by the
/// knowledge base labels. Keys and values are normalized.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("turkiye", "turkey"),
    ("republic of turkey", "turkey"),
    ("usa", "united states"),
    ("us", "united states"),
    ("u s", "united states"),
    ("u s a", "united states"),
    ("united states of america", "united states"),
    ("america", "united states"),
    ("uk", "united kingdom"),
    ("u k", "united kingdom"),
    ("great britain", "united kingdom"),
    ("britain", "united kingdom"),
    ("england", "united kingdom"),
    ("scotland", "united kingdom"),
    ("wales", "united kingdom"),
    ("northern ireland", "united kingdom"),
    ("hellenic republic", "greece"),
    ("czechia", "czech republic"),
    ("holland", "netherlands"),
    ("kingdom of the netherlands", "netherlands"),
    ("russian federation", "russia"),
    ("people s republic of china", "china"),
    ("prc", "china"),
    ("islamic republic of iran", "iran"),
    ("persia", "iran"),
    ("syrian arab republic", "syria"),
    ("burma", "myanmar"),
    ("ivory coast", "cote d ivoire"),
    ("republic of ireland", "ireland"),
    ("eire", "ireland"),
    ("republic of korea", "south korea"),
    ("korea", "south korea"),
    ("viet nam", "vietnam"),
    ("east timor", "timor leste"),
    ("cape verde", "cabo verde"),
    ("swaziland", "eswatini"),
    ("macedonia", "north macedonia"),
    ("united mexican states", "mexico"),
    ("kingdom of cambodia", "cambodia"),
    ("hashemite kingdom of jordan", "jordan"),
    ("arab republic of egypt", "egypt"),
];

/// Normalized country name with common alternates folded together
/// ("Türkiye" and "Turkey" both give "turkey")
pub fn canonical_country(name: &str) -> String {
    let normalized = normalize_name(name);
    let normalized = normalized.strip_prefix("the ").unwrap_or(&normalized).to_string();
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(normalized)
}

/// Whether two country names denote the same country
pub fn same_country(a: &str, b: &str) -> bool {
    let (a, b) = (canonical_country(a), canonical_country(b));
    !a.is_empty() && a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diacritics_removed() {
        assert_eq!(normalize_name("Sayburç"), "sayburc");
        assert_eq!(normalize_name("Çatalhöyük"), "catalhoyuk");
        assert_eq!(normalize_name("Chichén Itzá"), "chichen itza");
    }

    #[test]
    fn test_punctuation_and_whitespace() {
        assert_eq!(normalize_name("Temple of Apollo (Delphi)"), "temple of apollo delphi");
        assert_eq!(normalize_name("  Knossos\t\tPalace "), "knossos palace");
        assert_eq!(normalize_name("St. John's"), "st john s");
        assert_eq!(normalize_name("!!!"), "");
    }

    #[test]
    fn test_spaceless_variants_collide() {
        let a = spaceless(&normalize_name("Göbekli Tepe"));
        let b = spaceless(&normalize_name("Gobeklitepe"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fold_case_keeps_diacritics() {
        assert_eq!(fold_case("  GÖBEKLI Tepe "), "göbekli tepe");
        assert_ne!(fold_case("Sayburç"), fold_case("Sayburc"));
    }

    #[test]
    fn test_same_country() {
        assert!(same_country("Türkiye", "turkiye"));
        assert!(!same_country("Greece", "Italy"));
        assert!(!same_country("", ""));
    }

    #[test]
    fn test_country_alternates_are_the_same_country() {
        assert!(same_country("Türkiye", "Turkey"));
        assert!(same_country("USA", "United States"));
        assert!(same_country("U.S.A.", "United States of America"));
        assert!(same_country("UK", "United Kingdom"));
        assert!(same_country("England", "United Kingdom"));
        assert!(same_country("The Netherlands", "Holland"));
        assert!(!same_country("Ireland", "United Kingdom"));
        assert!(!same_country("North Korea", "South Korea"));
    }

    #[test]
    fn test_canonical_country_passes_unknown_names_through() {
        assert_eq!(canonical_country("Peru"), "peru");
        assert_eq!(canonical_country("  Côte d'Ivoire "), "cote d ivoire");
        assert_eq!(canonical_country("Ivory Coast"), "cote d ivoire");
    }
}
