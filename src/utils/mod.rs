pub mod auth;

pub use auth::{create_token, hash_password, verify_password, verify_token};

use chrono::NaiveDate;

/// Accepts `YYYY-MM-DD` or `YYYYMMDD`; blank input is `None`.
pub fn parse_date_safe(date_str: &str) -> Option<NaiveDate> {
    if date_str.trim().is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_str.trim(), "%Y%m%d"))
        .ok()
}

/// Lowercase ASCII slug for catalog URLs ("Fardo de Alfalfa 25kg" -> "fardo-de-alfalfa-25kg").
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars().flat_map(char::to_lowercase) {
        let ch = fold_accent(ch);
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Strips the Spanish diacritics so "Paño" and "Pano" compare equal.
pub fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

/// Case and accent insensitive comparison key.
pub fn normalize_key(value: &str) -> String {
    value
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .collect()
}

pub fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}
