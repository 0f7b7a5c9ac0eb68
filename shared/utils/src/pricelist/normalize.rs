//! Name and unit normalization.
//!
//! `naive_normalize` is the local fallback for product names: lowercase, punctuation stripped,
//! whitespace collapsed and common Indonesian tokens translated to English. AI-standardized names
//! go through [`translate_tokens`] as well so both paths share one vocabulary.

use regex::Regex;
use std::sync::OnceLock;

/// Multi-word phrases are matched before single tokens.
const PHRASES: &[(&str, &str)] = &[
    ("bawang merah", "shallot"),
    ("bawang putih", "garlic"),
    ("bawang bombay", "onion"),
    ("daun bawang", "spring onion"),
    ("cabai merah", "red chili"),
    ("cabe merah", "red chili"),
    ("cabai rawit", "bird eye chili"),
    ("cabe rawit", "bird eye chili"),
    ("daging sapi", "beef"),
    ("daging ayam", "chicken"),
    ("daging kambing", "lamb"),
    ("dada ayam", "chicken breast"),
    ("paha ayam", "chicken thigh"),
    ("telur ayam", "chicken egg"),
    ("kacang panjang", "long bean"),
    ("jeruk nipis", "lime"),
    ("minyak goreng", "cooking oil"),
    ("tepung terigu", "wheat flour"),
    ("gula pasir", "sugar"),
];

const TOKENS: &[(&str, &str)] = &[
    ("tomat", "tomato"),
    ("bawang", "onion"),
    ("kentang", "potato"),
    ("wortel", "carrot"),
    ("kubis", "cabbage"),
    ("kol", "cabbage"),
    ("bayam", "spinach"),
    ("kangkung", "water spinach"),
    ("timun", "cucumber"),
    ("mentimun", "cucumber"),
    ("terong", "eggplant"),
    ("jagung", "corn"),
    ("cabai", "chili"),
    ("cabe", "chili"),
    ("jahe", "ginger"),
    ("kunyit", "turmeric"),
    ("lengkuas", "galangal"),
    ("serai", "lemongrass"),
    ("sereh", "lemongrass"),
    ("pisang", "banana"),
    ("apel", "apple"),
    ("jeruk", "orange"),
    ("mangga", "mango"),
    ("pepaya", "papaya"),
    ("semangka", "watermelon"),
    ("nanas", "pineapple"),
    ("anggur", "grape"),
    ("daging", "meat"),
    ("sapi", "beef"),
    ("ayam", "chicken"),
    ("ikan", "fish"),
    ("udang", "shrimp"),
    ("cumi", "squid"),
    ("telur", "egg"),
    ("susu", "milk"),
    ("keju", "cheese"),
    ("mentega", "butter"),
    ("beras", "rice"),
    ("tepung", "flour"),
    ("gula", "sugar"),
    ("garam", "salt"),
    ("minyak", "oil"),
    ("merah", "red"),
    ("putih", "white"),
    ("hijau", "green"),
    ("kuning", "yellow"),
    ("hitam", "black"),
    ("segar", "fresh"),
    ("besar", "large"),
    ("kecil", "small"),
];

const UNITS: &[(&str, &str)] = &[
    ("kg", "kg"),
    ("kgs", "kg"),
    ("kilo", "kg"),
    ("kilogram", "kg"),
    ("g", "g"),
    ("gr", "g"),
    ("grm", "g"),
    ("gram", "g"),
    ("ons", "ons"),
    ("l", "l"),
    ("lt", "l"),
    ("ltr", "l"),
    ("liter", "l"),
    ("litre", "l"),
    ("ml", "ml"),
    ("pcs", "pcs"),
    ("pc", "pcs"),
    ("piece", "pcs"),
    ("pieces", "pcs"),
    ("buah", "pcs"),
    ("bh", "pcs"),
    ("biji", "pcs"),
    ("btr", "pcs"),
    ("butir", "pcs"),
    ("pack", "pack"),
    ("pak", "pack"),
    ("pck", "pack"),
    ("bungkus", "pack"),
    ("bks", "pack"),
    ("box", "box"),
    ("dus", "box"),
    ("karton", "box"),
    ("ctn", "box"),
    ("ikat", "bunch"),
    ("bunch", "bunch"),
    ("sisir", "hand"),
    ("ekor", "whole"),
    ("tray", "tray"),
    ("sak", "sack"),
    ("karung", "sack"),
    ("botol", "bottle"),
    ("btl", "bottle"),
    ("bottle", "bottle"),
];

/// Lowercase, replace punctuation with spaces and collapse whitespace.
pub fn clean_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Translate known Indonesian phrases and tokens of an already cleaned name.
pub fn translate_tokens(cleaned: &str) -> String {
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let mut out: Vec<&str> = Vec::with_capacity(words.len());
    let mut i = 0;

    while i < words.len() {
        if i + 1 < words.len() {
            let pair = format!("{} {}", words[i], words[i + 1]);
            if let Some((_, english)) = PHRASES.iter().find(|(phrase, _)| *phrase == pair) {
                out.push(english);
                i += 2;
                continue;
            }
        }

        let word = words[i];
        match TOKENS.iter().find(|(token, _)| *token == word) {
            Some((_, english)) => out.push(english),
            None => out.push(word),
        }
        i += 1;
    }

    out.join(" ")
}

/// Local canonical form of a product name, used whenever the AI mapping is unavailable.
pub fn naive_normalize(name: &str) -> String {
    translate_tokens(&clean_name(name))
}

/// Map a unit variant to its canonical spelling. Empty units become `pcs`.
pub fn standardize_unit(unit: &str) -> String {
    let lowered = unit.trim().to_lowercase();
    let cleaned = lowered
        .trim_start_matches('/')
        .trim_start_matches("per ")
        .trim_end_matches('.')
        .trim()
        .to_string();

    if cleaned.is_empty() {
        return "pcs".to_string();
    }

    UNITS
        .iter()
        .find(|(variant, _)| *variant == cleaned)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(cleaned)
}

pub fn is_known_unit(unit: &str) -> bool {
    let cleaned = unit.trim().trim_end_matches('.').to_lowercase();
    UNITS.iter().any(|(variant, _)| *variant == cleaned)
}

fn unit_in_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = {
            let mut variants: Vec<&str> = UNITS.iter().map(|(variant, _)| *variant).collect();
            // longest first so "kilogram" wins over "kg"
            variants.sort_by_key(|v| std::cmp::Reverse(v.len()));
            variants.join("|")
        };
        Regex::new(&format!(
            r"(?i)(?:\d+(?:[.,]\d+)?\s*|/\s*|\bper\s+)({})\b",
            alternatives
        ))
        .expect("valid unit regex")
    })
}

/// Infer the selling unit from a product name such as `Beras 5kg` or `Tomat /kg`.
pub fn infer_unit_from_name(name: &str) -> Option<String> {
    unit_in_name_regex()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| standardize_unit(m.as_str()))
}
