//! User-fact extraction: stable key/value pairs regex-mined from memory texts.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

static GITHUB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)github\.com/([A-Za-z0-9-]+)|github (?:user(?:name)? (?:is )?)([A-Za-z0-9-]+)")
        .unwrap()
});

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:my name is|me llamo|user(?:'s)? name (?:is )?)\s*([A-Za-zÁÉÍÓÚáéíóúñÑ]+)")
        .unwrap()
});

static TIMEZONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+/[A-Z][A-Za-z_]+)\b").unwrap());

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Walk memory texts and collect known facts. First match per key wins so the
/// dictionary stays stable as memories accumulate.
pub fn extract_user_facts(memory_texts: &[String]) -> BTreeMap<String, String> {
    let mut facts = BTreeMap::new();

    for text in memory_texts {
        if !facts.contains_key("github_username") {
            if let Some(caps) = GITHUB_RE.captures(text) {
                if let Some(user) = caps.get(1).or_else(|| caps.get(2)) {
                    facts.insert("github_username".to_string(), user.as_str().to_string());
                }
            }
        }
        if !facts.contains_key("name") {
            if let Some(caps) = NAME_RE.captures(text) {
                facts.insert("name".to_string(), caps[1].to_string());
            }
        }
        if !facts.contains_key("timezone") {
            if let Some(caps) = TIMEZONE_RE.captures(text) {
                facts.insert("timezone".to_string(), caps[1].to_string());
            }
        }
        if !facts.contains_key("email") {
            if let Some(m) = EMAIL_RE.find(text) {
                facts.insert("email".to_string(), m.as_str().to_string());
            }
        }
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn github_from_url_and_phrase() {
        let facts = extract_user_facts(&texts(&["profile: https://github.com/adahopper"]));
        assert_eq!(facts["github_username"], "adahopper");

        let facts = extract_user_facts(&texts(&["github username is adahopper"]));
        assert_eq!(facts["github_username"], "adahopper");
    }

    #[test]
    fn spanish_name_phrase_is_recognised() {
        let facts = extract_user_facts(&texts(&["me llamo Lucía y trabajo en backend"]));
        assert_eq!(facts["name"], "Lucía");
    }

    #[test]
    fn timezone_is_extracted() {
        let facts = extract_user_facts(&texts(&["timezone is Europe/Madrid"]));
        assert_eq!(facts["timezone"], "Europe/Madrid");
    }

    #[test]
    fn first_match_wins_for_stability() {
        let facts = extract_user_facts(&texts(&[
            "my name is Ada",
            "my name is Grace",
        ]));
        assert_eq!(facts["name"], "Ada");
    }

    #[test]
    fn no_facts_yields_empty_map() {
        assert!(extract_user_facts(&texts(&["likes green tea"])).is_empty());
    }
}
