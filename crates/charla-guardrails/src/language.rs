//! Reply-language validation via statistical detection.
//!
//! Both texts must be at least [`MIN_DETECT_CHARS`] long AND the detector must
//! be confident about both before a mismatch can fail the check - short or
//! ambiguous text (mixed Spanish/Portuguese one-liners, code snippets) always
//! passes.

use whatlang::{detect, Lang};

use crate::checks::CheckResult;

/// Texts shorter than this are never language-checked.
pub const MIN_DETECT_CHARS: usize = 30;

/// Detect the language of `text`, returning its ISO 639-1 code only when the
/// detector is confident.
pub fn detect_lang(text: &str) -> Option<&'static str> {
    if text.chars().count() < MIN_DETECT_CHARS {
        return None;
    }
    let info = detect(text)?;
    if !info.is_reliable() {
        return None;
    }
    Some(iso1(info.lang()))
}

/// Fails only when both languages are confidently detected and differ.
/// `details` carries the user's language code for the remediation prompt.
pub fn language_match(user_text: &str, reply: &str) -> CheckResult {
    let user_lang = match detect_lang(user_text) {
        Some(l) => l,
        None => return CheckResult::pass("language_match"),
    };
    let reply_lang = match detect_lang(reply) {
        Some(l) => l,
        None => return CheckResult::pass("language_match"),
    };
    if user_lang == reply_lang {
        CheckResult::pass("language_match")
    } else {
        CheckResult::fail("language_match", user_lang)
    }
}

/// Map the detector's ISO 639-3 codes to the two-letter codes used in
/// prompts; unmapped languages fall back to the first two letters.
fn iso1(lang: Lang) -> &'static str {
    match lang {
        Lang::Spa => "es",
        Lang::Eng => "en",
        Lang::Por => "pt",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Cat => "ca",
        Lang::Nld => "nl",
        Lang::Rus => "ru",
        Lang::Jpn => "ja",
        Lang::Cmn => "zh",
        Lang::Ara => "ar",
        other => {
            let code = other.code();
            // 639-3 and 639-1 share the first two letters for most of the rest.
            &code[..2.min(code.len())]
        }
    }
}
