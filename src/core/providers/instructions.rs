//! Instruction text for integrated sessions.

use phf::phf_map;

/// Display names for the primary language subtag of supported locales.
static LANGUAGE_NAMES: phf::Map<&'static str, &'static str> = phf_map! {
    "ar" => "Arabic",
    "de" => "German",
    "es" => "Spanish",
    "fr" => "French",
    "hi" => "Hindi",
    "it" => "Italian",
    "ja" => "Japanese",
    "ko" => "Korean",
    "nl" => "Dutch",
    "pl" => "Polish",
    "pt" => "Portuguese",
    "ru" => "Russian",
    "sv" => "Swedish",
    "tr" => "Turkish",
    "uk" => "Ukrainian",
    "vi" => "Vietnamese",
    "zh" => "Chinese",
};

/// Directive making the model speak `greeting` verbatim when the call opens.
pub fn greeting_directive(greeting: &str) -> String {
    format!(
        "IMPORTANT - Initial Greeting: When the call first connects, \
         you MUST say exactly this greeting: \"{greeting}\""
    )
}

/// Language directive for non-English locales such as `es-MX`.
pub fn language_directive(language: &str) -> Option<String> {
    let primary = language
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if primary.is_empty() || primary == "en" {
        return None;
    }
    let name = LANGUAGE_NAMES.get(primary.as_str()).copied();
    Some(match name {
        Some(name) => format!(
            "LANGUAGE: Always respond in {name} ({}), even if the caller switches languages.",
            language.trim()
        ),
        None => format!(
            "LANGUAGE: Always respond in the language of locale {}.",
            language.trim()
        ),
    })
}

/// System prompt, then the greeting directive, then language and timezone
/// context.
pub fn build_instructions(
    system_prompt: &str,
    greeting: Option<&str>,
    language: &str,
    timezone: &str,
) -> String {
    let mut sections = vec![system_prompt.trim().to_string()];
    if let Some(greeting) = greeting {
        sections.push(greeting_directive(greeting));
    }
    if let Some(directive) = language_directive(language) {
        sections.push(directive);
    }
    sections.push(format!(
        "TIMEZONE: The business operates in the {timezone} timezone. \
         Use it when discussing dates and times."
    ));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_follows_prompt() {
        let instructions = build_instructions("Be brief.", Some("Hi, thanks for calling!"), "en-US", "UTC");
        assert!(instructions.starts_with(
            "Be brief.\n\nIMPORTANT - Initial Greeting: When the call first connects, \
             you MUST say exactly this greeting: \"Hi, thanks for calling!\""
        ));
        assert!(!instructions.contains("LANGUAGE:"));
        assert!(instructions.ends_with("Use it when discussing dates and times."));
    }

    #[test]
    fn test_language_directive() {
        assert_eq!(language_directive("en-GB"), None);
        assert_eq!(
            language_directive("es-MX").as_deref(),
            Some("LANGUAGE: Always respond in Spanish (es-MX), even if the caller switches languages.")
        );
        assert!(language_directive("xx-YY").unwrap().contains("locale xx-YY"));
    }

    #[test]
    fn test_sections_in_order() {
        let instructions = build_instructions("Prompt", Some("Hola"), "es-ES", "Europe/Madrid");
        let greeting = instructions.find("IMPORTANT").unwrap();
        let language = instructions.find("LANGUAGE").unwrap();
        let timezone = instructions.find("Europe/Madrid").unwrap();
        assert!(greeting < language && language < timezone);
    }

    #[test]
    fn test_no_greeting() {
        let instructions = build_instructions("Prompt", None, "en-US", "America/New_York");
        assert!(!instructions.contains("IMPORTANT"));
        assert!(instructions.contains("America/New_York"));
    }
}
