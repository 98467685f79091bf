//! OpenAI voice names mapped onto the Grok voice set.

use phf::phf_map;

pub const DEFAULT_GROK_VOICE: &str = "Ara";

static GROK_VOICE_MAP: phf::Map<&'static str, &'static str> = phf_map! {
    "marin" => "Ara",
    "cedar" => "Rex",
    "shimmer" => "Eve",
    "alloy" => "Sal",
    "onyx" => "Rex",
    "echo" => "Ara",
    "nova" => "Eve",
    "fable" => "Leo",
    "ash" => "Sal",
    "ballad" => "Ara",
    "coral" => "Ara",
    "sage" => "Sal",
    "verse" => "Leo",
};

/// Grok voice for an OpenAI voice name. Unknown names get [`DEFAULT_GROK_VOICE`].
pub fn map_grok_voice(voice: &str) -> &'static str {
    GROK_VOICE_MAP
        .get(voice.trim().to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_GROK_VOICE)
}
