//! Speech output contract.
//!
//! A [`SpeechOutput`] starts narrating and returns immediately. When the
//! utterance finishes (or the engine gives up) the adapter posts a
//! [`SpeechEvent`] tagged with the utterance's id on the controller's event
//! channel. Ids let the controller ignore completions of utterances it has
//! already cancelled.

use anyhow::Result;

pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;
pub const DEFAULT_RATE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtteranceId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Finished(UtteranceId),
    Failed(UtteranceId, String),
}

impl SpeechEvent {
    pub fn utterance(&self) -> UtteranceId {
        match self {
            SpeechEvent::Finished(id) | SpeechEvent::Failed(id, _) => *id,
        }
    }
}

pub trait SpeechOutput: Send {
    /// Starts narrating `text`. Any utterance still playing is cancelled first.
    fn speak(&mut self, id: UtteranceId, text: &str, rate: f32) -> Result<()>;

    /// Stops the current utterance. Must be a no-op when nothing is playing.
    fn cancel(&mut self);

    /// Best-effort: engines that cannot retune mid-utterance apply it to the next one.
    fn set_rate(&mut self, rate: f32);
}

pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        return DEFAULT_RATE;
    }
    rate.clamp(MIN_RATE, MAX_RATE)
}

/// A narration voice offered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Identifier passed back to the engine when selecting the voice.
    pub id: String,
    pub name: String,
    /// BCP-47 style language tag, e.g. `en-us`.
    pub language: String,
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_lowercase()
}

fn primary_subtag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

/// Picks the voice for `locale`: an exact language match first, then any voice
/// of the same primary language. `None` means "use the engine default".
pub fn select_voice<'a>(voices: &'a [VoiceInfo], locale: &str) -> Option<&'a VoiceInfo> {
    let wanted = normalize_tag(locale);
    if wanted.is_empty() {
        return None;
    }

    if let Some(voice) = voices
        .iter()
        .find(|v| normalize_tag(&v.language) == wanted)
    {
        return Some(voice);
    }

    let wanted_primary = primary_subtag(&wanted);
    voices.iter().find(|v| {
        let language = normalize_tag(&v.language);
        primary_subtag(&language) == wanted_primary
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(language: &str) -> VoiceInfo {
        VoiceInfo {
            id: language.to_string(),
            name: format!("voice-{language}"),
            language: language.to_string(),
        }
    }

    #[test]
    fn exact_locale_wins_over_primary_language() {
        let voices = vec![voice("en-gb"), voice("en-us"), voice("fr-fr")];
        let chosen = select_voice(&voices, "en_US").unwrap();
        assert_eq!(chosen.language, "en-us");
    }

    #[test]
    fn falls_back_to_primary_language() {
        let voices = vec![voice("de"), voice("en-gb")];
        let chosen = select_voice(&voices, "en-AU").unwrap();
        assert_eq!(chosen.language, "en-gb");
    }

    #[test]
    fn no_match_means_engine_default() {
        let voices = vec![voice("de"), voice("fr-fr")];
        assert!(select_voice(&voices, "ja-JP").is_none());
        assert!(select_voice(&voices, "").is_none());
    }

    #[test]
    fn rate_is_clamped() {
        assert_eq!(clamp_rate(5.0), MAX_RATE);
        assert_eq!(clamp_rate(0.1), MIN_RATE);
        assert_eq!(clamp_rate(1.25), 1.25);
        assert_eq!(clamp_rate(f32::NAN), DEFAULT_RATE);
    }
}
