//! Relative "played at" labels as the streaming source renders them per UI language.

use std::collections::BTreeSet;

use crate::reconcile::Track;

pub trait PlayedTodayDetector {
    fn is_played_today(&self, played_at: Option<&str>) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Day {
    Today,
    Yesterday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayLabel {
    pub day: Day,
    pub language: &'static str,
}

const TODAY: &[(&str, &str)] = &[
    ("Today", "en"),
    ("Hoy", "es"),
    ("Hoje", "pt"),
    ("Oggi", "it"),
    ("Aujourd'hui", "fr"),
    ("Heute", "de"),
    ("Vandaag", "nl"),
    ("Idag", "sv"),
    ("I dag", "no"),
    ("Tänään", "fi"),
    ("Täna", "et"),
    ("Šodien", "lv"),
    ("Šiandien", "lt"),
    ("Dzisiaj", "pl"),
    ("Dnes", "cs"),
    ("Danes", "sl"),
    ("Astăzi", "ro"),
    ("Ma", "et"),
    ("Bugün", "tr"),
    ("Σήμερα", "el"),
    ("Днес", "bg"),
    ("Данас", "sr"),
    ("Danas", "hr"),
    ("Денес", "mk"),
    ("Сегодня", "ru"),
    ("Сьогодні", "uk"),
    ("Сёння", "be"),
    ("اليوم", "ar"),
    ("امروز", "fa"),
    ("آج", "ur"),
    ("今天", "zh"),
    ("今日", "ja"),
    ("오늘", "ko"),
    ("आज", "hi"),
    ("আজ", "bn"),
    ("આજે", "gu"),
    ("இன்று", "ta"),
    ("ఈ రోజు", "te"),
    ("ಇಂದು", "kn"),
    ("ഇന്ന്", "ml"),
    ("ਅੱਜ", "pa"),
    ("วันนี้", "th"),
    ("Hôm nay", "vi"),
    ("Hari ini", "id"),
    ("Ngayong araw", "tl"),
    ("ယနေ့", "my"),
    ("Leo", "sw"),
    ("Vandag", "af"),
    ("היום", "he"),
    ("დღეს", "ka"),
    ("Այսօր", "hy"),
];

const YESTERDAY: &[(&str, &str)] = &[
    ("Yesterday", "en"),
    ("Ayer", "es"),
    ("Ontem", "pt"),
    ("Ieri", "it"),
    ("Hier", "fr"),
    ("Gestern", "de"),
    ("Gisteren", "nl"),
    ("Igår", "sv"),
    ("I går", "no"),
    ("Eilen", "fi"),
    ("Wczoraj", "pl"),
    ("Včera", "cs"),
    ("Včeraj", "sl"),
    ("Tegnap", "hu"),
    ("Dün", "tr"),
    ("Χθες", "el"),
    ("Вчера", "ru"),
    ("Јуче", "sr"),
    ("Jučer", "hr"),
    ("Вчора", "uk"),
    ("Учора", "be"),
    ("أمس", "ar"),
    ("دیروز", "fa"),
    ("昨天", "zh"),
    ("昨日", "ja"),
    ("어제", "ko"),
    ("গতকাল", "bn"),
    ("ગઈકાલે", "gu"),
    ("நேற்று", "ta"),
    ("నిన్న", "te"),
    ("ನಿನ್ನೆ", "kn"),
    ("ഇന്നലെ", "ml"),
    ("เมื่อวาน", "th"),
    ("Hôm qua", "vi"),
    ("Kemarin", "id"),
    ("Semalam", "ms"),
    ("Kahapon", "tl"),
    ("မနေ့က", "my"),
    ("Jana", "sw"),
    ("Gister", "af"),
    ("אתמול", "he"),
    ("გუშინ", "ka"),
    ("Երեկ", "hy"),
];

pub fn detect(played_at: &str) -> Option<DayLabel> {
    let trimmed = played_at.trim();
    lookup(TODAY, trimmed, Day::Today).or_else(|| lookup(YESTERDAY, trimmed, Day::Yesterday))
}

fn lookup(table: &[(&str, &'static str)], trimmed: &str, day: Day) -> Option<DayLabel> {
    table
        .iter()
        .find(|(label, _)| *label == trimmed)
        .map(|&(_, language)| DayLabel { day, language })
}

/// Exact-label lookup over the table above.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultilingualDetector;

impl PlayedTodayDetector for MultilingualDetector {
    fn is_played_today(&self, played_at: Option<&str>) -> bool {
        played_at
            .and_then(detect)
            .is_some_and(|label| label.day == Day::Today)
    }
}

/// Labels that matched neither table, so they can be reported and added.
pub fn unknown_labels(history: &[Track]) -> BTreeSet<String> {
    history
        .iter()
        .filter_map(|track| track.played_at.as_deref())
        .map(str::trim)
        .filter(|label| !label.is_empty() && detect(label).is_none())
        .map(str::to_string)
        .collect()
}

pub fn today_languages(history: &[Track]) -> BTreeSet<&'static str> {
    history
        .iter()
        .filter_map(|track| track.played_at.as_deref().and_then(detect))
        .filter(|label| label.day == Day::Today)
        .map(|label| label.language)
        .collect()
}
