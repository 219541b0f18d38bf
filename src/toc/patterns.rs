use regex::{Captures, Regex};

use crate::error::ScrapeError;

const VOLUME: &str = r"(?i)\b(?:volume|vol|book|v)\s*[.:]?\s*(?P<total>\d+)(?:\.(?P<partial>\d+))?";
const EPISODE: &str = r"(?i)(?:\b(?:chapter|chap|ch|episode|ep|word|act|c|e)\s*[.:]?\s*|#\s*|^\s*)(?P<total>\d+)(?:\.(?P<partial>\d+))?";
const PART: &str = r"(?i)(?:\b(?:part|pt|p)\s*[.:]?\s*|\(\s*)(?P<total>\d+)(?:\s*/\s*(?P<count>\d+))?\s*\)?";
const INVALID_NUMBER: &str = r"^\d{5,}$";
const EMPTY_BRACKETS: &str = r"\(\s*\)|\[\s*\]|\{\s*\}";
const WHITESPACE: &str = r"\s+";

/// Longest bare `(n)` accepted as a part number; longer ones are years or ids.
const MAX_BARE_PART_DIGITS: usize = 2;

const SEPARATORS: &[char] = &[':', '-', '–', '—', ',', '.', '|', '~', '_', '/'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Volume,
    Episode,
    Part,
}

/// A located pattern hit inside a title. Spans are byte offsets into the
/// title the matches were collected from, which is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleMatch {
    pub from: usize,
    pub to: usize,
    pub kind: MatchKind,
    pub total: i64,
    pub partial: Option<u32>,
    /// Upper bound of a `(n/m)` part match.
    pub count: Option<u32>,
    pub number: String,
    /// A digit group did not fit its index type.
    pub overflow: bool,
    /// Not used for classification.
    pub ignore: bool,
    /// Cut from the residual title.
    pub remove: bool,
}

impl TitleMatch {
    pub fn contains(&self, other: &TitleMatch) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    pub fn overlaps(&self, other: &TitleMatch) -> bool {
        self.from < other.to && other.from < self.to
    }
}

/// Compiled title patterns, shared by every scrape state of a normalizer.
#[derive(Debug, Clone)]
pub struct TocPatterns {
    volume: Regex,
    episode: Regex,
    part: Regex,
    invalid_number: Regex,
    empty_brackets: Regex,
    whitespace: Regex,
}

impl TocPatterns {
    pub fn compile() -> Result<Self, ScrapeError> {
        Ok(Self {
            volume: Regex::new(VOLUME)?,
            episode: Regex::new(EPISODE)?,
            part: Regex::new(PART)?,
            invalid_number: Regex::new(INVALID_NUMBER)?,
            empty_brackets: Regex::new(EMPTY_BRACKETS)?,
            whitespace: Regex::new(WHITESPACE)?,
        })
    }

    /// All volume, episode and part hits of `title`, sorted by start offset.
    /// On equal starts the longer hit comes first, then volume before episode
    /// before part.
    pub fn find_matches(&self, title: &str) -> Vec<TitleMatch> {
        let mut matches = Vec::new();
        for (kind, regex) in [
            (MatchKind::Volume, &self.volume),
            (MatchKind::Episode, &self.episode),
            (MatchKind::Part, &self.part),
        ] {
            for caps in regex.captures_iter(title) {
                if let Some(found) = to_match(kind, &caps) {
                    matches.push(found);
                }
            }
        }
        matches.sort_by(|a, b| a.from.cmp(&b.from).then(b.to.cmp(&a.to)));
        matches
    }

    pub fn is_invalid_number(&self, number: &str) -> bool {
        self.invalid_number.is_match(number)
    }

    /// Tidies a residual title fragment: drops brackets left empty by removed
    /// matches, collapses whitespace and trims separator noise at both ends.
    pub fn clean_title(&self, raw: &str) -> String {
        let without_brackets = self.empty_brackets.replace_all(raw, " ");
        let collapsed = self.whitespace.replace_all(&without_brackets, " ");
        collapsed
            .trim_matches(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
            .to_owned()
    }
}

fn to_match(kind: MatchKind, caps: &Captures<'_>) -> Option<TitleMatch> {
    let whole = caps.get(0)?;
    let number = caps.name("total")?.as_str();
    let count = caps.name("count").and_then(|m| m.as_str().parse::<u32>().ok());
    if kind == MatchKind::Part
        && count.is_none()
        && whole.as_str().starts_with('(')
        && number.len() > MAX_BARE_PART_DIGITS
    {
        return None;
    }

    let (total, partial, overflow) = match kind {
        // Part matches carry their number as the partial index of the episode.
        MatchKind::Part => (0, Some(number.parse::<u32>().ok()?), false),
        MatchKind::Volume => {
            let partial = match caps.name("partial") {
                Some(m) => Some(m.as_str().parse::<u32>().ok()?),
                None => None,
            };
            (number.parse::<i64>().ok()?, partial, false)
        }
        // Episode numbers that do not fit are kept so the piece gets rejected
        // instead of being treated as unclassified.
        MatchKind::Episode => {
            let total = number.parse::<i64>();
            let partial = caps.name("partial").map(|m| m.as_str().parse::<u32>());
            let overflow = total.is_err() || partial.as_ref().is_some_and(Result::is_err);
            (
                total.unwrap_or_default(),
                partial.and_then(Result::ok),
                overflow,
            )
        }
    };
    let number = match (kind, caps.name("partial")) {
        (MatchKind::Episode, Some(partial)) if overflow => format!("{number}.{}", partial.as_str()),
        _ => number.to_owned(),
    };

    Some(TitleMatch {
        from: whole.start(),
        to: whole.end(),
        kind,
        total,
        partial,
        count,
        number,
        overflow,
        ignore: false,
        remove: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(matches: &[TitleMatch]) -> Vec<(MatchKind, i64, Option<u32>)> {
        matches.iter().map(|m| (m.kind, m.total, m.partial)).collect()
    }

    #[test]
    fn finds_volume_and_episode_with_decimal() {
        let patterns = TocPatterns::compile().unwrap();
        let matches = patterns.find_matches("Vol.3 Ch.12.5 - Homecoming");
        assert_eq!(
            kinds(&matches),
            [
                (MatchKind::Volume, 3, None),
                (MatchKind::Episode, 12, Some(5)),
            ]
        );
        assert_eq!((matches[0].from, matches[0].to), (0, 5));
        assert_eq!((matches[1].from, matches[1].to), (6, 13));
    }

    #[test]
    fn finds_keyword_variants() {
        let patterns = TocPatterns::compile().unwrap();
        for title in ["Chapter 7", "chap. 7", "Ch 7", "Episode 7", "Ep.7", "c7", "#7", "7 - Rain"] {
            let matches = patterns.find_matches(title);
            assert_eq!(kinds(&matches), [(MatchKind::Episode, 7, None)], "{title}");
        }
        let matches = patterns.find_matches("Book 2");
        assert_eq!(kinds(&matches), [(MatchKind::Volume, 2, None)]);
    }

    #[test]
    fn part_match_carries_count() {
        let patterns = TocPatterns::compile().unwrap();
        let matches = patterns.find_matches("Chapter 4 (2/3)");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[1].kind, MatchKind::Part);
        assert_eq!(matches[1].partial, Some(2));
        assert_eq!(matches[1].count, Some(3));

        let matches = patterns.find_matches("Chapter 4 Part 2");
        assert_eq!(matches[1].partial, Some(2));
        assert_eq!(matches[1].count, None);
    }

    #[test]
    fn plain_words_do_not_match() {
        let patterns = TocPatterns::compile().unwrap();
        assert!(patterns.find_matches("Prologue").is_empty());
        assert!(patterns.find_matches("Level Up!").is_empty());
    }

    #[test]
    fn clean_title_strips_noise() {
        let patterns = TocPatterns::compile().unwrap();
        assert_eq!(patterns.clean_title("  - Homecoming "), "Homecoming");
        assert_eq!(patterns.clean_title(" (  ) The   Return"), "The Return");
        assert_eq!(patterns.clean_title("Homecoming (Remastered)"), "Homecoming (Remastered)");
        assert_eq!(patterns.clean_title(" : "), "");
    }

    #[test]
    fn bare_parenthesised_part_is_short() {
        let patterns = TocPatterns::compile().unwrap();
        let matches = patterns.find_matches("Chapter 5 (2019)");
        assert_eq!(kinds(&matches), [(MatchKind::Episode, 5, None)]);

        let matches = patterns.find_matches("Chapter 5 (2)");
        assert_eq!(matches[1].kind, MatchKind::Part);
        assert_eq!(matches[1].partial, Some(2));

        let matches = patterns.find_matches("Chapter 5 (120/130)");
        assert_eq!(matches[1].partial, Some(120));
        assert_eq!(matches[1].count, Some(130));
    }

    #[test]
    fn oversized_episode_numbers_are_kept_as_overflow() {
        let patterns = TocPatterns::compile().unwrap();
        let matches = patterns.find_matches("Chapter 99999999999999999999");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].overflow);
        assert_eq!(matches[0].number, "99999999999999999999");

        let matches = patterns.find_matches("Chapter 3.99999999999 - Bonus");
        assert!(matches[0].overflow);
        assert_eq!(matches[0].number, "3.99999999999");

        let matches = patterns.find_matches("Chapter 3.5");
        assert!(!matches[0].overflow);
    }

    #[test]
    fn long_numbers_are_invalid() {
        let patterns = TocPatterns::compile().unwrap();
        assert!(patterns.is_invalid_number("123456"));
        assert!(!patterns.is_invalid_number("1234"));
    }
}
