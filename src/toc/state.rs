use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::ScrapeError;
use crate::formats::{TocInput, TocMeta, TocPiece};
use crate::toc::adjust::{NormalizedToc, adjust_toc_contents};
use crate::toc::index::Index;
use crate::toc::patterns::{MatchKind, TitleMatch, TocPatterns};

#[derive(Debug, Clone, PartialEq)]
pub struct InternalEpisode {
    pub index: Index,
    pub part: Option<Index>,
    pub title: String,
    pub original_title: String,
    pub url: String,
    pub release_date: Option<DateTime<Utc>>,
    pub locked: bool,
    pub part_count: Option<u32>,
    pub relative: Option<Index>,
    /// Created from an unclassified row during the post pass.
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalPart {
    pub index: Index,
    pub title: String,
}

/// A row no episode could be recovered from, with the positions (into the
/// episode list) of the classified rows around it in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct UnusedPiece {
    pub piece: TocPiece,
    pub title: String,
    pub before: Option<usize>,
    pub after: Option<usize>,
}

/// What a single input contributed to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marked {
    Meta,
    Episode(usize),
    NewPart(Index),
    KnownPart(Index),
    Unused,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderKey {
    part: Option<Index>,
    episode: Option<Index>,
}

impl OrderKey {
    fn compare(&self, previous: &OrderKey) -> Option<Ordering> {
        if let (Some(part), Some(prev_part)) = (self.part, previous.part)
            && part != prev_part
        {
            return Some(part.cmp(&prev_part));
        }
        match (self.episode, previous.episode) {
            // An unnumbered sibling of the same chapter says nothing about order.
            (Some(episode), Some(prev_episode))
                if episode.total == prev_episode.total
                    && (episode.partial.is_none() || prev_episode.partial.is_none()) =>
            {
                None
            }
            (Some(episode), Some(prev_episode)) => Some(episode.cmp(&prev_episode)),
            _ => None,
        }
    }
}

/// Accumulator for one pass over a TOC stream.
#[derive(Debug)]
pub struct ScrapeState<'p> {
    patterns: &'p TocPatterns,
    pub(crate) ascending_count: usize,
    pub(crate) descending_count: usize,
    pub(crate) volume_map: BTreeMap<Index, InternalPart>,
    pub(crate) episodes: Vec<InternalEpisode>,
    pub(crate) unused_pieces: Vec<UnusedPiece>,
    pub(crate) meta: Option<TocMeta>,
    pub(crate) anomalies: Vec<ScrapeError>,
    pub(crate) pieces_seen: usize,
    last_order: Option<OrderKey>,
    last_extracted: Option<usize>,
}

impl<'p> ScrapeState<'p> {
    pub fn new(patterns: &'p TocPatterns) -> Self {
        Self {
            patterns,
            ascending_count: 0,
            descending_count: 0,
            volume_map: BTreeMap::new(),
            episodes: Vec::new(),
            unused_pieces: Vec::new(),
            meta: None,
            anomalies: Vec::new(),
            pieces_seen: 0,
            last_order: None,
            last_extracted: None,
        }
    }

    pub fn patterns(&self) -> &'p TocPatterns {
        self.patterns
    }

    pub fn episodes(&self) -> &[InternalEpisode] {
        &self.episodes
    }

    pub fn parts(&self) -> impl Iterator<Item = &InternalPart> {
        self.volume_map.values()
    }

    pub fn unused_pieces(&self) -> &[UnusedPiece] {
        &self.unused_pieces
    }

    pub fn anomalies(&self) -> &[ScrapeError] {
        &self.anomalies
    }

    /// Majority vote over consecutive rows. A stream without any vote is
    /// treated as ascending.
    pub fn is_ascending(&self) -> bool {
        self.ascending_count > self.descending_count
            || (self.ascending_count == 0 && self.descending_count == 0)
    }

    pub fn push(&mut self, input: TocInput) -> Marked {
        match input {
            TocInput::Meta(meta) => {
                if self.meta.is_some() {
                    tracing::warn!(title = %meta.title, "ignoring repeated toc meta");
                } else {
                    self.meta = Some(meta);
                }
                Marked::Meta
            }
            TocInput::Piece(piece) => self.mark(piece),
        }
    }

    pub fn finish(self) -> NormalizedToc {
        adjust_toc_contents(self)
    }

    pub(crate) fn record(&mut self, anomaly: ScrapeError) {
        tracing::warn!(%anomaly, "toc anomaly");
        self.anomalies.push(anomaly);
    }

    fn mark(&mut self, piece: TocPiece) -> Marked {
        self.pieces_seen += 1;
        let title = self.strip_medium_title(&piece.title);
        let mut matches = self.patterns.find_matches(&title);

        let mut episode: Option<usize> = None;
        let mut episode_index: Option<Index> = None;
        let mut volume: Option<usize> = None;
        let mut relative: Option<Index> = None;
        let mut part_count: Option<u32> = None;

        for i in 0..matches.len() {
            let (done, rest) = matches.split_at_mut(i);
            let current = &mut rest[0];
            if done.iter().any(|m| m.remove && m.overlaps(current)) {
                current.ignore = true;
                continue;
            }

            match current.kind {
                MatchKind::Episode => {
                    if current.overflow || self.patterns.is_invalid_number(&current.number) {
                        let number = current.number.clone();
                        self.record(ScrapeError::InvalidIndexSentinel {
                            title: piece.title.clone(),
                            number,
                        });
                        return Marked::Rejected;
                    }
                    let Some(first) = episode else {
                        episode = Some(i);
                        episode_index = Some(Index::new(current.total, current.partial));
                        current.remove = true;
                        continue;
                    };
                    current.ignore = true;
                    let volume_between = done[first + 1..]
                        .iter()
                        .any(|m| m.kind == MatchKind::Volume && m.remove);
                    if volume_between && relative.is_none() {
                        relative = Some(Index::new(current.total, current.partial));
                        current.remove = true;
                    }
                }
                MatchKind::Part => {
                    let nearest_episode = done.iter().rposition(|m| m.kind == MatchKind::Episode);
                    let Some(open) = episode_index.as_mut().filter(|_| {
                        nearest_episode.is_some() && nearest_episode == episode
                    }) else {
                        current.ignore = true;
                        continue;
                    };
                    current.remove = true;
                    match (open.partial, current.partial) {
                        (None, value) => open.partial = value,
                        (Some(kept), Some(rejected)) if kept != rejected => {
                            let kept_index = *open;
                            let rejected_index = Index::new(open.total, Some(rejected));
                            self.record(ScrapeError::ambiguous(
                                &piece.title,
                                kept_index,
                                rejected_index,
                            ));
                        }
                        _ => {}
                    }
                    if part_count.is_none() {
                        part_count = current.count;
                    }
                }
                MatchKind::Volume => {
                    if volume.is_none() {
                        volume = Some(i);
                        current.remove = true;
                    } else {
                        current.ignore = true;
                    }
                }
            }
        }

        let (episode_title, part_title) = self.residual_titles(&title, &matches, episode, volume);
        let part_index = volume.map(|v| Index::new(matches[v].total, matches[v].partial));
        let created = part_index.is_some_and(|index| self.ensure_part(index, part_title));

        let Some(index) = episode_index else {
            self.vote(OrderKey {
                part: part_index,
                episode: None,
            });
            // Volume header rows only open their part.
            return match part_index {
                Some(index) if created => Marked::NewPart(index),
                Some(index) => Marked::KnownPart(index),
                None => {
                    let title = self.patterns.clean_title(&title);
                    self.unused_pieces.push(UnusedPiece {
                        piece,
                        title,
                        before: self.last_extracted,
                        after: None,
                    });
                    Marked::Unused
                }
            };
        };

        let position = self.episodes.len();
        self.episodes.push(InternalEpisode {
            index,
            part: part_index,
            title: episode_title,
            original_title: piece.title,
            url: piece.url,
            release_date: piece.release_date,
            locked: piece.locked,
            part_count,
            relative,
            synthetic: false,
        });
        for unused in self
            .unused_pieces
            .iter_mut()
            .rev()
            .take_while(|u| u.after.is_none())
        {
            unused.after = Some(position);
        }
        self.last_extracted = Some(position);
        self.vote(OrderKey {
            part: part_index,
            episode: Some(index),
        });
        Marked::Episode(position)
    }

    fn strip_medium_title(&self, title: &str) -> String {
        match &self.meta {
            Some(meta) if !meta.title.is_empty() && title.contains(&meta.title) => {
                title.replace(&meta.title, " ")
            }
            _ => title.to_owned(),
        }
    }

    /// Cuts every consumed match out of `title` and splits the remainder into
    /// the episode title and, when a volume precedes the episode, the text
    /// right after the volume as the part title.
    fn residual_titles(
        &self,
        title: &str,
        matches: &[TitleMatch],
        episode: Option<usize>,
        volume: Option<usize>,
    ) -> (String, String) {
        let volume_heads_episode = volume
            .filter(|&v| episode.is_some_and(|e| matches[e].from > matches[v].from));

        let mut episode_text = String::new();
        let mut part_text = String::new();
        let mut cursor = 0;
        let mut previous: Option<usize> = None;
        for (position, m) in matches.iter().enumerate().filter(|(_, m)| m.remove) {
            let segment = &title[cursor..m.from];
            if previous.is_some() && previous == volume_heads_episode {
                part_text.push_str(segment);
            } else {
                episode_text.push_str(segment);
                episode_text.push(' ');
            }
            cursor = m.to;
            previous = Some(position);
        }
        let tail = &title[cursor..];
        if previous.is_some() && previous == volume_heads_episode {
            part_text.push_str(tail);
        } else {
            episode_text.push_str(tail);
        }

        if episode.is_none() {
            let whole = format!("{episode_text} {part_text}");
            return (String::new(), self.patterns.clean_title(&whole));
        }
        (
            self.patterns.clean_title(&episode_text),
            self.patterns.clean_title(&part_text),
        )
    }

    fn ensure_part(&mut self, index: Index, title: String) -> bool {
        match self.volume_map.get_mut(&index) {
            Some(part) => {
                if part.title.is_empty() && !title.is_empty() {
                    part.title = title;
                }
                false
            }
            None => {
                self.volume_map.insert(index, InternalPart { index, title });
                true
            }
        }
    }

    fn vote(&mut self, key: OrderKey) {
        if key.part.is_none() && key.episode.is_none() {
            return;
        }
        if let Some(previous) = &self.last_order {
            match key.compare(previous) {
                Some(Ordering::Greater) => self.ascending_count += 1,
                Some(Ordering::Less) => self.descending_count += 1,
                _ => {}
            }
        }
        self.last_order = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(title: &str) -> TocInput {
        TocInput::Piece(TocPiece {
            title: title.to_owned(),
            url: format!("https://example.com/{}", title.replace(' ', "-")),
            release_date: None,
            locked: false,
        })
    }

    #[test]
    fn chapter_title_becomes_episode() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        assert_eq!(state.push(piece("Chapter 12 - The Gate")), Marked::Episode(0));
        let episode = &state.episodes()[0];
        assert_eq!(episode.index, Index::new(12, None));
        assert_eq!(episode.title, "The Gate");
        assert_eq!(episode.part, None);
    }

    #[test]
    fn volume_and_episode_split_titles() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Volume 2: The Fall - Chapter 3: Rain"));
        let episode = &state.episodes()[0];
        assert_eq!(episode.index, Index::new(3, None));
        assert_eq!(episode.part, Some(Index::new(2, None)));
        assert_eq!(episode.title, "Rain");
        let part = state.parts().next().unwrap();
        assert_eq!(part.title, "The Fall");
    }

    #[test]
    fn existing_part_is_reused() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        assert_eq!(state.push(piece("Vol 1")), Marked::NewPart(Index::new(1, None)));
        assert_eq!(state.push(piece("Vol 1 Ch 1")), Marked::Episode(0));
        assert_eq!(state.push(piece("Vol 1")), Marked::KnownPart(Index::new(1, None)));
        assert_eq!(state.parts().count(), 1);
        assert!(state.unused_pieces().is_empty());
    }

    #[test]
    fn first_episode_wins_and_volume_between_gives_relative_index() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Chapter 105 (Vol. 3 Chapter 2) The Return"));
        let episode = &state.episodes()[0];
        assert_eq!(episode.index, Index::new(105, None));
        assert_eq!(episode.relative, Some(Index::new(2, None)));
        assert_eq!(episode.part, Some(Index::new(3, None)));
        assert_eq!(episode.title, "The Return");
    }

    #[test]
    fn duplicate_episode_without_volume_is_only_ignored() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Chapter 5 - Recap of Chapter 4"));
        let episode = &state.episodes()[0];
        assert_eq!(episode.index, Index::new(5, None));
        assert_eq!(episode.relative, None);
        assert_eq!(episode.title, "Recap of Chapter 4");
    }

    #[test]
    fn part_match_sets_partial_and_count() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Chapter 4 (2/3) Storm"));
        let episode = &state.episodes()[0];
        assert_eq!(episode.index, Index::new(4, Some(2)));
        assert_eq!(episode.part_count, Some(3));
        assert_eq!(episode.title, "Storm");
    }

    #[test]
    fn part_before_any_episode_is_ignored() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Part 2 - Chapter 9"));
        let episode = &state.episodes()[0];
        assert_eq!(episode.index, Index::new(9, None));
        assert_eq!(episode.title, "Part 2");
    }

    #[test]
    fn second_partial_assignment_keeps_first_and_warns() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Chapter 7.1 Part 2"));
        assert_eq!(state.episodes()[0].index, Index::new(7, Some(1)));
        assert!(matches!(
            state.anomalies(),
            [ScrapeError::AmbiguousIndex { kept, rejected, .. }] if kept == "7.1" && rejected == "7.2"
        ));
    }

    #[test]
    fn invalid_sentinel_rejects_piece() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        assert_eq!(state.push(piece("Chapter 20190312")), Marked::Rejected);
        assert!(state.episodes().is_empty());
        assert!(state.unused_pieces().is_empty());
        assert!(matches!(
            state.anomalies(),
            [ScrapeError::InvalidIndexSentinel { .. }]
        ));
    }

    #[test]
    fn oversized_episode_number_rejects_piece() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Chapter 1"));
        assert_eq!(state.push(piece("Chapter 99999999999999999999")), Marked::Rejected);
        state.push(piece("Chapter 2"));
        assert_eq!(state.episodes().len(), 2);
        assert!(state.unused_pieces().is_empty());
        assert!(matches!(
            state.anomalies(),
            [ScrapeError::InvalidIndexSentinel { number, .. }] if number == "99999999999999999999"
        ));
    }

    #[test]
    fn oversized_sub_chapter_rejects_piece() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Chapter 3"));
        assert_eq!(state.push(piece("Chapter 3.99999999999 - Bonus")), Marked::Rejected);
        assert_eq!(state.episodes().len(), 1);
        assert!(matches!(
            state.anomalies(),
            [ScrapeError::InvalidIndexSentinel { number, .. }] if number == "3.99999999999"
        ));
    }

    #[test]
    fn medium_title_is_stripped() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(TocInput::Meta(TocMeta {
            title: "Sword Art 2".to_owned(),
            ..TocMeta::default()
        }));
        state.push(piece("Sword Art 2 Chapter 8 - Duel"));
        let episode = &state.episodes()[0];
        assert_eq!(episode.index, Index::new(8, None));
        assert_eq!(episode.title, "Duel");
        assert_eq!(episode.original_title, "Sword Art 2 Chapter 8 - Duel");
    }

    #[test]
    fn unused_pieces_track_neighbours() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        state.push(piece("Prologue"));
        state.push(piece("Chapter 1"));
        state.push(piece("Interlude"));
        state.push(piece("Chapter 2"));
        let unused = state.unused_pieces();
        assert_eq!(unused.len(), 2);
        assert_eq!((unused[0].before, unused[0].after), (None, Some(0)));
        assert_eq!((unused[1].before, unused[1].after), (Some(0), Some(1)));
    }

    #[test]
    fn order_votes_follow_indices() {
        let patterns = TocPatterns::compile().unwrap();
        let mut state = ScrapeState::new(&patterns);
        for title in ["Chapter 3", "Chapter 2", "Chapter 1"] {
            state.push(piece(title));
        }
        assert_eq!((state.ascending_count, state.descending_count), (0, 2));
        assert!(!state.is_ascending());

        let mut state = ScrapeState::new(&patterns);
        for title in ["Vol 1 Ch 9", "Vol 2 Ch 1", "Vol 2 Ch 2"] {
            state.push(piece(title));
        }
        assert_eq!((state.ascending_count, state.descending_count), (2, 0));
    }
}
