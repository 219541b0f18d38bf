use std::collections::{BTreeMap, HashMap};

use crate::error::ScrapeError;
use crate::formats::{TocContent, TocEpisode, TocMeta, TocPart};
use crate::toc::index::Index;
use crate::toc::state::{InternalEpisode, ScrapeState, UnusedPiece};

/// Final output of one normalization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedToc {
    pub contents: Vec<TocContent>,
    pub meta: Option<TocMeta>,
    pub anomalies: Vec<ScrapeError>,
}

impl NormalizedToc {
    pub fn episodes(&self) -> impl Iterator<Item = &TocEpisode> {
        self.contents.iter().flat_map(|content| match content {
            TocContent::Part(part) => part.episodes.iter().collect::<Vec<_>>(),
            TocContent::Episode(episode) => vec![episode],
        })
    }

    pub fn parts(&self) -> impl Iterator<Item = &TocPart> {
        self.contents.iter().filter_map(|content| match content {
            TocContent::Part(part) => Some(part),
            TocContent::Episode(_) => None,
        })
    }

    /// Every episode in display order, without part nesting.
    pub fn into_flat(self) -> Vec<TocContent> {
        self.contents
            .into_iter()
            .flat_map(|content| match content {
                TocContent::Part(part) => part.episodes.into_iter().map(TocContent::Episode).collect(),
                episode @ TocContent::Episode(_) => vec![episode],
            })
            .collect()
    }
}

pub(crate) fn adjust_toc_contents(mut state: ScrapeState<'_>) -> NormalizedToc {
    if state.episodes.is_empty() && state.volume_map.is_empty() && state.pieces_seen > 0 {
        let detail = format!(
            "none of {} pieces matched a volume or chapter pattern",
            state.pieces_seen
        );
        state.record(ScrapeError::FormatChanged { detail });
        return NormalizedToc {
            contents: Vec::new(),
            meta: state.meta,
            anomalies: state.anomalies,
        };
    }

    let ascending = state.is_ascending();
    tracing::debug!(
        ascending,
        ascending_count = state.ascending_count,
        descending_count = state.descending_count,
        "toc order decided"
    );

    fill_part_counts(&mut state, ascending);
    stitch_unused(&mut state, ascending);
    let kept = dedupe(&mut state);
    let contents = externalize(&state, &kept);

    NormalizedToc {
        contents,
        meta: state.meta,
        anomalies: state.anomalies,
    }
}

/// Positions of classified episodes in display order.
fn display_sequence(state: &ScrapeState<'_>, ascending: bool) -> Vec<usize> {
    let mut sequence: Vec<usize> = state
        .episodes
        .iter()
        .enumerate()
        .filter(|(_, episode)| !episode.synthetic)
        .map(|(position, _)| position)
        .collect();
    if !ascending {
        sequence.reverse();
    }
    sequence
}

fn same_slot(a: &InternalEpisode, b: &InternalEpisode) -> bool {
    a.part == b.part && a.index.total == b.index.total
}

/// Spreads a declared `n/m` part numbering over adjacent unnumbered rows of
/// the same chapter.
fn fill_part_counts(state: &mut ScrapeState<'_>, ascending: bool) {
    let sequence = display_sequence(state, ascending);
    for (position, &anchor) in sequence.iter().enumerate() {
        let (Some(count), Some(start)) = (
            state.episodes[anchor].part_count,
            state.episodes[anchor].index.partial,
        ) else {
            continue;
        };
        if start < 1 || start > count {
            continue;
        }

        let mut expected = start + 1;
        for &sibling in &sequence[position + 1..] {
            if expected > count || !assign_partial(state, anchor, sibling, expected) {
                break;
            }
            expected += 1;
        }

        let mut expected = start - 1;
        for &sibling in sequence[..position].iter().rev() {
            if expected < 1 || !assign_partial(state, anchor, sibling, expected) {
                break;
            }
            expected -= 1;
        }
    }
}

/// Returns whether the walk may continue past `sibling`.
fn assign_partial(state: &mut ScrapeState<'_>, anchor: usize, sibling: usize, expected: u32) -> bool {
    if !same_slot(&state.episodes[anchor], &state.episodes[sibling]) {
        return false;
    }
    let kept = state.episodes[sibling].index;
    match kept.partial {
        None => {
            state.episodes[sibling].index.partial = Some(expected);
            true
        }
        Some(existing) if existing == expected => true,
        Some(_) => {
            let rejected = Index::new(kept.total, Some(expected));
            let title = state.episodes[sibling].original_title.clone();
            state.record(ScrapeError::ambiguous(&title, kept, rejected));
            false
        }
    }
}

/// Turns unclassified rows into episodes placed around the classified ones.
///
/// Rows before the first episode become prologue material at index 0. Rows
/// after the last episode are only kept when the listing is complete. Rows in
/// between take the partial index right after their display predecessor.
fn stitch_unused(state: &mut ScrapeState<'_>, ascending: bool) {
    let unused = std::mem::take(&mut state.unused_pieces);
    if unused.is_empty() {
        return;
    }
    let complete = state.meta.as_ref().is_some_and(|meta| meta.end);
    let sequence = display_sequence(state, ascending);
    let first = sequence.first().copied();
    let last = sequence
        .iter()
        .copied()
        .max_by_key(|&p| (state.episodes[p].part, state.episodes[p].index));

    let mut leading = Vec::new();
    let mut middle = Vec::new();
    let mut trailing = Vec::new();
    for piece in unused {
        let (previous, next) = if ascending {
            (piece.before, piece.after)
        } else {
            (piece.after, piece.before)
        };
        match (previous, next) {
            (None, _) => leading.push(piece),
            (Some(_), None) => trailing.push(piece),
            (Some(anchor), Some(_)) => middle.push((anchor, piece)),
        }
    }
    if !ascending {
        leading.reverse();
        middle.reverse();
        trailing.reverse();
    }

    let leading_part = first.and_then(|p| state.episodes[p].part);
    for piece in leading {
        let partial = next_free_partial(state, leading_part, 0);
        push_synthetic(state, piece, leading_part, Index::new(0, Some(partial)));
    }

    for (anchor, piece) in middle {
        let part = state.episodes[anchor].part;
        let index = slot_after(state, anchor, &piece);
        push_synthetic(state, piece, part, index);
    }

    match last {
        Some(anchor) if complete => {
            let part = state.episodes[anchor].part;
            let total = state.episodes[anchor].index.total;
            for piece in trailing {
                let partial = next_free_partial(state, part, total);
                push_synthetic(state, piece, part, Index::new(total, Some(partial)));
            }
        }
        _ => {
            for piece in trailing {
                tracing::debug!(title = %piece.piece.title, "dropping trailing row of incomplete toc");
            }
        }
    }
}

/// First partial index right after `anchor`, skipping rows already stitched
/// there. When a classified episode holds that slot the row cannot sit
/// between the two; it goes after every partial of the chapter instead.
fn slot_after(state: &mut ScrapeState<'_>, anchor: usize, piece: &UnusedPiece) -> Index {
    let part = state.episodes[anchor].part;
    let anchor_index = state.episodes[anchor].index;
    let mut slot = Index::new(
        anchor_index.total,
        Some(anchor_index.partial.unwrap_or(0).saturating_add(1)),
    );
    loop {
        let synthetic = match occupant(state, part, slot) {
            None => return slot,
            Some(episode) => episode.synthetic,
        };
        let next = slot.partial.and_then(|partial| partial.checked_add(1));
        match next {
            Some(next) if synthetic => slot.partial = Some(next),
            _ => break,
        }
    }
    let fallback = Index::new(
        anchor_index.total,
        Some(next_free_partial(state, part, anchor_index.total)),
    );
    state.record(ScrapeError::ambiguous(&piece.piece.title, fallback, slot));
    fallback
}

fn occupant<'s>(state: &'s ScrapeState<'_>, part: Option<Index>, slot: Index) -> Option<&'s InternalEpisode> {
    let combi = slot.combi().to_bits();
    state
        .episodes
        .iter()
        .find(|episode| episode.part == part && episode.index.combi().to_bits() == combi)
}

fn next_free_partial(state: &ScrapeState<'_>, part: Option<Index>, total: i64) -> u32 {
    state
        .episodes
        .iter()
        .filter(|episode| episode.part == part && episode.index.total == total)
        .filter_map(|episode| episode.index.partial)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

fn push_synthetic(state: &mut ScrapeState<'_>, unused: UnusedPiece, part: Option<Index>, index: Index) {
    tracing::debug!(title = %unused.piece.title, %index, "placing unclassified row");
    state.episodes.push(InternalEpisode {
        index,
        part,
        title: unused.title,
        original_title: unused.piece.title,
        url: unused.piece.url,
        release_date: unused.piece.release_date,
        locked: unused.piece.locked,
        part_count: None,
        relative: None,
        synthetic: true,
    });
}

/// Drops later episodes that collide with an earlier one in the same part.
/// Keeps the first episode per part and combi index. Comparing the combi
/// value also catches `12.1` against `12.10`.
fn dedupe(state: &mut ScrapeState<'_>) -> Vec<usize> {
    let mut seen: HashMap<(Option<Index>, u64), Index> = HashMap::new();
    let mut kept = Vec::with_capacity(state.episodes.len());
    for position in 0..state.episodes.len() {
        let episode = &state.episodes[position];
        let key = (episode.part, episode.index.combi().to_bits());
        match seen.get(&key) {
            None => {
                seen.insert(key, episode.index);
                kept.push(position);
            }
            Some(&first) => {
                let (index, title) = (episode.index, episode.original_title.clone());
                state.record(ScrapeError::ambiguous(&title, first, index));
            }
        }
    }
    kept
}

fn externalize(state: &ScrapeState<'_>, kept: &[usize]) -> Vec<TocContent> {
    let mut loose: Vec<&InternalEpisode> = Vec::new();
    let mut parts: BTreeMap<Index, (String, Vec<&InternalEpisode>)> = state
        .volume_map
        .values()
        .map(|part| (part.index, (part.title.clone(), Vec::new())))
        .collect();
    for &position in kept {
        let episode = &state.episodes[position];
        match episode.part {
            Some(part) => parts.entry(part).or_default().1.push(episode),
            None => loose.push(episode),
        }
    }

    if parts.is_empty() {
        loose.sort_by_key(|episode| episode.index);
        return loose.into_iter().map(|e| TocContent::Episode(to_toc_episode(e))).collect();
    }
    if !loose.is_empty() {
        parts.insert(Index::UNINDEXED, (String::new(), loose));
    }

    parts
        .into_iter()
        .map(|(index, (title, mut episodes))| {
            episodes.sort_by_key(|episode| episode.index);
            TocContent::Part(TocPart {
                title,
                combi_index: index.combi(),
                total_index: index.total,
                partial_index: index.partial,
                episodes: episodes.into_iter().map(to_toc_episode).collect(),
            })
        })
        .collect()
}

fn to_toc_episode(episode: &InternalEpisode) -> TocEpisode {
    TocEpisode {
        title: episode.title.clone(),
        combi_index: episode.index.combi(),
        total_index: episode.index.total,
        partial_index: episode.index.partial,
        relative_index: episode.relative.map(|index| index.combi()),
        url: episode.url.clone(),
        locked: episode.locked,
        release_date: episode.release_date,
    }
}
