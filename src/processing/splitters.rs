//! Character-measured splitters: recursive, single separator, and markdown-aware.
//!
//! Lengths are counted in `char`s. Every emitted chunk fits `chunk_size`; pieces that no
//! separator can break are cut on character boundaries as a last resort.

use std::collections::VecDeque;

/// Separator priority used by the recursive splitter when none are configured.
pub(crate) const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Separator priority for markdown: headings, fences, rules, then paragraph structure.
pub(crate) const MARKDOWN_SEPARATORS: [&str; 14] = [
    "\n# ", "\n## ", "\n### ", "\n#### ", "\n##### ", "\n###### ", "```\n", "\n***\n", "\n---\n",
    "\n___\n", "\n\n", "\n", " ", "",
];

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split on `separator`, attaching each separator to the piece that follows it.
fn split_keeping(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(text[start..index].to_string());
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

/// Split on `separator`, dropping it.
fn split_dropping(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    text.split(separator)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Greedily pack `splits` into chunks no longer than `chunk_size`, carrying up to
/// `chunk_overlap` characters of trailing pieces into the next chunk.
pub(crate) fn merge_splits(
    splits: &[String],
    joiner: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let joiner_len = char_len(joiner);
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    let join = |window: &VecDeque<(&str, usize)>| -> String {
        window
            .iter()
            .map(|(piece, _)| *piece)
            .collect::<Vec<_>>()
            .join(joiner)
            .trim()
            .to_string()
    };

    for split in splits {
        let length = char_len(split);
        let separator_cost = if window.is_empty() { 0 } else { joiner_len };
        if total + length + separator_cost > chunk_size && !window.is_empty() {
            let chunk = join(&window);
            if !chunk.is_empty() {
                chunks.push(chunk);
            }
            while let Some(&(_, first_len)) = window.front() {
                let fits = total + length + joiner_len <= chunk_size;
                if total <= chunk_overlap && fits {
                    break;
                }
                let joiner_cost = if window.len() > 1 { joiner_len } else { 0 };
                window.pop_front();
                total -= first_len + joiner_cost;
            }
        }
        let cost = if window.is_empty() { 0 } else { joiner_len };
        window.push_back((split.as_str(), length));
        total += length + cost;
    }

    let chunk = join(&window);
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

/// Cut `text` into fixed windows of `chunk_size` characters stepping by
/// `chunk_size - chunk_overlap`.
pub(crate) fn hard_split(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Recursive splitting: try separators in order, descending into pieces that are still too long.
pub(crate) fn split_recursive(
    text: &str,
    separators: &[String],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator.as_str()));
    let Some(position) = position else {
        return if char_len(text) <= chunk_size {
            let trimmed = text.trim();
            if trimmed.is_empty() { Vec::new() } else { vec![trimmed.to_string()] }
        } else {
            hard_split(text, chunk_size, chunk_overlap)
        };
    };
    let separator = separators[position].as_str();
    let remaining = &separators[position + 1..];

    let mut chunks = Vec::new();
    let mut fitting: Vec<String> = Vec::new();
    for piece in split_keeping(text, separator) {
        if char_len(&piece) < chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            chunks.extend(merge_splits(&fitting, "", chunk_size, chunk_overlap));
            fitting.clear();
        }
        if remaining.is_empty() {
            chunks.extend(hard_split(&piece, chunk_size, chunk_overlap));
        } else {
            chunks.extend(split_recursive(&piece, remaining, chunk_size, chunk_overlap));
        }
    }
    if !fitting.is_empty() {
        chunks.extend(merge_splits(&fitting, "", chunk_size, chunk_overlap));
    }
    chunks
}

/// Single-separator splitting; oversize pieces fall back to [`hard_split`].
pub(crate) fn split_on_separator(
    text: &str,
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let mut pieces = Vec::new();
    for piece in split_dropping(text, separator) {
        if char_len(&piece) > chunk_size {
            pieces.extend(hard_split(&piece, chunk_size, chunk_overlap));
        } else {
            pieces.push(piece);
        }
    }
    merge_splits(&pieces, separator, chunk_size, chunk_overlap)
}
