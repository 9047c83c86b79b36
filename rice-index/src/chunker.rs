//! Semantic chunking strategies selected by language family.
//!
//! Brace-family sources split on top-level `{ }` balanced regions,
//! indent-structured sources on dedent-to-baseline, markdown on headings,
//! and everything else falls back to fixed line windows. Regions are then
//! merged up to the target token size; oversized regions are split into
//! overlapping line windows.

use crate::language::ChunkFamily;

/// Rough token estimate: whitespace-separated words.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Chunking parameters, usually taken from the store config.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target tokens per chunk
    pub chunk_size: usize,
    /// Overlap tokens carried between windows of a split region
    pub chunk_overlap: usize,
    /// Chunks below this are merged with neighbors where possible
    pub min_tokens: usize,
    /// Hard ceiling per chunk
    pub max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 64,
            min_tokens: 32,
            max_tokens: 2048,
        }
    }
}

/// A chunk before identity and embedding are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub content: String,
    /// 1-indexed inclusive line range
    pub start_line: u32,
    pub end_line: u32,
    /// Character offsets into the document
    pub start_offset: usize,
    pub end_offset: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone)]
struct Line<'a> {
    text: &'a str,
    /// 1-indexed
    number: u32,
    start_offset: usize,
    end_offset: usize,
    tokens: usize,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    /// Inclusive indexes into the line table
    start: usize,
    end: usize,
    has_brace: bool,
}

/// Split a document into chunks for the given language family.
pub fn chunk_content(content: &str, family: ChunkFamily, config: &ChunkerConfig) -> Vec<RawChunk> {
    let lines = split_lines(content);
    if lines.iter().all(|line| line.tokens == 0) {
        return Vec::new();
    }

    let target = config.chunk_size.clamp(config.min_tokens, config.max_tokens);

    match family {
        ChunkFamily::Line => window_lines(&lines, 0, lines.len() - 1, target, config.chunk_overlap),
        family => {
            let mut regions = match family {
                ChunkFamily::Brace => brace_regions(&lines),
                ChunkFamily::Indent => indent_regions(&lines),
                ChunkFamily::Heading => heading_regions(&lines),
                ChunkFamily::Line => unreachable!(),
            };
            if family == ChunkFamily::Brace {
                drop_trivial_preamble(&lines, &mut regions, config.min_tokens);
            }
            assemble(&lines, &regions, target, config)
        }
    }
}

fn split_lines(content: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    for (index, text) in content.split('\n').enumerate() {
        let chars = text.chars().count();
        lines.push(Line {
            text,
            number: (index + 1) as u32,
            start_offset: offset,
            end_offset: offset + chars,
            tokens: estimate_tokens(text),
        });
        offset += chars + 1;
    }
    // A trailing newline produces a phantom empty last line.
    if lines.len() > 1 && lines.last().map(|l| l.text.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

/// Count `{`/`}` on a line, skipping string literals. `in_string` persists
/// across lines to survive multiline literals.
fn scan_braces(text: &str, in_string: &mut bool) -> (i32, i32) {
    let mut opens = 0;
    let mut closes = 0;
    let mut escape_next = false;
    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' | '\'' => *in_string = !*in_string,
            '{' if !*in_string => opens += 1,
            '}' if !*in_string => closes += 1,
            _ => {}
        }
    }
    (opens, closes)
}

fn brace_regions(lines: &[Line<'_>]) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut region_start: Option<usize> = None;
    let mut region_has_brace = false;

    for (i, line) in lines.iter().enumerate() {
        let blank = line.text.trim().is_empty();
        if region_start.is_none() {
            if blank {
                continue;
            }
            region_start = Some(i);
            region_has_brace = false;
        }

        let (opens, closes) = scan_braces(line.text, &mut in_string);
        depth = (depth + opens - closes).max(0);
        if opens > 0 || closes > 0 {
            region_has_brace = true;
        }

        if depth == 0 {
            let trimmed = line.text.trim_end();
            let closes_construct = region_has_brace && trimmed.contains('}');
            let next_blank = lines
                .get(i + 1)
                .map(|next| next.text.trim().is_empty())
                .unwrap_or(true);
            if closes_construct || (!region_has_brace && next_blank) {
                regions.push(Region {
                    start: region_start.take().unwrap_or(i),
                    end: i,
                    has_brace: region_has_brace,
                });
            }
        }
    }
    if let Some(start) = region_start {
        regions.push(Region {
            start,
            end: lines.len() - 1,
            has_brace: region_has_brace,
        });
    }
    regions
}

fn indent_regions(lines: &[Line<'_>]) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut region_start: Option<usize> = None;
    let mut last_content: usize = 0;
    let mut saw_indented = false;

    for (i, line) in lines.iter().enumerate() {
        let blank = line.text.trim().is_empty();
        if blank {
            continue;
        }
        let indented = line.text.starts_with(' ') || line.text.starts_with('\t');

        match region_start {
            None => {
                region_start = Some(i);
                saw_indented = indented;
            }
            Some(start) => {
                // A baseline line after indented content starts a new block.
                if !indented && saw_indented {
                    regions.push(Region {
                        start,
                        end: last_content,
                        has_brace: false,
                    });
                    region_start = Some(i);
                    saw_indented = false;
                } else if indented {
                    saw_indented = true;
                }
            }
        }
        last_content = i;
    }
    if let Some(start) = region_start {
        regions.push(Region {
            start,
            end: last_content,
            has_brace: false,
        });
    }
    regions
}

fn heading_regions(lines: &[Line<'_>]) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut region_start: Option<usize> = None;
    let mut last_content: usize = 0;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.text.trim_start();
        let blank = trimmed.is_empty();
        let heading = trimmed.starts_with('#');

        if heading {
            if let Some(start) = region_start.take() {
                regions.push(Region {
                    start,
                    end: last_content,
                    has_brace: false,
                });
            }
            region_start = Some(i);
            last_content = i;
        } else if !blank {
            if region_start.is_none() {
                region_start = Some(i);
            }
            last_content = i;
        }
    }
    if let Some(start) = region_start {
        regions.push(Region {
            start,
            end: last_content,
            has_brace: false,
        });
    }
    regions
}

/// Drop sub-minimum leading regions with no braced construct (package
/// clauses, lone imports). Only regions before the first braced one are
/// candidates; files without any braced region keep everything.
fn drop_trivial_preamble(lines: &[Line<'_>], regions: &mut Vec<Region>, min_tokens: usize) {
    let Some(first_braced) = regions.iter().position(|r| r.has_brace) else {
        return;
    };
    let mut keep = Vec::with_capacity(regions.len());
    for (i, region) in regions.iter().enumerate() {
        if i < first_braced && region_tokens(lines, region) < min_tokens {
            continue;
        }
        keep.push(*region);
    }
    *regions = keep;
}

fn region_tokens(lines: &[Line<'_>], region: &Region) -> usize {
    lines[region.start..=region.end]
        .iter()
        .map(|line| line.tokens)
        .sum()
}

/// Merge small regions toward the target size; split oversized ones into
/// overlapping line windows.
fn assemble(
    lines: &[Line<'_>],
    regions: &[Region],
    target: usize,
    config: &ChunkerConfig,
) -> Vec<RawChunk> {
    let mut chunks = Vec::new();
    let mut acc: Option<(usize, usize, usize)> = None; // (start, end, tokens)

    for region in regions {
        let tokens = region_tokens(lines, region);

        if tokens > target {
            if let Some((start, end, _)) = acc.take() {
                chunks.push(make_chunk(lines, start, end));
            }
            chunks.extend(window_lines(
                lines,
                region.start,
                region.end,
                target,
                config.chunk_overlap,
            ));
            continue;
        }

        match acc {
            None => acc = Some((region.start, region.end, tokens)),
            Some((start, _, acc_tokens)) => {
                if acc_tokens + tokens > target {
                    let (start, end, _) = acc.take().unwrap_or((region.start, region.end, 0));
                    chunks.push(make_chunk(lines, start, end));
                    acc = Some((region.start, region.end, tokens));
                } else {
                    acc = Some((start, region.end, acc_tokens + tokens));
                }
            }
        }
    }
    if let Some((start, end, _)) = acc {
        chunks.push(make_chunk(lines, start, end));
    }
    chunks
}

/// Fixed windows of roughly `target` tokens with `overlap` tokens carried
/// from the previous window.
fn window_lines(
    lines: &[Line<'_>],
    start: usize,
    end: usize,
    target: usize,
    overlap: usize,
) -> Vec<RawChunk> {
    let mut chunks = Vec::new();
    let mut window_start = start;

    while window_start <= end {
        let mut window_end = window_start;
        let mut tokens = lines[window_start].tokens;
        while window_end < end && tokens + lines[window_end + 1].tokens <= target {
            window_end += 1;
            tokens += lines[window_end].tokens;
        }
        // A single line larger than the target is emitted whole.
        chunks.push(make_chunk(lines, window_start, window_end));

        if window_end >= end {
            break;
        }

        // Back up enough trailing lines to cover the overlap budget, while
        // always making forward progress.
        let mut next_start = window_end + 1;
        let mut carried = 0usize;
        while next_start > window_start + 1 && carried < overlap {
            carried += lines[next_start - 1].tokens;
            next_start -= 1;
        }
        window_start = next_start;
    }
    chunks
}

fn make_chunk(lines: &[Line<'_>], start: usize, end: usize) -> RawChunk {
    let span = &lines[start..=end];
    let content: String = span
        .iter()
        .map(|line| line.text)
        .collect::<Vec<_>>()
        .join("\n");
    RawChunk {
        token_count: span.iter().map(|line| line.tokens).sum(),
        start_line: span[0].number,
        end_line: span[span.len() - 1].number,
        start_offset: span[0].start_offset,
        end_offset: span[span.len() - 1].end_offset,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[test]
    fn test_go_hello_world_single_chunk_at_function() {
        let content = "package a\n\nfunc Hello() string { return \"hi\" }\n";
        let chunks = chunk_content(content, ChunkFamily::Brace, &config());

        // the sub-minimum package clause is dropped, the function remains
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 3);
        assert_eq!(chunks[0].end_line, 3);
        assert!(chunks[0].content.contains("func Hello"));
    }

    #[test]
    fn test_small_functions_merge_into_one_chunk() {
        let content = "fn a() {\n    1\n}\n\nfn b() {\n    2\n}\n";
        let chunks = chunk_content(content, ChunkFamily::Brace, &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 7);
        assert!(chunks[0].content.contains("fn a"));
        assert!(chunks[0].content.contains("fn b"));
    }

    #[test]
    fn test_large_regions_stay_separate() {
        let body = "    call_something(argument, another, third, fourth);\n".repeat(80);
        let content = format!("fn first() {{\n{}}}\n\nfn second() {{\n{}}}\n", body, body);
        let chunks = chunk_content(&content, ChunkFamily::Brace, &config());
        assert!(chunks.len() >= 2);
        // no chunk spans both functions
        for chunk in &chunks {
            assert!(!(chunk.content.contains("fn first") && chunk.content.contains("fn second")));
        }
    }

    #[test]
    fn test_oversized_region_splits_with_overlap() {
        let mut content = String::from("fn huge() {\n");
        for i in 0..400 {
            content.push_str(&format!("    let value_{} = compute({}, {});\n", i, i, i));
        }
        content.push_str("}\n");

        let chunks = chunk_content(&content, ChunkFamily::Brace, &config());
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // consecutive windows overlap in line range
            assert!(pair[1].start_line <= pair[0].end_line);
            assert!(pair[1].start_line > pair[0].start_line);
        }
        for chunk in &chunks {
            assert!(chunk.token_count <= config().max_tokens);
        }
    }

    #[test]
    fn test_braces_in_strings_ignored() {
        let content = "fn f() {\n    let s = \"closing } brace\";\n    done()\n}\n";
        let chunks = chunk_content(content, ChunkFamily::Brace, &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_line, 4);
    }

    #[test]
    fn test_indent_family_splits_on_dedent() {
        let content = "def first():\n    a = 1\n    return a\n\ndef second():\n    return 2\n";
        let small = ChunkerConfig {
            chunk_size: 8,
            min_tokens: 1,
            ..config()
        };
        let chunks = chunk_content(content, ChunkFamily::Indent, &small);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].start_line, 5);
    }

    #[test]
    fn test_heading_family_splits_on_headings() {
        let content = "intro text\n\n# First\nbody one\n\n# Second\nbody two\n";
        let small = ChunkerConfig {
            chunk_size: 4,
            min_tokens: 1,
            ..config()
        };
        let chunks = chunk_content(content, ChunkFamily::Heading, &small);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].content.starts_with("# First"));
        assert!(chunks[2].content.starts_with("# Second"));
    }

    #[test]
    fn test_line_family_windows() {
        let content = (0..100)
            .map(|i| format!("line number {} with words", i))
            .collect::<Vec<_>>()
            .join("\n");
        let small = ChunkerConfig {
            chunk_size: 50,
            chunk_overlap: 10,
            min_tokens: 1,
            ..config()
        };
        let chunks = chunk_content(&content, ChunkFamily::Line, &small);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line);
        }
    }

    #[test]
    fn test_empty_and_blank_content() {
        assert!(chunk_content("", ChunkFamily::Brace, &config()).is_empty());
        assert!(chunk_content("\n\n  \n", ChunkFamily::Line, &config()).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let content = "package a\n\nfunc Hello() string { return \"hi\" }\n";
        let a = chunk_content(content, ChunkFamily::Brace, &config());
        let b = chunk_content(content, ChunkFamily::Brace, &config());
        assert_eq!(a, b);
    }

    #[test]
    fn test_offsets_match_content() {
        let content = "first line\n\nthird line here\n";
        let chunks = chunk_content(content, ChunkFamily::Line, &config());
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        let chars: Vec<char> = content.chars().collect();
        let slice: String = chars[chunk.start_offset..chunk.end_offset].iter().collect();
        assert_eq!(slice, chunk.content);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("three word line"), 3);
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
    }
}
