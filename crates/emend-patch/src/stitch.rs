//! Content stitching.
//!
//! A pure transformation from original content plus an ordered set of
//! line splices to final content. Spans are applied highest-first so
//! the line numbers of not-yet-applied splices stay valid, and all
//! inserted text is normalized to the file's dominant line-ending
//! style. Nothing here touches the filesystem.

/// Line-ending style of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Detect the dominant line-ending style by counting occurrences.
///
/// Ties (including content without any newline) fall back to LF.
pub fn dominant_line_ending(content: &str) -> LineEnding {
    let crlf = content.matches("\r\n").count();
    let bare_lf = content.matches('\n').count() - crlf;

    if crlf > bare_lf {
        LineEnding::CrLf
    } else {
        LineEnding::Lf
    }
}

/// One resolved line splice: replace `[start_line, end_line]` with
/// `new_content`. `end_line < start_line` inserts before `start_line`;
/// empty `new_content` deletes the span.
#[derive(Debug, Clone)]
pub struct Splice {
    pub start_line: usize,
    pub end_line: usize,
    pub new_content: String,
}

/// Apply splices to the original content.
///
/// Splices are applied in descending `start_line` order regardless of
/// their order in the slice. At the same anchor line a replacement is
/// applied before an insertion (the replacement's span indices refer
/// to the original buffer), and two insertions keep their slice order
/// in the output. The original's trailing-newline presence is
/// preserved.
pub fn stitch(original: &str, splices: &[Splice]) -> String {
    let ending = dominant_line_ending(original);
    let had_trailing_newline = original.ends_with('\n');

    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

    let mut order: Vec<usize> = (0..splices.len()).collect();
    order.sort_by(|&a, &b| {
        let sa = &splices[a];
        let sb = &splices[b];
        sb.start_line
            .cmp(&sa.start_line)
            .then_with(|| {
                let a_insertion = sa.end_line < sa.start_line;
                let b_insertion = sb.end_line < sb.start_line;
                a_insertion.cmp(&b_insertion)
            })
            .then(b.cmp(&a))
    });

    for &i in &order {
        let splice = &splices[i];

        let new_lines: Vec<String> = if splice.new_content.is_empty() {
            Vec::new()
        } else {
            splice.new_content.lines().map(str::to_string).collect()
        };

        let start = splice.start_line.saturating_sub(1).min(lines.len());
        let end = if splice.end_line < splice.start_line {
            start
        } else {
            splice.end_line.min(lines.len()).max(start)
        };

        lines.splice(start..end, new_lines);
    }

    let mut result = lines.join(ending.as_str());
    if had_trailing_newline && !result.is_empty() {
        result.push_str(ending.as_str());
    }
    result
}
