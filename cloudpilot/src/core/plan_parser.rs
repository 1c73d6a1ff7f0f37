//! Turn a free-form planning reply into an ordered list of step descriptions.
//!
//! Three tiers, first non-empty wins:
//! 1. numbered items (`1. text`), each running to the next newline-led item;
//! 2. non-blank lines;
//! 3. the whole trimmed reply as a single step.
//!
//! Item markers only count at the start of a line: `"Plan: 1. Check config"`
//! is one plain line, not a numbered item.

/// Which tier produced the steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Numbered,
    Lines,
    Whole,
    /// Reply was blank; no steps.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanParse {
    pub steps: Vec<String>,
    pub strategy: ParseStrategy,
}

pub fn parse_plan(text: &str) -> PlanParse {
    let numbered = numbered_items(text);
    if !numbered.is_empty() {
        return PlanParse {
            steps: numbered,
            strategy: ParseStrategy::Numbered,
        };
    }

    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    // A single non-blank line is the whole reply; report it as such.
    if lines.len() > 1 {
        return PlanParse {
            steps: lines,
            strategy: ParseStrategy::Lines,
        };
    }

    let whole = text.trim();
    if whole.is_empty() {
        return PlanParse {
            steps: Vec::new(),
            strategy: ParseStrategy::Empty,
        };
    }
    PlanParse {
        steps: vec![whole.to_string()],
        strategy: ParseStrategy::Whole,
    }
}

/// Collect `N. text` items. An item ends where a line starting with another
/// `N.` marker begins, so wrapped lines stay with their item.
fn numbered_items(text: &str) -> Vec<String> {
    let starts = item_starts(text);
    let mut items = Vec::new();
    for (idx, &(_, body_start)) in starts.iter().enumerate() {
        let end = starts
            .get(idx + 1)
            .map_or(text.len(), |&(next_marker, _)| next_marker);
        let body = text[body_start..end].trim();
        if !body.is_empty() {
            items.push(collapse_lines(body));
        }
    }
    items
}

/// Byte offsets `(marker_start, body_start)` for every line-leading `digits.`
/// marker.
fn item_starts(text: &str) -> Vec<(usize, usize)> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        let rest = &line[indent..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && rest[digits..].starts_with('.') {
            let marker_start = offset + indent;
            starts.push((marker_start, marker_start + digits + 1));
        }
        offset += line.len();
    }
    starts
}

fn collapse_lines(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_items_are_extracted_in_order() {
        let parse = parse_plan("1. A\n2. B\n3. C");
        assert_eq!(parse.steps, vec!["A", "B", "C"]);
        assert_eq!(parse.strategy, ParseStrategy::Numbered);
    }

    #[test]
    fn preamble_is_ignored_and_wrapped_lines_join() {
        let text = "Here is the plan:\n\n1. List buckets\n   with gsutil\n2. Report sizes\n";
        let parse = parse_plan(text);
        assert_eq!(parse.steps, vec!["List buckets with gsutil", "Report sizes"]);
    }

    #[test]
    fn numbers_inside_a_step_do_not_split_it() {
        let parse = parse_plan("1. Resize to 2.5 GB\n2. Check version 1.2");
        assert_eq!(parse.steps, vec!["Resize to 2.5 GB", "Check version 1.2"]);
    }

    #[test]
    fn empty_numbered_items_are_dropped() {
        let parse = parse_plan("1. \n2. Real step");
        assert_eq!(parse.steps, vec!["Real step"]);
    }

    #[test]
    fn falls_back_to_non_blank_lines() {
        let parse = parse_plan("List instances\n\nStop the idle ones\n");
        assert_eq!(parse.steps, vec!["List instances", "Stop the idle ones"]);
        assert_eq!(parse.strategy, ParseStrategy::Lines);
    }

    #[test]
    fn single_line_is_whole_reply() {
        let parse = parse_plan("  Run gsutil ls  ");
        assert_eq!(parse.steps, vec!["Run gsutil ls"]);
        assert_eq!(parse.strategy, ParseStrategy::Whole);
    }

    #[test]
    fn inline_marker_is_not_a_numbered_item() {
        let parse = parse_plan("Plan: 1. Check config");
        assert_eq!(parse.steps, vec!["Plan: 1. Check config"]);
        assert_eq!(parse.strategy, ParseStrategy::Whole);
    }

    #[test]
    fn blank_reply_has_no_steps() {
        let parse = parse_plan(" \n\t\n");
        assert!(parse.steps.is_empty());
        assert_eq!(parse.strategy, ParseStrategy::Empty);
    }
}
