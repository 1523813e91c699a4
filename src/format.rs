//! Assistant replies follow a light convention: `N. **Heading**: body` list
//! items and `**bold**` spans. This turns a reply into display blocks.

use std::sync::LazyLock;

use regex::Regex;

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.\s+\*\*(.+?)\*\*:\s*(.+)$").expect("valid regex"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Plain(String),
    Bold(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    NumberedItem { number: u32, heading: String, body: String },
    Paragraph(Vec<Span>),
    Blank,
}

pub fn parse_reply(text: &str) -> Vec<Block> {
    text.split('\n').map(parse_line).collect()
}

fn parse_line(line: &str) -> Block {
    if let Some(caps) = NUMBERED_ITEM.captures(line) {
        if let Ok(number) = caps[1].parse() {
            return Block::NumberedItem {
                number,
                heading: caps[2].to_string(),
                body: caps[3].to_string(),
            };
        }
    }
    if line.contains("**") {
        return Block::Paragraph(split_bold(line));
    }
    if line.trim().is_empty() {
        return Block::Blank;
    }
    Block::Paragraph(vec![Span::Plain(line.to_string())])
}

fn split_bold(line: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut last = 0;
    for caps in BOLD.captures_iter(line) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        if whole.start > last {
            spans.push(Span::Plain(line[last..whole.start].to_string()));
        }
        spans.push(Span::Bold(caps[1].to_string()));
        last = whole.end;
    }
    if last < line.len() {
        spans.push(Span::Plain(line[last..].to_string()));
    }
    spans
}

/// Terminal rendering; bold spans use ANSI bold when `ansi` is set.
pub fn render_plain(blocks: &[Block], ansi: bool) -> String {
    let bold = |s: &str| if ansi { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() };
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::NumberedItem { number, heading, body } => {
                out.push_str(&format!("  {number}. {}: {body}\n", bold(heading)));
            }
            Block::Paragraph(spans) => {
                for span in spans {
                    match span {
                        Span::Plain(s) => out.push_str(s),
                        Span::Bold(s) => out.push_str(&bold(s)),
                    }
                }
                out.push('\n');
            }
            Block::Blank => out.push('\n'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_numbered_bold_heading_items() {
        let blocks = parse_reply("1. **Sleep Training**: Start with a routine.\n2. **Feeding**: Offer water");
        assert_eq!(
            blocks[0],
            Block::NumberedItem {
                number: 1,
                heading: "Sleep Training".into(),
                body: "Start with a routine.".into()
            }
        );
        assert!(matches!(&blocks[1], Block::NumberedItem { number: 2, heading, .. } if heading == "Feeding"));
    }

    #[test]
    fn splits_bold_spans_inside_paragraphs() {
        let blocks = parse_reply("Keep **calm** and **consistent** always");
        assert_eq!(
            blocks,
            vec![Block::Paragraph(vec![
                Span::Plain("Keep ".into()),
                Span::Bold("calm".into()),
                Span::Plain(" and ".into()),
                Span::Bold("consistent".into()),
                Span::Plain(" always".into()),
            ])]
        );
    }

    #[test]
    fn blank_and_plain_lines() {
        let blocks = parse_reply("Hello there\n   \n1. Not bold: still plain");
        assert_eq!(blocks[0], Block::Paragraph(vec![Span::Plain("Hello there".into())]));
        assert_eq!(blocks[1], Block::Blank);
        assert_eq!(blocks[2], Block::Paragraph(vec![Span::Plain("1. Not bold: still plain".into())]));
    }

    #[test]
    fn renders_without_ansi() {
        let text = render_plain(&parse_reply("1. **Naps**: two a day\n\nSee **notes**"), false);
        assert_eq!(text, "  1. Naps: two a day\n\nSee notes\n");
    }
}
