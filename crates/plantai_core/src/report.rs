//! crates/plantai_core/src/report.rs
//!
//! Light formatting for the model's diagnostic text. The text is treated as
//! opaque: no schema is checked, lines are only classified for display.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Footer shown under every diagnosis.
pub const AI_DISCLAIMER: &str = "* Este diagnóstico é gerado por Inteligência Artificial. Consulte sempre um profissional agrônomo para casos críticos.";

const MAX_HEADING_LEN: usize = 50;

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Span {
    Text(String),
    Strong(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Section titles such as "Planta identificada:".
    Heading { text: String },
    Item { spans: Vec<Span> },
    Paragraph { spans: Vec<Span> },
    Spacer,
}

/// Splits `**bold**` runs out of a line.
fn spans(line: &str) -> Vec<Span> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in BOLD.captures_iter(line) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            out.push(Span::Text(line[last..whole.start()].to_string()));
        }
        out.push(Span::Strong(inner.as_str().to_string()));
        last = whole.end();
    }
    if last < line.len() {
        out.push(Span::Text(line[last..].to_string()));
    }
    out
}

/// Classifies each line of `text`.
pub fn render_blocks(text: &str) -> Vec<Block> {
    text.lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.ends_with(':') && line.chars().count() < MAX_HEADING_LEN {
                Block::Heading {
                    text: line.to_string(),
                }
            } else if trimmed.starts_with("- ") {
                Block::Item {
                    spans: spans(&line.replacen("- ", "", 1)),
                }
            } else if trimmed.is_empty() {
                Block::Spacer
            } else {
                Block::Paragraph { spans: spans(line) }
            }
        })
        .collect()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn spans_html(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Span::Text(t) => escape(t),
            Span::Strong(t) => format!("<strong>{}</strong>", escape(t)),
        })
        .collect()
}

/// HTML fragment for the blocks. All model text is escaped.
pub fn to_html(blocks: &[Block]) -> String {
    let mut html = String::new();
    let mut in_list = false;
    for block in blocks {
        let is_item = matches!(block, Block::Item { .. });
        if in_list && !is_item {
            html.push_str("</ul>\n");
            in_list = false;
        }
        match block {
            Block::Heading { text } => html.push_str(&format!("<h3>{}</h3>\n", escape(text))),
            Block::Item { spans } => {
                if !in_list {
                    html.push_str("<ul>\n");
                    in_list = true;
                }
                html.push_str(&format!("<li>{}</li>\n", spans_html(spans)));
            }
            Block::Paragraph { spans } => html.push_str(&format!("<p>{}</p>\n", spans_html(spans))),
            Block::Spacer => html.push_str("<br>\n"),
        }
    }
    if in_list {
        html.push_str("</ul>\n");
    }
    html
}
