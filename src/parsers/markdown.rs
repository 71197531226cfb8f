use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{DocumentNode, NodeType};
use crate::parsers::{ParsedFile, SourceParser};

static INLINE_CODE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*(?:\(\))?$").unwrap());

/// Markdown chunker: heading-aware segmentation with size bounds.
///
/// Oversized paragraphs split at sentence boundaries with a token overlap
/// between neighbors; undersized neighbors of the same kind merge. Inline
/// code spans that look like identifiers are kept as back-references so
/// the extractor can link prose to code.
pub struct MarkdownParser {
    pub max_chunk_tokens: usize,
    pub min_chunk_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for MarkdownParser {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 300,
            min_chunk_tokens: 30,
            overlap_tokens: 15,
        }
    }
}

#[derive(Debug, Clone)]
struct RawBlock {
    node_type: NodeType,
    level: Option<usize>,
    title: Option<String>,
    start_line: usize,
    end_line: usize,
    content: String,
    parent_heading_line: Option<usize>,
}

impl SourceParser for MarkdownParser {
    fn language(&self) -> &'static str {
        "markdown"
    }

    fn parse(&self, relative_path: &str, source: &str) -> Result<ParsedFile> {
        let blocks = self.segment(source);
        let blocks = self.split_oversized(blocks);
        let blocks = self.merge_undersized(blocks);

        let mut parsed = ParsedFile::default();
        let total = blocks.len();

        // Headings survive split/merge untouched, so their start lines are
        // stable anchors for parent resolution.
        for (chunk_index, block) in blocks.iter().enumerate() {
            let mut node = DocumentNode::new(
                block.node_type,
                relative_path,
                chunk_index,
                block.start_line,
                block.end_line,
                block.content.clone(),
            );
            node.title = block.title.clone();
            node.level = block.level;
            node.total_chunks = total;
            node.metadata.related_code = extract_code_references(&block.content);
            parsed.documents.push(node);
        }

        let heading_ids: std::collections::HashMap<usize, String> = blocks
            .iter()
            .zip(parsed.documents.iter())
            .filter(|(block, _)| block.node_type == NodeType::Heading)
            .map(|(block, node)| (block.start_line, node.id.clone()))
            .collect();
        for (block, node) in blocks.iter().zip(parsed.documents.iter_mut()) {
            if let Some(line) = block.parent_heading_line {
                node.parent_id = heading_ids.get(&line).cloned();
            }
        }

        Ok(parsed)
    }
}

impl MarkdownParser {
    fn segment(&self, source: &str) -> Vec<RawBlock> {
        let lines: Vec<&str> = source.lines().collect();
        let mut blocks: Vec<RawBlock> = Vec::new();
        // (level, heading start line, title)
        let mut heading_stack: Vec<(usize, usize, String)> = Vec::new();

        let mut i = 0usize;
        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();

            if trimmed.is_empty() {
                i += 1;
                continue;
            }

            if let Some(level) = heading_level(trimmed) {
                while let Some(&(depth, _, _)) = heading_stack.last() {
                    if depth >= level {
                        heading_stack.pop();
                    } else {
                        break;
                    }
                }
                let parent_heading_line = heading_stack.last().map(|&(_, line, _)| line);
                let title = trimmed.trim_start_matches('#').trim().to_string();
                blocks.push(RawBlock {
                    node_type: NodeType::Heading,
                    level: Some(level),
                    title: Some(title.clone()),
                    start_line: i + 1,
                    end_line: i + 1,
                    content: trimmed.to_string(),
                    parent_heading_line,
                });
                heading_stack.push((level, i + 1, title));
                i += 1;
                continue;
            }

            if trimmed.starts_with("```") {
                let start = i;
                i += 1;
                while i < lines.len() && !lines[i].trim().starts_with("```") {
                    i += 1;
                }
                let end = i.min(lines.len().saturating_sub(1));
                let content = lines[start..=(end.min(lines.len() - 1))].join("\n");
                blocks.push(RawBlock {
                    node_type: NodeType::CodeBlock,
                    level: None,
                    title: current_title(&heading_stack),
                    start_line: start + 1,
                    end_line: end + 1,
                    content,
                    parent_heading_line: heading_stack.last().map(|&(_, line, _)| line),
                });
                i += 1;
                continue;
            }

            // Paragraph: consecutive non-blank, non-structural lines.
            let start = i;
            while i < lines.len() {
                let t = lines[i].trim();
                if t.is_empty() || heading_level(t).is_some() || t.starts_with("```") {
                    break;
                }
                i += 1;
            }
            let content = lines[start..i].join("\n");
            blocks.push(RawBlock {
                node_type: NodeType::Paragraph,
                level: None,
                title: current_title(&heading_stack),
                start_line: start + 1,
                end_line: i,
                content,
                parent_heading_line: heading_stack.last().map(|&(_, line, _)| line),
            });
        }

        blocks
    }

    fn split_oversized(&self, blocks: Vec<RawBlock>) -> Vec<RawBlock> {
        let mut result = Vec::new();
        for block in blocks {
            if block.node_type != NodeType::Paragraph
                || word_count(&block.content) <= self.max_chunk_tokens
            {
                result.push(block);
                continue;
            }

            let sentences = split_sentences(&block.content);
            let mut current: Vec<String> = Vec::new();
            let mut current_tokens = 0usize;
            let mut pieces: Vec<String> = Vec::new();

            for sentence in sentences {
                let tokens = word_count(&sentence);
                if current_tokens + tokens > self.max_chunk_tokens && !current.is_empty() {
                    pieces.push(current.join(" "));
                    // Carry overlap from the tail of the previous piece.
                    let tail = tail_words(&current.join(" "), self.overlap_tokens);
                    current = if tail.is_empty() { vec![] } else { vec![tail] };
                    current_tokens = word_count(current.first().map(|s| s.as_str()).unwrap_or(""));
                }
                current_tokens += tokens;
                current.push(sentence);
            }
            if !current.is_empty() {
                pieces.push(current.join(" "));
            }

            let total_pieces = pieces.len().max(1);
            let line_span = block.end_line.saturating_sub(block.start_line) + 1;
            for (n, piece) in pieces.into_iter().enumerate() {
                let offset = line_span * n / total_pieces;
                result.push(RawBlock {
                    node_type: NodeType::Paragraph,
                    level: None,
                    title: block.title.clone(),
                    start_line: block.start_line + offset,
                    end_line: block.end_line,
                    content: piece,
                    parent_heading_line: block.parent_heading_line,
                });
            }
        }
        result
    }

    fn merge_undersized(&self, blocks: Vec<RawBlock>) -> Vec<RawBlock> {
        let mut result: Vec<RawBlock> = Vec::new();
        for block in blocks {
            if let Some(last) = result.last_mut() {
                let same_kind = last.node_type == block.node_type
                    && last.node_type == NodeType::Paragraph
                    && last.parent_heading_line == block.parent_heading_line;
                let last_tokens = word_count(&last.content);
                let combined = last_tokens + word_count(&block.content);
                if same_kind && last_tokens < self.min_chunk_tokens && combined <= self.max_chunk_tokens
                {
                    last.content.push_str("\n\n");
                    last.content.push_str(&block.content);
                    last.end_line = block.end_line;
                    continue;
                }
            }
            result.push(block);
        }
        result
    }
}

fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes >= 1 && hashes <= 6 && line.chars().nth(hashes).map(|c| c == ' ').unwrap_or(false) {
        Some(hashes)
    } else {
        None
    }
}

fn current_title(heading_stack: &[(usize, usize, String)]) -> Option<String> {
    heading_stack.last().map(|(_, _, title)| title.clone())
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn tail_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= n {
        return text.to_string();
    }
    words[words.len() - n..].join(" ")
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            sentences.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Inline code spans that look like identifiers become back-references.
fn extract_code_references(content: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for caps in INLINE_CODE_PATTERN.captures_iter(content) {
        let span = caps.get(1).unwrap().as_str().trim();
        if IDENTIFIER_PATTERN.is_match(span) {
            let name = span.trim_end_matches("()").to_string();
            if !refs.contains(&name) {
                refs.push(name);
            }
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# Order Flow

The order pipeline moves a cart through checkout, payment and fulfilment.
Orders are handled by `OrderService.processOrder()` and settled via the
`PaymentGateway`.

## Payment

Payments retry three times before giving up.

```java
Receipt r = orders.processOrder(order);
```

## Fulfilment

Shipping labels are produced asynchronously.
"#;

    fn parse() -> ParsedFile {
        MarkdownParser::default()
            .parse("docs/business/order-flow.md", SAMPLE)
            .unwrap()
    }

    #[test]
    fn produces_heading_paragraph_and_code_nodes() {
        let parsed = parse();
        let kinds: Vec<NodeType> = parsed.documents.iter().map(|d| d.node_type).collect();
        assert!(kinds.contains(&NodeType::Heading));
        assert!(kinds.contains(&NodeType::Paragraph));
        assert!(kinds.contains(&NodeType::CodeBlock));
        assert!(parsed.objects.is_empty());
    }

    #[test]
    fn headings_carry_levels_and_titles() {
        let parsed = parse();
        let top = parsed
            .documents
            .iter()
            .find(|d| d.title.as_deref() == Some("Order Flow"))
            .expect("top heading");
        assert_eq!(top.level, Some(1));
        assert_eq!(top.node_type, NodeType::Heading);

        let payment = parsed
            .documents
            .iter()
            .find(|d| d.title.as_deref() == Some("Payment") && d.node_type == NodeType::Heading)
            .expect("payment heading");
        assert_eq!(payment.level, Some(2));
        // Nested under the top-level heading.
        assert_eq!(payment.parent_id.as_deref(), Some(top.id.as_str()));
    }

    #[test]
    fn paragraphs_link_to_their_section() {
        let parsed = parse();
        let payment_heading = parsed
            .documents
            .iter()
            .find(|d| d.title.as_deref() == Some("Payment") && d.node_type == NodeType::Heading)
            .unwrap();
        let retry_para = parsed
            .documents
            .iter()
            .find(|d| d.content.contains("retry three times"))
            .unwrap();
        assert_eq!(retry_para.parent_id.as_deref(), Some(payment_heading.id.as_str()));
        assert_eq!(retry_para.title.as_deref(), Some("Payment"));
    }

    #[test]
    fn inline_code_becomes_related_code() {
        let parsed = parse();
        let intro = parsed
            .documents
            .iter()
            .find(|d| d.content.contains("order pipeline"))
            .unwrap();
        assert!(intro
            .metadata
            .related_code
            .contains(&"OrderService.processOrder".to_string()));
        assert!(intro.metadata.related_code.contains(&"PaymentGateway".to_string()));
    }

    #[test]
    fn line_numbers_are_stamped() {
        let parsed = parse();
        let top = parsed
            .documents
            .iter()
            .find(|d| d.title.as_deref() == Some("Order Flow"))
            .unwrap();
        assert_eq!(top.start_line, 1);

        let code = parsed
            .documents
            .iter()
            .find(|d| d.node_type == NodeType::CodeBlock)
            .unwrap();
        assert!(code.content.contains("processOrder"));
        assert!(code.start_line < code.end_line);
    }

    #[test]
    fn chunk_indices_are_sequential_and_ids_stable() {
        let first = parse();
        let second = parse();
        for (i, node) in first.documents.iter().enumerate() {
            assert_eq!(node.chunk_index, i);
            assert_eq!(node.total_chunks, first.documents.len());
        }
        let ids = |p: &ParsedFile| -> Vec<String> {
            p.documents.iter().map(|d| d.id.clone()).collect()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn oversized_paragraphs_split_with_overlap() {
        let long: String = (0..120)
            .map(|i| format!("Sentence number {i} talks about shipping costs. "))
            .collect();
        let source = format!("# Guide\n\n{long}\n");
        let parser = MarkdownParser {
            max_chunk_tokens: 100,
            min_chunk_tokens: 10,
            overlap_tokens: 5,
        };
        let parsed = parser.parse("docs/guide.md", &source).unwrap();
        let paragraphs: Vec<_> = parsed
            .documents
            .iter()
            .filter(|d| d.node_type == NodeType::Paragraph)
            .collect();
        assert!(paragraphs.len() > 1, "expected split, got {}", paragraphs.len());
        for p in &paragraphs {
            assert!(word_count(&p.content) <= 100 + 5 + 10);
        }
        // Overlap: the tail of one chunk reappears at the head of the next.
        let first_words: Vec<&str> = paragraphs[0].content.split_whitespace().collect();
        let tail = first_words[first_words.len() - 3..].join(" ");
        assert!(paragraphs[1].content.contains(&tail));
    }

    #[test]
    fn undersized_neighbors_merge() {
        let source = "# H\n\nShort one.\n\nShort two.\n\nShort three.\n";
        let parsed = MarkdownParser::default().parse("docs/h.md", source).unwrap();
        let paragraphs = parsed
            .documents
            .iter()
            .filter(|d| d.node_type == NodeType::Paragraph)
            .count();
        assert_eq!(paragraphs, 1, "small paragraphs under one heading should merge");
    }

    #[test]
    fn empty_document_yields_no_nodes() {
        let parsed = MarkdownParser::default().parse("docs/empty.md", "").unwrap();
        assert!(parsed.documents.is_empty());
    }
}
