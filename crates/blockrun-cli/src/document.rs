//! Fenced code block extraction from Markdown documents.

/// One fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// First word of the info string, e.g. `python` in ```` ```python title ````.
    pub tag: String,
    /// Block body, with a trailing newline per line.
    pub code: String,
    /// 1-based line of the opening fence.
    pub line: usize,
}

struct OpenFence {
    marker: char,
    len: usize,
    indent: usize,
    tag: String,
    line: usize,
    code: String,
}

/// Parse an opening fence: up to three spaces, then three or more backticks
/// or tildes, then the info string.
fn opening_fence(line: &str) -> Option<(char, usize, usize, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((marker, len, indent, info))
}

fn is_closing_fence(line: &str, fence: &OpenFence) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return false;
    }
    let len = trimmed.chars().take_while(|c| *c == fence.marker).count();
    len >= fence.len && trimmed[len..].trim().is_empty()
}

/// Extract every fenced code block, in document order.
///
/// Blocks without an info string are kept with an empty tag. An unclosed
/// fence runs to the end of the document.
pub fn extract_blocks(source: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;

    for (index, line) in source.lines().enumerate() {
        match open.as_mut() {
            Some(fence) => {
                if is_closing_fence(line, fence) {
                    if let Some(fence) = open.take() {
                        blocks.push(CodeBlock {
                            tag: fence.tag,
                            code: fence.code,
                            line: fence.line,
                        });
                    }
                } else {
                    // Content is dedented by at most the fence's own indent.
                    let strip = line.len() - line.trim_start_matches(' ').len();
                    fence.code.push_str(&line[strip.min(fence.indent)..]);
                    fence.code.push('\n');
                }
            }
            None => {
                if let Some((marker, len, indent, info)) = opening_fence(line) {
                    open = Some(OpenFence {
                        marker,
                        len,
                        indent,
                        tag: info.split_whitespace().next().unwrap_or_default().to_string(),
                        line: index + 1,
                        code: String::new(),
                    });
                }
            }
        }
    }

    if let Some(fence) = open {
        blocks.push(CodeBlock {
            tag: fence.tag,
            code: fence.code,
            line: fence.line,
        });
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_blocks_in_order() {
        let source = "# Title\n\n```python\nprint(1)\n```\n\ntext\n\n~~~sh extra words\necho hi\n~~~\n";
        let blocks = extract_blocks(source);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].tag, "python");
        assert_eq!(blocks[0].code, "print(1)\n");
        assert_eq!(blocks[0].line, 3);
        assert_eq!(blocks[1].tag, "sh");
        assert_eq!(blocks[1].code, "echo hi\n");
        assert_eq!(blocks[1].line, 9);
    }

    #[test]
    fn test_longer_fence_contains_shorter_one() {
        let source = "````md\n```js\nx\n```\n````\n";
        let blocks = extract_blocks(source);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag, "md");
        assert_eq!(blocks[0].code, "```js\nx\n```\n");
    }

    #[test]
    fn test_indented_fence_dedents_content() {
        let source = "  ```sh\n  echo a\n    echo b\n  ```\n";
        let blocks = extract_blocks(source);
        assert_eq!(blocks[0].code, "echo a\n  echo b\n");
    }

    #[test]
    fn test_untagged_and_unclosed_blocks() {
        let source = "```\nplain\n```\n```sh\necho unterminated\n";
        let blocks = extract_blocks(source);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].tag, "");
        assert_eq!(blocks[1].code, "echo unterminated\n");
    }

    #[test]
    fn test_inline_backticks_are_not_fences() {
        assert!(extract_blocks("Use ``` `code` ``` inline.\n").is_empty());
        assert!(extract_blocks("``not a fence``\n").is_empty());
    }
}
