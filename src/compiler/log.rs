//! 编译日志精简：从 xelatex / bibtex 完整日志中提取错误摘要
//!
//! 交给修复子 Agent 的是这里的输出而不是完整日志，通常只有几十行。

use std::sync::OnceLock;

use regex::Regex;

/// `!` 错误行之后最多收集的上下文行数
const ERROR_CONTEXT_LINES: usize = 5;
/// 什么都没匹配到时退回的日志尾部行数
const FALLBACK_TAIL_LINES: usize = 30;

const FATAL_MARKERS: [&str; 3] = ["Emergency stop", "Fatal error", "No pages of output"];

static LINE_MARKER_RE: OnceLock<Option<Regex>> = OnceLock::new();
static FILE_LOCATOR_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// `l.123 ...` 行号指示
fn is_line_marker(line: &str) -> bool {
    LINE_MARKER_RE
        .get_or_init(|| Regex::new(r"^l\.\d+").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(line))
}

/// `./chapters/01_intro.tex:42: ...` 文件定位
fn is_file_locator(line: &str) -> bool {
    FILE_LOCATOR_RE
        .get_or_init(|| Regex::new(r"^\./.+\.[A-Za-z0-9]+:\d+:").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(line))
}

fn is_single_line_error(line: &str) -> bool {
    line.to_lowercase().contains("error message")
        || line.starts_with("Warning--")
        || FATAL_MARKERS.iter().any(|m| line.contains(m))
        || is_file_locator(line)
}

/// 提取错误摘要；各错误块之间空一行，没有任何匹配时返回最后 30 行
pub fn extract_errors(log: &str) -> String {
    if log.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = log.lines().collect();
    let mut blocks: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with('!') {
            let mut block = vec![line];
            for ctx in lines.iter().skip(i + 1).take(ERROR_CONTEXT_LINES) {
                block.push(ctx);
                if is_line_marker(ctx) {
                    break;
                }
            }
            i += block.len();
            blocks.push(block.join("\n"));
            continue;
        }

        if is_single_line_error(line) {
            blocks.push(line.to_string());
        }
        i += 1;
    }

    if blocks.is_empty() {
        let start = lines.len().saturating_sub(FALLBACK_TAIL_LINES);
        return lines[start..].join("\n");
    }
    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bang_block_stops_at_line_marker() {
        let log = "This is XeTeX\n\
                   ! Undefined control sequence.\n\
                   <recently read> \\foo\n\
                   l.12 \\foo\n\
                   after marker\n\
                   Output written";
        assert_eq!(
            extract_errors(log),
            "! Undefined control sequence.\n<recently read> \\foo\nl.12 \\foo"
        );
    }

    #[test]
    fn test_bang_block_takes_at_most_five_context_lines() {
        let log = "! Boom\na\nb\nc\nd\ne\nf\ng";
        assert_eq!(extract_errors(log), "! Boom\na\nb\nc\nd\ne");
    }

    #[test]
    fn test_single_line_matches_joined_with_blank_line() {
        let log = "noise\n\
                   I found no \\bibdata command---while reading file main.aux (There was 1 Error Message)\n\
                   Warning--empty journal in ref1\n\
                   ./chapters/01_intro.tex:42: Missing $ inserted.\n\
                   No pages of output.\n\
                   ! Emergency stop.";
        let out = extract_errors(log);
        let blocks: Vec<&str> = out.split("\n\n").collect();
        assert_eq!(blocks.len(), 5);
        assert!(blocks[0].contains("Error Message"));
        assert_eq!(blocks[1], "Warning--empty journal in ref1");
        assert_eq!(blocks[2], "./chapters/01_intro.tex:42: Missing $ inserted.");
        assert_eq!(blocks[3], "No pages of output.");
        assert_eq!(blocks[4], "! Emergency stop.");
    }

    #[test]
    fn test_fallback_to_last_thirty_lines() {
        let log = (1..=40).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let out = extract_errors(&log);
        assert_eq!(out.lines().count(), 30);
        assert!(out.starts_with("line 11"));
        assert!(out.ends_with("line 40"));
    }

    #[test]
    fn test_empty_log() {
        assert_eq!(extract_errors(""), "");
    }
}
