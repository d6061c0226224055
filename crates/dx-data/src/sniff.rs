//! Source format classification from a small header peek

use std::io::Read;
use std::path::Path;

use dx_core::types::FileFormat;

use crate::DataError;

/// Bytes peeked from the head of the file.
pub const SNIFF_BYTES: usize = 4096;

/// Candidate CSV delimiters, in tie-break order.
const DELIMITERS: [char; 4] = [',', ';', '\t', '|'];

/// Sniffer verdict: the format, and the delimiter for CSV sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffResult {
    pub format: FileFormat,
    pub delimiter: Option<char>,
}

/// Classify a file by extension and a peek at its first bytes.
pub fn sniff_path(path: &Path) -> Result<SniffResult, DataError> {
    let mut head = vec![0u8; SNIFF_BYTES];
    let mut file = std::fs::File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    Ok(sniff(&extension, &head))
}

/// Classify from the lowercased extension and up to 4096 header bytes.
pub fn sniff(extension: &str, head: &[u8]) -> SniffResult {
    match extension {
        "vcf" => SniffResult {
            format: FileFormat::Vcf,
            delimiter: None,
        },
        "json" => {
            let first = head.iter().copied().find(|b| !b.is_ascii_whitespace());
            let format = if first == Some(b'[') {
                FileFormat::JsonArray
            } else {
                FileFormat::Ndjson
            };
            SniffResult {
                format,
                delimiter: None,
            }
        }
        _ => SniffResult {
            format: FileFormat::Csv,
            delimiter: Some(detect_delimiter(head)),
        },
    }
}

/// Pick the delimiter with the highest count in the first logical line.
/// Ties break in declaration order; all-zero counts default to a comma.
fn detect_delimiter(head: &[u8]) -> char {
    let line_end = head
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(head.len());
    let line = &head[..line_end];

    let mut best = ',';
    let mut best_count = 0usize;
    for candidate in DELIMITERS {
        let count = line.iter().filter(|&&b| b == candidate as u8).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vcf_by_extension() {
        let result = sniff("vcf", b"BEGIN:VCARD\n");
        assert_eq!(result.format, FileFormat::Vcf);
        assert_eq!(result.delimiter, None);
    }

    #[test]
    fn test_json_array_vs_ndjson() {
        assert_eq!(sniff("json", b"  [ {\"a\":1} ]").format, FileFormat::JsonArray);
        assert_eq!(sniff("json", b"{\"a\":1}\n{\"a\":2}\n").format, FileFormat::Ndjson);
        // Empty file defaults to ndjson
        assert_eq!(sniff("json", b"").format, FileFormat::Ndjson);
    }

    #[test]
    fn test_csv_delimiter_vote() {
        assert_eq!(sniff("csv", b"a,b,c\n1,2,3\n").delimiter, Some(','));
        assert_eq!(sniff("csv", b"a;b;c\n").delimiter, Some(';'));
        assert_eq!(sniff("csv", b"a\tb\tc\n").delimiter, Some('\t'));
        assert_eq!(sniff("csv", b"a|b|c\n").delimiter, Some('|'));
        // Only the first logical line votes
        assert_eq!(sniff("csv", b"a,b\nx;y;z;w;q\n").delimiter, Some(','));
    }

    #[test]
    fn test_csv_delimiter_ties_and_default() {
        // One comma, one semicolon: comma wins by listed order
        assert_eq!(sniff("csv", b"a,b;c\n").delimiter, Some(','));
        // No delimiter at all defaults to comma
        assert_eq!(sniff("csv", b"singlecolumn\n").delimiter, Some(','));
    }

    #[test]
    fn test_unknown_extension_is_csv() {
        assert_eq!(sniff("txt", b"a|b|c\n").format, FileFormat::Csv);
    }
}
