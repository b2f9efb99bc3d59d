use csv::{ReaderBuilder, Trim};

use crate::error::{TransferError, TransferResult};

/// 候选分隔符，按优先级排列
const DELIMITERS: [u8; 6] = [b',', b'\t', b';', b'|', b':', b' '];
const QUOTES: [u8; 2] = [b'"', b'\''];

/// 从样本推断出的 CSV 格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: Option<u8>,
    pub escape: Option<u8>,
    pub double_quote: bool,
    pub skip_initial_space: bool,
}

impl Dialect {
    /// 按该格式读取的 Reader 配置，表头由调用方自行处理
    pub fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .double_quote(self.double_quote)
            .escape(self.escape);
        match self.quote {
            Some(quote) => builder.quote(quote),
            None => builder.quoting(false),
        };
        if self.skip_initial_space {
            builder.trim(Trim::Fields);
        }
        builder
    }
}

#[derive(Debug, Default)]
struct QuoteScan {
    fields: usize,
    votes: Vec<u8>,
    doubled: bool,
    escaped: bool,
}

/// 扫描被引号包裹的字段，记录闭合引号后紧跟的字符
fn scan_quoted(
    line: &[u8],
    quote: u8,
) -> QuoteScan {
    let mut scan = QuoteScan::default();
    let mut i = 0;
    while i < line.len() {
        let opens = line[i] == quote && (i == 0 || !line[i - 1].is_ascii_alphanumeric() && line[i - 1] != quote);
        if !opens {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        let mut closed = None;
        let mut doubled = false;
        let mut escaped = false;
        while j < line.len() {
            match line[j] {
                b'\\' if line.get(j + 1) == Some(&quote) => {
                    escaped = true;
                    j += 2;
                }
                ch if ch == quote && line.get(j + 1) == Some(&quote) => {
                    doubled = true;
                    j += 2;
                }
                ch if ch == quote => {
                    closed = Some(j);
                    break;
                }
                _ => j += 1,
            }
        }
        let Some(end) = closed else {
            break;
        };

        match line.get(end + 1) {
            None | Some(b'\r') | Some(b'\n') => scan.fields += 1,
            Some(next) if !next.is_ascii_alphanumeric() && *next != quote => {
                scan.fields += 1;
                scan.votes.push(*next);
            }
            _ => {
                i = end + 1;
                continue;
            }
        }
        scan.doubled |= doubled;
        scan.escaped |= escaped;
        i = end + 1;
    }
    scan
}

/// 统计引号外各候选分隔符出现的次数
fn count_outside_quotes(
    line: &[u8],
    quote: Option<u8>,
) -> [usize; DELIMITERS.len()] {
    let mut counts = [0; DELIMITERS.len()];
    let mut in_quote = false;
    for (idx, &ch) in line.iter().enumerate() {
        if Some(ch) == quote && (idx == 0 || line[idx - 1] != b'\\') {
            in_quote = !in_quote;
            continue;
        }
        if in_quote {
            continue;
        }
        if let Some(pos) = DELIMITERS.iter().position(|d| *d == ch) {
            counts[pos] += 1;
        }
    }
    counts
}

fn most_voted(votes: &[u8]) -> Option<u8> {
    let mut best: Option<(u8, usize)> = None;
    for &vote in votes {
        let count = votes.iter().filter(|v| **v == vote).count();
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((vote, count));
        }
    }
    best.map(|(vote, _)| vote)
}

/// 从首行样本推断分隔符、引号与转义方式
pub fn sniff(sample: &str) -> TransferResult<Dialect> {
    let line = sample.trim_end_matches(['\r', '\n']).as_bytes();
    if line.is_empty() {
        return Err(TransferError::DialectDetection("样本为空".into()));
    }

    let (quote, scan) = QUOTES
        .iter()
        .map(|q| (*q, scan_quoted(line, *q)))
        .fold(None::<(u8, QuoteScan)>, |best, (q, scan)| match best {
            Some(best) if best.1.fields >= scan.fields => Some(best),
            _ => Some((q, scan)),
        })
        .filter(|(_, scan)| scan.fields > 0)
        .map(|(q, scan)| (Some(q), scan))
        .unwrap_or((None, QuoteScan::default()));

    // 闭合引号后的字符最能说明分隔符
    let delimiter = match most_voted(&scan.votes) {
        Some(delimiter) => delimiter,
        None => {
            let counts = count_outside_quotes(line, quote);
            let space = DELIMITERS.len() - 1;
            // 空格常见于普通文本，仅在没有其他候选时使用
            let best = (0..space)
                .filter(|idx| counts[*idx] > 0)
                .fold(None::<usize>, |best, idx| match best {
                    Some(b) if counts[b] >= counts[idx] => Some(b),
                    _ => Some(idx),
                })
                .or_else(|| (counts[space] > 0).then_some(space));
            match best {
                Some(idx) => DELIMITERS[idx],
                None => return Err(TransferError::DialectDetection("无法确定分隔符".into())),
            }
        }
    };

    let skip_initial_space = delimiter != b' ' && {
        let positions = line
            .iter()
            .enumerate()
            .filter(|(_, ch)| **ch == delimiter)
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        !positions.is_empty() && positions.iter().all(|idx| line.get(idx + 1) == Some(&b' '))
    };

    Ok(Dialect {
        delimiter,
        quote: quote.or(Some(b'"')),
        escape: scan.escaped.then_some(b'\\'),
        double_quote: scan.doubled || !scan.escaped,
        skip_initial_space,
    })
}

/// 只看首行判断是否为表头
///
/// 任一字段为数字时视为数据行，其余情况按表头处理。
pub fn has_header(first: &[String]) -> bool {
    !first.is_empty() && !first.iter().any(|field| field.trim().parse::<f64>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn sniff_plain_delimiters() {
        assert_eq!(sniff("id;name;city\n").unwrap().delimiter, b';');
        assert_eq!(sniff("id,name").unwrap().delimiter, b',');
        assert_eq!(sniff("id\tname\tcity").unwrap().delimiter, b'\t');
        assert_eq!(sniff("a|b|c").unwrap().delimiter, b'|');
        assert_eq!(sniff("first name;last name").unwrap().delimiter, b';');
        assert_eq!(sniff("a;b;c,d").unwrap().delimiter, b';');
        assert_eq!(sniff("first last").unwrap().delimiter, b' ');
    }

    #[test]
    fn sniff_prefers_delimiter_after_quotes() {
        let dialect = sniff(r#""name";"note, with comma";"city""#).unwrap();
        assert_eq!(dialect.delimiter, b';');
        assert_eq!(dialect.quote, Some(b'"'));
        assert!(dialect.double_quote);
        assert_eq!(dialect.escape, None);
    }

    #[test]
    fn sniff_detects_single_quote_and_escape() {
        let dialect = sniff(r"'it\'s'|'ok'").unwrap();
        assert_eq!(dialect.quote, Some(b'\''));
        assert_eq!(dialect.delimiter, b'|');
        assert_eq!(dialect.escape, Some(b'\\'));
    }

    #[test]
    fn sniff_skip_initial_space() {
        let dialect = sniff("a, b, c").unwrap();
        assert_eq!(dialect.delimiter, b',');
        assert!(dialect.skip_initial_space);
    }

    #[test]
    fn sniff_fails_without_delimiter() {
        assert!(matches!(sniff("single"), Err(TransferError::DialectDetection(_))));
        assert!(matches!(sniff("\n"), Err(TransferError::DialectDetection(_))));
    }

    #[test]
    fn header_detection_uses_first_line() {
        assert!(has_header(&row(&["name", "city"])));
        assert!(has_header(&row(&["Anna", "Rome"])));
        assert!(has_header(&row(&["only"])));
        assert!(has_header(&row(&["id", ""])));
        assert!(!has_header(&row(&["1", "Rome"])));
        assert!(!has_header(&row(&["Bob", " 2.5"])));
        assert!(!has_header(&[]));
    }

    #[test]
    fn reader_uses_dialect() {
        let dialect = sniff(r#""a";"b""#).unwrap();
        let data = "\"a\";\"b\"\n\"x;1\";\"say \"\"hi\"\"\"\n";
        let mut reader = dialect.reader_builder().from_reader(data.as_bytes());
        let records = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][0], "x;1");
        assert_eq!(&records[1][1], "say \"hi\"");
    }
}
