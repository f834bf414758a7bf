use std::io::{BufRead, Write};

use crate::misc::string_interning::SymbolTable;
use crate::models::datalog::{AttributeKind, Row, Value};

#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: unexpected character {character:?}")]
    UnexpectedCharacter { line: usize, character: char },
    #[error("line {line}: expected {expected} columns, got {got}")]
    ColumnCount {
        line: usize,
        expected: usize,
        got: usize,
    },
    #[error("line {line}: invalid number {text:?}")]
    InvalidNumber { line: usize, text: String },
    #[error("line {line}: unknown event keyword {keyword:?}")]
    UnknownEvent { line: usize, keyword: String },
}

/// Options of one reader/writer invocation, decoded from a directive's
/// option map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvConfig {
    pub delimiter: char,
    pub quotes: bool,
    pub headers: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: '\t',
            quotes: false,
            headers: false,
        }
    }
}

impl CsvConfig {
    pub fn from_options(options: &[(String, String)]) -> Self {
        let mut config = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "delimiter" => {
                    if let Some(character) = value.chars().next() {
                        config.delimiter = character;
                    }
                }
                // Bare `headers=` / `quotes=` act as switches.
                "headers" => config.headers = value != "false",
                "quotes" => config.quotes = value != "false",
                _ => {}
            }
        }
        config
    }
}

#[derive(Clone, Copy, PartialEq)]
enum RowState {
    AfterDelimiter,
    InSingleQuotes,
    InDoubleQuotes,
    Bare,
    EscapedInSingleQuotes,
    EscapedInDoubleQuotes,
    EscapedBare,
    BeforeDelimiter,
}

/// Splits one line into columns. Fields may be bare, single-quoted or
/// double-quoted; `\` escapes the delimiter in bare fields and the quote
/// inside quoted ones. With `skip_spaces` set, blanks around quoted
/// fields are ignored (the profile log convention).
pub fn parse_row(
    line: &str,
    delimiter: char,
    skip_spaces: bool,
    line_number: usize,
) -> Result<Vec<String>, CsvError> {
    use RowState::*;

    if line.is_empty() {
        return Ok(vec![]);
    }

    let mut columns = vec![];
    let mut column = String::new();
    let mut state = AfterDelimiter;

    for character in line.chars() {
        match state {
            AfterDelimiter => match character {
                '\'' => state = InSingleQuotes,
                '"' => state = InDoubleQuotes,
                '\\' => state = EscapedBare,
                c if c == delimiter => columns.push(std::mem::take(&mut column)),
                ' ' if skip_spaces => {}
                c => {
                    state = Bare;
                    column.push(c);
                }
            },
            InSingleQuotes => match character {
                '\'' => state = BeforeDelimiter,
                '\\' => state = EscapedInSingleQuotes,
                c => column.push(c),
            },
            InDoubleQuotes => match character {
                '"' => state = BeforeDelimiter,
                '\\' => state = EscapedInDoubleQuotes,
                c => column.push(c),
            },
            Bare => match character {
                c if c == delimiter => {
                    columns.push(std::mem::take(&mut column));
                    state = AfterDelimiter;
                }
                '\\' => state = EscapedBare,
                c => column.push(c),
            },
            EscapedInSingleQuotes => match character {
                '\'' | '\\' => {
                    column.push(character);
                    state = InSingleQuotes;
                }
                c => {
                    return Err(CsvError::UnexpectedCharacter {
                        line: line_number,
                        character: c,
                    })
                }
            },
            EscapedInDoubleQuotes => match character {
                '"' | '\\' => {
                    column.push(character);
                    state = InDoubleQuotes;
                }
                c => {
                    return Err(CsvError::UnexpectedCharacter {
                        line: line_number,
                        character: c,
                    })
                }
            },
            EscapedBare => {
                column.push(character);
                state = Bare;
            }
            BeforeDelimiter => match character {
                c if c == delimiter => {
                    columns.push(std::mem::take(&mut column));
                    state = AfterDelimiter;
                }
                ' ' if skip_spaces => {}
                c => {
                    return Err(CsvError::UnexpectedCharacter {
                        line: line_number,
                        character: c,
                    })
                }
            },
        }
    }
    columns.push(column);
    Ok(columns)
}

fn write_column<W: Write>(
    out: &mut W,
    text: &str,
    delimiter: char,
    quotes: bool,
) -> Result<(), CsvError> {
    if quotes {
        let mut quoted = String::with_capacity(text.len() + 2);
        quoted.push('"');
        for character in text.chars() {
            if character == '"' || character == '\\' {
                quoted.push('\\');
            }
            quoted.push(character);
        }
        quoted.push('"');
        out.write_all(quoted.as_bytes())?;
    } else {
        let mut escaped = String::with_capacity(text.len());
        for (position, character) in text.chars().enumerate() {
            let leading_quote = position == 0 && (character == '\'' || character == '"');
            if character == delimiter || character == '\\' || leading_quote {
                escaped.push('\\');
            }
            escaped.push(character);
        }
        out.write_all(escaped.as_bytes())?;
    }
    Ok(())
}

/// Reads fact tuples, one per line. Symbol columns are interned; number
/// and record columns parse as raw domain values.
pub fn read_rows<R: BufRead>(
    reader: R,
    kinds: &[AttributeKind],
    symbols: &SymbolTable,
    config: &CsvConfig,
) -> Result<Vec<Row>, CsvError> {
    let mut rows = vec![];
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;
        if config.headers && index == 0 {
            continue;
        }
        if line.is_empty() && kinds.len() > 1 {
            continue;
        }
        let mut columns = parse_row(&line, config.delimiter, false, line_number)?;
        if columns.is_empty() && kinds.len() == 1 {
            // An empty line in a unary relation is one empty field.
            columns = vec![String::new()];
        }
        if columns.len() != kinds.len() {
            return Err(CsvError::ColumnCount {
                line: line_number,
                expected: kinds.len(),
                got: columns.len(),
            });
        }
        let mut row = Vec::with_capacity(kinds.len());
        for (kind, column) in kinds.iter().zip(columns) {
            let value = match kind {
                AttributeKind::Symbol => symbols.intern(&column),
                _ => column
                    .trim()
                    .parse::<Value>()
                    .map_err(|_| CsvError::InvalidNumber {
                        line: line_number,
                        text: column.clone(),
                    })?,
            };
            row.push(value);
        }
        rows.push(row.into_boxed_slice());
    }
    Ok(rows)
}

/// Writes tuples in the same convention, with optional header row and
/// per-column quoting.
pub fn write_rows<'a, W: Write>(
    out: &mut W,
    rows: impl Iterator<Item = &'a Row>,
    names: &[String],
    kinds: &[AttributeKind],
    symbols: &SymbolTable,
    config: &CsvConfig,
) -> Result<(), CsvError> {
    if config.headers {
        for (position, name) in names.iter().enumerate() {
            if position > 0 {
                write!(out, "{}", config.delimiter)?;
            }
            write_column(out, name, config.delimiter, config.quotes)?;
        }
        writeln!(out)?;
    }

    for row in rows {
        for (position, (value, kind)) in row.iter().zip(kinds).enumerate() {
            if position > 0 {
                write!(out, "{}", config.delimiter)?;
            }
            let text = match kind {
                AttributeKind::Symbol => symbols.resolve(*value).to_string(),
                _ => value.to_string(),
            };
            write_column(out, &text, config.delimiter, config.quotes)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_row, read_rows, write_rows, CsvConfig};
    use crate::misc::string_interning::SymbolTable;
    use crate::models::datalog::{AttributeKind, Row};

    #[test]
    fn test_parse_row_quote_states() {
        let columns = parse_row(r#""a\"b"	'a\'b'	bare	"#, '\t', false, 1).unwrap();

        assert_eq!(columns, vec!["a\"b", "a'b", "bare", ""]);
    }

    #[test]
    fn test_parse_row_escaped_delimiter_in_bare_field() {
        let columns = parse_row("a\\\tb\tc", '\t', false, 1).unwrap();

        assert_eq!(columns, vec!["a\tb", "c"]);
    }

    #[test]
    fn test_parse_row_rejects_bad_escape_in_quotes() {
        assert!(parse_row(r#""a\x""#, '\t', false, 1).is_err());
    }

    #[test]
    fn test_parse_row_empty_fields() {
        assert_eq!(parse_row("\t\t", '\t', false, 1).unwrap(), vec!["", "", ""]);
        assert_eq!(parse_row("", '\t', false, 1).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_read_rows_mixed_kinds() {
        let symbols = SymbolTable::new();
        let kinds = [AttributeKind::Number, AttributeKind::Symbol];
        let data = "1\talpha\n2\tbeta\n";

        let rows = read_rows(data.as_bytes(), &kinds, &symbols, &CsvConfig::default()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], 1);
        assert_eq!(symbols.resolve(rows[0][1]), "alpha");
        assert_eq!(symbols.resolve(rows[1][1]), "beta");
    }

    #[test]
    fn test_round_trip_all_configs() {
        use rand::prelude::*;

        let symbols = SymbolTable::new();
        let kinds = [AttributeKind::Number, AttributeKind::Symbol];
        let names = ["n".to_string(), "s".to_string()];
        let mut rng = thread_rng();

        let alphabet = [
            "plain",
            "with space",
            "del,im",
            "qu\"ote",
            "ap'os",
            "back\\slash",
            "\"leading",
            "'leading",
            "",
        ];
        let rows: Vec<Row> = (0..50)
            .map(|_| {
                let n = rng.gen_range(-1000..1000);
                let s = symbols.intern(alphabet.choose(&mut rng).unwrap());
                vec![n, s].into_boxed_slice()
            })
            .collect();

        for delimiter in ['\t', ','] {
            for quotes in [false, true] {
                for headers in [false, true] {
                    let config = CsvConfig {
                        delimiter,
                        quotes,
                        headers,
                    };
                    let mut buffer = vec![];
                    write_rows(&mut buffer, rows.iter(), &names, &kinds, &symbols, &config)
                        .unwrap();

                    let restored =
                        read_rows(buffer.as_slice(), &kinds, &symbols, &config).unwrap();
                    assert_eq!(restored, rows, "config {:?}", config);
                }
            }
        }
    }
}
