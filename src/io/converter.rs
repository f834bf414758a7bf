use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::io::csv::{parse_row, CsvError};

lazy_static! {
    /// Positional column schema per event keyword. The normalized CSV
    /// header is the sorted union of all schema columns.
    static ref EVENT_SCHEMA: HashMap<&'static str, Vec<&'static str>> = {
        let mut schema = HashMap::new();
        schema.insert("@start-debug", vec![]);
        schema.insert(
            "@t-nonrecursive-rule",
            vec!["relation", "src-locator", "rule", "start-time", "end-time", "time"],
        );
        schema.insert(
            "@n-nonrecursive-rule",
            vec!["relation", "src-locator", "rule", "tuples"],
        );
        schema.insert(
            "@t-nonrecursive-relation",
            vec!["relation", "src-locator", "start-time", "end-time", "time"],
        );
        schema.insert(
            "@n-nonrecursive-relation",
            vec!["relation", "src-locator", "tuples"],
        );
        schema.insert(
            "@t-recursive-rule",
            vec!["relation", "version", "src-locator", "rule", "start-time", "end-time", "time"],
        );
        schema.insert(
            "@n-recursive-rule",
            vec!["relation", "version", "src-locator", "rule", "tuples"],
        );
        schema.insert(
            "@t-recursive-relation",
            vec!["relation", "src-locator", "start-time", "end-time", "time"],
        );
        schema.insert(
            "@n-recursive-relation",
            vec!["relation", "src-locator", "tuples"],
        );
        schema.insert(
            "@c-recursive-relation",
            vec!["relation", "src-locator", "start-time", "end-time", "copy-time"],
        );
        schema.insert("@runtime", vec!["start-time", "end-time", "total-time"]);
        schema
    };
}

fn header_columns() -> Vec<&'static str> {
    let names: BTreeSet<&str> = EVENT_SCHEMA
        .values()
        .flat_map(|columns| columns.iter().copied())
        .collect();
    names.into_iter().collect()
}

fn write_csv_column<W: Write>(out: &mut W, text: &str, quotes: bool) -> Result<(), CsvError> {
    if quotes {
        let mut quoted = String::with_capacity(text.len() + 2);
        quoted.push('\'');
        for character in text.chars() {
            if character == '\'' {
                quoted.push('\\');
            }
            quoted.push(character);
        }
        quoted.push('\'');
        out.write_all(quoted.as_bytes())?;
    } else {
        out.write_all(text.as_bytes())?;
    }
    Ok(())
}

fn write_csv_row<W: Write>(out: &mut W, columns: &[String], quotes: bool) -> Result<(), CsvError> {
    for (position, column) in columns.iter().enumerate() {
        if position > 0 {
            write!(out, ",")?;
        }
        write_csv_column(out, column, quotes)?;
    }
    writeln!(out)?;
    Ok(())
}

/// Converts an evaluation profile log to a normalized CSV with the fixed
/// superset schema. Options: `headers=` emits the header row, `quotes=`
/// single-quotes every column.
pub fn from_log_to_csv<R: BufRead, W: Write>(
    input: R,
    output: &mut W,
    options: &[(String, String)],
) -> Result<(), CsvError> {
    let headers = options.iter().any(|(key, _)| key == "headers");
    let quotes = options.iter().any(|(key, _)| key == "quotes");

    let names = header_columns();
    let index_of: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(position, name)| (*name, position + 1))
        .collect();

    if headers {
        let mut first_row = vec!["@".to_string()];
        first_row.extend(names.iter().map(|name| name.to_string()));
        write_csv_row(output, &first_row, quotes)?;
    }

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;
        if line.is_empty() {
            continue;
        }
        let old_row = parse_row(&line, ';', true, line_number)?;
        let keyword = old_row[0].as_str();
        let schema = EVENT_SCHEMA
            .get(keyword)
            .ok_or_else(|| CsvError::UnknownEvent {
                line: line_number,
                keyword: keyword.to_string(),
            })?;
        if old_row.len() - 1 > schema.len() {
            return Err(CsvError::ColumnCount {
                line: line_number,
                expected: schema.len() + 1,
                got: old_row.len(),
            });
        }

        let mut new_row = vec![String::new(); names.len() + 1];
        new_row[0] = keyword.to_string();
        for (old_index, column) in old_row.iter().enumerate().skip(1) {
            let header = schema[old_index - 1];
            new_row[index_of[header]] = column.clone();
        }
        write_csv_row(output, &new_row, quotes)?;
    }
    Ok(())
}

pub fn convert_file(
    input: &Path,
    output: &Path,
    options: &[(String, String)],
) -> Result<(), CsvError> {
    let reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    from_log_to_csv(reader, &mut writer, options)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::from_log_to_csv;

    const LOG: &str = "@start-debug\n\
@t-nonrecursive-rule;RelName;file.dl [8:1-8:35];RelName(x,y) :- link(x,y).;0;0;2.4863e-05\n\
@n-nonrecursive-rule;RelName;file.dl [8:1-8:35];RelName(x,y) :- link(x,y).;8\n\
@t-nonrecursive-relation;RelName;file.dl [4:7-0:0];0;0;0.000118451\n\
@n-nonrecursive-relation;RelName;file.dl [4:7-0:0];8\n\
@t-recursive-rule;RelName;0;file.dl [9:1-9:57];RelName(x,y) :- RelName(x,z).;0;0;5.0565e-05\n\
@n-recursive-rule;RelName;0;file.dl [9:1-9:57];RelName(x,y) :- RelName(x,z).;6\n\
@t-recursive-relation;RelName;file.dl [4:7-0:0];0;0;9.8336e-05\n\
@n-recursive-relation;RelName;file.dl [4:7-0:0];6\n\
@c-recursive-relation;RelName;file.dl [4:7-0:0];0;0;9.777e-06\n\
@runtime;0;0;0.00126608\n";

    fn convert(options: &[(&str, &str)]) -> String {
        let options: Vec<(String, String)> = options
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let mut out = vec![];
        from_log_to_csv(LOG.as_bytes(), &mut out, &options).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_header_row_has_the_fixed_schema() {
        let csv = convert(&[("headers", "")]);

        assert!(csv.starts_with(
            "@,copy-time,end-time,relation,rule,src-locator,start-time,time,total-time,tuples,version\n"
        ));
    }

    #[test]
    fn test_rows_are_placed_by_schema() {
        let csv = convert(&[]);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "@start-debug,,,,,,,,,,");
        assert_eq!(
            lines[1],
            "@t-nonrecursive-rule,,0,RelName,RelName(x,y) :- link(x,y).,file.dl [8:1-8:35],0,2.4863e-05,,,"
        );
        assert_eq!(
            lines[2],
            "@n-nonrecursive-rule,,,RelName,RelName(x,y) :- link(x,y).,file.dl [8:1-8:35],,,,8,"
        );
        assert_eq!(
            lines[5],
            "@t-recursive-rule,,0,RelName,RelName(x,y) :- RelName(x,z).,file.dl [9:1-9:57],0,5.0565e-05,,,0"
        );
        assert_eq!(
            lines[9],
            "@c-recursive-relation,9.777e-06,0,RelName,,file.dl [4:7-0:0],0,,,,"
        );
        assert_eq!(lines[10], "@runtime,,0,,,,0,,0.00126608,,");
    }

    #[test]
    fn test_quotes_wrap_every_column() {
        let csv = convert(&[("quotes", "")]);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "'@start-debug','','','','','','','','','',''");
        assert_eq!(
            lines[10],
            "'@runtime','','0','','','','0','','0.00126608','',''"
        );
    }

    #[test]
    fn test_one_row_per_log_line() {
        let csv = convert(&[("headers", "")]);

        assert_eq!(csv.lines().count(), 1 + LOG.lines().count());
    }

    #[test]
    fn test_unknown_keyword_is_an_error() {
        let mut out = vec![];
        let result = from_log_to_csv("@bogus;1;2\n".as_bytes(), &mut out, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn test_escaped_separator_stays_in_column() {
        let mut out = vec![];
        from_log_to_csv(
            "@n-nonrecursive-relation;Rel\\;Name;loc;3\n".as_bytes(),
            &mut out,
            &[],
        )
        .unwrap();
        let csv = String::from_utf8(out).unwrap();

        assert!(csv.contains("Rel;Name"));
    }
}
