//! Plain-text numeric tables
//!
//! Laboratory tables are columns of numbers separated by tabs or runs of spaces, preceded by a
//! fixed number of header lines. Columns are positional. Output tables are tab separated with a
//! single `# `-prefixed header line, so they can be fed back into [`read`] with one header line.
use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::Result;

/// Read the numeric rows of the table at `path`
///
/// Every row must hold at least `min_columns` values; additional columns are kept. Blank lines
/// are ignored.
///
/// # Errors
/// - [`Error::MissingFile`] if `path` does not exist
/// - [`Error::MalformedRow`] if a row is short or holds a non-numeric cell
pub fn read(path: &Path, header_lines: usize, min_columns: usize) -> Result<Vec<Vec<f64>>> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_path_buf()).into());
    }
    let text = fs::read_to_string(path)?;

    // The csv reader wants a single delimiter, so whitespace runs are collapsed to tabs first
    let (line_numbers, lines): (Vec<usize>, Vec<String>) = text
        .lines()
        .enumerate()
        .skip(header_lines)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(ii, line)| (ii + 1, line.split_whitespace().collect::<Vec<_>>().join("\t")))
        .unzip();
    let normalised = lines.join("\n");

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(normalised.as_bytes());

    let mut rows = Vec::with_capacity(line_numbers.len());
    for (record, &line) in rdr.deserialize::<Vec<f64>>().zip(&line_numbers) {
        let row = record.map_err(|e| Error::MalformedRow {
            path: path.to_path_buf(),
            line,
            reason: e.to_string(),
        })?;
        if row.len() < min_columns {
            return Err(Error::MalformedRow {
                path: path.to_path_buf(),
                line,
                reason: format!("expected {min_columns} columns, found {}", row.len()),
            }
            .into());
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Write a tab separated table with a commented header line
///
/// Parent directories are created as needed.
pub fn write<I>(path: &Path, header: &[&str], rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;

    let mut header = header.iter().map(ToString::to_string).collect::<Vec<_>>();
    if let Some(first) = header.first_mut() {
        first.insert_str(0, "# ");
    }
    wtr.write_record(&header)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::{read, write};
    use crate::error::Error;

    #[test]
    fn mixed_whitespace_rows_are_read() {
        let dir = TempDir::new("table").unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "Channel Counts\n0\t12\n1   15.5\n\n2 \t 3\n").unwrap();

        let rows = read(&path, 1, 2).unwrap();
        assert_eq!(rows, vec![vec![0., 12.], vec![1., 15.5], vec![2., 3.]]);
    }

    #[test]
    fn short_rows_report_their_line() {
        let dir = TempDir::new("table").unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "Channel Counts\n0 12\n1\n").unwrap();

        let err = read(&path, 1, 2).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::MalformedRow { line, .. }) => assert_eq!(*line, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_numeric_cells_are_rejected() {
        let dir = TempDir::new("table").unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "Channel Counts\n0 twelve\n").unwrap();

        assert!(read(&path, 1, 2).is_err());
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = TempDir::new("table").unwrap();
        let err = read(&dir.path().join("absent.txt"), 1, 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MissingFile(_))
        ));
    }

    #[test]
    fn written_tables_read_back_with_one_header_line() {
        let dir = TempDir::new("table").unwrap();
        let path = dir.path().join("nested").join("out.txt");
        write(
            &path,
            &["Channel", "Counts"],
            vec![vec!["0".into(), "4.5".into()], vec!["1".into(), "2".into()]],
        )
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Channel\tCounts\n"));
        assert_eq!(read(&path, 1, 2).unwrap(), vec![vec![0., 4.5], vec![1., 2.]]);
    }
}
