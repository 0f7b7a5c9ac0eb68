//! Workbook and CSV reading into plain string grids.

use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_from_rs, DataType, Reader, Xls, Xlsx};
use std::io::{Cursor, Read, Seek};
use std::path::Path;

/// One sheet as rows of trimmed cell strings. Empty cells are empty strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Rows with at least one non-blank cell.
    pub fn non_empty_rows(&self) -> impl Iterator<Item = (usize, &Vec<String>)> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !is_blank_row(row))
    }

    pub fn non_empty_row_count(&self) -> usize {
        self.non_empty_rows().count()
    }
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Xlsx,
    Xls,
}

impl TabularFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "xlsm" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            _ => None,
        }
    }
}

/// Pick `,`, `;` or tab by which occurs most on the first line.
pub fn sniff_delimiter(data: &[u8]) -> u8 {
    let first_line = data.split(|b| *b == b'\n').next().unwrap_or(&[]);
    [b',', b';', b'\t']
        .into_iter()
        .map(|d| (d, first_line.iter().filter(|b| **b == d).count()))
        .fold((b',', 0), |best, (d, count)| if count > best.1 { (d, count) } else { best })
        .0
}

/// Read a CSV document as a single sheet. No header row is assumed.
pub fn read_csv(data: &[u8], sheet_name: &str) -> Result<Sheet> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(data);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(data))
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to parse CSV row {}", idx + 1))?;
        rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
    }

    Ok(Sheet::new(sheet_name, rows))
}

fn render_cell(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        DataType::Float(f) => f.to_string(),
        DataType::Bool(b) => b.to_string(),
        DataType::Error(_) => String::new(),
        other => other.to_string(),
    }
}

fn collect_sheets<RS, R>(workbook: &mut R) -> Result<Vec<Sheet>>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let mut sheets = Vec::new();

    for name in workbook.sheet_names().to_owned() {
        let range = match workbook.worksheet_range(&name) {
            Some(Ok(range)) => range,
            Some(Err(e)) => return Err(anyhow!("Failed to read worksheet '{}': {:?}", name, e)),
            None => continue,
        };

        let rows = range
            .rows()
            .map(|row| row.iter().map(render_cell).collect())
            .collect();
        sheets.push(Sheet::new(name, rows));
    }

    Ok(sheets)
}

/// Read every sheet of a workbook, or the single sheet of a CSV.
pub fn read_workbook(data: &[u8], format: TabularFormat, file_name: &str) -> Result<Vec<Sheet>> {
    match format {
        TabularFormat::Csv => {
            let stem = Path::new(file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("csv");
            Ok(vec![read_csv(data, stem)?])
        }
        TabularFormat::Xlsx => {
            let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
                .map_err(|e| anyhow!("Failed to open xlsx workbook: {:?}", e))?;
            collect_sheets(&mut workbook)
        }
        TabularFormat::Xls => {
            let mut workbook: Xls<_> = open_workbook_from_rs(Cursor::new(data))
                .map_err(|e| anyhow!("Failed to open xls workbook: {:?}", e))?;
            collect_sheets(&mut workbook)
        }
    }
}
