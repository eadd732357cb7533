use std::collections::BTreeMap;

use crate::error::{PercError, Result};
use crate::models::{CandidateRecord, ParseError};

pub const COUNTRY_CODE: &str = "+221";
pub const MOBILE_PREFIX: char = '7';
pub const LOCAL_NUMBER_LEN: usize = 9;

const UNKNOWN_MATRICULE: &str = "UNKNOWN";

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SheetFormat {
    pub const SUPPORTED_EXTENSIONS: &'static [&'static str] = &["xlsx", "xls", "csv"];

    /// Resolve the format from a filename's extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            "" => Err(PercError::UnsupportedFormat("(no extension)".to_string())),
            other => Err(PercError::UnsupportedFormat(format!(".{other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Column aliases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Matricule,
    AccountNumber,
    Name,
    OrgUnit,
    Email,
    Phone,
    Amount,
    Period,
}

// Compared against trimmed, lowercased headers. Order is priority order.
const COLUMN_ALIASES: &[(Field, &[&str])] = &[
    (Field::Matricule, &["matricule", "n° matricule", "n°matricule", "no matricule"]),
    (
        Field::AccountNumber,
        &["compte n°", "compte n", "compte", "numero compte", "numéro compte", "n°compte", "compte cgf"],
    ),
    (Field::Name, &["nom", "nom complet", "nom et prenom", "nom et prénom"]),
    (Field::OrgUnit, &["direction", "service"]),
    (Field::Email, &["e-mail", "email", "mail"]),
    (Field::Phone, &["tél.", "tél", "tel", "tel.", "telephone", "téléphone"]),
    (Field::Amount, &["montant versé", "montant", "montant verse", "versement"]),
    (Field::Period, &["période", "periode", "period"]),
];

/// Header row resolved once per file: for each field, the matching column
/// indexes in alias priority order.
struct HeaderMap {
    headers: Vec<String>,
    columns: Vec<(Field, Vec<usize>)>,
}

impl HeaderMap {
    fn resolve(headers: Vec<String>) -> Self {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let columns = COLUMN_ALIASES
            .iter()
            .map(|(field, aliases)| {
                let mut idxs = Vec::new();
                for alias in aliases.iter() {
                    for (i, header) in lowered.iter().enumerate() {
                        if header == alias && !idxs.contains(&i) {
                            idxs.push(i);
                        }
                    }
                }
                (*field, idxs)
            })
            .collect();
        Self { headers, columns }
    }

    fn indexes(&self, field: Field) -> &[usize] {
        self.columns
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, idxs)| idxs.as_slice())
            .unwrap_or(&[])
    }

    /// First present non-empty cell among the field's columns.
    fn value(&self, field: Field, cells: &[Cell]) -> std::result::Result<String, String> {
        for &i in self.indexes(field) {
            match cells.get(i) {
                Some(Cell::Text(s)) if !s.trim().is_empty() => return Ok(s.trim().to_string()),
                Some(Cell::Invalid(e)) => {
                    let header = self.headers.get(i).map(String::as_str).unwrap_or("?");
                    return Err(format!("unreadable cell in column \"{header}\": {e}"));
                }
                _ => {}
            }
        }
        Ok(String::new())
    }

    fn raw(&self, cells: &[Cell]) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.trim().is_empty())
            .map(|(i, h)| {
                let text = match cells.get(i) {
                    Some(Cell::Text(s)) => s.clone(),
                    Some(Cell::Invalid(e)) => e.clone(),
                    None => String::new(),
                };
                (h.trim().to_string(), text)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Cell normalization
// ---------------------------------------------------------------------------

/// Keep digits and a leading plus, rewrite `00` to `+`, and prefix the country
/// code only for a bare 9-digit mobile number.
pub fn normalize_phone(raw: &str) -> String {
    let mut cleaned = String::new();
    for c in raw.trim().chars() {
        if c.is_ascii_digit() || (c == '+' && cleaned.is_empty()) {
            cleaned.push(c);
        }
    }
    if let Some(rest) = cleaned.strip_prefix("00") {
        cleaned = format!("+{rest}");
    }
    if !cleaned.starts_with('+')
        && cleaned.starts_with(MOBILE_PREFIX)
        && cleaned.len() == LOCAL_NUMBER_LEN
    {
        cleaned = format!("{COUNTRY_CODE}{cleaned}");
    }
    cleaned
}

/// Turn a loosely formatted amount into a plain numeric string, or empty.
///
/// With both `,` and `.` present the rightmost one is the decimal separator;
/// a lone `,` is a decimal separator. Extra dots are folded into the integer
/// part so only the last one survives.
pub fn normalize_amount(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return String::new();
    }
    let unified = match (compact.rfind(','), compact.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) => compact.replace(',', "."),
        _ => compact,
    };
    let kept: String = unified
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if kept.matches('.').count() > 1 {
        if let Some(idx) = kept.rfind('.') {
            let (int_part, frac_part) = kept.split_at(idx);
            return format!("{}.{}", int_part.replace('.', ""), &frac_part[1..]);
        }
    }
    kept
}

#[cfg(any(feature = "xlsx", test))]
pub fn excel_serial_to_date(serial: f64) -> String {
    // Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug)
    let base = chrono::NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default();
    let date = base + chrono::Duration::days(serial as i64);
    date.format("%Y-%m-%d").to_string()
}

/// Reduce a sheet period to `YYYY-MM`. Accepts `YYYY-MM`, ISO dates (what
/// date cells become), `MM/YYYY` and `YYYY/MM`.
pub fn normalize_period(value: &str) -> Option<String> {
    let value = value.trim();
    let date_part = value.get(..10).unwrap_or(value);
    if let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        return Some(date.format("%Y-%m").to_string());
    }
    let (year, month) = match value.split_once(['-', '/']) {
        Some((a, b)) if a.len() == 4 => (a, b),
        Some((a, b)) if b.len() == 4 => (b, a),
        _ => return None,
    };
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    chrono::NaiveDate::from_ymd_opt(year, month, 1).map(|d| d.format("%Y-%m").to_string())
}

// ---------------------------------------------------------------------------
// Raw grid readers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Invalid(String),
}

struct RawRow {
    line: usize,
    cells: std::result::Result<Vec<Cell>, String>,
}

struct Grid {
    headers: Vec<String>,
    rows: Vec<RawRow>,
}

fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        // Legacy spreadsheet exports are Latin-1.
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or(&[]);
    let semicolons = first_line.iter().filter(|&&b| b == b';').count();
    let commas = first_line.iter().filter(|&&b| b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn read_csv(bytes: &[u8]) -> Result<Grid> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sniff_delimiter(bytes))
        .from_reader(bytes);

    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for (idx, result) in rdr.byte_records().enumerate() {
        let fallback_line = idx + 1;
        match result {
            Ok(record) => {
                let line = record
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                let cells: Vec<String> = record.iter().map(decode_text).collect();
                if headers.is_none() {
                    let mut cells = cells;
                    if let Some(first) = cells.first_mut() {
                        *first = first.trim_start_matches('\u{feff}').to_string();
                    }
                    headers = Some(cells);
                    continue;
                }
                rows.push(RawRow {
                    line,
                    cells: Ok(cells.into_iter().map(Cell::Text).collect()),
                });
            }
            Err(e) => {
                if headers.is_none() {
                    return Err(e.into());
                }
                let line = e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                rows.push(RawRow {
                    line,
                    cells: Err(e.to_string()),
                });
            }
        }
    }
    Ok(Grid {
        headers: headers.ok_or(PercError::EmptySheet)?,
        rows,
    })
}

#[cfg(feature = "xlsx")]
fn read_workbook(bytes: &[u8]) -> Result<Grid> {
    use calamine::{Data, Reader};

    fn cell(value: &Data) -> Cell {
        match value {
            Data::Empty => Cell::Text(String::new()),
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Text(i.to_string()),
            Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Cell::Text((*f as i64).to_string()),
            Data::Float(f) => Cell::Text(f.to_string()),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Text(excel_serial_to_date(dt.as_f64())),
            Data::Error(e) => Cell::Invalid(e.to_string()),
        }
    }

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| PercError::Spreadsheet(format!("Failed to open workbook: {e}")))?;
    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(PercError::EmptySheet)?;
    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| PercError::Spreadsheet(format!("Failed to read sheet {first_sheet}: {e}")))?;
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(row) => row
            .iter()
            .map(|c| match cell(c) {
                Cell::Text(s) | Cell::Invalid(s) => s,
            })
            .collect(),
        None => return Err(PercError::EmptySheet),
    };
    let rows = rows_iter
        .enumerate()
        .map(|(idx, row)| RawRow {
            // header sits on first_row (0-based), so data idx 0 is line first_row + 2
            line: first_row + idx + 2,
            cells: Ok(row.iter().map(cell).collect()),
        })
        .collect();
    Ok(Grid { headers, rows })
}

#[cfg(not(feature = "xlsx"))]
fn read_workbook(_bytes: &[u8]) -> Result<Grid> {
    Err(PercError::UnsupportedFormat(
        "spreadsheet workbooks (built without the xlsx feature)".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SheetStats {
    pub total: usize,
    pub valid: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct NormalizedSheet {
    pub records: Vec<CandidateRecord>,
    pub parse_errors: Vec<ParseError>,
    pub stats: SheetStats,
}

/// One sheet row in file order: either a candidate or a parse-level rejection.
#[derive(Debug, Clone, Copy)]
pub enum SheetRow<'a> {
    Candidate(&'a CandidateRecord),
    Unparseable(&'a ParseError),
}

impl SheetRow<'_> {
    pub fn line(&self) -> usize {
        match self {
            Self::Candidate(r) => r.line,
            Self::Unparseable(e) => e.line,
        }
    }
}

impl NormalizedSheet {
    /// Candidates and parse errors merged back into original file order.
    pub fn rows(&self) -> impl Iterator<Item = SheetRow<'_>> {
        let mut merged: Vec<SheetRow<'_>> = self
            .records
            .iter()
            .map(SheetRow::Candidate)
            .chain(self.parse_errors.iter().map(SheetRow::Unparseable))
            .collect();
        merged.sort_by_key(SheetRow::line);
        merged.into_iter()
    }
}

fn is_blank(cells: &[Cell]) -> bool {
    cells
        .iter()
        .all(|c| matches!(c, Cell::Text(s) if s.trim().is_empty()))
}

fn normalize_row(map: &HeaderMap, line: usize, cells: &[Cell]) -> std::result::Result<CandidateRecord, ParseError> {
    let raw = map.raw(cells);
    let shape = |field: Field| map.value(field, cells);
    let best_effort_matricule = shape(Field::Matricule)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| UNKNOWN_MATRICULE.to_string());
    let fail = |reason: String| ParseError {
        line,
        matricule: best_effort_matricule.clone(),
        reason,
        raw: raw.clone(),
    };

    let raw_amount = shape(Field::Amount).map_err(fail)?;
    let raw_phone = shape(Field::Phone).map_err(fail)?;
    let raw_period = shape(Field::Period).map_err(fail)?;
    let period = normalize_period(&raw_period);
    if period.is_none() && !raw_period.is_empty() {
        log::warn!("line {line}: unrecognized period \"{raw_period}\", using the import period");
    }
    Ok(CandidateRecord {
        line,
        matricule: shape(Field::Matricule).map_err(fail)?,
        account_number: shape(Field::AccountNumber).map_err(fail)?,
        name: shape(Field::Name).map_err(fail)?,
        org_unit: shape(Field::OrgUnit).map_err(fail)?,
        email: shape(Field::Email).map_err(fail)?,
        phone: normalize_phone(&raw_phone),
        amount: normalize_amount(&raw_amount),
        raw_amount,
        period,
        raw,
    })
}

/// Normalize the first sheet of a tabular file into candidate records.
///
/// Fails for the whole file only when there are no data rows, or when no row
/// could be shaped into a candidate.
pub fn normalize(bytes: &[u8], format: SheetFormat) -> Result<NormalizedSheet> {
    let grid = match format {
        SheetFormat::Csv => read_csv(bytes)?,
        SheetFormat::Xlsx | SheetFormat::Xls => read_workbook(bytes)?,
    };
    let map = HeaderMap::resolve(grid.headers);

    let mut records = Vec::new();
    let mut parse_errors = Vec::new();
    for row in grid.rows {
        match row.cells {
            Ok(cells) => {
                if is_blank(&cells) {
                    continue;
                }
                match normalize_row(&map, row.line, &cells) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        log::warn!("line {}: {}", err.line, err.reason);
                        parse_errors.push(err);
                    }
                }
            }
            Err(reason) => {
                log::warn!("line {}: {}", row.line, reason);
                parse_errors.push(ParseError {
                    line: row.line,
                    matricule: UNKNOWN_MATRICULE.to_string(),
                    reason,
                    raw: BTreeMap::new(),
                });
            }
        }
    }

    let stats = SheetStats {
        total: records.len() + parse_errors.len(),
        valid: records.len(),
        errors: parse_errors.len(),
    };
    if stats.total == 0 {
        return Err(PercError::EmptySheet);
    }
    if records.is_empty() {
        return Err(PercError::NoUsableRows {
            details: parse_errors,
        });
    }
    log::info!(
        "sheet normalized: {} rows, {} candidates, {} parse errors",
        stats.total,
        stats.valid,
        stats.errors
    );
    Ok(NormalizedSheet {
        records,
        parse_errors,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Matricule,Compte N°,Nom,Direction,E-mail,Tél.,Montant Versé\n";

    #[test]
    fn test_amount_comma_decimal_with_dot_thousands() {
        assert_eq!(normalize_amount("1.500,50"), "1500.50");
    }

    #[test]
    fn test_amount_dot_decimal_with_comma_thousands() {
        assert_eq!(normalize_amount("1,500.50"), "1500.50");
    }

    #[test]
    fn test_amount_space_thousands() {
        assert_eq!(normalize_amount("1 500"), "1500");
        assert_eq!(normalize_amount("1\u{a0}500,50"), "1500.50");
        assert_eq!(normalize_amount("  25 000 FCFA "), "25000");
    }

    #[test]
    fn test_amount_lone_comma_is_decimal() {
        assert_eq!(normalize_amount("1500,50"), "1500.50");
        assert_eq!(normalize_amount("1,5"), "1.5");
    }

    #[test]
    fn test_amount_multiple_dots_keep_last() {
        assert_eq!(normalize_amount("1.234.567"), "1234.567");
        assert_eq!(normalize_amount("1.234.567,89"), "1234567.89");
    }

    #[test]
    fn test_amount_garbage_is_empty() {
        assert_eq!(normalize_amount(""), "");
        assert_eq!(normalize_amount("   "), "");
        assert_eq!(normalize_amount("n/a"), "");
    }

    #[test]
    fn test_phone_prefixes_bare_mobile_number() {
        assert_eq!(normalize_phone("77 123 45 67"), "+221771234567");
        assert_eq!(normalize_phone("771234567"), "+221771234567");
    }

    #[test]
    fn test_phone_rewrites_double_zero() {
        assert_eq!(normalize_phone("00221 77 123 45 67"), "+221771234567");
    }

    #[test]
    fn test_phone_keeps_other_lengths_and_prefixes() {
        // ten digits starting with 7 is not guessed at
        assert_eq!(normalize_phone("7712345678"), "7712345678");
        assert_eq!(normalize_phone("33 821 00 00"), "338210000");
        assert_eq!(normalize_phone("+221 77-123-45-67"), "+221771234567");
        assert_eq!(normalize_phone("(+33) 6 12 34 56 78"), "+33612345678");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(SheetFormat::from_filename("CGF_2025.XLSX").unwrap(), SheetFormat::Xlsx);
        assert_eq!(SheetFormat::from_filename("old.xls").unwrap(), SheetFormat::Xls);
        assert_eq!(SheetFormat::from_filename("a.b.csv").unwrap(), SheetFormat::Csv);
        assert!(matches!(
            SheetFormat::from_filename("report.pdf"),
            Err(PercError::UnsupportedFormat(ext)) if ext == ".pdf"
        ));
        assert!(SheetFormat::from_filename("noext").is_err());
    }

    #[test]
    fn test_normalize_csv_resolves_aliases() {
        let content = format!("{HEADER}M001,C-100,Awa Diop,DRH,awa@example.sn,77 123 45 67,\"1 500,50\"\n");
        let sheet = normalize(content.as_bytes(), SheetFormat::Csv).unwrap();
        assert_eq!(sheet.stats, SheetStats { total: 1, valid: 1, errors: 0 });
        let r = &sheet.records[0];
        assert_eq!(r.line, 2);
        assert_eq!(r.matricule, "M001");
        assert_eq!(r.account_number, "C-100");
        assert_eq!(r.name, "Awa Diop");
        assert_eq!(r.org_unit, "DRH");
        assert_eq!(r.phone, "+221771234567");
        assert_eq!(r.amount, "1500.50");
        assert_eq!(r.raw_amount, "1 500,50");
        assert_eq!(r.raw.get("Matricule").map(String::as_str), Some("M001"));
    }

    #[test]
    fn test_headers_are_case_insensitive_and_optional() {
        let content = "MATRICULE;COMPTE;MONTANT\nM9;C9;250\n";
        let sheet = normalize(content.as_bytes(), SheetFormat::Csv).unwrap();
        let r = &sheet.records[0];
        assert_eq!(r.matricule, "M9");
        assert_eq!(r.account_number, "C9");
        assert_eq!(r.amount, "250");
        assert_eq!(r.name, "");
        assert_eq!(r.email, "");
        assert!(r.period.is_none());
    }

    #[test]
    fn test_first_non_empty_alias_wins() {
        let content = "Montant Versé,Montant,Matricule,Compte\n,300,M1,C1\n100,300,M2,C2\n";
        let sheet = normalize(content.as_bytes(), SheetFormat::Csv).unwrap();
        assert_eq!(sheet.records[0].amount, "300");
        assert_eq!(sheet.records[1].amount, "100");
    }

    #[test]
    fn test_blank_rows_are_skipped_but_counted_in_line_numbers() {
        let content = format!("{HEADER}M1,C1,A,,,,100\n,,,,,,\nM2,C2,B,,,,200\n");
        let sheet = normalize(content.as_bytes(), SheetFormat::Csv).unwrap();
        assert_eq!(sheet.stats.total, 2);
        assert_eq!(sheet.records[0].line, 2);
        assert_eq!(sheet.records[1].line, 4);
    }

    #[test]
    fn test_bom_is_ignored_in_first_header() {
        let content = "\u{feff}Matricule,Compte,Montant\nM1,C1,10\n";
        let sheet = normalize(content.as_bytes(), SheetFormat::Csv).unwrap();
        assert_eq!(sheet.records[0].matricule, "M1");
    }

    #[test]
    fn test_latin1_headers_are_decoded() {
        let mut content: Vec<u8> = b"Matricule,Compte,T".to_vec();
        content.push(0xE9); // é in Latin-1
        content.extend_from_slice(b"l.,Montant\nM1,C1,771234567,10\n");
        let sheet = normalize(&content, SheetFormat::Csv).unwrap();
        assert_eq!(sheet.records[0].phone, "+221771234567");
    }

    #[test]
    fn test_period_column_is_captured() {
        let content = "Matricule,Compte,Montant,Période\nM1,C1,10,2025-03\n";
        let sheet = normalize(content.as_bytes(), SheetFormat::Csv).unwrap();
        assert_eq!(sheet.records[0].period.as_deref(), Some("2025-03"));
    }

    #[test]
    fn test_period_forms_reduce_to_year_month() {
        assert_eq!(normalize_period("2025-03").as_deref(), Some("2025-03"));
        assert_eq!(normalize_period("2025-3").as_deref(), Some("2025-03"));
        assert_eq!(normalize_period("2025-03-01").as_deref(), Some("2025-03"));
        assert_eq!(normalize_period("2025-03-01T00:00:00").as_deref(), Some("2025-03"));
        assert_eq!(normalize_period("03/2025").as_deref(), Some("2025-03"));
        assert_eq!(normalize_period("2025/03").as_deref(), Some("2025-03"));
        assert_eq!(normalize_period("2025-13"), None);
        assert_eq!(normalize_period("mars 2025"), None);
        assert_eq!(normalize_period(""), None);
    }

    #[test]
    fn test_unrecognized_period_is_dropped() {
        let content = "Matricule,Compte,Montant,Période\nM1,C1,10,mars 2025\nM2,C2,10,2025-04-15\n";
        let sheet = normalize(content.as_bytes(), SheetFormat::Csv).unwrap();
        assert_eq!(sheet.records[0].period, None);
        assert_eq!(sheet.records[1].period.as_deref(), Some("2025-04"));
    }

    #[test]
    fn test_header_only_file_is_empty() {
        let result = normalize(HEADER.as_bytes(), SheetFormat::Csv);
        assert!(matches!(result, Err(PercError::EmptySheet)));
        assert!(matches!(normalize(b"", SheetFormat::Csv), Err(PercError::EmptySheet)));
    }

    #[test]
    fn test_rows_iterates_in_file_order() {
        let sheet = NormalizedSheet {
            records: vec![candidate(2), candidate(5)],
            parse_errors: vec![ParseError {
                line: 3,
                matricule: "UNKNOWN".into(),
                reason: "bad".into(),
                raw: BTreeMap::new(),
            }],
            stats: SheetStats { total: 3, valid: 2, errors: 1 },
        };
        let lines: Vec<usize> = sheet.rows().map(|r| r.line()).collect();
        assert_eq!(lines, vec![2, 3, 5]);
    }

    #[test]
    fn test_invalid_cell_becomes_parse_error() {
        let map = HeaderMap::resolve(vec!["Matricule".into(), "Compte".into(), "Montant".into()]);
        let cells = vec![
            Cell::Text("M1".into()),
            Cell::Text("C1".into()),
            Cell::Invalid("#REF!".into()),
        ];
        let err = normalize_row(&map, 7, &cells).unwrap_err();
        assert_eq!(err.line, 7);
        assert_eq!(err.matricule, "M1");
        assert!(err.reason.contains("Montant"));
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_workbook_first_sheet_cells_and_lines() {
        let bytes = include_bytes!("../tests/fixtures/cgf.xlsx");
        let sheet = normalize(bytes, SheetFormat::Xlsx).unwrap();
        assert_eq!(sheet.stats, SheetStats { total: 3, valid: 2, errors: 1 });

        // header on sheet row 2, a blank row 5, and the second sheet ignored
        let awa = &sheet.records[0];
        assert_eq!((awa.line, awa.matricule.as_str()), (3, "M1"));
        assert_eq!(awa.raw_amount, "1500");
        assert_eq!(awa.amount, "1500");
        assert_eq!(awa.period.as_deref(), Some("2025-02"));

        let binta = &sheet.records[1];
        assert_eq!(binta.line, 4);
        assert_eq!(binta.account_number, "2002");
        assert_eq!(binta.amount, "250.5");
        assert_eq!(binta.period.as_deref(), Some("2025-03"));
        assert_eq!(binta.raw.get("Période").map(String::as_str), Some("2025-03-01"));
        assert!(sheet.records.iter().all(|r| r.matricule != "M9"));

        let err = &sheet.parse_errors[0];
        assert_eq!((err.line, err.matricule.as_str()), (6, "M3"));
        assert!(err.reason.contains("Montant Versé"));
        assert!(err.reason.contains("#N/A"));
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_corrupt_workbook_is_a_file_level_error() {
        let result = normalize(b"definitely not a zip", SheetFormat::Xlsx);
        assert!(matches!(result, Err(PercError::Spreadsheet(_))));
    }

    #[test]
    fn test_excel_serial_to_date() {
        assert_eq!(excel_serial_to_date(45667.0), "2025-01-10");
    }

    fn candidate(line: usize) -> CandidateRecord {
        CandidateRecord {
            line,
            matricule: format!("M{line}"),
            account_number: format!("C{line}"),
            name: String::new(),
            org_unit: String::new(),
            email: String::new(),
            phone: String::new(),
            amount: "1".into(),
            raw_amount: "1".into(),
            period: None,
            raw: BTreeMap::new(),
        }
    }
}
