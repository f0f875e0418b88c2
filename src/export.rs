// Spreadsheet export of a column projection of a survey table

use rust_xlsxwriter::{Format, Workbook};

use crate::error::{ExportError, SchemaError};
use crate::models::{CellValue, SurveyTable};

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CSV_MIME: &str = "text/csv; charset=utf-8";

// Requested columns, in requested order, all of which must exist
fn project<'a>(table: &SurveyTable, columns: &'a [String]) -> Result<&'a [String], SchemaError> {
    let missing: Vec<String> = columns
        .iter()
        .filter(|c| !table.has_column(c))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns { columns: missing });
    }
    Ok(columns)
}

// Writes a single-sheet XLSX workbook: one header row, then one row per record.
// Text stays text, numbers are numeric cells and missing values are left
// blank. A table without rows still produces the header.
pub fn export(table: &SurveyTable, columns: &[String]) -> Result<Vec<u8>, ExportError> {
    let columns = project(table, columns)?;

    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();

    for (c, name) in columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col_index(c)?, name, &header)?;
    }

    for (r, row) in table.iter().enumerate() {
        let xr = row_index(r + 1)?;
        for (c, name) in columns.iter().enumerate() {
            let xc = col_index(c)?;
            match row.get(name).unwrap_or(&CellValue::Missing) {
                CellValue::Missing => {}
                CellValue::Bool(b) => {
                    worksheet.write_boolean(xr, xc, *b)?;
                }
                CellValue::Number(n) => {
                    worksheet.write_number(xr, xc, *n)?;
                }
                CellValue::Text(s) => {
                    worksheet.write_string(xr, xc, s)?;
                }
            }
        }
    }

    let bytes = workbook.save_to_buffer()?;
    tracing::info!(rows = table.len(), columns = columns.len(), bytes = bytes.len(), "Exported workbook");
    Ok(bytes)
}

// Same projection rules as `export`, written as CSV
pub fn export_csv(table: &SurveyTable, columns: &[String]) -> Result<Vec<u8>, ExportError> {
    let columns = project(table, columns)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in table.iter() {
        writer.write_record(columns.iter().map(|c| row.display(c)))?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    tracing::info!(rows = table.len(), columns = columns.len(), bytes = bytes.len(), "Exported csv");
    Ok(bytes)
}

fn row_index(r: usize) -> Result<u32, ExportError> {
    u32::try_from(r).map_err(|_| ExportError::TooLarge { what: "row", index: r })
}

fn col_index(c: usize) -> Result<u16, ExportError> {
    u16::try_from(c).map_err(|_| ExportError::TooLarge { what: "column", index: c })
}
