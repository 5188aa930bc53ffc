//! CSV parsing for bulk import, plus downloadable templates.
//!
//! Sheets arrive with Arabic headers (the templates) or the canonical
//! key names; both map to the same columns. Files exported from Excel
//! usually open with a UTF-8 BOM, which is tolerated on parse and
//! emitted on the templates so Excel renders the Arabic headers.

use csv::ReaderBuilder;
use log::debug;

use crate::domain::import_service::ImportRow;

const BOM: &str = "\u{FEFF}";

/// Map a header cell to its canonical column, or `None` for columns the
/// import does not understand (they are ignored, not an error).
fn canonical_column(header: &str) -> Option<&'static str> {
    match header.trim().trim_start_matches('\u{FEFF}') {
        "اسم الطالب" | "الاسم" | "name" => Some("name"),
        "رقم الطالب" | "studentId" => Some("studentId"),
        "الصف" | "grade" => Some("grade"),
        "اسم ولي الأمر" | "ولي الأمر" | "parentName" => Some("parentName"),
        "رقم الهاتف" | "الهاتف" | "phone" => Some("phone"),
        "النقل" | "المواصلات" | "transportation" => Some("transportation"),
        "اتجاه النقل" | "direction" => Some("direction"),
        "رسوم النقل" | "transportationFee" => Some("transportationFee"),
        "الرسوم الدراسية" | "tuitionFee" => Some("tuitionFee"),
        "خصم الرسوم الدراسية" | "tuitionDiscount" => Some("tuitionDiscount"),
        "نسبة الخصم %" | "نسبة الخصم" | "discountPercentage" => {
            Some("discountPercentage")
        }
        "نوع الرسوم" | "feeType" => Some("feeType"),
        "المبلغ" | "amount" => Some("amount"),
        "الخصم" | "discount" => Some("discount"),
        "تاريخ الاستحقاق" | "dueDate" => Some("dueDate"),
        _ => None,
    }
}

fn assign(row: &mut ImportRow, column: &str, value: String) {
    let value = Some(value);
    match column {
        "name" => row.name = value,
        "studentId" => row.student_number = value,
        "grade" => row.grade = value,
        "parentName" => row.parent_name = value,
        "phone" => row.phone = value,
        "transportation" => row.transportation = value,
        "direction" => row.transportation_direction = value,
        "transportationFee" => row.transportation_fee = value,
        "tuitionFee" => row.tuition_fee = value,
        "tuitionDiscount" => row.tuition_discount = value,
        "discountPercentage" => row.discount_percentage = value,
        "feeType" => row.fee_type = value,
        "amount" => row.amount = value,
        "discount" => row.discount = value,
        "dueDate" => row.due_date = value,
        _ => {}
    }
}

/// Parse CSV text into import rows. Headers decide the column mapping;
/// unknown columns and empty cells are skipped. Rows may be ragged.
pub fn parse_rows(input: &str) -> Result<Vec<ImportRow>, csv::Error> {
    let input = input.strip_prefix(BOM).unwrap_or(input);
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let columns: Vec<Option<&'static str>> = reader
        .headers()?
        .iter()
        .map(canonical_column)
        .collect();
    debug!(
        "CSV import: {} recognized column(s) of {}",
        columns.iter().flatten().count(),
        columns.len()
    );

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = ImportRow::default();
        for (index, cell) in record.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            if let Some(Some(column)) = columns.get(index) {
                assign(&mut row, column, cell.to_string());
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Template sheet for student import, with one example row.
pub fn student_template() -> String {
    format!(
        "{BOM}اسم الطالب,رقم الطالب,الصف,اسم ولي الأمر,رقم الهاتف,النقل,اتجاه النقل,رسوم النقل,الرسوم الدراسية,خصم الرسوم الدراسية,نسبة الخصم %\n\
         أحمد سالم,S1001,الصف الأول,سالم أحمد,95123456,اتجاهين,,300,1000,0,0\n"
    )
}

/// Template sheet for standalone fee import.
pub fn fee_template() -> String {
    format!(
        "{BOM}رقم الطالب,نوع الرسوم,المبلغ,الخصم,نسبة الخصم %,تاريخ الاستحقاق\n\
         S1001,رسوم دراسية,1000,0,0,2025-09-01\n"
    )
}
