//! Bulk import of students and fees from spreadsheet rows.
//!
//! Two phases: `process_rows` is pure and turns raw text rows into typed
//! student/fee candidates (Arabic transportation vocabulary, grade
//! coercion, phone normalization, discount resolution); `persist` merges
//! the candidates into the store, deduplicating students on their
//! business number and remapping fees onto the surviving identifiers.
//! Persisting saves silently and notifies subscribers exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use shared::{
    fee_type_label, normalize_phone, SchoolSettings, Transportation, TransportationDirection,
    GRADE_LEVELS,
};
use uuid::Uuid;

use crate::domain::drafts::{FeeDraft, StudentDraft};
use crate::domain::local_store::LocalStore;

/// One spreadsheet row with every cell already mapped to its canonical
/// column. Absent and empty cells are both `None` by the time parsing
/// hands rows over.
#[derive(Debug, Clone, Default)]
pub struct ImportRow {
    pub name: Option<String>,
    pub student_number: Option<String>,
    pub grade: Option<String>,
    pub parent_name: Option<String>,
    pub phone: Option<String>,
    pub transportation: Option<String>,
    pub transportation_direction: Option<String>,
    pub transportation_fee: Option<String>,
    pub tuition_fee: Option<String>,
    pub tuition_discount: Option<String>,
    pub discount_percentage: Option<String>,
    pub fee_type: Option<String>,
    pub amount: Option<String>,
    pub discount: Option<String>,
    pub due_date: Option<String>,
}

/// A student candidate produced by `process_rows`. `temp_id` ties the
/// row's fees to it until `persist` assigns real identifiers.
#[derive(Debug, Clone)]
pub struct ImportedStudent {
    pub temp_id: String,
    pub name: String,
    pub student_number: String,
    pub grade: String,
    pub parent_name: String,
    pub phone: String,
    pub transportation: Transportation,
    pub transportation_direction: Option<TransportationDirection>,
    pub transportation_fee: Option<f64>,
    pub custom_transportation_fee: bool,
}

#[derive(Debug, Clone)]
pub struct ImportedFee {
    pub student_temp_id: String,
    /// Business number of the student this fee belongs to. Lets a fee
    /// row without a name attach to an already-imported student.
    pub student_number: String,
    pub fee_type: String,
    pub amount: f64,
    pub discount: f64,
    pub due_date: Option<NaiveDate>,
    pub transportation_type: Option<Transportation>,
}

#[derive(Debug, Clone)]
pub struct ProcessedImport {
    pub students: Vec<ImportedStudent>,
    pub fees: Vec<ImportedFee>,
    /// Rows dropped for carrying neither a name nor a student number.
    pub skipped_rows: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub students_created: usize,
    /// Rows whose student number matched an existing record; their fees
    /// attach to that record instead of creating a duplicate.
    pub students_merged: usize,
    /// Students whose save failed; their fees end up skipped too.
    pub students_skipped: usize,
    pub fees_created: usize,
    /// Fees whose student could not be resolved or whose save failed.
    pub fees_skipped: usize,
}

/// Numeric cell: tolerate thousands separators and surrounding space.
fn parse_amount(cell: Option<&String>) -> Option<f64> {
    let text = cell?.trim().replace(',', "");
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_due_date(cell: Option<&String>) -> Option<NaiveDate> {
    let text = cell?.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .ok()
}

/// Transportation cell vocabulary, Arabic and key forms.
fn parse_transportation(cell: Option<&String>) -> Transportation {
    let text = match cell {
        Some(text) => text.trim(),
        None => return Transportation::None,
    };
    if text.is_empty() {
        return Transportation::None;
    }
    if text.contains("اتجاهين") || text == "two-way" {
        Transportation::TwoWay
    } else if text.contains("اتجاه") || text == "one-way" {
        Transportation::OneWay
    } else {
        Transportation::None
    }
}

fn parse_direction(cell: Option<&String>) -> Option<TransportationDirection> {
    let text = cell?.trim();
    if text.contains("إلى المدرسة") || text.contains("الى المدرسة") || text == "to-school" {
        Some(TransportationDirection::ToSchool)
    } else if text.contains("من المدرسة") || text == "from-school" {
        Some(TransportationDirection::FromSchool)
    } else {
        None
    }
}

/// Fee type cell to canonical key; Arabic labels and keys both accepted.
fn parse_fee_type(cell: Option<&String>) -> String {
    let text = match cell {
        Some(text) => text.trim(),
        None => return "tuition".to_string(),
    };
    match text {
        "" | "رسوم دراسية" | "tuition" => "tuition",
        "نقل مدرسي" | "transportation" => "transportation",
        "أنشطة" | "activities" => "activities",
        "زي مدرسي" | "uniform" => "uniform",
        "كتب" | "books" => "books",
        _ => "other",
    }
    .to_string()
}

/// Resolve a discount. A positive percentage takes precedence over a
/// flat discount cell.
fn resolve_discount(amount: f64, flat: Option<f64>, percentage: Option<f64>) -> f64 {
    match percentage {
        Some(pct) if pct > 0.0 => amount * pct / 100.0,
        _ => flat.unwrap_or(0.0),
    }
}

fn coerce_grade(cell: Option<&String>) -> String {
    match cell.map(|g| g.trim()) {
        Some(grade) if GRADE_LEVELS.contains(&grade) => grade.to_string(),
        _ => GRADE_LEVELS[0].to_string(),
    }
}

fn generated_student_number() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("ST{}", suffix.to_uppercase())
}

/// Turn raw rows into student and fee candidates. Pure: no identifiers
/// are final and nothing touches storage. School defaults supply
/// transportation amounts when the sheet leaves them blank.
pub fn process_rows(rows: &[ImportRow], settings: &SchoolSettings) -> ProcessedImport {
    let mut students = Vec::new();
    let mut fees = Vec::new();
    let mut skipped_rows = 0;

    for (index, row) in rows.iter().enumerate() {
        let name = row.name.as_deref().map(str::trim).unwrap_or("");
        let number = row.student_number.as_deref().map(str::trim).unwrap_or("");
        if name.is_empty() && number.is_empty() {
            skipped_rows += 1;
            continue;
        }

        let temp_id = format!("import-{}", index + 1);
        let student_number = if number.is_empty() {
            generated_student_number()
        } else {
            number.to_string()
        };
        let transportation = parse_transportation(row.transportation.as_ref());
        let sheet_transport_fee = parse_amount(row.transportation_fee.as_ref());
        let transportation_fee = match transportation {
            Transportation::None => None,
            Transportation::OneWay => {
                Some(sheet_transport_fee.unwrap_or(settings.transportation_fee_one_way))
            }
            Transportation::TwoWay => {
                Some(sheet_transport_fee.unwrap_or(settings.transportation_fee_two_way))
            }
        };

        // Only named rows create students. A number-only row (the fee
        // template) just carries fees for a student imported elsewhere.
        if !name.is_empty() {
            students.push(ImportedStudent {
                temp_id: temp_id.clone(),
                name: name.to_string(),
                student_number: student_number.clone(),
                grade: coerce_grade(row.grade.as_ref()),
                parent_name: row
                    .parent_name
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .to_string(),
                phone: row
                    .phone
                    .as_deref()
                    .map(normalize_phone)
                    .unwrap_or_default(),
                transportation,
                // The direction may be its own column or embedded in the
                // transportation cell ("اتجاه واحد - إلى المدرسة").
                transportation_direction: if transportation == Transportation::OneWay {
                    parse_direction(row.transportation_direction.as_ref())
                        .or_else(|| parse_direction(row.transportation.as_ref()))
                } else {
                    None
                },
                transportation_fee,
                custom_transportation_fee: transportation != Transportation::None
                    && sheet_transport_fee.is_some(),
            });
        }

        let due_date = parse_due_date(row.due_date.as_ref());
        let percentage = parse_amount(row.discount_percentage.as_ref());

        let tuition_from_column = parse_amount(row.tuition_fee.as_ref());
        if let Some(tuition) = tuition_from_column {
            let flat = parse_amount(row.tuition_discount.as_ref())
                .or_else(|| parse_amount(row.discount.as_ref()));
            fees.push(ImportedFee {
                student_temp_id: temp_id.clone(),
                student_number: student_number.clone(),
                fee_type: "tuition".to_string(),
                amount: tuition,
                discount: resolve_discount(tuition, flat, percentage),
                due_date,
                transportation_type: None,
            });
        }

        // The generic amount column is independent of the tuition column:
        // one row can carry both a tuition fee and one other category.
        // Transportation amounts never come from here.
        if let Some(amount) = parse_amount(row.amount.as_ref()) {
            let kind = parse_fee_type(row.fee_type.as_ref());
            let flat = parse_amount(row.discount.as_ref());
            if kind == "tuition" {
                if tuition_from_column.is_none() {
                    fees.push(ImportedFee {
                        student_temp_id: temp_id.clone(),
                        student_number: student_number.clone(),
                        fee_type: "tuition".to_string(),
                        amount,
                        discount: resolve_discount(amount, flat, percentage),
                        due_date,
                        transportation_type: None,
                    });
                }
            } else if kind != "transportation" {
                fees.push(ImportedFee {
                    student_temp_id: temp_id.clone(),
                    student_number: student_number.clone(),
                    fee_type: kind,
                    amount,
                    discount: resolve_discount(amount, flat, percentage),
                    due_date,
                    transportation_type: None,
                });
            }
        }

        if let Some(transport_amount) = transportation_fee {
            if transport_amount > 0.0 {
                fees.push(ImportedFee {
                    student_temp_id: temp_id,
                    student_number,
                    fee_type: "transportation".to_string(),
                    amount: transport_amount,
                    discount: 0.0,
                    due_date,
                    transportation_type: Some(transportation),
                });
            }
        }
    }

    debug!(
        "Processed {} row(s): {} student(s), {} fee(s), {} skipped",
        rows.len(),
        students.len(),
        fees.len(),
        skipped_rows
    );
    ProcessedImport {
        students,
        fees,
        skipped_rows,
    }
}

pub struct ImportMerger {
    store: Arc<LocalStore>,
}

impl ImportMerger {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Merge processed candidates into the store for one school.
    ///
    /// Students are keyed by business number: a candidate whose number
    /// already exists in the school merges onto that record and its fees
    /// attach there. A record that fails to save is logged and skipped,
    /// never aborting the rest of the batch. All saves are silent; one
    /// notification fires at the end regardless of batch size.
    pub fn persist(&self, processed: ProcessedImport, school_id: &str) -> ImportCounts {
        let mut counts = ImportCounts::default();
        let mut by_number: HashMap<String, String> = self
            .store
            .get_students(Some(school_id), None)
            .into_iter()
            .map(|s| (s.student_number.clone(), s.id))
            .collect();
        let mut id_map: HashMap<String, String> = HashMap::new();

        for candidate in processed.students {
            if let Some(existing_id) = by_number.get(&candidate.student_number) {
                debug!(
                    "Student number {} already exists, merging",
                    candidate.student_number
                );
                id_map.insert(candidate.temp_id, existing_id.clone());
                counts.students_merged += 1;
                continue;
            }
            match self.store.save_student_quiet(StudentDraft {
                id: None,
                name: candidate.name.clone(),
                student_number: candidate.student_number.clone(),
                grade: candidate.grade,
                parent_name: candidate.parent_name,
                phone: candidate.phone,
                whatsapp: None,
                address: None,
                transportation: candidate.transportation,
                transportation_direction: candidate.transportation_direction,
                transportation_fee: candidate.transportation_fee,
                custom_transportation_fee: candidate.custom_transportation_fee,
                school_id: school_id.to_string(),
            }) {
                Ok(saved) => {
                    by_number.insert(candidate.student_number, saved.id.clone());
                    id_map.insert(candidate.temp_id, saved.id);
                    counts.students_created += 1;
                }
                Err(e) => {
                    warn!("Failed to import student {}: {}", candidate.name, e);
                    counts.students_skipped += 1;
                }
            }
        }

        let today = Utc::now().date_naive();
        for fee in processed.fees {
            // Temp-id mapping covers fees from the row that created the
            // student; the number fallback attaches fees from number-only
            // rows to a student imported earlier.
            let resolved = id_map
                .get(&fee.student_temp_id)
                .or_else(|| by_number.get(&fee.student_number))
                .cloned();
            let Some(student_id) = resolved else {
                warn!(
                    "Skipping imported fee: unresolved student number {}",
                    fee.student_number
                );
                counts.fees_skipped += 1;
                continue;
            };
            match self.store.save_fee_quiet(FeeDraft {
                id: None,
                student_id,
                fee_type: fee.fee_type.clone(),
                description: Some(fee_type_label(&fee.fee_type).to_string()),
                amount: fee.amount,
                discount: fee.discount,
                paid: 0.0,
                due_date: fee.due_date.unwrap_or(today),
                school_id: school_id.to_string(),
                transportation_type: fee.transportation_type,
            }) {
                Ok(_) => counts.fees_created += 1,
                Err(e) => {
                    warn!("Failed to import {} fee: {}", fee.fee_type, e);
                    counts.fees_skipped += 1;
                }
            }
        }

        info!(
            "Import merged: {} student(s) created, {} merged, {} skipped, {} fee(s) created, {} skipped",
            counts.students_created,
            counts.students_merged,
            counts.students_skipped,
            counts.fees_created,
            counts.fees_skipped
        );
        self.store.notify_listeners();
        counts
    }
}
