//! Input shapes for `LocalStore` save operations.
//!
//! A draft with no `id` creates a record (the store assigns the id and
//! timestamps); a draft with an `id` merges onto the stored record and
//! stamps `updated_at`. Derived fields (fee balance/status, installment
//! status) are never part of a draft — the store computes them.

use chrono::{DateTime, NaiveDate, Utc};
use shared::{AccountRole, Transportation, TransportationDirection};

#[derive(Debug, Clone, Default)]
pub struct SchoolDraft {
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub location: String,
    pub active: bool,
    pub subscription_start: String,
    pub subscription_end: String,
    pub logo: String,
}

#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub username: String,
    /// `None` on update keeps the stored password.
    pub password: Option<String>,
    pub role: AccountRole,
    pub school_id: String,
    pub grade_levels: Option<Vec<String>>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StudentDraft {
    pub id: Option<String>,
    pub name: String,
    pub student_number: String,
    pub grade: String,
    pub parent_name: String,
    pub phone: String,
    pub whatsapp: Option<String>,
    pub address: Option<String>,
    pub transportation: Transportation,
    pub transportation_direction: Option<TransportationDirection>,
    pub transportation_fee: Option<f64>,
    pub custom_transportation_fee: bool,
    pub school_id: String,
}

#[derive(Debug, Clone)]
pub struct FeeDraft {
    pub id: Option<String>,
    /// Resolved internal student id. Creation fails when it is unknown;
    /// the student's name and grade are captured from it.
    pub student_id: String,
    pub fee_type: String,
    pub description: Option<String>,
    pub amount: f64,
    pub discount: f64,
    pub paid: f64,
    pub due_date: NaiveDate,
    pub school_id: String,
    pub transportation_type: Option<Transportation>,
}

#[derive(Debug, Clone)]
pub struct InstallmentDraft {
    pub id: Option<String>,
    pub fee_id: String,
    pub student_id: String,
    /// Looked up from the student when absent on create.
    pub student_name: Option<String>,
    pub grade: Option<String>,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub note: Option<String>,
    pub school_id: String,
    pub fee_type: String,
}

#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub student_id: String,
    pub student_name: String,
    pub grade: String,
    pub parent_name: String,
    pub phone: String,
    pub template: String,
    pub message: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: shared::MessageStatus,
    pub school_id: String,
}
