use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grade levels for the Oman school system, KG1 first.
///
/// Import coerces unknown grades to the first entry, so ordering matters.
pub const GRADE_LEVELS: [&str; 14] = [
    "الروضة الأولى KG1",
    "التمهيدي KG2",
    "الصف الأول",
    "الصف الثاني",
    "الصف الثالث",
    "الصف الرابع",
    "الصف الخامس",
    "الصف السادس",
    "الصف السابع",
    "الصف الثامن",
    "الصف التاسع",
    "الصف العاشر",
    "الصف الحادي عشر",
    "الصف الثاني عشر",
];

/// Country calling prefix used when normalizing parent phone numbers.
pub const PHONE_PREFIX: &str = "+968";

/// Normalize a parent phone number for WhatsApp delivery.
///
/// Strips spaces, dashes and parentheses, converts a `00` international
/// prefix to `+`, and prefixes bare local numbers with the Oman country
/// code.
pub fn normalize_phone(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    if cleaned.is_empty() || cleaned.starts_with('+') {
        return cleaned;
    }
    if let Some(rest) = cleaned.strip_prefix("00") {
        return format!("+{rest}");
    }
    if cleaned.starts_with("968") {
        return format!("+{cleaned}");
    }
    format!("{PHONE_PREFIX}{cleaned}")
}

/// Arabic display label for a fee type key. Unknown keys pass through.
pub fn fee_type_label(fee_type: &str) -> &str {
    match fee_type {
        "tuition" => "رسوم دراسية",
        "transportation" => "نقل مدرسي",
        "activities" => "أنشطة",
        "uniform" => "زي مدرسي",
        "books" => "كتب",
        "other" => "رسوم أخرى",
        other => other,
    }
}

/// A school record. Deleting a school never cascades to its students.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
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

/// Role attached to a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRole {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "schoolAdmin")]
    SchoolAdmin,
    #[serde(rename = "gradeManager")]
    GradeManager,
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountRole::Admin => "admin",
            AccountRole::SchoolAdmin => "schoolAdmin",
            AccountRole::GradeManager => "gradeManager",
        };
        write!(f, "{s}")
    }
}

/// A user account.
///
/// Email and username must each be unique across the account set; the
/// remote store's indexes enforce this on create. The password is
/// write-only: it is kept in the local cache for offline login but is
/// never part of a remote document, and is omitted from JSON when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub role: AccountRole,
    #[serde(default)]
    pub school_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_logo: Option<String>,
    /// Only meaningful when `role` is `GradeManager`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_levels: Option<Vec<String>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

/// Transportation service subscribed for a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Transportation {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "one-way")]
    OneWay,
    #[serde(rename = "two-way")]
    TwoWay,
}

/// Direction of a one-way transportation subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportationDirection {
    #[serde(rename = "to-school")]
    ToSchool,
    #[serde(rename = "from-school")]
    FromSchool,
}

/// A student record.
///
/// `student_number` is the human-assigned business key, unique within a
/// school and distinct from the storage `id`; import deduplicates on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(rename = "studentId")]
    pub student_number: String,
    pub grade: String,
    pub parent_name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub transportation: Transportation,
    /// Only meaningful when `transportation` is `OneWay`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transportation_direction: Option<TransportationDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transportation_fee: Option<f64>,
    #[serde(default)]
    pub custom_transportation_fee: bool,
    pub school_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settlement state of a fee, derived from its numbers at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeStatus {
    #[serde(rename = "paid")]
    Paid,
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "unpaid")]
    Unpaid,
}

impl FeeStatus {
    /// Derive status from a fee's balance and paid amount.
    ///
    /// balance <= 0 means settled; any payment against a remaining
    /// balance is partial; otherwise nothing has been paid yet.
    pub fn derive(balance: f64, paid: f64) -> FeeStatus {
        if balance <= 0.0 {
            FeeStatus::Paid
        } else if paid > 0.0 {
            FeeStatus::Partial
        } else {
            FeeStatus::Unpaid
        }
    }
}

/// Balance owed on a fee: amount less discount less payments.
pub fn fee_balance(amount: f64, discount: f64, paid: f64) -> f64 {
    amount - discount - paid
}

/// A fee owed by a student.
///
/// `student_name` and `grade` are captured from the student at creation
/// for display stability. `balance` and `status` are derived fields and
/// are recomputed on every save; values supplied by callers are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fee {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub grade: String,
    pub fee_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub amount: f64,
    pub discount: f64,
    pub paid: f64,
    pub balance: f64,
    pub status: FeeStatus,
    pub due_date: NaiveDate,
    pub school_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transportation_type: Option<Transportation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment state of an installment.
///
/// Unlike `FeeStatus` this depends on wall-clock time, so it is derived
/// again on every read rather than trusted from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentStatus {
    #[serde(rename = "paid")]
    Paid,
    #[serde(rename = "upcoming")]
    Upcoming,
    #[serde(rename = "overdue")]
    Overdue,
}

impl InstallmentStatus {
    /// Derive status as of `today`. A due date equal to `today` is still
    /// upcoming; only dates strictly in the past are overdue.
    pub fn derive(paid_date: Option<NaiveDate>, due_date: NaiveDate, today: NaiveDate) -> Self {
        if paid_date.is_some() {
            InstallmentStatus::Paid
        } else if due_date < today {
            InstallmentStatus::Overdue
        } else {
            InstallmentStatus::Upcoming
        }
    }
}

/// One installment of a fee's payment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    pub id: String,
    pub fee_id: String,
    pub student_id: String,
    pub student_name: String,
    pub grade: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub status: InstallmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub school_id: String,
    pub fee_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Installment {
    /// Status of this installment as of `today`.
    pub fn status_on(&self, today: NaiveDate) -> InstallmentStatus {
        InstallmentStatus::derive(self.paid_date, self.due_date, today)
    }
}

/// Delivery outcome of a parent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    #[serde(rename = "delivered")]
    Delivered,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "pending")]
    Pending,
}

/// A WhatsApp message sent to a parent. Append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub grade: String,
    pub parent_name: String,
    pub phone: String,
    pub template: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub school_id: String,
}

/// Per-school configuration, lazily created with defaults on first read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSettings {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub logo: String,
    pub default_installments: u32,
    pub tuition_fee_category: String,
    pub transportation_fee_one_way: f64,
    pub transportation_fee_two_way: f64,
}

impl Default for SchoolSettings {
    fn default() -> Self {
        Self {
            name: "المدرسة".to_string(),
            email: String::new(),
            phone: String::new(),
            address: String::new(),
            logo: String::new(),
            default_installments: 4,
            tuition_fee_category: "رسوم دراسية".to_string(),
            transportation_fee_one_way: 150.0,
            transportation_fee_two_way: 300.0,
        }
    }
}

impl SchoolSettings {
    /// Defaults seeded from a known school's contact fields.
    pub fn for_school(school: &School) -> Self {
        Self {
            name: school.name.clone(),
            email: school.email.clone(),
            phone: school.phone.clone(),
            address: school.address.clone(),
            logo: school.logo.clone(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_status_settled_when_balance_zero() {
        let balance = fee_balance(1000.0, 100.0, 900.0);
        assert_eq!(balance, 0.0);
        assert_eq!(FeeStatus::derive(balance, 900.0), FeeStatus::Paid);
    }

    #[test]
    fn fee_status_partial_when_some_paid() {
        let balance = fee_balance(1000.0, 0.0, 400.0);
        assert_eq!(balance, 600.0);
        assert_eq!(FeeStatus::derive(balance, 400.0), FeeStatus::Partial);
    }

    #[test]
    fn fee_status_unpaid_when_nothing_paid() {
        let balance = fee_balance(1000.0, 0.0, 0.0);
        assert_eq!(FeeStatus::derive(balance, 0.0), FeeStatus::Unpaid);
    }

    #[test]
    fn fee_status_paid_when_overpaid() {
        let balance = fee_balance(500.0, 100.0, 450.0);
        assert!(balance < 0.0);
        assert_eq!(FeeStatus::derive(balance, 450.0), FeeStatus::Paid);
    }

    #[test]
    fn installment_status_follows_due_date() {
        let today = NaiveDate::from_ymd_opt(2024, 9, 15).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 9, 14).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2024, 9, 16).unwrap();

        assert_eq!(
            InstallmentStatus::derive(None, yesterday, today),
            InstallmentStatus::Overdue
        );
        assert_eq!(
            InstallmentStatus::derive(None, tomorrow, today),
            InstallmentStatus::Upcoming
        );
        // Due today is not yet overdue.
        assert_eq!(
            InstallmentStatus::derive(None, today, today),
            InstallmentStatus::Upcoming
        );
        // A paid date wins regardless of the due date.
        assert_eq!(
            InstallmentStatus::derive(Some(today), yesterday, today),
            InstallmentStatus::Paid
        );
    }

    #[test]
    fn phone_normalization_targets_the_oman_prefix() {
        assert_eq!(normalize_phone("95 123-456"), "+96895123456");
        assert_eq!(normalize_phone("96895123456"), "+96895123456");
        assert_eq!(normalize_phone("0096895123456"), "+96895123456");
        assert_eq!(normalize_phone("+96895123456"), "+96895123456");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn account_password_never_serialized_when_absent() {
        let account = Account {
            id: "a1".to_string(),
            name: "Admin".to_string(),
            email: "admin@school.om".to_string(),
            username: "admin".to_string(),
            password: None,
            role: AccountRole::Admin,
            school_id: String::new(),
            school_name: None,
            school_logo: None,
            grade_levels: None,
            last_login: None,
        };
        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("password"));
        assert!(json.contains("\"role\":\"admin\""));
    }

    #[test]
    fn transportation_serde_uses_kebab_names() {
        assert_eq!(
            serde_json::to_string(&Transportation::TwoWay).unwrap(),
            "\"two-way\""
        );
        let parsed: Transportation = serde_json::from_str("\"one-way\"").unwrap();
        assert_eq!(parsed, Transportation::OneWay);
    }
}
