//! The local datastore: authoritative CRUD for every entity except
//! authentication identity.
//!
//! One JSON collection per entity type, rewritten wholesale on each
//! mutation under the collection's lock. Fee balance/status is computed
//! at write time (it only depends on stored numbers); installment status
//! is recomputed on every read because it depends on the calendar.
//! Subscribers are notified synchronously after each successful mutation,
//! in subscription order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Months, Utc};
use log::{debug, info, warn};
use shared::{
    fee_balance, fee_type_label, Account, Fee, FeeStatus, Installment, InstallmentStatus, Message,
    School, SchoolSettings, Student,
};
use uuid::Uuid;

use crate::domain::drafts::{
    AccountDraft, FeeDraft, InstallmentDraft, MessageDraft, SchoolDraft, StudentDraft,
};
use crate::domain::errors::StoreError;
use crate::storage::JsonConnection;

const SCHOOLS: &str = "schools";
const ACCOUNTS: &str = "accounts";
const STUDENTS: &str = "students";
const FEES: &str = "fees";
const INSTALLMENTS: &str = "installments";
const MESSAGES: &str = "messages";

fn settings_key(school_id: &str) -> String {
    format!("settings_{school_id}")
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub type Listener = Box<dyn Fn() + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

pub struct LocalStore {
    connection: Arc<JsonConnection>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_subscription: AtomicU64,
}

impl LocalStore {
    pub fn new(connection: Arc<JsonConnection>) -> Self {
        Self {
            connection,
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    // --- subscriptions -------------------------------------------------

    /// Register a callback invoked after every successful mutation across
    /// any entity type. Coarse-grained: no entity scoping, no debouncing.
    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, listener));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != subscription.0);
    }

    /// Invoke all listeners in subscription order. Public so batch
    /// callers (import) can save silently and notify once.
    pub fn notify_listeners(&self) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener();
        }
    }

    // --- schools -------------------------------------------------------

    pub fn get_schools(&self) -> Vec<School> {
        self.connection.read(SCHOOLS)
    }

    pub fn get_school(&self, id: &str) -> Option<School> {
        self.get_schools().into_iter().find(|s| s.id == id)
    }

    pub fn save_school(&self, draft: SchoolDraft) -> Result<School, StoreError> {
        let lock = self.connection.collection_lock(SCHOOLS);
        let _guard = lock.lock().unwrap();

        let mut schools: Vec<School> = self.connection.read(SCHOOLS);
        let school = match draft.id {
            Some(id) => {
                let existing = schools
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| StoreError::not_found("school", id.clone()))?;
                existing.name = draft.name;
                existing.email = draft.email;
                existing.phone = draft.phone;
                existing.address = draft.address;
                existing.location = draft.location;
                existing.active = draft.active;
                existing.subscription_start = draft.subscription_start;
                existing.subscription_end = draft.subscription_end;
                existing.logo = draft.logo;
                existing.clone()
            }
            None => {
                let school = School {
                    id: new_id(),
                    name: draft.name,
                    email: draft.email,
                    phone: draft.phone,
                    address: draft.address,
                    location: draft.location,
                    active: draft.active,
                    subscription_start: draft.subscription_start,
                    subscription_end: draft.subscription_end,
                    logo: draft.logo,
                };
                schools.push(school.clone());
                school
            }
        };
        self.connection.write(SCHOOLS, &schools)?;
        drop(_guard);
        self.notify_listeners();
        Ok(school)
    }

    /// Hard delete. Students referencing the school are left orphaned.
    pub fn delete_school(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.connection.collection_lock(SCHOOLS);
        let _guard = lock.lock().unwrap();
        let mut schools: Vec<School> = self.connection.read(SCHOOLS);
        schools.retain(|s| s.id != id);
        self.connection.write(SCHOOLS, &schools)?;
        drop(_guard);
        self.notify_listeners();
        Ok(())
    }

    // --- accounts ------------------------------------------------------

    pub fn get_accounts(&self, school_id: Option<&str>) -> Vec<Account> {
        let accounts: Vec<Account> = self.connection.read(ACCOUNTS);
        match school_id {
            Some(school_id) => accounts
                .into_iter()
                .filter(|a| a.school_id == school_id)
                .collect(),
            None => accounts,
        }
    }

    pub fn get_account(&self, id: &str) -> Option<Account> {
        self.get_accounts(None).into_iter().find(|a| a.id == id)
    }

    /// Save a locally cached account. A draft without an id gets a
    /// local-only identifier pending reconciliation; `save_account_with_id`
    /// caches a record under a remote-assigned identifier instead.
    pub fn save_account(&self, draft: AccountDraft) -> Result<Account, StoreError> {
        self.save_account_inner(draft, None)
    }

    pub fn save_account_with_id(
        &self,
        id: &str,
        draft: AccountDraft,
    ) -> Result<Account, StoreError> {
        self.save_account_inner(draft, Some(id.to_string()))
    }

    fn save_account_inner(
        &self,
        draft: AccountDraft,
        assigned_id: Option<String>,
    ) -> Result<Account, StoreError> {
        // School name and logo are denormalized onto the account.
        let school = if draft.school_id.is_empty() {
            None
        } else {
            self.get_school(&draft.school_id)
        };

        let lock = self.connection.collection_lock(ACCOUNTS);
        let _guard = lock.lock().unwrap();
        let mut accounts: Vec<Account> = self.connection.read(ACCOUNTS);

        let account = match draft.id {
            Some(id) => {
                let existing = accounts
                    .iter_mut()
                    .find(|a| a.id == id)
                    .ok_or_else(|| StoreError::not_found("account", id.clone()))?;
                existing.name = draft.name;
                existing.email = draft.email;
                existing.username = draft.username;
                // Keep the stored password when the draft omits one.
                if draft.password.is_some() {
                    existing.password = draft.password;
                }
                existing.role = draft.role;
                existing.school_id = draft.school_id;
                existing.school_name = school.as_ref().map(|s| s.name.clone());
                existing.school_logo = school.as_ref().map(|s| s.logo.clone());
                existing.grade_levels = draft.grade_levels;
                if draft.last_login.is_some() {
                    existing.last_login = draft.last_login;
                }
                existing.clone()
            }
            None => {
                let account = Account {
                    id: assigned_id.unwrap_or_else(new_id),
                    name: draft.name,
                    email: draft.email,
                    username: draft.username,
                    password: draft.password,
                    role: draft.role,
                    school_id: draft.school_id,
                    school_name: school.as_ref().map(|s| s.name.clone()),
                    school_logo: school.as_ref().map(|s| s.logo.clone()),
                    grade_levels: draft.grade_levels,
                    last_login: draft.last_login,
                };
                accounts.push(account.clone());
                account
            }
        };
        self.connection.write(ACCOUNTS, &accounts)?;
        drop(_guard);
        self.notify_listeners();
        Ok(account)
    }

    /// Overwrite the whole account cache in one write. Reconciliation uses
    /// this so pulling N remote accounts costs one local write and one
    /// notification.
    pub fn replace_accounts(&self, accounts: Vec<Account>) -> Result<(), StoreError> {
        let lock = self.connection.collection_lock(ACCOUNTS);
        let _guard = lock.lock().unwrap();
        self.connection.write(ACCOUNTS, &accounts)?;
        drop(_guard);
        self.notify_listeners();
        Ok(())
    }

    pub fn delete_account(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.connection.collection_lock(ACCOUNTS);
        let _guard = lock.lock().unwrap();
        let mut accounts: Vec<Account> = self.connection.read(ACCOUNTS);
        accounts.retain(|a| a.id != id);
        self.connection.write(ACCOUNTS, &accounts)?;
        drop(_guard);
        self.notify_listeners();
        Ok(())
    }

    // --- students ------------------------------------------------------

    pub fn get_students(&self, school_id: Option<&str>, grades: Option<&[String]>) -> Vec<Student> {
        let students: Vec<Student> = self.connection.read(STUDENTS);
        students
            .into_iter()
            .filter(|s| school_id.is_none_or(|id| s.school_id == id))
            .filter(|s| grades.is_none_or(|g| g.iter().any(|grade| *grade == s.grade)))
            .collect()
    }

    pub fn get_student(&self, id: &str) -> Option<Student> {
        let students: Vec<Student> = self.connection.read(STUDENTS);
        students.into_iter().find(|s| s.id == id)
    }

    pub fn save_student(&self, draft: StudentDraft) -> Result<Student, StoreError> {
        let student = self.save_student_quiet(draft)?;
        self.notify_listeners();
        Ok(student)
    }

    /// Save without notifying; import batches notify once at the end.
    pub(crate) fn save_student_quiet(&self, draft: StudentDraft) -> Result<Student, StoreError> {
        let lock = self.connection.collection_lock(STUDENTS);
        let _guard = lock.lock().unwrap();
        let mut students: Vec<Student> = self.connection.read(STUDENTS);
        let now = Utc::now();

        let student = match draft.id {
            Some(id) => {
                let existing = students
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| StoreError::not_found("student", id.clone()))?;
                existing.name = draft.name;
                existing.student_number = draft.student_number;
                existing.grade = draft.grade;
                existing.parent_name = draft.parent_name;
                existing.phone = draft.phone;
                existing.whatsapp = draft.whatsapp;
                existing.address = draft.address;
                existing.transportation = draft.transportation;
                existing.transportation_direction = draft.transportation_direction;
                existing.transportation_fee = draft.transportation_fee;
                existing.custom_transportation_fee = draft.custom_transportation_fee;
                existing.school_id = draft.school_id;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let student = Student {
                    id: new_id(),
                    name: draft.name,
                    student_number: draft.student_number,
                    grade: draft.grade,
                    parent_name: draft.parent_name,
                    phone: draft.phone,
                    whatsapp: draft.whatsapp,
                    address: draft.address,
                    transportation: draft.transportation,
                    transportation_direction: draft.transportation_direction,
                    transportation_fee: draft.transportation_fee,
                    custom_transportation_fee: draft.custom_transportation_fee,
                    school_id: draft.school_id,
                    created_at: now,
                    updated_at: now,
                };
                students.push(student.clone());
                student
            }
        };
        self.connection.write(STUDENTS, &students)?;
        debug!("Saved student {} ({})", student.name, student.id);
        Ok(student)
    }

    /// Hard delete. Fees referencing the student are left orphaned.
    pub fn delete_student(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.connection.collection_lock(STUDENTS);
        let _guard = lock.lock().unwrap();
        let mut students: Vec<Student> = self.connection.read(STUDENTS);
        students.retain(|s| s.id != id);
        self.connection.write(STUDENTS, &students)?;
        drop(_guard);
        self.notify_listeners();
        Ok(())
    }

    /// Generate a business student number: two characters of the school
    /// id, first and last character of the grade label, four digits.
    pub fn generate_student_number(&self, school_id: &str, grade: &str) -> String {
        let school_code: String = school_id.chars().take(2).collect();
        let grade_code = match (grade.chars().next(), grade.chars().last()) {
            (Some(first), Some(last)) => format!("{first}{last}"),
            _ => "XX".to_string(),
        };
        let serial = 1000 + (Uuid::new_v4().as_u128() % 9000) as u32;
        format!("{school_code}{grade_code}{serial}")
    }

    // --- fees ----------------------------------------------------------

    pub fn get_fees(
        &self,
        school_id: Option<&str>,
        student_id: Option<&str>,
        grades: Option<&[String]>,
    ) -> Vec<Fee> {
        let fees: Vec<Fee> = self.connection.read(FEES);
        fees.into_iter()
            .filter(|f| school_id.is_none_or(|id| f.school_id == id))
            .filter(|f| student_id.is_none_or(|id| f.student_id == id))
            .filter(|f| grades.is_none_or(|g| g.iter().any(|grade| *grade == f.grade)))
            .collect()
    }

    pub fn get_fee(&self, id: &str) -> Option<Fee> {
        let fees: Vec<Fee> = self.connection.read(FEES);
        fees.into_iter().find(|f| f.id == id)
    }

    pub fn save_fee(&self, draft: FeeDraft) -> Result<Fee, StoreError> {
        let fee = self.save_fee_quiet(draft)?;
        self.notify_listeners();
        Ok(fee)
    }

    /// Save without notifying. Balance and status are always recomputed
    /// from amount/discount/paid; drafts cannot carry either.
    pub(crate) fn save_fee_quiet(&self, draft: FeeDraft) -> Result<Fee, StoreError> {
        let balance = fee_balance(draft.amount, draft.discount, draft.paid);
        let status = FeeStatus::derive(balance, draft.paid);

        let lock = self.connection.collection_lock(FEES);
        let _guard = lock.lock().unwrap();
        let mut fees: Vec<Fee> = self.connection.read(FEES);
        let now = Utc::now();

        let fee = match draft.id {
            Some(id) => {
                let existing = fees
                    .iter_mut()
                    .find(|f| f.id == id)
                    .ok_or_else(|| StoreError::not_found("fee", id.clone()))?;
                existing.fee_type = draft.fee_type;
                existing.description = draft.description;
                existing.amount = draft.amount;
                existing.discount = draft.discount;
                existing.paid = draft.paid;
                existing.balance = balance;
                existing.status = status;
                existing.due_date = draft.due_date;
                existing.transportation_type = draft.transportation_type;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                // Creation captures the student's name and grade for
                // display stability.
                let student = self
                    .get_student(&draft.student_id)
                    .ok_or_else(|| StoreError::not_found("student", draft.student_id.clone()))?;
                let fee = Fee {
                    id: new_id(),
                    student_id: student.id.clone(),
                    student_name: student.name.clone(),
                    grade: student.grade.clone(),
                    fee_type: draft.fee_type,
                    description: draft.description,
                    amount: draft.amount,
                    discount: draft.discount,
                    paid: draft.paid,
                    balance,
                    status,
                    due_date: draft.due_date,
                    school_id: draft.school_id,
                    transportation_type: draft.transportation_type,
                    created_at: now,
                    updated_at: now,
                };
                fees.push(fee.clone());
                fee
            }
        };
        self.connection.write(FEES, &fees)?;
        debug!(
            "Saved fee {} for {}: balance {} ({:?})",
            fee.id, fee.student_name, fee.balance, fee.status
        );
        Ok(fee)
    }

    pub fn delete_fee(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.connection.collection_lock(FEES);
        let _guard = lock.lock().unwrap();
        let mut fees: Vec<Fee> = self.connection.read(FEES);
        fees.retain(|f| f.id != id);
        self.connection.write(FEES, &fees)?;
        drop(_guard);
        self.notify_listeners();
        Ok(())
    }

    // --- installments --------------------------------------------------

    /// List installments with status derived as of today. The derivation
    /// happens on the returned copies; stored records are not rewritten.
    pub fn get_installments(
        &self,
        school_id: Option<&str>,
        student_id: Option<&str>,
        fee_id: Option<&str>,
        grades: Option<&[String]>,
    ) -> Vec<Installment> {
        let today = Utc::now().date_naive();
        let installments: Vec<Installment> = self.connection.read(INSTALLMENTS);
        installments
            .into_iter()
            .filter(|i| school_id.is_none_or(|id| i.school_id == id))
            .filter(|i| student_id.is_none_or(|id| i.student_id == id))
            .filter(|i| fee_id.is_none_or(|id| i.fee_id == id))
            .filter(|i| grades.is_none_or(|g| g.iter().any(|grade| *grade == i.grade)))
            .map(|mut i| {
                i.status = i.status_on(today);
                i
            })
            .collect()
    }

    pub fn get_installment(&self, id: &str) -> Option<Installment> {
        let today = Utc::now().date_naive();
        let installments: Vec<Installment> = self.connection.read(INSTALLMENTS);
        installments.into_iter().find(|i| i.id == id).map(|mut i| {
            i.status = i.status_on(today);
            i
        })
    }

    pub fn save_installment(&self, draft: InstallmentDraft) -> Result<Installment, StoreError> {
        let today = Utc::now().date_naive();
        let status = InstallmentStatus::derive(draft.paid_date, draft.due_date, today);

        // Fill denormalized student fields on create when missing.
        let looked_up = if draft.id.is_none()
            && (draft.student_name.is_none() || draft.grade.is_none())
        {
            self.get_student(&draft.student_id)
        } else {
            None
        };

        let lock = self.connection.collection_lock(INSTALLMENTS);
        let _guard = lock.lock().unwrap();
        let mut installments: Vec<Installment> = self.connection.read(INSTALLMENTS);
        let now = Utc::now();

        let installment = match draft.id {
            Some(id) => {
                let existing = installments
                    .iter_mut()
                    .find(|i| i.id == id)
                    .ok_or_else(|| StoreError::not_found("installment", id.clone()))?;
                existing.amount = draft.amount;
                existing.due_date = draft.due_date;
                existing.paid_date = draft.paid_date;
                existing.status = status;
                existing.note = draft.note;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let student_name = draft
                    .student_name
                    .or_else(|| looked_up.as_ref().map(|s| s.name.clone()))
                    .unwrap_or_default();
                let grade = draft
                    .grade
                    .or_else(|| looked_up.as_ref().map(|s| s.grade.clone()))
                    .unwrap_or_default();
                let installment = Installment {
                    id: new_id(),
                    fee_id: draft.fee_id,
                    student_id: draft.student_id,
                    student_name,
                    grade,
                    amount: draft.amount,
                    due_date: draft.due_date,
                    paid_date: draft.paid_date,
                    status,
                    note: draft.note,
                    school_id: draft.school_id,
                    fee_type: draft.fee_type,
                    created_at: now,
                    updated_at: now,
                };
                installments.push(installment.clone());
                installment
            }
        };
        self.connection.write(INSTALLMENTS, &installments)?;
        drop(_guard);
        self.notify_listeners();
        Ok(installment)
    }

    pub fn delete_installment(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.connection.collection_lock(INSTALLMENTS);
        let _guard = lock.lock().unwrap();
        let mut installments: Vec<Installment> = self.connection.read(INSTALLMENTS);
        installments.retain(|i| i.id != id);
        self.connection.write(INSTALLMENTS, &installments)?;
        drop(_guard);
        self.notify_listeners();
        Ok(())
    }

    /// Split a fee's discounted amount into `count` installments.
    ///
    /// The first installment absorbs the truncating-division remainder so
    /// the amounts sum exactly to `amount - discount`. Due dates start at
    /// the fee's due date and step by `interval_months`. Each installment
    /// is persisted through the normal save path, so subscribers see one
    /// notification per installment.
    pub fn create_installment_plan(
        &self,
        fee: &Fee,
        count: u32,
        interval_months: u32,
    ) -> Result<Vec<Installment>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let total = fee.amount - fee.discount;
        let base = (total / count as f64).trunc();
        let remainder = total - base * count as f64;

        info!(
            "Creating {count}-installment plan for fee {} (total {total})",
            fee.id
        );

        let mut created = Vec::with_capacity(count as usize);
        for index in 0..count {
            let amount = if index == 0 { base + remainder } else { base };
            let due_date = fee
                .due_date
                .checked_add_months(Months::new(index * interval_months))
                .unwrap_or(fee.due_date);
            let label = fee
                .description
                .clone()
                .unwrap_or_else(|| fee_type_label(&fee.fee_type).to_string());
            let draft = InstallmentDraft {
                id: None,
                fee_id: fee.id.clone(),
                student_id: fee.student_id.clone(),
                student_name: Some(fee.student_name.clone()),
                grade: Some(fee.grade.clone()),
                amount,
                due_date,
                paid_date: None,
                note: Some(format!("القسط {} من {count} - {label}", index + 1)),
                school_id: fee.school_id.clone(),
                fee_type: fee.fee_type.clone(),
            };
            created.push(self.save_installment(draft)?);
        }
        Ok(created)
    }

    // --- messages ------------------------------------------------------

    pub fn get_messages(&self, school_id: Option<&str>, student_id: Option<&str>) -> Vec<Message> {
        let messages: Vec<Message> = self.connection.read(MESSAGES);
        messages
            .into_iter()
            .filter(|m| school_id.is_none_or(|id| m.school_id == id))
            .filter(|m| student_id.is_none_or(|id| m.student_id == id))
            .collect()
    }

    /// Append a message to the history. Messages are never updated.
    pub fn save_message(&self, draft: MessageDraft) -> Result<Message, StoreError> {
        let lock = self.connection.collection_lock(MESSAGES);
        let _guard = lock.lock().unwrap();
        let mut messages: Vec<Message> = self.connection.read(MESSAGES);
        let message = Message {
            id: new_id(),
            student_id: draft.student_id,
            student_name: draft.student_name,
            grade: draft.grade,
            parent_name: draft.parent_name,
            phone: draft.phone,
            template: draft.template,
            message: draft.message,
            sent_at: draft.sent_at.unwrap_or_else(Utc::now),
            status: draft.status,
            school_id: draft.school_id,
        };
        messages.push(message.clone());
        self.connection.write(MESSAGES, &messages)?;
        drop(_guard);
        self.notify_listeners();
        Ok(message)
    }

    pub fn delete_message(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.connection.collection_lock(MESSAGES);
        let _guard = lock.lock().unwrap();
        let mut messages: Vec<Message> = self.connection.read(MESSAGES);
        messages.retain(|m| m.id != id);
        self.connection.write(MESSAGES, &messages)?;
        drop(_guard);
        self.notify_listeners();
        Ok(())
    }

    // --- settings ------------------------------------------------------

    /// Persisted settings for a school, or defaults synthesized from the
    /// school record (hardcoded fallbacks when the school is unknown).
    /// Defaults are persisted best-effort; a write failure still returns
    /// the in-memory value.
    pub fn get_settings(&self, school_id: &str) -> SchoolSettings {
        let key = settings_key(school_id);
        if let Some(settings) = self.connection.read_optional::<SchoolSettings>(&key) {
            return settings;
        }
        let defaults = match self.get_school(school_id) {
            Some(school) => SchoolSettings::for_school(&school),
            None => SchoolSettings::default(),
        };
        if let Err(e) = self.connection.write(&key, &defaults) {
            warn!("Unable to persist default settings for school {school_id}: {e}");
        }
        defaults
    }

    /// Settings saves surface persistence failures; callers need to know.
    pub fn save_settings(
        &self,
        school_id: &str,
        settings: &SchoolSettings,
    ) -> Result<(), StoreError> {
        self.connection.write(&settings_key(school_id), settings)?;
        self.notify_listeners();
        Ok(())
    }

    // --- reset ---------------------------------------------------------

    /// Clear every entity collection and every per-school settings
    /// record. Irreversible. Remote cleanup is the reconciler's job;
    /// `Backend::reset_all` chains the two.
    pub fn reset_all(&self) -> Result<(), StoreError> {
        // Settings keys are derived from the school list, so collect them
        // before the schools collection goes away.
        let school_ids: Vec<String> = self.get_schools().into_iter().map(|s| s.id).collect();

        for key in [SCHOOLS, ACCOUNTS, STUDENTS, FEES, INSTALLMENTS, MESSAGES] {
            let lock = self.connection.collection_lock(key);
            let _guard = lock.lock().unwrap();
            self.connection.remove(key)?;
        }
        for school_id in school_ids {
            self.connection.remove(&settings_key(&school_id))?;
        }
        info!("All local data has been reset");
        self.notify_listeners();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use shared::Transportation;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn setup() -> (LocalStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let connection = Arc::new(JsonConnection::new(temp_dir.path()).unwrap());
        (LocalStore::new(connection), temp_dir)
    }

    fn student_draft(name: &str, number: &str) -> StudentDraft {
        StudentDraft {
            id: None,
            name: name.to_string(),
            student_number: number.to_string(),
            grade: shared::GRADE_LEVELS[2].to_string(),
            parent_name: "ولي الأمر".to_string(),
            phone: "+968 95123456".to_string(),
            whatsapp: None,
            address: None,
            transportation: Transportation::None,
            transportation_direction: None,
            transportation_fee: None,
            custom_transportation_fee: false,
            school_id: "school-1".to_string(),
        }
    }

    fn fee_draft(student_id: &str, amount: f64, discount: f64, paid: f64) -> FeeDraft {
        FeeDraft {
            id: None,
            student_id: student_id.to_string(),
            fee_type: "tuition".to_string(),
            description: None,
            amount,
            discount,
            paid,
            due_date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            school_id: "school-1".to_string(),
            transportation_type: None,
        }
    }

    #[test]
    fn student_round_trip_and_delete() {
        let (store, _dir) = setup();
        let saved = store.save_student(student_draft("Ali", "S1001")).unwrap();
        assert!(!saved.id.is_empty());

        let fetched = store.get_student(&saved.id).unwrap();
        assert_eq!(fetched.name, "Ali");
        assert_eq!(fetched.student_number, "S1001");
        assert_eq!(fetched.created_at, saved.created_at);

        store.delete_student(&saved.id).unwrap();
        assert!(store.get_student(&saved.id).is_none());
        // Deleting again is a no-op.
        store.delete_student(&saved.id).unwrap();
    }

    #[test]
    fn student_update_stamps_updated_at_only() {
        let (store, _dir) = setup();
        let saved = store.save_student(student_draft("Ali", "S1001")).unwrap();

        let mut draft = student_draft("Ali Hassan", "S1001");
        draft.id = Some(saved.id.clone());
        let updated = store.save_student(draft).unwrap();
        assert_eq!(updated.name, "Ali Hassan");
        assert_eq!(updated.created_at, saved.created_at);
        assert!(updated.updated_at >= saved.updated_at);
    }

    #[test]
    fn student_update_of_missing_id_fails() {
        let (store, _dir) = setup();
        let mut draft = student_draft("Ghost", "S0000");
        draft.id = Some("missing".to_string());
        let err = store.save_student(draft).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "student", .. }));
    }

    #[test]
    fn grade_filter_is_an_or_filter() {
        let (store, _dir) = setup();
        let mut a = student_draft("A", "S1");
        a.grade = shared::GRADE_LEVELS[0].to_string();
        let mut b = student_draft("B", "S2");
        b.grade = shared::GRADE_LEVELS[1].to_string();
        let mut c = student_draft("C", "S3");
        c.grade = shared::GRADE_LEVELS[2].to_string();
        store.save_student(a).unwrap();
        store.save_student(b).unwrap();
        store.save_student(c).unwrap();

        let grades = vec![
            shared::GRADE_LEVELS[0].to_string(),
            shared::GRADE_LEVELS[2].to_string(),
        ];
        let filtered = store.get_students(Some("school-1"), Some(&grades));
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|s| s.name != "B"));
    }

    #[test]
    fn fee_derivation_overrides_caller_numbers() {
        let (store, _dir) = setup();
        let student = store.save_student(student_draft("Ali", "S1001")).unwrap();

        let paid = store
            .save_fee(fee_draft(&student.id, 1000.0, 100.0, 900.0))
            .unwrap();
        assert_eq!(paid.balance, 0.0);
        assert_eq!(paid.status, FeeStatus::Paid);

        let partial = store
            .save_fee(fee_draft(&student.id, 1000.0, 0.0, 400.0))
            .unwrap();
        assert_eq!(partial.balance, 600.0);
        assert_eq!(partial.status, FeeStatus::Partial);

        let unpaid = store
            .save_fee(fee_draft(&student.id, 1000.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(unpaid.balance, 1000.0);
        assert_eq!(unpaid.status, FeeStatus::Unpaid);

        // An update recomputes as well.
        let mut update = fee_draft(&student.id, 1000.0, 0.0, 1000.0);
        update.id = Some(unpaid.id.clone());
        let settled = store.save_fee(update).unwrap();
        assert_eq!(settled.status, FeeStatus::Paid);
        assert_eq!(settled.balance, 0.0);
        // Denormalized fields survive the update.
        assert_eq!(settled.student_name, "Ali");
    }

    #[test]
    fn fee_creation_requires_existing_student() {
        let (store, _dir) = setup();
        let err = store
            .save_fee(fee_draft("missing-student", 100.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "student", .. }));
    }

    #[test]
    fn installment_plan_sums_exactly_and_starts_on_due_date() {
        let (store, _dir) = setup();
        let student = store.save_student(student_draft("Ali", "S1001")).unwrap();
        let fee = store
            .save_fee(fee_draft(&student.id, 1000.0, 100.0, 0.0))
            .unwrap();

        let plan = store.create_installment_plan(&fee, 7, 1).unwrap();
        assert_eq!(plan.len(), 7);
        let total: f64 = plan.iter().map(|i| i.amount).sum();
        assert_eq!(total, 900.0);
        // First installment absorbs the remainder and lands on the due date.
        assert!(plan[0].amount >= plan[1].amount);
        assert_eq!(plan[0].due_date, fee.due_date);
        // Later installments step monthly.
        assert_eq!(
            plan[1].due_date,
            fee.due_date.checked_add_months(Months::new(1)).unwrap()
        );
        assert_eq!(plan[0].note.as_deref(), Some("القسط 1 من 7 - رسوم دراسية"));
    }

    #[test]
    fn installment_plan_of_zero_is_empty() {
        let (store, _dir) = setup();
        let student = store.save_student(student_draft("Ali", "S1001")).unwrap();
        let fee = store
            .save_fee(fee_draft(&student.id, 1000.0, 0.0, 0.0))
            .unwrap();
        assert!(store.create_installment_plan(&fee, 0, 1).unwrap().is_empty());
    }

    #[test]
    fn installment_status_is_derived_per_read() {
        let (store, _dir) = setup();
        let student = store.save_student(student_draft("Ali", "S1001")).unwrap();
        let today = Utc::now().date_naive();

        let overdue = store
            .save_installment(InstallmentDraft {
                id: None,
                fee_id: "fee-1".to_string(),
                student_id: student.id.clone(),
                student_name: None,
                grade: None,
                amount: 100.0,
                due_date: today - Duration::days(1),
                paid_date: None,
                note: None,
                school_id: "school-1".to_string(),
                fee_type: "tuition".to_string(),
            })
            .unwrap();
        assert_eq!(
            store.get_installment(&overdue.id).unwrap().status,
            InstallmentStatus::Overdue
        );
        // The lookup filled denormalized fields from the student.
        assert_eq!(store.get_installment(&overdue.id).unwrap().student_name, "Ali");

        let upcoming = store
            .save_installment(InstallmentDraft {
                id: None,
                fee_id: "fee-1".to_string(),
                student_id: student.id.clone(),
                student_name: Some("Ali".to_string()),
                grade: Some(student.grade.clone()),
                amount: 100.0,
                due_date: today + Duration::days(1),
                paid_date: None,
                note: None,
                school_id: "school-1".to_string(),
                fee_type: "tuition".to_string(),
            })
            .unwrap();
        assert_eq!(upcoming.status, InstallmentStatus::Upcoming);

        // Marking paid wins regardless of the due date.
        let mut pay = InstallmentDraft {
            id: Some(overdue.id.clone()),
            fee_id: overdue.fee_id.clone(),
            student_id: overdue.student_id.clone(),
            student_name: None,
            grade: None,
            amount: overdue.amount,
            due_date: overdue.due_date,
            paid_date: Some(today),
            note: overdue.note.clone(),
            school_id: overdue.school_id.clone(),
            fee_type: overdue.fee_type.clone(),
        };
        pay.paid_date = Some(today);
        let paid = store.save_installment(pay).unwrap();
        assert_eq!(paid.status, InstallmentStatus::Paid);
    }

    #[test]
    fn settings_are_lazily_created_with_defaults() {
        let (store, _dir) = setup();
        let settings = store.get_settings("unknown-school");
        assert_eq!(settings.default_installments, 4);
        assert_eq!(settings.transportation_fee_one_way, 150.0);
        assert_eq!(settings.transportation_fee_two_way, 300.0);
        assert_eq!(settings.tuition_fee_category, "رسوم دراسية");

        // The synthesized defaults were persisted.
        let again = store.get_settings("unknown-school");
        assert_eq!(again, settings);
    }

    #[test]
    fn settings_defaults_come_from_the_school_record() {
        let (store, _dir) = setup();
        let school = store
            .save_school(SchoolDraft {
                id: None,
                name: "مدرسة النور".to_string(),
                email: "info@alnoor.om".to_string(),
                phone: "+968 24123456".to_string(),
                address: "مسقط".to_string(),
                location: "مسقط".to_string(),
                active: true,
                subscription_start: "2024-09-01".to_string(),
                subscription_end: "2025-08-31".to_string(),
                logo: String::new(),
            })
            .unwrap();
        let settings = store.get_settings(&school.id);
        assert_eq!(settings.name, "مدرسة النور");
        assert_eq!(settings.email, "info@alnoor.om");
    }

    #[test]
    fn listeners_fire_in_subscription_order_until_unsubscribed() {
        let (store, _dir) = setup();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = order.clone();
            store.subscribe(Box::new(move || order.lock().unwrap().push("first")))
        };
        let _second = {
            let order = order.clone();
            store.subscribe(Box::new(move || order.lock().unwrap().push("second")))
        };

        store.save_student(student_draft("Ali", "S1001")).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

        store.unsubscribe(first);
        order.lock().unwrap().clear();
        store.save_student(student_draft("Badr", "S1002")).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn every_mutation_notifies_once() {
        let (store, _dir) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            store.subscribe(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let student = store.save_student(student_draft("Ali", "S1001")).unwrap();
        store
            .save_fee(fee_draft(&student.id, 100.0, 0.0, 0.0))
            .unwrap();
        store.delete_student(&student.id).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn reset_all_clears_everything() {
        let (store, _dir) = setup();
        let school = store
            .save_school(SchoolDraft {
                id: None,
                name: "مدرسة".to_string(),
                active: true,
                ..SchoolDraft::default()
            })
            .unwrap();
        let mut draft = student_draft("Ali", "S1001");
        draft.school_id = school.id.clone();
        store.save_student(draft).unwrap();
        store.get_settings(&school.id);

        store.reset_all().unwrap();
        assert!(store.get_schools().is_empty());
        assert!(store.get_students(None, None).is_empty());
        // Settings fall back to hardcoded defaults after the reset.
        let settings = store.get_settings(&school.id);
        assert_eq!(settings.name, "المدرسة");
    }

    #[test]
    fn generated_student_numbers_embed_school_and_grade_codes() {
        let (store, _dir) = setup();
        let number = store.generate_student_number("school-1", "الصف الأول");
        assert!(number.starts_with("sc"));
        assert!(number.chars().count() >= 6);
    }

    #[test]
    fn account_save_preserves_password_and_denormalizes_school() {
        let (store, _dir) = setup();
        let school = store
            .save_school(SchoolDraft {
                id: None,
                name: "مدرسة النور".to_string(),
                logo: "logo.png".to_string(),
                active: true,
                ..SchoolDraft::default()
            })
            .unwrap();

        let created = store
            .save_account(AccountDraft {
                id: None,
                name: "Mona".to_string(),
                email: "mona@alnoor.om".to_string(),
                username: "mona".to_string(),
                password: Some("secret".to_string()),
                role: shared::AccountRole::SchoolAdmin,
                school_id: school.id.clone(),
                grade_levels: None,
                last_login: None,
            })
            .unwrap();
        assert_eq!(created.school_name.as_deref(), Some("مدرسة النور"));
        assert_eq!(created.school_logo.as_deref(), Some("logo.png"));

        let updated = store
            .save_account(AccountDraft {
                id: Some(created.id.clone()),
                name: "Mona A.".to_string(),
                email: created.email.clone(),
                username: created.username.clone(),
                password: None,
                role: created.role,
                school_id: school.id.clone(),
                grade_levels: None,
                last_login: None,
            })
            .unwrap();
        assert_eq!(updated.password.as_deref(), Some("secret"));
        assert_eq!(updated.name, "Mona A.");
    }
}
