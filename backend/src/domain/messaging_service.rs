//! WhatsApp messages to parents, recorded in the message history.
//!
//! The transport is optional: without one (offline installs) messages
//! are still rendered and recorded with `Pending` status so the history
//! stays complete. Delivery goes to the student's WhatsApp number when
//! present, otherwise the main phone number, normalized either way.

use std::sync::Arc;

use chrono::NaiveDate;
use log::{info, warn};
use shared::{normalize_phone, Message, MessageStatus, Student};

use crate::domain::drafts::MessageDraft;
use crate::domain::errors::StoreError;
use crate::domain::local_store::LocalStore;
use crate::storage::WhatsAppTransport;

/// The message bodies parents receive. Amounts are Omani rial.
#[derive(Debug, Clone)]
pub enum MessageTemplate {
    PaymentReminder { amount: f64, due_date: NaiveDate },
    PaymentConfirmation { amount: f64 },
    TransportationNotice { detail: String },
    General { body: String },
}

impl MessageTemplate {
    /// Key stored on the message record.
    pub fn key(&self) -> &'static str {
        match self {
            MessageTemplate::PaymentReminder { .. } => "paymentReminder",
            MessageTemplate::PaymentConfirmation { .. } => "paymentConfirmation",
            MessageTemplate::TransportationNotice { .. } => "transportationNotice",
            MessageTemplate::General { .. } => "general",
        }
    }

    fn render(&self, student: &Student) -> String {
        match self {
            MessageTemplate::PaymentReminder { amount, due_date } => format!(
                "عزيزي ولي أمر الطالب {}،\n\
                 نذكركم بموعد سداد الرسوم المستحقة بمبلغ {amount} ريال عماني \
                 بتاريخ {due_date}.\n\
                 شاكرين لكم تعاونكم.",
                student.name
            ),
            MessageTemplate::PaymentConfirmation { amount } => format!(
                "عزيزي ولي أمر الطالب {}،\n\
                 نفيدكم باستلام مبلغ {amount} ريال عماني.\n\
                 مع تحيات إدارة المدرسة.",
                student.name
            ),
            MessageTemplate::TransportationNotice { detail } => format!(
                "عزيزي ولي أمر الطالب {}،\n\
                 نحيطكم علماً بشأن خدمة النقل المدرسي: {detail}",
                student.name
            ),
            MessageTemplate::General { body } => body.clone(),
        }
    }
}

pub struct MessagingService {
    store: Arc<LocalStore>,
    transport: Option<Arc<dyn WhatsAppTransport>>,
}

impl MessagingService {
    pub fn new(store: Arc<LocalStore>, transport: Option<Arc<dyn WhatsAppTransport>>) -> Self {
        Self { store, transport }
    }

    /// Render, deliver and record one message to a student's parent.
    /// Delivery failures are recorded, not returned; only a failure to
    /// write the history is an error.
    pub fn send(
        &self,
        student: &Student,
        template: MessageTemplate,
    ) -> Result<Message, StoreError> {
        let raw_phone = student.whatsapp.as_deref().unwrap_or(&student.phone);
        let phone = normalize_phone(raw_phone);
        let body = template.render(student);

        let status = match &self.transport {
            Some(transport) => {
                if transport.send(&phone, &body) {
                    info!("Delivered {} message to {phone}", template.key());
                    MessageStatus::Delivered
                } else {
                    warn!("Delivery to {phone} failed");
                    MessageStatus::Failed
                }
            }
            None => MessageStatus::Pending,
        };

        self.store.save_message(MessageDraft {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            grade: student.grade.clone(),
            parent_name: student.parent_name.clone(),
            phone,
            template: template.key().to_string(),
            message: body,
            sent_at: None,
            status,
            school_id: student.school_id.clone(),
        })
    }
}
