use std::collections::HashSet;

use fieldsync_common::error::{FieldsyncError, FieldsyncResult};

/// How a remote value is turned into a local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// `"True"`/`"False"` become booleans, `YYYY-MM-DDTHH:MM:SSZ` becomes a timestamp,
    /// anything else passes through.
    Auto,
    /// Always stored as text.
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub remote: &'static str,
    pub local: &'static str,
    pub coercion: Coercion,
}

const fn auto(remote: &'static str, local: &'static str) -> FieldSpec {
    FieldSpec {
        remote,
        local,
        coercion: Coercion::Auto,
    }
}

const fn text(remote: &'static str, local: &'static str) -> FieldSpec {
    FieldSpec {
        remote,
        local,
        coercion: Coercion::Text,
    }
}

/// Declarative remote → local mapping for one local record type.
#[derive(Debug)]
pub struct RecordSchema {
    pub record_type: &'static str,
    pub fields: &'static [FieldSpec],
    /// Local fields the engine fills itself (references, sync metadata).
    pub computed: &'static [&'static str],
}

impl RecordSchema {
    /// Reject empty, duplicated or malformed mappings.
    pub fn validate(&self) -> FieldsyncResult<()> {
        let invalid = |msg: String| {
            Err(FieldsyncError::Validation(format!(
                "schema {}: {msg}",
                self.record_type
            )))
        };

        if self.fields.is_empty() {
            return invalid("no mapped fields".into());
        }

        let mut remotes = HashSet::new();
        let mut locals = HashSet::new();
        for spec in self.fields {
            if spec.remote.trim().is_empty() {
                return invalid(format!("blank remote key for {}", spec.local));
            }
            if !is_local_name(spec.local) {
                return invalid(format!("bad local field name {:?}", spec.local));
            }
            if !remotes.insert(spec.remote) {
                return invalid(format!("remote key {} mapped twice", spec.remote));
            }
            if !locals.insert(spec.local) {
                return invalid(format!("local field {} mapped twice", spec.local));
            }
        }

        for &name in self.computed {
            if !is_local_name(name) {
                return invalid(format!("bad computed field name {name:?}"));
            }
            if !locals.insert(name) {
                return invalid(format!("computed field {name} clashes with a mapping"));
            }
        }

        Ok(())
    }
}

fn is_local_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

pub const SALES_ORDER: &str = "sales_order";
pub const CALENDAR_EVENT: &str = "calendar_event";

pub const APPOINTMENT: RecordSchema = RecordSchema {
    record_type: "appointment",
    fields: &[
        text("Id", "sp10_id"),
        auto("AppointmentName", "name"),
        auto("Description", "description"),
        auto("ScheduledDateTime", "scheduled_at"),
        auto("Notes", "notes"),
        auto("ClosureNotes", "closure_notes"),
        auto("ScheduledDuration", "scheduled_duration"),
    ],
    computed: &[
        "sales_order",
        "status",
        "assigned_tech",
        "last_sync",
        "linked_event",
    ],
};

pub const ORDER_NOTE: RecordSchema = RecordSchema {
    record_type: "order_note",
    fields: &[
        text("Id", "sp10_id"),
        auto("CreatedDateTime", "date_created"),
        auto("Contents", "contents"),
        auto("LastUpdatedDateTime", "date_last_updated"),
        text("AttachmentId", "attachment_id"),
    ],
    computed: &[
        "sales_order",
        "note_type",
        "created_user",
        "attachment",
        "last_sync",
    ],
};

/// Body fields synced onto an existing local sales order.
pub const ORDER_BODY: RecordSchema = RecordSchema {
    record_type: SALES_ORDER,
    fields: &[
        auto("UDF_Follow_Up_Required", "follow_up_alert"),
        auto("UDF_3rd_Party_Vendor_report", "third_party_vendor_report"),
        auto("UDF_Field_Service_Report_sent_to_client", "report_sent_to_client"),
        auto("UDF_Show_Actual_Hours_on_Report", "show_actual_hours"),
        auto("UDF_Follow_Up_Note", "follow_up_note"),
        auto("OrderCancelDate", "cancel_date"),
        text("TechOrderStatus", "tech_order_status"),
    ],
    computed: &["contract_number", "assigned_to", "order_status"],
};

/// Every schema the engine writes with. Checked once at startup.
pub fn validate_all() -> FieldsyncResult<()> {
    for schema in [&APPOINTMENT, &ORDER_NOTE, &ORDER_BODY] {
        schema.validate()?;
    }
    Ok(())
}

/// Lookup entities created lazily from remote enumerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    AppointmentStatus,
    ServiceTech,
    Sp10User,
    OrderStatus,
    NoteType,
}

impl ReferenceKind {
    pub fn record_type(self) -> &'static str {
        match self {
            ReferenceKind::AppointmentStatus => "appointment_status",
            ReferenceKind::ServiceTech => "service_tech",
            ReferenceKind::Sp10User => "sp10_user",
            ReferenceKind::OrderStatus => "order_status",
            ReferenceKind::NoteType => "note_type",
        }
    }
}
