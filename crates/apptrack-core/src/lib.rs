//! Application record schema, field descriptors and the warehouse column list.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CRATE_NAME: &str = "apptrack-core";

/// Column used as the MERGE key.
pub const KEY_COLUMN: &str = "application_id";

/// Columns stamped at persistence time; present in the warehouse but not on the model.
pub const AUDIT_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

pub const DEFAULT_CORE_SKILLS: &[&str] = &["python", "sql"];
pub const DEFAULT_APPLICATION_SOURCE: &str = "LinkedIn";
pub const OFFICE_PARTICIPATION_CHOICES: &[&str] = &["Hybrid", "Remote", "On-site"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OfficeParticipation {
    Hybrid,
    Remote,
    #[serde(rename = "On-site")]
    OnSite,
}

impl OfficeParticipation {
    pub const ALL: [OfficeParticipation; 3] = [Self::Remote, Self::Hybrid, Self::OnSite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hybrid => "Hybrid",
            Self::Remote => "Remote",
            Self::OnSite => "On-site",
        }
    }
}

impl fmt::Display for OfficeParticipation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One job application as submitted through the form.
///
/// `pay_min`/`pay_max` use 0 for "unset", and `pay_max >= pay_min` is not enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub application_id: String,
    pub application_date: NaiveDate,
    pub application_link: Option<String>,
    pub company_name: String,
    pub job_title: String,
    pub location: Option<String>,
    pub office_participation: Option<OfficeParticipation>,
    pub role_desc: Option<String>,
    pub responsibilities: Option<String>,
    pub requirements: Option<String>,
    pub pay_min: i64,
    pub pay_max: i64,
    pub cv_version: Option<String>,
    pub cover_letter: Option<String>,
    pub self_assessment: i64,
    pub core_skills: Vec<String>,
    pub llm: bool,
    pub mmm: bool,
    pub marketing: bool,
    pub retail: bool,
    pub healthcare: bool,
    pub finance: bool,
    pub senior_role: bool,
    pub staff_role: bool,
    pub generalist_role: bool,
    pub management_role: bool,
    pub refferal: bool,
    pub recruiter: bool,
    pub application_source: Option<String>,
    pub recruiter_screen: bool,
    pub recruiter_screen_date: Option<NaiveDate>,
    pub hiring_manager_screen: bool,
    pub hiring_manager_screen_date: Option<NaiveDate>,
    pub technical_screen: bool,
    pub technical_screen_date: Option<NaiveDate>,
    pub technical_screen_type: Option<String>,
    pub technical_screen_time: Option<i64>,
    pub offer: bool,
    pub offer_date: Option<NaiveDate>,
    pub rejection: bool,
    pub rejection_date: Option<NaiveDate>,
}

impl Application {
    /// Fresh record for the "start new application" flow, every other field defaulted.
    pub fn new_draft(application_id: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            application_id: application_id.into(),
            application_date: today,
            application_link: None,
            company_name: "Enter Company Name".to_string(),
            job_title: "Job Title".to_string(),
            location: None,
            office_participation: None,
            role_desc: None,
            responsibilities: None,
            requirements: None,
            pay_min: 0,
            pay_max: 0,
            cv_version: None,
            cover_letter: None,
            self_assessment: 50,
            core_skills: DEFAULT_CORE_SKILLS.iter().map(|s| s.to_string()).collect(),
            llm: false,
            mmm: false,
            marketing: false,
            retail: false,
            healthcare: false,
            finance: false,
            senior_role: false,
            staff_role: false,
            generalist_role: false,
            management_role: false,
            refferal: false,
            recruiter: false,
            application_source: Some(DEFAULT_APPLICATION_SOURCE.to_string()),
            recruiter_screen: false,
            recruiter_screen_date: None,
            hiring_manager_screen: false,
            hiring_manager_screen_date: None,
            technical_screen: false,
            technical_screen_date: None,
            technical_screen_type: None,
            technical_screen_time: Some(0),
            offer: false,
            offer_date: None,
            rejection: false,
            rejection_date: None,
        }
    }

    /// Display label used by the edit picker.
    pub fn choice_label(&self) -> String {
        format!("{} - {}", self.company_name, self.job_title)
    }
}

/// An application as read back from the warehouse, with its audit timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    #[serde(flatten)]
    pub application: Application,
    pub created_at: Option<DateTime<FixedOffset>>,
    pub updated_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormSection {
    Application,
    Description,
    Skills,
    Pay,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Text,
    LongText,
    Date,
    Integer { min: i64, max: i64 },
    Flag,
    Choice(&'static [&'static str]),
    SkillList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Required,
    Null,
    False,
    Int(i64),
    Text(&'static str),
    Skills(&'static [&'static str]),
    Today,
}

/// One row of the declarative field table shared by validation, storage and the UI.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub kind: FieldKind,
    pub default: FieldDefault,
    pub section: FormSection,
}

const fn field(
    name: &'static str,
    title: &'static str,
    kind: FieldKind,
    default: FieldDefault,
    section: FormSection,
) -> FieldDescriptor {
    FieldDescriptor {
        name,
        title,
        kind,
        default,
        section,
    }
}

const PAY: FieldKind = FieldKind::Integer {
    min: 0,
    max: i64::MAX,
};

pub const FIELDS: &[FieldDescriptor] = &[
    field("application_id", "Application ID", FieldKind::Id, FieldDefault::Required, FormSection::Application),
    field("application_date", "Application Date", FieldKind::Date, FieldDefault::Today, FormSection::Application),
    field("application_link", "Application Link", FieldKind::Text, FieldDefault::Null, FormSection::Application),
    field("company_name", "Company", FieldKind::Text, FieldDefault::Required, FormSection::Application),
    field("job_title", "Job Title", FieldKind::Text, FieldDefault::Required, FormSection::Application),
    field("location", "Location", FieldKind::Text, FieldDefault::Null, FormSection::Application),
    field(
        "office_participation",
        "In-Office?",
        FieldKind::Choice(OFFICE_PARTICIPATION_CHOICES),
        FieldDefault::Null,
        FormSection::Application,
    ),
    field("role_desc", "Role Description", FieldKind::LongText, FieldDefault::Null, FormSection::Description),
    field("responsibilities", "Responsibilities", FieldKind::LongText, FieldDefault::Null, FormSection::Description),
    field("requirements", "Requirements", FieldKind::LongText, FieldDefault::Null, FormSection::Description),
    field("pay_min", "Pay - Lower Bound", PAY, FieldDefault::Int(0), FormSection::Pay),
    field("pay_max", "Pay - Upper Bound", PAY, FieldDefault::Int(0), FormSection::Pay),
    field("cv_version", "CV Version", FieldKind::Text, FieldDefault::Null, FormSection::Application),
    field("cover_letter", "Cover Letter", FieldKind::LongText, FieldDefault::Null, FormSection::Application),
    field(
        "self_assessment",
        "Self Assessment",
        FieldKind::Integer { min: 0, max: 100 },
        FieldDefault::Int(50),
        FormSection::Skills,
    ),
    field(
        "core_skills",
        "Core Skills",
        FieldKind::SkillList,
        FieldDefault::Skills(DEFAULT_CORE_SKILLS),
        FormSection::Skills,
    ),
    field("llm", "LLM", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("mmm", "MMM", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("marketing", "Marketing", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("retail", "Retail", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("healthcare", "Healthcare", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("finance", "Finance", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("senior_role", "Senior Role", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("staff_role", "Staff Role", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("generalist_role", "Generalist Role", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("management_role", "Management Role", FieldKind::Flag, FieldDefault::False, FormSection::Skills),
    field("refferal", "Referral", FieldKind::Flag, FieldDefault::False, FormSection::Application),
    field("recruiter", "Recruiter", FieldKind::Flag, FieldDefault::False, FormSection::Application),
    field(
        "application_source",
        "Application Source",
        FieldKind::Text,
        FieldDefault::Text(DEFAULT_APPLICATION_SOURCE),
        FormSection::Application,
    ),
    field("recruiter_screen", "Recruiter Screen", FieldKind::Flag, FieldDefault::False, FormSection::Response),
    field("recruiter_screen_date", "Recruiter Screen Date", FieldKind::Date, FieldDefault::Null, FormSection::Response),
    field("hiring_manager_screen", "Hiring Manager Screen", FieldKind::Flag, FieldDefault::False, FormSection::Response),
    field(
        "hiring_manager_screen_date",
        "Hiring Manager Screen Date",
        FieldKind::Date,
        FieldDefault::Null,
        FormSection::Response,
    ),
    field("technical_screen", "Technical Screen", FieldKind::Flag, FieldDefault::False, FormSection::Response),
    field("technical_screen_date", "Technical Screen Date", FieldKind::Date, FieldDefault::Null, FormSection::Response),
    field("technical_screen_type", "Technical Screen Type", FieldKind::Text, FieldDefault::Null, FormSection::Response),
    field(
        "technical_screen_time",
        "Technical Screen Time",
        FieldKind::Integer {
            min: 0,
            max: i64::MAX,
        },
        FieldDefault::Int(0),
        FormSection::Response,
    ),
    field("offer", "Offer", FieldKind::Flag, FieldDefault::False, FormSection::Response),
    field("offer_date", "Offer Date", FieldKind::Date, FieldDefault::Null, FormSection::Response),
    field("rejection", "Rejection", FieldKind::Flag, FieldDefault::False, FormSection::Response),
    field("rejection_date", "Rejection Date", FieldKind::Date, FieldDefault::Null, FormSection::Response),
];

pub fn field_descriptor(name: &str) -> Option<&'static FieldDescriptor> {
    FIELDS.iter().find(|f| f.name == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    String,
    Date,
    Int64,
    Bool,
    /// Repeated struct `{"list": [{"element": STRING}]}`.
    SkillList,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnMode {
    Required,
    Nullable,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub mode: ColumnMode,
    pub description: &'static str,
}

const fn column(
    name: &'static str,
    column_type: ColumnType,
    mode: ColumnMode,
    description: &'static str,
) -> ColumnDef {
    ColumnDef {
        name,
        column_type,
        mode,
        description,
    }
}

/// Static column list of the `applications` table. Maintained by hand and checked
/// against [`FIELDS`] by [`check_schema_consistency`].
pub const WAREHOUSE_COLUMNS: &[ColumnDef] = &[
    column("application_id", ColumnType::String, ColumnMode::Required, "Unique application identifier"),
    column("application_date", ColumnType::Date, ColumnMode::Nullable, "Date the application was submitted"),
    column("application_link", ColumnType::String, ColumnMode::Nullable, "Link to the posting"),
    column("company_name", ColumnType::String, ColumnMode::Required, "Company name"),
    column("job_title", ColumnType::String, ColumnMode::Required, "Job title"),
    column("location", ColumnType::String, ColumnMode::Nullable, "Job location"),
    column("office_participation", ColumnType::String, ColumnMode::Nullable, "Hybrid, Remote or On-site"),
    column("role_desc", ColumnType::String, ColumnMode::Nullable, "Summary of the role"),
    column("responsibilities", ColumnType::String, ColumnMode::Nullable, "Responsibilities of the role"),
    column("requirements", ColumnType::String, ColumnMode::Nullable, "Requirements of the role"),
    column("pay_min", ColumnType::Int64, ColumnMode::Nullable, "Minimum pay, 0 when unset"),
    column("pay_max", ColumnType::Int64, ColumnMode::Nullable, "Maximum pay, 0 when unset"),
    column("cv_version", ColumnType::String, ColumnMode::Nullable, "Resume version sent"),
    column("cover_letter", ColumnType::String, ColumnMode::Nullable, "Cover letter sent"),
    column("self_assessment", ColumnType::Int64, ColumnMode::Nullable, "Self assessed fit, 0-100"),
    column("core_skills", ColumnType::SkillList, ColumnMode::Nullable, "Core skills for the role"),
    column("llm", ColumnType::Bool, ColumnMode::Nullable, "LLM focus"),
    column("mmm", ColumnType::Bool, ColumnMode::Nullable, "Marketing mix modelling focus"),
    column("marketing", ColumnType::Bool, ColumnMode::Nullable, "Marketing focus"),
    column("retail", ColumnType::Bool, ColumnMode::Nullable, "Retail focus"),
    column("healthcare", ColumnType::Bool, ColumnMode::Nullable, "Healthcare focus"),
    column("finance", ColumnType::Bool, ColumnMode::Nullable, "Finance focus"),
    column("senior_role", ColumnType::Bool, ColumnMode::Nullable, "Senior role"),
    column("staff_role", ColumnType::Bool, ColumnMode::Nullable, "Staff role"),
    column("generalist_role", ColumnType::Bool, ColumnMode::Nullable, "Generalist role"),
    column("management_role", ColumnType::Bool, ColumnMode::Nullable, "Management role"),
    column("refferal", ColumnType::Bool, ColumnMode::Nullable, "Came through a network referral"),
    column("recruiter", ColumnType::Bool, ColumnMode::Nullable, "Recruiter initiated"),
    column("application_source", ColumnType::String, ColumnMode::Nullable, "Where the posting was found"),
    column("recruiter_screen", ColumnType::Bool, ColumnMode::Nullable, "Reached recruiter screen"),
    column("recruiter_screen_date", ColumnType::Date, ColumnMode::Nullable, "Recruiter screen date"),
    column("hiring_manager_screen", ColumnType::Bool, ColumnMode::Nullable, "Reached hiring manager screen"),
    column("hiring_manager_screen_date", ColumnType::Date, ColumnMode::Nullable, "Hiring manager screen date"),
    column("technical_screen", ColumnType::Bool, ColumnMode::Nullable, "Reached technical screen"),
    column("technical_screen_date", ColumnType::Date, ColumnMode::Nullable, "Technical screen date"),
    column("technical_screen_type", ColumnType::String, ColumnMode::Nullable, "Technical screen format"),
    column("technical_screen_time", ColumnType::Int64, ColumnMode::Nullable, "Technical screen length in minutes"),
    column("offer", ColumnType::Bool, ColumnMode::Nullable, "Received an offer"),
    column("offer_date", ColumnType::Date, ColumnMode::Nullable, "Offer date"),
    column("rejection", ColumnType::Bool, ColumnMode::Nullable, "Rejected"),
    column("rejection_date", ColumnType::Date, ColumnMode::Nullable, "Rejection date"),
    column("created_at", ColumnType::Timestamp, ColumnMode::Nullable, "First persisted at"),
    column("updated_at", ColumnType::Timestamp, ColumnMode::Nullable, "Last persisted at"),
];

impl FieldKind {
    pub fn column_type(&self) -> ColumnType {
        match self {
            FieldKind::Id | FieldKind::Text | FieldKind::LongText | FieldKind::Choice(_) => {
                ColumnType::String
            }
            FieldKind::Date => ColumnType::Date,
            FieldKind::Integer { .. } => ColumnType::Int64,
            FieldKind::Flag => ColumnType::Bool,
            FieldKind::SkillList => ColumnType::SkillList,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("schema drift: missing columns {missing:?}, unexpected columns {unexpected:?}, type mismatches {mismatched:?}")]
pub struct SchemaDriftError {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub mismatched: Vec<String>,
}

/// Verifies the warehouse column list still matches the field table.
pub fn check_schema_consistency() -> Result<(), SchemaDriftError> {
    check_columns(FIELDS, WAREHOUSE_COLUMNS)
}

pub fn check_columns(fields: &[FieldDescriptor], columns: &[ColumnDef]) -> Result<(), SchemaDriftError> {
    let column_names: BTreeSet<&str> = columns.iter().map(|c| c.name).collect();
    let field_names: BTreeSet<&str> = fields.iter().map(|f| f.name).collect();
    let mut drift = SchemaDriftError::default();

    for f in fields {
        match columns.iter().find(|c| c.name == f.name) {
            None => drift.missing.push(f.name.to_string()),
            Some(c) if c.column_type != f.kind.column_type() => drift.mismatched.push(format!(
                "{}: field is {:?}, column is {:?}",
                f.name,
                f.kind.column_type(),
                c.column_type
            )),
            Some(_) => {}
        }
    }
    for name in column_names.difference(&field_names) {
        if !AUDIT_COLUMNS.contains(name) {
            drift.unexpected.push(name.to_string());
        }
    }
    for audit in AUDIT_COLUMNS {
        if !column_names.contains(audit) {
            drift.missing.push(audit.to_string());
        }
    }

    if drift.missing.is_empty() && drift.unexpected.is_empty() && drift.mismatched.is_empty() {
        Ok(())
    } else {
        Err(drift)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("invalid application: {}", format_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    pub fn has_issue_for(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Integers become their decimal string; every other value passes through untouched
/// and is left for the type check to reject.
pub fn coerce_application_id(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Value::String(n.to_string()),
        other => other,
    }
}

/// Validates a submitted record and applies field defaults. `today` fills a missing
/// `application_date`.
pub fn validate_application(input: &Value, today: NaiveDate) -> Result<Application, ValidationError> {
    let Some(object) = input.as_object() else {
        return Err(ValidationError::single("record", "expected a JSON object"));
    };

    let mut normalized = Map::new();
    let mut issues = Vec::new();
    for descriptor in FIELDS {
        let raw = object.get(descriptor.name).cloned().unwrap_or(Value::Null);
        let raw = match descriptor.kind {
            FieldKind::Id => coerce_application_id(raw),
            _ => raw,
        };
        match normalize_field(descriptor, raw, today) {
            Ok(value) => {
                normalized.insert(descriptor.name.to_string(), value);
            }
            Err(message) => issues.push(FieldIssue {
                field: descriptor.name.to_string(),
                message,
            }),
        }
    }

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }

    serde_json::from_value(Value::Object(normalized))
        .map_err(|err| ValidationError::single("record", err.to_string()))
}

fn normalize_field(descriptor: &FieldDescriptor, raw: Value, today: NaiveDate) -> Result<Value, String> {
    if raw.is_null() {
        return match descriptor.default {
            FieldDefault::Required => Err("field required".to_string()),
            FieldDefault::Null => Ok(Value::Null),
            FieldDefault::False => Ok(Value::Bool(false)),
            FieldDefault::Int(n) => Ok(Value::from(n)),
            FieldDefault::Text(text) => Ok(Value::from(text)),
            FieldDefault::Skills(skills) => Ok(Value::from(skills.to_vec())),
            FieldDefault::Today => Ok(Value::from(today.to_string())),
        };
    }

    match descriptor.kind {
        FieldKind::Id => match raw {
            Value::String(s) if !s.trim().is_empty() => Ok(Value::String(s.trim().to_string())),
            Value::String(_) => Err("must not be empty".to_string()),
            other => Err(format!("expected a string, got {}", json_type_name(&other))),
        },
        FieldKind::Text | FieldKind::LongText => match raw {
            Value::String(s) => {
                if descriptor.default == FieldDefault::Required && s.trim().is_empty() {
                    Err("must not be empty".to_string())
                } else {
                    Ok(Value::String(s))
                }
            }
            other => Err(format!("expected a string, got {}", json_type_name(&other))),
        },
        FieldKind::Date => match raw {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|d| Value::from(d.to_string()))
                .map_err(|_| format!("`{s}` is not a valid ISO date (YYYY-MM-DD)")),
            other => Err(format!("expected an ISO date string, got {}", json_type_name(&other))),
        },
        FieldKind::Integer { min, max } => {
            let n = integer_value(&raw)
                .ok_or_else(|| format!("expected an integer, got {}", json_type_name(&raw)))?;
            if n < min || n > max {
                Err(format!("{n} is outside {min}..={max}"))
            } else {
                Ok(Value::from(n))
            }
        }
        FieldKind::Flag => match raw {
            Value::Bool(b) => Ok(Value::Bool(b)),
            other => Err(format!("expected a boolean, got {}", json_type_name(&other))),
        },
        FieldKind::Choice(choices) => match raw {
            Value::String(s) if choices.contains(&s.as_str()) => Ok(Value::String(s)),
            Value::String(s) => Err(format!("`{s}` is not one of {choices:?}")),
            other => Err(format!("expected a string, got {}", json_type_name(&other))),
        },
        FieldKind::SkillList => match raw {
            Value::Array(items) => {
                let mut skills = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) if !s.trim().is_empty() => skills.push(Value::String(s.trim().to_string())),
                        Value::String(_) => return Err("skill tags must not be empty".to_string()),
                        other => return Err(format!("expected skill strings, got {}", json_type_name(&other))),
                    }
                }
                Ok(Value::Array(skills))
            }
            other => Err(format!("expected a list of strings, got {}", json_type_name(&other))),
        },
    }
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15).map(|f| f as i64)),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Next id for a new record: highest numeric id plus one. Non-numeric ids are ignored.
/// When the highest id is `u64::MAX` the lowest unused positive id is handed out instead.
pub fn next_application_id<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: BTreeSet<u64> = existing
        .into_iter()
        .filter_map(|id| id.trim().parse::<u64>().ok())
        .collect();
    let next = match taken.last() {
        None => 1,
        Some(max) => max
            .checked_add(1)
            .unwrap_or_else(|| (1..).find(|n| !taken.contains(n)).unwrap_or(0)),
    };
    next.to_string()
}
