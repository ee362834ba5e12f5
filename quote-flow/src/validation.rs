use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::models::FormData;

pub const NAME_REQUIRED: &str = "Nome é obrigatório";
pub const NAME_TOO_SHORT: &str = "Nome deve ter pelo menos 2 caracteres";
pub const NAME_TOO_LONG: &str = "Nome deve ter no máximo 100 caracteres";
pub const NAME_INVALID_CHARS: &str = "Nome deve conter apenas letras, espaços, hífens e apóstrofos";
pub const EMAIL_REQUIRED: &str = "E-mail é obrigatório";
pub const EMAIL_INVALID: &str = "Formato de e-mail inválido";
pub const PLATE_REQUIRED: &str = "Placa é obrigatória";
pub const PLATE_INVALID: &str = "Formato de placa inválido. Use ABC-1234 ou ABC1D23";

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 100;

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-ZÀ-ÿ\s'\-]+$").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static LEGACY_PLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{3}[0-9]{4}$").unwrap());
static MERCOSUL_PLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}[0-9][A-Z][0-9]{2}$").unwrap());

/// The two accepted Brazilian plate layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateFormat {
    /// `LLLNNNN`, displayed as `LLL-NNNN`
    Legacy,
    /// `LLLNLNN`
    Mercosul,
}

impl PlateFormat {
    /// Detect the layout of an already sanitized (upper-case, no separators) plate.
    pub fn detect(sanitized: &str) -> Option<Self> {
        if LEGACY_PLATE.is_match(sanitized) {
            Some(Self::Legacy)
        } else if MERCOSUL_PLATE.is_match(sanitized) {
            Some(Self::Mercosul)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FieldValidation {
    fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn fail(message: &str) -> Self {
        Self {
            is_valid: false,
            error: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormField {
    Name,
    Email,
    LicensePlate,
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::LicensePlate => "licensePlate",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: FormField,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormValidation {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
}

/// Collapse whitespace runs to a single space and trim both ends.
pub fn sanitize_string(input: &str) -> String {
    WHITESPACE_RUN.replace_all(input.trim(), " ").into_owned()
}

pub fn sanitize_email(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Strip spaces and hyphens and upper-case.
pub fn sanitize_license_plate(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn validate_name(raw: &str) -> FieldValidation {
    let name = sanitize_string(raw);
    if name.is_empty() {
        return FieldValidation::fail(NAME_REQUIRED);
    }
    let length = name.chars().count();
    if length < NAME_MIN_CHARS {
        return FieldValidation::fail(NAME_TOO_SHORT);
    }
    if length > NAME_MAX_CHARS {
        return FieldValidation::fail(NAME_TOO_LONG);
    }
    if !NAME_CHARS.is_match(&name) {
        return FieldValidation::fail(NAME_INVALID_CHARS);
    }
    FieldValidation::ok()
}

pub fn validate_email(raw: &str) -> FieldValidation {
    let email = sanitize_email(raw);
    if email.is_empty() {
        return FieldValidation::fail(EMAIL_REQUIRED);
    }
    if !is_valid_email(&email) {
        return FieldValidation::fail(EMAIL_INVALID);
    }
    FieldValidation::ok()
}

pub fn validate_license_plate(raw: &str) -> FieldValidation {
    let plate = sanitize_license_plate(raw);
    if plate.is_empty() {
        return FieldValidation::fail(PLATE_REQUIRED);
    }
    if PlateFormat::detect(&plate).is_none() {
        return FieldValidation::fail(PLATE_INVALID);
    }
    FieldValidation::ok()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Validate every field independently; errors are reported in field order.
pub fn validate_form_data(form: &FormData) -> FormValidation {
    let checks = [
        (FormField::Name, validate_name(&form.name)),
        (FormField::Email, validate_email(&form.email)),
        (FormField::LicensePlate, validate_license_plate(&form.license_plate)),
    ];

    let errors: Vec<FieldError> = checks
        .into_iter()
        .filter_map(|(field, result)| {
            result.error.map(|message| FieldError { field, message })
        })
        .collect();

    FormValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

pub fn normalize_form_data(form: &FormData) -> FormData {
    FormData {
        name: sanitize_string(&form.name),
        email: sanitize_email(&form.email),
        license_plate: sanitize_license_plate(&form.license_plate),
    }
}

/// `ABC1234` becomes `ABC-1234`; Mercosul plates are returned without a hyphen.
pub fn format_license_plate_for_display(plate: &str) -> String {
    let sanitized = sanitize_license_plate(plate);
    match PlateFormat::detect(&sanitized) {
        Some(PlateFormat::Legacy) => format!("{}-{}", &sanitized[..3], &sanitized[3..]),
        _ => sanitized,
    }
}
