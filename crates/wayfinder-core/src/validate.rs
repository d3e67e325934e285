//! Required-field checks for canonical service records.
//!
//! Validation is local: a failing record is dropped from its batch and
//! counted, it never fails the job that produced it.

use serde::Serialize;

use crate::error::AppError;
use crate::models::{Coordinates, Service, ServiceStatus};

/// Minimum service name length, measured in characters after trimming.
pub const MIN_NAME_LEN: usize = 3;

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Collapse the report into a single [`AppError::ValidationError`].
    pub fn into_result(self) -> Result<(), AppError> {
        if self.valid {
            Ok(())
        } else {
            Err(AppError::ValidationError(self.errors.join("; ")))
        }
    }
}

/// Check a service against the canonical schema.
pub fn validate(service: &Service) -> ValidationReport {
    let mut errors = Vec::new();

    let name = service.name.trim();
    if name.is_empty() {
        errors.push("name is required".to_string());
    } else if name.chars().count() < MIN_NAME_LEN {
        errors.push(format!("name must be at least {MIN_NAME_LEN} characters"));
    }

    if !matches!(
        service.status,
        ServiceStatus::Active | ServiceStatus::Inactive
    ) {
        errors.push(format!(
            "status must be active or inactive, got {}",
            service.status
        ));
    }

    if service.organization.name.trim().is_empty() {
        errors.push("organization.name is required".to_string());
    }

    if !service.age_range.is_consistent() {
        errors.push("age_range.min must not exceed age_range.max".to_string());
    }

    if let Some(coords) = service.location.coordinates
        && Coordinates::new(coords.lat, coords.lng).is_none()
    {
        errors.push(format!(
            "coordinates ({}, {}) out of range",
            coords.lat, coords.lng
        ));
    }

    let score = service.quality_score();
    if !(0.0..=1.0).contains(&score) {
        errors.push(format!("quality_score {score} outside [0, 1]"));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}
