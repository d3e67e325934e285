//! Ordered field-mapping tables and the shared normalization routine.
//!
//! Upstream sources spell the same attribute many different ways
//! (`name`, `service_name`, `Charity_Legal_Name`, ...). Each adapter owns a
//! [`FieldMapping`] listing, per canonical field, the upstream keys to try in
//! order; [`normalize_record`] takes the first present, non-empty value.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;

use crate::models::{
    AgeRange, Coordinates, DataSource, RawRecord, Service, ServiceStatus, raw_record_hash,
};
use crate::validate::MIN_NAME_LEN;

/// Canonical attributes an upstream key can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ExternalId,
    Name,
    Description,
    Url,
    Status,
    Categories,
    Keywords,
    ServiceTypes,
    YouthSpecific,
    IndigenousSpecific,
    DisabilitySpecific,
    LgbtiSpecific,
    MinAge,
    MaxAge,
    OrganizationName,
    OrganizationType,
    Abn,
    OrganizationWebsite,
    Address,
    Suburb,
    City,
    State,
    Postcode,
    Latitude,
    Longitude,
    Phone,
    Email,
    Website,
    FundingType,
    FundingSource,
}

/// Per-field ordered candidate keys.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    candidates: HashMap<Field, Vec<String>>,
}

impl FieldMapping {
    /// An empty table. Unmapped fields normalize to absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// The generic table used by adapters without a source-specific one.
    pub fn standard() -> Self {
        Self::new()
            .with(Field::ExternalId, &["id", "external_id", "service_id", "record_id", "_id"])
            .with(
                Field::Name,
                &["name", "service_name", "organisation_name", "title", "provider"],
            )
            .with(Field::Description, &["description", "summary", "details", "about"])
            .with(Field::Url, &["url", "service_url", "link"])
            .with(Field::Status, &["status", "service_status"])
            .with(Field::Categories, &["categories", "category", "service_category"])
            .with(Field::Keywords, &["keywords", "tags"])
            .with(Field::ServiceTypes, &["service_types", "service_type", "type"])
            .with(Field::YouthSpecific, &["youth_specific", "youth"])
            .with(Field::IndigenousSpecific, &["indigenous_specific", "indigenous"])
            .with(Field::DisabilitySpecific, &["disability_specific", "disability"])
            .with(Field::LgbtiSpecific, &["lgbti_specific", "lgbtiq_specific", "lgbti"])
            .with(Field::MinAge, &["min_age", "age_min", "minimum_age"])
            .with(Field::MaxAge, &["max_age", "age_max", "maximum_age"])
            .with(
                Field::OrganizationName,
                &["organization_name", "organisation", "organization", "provider_name", "provider"],
            )
            .with(Field::OrganizationType, &["organization_type", "organisation_type", "org_type"])
            .with(Field::Abn, &["abn", "ABN"])
            .with(Field::OrganizationWebsite, &["organization_website", "organisation_website"])
            .with(Field::Address, &["address", "street_address", "address_line_1", "street"])
            .with(Field::Suburb, &["suburb", "locality"])
            .with(Field::City, &["city", "town", "town_city", "suburb"])
            .with(Field::State, &["state", "region", "state_territory"])
            .with(Field::Postcode, &["postcode", "postal_code", "post_code", "zip"])
            .with(Field::Latitude, &["latitude", "lat"])
            .with(Field::Longitude, &["longitude", "lng", "lon", "long"])
            .with(Field::Phone, &["phone", "telephone", "phone_number", "contact_phone"])
            .with(Field::Email, &["email", "email_address", "contact_email"])
            .with(Field::Website, &["website", "web", "homepage"])
            .with(Field::FundingType, &["funding_type"])
            .with(Field::FundingSource, &["funding_source", "funder"])
    }

    /// Set the candidate keys for a field, replacing any previous list.
    pub fn with(mut self, field: Field, keys: &[&str]) -> Self {
        self.candidates
            .insert(field, keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Put `keys` ahead of the existing candidates for a field.
    pub fn prepend(mut self, field: Field, keys: &[&str]) -> Self {
        let existing = self.candidates.remove(&field).unwrap_or_default();
        let mut merged: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        merged.extend(existing.into_iter().filter(|k| !keys.contains(&k.as_str())));
        self.candidates.insert(field, merged);
        self
    }

    pub fn candidates(&self, field: Field) -> &[String] {
        self.candidates.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First present, non-empty, trimmed textual value.
    pub fn text(&self, raw: &RawRecord, field: Field) -> Option<String> {
        self.candidates(field)
            .iter()
            .filter_map(|key| raw.get(key))
            .find_map(value_as_text)
    }

    /// First value that parses as a finite number.
    pub fn number(&self, raw: &RawRecord, field: Field) -> Option<f64> {
        self.candidates(field)
            .iter()
            .filter_map(|key| raw.get(key))
            .find_map(value_as_number)
    }

    /// First value that reads as a boolean; absent means false.
    pub fn flag(&self, raw: &RawRecord, field: Field) -> bool {
        self.candidates(field)
            .iter()
            .filter_map(|key| raw.get(key))
            .find_map(value_as_flag)
            .unwrap_or(false)
    }

    /// First non-empty list, from either an array or a delimited string.
    pub fn list(&self, raw: &RawRecord, field: Field) -> BTreeSet<String> {
        self.candidates(field)
            .iter()
            .filter_map(|key| raw.get(key))
            .map(value_as_list)
            .find(|items| !items.is_empty())
            .unwrap_or_default()
    }

    fn age(&self, raw: &RawRecord, field: Field) -> Option<u32> {
        self.number(raw, field)
            .filter(|n| (0.0..=150.0).contains(n))
            .map(|n| n.round() as u32)
    }

    fn mapped_keys(&self) -> HashSet<&str> {
        self.candidates
            .values()
            .flat_map(|keys| keys.iter().map(String::as_str))
            .collect()
    }
}

/// Provenance stamped onto every record an adapter normalizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub source_name: String,
    pub source_type: String,
    pub extraction_method: String,
}

impl SourceDescriptor {
    pub fn new(
        source_name: impl Into<String>,
        source_type: impl Into<String>,
        extraction_method: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            source_type: source_type.into(),
            extraction_method: extraction_method.into(),
        }
    }
}

/// Map one raw record onto the canonical shape.
///
/// Returns `None` when no name candidate yields at least
/// [`MIN_NAME_LEN`] characters; such records are rejected, not defaulted.
pub fn normalize_record(
    raw: &RawRecord,
    mapping: &FieldMapping,
    source: &SourceDescriptor,
) -> Option<Service> {
    let name = mapping.text(raw, Field::Name)?;
    if name.chars().count() < MIN_NAME_LEN {
        return None;
    }

    let external_id = mapping
        .text(raw, Field::ExternalId)
        .unwrap_or_else(|| raw_record_hash(raw));

    let mut service = Service::new(source.source_name.clone(), external_id, name);
    service.data_source = DataSource::new(
        source.source_name.clone(),
        source.source_type.clone(),
        source.extraction_method.clone(),
    );

    service.description = mapping.text(raw, Field::Description);
    service.url = mapping.text(raw, Field::Url);
    service.status = match mapping.text(raw, Field::Status) {
        Some(status) => ServiceStatus::from_upstream(&status),
        None => ServiceStatus::Active,
    };

    service.categories = mapping.list(raw, Field::Categories);
    service.keywords = mapping.list(raw, Field::Keywords);
    service.service_types = mapping.list(raw, Field::ServiceTypes);

    service.youth_specific = mapping.flag(raw, Field::YouthSpecific);
    service.indigenous_specific = mapping.flag(raw, Field::IndigenousSpecific);
    service.disability_specific = mapping.flag(raw, Field::DisabilitySpecific);
    service.lgbti_specific = mapping.flag(raw, Field::LgbtiSpecific);

    let (min, max) = match (
        mapping.age(raw, Field::MinAge),
        mapping.age(raw, Field::MaxAge),
    ) {
        (Some(min), Some(max)) if min > max => (Some(max), Some(min)),
        other => other,
    };
    service.age_range = AgeRange { min, max };

    service.organization.name = mapping
        .text(raw, Field::OrganizationName)
        .unwrap_or_default();
    service.organization.org_type = mapping.text(raw, Field::OrganizationType);
    service.organization.abn = mapping
        .text(raw, Field::Abn)
        .map(|abn| abn.chars().filter(|c| !c.is_whitespace()).collect());
    service.organization.website = mapping.text(raw, Field::OrganizationWebsite);

    service.location.address = mapping.text(raw, Field::Address);
    service.location.suburb = mapping.text(raw, Field::Suburb);
    service.location.city = mapping.text(raw, Field::City);
    service.location.state = mapping
        .text(raw, Field::State)
        .map(|state| normalize_state(&state));
    service.location.postcode = mapping.text(raw, Field::Postcode);
    service.location.coordinates = match (
        mapping.number(raw, Field::Latitude),
        mapping.number(raw, Field::Longitude),
    ) {
        (Some(lat), Some(lng)) => Coordinates::new(lat, lng),
        _ => None,
    };

    service.contact.phone = mapping.text(raw, Field::Phone);
    service.contact.email = mapping.text(raw, Field::Email);
    service.contact.website = mapping.text(raw, Field::Website);

    service.funding.funding_type = mapping.text(raw, Field::FundingType);
    service.funding.funding_source = mapping.text(raw, Field::FundingSource);

    let mapped = mapping.mapped_keys();
    service.extra = raw
        .iter()
        .filter(|(key, _)| !mapped.contains(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Some(service)
}

/// Normalize Australian state and territory names to their abbreviation.
/// Unrecognised values are upper-cased and trimmed.
pub fn normalize_state(state: &str) -> String {
    let folded = state.trim().to_lowercase();
    let abbrev = match folded.as_str() {
        "queensland" | "qld" => "QLD",
        "new south wales" | "nsw" => "NSW",
        "victoria" | "vic" => "VIC",
        "tasmania" | "tas" => "TAS",
        "south australia" | "sa" => "SA",
        "western australia" | "wa" => "WA",
        "northern territory" | "nt" => "NT",
        "australian capital territory" | "act" => "ACT",
        _ => return state.trim().to_uppercase(),
    };
    abbrev.to_string()
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn value_as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_as_list(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_as_text).collect(),
        Value::String(s) => s
            .split([',', ';', '|'])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}
