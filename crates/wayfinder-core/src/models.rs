use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A raw upstream record, exactly as an adapter extracted it.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Namespace for deriving stable service ids from `source:external_id`.
const SERVICE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5d2a_8f0e_3c41_4b7a_9e62_1f0d_7c3b_a915);

/// Operational status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    #[default]
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Unknown => "unknown",
        }
    }

    /// Map the many upstream spellings of a status onto the canonical set.
    pub fn from_upstream(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "active" | "registered" | "open" | "current" | "operating" => ServiceStatus::Active,
            "inactive" | "closed" | "revoked" | "deregistered" | "ceased" => {
                ServiceStatus::Inactive
            }
            _ => ServiceStatus::Unknown,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ServiceStatus::Active),
            "inactive" => Ok(ServiceStatus::Inactive),
            "unknown" => Ok(ServiceStatus::Unknown),
            _ => Err(format!("Unknown service status: {}", s)),
        }
    }
}

/// How far a record has been checked against reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Pending,
    Verified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Build coordinates only when both values are finite and in range.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgeRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl AgeRange {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn is_consistent(&self) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }

    /// Whether this range overlaps `[lo, hi]`. Open ends are unbounded.
    pub fn overlaps(&self, lo: Option<u32>, hi: Option<u32>) -> bool {
        let own_min = self.min.unwrap_or(0);
        let own_max = self.max.unwrap_or(u32::MAX);
        own_min <= hi.unwrap_or(u32::MAX) && lo.unwrap_or(0) <= own_max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Organization {
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: Option<String>,
    pub abn: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Contact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Funding {
    pub funding_type: Option<String>,
    pub funding_source: Option<String>,
}

/// Provenance of a record and the pipeline's judgement of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub source_name: String,
    pub source_type: String,
    pub extraction_method: String,
    quality_score: f64,
    pub verification_status: VerificationStatus,
}

impl DataSource {
    pub fn new(
        source_name: impl Into<String>,
        source_type: impl Into<String>,
        extraction_method: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            source_type: source_type.into(),
            extraction_method: extraction_method.into(),
            quality_score: 0.0,
            verification_status: VerificationStatus::Unverified,
        }
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    /// Set the quality score, clamped into [0, 1]. NaN becomes 0.
    pub fn set_quality_score(&mut self, score: f64) {
        self.quality_score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
    }
}

/// The canonical service record every source is mapped into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub external_id: String,
    pub source_name: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub status: ServiceStatus,
    pub categories: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub service_types: BTreeSet<String>,
    pub youth_specific: bool,
    pub indigenous_specific: bool,
    pub disability_specific: bool,
    pub lgbti_specific: bool,
    pub age_range: AgeRange,
    pub organization: Organization,
    pub location: Location,
    pub contact: Contact,
    pub funding: Funding,
    pub data_source: DataSource,
    /// Upstream fields with no canonical slot, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: RawRecord,
}

impl Service {
    /// Create a minimal service; the id is derived from source + external id.
    pub fn new(
        source_name: impl Into<String>,
        external_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let source_name = source_name.into();
        let external_id = external_id.into();
        Self {
            id: service_id(&source_name, &external_id),
            data_source: DataSource::new(source_name.clone(), "api", "api"),
            external_id,
            source_name,
            name: name.into(),
            description: None,
            url: None,
            status: ServiceStatus::Active,
            categories: BTreeSet::new(),
            keywords: BTreeSet::new(),
            service_types: BTreeSet::new(),
            youth_specific: false,
            indigenous_specific: false,
            disability_specific: false,
            lgbti_specific: false,
            age_range: AgeRange::default(),
            organization: Organization::default(),
            location: Location::default(),
            contact: Contact::default(),
            funding: Funding::default(),
            extra: RawRecord::new(),
        }
    }

    pub fn quality_score(&self) -> f64 {
        self.data_source.quality_score()
    }
}

/// A confidence-scored candidate match between two services.
///
/// A pair is a signal for the caller; it never implies either record is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub service_a: Uuid,
    pub service_b: Uuid,
    pub confidence: f64,
    pub matched_fields: BTreeSet<String>,
}

/// Derive the stable id for an upstream record.
pub fn service_id(source_name: &str, external_id: &str) -> Uuid {
    Uuid::new_v5(
        &SERVICE_ID_NAMESPACE,
        format!("{source_name}:{external_id}").as_bytes(),
    )
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content hash of a raw record. `serde_json::Map` keeps keys sorted, so
/// the hash does not depend on upstream key order.
pub fn raw_record_hash(raw: &RawRecord) -> String {
    compute_hash(&serde_json::Value::Object(raw.clone()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_service_id_is_stable_per_source() {
        assert_eq!(service_id("acnc", "123"), service_id("acnc", "123"));
        assert_ne!(service_id("acnc", "123"), service_id("ckan", "123"));
    }

    #[test]
    fn test_quality_score_is_clamped() {
        let mut source = DataSource::new("acnc", "api", "ckan");
        source.set_quality_score(1.7);
        assert_eq!(source.quality_score(), 1.0);
        source.set_quality_score(-0.2);
        assert_eq!(source.quality_score(), 0.0);
        source.set_quality_score(f64::NAN);
        assert_eq!(source.quality_score(), 0.0);
    }

    #[test]
    fn test_coordinates_reject_out_of_range() {
        assert!(Coordinates::new(-27.47, 153.02).is_some());
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, f64::NAN).is_none());
    }

    #[test]
    fn test_age_range_overlap() {
        let youth = AgeRange {
            min: Some(12),
            max: Some(25),
        };
        assert!(youth.overlaps(Some(18), None));
        assert!(!youth.overlaps(Some(30), Some(60)));
        assert!(AgeRange::default().overlaps(Some(30), Some(60)));
    }

    #[test]
    fn test_status_from_upstream() {
        assert_eq!(
            ServiceStatus::from_upstream("Registered"),
            ServiceStatus::Active
        );
        assert_eq!(
            ServiceStatus::from_upstream(" revoked "),
            ServiceStatus::Inactive
        );
        assert_eq!(ServiceStatus::from_upstream("maybe"), ServiceStatus::Unknown);
    }

    #[test]
    fn test_raw_record_hash_ignores_key_order() {
        let a: RawRecord = serde_json::from_str(r#"{"a":1,"b":"x"}"#).unwrap();
        let b: RawRecord = serde_json::from_str(r#"{"b":"x","a":1}"#).unwrap();
        assert_eq!(raw_record_hash(&a), raw_record_hash(&b));
    }
}
