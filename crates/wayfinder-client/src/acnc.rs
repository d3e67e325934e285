//! ACNC charity register, published as a CKAN datastore resource on
//! data.gov.au.
//!
//! The register describes charities rather than services, so the charity's
//! legal name stands in for both the service and organization name. Purpose
//! and beneficiary columns are `Y`/blank flags that become categories and
//! demographic flags.

use async_trait::async_trait;
use wayfinder_core::error::AppError;
use wayfinder_core::job::ExtractConfig;
use wayfinder_core::mapping::{Field, FieldMapping, SourceDescriptor};
use wayfinder_core::models::{RawRecord, Service};
use wayfinder_core::throttle::RetryPolicy;
use wayfinder_core::traits::{Fetcher, SourceAdapter};

use crate::ckan::{CkanAdapter, DATA_GOV_AU};

/// Datastore resource id of the ACNC register on data.gov.au.
pub const ACNC_RESOURCE_ID: &str = "eb1e6be4-5b13-4feb-b28e-388bf7c26f93";

/// Purpose columns and the category each one contributes.
const PURPOSES: &[(&str, &str)] = &[
    ("Advancing_Culture", "Culture"),
    ("Advancing_Education", "Education"),
    ("Advancing_Health", "Health"),
    ("Promote_or_Oppose_Change_to_Law__Government_Poll_or_Prac", "Advocacy"),
    ("Advancing_natual_environment", "Environment"),
    ("Promoting_or_Protecting_Human_Rights", "Human Rights"),
    ("Purposes_beneficial_to_ther_general_public_and_other_analogous", "Community"),
    ("Promoting_reconciliation__mutual_respect_and_tolerance", "Reconciliation"),
    ("Advancing_Religion", "Religion"),
    ("Advancing_social_or_public_welfare", "Social Welfare"),
    ("Advancing_security_or_safety_of_Australia_or_Australian_public", "Public Safety"),
    ("Preventing_or_relieving_suffering_of_animals", "Animal Welfare"),
];

pub fn acnc_mapping() -> FieldMapping {
    FieldMapping::standard()
        .with(Field::ExternalId, &["ABN", "abn"])
        .with(Field::Name, &["Charity_Legal_Name", "Other_Organisation_Names"])
        .with(Field::OrganizationName, &["Charity_Legal_Name"])
        .with(Field::OrganizationType, &["Charity_Size"])
        .with(Field::Abn, &["ABN", "abn"])
        .with(Field::Address, &["Address_Line_1"])
        .with(Field::Suburb, &["Town_City"])
        .with(Field::City, &["Town_City"])
        .with(Field::State, &["State"])
        .with(Field::Postcode, &["Postcode"])
        .with(Field::Website, &["Charity_Website"])
        .with(Field::OrganizationWebsite, &["Charity_Website"])
        .with(Field::YouthSpecific, &["Youth"])
        .with(Field::IndigenousSpecific, &["Aboriginal_or_TSI"])
        .with(Field::DisabilitySpecific, &["People_with_Disabilities"])
        .with(Field::LgbtiSpecific, &["Gay_Lesbian_Bisexual"])
        .with(Field::Categories, &[])
        .with(Field::ServiceTypes, &[])
}

/// CKAN transport with the ACNC field mapping.
#[derive(Clone)]
pub struct AcncAdapter<F: Fetcher> {
    inner: CkanAdapter<F>,
}

impl<F: Fetcher> AcncAdapter<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_resource(fetcher, DATA_GOV_AU, ACNC_RESOURCE_ID)
    }

    pub fn with_resource(
        fetcher: F,
        base_url: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        let inner = CkanAdapter::new("acnc", fetcher, base_url, resource_id)
            .with_mapping(acnc_mapping())
            .with_descriptor(SourceDescriptor::new("acnc", "charity_register", "ckan_api"));
        Self { inner }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.inner = self.inner.with_retry(retry);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.inner = self.inner.with_page_size(page_size);
        self
    }
}

#[async_trait]
impl<F: Fetcher + 'static> SourceAdapter for AcncAdapter<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn descriptor(&self) -> &SourceDescriptor {
        self.inner.descriptor()
    }

    async fn extract(
        &self,
        limit: usize,
        config: &ExtractConfig,
    ) -> Result<Vec<RawRecord>, AppError> {
        self.inner.extract(limit, config).await
    }

    fn normalize(&self, raw: &RawRecord) -> Option<Service> {
        let mut service = self.inner.normalize(raw)?;
        for &(column, category) in PURPOSES {
            if raw.get(column).and_then(|v| v.as_str()).is_some_and(is_flagged) {
                service.categories.insert(category.to_string());
            }
        }
        service.organization.org_type = service
            .organization
            .org_type
            .take()
            .map(|size| format!("charity ({})", size.to_lowercase()));
        Some(service)
    }
}

fn is_flagged(value: &str) -> bool {
    matches!(value.trim(), "Y" | "y" | "Yes" | "yes" | "TRUE" | "true")
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wayfinder_core::models::ServiceStatus;
    use wayfinder_core::testutil::MockFetcher;

    use super::*;

    fn charity() -> RawRecord {
        let value = json!({
            "_id": 41,
            "ABN": "11 005 357 522",
            "Charity_Legal_Name": "Brisbane Youth Service Inc",
            "Address_Line_1": "4 Martin St",
            "Town_City": "Fortitude Valley",
            "State": "Queensland",
            "Postcode": 4006,
            "Charity_Website": "https://brisyouth.org",
            "Charity_Size": "Large",
            "Advancing_Health": "Y",
            "Advancing_social_or_public_welfare": "Y",
            "Advancing_Religion": "",
            "Youth": "Y",
            "People_with_Disabilities": "",
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn maps_register_columns() {
        let acnc = AcncAdapter::new(MockFetcher::new("{}"));
        let service = acnc.normalize(&charity()).unwrap();

        assert_eq!(service.external_id, "11 005 357 522");
        assert_eq!(service.name, "Brisbane Youth Service Inc");
        assert_eq!(service.organization.name, "Brisbane Youth Service Inc");
        assert_eq!(service.organization.abn.as_deref(), Some("11005357522"));
        assert_eq!(service.organization.org_type.as_deref(), Some("charity (large)"));
        assert_eq!(service.location.state.as_deref(), Some("QLD"));
        assert_eq!(service.location.postcode.as_deref(), Some("4006"));
        assert_eq!(service.contact.website.as_deref(), Some("https://brisyouth.org"));
        assert_eq!(service.status, ServiceStatus::Active);
        assert!(service.youth_specific);
        assert!(!service.disability_specific);
        assert_eq!(
            service.categories.iter().cloned().collect::<Vec<_>>(),
            vec!["Health".to_string(), "Social Welfare".to_string()]
        );
        assert!(wayfinder_core::validate(&service).valid);
    }

    #[tokio::test]
    async fn extracts_through_ckan_transport() {
        let body = json!({
            "success": true,
            "result": {"records": [charity()], "total": 1}
        })
        .to_string();
        let fetcher = MockFetcher::new(&body);
        let acnc = AcncAdapter::new(fetcher.clone());

        let records = acnc.extract(50, &ExtractConfig::default()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(acnc.name(), "acnc");
        assert!(fetcher.requested()[0].contains(ACNC_RESOURCE_ID));
    }
}
