pub mod acnc;
pub mod ckan;
pub mod csv_file;
pub mod fetcher;
pub mod json_api;
mod page;
pub mod sources;

pub use acnc::AcncAdapter;
pub use ckan::CkanAdapter;
pub use csv_file::CsvFileAdapter;
pub use fetcher::ReqwestFetcher;
pub use json_api::{JsonApiAdapter, Paging};
pub use sources::{SourceSettings, build_registry};
