use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use wayfinder_core::models::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed array of full service records
    Json,
    /// One flattened row per service
    Csv,
}

const CSV_HEADER: &[&str] = &[
    "id",
    "source_name",
    "external_id",
    "name",
    "organization",
    "address",
    "suburb",
    "state",
    "postcode",
    "phone",
    "email",
    "website",
    "categories",
    "status",
    "quality_score",
];

/// Write services to `path`, or stdout when no path is given.
pub fn export(services: &[Service], format: OutputFormat, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            write_services(services, format, &mut writer)?;
            writer.flush().context("Failed to flush output file")?;
            tracing::info!(count = services.len(), path = %path.display(), "Wrote services");
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_services(services, format, &mut lock)?;
        }
    }
    Ok(())
}

pub fn write_services<W: Write>(services: &[Service], format: OutputFormat, writer: W) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(services, writer),
        OutputFormat::Csv => write_csv(services, writer),
    }
}

fn write_json<W: Write>(services: &[Service], mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, services).context("Failed to write JSON")?;
    writeln!(writer)?;
    Ok(())
}

fn write_csv<W: Write>(services: &[Service], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER)?;

    for service in services {
        let categories = service.categories.iter().cloned().collect::<Vec<_>>().join("; ");
        let quality = format!("{:.3}", service.quality_score());
        let opt = |value: &Option<String>| value.clone().unwrap_or_default();

        csv.write_record([
            service.id.to_string(),
            service.source_name.clone(),
            service.external_id.clone(),
            service.name.clone(),
            service.organization.name.clone(),
            opt(&service.location.address),
            opt(&service.location.suburb),
            opt(&service.location.state),
            opt(&service.location.postcode),
            opt(&service.contact.phone),
            opt(&service.contact.email),
            opt(&service.contact.website),
            categories,
            service.status.as_str().to_string(),
            quality,
        ])?;
    }

    csv.flush().context("Failed to write CSV")?;
    Ok(())
}
