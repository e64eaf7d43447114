//! The install chain.
//!
//! Chain packages are typed by their native format. Each package's
//! payload is probed to recover display metadata the manifest needs:
//! product/upgrade codes and per-machine-ness out of an MSI, the patch
//! code out of an MSP, format sanity out of an executable. Rollback
//! boundaries partition the chain; when none is authored one is inserted
//! at the chain head so the first group is always delimited.

use crate::bail;
use crate::binder::bundle::container::PayloadInfo;
use crate::binder::error::{Context, Error, ErrorExt, Result};
use crate::binder::messages::Messages;
use crate::model::Output;
use std::collections::HashMap;
use std::path::Path;

/// Id of the rollback boundary synthesized at the chain head.
pub const DEFAULT_BOUNDARY_ID: &str = "DefaultBoundary";

/// Native format of a chain package.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PackageKind {
    Exe,
    Msi,
    Msp,
    Msu,
}

impl PackageKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "Exe" => Some(PackageKind::Exe),
            "Msi" => Some(PackageKind::Msi),
            "Msp" => Some(PackageKind::Msp),
            "Msu" => Some(PackageKind::Msu),
            _ => None,
        }
    }

    /// The manifest element name for this package type.
    pub fn element_name(self) -> &'static str {
        match self {
            PackageKind::Exe => "ExePackage",
            PackageKind::Msi => "MsiPackage",
            PackageKind::Msp => "MspPackage",
            PackageKind::Msu => "MsuPackage",
        }
    }
}

/// Metadata recovered from a package's native format.
#[derive(Clone, Debug, Default)]
pub struct PackageMetadata {
    pub display_name: Option<String>,
    pub version: Option<String>,
    pub product_code: Option<String>,
    pub upgrade_code: Option<String>,
    /// Patch code, for MSP packages.
    pub patch_code: Option<String>,
    pub per_machine: bool,
}

/// One typed package in the chain.
#[derive(Clone, Debug)]
pub struct ChainPackageInfo {
    pub id: String,
    pub kind: PackageKind,
    pub payload: String,
    pub vital: bool,
    pub permanent: bool,
    pub cache: bool,
    pub install_command: Option<String>,
    pub repair_command: Option<String>,
    pub uninstall_command: Option<String>,
    pub install_condition: Option<String>,
    pub log_path_variable: Option<String>,
    pub metadata: PackageMetadata,
}

/// One element of the ordered chain.
#[derive(Clone, Debug)]
pub enum ChainItem {
    Package(ChainPackageInfo),
    RollbackBoundary { id: String },
}

/// The resolved chain.
#[derive(Clone, Debug)]
pub struct ChainInfo {
    pub disable_rollback: bool,
    pub items: Vec<ChainItem>,
}

/// Reads the chain row and its ordered packages, probing each payload's
/// native format for metadata.
pub fn gather_chain(
    output: &Output,
    payloads: &HashMap<String, PayloadInfo>,
    messages: &mut Messages,
) -> Result<ChainInfo> {
    let chain = output
        .table("Chain")
        .and_then(|t| t.rows().first())
        .ok_or_else(|| Error::MissingBundleInfo("Chain".into()))?;
    let disable_rollback = chain.data(1).as_int().unwrap_or(0) != 0;

    let table = output
        .table("ChainPackage")
        .filter(|t| !t.rows().is_empty())
        .ok_or_else(|| Error::MissingBundleInfo("ChainPackage".into()))?;

    let mut ordered: Vec<(i32, usize)> = table
        .rows()
        .iter()
        .enumerate()
        .map(|(index, row)| (row.data(3).as_int().unwrap_or(0), index))
        .collect();
    ordered.sort_unstable();

    let mut items = Vec::with_capacity(ordered.len());
    let mut has_boundary_at_head = false;
    for (position, (_, index)) in ordered.iter().enumerate() {
        let row = &table.rows()[*index];
        let id = row.data(0).to_string();
        let type_token = row.data(1).to_string();

        if type_token == "RollbackBoundary" {
            if position == 0 {
                has_boundary_at_head = true;
            }
            items.push(ChainItem::RollbackBoundary { id });
            continue;
        }
        let Some(kind) = PackageKind::parse(&type_token) else {
            messages.error_at(
                row.source(),
                format!("chain package '{id}' has unknown type '{type_token}'"),
            );
            continue;
        };

        let payload_id = row.data(2).to_string();
        let Some(payload) = payloads.get(&payload_id) else {
            messages.error_at(
                row.source(),
                format!("chain package '{id}' references unknown payload '{payload_id}'"),
            );
            continue;
        };
        let metadata = probe_package(kind, &payload.source)
            .with_context(|| format!("reading chain package '{id}'"))?;

        items.push(ChainItem::Package(ChainPackageInfo {
            id,
            kind,
            payload: payload_id,
            vital: row.data(4).as_int().unwrap_or(1) != 0,
            permanent: row.data(5).as_int().unwrap_or(0) != 0,
            cache: row.data(6).as_int().unwrap_or(1) != 0,
            install_command: row.data(7).as_str().map(str::to_string),
            repair_command: row.data(8).as_str().map(str::to_string),
            uninstall_command: row.data(9).as_str().map(str::to_string),
            install_condition: row.data(10).as_str().map(str::to_string),
            log_path_variable: row.data(11).as_str().map(str::to_string),
            metadata,
        }));
    }

    if items.is_empty() {
        return Err(Error::MissingBundleInfo("ChainPackage".into()));
    }
    if !has_boundary_at_head {
        items.insert(
            0,
            ChainItem::RollbackBoundary {
                id: DEFAULT_BOUNDARY_ID.to_string(),
            },
        );
    }
    Ok(ChainInfo {
        disable_rollback,
        items,
    })
}

/// Probes one package file according to its native format.
pub fn probe_package(kind: PackageKind, source: &Path) -> Result<PackageMetadata> {
    match kind {
        PackageKind::Msi => probe_msi(source),
        PackageKind::Msp => probe_msp(source),
        PackageKind::Exe => probe_exe(source),
        // Update packages carry no probeable metadata.
        PackageKind::Msu => Ok(PackageMetadata::default()),
    }
}

/// MSI: product properties plus summary-information fallbacks.
fn probe_msi(source: &Path) -> Result<PackageMetadata> {
    let mut package = msi::open(source).fs_context("opening MSI package", source)?;
    let mut metadata = PackageMetadata {
        display_name: Some(package.summary_info().subject().unwrap_or("").to_string())
            .filter(|s| !s.is_empty()),
        ..Default::default()
    };
    if package.has_table("Property") {
        for row in package.select_rows(msi::Select::table("Property"))? {
            let (Some(name), Some(value)) = (row[0].as_str(), row[1].as_str()) else {
                continue;
            };
            match name {
                "ProductCode" => metadata.product_code = Some(value.to_string()),
                "UpgradeCode" => metadata.upgrade_code = Some(value.to_string()),
                "ProductVersion" => metadata.version = Some(value.to_string()),
                "ProductName" => metadata.display_name = Some(value.to_string()),
                "ALLUSERS" => metadata.per_machine = value == "1",
                _ => {}
            }
        }
    }
    Ok(metadata)
}

/// MSP: patch code from the summary revision field.
fn probe_msp(source: &Path) -> Result<PackageMetadata> {
    let package = msi::open(source).fs_context("opening MSP package", source)?;
    let summary = package.summary_info();
    Ok(PackageMetadata {
        display_name: summary.subject().map(str::to_string).filter(|s| !s.is_empty()),
        patch_code: summary.uuid().map(|uuid| format!("{{{}}}", uuid.hyphenated().to_string().to_uppercase())),
        per_machine: true,
        ..Default::default()
    })
}

/// Exe: confirm the payload really is a PE image before chaining it.
fn probe_exe(source: &Path) -> Result<PackageMetadata> {
    let data = std::fs::read(source).fs_context("reading executable package", source)?;
    if data.len() < 16 {
        bail!("executable package '{}' is too small", source.display());
    }
    let hint_bytes: &[u8; 16] = data
        .get(0..16)
        .and_then(|slice| slice.try_into().ok())
        .context("failed to extract hint bytes from package")?;
    match goblin::peek_bytes(hint_bytes) {
        Ok(goblin::Hint::PE) => {}
        Ok(_) | Err(_) => bail!(
            "executable package '{}' is not a PE image",
            source.display()
        ),
    }
    let display_name = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned());
    Ok(PackageMetadata {
        display_name,
        ..Default::default()
    })
}
