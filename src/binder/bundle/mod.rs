//! Bootstrapper bundle binding.
//!
//! Assembles the chain/container/payload graph bottom-up, emits the two
//! bundle manifests, builds every container cabinet, and produces the
//! final executable from the stub. Required aggregate tables are checked
//! first: a bundle without its single bundle row, chain row, packages, or
//! UX payloads fails immediately because nothing downstream is
//! meaningful.

pub mod chain;
pub mod container;
pub mod manifest;
pub mod search;
pub mod stub;

use crate::bail;
use crate::binder::error::{Context, Error, ErrorExt, Result};
use crate::binder::messages::Messages;
use crate::model::Output;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use container::{ContainerKind, PayloadInfo, UX_GROUP};

/// File name of the engine manifest inside the UX container. The engine
/// always reads entry "0" first.
const BURN_MANIFEST_ENTRY: &str = "0";

/// File name of the BA data document inside the UX container.
const BA_DATA_ENTRY: &str = "BootstrapperApplicationData.xml";

/// The single authored bundle row.
#[derive(Clone, Debug)]
pub struct BundleInfo {
    pub bundle_id: String,
    pub name: String,
    pub version: String,
    pub manufacturer: Option<String>,
    pub upgrade_code: String,
    pub per_machine: bool,
    pub about_url: Option<String>,
    pub icon_source: Option<String>,
    pub splash_screen_source: Option<String>,
    pub stub_source: PathBuf,
}

/// One burn variable.
#[derive(Clone, Debug)]
pub struct VariableInfo {
    pub id: String,
    pub value: Option<String>,
    pub variable_type: Option<String>,
    pub hidden: bool,
    pub persisted: bool,
}

/// Reads the single bundle row; its absence is a hard failure.
pub fn gather_bundle_info(output: &Output) -> Result<BundleInfo> {
    let row = output
        .table("Bundle")
        .and_then(|t| t.rows().first())
        .ok_or_else(|| Error::MissingBundleInfo("Bundle".into()))?;
    Ok(BundleInfo {
        bundle_id: row.data(0).to_string(),
        name: row.data(1).to_string(),
        version: row.data(2).to_string(),
        manufacturer: row.data(3).as_str().map(str::to_string),
        upgrade_code: row.data(4).to_string(),
        per_machine: row.data(5).as_int().unwrap_or(1) != 0,
        about_url: row.data(6).as_str().map(str::to_string),
        icon_source: row.data(7).as_str().map(str::to_string),
        splash_screen_source: row.data(8).as_str().map(str::to_string),
        stub_source: PathBuf::from(row.data(9).to_string()),
    })
}

/// Reads the burn variables.
pub fn gather_variables(output: &Output) -> Vec<VariableInfo> {
    let Some(table) = output.table("BundleVariable") else {
        return Vec::new();
    };
    table
        .rows()
        .iter()
        .map(|row| VariableInfo {
            id: row.data(0).to_string(),
            value: row.data(1).as_str().map(str::to_string),
            variable_type: row.data(2).as_str().map(str::to_string),
            hidden: row.data(3).as_int().unwrap_or(0) != 0,
            persisted: row.data(4).as_int().unwrap_or(0) != 0,
        })
        .collect()
}

/// Binds a bundle output to its final executable.
pub fn bind_bundle(
    output: &Output,
    path: &Path,
    scratch: &Path,
    messages: &mut Messages,
) -> Result<()> {
    std::fs::create_dir_all(scratch).fs_context("creating bundle scratch", scratch)?;

    let bundle = gather_bundle_info(output)?;
    let payloads = container::gather_payloads(output)?;
    let payload_map: HashMap<String, PayloadInfo> =
        payloads.iter().map(|p| (p.id.clone(), p.clone())).collect();

    let groups = container::gather_payload_groups(output);
    let ux_payloads = groups
        .get(UX_GROUP)
        .filter(|members| !members.is_empty())
        .cloned()
        .ok_or_else(|| Error::MissingBundleInfo(UX_GROUP.into()))?;

    let searches = search::gather_searches(output, messages)?;
    let variables = gather_variables(output);
    let containers = container::gather_containers(output, &payloads, &ux_payloads)?;
    let chain = chain::gather_chain(output, &payload_map, messages)?;

    if messages.has_errors() {
        bail!("bundle binding stopped after earlier errors");
    }

    // Manifests land in scratch and travel inside the UX container.
    let burn_manifest = manifest::write_burn_manifest(
        &bundle,
        &variables,
        &searches,
        &payloads,
        &ux_payloads,
        &containers,
        &chain,
    )?;
    let ba_data = manifest::write_ba_data_manifest(output)?;
    let burn_manifest_path = scratch.join("burn.manifest.xml");
    let ba_data_path = scratch.join(BA_DATA_ENTRY);
    std::fs::write(&burn_manifest_path, &burn_manifest)
        .fs_context("writing engine manifest", &burn_manifest_path)?;
    std::fs::write(&ba_data_path, &ba_data).fs_context("writing BA data", &ba_data_path)?;

    // The UX container carries the manifests first, then branding
    // resources, then the BA payloads.
    let mut ux_entries: Vec<PayloadInfo> = vec![
        synthetic_payload(BURN_MANIFEST_ENTRY, &burn_manifest_path),
        synthetic_payload(BA_DATA_ENTRY, &ba_data_path),
    ];
    ux_entries.extend(branding_entries(&bundle)?);
    for id in &ux_payloads {
        if let Some(payload) = payload_map.get(id) {
            ux_entries.push(payload.clone());
        }
    }
    let ux_container_path = scratch.join("ux.container.cab");
    let ux_refs: Vec<&PayloadInfo> = ux_entries.iter().collect();
    container::build_container_cabinet(&ux_refs, &ux_container_path)
        .context("building UX container")?;

    let mut attached: Vec<(String, PathBuf)> = Vec::new();
    for info in &containers {
        let cabinet_path = scratch.join(format!("{}.cab", info.id));
        let members: Vec<&PayloadInfo> = info
            .payloads
            .iter()
            .filter_map(|id| payload_map.get(id))
            .collect();
        container::build_container_cabinet(&members, &cabinet_path)
            .with_context(|| format!("building container '{}'", info.id))?;
        match info.kind {
            ContainerKind::Attached => attached.push((info.id.clone(), cabinet_path)),
            ContainerKind::Detached => {
                let dest = path
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(&info.name);
                std::fs::copy(&cabinet_path, &dest)
                    .fs_context("placing detached container", &dest)?;
            }
        }
    }

    stub::build_bundle_exe(&bundle.stub_source, path, &ux_container_path, &attached)?;
    stub::patch_registration(path, &bundle)?;

    log::info!("generated bundle {}", path.display());
    Ok(())
}

/// UX-container entry name for a branding resource: its bare file name.
/// Authored sources may carry either separator.
pub(crate) fn branding_entry_name(source: &str) -> String {
    source
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source)
        .to_string()
}

/// Icon and splash-screen resources travel in the UX container so the
/// engine and BA can render them at runtime. A missing source file is a
/// hard failure, same as any other payload.
fn branding_entries(bundle: &BundleInfo) -> Result<Vec<PayloadInfo>> {
    let mut entries = Vec::new();
    for source in [&bundle.icon_source, &bundle.splash_screen_source]
        .into_iter()
        .flatten()
    {
        let path = PathBuf::from(source);
        if !path.is_file() {
            bail!("bundle branding resource '{source}' was not found");
        }
        entries.push(synthetic_payload(&branding_entry_name(source), &path));
    }
    Ok(entries)
}

fn synthetic_payload(id: &str, source: &Path) -> PayloadInfo {
    PayloadInfo {
        id: id.to_string(),
        name: id.to_string(),
        source: source.to_path_buf(),
        size: 0,
        hash: String::new(),
        compressed: true,
        download_url: None,
        container: None,
        certificate_public_key: None,
        certificate_thumbprint: None,
    }
}
