//! Bundle manifest emission.
//!
//! Two XML documents are embedded in every bundle: the engine manifest
//! (`BurnManifest` root) driving install behavior, and a
//! bootstrapper-application data file carrying one element per row of
//! every BA-visible table so the UX can render authored data without
//! understanding the engine schema.

use crate::binder::bundle::chain::{ChainInfo, ChainItem};
use crate::binder::bundle::container::{ContainerInfo, ContainerKind, PayloadInfo};
use crate::binder::bundle::search::SearchInfo;
use crate::binder::bundle::{BundleInfo, VariableInfo};
use crate::binder::error::Result;
use crate::model::Output;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

const BURN_NAMESPACE: &str = "http://schemas.msikit.example/2026/burn";
const BA_DATA_NAMESPACE: &str = "http://schemas.msikit.example/2026/BootstrapperApplicationData";

fn start<'a>(name: &'a str, attributes: &[(&str, &str)]) -> BytesStart<'a> {
    let mut element = BytesStart::new(name);
    for (key, value) in attributes {
        element.push_attribute((*key, *value));
    }
    element
}

fn write_empty(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    attributes: &[(&str, &str)],
) -> Result<()> {
    writer.write_event(Event::Empty(start(name, attributes)))?;
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Attributes shared by every payload element.
fn payload_attributes(payload: &PayloadInfo) -> Vec<(String, String)> {
    let mut attributes = vec![
        ("Id".to_string(), payload.id.clone()),
        ("FilePath".to_string(), payload.name.clone()),
        ("FileSize".to_string(), payload.size.to_string()),
        ("Hash".to_string(), payload.hash.clone()),
        (
            "Packaging".to_string(),
            if payload.compressed { "embedded" } else { "external" }.to_string(),
        ),
    ];
    if let Some(url) = &payload.download_url {
        attributes.push(("DownloadUrl".to_string(), url.clone()));
    }
    if let Some(key) = &payload.certificate_public_key {
        attributes.push(("CertificateRootPublicKeyIdentifier".to_string(), key.clone()));
    }
    if let Some(thumbprint) = &payload.certificate_thumbprint {
        attributes.push(("CertificateRootThumbprint".to_string(), thumbprint.clone()));
    }
    attributes
}

fn write_payload(
    writer: &mut Writer<Vec<u8>>,
    payload: &PayloadInfo,
    container: Option<&str>,
) -> Result<()> {
    let mut attributes = payload_attributes(payload);
    if let Some(container) = container {
        attributes.push(("Container".to_string(), container.to_string()));
    }
    let borrowed: Vec<(&str, &str)> = attributes
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    write_empty(writer, "Payload", &borrowed)
}

/// Emits the Burn engine manifest.
pub fn write_burn_manifest(
    bundle: &BundleInfo,
    variables: &[VariableInfo],
    searches: &[SearchInfo],
    payloads: &[PayloadInfo],
    ux_payloads: &[String],
    containers: &[ContainerInfo],
    chain: &ChainInfo,
) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(start("BurnManifest", &[("xmlns", BURN_NAMESPACE)])))?;

    for variable in variables {
        let mut attributes = vec![("Id", variable.id.as_str())];
        if let Some(value) = &variable.value {
            attributes.push(("Value", value.as_str()));
        }
        if let Some(variable_type) = &variable.variable_type {
            attributes.push(("Type", variable_type.as_str()));
        }
        let hidden = yes_no(variable.hidden);
        let persisted = yes_no(variable.persisted);
        attributes.push(("Hidden", hidden));
        attributes.push(("Persisted", persisted));
        write_empty(&mut writer, "Variable", &attributes)?;
    }

    for search in searches {
        let mut attributes = vec![
            ("Id", search.id.as_str()),
            ("Target", search.target.as_str()),
            ("Variable", search.variable.as_str()),
        ];
        if let Some(condition) = &search.condition {
            attributes.push(("Condition", condition.as_str()));
        }
        write_empty(&mut writer, search.kind.element_name(), &attributes)?;
    }

    writer.write_event(Event::Start(start("UX", &[])))?;
    for id in ux_payloads {
        if let Some(payload) = payloads.iter().find(|p| p.id == *id) {
            write_payload(&mut writer, payload, None)?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("UX")))?;

    for container in containers {
        write_empty(
            &mut writer,
            "Container",
            &[
                ("Id", container.id.as_str()),
                ("FilePath", container.name.as_str()),
                (
                    "Attached",
                    yes_no(container.kind == ContainerKind::Attached),
                ),
            ],
        )?;
    }

    let containing: std::collections::HashMap<&str, &str> = containers
        .iter()
        .flat_map(|c| c.payloads.iter().map(move |p| (p.as_str(), c.id.as_str())))
        .collect();
    for payload in payloads {
        if ux_payloads.contains(&payload.id) {
            continue;
        }
        write_payload(&mut writer, payload, containing.get(payload.id.as_str()).copied())?;
    }

    let version = bundle.version.as_str();
    writer.write_event(Event::Start(start(
        "Registration",
        &[
            ("Id", bundle.bundle_id.as_str()),
            ("UpgradeCode", bundle.upgrade_code.as_str()),
            ("Version", version),
            ("PerMachine", yes_no(bundle.per_machine)),
        ],
    )))?;
    {
        let icon = bundle
            .icon_source
            .as_deref()
            .map(crate::binder::bundle::branding_entry_name);
        let mut attributes = vec![("DisplayName", bundle.name.as_str())];
        if let Some(manufacturer) = &bundle.manufacturer {
            attributes.push(("Publisher", manufacturer.as_str()));
        }
        if let Some(url) = &bundle.about_url {
            attributes.push(("AboutUrl", url.as_str()));
        }
        if let Some(icon) = &icon {
            attributes.push(("DisplayIcon", icon.as_str()));
        }
        write_empty(&mut writer, "Arp", &attributes)?;
    }
    if let Some(splash) = &bundle.splash_screen_source {
        let entry = crate::binder::bundle::branding_entry_name(splash);
        write_empty(&mut writer, "SplashScreen", &[("FilePath", entry.as_str())])?;
    }
    writer.write_event(Event::End(BytesEnd::new("Registration")))?;

    writer.write_event(Event::Start(start(
        "Chain",
        &[("DisableRollback", yes_no(chain.disable_rollback))],
    )))?;
    for item in &chain.items {
        match item {
            ChainItem::RollbackBoundary { id } => {
                write_empty(&mut writer, "RollbackBoundary", &[("Id", id.as_str())])?;
            }
            ChainItem::Package(package) => {
                let mut attributes = vec![
                    ("Id".to_string(), package.id.clone()),
                    ("Payload".to_string(), package.payload.clone()),
                    ("Vital".to_string(), yes_no(package.vital).to_string()),
                    ("Permanent".to_string(), yes_no(package.permanent).to_string()),
                    ("Cache".to_string(), yes_no(package.cache).to_string()),
                ];
                if let Some(name) = &package.metadata.display_name {
                    attributes.push(("DisplayName".to_string(), name.clone()));
                }
                if let Some(version) = &package.metadata.version {
                    attributes.push(("Version".to_string(), version.clone()));
                }
                if let Some(code) = &package.metadata.product_code {
                    attributes.push(("ProductCode".to_string(), code.clone()));
                }
                if let Some(code) = &package.metadata.upgrade_code {
                    attributes.push(("UpgradeCode".to_string(), code.clone()));
                }
                if let Some(code) = &package.metadata.patch_code {
                    attributes.push(("PatchCode".to_string(), code.clone()));
                }
                if package.metadata.per_machine {
                    attributes.push(("PerMachine".to_string(), "yes".to_string()));
                }
                if let Some(command) = &package.install_command {
                    attributes.push(("InstallArguments".to_string(), command.clone()));
                }
                if let Some(command) = &package.repair_command {
                    attributes.push(("RepairArguments".to_string(), command.clone()));
                }
                if let Some(command) = &package.uninstall_command {
                    attributes.push(("UninstallArguments".to_string(), command.clone()));
                }
                if let Some(condition) = &package.install_condition {
                    attributes.push(("InstallCondition".to_string(), condition.clone()));
                }
                if let Some(variable) = &package.log_path_variable {
                    attributes.push(("LogPathVariable".to_string(), variable.clone()));
                }
                let borrowed: Vec<(&str, &str)> = attributes
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                write_empty(&mut writer, package.kind.element_name(), &borrowed)?;
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new("Chain")))?;

    writer.write_event(Event::End(BytesEnd::new("BurnManifest")))?;
    Ok(writer.into_inner())
}

/// Emits the bootstrapper-application data document: one element per row
/// of every BA-visible table, attributes named after columns, null cells
/// omitted.
pub fn write_ba_data_manifest(output: &Output) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(start(
        "BootstrapperApplicationData",
        &[("xmlns", BA_DATA_NAMESPACE)],
    )))?;

    for table in output.tables() {
        if !table.definition().is_ba_visible() {
            continue;
        }
        for row in table.rows() {
            let mut attributes: Vec<(String, String)> = Vec::new();
            for (index, column) in table.definition().columns().iter().enumerate() {
                let data = row.data(index);
                if data.is_null() {
                    continue;
                }
                attributes.push((column.name().trim_end_matches('_').to_string(), data.to_string()));
            }
            let borrowed: Vec<(&str, &str)> = attributes
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            write_empty(&mut writer, table.name(), &borrowed)?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("BootstrapperApplicationData")))?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bundle::chain::{ChainPackageInfo, PackageKind, PackageMetadata};
    use crate::model::schema;
    use crate::model::{FieldData, OutputKind, Row, SourceLocation};
    use std::path::PathBuf;

    fn bundle() -> BundleInfo {
        BundleInfo {
            bundle_id: "{11111111-2222-3333-4444-555555555555}".into(),
            name: "Sample Bundle".into(),
            version: "1.2.3".into(),
            manufacturer: Some("Example Corp".into()),
            upgrade_code: "{AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE}".into(),
            per_machine: true,
            about_url: None,
            icon_source: None,
            splash_screen_source: None,
            stub_source: PathBuf::from("stub.exe"),
        }
    }

    fn payload(id: &str) -> PayloadInfo {
        PayloadInfo {
            id: id.into(),
            name: format!("{id}.msi"),
            source: PathBuf::from(id),
            size: 10,
            hash: "f".repeat(40),
            compressed: true,
            download_url: None,
            container: None,
            certificate_public_key: None,
            certificate_thumbprint: None,
        }
    }

    #[test]
    fn burn_manifest_orders_ux_before_containers_and_chain() {
        let chain = ChainInfo {
            disable_rollback: false,
            items: vec![
                ChainItem::RollbackBoundary { id: "rb".into() },
                ChainItem::Package(ChainPackageInfo {
                    id: "pkg".into(),
                    kind: PackageKind::Msi,
                    payload: "main".into(),
                    vital: true,
                    permanent: false,
                    cache: true,
                    install_command: None,
                    repair_command: None,
                    uninstall_command: None,
                    install_condition: None,
                    log_path_variable: None,
                    metadata: PackageMetadata {
                        product_code: Some("{PC}".into()),
                        ..Default::default()
                    },
                }),
            ],
        };
        let containers = vec![ContainerInfo {
            id: "PackagesContainer".into(),
            name: "PackagesContainer.cab".into(),
            kind: ContainerKind::Attached,
            payloads: vec!["main".into()],
        }];
        let payloads = vec![payload("ba"), payload("main")];
        let xml = write_burn_manifest(
            &bundle(),
            &[],
            &[],
            &payloads,
            &["ba".to_string()],
            &containers,
            &chain,
        )
        .unwrap();
        let text = String::from_utf8(xml).unwrap();
        let ux = text.find("<UX>").unwrap();
        let container = text.find("<Container").unwrap();
        let chain_pos = text.find("<Chain").unwrap();
        assert!(ux < container && container < chain_pos);
        assert!(text.contains("MsiPackage"));
        assert!(text.contains("ProductCode=\"{PC}\""));
        assert!(text.contains("RollbackBoundary"));
        assert!(text.contains("Container=\"PackagesContainer\""));
    }

    #[test]
    fn branding_sources_surface_in_registration() {
        let mut branded = bundle();
        branded.icon_source = Some("res\\app.ico".into());
        branded.splash_screen_source = Some("res\\splash.bmp".into());
        let chain = ChainInfo {
            disable_rollback: false,
            items: vec![ChainItem::RollbackBoundary { id: "rb".into() }],
        };
        let xml = write_burn_manifest(&branded, &[], &[], &[], &[], &[], &chain).unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert!(text.contains("DisplayIcon=\"app.ico\""));
        assert!(text.contains("<SplashScreen FilePath=\"splash.bmp\"/>"));
    }

    #[test]
    fn ba_data_lists_only_visible_tables() {
        let mut output = Output::new(OutputKind::Bundle);
        // Payload is not BA-visible, BundleVariable is.
        output.ensure_table(&schema::payload());
        let variables = output.ensure_table(&schema::bundle_variable());
        variables.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                "InstallDir".into(),
                "C:\\Sample".into(),
                "string".into(),
                FieldData::Null,
                FieldData::Int(1),
            ],
        ));
        let xml = write_ba_data_manifest(&output).unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert!(text.contains("<BundleVariable"));
        assert!(text.contains("Id=\"InstallDir\""));
        assert!(!text.contains("<Payload"));
        // Null cells are omitted entirely.
        assert!(!text.contains("Hidden"));
    }
}
