//! Payloads and containers.
//!
//! A payload is one file carried by the bundle, with its size and SHA-1
//! recorded in the manifest so the engine can verify it at extraction
//! time. Containers are cabinets holding payload subsets: the reserved
//! UX container carries the bootstrapper application, one default
//! attached container collects every compressed payload not explicitly
//! assigned, and authored containers hold their declared members.

use crate::bail;
use crate::binder::error::{Context, Error, ErrorExt, Result};
use crate::model::Output;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Reserved payload-group id naming the bootstrapper-application files.
pub const UX_GROUP: &str = "UX";

/// Id of the synthesized default attached container.
pub const DEFAULT_CONTAINER_ID: &str = "PackagesContainer";

/// One bundle payload with resolved verification data.
#[derive(Clone, Debug)]
pub struct PayloadInfo {
    pub id: String,
    /// Relative name the payload extracts to.
    pub name: String,
    pub source: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-1 of the payload bytes.
    pub hash: String,
    pub compressed: bool,
    pub download_url: Option<String>,
    /// Authored container assignment, when any.
    pub container: Option<String>,
    pub certificate_public_key: Option<String>,
    pub certificate_thumbprint: Option<String>,
}

/// How a container travels with the bundle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerKind {
    /// Appended to the bundle executable.
    Attached,
    /// Shipped as a separate file next to the bundle.
    Detached,
}

/// One container and its member payload ids, in order.
#[derive(Clone, Debug)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub kind: ContainerKind,
    pub payloads: Vec<String>,
}

/// Reads payload rows and resolves size and hash from the source files.
///
/// A missing payload file is an environment error and aborts the bundle.
pub fn gather_payloads(output: &Output) -> Result<Vec<PayloadInfo>> {
    let Some(table) = output.table("Payload") else {
        return Ok(Vec::new());
    };
    let mut payloads = Vec::with_capacity(table.rows().len());
    for row in table.rows() {
        let id = row.data(0).to_string();
        let source = PathBuf::from(row.data(2).to_string());
        let (size, hash) = hash_file(&source)
            .with_context(|| format!("resolving payload '{id}'"))?;
        payloads.push(PayloadInfo {
            name: row.data(1).to_string(),
            source,
            size,
            hash,
            compressed: row.data(3).as_int().unwrap_or(1) != 0,
            download_url: row.data(4).as_str().map(str::to_string),
            container: row.data(5).as_str().map(str::to_string),
            certificate_public_key: row.data(6).as_str().map(str::to_string),
            certificate_thumbprint: row.data(7).as_str().map(str::to_string),
            id,
        });
    }
    Ok(payloads)
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path).fs_context("opening payload", path)?;
    let mut hasher = Sha1::new();
    let mut size = 0u64;
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        size += read as u64;
        hasher.update(&buffer[..read]);
    }
    Ok((size, hex::encode(hasher.finalize())))
}

/// Group-membership rows: group id to payload ids ordered by sequence.
pub fn gather_payload_groups(output: &Output) -> HashMap<String, Vec<String>> {
    let mut groups: HashMap<String, Vec<(i32, String)>> = HashMap::new();
    if let Some(table) = output.table("PayloadGroup") {
        for row in table.rows() {
            groups
                .entry(row.data(0).to_string())
                .or_default()
                .push((row.data(2).as_int().unwrap_or(0), row.data(1).to_string()));
        }
    }
    groups
        .into_iter()
        .map(|(group, mut members)| {
            members.sort_by_key(|(sequence, _)| *sequence);
            (group, members.into_iter().map(|(_, id)| id).collect())
        })
        .collect()
}

/// Builds the container set: the default attached container plus any
/// authored ones.
///
/// Every compressed non-UX payload without an authored container lands in
/// the default container. References to unknown payloads are hard errors.
pub fn gather_containers(
    output: &Output,
    payloads: &[PayloadInfo],
    ux_payloads: &[String],
) -> Result<Vec<ContainerInfo>> {
    let known: HashMap<&str, &PayloadInfo> =
        payloads.iter().map(|p| (p.id.as_str(), p)).collect();
    for id in ux_payloads {
        if !known.contains_key(id.as_str()) {
            bail!("payload group '{UX_GROUP}' references unknown payload '{id}'");
        }
    }

    let mut containers: Vec<ContainerInfo> = Vec::new();
    if let Some(table) = output.table("Container") {
        for row in table.rows() {
            let kind = match row.data(2).to_string().as_str() {
                "Attached" | "" => ContainerKind::Attached,
                "Detached" => ContainerKind::Detached,
                other => {
                    return Err(Error::Generic(format!(
                        "container '{}' has unknown type '{other}'",
                        row.data(0)
                    )))
                }
            };
            containers.push(ContainerInfo {
                id: row.data(0).to_string(),
                name: row.data(1).to_string(),
                kind,
                payloads: Vec::new(),
            });
        }
    }

    let mut default_members = Vec::new();
    for payload in payloads {
        if ux_payloads.contains(&payload.id) {
            continue;
        }
        match &payload.container {
            Some(container_id) => {
                let Some(container) = containers.iter_mut().find(|c| c.id == *container_id)
                else {
                    bail!(
                        "payload '{}' references unknown container '{container_id}'",
                        payload.id
                    );
                };
                container.payloads.push(payload.id.clone());
            }
            None if payload.compressed => default_members.push(payload.id.clone()),
            None => {}
        }
    }
    if !default_members.is_empty() {
        containers.insert(
            0,
            ContainerInfo {
                id: DEFAULT_CONTAINER_ID.to_string(),
                name: format!("{DEFAULT_CONTAINER_ID}.cab"),
                kind: ContainerKind::Attached,
                payloads: default_members,
            },
        );
    }
    containers.retain(|c| !c.payloads.is_empty());
    Ok(containers)
}

/// Builds one container cabinet holding the given payloads.
pub fn build_container_cabinet(
    payloads: &[&PayloadInfo],
    path: &Path,
) -> Result<()> {
    let mut builder = cab::CabinetBuilder::new();
    let folder = builder.add_folder(cab::CompressionType::MsZip);
    for payload in payloads {
        folder.add_file(payload.id.as_str());
    }
    let out = File::create(path).fs_context("creating container cabinet", path)?;
    let mut writer = builder.build(out)?;
    let mut sources = payloads.iter();
    while let Some(mut file_writer) = writer.next_file()? {
        let payload = sources
            .next()
            .ok_or_else(|| Error::Generic("container writer out of sync".into()))?;
        let mut input = File::open(&payload.source).fs_context("opening payload", &payload.source)?;
        std::io::copy(&mut input, &mut file_writer)?;
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::model::{FieldData, OutputKind, Row, SourceLocation};

    fn payload(id: &str, compressed: bool, container: Option<&str>) -> PayloadInfo {
        PayloadInfo {
            id: id.into(),
            name: format!("{id}.bin"),
            source: PathBuf::from(id),
            size: 3,
            hash: "abc".into(),
            compressed,
            download_url: None,
            container: container.map(str::to_string),
            certificate_public_key: None,
            certificate_thumbprint: None,
        }
    }

    #[test]
    fn payload_hashes_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        std::fs::write(&path, b"payload-bytes").unwrap();
        let (size, hash) = hash_file(&path).unwrap();
        assert_eq!(size, 13);
        assert_eq!(hash.len(), 40);
        assert_eq!(hash, hash_file(&path).unwrap().1);
    }

    #[test]
    fn unassigned_compressed_payloads_fill_the_default_container() {
        let payloads = vec![
            payload("ux", true, None),
            payload("a", true, None),
            payload("b", false, None),
            payload("c", true, Some("Extra")),
        ];
        let mut output = Output::new(OutputKind::Bundle);
        let table = output.ensure_table(&schema::container());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["Extra".into(), "extra.cab".into(), "Detached".into()],
        ));

        let containers =
            gather_containers(&output, &payloads, &["ux".to_string()]).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].id, DEFAULT_CONTAINER_ID);
        assert_eq!(containers[0].payloads, ["a"]);
        assert_eq!(containers[1].id, "Extra");
        assert_eq!(containers[1].kind, ContainerKind::Detached);
    }

    #[test]
    fn unknown_container_reference_is_fatal() {
        let payloads = vec![payload("a", true, Some("Nowhere"))];
        let output = Output::new(OutputKind::Bundle);
        assert!(gather_containers(&output, &payloads, &[]).is_err());
    }

    #[test]
    fn group_membership_orders_by_sequence() {
        let mut output = Output::new(OutputKind::Bundle);
        let table = output.ensure_table(&schema::payload_group());
        for (payload, sequence) in [("second", 2), ("first", 1)] {
            table.push_row(Row::from_data(
                SourceLocation::default(),
                vec![UX_GROUP.into(), payload.into(), FieldData::Int(sequence)],
            ));
        }
        let groups = gather_payload_groups(&output);
        assert_eq!(groups[UX_GROUP], ["first", "second"]);
    }
}
