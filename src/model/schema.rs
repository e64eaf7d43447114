//! Built-in table definitions.
//!
//! The core schema every bind understands: the real Windows Installer tables
//! the binder writes, the unreal binder tables that carry override data, and
//! the bundle aggregate tables. Extensions contribute additional definitions
//! at bind time.

use crate::model::column::{ColumnDefinition, ColumnType};
use crate::model::table::TableDefinition;

fn s(name: &str, length: usize) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::String).length(length)
}

fn l(name: &str, length: usize) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Localized).length(length)
}

fn i16c(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Int16)
}

fn i32c(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Int32)
}

fn object(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, ColumnType::Object)
}

/// `Directory` table.
pub fn directory() -> TableDefinition {
    TableDefinition::new(
        "Directory",
        vec![
            s("Directory", 72).primary_key(),
            s("Directory_Parent", 72).nullable(),
            l("DefaultDir", 255),
        ],
    )
}

/// `Component` table.
pub fn component() -> TableDefinition {
    TableDefinition::new(
        "Component",
        vec![
            s("Component", 72).primary_key(),
            s("ComponentId", 38).nullable(),
            s("Directory_", 72),
            i16c("Attributes"),
            l("Condition", 255).nullable(),
            s("KeyPath", 72).nullable(),
        ],
    )
}

/// `File` table.
pub fn file() -> TableDefinition {
    TableDefinition::new(
        "File",
        vec![
            s("File", 72).primary_key(),
            s("Component_", 72),
            l("FileName", 255),
            i32c("FileSize"),
            s("Version", 72).nullable(),
            s("Language", 20).nullable(),
            i16c("Attributes").nullable(),
            i32c("Sequence"),
        ],
    )
}

/// `Media` table.
pub fn media() -> TableDefinition {
    TableDefinition::new(
        "Media",
        vec![
            i16c("DiskId").primary_key(),
            i32c("LastSequence"),
            l("DiskPrompt", 64).nullable(),
            s("Cabinet", 255).nullable(),
            s("VolumeLabel", 32).nullable(),
            s("Source", 72).nullable(),
        ],
    )
}

/// `Property` table.
pub fn property() -> TableDefinition {
    TableDefinition::new(
        "Property",
        vec![s("Property", 72).primary_key(), l("Value", 0)],
    )
}

/// `Registry` table.
pub fn registry() -> TableDefinition {
    TableDefinition::new(
        "Registry",
        vec![
            s("Registry", 72).primary_key(),
            i16c("Root"),
            l("Key", 255),
            l("Name", 255).nullable(),
            l("Value", 0).nullable(),
            s("Component_", 72),
        ],
    )
}

/// `Feature` table.
pub fn feature() -> TableDefinition {
    TableDefinition::new(
        "Feature",
        vec![
            s("Feature", 38).primary_key(),
            s("Feature_Parent", 38).nullable(),
            l("Title", 64).nullable(),
            l("Description", 255).nullable(),
            i16c("Display").nullable(),
            i16c("Level"),
            s("Directory_", 72).nullable(),
            i16c("Attributes"),
        ],
    )
}

/// `FeatureComponents` table.
pub fn feature_components() -> TableDefinition {
    TableDefinition::new(
        "FeatureComponents",
        vec![s("Feature_", 38).primary_key(), s("Component_", 72).primary_key()],
    )
}

/// `Binary` table (stream column).
pub fn binary() -> TableDefinition {
    TableDefinition::new(
        "Binary",
        vec![s("Name", 72).primary_key(), object("Data")],
    )
}

/// `Icon` table (stream column).
pub fn icon() -> TableDefinition {
    TableDefinition::new("Icon", vec![s("Name", 72).primary_key(), object("Data")])
}

/// `Patch` table: per-file delta headers in a patch.
pub fn patch() -> TableDefinition {
    TableDefinition::new(
        "Patch",
        vec![
            s("File_", 72).primary_key(),
            i32c("Sequence").primary_key(),
            i32c("PatchSize"),
            i16c("Attributes"),
            object("Header").nullable(),
            s("StreamRef_", 38).nullable(),
        ],
    )
}

/// `MsiPatchHeaders` table: the one unreal table whose streams are written
/// to the physical database.
pub fn msi_patch_headers() -> TableDefinition {
    TableDefinition::new(
        "MsiPatchHeaders",
        vec![s("StreamRef", 38).primary_key(), object("Header")],
    )
    .unreal()
}

/// `_SummaryInformation` table: carried unreal, re-encoded into the summary
/// stream at database-write time.
pub fn summary_information() -> TableDefinition {
    TableDefinition::new(
        "_SummaryInformation",
        vec![i16c("PropertyId").primary_key(), l("Value", 255)],
    )
    .unreal()
}

/// `BindFile` table: per-file override rows folded into `File`.
pub fn bind_file() -> TableDefinition {
    TableDefinition::new(
        "BindFile",
        vec![
            s("File_", 72).primary_key(),
            i16c("DiskId").nullable(),
            s("Source", 0).nullable(),
            i32c("Attributes").nullable(),
            i16c("PatchGroup").nullable(),
        ],
    )
    .unreal()
}

/// `BindMedia` table: per-media compression and layout overrides folded
/// into `Media`.
pub fn bind_media() -> TableDefinition {
    TableDefinition::new(
        "BindMedia",
        vec![
            i16c("DiskId").primary_key(),
            s("CompressionLevel", 20).nullable(),
            s("Layout", 72).nullable(),
        ],
    )
    .unreal()
}

/// `BindVariable` table: values substituted by the field resolver.
pub fn bind_variable() -> TableDefinition {
    TableDefinition::new(
        "BindVariable",
        vec![
            s("Name", 72).primary_key(),
            l("Value", 0).nullable(),
            i16c("Overridable").nullable(),
        ],
    )
    .unreal()
}

/// `BindMerge` table: authored merge-module references.
pub fn bind_merge() -> TableDefinition {
    TableDefinition::new(
        "BindMerge",
        vec![
            s("Id", 72).primary_key(),
            s("Feature_", 38),
            s("Directory_", 72),
            s("SourceFile", 0),
            i16c("Language"),
            i16c("FileCompression").nullable(),
            s("ConfigurationData", 0).nullable(),
        ],
    )
    .unreal()
}

/// `BindMergeFeatures` table: secondary feature connections for a module.
pub fn bind_merge_features() -> TableDefinition {
    TableDefinition::new(
        "BindMergeFeatures",
        vec![s("Merge_", 72).primary_key(), s("Feature_", 38).primary_key()],
    )
    .unreal()
}

/// `SimpleReference` table: foreign-key assertions checked before output.
pub fn simple_reference() -> TableDefinition {
    TableDefinition::new(
        "SimpleReference",
        vec![
            s("Table", 32).primary_key(),
            s("PrimaryKeys", 255).primary_key(),
        ],
    )
    .unreal()
}

/// `Bundle` table: the single bundle row.
pub fn bundle() -> TableDefinition {
    TableDefinition::new(
        "Bundle",
        vec![
            s("BundleId", 38).primary_key(),
            l("Name", 255),
            s("Version", 24),
            l("Manufacturer", 255).nullable(),
            s("UpgradeCode", 38),
            i16c("PerMachine"),
            s("AboutUrl", 0).nullable(),
            s("IconSource", 0).nullable(),
            s("SplashScreenSource", 0).nullable(),
            s("StubSource", 0),
        ],
    )
    .unreal()
}

/// `Chain` table: the single chain row.
pub fn chain() -> TableDefinition {
    TableDefinition::new(
        "Chain",
        vec![s("ChainId", 72).primary_key(), i16c("DisableRollback").nullable()],
    )
    .unreal()
}

/// `ChainPackage` table: typed packages and rollback boundaries.
pub fn chain_package() -> TableDefinition {
    TableDefinition::new(
        "ChainPackage",
        vec![
            s("Id", 72).primary_key(),
            s("PackageType", 20),
            s("Payload_", 72).nullable(),
            i32c("Sequence"),
            i16c("Vital").nullable(),
            i16c("Permanent").nullable(),
            i16c("Cache").nullable(),
            l("InstallCommand", 0).nullable(),
            l("RepairCommand", 0).nullable(),
            l("UninstallCommand", 0).nullable(),
            l("InstallCondition", 0).nullable(),
            s("LogPathVariable", 72).nullable(),
        ],
    )
    .unreal()
    .ba_visible()
}

/// `Payload` table.
pub fn payload() -> TableDefinition {
    TableDefinition::new(
        "Payload",
        vec![
            s("Id", 72).primary_key(),
            l("Name", 255),
            s("SourceFile", 0),
            i16c("Compressed").nullable(),
            l("DownloadUrl", 0).nullable(),
            s("Container_", 72).nullable(),
            s("CertificatePublicKey", 72).nullable(),
            s("CertificateThumbprint", 72).nullable(),
        ],
    )
    .unreal()
}

/// `PayloadGroup` table: group membership rows. The reserved group id `UX`
/// names the bootstrapper-application payloads.
pub fn payload_group() -> TableDefinition {
    TableDefinition::new(
        "PayloadGroup",
        vec![
            s("Group_", 72).primary_key(),
            s("Payload_", 72).primary_key(),
            i32c("Sequence"),
        ],
    )
    .unreal()
}

/// `Container` table: authored containers beyond the default attached one.
pub fn container() -> TableDefinition {
    TableDefinition::new(
        "Container",
        vec![
            s("Id", 72).primary_key(),
            l("Name", 255),
            s("Type", 20),
        ],
    )
    .unreal()
}

/// `BundleSearch` table.
pub fn bundle_search() -> TableDefinition {
    TableDefinition::new(
        "BundleSearch",
        vec![
            s("Id", 72).primary_key(),
            s("Type", 20),
            l("Target", 0),
            s("Variable", 72),
            l("Condition", 0).nullable(),
        ],
    )
    .unreal()
    .ba_visible()
}

/// `SearchOrder` table: explicit ordering of searches.
pub fn search_order() -> TableDefinition {
    TableDefinition::new(
        "SearchOrder",
        vec![s("Search_", 72).primary_key(), i32c("Sequence")],
    )
    .unreal()
}

/// `BundleVariable` table.
pub fn bundle_variable() -> TableDefinition {
    TableDefinition::new(
        "BundleVariable",
        vec![
            s("Id", 72).primary_key(),
            l("Value", 0).nullable(),
            s("Type", 20).nullable(),
            i16c("Hidden").nullable(),
            i16c("Persisted").nullable(),
        ],
    )
    .unreal()
    .ba_visible()
}

/// All built-in definitions, by name.
pub fn core_definitions() -> Vec<TableDefinition> {
    vec![
        directory(),
        component(),
        file(),
        media(),
        property(),
        registry(),
        feature(),
        feature_components(),
        binary(),
        icon(),
        patch(),
        msi_patch_headers(),
        summary_information(),
        bind_file(),
        bind_media(),
        bind_variable(),
        bind_merge(),
        bind_merge_features(),
        simple_reference(),
        bundle(),
        chain(),
        chain_package(),
        payload(),
        payload_group(),
        container(),
        bundle_search(),
        search_order(),
        bundle_variable(),
    ]
}

/// Looks up a built-in definition by table name.
pub fn definition(name: &str) -> Option<TableDefinition> {
    core_definitions().into_iter().find(|d| d.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_definitions_have_unique_names() {
        let defs = core_definitions();
        for (i, a) in defs.iter().enumerate() {
            for b in &defs[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
    }

    #[test]
    fn object_columns_detected() {
        assert!(binary().has_object_columns());
        assert!(!file().has_object_columns());
    }

    #[test]
    fn unreal_flags() {
        assert!(bind_file().is_unreal());
        assert!(msi_patch_headers().is_unreal());
        assert!(!file().is_unreal());
    }
}
