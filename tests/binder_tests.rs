#[cfg(test)]
mod tests {
    use msikit::binder::error::Error;
    use msikit::binder::validate::ValidationOptions;
    use msikit::binder::{BindOptions, Binder};
    use msikit::model::{schema, FieldData, Output, OutputKind, Row, SourceLocation};
    use msikit::Messages;
    use std::path::Path;

    fn quiet_options() -> BindOptions {
        BindOptions {
            suppress_layout: true,
            validation: ValidationOptions {
                suppress: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A product with two compressed files on one embedded-cabinet media.
    fn two_file_product(payload_dir: &Path) -> Output {
        let mut output = Output::new(OutputKind::Product);

        let summary = output.ensure_table(&schema::summary_information());
        // Word-count bit 2: files default to compressed.
        summary.push_row(Row::from_data(
            SourceLocation::default(),
            vec![FieldData::Int(15), "2".into()],
        ));

        let property = output.ensure_table(&schema::property());
        property.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["ProductName".into(), "Sample".into()],
        ));

        let file = output.ensure_table(&schema::file());
        for (line, id) in ["FileA", "FileB"].iter().enumerate() {
            file.push_row(Row::from_data(
                SourceLocation::new("product.wxs", line as u32 + 10),
                vec![
                    (*id).into(),
                    "MainComponent".into(),
                    format!("{id}.txt").into(),
                    FieldData::Int(0),
                    FieldData::Null,
                    FieldData::Null,
                    FieldData::Int(0),
                    FieldData::Int(0),
                ],
            ));
        }

        let bind_file = output.ensure_table(&schema::bind_file());
        for id in ["FileA", "FileB"] {
            let source = payload_dir.join(format!("{id}.txt"));
            std::fs::write(&source, format!("payload of {id}")).unwrap();
            bind_file.push_row(Row::from_data(
                SourceLocation::default(),
                vec![
                    id.into(),
                    FieldData::Null,
                    source.display().to_string().into(),
                    FieldData::Null,
                    FieldData::Null,
                ],
            ));
        }

        let media = output.ensure_table(&schema::media());
        media.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                FieldData::Int(1),
                FieldData::Int(0),
                FieldData::Null,
                "#product.cab".into(),
                FieldData::Null,
                FieldData::Null,
            ],
        ));

        output
    }

    async fn bind(output: &mut Output, target: &Path) -> Result<Messages, Error> {
        let mut messages = Messages::new();
        let mut binder = Binder::new(quiet_options());
        binder.bind(output, target, &mut messages).await?;
        Ok(messages)
    }

    #[tokio::test]
    async fn two_compressed_files_bind_into_one_embedded_cabinet() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = two_file_product(dir.path());
        let target = dir.path().join("product.msi");

        let messages = bind(&mut output, &target).await.unwrap();
        assert!(!messages.has_errors());
        assert!(target.is_file());

        let mut package = msi::open(&target).unwrap();
        assert!(package.has_stream("product.cab"));

        let sequences: Vec<String> = package
            .select_rows(msi::Select::table("File"))
            .unwrap()
            .map(|row| row[7].to_string())
            .collect();
        assert_eq!(sequences, ["1", "2"]);

        let last_sequences: Vec<String> = package
            .select_rows(msi::Select::table("Media"))
            .unwrap()
            .map(|row| row[1].to_string())
            .collect();
        assert_eq!(last_sequences, ["2"]);

        // Override tables never reach the physical database.
        assert!(!package.has_table("BindFile"));
        assert!(package.has_table("Media"));
    }

    #[tokio::test]
    async fn duplicate_file_identifier_fails_without_producing_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = two_file_product(dir.path());
        {
            let file = output.table_mut("File").unwrap();
            let duplicate = file.rows()[0].clone();
            file.push_row(duplicate);
        }
        let target = dir.path().join("product.msi");

        let err = bind(&mut output, &target).await.unwrap_err();
        assert!(matches!(err, Error::BindFailed(_)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn component_guids_are_stable_across_binds() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = two_file_product(dir.path());
        add_autogenerated_component(&mut first);
        let mut second = two_file_product(dir.path());
        add_autogenerated_component(&mut second);

        let target_a = dir.path().join("a.msi");
        let target_b = dir.path().join("b.msi");
        bind(&mut first, &target_a).await.unwrap();
        bind(&mut second, &target_b).await.unwrap();

        let guid_a = component_id(&target_a);
        let guid_b = component_id(&target_b);
        assert_eq!(guid_a, guid_b);
        assert!(guid_a.starts_with('{') && guid_a.ends_with('}'));
    }

    fn add_autogenerated_component(output: &mut Output) {
        let directory = output.ensure_table(&schema::directory());
        directory.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["TARGETDIR".into(), FieldData::Null, "SourceDir".into()],
        ));
        directory.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                "INSTALLDIR".into(),
                "ProgramFilesFolder".into(),
                "smpl|Sample App".into(),
            ],
        ));
        let component = output.ensure_table(&schema::component());
        component.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                "MainComponent".into(),
                "*".into(),
                "INSTALLDIR".into(),
                FieldData::Int(0),
                FieldData::Null,
                "FileA".into(),
            ],
        ));
    }

    fn component_id(database: &Path) -> String {
        let mut package = msi::open(database).unwrap();
        package
            .select_rows(msi::Select::table("Component"))
            .unwrap()
            .filter_map(|row| row[1].as_str().map(str::to_string))
            .next()
            .unwrap()
    }

    #[tokio::test]
    async fn unchanged_transform_is_rejected_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Output::new(OutputKind::Transform);
        let property = output.ensure_table(&schema::property());
        property.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["ProductName".into(), "Sample".into()],
        ));

        let err = bind(&mut output, &dir.path().join("patch.mst"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyTransform));
    }
}

#[cfg(test)]
mod cli_tests {
    use assert_cmd::Command;
    use msikit::model::{schema, Output, OutputKind, Row, SourceLocation};
    use predicates::prelude::*;

    #[test]
    fn missing_model_file_is_a_fatal_error() {
        let dir = tempfile::tempdir().unwrap();
        Command::cargo_bin("msikit")
            .unwrap()
            .arg(dir.path().join("missing.json"))
            .arg("-o")
            .arg(dir.path().join("out.msi"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cannot read model file"));
    }

    #[test]
    fn binds_a_model_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();

        let mut output = Output::new(OutputKind::Product);
        output
            .ensure_table(&schema::property())
            .push_row(Row::from_data(
                SourceLocation::default(),
                vec!["ProductName".into(), "Sample".into()],
            ));
        let model_path = dir.path().join("product.json");
        std::fs::write(&model_path, serde_json::to_string(&output).unwrap()).unwrap();

        let target = dir.path().join("product.msi");
        Command::cargo_bin("msikit")
            .unwrap()
            .arg(&model_path)
            .arg("-o")
            .arg(&target)
            .arg("--no-validation")
            .arg("--no-layout")
            .assert()
            .success();
        assert!(target.is_file());
    }

    #[test]
    fn unknown_compression_level_is_rejected() {
        Command::cargo_bin("msikit")
            .unwrap()
            .args(["model.json", "-o", "out.msi", "--compression", "max"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("compression level"));
    }
}
