//! # msikit
//!
//! Installer packaging binder: turns an in-memory relational table model
//! into concrete deployment artifacts.
//!
//! The model (tables, rows, typed fields) is produced by an upstream
//! compiler/linker; this crate binds it into the artifact its output kind
//! calls for:
//!
//! - **Product / Module / Patch**: a Windows Installer database (.msi,
//!   .msm, .msp) with cabinets, merged modules, and validation
//! - **Transform**: a binary transform (.mst) synthesized by diffing two
//!   generated database halves
//! - **Bundle**: a bootstrapper executable carrying its containers and
//!   two generated manifests
//!
//! ## Usage
//!
//! ```bash
//! msikit product.json -o product.msi
//! msikit bundle.json -o setup.exe --pdb setup.binder.json
//! ```
//!
//! Library callers drive [`binder::Binder`] directly and own the
//! diagnostic sink, so one bind reports every authoring problem at once.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod binder;
pub mod cli;
pub mod error;
pub mod model;

// Re-export main types for public API
pub use binder::messages::{Diagnostic, Messages, Severity};
pub use binder::{BindOptions, Binder, BinderExtension};
pub use error::{BinderError, CliError, Result};
pub use model::{Output, OutputKind, Row, Table, TableDefinition};
