//! Core library for Cardport: merges packages and delimited text files into a
//! note/card collection.
//!
//! The destination is a [`Collection`], a SQLite database with a media
//! directory beside it. [`PackageImporter`] and [`TextImporter`] both
//! implement [`Importer`]; each run happens inside one collection
//! transaction, and media files are reconciled by content so a file is never
//! overwritten by different bytes under the same name.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    collection::{Collection, CollectionTx},
    error::{CardportError, Result},
    export::{export_package, ExportSummary, PackageContents, APP_VERSION, PACKAGE_VERSION},
    importer::Importer,
    mapping::{ColumnTarget, FieldMapping, MappedRecord},
    matcher::{canonical_first_field, ImportMode, MatchKey, MatchOutcome, NoteMatcher},
    media::{media_references, rewrite_media_references, MediaDir, MediaStore},
    model::{CardTemplate, FieldDefinition, Model, SchemaDiff},
    note::{Card, Note},
    package::{ImportPhase, PackageImporter, PackageSource, ZipPackage},
    reconcile::{MediaAction, MediaReconciler, Reconciled, ReconciledFields},
    settings::{default_settings_path, load_settings, save_settings, ImportSettings},
    storage::Storage,
    summary::{ImportSummary, RecordDiagnostic, RunReport},
    text::TextImporter,
};
