//! Internal domain modules for the Cardport core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod collection;
pub mod error;
pub mod export;
pub mod importer;
pub mod mapping;
pub mod matcher;
pub mod media;
pub mod model;
pub mod note;
pub mod package;
pub mod reconcile;
pub mod settings;
pub mod storage;
pub mod summary;
pub mod text;

#[doc(inline)]
pub use collection::{Collection, CollectionTx};
#[doc(inline)]
pub use error::{CardportError, Result};
#[doc(inline)]
pub use export::{export_package, ExportSummary, PackageContents, APP_VERSION, PACKAGE_VERSION};
#[doc(inline)]
pub use importer::Importer;
#[doc(inline)]
pub use mapping::{ColumnTarget, FieldMapping, MappedRecord};
#[doc(inline)]
pub use matcher::{ImportMode, MatchKey, MatchOutcome, NoteMatcher};
#[doc(inline)]
pub use media::{media_references, rewrite_media_references, MediaDir, MediaStore};
#[doc(inline)]
pub use model::{CardTemplate, FieldDefinition, Model, SchemaDiff};
#[doc(inline)]
pub use note::{Card, Note};
#[doc(inline)]
pub use package::{ImportPhase, PackageImporter, PackageSource, ZipPackage};
#[doc(inline)]
pub use reconcile::{MediaAction, MediaReconciler, Reconciled, ReconciledFields};
#[doc(inline)]
pub use settings::{default_settings_path, load_settings, save_settings, ImportSettings};
#[doc(inline)]
pub use storage::Storage;
#[doc(inline)]
pub use summary::{ImportSummary, RecordDiagnostic, RunReport};
#[doc(inline)]
pub use text::TextImporter;
