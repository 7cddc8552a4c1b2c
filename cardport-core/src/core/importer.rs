//! The capability set shared by every importer kind.

use crate::core::matcher::ImportMode;
use crate::core::summary::{ImportSummary, RunReport};
use crate::Result;

/// An importer that merges one input source into a collection.
///
/// Implementations keep an [`ImportSummary`] that grows with every
/// [`run`](Self::run) until [`reset_summary`](Self::reset_summary).
pub trait Importer {
    /// Imports the whole source inside one collection transaction.
    ///
    /// # Errors
    ///
    /// Any error aborts the run and rolls back its note, card and model
    /// changes. The summary is only updated by runs that commit.
    fn run(&mut self) -> Result<RunReport>;

    fn summary(&self) -> &ImportSummary;

    fn reset_summary(&mut self);

    /// Changes how matched notes are treated, starting with the next run.
    fn set_import_mode(&mut self, mode: ImportMode);

    fn import_mode(&self) -> ImportMode;

    fn total(&self) -> usize {
        self.summary().total
    }

    fn added(&self) -> usize {
        self.summary().added
    }

    fn updated(&self) -> usize {
        self.summary().updated
    }

    fn dupes(&self) -> usize {
        self.summary().dupes
    }

    fn log(&self) -> &[String] {
        &self.summary().log
    }
}
