//! emend - optimistic file-editing engine.
//!
//! An external change-generation source proposes edits to files in a
//! working tree, either as whole-file replacements or as line-scoped
//! fragment patches. emend reconciles the proposals against the
//! current on-disk state, materializes consistent content, and records
//! every batch of writes so it can be diffed and reverted later.
//!
//! This crate is the command surface; the engine lives in
//! `emend-patch` (resolution) and `emend-snapshot` (durability).

pub mod commands;
