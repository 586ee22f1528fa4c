//! Moving files between the local filesystem and a ferry [`Session`].
//!
//! - [`Copier`] copies one object, resolving relative remote paths against a
//!   base directory.
//! - [`upload_dir`] / [`download_dir`] mirror whole directory trees.
//! - [`upload_file`], [`download_file`] and [`delete_if_exists`] are the
//!   single-object building blocks both use.
//!
//! [`Session`]: ferry_session::Session

pub mod copier;
pub mod error;
pub mod transfer;
pub mod tree;

pub use copier::{Copier, Direction};
pub use error::{Action, SyncError, SyncResult, TransferFailure};
pub use transfer::{delete_if_exists, download_file, upload_file};
pub use tree::{download_dir, upload_dir, TransferReport, UploadOptions};
