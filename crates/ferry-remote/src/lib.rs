//! File-server backends for ferry.
//!
//! Both protocols keep one control connection per session, so they share
//! [`RemoteSession`]: it serializes calls on a [`RemoteFs`] client and
//! spools object bodies through local temporary files, which gives every
//! stream the [`Session`](ferry_session::Session) contract regardless of
//! how the server handles partial transfers.
//!
//! - [`FtpClient`] over `suppaftp`, passive or extended passive mode
//! - [`SftpClient`] over `ssh2`, password authentication

pub mod ftp;
pub mod sftp;
pub mod spool;

pub use ftp::{FtpClient, FtpOptions, FtpSession};
pub use sftp::{SftpClient, SftpOptions, SftpSession};
pub use spool::{RemoteFs, RemoteSession};
