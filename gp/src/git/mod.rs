//! Remote ref listing
//!
//! [`RemoteRefSource`] is the seam between change detection and git itself.
//! [`GitCli`] shells out to `git ls-remote`; [`InMemoryRefSource`] serves
//! scripted listings for tests and embedding.

mod error;
mod memory;
mod remote;

pub use error::GitError;
pub use memory::InMemoryRefSource;
pub use remote::{GitCli, RemoteRefSource, parse_ls_remote};
