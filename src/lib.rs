//! # pwsh-mux
//!
//! Multiplex a long-lived PowerShell interpreter behind a typed, in-process
//! RPC.
//!
//! Callers submit PowerShell source fragments as opaque strings. Each
//! fragment runs in submission order against one persistent interpreter,
//! with all six output streams (Success, Error, Warning, Verbose, Debug,
//! Information) captured separately and delivered both to the awaiting
//! caller and to six long-lived per-stream broadcast channels.
//!
//! ## Architecture
//!
//! ```text
//! call() ──► queue ──► dispatcher ──► wrapper ──► child stdin
//!                                                      │
//! caller sink ◄── decoder ◄── frame buffer ◄── child stdout
//!      │
//!      └──► six per-stream broadcasters
//! ```
//!
//! The supervisor enforces strict FIFO with at most one command in flight,
//! detects timeouts and child death, and performs signal-escalated kill and
//! restart; pending work stranded by a restart fails with a typed error
//! rather than silently re-running against fresh interpreter state.
//!
//! ## Example
//!
//! ```ignore
//! use pwsh_mux::{OutputFormat, Shell, ShellConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shell = Shell::new(ShellConfig::default())?;
//!
//!     shell.call("$greeting = 'hello';").wait().await?;
//!     let result = shell
//!         .call_with("Write-Output $greeting;", OutputFormat::String)
//!         .wait()
//!         .await?;
//!     assert!(result.success[0].as_str().unwrap().contains("hello"));
//!
//!     assert!(shell.destroy().wait().await);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod wrapper;

mod child;
mod shell;
mod supervisor;

pub use config::ShellConfig;
pub use error::{Result, ShellError};
pub use protocol::{OutputFormat, StreamsResult};
pub use shell::{CallHandle, DestroyHandle, Shell, ShellBuilder};
