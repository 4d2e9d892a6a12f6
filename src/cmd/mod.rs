//! CLI command implementations.
//!
//! | Module    | Commands handled             |
//! |-----------|------------------------------|
//! | `run`     | `Run`, `Watch`               |
//! | `control` | `Approve`, `Stop`, `Health`  |
//! | `config`  | `Config`                     |

pub mod config;
pub mod control;
pub mod run;

pub use config::cmd_config;
pub use control::{cmd_approve, cmd_health, cmd_stop};
pub use run::{cmd_run, cmd_watch};

use anyhow::Result;
use dirgen::api::HttpOrchestrator;
use dirgen::client_config::DirgenConfig;

pub(crate) fn orchestrator(config: &DirgenConfig) -> Result<HttpOrchestrator> {
    Ok(HttpOrchestrator::new(
        config.base_url()?,
        config.request_timeout(),
        config.approval_timeout(),
    ))
}
