mod list;
mod run;
mod validate;

use clap::Subcommand;

use run::RunArgs;

use crate::config::CliConfig;
use crate::error::Result;

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List the saga types defined in the config
    List,
    /// Check that saga definitions resolve and pass validation
    Validate {
        /// Only validate this saga type
        saga_type: Option<String>,
    },
    /// Run a saga to completion against the in-memory demo backend
    Run(RunArgs),
}

impl Commands {
    pub(crate) fn execute(self, config: &CliConfig) -> Result<()> {
        match self {
            Self::List => list::run(config),
            Self::Validate { saga_type } => validate::run(config, saga_type.as_deref()),
            Self::Run(args) => run::run(config, &args),
        }
    }
}
