use crate::cli::ConfigCommands;
use crate::cli_config::normalize_remote_url;
use crate::commands::common::{load_config, Context};
use crate::error::CliError;

pub fn run_config(context: &Context, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init { remote_url, token } => run_config_init(context, remote_url, token),
        ConfigCommands::Show => run_config_show(context),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn run_config_init(
    context: &Context,
    remote_url: String,
    token: Option<String>,
) -> Result<(), CliError> {
    let mut config = load_config(&context.config_path)?;
    config.remote_url = Some(normalize_remote_url(remote_url).map_err(CliError::Config)?);
    if let Some(token) = fieldsync_core::util::normalize_text_option(token) {
        config.auth_token = Some(token);
    }

    config
        .save_to_path(&context.config_path)
        .map_err(CliError::Config)?;
    println!("Config written to {}", context.config_path.display());
    if config.auth_token.is_none() {
        println!("No auth token configured; requests will be sent unauthenticated.");
    }
    Ok(())
}

fn run_config_show(context: &Context) -> Result<(), CliError> {
    let config = load_config(&context.config_path)?;
    let remote = config.remote_settings().map_err(CliError::Config)?;
    let engine = config.engine_config().map_err(CliError::Config)?;

    println!("Config file: {}", context.config_path.display());
    println!("Database:    {}", context.db_path.display());
    match remote {
        Some(remote) => {
            println!("Remote:      {}", remote.base_url);
            println!(
                "Auth token:  {}",
                if remote.auth_token.is_some() { "set" } else { "not set" }
            );
        }
        None => println!("Remote:      not configured"),
    }
    println!("Engine:      {}", serde_json::to_string_pretty(&engine)?);
    Ok(())
}
