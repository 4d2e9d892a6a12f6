//! Configuration view and validation commands: `dirgen config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use dirgen::client_config::{CONFIG_DIR, CONFIG_FILE, DirgenConfig, DirgenToml, user_config_path};

    let dirgen_dir = project_dir.join(CONFIG_DIR);
    let config_path = dirgen_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("DirGen Configuration");
            println!("====================");
            println!();

            let source = if config_path.exists() {
                Some(config_path.clone())
            } else {
                user_config_path().filter(|p| p.exists())
            };
            match &source {
                Some(path) => println!("Config file: {}", path.display()),
                None => {
                    println!("No dirgen.toml found at {}", config_path.display());
                    println!("Using default configuration.");
                }
            }
            println!();

            let toml = match &source {
                Some(path) => DirgenToml::load(path)?,
                None => DirgenToml::default(),
            };

            println!("[orchestrator]");
            println!("  base_url = \"{}\"", toml.orchestrator.base_url);
            if let Some(ws) = &toml.orchestrator.ws_url {
                println!("  ws_url = \"{}\"", ws);
            }
            println!(
                "  request_timeout_secs = {}",
                toml.orchestrator.request_timeout_secs
            );
            println!(
                "  approval_timeout_secs = {}",
                toml.orchestrator.approval_timeout_secs
            );
            println!(
                "  connect_timeout_secs = {}",
                toml.orchestrator.connect_timeout_secs
            );
            println!();
            println!("[client]");
            println!("  auto_approve = {}", toml.client.auto_approve);
            println!("  activity_limit = {}", toml.client.activity_limit);
            println!();
            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  file = {}", toml.logging.file);
            println!("  json = {}", toml.logging.json);
            println!();

            // Effective values include environment overrides
            let mut config = DirgenConfig::new(project_dir.to_path_buf())?;
            config.apply_env(|key| std::env::var(key).ok());
            println!("Effective values (with env overrides):");
            println!("  base_url = \"{}\"", config.toml.orchestrator.base_url);
            match config.ws_url() {
                Ok(url) => println!("  ws_url = \"{}\"", url),
                Err(e) => println!("  ws_url = <invalid: {}>", e),
            }
            println!();

            if source.is_none() {
                println!("Run 'dirgen config init' to create a dirgen.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No dirgen.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = DirgenToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("dirgen.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !dirgen_dir.exists() {
                std::fs::create_dir_all(&dirgen_dir)?;
            }

            DirgenToml::default().save(&config_path)?;

            println!("Created dirgen.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [orchestrator] base_url, ws_url, timeouts");
            println!("  - [client] auto_approve, activity_limit");
            println!("  - [logging] level, file");
            println!();
        }
    }

    Ok(())
}
