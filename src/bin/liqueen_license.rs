// src/bin/liqueen_license.rs

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use liqueen::config::get_config;
use liqueen::engine::{LicenseValidationEngine, RegistrationProfile};
use liqueen::errors::LicenseResult;
use liqueen::hardware::HardwareFingerprint;
use liqueen::license_code::{generate_license_code, parse_license_code};
use liqueen::logging::init_logging;
use liqueen::storage::SecureStore;
use liqueen::vault::SymmetricVault;

/// Command line front end to the license engine for support and testing.
///
/// Tracing output is controlled by `[logging]` in `liqueen.toml`; when that
/// is off, storage diagnostics still go through `RUST_LOG`.
#[derive(Parser)]
#[command(name = "liqueen_license")]
#[command(author, version, about = "Liqueen license support tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Online-then-offline license status
    Status,

    /// Periodic validation, as run at app startup
    Check,

    /// Device fingerprint and the signals behind it
    Fingerprint,

    /// Activate a license code for a new account on this device
    Register {
        email: String,
        password: String,
        code: String,

        /// Display name stored on the user profile
        #[arg(long, default_value = "")]
        name: String,

        #[arg(long)]
        company: Option<String>,
    },

    /// Online login, falling back to the local license
    Login { email: String, password: String },

    /// Print a fresh license code
    GenerateCode,

    /// Validate a code's format and show its parts
    CheckCode { code: String },

    /// Salted hash for `master.password_hash`
    HashPassword { password: String },

    /// Remove the local license from this device
    Clear,
}

fn print_json<T: Serialize>(value: &T) -> LicenseResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> LicenseResult<()> {
    let cli = Cli::parse();
    let config = get_config()?;

    if config.logging.enabled {
        init_logging(&config.logging);
    } else {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("warn"),
        )
        .try_init();
    }

    match cli.command {
        Commands::GenerateCode => println!("{}", generate_license_code()),
        Commands::CheckCode { code } => {
            print_json(&parse_license_code(&code.trim().to_uppercase())?)?;
        }
        Commands::HashPassword { password } => {
            println!("{}", SymmetricVault::default().hash_password(&password));
        }
        Commands::Fingerprint => {
            let store = Arc::new(SecureStore::from_config(&config.storage));
            let identity = HardwareFingerprint::new(store);
            print_json(&identity.system_info().await)?;
        }
        Commands::Status => {
            let engine = LicenseValidationEngine::from_config(config)?;
            print_json(&engine.get_license_status().await)?;
        }
        Commands::Check => {
            let engine = LicenseValidationEngine::from_config(config)?;
            print_json(&engine.perform_periodic_validation().await?)?;
        }
        Commands::Register {
            email,
            password,
            code,
            name,
            company,
        } => {
            let engine = LicenseValidationEngine::from_config(config)?;
            let profile = RegistrationProfile {
                display_name: name,
                company,
            };
            let result = engine
                .register_with_license(&email, &password, &code, &profile)
                .await?;
            print_json(&result)?;
        }
        Commands::Login { email, password } => {
            let engine = LicenseValidationEngine::from_config(config)?;
            print_json(&engine.login_online(&email, &password).await?)?;
        }
        Commands::Clear => {
            let engine = LicenseValidationEngine::from_config(config)?;
            engine.clear_local_license().await?;
            println!("Local license removed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn register_takes_positional_credentials_and_optional_profile() {
        let cli = Cli::try_parse_from([
            "liqueen_license",
            "register",
            "user@test.com",
            "secret",
            "LIQ-2025-TEST-0001-MAIK",
            "--name",
            "Test User",
        ])
        .unwrap();

        match cli.command {
            Commands::Register {
                email,
                code,
                name,
                company,
                ..
            } => {
                assert_eq!(email, "user@test.com");
                assert_eq!(code, "LIQ-2025-TEST-0001-MAIK");
                assert_eq!(name, "Test User");
                assert!(company.is_none());
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn missing_arguments_and_unknown_commands_are_rejected() {
        assert!(Cli::try_parse_from(["liqueen_license", "login", "user@test.com"]).is_err());
        assert!(Cli::try_parse_from(["liqueen_license", "activate"]).is_err());
        assert!(Cli::try_parse_from(["liqueen_license", "check-code", "LIQ-2025-TEST-0001-MAIK"]).is_ok());
    }
}
