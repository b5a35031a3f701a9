//! CLI module for Aegis
//!
//! Provides commands:
//! - `serve`: Start the HTTP server
//! - `ask`: Run one message through the admission and resilience pipeline
//! - `doctor`: System diagnostics and health checks

use clap::{Parser, Subcommand};

pub mod ask;
pub mod doctor;

/// Aegis assistant CLI
#[derive(Parser, Debug)]
#[command(name = "aegis")]
#[command(about = "Rate-limited, resilient conversational assistant")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve,
    /// Ask one question as a tenant
    Ask {
        /// Tenant id the request is counted against (anonymous when omitted)
        #[arg(short, long)]
        tenant: Option<String>,
        /// Message text
        text: String,
    },
    /// Run system diagnostics
    Doctor {
        /// Also send a test prompt to the LLM provider
        #[arg(long)]
        live: bool,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run().await,
        Some(Commands::Ask { tenant, text }) => ask::run(tenant, text).await,
        Some(Commands::Doctor { live }) => doctor::run(live).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["aegis", "ask", "--tenant", "42", "hello there"]).unwrap();
        match cli.command {
            Some(Commands::Ask { tenant, text }) => {
                assert_eq!(tenant.as_deref(), Some("42"));
                assert_eq!(text, "hello there");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_doctor_live() {
        let cli = Cli::try_parse_from(["aegis", "doctor", "--live"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Doctor { live: true })));
    }

    #[test]
    fn test_no_subcommand() {
        let cli = Cli::try_parse_from(["aegis"]).unwrap();
        assert!(cli.command.is_none());
    }
}
