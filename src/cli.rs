//! Interface de linha de comando do cadence baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (cycle, status,
//! cleanup, demo) e flags globais (--batch-size, --concurrency, --verbose).

use clap::{Parser, Subcommand};

/// cadence — Laço resiliente de revisão de contas.
#[derive(Debug, Parser)]
#[command(name = "cadence", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Itens por lote nesta execução.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Limite de pipelines simultâneos nesta execução.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um ciclo completo de revisão.
    Cycle {
        /// Escopo de descoberta passado ao DataSource.
        #[arg(long)]
        scope: Option<String>,
    },

    /// Mostra o resumo da sessão mais recente.
    Status,

    /// Retires persisted sessions older than the retention window.
    Cleanup {
        /// Dias de retenção; ausente usa o valor da configuração.
        #[arg(long)]
        days: Option<i64>,
    },

    /// Executa a demonstração embutida com colaboradores simulados.
    Demo {
        /// Quantidade de contas simuladas.
        #[arg(long, default_value_t = 12)]
        accounts: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_cycle_subcommand() {
        let cli = Cli::parse_from(["cadence", "cycle", "--scope", "enterprise"]);
        match cli.command {
            Command::Cycle { scope } => assert_eq!(scope.unwrap(), "enterprise"),
            _ => panic!("expected Cycle command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "cadence",
            "--batch-size",
            "25",
            "--concurrency",
            "8",
            "--verbose",
            "demo",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.batch_size, Some(25));
        assert_eq!(cli.concurrency, Some(8));
    }

    #[test]
    fn cli_parses_demo_accounts() {
        let cli = Cli::parse_from(["cadence", "demo", "--accounts", "30"]);
        match cli.command {
            Command::Demo { accounts } => assert_eq!(accounts, 30),
            _ => panic!("expected Demo command"),
        }
    }

    #[test]
    fn cli_cleanup_days_is_optional() {
        let cli = Cli::parse_from(["cadence", "cleanup"]);
        match cli.command {
            Command::Cleanup { days } => assert!(days.is_none()),
            _ => panic!("expected Cleanup command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
