//! Interface de terminal do cadence — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`CycleProgress`] acompanha visualmente a
//! execução de um ciclo de revisão no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::session::{SessionState, SessionStatus};

/// Indicador visual de progresso para um ciclo de revisão no terminal.
///
/// Exibe um spinner animado durante o processamento de cada lote e
/// mensagens coloridas para sucesso (verde), falha (vermelho) e
/// interrupção (amarelo).
pub struct CycleProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para avisos.
    yellow: Style,
}

impl CycleProgress {
    /// Inicia o spinner com o identificador da sessão.
    pub fn start(session_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("cycle {session_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para o lote atual.
    pub fn batch(&self, number: u64, items: usize) {
        self.pb
            .set_message(format!("batch {number}: {items} item(s)"));
    }

    /// Registra o resultado de um lote sem parar o spinner.
    pub fn batch_done(&self, succeeded: usize, failed: usize) {
        if failed == 0 {
            self.pb.println(format!(
                "  {} batch done: {succeeded} ok",
                self.green.apply_to("✓")
            ));
        } else {
            self.pb.println(format!(
                "  {} batch done: {succeeded} ok, {failed} failed",
                self.yellow.apply_to("↻")
            ));
        }
    }

    /// Finaliza o spinner e exibe o desfecho do ciclo.
    pub fn complete(&self, session: &SessionState) {
        self.pb.finish_and_clear();
        match session.status {
            SessionStatus::Completed => {
                println!(
                    "  {} cycle completed: {} item(s) reviewed",
                    self.green.apply_to("✓"),
                    session.counters.processed
                );
            }
            SessionStatus::PartialSuccess => {
                println!(
                    "  {} cycle finished with {} failure(s)",
                    self.yellow.apply_to("!"),
                    session.counters.failed
                );
            }
            SessionStatus::Failed => {
                println!(
                    "  {} cycle halted: error rate too high ({} failure(s))",
                    self.red.apply_to("✗"),
                    session.counters.failed
                );
            }
            SessionStatus::Running => {
                println!("  {} cycle still running", self.yellow.apply_to("…"));
            }
        }
    }

    /// Imprime o relatório da sessão formatado em JSON com estilo colorido.
    pub fn print_report(&self, session: &SessionState) {
        let status_style = match session.status {
            SessionStatus::Completed => &self.green,
            SessionStatus::Failed => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", status_style.apply_to("─── Session Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(session).unwrap_or_default()
        );
    }
}

/// Imprime um relatório de sessão sem spinner ativo (comando `status`).
pub fn print_session_summary(session: &SessionState) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    let style = match session.status {
        SessionStatus::Completed => &green,
        SessionStatus::Failed => &red,
        _ => &yellow,
    };
    println!(
        "{} session {}: {} processed, {} failed, {} recommendation(s)",
        style.apply_to(session.status.to_string()),
        session.session_id,
        session.counters.processed,
        session.counters.failed,
        session.counters.recommendations
    );
    if !session.errors.is_empty() {
        println!("  errors:");
        for error in &session.errors {
            println!("    {} {error}", red.apply_to("✗"));
        }
    }
}
