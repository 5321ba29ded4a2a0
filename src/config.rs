//! Configuração do cadence carregada a partir de `cadence.toml`.
//!
//! A struct [`CadenceConfig`] contém todos os parâmetros configuráveis do
//! ciclo de revisão. Valores não presentes no arquivo usam defaults
//! sensíveis. A variável de ambiente `CADENCE_WEBHOOK_TOKEN` tem
//! precedência sobre o arquivo.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::cache::{CacheManager, TierConfig};
use crate::dispatcher::DispatcherConfig;
use crate::retry::{BackoffStrategy, RetryPolicy};

/// Configuração de nível superior carregada de `cadence.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CadenceConfig {
    /// Escopo de descoberta passado ao DataSource.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Itens drenados da fila por lote.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Limite de pipelines de itens executando simultaneamente.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Taxa de erro que interrompe o ciclo inteiro.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Máximo de tentativas por chamada upstream.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos para backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Teto em milissegundos para qualquer atraso de backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Estratégia de backoff: fixed, linear, exponential, exponential_jitter.
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: String,

    /// Falhas consecutivas que abrem o circuit breaker de uma operação.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Sucessos consecutivos em half-open que fecham o breaker.
    #[serde(default = "default_breaker_half_open_threshold")]
    pub breaker_half_open_threshold: u32,

    /// Tempo em milissegundos que um breaker aberto recusa chamadas.
    #[serde(default = "default_breaker_open_timeout_ms")]
    pub breaker_open_timeout_ms: u64,

    /// TTL em segundos aplicado às entradas de cache dos estágios.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Janela em milissegundos para decisões de aprovação.
    #[serde(default = "default_approval_window_ms")]
    pub approval_window_ms: u64,

    /// Intervalo em milissegundos entre verificações de decisão.
    #[serde(default = "default_approval_poll_ms")]
    pub approval_poll_ms: u64,

    /// Diretório raiz do armazenamento durável.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Dias de retenção de sessões finalizadas.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Arquivar sessões finalizadas em vez de apagá-las.
    #[serde(default)]
    pub archive_on_complete: bool,

    /// URL do serviço de revisão; ausente usa o canal de arquivos.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Token de autenticação do webhook.
    #[serde(default)]
    pub webhook_token: Option<String>,
}

// Valores padrão, um por campo, no padrão serde `default = "fn"`.
fn default_scope() -> String {
    "all-accounts".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    4
}

fn default_error_rate_threshold() -> f64 {
    0.5
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_strategy() -> String {
    "exponential_jitter".to_string()
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_half_open_threshold() -> u32 {
    2
}

fn default_breaker_open_timeout_ms() -> u64 {
    30_000
}

fn default_cache_ttl_secs() -> u64 {
    15 * 60
}

fn default_approval_window_ms() -> u64 {
    30 * 60 * 1000
}

fn default_approval_poll_ms() -> u64 {
    2000
}

fn default_data_dir() -> String {
    ".cadence".to_string()
}

fn default_retention_days() -> i64 {
    30
}

impl Default for CadenceConfig {
    fn default() -> Self {
        // O corpo TOML vazio preenche cada campo com seu default.
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl CadenceConfig {
    /// Carrega a configuração de `cadence.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("cadence.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<CadenceConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o token.
        if let Ok(token) = std::env::var("CADENCE_WEBHOOK_TOKEN")
            && !token.is_empty()
        {
            config.webhook_token = Some(token);
        }

        Ok(config)
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            error_rate_threshold: self.error_rate_threshold,
            pause_base_ms: 200,
            pause_max_ms: 10_000,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let strategy = match self.backoff_strategy.as_str() {
            "fixed" => BackoffStrategy::Fixed,
            "linear" => BackoffStrategy::Linear,
            "exponential" => BackoffStrategy::Exponential,
            _ => BackoffStrategy::ExponentialWithJitter,
        };
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            multiplier: 2.0,
            max_delay_ms: self.max_delay_ms,
            strategy,
        }
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            half_open_threshold: self.breaker_half_open_threshold,
            open_timeout: Duration::from_millis(self.breaker_open_timeout_ms),
        }
    }

    /// Monta o cache de três camadas com capacidades escalonadas e o TTL
    /// configurado limitado por camada.
    pub fn cache(&self) -> CacheManager {
        let ttl = Duration::from_secs(self.cache_ttl_secs);
        CacheManager::new(
            TierConfig {
                capacity: 64,
                max_ttl: ttl.min(Duration::from_secs(60)),
            },
            TierConfig {
                capacity: 512,
                max_ttl: ttl,
            },
            TierConfig {
                capacity: 4096,
                max_ttl: Duration::from_secs(24 * 60 * 60),
            },
        )
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = CadenceConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.error_rate_threshold, 0.5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_strategy, "exponential_jitter");
        assert_eq!(config.retention_days, 30);
        assert!(config.webhook_url.is_none());
        assert!(!config.archive_on_complete);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            batch_size = 25
            error_rate_threshold = 0.2
            webhook_url = "https://reviews.example.com"
        "#;
        let config: CadenceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.error_rate_threshold, 0.2);
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://reviews.example.com")
        );
        // Campos ausentes mantêm os defaults.
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn retry_policy_maps_strategy_names() {
        let mut config = CadenceConfig::default();
        config.backoff_strategy = "linear".into();
        assert_eq!(
            config.retry_policy().strategy,
            crate::retry::BackoffStrategy::Linear
        );

        config.backoff_strategy = "anything-else".into();
        assert_eq!(
            config.retry_policy().strategy,
            crate::retry::BackoffStrategy::ExponentialWithJitter
        );
    }

    #[test]
    fn load_falls_back_to_defaults() {
        // Em ambiente de teste normalmente não há cadence.toml no diretório.
        let config = CadenceConfig::load_from(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn breaker_config_uses_configured_timeout() {
        let toml_str = "breaker_open_timeout_ms = 5000";
        let config: CadenceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.breaker().open_timeout, Duration::from_millis(5000));
    }
}
