use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            // Bounded so a one-shot command stays responsive on a dead endpoint.
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

fn compute_backoff_delay(cfg: &BackoffConfig, round: usize) -> Duration {
    let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(cfg.base_delay.as_millis()).unwrap_or(u64::MAX);
    let mut ms = base_ms.saturating_mul(pow2);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    if ms > max_ms {
        ms = max_ms;
    }
    let jitter = if cfg!(test) || cfg.jitter_max_ms == 0 {
        0
    } else {
        // Avoid holding a non-Send RNG across await points.
        let range = cfg.jitter_max_ms.saturating_add(1);
        if range == 0 {
            0
        } else {
            rand::random::<u64>() % range
        }
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Try `op(endpoint)` across all endpoints, in order, for `rounds` rounds.
/// Sleeps with exponential backoff between rounds, only after every endpoint
/// has failed. Used when a resolution pass establishes its node client;
/// reads inside a pass fail fast instead.
pub async fn try_endpoints_with_backoff<I, T, Fut>(
    endpoints: &[I],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&I) -> Fut + Send,
    context_label: &'static str,
) -> eyre::Result<T>
where
    I: Sync,
    Fut: std::future::Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("no endpoints configured");
    }
    if cfg.rounds == 0 {
        eyre::bail!("invalid backoff config: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;

    for round in 0..cfg.rounds {
        for endpoint in endpoints {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        if round + 1 < cfg.rounds {
            let d = compute_backoff_delay(cfg, round);
            tokio::time::sleep(d).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(context_label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn visits_every_endpoint_each_round() -> eyre::Result<()> {
        let endpoints: Vec<String> = vec!["primary".into(), "fallback".into()];
        let cfg = BackoffConfig {
            rounds: 2,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            jitter_max_ms: 0,
        };

        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
        let calls2 = Arc::clone(&calls);

        let res: eyre::Result<()> = try_endpoints_with_backoff(
            &endpoints,
            &cfg,
            move |url| {
                let url = url.clone();
                let calls3 = Arc::clone(&calls2);
                async move {
                    {
                        let mut guard = calls3
                            .lock()
                            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
                        guard.push(url);
                    }
                    eyre::bail!("connect refused")
                }
            },
            "connect",
        )
        .await;
        assert!(res.is_err(), "all-failing endpoints must error");
        let got = calls
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .clone();
        assert_eq!(
            got,
            vec![
                "primary".to_owned(),
                "fallback".to_owned(),
                "primary".to_owned(),
                "fallback".to_owned()
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn returns_first_endpoint_that_answers() -> eyre::Result<()> {
        let endpoints: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let cfg = BackoffConfig {
            rounds: 3,
            ..Default::default()
        };

        let out = try_endpoints_with_backoff(
            &endpoints,
            &cfg,
            |url| {
                let s = url.clone();
                async move {
                    if s == "b" {
                        Ok(7_u64)
                    } else {
                        eyre::bail!("nope")
                    }
                }
            },
            "connect",
        )
        .await?;
        assert_eq!(out, 7_u64);
        Ok(())
    }

    #[tokio::test]
    async fn empty_endpoint_list_is_an_error() {
        let endpoints: Vec<String> = vec![];
        let res: eyre::Result<()> = try_endpoints_with_backoff(
            &endpoints,
            &BackoffConfig::default(),
            |_| async { Ok(()) },
            "connect",
        )
        .await;
        assert!(res.is_err(), "empty endpoint list accepted");
    }
}
